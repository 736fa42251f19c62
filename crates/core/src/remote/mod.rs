//! Contract with the media-graph service
//!
//! The session core never talks to a transport directly. Everything it needs
//! from the remote side goes through [`RemoteConnection`]; replies arrive
//! later through callbacks or through the [`ProxyListener`] registered for a
//! bound object.

pub mod local;

use std::rc::Weak;

use crate::endpoint::{Endpoint, EndpointLink, LinkState};
use crate::error::Result;
use crate::object::InterfaceType;
use crate::properties::Properties;

pub use local::LocalGraph;

/// Callback receiving an asynchronous remote reply
pub type Reply<T> = Box<dyn FnOnce(Result<T>)>;

/// Single-owner handle to a remote resource
///
/// Not `Clone`: the managed object that holds it is the only owner, and the
/// slot is emptied when the remote side goes away.
#[derive(Debug, PartialEq, Eq)]
pub struct RemoteHandle {
    id: u32,
    interface: InterfaceType,
    version: u32,
}

impl RemoteHandle {
    pub fn new(id: u32, interface: InterfaceType, version: u32) -> Self {
        Self {
            id,
            interface,
            version,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn interface(&self) -> InterfaceType {
        self.interface
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

/// Events the remote side pushes for a bound object
pub trait ProxyListener {
    /// Full or incremental info for the object
    fn info(&self, info: &Properties);

    /// Result of an `enum_params` call
    fn params(&self, params: &Properties);

    /// The remote resource is gone
    fn destroyed(&self);
}

/// A request to connect two endpoints
#[derive(Debug, Clone)]
pub struct LinkRequest {
    pub source: Endpoint,
    pub source_stream: Option<u32>,
    pub sink: Endpoint,
    pub sink_stream: Option<u32>,
    /// Survive target reassignment
    pub keep: bool,
}

/// Operations the session core needs from the media-graph service
pub trait RemoteConnection {
    /// Establish the connection; `done` runs once it is usable
    fn connect(&self, done: Reply<()>);

    fn is_connected(&self) -> bool;

    /// Attach to an announced global. Binding is synchronous; events for the
    /// new handle are delivered to `listener`.
    fn bind(
        &self,
        global_id: u32,
        interface: InterfaceType,
        listener: Weak<dyn ProxyListener>,
    ) -> Result<RemoteHandle>;

    /// Route events for an already owned handle to `listener`
    fn add_listener(&self, handle: &RemoteHandle, listener: Weak<dyn ProxyListener>);

    /// Create a new remote object through a named factory
    fn create_object(
        &self,
        factory: &str,
        interface: InterfaceType,
        props: &Properties,
    ) -> Result<RemoteHandle>;

    fn destroy_object(&self, handle: &RemoteHandle);

    /// Ask for the object's parameters; answered through
    /// [`ProxyListener::params`]
    fn enum_params(&self, handle: &RemoteHandle);

    /// Run `done` after every request issued before this call was processed
    fn barrier(&self, done: Box<dyn FnOnce()>);

    fn create_link(&self, request: LinkRequest, done: Reply<EndpointLink>);

    fn destroy_link(&self, link: &EndpointLink);

    fn request_link_state(&self, link: &EndpointLink, state: LinkState);
}
