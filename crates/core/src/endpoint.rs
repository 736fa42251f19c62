//! Session endpoints and the links between them

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::object::ManagedObject;
use crate::properties::Properties;
use crate::signal::{HandlerId, Signal};

/// Property keys used to describe endpoints on the remote side
pub mod keys {
    pub const NAME: &str = "endpoint.name";
    pub const MEDIA_CLASS: &str = "media.class";
    pub const DIRECTION: &str = "endpoint.direction";
    pub const ROLE: &str = "media.role";
    pub const PRIORITY: &str = "endpoint.priority";
    pub const STREAMS: &str = "endpoint.streams";
    pub const NODE_ID: &str = "node.id";
}

/// Which way media flows through an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Consumes media: sinks and capture clients
    Input,
    /// Produces media: sources and playback clients
    Output,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "input" => Some(Direction::Input),
            "output" => Some(Direction::Output),
            _ => None,
        }
    }
}

/// One named stream of an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub id: u32,
    pub name: String,
}

/// Declarative description of an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub name: String,
    pub media_class: String,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub streams: Vec<String>,
    /// Factory used for the backing node when the endpoint is created locally
    #[serde(default = "default_factory")]
    pub factory: String,
    #[serde(default)]
    pub properties: Properties,
}

fn default_factory() -> String {
    "adapter".to_string()
}

impl EndpointDescriptor {
    pub fn new(name: impl Into<String>, media_class: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            media_class: media_class.into(),
            direction,
            role: None,
            priority: 0,
            streams: Vec::new(),
            factory: default_factory(),
            properties: Properties::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_streams<I, S>(mut self, streams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.streams = streams.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Flatten into remote-side properties
    pub fn to_properties(&self) -> Properties {
        let mut props = self.properties.clone();
        props.insert(keys::NAME, self.name.as_str());
        props.insert(keys::MEDIA_CLASS, self.media_class.as_str());
        props.insert(keys::DIRECTION, self.direction.as_str());
        props.insert(keys::PRIORITY, self.priority.to_string());
        if let Some(role) = &self.role {
            props.insert(keys::ROLE, role.as_str());
        }
        if !self.streams.is_empty() {
            props.insert(keys::STREAMS, self.streams.join(","));
        }
        props
    }
}

/// Activation state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Inactive,
    Activating,
    Active,
    Error,
}

// =============================================================================
// Endpoint
// =============================================================================

struct EndpointInner {
    object: ManagedObject,
    name: String,
    media_class: String,
    direction: Direction,
    role: Option<String>,
    priority: u32,
    properties: Properties,
    streams: Vec<StreamInfo>,
    links: RefCell<Vec<EndpointLink>>,
    backing: Option<ManagedObject>,
}

/// An endpoint in the session graph, backed by a managed object
///
/// Equality is identity: two handles are equal when they refer to the same
/// endpoint.
#[derive(Clone)]
pub struct Endpoint(Rc<EndpointInner>);

/// Non-owning reference to an [`Endpoint`]
#[derive(Clone)]
pub struct WeakEndpoint(Weak<EndpointInner>);

impl WeakEndpoint {
    pub fn upgrade(&self) -> Option<Endpoint> {
        self.0.upgrade().map(Endpoint)
    }
}

impl Endpoint {
    /// Build an endpoint from its remote-side properties
    pub fn from_properties(object: ManagedObject, props: &Properties) -> Result<Self> {
        Self::build(object, props, None)
    }

    /// Like [`from_properties`](Self::from_properties) for an endpoint that
    /// owns the node it exposes
    pub fn with_backing(object: ManagedObject, props: &Properties, backing: ManagedObject) -> Result<Self> {
        Self::build(object, props, Some(backing))
    }

    fn build(object: ManagedObject, props: &Properties, backing: Option<ManagedObject>) -> Result<Self> {
        let name = props
            .get(keys::NAME)
            .ok_or_else(|| Error::InvalidArgument(format!("endpoint without {}", keys::NAME)))?;
        let media_class = props.get(keys::MEDIA_CLASS).ok_or_else(|| {
            Error::InvalidArgument(format!("endpoint {name} without {}", keys::MEDIA_CLASS))
        })?;
        let direction = match props.get(keys::DIRECTION) {
            Some(d) => Direction::parse(d).ok_or_else(|| {
                Error::InvalidArgument(format!("endpoint {name} has bad direction {d:?}"))
            })?,
            None => Direction::Output,
        };
        let priority = match props.get(keys::PRIORITY) {
            Some(p) => p.parse().map_err(|_| {
                Error::InvalidArgument(format!("endpoint {name} has bad priority {p:?}"))
            })?,
            None => 0,
        };
        let streams = props
            .get(keys::STREAMS)
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .enumerate()
                    .map(|(id, name)| StreamInfo {
                        id: id as u32,
                        name: name.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self(Rc::new(EndpointInner {
            name: name.to_string(),
            media_class: media_class.to_string(),
            direction,
            role: props.get(keys::ROLE).map(str::to_string),
            priority,
            properties: props.clone(),
            streams,
            links: RefCell::new(Vec::new()),
            object,
            backing,
        })))
    }

    pub fn object(&self) -> &ManagedObject {
        &self.0.object
    }

    pub fn backing(&self) -> Option<&ManagedObject> {
        self.0.backing.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn media_class(&self) -> &str {
        &self.0.media_class
    }

    pub fn direction(&self) -> Direction {
        self.0.direction
    }

    /// Input endpoints on the client side are capture streams
    pub fn is_capture(&self) -> bool {
        self.0.direction == Direction::Input
    }

    pub fn role(&self) -> Option<&str> {
        self.0.role.as_deref()
    }

    pub fn priority(&self) -> u32 {
        self.0.priority
    }

    pub fn properties(&self) -> &Properties {
        &self.0.properties
    }

    pub fn global_id(&self) -> Option<u32> {
        self.0.object.global_id()
    }

    pub fn streams(&self) -> &[StreamInfo] {
        &self.0.streams
    }

    pub fn find_stream(&self, name: &str) -> Option<u32> {
        self.0.streams.iter().find(|s| s.name == name).map(|s| s.id)
    }

    pub fn stream_name(&self, id: u32) -> Option<&str> {
        self.0
            .streams
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.name.as_str())
    }

    pub fn links(&self) -> Vec<EndpointLink> {
        self.0.links.borrow().clone()
    }

    pub fn is_linked(&self) -> bool {
        !self.0.links.borrow().is_empty()
    }

    pub(crate) fn attach_link(&self, link: &EndpointLink) {
        let mut links = self.0.links.borrow_mut();
        if !links.contains(link) {
            links.push(link.clone());
        }
    }

    pub(crate) fn detach_link(&self, link: &EndpointLink) {
        self.0.links.borrow_mut().retain(|l| l != link);
    }

    pub fn downgrade(&self) -> WeakEndpoint {
        WeakEndpoint(Rc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Endpoint) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Endpoint {}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.0.name)
            .field("media_class", &self.0.media_class)
            .field("direction", &self.0.direction)
            .field("global_id", &self.global_id())
            .field("links", &self.0.links.borrow().len())
            .finish()
    }
}

// =============================================================================
// EndpointLink
// =============================================================================

struct LinkInner {
    id: u32,
    source: Endpoint,
    source_stream: Option<u32>,
    sink: Endpoint,
    sink_stream: Option<u32>,
    keep: bool,
    state: Cell<LinkState>,
    state_changed: Signal<LinkState>,
}

/// A connection from a source endpoint to a sink endpoint
#[derive(Clone)]
pub struct EndpointLink(Rc<LinkInner>);

impl EndpointLink {
    pub fn new(
        id: u32,
        source: Endpoint,
        source_stream: Option<u32>,
        sink: Endpoint,
        sink_stream: Option<u32>,
        keep: bool,
    ) -> Self {
        Self(Rc::new(LinkInner {
            id,
            source,
            source_stream,
            sink,
            sink_stream,
            keep,
            state: Cell::new(LinkState::Inactive),
            state_changed: Signal::new(),
        }))
    }

    pub fn id(&self) -> u32 {
        self.0.id
    }

    pub fn source(&self) -> &Endpoint {
        &self.0.source
    }

    pub fn source_stream(&self) -> Option<u32> {
        self.0.source_stream
    }

    pub fn sink(&self) -> &Endpoint {
        &self.0.sink
    }

    pub fn sink_stream(&self) -> Option<u32> {
        self.0.sink_stream
    }

    pub fn keep(&self) -> bool {
        self.0.keep
    }

    pub fn state(&self) -> LinkState {
        self.0.state.get()
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        if self.0.state.replace(state) != state {
            self.0.state_changed.emit(&state);
        }
    }

    pub fn connect_state_changed(&self, handler: impl Fn(&LinkState) + 'static) -> HandlerId {
        self.0.state_changed.connect(handler)
    }

    /// `true` if this link runs from `source` to `sink`
    pub fn connects(&self, source: &Endpoint, sink: &Endpoint) -> bool {
        self.0.source == *source && self.0.sink == *sink
    }
}

impl PartialEq for EndpointLink {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for EndpointLink {}

impl std::fmt::Debug for EndpointLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointLink")
            .field("id", &self.0.id)
            .field("source", &self.0.source.name())
            .field("source_stream", &self.0.source_stream)
            .field("sink", &self.0.sink.name())
            .field("sink_stream", &self.0.sink_stream)
            .field("keep", &self.0.keep)
            .field("state", &self.0.state.get())
            .finish()
    }
}
