//! In-process media graph
//!
//! `LocalGraph` plays the remote side for the daemon and for tests. It keeps
//! a registry of globals, answers binds synchronously and delivers every
//! event and reply through the [`MainLoop`], in the order the requests were
//! made. Events for a global that has been removed by the time they are
//! dispatched are dropped.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use tracing::{debug, info, warn};

use super::{LinkRequest, ProxyListener, RemoteConnection, RemoteHandle, Reply};
use crate::collection::ObjectCollection;
use crate::endpoint::{Endpoint, EndpointDescriptor, EndpointLink, LinkState};
use crate::error::{Error, Result};
use crate::main_loop::MainLoop;
use crate::object::{InterfaceType, ManagedObject};
use crate::properties::Properties;
use crate::signal::{HandlerId, Signal};

/// Factories `create_object` accepts
const FACTORIES: &[&str] = &["adapter", "spa-node-factory", "endpoint"];

/// Interface version reported for every global
const VERSION: u32 = 3;

struct Global {
    interface: InterfaceType,
    props: Properties,
    listeners: Vec<Weak<dyn ProxyListener>>,
}

#[derive(Default)]
struct GraphState {
    connected: bool,
    next_id: u32,
    globals: BTreeMap<u32, Global>,
    links: BTreeMap<u32, EndpointLink>,
    fail_next_link: Option<String>,
    link_requests: usize,
}

pub struct LocalGraph {
    me: Weak<LocalGraph>,
    main_loop: MainLoop,
    collection: ObjectCollection,
    state: RefCell<GraphState>,
    disconnected: Signal<()>,
}

impl LocalGraph {
    /// Graph publishing its endpoints and links into `collection`
    pub fn new(main_loop: &MainLoop, collection: &ObjectCollection) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            main_loop: main_loop.clone(),
            collection: collection.clone(),
            state: RefCell::new(GraphState {
                // Id 0 belongs to the core object
                next_id: 1,
                ..GraphState::default()
            }),
            disconnected: Signal::new(),
        })
    }

    fn remote(&self) -> Option<Rc<dyn RemoteConnection>> {
        self.me.upgrade().map(|graph| graph as Rc<dyn RemoteConnection>)
    }

    /// Announce a new global and return its id
    pub fn add_global(&self, interface: InterfaceType, props: Properties) -> u32 {
        let mut state = self.state.borrow_mut();
        let id = state.next_id;
        state.next_id += 1;
        state.globals.insert(
            id,
            Global {
                interface,
                props,
                listeners: Vec::new(),
            },
        );
        debug!(id, %interface, "global added");
        id
    }

    pub fn has_global(&self, id: u32) -> bool {
        self.state.borrow().globals.contains_key(&id)
    }

    pub fn global_properties(&self, id: u32) -> Option<Properties> {
        self.state.borrow().globals.get(&id).map(|g| g.props.clone())
    }

    /// Remove a global as if the remote side destroyed it. Links touching an
    /// endpoint global go away first; listeners hear about it on the next
    /// dispatch.
    pub fn destroy_global(&self, id: u32) {
        if let Some(endpoint) = self.collection.find_by_global(id) {
            for link in endpoint.links() {
                self.destroy_link(&link);
            }
        }

        let Some(global) = self.state.borrow_mut().globals.remove(&id) else {
            return;
        };
        debug!(id, interface = %global.interface, "global removed");
        let listeners = global.listeners;
        self.main_loop.invoke(move || {
            for listener in listeners.iter().filter_map(Weak::upgrade) {
                listener.destroyed();
            }
        });
    }

    /// Queue `event` for every listener of global `id`
    fn deliver(&self, id: u32, event: impl Fn(&dyn ProxyListener) + 'static) {
        let me = self.me.clone();
        self.main_loop.invoke(move || {
            let Some(graph) = me.upgrade() else {
                return;
            };
            let listeners = match graph.state.borrow().globals.get(&id) {
                Some(global) => global.listeners.clone(),
                None => return,
            };
            for listener in listeners.iter().filter_map(Weak::upgrade) {
                event(listener.as_ref());
            }
        });
    }

    fn deliver_info(&self, id: u32) {
        let Some(props) = self.global_properties(id) else {
            return;
        };
        self.deliver(id, move |listener| listener.info(&props));
    }

    /// Push an info update for global `id`, as a remote change would
    pub fn update_info(&self, id: u32, changes: Properties) {
        if let Some(global) = self.state.borrow_mut().globals.get_mut(&id) {
            global.props.update(&changes);
        }
        self.deliver(id, move |listener| listener.info(&changes));
    }

    // =========================================================================
    // Endpoints
    // =========================================================================

    /// Announce an endpoint the way a client appearing on the remote side
    /// would: a registry global, a stub object, then exposure through the
    /// collection once it is ready
    pub fn add_endpoint(&self, descriptor: &EndpointDescriptor) -> Result<Endpoint> {
        let remote = self
            .remote()
            .ok_or_else(|| Error::operation_failed("graph is gone"))?;
        let props = descriptor.to_properties();
        let id = self.add_global(InterfaceType::Endpoint, props.clone());
        let object = ManagedObject::from_global(&remote, id, InterfaceType::Endpoint, VERSION, props.clone());
        let endpoint = Endpoint::from_properties(object, &props)?;
        self.collection.expose(endpoint.clone());
        Ok(endpoint)
    }

    pub fn remove_endpoint(&self, endpoint: &Endpoint) {
        if let Some(id) = endpoint.global_id() {
            self.destroy_global(id);
        }
    }

    // =========================================================================
    // Links
    // =========================================================================

    /// Make the next `create_link` fail with `reason`
    pub fn fail_next_link(&self, reason: impl Into<String>) {
        self.state.borrow_mut().fail_next_link = Some(reason.into());
    }

    /// Number of `create_link` calls received so far
    pub fn link_requests(&self) -> usize {
        self.state.borrow().link_requests
    }

    pub fn links(&self) -> Vec<EndpointLink> {
        self.state.borrow().links.values().cloned().collect()
    }

    fn finish_link(&self, request: LinkRequest) -> Result<EndpointLink> {
        if let Some(reason) = self.state.borrow_mut().fail_next_link.take() {
            return Err(Error::operation_failed(reason));
        }
        for endpoint in [&request.source, &request.sink] {
            let alive = endpoint.global_id().map_or(false, |id| self.has_global(id));
            if !alive {
                return Err(Error::operation_failed(format!(
                    "endpoint {} is gone",
                    endpoint.name()
                )));
            }
        }

        let props = Properties::new()
            .with("link.source", request.source.name())
            .with("link.sink", request.sink.name());
        let id = self.add_global(InterfaceType::EndpointLink, props);
        let link = EndpointLink::new(
            id,
            request.source.clone(),
            request.source_stream,
            request.sink.clone(),
            request.sink_stream,
            request.keep,
        );
        request.source.attach_link(&link);
        request.sink.attach_link(&link);
        self.state.borrow_mut().links.insert(id, link.clone());
        info!(
            id,
            source = request.source.name(),
            sink = request.sink.name(),
            "link created"
        );
        self.collection.add_link(link.clone());
        Ok(link)
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Drop the connection; every global goes away
    pub fn disconnect(&self) {
        if !std::mem::take(&mut self.state.borrow_mut().connected) {
            return;
        }
        let ids: Vec<u32> = self.state.borrow().globals.keys().copied().collect();
        for id in ids {
            self.destroy_global(id);
        }
        warn!("disconnected from media graph");
        self.disconnected.emit(&());
    }

    pub fn connect_disconnected(&self, handler: impl Fn(&()) + 'static) -> HandlerId {
        self.disconnected.connect(handler)
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state.borrow().connected {
            Ok(())
        } else {
            Err(Error::operation_failed("not connected to the media graph"))
        }
    }
}

impl RemoteConnection for LocalGraph {
    fn connect(&self, done: Reply<()>) {
        self.state.borrow_mut().connected = true;
        self.main_loop.invoke(move || done(Ok(())));
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn bind(
        &self,
        global_id: u32,
        interface: InterfaceType,
        listener: Weak<dyn ProxyListener>,
    ) -> Result<RemoteHandle> {
        self.ensure_connected()?;
        {
            let mut state = self.state.borrow_mut();
            let global = state
                .globals
                .get_mut(&global_id)
                .ok_or_else(|| Error::operation_failed(format!("no global {global_id}")))?;
            if global.interface != interface {
                return Err(Error::InvalidArgument(format!(
                    "global {global_id} is a {}, not a {interface}",
                    global.interface
                )));
            }
            global.listeners.push(listener);
        }
        self.deliver_info(global_id);
        Ok(RemoteHandle::new(global_id, interface, VERSION))
    }

    fn add_listener(&self, handle: &RemoteHandle, listener: Weak<dyn ProxyListener>) {
        let known = match self.state.borrow_mut().globals.get_mut(&handle.id()) {
            Some(global) => {
                global.listeners.push(listener);
                true
            }
            None => false,
        };
        if known {
            self.deliver_info(handle.id());
        }
    }

    fn create_object(
        &self,
        factory: &str,
        interface: InterfaceType,
        props: &Properties,
    ) -> Result<RemoteHandle> {
        self.ensure_connected()?;
        if !FACTORIES.contains(&factory) {
            return Err(Error::NotFound(format!("factory {factory}")));
        }
        let props = props.clone().with("factory.name", factory);
        let id = self.add_global(interface, props);
        Ok(RemoteHandle::new(id, interface, VERSION))
    }

    fn destroy_object(&self, handle: &RemoteHandle) {
        self.destroy_global(handle.id());
    }

    fn enum_params(&self, handle: &RemoteHandle) {
        let params = Properties::new()
            .with("object.id", handle.id().to_string())
            .with("param.format", "audio/raw");
        self.deliver(handle.id(), move |listener| listener.params(&params));
    }

    fn barrier(&self, done: Box<dyn FnOnce()>) {
        self.main_loop.invoke(done);
    }

    fn create_link(&self, request: LinkRequest, done: Reply<EndpointLink>) {
        self.state.borrow_mut().link_requests += 1;
        let me = self.me.clone();
        self.main_loop.invoke(move || match me.upgrade() {
            Some(graph) => done(graph.finish_link(request)),
            None => done(Err(Error::operation_failed("graph is gone"))),
        });
    }

    fn destroy_link(&self, link: &EndpointLink) {
        let removed = self.state.borrow_mut().links.remove(&link.id());
        if removed.is_none() {
            return;
        }
        self.state.borrow_mut().globals.remove(&link.id());
        link.source().detach_link(link);
        link.sink().detach_link(link);
        link.set_state(LinkState::Inactive);
        info!(
            id = link.id(),
            source = link.source().name(),
            sink = link.sink().name(),
            "link destroyed"
        );
        self.collection.remove_link(link);
    }

    fn request_link_state(&self, link: &EndpointLink, state: LinkState) {
        if !self.state.borrow().links.contains_key(&link.id()) {
            return;
        }
        if state == LinkState::Active {
            link.set_state(LinkState::Activating);
        }
        let link = link.clone();
        let me = self.me.clone();
        self.main_loop.invoke(move || {
            let alive = me
                .upgrade()
                .map_or(false, |graph| graph.state.borrow().links.contains_key(&link.id()));
            if alive {
                link.set_state(state);
            }
        });
    }
}

impl std::fmt::Debug for LocalGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("LocalGraph")
            .field("connected", &state.connected)
            .field("globals", &state.globals.len())
            .field("links", &state.links.len())
            .finish()
    }
}
