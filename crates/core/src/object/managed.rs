//! Remote-backed objects and the augmentation protocol
//!
//! A [`ManagedObject`] reaches a usable state asynchronously. Callers
//! [`request`](ManagedObject::request) a feature set; the object works out
//! which flags are missing, installs a single pending completion and starts
//! acquiring them. Remote events then [`mark_ready`](ManagedObject::mark_ready)
//! flags one at a time until the wanted set is satisfied, or
//! [`fail`](ManagedObject::fail) the request.
//!
//! ```text
//! request(INFO) ──► missing = BOUND|INFO ──► bind() ──► mark_ready(BOUND)
//!                                                  ╰──► info event ──► mark_ready(INFO) ──► resolved
//! ```

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use super::completion::{Augment, Completion};
use super::interface::{self, InterfaceEntry, InterfaceType};
use crate::error::{Error, Result};
use crate::features::Features;
use crate::properties::Properties;
use crate::remote::{ProxyListener, RemoteConnection, RemoteHandle};
use crate::signal::{HandlerId, Signal};

#[derive(Default)]
struct ObjectState {
    ready: Features,
    wanted: Features,
    pending: Option<Completion>,
    handle: Option<RemoteHandle>,
    info: Option<Properties>,
    params: Option<Properties>,
    torn_down: bool,
}

struct ObjectInner {
    me: Weak<ObjectInner>,
    remote: Weak<dyn RemoteConnection>,
    interface: InterfaceType,
    version: u32,
    entry: &'static InterfaceEntry,
    global_id: Option<u32>,
    global_props: Properties,
    state: RefCell<ObjectState>,
    features_changed: Signal<Features>,
    created: Signal<()>,
    destroyed: Signal<()>,
    info_changed: Signal<Properties>,
}

/// Shared handle to one remote-backed resource
#[derive(Clone)]
pub struct ManagedObject {
    inner: Rc<ObjectInner>,
}

/// Non-owning reference to a [`ManagedObject`]
#[derive(Clone)]
pub struct WeakObject {
    inner: Weak<ObjectInner>,
}

impl WeakObject {
    pub fn upgrade(&self) -> Option<ManagedObject> {
        self.inner.upgrade().map(|inner| ManagedObject { inner })
    }
}

impl ManagedObject {
    fn build(
        remote: &Rc<dyn RemoteConnection>,
        interface: InterfaceType,
        version: u32,
        global_id: Option<u32>,
        global_props: Properties,
        state: ObjectState,
    ) -> Self {
        let inner = Rc::new_cyclic(|me| ObjectInner {
            me: me.clone(),
            remote: Rc::downgrade(remote),
            interface,
            version,
            entry: interface::lookup(interface, version),
            global_id,
            global_props,
            state: RefCell::new(state),
            features_changed: Signal::new(),
            created: Signal::new(),
            destroyed: Signal::new(),
            info_changed: Signal::new(),
        });
        Self { inner }
    }

    /// Stub for a global announced by the remote registry. Unbound, nothing
    /// ready; binding happens on the first request.
    pub fn from_global(
        remote: &Rc<dyn RemoteConnection>,
        global_id: u32,
        interface: InterfaceType,
        version: u32,
        props: Properties,
    ) -> Self {
        Self::build(
            remote,
            interface,
            version,
            Some(global_id),
            props,
            ObjectState::default(),
        )
    }

    /// Wrap a handle that is already bound, typically a locally created
    /// object. `BOUND` is ready from the start and `created` is not emitted.
    pub fn wrap(remote: &Rc<dyn RemoteConnection>, handle: RemoteHandle, props: Properties) -> Self {
        let interface = handle.interface();
        let version = handle.version();
        let global_id = Some(handle.id());
        let object = Self::build(
            remote,
            interface,
            version,
            global_id,
            props,
            ObjectState {
                ready: Features::BOUND,
                ..ObjectState::default()
            },
        );

        remote.add_listener(&handle, object.listener());
        object.inner.state.borrow_mut().handle = Some(handle);
        object
    }

    /// Object with neither a handle nor a registry identity. Any request
    /// that needs binding fails.
    pub fn unbound(remote: &Rc<dyn RemoteConnection>, interface: InterfaceType, version: u32) -> Self {
        Self::build(
            remote,
            interface,
            version,
            None,
            Properties::new(),
            ObjectState::default(),
        )
    }

    fn listener(&self) -> Weak<dyn ProxyListener> {
        let weak: Weak<ObjectInner> = self.inner.me.clone();
        weak
    }

    // =========================================================================
    // Augmentation protocol
    // =========================================================================

    /// Ask for `wanted` and get a future for the outcome
    pub fn request(&self, wanted: Features) -> Augment {
        let (completion, augment) = Completion::channel();
        self.request_with(wanted, completion);
        augment
    }

    /// Callback form of [`request`](Self::request)
    ///
    /// Rejects the request with an invariant violation when another one is
    /// still pending, and with an operation failure once the remote side is
    /// gone. Otherwise the wanted set grows by `wanted` and `completion` is
    /// resolved once every wanted flag is ready.
    pub fn request_with(&self, wanted: Features, completion: Completion) {
        let missing = {
            let mut state = self.inner.state.borrow_mut();
            if state.torn_down {
                drop(state);
                completion.fail(Error::operation_failed(format!(
                    "{} was destroyed",
                    self.describe()
                )));
                return;
            }
            if state.pending.is_some() {
                drop(state);
                completion.fail(Error::invariant(format!(
                    "{} already has a feature request in progress",
                    self.describe()
                )));
                return;
            }

            state.wanted |= wanted;
            let missing = state.ready.missing_from(state.wanted);
            if missing.is_empty() {
                drop(state);
                trace!(object = %self.describe(), ?wanted, "features already ready");
                completion.succeed();
                return;
            }
            state.pending = Some(completion);
            missing
        };

        debug!(object = %self.describe(), ?missing, "acquiring features");
        self.acquire(missing);
    }

    /// Record that `features` became available
    ///
    /// Flags already ready are ignored. Resolves the pending request when
    /// the wanted set is now complete.
    pub fn mark_ready(&self, features: Features) {
        let (ready, completion) = {
            let mut state = self.inner.state.borrow_mut();
            if state.torn_down {
                trace!(object = %self.describe(), ?features, "ignoring readiness after teardown");
                return;
            }
            let new = features - state.ready;
            if new.is_empty() {
                return;
            }
            state.ready |= new;
            let completion = if state.ready.satisfies(state.wanted) {
                state.pending.take()
            } else {
                None
            };
            (state.ready, completion)
        };

        self.inner.features_changed.emit(&ready);
        if let Some(completion) = completion {
            completion.succeed();
        }
    }

    /// Fail the pending request, if there is one
    pub fn fail(&self, error: Error) {
        let pending = self.inner.state.borrow_mut().pending.take();
        match pending {
            Some(completion) => {
                warn!(object = %self.describe(), %error, "feature request failed");
                completion.fail(error);
            }
            None => debug!(object = %self.describe(), %error, "no pending request, dropping error"),
        }
    }

    /// Default acquisition: bind first, then wait for or ask for the rest
    fn acquire(&self, missing: Features) {
        let missing = missing.with_prerequisites(self.is_bound());
        let unsupported = missing - self.inner.entry.features;
        if !unsupported.is_empty() {
            self.fail(Error::InvalidArgument(format!(
                "{} cannot provide {:?}",
                self.inner.entry.name, unsupported
            )));
            return;
        }

        for feature in missing.acquisition_order() {
            if feature == Features::BOUND {
                if let Err(e) = self.bind() {
                    self.fail(e);
                    return;
                }
            } else if feature == Features::INFO {
                // Arrives as a remote event after binding
                if self.inner.state.borrow().info.is_some() {
                    self.mark_ready(Features::INFO);
                }
            } else if feature == Features::PARAMS {
                if let Err(e) = self.enum_params() {
                    self.fail(e);
                    return;
                }
            }
        }
    }

    fn bind(&self) -> Result<()> {
        if self.is_bound() {
            return Ok(());
        }
        let global_id = self
            .inner
            .global_id
            .ok_or_else(|| Error::invariant("no global id specified; cannot bind"))?;
        let remote = self.remote()?;

        let handle = remote.bind(global_id, self.inner.interface, self.listener())?;
        self.inner.state.borrow_mut().handle = Some(handle);
        debug!(object = %self.describe(), "bound");

        self.inner.created.emit(&());
        self.mark_ready(Features::BOUND);
        Ok(())
    }

    fn enum_params(&self) -> Result<()> {
        let remote = self.remote()?;
        let state = self.inner.state.borrow();
        let handle = state
            .handle
            .as_ref()
            .ok_or_else(|| Error::operation_failed("cannot enumerate params of an unbound object"))?;
        remote.enum_params(handle);
        Ok(())
    }

    fn remote(&self) -> Result<Rc<dyn RemoteConnection>> {
        self.inner
            .remote
            .upgrade()
            .ok_or_else(|| Error::operation_failed("remote connection is gone"))
    }

    /// Ask the remote side to destroy the backing resource. The destroy
    /// notification follows once the remote confirms.
    pub fn destroy(&self) {
        let Ok(remote) = self.remote() else {
            return;
        };
        if let Some(handle) = self.inner.state.borrow().handle.as_ref() {
            remote.destroy_object(handle);
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn features(&self) -> Features {
        self.inner.state.borrow().ready
    }

    pub fn wanted(&self) -> Features {
        self.inner.state.borrow().wanted
    }

    pub fn has_pending_request(&self) -> bool {
        self.inner.state.borrow().pending.is_some()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.state.borrow().handle.is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.borrow().torn_down
    }

    pub fn global_id(&self) -> Option<u32> {
        self.inner.global_id
    }

    pub fn interface(&self) -> InterfaceType {
        self.inner.interface
    }

    pub fn version(&self) -> u32 {
        self.inner.version
    }

    /// Properties announced with the global, or given at creation
    pub fn global_properties(&self) -> &Properties {
        &self.inner.global_props
    }

    /// Cached remote info, once received
    pub fn info(&self) -> Option<Properties> {
        self.inner.state.borrow().info.clone()
    }

    pub fn params(&self) -> Option<Properties> {
        self.inner.state.borrow().params.clone()
    }

    pub fn downgrade(&self) -> WeakObject {
        WeakObject {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &ManagedObject) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Called with the full ready set each time new flags become ready
    pub fn connect_features_changed(&self, handler: impl Fn(&Features) + 'static) -> HandlerId {
        self.inner.features_changed.connect(handler)
    }

    pub fn connect_created(&self, handler: impl Fn(&()) + 'static) -> HandlerId {
        self.inner.created.connect(handler)
    }

    pub fn connect_destroyed(&self, handler: impl Fn(&()) + 'static) -> HandlerId {
        self.inner.destroyed.connect(handler)
    }

    pub fn disconnect_destroyed(&self, id: HandlerId) -> bool {
        self.inner.destroyed.disconnect(id)
    }

    pub fn connect_info_changed(&self, handler: impl Fn(&Properties) + 'static) -> HandlerId {
        self.inner.info_changed.connect(handler)
    }
}

impl ObjectInner {
    fn describe(&self) -> String {
        match self.global_id {
            Some(id) => format!("{}#{}", self.entry.name, id),
            None => format!("{}(unbound)", self.entry.name),
        }
    }

    fn object(&self) -> Option<ManagedObject> {
        self.me.upgrade().map(|inner| ManagedObject { inner })
    }
}

impl ProxyListener for ObjectInner {
    fn info(&self, info: &Properties) {
        let snapshot = {
            let mut state = self.state.borrow_mut();
            if state.torn_down {
                return;
            }
            if (self.entry.merge_info)(&mut state.info, info) {
                state.info.clone()
            } else {
                None
            }
        };
        if let Some(snapshot) = snapshot {
            self.info_changed.emit(&snapshot);
        }
        if let Some(object) = self.object() {
            object.mark_ready(Features::INFO);
        }
    }

    fn params(&self, params: &Properties) {
        {
            let mut state = self.state.borrow_mut();
            if state.torn_down {
                return;
            }
            state.params = Some(params.clone());
        }
        if let Some(object) = self.object() {
            object.mark_ready(Features::PARAMS);
        }
    }

    fn destroyed(&self) {
        // Empty the handle slot, freeze `ready` and take the pending request
        // in one step so nothing can observe a half torn down object.
        let pending = {
            let mut state = self.state.borrow_mut();
            if state.torn_down {
                return;
            }
            state.handle = None;
            state.torn_down = true;
            state.pending.take()
        };

        debug!(object = %self.describe(), "remote object destroyed");
        self.destroyed.emit(&());

        if let Some(completion) = pending {
            completion.fail(Error::operation_failed(
                "remote object destroyed before the request finished",
            ));
        }
    }
}

impl PartialEq for ManagedObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ManagedObject {}

impl std::fmt::Debug for ManagedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("ManagedObject")
            .field("interface", &self.inner.interface)
            .field("global_id", &self.inner.global_id)
            .field("ready", &state.ready)
            .field("wanted", &state.wanted)
            .field("bound", &state.handle.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::ObjectCollection;
    use crate::main_loop::MainLoop;
    use crate::remote::LocalGraph;
    use std::cell::Cell;

    fn connected_graph() -> (MainLoop, Rc<LocalGraph>, Rc<dyn RemoteConnection>) {
        let main_loop = MainLoop::new();
        let graph = LocalGraph::new(&main_loop, &ObjectCollection::new());
        graph.connect(Box::new(|_| {}));
        main_loop.run_until_idle();
        let remote: Rc<dyn RemoteConnection> = graph.clone();
        (main_loop, graph, remote)
    }

    fn node_stub(graph: &LocalGraph, remote: &Rc<dyn RemoteConnection>) -> ManagedObject {
        let props = Properties::new().with("node.name", "test-node");
        let id = graph.add_global(InterfaceType::Node, props.clone());
        ManagedObject::from_global(remote, id, InterfaceType::Node, 3, props)
    }

    #[test]
    fn test_request_binds_then_waits_for_info() {
        let (main_loop, graph, remote) = connected_graph();
        let object = node_stub(&graph, &remote);

        let mut augment = object.request(Features::INFO);
        // Bind is synchronous and pulled in implicitly
        assert!(object.features().contains(Features::BOUND));
        assert_eq!(object.wanted(), Features::INFO);
        assert!(augment.try_result().is_none());

        main_loop.run_until_idle();
        assert!(matches!(augment.try_result(), Some(Ok(()))));
        assert_eq!(object.features(), Features::STANDARD);
        assert_eq!(
            object.info().as_ref().and_then(|i| i.get("node.name").map(str::to_owned)),
            Some("test-node".to_string())
        );
    }

    #[test]
    fn test_repeated_request_resolves_immediately() {
        let (main_loop, graph, remote) = connected_graph();
        let object = node_stub(&graph, &remote);

        let _first = object.request(Features::STANDARD);
        main_loop.run_until_idle();

        let changes = Rc::new(Cell::new(0));
        let c = Rc::clone(&changes);
        object.connect_features_changed(move |_| c.set(c.get() + 1));
        let queued = main_loop.pending();

        let mut second = object.request(Features::STANDARD);
        assert!(matches!(second.try_result(), Some(Ok(()))));
        assert!(!object.has_pending_request());
        assert_eq!(object.wanted(), Features::STANDARD);
        // Nothing new was asked of the remote side
        assert_eq!(main_loop.pending(), queued);
        assert_eq!(main_loop.run_until_idle(), 0);
        assert_eq!(changes.get(), 0);
    }

    #[test]
    fn test_ready_is_monotonic_and_notifies_once_per_flag() {
        let (_main_loop, graph, remote) = connected_graph();
        let object = node_stub(&graph, &remote);
        let notified = Rc::new(Cell::new(0));
        let n = Rc::clone(&notified);
        object.connect_features_changed(move |_| n.set(n.get() + 1));

        object.mark_ready(Features::INFO);
        object.mark_ready(Features::INFO);
        object.mark_ready(Features::INFO | Features::PARAMS);

        assert_eq!(object.features(), Features::INFO | Features::PARAMS);
        assert_eq!(notified.get(), 2);
    }

    #[test]
    fn test_second_request_while_pending_is_rejected() {
        let (_main_loop, graph, remote) = connected_graph();
        let object = node_stub(&graph, &remote);

        let mut first = object.request(Features::INFO);
        let mut second = object.request(Features::PARAMS);

        assert!(first.try_result().is_none());
        assert!(matches!(
            second.try_result(),
            Some(Err(Error::InvariantViolation(_)))
        ));
        // The rejected request did not grow the wanted set
        assert_eq!(object.wanted(), Features::INFO);
    }

    #[test]
    fn test_bind_without_identity_is_invariant_violation() {
        let (_main_loop, _graph, remote) = connected_graph();
        let object = ManagedObject::unbound(&remote, InterfaceType::Node, 3);

        let mut augment = object.request(Features::INFO);
        assert!(matches!(
            augment.try_result(),
            Some(Err(Error::InvariantViolation(_)))
        ));
        assert!(!object.has_pending_request());
    }

    #[test]
    fn test_unsupported_feature_fails() {
        let (_main_loop, graph, remote) = connected_graph();
        let id = graph.add_global(InterfaceType::Registry, Properties::new());
        let object = ManagedObject::from_global(&remote, id, InterfaceType::Registry, 3, Properties::new());

        let mut augment = object.request(Features::INFO);
        assert!(matches!(
            augment.try_result(),
            Some(Err(Error::InvalidArgument(_)))
        ));
    }

    #[test]
    fn test_params_acquired_through_remote_call() {
        let (main_loop, graph, remote) = connected_graph();
        let object = node_stub(&graph, &remote);

        let mut augment = object.request(Features::BOUND | Features::PARAMS);
        main_loop.run_until_idle();

        assert!(matches!(augment.try_result(), Some(Ok(()))));
        assert!(object.params().is_some());
    }

    #[test]
    fn test_destroy_while_pending_fails_request() {
        let (main_loop, graph, remote) = connected_graph();
        let object = node_stub(&graph, &remote);
        let destroyed = Rc::new(Cell::new(false));
        let d = Rc::clone(&destroyed);
        object.connect_destroyed(move |_| d.set(true));

        let mut augment = object.request(Features::PARAMS);
        let id = object.global_id().unwrap();
        graph.destroy_global(id);
        main_loop.run_until_idle();

        assert!(destroyed.get());
        assert!(matches!(
            augment.try_result(),
            Some(Err(Error::OperationFailed(_)))
        ));
        assert!(!object.is_bound());

        // Ready is frozen after teardown
        let before = object.features();
        object.mark_ready(Features::INFO);
        assert_eq!(object.features(), before);

        let mut late = object.request(Features::BOUND);
        assert!(matches!(late.try_result(), Some(Err(Error::OperationFailed(_)))));
    }

    #[test]
    fn test_fail_without_pending_is_harmless() {
        let (_main_loop, graph, remote) = connected_graph();
        let object = node_stub(&graph, &remote);
        object.fail(Error::operation_failed("nothing waiting"));
        assert!(!object.has_pending_request());
    }

    #[test]
    fn test_wrap_seeds_bound() {
        let (main_loop, _graph, remote) = connected_graph();
        let props = Properties::new().with("node.name", "local");
        let handle = remote
            .create_object("adapter", InterfaceType::Node, &props)
            .unwrap();
        let object = ManagedObject::wrap(&remote, handle, props);
        let created = Rc::new(Cell::new(0));
        let c = Rc::clone(&created);
        object.connect_created(move |_| c.set(c.get() + 1));

        assert_eq!(object.features(), Features::BOUND);
        let mut augment = object.request(Features::STANDARD);
        main_loop.run_until_idle();
        assert!(matches!(augment.try_result(), Some(Ok(()))));
        // Already bound, so nothing announces creation
        assert_eq!(created.get(), 0);
    }

    #[test]
    fn test_bind_announces_creation_once() {
        let (main_loop, graph, remote) = connected_graph();
        let object = node_stub(&graph, &remote);
        let created = Rc::new(Cell::new(0));
        let c = Rc::clone(&created);
        object.connect_created(move |_| c.set(c.get() + 1));

        let _first = object.request(Features::BOUND);
        let _second = object.request(Features::STANDARD);
        main_loop.run_until_idle();
        assert_eq!(created.get(), 1);
    }
}
