//! Policy engine
//!
//! Policies react to endpoints entering and leaving the watched collection
//! and answer target queries. The [`PolicyManager`] keeps them ordered by
//! rank, highest first, fans out membership changes and asks each in turn
//! when a target is needed.

pub mod config_policy;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, info};

use crate::collection::ObjectCollection;
use crate::endpoint::Endpoint;
use crate::rules::EndpointMatch;
use crate::signal::{HandlerId, Signal};

pub use config_policy::{ConfigPolicy, LinkDone};

/// Policies shipped with the session core
pub const RANK_UPSTREAM: u32 = 1;
/// Policies provided by the platform
pub const RANK_PLATFORM: u32 = 128;
/// Policies provided by hardware vendors
pub const RANK_VENDOR: u32 = 256;

/// What a policy is asked to find a target for
#[derive(Debug, Clone, Default)]
pub struct TargetQuery {
    pub media_class: Option<String>,
    /// Role of the requesting endpoint; selects the target stream
    pub role: Option<String>,
    /// Target stream to use when no role is given
    pub stream: Option<String>,
    pub matcher: Option<EndpointMatch>,
}

/// A resolved target endpoint and stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub endpoint: Endpoint,
    pub stream: Option<u32>,
}

/// Hooks a policy implements. All have no-op defaults.
pub trait Policy {
    fn name(&self) -> &str;

    fn rank(&self) -> u32 {
        RANK_UPSTREAM
    }

    /// Called once the manager has taken the policy
    fn attached(&self, _manager: &Rc<PolicyManager>) {}

    fn detached(&self) {}

    fn object_added(&self, _endpoint: &Endpoint) {}

    fn object_removed(&self, _endpoint: &Endpoint) {}

    fn resolve_target(&self, _query: &TargetQuery) -> Option<Target> {
        None
    }
}

/// Ordered set of policies attached to one collection
pub struct PolicyManager {
    me: Weak<PolicyManager>,
    collection: ObjectCollection,
    policies: RefCell<Vec<Rc<dyn Policy>>>,
    handlers: RefCell<Vec<HandlerId>>,
    changed: Signal<()>,
}

impl PolicyManager {
    pub fn new(collection: &ObjectCollection) -> Rc<Self> {
        let manager = Rc::new_cyclic(|me: &Weak<PolicyManager>| Self {
            me: me.clone(),
            collection: collection.clone(),
            policies: RefCell::new(Vec::new()),
            handlers: RefCell::new(Vec::new()),
            changed: Signal::new(),
        });

        let weak = Rc::downgrade(&manager);
        let added = collection.connect_object_added(move |endpoint| {
            if let Some(manager) = weak.upgrade() {
                manager.dispatch(|policy| policy.object_added(endpoint));
            }
        });
        let weak = Rc::downgrade(&manager);
        let removed = collection.connect_object_removed(move |endpoint| {
            if let Some(manager) = weak.upgrade() {
                manager.dispatch(|policy| policy.object_removed(endpoint));
            }
        });
        manager.handlers.borrow_mut().extend([added, removed]);
        manager
    }

    /// Add a policy after every policy of higher or equal rank
    pub fn register(&self, policy: Rc<dyn Policy>) {
        {
            let mut policies = self.policies.borrow_mut();
            let index = policies
                .iter()
                .position(|p| p.rank() < policy.rank())
                .unwrap_or(policies.len());
            policies.insert(index, Rc::clone(&policy));
        }
        info!(policy = policy.name(), rank = policy.rank(), "policy registered");
        if let Some(me) = self.me.upgrade() {
            policy.attached(&me);
        }
        self.changed.emit(&());
    }

    /// Remove the policy called `name`
    pub fn unregister(&self, name: &str) -> Option<Rc<dyn Policy>> {
        let removed = {
            let mut policies = self.policies.borrow_mut();
            let index = policies.iter().position(|p| p.name() == name)?;
            policies.remove(index)
        };
        debug!(policy = name, "policy unregistered");
        removed.detached();
        self.changed.emit(&());
        Some(removed)
    }

    /// Policies in the order they are consulted
    pub fn policies(&self) -> Vec<Rc<dyn Policy>> {
        self.policies.borrow().clone()
    }

    pub fn collection(&self) -> &ObjectCollection {
        &self.collection
    }

    /// First target any policy resolves, highest rank first
    pub fn find_target(&self, query: &TargetQuery) -> Option<Target> {
        self.policies()
            .iter()
            .find_map(|policy| policy.resolve_target(query))
    }

    pub fn connect_changed(&self, handler: impl Fn(&()) + 'static) -> HandlerId {
        self.changed.connect(handler)
    }

    fn dispatch(&self, hook: impl Fn(&dyn Policy)) {
        for policy in self.policies() {
            hook(policy.as_ref());
        }
    }
}

impl Drop for PolicyManager {
    fn drop(&mut self) {
        for id in self.handlers.borrow_mut().drain(..) {
            self.collection.disconnect(id);
        }
    }
}

impl std::fmt::Debug for PolicyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .policies
            .borrow()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        f.debug_struct("PolicyManager").field("policies", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Direction, EndpointDescriptor};
    use crate::main_loop::MainLoop;
    use crate::remote::{LocalGraph, RemoteConnection};
    use std::cell::Cell;

    struct Recorder {
        name: &'static str,
        rank: u32,
        added: Cell<usize>,
        removed: Cell<usize>,
        answer: RefCell<Option<Endpoint>>,
    }

    impl Recorder {
        fn new(name: &'static str, rank: u32) -> Rc<Self> {
            Rc::new(Self {
                name,
                rank,
                added: Cell::new(0),
                removed: Cell::new(0),
                answer: RefCell::new(None),
            })
        }
    }

    impl Policy for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn rank(&self) -> u32 {
            self.rank
        }

        fn object_added(&self, _endpoint: &Endpoint) {
            self.added.set(self.added.get() + 1);
        }

        fn object_removed(&self, _endpoint: &Endpoint) {
            self.removed.set(self.removed.get() + 1);
        }

        fn resolve_target(&self, _query: &TargetQuery) -> Option<Target> {
            self.answer.borrow().clone().map(|endpoint| Target {
                endpoint,
                stream: None,
            })
        }
    }

    #[test]
    fn test_rank_order_and_fan_out() {
        let main_loop = MainLoop::new();
        let collection = ObjectCollection::new();
        let graph = LocalGraph::new(&main_loop, &collection);
        graph.connect(Box::new(|_| {}));
        let manager = PolicyManager::new(&collection);

        let upstream = Recorder::new("upstream", RANK_UPSTREAM);
        let vendor = Recorder::new("vendor", RANK_VENDOR);
        manager.register(upstream.clone());
        manager.register(vendor.clone());

        let order: Vec<String> = manager.policies().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(order, vec!["vendor", "upstream"]);

        let ep = graph
            .add_endpoint(&EndpointDescriptor::new("sink", "Audio/Sink", Direction::Input))
            .unwrap();
        main_loop.run_until_idle();
        assert_eq!(upstream.added.get(), 1);
        assert_eq!(vendor.added.get(), 1);

        // Higher rank answers first
        *upstream.answer.borrow_mut() = Some(ep.clone());
        assert_eq!(manager.find_target(&TargetQuery::default()).map(|t| t.endpoint), Some(ep.clone()));

        graph.remove_endpoint(&ep);
        main_loop.run_until_idle();
        assert_eq!(vendor.removed.get(), 1);

        assert!(manager.unregister("vendor").is_some());
        assert!(manager.unregister("vendor").is_none());
        assert_eq!(manager.policies().len(), 1);
    }
}
