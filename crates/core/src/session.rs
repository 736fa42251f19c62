//! Shared context of a running session manager

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::collection::ObjectCollection;
use crate::config::SessionConfig;
use crate::main_loop::MainLoop;
use crate::plugin::Plugin;
use crate::policy::PolicyManager;
use crate::remote::{LocalGraph, RemoteConnection};

struct SessionInner {
    main_loop: MainLoop,
    remote: Rc<dyn RemoteConnection>,
    collection: ObjectCollection,
    policies: Rc<PolicyManager>,
    config: RefCell<Rc<SessionConfig>>,
    plugins: RefCell<Vec<Rc<dyn Plugin>>>,
}

/// Cloneable handle bundling the loop, the remote connection, the watched
/// collection, the policy manager and the active plugins
#[derive(Clone)]
pub struct Session(Rc<SessionInner>);

impl Session {
    pub fn new(main_loop: MainLoop, remote: Rc<dyn RemoteConnection>, collection: ObjectCollection) -> Self {
        let policies = PolicyManager::new(&collection);
        Self(Rc::new(SessionInner {
            main_loop,
            remote,
            collection,
            policies,
            config: RefCell::new(Rc::new(SessionConfig::default())),
            plugins: RefCell::new(Vec::new()),
        }))
    }

    /// Session running against an in-process graph
    pub fn local() -> (Self, Rc<LocalGraph>) {
        let main_loop = MainLoop::new();
        let collection = ObjectCollection::new();
        let graph = LocalGraph::new(&main_loop, &collection);
        let session = Self::new(main_loop, graph.clone(), collection);
        (session, graph)
    }

    pub fn main_loop(&self) -> &MainLoop {
        &self.0.main_loop
    }

    pub fn remote(&self) -> &Rc<dyn RemoteConnection> {
        &self.0.remote
    }

    pub fn collection(&self) -> &ObjectCollection {
        &self.0.collection
    }

    pub fn policies(&self) -> &Rc<PolicyManager> {
        &self.0.policies
    }

    pub fn config(&self) -> Rc<SessionConfig> {
        Rc::clone(&self.0.config.borrow())
    }

    pub fn set_config(&self, config: SessionConfig) {
        *self.0.config.borrow_mut() = Rc::new(config);
    }

    /// Keep an activated plugin alive for the lifetime of the session
    pub fn add_plugin(&self, plugin: Rc<dyn Plugin>) {
        debug!(plugin = plugin.name(), "plugin active");
        self.0.plugins.borrow_mut().push(plugin);
    }

    pub fn plugins(&self) -> Vec<Rc<dyn Plugin>> {
        self.0.plugins.borrow().clone()
    }

    pub fn find_plugin(&self, name: &str) -> Option<Rc<dyn Plugin>> {
        self.0
            .plugins
            .borrow()
            .iter()
            .find(|p| p.name() == name)
            .cloned()
    }

    /// Deactivate every plugin, newest first
    pub fn shutdown(&self) {
        let plugins: Vec<_> = self.0.plugins.borrow_mut().drain(..).collect();
        for plugin in plugins.into_iter().rev() {
            plugin.deactivate(self);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("collection", &self.0.collection)
            .field("policies", &self.0.policies)
            .field("plugins", &self.0.plugins.borrow().len())
            .finish()
    }
}
