//! Activatable components and the built-in component table
//!
//! Components are looked up by name in [`BUILTIN_COMPONENTS`] when the
//! configuration is loaded. Plugins are activated first; scripts run once
//! every plugin is up.

pub mod config_policy;
pub mod link_activation;
pub mod static_endpoints;

use std::rc::Rc;

use crate::config::ComponentKind;
use crate::error::{Error, Result};
use crate::object::Completion;
use crate::session::Session;

pub use config_policy::ConfigPolicyPlugin;
pub use link_activation::LinkActivation;
pub use static_endpoints::StaticEndpoints;

pub trait Plugin {
    fn name(&self) -> &str;

    /// Start working; `done` resolves once the plugin is usable
    fn activate(self: Rc<Self>, session: &Session, done: Completion);

    fn deactivate(&self, _session: &Session) {}
}

/// One row of the component table
pub struct ComponentEntry {
    pub name: &'static str,
    pub kind: ComponentKind,
    pub build: fn() -> Rc<dyn Plugin>,
}

impl std::fmt::Debug for ComponentEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

pub static BUILTIN_COMPONENTS: &[ComponentEntry] = &[
    ComponentEntry {
        name: ConfigPolicyPlugin::NAME,
        kind: ComponentKind::Plugin,
        build: ConfigPolicyPlugin::build,
    },
    ComponentEntry {
        name: LinkActivation::NAME,
        kind: ComponentKind::Plugin,
        build: LinkActivation::build,
    },
    ComponentEntry {
        name: StaticEndpoints::NAME,
        kind: ComponentKind::Script,
        build: StaticEndpoints::build,
    },
];

/// Name-indexed view over a component table
#[derive(Debug, Clone, Copy)]
pub struct ComponentRegistry {
    entries: &'static [ComponentEntry],
}

impl ComponentRegistry {
    /// Registry over `entries`; fails on duplicate names
    pub fn new(entries: &'static [ComponentEntry]) -> Result<Self> {
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|e| e.name == entry.name) {
                return Err(Error::invariant(format!(
                    "component {} registered twice",
                    entry.name
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn builtin() -> Result<Self> {
        Self::new(BUILTIN_COMPONENTS)
    }

    pub fn find(&self, name: &str) -> Option<&'static ComponentEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Instantiate `name`, checking it is of the expected kind
    pub fn instantiate(&self, name: &str, kind: ComponentKind) -> Result<Rc<dyn Plugin>> {
        let entry = self
            .find(name)
            .ok_or_else(|| Error::NotFound(format!("component {name}")))?;
        if entry.kind != kind {
            return Err(Error::ConfigError(format!(
                "component {name} is a {:?}, not a {kind:?}",
                entry.kind
            )));
        }
        Ok((entry.build)())
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        self.entries.iter().map(|e| e.name)
    }
}
