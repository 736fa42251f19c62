//! Static interface table
//!
//! Maps each remote interface type to what a managed object of that kind
//! can acquire and how incoming info updates are folded into its cache.
//! Unknown types, or types announced with a version older than the table
//! requires, fall back to the base entry which only supports binding.

use crate::features::Features;
use crate::properties::Properties;

/// Remote interface types the session core knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceType {
    Core,
    Registry,
    Node,
    Port,
    Factory,
    Link,
    Client,
    Module,
    Device,
    ClientNode,
    Endpoint,
    EndpointLink,
    Session,
}

/// Folds an info update into the cached blob. Returns `true` on change.
pub type InfoMerge = fn(&mut Option<Properties>, &Properties) -> bool;

/// One row of the interface table
#[derive(Debug)]
pub struct InterfaceEntry {
    /// `None` only for the base entry
    pub interface: Option<InterfaceType>,
    pub name: &'static str,
    /// Oldest remote version this entry applies to
    pub min_version: u32,
    /// Features the default acquisition routine can provide
    pub features: Features,
    pub merge_info: InfoMerge,
}

impl InterfaceEntry {
    pub fn supports(&self, features: Features) -> bool {
        self.features.contains(features)
    }
}

fn replace_info(cache: &mut Option<Properties>, update: &Properties) -> bool {
    if cache.as_ref() == Some(update) {
        return false;
    }
    *cache = Some(update.clone());
    true
}

fn merge_info(cache: &mut Option<Properties>, update: &Properties) -> bool {
    match cache {
        Some(existing) => existing.update(update),
        None => {
            *cache = Some(update.clone());
            true
        }
    }
}

const ACQUIRE_ALL: Features = Features::STANDARD.union(Features::PARAMS);

/// Used for anything the table does not list
pub static BASE_ENTRY: InterfaceEntry = InterfaceEntry {
    interface: None,
    name: "Proxy",
    min_version: 0,
    features: Features::BOUND,
    merge_info: replace_info,
};

const fn entry(
    interface: InterfaceType,
    name: &'static str,
    min_version: u32,
    features: Features,
    merge_info: InfoMerge,
) -> InterfaceEntry {
    InterfaceEntry {
        interface: Some(interface),
        name,
        min_version,
        features,
        merge_info,
    }
}

pub static INTERFACES: &[InterfaceEntry] = &[
    entry(InterfaceType::Core, "Core", 3, Features::STANDARD, replace_info),
    entry(InterfaceType::Registry, "Registry", 3, Features::BOUND, replace_info),
    entry(InterfaceType::Node, "Node", 3, ACQUIRE_ALL, merge_info),
    entry(InterfaceType::Port, "Port", 3, ACQUIRE_ALL, merge_info),
    entry(InterfaceType::Factory, "Factory", 3, Features::STANDARD, replace_info),
    entry(InterfaceType::Link, "Link", 3, Features::STANDARD, merge_info),
    entry(InterfaceType::Client, "Client", 3, Features::STANDARD, merge_info),
    entry(InterfaceType::Module, "Module", 3, Features::STANDARD, replace_info),
    entry(InterfaceType::Device, "Device", 3, ACQUIRE_ALL, merge_info),
    entry(InterfaceType::ClientNode, "ClientNode", 3, Features::BOUND, replace_info),
    entry(InterfaceType::Endpoint, "Endpoint", 0, Features::STANDARD, merge_info),
    entry(InterfaceType::EndpointLink, "EndpointLink", 0, Features::STANDARD, merge_info),
    entry(InterfaceType::Session, "Session", 0, Features::STANDARD, merge_info),
];

/// Resolve the entry for `interface` announced at `version`
pub fn lookup(interface: InterfaceType, version: u32) -> &'static InterfaceEntry {
    INTERFACES
        .iter()
        .find(|e| e.interface == Some(interface) && version >= e.min_version)
        .unwrap_or(&BASE_ENTRY)
}

impl InterfaceType {
    pub fn name(&self) -> &'static str {
        lookup(*self, u32::MAX).name
    }
}

impl std::fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
