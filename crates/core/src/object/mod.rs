//! Managed objects: remote-backed resources negotiated through features

pub mod completion;
pub mod interface;
pub mod managed;

pub use completion::{Augment, Completion};
pub use interface::{InterfaceEntry, InterfaceType};
pub use managed::{ManagedObject, WeakObject};
