//! RemoteMedia Session - session and policy core for media graphs
//!
//! This crate manages remote-backed objects on behalf of a session manager:
//! it negotiates their capabilities, drives multi-step setup through
//! transitions, and links endpoints according to configured rules.
//!
//! # Architecture
//!
//! - [`object`]: managed objects and the feature augmentation protocol
//! - [`transition`]: generic step engine used by startup and activation
//! - [`policy`]: policy manager and the rule-driven [`policy::ConfigPolicy`]
//! - [`remote`]: the contract with the media-graph service, plus an
//!   in-process [`remote::LocalGraph`]
//! - [`plugin`] and [`startup`]: components activated when a session comes up
//!
//! Everything runs on a single [`MainLoop`]; types are `Rc` based and not
//! `Send`.
//!
//! # Example
//!
//! ```ignore
//! use remotemedia_session::{startup, ConfigSource, Session};
//!
//! let (session, _graph) = Session::local();
//! startup::start(session.clone(), ConfigSource::File("session.toml".into()), |result| {
//!     if let Err(e) = result {
//!         eprintln!("startup failed: {e}");
//!     }
//! });
//! session.main_loop().run_until_idle();
//! ```

#![warn(clippy::all)]

pub mod activation;
pub mod collection;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod features;
pub mod main_loop;
pub mod object;
pub mod plugin;
pub mod policy;
pub mod properties;
pub mod remote;
pub mod rules;
pub mod session;
pub mod signal;
pub mod startup;
pub mod transition;

pub use collection::{ObjectCollection, ObjectFilter};
pub use config::{SessionConfig, DEFAULT_CONFIG_FILE};
pub use endpoint::{Direction, Endpoint, EndpointDescriptor, EndpointLink, LinkState};
pub use error::{Error, Result};
pub use features::Features;
pub use main_loop::MainLoop;
pub use object::{Augment, Completion, InterfaceType, ManagedObject};
pub use policy::{ConfigPolicy, Policy, PolicyManager};
pub use properties::Properties;
pub use remote::{LocalGraph, RemoteConnection};
pub use session::Session;
pub use startup::ConfigSource;
pub use transition::{Step, Transition, TransitionDef};

/// Initialize logging
///
/// Reads the filter from `RUST_LOG`, defaulting to `info`. Calling it more
/// than once is an error.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| Error::Other(format!("logging already initialized: {e}")))?;

    tracing::info!("RemoteMedia session core initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init() {
        // Should not panic
        init().ok();
        assert!(init().is_err());
    }
}
