//! Bringing a session up
//!
//! Startup resolves the component table, loads the configuration, connects
//! to the media graph, then activates the configured plugins followed by the
//! configured scripts. Plugins and scripts are activated concurrently within
//! their group; the transition waits on each group until nothing is pending.
//! If any step fails, everything activated so far is deactivated again.

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;

use tracing::{debug, error, info};

use crate::config::{ComponentKind, SessionConfig};
use crate::error::{Error, Result};
use crate::object::Completion;
use crate::plugin::{ComponentRegistry, Plugin};
use crate::session::Session;
use crate::transition::{Step, Transition, TransitionDef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartupStep {
    LoadModule,
    LoadConfig,
    Connect,
    ActivatePlugins,
    ActivateScripts,
}

/// Where the configuration comes from
#[derive(Debug, Clone)]
pub enum ConfigSource {
    File(PathBuf),
    Inline(SessionConfig),
}

pub struct Startup {
    session: Session,
    source: RefCell<Option<ConfigSource>>,
    registry: Cell<Option<ComponentRegistry>>,
    plugins: RefCell<Vec<Rc<dyn Plugin>>>,
    scripts: RefCell<Vec<Rc<dyn Plugin>>>,
    pending: Cell<usize>,
}

impl Startup {
    pub fn new(session: Session, source: ConfigSource) -> Self {
        Self {
            session,
            source: RefCell::new(Some(source)),
            registry: Cell::new(None),
            plugins: RefCell::new(Vec::new()),
            scripts: RefCell::new(Vec::new()),
            pending: Cell::new(0),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn load_module(&self, transition: &Transition<Self>) {
        match ComponentRegistry::builtin() {
            Ok(registry) => {
                debug!(components = ?registry.names().collect::<Vec<_>>(), "component table loaded");
                self.registry.set(Some(registry));
                transition.advance();
            }
            Err(e) => transition.return_error(e),
        }
    }

    fn load_config(&self, transition: &Transition<Self>) {
        match self.resolve_config() {
            Ok(()) => transition.advance(),
            Err(e) => transition.return_error(e),
        }
    }

    fn resolve_config(&self) -> Result<()> {
        let source = self
            .source
            .borrow_mut()
            .take()
            .ok_or_else(|| Error::invariant("configuration already loaded"))?;
        let config = match source {
            ConfigSource::File(path) => {
                info!(path = %path.display(), "loading configuration");
                SessionConfig::from_file(&path)?
            }
            ConfigSource::Inline(config) => {
                config.validate()?;
                config
            }
        };

        let registry = self
            .registry
            .get()
            .ok_or_else(|| Error::invariant("component table not loaded"))?;
        for component in &config.components {
            let plugin = registry.instantiate(&component.name, component.kind)?;
            match component.kind {
                ComponentKind::Plugin => self.plugins.borrow_mut().push(plugin),
                ComponentKind::Script => self.scripts.borrow_mut().push(plugin),
            }
        }
        self.session.set_config(config);
        Ok(())
    }

    fn connect(&self, transition: &Transition<Self>) {
        let remote = self.session.remote();
        if remote.is_connected() {
            transition.advance();
            return;
        }
        let transition = transition.clone();
        remote.connect(Box::new(move |result| match result {
            Ok(()) => {
                info!("connected to media graph");
                transition.advance();
            }
            Err(e) => transition.return_error(Error::operation_failed(format!(
                "Failed to connect: {e}"
            ))),
        }));
    }

    /// Activate every component of a group. `pending` stays above zero
    /// until all of them have been started, so completions firing
    /// synchronously cannot move the transition on early.
    fn activate_group(&self, transition: &Transition<Self>, group: Vec<Rc<dyn Plugin>>) {
        self.pending.set(group.len() + 1);
        for component in group {
            if transition.is_completed() {
                return;
            }
            let name = component.name().to_string();
            let activated = Rc::clone(&component);
            let t = transition.clone();
            debug!(component = %name, "activating");
            component.activate(
                &self.session,
                Completion::new(move |result| match result {
                    Ok(()) => {
                        let def = t.definition();
                        def.session.add_plugin(activated);
                        def.pending.set(def.pending.get() - 1);
                        t.advance();
                    }
                    Err(e) => {
                        error!(component = %name, error = %e, "activation failed");
                        t.return_error(e);
                    }
                }),
            );
        }
        self.pending.set(self.pending.get() - 1);
        transition.advance();
    }
}

impl TransitionDef for Startup {
    type Step = StartupStep;

    fn next_step(&self, step: Step<StartupStep>) -> Step<StartupStep> {
        use StartupStep::*;
        match step {
            Step::None => Step::Custom(LoadModule),
            Step::Custom(LoadModule) => Step::Custom(LoadConfig),
            Step::Custom(LoadConfig) => Step::Custom(Connect),
            Step::Custom(Connect) => Step::Custom(ActivatePlugins),
            Step::Custom(ActivatePlugins) if self.pending.get() > 0 => Step::Custom(ActivatePlugins),
            Step::Custom(ActivatePlugins) => Step::Custom(ActivateScripts),
            Step::Custom(ActivateScripts) if self.pending.get() > 0 => Step::Custom(ActivateScripts),
            Step::Custom(ActivateScripts) => Step::None,
            Step::Error => Step::Error,
        }
    }

    fn execute_step(&self, transition: &Transition<Self>, step: Step<StartupStep>) {
        match step {
            Step::Custom(StartupStep::LoadModule) => self.load_module(transition),
            Step::Custom(StartupStep::LoadConfig) => self.load_config(transition),
            Step::Custom(StartupStep::Connect) => self.connect(transition),
            Step::Custom(StartupStep::ActivatePlugins) => {
                let plugins = std::mem::take(&mut *self.plugins.borrow_mut());
                self.activate_group(transition, plugins);
            }
            Step::Custom(StartupStep::ActivateScripts) => {
                let scripts = std::mem::take(&mut *self.scripts.borrow_mut());
                self.activate_group(transition, scripts);
            }
            Step::Error => self.session.shutdown(),
            Step::None => {}
        }
    }
}

/// Start bringing `session` up. `on_done` receives the outcome.
pub fn start(
    session: Session,
    source: ConfigSource,
    on_done: impl FnOnce(Result<()>) + 'static,
) -> Transition<Startup> {
    let transition = Transition::new(Startup::new(session, source), move |transition, result| {
        if result.is_ok() {
            let active = transition.definition().session.plugins().len();
            info!(components = active, "session manager ready");
        }
        on_done(result);
    });
    transition.start();
    transition
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComponentConfig;
    use crate::endpoint::{Direction, EndpointDescriptor};

    fn run(config: SessionConfig) -> (Session, Transition<Startup>, Rc<RefCell<Option<Result<()>>>>) {
        let (session, _graph) = Session::local();
        let outcome = Rc::new(RefCell::new(None));
        let o = outcome.clone();
        let transition = start(session.clone(), ConfigSource::Inline(config), move |r| {
            *o.borrow_mut() = Some(r);
        });
        session.main_loop().run_until_idle();
        (session, transition, outcome)
    }

    #[test]
    fn test_plugins_then_scripts() {
        let config = SessionConfig::default()
            .with_component(ComponentConfig::plugin("config-policy"))
            .with_component(ComponentConfig::plugin("link-activation"))
            .with_component(ComponentConfig::script("static-endpoints"))
            .with_endpoint(EndpointDescriptor::new("speakers", "Audio/Sink", Direction::Input));
        let (session, transition, outcome) = run(config);

        assert!(matches!(*outcome.borrow(), Some(Ok(()))));
        assert_eq!(transition.step(), Step::None);
        let names: Vec<String> = session.plugins().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["config-policy", "link-activation", "static-endpoints"]);
        assert_eq!(session.policies().policies().len(), 1);
        assert!(session.collection().find_by_name("speakers").is_some());
    }

    #[test]
    fn test_unknown_component_fails_load_config() {
        let config = SessionConfig::default().with_component(ComponentConfig::plugin("lua-scripting"));
        let (session, transition, outcome) = run(config);

        assert!(matches!(*outcome.borrow(), Some(Err(Error::NotFound(_)))));
        assert!(transition.had_error());
        assert!(session.plugins().is_empty());
    }

    #[test]
    fn test_failed_script_deactivates_plugins() {
        let mut broken = EndpointDescriptor::new("broken", "Audio/Sink", Direction::Input);
        broken.factory = "missing".into();
        let config = SessionConfig::default()
            .with_component(ComponentConfig::plugin("config-policy"))
            .with_component(ComponentConfig::script("static-endpoints"))
            .with_endpoint(broken);
        let (session, transition, outcome) = run(config);

        assert!(matches!(*outcome.borrow(), Some(Err(_))));
        assert!(transition.had_error());
        assert!(session.plugins().is_empty());
        assert!(session.policies().policies().is_empty());
    }

    #[test]
    fn test_partly_failed_script_leaves_no_endpoints() {
        let mut broken = EndpointDescriptor::new("broken", "Audio/Sink", Direction::Input);
        broken.factory = "missing".into();
        let config = SessionConfig::default()
            .with_component(ComponentConfig::plugin("config-policy"))
            .with_component(ComponentConfig::script("static-endpoints"))
            .with_endpoint(broken)
            .with_endpoint(EndpointDescriptor::new("speakers", "Audio/Sink", Direction::Input));
        let (session, transition, outcome) = run(config);

        assert!(matches!(*outcome.borrow(), Some(Err(Error::NotFound(_)))));
        assert!(transition.had_error());
        assert!(session.plugins().is_empty());
        assert!(session.collection().find_by_name("speakers").is_none());
        assert!(session.collection().is_empty());
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let (session, _graph) = Session::local();
        let outcome = Rc::new(RefCell::new(None));
        let o = outcome.clone();
        start(
            session.clone(),
            ConfigSource::File(dir.path().join("absent.toml")),
            move |r| *o.borrow_mut() = Some(r),
        );
        session.main_loop().run_until_idle();
        assert!(matches!(*outcome.borrow(), Some(Err(Error::Io(_)))));
    }
}
