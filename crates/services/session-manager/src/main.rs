//! Session manager daemon entry point
//!
//! Brings a session up from a configuration file and keeps dispatching its
//! main loop until the media graph goes away or the process is told to stop.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p remotemedia-session-manager -- --config-file ./session.toml
//! ```
//!
//! Exit codes: `0` disconnected from the media graph, `1` interrupted by a
//! signal, `2` an operation failed, `3` invalid arguments or configuration.

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use remotemedia_session::startup::{self, ConfigSource};
use remotemedia_session::{Session, DEFAULT_CONFIG_FILE};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// RemoteMedia Session Manager
///
/// Creates the configured endpoints and links them according to the
/// configured rules.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_FILE, env = "SESSION_MANAGER_CONFIG")]
    config_file: PathBuf,
}

/// Why the main loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Disconnected,
    Interrupted,
}

impl Outcome {
    fn exit_code(self) -> u8 {
        match self {
            Outcome::Disconnected => 0,
            Outcome::Interrupted => 1,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config_file.display(),
        "RemoteMedia session manager starting"
    );

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")
        .and_then(|runtime| runtime.block_on(run(args)));

    match result {
        Ok(outcome) => {
            info!(?outcome, "session manager stopped");
            ExitCode::from(outcome.exit_code())
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "session manager failed");
            ExitCode::from(exit_code_for(&e))
        }
    }
}

fn exit_code_for(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<remotemedia_session::Error>()
        .and_then(|e| u8::try_from(e.exit_code()).ok())
        .unwrap_or(2)
}

async fn run(args: Args) -> anyhow::Result<Outcome> {
    let (session, graph) = Session::local();

    let disconnected = Rc::new(Cell::new(false));
    let flag = Rc::clone(&disconnected);
    graph.connect_disconnected(move |_| flag.set(true));

    let started = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&started);
    let _startup = startup::start(
        session.clone(),
        ConfigSource::File(args.config_file),
        move |result| *slot.borrow_mut() = Some(result),
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let outcome = loop {
        session.main_loop().run_until_idle();

        let startup_result = started.borrow_mut().take();
        if let Some(Err(e)) = startup_result {
            session.shutdown();
            return Err(e).context("startup failed");
        }
        if disconnected.get() {
            warn!("media graph connection lost");
            break Outcome::Disconnected;
        }

        tokio::select! {
            signal = &mut shutdown => {
                info!(%signal, "shutting down");
                break Outcome::Interrupted;
            }
            _ = session.main_loop().wait_for_work() => {}
        }
    };

    session.shutdown();
    session.main_loop().run_until_idle();
    Ok(outcome)
}

/// Resolves with the name of the first termination signal received
#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut terminate), Ok(mut hangup)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    ) else {
        warn!("could not install signal handlers, only Ctrl+C is handled");
        let _ = tokio::signal::ctrl_c().await;
        return "SIGINT";
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "Ctrl+C"
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
