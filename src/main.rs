//! launchtrackd — records which applications are open, and with which files.
//!
//! Listens for `org.gtk.gio.DesktopAppInfo.Launched` on the session bus,
//! waits for each launched application's windows to appear, and keeps a
//! JSON snapshot per application in `~/opened-files.log`.

mod bus;
mod config;
mod correlate;
mod daemon;
mod desktop;
mod resolver;
mod signal;
mod store;
mod x11;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tracing_subscriber::EnvFilter;

use crate::bus::monitor::DbusMonitor;
use crate::config::Cli;
use crate::daemon::{Collaborators, Daemon};
use crate::desktop::XdgDesktopLookup;
use crate::resolver::{NoWindowSystem, RuntimeLookup};
use crate::x11::X11Runtime;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let runtime: Arc<dyn RuntimeLookup> = if config.x11 {
        match X11Runtime::connect() {
            Ok(x11) => Arc::new(x11),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "cannot connect to X11 (use --no-x11 to run without it)"
                );
                return ExitCode::FAILURE;
            }
        }
    } else {
        tracing::warn!("running without a window system; launches will not be recorded");
        Arc::new(NoWindowSystem)
    };

    let parts = Collaborators {
        bus: Box::new(DbusMonitor::new()),
        descriptors: Arc::new(XdgDesktopLookup::from_env()),
        runtime,
    };

    let daemon = match Daemon::enable(&config, parts).await {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::error!(error = %e, "failed to start");
            return ExitCode::FAILURE;
        }
    };

    let mut terminate = match unix_signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            tracing::error!(error = %e, "cannot install SIGTERM handler");
            daemon.disable().await;
            return ExitCode::FAILURE;
        }
    };

    let code = tokio::select! {
        _ = tokio::signal::ctrl_c() => ExitCode::SUCCESS,
        _ = terminate.recv() => ExitCode::SUCCESS,
        _ = daemon.bus_closed() => {
            tracing::error!("bus subscription ended unexpectedly");
            ExitCode::FAILURE
        }
    };

    daemon.disable().await;
    code
}
