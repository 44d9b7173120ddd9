//! fprint daemon - fingerprint device manager service.
//!
//! Publishes one object per attached fingerprint sensor over a Unix socket,
//! tracks hotplug, and exits once no sensor has been in use for the idle
//! window.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod daemon;
mod manager;
mod sensor;
mod server;
mod signals;

use fprint_core::IDLE_TIMEOUT;
use fprint_ipc::{IpcServer, ObjectServer, socket_path};
use fprint_usb::UsbSource;

use crate::daemon::ExitReason;
use crate::manager::{Manager, ManagerOptions};
use crate::sensor::SensorObjectFactory;

/// Crates whose log level follows the configuration.
const LOG_TARGETS: &[&str] = &["fprint_core", "fprint_ipc", "fprint_usb", "fprint_daemon"];

#[derive(Debug, Parser)]
#[command(name = "fprint-daemon", version, about = "Fingerprint device manager")]
struct Cli {
    /// Keep running when no device is in use
    #[arg(short = 't', long)]
    no_timeout: bool,

    /// Configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// IPC socket path
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    init_logging(&config.daemon.log_level)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting fprint daemon");

    // Start IPC server
    let socket = cli.socket.or_else(|| config.ipc.socket_path.clone()).unwrap_or_else(socket_path);
    let (ipc_server, mut request_rx) =
        IpcServer::bind(&socket).await.context("Failed to start IPC server")?;
    let objects = ObjectServer::new(ipc_server.event_sender());

    let vendors = config.usb.vendor_ids()?;
    let source = UsbSource::new(vendors).context("Failed to initialise USB access")?;

    let options = ManagerOptions {
        no_timeout: cli.no_timeout || config.daemon.no_timeout,
        idle_timeout: IDLE_TIMEOUT,
    };
    let (mut manager, mut events) =
        Manager::new(objects, Box::new(source), Box::new(SensorObjectFactory), options)
            .context("Failed to enumerate fingerprint devices")?;

    let ipc_handle = tokio::spawn(async move {
        ipc_server.run().await;
    });

    let mut shutdown_rx = signals::setup_signal_handlers()?;

    let reason = daemon::run(&mut manager, &mut events, &mut request_rx, &mut shutdown_rx).await;
    match reason {
        ExitReason::IdleTimeout(request) => {
            info!(idle_secs = request.idle_for.as_secs(), "No devices in use, exiting");
        }
        ExitReason::Signal => info!("Exiting on signal"),
        ExitReason::Disconnected => warn!("IPC server stopped, exiting"),
    }

    // Cleanup
    manager.shutdown();
    // Let connection tasks flush the shutdown events.
    tokio::task::yield_now().await;
    ipc_handle.abort();

    if let Err(e) = tokio::fs::remove_file(&socket).await {
        debug!(?socket, error = %e, "Could not remove socket file");
    }

    info!("fprint daemon stopped");
    Ok(())
}

/// Install the fmt subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(level: &str) -> Result<()> {
    let filter = if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        EnvFilter::from_default_env()
    } else {
        let mut filter = EnvFilter::new("warn");
        for target in LOG_TARGETS {
            filter = filter.add_directive(
                format!("{target}={level}").parse().with_context(|| format!("Invalid log level {level:?}"))?,
            );
        }
        filter
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
