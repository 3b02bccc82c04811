//! seatd — the SeatGrid daemon.
//!
//! Single binary that assembles all SeatGrid subsystems:
//! - Directory (redb)
//! - Reconciliation controller + driver
//! - Session prober
//! - Expired-deletion reaper
//! - REST API + status query
//!
//! # Usage
//!
//! ```text
//! seatd run --config /etc/seatgrid/seatd.toml --port 8480 --data-dir /var/lib/seatgrid
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::info;

use seatgrid_api::{build_router, ApiState};
use seatgrid_controller::{Controller, Driver, EventQueue, Reaper};
use seatgrid_probe::SessionProber;
use seatgrid_routes::DirectorySink;
use seatgrid_state::StateStore;

use crate::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "seatd", about = "SeatGrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller, prober and API in one process.
    Run {
        /// Path to seatd.toml. A missing file means all defaults.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides `server.port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for the directory store (overrides `server.data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "text")]
        log_format: LogFormat,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,seatd=debug,seatgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
            log_format,
        } => {
            init_tracing(log_format);
            let mut daemon_config = DaemonConfig::load(config.as_deref())?;
            if let Some(port) = port {
                daemon_config.server.port = port;
            }
            if let Some(dir) = data_dir {
                daemon_config.server.data_dir = dir;
            }
            run(daemon_config).await
        }
    }
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    info!("SeatGrid daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("seatgrid.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "directory opened");

    let (events, event_rx) = EventQueue::channel();

    let probe_config = config.probe_config()?;
    let prober = Arc::new(
        SessionProber::new(state.clone(), probe_config.clone())
            .with_callback(events.session_callback()),
    );
    info!(
        interval_secs = probe_config.interval.as_secs(),
        path = %probe_config.path,
        authenticated = probe_config.token.is_some(),
        "session prober initialized"
    );

    let mut controller = Controller::new(state.clone(), config.controller_config()?)
        .with_prober(Arc::clone(&prober));
    if let Some(dir) = &config.output.dir {
        std::fs::create_dir_all(dir)?;
        controller = controller.with_sink(Arc::new(DirectorySink::new(dir)));
        info!(dir = ?dir, "directory route sink enabled");
    }
    let controller = Arc::new(controller);

    let hydrated = controller.hydrate().await?;
    info!(licenses = hydrated, "controller hydrated");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver_shutdown = shutdown_rx.clone();
    let reaper_shutdown = shutdown_rx.clone();

    // ── Start background tasks ─────────────────────────────────

    let driver = Driver::new(
        Arc::clone(&controller),
        event_rx,
        config.resync_interval()?,
    );
    let driver_handle = tokio::spawn(async move {
        driver.run(driver_shutdown).await;
    });

    let reaper = Reaper::new(state.clone(), events.clone());
    let reaper_interval = config.reaper_interval()?;
    let reaper_handle = tokio::spawn(async move {
        reaper.run(reaper_interval, reaper_shutdown).await;
    });

    // ── Start API server ───────────────────────────────────────

    let api_state = ApiState::new(Arc::clone(&controller), events)
        .with_default_namespace(&config.server.default_namespace);
    let router = build_router(api_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = driver_handle.await;
    let _ = reaper_handle.await;

    info!("SeatGrid daemon stopped");
    Ok(())
}
