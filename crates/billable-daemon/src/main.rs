//! Billable daemon
//!
//! Owns the timer table, keeps the remote system of record in sync and
//! serves JSON-RPC clients over a Unix socket.

use anyhow::Result;
use billable_core::storage::{init_data_dir, TimerCache};
use billable_core::{Clock, SystemClock};
use billable_daemon::{
    ApiHandler, ConfigManager, EventManager, HttpRemoteStore, InMemoryRemoteStore, IpcServer,
    LocalTimerStore, RemoteStore, TimerEngine,
};
use clap::Parser;
use std::fs;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "billabled")]
#[command(about = "Billable daemon - local-first billable hours timer", long_about = None)]
struct Args {
    /// Socket path for IPC (defaults to the configured path)
    #[arg(short, long)]
    socket: Option<String>,

    /// Log level (defaults to the configured level)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Ignore the configured remote and keep everything in memory
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_manager = Arc::new(ConfigManager::new()?);
    let config = config_manager.get().await;

    let socket = args
        .socket
        .unwrap_or_else(|| config.daemon.socket_path.clone());
    let log_level = args
        .log_level
        .unwrap_or_else(|| config.daemon.log_level.clone());

    // Initialize data directory and log file
    let data_dir = init_data_dir()?;
    let log_file_path = data_dir.join("daemon.log");

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file_path)?;

    // Write to both file and stdout
    use tracing_subscriber::fmt::writer::MakeWriterExt;
    let stdout_writer = std::io::stdout.with_max_level(tracing::Level::INFO);
    let file_writer = log_file.with_max_level(tracing::Level::DEBUG);

    tracing_subscriber::fmt()
        .with_writer(stdout_writer.and(file_writer))
        .with_env_filter(&log_level)
        .with_ansi(false)
        .init();

    tracing::info!("Billable daemon starting...");
    tracing::info!("Socket path: {}", socket);
    tracing::info!("Log file: {}", log_file_path.display());

    let remote: Arc<dyn RemoteStore> = if config.remote.is_configured() && !args.offline {
        let store = HttpRemoteStore::new(&config.remote)?;
        tracing::info!("Remote store: {}", store.base_url());
        Arc::new(store)
    } else {
        tracing::warn!("No remote store configured, time is kept in memory only");
        Arc::new(InMemoryRemoteStore::new())
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(LocalTimerStore::new(
        TimerCache::new(data_dir.clone()),
        clock.clone(),
    ));
    let event_manager = Arc::new(EventManager::new());
    let engine = TimerEngine::new(
        store,
        remote,
        event_manager.clone(),
        clock,
        config.sync.clone(),
    );

    let report = engine.rehydrate().await;
    match report.error {
        Some(ref error) => tracing::error!("Could not load timers from remote store: {}", error),
        None => tracing::info!(
            "Loaded {} timers ({} started offline)",
            report.restored,
            report.offline_merged
        ),
    }

    let api_handler = Arc::new(ApiHandler::new(
        event_manager,
        engine.clone(),
        config_manager,
    ));

    let shutdown = CancellationToken::new();
    let ipc_server = Arc::new(IpcServer::new(socket, api_handler));
    let server_handle = {
        let server = ipc_server.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = server.start(token).await {
                tracing::error!("IPC server error: {}", e);
            }
        })
    };

    tracing::info!("Daemon ready and listening");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    shutdown.cancel();
    engine.shutdown().await;
    let _ = server_handle.await;

    Ok(())
}
