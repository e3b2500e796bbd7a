//! Audioshelf Server: background operation scheduler with an HTTP API.
//!
//! Main entry point that wires all crates together and starts the server.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use audioshelf_api::{AppState, build_app};
use audioshelf_core::config::{AppConfig, StoreBackend};
use audioshelf_core::error::AppError;
use audioshelf_database::{DatabasePool, MemoryOperationStore, OperationStore};
use audioshelf_realtime::EventHub;
use audioshelf_worker::{Dispatcher, MaintenanceScheduler};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "audioshelf-server", version, about = "Audioshelf operation server")]
struct Args {
    /// Environment overlay to load (`config/{env}.toml`).
    #[arg(long, env = "AUDIOSHELF_ENV", default_value = "development")]
    env: String,

    /// Directory holding `default.toml` and environment overlays.
    #[arg(long, default_value = "config")]
    config_dir: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match AppConfig::load(&args.config_dir, &args.env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);
    tracing::info!(
        "Loaded config from '{}' (env: {})",
        args.config_dir,
        args.env
    );

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting Audioshelf v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Operation store ──────────────────────────────────
    let (store, db_pool): (Arc<dyn OperationStore>, Option<DatabasePool>) =
        match config.store.backend {
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory operation store; records are lost on restart");
                (Arc::new(MemoryOperationStore::new()), None)
            }
            StoreBackend::Postgres => {
                let pool = DatabasePool::connect(&config.database).await?;
                let store = pool.operation_store().await?;
                (Arc::new(store), Some(pool))
            }
        };

    // ── Step 2: Event hub + dispatcher ───────────────────────────
    let events = EventHub::new(config.realtime.channel_buffer_size);
    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        Arc::new(events.clone()),
        config.worker.clone(),
    );

    // ── Step 3: Recover work left behind by a previous process ───
    let recovered = dispatcher.recover_interrupted().await?;
    if recovered > 0 {
        tracing::warn!("Marked {} interrupted operations as failed", recovered);
    }

    // ── Step 4: Maintenance schedule ─────────────────────────────
    let mut scheduler = if config.retention.enabled {
        let scheduler = MaintenanceScheduler::new(dispatcher.clone()).await?;
        scheduler.register_retention(&config.retention).await?;
        scheduler.start().await?;
        Some(scheduler)
    } else {
        tracing::info!("Operation retention disabled");
        None
    };

    // ── Step 5: Build and start HTTP server ──────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let shutdown_timeout = config.worker.shutdown_timeout();
    let app = build_app(AppState::new(
        Arc::new(config),
        dispatcher.clone(),
        events,
    ));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!("Audioshelf server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown...");
        })
        .await
        .map_err(|e| AppError::internal(format!("Server error: {}", e)))?;

    // ── Step 6: Drain background work ────────────────────────────
    if let Some(scheduler) = scheduler.as_mut() {
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!("Scheduler shutdown failed: {}", e);
        }
    }

    tracing::info!("Waiting for running operations to finish...");
    let drained = dispatcher.shutdown(shutdown_timeout).await;

    if let Some(pool) = db_pool {
        pool.close().await;
    }

    drained?;
    tracing::info!("Audioshelf server shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
