//! apimonitor -- scheduled HTTP API probes with result history and alerting.
//!
//! Test definitions are loaded once at startup, turned into one job per
//! test, and fired on their cron cadence. Every firing's outcome is stored;
//! failures are pushed to the configured notifier.

pub mod api;
pub mod config;
pub mod ingest;
pub mod notify;
pub mod probes;
pub mod scheduler;
pub mod storage;

use anyhow::{Context, Result};
use config::{Config, LogFormat};
use scheduler::{CronClock, JobContext, Scheduler};
use std::sync::Arc;
use storage::{SqliteStore, Store};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` overrides the configured filter.
pub fn init_tracing(log: &config::LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = match log.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
}

/// Open the store configured in `config`, creating the data directory if needed.
pub fn open_store(config: &Config) -> Result<SqliteStore> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Could not create data dir {}", config.data_dir.display()))?;
    let db_path = config.db_path();
    let db_path = db_path.to_string_lossy();
    tracing::info!(%db_path, "Initializing database");
    let pool = storage::open_pool(&db_path)?;
    Ok(SqliteStore::new(pool))
}

/// Start the apimonitor daemon: ingestion, scheduler, and admin API.
/// Returns after SIGINT/SIGTERM, once the scheduler is stopped.
pub async fn serve(config: Config) -> Result<()> {
    // 1. Initialize Storage
    let store: Arc<dyn Store> = Arc::new(open_store(&config)?);

    // 2. Ingest test files. A bad directory or failed import is not fatal.
    let tests = ingest::load_for_startup(store.as_ref(), config.tests_dir.as_deref())?;

    // 3. Build and start the scheduler
    let ctx = JobContext {
        probe: Arc::new(probes::HttpProbe::new(config.probe.timeout())?),
        store: store.clone(),
        notifier: notify::from_config(&config.slack, config.probe.timeout())?,
        overlap: config.probe.overlap,
    };
    let scheduler = Arc::new(Scheduler::with_tests(tests, ctx, Arc::new(CronClock::new())));
    scheduler.start().context("Failed to start scheduler")?;

    // 4. Start API Server
    let addr: std::net::SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind))?;
    let app = api::router(api::state::AppState {
        store,
        scheduler: scheduler.clone(),
    });

    tracing::info!(%addr, "apimonitor listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    scheduler.stop();
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Shutting down, SIGINT received"),
        _ = terminate => tracing::info!("Shutting down, SIGTERM received"),
    }
}
