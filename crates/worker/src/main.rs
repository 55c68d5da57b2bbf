// crates/worker/src/main.rs
//! docwright worker binary.
//!
//! Starts the queue API immediately, then runs the worker loop and the
//! expired-lease reclaim sweep until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use docwright_db::Database;
use docwright_worker::{create_app, AppState, WorkerConfig, WorkerLoop};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let config = WorkerConfig::parse();

    eprintln!("\ndocwright-worker v{}\n", env!("CARGO_PKG_VERSION"));

    // Step 1: Open the job store.
    let db = match &config.db_path {
        Some(path) => Database::new(path).await?,
        None => Database::open_default().await?,
    };

    // Step 2: Bind and serve the queue API before any job work starts.
    let state = Arc::new(AppState {
        db: db.clone(),
        start_time: Instant::now(),
        default_max_attempts: config.max_attempts,
    });
    let app = create_app(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "queue API listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "queue API server exited");
        }
    });

    // Step 3: Periodic reclaim sweep, independent of any execution's
    // lifetime. Best-effort: failures log and the next tick tries again.
    let sweep_db = db.clone();
    let sweep_interval = config.reclaim_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            match sweep_db.reclaim_expired().await {
                Ok(0) => {}
                Ok(reclaimed) => tracing::info!(reclaimed, "reclaimed expired leases"),
                Err(e) => tracing::warn!(error = %e, "lease reclaim sweep failed (non-fatal)"),
            }
        }
    });

    // Step 4: Worker loop in the foreground until Ctrl-C.
    let shutdown = CancellationToken::new();
    let worker = WorkerLoop::new(db, config);
    tracing::info!(worker_id = %worker.worker_id(), "worker ready");

    let loop_shutdown = shutdown.clone();
    let run = tokio::spawn(async move { worker.run(loop_shutdown).await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    shutdown.cancel();
    run.await?;

    Ok(())
}
