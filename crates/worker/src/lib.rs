// crates/worker/src/lib.rs
// Worker process for the docwright job queue: claims jobs, supervises the
// analysis subprocess, reconciles its output, and serves the queue API.

pub mod config;
pub mod error;
pub mod executor;
pub mod routes;
pub mod state;
pub mod worker;

use std::sync::Arc;

use axum::Router;

pub use config::WorkerConfig;
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use executor::{ExecError, ExecutionOutcome, Executor, ExecutorConfig};
pub use state::AppState;
pub use worker::WorkerLoop;

/// Build the HTTP application: queue API under `/api`.
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", routes::router())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
