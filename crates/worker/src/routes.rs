// crates/worker/src/routes.rs
//! Queue API routes.
//!
//! - POST /api/jobs — create a job (dedupe-checked)
//! - GET  /api/jobs/{id} — fetch one job
//! - POST /api/jobs/{id}/cancel — request cooperative cancellation
//! - GET  /api/metrics — queue health counters
//! - GET  /api/health — liveness

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use docwright_core::{Job, JobSpec};
use docwright_db::{CreatedJob, QueueMetrics};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub repository: String,
    pub repo_path: String,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub dedupe_key: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub id: String,
    pub cancel_requested: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsParams {
    /// Trailing window for the completed/failed counts. Defaults to an hour.
    #[serde(default)]
    pub window_secs: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
}

/// POST /api/jobs — enqueue a job, collapsing duplicates by dedupe key.
async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateJobRequest>,
) -> ApiResult<Json<CreatedJob>> {
    if req.repository.trim().is_empty() {
        return Err(ApiError::BadRequest("repository must not be empty".into()));
    }
    if req.repo_path.trim().is_empty() {
        return Err(ApiError::BadRequest("repoPath must not be empty".into()));
    }
    let spec = JobSpec {
        repository: req.repository,
        repo_path: req.repo_path,
        profile: req.profile,
    };
    let max_attempts = req.max_attempts.unwrap_or(state.default_max_attempts);
    let created = state
        .db
        .create_job(&spec, req.dedupe_key.as_deref(), max_attempts)
        .await?;
    Ok(Json(created))
}

/// GET /api/jobs/{id}
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    state
        .db
        .get_job(&id)
        .await?
        .map(Json)
        .ok_or(ApiError::JobNotFound(id))
}

/// POST /api/jobs/{id}/cancel. Flags the job; the owning worker terminates
/// the subprocess cooperatively.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    match state.db.get_job(&id).await? {
        None => Err(ApiError::JobNotFound(id)),
        Some(job) if job.status.is_terminal() => Err(ApiError::Conflict(format!(
            "job is already {}",
            job.status.as_str()
        ))),
        Some(_) => {
            state.db.request_cancel(&id).await?;
            Ok(Json(CancelResponse {
                id,
                cancel_requested: true,
            }))
        }
    }
}

/// GET /api/metrics
async fn metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MetricsParams>,
) -> ApiResult<Json<QueueMetrics>> {
    let window_ms = params.window_secs.unwrap_or(3_600).max(1) * 1_000;
    Ok(Json(state.db.queue_metrics(window_ms).await?))
}

/// GET /api/health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Build the queue API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
}
