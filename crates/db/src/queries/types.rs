// crates/db/src/queries/types.rs
// Public type definitions shared across query modules and exported to the
// worker crate.

use serde::Serialize;

/// Outcome of `create_job`: the job id, and whether it was collapsed onto
/// an already-active job sharing the dedupe key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedJob {
    pub id: String,
    pub deduped: bool,
}

/// What `retry_or_fail` decided for the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Back to pending, eligible again at this millisecond epoch.
    Retried { run_at: i64 },
    /// Attempts exhausted; the job is dead-lettered.
    Dead,
    /// The job reached a terminal status concurrently (e.g. canceled);
    /// nothing was changed.
    AlreadyTerminal,
}

/// Counters from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileStats {
    pub inserted: u32,
    pub updated: u32,
    pub skipped: u32,
    pub rejected: u32,
    pub deleted: u32,
}

/// Queue health snapshot (for GET /api/metrics).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    pub pending: i64,
    pub running: i64,
    pub completed_recent: i64,
    pub failed_recent: i64,
    pub dead: i64,
    pub avg_duration_ms: Option<f64>,
    /// Trailing window the `*_recent` counts cover, in milliseconds.
    pub window_ms: i64,
}
