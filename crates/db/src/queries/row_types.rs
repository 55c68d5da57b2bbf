// crates/db/src/queries/row_types.rs
// Internal row types mapping SQLite rows onto core domain types.

use docwright_core::{Job, JobSpec, JobStatus};
use sqlx::Row;

/// Column list every job query returns, kept in one place so `RETURNING`
/// clauses and selects stay in sync with `JobRow::from_row`.
pub(crate) const JOB_COLUMNS: &str = "id, repository, spec, status, attempts, max_attempts, \
     locked_by, lease_until, run_at, dedupe_key, cancel_requested, \
     progress_message, current_step, total_steps, result, last_error, \
     last_failed_at, created_at, updated_at, completed_at";

#[derive(Debug)]
pub(crate) struct JobRow {
    id: String,
    repository: String,
    spec: String,
    status: String,
    attempts: i64,
    max_attempts: i64,
    locked_by: Option<String>,
    lease_until: Option<i64>,
    run_at: Option<i64>,
    dedupe_key: Option<String>,
    cancel_requested: i64,
    progress_message: Option<String>,
    current_step: Option<i64>,
    total_steps: Option<i64>,
    result: Option<String>,
    last_error: Option<String>,
    last_failed_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for JobRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            repository: row.try_get("repository")?,
            spec: row.try_get("spec")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            locked_by: row.try_get("locked_by")?,
            lease_until: row.try_get("lease_until")?,
            run_at: row.try_get("run_at")?,
            dedupe_key: row.try_get("dedupe_key")?,
            cancel_requested: row.try_get("cancel_requested")?,
            progress_message: row.try_get("progress_message")?,
            current_step: row.try_get("current_step")?,
            total_steps: row.try_get("total_steps")?,
            result: row.try_get("result")?,
            last_error: row.try_get("last_error")?,
            last_failed_at: row.try_get("last_failed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl JobRow {
    pub(crate) fn into_job(self) -> Job {
        let spec = serde_json::from_str::<JobSpec>(&self.spec).unwrap_or_else(|e| {
            tracing::warn!(job_id = %self.id, error = %e, "job spec column is not valid JSON");
            JobSpec {
                repository: self.repository.clone(),
                repo_path: String::new(),
                profile: None,
            }
        });
        let result = self
            .result
            .as_deref()
            .and_then(|r| serde_json::from_str(r).ok());
        Job {
            id: self.id,
            repository: self.repository,
            spec,
            status: JobStatus::from_db_str(&self.status),
            attempts: self.attempts.max(0) as u32,
            max_attempts: self.max_attempts.max(1) as u32,
            locked_by: self.locked_by,
            lease_until: self.lease_until,
            run_at: self.run_at,
            dedupe_key: self.dedupe_key,
            cancel_requested: self.cancel_requested != 0,
            progress_message: self.progress_message,
            current_step: self.current_step.map(|v| v.max(0) as u32),
            total_steps: self.total_steps.map(|v| v.max(0) as u32),
            result,
            last_error: self.last_error,
            last_failed_at: self.last_failed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        }
    }
}
