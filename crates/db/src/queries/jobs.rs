// crates/db/src/queries/jobs.rs
//! Queue coordinator: every mutation of the jobs table lives here, as one
//! guarded statement (or short transaction) per operation so claims are
//! linearizable per job. Workers never touch job rows directly.

use docwright_core::{Job, JobSpec, JobStatus, ProgressUpdate, RetryPolicy};
use rand::Rng;

use crate::queries::row_types::{JobRow, JOB_COLUMNS};
use crate::queries::{CreatedJob, RetryOutcome};
use crate::{now_ms, Database, DbError, DbResult};

/// SQL fragment matching every active-locked status. `cloning` and
/// `analyzing` are UI sub-statuses of a claimed job and must behave
/// identically for lease purposes.
const LOCKED: &str = "'claimed', 'cloning', 'analyzing'";

/// SQL fragment matching every active (dedupe-relevant) status.
const ACTIVE: &str = "'pending', 'claimed', 'cloning', 'analyzing'";

impl Database {
    /// Enqueue a job, collapsing duplicate requests.
    ///
    /// If `dedupe_key` is given and an active job already carries it, that
    /// job's id is returned unchanged. The partial unique index on
    /// `(dedupe_key) WHERE active` closes the race between the existence
    /// check and the insert: a concurrent loser re-reads the winner's id.
    pub async fn create_job(
        &self,
        spec: &JobSpec,
        dedupe_key: Option<&str>,
        max_attempts: u32,
    ) -> DbResult<CreatedJob> {
        if let Some(key) = dedupe_key {
            if let Some(id) = self.find_active_by_dedupe_key(key).await? {
                return Ok(CreatedJob { id, deduped: true });
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let spec_json = serde_json::to_string(spec)?;
        let now = now_ms();

        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, repository, spec, status, attempts, max_attempts,
                dedupe_key, created_at, updated_at
            ) VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5, ?6, ?6)
            "#,
        )
        .bind(&id)
        .bind(&spec.repository)
        .bind(&spec_json)
        .bind(max_attempts.max(1) as i64)
        .bind(dedupe_key)
        .bind(now)
        .execute(self.pool())
        .await;

        match inserted {
            Ok(_) => Ok(CreatedJob { id, deduped: false }),
            Err(e) if is_unique_violation(&e) => {
                // Lost the create race; the winner's active job is the answer.
                let key = dedupe_key.unwrap_or_default();
                match self.find_active_by_dedupe_key(key).await? {
                    Some(id) => Ok(CreatedJob { id, deduped: true }),
                    None => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_active_by_dedupe_key(&self, key: &str) -> DbResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(&format!(
            "SELECT id FROM jobs WHERE dedupe_key = ?1 AND status IN ({ACTIVE}) LIMIT 1"
        ))
        .bind(key)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Claim the oldest eligible pending job for `worker_id`.
    ///
    /// The `AND status = 'pending'` clause re-checks the status immediately
    /// before mutating; combined with SQLite's single-writer guarantee,
    /// exactly one of N concurrent callers wins a given job. Returns `None`
    /// when nothing is eligible or the re-check fails.
    pub async fn claim_one(&self, worker_id: &str, lease_ms: i64) -> DbResult<Option<Job>> {
        let now = now_ms();
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE jobs SET
                status = 'claimed',
                locked_by = ?1,
                lease_until = ?2,
                updated_at = ?3
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending' AND (run_at IS NULL OR run_at <= ?3)
                ORDER BY created_at ASC, id ASC
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(worker_id)
        .bind(now + lease_ms)
        .bind(now)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(JobRow::into_job))
    }

    /// Extend the lease, but only for the worker that holds it.
    ///
    /// Returns whether cancellation has been requested; this is the
    /// worker's cancel observation point. A caller that no longer owns the
    /// lease gets `LeaseConflict` and must abandon the execution without
    /// calling complete/retry.
    pub async fn heartbeat(
        &self,
        job_id: &str,
        worker_id: &str,
        lease_ms: i64,
    ) -> DbResult<bool> {
        let now = now_ms();
        let row: Option<(i64,)> = sqlx::query_as(&format!(
            r#"
            UPDATE jobs SET lease_until = ?1, updated_at = ?2
            WHERE id = ?3 AND locked_by = ?4 AND status IN ({LOCKED})
            RETURNING cancel_requested
            "#
        ))
        .bind(now + lease_ms)
        .bind(now)
        .bind(job_id)
        .bind(worker_id)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some((cancel_requested,)) => Ok(cancel_requested != 0),
            None => Err(DbError::LeaseConflict {
                job_id: job_id.to_string(),
                worker_id: worker_id.to_string(),
            }),
        }
    }

    /// UI-granularity progress write (message, step counter, and optionally
    /// the cloning/analyzing sub-status). Lease-guarded like heartbeat, but
    /// callers treat failure as non-fatal since progress is a display signal,
    /// not the job outcome.
    pub async fn update_progress(
        &self,
        job_id: &str,
        worker_id: &str,
        sub_status: Option<JobStatus>,
        update: &ProgressUpdate,
    ) -> DbResult<()> {
        let status = sub_status.filter(|s| s.is_locked()).map(JobStatus::as_str);
        let result = sqlx::query(&format!(
            r#"
            UPDATE jobs SET
                progress_message = ?1,
                current_step = ?2,
                total_steps = ?3,
                status = COALESCE(?4, status),
                updated_at = ?5
            WHERE id = ?6 AND locked_by = ?7 AND status IN ({LOCKED})
            "#
        ))
        .bind(&update.message)
        .bind(update.step.map(|v| v as i64))
        .bind(update.total.map(|v| v as i64))
        .bind(status)
        .bind(now_ms())
        .bind(job_id)
        .bind(worker_id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::LeaseConflict {
                job_id: job_id.to_string(),
                worker_id: worker_id.to_string(),
            });
        }
        Ok(())
    }

    /// Terminal success. Clears the lock, stores the result, stamps
    /// `completed_at`. Lease-guarded: a worker whose lease was reclaimed
    /// gets `LeaseConflict` instead of silently overwriting the new
    /// owner's run.
    pub async fn complete_job(
        &self,
        job_id: &str,
        worker_id: &str,
        result: &serde_json::Value,
    ) -> DbResult<()> {
        let now = now_ms();
        let done = sqlx::query(&format!(
            r#"
            UPDATE jobs SET
                status = 'completed',
                locked_by = NULL,
                lease_until = NULL,
                result = ?1,
                progress_message = NULL,
                completed_at = ?2,
                updated_at = ?2
            WHERE id = ?3 AND locked_by = ?4 AND status IN ({LOCKED})
            "#
        ))
        .bind(serde_json::to_string(result)?)
        .bind(now)
        .bind(job_id)
        .bind(worker_id)
        .execute(self.pool())
        .await?;

        if done.rows_affected() == 0 {
            return Err(DbError::LeaseConflict {
                job_id: job_id.to_string(),
                worker_id: worker_id.to_string(),
            });
        }
        Ok(())
    }

    /// Record a failed attempt. At `max_attempts` the job dead-letters
    /// (terminal, keeps `last_error`); before that it returns to pending
    /// with exponential backoff plus jitter. Only this method decides
    /// pending-vs-dead; executors just report the error.
    pub async fn retry_or_fail(
        &self,
        job_id: &str,
        error: &str,
        policy: &RetryPolicy,
    ) -> DbResult<RetryOutcome> {
        let mut tx = self.pool().begin().await?;

        let row: Option<(i64, i64, String)> =
            sqlx::query_as("SELECT attempts, max_attempts, status FROM jobs WHERE id = ?1")
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await?;
        let (attempts, max_attempts, status) =
            row.ok_or_else(|| DbError::JobNotFound(job_id.to_string()))?;

        if JobStatus::from_db_str(&status).is_terminal() {
            return Ok(RetryOutcome::AlreadyTerminal);
        }

        let attempts = attempts + 1;
        let now = now_ms();

        if attempts >= max_attempts {
            sqlx::query(
                r#"
                UPDATE jobs SET
                    status = 'dead',
                    attempts = ?1,
                    locked_by = NULL,
                    lease_until = NULL,
                    last_error = ?2,
                    last_failed_at = ?3,
                    completed_at = ?3,
                    updated_at = ?3
                WHERE id = ?4
                "#,
            )
            .bind(attempts)
            .bind(error)
            .bind(now)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(RetryOutcome::Dead);
        }

        let jitter = if policy.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=policy.jitter_ms)
        } else {
            0
        };
        let run_at = now + (policy.backoff_ms(attempts as u32) + jitter) as i64;

        sqlx::query(
            r#"
            UPDATE jobs SET
                status = 'pending',
                attempts = ?1,
                locked_by = NULL,
                lease_until = NULL,
                run_at = ?2,
                last_error = ?3,
                last_failed_at = ?4,
                updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(attempts)
        .bind(run_at)
        .bind(error)
        .bind(now)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(RetryOutcome::Retried { run_at })
    }

    /// The owning worker's acknowledgement that it killed the subprocess
    /// after observing the cancel flag. Terminal.
    pub async fn mark_canceled(&self, job_id: &str, worker_id: &str) -> DbResult<()> {
        let now = now_ms();
        let done = sqlx::query(&format!(
            r#"
            UPDATE jobs SET
                status = 'canceled',
                locked_by = NULL,
                lease_until = NULL,
                completed_at = ?1,
                updated_at = ?1
            WHERE id = ?2 AND locked_by = ?3 AND status IN ({LOCKED})
            "#
        ))
        .bind(now)
        .bind(job_id)
        .bind(worker_id)
        .execute(self.pool())
        .await?;

        if done.rows_affected() == 0 {
            return Err(DbError::LeaseConflict {
                job_id: job_id.to_string(),
                worker_id: worker_id.to_string(),
            });
        }
        Ok(())
    }

    /// Flag a job for cancellation. A still-pending job cancels immediately
    /// (nothing to kill); a running one is terminated cooperatively by its
    /// owner at the next heartbeat. Returns false when the job is unknown
    /// or already terminal.
    pub async fn request_cancel(&self, job_id: &str) -> DbResult<bool> {
        let now = now_ms();
        let done = sqlx::query(
            r#"
            UPDATE jobs SET
                cancel_requested = 1,
                status = CASE WHEN status = 'pending' THEN 'canceled' ELSE status END,
                completed_at = CASE WHEN status = 'pending' THEN ?1 ELSE completed_at END,
                updated_at = ?1
            WHERE id = ?2 AND status NOT IN ('completed', 'dead', 'canceled')
            "#,
        )
        .bind(now)
        .bind(job_id)
        .execute(self.pool())
        .await?;
        Ok(done.rows_affected() > 0)
    }

    /// Best-effort sweep: every locked job whose lease is strictly in the
    /// past goes back to pending for another worker to claim. Returns the
    /// number of reclaimed jobs; never raises past the sweep task.
    pub async fn reclaim_expired(&self) -> DbResult<u64> {
        let now = now_ms();
        let done = sqlx::query(&format!(
            r#"
            UPDATE jobs SET
                status = 'pending',
                locked_by = NULL,
                lease_until = NULL,
                last_error = 'Lease expired',
                updated_at = ?1
            WHERE status IN ({LOCKED})
              AND lease_until IS NOT NULL
              AND lease_until < ?1
            "#
        ))
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(done.rows_affected())
    }

    /// Fetch one job by id.
    pub async fn get_job(&self, job_id: &str) -> DbResult<Option<Job>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"))
                .bind(job_id)
                .fetch_optional(self.pool())
                .await?;
        Ok(row.map(JobRow::into_job))
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.message().contains("UNIQUE"))
}
