// crates/worker/src/worker.rs
//! The worker loop: poll → claim → execute, with lease renewal and
//! cooperative cancellation.
//!
//! Concurrency is an explicit per-worker semaphore (default one permit),
//! no global mutable state. A separate sweep task (spawned by `main`)
//! reclaims expired leases for the whole fleet.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use docwright_core::{Job, JobStatus, ProgressUpdate};
use docwright_db::{Database, DbError, RetryOutcome};

use crate::config::WorkerConfig;
use crate::executor::{ExecError, ExecutionOutcome, Executor, ExecutorConfig};

/// Why an in-flight execution was aborted, recorded by the heartbeat task
/// before it cancels the execution token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbortCause {
    /// Heartbeat hit a lease conflict: ownership moved to another worker.
    /// The result is discarded and no coordinator call is made.
    LeaseLost,
    /// The cancel flag was observed; the owner acknowledges with
    /// `mark_canceled` after the subprocess dies.
    Canceled,
}

#[derive(Clone)]
pub struct WorkerLoop {
    db: Database,
    config: Arc<WorkerConfig>,
    worker_id: String,
    executor: Arc<Executor>,
    slots: Arc<Semaphore>,
}

impl WorkerLoop {
    pub fn new(db: Database, config: WorkerConfig) -> Self {
        let worker_id = config.resolve_worker_id();
        let executor = Arc::new(Executor::new(ExecutorConfig::from_worker_config(&config)));
        let slots = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            db,
            config: Arc::new(config),
            worker_id,
            executor,
            slots,
        }
    }

    /// Swap in a custom executor configuration (tests, special deployments).
    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Poll for claimable jobs until `shutdown` fires. In-flight executions
    /// finish on their own tasks; shutdown stops new claims only.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(worker_id = %self.worker_id, "worker loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = poll.tick() => {}
            }
            self.claim_available().await;
        }
        tracing::info!(worker_id = %self.worker_id, "worker loop stopped");
    }

    /// Claim as many jobs as free execution slots allow.
    async fn claim_available(&self) {
        loop {
            let permit = match Arc::clone(&self.slots).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => return, // all slots busy
            };
            match self.db.claim_one(&self.worker_id, self.config.lease_ms).await {
                Ok(Some(job)) => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.run_claimed(job).await;
                        drop(permit);
                    });
                }
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "claim attempt failed");
                    return;
                }
            }
        }
    }

    /// Drive one claimed job to a terminal coordinator call (or, on a lost
    /// lease, to silence).
    pub async fn run_claimed(&self, job: Job) {
        // A cancel flag set while the job was unowned (e.g. between retry
        // attempts) is honored before anything is spawned.
        if job.cancel_requested {
            if let Err(e) = self.db.mark_canceled(&job.id, &self.worker_id).await {
                tracing::warn!(job_id = %job.id, error = %e, "cancel acknowledgement failed");
            }
            return;
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let abort: Arc<Mutex<Option<AbortCause>>> = Arc::new(Mutex::new(None));

        tracing::info!(
            job_id = %job.id,
            repository = %job.repository,
            attempt = job.attempts + 1,
            max_attempts = job.max_attempts,
            "starting execution"
        );

        let heartbeat = tokio::spawn(heartbeat_loop(
            self.db.clone(),
            job.id.clone(),
            self.worker_id.clone(),
            self.config.lease_ms,
            self.config.heartbeat_interval(),
            cancel.clone(),
            Arc::clone(&abort),
        ));

        let result = self
            .executor
            .execute(
                Path::new(&job.spec.repo_path),
                &job.repository,
                job.spec.profile.as_deref(),
                &cancel,
                self.progress_sink(&job),
            )
            .await;
        heartbeat.abort();

        match result {
            Ok(outcome) => self.finish_success(&job, &run_id, outcome).await,
            Err(ExecError::Killed) => {
                let cause = abort.lock().ok().and_then(|mut guard| guard.take());
                match cause {
                    Some(AbortCause::LeaseLost) => {
                        tracing::warn!(
                            job_id = %job.id,
                            "lease lost mid-execution; subprocess killed, result discarded"
                        );
                    }
                    Some(AbortCause::Canceled) => {
                        if let Err(e) = self.db.mark_canceled(&job.id, &self.worker_id).await {
                            tracing::warn!(job_id = %job.id, error = %e, "cancel acknowledgement failed");
                        } else {
                            tracing::info!(job_id = %job.id, "job canceled");
                        }
                    }
                    None => {
                        self.fail(&job, "analysis subprocess was killed before completion")
                            .await;
                    }
                }
            }
            Err(e) => self.fail(&job, &e.to_string()).await,
        }
    }

    async fn finish_success(&self, job: &Job, run_id: &str, outcome: ExecutionOutcome) {
        let stats = match self
            .db
            .reconcile_documents(&job.id, &job.repository, run_id, &outcome.documents)
            .await
        {
            Ok(stats) => stats,
            Err(e) => {
                // Reconciliation failures are execution failures: retried,
                // safe because the reconciler is idempotent.
                self.fail(job, &format!("document reconciliation failed: {e}"))
                    .await;
                return;
            }
        };

        let result = serde_json::json!({
            "runId": run_id,
            "durationMs": outcome.duration_ms,
            "documents": outcome.documents.len(),
            "reconcile": stats,
            "parseWarnings": outcome.warnings,
        });
        match self.db.complete_job(&job.id, &self.worker_id, &result).await {
            Ok(()) => tracing::info!(
                job_id = %job.id,
                documents = outcome.documents.len(),
                duration_ms = outcome.duration_ms,
                "job completed"
            ),
            Err(DbError::LeaseConflict { .. }) => {
                tracing::warn!(job_id = %job.id, "lease lost before completion; result discarded");
            }
            Err(e) => {
                self.fail(job, &format!("failed to record completion: {e}"))
                    .await;
            }
        }
    }

    /// Report a failed attempt; the coordinator decides pending-vs-dead.
    async fn fail(&self, job: &Job, error: &str) {
        match self
            .db
            .retry_or_fail(&job.id, error, &self.config.retry_policy())
            .await
        {
            Ok(RetryOutcome::Retried { run_at }) => {
                tracing::warn!(job_id = %job.id, run_at, error, "attempt failed; scheduled for retry");
            }
            Ok(RetryOutcome::Dead) => {
                tracing::error!(job_id = %job.id, error, "attempts exhausted; job dead-lettered");
            }
            Ok(RetryOutcome::AlreadyTerminal) => {
                tracing::debug!(job_id = %job.id, "job reached a terminal state concurrently");
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "failed to record job failure");
            }
        }
    }

    /// Progress writes are fire-and-forget display updates. A failed write
    /// never affects the execution; lease loss is the heartbeat's job to
    /// detect.
    fn progress_sink(&self, job: &Job) -> Arc<dyn Fn(ProgressUpdate) + Send + Sync> {
        let db = self.db.clone();
        let job_id = job.id.clone();
        let worker_id = self.worker_id.clone();
        Arc::new(move |update: ProgressUpdate| {
            let db = db.clone();
            let job_id = job_id.clone();
            let worker_id = worker_id.clone();
            tokio::spawn(async move {
                if let Err(e) = db
                    .update_progress(&job_id, &worker_id, Some(JobStatus::Analyzing), &update)
                    .await
                {
                    tracing::debug!(job_id = %job_id, error = %e, "progress update dropped");
                }
            });
        })
    }
}

/// Renew the lease on a fixed cadence until the execution token fires.
/// Observes the cancel flag (returned by heartbeat) and lease conflicts,
/// records the cause, and cancels the execution.
async fn heartbeat_loop(
    db: Database,
    job_id: String,
    worker_id: String,
    lease_ms: i64,
    every: Duration,
    cancel: CancellationToken,
    abort: Arc<Mutex<Option<AbortCause>>>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match db.heartbeat(&job_id, &worker_id, lease_ms).await {
            Ok(false) => {}
            Ok(true) => {
                set_abort(&abort, AbortCause::Canceled);
                cancel.cancel();
                return;
            }
            Err(DbError::LeaseConflict { .. }) => {
                set_abort(&abort, AbortCause::LeaseLost);
                cancel.cancel();
                return;
            }
            // Transient store errors: keep the subprocess alive and try
            // again next tick; the lease outlives several missed beats.
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "heartbeat failed; retrying"),
        }
    }
}

fn set_abort(abort: &Arc<Mutex<Option<AbortCause>>>, cause: AbortCause) {
    match abort.lock() {
        Ok(mut guard) => {
            guard.get_or_insert(cause);
        }
        Err(e) => tracing::error!("abort-cause mutex poisoned: {e}"),
    }
}
