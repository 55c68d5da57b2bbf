// crates/core/src/job.rs
//! Job model: status vocabulary, queue record, and retry policy.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
///
/// `Cloning` and `Analyzing` are UI-granularity sub-statuses of a claimed
/// job; every queue decision (lease checks, reclaim, metrics) treats them
/// exactly like `Claimed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Claimed,
    Cloning,
    Analyzing,
    Completed,
    Failed,
    Dead,
    Canceled,
}

impl JobStatus {
    /// Stable string form stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Claimed => "claimed",
            JobStatus::Cloning => "cloning",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
            JobStatus::Canceled => "canceled",
        }
    }

    /// Parse a database string. Unknown strings map to `Failed` so a
    /// corrupted row surfaces as a failure instead of a panic.
    pub fn from_db_str(s: &str) -> Self {
        match s {
            "pending" => JobStatus::Pending,
            "claimed" => JobStatus::Claimed,
            "cloning" => JobStatus::Cloning,
            "analyzing" => JobStatus::Analyzing,
            "completed" => JobStatus::Completed,
            "dead" => JobStatus::Dead,
            "canceled" => JobStatus::Canceled,
            _ => JobStatus::Failed,
        }
    }

    /// Active = counts against a dedupe key and may still make progress.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Claimed | JobStatus::Cloning | JobStatus::Analyzing
        )
    }

    /// Locked = a worker currently holds (or held) a lease on the job.
    pub fn is_locked(self) -> bool {
        matches!(
            self,
            JobStatus::Claimed | JobStatus::Cloning | JobStatus::Analyzing
        )
    }

    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Dead | JobStatus::Canceled
        )
    }
}

/// What the client asked for: which repository to analyze and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    /// Stable repository identity (e.g. "acme/widget"). Document source
    /// keys are scoped by this.
    pub repository: String,
    /// Local checkout the analysis tool runs against.
    pub repo_path: String,
    /// Optional analysis profile forwarded as `--profile <name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// A queue record. Timestamps are millisecond epochs; `lease_until` and
/// `run_at` are `None` when the job is unlocked / immediately eligible.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub repository: String,
    pub spec: JobSpec,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub locked_by: Option<String>,
    pub lease_until: Option<i64>,
    pub run_at: Option<i64>,
    pub dedupe_key: Option<String>,
    pub cancel_requested: bool,
    pub progress_message: Option<String>,
    pub current_step: Option<u32>,
    pub total_steps: Option<u32>,
    pub result: Option<serde_json::Value>,
    pub last_error: Option<String>,
    pub last_failed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

/// Exponential backoff parameters for `retry_or_fail`.
///
/// The retry delay for the Nth failure is
/// `min(base * multiplier^(N-1), cap)` plus jitter drawn in `0..=jitter_ms`
/// by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub multiplier: f64,
    pub cap_ms: u64,
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: 30_000,
            multiplier: 2.0,
            cap_ms: 15 * 60_000,
            jitter_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Deterministic backoff (no jitter) for a job that has now failed
    /// `attempts` times. `attempts` is 1-based; 0 is treated as 1.
    pub fn backoff_ms(&self, attempts: u32) -> u64 {
        let exp = attempts.saturating_sub(1).min(63);
        let raw = self.base_ms as f64 * self.multiplier.powi(exp as i32);
        if !raw.is_finite() || raw >= self.cap_ms as f64 {
            self.cap_ms
        } else {
            raw as u64
        }
    }
}
