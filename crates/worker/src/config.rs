// crates/worker/src/config.rs
//! Worker configuration: clap flags with environment fallbacks.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use docwright_core::RetryPolicy;

/// Configuration surface for one worker process.
///
/// Every flag also reads an environment variable, so deployments can run
/// the binary with no arguments at all.
#[derive(Debug, Clone, Parser)]
#[command(name = "docwright-worker", version, about = "docwright job queue worker")]
pub struct WorkerConfig {
    /// SQLite database path. Defaults to the per-user data directory.
    #[arg(long, env = "DOCWRIGHT_DB")]
    pub db_path: Option<PathBuf>,

    /// Worker identity recorded in `locked_by`. Defaults to hostname-pid.
    #[arg(long, env = "DOCWRIGHT_WORKER_ID")]
    pub worker_id: Option<String>,

    /// Port for the queue API.
    #[arg(long, env = "DOCWRIGHT_PORT", default_value_t = 48_732)]
    pub port: u16,

    /// How often the loop polls for claimable jobs.
    #[arg(long, env = "DOCWRIGHT_POLL_MS", default_value_t = 2_000)]
    pub poll_ms: u64,

    /// Lease duration granted per claim/heartbeat. Keep this ~5x the
    /// heartbeat interval so a healthy worker never loses its lease.
    #[arg(long, env = "DOCWRIGHT_LEASE_MS", default_value_t = 60_000)]
    pub lease_ms: i64,

    /// Lease renewal interval. Must be strictly shorter than the lease.
    #[arg(long, env = "DOCWRIGHT_HEARTBEAT_MS", default_value_t = 12_000)]
    pub heartbeat_ms: u64,

    /// Concurrent executions per worker. Analysis is resource-heavy, so
    /// the default is one.
    #[arg(long, env = "DOCWRIGHT_MAX_CONCURRENT_JOBS", default_value_t = 1)]
    pub max_concurrent_jobs: usize,

    /// Attempts before a job dead-letters.
    #[arg(long, env = "DOCWRIGHT_MAX_ATTEMPTS", default_value_t = 3)]
    pub max_attempts: u32,

    #[arg(long, env = "DOCWRIGHT_BACKOFF_BASE_MS", default_value_t = 30_000)]
    pub backoff_base_ms: u64,

    #[arg(long, env = "DOCWRIGHT_BACKOFF_MULTIPLIER", default_value_t = 2.0)]
    pub backoff_multiplier: f64,

    #[arg(long, env = "DOCWRIGHT_BACKOFF_CAP_MS", default_value_t = 900_000)]
    pub backoff_cap_ms: u64,

    #[arg(long, env = "DOCWRIGHT_BACKOFF_JITTER_MS", default_value_t = 5_000)]
    pub backoff_jitter_ms: u64,

    /// Analysis tool binary (name on PATH or an absolute path).
    #[arg(long = "tool-bin", env = "DOCWRIGHT_TOOL_BIN", default_value = "docwright-analyze")]
    pub tool_binary: PathBuf,

    /// Environment variable that must hold the analysis tool's credential.
    /// Validated before every spawn; empty means fail fast.
    #[arg(
        long,
        env = "DOCWRIGHT_TOOL_CREDENTIAL_VAR",
        default_value = "DOCWRIGHT_API_KEY"
    )]
    pub tool_credential_var: String,

    /// Hard timeout for one analysis run, in seconds. Unset falls back to
    /// the strategy default.
    #[arg(long, env = "DOCWRIGHT_TOOL_TIMEOUT_SECS")]
    pub tool_timeout_secs: Option<u64>,

    /// Execution strategy: "standard" (timeout, native progress) or
    /// "long-running" (no timeout, synthetic heartbeat progress).
    #[arg(long, env = "DOCWRIGHT_STRATEGY", default_value = "standard")]
    pub strategy: String,

    /// Interval of the expired-lease reclaim sweep.
    #[arg(long, env = "DOCWRIGHT_RECLAIM_MS", default_value_t = 30_000)]
    pub reclaim_ms: u64,
}

impl WorkerConfig {
    /// Resolve the worker identity once per process.
    pub fn resolve_worker_id(&self) -> String {
        self.worker_id.clone().unwrap_or_else(|| {
            format!(
                "{}-{}",
                gethostname::gethostname().to_string_lossy(),
                std::process::id()
            )
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(100))
    }

    /// Heartbeat cadence, clamped strictly below the lease so a healthy
    /// worker always renews in time.
    pub fn heartbeat_interval(&self) -> Duration {
        let lease_ms = self.lease_ms.max(1) as u64;
        Duration::from_millis(self.heartbeat_ms.clamp(10, lease_ms.saturating_sub(1).max(10)))
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_ms.max(1_000))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_ms: self.backoff_base_ms,
            multiplier: self.backoff_multiplier,
            cap_ms: self.backoff_cap_ms,
            jitter_ms: self.backoff_jitter_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> WorkerConfig {
        let mut full = vec!["docwright-worker"];
        full.extend_from_slice(args);
        WorkerConfig::parse_from(full)
    }

    #[test]
    fn test_defaults() {
        let cfg = parse(&[]);
        assert_eq!(cfg.max_concurrent_jobs, 1);
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.lease_ms, 60_000);
        assert_eq!(cfg.strategy, "standard");
        assert!(cfg.lease_ms as u64 >= 5 * cfg.heartbeat_ms, "lease ~5x heartbeat");
    }

    #[test]
    fn test_flag_overrides() {
        let cfg = parse(&[
            "--max-concurrent-jobs",
            "4",
            "--tool-bin",
            "/opt/tools/analyze",
            "--strategy",
            "long-running",
        ]);
        assert_eq!(cfg.max_concurrent_jobs, 4);
        assert_eq!(cfg.tool_binary, PathBuf::from("/opt/tools/analyze"));
        assert_eq!(cfg.strategy, "long-running");
    }

    #[test]
    fn test_heartbeat_clamped_below_lease() {
        let cfg = parse(&["--lease-ms", "1000", "--heartbeat-ms", "5000"]);
        assert!(cfg.heartbeat_interval() < Duration::from_millis(1000));
    }

    #[test]
    fn test_worker_id_default_includes_pid() {
        let cfg = parse(&[]);
        let id = cfg.resolve_worker_id();
        assert!(id.ends_with(&std::process::id().to_string()));
    }

    #[test]
    fn test_retry_policy_from_flags() {
        let cfg = parse(&["--backoff-base-ms", "50", "--backoff-jitter-ms", "0"]);
        let policy = cfg.retry_policy();
        assert_eq!(policy.base_ms, 50);
        assert_eq!(policy.jitter_ms, 0);
    }
}
