// crates/worker/src/executor.rs
//! Process executor: spawns and supervises one analysis-tool run.
//!
//! One `Executor` parameterized by `ExecutorConfig` covers every execution
//! strategy. Strategies differ only in command template, environment,
//! timeout presence, and synthetic-heartbeat cadence, so they are config
//! values, not types. Per execution the states are
//! Validating → Spawning → Running → {Succeeded, Failed, TimedOut, Killed}.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use docwright_core::{collect_output, NewDocument, ProgressUpdate};

use crate::config::WorkerConfig;

/// Last N lines of each stream kept for diagnostics.
const TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to spawn analysis tool: {0}")]
    Spawn(String),

    #[error(
        "Analysis tool failed (exit code {code:?}, signal {signal:?}); stderr tail:\n{stderr_tail}\nHint: {hint}"
    )]
    NonZeroExit {
        code: Option<i32>,
        signal: Option<i32>,
        stdout_tail: String,
        stderr_tail: String,
        hint: String,
    },

    #[error("Analysis timed out after {elapsed_secs}s; stderr tail:\n{stderr_tail}\nHint: {hint}")]
    Timeout {
        elapsed_secs: u64,
        stderr_tail: String,
        hint: String,
    },

    #[error("Analysis subprocess was killed before completion")]
    Killed,

    #[error("IO error during execution: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything that distinguishes one execution strategy from another.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Tool binary: a bare name resolved on PATH, or a concrete path.
    pub binary: PathBuf,
    /// Arguments before the repository path (the subcommand).
    pub base_args: Vec<String>,
    /// Extra environment handed to the subprocess.
    pub env: Vec<(String, String)>,
    /// Environment variables that must be set and non-empty before a spawn
    /// is attempted (credentials).
    pub required_env: Vec<String>,
    /// Hard wall-clock limit; `None` runs unbounded.
    pub timeout: Option<Duration>,
    /// Cadence of synthetic "still running" progress events, for
    /// strategies whose tool emits no native progress output.
    pub synthetic_heartbeat: Option<Duration>,
    /// Grace between the terminate signal and a forced kill.
    pub kill_grace: Duration,
    /// Strategy-specific troubleshooting line attached to diagnostics.
    pub hint: String,
}

impl ExecutorConfig {
    /// The default strategy: bounded run, native progress output.
    pub fn standard(binary: PathBuf, credential_var: &str, timeout: Duration) -> Self {
        Self {
            binary,
            base_args: vec!["analyze".to_string()],
            env: Vec::new(),
            required_env: vec![credential_var.to_string()],
            timeout: Some(timeout),
            synthetic_heartbeat: None,
            kill_grace: Duration::from_secs(10),
            hint: "verify the analysis tool runs locally: `docwright-analyze analyze <repo>`; \
                   check the credential variable and rerun with RUST_LOG=debug"
                .to_string(),
        }
    }

    /// Unbounded strategy for very large repositories: no timeout, but
    /// synthetic heartbeat progress so the UI never looks stuck.
    pub fn long_running(binary: PathBuf, credential_var: &str) -> Self {
        Self {
            timeout: None,
            synthetic_heartbeat: Some(Duration::from_secs(30)),
            hint: "long-running analysis produced no output; check tool logs and consider \
                   the standard strategy with an explicit timeout"
                .to_string(),
            ..Self::standard(binary, credential_var, Duration::ZERO)
        }
    }

    /// Factory: pick the strategy for this deployment from configuration.
    pub fn from_worker_config(cfg: &WorkerConfig) -> Self {
        let timeout = Duration::from_secs(cfg.tool_timeout_secs.unwrap_or(1_800));
        match cfg.strategy.as_str() {
            "long-running" => Self::long_running(cfg.tool_binary.clone(), &cfg.tool_credential_var),
            _ => Self::standard(cfg.tool_binary.clone(), &cfg.tool_credential_var, timeout),
        }
    }
}

/// Result of a successful run: the collected document batch plus
/// best-effort metadata. Collector parse failures do not fail the run;
/// they ride along as warnings.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub documents: Vec<NewDocument>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Preconditions, checked before anything is spawned.
    pub fn validate(&self, repo_path: &Path) -> Result<(), ExecError> {
        if !repo_path.is_dir() {
            return Err(ExecError::Validation(format!(
                "repository path {} does not exist",
                repo_path.display()
            )));
        }
        if !binary_resolvable(&self.config.binary) {
            return Err(ExecError::Validation(format!(
                "analysis tool binary {} not found",
                self.config.binary.display()
            )));
        }
        for var in &self.config.required_env {
            let present = std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false);
            if !present {
                return Err(ExecError::Validation(format!(
                    "credential variable {var} is not set"
                )));
            }
        }
        Ok(())
    }

    /// Run `<tool> analyze <repo_path> [--profile <name>]` to completion.
    ///
    /// stdout is streamed line-by-line through the progress parser and
    /// recognized lines are forwarded via `on_progress`. Cancelling `cancel`
    /// terminates the process group (grace period, then SIGKILL) and yields
    /// `ExecError::Killed`.
    pub async fn execute(
        &self,
        repo_path: &Path,
        repository: &str,
        profile: Option<&str>,
        cancel: &CancellationToken,
        on_progress: Arc<dyn Fn(ProgressUpdate) + Send + Sync>,
    ) -> Result<ExecutionOutcome, ExecError> {
        let started = Instant::now();
        self.validate(repo_path)?;

        let mut cmd = Command::new(&self.config.binary);
        cmd.args(&self.config.base_args).arg(repo_path);
        if let Some(name) = profile {
            cmd.args(["--profile", name]);
        }
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        // Null stdin so the tool never blocks waiting for input; own
        // process group so terminate reaches the tool's children too.
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        tracing::info!(
            binary = %self.config.binary.display(),
            repo = %repo_path.display(),
            profile = profile.unwrap_or("default"),
            "spawning analysis tool"
        );
        let mut child = cmd.spawn().map_err(|e| ExecError::Spawn(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Spawn("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::Spawn("failed to capture stderr".to_string()))?;

        let progress = Arc::clone(&on_progress);
        let stdout_task = tokio::spawn(async move {
            let mut tail = VecDeque::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(update) = docwright_core::parse_line(&line) {
                    progress(update);
                }
                push_tail(&mut tail, line);
            }
            tail
        });
        let stderr_task = tokio::spawn(async move {
            let mut tail = VecDeque::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                push_tail(&mut tail, line);
            }
            tail
        });

        let timeout_at = self.config.timeout.map(|d| tokio::time::Instant::now() + d);
        let mut synthetic = self
            .config
            .synthetic_heartbeat
            .map(|d| tokio::time::interval_at(tokio::time::Instant::now() + d, d));

        // The select arms only decide WHY supervision ended; the child is
        // reaped or terminated after, once no arm borrows it.
        enum RunEnd {
            Exited(std::io::Result<std::process::ExitStatus>),
            Canceled,
            TimedOut,
        }

        let end = loop {
            tokio::select! {
                status = child.wait() => break RunEnd::Exited(status),
                _ = cancel.cancelled() => break RunEnd::Canceled,
                _ = sleep_until_opt(timeout_at) => break RunEnd::TimedOut,
                _ = tick_opt(synthetic.as_mut()) => {
                    on_progress(ProgressUpdate {
                        message: format!("still running, {}s elapsed", started.elapsed().as_secs()),
                        phase: None,
                        step: None,
                        total: None,
                    });
                }
            }
        };

        let status = match end {
            RunEnd::Exited(status) => status?,
            RunEnd::Canceled => {
                self.terminate(&mut child).await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                return Err(ExecError::Killed);
            }
            RunEnd::TimedOut => {
                tracing::warn!(
                    elapsed_secs = started.elapsed().as_secs(),
                    "analysis exceeded its timeout; terminating"
                );
                self.terminate(&mut child).await;
                let _ = stdout_task.await;
                let stderr_tail = join_tail(stderr_task).await;
                return Err(ExecError::Timeout {
                    elapsed_secs: started.elapsed().as_secs(),
                    stderr_tail,
                    hint: self.config.hint.clone(),
                });
            }
        };

        let stdout_tail = join_tail(stdout_task).await;
        let stderr_tail = join_tail(stderr_task).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        if status.success() {
            let collected = collect_output(repo_path, repository);
            if !collected.warnings.is_empty() {
                tracing::warn!(
                    warnings = collected.warnings.len(),
                    "output collection finished with parse warnings"
                );
            }
            tracing::info!(
                documents = collected.documents.len(),
                duration_ms,
                "analysis succeeded"
            );
            Ok(ExecutionOutcome {
                documents: collected.documents,
                warnings: collected.warnings,
                duration_ms,
            })
        } else {
            Err(ExecError::NonZeroExit {
                code: status.code(),
                signal: exit_signal(&status),
                stdout_tail,
                stderr_tail,
                hint: self.config.hint.clone(),
            })
        }
    }

    /// Terminate the process group: SIGTERM, a bounded grace period, then
    /// SIGKILL if the tool has not exited.
    async fn terminate(&self, child: &mut Child) {
        signal_group(child, TerminateSignal::Term);
        if tokio::time::timeout(self.config.kill_grace, child.wait())
            .await
            .is_err()
        {
            signal_group(child, TerminateSignal::Kill);
            let _ = child.wait().await;
        }
    }
}

enum TerminateSignal {
    Term,
    Kill,
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: TerminateSignal) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // process_group(0) makes the child its own group leader, so its pid is
    // the pgid.
    if let Some(pid) = child.id() {
        let sig = match signal {
            TerminateSignal::Term => Signal::SIGTERM,
            TerminateSignal::Kill => Signal::SIGKILL,
        };
        if let Err(e) = killpg(Pid::from_raw(pid as i32), sig) {
            tracing::debug!(pid, error = %e, "process group signal failed");
        }
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _signal: TerminateSignal) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

fn binary_resolvable(binary: &Path) -> bool {
    if binary.components().count() > 1 {
        return binary.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file()))
        .unwrap_or(false)
}

fn push_tail(buf: &mut VecDeque<String>, line: String) {
    if buf.len() == TAIL_LINES {
        buf.pop_front();
    }
    buf.push_back(line);
}

async fn join_tail(task: tokio::task::JoinHandle<VecDeque<String>>) -> String {
    let tail = task.await.unwrap_or_default();
    tail.into_iter().collect::<Vec<_>>().join("\n")
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn tick_opt(interval: Option<&mut tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
