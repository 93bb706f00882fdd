//! Process supervision for quantization runs.
//!
//! Owns the full lifecycle of one external child: spawn as the leader of a
//! fresh process group, merge stdout/stderr into a single ordered line
//! channel, publish the exit outcome once the child is reaped, and escalate
//! a cancellation from SIGTERM to SIGKILL after the grace period.
//!
//! The process group matters: quantization backends fork native CUDA worker
//! processes, and signalling only the leader would strand them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationToken;
use crate::config::{JobsConfig, PathsConfig};
use crate::error::{QuantError, Result};
use crate::platform;

/// How to invoke the external quantization runner.
///
/// The supervisor appends `--config <path>` to whatever is configured here,
/// so the full invocation is `<program> [args...] --config <artifact>`.
#[derive(Debug, Clone)]
pub struct RunnerSpec {
    /// Executable to run (absolute path or name resolved via PATH).
    pub program: PathBuf,
    /// Arguments placed before the `--config` pair.
    pub args: Vec<String>,
    /// Environment variables to set for the child.
    pub env_vars: HashMap<String, String>,
    /// Working directory for the child.
    pub current_dir: Option<PathBuf>,
}

impl RunnerSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_vars: HashMap::new(),
            current_dir: None,
        }
    }

    /// Add an argument placed before the `--config` pair.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Point the runner's HuggingFace caches at the workspace defaults.
    pub fn with_default_hf_env(self) -> Self {
        self.with_env("HF_HOME", PathsConfig::HF_HOME)
            .with_env("HF_DATASETS_CACHE", PathsConfig::HF_DATASETS_CACHE)
    }

    /// Set the child's working directory.
    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

/// How a supervised child finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code, when the child exited normally.
    pub code: Option<i32>,
    /// Terminating signal number (unix), when killed by a signal.
    pub signal: Option<i32>,
    /// Whether a cancellation had been requested before exit.
    pub cancelled: bool,
}

impl ExitOutcome {
    /// Natural, zero-code completion.
    pub fn clean(&self) -> bool {
        self.code == Some(0)
    }
}

/// A freshly launched quantization run.
///
/// `lines` yields the child's combined stdout/stderr in arrival order and
/// ends when both streams close. `control` outlives the run and stays valid
/// after exit.
pub struct RunningJob {
    /// PID of the group leader.
    pub pid: u32,
    /// Merged output line channel. `Err` items are stream read failures.
    pub lines: mpsc::UnboundedReceiver<std::io::Result<String>>,
    /// Handle for cancellation and exit observation.
    pub control: ProcessControl,
}

/// Cloneable handle to a supervised process group.
#[derive(Clone)]
pub struct ProcessControl {
    pgid: u32,
    grace_period: Duration,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
    cancel_requested: CancellationToken,
    term_sent: Arc<AtomicBool>,
    kill_sent: Arc<AtomicBool>,
}

impl ProcessControl {
    /// The process-group id (== the leader's PID).
    pub fn pgid(&self) -> u32 {
        self.pgid
    }

    /// Whether the child has exited and been reaped.
    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Whether cancellation has been requested for this run.
    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.is_cancelled()
    }

    /// Request cancellation of the whole process group.
    ///
    /// Idempotent; a handle whose child already exited is a no-op. Returns
    /// immediately after the graceful signal — escalation to SIGKILL after
    /// the grace period happens on a background task, and callers observe
    /// the eventual exit through `wait()` or the job status.
    pub fn cancel(&self) -> Result<()> {
        if self.has_exited() {
            debug!("Cancel requested for already-exited group {}", self.pgid);
            return Ok(());
        }

        self.cancel_requested.cancel();

        // Only the first cancel signals; later calls are no-ops.
        if self.term_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Cancelling process group {}", self.pgid);
        platform::signal_group_term(self.pgid)?;

        let pgid = self.pgid;
        let grace = self.grace_period;
        let kill_sent = self.kill_sent.clone();
        let mut exit_rx = self.exit_rx.clone();
        tokio::spawn(async move {
            let exited = tokio::time::timeout(grace, async {
                while exit_rx.borrow().is_none() {
                    if exit_rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .is_ok();

            if exited || kill_sent.swap(true, Ordering::SeqCst) {
                return;
            }

            warn!(
                "Process group {} ignored SIGTERM for {:?}, escalating to SIGKILL",
                pgid, grace
            );
            if let Err(e) = platform::signal_group_kill(pgid) {
                error!("Forceful kill of group {} failed: {}", pgid, e);
                return;
            }

            // Give the kernel a moment, then verify the group is gone.
            tokio::time::sleep(JobsConfig::KILL_REAP_TIMEOUT).await;
            if platform::group_alive(pgid) {
                error!("Process group {} survived SIGKILL", pgid);
            }
        });

        Ok(())
    }

    /// Wait for the child to exit and return the reaped outcome.
    pub async fn wait(&self) -> ExitOutcome {
        let mut rx = self.exit_rx.clone();
        loop {
            if let Some(outcome) = *rx.borrow() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // Wait task gone without publishing: treat as a crash.
                return ExitOutcome {
                    code: None,
                    signal: None,
                    cancelled: self.cancel_requested.is_cancelled(),
                };
            }
        }
    }
}

/// Launches and supervises one external quantization run at a time.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    grace_period: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self {
            grace_period: JobsConfig::CANCEL_GRACE_PERIOD,
        }
    }

    /// Override the SIGTERM→SIGKILL grace period.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Spawn the runner for one job.
    ///
    /// `config_path` points at the serialized `JobConfig` artifact; the child
    /// receives it as `--config <path>`.
    pub fn start(&self, runner: &RunnerSpec, config_path: &Path) -> Result<RunningJob> {
        let mut cmd = Command::new(&runner.program);
        cmd.args(&runner.args);
        cmd.arg("--config").arg(config_path);
        for (key, value) in &runner.env_vars {
            cmd.env(key, value);
        }
        if let Some(ref dir) = runner.current_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // The child leads a new process group so one signal reaches every
        // descendant it forks.
        #[cfg(unix)]
        {
            // SAFETY: setsid() is async-signal-safe and touches no locks or
            // allocator state, which is all that is permitted between fork
            // and exec.
            #[allow(unsafe_code)]
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        #[cfg(windows)]
        {
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
        }

        let mut child = cmd.spawn().map_err(|e| QuantError::Launch {
            message: format!(
                "Failed to spawn {}: {}",
                runner.program.display(),
                e
            ),
        })?;

        let pid = child.id().ok_or_else(|| QuantError::Launch {
            message: "Child exited before its PID could be read".to_string(),
        })?;

        info!(
            "Launched quantization run (pid {}) via {}",
            pid,
            runner.program.display()
        );

        let (line_tx, line_rx) = mpsc::unbounded_channel();
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        tokio::spawn(pump_lines(stdout, line_tx.clone(), "stdout"));
        tokio::spawn(pump_lines(stderr, line_tx, "stderr"));

        let (exit_tx, exit_rx) = watch::channel(None);
        let cancel_requested = CancellationToken::new();
        let wait_cancel = cancel_requested.clone();
        tokio::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) => {
                    debug!("Child {} exited with {}", pid, status);
                    ExitOutcome {
                        code: status.code(),
                        signal: exit_signal(&status),
                        cancelled: wait_cancel.is_cancelled(),
                    }
                }
                Err(e) => {
                    error!("Failed to reap child {}: {}", pid, e);
                    ExitOutcome {
                        code: None,
                        signal: None,
                        cancelled: wait_cancel.is_cancelled(),
                    }
                }
            };
            let _ = exit_tx.send(Some(outcome));
        });

        Ok(RunningJob {
            pid,
            lines: line_rx,
            control: ProcessControl {
                pgid: pid,
                grace_period: self.grace_period,
                exit_rx,
                cancel_requested,
                term_sent: Arc::new(AtomicBool::new(false)),
                kill_sent: Arc::new(AtomicBool::new(false)),
            },
        })
    }
}

/// Read one child stream line-by-line into the merged channel.
///
/// Blocking-read-per-line on its own task so UI-facing calls never stall.
async fn pump_lines<R: AsyncRead + Unpin>(
    stream: R,
    tx: mpsc::UnboundedSender<std::io::Result<String>>,
    stream_name: &'static str,
) {
    let mut reader = BufReader::new(stream).lines();
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                if tx.send(Ok(line)).is_err() {
                    // Consumer gone; stop draining.
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading child {}: {}", stream_name, e);
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
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
