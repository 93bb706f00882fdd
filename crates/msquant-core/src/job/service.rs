//! Job orchestration state machine.
//!
//! Tracks exactly one quantization job per service:
//! `IDLE → RUNNING → {COMPLETED, FAILED, CANCELLED}`. The three outcome
//! states are terminal; a new `submit` supersedes the old record with a
//! fresh one.
//!
//! The job record has a single writer — the consuming task spawned by
//! `submit` — while UI-facing calls (`status`, `tail_logs`, `result`) only
//! take copy-out snapshots under a short-lived lock. The one lock-guarded
//! decision is the check-and-spawn in `submit`, which is what upholds the
//! one-RUNNING-job invariant under concurrent submissions.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::config::JobConfig;
use super::sentinel::{classify_line, JobResult, OutputLine};
use super::supervisor::{ProcessControl, ProcessSupervisor, RunnerSpec};
use crate::config::JobsConfig;
use crate::error::{QuantError, Result};

/// Lifecycle state of the current job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Copy-out view of the current job, cheap enough for a 1 s poll timer.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub log_len: usize,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub cancel_requested: bool,
}

/// Log lines since a watermark, plus the next watermark to poll with.
#[derive(Debug, Clone)]
pub struct LogTail {
    pub lines: Vec<String>,
    pub next_index: usize,
}

/// Mutable record of the current job. Superseded on the next submit.
struct JobState {
    status: JobStatus,
    logs: Vec<String>,
    result: Option<JobResult>,
    error: Option<String>,
    control: Option<ProcessControl>,
}

impl JobState {
    fn new() -> Self {
        Self {
            status: JobStatus::Idle,
            logs: Vec::new(),
            result: None,
            error: None,
            control: None,
        }
    }
}

/// Orchestrates quantization jobs: submit, poll, cancel.
pub struct JobService {
    runner: RunnerSpec,
    supervisor: ProcessSupervisor,
    state: Arc<Mutex<JobState>>,
}

impl JobService {
    pub fn new(runner: RunnerSpec) -> Self {
        Self {
            runner,
            supervisor: ProcessSupervisor::new(),
            state: Arc::new(Mutex::new(JobState::new())),
        }
    }

    /// Override the supervisor (e.g. to shorten the cancel grace period).
    pub fn with_supervisor(mut self, supervisor: ProcessSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Submit a new quantization job.
    ///
    /// Fails synchronously with `JobAlreadyRunning` while a job is RUNNING,
    /// with `Validation` for a bad config, and with `Launch` when the child
    /// cannot be spawned — in the launch-failure case the previous terminal
    /// state is preserved. Must be called within a tokio runtime.
    pub fn submit(&self, config: JobConfig) -> Result<()> {
        config.validate()?;
        let artifact = config.write_artifact()?;

        let (lines, control) = {
            let mut state = self.state.lock().expect("job state lock poisoned");
            if state.status == JobStatus::Running {
                return Err(QuantError::JobAlreadyRunning);
            }

            // Spawn under the lock: two near-simultaneous submits must not
            // both observe a non-RUNNING state.
            let running = self.supervisor.start(&self.runner, artifact.path())?;

            *state = JobState {
                status: JobStatus::Running,
                logs: Vec::new(),
                result: None,
                error: None,
                control: Some(running.control.clone()),
            };
            (running.lines, running.control)
        };

        info!(
            "Submitted {} job for {} (pid {})",
            config.method(),
            config.model_id,
            control.pgid()
        );

        let state = self.state.clone();
        tokio::spawn(async move {
            // The config artifact must outlive the child that reads it.
            let _artifact = artifact;
            consume_job_output(state, lines, control).await;
        });

        Ok(())
    }

    /// Request cancellation of the running job.
    ///
    /// A no-op when nothing is RUNNING. Returns after signalling; poll
    /// `status()` to observe the CANCELLED transition.
    pub fn cancel(&self) -> Result<()> {
        let control = {
            let state = self.state.lock().expect("job state lock poisoned");
            if state.status != JobStatus::Running {
                debug!("Cancel requested with no running job; ignoring");
                return Ok(());
            }
            state.control.clone()
        };

        match control {
            Some(control) => control.cancel(),
            None => Ok(()),
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> JobStatus {
        self.state.lock().expect("job state lock poisoned").status
    }

    /// Log lines at or after `since_index`, in emission order.
    ///
    /// Polling with each returned `next_index` yields every line exactly
    /// once, with no duplication and no gaps.
    pub fn tail_logs(&self, since_index: usize) -> LogTail {
        let state = self.state.lock().expect("job state lock poisoned");
        let start = since_index.min(state.logs.len());
        LogTail {
            lines: state.logs[start..].to_vec(),
            next_index: state.logs.len(),
        }
    }

    /// Terminal result reported by the child, if one has been parsed.
    pub fn result(&self) -> Option<JobResult> {
        self.state
            .lock()
            .expect("job state lock poisoned")
            .result
            .clone()
    }

    /// Diagnostic message for a FAILED job.
    pub fn error(&self) -> Option<String> {
        self.state
            .lock()
            .expect("job state lock poisoned")
            .error
            .clone()
    }

    /// The last few log lines, for failure context in the UI.
    pub fn failure_context(&self) -> Vec<String> {
        let state = self.state.lock().expect("job state lock poisoned");
        let skip = state
            .logs
            .len()
            .saturating_sub(JobsConfig::FAILURE_CONTEXT_LINES);
        state.logs[skip..].to_vec()
    }

    /// Combined snapshot for one poll tick.
    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state.lock().expect("job state lock poisoned");
        JobSnapshot {
            status: state.status,
            log_len: state.logs.len(),
            result: state.result.clone(),
            error: state.error.clone(),
            cancel_requested: state
                .control
                .as_ref()
                .map(|c| c.cancel_requested())
                .unwrap_or(false),
        }
    }
}

/// Single writer for the job record: drains the child's output, parses the
/// sentinel, then commits the terminal status once the exit is reaped.
async fn consume_job_output(
    state: Arc<Mutex<JobState>>,
    mut lines: mpsc::UnboundedReceiver<std::io::Result<String>>,
    control: ProcessControl,
) {
    let mut pending_result: Option<JobResult> = None;
    let mut stream_error: Option<String> = None;

    while let Some(item) = lines.recv().await {
        match item {
            Ok(line) => match classify_line(&line) {
                OutputLine::Log(line) => {
                    let mut state = state.lock().expect("job state lock poisoned");
                    state.logs.push(line);
                }
                OutputLine::Result(result) => {
                    if pending_result.is_none() {
                        debug!("Parsed terminal result line (success={})", result.success);
                        pending_result = Some(result);
                    } else {
                        // Only the first sentinel is authoritative.
                        warn!("Ignoring extra result line after the first: {}", line);
                        let mut state = state.lock().expect("job state lock poisoned");
                        state.logs.push(line);
                    }
                }
                OutputLine::Malformed(line) => {
                    warn!("Malformed result line treated as log: {}", line);
                    let mut state = state.lock().expect("job state lock poisoned");
                    state.logs.push(line);
                }
            },
            Err(e) => {
                stream_error = Some(format!("Error reading job output: {}", e));
            }
        }
    }

    let outcome = control.wait().await;

    let mut state = state.lock().expect("job state lock poisoned");
    state.result = pending_result.clone();

    if outcome.cancelled {
        state.status = JobStatus::Cancelled;
        info!("Job cancelled (pgid {})", control.pgid());
        return;
    }

    if let Some(message) = stream_error {
        state.status = JobStatus::Failed;
        state.error = Some(message);
        return;
    }

    match (outcome.clean(), pending_result) {
        (true, Some(result)) if result.success => {
            state.status = JobStatus::Completed;
            info!("Job completed: {:?}", result.path);
        }
        (true, Some(result)) => {
            // Clean exit but the child reported failure; the payload wins.
            state.status = JobStatus::Failed;
            state.error = result.message.or_else(|| Some("Unknown error".to_string()));
        }
        (true, None) => {
            state.status = JobStatus::Failed;
            state.error = Some("Process exited without reporting a result".to_string());
        }
        (false, result) => {
            state.status = JobStatus::Failed;
            state.error = result.and_then(|r| r.message).or_else(|| {
                Some(match (outcome.code, outcome.signal) {
                    (Some(code), _) => format!("Process exited with code {}", code),
                    (None, Some(signal)) => format!("Process killed by signal {}", signal),
                    (None, None) => "Process exited abnormally".to_string(),
                })
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_idle() {
        let service = JobService::new(RunnerSpec::new("/nonexistent/runner"));
        assert_eq!(service.status(), JobStatus::Idle);
        assert!(service.result().is_none());
        assert!(service.error().is_none());
        assert!(service.tail_logs(0).lines.is_empty());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Idle.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_cancel_when_idle_is_noop() {
        let service = JobService::new(RunnerSpec::new("/nonexistent/runner"));
        assert!(service.cancel().is_ok());
        assert_eq!(service.status(), JobStatus::Idle);
    }

    #[tokio::test]
    async fn test_launch_failure_surfaces_synchronously() {
        use crate::job::config::{GgufParams, JobConfig, MethodParams};

        let service = JobService::new(RunnerSpec::new("/nonexistent/runner"));
        let config = JobConfig::new("org/model", MethodParams::Gguf(GgufParams::default()));

        let err = service.submit(config).unwrap_err();
        assert!(matches!(err, QuantError::Launch { .. }));
        // The job never left IDLE.
        assert_eq!(service.status(), JobStatus::Idle);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_launch() {
        use crate::job::config::{AwqParams, JobConfig, MethodParams};

        let service = JobService::new(RunnerSpec::new("/nonexistent/runner"));
        // AWQ without calibration is invalid.
        let config = JobConfig::new("org/model", MethodParams::Awq(AwqParams::default()));

        let err = service.submit(config).unwrap_err();
        assert!(matches!(err, QuantError::Validation { .. }));
        assert_eq!(service.status(), JobStatus::Idle);
    }

    #[test]
    fn test_tail_logs_watermark_past_end() {
        let service = JobService::new(RunnerSpec::new("/nonexistent/runner"));
        let tail = service.tail_logs(100);
        assert!(tail.lines.is_empty());
        assert_eq!(tail.next_index, 0);
    }
}
