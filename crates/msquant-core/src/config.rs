//! Centralized configuration constants for the quantization core.

use std::time::Duration;

/// Job execution and cancellation parameters.
pub struct JobsConfig;

impl JobsConfig {
    /// How long to wait after SIGTERM before escalating to SIGKILL.
    pub const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(10);
    /// Wait after SIGKILL for the group to be reaped.
    pub const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);
    /// Suggested UI polling interval for `status()` / `tail_logs()`.
    pub const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(1);
    /// How many trailing log lines to quote in failure diagnostics.
    pub const FAILURE_CONTEXT_LINES: usize = 20;
}

/// GPU telemetry parameters.
pub struct MonitorConfig;

impl MonitorConfig {
    /// Samples retained per device (ring capacity).
    pub const HISTORY_SIZE: usize = 60;
    /// Suggested polling interval for `poll()`.
    pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
}

/// Default directory layout consumed by the child runner.
pub struct PathsConfig;

impl PathsConfig {
    pub const OUTPUT_ROOT: &'static str = "/workspace/out";
    pub const HF_HOME: &'static str = "/workspace/hf";
    pub const HF_DATASETS_CACHE: &'static str = "/workspace/hf/datasets";
    pub const CONFIG_FILE_PREFIX: &'static str = "msq_config_";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(JobsConfig::CANCEL_GRACE_PERIOD > JobsConfig::KILL_REAP_TIMEOUT);
        assert!(MonitorConfig::HISTORY_SIZE > 0);
    }
}
