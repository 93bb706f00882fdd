//! MSQuant Core - Headless library for running model-quantization jobs.
//!
//! This crate owns the execution side of MSQuant: it launches the external
//! quantization runner as a supervised process group, streams its merged
//! stdout/stderr as log lines, parses the `__RESULT__:` terminal line into a
//! structured result, drives the IDLE → RUNNING → terminal state machine with
//! graceful-then-forceful cancellation, and polls nvidia-smi for GPU
//! telemetry. It can be used programmatically without any UI layer.
//!
//! # Example
//!
//! ```rust,ignore
//! use msquant_core::{GgufParams, JobConfig, JobService, JobStatus, MethodParams, RunnerSpec};
//!
//! #[tokio::main]
//! async fn main() -> msquant_core::Result<()> {
//!     let runner = RunnerSpec::new("msquant-runner");
//!     let service = JobService::new(runner);
//!
//!     let config = JobConfig::new(
//!         "meta-llama/Llama-3.2-1B",
//!         MethodParams::Gguf(GgufParams::default()),
//!     );
//!     service.submit(config)?;
//!
//!     // Poll from a UI timer
//!     while !service.status().is_terminal() {
//!         let tail = service.tail_logs(0);
//!         println!("{} log lines so far", tail.next_index);
//!         tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod job;
pub mod monitor;
pub mod platform;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use error::{QuantError, Result};
pub use job::{
    AwqParams, CalibrationSpec, ExitOutcome, GgufParams, JobConfig, JobResult, JobService,
    JobSnapshot, JobStatus, LogTail, MethodParams, Nvfp4Params, OutputFormat, ProcessControl,
    ProcessSupervisor, QuantMethod, RunnerSpec, RunningJob, RESULT_SENTINEL,
};
pub use monitor::{GpuDevice, GpuHistory, GpuMetric, GpuSample};
