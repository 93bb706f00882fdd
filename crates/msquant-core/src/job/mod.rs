//! Quantization job execution: configuration, process supervision, the
//! result protocol, and the job state machine.

pub mod config;
pub mod sentinel;
pub mod service;
pub mod supervisor;

pub use config::{
    AwqParams, CalibrationSpec, GgufParams, JobConfig, MethodParams, Nvfp4Params, OutputFormat,
    QuantMethod, GGUF_QUANT_TYPES,
};
pub use sentinel::{classify_line, render_sentinel, JobResult, OutputLine, RESULT_SENTINEL};
pub use service::{JobService, JobSnapshot, JobStatus, LogTail};
pub use supervisor::{ExitOutcome, ProcessControl, ProcessSupervisor, RunnerSpec, RunningJob};
