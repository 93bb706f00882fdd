//! Terminal-result protocol shared with the child runner.
//!
//! The child writes ordinary log lines during execution and exactly one final
//! line of the form `__RESULT__:{json}` before exiting. Log streaming and
//! result delivery share the stdout transport; the parse rule is a plain
//! prefix test so the consumer never has to guess.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Reserved prefix marking the structured terminal result line.
pub const RESULT_SENTINEL: &str = "__RESULT__:";

/// Terminal result reported by a finished quantization run.
///
/// Field aliases accept the runner's spellings (`output_dir`, `output_size`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Whether the run produced a usable artifact.
    pub success: bool,
    /// Path to the quantized output directory, on success.
    #[serde(default, alias = "output_dir")]
    pub path: Option<PathBuf>,
    /// Total output size in bytes, on success.
    #[serde(default, alias = "output_size")]
    pub size_bytes: Option<u64>,
    /// Human-readable error description, on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JobResult {
    /// Result for a run that failed without reporting anything structured.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            path: None,
            size_bytes: None,
            message: Some(message.into()),
        }
    }
}

/// Classification of a single child output line.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputLine {
    /// An ordinary human-readable log line.
    Log(String),
    /// The sentinel-prefixed terminal result.
    Result(JobResult),
    /// A sentinel-prefixed line whose payload did not parse.
    Malformed(String),
}

/// Classify one line of child output.
pub fn classify_line(line: &str) -> OutputLine {
    match line.strip_prefix(RESULT_SENTINEL) {
        Some(payload) => match serde_json::from_str::<JobResult>(payload) {
            Ok(result) => OutputLine::Result(result),
            Err(_) => OutputLine::Malformed(line.to_string()),
        },
        None => OutputLine::Log(line.to_string()),
    }
}

/// Render a result as the sentinel line a runner would emit.
///
/// Used by tests and by any in-process runner implementation.
pub fn render_sentinel(result: &JobResult) -> Result<String> {
    Ok(format!(
        "{}{}",
        RESULT_SENTINEL,
        serde_json::to_string(result)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinary_line_is_log() {
        let line = classify_line("loading model shards (3/5)");
        assert_eq!(line, OutputLine::Log("loading model shards (3/5)".into()));
    }

    #[test]
    fn test_success_payload() {
        let line = classify_line(r#"__RESULT__:{"success":true,"path":"/out/job1"}"#);
        match line {
            OutputLine::Result(result) => {
                assert!(result.success);
                assert_eq!(result.path, Some(PathBuf::from("/out/job1")));
                assert_eq!(result.size_bytes, None);
            }
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[test]
    fn test_runner_field_aliases() {
        let line = classify_line(
            r#"__RESULT__:{"success":true,"output_dir":"/out/m-AWQ","output_size":12345}"#,
        );
        match line {
            OutputLine::Result(result) => {
                assert_eq!(result.path, Some(PathBuf::from("/out/m-AWQ")));
                assert_eq!(result.size_bytes, Some(12345));
            }
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_payload() {
        let line =
            classify_line(r#"__RESULT__:{"success":false,"message":"CUDA out of memory"}"#);
        match line {
            OutputLine::Result(result) => {
                assert!(!result.success);
                assert_eq!(result.message.as_deref(), Some("CUDA out of memory"));
            }
            other => panic!("expected result, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_payload() {
        let line = classify_line("__RESULT__:not json at all");
        assert!(matches!(line, OutputLine::Malformed(_)));
    }

    #[test]
    fn test_sentinel_must_start_line() {
        // The prefix test is anchored at the start of the line.
        let line = classify_line(r#"note: __RESULT__:{"success":true}"#);
        assert!(matches!(line, OutputLine::Log(_)));
    }

    #[test]
    fn test_render_roundtrip() {
        let result = JobResult {
            success: true,
            path: Some(PathBuf::from("/out/job1")),
            size_bytes: Some(42),
            message: None,
        };
        let line = render_sentinel(&result).unwrap();
        match classify_line(&line) {
            OutputLine::Result(back) => assert_eq!(back, result),
            other => panic!("expected result, got {:?}", other),
        }
    }
}
