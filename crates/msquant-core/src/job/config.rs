//! Job configuration: quantization method, typed parameters, validation.
//!
//! The parameter shape depends on the method, so the params live in a tagged
//! union rather than a loose key-value bag. The whole config serializes to a
//! JSON file that the child runner reads at startup.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::PathsConfig;
use crate::error::{QuantError, Result};

/// GGUF quantization types accepted by llama.cpp.
pub const GGUF_QUANT_TYPES: &[&str] = &[
    "Q2_K", "Q3_K_S", "Q3_K_M", "Q3_K_L", "Q4_0", "Q4_1", "Q4_K_S", "Q4_K_M", "Q5_0", "Q5_1",
    "Q5_K_S", "Q5_K_M", "Q6_K", "Q8_0", "F16", "F32",
];

/// Quantization method selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantMethod {
    Awq,
    Nvfp4,
    Gguf,
}

impl QuantMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantMethod::Awq => "awq",
            QuantMethod::Nvfp4 => "nvfp4",
            QuantMethod::Gguf => "gguf",
        }
    }

    /// AWQ and NVFP4 calibrate against a dataset; GGUF does not.
    pub fn requires_calibration(&self) -> bool {
        matches!(self, QuantMethod::Awq | QuantMethod::Nvfp4)
    }
}

impl std::fmt::Display for QuantMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Serialized output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Binary,
    Safetensors,
}

/// AWQ (activation-aware weight quantization) parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwqParams {
    /// Weight bit width.
    pub w_bit: u8,
    /// Quantization group size.
    pub group_size: u32,
    /// Use asymmetric quantization with zero points.
    pub zero_point: bool,
}

impl Default for AwqParams {
    fn default() -> Self {
        Self {
            w_bit: 4,
            group_size: 128,
            zero_point: true,
        }
    }
}

/// NVFP4 (NVIDIA FP4 for Blackwell) parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nvfp4Params {
    /// Activation quantization scheme.
    pub act_scheme: String,
    /// Weight quantization scheme.
    pub w_scheme: String,
    /// Allow non-uniform scale factors.
    pub non_uniform: bool,
    /// Mix FP8 layers for sensitive weights.
    pub mix_fp8: bool,
}

impl Default for Nvfp4Params {
    fn default() -> Self {
        Self {
            act_scheme: "fp4".to_string(),
            w_scheme: "fp4".to_string(),
            non_uniform: false,
            mix_fp8: false,
        }
    }
}

/// GGUF (llama.cpp) parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GgufParams {
    /// Target quantization type, e.g. "Q4_K_M".
    pub quant_type: String,
    /// Intermediate conversion format: f16, f32, or q8_0.
    pub intermediate_format: String,
}

impl Default for GgufParams {
    fn default() -> Self {
        Self {
            quant_type: "Q4_K_M".to_string(),
            intermediate_format: "f16".to_string(),
        }
    }
}

/// Method-specific parameters, keyed by method.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum MethodParams {
    Awq(AwqParams),
    Nvfp4(Nvfp4Params),
    Gguf(GgufParams),
}

impl MethodParams {
    pub fn method(&self) -> QuantMethod {
        match self {
            MethodParams::Awq(_) => QuantMethod::Awq,
            MethodParams::Nvfp4(_) => QuantMethod::Nvfp4,
            MethodParams::Gguf(_) => QuantMethod::Gguf,
        }
    }
}

/// Calibration dataset reference (required for AWQ and NVFP4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationSpec {
    /// Dataset identifier, e.g. "open_platypus".
    pub dataset: String,
    /// Dataset config name, if the dataset has more than one.
    #[serde(default)]
    pub config: Option<String>,
    /// Split to sample from.
    #[serde(default)]
    pub split: Option<String>,
    /// Number of calibration samples.
    pub max_samples: u32,
    /// Maximum sequence length for calibration samples.
    pub max_seq_length: u32,
}

impl Default for CalibrationSpec {
    fn default() -> Self {
        Self {
            dataset: String::new(),
            config: None,
            split: None,
            max_samples: 256,
            max_seq_length: 2048,
        }
    }
}

/// Immutable description of one requested quantization run.
///
/// Created once when the user submits the form; owned by the job service for
/// the duration of the run and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Source model identifier, e.g. "meta-llama/Llama-3.2-1B".
    pub model_id: String,
    /// Method-specific parameters (the method tag lives here).
    #[serde(flatten)]
    pub params: MethodParams,
    /// Output container format.
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Calibration dataset, required for AWQ/NVFP4.
    #[serde(default)]
    pub calibration: Option<CalibrationSpec>,
    /// Output directory; derived from the model id when absent.
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
}

impl JobConfig {
    pub fn new(model_id: impl Into<String>, params: MethodParams) -> Self {
        Self {
            model_id: model_id.into(),
            params,
            output_format: OutputFormat::default(),
            calibration: None,
            out_dir: None,
        }
    }

    pub fn with_calibration(mut self, calibration: CalibrationSpec) -> Self {
        self.calibration = Some(calibration);
        self
    }

    pub fn with_out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
        self.out_dir = Some(out_dir.into());
        self
    }

    pub fn method(&self) -> QuantMethod {
        self.params.method()
    }

    /// Resolve the output directory for this run.
    ///
    /// Explicit `out_dir` wins; otherwise `{output_root}/{name}-{METHOD}` with
    /// a `-safetensors` suffix for that container format.
    pub fn output_dir(&self, output_root: &Path) -> PathBuf {
        if let Some(ref dir) = self.out_dir {
            return dir.clone();
        }
        let safe_name = self
            .model_id
            .rsplit('/')
            .next()
            .unwrap_or(&self.model_id)
            .replace(':', "-");
        let format_suffix = match self.output_format {
            OutputFormat::Safetensors => "-safetensors",
            OutputFormat::Binary => "",
        };
        output_root.join(format!(
            "{}-{}{}",
            safe_name,
            self.method().as_str().to_uppercase(),
            format_suffix
        ))
    }

    /// Output directory under the workspace default root.
    pub fn default_output_dir(&self) -> PathBuf {
        self.output_dir(Path::new(PathsConfig::OUTPUT_ROOT))
    }

    /// Validate the configuration before launching a run.
    pub fn validate(&self) -> Result<()> {
        if self.model_id.trim().is_empty() {
            return Err(QuantError::validation("model_id", "must not be empty"));
        }

        match &self.params {
            MethodParams::Awq(p) => {
                if ![2, 3, 4, 5, 8].contains(&p.w_bit) {
                    return Err(QuantError::validation(
                        "w_bit",
                        format!("invalid value {} (expected 2, 3, 4, 5, or 8)", p.w_bit),
                    ));
                }
                if p.group_size == 0 {
                    return Err(QuantError::validation("group_size", "must be positive"));
                }
            }
            MethodParams::Nvfp4(_) => {}
            MethodParams::Gguf(p) => {
                if !GGUF_QUANT_TYPES.contains(&p.quant_type.as_str()) {
                    return Err(QuantError::validation(
                        "quant_type",
                        format!(
                            "invalid value {} (expected one of: {})",
                            p.quant_type,
                            GGUF_QUANT_TYPES.join(", ")
                        ),
                    ));
                }
                if !["f16", "f32", "q8_0"].contains(&p.intermediate_format.as_str()) {
                    return Err(QuantError::validation(
                        "intermediate_format",
                        format!(
                            "invalid value {} (expected f16, f32, or q8_0)",
                            p.intermediate_format
                        ),
                    ));
                }
            }
        }

        if self.method().requires_calibration() {
            let calibration = self.calibration.as_ref().ok_or_else(|| {
                QuantError::validation(
                    "calibration",
                    format!("required for method {}", self.method()),
                )
            })?;
            if calibration.dataset.trim().is_empty() {
                return Err(QuantError::validation(
                    "calibration.dataset",
                    "must not be empty",
                ));
            }
            if calibration.max_samples == 0 {
                return Err(QuantError::validation(
                    "calibration.max_samples",
                    "must be positive",
                ));
            }
            if calibration.max_seq_length == 0 {
                return Err(QuantError::validation(
                    "calibration.max_seq_length",
                    "must be positive",
                ));
            }
        }

        Ok(())
    }

    /// Serialize this config to a JSON temp file the child reads at startup.
    ///
    /// The returned handle owns the file; keep it alive until the child has
    /// consumed it (the supervisor holds it for the run's lifetime).
    pub fn write_artifact(&self) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix(PathsConfig::CONFIG_FILE_PREFIX)
            .suffix(".json")
            .tempfile()
            .map_err(|e| QuantError::io("creating config file", std::env::temp_dir(), e))?;

        let json = serde_json::to_string(self)?;
        file.write_all(json.as_bytes())
            .map_err(|e| QuantError::io("writing config file", file.path(), e))?;
        file.flush()
            .map_err(|e| QuantError::io("flushing config file", file.path(), e))?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn awq_config() -> JobConfig {
        JobConfig::new("meta-llama/Llama-3.2-1B", MethodParams::Awq(AwqParams::default()))
            .with_calibration(CalibrationSpec {
                dataset: "open_platypus".into(),
                ..Default::default()
            })
    }

    #[test]
    fn test_awq_config_valid() {
        assert!(awq_config().validate().is_ok());
    }

    #[test]
    fn test_awq_rejects_bad_w_bit() {
        let mut config = awq_config();
        if let MethodParams::Awq(ref mut p) = config.params {
            p.w_bit = 7;
        }
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("w_bit"));
    }

    #[test]
    fn test_awq_requires_calibration() {
        let config = JobConfig::new("m", MethodParams::Awq(AwqParams::default()));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gguf_needs_no_calibration() {
        let config = JobConfig::new("m/model", MethodParams::Gguf(GgufParams::default()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_gguf_rejects_unknown_quant_type() {
        let config = JobConfig::new(
            "m/model",
            MethodParams::Gguf(GgufParams {
                quant_type: "Q9_Z".into(),
                ..Default::default()
            }),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_model_id_rejected() {
        let mut config = awq_config();
        config.model_id = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_output_dir_derivation() {
        let config = awq_config();
        let dir = config.output_dir(Path::new("/workspace/out"));
        assert_eq!(dir, PathBuf::from("/workspace/out/Llama-3.2-1B-AWQ"));
    }

    #[test]
    fn test_output_dir_explicit_wins() {
        let config = awq_config().with_out_dir("/custom/out");
        assert_eq!(
            config.output_dir(Path::new("/workspace/out")),
            PathBuf::from("/custom/out")
        );
    }

    #[test]
    fn test_output_dir_safetensors_suffix() {
        let mut config = JobConfig::new("org/model:v2", MethodParams::Gguf(GgufParams::default()));
        config.output_format = OutputFormat::Safetensors;
        let dir = config.output_dir(Path::new("/out"));
        assert_eq!(dir, PathBuf::from("/out/model-v2-GGUF-safetensors"));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = awq_config();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"method\":\"awq\""));
        let back: JobConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.model_id, config.model_id);
        assert_eq!(back.method(), QuantMethod::Awq);
    }

    #[test]
    fn test_write_artifact() {
        let config = awq_config();
        let file = config.write_artifact().unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        let back: JobConfig = serde_json::from_str(&content).unwrap();
        assert_eq!(back.model_id, config.model_id);
    }
}
