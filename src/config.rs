use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Maximum number of loaded sessions kept alive at once.
pub const SESSION_CACHE_CAPACITY: usize = 3;

/// Minimum time a status message stays visible before a failure may replace it (ms).
pub const STATUS_MIN_DISPLAY_MS: u64 = 500;

/// Token budget used when `init` does not carry one.
pub const DEFAULT_MAX_TOKENS: usize = 256;

/// Model loaded when the caller does not name one.
pub const DEFAULT_MODEL_ID: &str = "onnx-community/Qwen2.5-0.5B-Instruct";

pub const DEFAULT_TOP_K: u32 = 3;
pub const DEFAULT_REPETITION_PENALTY: f32 = 1.1;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Error message fragments that mean "this artifact does not exist for this format".
pub const MISSING_ARTIFACT_MARKERS: &[&str] = &["Could not locate file", "404", "file not found"];

/// Control strings some tokenizers leave in decoded output at end of sequence.
pub const END_OF_SEQUENCE_MARKERS: &[&str] =
    &["<|endoftext|>", "<|im_end|>", "<|end|>", "<|eot_id|>", "</s>"];

/// Alternate artifact base name tried when the default export is missing.
pub const ALTERNATE_MODEL_FILE_NAME: &str = "decoder_model_merged";

/// Execution backend requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Wasm,
    Webgpu,
    Cpu,
}

/// Numeric precision of the model weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Fp32,
    Fp16,
    Int8,
    Uint8,
    Q8,
    Q4,
    Q4f16,
    Bnb4,
}

impl Dtype {
    /// File-name suffix the engine appends to the artifact base name for this dtype.
    pub fn file_suffix(self) -> &'static str {
        match self {
            Dtype::Fp32 => ".onnx",
            Dtype::Fp16 => "_fp16.onnx",
            Dtype::Int8 => "_int8.onnx",
            Dtype::Uint8 => "_uint8.onnx",
            Dtype::Q8 => "_quantized.onnx",
            Dtype::Q4 => "_q4.onnx",
            Dtype::Q4f16 => "_q4f16.onnx",
            Dtype::Bnb4 => "_bnb4.onnx",
        }
    }
}

/// One entry of the acquisition fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    pub device: Device,
    pub dtype: Dtype,
    /// Alternate artifact base name; `None` means the engine's default ("model").
    #[serde(default)]
    pub model_file_name: Option<String>,
    /// Status text shown while the chain starts. Only the first candidate's label
    /// is displayed; later candidates are announced by the fixed alternate-format notice.
    pub label: String,
}

impl AcquisitionConfig {
    pub fn new(device: Device, dtype: Dtype, label: impl Into<String>) -> Self {
        Self {
            device,
            dtype,
            model_file_name: None,
            label: label.into(),
        }
    }

    pub fn with_model_file_name(mut self, name: impl Into<String>) -> Self {
        self.model_file_name = Some(name.into());
        self
    }

    /// File name of the primary weights artifact this candidate downloads.
    pub fn weights_file_name(&self) -> String {
        let base = self.model_file_name.as_deref().unwrap_or("model");
        format!("{}{}", base, self.dtype.file_suffix())
    }
}

/// The chain observed in production: default q8 export, then the merged decoder.
pub fn default_acquisition_chain() -> Vec<AcquisitionConfig> {
    vec![
        AcquisitionConfig::new(Device::Wasm, Dtype::Q8, "Downloading model files..."),
        AcquisitionConfig::new(Device::Wasm, Dtype::Q8, "Downloading model files...")
            .with_model_file_name(ALTERNATE_MODEL_FILE_NAME),
    ]
}

/// Sampling parameters passed through to the engine on every generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub max_new_tokens: usize,
    pub top_k: u32,
    pub repetition_penalty: f32,
    pub do_sample: bool,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_TOKENS,
            top_k: DEFAULT_TOP_K,
            repetition_penalty: DEFAULT_REPETITION_PENALTY,
            do_sample: true,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Top-level configuration for a session manager.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of sessions the LRU cache keeps alive.
    pub cache_capacity: usize,
    /// Debounce for status text before a failure notice replaces it, in milliseconds.
    pub status_min_display_ms: u64,
    /// Ordered fallback chain; must not be empty.
    pub acquisition_chain: Vec<AcquisitionConfig>,
    /// Overrides the per-candidate weights file matcher when set.
    pub weights_file_suffixes: Option<Vec<String>>,
    pub missing_artifact_markers: Vec<String>,
    pub end_of_sequence_markers: Vec<String>,
    pub generation: GenerationParams,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: SESSION_CACHE_CAPACITY,
            status_min_display_ms: STATUS_MIN_DISPLAY_MS,
            acquisition_chain: default_acquisition_chain(),
            weights_file_suffixes: None,
            missing_artifact_markers: MISSING_ARTIFACT_MARKERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            end_of_sequence_markers: END_OF_SEQUENCE_MARKERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            generation: GenerationParams::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON override document; missing fields fall back to defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(anyhow!("cache_capacity must be > 0"));
        }
        if self.acquisition_chain.is_empty() {
            return Err(anyhow!("acquisition_chain must contain at least one candidate"));
        }
        Ok(())
    }

    pub fn status_min_display(&self) -> Duration {
        Duration::from_millis(self.status_min_display_ms)
    }
}
