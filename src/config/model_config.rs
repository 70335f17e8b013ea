//! Checkpoint configuration loaded from `config.json`.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::quantization_config::AutoRoundConfig;

/// Model families the loader recognizes by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelArchitecture {
    Llama,
    Mistral,
    Qwen2,
    Opt,
    Whisper,
    Vision,
    Unknown(String),
}

impl ModelArchitecture {
    /// Detect architecture from config.json architectures field
    pub fn from_architectures(architectures: &[String]) -> Self {
        let Some(arch) = architectures.first() else {
            return ModelArchitecture::Unknown("empty".to_string());
        };

        if arch.contains("Qwen2") {
            ModelArchitecture::Qwen2
        } else if arch.contains("Whisper") || arch.contains("Speech") {
            ModelArchitecture::Whisper
        } else if arch.contains("ImageClassification")
            || arch.contains("Vision")
            || arch.starts_with("ViT")
        {
            ModelArchitecture::Vision
        } else if arch.contains("Mistral") || arch.contains("Mixtral") {
            ModelArchitecture::Mistral
        } else if arch.contains("Llama") {
            ModelArchitecture::Llama
        } else if arch.starts_with("OPT") {
            ModelArchitecture::Opt
        } else {
            ModelArchitecture::Unknown(arch.clone())
        }
    }

    /// Name of the primary forward input, the host's descriptor of input modality
    pub fn main_input_name(&self) -> &'static str {
        match self {
            ModelArchitecture::Whisper => "input_features",
            ModelArchitecture::Vision => "pixel_values",
            _ => "input_ids",
        }
    }
}

/// Base model configuration loaded from config.json
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model architecture type(s)
    #[serde(default)]
    pub architectures: Vec<String>,

    /// Model type tag (e.g. "qwen2", "opt")
    #[serde(default)]
    pub model_type: Option<String>,

    /// Hidden size (embedding dimension)
    #[serde(default)]
    pub hidden_size: usize,

    /// Number of transformer layers
    #[serde(default)]
    pub num_hidden_layers: usize,

    /// Vocabulary size
    #[serde(default)]
    pub vocab_size: usize,

    /// Torch dtype hint
    #[serde(default)]
    pub torch_dtype: Option<String>,

    /// Tie word embeddings
    #[serde(default)]
    pub tie_word_embeddings: bool,

    /// Quantization settings of an already-quantized checkpoint
    #[serde(default)]
    pub quantization_config: Option<AutoRoundConfig>,
}

impl ModelConfig {
    /// Load configuration from a config.json file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ModelConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Get the detected model architecture
    pub fn architecture(&self) -> ModelArchitecture {
        ModelArchitecture::from_architectures(&self.architectures)
    }

    /// Name of the model's primary input
    pub fn main_input_name(&self) -> &'static str {
        self.architecture().main_input_name()
    }

    /// Whether the checkpoint already carries quantized weights
    pub fn is_pre_quantized(&self) -> bool {
        self.quantization_config.is_some()
    }
}
