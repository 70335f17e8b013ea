//! AutoRound quantization settings.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Bit widths the AutoRound engine can pack
const SUPPORTED_BITS: [u8; 4] = [2, 3, 4, 8];

/// Quantization method recorded in a checkpoint's `quant_method`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QuantMethod {
    /// Native AutoRound checkpoint
    #[default]
    #[serde(
        rename = "auto-round",
        alias = "intel/auto-round",
        alias = "autoround",
        alias = "auto_round"
    )]
    AutoRound,
    /// GPTQ checkpoint loaded through AutoRound kernels
    #[serde(rename = "gptq")]
    Gptq,
    /// AWQ checkpoint loaded through AutoRound kernels
    #[serde(rename = "awq")]
    Awq,
    /// Any other method, kept verbatim for the registry lookup
    #[serde(untagged)]
    Other(String),
}

impl QuantMethod {
    /// Identifier used by the quantizer registry
    pub fn as_str(&self) -> &str {
        match self {
            QuantMethod::AutoRound => "auto-round",
            QuantMethod::Gptq => "gptq",
            QuantMethod::Awq => "awq",
            QuantMethod::Other(name) => name,
        }
    }
}

impl fmt::Display for QuantMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-layer override of the global settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LayerOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bits: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_size: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sym: Option<bool>,
}

/// AutoRound quantization configuration.
///
/// Owned by the caller. The quantizer only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoRoundConfig {
    /// Weight bit width
    #[serde(default = "default_bits")]
    pub bits: u8,

    /// Elements sharing one scale; -1 means one group per output channel
    #[serde(default = "default_group_size")]
    pub group_size: i32,

    /// Symmetric (true) or asymmetric (false) rounding
    #[serde(default = "default_sym")]
    pub sym: bool,

    /// Per-layer overrides keyed by module name
    #[serde(default, alias = "extra_config")]
    pub layer_config: BTreeMap<String, LayerOverride>,

    /// Requested inference backend ("auto" lets the engine choose)
    #[serde(default = "default_backend")]
    pub backend: String,

    /// On-disk packing layout of the quantized weights
    #[serde(default = "default_packing_format")]
    pub packing_format: String,

    #[serde(default)]
    pub quant_method: QuantMethod,
}

fn default_bits() -> u8 {
    4
}

fn default_group_size() -> i32 {
    128
}

fn default_sym() -> bool {
    true
}

fn default_backend() -> String {
    "auto".to_string()
}

fn default_packing_format() -> String {
    "auto_round:gptq".to_string()
}

impl Default for AutoRoundConfig {
    fn default() -> Self {
        Self {
            bits: default_bits(),
            group_size: default_group_size(),
            sym: default_sym(),
            layer_config: BTreeMap::new(),
            backend: default_backend(),
            packing_format: default_packing_format(),
            quant_method: QuantMethod::default(),
        }
    }
}

impl AutoRoundConfig {
    /// Create a config with the given bit width and defaults elsewhere
    pub fn with_bits(bits: u8) -> Self {
        Self {
            bits,
            ..Default::default()
        }
    }

    /// Add a per-layer override
    pub fn with_layer(mut self, name: impl Into<String>, layer: LayerOverride) -> Self {
        self.layer_config.insert(name.into(), layer);
        self
    }

    /// Check bit widths and group sizes, globally and for every override
    pub fn validate(&self) -> crate::Result<()> {
        check_bits(self.bits, "bits")?;
        check_group_size(self.group_size, "group_size")?;

        for (name, layer) in &self.layer_config {
            if let Some(bits) = layer.bits {
                check_bits(bits, name)?;
            }
            if let Some(group_size) = layer.group_size {
                check_group_size(group_size, name)?;
            }
        }

        Ok(())
    }

    /// Bit width applied to `layer`
    pub fn effective_bits(&self, layer: &str) -> u8 {
        self.layer_config
            .get(layer)
            .and_then(|l| l.bits)
            .unwrap_or(self.bits)
    }

    /// Group size applied to `layer`
    pub fn effective_group_size(&self, layer: &str) -> i32 {
        self.layer_config
            .get(layer)
            .and_then(|l| l.group_size)
            .unwrap_or(self.group_size)
    }

    /// Symmetry applied to `layer`
    pub fn effective_sym(&self, layer: &str) -> bool {
        self.layer_config
            .get(layer)
            .and_then(|l| l.sym)
            .unwrap_or(self.sym)
    }
}

fn check_bits(bits: u8, field: &str) -> crate::Result<()> {
    if SUPPORTED_BITS.contains(&bits) {
        Ok(())
    } else {
        Err(crate::AutoRoundError::ConfigError(format!(
            "{}: unsupported bit width {} (expected one of {:?})",
            field, bits, SUPPORTED_BITS
        )))
    }
}

fn check_group_size(group_size: i32, field: &str) -> crate::Result<()> {
    if group_size == -1 || group_size > 0 {
        Ok(())
    } else {
        Err(crate::AutoRoundError::ConfigError(format!(
            "{}: group size must be -1 or positive, got {}",
            field, group_size
        )))
    }
}
