//! Configuration module for checkpoint and quantization settings.

mod model_config;
mod quantization_config;

pub use model_config::{ModelArchitecture, ModelConfig};
pub use quantization_config::{AutoRoundConfig, LayerOverride, QuantMethod};
