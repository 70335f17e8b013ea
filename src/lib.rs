//! # rs-autoround
//!
//! AutoRound quantization adapter for model loading pipelines.
//!
//! The host loader owns the model; the external AutoRound engine owns the
//! quantization kernels. This crate sits between the two:
//!
//! - **Environment checks**: the AutoRound and optimum packages must be
//!   installed, AutoRound at version 0.5.0 or newer
//! - **Precision policy**: half precision unless the caller asks otherwise
//! - **Lifecycle hooks**: before weight loading the model is converted to
//!   quantized-inference layers, after weight loading the engine finalizes
//!   the backends it selected
//!
//! ## Example
//!
//! ```ignore
//! use rs_autoround::{Capabilities, DeviceMap, LoadPipeline, QuantizerRegistry};
//!
//! // `engine` is the binding to the AutoRound runtime (an `AutoRoundEngine`)
//! let (model, dtype) = LoadPipeline::new()
//!     .device_map(DeviceMap::parse(r#"{"": "cuda"}"#)?)
//!     .load_checkpoint(
//!         "models/Qwen2.5-1.5B-Instruct-int4-sym-inc",
//!         &QuantizerRegistry::with_defaults(),
//!         Capabilities::global().clone(),
//!         Box::new(engine),
//!     )?;
//! ```

pub mod config;
pub mod model;
pub mod quantizer;
pub mod utils;

// Re-exports for convenience
pub use config::{AutoRoundConfig, LayerOverride, ModelConfig, QuantMethod};
pub use model::{LoadPipeline, ModelHandle, Module, ModuleKind};
pub use quantizer::{
    AutoRoundEngine, AutoRoundQuantizer, BackendSelection, Capabilities, LoadStage,
    PackageVersion, Quantizer, QuantizerContext, QuantizerRegistry,
};
pub use utils::{DType, Device, DeviceMap};

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum AutoRoundError {
    #[error("{package} is required but not installed: `{remedy}`")]
    MissingDependency { package: String, remedy: String },

    #[error("{package} {found} is older than the supported minimum {minimum}: `{remedy}`")]
    UnsupportedVersion {
        package: String,
        found: String,
        minimum: String,
        remedy: String,
    },

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Unknown quantization method: {0}")]
    UnknownMethod(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Engine error: {0}")]
    EngineError(String),

    #[error("Weight loading failed: {0}")]
    LoadError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Candle error: {0}")]
    CandleError(#[from] candle_core::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AutoRoundError>;
