//! Quantizer hooks and the AutoRound adapter.
//!
//! A quantizer is selected by method name through the [`QuantizerRegistry`]
//! and driven by the loader through the [`Quantizer`] hooks:
//! - environment validation against the probed [`Capabilities`]
//! - compute dtype selection
//! - model conversion before weights are loaded
//! - backend finalization after weights are loaded

mod auto_round;
mod base;
mod capabilities;
mod engine;
mod registry;

#[cfg(test)]
pub(crate) mod testing;

pub use auto_round::{check_environment, select_dtype, AutoRoundQuantizer, MIN_AUTO_ROUND_VERSION};
pub use base::{LoadStage, Quantizer};
pub use capabilities::{
    Capabilities, PackageProbe, PackageVersion, PreRelease, PythonPackageProbe,
    AUTO_ROUND_PACKAGE, OPTIMUM_PACKAGE, PROBED_PACKAGES,
};
pub use engine::{infer_target_device, AutoRoundEngine, BackendSelection};
pub use registry::{QuantizerConstructor, QuantizerContext, QuantizerRegistry};
