//! Hook contract every quantizer implements.

use candle_core::DType;

use crate::config::{AutoRoundConfig, QuantMethod};
use crate::model::ModelHandle;
use crate::utils::DeviceMap;

/// Progress of a single model load through the quantizer hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadStage {
    Unvalidated,
    Validated,
    BeforeHookRun,
    AfterHookRun,
}

/// Lifecycle hooks the loader calls, in order, while loading a model.
///
/// 1. [`validate_environment`](Quantizer::validate_environment)
/// 2. [`update_dtype`](Quantizer::update_dtype)
/// 3. [`preprocess_model`](Quantizer::preprocess_model), before weights are materialized
/// 4. [`postprocess_model`](Quantizer::postprocess_model), after weights are materialized
///
/// Hooks take the model by value and return the handle the loader must adopt.
pub trait Quantizer: Send {
    /// Method this quantizer handles
    fn method(&self) -> QuantMethod;

    /// Configuration the quantizer was created with
    fn config(&self) -> &AutoRoundConfig;

    /// Whether the checkpoint already holds quantized weights
    fn pre_quantized(&self) -> bool;

    /// Current lifecycle stage
    fn stage(&self) -> LoadStage;

    /// Whether quantizing needs calibration data
    fn requires_calibration(&self) -> bool {
        false
    }

    /// External packages checked by [`validate_environment`](Quantizer::validate_environment)
    fn required_packages(&self) -> &'static [&'static str] {
        &[]
    }

    /// Confirm external prerequisites and record the device map
    fn validate_environment(&mut self, device_map: Option<&DeviceMap>) -> crate::Result<()>;

    /// Pick the compute precision from the caller's request
    fn update_dtype(&self, requested: Option<DType>) -> DType {
        requested.unwrap_or(DType::F16)
    }

    fn process_model_before_weight_loading(&mut self, model: ModelHandle) -> crate::Result<ModelHandle>;

    fn process_model_after_weight_loading(&mut self, model: ModelHandle) -> crate::Result<ModelHandle>;

    /// Whether the quantized model supports training
    fn is_trainable(&self, model: Option<&ModelHandle>) -> bool;

    /// Whether the quantized model can be saved and reloaded
    fn is_serializable(&self, safe_serialization: Option<bool>) -> bool;

    /// Mark the model as quantized, then run the before-loading hook.
    ///
    /// The quantizer's configuration replaces the checkpoint's own before the
    /// hook runs, so conversion sees the settings the model is labelled with.
    fn preprocess_model(&mut self, mut model: ModelHandle) -> crate::Result<ModelHandle> {
        model.is_quantized = true;
        model.quantization_method = Some(self.method());
        model.config.quantization_config = Some(self.config().clone());
        self.process_model_before_weight_loading(model)
    }

    /// Run the after-loading hook, then attach the quantization config to the model
    fn postprocess_model(&mut self, model: ModelHandle) -> crate::Result<ModelHandle> {
        let mut model = self.process_model_after_weight_loading(model)?;
        model.config.quantization_config = Some(self.config().clone());
        Ok(model)
    }
}
