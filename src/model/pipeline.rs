//! Quantized model loading: drives a quantizer's hooks around weight loading.

use std::path::Path;

use candle_core::{DType, Device};

use super::handle::ModelHandle;
use super::loader::{checkpoint_shards, load_safetensors};
use crate::config::AutoRoundConfig;
use crate::quantizer::{
    infer_target_device, AutoRoundEngine, Capabilities, Quantizer, QuantizerContext, QuantizerRegistry,
};
use crate::utils::{device_for_target, DeviceMap};

/// Runs one model load through a quantizer:
/// validate → pick dtype → preprocess → load weights → postprocess.
///
/// Every error is returned to the caller as-is; nothing is retried.
pub struct LoadPipeline {
    device_map: Option<DeviceMap>,
    dtype: Option<DType>,
    device: Option<Device>,
    quantization_config: Option<AutoRoundConfig>,
}

impl LoadPipeline {
    /// Create a pipeline; weights follow the device map unless a device is set
    pub fn new() -> Self {
        Self {
            device_map: None,
            dtype: None,
            device: None,
            quantization_config: None,
        }
    }

    /// Set the device map handed to the quantizer
    pub fn device_map(mut self, device_map: DeviceMap) -> Self {
        self.device_map = Some(device_map);
        self
    }

    /// Request a compute dtype
    pub fn dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    /// Materialize weights on `device` whatever the device map says
    pub fn device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Device weights are materialized on.
    ///
    /// An explicit [`device`](Self::device) wins; otherwise the device map's
    /// target device decides, and no map means the CPU.
    pub fn weight_device(&self) -> crate::Result<Device> {
        match &self.device {
            Some(device) => Ok(device.clone()),
            None => device_for_target(&infer_target_device(self.device_map.as_ref())),
        }
    }

    /// Use this configuration instead of the checkpoint's own
    pub fn quantization_config(mut self, config: AutoRoundConfig) -> Self {
        self.quantization_config = Some(config);
        self
    }

    /// Run the hooks of `quantizer` around `load_weights`.
    ///
    /// Returns the model the quantizer handed back and the chosen dtype.
    pub fn run<F>(
        &self,
        quantizer: &mut dyn Quantizer,
        model: ModelHandle,
        load_weights: F,
    ) -> crate::Result<(ModelHandle, DType)>
    where
        F: FnOnce(&mut ModelHandle, DType) -> crate::Result<()>,
    {
        quantizer.validate_environment(self.device_map.as_ref())?;
        let dtype = quantizer.update_dtype(self.dtype);

        let mut model = quantizer.preprocess_model(model)?;
        load_weights(&mut model, dtype)?;
        let model = quantizer.postprocess_model(model)?;

        tracing::info!(
            "Loaded {} model ({} linear modules) as {:?}",
            quantizer.method(),
            model.linear_modules().count(),
            dtype
        );

        Ok((model, dtype))
    }

    /// Load a checkpoint directory through the quantizer its configuration names.
    ///
    /// The checkpoint counts as pre-quantized when its `config.json` carries a
    /// `quantization_config`. A configuration set with
    /// [`quantization_config`](Self::quantization_config) takes precedence and
    /// selects AutoRound even for GPTQ or AWQ checkpoints.
    pub fn load_checkpoint(
        &self,
        dir: impl AsRef<Path>,
        registry: &QuantizerRegistry,
        capabilities: Capabilities,
        engine: Box<dyn AutoRoundEngine>,
    ) -> crate::Result<(ModelHandle, DType)> {
        let dir = dir.as_ref();
        let model = ModelHandle::from_checkpoint(dir)?;
        let pre_quantized = model.config.is_pre_quantized();

        let config = self
            .quantization_config
            .clone()
            .or_else(|| model.config.quantization_config.clone())
            .ok_or_else(|| {
                crate::AutoRoundError::ConfigError(format!(
                    "{:?} is not quantized and no quantization config was given",
                    dir
                ))
            })?;

        let method = config.quant_method.to_string();
        let ctx = QuantizerContext::new(capabilities, engine, pre_quantized);
        let mut quantizer = registry.create(&method, config, ctx)?;

        let shards = checkpoint_shards(dir)?;
        let device = self.weight_device()?;
        tracing::debug!("Materializing weights on {:?}", device);
        self.run(quantizer.as_mut(), model, |model, dtype| {
            load_safetensors(model, &shards, &device, dtype).map(|_| ())
        })
    }
}

impl Default for LoadPipeline {
    fn default() -> Self {
        Self::new()
    }
}
