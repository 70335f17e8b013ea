//! Interface of the external AutoRound engine.

use serde::{Deserialize, Serialize};

use crate::model::ModelHandle;
use crate::utils::DeviceMap;

/// Compute backends the engine chose while converting a model.
///
/// Produced by [`AutoRoundEngine::convert_model`] and handed back unchanged to
/// [`AutoRoundEngine::post_init`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSelection {
    /// Device type the conversion targeted ("cuda", "cpu", "xpu", ...)
    pub target_device: String,
    /// Backend identifiers, e.g. "auto_round:tritonv2" or "ipex_gptq"
    pub backends: Vec<String>,
}

impl BackendSelection {
    pub fn new(target_device: impl Into<String>, backends: Vec<String>) -> Self {
        Self {
            target_device: target_device.into(),
            backends,
        }
    }
}

/// Entry points of the AutoRound inference engine.
///
/// Layer conversion, packing and kernel selection all happen behind this
/// trait; the quantizer only sequences the calls.
pub trait AutoRoundEngine: Send {
    /// Map a device map to the device type conversion should target
    fn infer_target_device(&self, device_map: Option<&DeviceMap>) -> crate::Result<String> {
        Ok(infer_target_device(device_map))
    }

    /// Replace the model's layers with quantized-inference equivalents for `target_device`
    fn convert_model(
        &self,
        model: ModelHandle,
        target_device: &str,
    ) -> crate::Result<(ModelHandle, BackendSelection)>;

    /// Finalize backend buffers once real weights are in place
    fn post_init(&self, model: &mut ModelHandle, selection: &BackendSelection) -> crate::Result<()>;
}

/// Default target-device rule.
///
/// The first device that is not `cpu`, `disk` or `meta` wins, reduced to its
/// type (`cuda:1` becomes `cuda`). Bare ordinals and `auto` resolve to the
/// first available accelerator. No map means `cpu`.
pub fn infer_target_device(device_map: Option<&DeviceMap>) -> String {
    let devices = match device_map {
        None => return "cpu".to_string(),
        Some(DeviceMap::Auto) => return available_accelerator().to_string(),
        Some(map) => map.devices(),
    };

    devices
        .into_iter()
        .find(|d| !matches!(*d, "cpu" | "disk" | "meta"))
        .map(|d| {
            if d.chars().all(|c| c.is_ascii_digit()) {
                available_accelerator().to_string()
            } else {
                d.split(':').next().unwrap_or(d).to_string()
            }
        })
        .unwrap_or_else(|| "cpu".to_string())
}

fn available_accelerator() -> &'static str {
    if candle_core::utils::cuda_is_available() {
        "cuda"
    } else if candle_core::utils::metal_is_available() {
        "mps"
    } else {
        "cpu"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopEngine;

    impl AutoRoundEngine for NoopEngine {
        fn convert_model(
            &self,
            model: ModelHandle,
            target_device: &str,
        ) -> crate::Result<(ModelHandle, BackendSelection)> {
            Ok((model, BackendSelection::new(target_device, Vec::new())))
        }

        fn post_init(&self, _model: &mut ModelHandle, _selection: &BackendSelection) -> crate::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_infer_target_device() {
        let engine = NoopEngine;
        assert_eq!(engine.infer_target_device(None).unwrap(), "cpu");

        let map = DeviceMap::from_pairs([("", "cuda")]);
        assert_eq!(engine.infer_target_device(Some(&map)).unwrap(), "cuda");

        let map = DeviceMap::from_pairs([("model.embed_tokens", "cpu"), ("model.layers", "cuda:1")]);
        assert_eq!(engine.infer_target_device(Some(&map)).unwrap(), "cuda");

        let map = DeviceMap::from_pairs([("a", "cpu"), ("b", "disk")]);
        assert_eq!(engine.infer_target_device(Some(&map)).unwrap(), "cpu");

        let map = DeviceMap::Single("xpu:0".to_string());
        assert_eq!(engine.infer_target_device(Some(&map)).unwrap(), "xpu");
    }
}
