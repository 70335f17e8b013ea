//! Test doubles shared by the quantizer and pipeline tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::engine::{AutoRoundEngine, BackendSelection};
use crate::config::{AutoRoundConfig, ModelConfig};
use crate::model::{ModelHandle, Module, ModuleKind};
use crate::AutoRoundError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Convert(String),
    PostInit(BackendSelection),
}

/// Engine that rewrites linear layers and records every call
#[derive(Clone, Default)]
pub struct RecordingEngine {
    calls: Arc<Mutex<Vec<Call>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingEngine {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_conversion(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

impl AutoRoundEngine for RecordingEngine {
    fn convert_model(
        &self,
        mut model: ModelHandle,
        target_device: &str,
    ) -> crate::Result<(ModelHandle, BackendSelection)> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AutoRoundError::EngineError("no backend for device".to_string()));
        }
        self.calls
            .lock()
            .unwrap()
            .push(Call::Convert(target_device.to_string()));

        let config = model.config.quantization_config.clone().unwrap_or_default();
        for (name, module) in model.modules.iter_mut() {
            if module.kind == ModuleKind::Linear {
                module.kind = ModuleKind::QuantLinear {
                    bits: config.effective_bits(name),
                    group_size: config.effective_group_size(name),
                    sym: config.effective_sym(name),
                };
            }
        }

        let backend = if target_device == "cpu" {
            "ipex_gptq"
        } else {
            "auto_round:tritonv2"
        };
        Ok((model, BackendSelection::new(target_device, vec![backend.to_string()])))
    }

    fn post_init(&self, _model: &mut ModelHandle, selection: &BackendSelection) -> crate::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::PostInit(selection.clone()));
        Ok(())
    }
}

/// Small single-layer model skeleton for `architecture`
pub fn sample_model(architecture: &str) -> ModelHandle {
    let config = ModelConfig {
        architectures: vec![architecture.to_string()],
        num_hidden_layers: 1,
        quantization_config: Some(AutoRoundConfig::default()),
        ..Default::default()
    };

    let mut model = ModelHandle::new(config);
    model.insert_module("model.embed_tokens", Module::new(ModuleKind::Other));
    model.insert_module("model.layers.0.self_attn.q_proj", Module::new(ModuleKind::Linear));
    model.insert_module("model.layers.0.mlp.down_proj", Module::new(ModuleKind::Linear));
    model.insert_module("lm_head", Module::new(ModuleKind::Linear));
    model
}
