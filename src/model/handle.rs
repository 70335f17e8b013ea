//! In-memory model owned by the loader.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use candle_core::Tensor;
use safetensors::SafeTensors;

use super::loader::checkpoint_shards;
use crate::config::{ModelConfig, QuantMethod};

/// What a named module computes, as far as quantization is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// Dense projection, a candidate for conversion
    Linear,
    /// Projection rewritten by the engine for quantized inference
    QuantLinear { bits: u8, group_size: i32, sym: bool },
    /// Embeddings, norms and everything else left untouched
    Other,
}

/// A named module and the tensors materialized into it
#[derive(Debug, Clone)]
pub struct Module {
    pub kind: ModuleKind,
    /// Parameters keyed by their local name (`weight`, `qweight`, `scales`, ...)
    pub tensors: HashMap<String, Tensor>,
}

impl Module {
    pub fn new(kind: ModuleKind) -> Self {
        Self {
            kind,
            tensors: HashMap::new(),
        }
    }

    /// Whether any weights have been loaded into this module
    pub fn is_materialized(&self) -> bool {
        !self.tensors.is_empty()
    }

    pub fn tensor(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }
}

/// Model handed through the quantizer hooks.
///
/// The loader owns it for the whole load; hooks receive it by value and
/// return the handle to continue with.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    /// Checkpoint configuration
    pub config: ModelConfig,
    /// Primary forward input (`input_ids` for text models)
    pub main_input_name: String,
    /// Modules keyed by dotted path
    pub modules: BTreeMap<String, Module>,
    /// Set once a quantizer has claimed the model
    pub is_quantized: bool,
    pub quantization_method: Option<QuantMethod>,
}

impl ModelHandle {
    /// Create an empty model for `config`
    pub fn new(config: ModelConfig) -> Self {
        let main_input_name = config.main_input_name().to_string();
        Self {
            config,
            main_input_name,
            modules: BTreeMap::new(),
            is_quantized: false,
            quantization_method: None,
        }
    }

    /// Build the module skeleton of a checkpoint directory.
    ///
    /// Reads `config.json` and the safetensors headers; no weights are
    /// materialized.
    pub fn from_checkpoint(dir: impl AsRef<Path>) -> crate::Result<Self> {
        let dir = dir.as_ref();
        let config = ModelConfig::from_file(dir.join("config.json"))?;
        let mut model = Self::new(config);

        let mut params: BTreeMap<String, Vec<(String, usize)>> = BTreeMap::new();
        for shard in checkpoint_shards(dir)? {
            let file = std::fs::File::open(&shard)?;
            let mmap = unsafe { memmap2::Mmap::map(&file)? };
            let safetensors = SafeTensors::deserialize(&mmap)
                .map_err(|e| crate::AutoRoundError::LoadError(format!("{:?}: {}", shard, e)))?;

            for (name, view) in safetensors.tensors() {
                let (module, param) = split_tensor_name(&name);
                params
                    .entry(module.to_string())
                    .or_default()
                    .push((param.to_string(), view.shape().len()));
            }
        }

        for (name, module_params) in params {
            let kind = classify(&name, &module_params);
            model.modules.insert(name, Module::new(kind));
        }

        tracing::debug!(
            "Built skeleton with {} modules ({} linear)",
            model.modules.len(),
            model.linear_modules().count()
        );

        Ok(model)
    }

    pub fn insert_module(&mut self, name: impl Into<String>, module: Module) {
        self.modules.insert(name.into(), module);
    }

    pub fn module(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    /// Write the model as a checkpoint directory.
    ///
    /// Produces `config.json`, including the quantization settings, and a single
    /// `model.safetensors` shard with every loaded tensor, so the directory can
    /// be loaded again with [`LoadPipeline::load_checkpoint`](super::LoadPipeline::load_checkpoint).
    pub fn save(&self, dir: impl AsRef<Path>) -> crate::Result<()> {
        let dir = dir.as_ref();
        if let Some((name, _)) = self.modules.iter().find(|(_, m)| !m.is_materialized()) {
            return Err(crate::AutoRoundError::NotSupported(format!(
                "saving a model before its weights are loaded ({} is empty)",
                name
            )));
        }

        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join("config.json"), serde_json::to_string_pretty(&self.config)?)?;

        let tensors: HashMap<String, Tensor> = self
            .modules
            .iter()
            .flat_map(|(module, m)| {
                m.tensors
                    .iter()
                    .map(move |(param, tensor)| (join_tensor_name(module, param), tensor.clone()))
            })
            .collect();
        candle_core::safetensors::save(&tensors, dir.join("model.safetensors"))?;

        tracing::info!("Saved {} tensors to {:?}", tensors.len(), dir);
        Ok(())
    }

    /// Names of plain and quantized projection modules
    pub fn linear_modules(&self) -> impl Iterator<Item = &str> {
        self.modules
            .iter()
            .filter(|(_, m)| matches!(m.kind, ModuleKind::Linear | ModuleKind::QuantLinear { .. }))
            .map(|(name, _)| name.as_str())
    }

    /// Whether every module has received its weights
    pub fn is_materialized(&self) -> bool {
        self.modules.values().all(Module::is_materialized)
    }
}

/// Split `a.b.c.weight` into module `a.b.c` and parameter `weight`
pub fn split_tensor_name(name: &str) -> (&str, &str) {
    name.rsplit_once('.').unwrap_or(("", name))
}

fn join_tensor_name(module: &str, param: &str) -> String {
    if module.is_empty() {
        param.to_string()
    } else {
        format!("{}.{}", module, param)
    }
}

fn classify(module: &str, params: &[(String, usize)]) -> ModuleKind {
    if params.iter().any(|(p, _)| p == "qweight") {
        return ModuleKind::Linear;
    }

    let leaf = module.rsplit('.').next().unwrap_or(module);
    let is_embedding = leaf.contains("embed") || matches!(leaf, "wte" | "wpe");
    let has_matrix = params.iter().any(|(p, rank)| p == "weight" && *rank == 2);

    if has_matrix && !is_embedding {
        ModuleKind::Linear
    } else {
        ModuleKind::Other
    }
}
