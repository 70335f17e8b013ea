//! Weight materialization from safetensors shards.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use safetensors::SafeTensors;

use super::handle::{split_tensor_name, Module, ModelHandle, ModuleKind};

/// List the `.safetensors` shards of a checkpoint directory in name order
pub fn checkpoint_shards(dir: impl AsRef<Path>) -> crate::Result<Vec<PathBuf>> {
    let dir = dir.as_ref();

    let mut shards: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "safetensors"))
        .collect();

    if shards.is_empty() {
        return Err(crate::AutoRoundError::LoadError(format!(
            "No safetensors files in {:?}",
            dir
        )));
    }

    shards.sort();
    Ok(shards)
}

/// Materialize every tensor of `shards` into the matching module of `model`.
///
/// Float tensors are converted to `dtype`; packed integer tensors keep their
/// storage type. Tensors whose module is not in the skeleton get a new
/// [`ModuleKind::Other`] module. Returns the number of tensors loaded.
pub fn load_safetensors(
    model: &mut ModelHandle,
    shards: &[PathBuf],
    device: &Device,
    dtype: DType,
) -> crate::Result<usize> {
    let pb = (shards.len() > 1).then(|| {
        let pb = ProgressBar::new(shards.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb
    });

    let mut loaded = 0;
    for shard in shards {
        if let Some(pb) = &pb {
            pb.set_message(shard.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default());
        }

        loaded += load_shard(model, shard, device, dtype)?;

        if let Some(pb) = &pb {
            pb.inc(1);
        }
    }

    if let Some(pb) = pb {
        pb.finish_with_message("Weights loaded");
    }

    tracing::info!("Loaded {} tensors from {} shard(s)", loaded, shards.len());
    Ok(loaded)
}

fn load_shard(model: &mut ModelHandle, path: &Path, device: &Device, dtype: DType) -> crate::Result<usize> {
    tracing::debug!("Loading shard: {:?}", path);

    // Memory-map the file
    let file = std::fs::File::open(path)?;
    let mmap = unsafe { memmap2::Mmap::map(&file)? };

    let safetensors = SafeTensors::deserialize(&mmap)
        .map_err(|e| crate::AutoRoundError::LoadError(format!("{:?}: {}", path, e)))?;

    let mut count = 0;
    for (name, view) in safetensors.tensors() {
        let tensor = load_tensor(&name, &view, device, dtype)?;
        let (module, param) = split_tensor_name(&name);

        model
            .modules
            .entry(module.to_string())
            .or_insert_with(|| Module::new(ModuleKind::Other))
            .tensors
            .insert(param.to_string(), tensor);
        count += 1;
    }

    Ok(count)
}

fn load_tensor(
    name: &str,
    view: &safetensors::tensor::TensorView<'_>,
    device: &Device,
    dtype: DType,
) -> crate::Result<Tensor> {
    let source = convert_safetensor_dtype(view.dtype()).ok_or_else(|| {
        crate::AutoRoundError::LoadError(format!(
            "Tensor {} has unsupported dtype {:?}",
            name,
            view.dtype()
        ))
    })?;

    let tensor = Tensor::from_raw_buffer(view.data(), source, view.shape(), &Device::Cpu)?;

    let tensor = if source.is_float() {
        tensor.to_dtype(dtype)?
    } else {
        tensor
    };

    Ok(tensor.to_device(device)?)
}

/// Storage dtype for a safetensors dtype.
///
/// `I32` is reinterpreted as `U32`: packed quantized weights are bit
/// containers and candle has no 32-bit signed type.
fn convert_safetensor_dtype(dtype: safetensors::Dtype) -> Option<DType> {
    match dtype {
        safetensors::Dtype::F16 => Some(DType::F16),
        safetensors::Dtype::BF16 => Some(DType::BF16),
        safetensors::Dtype::F32 => Some(DType::F32),
        safetensors::Dtype::F64 => Some(DType::F64),
        safetensors::Dtype::I64 => Some(DType::I64),
        safetensors::Dtype::I32 => Some(DType::U32),
        safetensors::Dtype::U32 => Some(DType::U32),
        safetensors::Dtype::U8 => Some(DType::U8),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::config::ModelConfig;

    fn write_shard(path: &Path, tensors: Vec<(&str, Tensor)>) {
        let tensors: HashMap<String, Tensor> = tensors
            .into_iter()
            .map(|(name, t)| (name.to_string(), t))
            .collect();
        candle_core::safetensors::save(&tensors, path).unwrap();
    }

    #[test]
    fn test_dtype_conversion() {
        assert_eq!(convert_safetensor_dtype(safetensors::Dtype::F16), Some(DType::F16));
        assert_eq!(convert_safetensor_dtype(safetensors::Dtype::BF16), Some(DType::BF16));
        assert_eq!(convert_safetensor_dtype(safetensors::Dtype::I32), Some(DType::U32));
        assert_eq!(convert_safetensor_dtype(safetensors::Dtype::BOOL), None);
    }

    #[test]
    fn test_checkpoint_shards_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["model-00002-of-00002.safetensors", "model-00001-of-00002.safetensors"] {
            write_shard(
                &dir.path().join(name),
                vec![("x", Tensor::zeros(2, DType::F32, &Device::Cpu).unwrap())],
            );
        }
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();

        let shards = checkpoint_shards(dir.path()).unwrap();
        assert_eq!(shards.len(), 2);
        assert!(shards[0].ends_with("model-00001-of-00002.safetensors"));
    }

    #[test]
    fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(checkpoint_shards(dir.path()).is_err());
    }

    #[test]
    fn test_load_converts_floats_and_keeps_packed_ints() {
        let dir = tempfile::tempdir().unwrap();
        let shard = dir.path().join("model.safetensors");
        write_shard(
            &shard,
            vec![
                (
                    "model.layers.0.mlp.up_proj.qweight",
                    Tensor::zeros((4, 8), DType::U32, &Device::Cpu).unwrap(),
                ),
                (
                    "model.layers.0.mlp.up_proj.scales",
                    Tensor::ones((1, 8), DType::F32, &Device::Cpu).unwrap(),
                ),
                ("model.norm.weight", Tensor::ones(8, DType::F32, &Device::Cpu).unwrap()),
            ],
        );

        let mut model = ModelHandle::new(ModelConfig::default());
        model.insert_module("model.layers.0.mlp.up_proj", Module::new(ModuleKind::Linear));

        let loaded = load_safetensors(&mut model, &[shard], &Device::Cpu, DType::F16).unwrap();
        assert_eq!(loaded, 3);

        let up = model.module("model.layers.0.mlp.up_proj").unwrap();
        assert_eq!(up.kind, ModuleKind::Linear);
        assert_eq!(up.tensor("qweight").unwrap().dtype(), DType::U32);
        assert_eq!(up.tensor("scales").unwrap().dtype(), DType::F16);

        let norm = model.module("model.norm").unwrap();
        assert_eq!(norm.kind, ModuleKind::Other);
        assert_eq!(norm.tensor("weight").unwrap().dims(), &[8]);
        assert!(model.is_materialized());
    }
}
