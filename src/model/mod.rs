//! Model handle, weight loading and the quantized load pipeline.

mod handle;
mod loader;
mod pipeline;

pub use handle::{split_tensor_name, ModelHandle, Module, ModuleKind};
pub use loader::{checkpoint_shards, load_safetensors};
pub use pipeline::LoadPipeline;
