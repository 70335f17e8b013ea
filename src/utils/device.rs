//! Device placement and data type utilities.

use std::collections::BTreeMap;
use std::fmt;

use candle_core::{DType as CandleDType, Device as CandleDevice};

/// Re-export candle Device for convenience
pub type Device = CandleDevice;

/// Re-export candle DType for convenience
pub type DType = CandleDType;

/// How model parts are assigned to compute devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceMap {
    /// Let the engine pick (`"auto"`, `"balanced"`, `"sequential"`)
    Auto,
    /// Whole model on one device, e.g. `"cuda"` or `"cpu"`
    Single(String),
    /// Module prefix to device; `""` is the root module
    Explicit(BTreeMap<String, String>),
}

impl DeviceMap {
    /// Parse a device map as given on a command line or in a config file.
    ///
    /// Accepts a strategy name, a single device, or a JSON object such as
    /// `{"": "cuda:0"}`.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let s = s.trim();
        if s.starts_with('{') {
            let map: BTreeMap<String, String> = serde_json::from_str(s)?;
            if map.is_empty() {
                return Err(crate::AutoRoundError::ConfigError(
                    "device map must not be empty".to_string(),
                ));
            }
            return Ok(DeviceMap::Explicit(map));
        }

        match s.to_lowercase().as_str() {
            "auto" | "balanced" | "balanced_low_0" | "sequential" => Ok(DeviceMap::Auto),
            "" => Err(crate::AutoRoundError::ConfigError(
                "device map must not be empty".to_string(),
            )),
            _ => Ok(DeviceMap::Single(s.to_string())),
        }
    }

    /// Build an explicit map from `(module prefix, device)` pairs
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        DeviceMap::Explicit(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Distinct devices named by the map, in first-seen order
    pub fn devices(&self) -> Vec<&str> {
        match self {
            DeviceMap::Auto => Vec::new(),
            DeviceMap::Single(device) => vec![device.as_str()],
            DeviceMap::Explicit(map) => {
                let mut devices: Vec<&str> = Vec::new();
                for device in map.values() {
                    if !devices.contains(&device.as_str()) {
                        devices.push(device);
                    }
                }
                devices
            }
        }
    }
}

impl fmt::Display for DeviceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMap::Auto => f.write_str("auto"),
            DeviceMap::Single(device) => f.write_str(device),
            DeviceMap::Explicit(map) => {
                let json = serde_json::to_string(map).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

/// Get the best available device (CUDA > Metal > CPU)
pub fn get_device(device_id: Option<usize>) -> crate::Result<Device> {
    #[cfg(feature = "cuda")]
    {
        let id = device_id.unwrap_or(0);
        match CandleDevice::new_cuda(id) {
            Ok(device) => {
                tracing::info!("Using CUDA device {}", id);
                return Ok(device);
            }
            Err(e) => {
                tracing::warn!("CUDA not available: {}", e);
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        match CandleDevice::new_metal(device_id.unwrap_or(0)) {
            Ok(device) => {
                tracing::info!("Using Metal device");
                return Ok(device);
            }
            Err(e) => {
                tracing::warn!("Metal not available: {}", e);
            }
        }
    }

    let _ = device_id;
    tracing::info!("Using CPU device");
    Ok(CandleDevice::Cpu)
}

/// Device weights are placed on for a conversion target such as `cpu` or `cuda`.
///
/// Accelerator targets go through [`get_device`], which falls back to the CPU
/// when no accelerator backend is compiled in.
pub fn device_for_target(target: &str) -> crate::Result<Device> {
    match target {
        "cpu" | "disk" | "meta" => Ok(CandleDevice::Cpu),
        _ => get_device(None),
    }
}

/// Parse dtype string to candle DType
pub fn parse_dtype(dtype_str: &str) -> crate::Result<CandleDType> {
    match dtype_str.to_lowercase().as_str() {
        "f64" | "float64" | "double" => Ok(CandleDType::F64),
        "f32" | "float32" | "float" => Ok(CandleDType::F32),
        "f16" | "float16" | "half" => Ok(CandleDType::F16),
        "bf16" | "bfloat16" => Ok(CandleDType::BF16),
        _ => Err(crate::AutoRoundError::ConfigError(format!(
            "unknown dtype '{}' (expected f64, f32, f16 or bf16)",
            dtype_str
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_map() {
        assert_eq!(DeviceMap::parse("auto").unwrap(), DeviceMap::Auto);
        assert_eq!(
            DeviceMap::parse("cuda").unwrap(),
            DeviceMap::Single("cuda".to_string())
        );
        assert_eq!(
            DeviceMap::parse(r#"{"": "cuda"}"#).unwrap(),
            DeviceMap::from_pairs([("", "cuda")])
        );
        assert!(DeviceMap::parse("").is_err());
        assert!(DeviceMap::parse("{}").is_err());
    }

    #[test]
    fn test_devices_deduplicated() {
        let map = DeviceMap::from_pairs([
            ("model.embed_tokens", "cuda:0"),
            ("model.layers.0", "cuda:0"),
            ("model.layers.1", "cuda:1"),
        ]);
        assert_eq!(map.devices(), vec!["cuda:0", "cuda:1"]);
        assert!(DeviceMap::Auto.devices().is_empty());
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        let map = DeviceMap::from_pairs([("", "cpu")]);
        assert_eq!(DeviceMap::parse(&map.to_string()).unwrap(), map);
    }

    #[test]
    fn test_parse_dtype() {
        assert_eq!(parse_dtype("half").unwrap(), CandleDType::F16);
        assert_eq!(parse_dtype("bfloat16").unwrap(), CandleDType::BF16);
        assert_eq!(parse_dtype("float32").unwrap(), CandleDType::F32);
        assert_eq!(parse_dtype("F64").unwrap(), CandleDType::F64);
        assert!(parse_dtype("int3").is_err());
    }

    #[test]
    fn test_device_for_target() {
        assert!(matches!(device_for_target("cpu").unwrap(), Device::Cpu));
        if !cfg!(any(feature = "cuda", feature = "metal")) {
            assert!(matches!(device_for_target("cuda").unwrap(), Device::Cpu));
            assert!(matches!(get_device(None).unwrap(), Device::Cpu));
        }
    }
}
