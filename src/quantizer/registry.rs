//! Quantizer lookup by method name.

use std::collections::BTreeMap;

use super::auto_round::AutoRoundQuantizer;
use super::base::Quantizer;
use super::capabilities::Capabilities;
use super::engine::AutoRoundEngine;
use crate::config::AutoRoundConfig;

/// Everything a quantizer needs besides its configuration
pub struct QuantizerContext {
    /// Installed external packages, probed once at startup
    pub capabilities: Capabilities,
    /// Engine the hooks delegate to
    pub engine: Box<dyn AutoRoundEngine>,
    /// Whether the checkpoint already holds quantized weights
    pub pre_quantized: bool,
}

impl QuantizerContext {
    pub fn new(capabilities: Capabilities, engine: Box<dyn AutoRoundEngine>, pre_quantized: bool) -> Self {
        Self {
            capabilities,
            engine,
            pre_quantized,
        }
    }
}

/// Builds a quantizer from its configuration and context
pub type QuantizerConstructor =
    fn(AutoRoundConfig, QuantizerContext) -> crate::Result<Box<dyn Quantizer>>;

/// Maps quantization method identifiers to quantizer constructors.
pub struct QuantizerRegistry {
    constructors: BTreeMap<String, QuantizerConstructor>,
}

impl QuantizerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry with every built-in quantizer
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("auto-round", AutoRoundQuantizer::boxed);
        registry.register("autoround", AutoRoundQuantizer::boxed);
        registry
    }

    /// Register `constructor` under `name`, replacing any previous entry
    pub fn register(&mut self, name: &str, constructor: QuantizerConstructor) {
        let key = normalize(name);
        if self.constructors.insert(key.clone(), constructor).is_some() {
            tracing::debug!("Replaced quantizer registered as '{}'", key);
        }
    }

    /// Build the quantizer registered under `name`
    pub fn create(
        &self,
        name: &str,
        config: AutoRoundConfig,
        ctx: QuantizerContext,
    ) -> crate::Result<Box<dyn Quantizer>> {
        let constructor = self
            .constructors
            .get(&normalize(name))
            .ok_or_else(|| crate::AutoRoundError::UnknownMethod(name.to_string()))?;

        tracing::debug!("Creating quantizer for '{}'", name);
        constructor(config, ctx)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(&normalize(name))
    }

    /// Registered identifiers in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

impl Default for QuantizerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Lowercase, `_` to `-`, vendor prefix dropped (`intel/auto-round` → `auto-round`)
fn normalize(name: &str) -> String {
    let name = name.trim().to_lowercase().replace('_', "-");
    match name.rsplit_once('/') {
        Some((_, method)) => method.to_string(),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuantMethod;
    use crate::quantizer::testing::RecordingEngine;
    use crate::quantizer::LoadStage;
    use crate::AutoRoundError;

    fn ctx() -> QuantizerContext {
        QuantizerContext::new(
            Capabilities::from_versions([("auto_round", "0.5.1"), ("optimum", "1.23.3")]),
            Box::new(RecordingEngine::default()),
            true,
        )
    }

    #[test]
    fn test_defaults_registered() {
        let registry = QuantizerRegistry::with_defaults();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["auto-round", "autoround"]);
        assert!(registry.contains("AutoRound"));
        assert!(registry.contains("auto_round"));
        assert!(registry.contains("intel/auto-round"));
        assert!(!registry.contains("gptq"));
    }

    #[test]
    fn test_create_auto_round() {
        let registry = QuantizerRegistry::default();
        let quantizer = registry
            .create("intel/auto-round", AutoRoundConfig::default(), ctx())
            .unwrap();
        assert_eq!(quantizer.method(), QuantMethod::AutoRound);
        assert_eq!(quantizer.stage(), LoadStage::Unvalidated);
        assert!(quantizer.pre_quantized());
    }

    #[test]
    fn test_unknown_method() {
        let registry = QuantizerRegistry::with_defaults();
        let err = registry
            .create("gptq", AutoRoundConfig::default(), ctx())
            .err()
            .unwrap();
        assert!(matches!(err, AutoRoundError::UnknownMethod(ref name) if name == "gptq"));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = QuantizerRegistry::new();
        assert_eq!(registry.names().count(), 0);

        registry.register("My_Round", AutoRoundQuantizer::boxed);
        assert!(registry.contains("my-round"));
        assert!(registry.create("my-round", AutoRoundConfig::default(), ctx()).is_ok());
    }
}
