//! AutoRound quantizer (https://arxiv.org/abs/2309.05516).
//!
//! Attaches inference support to checkpoints that AutoRound has already
//! quantized. Layer conversion and kernel setup are delegated to the
//! [`AutoRoundEngine`]; this type checks the environment, picks the compute
//! precision and sequences the engine calls around weight loading.

use candle_core::DType;

use super::base::{LoadStage, Quantizer};
use super::capabilities::{Capabilities, PackageVersion, AUTO_ROUND_PACKAGE, OPTIMUM_PACKAGE};
use super::engine::{AutoRoundEngine, BackendSelection};
use super::registry::QuantizerContext;
use crate::config::{AutoRoundConfig, QuantMethod};
use crate::model::ModelHandle;
use crate::utils::DeviceMap;
use crate::AutoRoundError;

/// Oldest AutoRound release with the conversion API used here
pub const MIN_AUTO_ROUND_VERSION: PackageVersion = PackageVersion::new(0, 5, 0);

const REQUIRED_PACKAGES: [&str; 2] = [OPTIMUM_PACKAGE, AUTO_ROUND_PACKAGE];

/// Check that AutoRound (0.5.0 or newer) and optimum are installed.
///
/// AutoRound is checked first; when it is missing no version comparison is
/// attempted. Returns the installed AutoRound version.
pub fn check_environment(capabilities: &Capabilities) -> crate::Result<PackageVersion> {
    let Some(version) = capabilities.version(AUTO_ROUND_PACKAGE) else {
        return Err(AutoRoundError::MissingDependency {
            package: "auto-round".to_string(),
            remedy: "pip install 'auto-round>=0.5'".to_string(),
        });
    };

    if *version < MIN_AUTO_ROUND_VERSION {
        return Err(AutoRoundError::UnsupportedVersion {
            package: "auto-round".to_string(),
            found: version.to_string(),
            minimum: MIN_AUTO_ROUND_VERSION.to_string(),
            remedy: "pip install --upgrade auto-round".to_string(),
        });
    }

    if !capabilities.is_available(OPTIMUM_PACKAGE) {
        return Err(AutoRoundError::MissingDependency {
            package: "optimum".to_string(),
            remedy: "pip install optimum".to_string(),
        });
    }

    Ok(version.clone())
}

/// Compute precision for AutoRound kernels: F16 unless the caller asks otherwise
pub fn select_dtype(requested: Option<DType>) -> DType {
    match requested {
        None => {
            tracing::info!("Loading the model in F16. Pass a dtype explicitly to override it.");
            DType::F16
        }
        Some(dtype) => {
            if dtype != DType::F16 {
                tracing::info!(
                    "Requested {:?}; F16 gives the best efficiency with AutoRound kernels",
                    dtype
                );
            }
            dtype
        }
    }
}

/// Quantizer backed by the AutoRound engine
pub struct AutoRoundQuantizer {
    config: AutoRoundConfig,
    capabilities: Capabilities,
    engine: Box<dyn AutoRoundEngine>,
    pre_quantized: bool,
    device_map: Option<DeviceMap>,
    used_backends: Option<BackendSelection>,
    stage: LoadStage,
}

impl AutoRoundQuantizer {
    /// Create a quantizer; fails if `config` holds unsupported values
    pub fn new(config: AutoRoundConfig, ctx: QuantizerContext) -> crate::Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            capabilities: ctx.capabilities,
            engine: ctx.engine,
            pre_quantized: ctx.pre_quantized,
            device_map: None,
            used_backends: None,
            stage: LoadStage::Unvalidated,
        })
    }

    /// Registry constructor
    pub fn boxed(config: AutoRoundConfig, ctx: QuantizerContext) -> crate::Result<Box<dyn Quantizer>> {
        Ok(Box::new(Self::new(config, ctx)?))
    }

    /// Device map recorded by the last environment check
    pub fn device_map(&self) -> Option<&DeviceMap> {
        self.device_map.as_ref()
    }

    /// Backends the engine selected in the before-loading hook
    pub fn used_backends(&self) -> Option<&BackendSelection> {
        self.used_backends.as_ref()
    }
}

impl Quantizer for AutoRoundQuantizer {
    fn method(&self) -> QuantMethod {
        QuantMethod::AutoRound
    }

    fn config(&self) -> &AutoRoundConfig {
        &self.config
    }

    fn pre_quantized(&self) -> bool {
        self.pre_quantized
    }

    fn stage(&self) -> LoadStage {
        self.stage
    }

    fn required_packages(&self) -> &'static [&'static str] {
        &REQUIRED_PACKAGES
    }

    fn validate_environment(&mut self, device_map: Option<&DeviceMap>) -> crate::Result<()> {
        self.device_map = device_map.cloned();

        let version = check_environment(&self.capabilities)?;
        tracing::debug!("AutoRound {} available", version);
        self.stage = LoadStage::Validated;
        Ok(())
    }

    fn update_dtype(&self, requested: Option<DType>) -> DType {
        select_dtype(requested)
    }

    fn process_model_before_weight_loading(&mut self, model: ModelHandle) -> crate::Result<ModelHandle> {
        assert!(
            self.stage == LoadStage::Validated,
            "before-loading hook called in stage {:?}; validate_environment must succeed first",
            self.stage
        );

        if model.main_input_name != "input_ids" {
            tracing::warn!(
                "Limited support for models that are not purely text-based (main input: {})",
                model.main_input_name
            );
        }

        let model = if self.pre_quantized {
            let target_device = self.engine.infer_target_device(self.device_map.as_ref())?;
            tracing::info!("Converting model for AutoRound inference on {}", target_device);

            let (model, selection) = self.engine.convert_model(model, &target_device)?;
            tracing::debug!("AutoRound selected backends {:?}", selection.backends);
            self.used_backends = Some(selection);
            model
        } else {
            model
        };

        self.stage = LoadStage::BeforeHookRun;
        Ok(model)
    }

    fn process_model_after_weight_loading(&mut self, mut model: ModelHandle) -> crate::Result<ModelHandle> {
        if !self.pre_quantized {
            return Err(AutoRoundError::NotSupported(
                "quantizing weights while loading; AutoRound can only load checkpoints that are already quantized"
                    .to_string(),
            ));
        }

        let selection = match (self.stage, self.used_backends.as_ref()) {
            (LoadStage::BeforeHookRun, Some(selection)) => selection,
            (stage, _) => panic!(
                "after-loading hook called in stage {:?} without a backend selection; \
                 the before-loading hook must run first",
                stage
            ),
        };

        self.engine.post_init(&mut model, selection)?;
        self.stage = LoadStage::AfterHookRun;
        Ok(model)
    }

    // TODO: derive this from the converted layers once backends report gradient support.
    fn is_trainable(&self, _model: Option<&ModelHandle>) -> bool {
        true
    }

    fn is_serializable(&self, _safe_serialization: Option<bool>) -> bool {
        true
    }
}
