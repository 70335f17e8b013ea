//! AutoRound CLI - environment checks and checkpoint inspection
//!
//! Reports whether the AutoRound engine can be used on this machine and how a
//! quantized checkpoint would be loaded.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use rs_autoround::{
    config::ModelArchitecture,
    quantizer::{
        check_environment, infer_target_device, select_dtype, Capabilities, PythonPackageProbe,
        PROBED_PACKAGES,
    },
    utils::{device_for_target, parse_dtype},
    DeviceMap, ModelHandle,
};

#[derive(Parser)]
#[command(name = "autoround")]
#[command(author, version, about = "AutoRound quantization adapter", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the AutoRound engine and its dependencies are installed
    Check {
        /// Python interpreter whose packages are probed
        #[arg(long, env = "AUTOROUND_PYTHON", default_value = "python3")]
        python: String,

        /// Device map, e.g. "auto", "cuda" or '{"": "cuda:0"}'
        #[arg(long)]
        device_map: Option<String>,
    },

    /// Show the quantization layout of a checkpoint
    Inspect {
        /// Checkpoint directory with config.json and safetensors shards
        #[arg(short, long)]
        model: PathBuf,

        /// Only list modules whose settings differ from the global ones
        #[arg(long)]
        overrides_only: bool,
    },

    /// Show the compute dtype the adapter would use
    Dtype {
        /// Requested dtype (f16, bf16, f32, f64)
        #[arg(long)]
        dtype: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rs_autoround=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { python, device_map } => {
            check(&python, device_map.as_deref())?;
        }

        Commands::Inspect {
            model,
            overrides_only,
        } => {
            inspect(&model, overrides_only)?;
        }

        Commands::Dtype { dtype } => {
            let requested = dtype.as_deref().map(parse_dtype).transpose()?;
            println!("{:?}", select_dtype(requested));
        }
    }

    Ok(())
}

fn check(python: &str, device_map: Option<&str>) -> anyhow::Result<()> {
    let probe = PythonPackageProbe::new(python);
    let capabilities = Capabilities::detect(&probe, &PROBED_PACKAGES);

    println!("Interpreter: {}", probe.interpreter());
    for (package, version) in capabilities.iter() {
        match version {
            Some(version) => println!("  {:<12} {}", package, version),
            None => println!("  {:<12} not installed", package),
        }
    }

    let device_map = device_map.map(DeviceMap::parse).transpose()?;
    let target = infer_target_device(device_map.as_ref());
    println!("Target device: {}", target);
    println!("Host device: {:?}", device_for_target(&target)?);

    let version = check_environment(&capabilities)?;
    println!("AutoRound {} is ready", version);
    Ok(())
}

fn inspect(model_path: &Path, overrides_only: bool) -> anyhow::Result<()> {
    let model = ModelHandle::from_checkpoint(model_path)?;
    let config = &model.config;

    println!("Checkpoint Information");
    println!("======================");
    println!("Architecture: {:?}", config.architecture());
    println!("Main input: {}", model.main_input_name);
    if let ModelArchitecture::Whisper | ModelArchitecture::Vision = config.architecture() {
        println!("Note: AutoRound support for non-text models is limited");
    }
    println!("Layers: {}", config.num_hidden_layers);
    println!("Modules: {} ({} linear)", model.modules.len(), model.linear_modules().count());

    let Some(quant) = &config.quantization_config else {
        println!("\nNot quantized: AutoRound can only load pre-quantized checkpoints");
        return Ok(());
    };

    println!("\nQuantization");
    println!("============");
    println!("Method: {}", quant.quant_method);
    println!("Bits: {}", quant.bits);
    println!("Group size: {}", quant.group_size);
    println!("Symmetric: {}", quant.sym);
    println!("Backend: {}", quant.backend);
    println!("Packing format: {}", quant.packing_format);
    println!("Layer overrides: {}", quant.layer_config.len());
    if let Err(e) = quant.validate() {
        println!("Invalid configuration: {}", e);
    }

    println!();
    for name in model.linear_modules() {
        let bits = quant.effective_bits(name);
        let group_size = quant.effective_group_size(name);
        let sym = quant.effective_sym(name);

        let is_override = bits != quant.bits || group_size != quant.group_size || sym != quant.sym;
        if overrides_only && !is_override {
            continue;
        }

        println!(
            "{:<60} {}-bit  group {:<5} {}",
            name,
            bits,
            group_size,
            if sym { "sym" } else { "asym" }
        );
    }

    Ok(())
}
