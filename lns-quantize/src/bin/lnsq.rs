//! CLI for inspecting LNS activation quantization settings.

use candle_core::{Device, Tensor};
use clap::{Parser, Subcommand};
use lns_quantize::{clamp_range, lns_quantize, select_tiers, LnsConfig, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lnsq")]
#[command(about = "Adaptive logarithmic activation quantization toolkit")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file
    Init {
        /// Output path for config file
        #[arg(default_value = "lns.yaml")]
        output: String,
        /// Preset (lns8, lns16)
        #[arg(long, default_value = "lns8")]
        preset: String,
    },
    /// Print the derived clamp range and precision tiers
    Show {
        /// Path to configuration file
        #[arg(long)]
        config: Option<String>,
        /// Preset used when no config file is given
        #[arg(long, default_value = "lns8")]
        preset: String,
    },
    /// Quantize a row of values as one activation tensor
    Quantize {
        /// Path to configuration file
        #[arg(long)]
        config: Option<String>,
        /// Preset used when no config file is given
        #[arg(long, default_value = "lns8")]
        preset: String,
        /// Values to quantize
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<f64>,
    },
}

fn load(config: Option<&str>, preset: &str) -> Result<LnsConfig> {
    let config = match config {
        Some(path) => LnsConfig::from_file(path)?,
        None => LnsConfig::from_preset(preset)?,
    };
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { output, preset } => {
            tracing::info!("Writing {} config to {}", preset, output);
            let config = LnsConfig::from_preset(&preset)?;
            config.to_file(&output)?;
            println!("✓ Configuration written to: {output}");
        }
        Commands::Show { config, preset } => {
            let config = load(config.as_deref(), &preset)?;
            let params = config.params()?;

            println!("mantissa bits: {}", config.mantissa_bits);
            println!(
                "clamp range:   [{:e}, {:e}]",
                params.threshold_down, params.threshold_up
            );
            for spec in params.tiers() {
                let boundary = spec
                    .boundary
                    .map_or_else(|| "-".to_string(), |d| format!("max - {d}"));
                println!(
                    "tier {:<8} frac_bits={:<3} scale={:<8} above={}",
                    spec.tier, spec.frac_bits, spec.scale, boundary
                );
            }
            println!("excluded name marker: {}", config.excluded_name_marker);
        }
        Commands::Quantize {
            config,
            preset,
            values,
        } => {
            let params = load(config.as_deref(), &preset)?.params()?;
            let count = values.len();
            let input = Tensor::from_vec(values.clone(), (1, count), &Device::Cpu)?;

            let assignment = select_tiers(&clamp_range(&input, &params)?, &params)?;
            let output: Vec<f64> = lns_quantize(&input, &params)?
                .flatten_all()?
                .to_vec1()?;

            println!("{:>16} {:>16}  tier", "input", "output");
            for ((x, q), tier) in values.iter().zip(&output).zip(&assignment.tiers) {
                let tier = tier.map_or("zero", |t| t.name());
                println!("{x:>16} {q:>16}  {tier}");
            }

            let counts = assignment.counts();
            tracing::info!(
                low = counts.low,
                high = counts.high,
                highest = counts.highest,
                zero = counts.zero,
                "tier histogram"
            );
        }
    }

    Ok(())
}
