//! lowlight CLI - Brighten low-light photos with a self-calibrated illumination network.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lowlight::{image, Config, EnhanceConfig, OnnxModel, Pipeline};

/// Brighten low-light photos with a self-calibrated illumination network.
#[derive(Parser, Debug)]
#[command(name = "lowlight")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enhance one image.
    Enhance {
        /// Input image path.
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output image path.
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Output JPEG quality (1-100).
        #[arg(short, long, default_value = "95", value_name = "INT")]
        quality: u8,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Check that an exported ONNX model reproduces the native output.
    Verify {
        /// Input image path.
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Exported ONNX model.
        #[arg(long, value_name = "FILE")]
        onnx: PathBuf,

        /// Largest accepted per-channel difference in 8-bit steps.
        #[arg(short, long, default_value = "1", value_name = "INT")]
        tolerance: u8,

        /// Also save the native output here.
        #[arg(long, value_name = "FILE")]
        native_output: Option<PathBuf>,

        /// Also save the ONNX output here.
        #[arg(long, value_name = "FILE")]
        onnx_output: Option<PathBuf>,

        #[command(flatten)]
        model: ModelArgs,
    },
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Pretrained weights (safetensors).
    #[arg(short, long, default_value = lowlight::pipeline::DEFAULT_WEIGHTS, value_name = "FILE")]
    weights: PathBuf,

    /// Number of times the shared residual block is applied.
    #[arg(long, default_value = "1", value_name = "INT")]
    layers: usize,

    /// Feature channels inside the network.
    #[arg(long, default_value = "3", value_name = "INT")]
    channels: usize,
}

impl ModelArgs {
    fn config(&self) -> Config {
        Config {
            weights: self.weights.clone(),
            network: EnhanceConfig {
                layers: self.layers,
                channels: self.channels,
            },
            ..Config::default()
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("lowlight={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(err) = run(&cli.command) {
        tracing::error!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(command: &Command) -> Result<()> {
    match command {
        Command::Enhance {
            input,
            output,
            quality,
            model,
        } => {
            ensure_exists(input)?;

            let config = Config {
                output_quality: *quality,
                ..model.config()
            };
            let pipeline = Pipeline::new(config).context("Failed to initialize pipeline")?;

            pipeline
                .process(input, output)
                .context("Failed to process image")?;

            println!(
                "Successfully enhanced {} -> {}",
                input.display(),
                output.display()
            );
        }
        Command::Verify {
            input,
            onnx,
            tolerance,
            native_output,
            onnx_output,
            model,
        } => {
            ensure_exists(input)?;
            ensure_exists(onnx)?;

            let config = Config {
                tolerance: *tolerance,
                ..model.config()
            };
            let pipeline = Pipeline::new(config).context("Failed to initialize pipeline")?;
            let mut exported = OnnxModel::load(onnx).context("Failed to load exported model")?;

            let verification = pipeline
                .verify(input, &mut exported)
                .context("Failed to cross-check backends")?;

            if let Some(path) = native_output {
                image::save_image(&verification.native, path, pipeline.config().output_quality)
                    .context("Failed to save native output")?;
            }
            if let Some(path) = onnx_output {
                image::save_image(&verification.onnx, path, pipeline.config().output_quality)
                    .context("Failed to save ONNX output")?;
            }

            let report = verification.report;
            if !report.passed() {
                anyhow::bail!(
                    "Outputs differ by up to {} (tolerance {}) in {} of {} values",
                    report.max_abs_diff,
                    report.tolerance,
                    report.differing_values,
                    u64::from(report.width) * u64::from(report.height) * 3
                );
            }

            println!(
                "Outputs match for {}x{}: max difference {}",
                report.width, report.height, report.max_abs_diff
            );
        }
    }

    Ok(())
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Input file does not exist: {}", path.display());
    }
    Ok(())
}
