//! Activity Sensing Engine
//!
//! Runs the two-thread engine over a recorded or synthetic accelerometer
//! stream and prints closed classification records as JSON lines.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use activity_sensing::classifier::{self, LabeledModel};
use activity_sensing::interfaces::{
    JsonFileConfigStore, JsonLinesSink, LogDiagnostics, Recording, ReplaySampler, Sampler,
    SyntheticSampler,
};
use activity_sensing::{Engine, EngineConfig, Pipeline};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint};
use log::info;

#[derive(Parser)]
#[command(author, version, about = "Accelerometer activity classification and MET estimation")]
struct Cli {
    /// Engine configuration (JSON); defaults are used when omitted
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Labeled model (JSON array of {features, label}); overrides the configured path
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    model: Option<PathBuf>,

    /// Calibration profile file, loaded on start and saved after calibration
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    profile: Option<PathBuf>,

    /// Calibrate from the first two stationary batches
    #[arg(long, global = true)]
    force_calibration: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay a recorded trace
    Replay(ReplayArgs),

    /// Generate a synthetic trace
    Synthetic(SyntheticArgs),

    /// Print the default configuration
    DefaultConfig,
}

#[derive(Args)]
struct ReplayArgs {
    /// Recording (JSON: {period_ms, start_ms, charging, samples: [[x, y, z], ...]})
    #[arg(value_hint = ValueHint::FilePath)]
    recording: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum Motion {
    Stationary,
    Walking,
    Running,
}

#[derive(Args)]
struct SyntheticArgs {
    #[arg(long, value_enum, default_value_t = Motion::Stationary)]
    motion: Motion,

    /// Number of batches to generate
    #[arg(long, default_value_t = 20)]
    batches: u64,

    /// Report the device as charging
    #[arg(long)]
    charging: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let sampler: Box<dyn Sampler> = match &cli.command {
        Command::DefaultConfig => {
            println!("{}", config.to_json()?);
            return Ok(());
        }
        Command::Replay(args) => {
            let recording = Recording::load(&args.recording)
                .with_context(|| format!("loading recording {}", args.recording.display()))?;
            info!("replaying {} samples", recording.samples.len());
            Box::new(ReplaySampler::new(recording))
        }
        Command::Synthetic(args) => {
            let period = config.batch.sample_period_ms;
            let gravity = [0.0, 0.0, 9.81];
            let mut sampler = match args.motion {
                Motion::Stationary => SyntheticSampler::stationary(gravity, period),
                Motion::Walking => SyntheticSampler::oscillating(gravity, 3.0, 2.0, period),
                Motion::Running => SyntheticSampler::oscillating(gravity, 8.0, 3.0, period),
            }
            .with_max_batches(args.batches);
            sampler.charging = args.charging;
            Box::new(sampler)
        }
    };

    let model_path = cli
        .model
        .clone()
        .or_else(|| config.pipeline.classifier.model_path.clone());
    let model = match model_path {
        Some(path) => {
            let json = fs::read_to_string(&path)
                .with_context(|| format!("reading model {}", path.display()))?;
            LabeledModel::from_json(&json)
                .with_context(|| format!("validating model {}", path.display()))?
        }
        None => classifier::default_model(),
    };

    let diagnostics = Arc::new(LogDiagnostics);
    let mut pipeline = Pipeline::new(
        config.pipeline.clone(),
        model,
        Box::new(JsonLinesSink::new(io::stdout())),
        diagnostics.clone(),
    )?;
    if let Some(path) = &cli.profile {
        pipeline = pipeline.with_store(Box::new(JsonFileConfigStore::new(path)))?;
    }
    if cli.force_calibration {
        pipeline.force_calibration();
    }

    let engine = Engine::start(&config.batch, pipeline, sampler, diagnostics)?;
    let summary = engine.wait().context("engine stopped with an error")?;

    info!(
        "processed {} batches, last label {}, calibration {:?}",
        summary.batches_processed, summary.last_label, summary.snapshot.state
    );
    Ok(())
}
