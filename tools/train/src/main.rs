//! Training CLI Tool
//!
//! Trains the plant disease classifier in two phases (head-only transfer
//! learning, then fine-tuning of the extractor tail) and writes the final
//! artifacts to the output directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::optim::AdamConfig;
use clap::Parser;
use colored::Colorize;
use plant_core::{
    backend_name, default_device, describe_accelerator, load_toml_config, setup_cli_logging, LabelSet, Phase,
    TrainingBackend, TrainingConfig,
};
use plant_dataset::DatasetPipeline;
use plant_training::{
    ArtifactLayout, BurnEngine, ClassifierModel, ModelBuilder, PlantClassifier, RunLog, TrainingOrchestrator,
    TrainingReport,
};
use tracing::info;

/// Plant Disease Classification Training Tool
#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train the plant disease classifier",
    long_about = "Train a MobileNetV2-based plant disease classifier on PlantVillage: \
                  transfer learning with a frozen extractor, then fine-tuning of its last layers."
)]
struct Args {
    /// Local PlantVillage directory (one sub-directory per class)
    #[arg(short, long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Transfer-learning epochs [default: 10]
    #[arg(short, long, value_name = "N")]
    epochs: Option<usize>,

    /// Fine-tuning epochs [default: 5]
    #[arg(long, value_name = "N")]
    fine_tune_epochs: Option<usize>,

    /// Where artifacts, checkpoints and logs are written [default: ./saved_model]
    #[arg(short, long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Training configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Remote .tar.gz archive used when no local directory is usable
    #[arg(long, value_name = "URL")]
    dataset_url: Option<String>,

    /// Override batch size
    #[arg(short, long, value_name = "SIZE")]
    batch_size: Option<usize>,

    /// Seed for the split and augmentation
    #[arg(long, value_name = "N")]
    seed: Option<u64>,

    /// Pretrained extractor weights (burn record)
    #[arg(long, value_name = "FILE")]
    pretrained: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    let config = resolve_config(&args)?;

    println!("{}", "Plant Disease Classifier - Training".green().bold());
    println!("  {}", describe_accelerator());
    println!("  Backend: {}", backend_name());
    println!("  Output: {}", config.output_dir.display());
    println!();

    let report = run_training(config)?;
    print_summary(&report);
    Ok(())
}

fn resolve_config(args: &Args) -> Result<TrainingConfig> {
    let mut config = match &args.config {
        Some(path) => load_toml_config::<TrainingConfig>(path).context("Failed to load configuration file")?,
        None => TrainingConfig::default(),
    };

    if let Some(dir) = &args.data_dir {
        config.data.data_dir = Some(dir.clone());
    }
    if let Some(url) = &args.dataset_url {
        config.data.remote_url = Some(url.clone());
    }
    if let Some(epochs) = args.epochs {
        config.transfer.epochs = epochs;
    }
    if let Some(epochs) = args.fine_tune_epochs {
        config.fine_tune.epochs = epochs;
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.data.batch_size = batch_size;
    }
    if let Some(seed) = args.seed {
        config.data.seed = seed;
    }
    if let Some(path) = &args.pretrained {
        config.model.pretrained_weights = Some(path.clone());
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;
    Ok(config)
}

fn run_training(config: TrainingConfig) -> Result<TrainingReport> {
    let device = default_device();
    let layout = ArtifactLayout::new(&config.output_dir);

    println!("{}", "Loading Dataset...".cyan());
    let data = DatasetPipeline::load(&config.data, LabelSet::plant_village()).context("Failed to load dataset")?;
    println!("  Training samples: {}", data.num_train());
    println!("  Validation samples: {}", data.num_validation());
    println!("  Batch size: {}", data.batch_size());

    println!("{}", "Building Model...".cyan());
    let builder = ModelBuilder::from_settings(&config.model, config.data.image_size, data.labels().len());
    let augment = config.data.augmentation.enabled;
    let (model, extractor) = builder.build::<TrainingBackend>(augment, &device)?;
    println!("{}", model.summary());

    layout.write_model_config(builder.config())?;
    let run_log = RunLog::create(&layout.logs_dir())?;
    run_log.write_config(&config)?;
    info!("Run log: {}", run_log.dir().display());

    let ClassifierModel { network, layers } = model;
    let engine = BurnEngine::new(network, device, || {
        AdamConfig::new()
            .with_epsilon(1e-7)
            .init::<TrainingBackend, PlantClassifier<TrainingBackend>>()
    });

    let mut orchestrator = TrainingOrchestrator::new(engine, config.clone(), layers, extractor, run_log);
    let report = orchestrator.run(&data)?;
    println!();
    println!("  Best checkpoint: {}", orchestrator.checkpoint_path().display());

    println!("{}", "Saving Model...".cyan());
    let (engine, layers) = orchestrator.into_parts();
    let trained = ClassifierModel {
        network: engine.into_model(),
        layers,
    };
    let inference = builder.rebuild_for_inference(&trained)?;
    for path in layout.persist_final(&inference, builder.config(), data.labels())? {
        println!("  {}", path.display());
    }

    Ok(report)
}

fn print_summary(report: &TrainingReport) {
    println!();
    println!("{}", "Training Complete".green().bold());
    for phase in [Phase::Transfer, Phase::FineTune] {
        if let Some(p) = report.phase(phase) {
            let best = p
                .best_val_accuracy
                .map(|a| format!("{:.2}%", a * 100.0))
                .unwrap_or_else(|| "n/a".to_string());
            let stop = if p.stopped_early { " (stopped early)" } else { "" };
            println!("  {}: {} epochs, best val accuracy {}{}", phase, p.history.len(), best, stop);
        }
    }
    println!("  Total epochs: {}", report.total_epochs());
    if let Some(best) = report.best_val_accuracy() {
        println!("  Best validation accuracy: {}", format!("{:.2}%", best * 100.0).green());
    }
    println!();
    println!("Next steps:");
    println!("  1. Export for the browser: cargo run --release -p export");
    println!("  2. Copy tfjs_model/ into the web app's public folder");
}
