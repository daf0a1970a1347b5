//! Export CLI Tool
//!
//! Converts a trained classifier into a browser-loadable bundle
//! (`model.json`, weight shards, `labels.json`, `metadata.json`).

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use plant_core::setup_cli_logging;
use plant_export::{ExportPipeline, ExternalConverter, ModelConverter, ShardConverter, DEFAULT_INPUT_FORMAT};
use tracing::info;

/// Plant Disease Classification Export Tool
#[derive(Parser, Debug)]
#[command(name = "export", about = "Export a trained model to a browser-loadable bundle")]
struct Args {
    /// Trained model artifact (.mpk or .json)
    #[arg(short, long, value_name = "FILE", default_value = "./saved_model/plant_disease_model.mpk")]
    model: PathBuf,

    /// Output directory of the bundle
    #[arg(short, long, value_name = "DIR", default_value = "./tfjs_model")]
    output: PathBuf,

    /// Quantize weights to uint8 (about 4x smaller)
    #[arg(short, long)]
    quantize: bool,

    /// Use an external converter program instead of the built-in one.
    /// It is called with `--input_format=<FORMAT>` and must be able to read
    /// the model artifact as given.
    #[arg(long, value_name = "PROGRAM")]
    converter: Option<String>,

    /// Input format passed to the external converter
    #[arg(long, value_name = "FORMAT", default_value = DEFAULT_INPUT_FORMAT, requires = "converter")]
    input_format: String,

    /// Command run once when the external converter is missing
    #[arg(long, value_name = "CMD", requires = "converter")]
    install_command: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn external_converter(args: &Args) -> Option<ExternalConverter> {
    let program = args.converter.as_ref()?;
    let mut external = ExternalConverter::new(program.clone()).with_input_format(args.input_format.clone());
    if args.install_command.is_some() {
        external = external.with_install_command(args.install_command.clone());
    }
    Some(external)
}

fn converter_for(args: &Args) -> Box<dyn ModelConverter> {
    match external_converter(args) {
        Some(external) => Box::new(external),
        None => Box::new(ShardConverter::default()),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_cli_logging(args.verbose)?;

    println!("{}", "Plant Disease Classifier - Export".green().bold());
    println!("  Model: {}", args.model.display());
    println!("  Output: {}", args.output.display());
    println!("  Quantize: {}", if args.quantize { "uint8" } else { "no" });

    let pipeline = ExportPipeline::new(converter_for(&args));
    info!("Converter: {}", pipeline.converter_name());

    let bundle = pipeline.export(&args.model, &args.output, args.quantize)?;

    println!();
    println!("{}", "Export Complete".green().bold());
    println!("  Files in {}:", bundle.dir.display());
    println!("{}", bundle.listing());
    println!();
    println!("Next steps:");
    println!("  1. Copy {} into the web app's public folder", bundle.dir.display());
    println!("  2. Load it with tf.loadLayersModel('/tfjs_model/model.json')");
    println!("  3. Read class names from labels.json and input shape from metadata.json");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["export"]);
        assert_eq!(args.model, PathBuf::from("./saved_model/plant_disease_model.mpk"));
        assert_eq!(args.output, PathBuf::from("./tfjs_model"));
        assert!(!args.quantize);
        assert_eq!(converter_for(&args).name(), "native shards");
    }

    #[test]
    fn test_external_converter_selected() {
        let args = Args::parse_from(["export", "--converter", "tensorflowjs_converter", "--quantize"]);
        assert_eq!(converter_for(&args).name(), "tensorflowjs_converter");
        assert!(args.quantize);
    }

    #[test]
    fn test_input_format_reaches_converter() {
        let args = Args::parse_from(["export", "--converter", "wrapper", "--input-format", "burn_mpk"]);
        assert_eq!(external_converter(&args).unwrap().input_format(), "burn_mpk");

        let args = Args::parse_from(["export", "--converter", "wrapper"]);
        assert_eq!(external_converter(&args).unwrap().input_format(), "keras");
        assert!(Args::try_parse_from(["export", "--input-format", "keras"]).is_err());
    }

    #[test]
    fn test_install_command_requires_converter() {
        assert!(Args::try_parse_from(["export", "--install-command", "true"]).is_err());
    }
}
