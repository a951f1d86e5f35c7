//! Image Classifier CLI
//!
//! Running the binary without arguments trains on `./train-images` and
//! writes `./model.tflite`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use image_classifier::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use image_classifier::dataset::prepare_images;
use image_classifier::utils::logging::{init_logging, LogConfig};
use image_classifier::utils::{format_bytes, format_duration};
use image_classifier::{run_pipeline, PipelineConfig, PipelineReport, Predictor};

/// Train an image classifier and export a quantized mobile model
#[derive(Parser, Debug)]
#[command(name = "image_classifier")]
#[command(version)]
#[command(about = "Train an image classifier and export a quantized model", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, default_value = "false")]
    quiet: bool,

    /// TOML file overriding the default configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute (defaults to `train`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train on the image folder, evaluate and export the model
    Train,

    /// Resize a raw image tree into the training layout
    Prepare {
        /// Directory of raw images, one sub-directory per class
        #[arg(short, long, default_value = "input")]
        input: PathBuf,

        /// Output directory for the resized images
        #[arg(short, long, default_value = "train-images")]
        output: PathBuf,

        /// Side length of the resized images
        #[arg(short, long, default_value = "224")]
        size: u32,
    },

    /// Classify an image with an exported model
    Predict {
        /// Path to the exported model
        #[arg(short, long, default_value = "model.tflite")]
        model: PathBuf,

        /// Image to classify
        image: PathBuf,

        /// Number of classes to list
        #[arg(short = 'k', long, default_value = "3")]
        top: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&LogConfig::from_flags(cli.verbose, cli.quiet)).map_err(anyhow::Error::msg)?;

    match cli.command.unwrap_or(Commands::Train) {
        Commands::Train => train(cli.config),
        Commands::Prepare {
            input,
            output,
            size,
        } => {
            let stats = prepare_images(&input, &output, size)
                .with_context(|| format!("Failed to prepare images from {:?}", input))?;
            println!(
                "{} {} images written to {:?} ({} skipped)",
                "Done:".green().bold(),
                stats.written,
                output,
                stats.skipped
            );
            Ok(())
        }
        Commands::Predict { model, image, top } => predict(&model, &image, top),
    }
}

fn train(config_path: Option<PathBuf>) -> Result<()> {
    let config = match &config_path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load configuration {:?}", path))?,
        None => PipelineConfig::default(),
    };

    println!("{}", "Training image classifier...".green().bold());
    println!("  Backend: {}", backend_name());
    println!("  Images:  {:?}", config.data.images_dir);
    println!();

    let device = default_device();
    let report = run_pipeline::<TrainingBackend>(&config, &device).context("Training run failed")?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &PipelineReport) {
    println!();
    println!("{}", "Training Complete!".green().bold());
    println!("  Classes:        {}", report.class_names.join(", "));
    println!(
        "  Samples:        {} train / {} test",
        report.train_samples, report.test_samples
    );
    if let Some(last) = report.training.last() {
        println!(
            "  Final epoch:    loss {:.4}, accuracy {:.2}%",
            last.loss,
            last.accuracy * 100.0
        );
    }
    println!(
        "  Test:           loss {:.4}, accuracy {}",
        report.evaluation.loss,
        format!("{:.2}%", report.evaluation.accuracy * 100.0).cyan().bold()
    );
    println!(
        "  Model:          {:?} ({}, {:.1}x smaller than f32)",
        report.export.path,
        format_bytes(report.export.bytes),
        report.export.compression_ratio()
    );
    println!("  Duration:       {}", format_duration(report.elapsed_secs));
    println!();
    print!("{}", report.evaluation.confusion.display(&report.class_names));
}

fn predict(model: &Path, image: &Path, top: usize) -> Result<()> {
    let device = default_device();
    let predictor = Predictor::<DefaultBackend>::load(model, &device)
        .with_context(|| format!("Failed to load model {:?}", model))?;
    let prediction = predictor
        .predict_path(image)
        .with_context(|| format!("Failed to classify {:?}", image))?;

    println!(
        "{} {} ({:.2}%)",
        "Prediction:".green().bold(),
        prediction.class_name.bold(),
        prediction.confidence * 100.0
    );
    for (label, probability) in prediction.top_k(top) {
        let name = predictor
            .class_names()
            .get(label)
            .map(String::as_str)
            .unwrap_or("?");
        println!("  {:<20} {:.2}%", name, probability * 100.0);
    }
    println!("  Inference time: {:.1} ms", prediction.inference_time_ms);

    Ok(())
}
