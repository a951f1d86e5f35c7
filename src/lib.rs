//! # Image Classifier
//!
//! Trains an image classifier on a folder of labeled images and exports it
//! as a compact 8-bit quantized model for mobile deployment, using the Burn
//! framework.
//!
//! ## Modules
//!
//! - `paths`: Default locations relative to the working directory
//! - `dataset`: Image discovery, train/test split, decoding and batching
//! - `model`: EfficientNet-Lite backbone and classification head
//! - `training`: Training loop and evaluation
//! - `export`: Quantization and the model file format
//! - `inference`: Classifying images with an exported model
//! - `pipeline`: The end-to-end run
//! - `utils`: Logging, errors, metrics, and helper functions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use image_classifier::backend::{default_device, TrainingBackend};
//! use image_classifier::{run_pipeline, PipelineConfig};
//!
//! let report = run_pipeline::<TrainingBackend>(&PipelineConfig::default(), &default_device())?;
//! println!("accuracy: {:.2}", report.evaluation.accuracy);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod export;
pub mod inference;
pub mod model;
pub mod paths;
pub mod pipeline;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::PipelineConfig;
pub use dataset::{ClassificationDataset, ImageFolder, ImageSample};
pub use export::{export_model, ExportSummary, ModelArtifact};
pub use inference::{Prediction, Predictor};
pub use model::{ImageClassifier, ImageClassifierConfig};
pub use paths::WorkspacePaths;
pub use pipeline::{run_pipeline, PipelineReport};
pub use training::{evaluate, EvaluationReport, TrainedModel, Trainer, TrainingConfig};
pub use utils::error::{ClassifierError, Result};

/// Default input image size (224x224)
pub const DEFAULT_IMAGE_SIZE: usize = 224;

/// Default fraction of samples used for training
pub const DEFAULT_SPLIT_FRACTION: f64 = 0.9;

/// Default seed for shuffling
pub const DEFAULT_SEED: u64 = 42;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
