//! End-to-end run: load, split, train, evaluate, export.

use std::time::Instant;

use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::dataset::{ClassificationDataset, ImageFolder};
use crate::export::{export_model, ExportSummary};
use crate::paths::WorkspacePaths;
use crate::training::{evaluate, EvaluationReport, Trainer, TrainingState};
use crate::utils::error::Result;

/// Outcome of a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Sorted class names; output `i` of the model is `class_names[i]`
    pub class_names: Vec<String>,
    pub train_samples: usize,
    pub test_samples: usize,
    pub training: TrainingState,
    pub evaluation: EvaluationReport,
    pub export: ExportSummary,
    /// Wall-clock duration of the whole run
    pub elapsed_secs: f64,
}

/// Run every stage in order; the first failure aborts the run
pub fn run_pipeline<B: AutodiffBackend>(
    config: &PipelineConfig,
    device: &B::Device,
) -> Result<PipelineReport> {
    let start = Instant::now();
    config.validate()?;

    let paths = WorkspacePaths::from_current_dir(config)?;
    debug!("Image archive {:?} (not read)", paths.archive);

    info!("Loading images from {:?}", paths.images_dir);
    let folder = ImageFolder::from_folder(&paths.images_dir)?;
    for (name, count) in folder.class_names.iter().zip(folder.class_counts()) {
        debug!("  {}: {} images", name, count);
    }

    let (train, test) = folder.split(config.data.train_fraction, config.data.seed)?;

    let image_size = config.data.image_size;
    let train_data = ClassificationDataset::load(&train, image_size)?;

    let mut trainer = Trainer::new(config.training.clone());
    let trained = trainer.fit::<B>(
        config.model_config(folder.num_classes()),
        &train_data,
        &folder.class_names,
        device,
    )?;

    let test_data = ClassificationDataset::load(&test, image_size)?;
    let evaluation = evaluate(
        &trained.model,
        &test_data,
        config.training.batch_size,
        config.training.label_smoothing,
        device,
    )?;
    info!(
        "Test loss {:.4}, accuracy {:.2}%",
        evaluation.loss,
        evaluation.accuracy * 100.0
    );

    info!("Exporting to {:?}", paths.export_path());
    let export = export_model(&trained, &paths.export_dir, &paths.export_file)?;

    Ok(PipelineReport {
        class_names: folder.class_names,
        train_samples: train.len(),
        test_samples: test.len(),
        training: trained.state,
        evaluation,
        export,
        elapsed_secs: start.elapsed().as_secs_f64(),
    })
}
