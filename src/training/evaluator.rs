//! Evaluation of a trained classifier on held-out data

use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::{ClassificationBatcher, ClassificationDataset};
use crate::model::ImageClassifier;
use crate::utils::error::{ClassifierError, Result};
use crate::utils::metrics::ConfusionMatrix;

/// Loss and accuracy over an evaluation set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Sample-weighted mean cross-entropy
    pub loss: f64,
    /// Fraction of correctly classified samples, in [0, 1]
    pub accuracy: f64,
    /// Number of evaluated samples
    pub samples: usize,
    /// Rows are actual labels, columns predicted labels
    pub confusion: ConfusionMatrix,
}

/// Evaluate `model` on every item of `dataset`
///
/// The loss uses the same label smoothing as training so that both numbers
/// are comparable. An empty dataset is an error.
pub fn evaluate<B: Backend>(
    model: &ImageClassifier<B>,
    dataset: &ClassificationDataset,
    batch_size: usize,
    label_smoothing: f64,
    device: &B::Device,
) -> Result<EvaluationReport> {
    if dataset.is_empty() {
        return Err(ClassifierError::Dataset(
            "evaluation set is empty".to_string(),
        ));
    }
    if batch_size == 0 {
        return Err(ClassifierError::Config(
            "batch_size must be at least 1".to_string(),
        ));
    }

    let batcher = ClassificationBatcher::new(dataset.image_size());
    let smoothing = (label_smoothing > 0.0).then_some(label_smoothing as f32);
    let loss_fn = CrossEntropyLossConfig::new()
        .with_smoothing(smoothing)
        .init(device);

    let mut predicted_labels = Vec::with_capacity(dataset.len());
    let mut actual_labels = Vec::with_capacity(dataset.len());
    let mut total_loss = 0.0f64;
    let mut samples = 0usize;

    let len = dataset.len();
    for start in (0..len).step_by(batch_size) {
        let end = (start + batch_size).min(len);
        let items: Vec<_> = (start..end).filter_map(|i| dataset.get(i)).collect();
        if items.is_empty() {
            continue;
        }
        let labels: Vec<usize> = items.iter().map(|item| item.label).collect();

        let batch = batcher.batch(items, device);
        let count = labels.len();

        let output = model.forward(batch.images);
        let loss: f64 = loss_fn
            .forward(output.clone(), batch.targets)
            .into_scalar()
            .elem();
        total_loss += loss * count as f64;

        let predictions = output
            .argmax(1)
            .reshape([count])
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|e| ClassifierError::Training(format!("{:?}", e)))?;

        predicted_labels.extend(predictions.into_iter().map(|p| p as usize));
        actual_labels.extend(labels);
        samples += count;
    }

    let confusion =
        ConfusionMatrix::from_predictions(&predicted_labels, &actual_labels, model.num_classes());

    let report = EvaluationReport {
        loss: total_loss / samples.max(1) as f64,
        accuracy: confusion.accuracy(),
        samples,
        confusion,
    };

    info!(
        "Evaluated {} samples: loss = {:.4}, accuracy = {:.2}%",
        report.samples,
        report.loss,
        report.accuracy * 100.0
    );
    for (label, recall) in report.confusion.per_class_recall().iter().enumerate() {
        if let Some(recall) = recall {
            debug!("Class {} recall: {:.2}%", label, recall * 100.0);
        }
    }

    Ok(report)
}
