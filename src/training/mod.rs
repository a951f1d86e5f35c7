//! Training module: supervised training loop and evaluation

pub mod evaluator;
pub mod trainer;

use burn::tensor::backend::Backend;

use crate::model::{ImageClassifier, ImageClassifierConfig};

pub use evaluator::{evaluate, EvaluationReport};
pub use trainer::{EpochMetrics, OptimizerKind, Trainer, TrainingConfig, TrainingState};

/// A trained model with everything needed to evaluate and export it
#[derive(Debug, Clone)]
pub struct TrainedModel<B: Backend> {
    /// Inference copy of the trained weights
    pub model: ImageClassifier<B>,
    /// Configuration the model was built from
    pub config: ImageClassifierConfig,
    /// Class names; output `i` is `class_names[i]`
    pub class_names: Vec<String>,
    /// Per-epoch history of the run
    pub state: TrainingState,
}
