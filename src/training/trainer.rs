//! Supervised Training Loop
//!
//! A manual Burn training loop: seeded shuffling per epoch, mini-batches,
//! cross-entropy with label smoothing, backward pass and an optimizer step.
//! When a pretrained backbone is supplied and fine-tuning is off, only the
//! classification head is trained.

use std::path::{Path, PathBuf};

use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    module::{AutodiffModule, Module},
    nn::loss::CrossEntropyLossConfig,
    optim::{
        decay::WeightDecayConfig, momentum::MomentumConfig, AdamConfig, GradientsParams,
        Optimizer, SgdConfig,
    },
    record::CompactRecorder,
    tensor::{backend::AutodiffBackend, ElementConversion, Tensor},
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::TrainedModel;
use crate::dataset::{ClassificationBatcher, ClassificationDataset};
use crate::model::{EfficientNet, ImageClassifier, ImageClassifierConfig};
use crate::utils::error::{ClassifierError, Result};

/// Optimizer used for training
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// Adam optimizer
    Adam,
    /// SGD with momentum
    #[default]
    Sgd,
}

impl std::fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizerKind::Adam => write!(f, "adam"),
            OptimizerKind::Sgd => write!(f, "sgd"),
        }
    }
}

/// Hyperparameters of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of passes over the training set
    pub epochs: usize,
    /// Samples per mini-batch
    pub batch_size: usize,
    /// Optimizer learning rate
    pub learning_rate: f64,
    /// Optimizer kind
    pub optimizer: OptimizerKind,
    /// L2 penalty applied by the optimizer
    pub weight_decay: f64,
    /// Momentum (SGD only)
    pub momentum: f64,
    /// Label smoothing of the cross-entropy loss
    pub label_smoothing: f64,
    /// Seed for the per-epoch shuffle
    pub seed: u64,
    /// Backbone saved with `ImageClassifier::save_backbone`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pretrained_backbone: Option<PathBuf>,
    /// Train the pretrained backbone too instead of only the head
    pub fine_tune: bool,
    /// Where to checkpoint the float model after training
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 32,
            learning_rate: 0.005,
            optimizer: OptimizerKind::Sgd,
            weight_decay: 1e-4,
            momentum: 0.9,
            label_smoothing: 0.1,
            seed: crate::DEFAULT_SEED,
            pretrained_backbone: None,
            fine_tune: false,
            checkpoint_dir: None,
        }
    }
}

impl TrainingConfig {
    /// Check hyperparameter ranges
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(ClassifierError::Config("epochs must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ClassifierError::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if !(self.learning_rate > 0.0) {
            return Err(ClassifierError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.label_smoothing) {
            return Err(ClassifierError::Config(format!(
                "label_smoothing must be in [0, 1), got {}",
                self.label_smoothing
            )));
        }
        if self.weight_decay < 0.0 || !(0.0..1.0).contains(&self.momentum) {
            return Err(ClassifierError::Config(
                "weight_decay must be >= 0 and momentum in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loss and accuracy of one training epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
}

/// Training state for checkpointing and reporting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    pub epoch: usize,
    pub best_accuracy: f64,
    pub history: Vec<EpochMetrics>,
}

impl TrainingState {
    /// Record a finished epoch
    pub fn update_epoch(&mut self, loss: f64, accuracy: f64) {
        self.epoch += 1;
        self.best_accuracy = self.best_accuracy.max(accuracy);
        self.history.push(EpochMetrics {
            epoch: self.epoch,
            loss,
            accuracy,
        });
    }

    /// Metrics of the most recent epoch
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.history.last()
    }
}

/// Trains an [`ImageClassifier`] with a [`TrainingConfig`]
pub struct Trainer {
    config: TrainingConfig,
    state: TrainingState,
}

impl Trainer {
    /// Create a new trainer
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            state: TrainingState::default(),
        }
    }

    /// Train a new model on `train` and return its inference copy
    pub fn fit<B: AutodiffBackend>(
        &mut self,
        model_config: ImageClassifierConfig,
        train: &ClassificationDataset,
        class_names: &[String],
        device: &B::Device,
    ) -> Result<TrainedModel<B::InnerBackend>> {
        self.config.validate()?;
        model_config.validate()?;

        if train.is_empty() {
            return Err(ClassifierError::Training(
                "training set is empty".to_string(),
            ));
        }
        if model_config.num_classes != class_names.len() {
            return Err(ClassifierError::Training(format!(
                "model has {} outputs but there are {} classes",
                model_config.num_classes,
                class_names.len()
            )));
        }
        if train.image_size() != model_config.image_size {
            return Err(ClassifierError::Training(format!(
                "images are {}px but the model expects {}px",
                train.image_size(),
                model_config.image_size
            )));
        }

        let counts = train.class_distribution(class_names.len());
        for (name, count) in class_names.iter().zip(&counts) {
            if *count == 0 {
                warn!("Class '{}' has no training samples", name);
            }
        }

        B::seed(device, self.config.seed);
        let mut model: ImageClassifier<B> = model_config.init(device);
        let mut frozen = None;

        if let Some(path) = &self.config.pretrained_backbone {
            info!("Loading pretrained backbone from {:?}", path);
            model = model.load_backbone(path, device)?;
            if !self.config.fine_tune {
                info!("Backbone frozen, training the classification head only");
                model = model.freeze_backbone();
                frozen = Some(model.backbone.valid());
            }
        } else {
            info!("No pretrained backbone, training all layers");
        }

        info!(
            "Training on {} samples: {} epochs, batch size {}, lr {}, {}",
            train.len(),
            self.config.epochs,
            self.config.batch_size,
            self.config.learning_rate,
            self.config.optimizer
        );

        let weight_decay = Some(WeightDecayConfig::new(self.config.weight_decay as f32));
        let model = match self.config.optimizer {
            OptimizerKind::Adam => {
                let optimizer = AdamConfig::new().with_weight_decay(weight_decay).init();
                self.run_epochs(model, frozen.as_ref(), optimizer, train, device)?
            }
            OptimizerKind::Sgd => {
                let optimizer = SgdConfig::new()
                    .with_weight_decay(weight_decay)
                    .with_momentum(Some(
                        MomentumConfig::new().with_momentum(self.config.momentum),
                    ))
                    .init();
                self.run_epochs(model, frozen.as_ref(), optimizer, train, device)?
            }
        };

        let model = model.valid();

        if let Some(dir) = &self.config.checkpoint_dir {
            self.save_checkpoint(&model, dir)?;
        }

        Ok(TrainedModel {
            model,
            config: model_config,
            class_names: class_names.to_vec(),
            state: self.state.clone(),
        })
    }

    fn run_epochs<B, O>(
        &mut self,
        mut model: ImageClassifier<B>,
        frozen: Option<&EfficientNet<B::InnerBackend>>,
        mut optimizer: O,
        train: &ClassificationDataset,
        device: &B::Device,
    ) -> Result<ImageClassifier<B>>
    where
        B: AutodiffBackend,
        O: Optimizer<ImageClassifier<B>, B>,
    {
        let batch_size = self.config.batch_size;
        let batcher = ClassificationBatcher::new(train.image_size());
        let smoothing = (self.config.label_smoothing > 0.0)
            .then_some(self.config.label_smoothing as f32);
        let loss_fn = CrossEntropyLossConfig::new()
            .with_smoothing(smoothing)
            .init(device);

        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let num_batches = train.len().div_ceil(batch_size);

        for epoch in 0..self.config.epochs {
            let pb = ProgressBar::new(num_batches as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  Epoch {msg} [{bar:40.cyan/blue}] {pos}/{len}")
                    .map_err(|e| ClassifierError::Training(e.to_string()))?
                    .progress_chars("#>-"),
            );
            pb.set_message(format!("{}/{}", epoch + 1, self.config.epochs));

            let indices = create_shuffled_indices(train.len(), &mut rng);

            let mut epoch_loss = 0.0f64;
            let mut correct = 0usize;
            let mut seen = 0usize;

            for chunk in indices.chunks(batch_size) {
                let items: Vec<_> = chunk.iter().filter_map(|&i| train.get(i)).collect();
                if items.is_empty() {
                    continue;
                }
                let batch = batcher.batch(items, device);
                let samples = batch.targets.dims()[0];

                let output = match frozen {
                    // Inference-mode backbone keeps its batch-norm statistics
                    Some(backbone) => {
                        let features = backbone.forward(batch.images.inner());
                        model.classify_features(Tensor::from_inner(features))
                    }
                    None => model.forward(batch.images),
                };
                let loss = loss_fn.forward(output.clone(), batch.targets.clone());

                let loss_value: f64 = loss.clone().into_scalar().elem();
                epoch_loss += loss_value * samples as f64;

                let predictions = output.argmax(1).reshape([samples]);
                let batch_correct: i64 = predictions
                    .equal(batch.targets)
                    .int()
                    .sum()
                    .into_scalar()
                    .elem();
                correct += batch_correct as usize;
                seen += samples;

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(self.config.learning_rate, model, grads);

                pb.inc(1);
            }
            pb.finish_and_clear();

            let avg_loss = epoch_loss / seen.max(1) as f64;
            let accuracy = correct as f64 / seen.max(1) as f64;
            self.state.update_epoch(avg_loss, accuracy);

            info!(
                "Epoch {}/{}: loss = {:.4}, accuracy = {:.2}%",
                epoch + 1,
                self.config.epochs,
                avg_loss,
                accuracy * 100.0
            );
        }

        Ok(model)
    }

    fn save_checkpoint<B: burn::tensor::backend::Backend>(
        &self,
        model: &ImageClassifier<B>,
        dir: &Path,
    ) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        let recorder = CompactRecorder::new();
        model
            .clone()
            .save_file(dir.join("classifier"), &recorder)
            .map_err(|e| ClassifierError::Model(format!("Failed to save model: {:?}", e)))?;
        model.save_backbone(&dir.join("backbone"))?;

        let state_json = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(dir.join("training_state.json"), state_json)?;

        debug!("Checkpoint written to {:?}", dir);
        Ok(())
    }
}

/// Shuffle `0..len` for one epoch
fn create_shuffled_indices(len: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    indices.shuffle(rng);
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ClassificationItem;
    use crate::export::{collect_tensors, NamedTensor};
    use crate::model::EfficientNetConfig;
    use burn::backend::{Autodiff, NdArray};
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    fn tiny_dataset(n: usize) -> ClassificationDataset {
        let plane = 16 * 16;
        let items = (0..n)
            .map(|i| {
                let label = i % 2;
                let value = if label == 0 { 0.8 } else { -0.8 };
                ClassificationItem::from_data(vec![value; 3 * plane], label, format!("{}", i))
            })
            .collect();
        ClassificationDataset::from_items(items, 16)
    }

    fn tiny_model() -> ImageClassifierConfig {
        ImageClassifierConfig::new(EfficientNetConfig::tiny(), 2).with_image_size(16)
    }

    fn quick_config() -> TrainingConfig {
        TrainingConfig {
            epochs: 2,
            batch_size: 4,
            learning_rate: 0.01,
            ..TrainingConfig::default()
        }
    }

    fn classes() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    #[test]
    fn test_default_hyperparameters() {
        let config = TrainingConfig::default();
        assert_eq!(config.epochs, 5);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.learning_rate, 0.005);
        assert_eq!(config.optimizer, OptimizerKind::Sgd);
        assert_eq!(config.momentum, 0.9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = TrainingConfig {
            batch_size: 0,
            ..TrainingConfig::default()
        };
        assert!(matches!(config.validate(), Err(ClassifierError::Config(_))));
    }

    #[test]
    fn test_fit_records_history() {
        let device = Default::default();
        let mut trainer = Trainer::new(quick_config());

        let trained = trainer
            .fit::<TestBackend>(tiny_model(), &tiny_dataset(10), &classes(), &device)
            .unwrap();

        assert_eq!(trained.state.epoch, 2);
        assert_eq!(trained.state.history.len(), 2);
        for metrics in &trained.state.history {
            assert!(metrics.loss.is_finite());
            assert!((0.0..=1.0).contains(&metrics.accuracy));
        }
        assert_eq!(trained.class_names, classes());
        assert_eq!(trained.model.num_classes(), 2);
    }

    #[test]
    fn test_fit_empty_training_set_fails() {
        let device = Default::default();
        let mut trainer = Trainer::new(quick_config());

        let result =
            trainer.fit::<TestBackend>(tiny_model(), &tiny_dataset(0), &classes(), &device);

        assert!(matches!(result, Err(ClassifierError::Training(_))));
    }

    #[test]
    fn test_fit_with_adam_and_checkpoint() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = TrainingConfig {
            epochs: 1,
            optimizer: OptimizerKind::Adam,
            checkpoint_dir: Some(dir.path().join("ckpt")),
            ..quick_config()
        };
        let mut trainer = Trainer::new(config);

        trainer
            .fit::<TestBackend>(tiny_model(), &tiny_dataset(6), &classes(), &device)
            .unwrap();

        assert!(dir.path().join("ckpt/classifier.mpk").exists());
        assert!(dir.path().join("ckpt/backbone.mpk").exists());
        assert!(dir.path().join("ckpt/training_state.json").exists());
    }

    #[test]
    fn test_fit_from_frozen_pretrained_backbone() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();

        let mut first = Trainer::new(TrainingConfig {
            epochs: 1,
            checkpoint_dir: Some(dir.path().to_path_buf()),
            ..quick_config()
        });
        first
            .fit::<TestBackend>(tiny_model(), &tiny_dataset(6), &classes(), &device)
            .unwrap();

        let mut second = Trainer::new(TrainingConfig {
            epochs: 1,
            pretrained_backbone: Some(dir.path().join("backbone")),
            ..quick_config()
        });
        let trained = second
            .fit::<TestBackend>(tiny_model(), &tiny_dataset(6), &classes(), &device)
            .unwrap();
        assert_eq!(trained.state.epoch, 1);

        let reference = tiny_model()
            .init::<NdArray>(&device)
            .load_backbone(&dir.path().join("backbone"), &device)
            .unwrap();
        let backbone_of = |model: &ImageClassifier<NdArray>| -> Vec<NamedTensor> {
            collect_tensors(model)
                .unwrap()
                .into_iter()
                .filter(|t| t.name.starts_with("backbone."))
                .collect()
        };

        let expected = backbone_of(&reference);
        assert!(expected.iter().any(|t| t.name.ends_with("bn.running_var")));
        assert_eq!(backbone_of(&trained.model), expected);
    }

    #[test]
    fn test_missing_pretrained_backbone_is_model_error() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let mut trainer = Trainer::new(TrainingConfig {
            pretrained_backbone: Some(dir.path().join("absent")),
            ..quick_config()
        });

        let result =
            trainer.fit::<TestBackend>(tiny_model(), &tiny_dataset(4), &classes(), &device);

        assert!(matches!(result, Err(ClassifierError::Model(_))));
    }

    #[test]
    fn test_shuffled_indices_are_a_permutation() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut indices = create_shuffled_indices(20, &mut rng);
        indices.sort_unstable();
        assert_eq!(indices, (0..20).collect::<Vec<_>>());
    }
}
