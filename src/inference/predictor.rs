//! Inference Predictor Module
//!
//! Loads an exported model file, restores the float classifier from its
//! dequantized weights and classifies single images.

use std::path::Path;
use std::time::Instant;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::burn_dataset::{decode_resized, rgb_to_chw};
use crate::export::{apply_tensors, InputSpec, ModelArtifact, NamedTensor};
use crate::model::ImageClassifier;
use crate::utils::error::{ClassifierError, Result};

/// Result of a single prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted class index
    pub label: usize,

    /// Predicted class name
    pub class_name: String,

    /// Probability of the predicted class
    pub confidence: f32,

    /// Full probability distribution over all classes
    pub probabilities: Vec<f32>,

    /// Inference time in milliseconds
    pub inference_time_ms: f64,
}

impl Prediction {
    /// Build from a probability vector
    pub fn from_probabilities(
        probabilities: Vec<f32>,
        class_names: &[String],
        inference_time_ms: f64,
    ) -> Self {
        let (label, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            });

        Self {
            label,
            class_name: class_names
                .get(label)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", label)),
            confidence,
            probabilities,
            inference_time_ms,
        }
    }

    /// The `k` most likely classes, best first
    pub fn top_k(&self, k: usize) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> =
            self.probabilities.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(k);
        ranked
    }
}

/// Classifier restored from an exported model file
pub struct Predictor<B: Backend> {
    model: ImageClassifier<B>,
    class_names: Vec<String>,
    input: InputSpec,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Load a model file written by [`export_model`](crate::export::export_model)
    pub fn load(path: &Path, device: &B::Device) -> Result<Self> {
        let artifact = ModelArtifact::load(path)?;
        let predictor = Self::from_artifact(artifact, device)?;
        info!(
            "Loaded model from {:?}: {} classes, {}x{} input",
            path,
            predictor.class_names.len(),
            predictor.input.image_size,
            predictor.input.image_size
        );
        Ok(predictor)
    }

    /// Rebuild the classifier described by a decoded artifact
    pub fn from_artifact(artifact: ModelArtifact, device: &B::Device) -> Result<Self> {
        let metadata = artifact.metadata;
        metadata.model.validate()?;

        if metadata.class_names.len() != metadata.model.num_classes {
            return Err(ClassifierError::InvalidArtifact(format!(
                "{} class names for {} outputs",
                metadata.class_names.len(),
                metadata.model.num_classes
            )));
        }
        if metadata.input.channels != 3 || metadata.input.std == 0.0 {
            return Err(ClassifierError::InvalidArtifact(
                "unsupported input specification".to_string(),
            ));
        }

        let tensors: Vec<NamedTensor> = artifact
            .tensors
            .iter()
            .map(|t| NamedTensor {
                name: t.name.clone(),
                shape: t.shape.clone(),
                values: t.dequantize(),
            })
            .collect();
        debug!("Dequantized {} tensors", tensors.len());

        let model = apply_tensors(metadata.model.init::<B>(device), &tensors, device)?;

        Ok(Self {
            model,
            class_names: metadata.class_names,
            input: metadata.input,
            device: device.clone(),
        })
    }

    /// Class names in output order
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    /// Input the model expects
    pub fn input(&self) -> &InputSpec {
        &self.input
    }

    /// Classify already-normalized CHW data of the model's input size
    pub fn predict_chw(&self, image: Vec<f32>) -> Result<Prediction> {
        let size = self.input.image_size;
        if image.len() != 3 * size * size {
            return Err(ClassifierError::Dataset(format!(
                "expected {} values for a {}x{} RGB image, got {}",
                3 * size * size,
                size,
                size,
                image.len()
            )));
        }

        let start = Instant::now();
        let input =
            Tensor::<B, 4>::from_floats(TensorData::new(image, [1, 3, size, size]), &self.device);
        let probabilities = self
            .model
            .predict(input)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| ClassifierError::Model(format!("{:?}", e)))?;
        let elapsed = start.elapsed().as_secs_f64() * 1000.0;

        Ok(Prediction::from_probabilities(
            probabilities,
            &self.class_names,
            elapsed,
        ))
    }

    /// Decode, resize, normalize and classify an image file
    pub fn predict_path(&self, path: &Path) -> Result<Prediction> {
        let img = decode_resized(path, self.input.image_size)?;
        let data = rgb_to_chw(&img, self.input.mean, self.input.std);
        self.predict_chw(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::export_model;
    use crate::model::{EfficientNetConfig, ImageClassifierConfig};
    use crate::training::{TrainedModel, TrainingState};
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn export(dir: &Path) -> (TrainedModel<TestBackend>, std::path::PathBuf) {
        let config = ImageClassifierConfig::new(EfficientNetConfig::tiny(), 3).with_image_size(16);
        let trained = TrainedModel {
            model: config.init(&Default::default()),
            config,
            class_names: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            state: TrainingState::default(),
        };
        let summary = export_model(&trained, dir, "model.tflite").unwrap();
        (trained, summary.path)
    }

    #[test]
    fn test_prediction_from_probabilities() {
        let names = vec!["cat".to_string(), "dog".to_string()];
        let p = Prediction::from_probabilities(vec![0.3, 0.7], &names, 1.0);

        assert_eq!(p.label, 1);
        assert_eq!(p.class_name, "dog");
        assert!((p.confidence - 0.7).abs() < 1e-6);
        assert_eq!(p.top_k(1), vec![(1, 0.7)]);
    }

    #[test]
    fn test_load_and_predict_image() {
        let dir = TempDir::new().unwrap();
        let (_, model_path) = export(dir.path());
        let image_path = dir.path().join("query.png");
        RgbImage::from_pixel(40, 30, Rgb([30, 200, 90])).save(&image_path).unwrap();

        let predictor = Predictor::<TestBackend>::load(&model_path, &Default::default()).unwrap();
        let prediction = predictor.predict_path(&image_path).unwrap();

        assert_eq!(prediction.probabilities.len(), 3);
        let total: f32 = prediction.probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
        assert!(prediction.label < 3);
        assert_eq!(predictor.class_names()[prediction.label], prediction.class_name);
    }

    #[test]
    fn test_restored_model_tracks_float_model() {
        let dir = TempDir::new().unwrap();
        let (trained, model_path) = export(dir.path());
        let predictor = Predictor::<TestBackend>::load(&model_path, &Default::default()).unwrap();

        let data = vec![0.25f32; 3 * 16 * 16];
        let restored = predictor.predict_chw(data.clone()).unwrap();

        let input = Tensor::<TestBackend, 4>::from_floats(
            TensorData::new(data, [1, 3, 16, 16]),
            &Default::default(),
        );
        let float = trained.model.predict(input).into_data().to_vec::<f32>().unwrap();

        for (a, b) in restored.probabilities.iter().zip(float.iter()) {
            assert!((a - b).abs() < 0.1);
        }
    }

    #[test]
    fn test_wrong_input_size_rejected() {
        let dir = TempDir::new().unwrap();
        let (_, model_path) = export(dir.path());
        let predictor = Predictor::<TestBackend>::load(&model_path, &Default::default()).unwrap();

        assert!(predictor.predict_chw(vec![0.0; 10]).is_err());
    }

    #[test]
    fn test_garbage_file_is_invalid_artifact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.tflite");
        std::fs::write(&path, b"definitely not a model").unwrap();

        let result = Predictor::<TestBackend>::load(&path, &Default::default());
        assert!(matches!(result, Err(ClassifierError::InvalidArtifact(_))));
    }
}
