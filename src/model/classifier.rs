//! Image classifier: EfficientNet-Lite backbone, dropout and a linear head.

use std::path::Path;

use burn::{
    config::Config,
    module::Module,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig},
    record::CompactRecorder,
    tensor::{activation::softmax, backend::Backend, Int, Tensor},
};

use super::efficientnet::{EfficientNet, EfficientNetConfig};
use crate::utils::error::{self, ClassifierError};

/// Configuration for the [`ImageClassifier`]
#[derive(Config, Debug, PartialEq)]
pub struct ImageClassifierConfig {
    /// Backbone layout
    pub backbone: EfficientNetConfig,

    /// Number of output classes
    pub num_classes: usize,

    /// Dropout applied to the pooled features
    #[config(default = "0.2")]
    pub dropout: f64,

    /// Input image size (square)
    #[config(default = "224")]
    pub image_size: usize,
}

impl ImageClassifierConfig {
    /// Default mobile classifier for `num_classes` labels
    pub fn lite0(num_classes: usize) -> Self {
        Self::new(EfficientNetConfig::lite0(), num_classes)
    }

    /// Check the configuration can build a usable model
    pub fn validate(&self) -> error::Result<()> {
        if self.num_classes < 1 {
            return Err(ClassifierError::Model(
                "A classifier needs at least one class".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ClassifierError::Model(format!(
                "Dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.image_size < 8 {
            return Err(ClassifierError::Model(format!(
                "Image size {} is too small",
                self.image_size
            )));
        }
        if self.backbone.stages.is_empty() {
            return Err(ClassifierError::Model(
                "Backbone has no stages".to_string(),
            ));
        }
        Ok(())
    }

    /// Initialize a new model with random weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> ImageClassifier<B> {
        let backbone = self.backbone.init(device);
        let head = LinearConfig::new(backbone.feature_size(), self.num_classes).init(device);

        ImageClassifier {
            backbone,
            dropout: DropoutConfig::new(self.dropout).init(),
            head,
            num_classes: self.num_classes,
        }
    }
}

/// Image classifier producing one logit per class
#[derive(Module, Debug)]
pub struct ImageClassifier<B: Backend> {
    pub backbone: EfficientNet<B>,
    pub dropout: Dropout,
    pub head: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> ImageClassifier<B> {
    /// Forward pass: `[batch, 3, H, W]` images to `[batch, num_classes]` logits
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.classify_features(self.backbone.forward(images))
    }

    /// Dropout and head over `[batch, feature_size]` backbone features
    pub fn classify_features(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        self.head.forward(self.dropout.forward(features))
    }

    /// Class probabilities
    pub fn predict(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    /// Most likely class per image
    pub fn predict_classes(&self, images: Tensor<B, 4>) -> Tensor<B, 1, Int> {
        let logits = self.forward(images);
        let [batch, _] = logits.dims();
        logits.argmax(1).reshape([batch])
    }

    /// Get the number of output classes
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Replace the backbone with one saved by [`save_backbone`](Self::save_backbone)
    pub fn load_backbone(mut self, path: &Path, device: &B::Device) -> error::Result<Self> {
        self.backbone = self
            .backbone
            .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
            .map_err(|e| {
                ClassifierError::Model(format!("Failed to load backbone {:?}: {}", path, e))
            })?;
        Ok(self)
    }

    /// Save only the backbone, for reuse as a pretrained starting point
    pub fn save_backbone(&self, path: &Path) -> error::Result<()> {
        self.backbone
            .clone()
            .save_file(path.to_path_buf(), &CompactRecorder::new())
            .map_err(|e| {
                ClassifierError::Model(format!("Failed to save backbone {:?}: {}", path, e))
            })
    }

    /// Stop gradients from flowing into the backbone
    ///
    /// Batch-norm statistics still update in a training-mode forward; the
    /// trainer runs a frozen backbone through its inference copy instead.
    pub fn freeze_backbone(mut self) -> Self {
        self.backbone = self.backbone.no_grad();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn tiny_config(num_classes: usize) -> ImageClassifierConfig {
        ImageClassifierConfig::new(EfficientNetConfig::tiny(), num_classes).with_image_size(32)
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = tiny_config(3).init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::zeros([4, 3, 32, 32], &device);
        let logits = model.forward(images.clone());
        assert_eq!(logits.dims(), [4, 3]);

        let probs = model.predict(images.clone()).sum_dim(1);
        for p in probs.into_data().to_vec::<f32>().unwrap() {
            assert!((p - 1.0).abs() < 1e-4);
        }

        assert_eq!(model.predict_classes(images).dims(), [4]);
    }

    #[test]
    fn test_default_config_values() {
        let config = ImageClassifierConfig::lite0(2);
        assert_eq!(config.dropout, 0.2);
        assert_eq!(config.image_size, 224);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(tiny_config(0).validate().is_err());
        assert!(tiny_config(2).with_dropout(1.0).validate().is_err());
        assert!(tiny_config(2).with_image_size(2).validate().is_err());
    }

    #[test]
    fn test_backbone_round_trip_through_recorder() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backbone");
        let device = Default::default();

        let source = tiny_config(2).init::<TestBackend>(&device);
        source.save_backbone(&path).unwrap();

        let target = tiny_config(5).init::<TestBackend>(&device);
        let target = target.load_backbone(&path, &device).unwrap();

        let images = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let a = source.backbone.forward(images.clone()).into_data().to_vec::<f32>().unwrap();
        let b = target.backbone.forward(images).into_data().to_vec::<f32>().unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-3);
        }
        assert_eq!(target.num_classes(), 5);
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("classifier.json");
        let config = tiny_config(4).with_dropout(0.3);

        config.save(&path).unwrap();
        let loaded = ImageClassifierConfig::load(&path).unwrap();

        assert_eq!(loaded, config);
        assert_eq!(loaded.backbone.stages.len(), 2);
    }
}
