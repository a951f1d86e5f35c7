//! Pipeline configuration
//!
//! Every field has a default, so an empty TOML file (or no file at all)
//! reproduces the standard run. Sections may be given partially:
//!
//! ```toml
//! [data]
//! images_dir = "photos"
//!
//! [training]
//! epochs = 10
//! optimizer = "sgd"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::SplitConfig;
use crate::model::{EfficientNetConfig, ImageClassifierConfig};
use crate::paths::{DEFAULT_EXPORT_FILE, DEFAULT_IMAGES_DIR};
use crate::training::TrainingConfig;
use crate::utils::error::{ClassifierError, Result};

/// Where the images come from and how they are split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory with one sub-directory per class
    pub images_dir: PathBuf,
    /// Archive path to record, relative to the working directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<PathBuf>,
    /// Fraction of samples used for training
    pub train_fraction: f64,
    /// Seed of the train/test shuffle
    pub seed: u64,
    /// Side length images are resized to
    pub image_size: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from(".").join(DEFAULT_IMAGES_DIR),
            archive: None,
            train_fraction: crate::DEFAULT_SPLIT_FRACTION,
            seed: crate::DEFAULT_SEED,
            image_size: crate::DEFAULT_IMAGE_SIZE,
        }
    }
}

/// Backbone layouts selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// EfficientNet-Lite0
    #[default]
    Lite0,
    /// Small backbone for quick CPU runs
    Tiny,
}

impl Architecture {
    pub fn backbone(&self) -> EfficientNetConfig {
        match self {
            Architecture::Lite0 => EfficientNetConfig::lite0(),
            Architecture::Tiny => EfficientNetConfig::tiny(),
        }
    }
}

/// Classifier architecture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub architecture: Architecture,
    /// Dropout before the classification head
    pub dropout: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            architecture: Architecture::Lite0,
            dropout: 0.2,
        }
    }
}

/// Output location of the exported model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub dir: PathBuf,
    pub filename: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            filename: DEFAULT_EXPORT_FILE.to_string(),
        }
    }
}

/// Complete configuration of a training run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub export: ExportConfig,
}

impl PipelineConfig {
    /// Read a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ClassifierError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ClassifierError::Config(msg) => {
                ClassifierError::Config(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })
    }

    /// Parse and validate TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ClassifierError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ClassifierError::Serialization(e.to_string()))
    }

    /// Check every section
    pub fn validate(&self) -> Result<()> {
        self.split_config().validate()?;
        self.training.validate()?;
        if self.export.filename.is_empty() {
            return Err(ClassifierError::Config(
                "export filename must not be empty".to_string(),
            ));
        }
        // num_classes is only known after loading; 1 stands in for the check
        self.model_config(1)
            .validate()
            .map_err(|e| ClassifierError::Config(e.to_string()))
    }

    /// Split settings of the data section
    pub fn split_config(&self) -> SplitConfig {
        SplitConfig {
            train_fraction: self.data.train_fraction,
            seed: self.data.seed,
        }
    }

    /// Classifier configuration for `num_classes` outputs
    pub fn model_config(&self, num_classes: usize) -> ImageClassifierConfig {
        ImageClassifierConfig::new(self.model.architecture.backbone(), num_classes)
            .with_dropout(self.model.dropout)
            .with_image_size(self.data.image_size)
    }
}
