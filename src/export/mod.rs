//! Export of a trained classifier to a quantized model file
//!
//! The file is written to a temporary file in the target directory and then
//! renamed over the target, so readers see either the previous file or the
//! complete new one.

pub mod artifact;
pub mod quantize;
pub mod weights;

use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::training::TrainedModel;
use crate::utils::error::{ClassifierError, Result};
use crate::utils::format_bytes;

pub use artifact::{ArtifactMetadata, InputSpec, ModelArtifact, QuantizedTensor};
pub use quantize::QuantParams;
pub use weights::{apply_tensors, collect_tensors, NamedTensor};

/// Name of the quantization scheme recorded in the metadata
pub const QUANTIZATION_SCHEME: &str = "uint8-affine-per-tensor";

/// What an export produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSummary {
    /// Final location of the model file
    pub path: PathBuf,
    /// Size of the written file
    pub bytes: u64,
    /// Number of tensors stored
    pub tensors: usize,
    /// Number of scalar parameters stored
    pub parameters: usize,
}

impl ExportSummary {
    /// File size relative to storing every parameter as `f32`
    pub fn compression_ratio(&self) -> f64 {
        let float_bytes = (self.parameters * 4) as f64;
        if self.bytes == 0 {
            0.0
        } else {
            float_bytes / self.bytes as f64
        }
    }
}

/// Quantize every tensor of a trained model into an artifact
pub fn build_artifact<B: Backend>(trained: &TrainedModel<B>) -> Result<ModelArtifact> {
    let tensors = collect_tensors(&trained.model)?
        .into_iter()
        .map(|named| {
            let (data, params) = quantize::quantize(&named.values);
            debug!(
                "Quantized '{}' {:?}: scale {:.6}, zero point {}",
                named.name, named.shape, params.scale, params.zero_point
            );
            QuantizedTensor {
                name: named.name,
                shape: named.shape,
                params,
                data,
            }
        })
        .collect();

    Ok(ModelArtifact {
        metadata: ArtifactMetadata {
            model: trained.config.clone(),
            class_names: trained.class_names.clone(),
            input: InputSpec::uint8_rgb(trained.config.image_size),
            quantization: QUANTIZATION_SCHEME.to_string(),
            created_at: Utc::now(),
            producer: format!("{} {}", env!("CARGO_PKG_NAME"), crate::VERSION),
        },
        tensors,
    })
}

/// Write `bytes` to `dir/filename` through a temporary file in `dir`
pub fn write_atomically(dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
    if filename.is_empty() || Path::new(filename).file_name() != Some(OsStr::new(filename)) {
        return Err(ClassifierError::Export(format!(
            "invalid file name '{}'",
            filename
        )));
    }
    if !dir.is_dir() {
        return Err(ClassifierError::Export(format!(
            "export directory {:?} does not exist",
            dir
        )));
    }

    let target = dir.join(filename);
    let export_err = |e: std::io::Error| {
        ClassifierError::Export(format!("failed to write {:?}: {}", target, e))
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(export_err)?;
    tmp.write_all(bytes).map_err(export_err)?;
    tmp.flush().map_err(export_err)?;
    tmp.as_file().sync_all().map_err(export_err)?;
    tmp.persist(&target).map_err(|e| export_err(e.error))?;

    Ok(target)
}

/// Quantize `trained` and write it to `dir/filename`, replacing any old file
pub fn export_model<B: Backend>(
    trained: &TrainedModel<B>,
    dir: &Path,
    filename: &str,
) -> Result<ExportSummary> {
    let artifact = build_artifact(trained)?;
    let bytes = artifact.encode()?;
    let path = write_atomically(dir, filename, &bytes)?;

    let summary = ExportSummary {
        path,
        bytes: bytes.len() as u64,
        tensors: artifact.tensors.len(),
        parameters: artifact.tensors.iter().map(|t| t.data.len()).sum(),
    };

    info!(
        "Exported {} tensors ({} parameters) to {:?}, {}",
        summary.tensors,
        summary.parameters,
        summary.path,
        format_bytes(summary.bytes)
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EfficientNetConfig, ImageClassifierConfig};
    use crate::training::TrainingState;
    use burn::backend::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn trained() -> TrainedModel<TestBackend> {
        let config = ImageClassifierConfig::new(EfficientNetConfig::tiny(), 2).with_image_size(16);
        TrainedModel {
            model: config.init(&Default::default()),
            config,
            class_names: vec!["cat".to_string(), "dog".to_string()],
            state: TrainingState::default(),
        }
    }

    #[test]
    fn test_export_writes_decodable_file() {
        let dir = TempDir::new().unwrap();
        let summary = export_model(&trained(), dir.path(), "model.tflite").unwrap();

        assert_eq!(summary.path, dir.path().join("model.tflite"));
        let on_disk = std::fs::metadata(&summary.path).unwrap().len();
        assert_eq!(on_disk, summary.bytes);
        assert!(summary.compression_ratio() > 1.0);

        let artifact = ModelArtifact::load(&summary.path).unwrap();
        assert_eq!(artifact.metadata.class_names, vec!["cat", "dog"]);
        assert_eq!(artifact.metadata.input.image_size, 16);
        assert_eq!(artifact.metadata.input.dtype, "uint8");
        assert_eq!(artifact.tensors.len(), summary.tensors);
    }

    #[test]
    fn test_export_overwrites_previous_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("model.tflite");
        std::fs::write(&target, b"old contents").unwrap();

        export_model(&trained(), dir.path(), "model.tflite").unwrap();

        assert!(ModelArtifact::load(&target).is_ok());
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_export_to_missing_directory_fails_without_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");

        let result = export_model(&trained(), &missing, "model.tflite");

        assert!(matches!(result, Err(ClassifierError::Export(_))));
        assert!(!missing.join("model.tflite").exists());
    }

    #[test]
    fn test_invalid_file_name_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(write_atomically(dir.path(), "", b"x").is_err());
        assert!(write_atomically(dir.path(), "sub/model.tflite", b"x").is_err());
    }

    #[test]
    fn test_quantized_weights_stay_close() {
        let trained = trained();
        let artifact = build_artifact(&trained).unwrap();
        let floats = collect_tensors(&trained.model).unwrap();

        for (tensor, named) in artifact.tensors.iter().zip(floats.iter()) {
            assert_eq!(tensor.name, named.name);
            let bound = tensor.params.scale * 0.5 + 1e-5;
            for (q, f) in tensor.dequantize().iter().zip(named.values.iter()) {
                assert!((q - f).abs() <= bound);
            }
        }
    }
}
