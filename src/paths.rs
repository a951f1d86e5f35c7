//! Path resolution relative to the working directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::utils::error::Result;

/// Archive the images were originally shipped in. Resolved but never opened.
pub const DEFAULT_ARCHIVE: &str = "train-images.zip";

/// Directory of `<class>/<image>` training images
pub const DEFAULT_IMAGES_DIR: &str = "train-images";

/// File name of the exported model
pub const DEFAULT_EXPORT_FILE: &str = "model.tflite";

/// Locations used by one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspacePaths {
    /// Absolute path of the image archive
    pub archive: PathBuf,
    /// Directory holding one sub-directory per class
    pub images_dir: PathBuf,
    /// Directory the model is exported into
    pub export_dir: PathBuf,
    /// File name of the exported model
    pub export_file: String,
}

impl WorkspacePaths {
    /// Resolve the locations of `config` against `cwd`. Nothing is validated here.
    ///
    /// Only the archive is made absolute; the image and export directories
    /// stay as configured.
    pub fn resolve(cwd: &Path, config: &PipelineConfig) -> Self {
        let archive = match &config.data.archive {
            Some(archive) => cwd.join(archive),
            None => cwd.join(DEFAULT_ARCHIVE),
        };

        Self {
            archive,
            images_dir: config.data.images_dir.clone(),
            export_dir: config.export.dir.clone(),
            export_file: config.export.filename.clone(),
        }
    }

    /// Resolve against the process working directory
    pub fn from_current_dir(config: &PipelineConfig) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Ok(Self::resolve(&cwd, config))
    }

    /// Full path of the exported model
    pub fn export_path(&self) -> PathBuf {
        self.export_dir.join(&self.export_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_default_layout() {
        let paths = WorkspacePaths::resolve(Path::new("/work/project"), &PipelineConfig::default());

        assert_eq!(paths.archive, PathBuf::from("/work/project/train-images.zip"));
        assert!(paths.archive.is_absolute());
        assert_eq!(paths.images_dir, PathBuf::from("./train-images"));
        assert_eq!(paths.export_path(), PathBuf::from("./model.tflite"));
    }

    #[test]
    fn test_resolve_follows_config() {
        let mut config = PipelineConfig::default();
        config.data.archive = Some(PathBuf::from("data/photos.zip"));
        config.data.images_dir = PathBuf::from("photos");
        config.export.dir = PathBuf::from("/tmp/out");
        config.export.filename = "cats.tflite".to_string();

        let paths = WorkspacePaths::resolve(Path::new("/work"), &config);

        assert_eq!(paths.archive, PathBuf::from("/work/data/photos.zip"));
        assert_eq!(paths.images_dir, PathBuf::from("photos"));
        assert_eq!(paths.export_path(), PathBuf::from("/tmp/out/cats.tflite"));
    }

    #[test]
    fn test_resolve_does_not_touch_filesystem() {
        let paths =
            WorkspacePaths::resolve(Path::new("/definitely/not/here"), &PipelineConfig::default());
        assert!(!paths.archive.exists());
    }

    #[test]
    fn test_from_current_dir_is_absolute() {
        let paths = WorkspacePaths::from_current_dir(&PipelineConfig::default()).unwrap();
        assert!(paths.archive.is_absolute());
        assert!(paths.archive.ends_with("train-images.zip"));
    }
}
