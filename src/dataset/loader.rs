//! Image Folder Loader
//!
//! Discovers labeled images laid out as `root/<class>/<image>`. Only paths
//! and labels are collected here; pixels are decoded by
//! [`ClassificationDataset`](super::burn_dataset::ClassificationDataset).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::utils::error::{ClassifierError, Result};

/// File extensions recognized as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "gif"];

/// A single image sample with its label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label index into the sorted class names
    pub label: usize,
    /// Class name (name of the parent directory)
    pub class_name: String,
}

/// Labeled images discovered under a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFolder {
    /// Directory the samples were discovered in
    pub root_dir: PathBuf,
    /// All samples, ordered by path
    pub samples: Vec<ImageSample>,
    /// Sorted class names; a label indexes into this list
    pub class_names: Vec<String>,
}

/// Returns true when the path carries one of [`IMAGE_EXTENSIONS`]
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

impl ImageFolder {
    /// Discover every labeled image under `root_dir`
    ///
    /// The directory should be structured as:
    /// ```text
    /// root_dir/
    /// ├── cat/
    /// │   ├── image1.jpg
    /// │   └── image2.png
    /// └── dog/
    ///     └── ...
    /// ```
    ///
    /// Files directly inside `root_dir` have no class and are ignored. An
    /// image's label is the name of its immediate parent directory.
    pub fn from_folder<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Loading images from: {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(ClassifierError::NoData(root_dir));
        }

        let mut found: Vec<(PathBuf, String)> = Vec::new();
        for entry in WalkDir::new(&root_dir).min_depth(2).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !is_image_file(entry.path()) {
                continue;
            }

            let class_name = entry
                .path()
                .parent()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string());

            if let Some(class_name) = class_name {
                found.push((entry.path().to_path_buf(), class_name));
            }
        }

        if found.is_empty() {
            return Err(ClassifierError::NoData(root_dir));
        }

        found.sort_by(|a, b| a.0.cmp(&b.0));

        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for (_, class_name) in &found {
            *counts.entry(class_name.clone()).or_insert(0) += 1;
        }
        let class_names: Vec<String> = counts.keys().cloned().collect();

        let samples: Vec<ImageSample> = found
            .into_iter()
            .map(|(path, class_name)| {
                // Every class name came from `found`, so the search always hits
                let label = class_names.binary_search(&class_name).unwrap_or_default();
                ImageSample {
                    path,
                    label,
                    class_name,
                }
            })
            .collect();

        info!(
            "Found {} images in {} classes",
            samples.len(),
            class_names.len()
        );
        for (label, (name, count)) in counts.iter().enumerate() {
            debug!("Class '{}' (label {}): {} images", name, label, count);
        }

        Ok(Self {
            root_dir,
            samples,
            class_names,
        })
    }

    /// Build a folder from already-known samples and classes
    pub fn from_samples(
        root_dir: PathBuf,
        samples: Vec<ImageSample>,
        class_names: Vec<String>,
    ) -> Self {
        Self {
            root_dir,
            samples,
            class_names,
        }
    }

    /// Get the number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if there are no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Get the number of classes
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Number of samples per label
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.num_classes()];
        for sample in &self.samples {
            if sample.label < counts.len() {
                counts[sample.label] += 1;
            }
        }
        counts
    }
}
