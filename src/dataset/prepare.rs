//! Dataset Preparation Module
//!
//! Resizes a raw image tree into the training layout. Sub-directories of the
//! input are mirrored into the output, and every image is scaled to cover a
//! `size`×`size` square (center crop) and saved as JPEG.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::ImageReader;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::utils::error::{ClassifierError, Result};

/// Extensions picked up by [`prepare_images`]
const SOURCE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

/// Statistics about one preparation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareStats {
    /// Directories created under the output root
    pub directories: usize,
    /// Images resized and written
    pub written: usize,
    /// Images that could not be read or written
    pub skipped: usize,
}

fn is_source_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Output location of `relative` with its extension replaced by `.jpg`
fn output_path(output_dir: &Path, relative: &Path) -> PathBuf {
    output_dir.join(relative).with_extension("jpg")
}

fn resize_one(source: &Path, target: &Path, size: u32) -> Result<()> {
    let img = ImageReader::open(source)
        .map_err(|e| ClassifierError::ImageLoad(source.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| ClassifierError::ImageLoad(source.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| ClassifierError::ImageLoad(source.to_path_buf(), e.to_string()))?;

    // JPEG has no alpha channel
    let resized = img.resize_to_fill(size, size, FilterType::Lanczos3).to_rgb8();
    resized
        .save_with_format(target, image::ImageFormat::Jpeg)
        .map_err(|e| ClassifierError::Dataset(format!("Failed to write {:?}: {}", target, e)))
}

/// Resize every image under `input_dir` into `output_dir`
///
/// `input/cat/a.png` becomes `output/cat/a.jpg`. Images that cannot be
/// decoded are skipped with a warning; a missing input directory is an error.
pub fn prepare_images(input_dir: &Path, output_dir: &Path, size: u32) -> Result<PrepareStats> {
    if !input_dir.is_dir() {
        return Err(ClassifierError::NoData(input_dir.to_path_buf()));
    }
    if size == 0 {
        return Err(ClassifierError::Config(
            "Target image size must be positive".to_string(),
        ));
    }

    info!(
        "Resizing images from {:?} into {:?} at {}x{}",
        input_dir, output_dir, size, size
    );
    fs::create_dir_all(output_dir)?;

    let mut stats = PrepareStats::default();

    for entry in WalkDir::new(input_dir).min_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        let relative = match entry.path().strip_prefix(input_dir) {
            Ok(relative) => relative,
            Err(_) => continue,
        };

        if entry.file_type().is_dir() {
            fs::create_dir_all(output_dir.join(relative))?;
            stats.directories += 1;
            continue;
        }

        if !is_source_image(entry.path()) {
            continue;
        }

        let target = output_path(output_dir, relative);
        match resize_one(entry.path(), &target, size) {
            Ok(()) => {
                debug!("Wrote {:?}", target);
                stats.written += 1;
            }
            Err(e) => {
                warn!("Skipping {:?}: {}", entry.path(), e);
                stats.skipped += 1;
            }
        }
    }

    info!(
        "Prepared {} images ({} skipped, {} directories)",
        stats.written, stats.skipped, stats.directories
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    #[test]
    fn test_prepare_mirrors_tree_and_resizes() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input");
        let output = dir.path().join("train-images");
        fs::create_dir_all(input.join("cat")).unwrap();
        fs::create_dir_all(input.join("dog")).unwrap();
        RgbaImage::from_pixel(40, 20, Rgba([200, 10, 10, 255]))
            .save(input.join("cat/one.png"))
            .unwrap();
        RgbaImage::from_pixel(10, 30, Rgba([10, 10, 200, 128]))
            .save(input.join("dog/two.PNG"))
            .unwrap();
        fs::write(input.join("dog/readme.txt"), b"skip me").unwrap();

        let stats = prepare_images(&input, &output, 16).unwrap();

        assert_eq!(stats.written, 2);
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.directories, 2);

        let cat = image::open(output.join("cat/one.jpg")).unwrap();
        assert_eq!((cat.width(), cat.height()), (16, 16));
        assert!(output.join("dog/two.jpg").exists());
        assert!(!output.join("dog/readme.jpg").exists());
    }

    #[test]
    fn test_prepare_skips_undecodable_images() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input");
        fs::create_dir_all(input.join("cat")).unwrap();
        fs::write(input.join("cat/fake.jpg"), b"garbage").unwrap();

        let stats = prepare_images(&input, &dir.path().join("out"), 8).unwrap();

        assert_eq!(stats.written, 0);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn test_prepare_missing_input() {
        let dir = TempDir::new().unwrap();
        let result = prepare_images(&dir.path().join("nope"), &dir.path().join("out"), 8);
        assert!(matches!(result, Err(ClassifierError::NoData(_))));
    }

    #[test]
    fn test_output_path_replaces_extension() {
        let p = output_path(Path::new("out"), Path::new("cat/a.b.png"));
        assert_eq!(p, PathBuf::from("out/cat/a.b.jpg"));
    }
}
