//! Two runs on the same images with the same seed
//!
//! Kept in its own test binary: the CPU backend's seeded generator is
//! process-wide, so concurrent tests would interleave their draws.

use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use image_classifier::backend::{default_device, TrainingBackend};
use image_classifier::config::Architecture;
use image_classifier::{run_pipeline, ImageFolder, PipelineConfig, PipelineReport};

fn write_folder(root: &Path) {
    for (class, base) in [("cat", 40u8), ("dog", 200u8)] {
        let dir = root.join(class);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..20u8 {
            let img = RgbImage::from_fn(20, 20, |x, _| Rgb([base + i, base, base - (x as u8)]));
            img.save(dir.join(format!("{class}_{i:02}.png"))).unwrap();
        }
    }
}

fn run(images: &Path, out: &Path) -> PipelineReport {
    let mut config = PipelineConfig::default();
    config.data.images_dir = images.to_path_buf();
    config.data.archive = Some(images.join("train-images.zip"));
    config.data.image_size = 16;
    config.model.architecture = Architecture::Tiny;
    config.training.epochs = 2;
    config.training.batch_size = 8;
    config.export.dir = out.to_path_buf();

    run_pipeline::<TrainingBackend>(&config, &default_device()).unwrap()
}

#[test]
fn test_same_seed_gives_same_run() {
    let data = TempDir::new().unwrap();
    write_folder(data.path());

    let folder = ImageFolder::from_folder(data.path()).unwrap();
    let (train_a, test_a) = folder.split(0.9, 42).unwrap();
    let (train_b, test_b) = folder.split(0.9, 42).unwrap();
    assert_eq!(train_a.samples, train_b.samples);
    assert_eq!(test_a.samples, test_b.samples);

    let out_a = TempDir::new().unwrap();
    let out_b = TempDir::new().unwrap();
    let first = run(data.path(), out_a.path());
    let second = run(data.path(), out_b.path());

    assert_eq!(first.training.history.len(), second.training.history.len());
    for (a, b) in first.training.history.iter().zip(&second.training.history) {
        assert!((a.loss - b.loss).abs() < 1e-5, "{} vs {}", a.loss, b.loss);
        assert!((a.accuracy - b.accuracy).abs() < 1e-9);
    }
    assert!((first.evaluation.loss - second.evaluation.loss).abs() < 1e-5);
    assert!((first.evaluation.accuracy - second.evaluation.accuracy).abs() < 1e-9);
}
