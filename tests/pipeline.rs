//! End-to-end runs on a small synthetic image folder

use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use image_classifier::backend::{default_device, DefaultBackend, TrainingBackend};
use image_classifier::config::Architecture;
use image_classifier::{run_pipeline, ClassifierError, ModelArtifact, PipelineConfig, Predictor};

const PER_CLASS: usize = 50;

/// Dark images under `cat/`, bright images under `dog/`
fn write_synthetic_folder(root: &Path) {
    for (class, base) in [("cat", 30u8), ("dog", 220u8)] {
        let dir = root.join(class);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..PER_CLASS {
            let shade = base.wrapping_add((i % 10) as u8);
            let img = RgbImage::from_fn(24, 24, |x, y| {
                Rgb([shade, shade.saturating_sub((x + y) as u8), shade])
            });
            img.save(dir.join(format!("{class}_{i:03}.png"))).unwrap();
        }
    }
}

fn quick_config(images_dir: PathBuf, export_dir: PathBuf) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.data.images_dir = images_dir;
    config.data.archive = Some(PathBuf::from("train-images.zip"));
    config.data.image_size = 32;
    config.model.architecture = Architecture::Tiny;
    config.training.epochs = 3;
    config.training.batch_size = 10;
    config.training.learning_rate = 0.01;
    config.export.dir = export_dir;
    config
}

#[test]
fn test_full_run_exports_loadable_model() {
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_synthetic_folder(data.path());

    let config = quick_config(data.path().to_path_buf(), out.path().to_path_buf());
    let report = run_pipeline::<TrainingBackend>(&config, &default_device()).unwrap();

    assert_eq!(report.class_names, vec!["cat".to_string(), "dog".to_string()]);
    assert_eq!(report.train_samples, 90);
    assert_eq!(report.test_samples, 10);
    assert_eq!(report.training.history.len(), 3);
    assert!((0.0..=1.0).contains(&report.evaluation.accuracy));
    assert_eq!(report.evaluation.samples, 10);

    let model_path = out.path().join("model.tflite");
    assert_eq!(report.export.path, model_path);
    let size = fs::metadata(&model_path).unwrap().len();
    assert!(size > 0);
    assert_eq!(size, report.export.bytes);

    let artifact = ModelArtifact::load(&model_path).unwrap();
    assert_eq!(artifact.metadata.class_names, report.class_names);
    assert_eq!(artifact.metadata.input.image_size, 32);

    let predictor = Predictor::<DefaultBackend>::load(&model_path, &default_device()).unwrap();
    let prediction = predictor
        .predict_path(&data.path().join("dog").join("dog_000.png"))
        .unwrap();
    assert!(prediction.label < 2);
    assert!(report.class_names.contains(&prediction.class_name));
    let total: f32 = prediction.probabilities.iter().sum();
    assert!((total - 1.0).abs() < 1e-3);
}

#[test]
fn test_empty_folder_fails_with_no_data() {
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    let config = quick_config(data.path().to_path_buf(), out.path().to_path_buf());
    let err = run_pipeline::<TrainingBackend>(&config, &default_device()).unwrap_err();
    assert!(matches!(err, ClassifierError::NoData(_)));

    let missing = quick_config(data.path().join("absent"), out.path().to_path_buf());
    let err = run_pipeline::<TrainingBackend>(&missing, &default_device()).unwrap_err();
    assert!(matches!(err, ClassifierError::NoData(_)));

    assert!(!out.path().join("model.tflite").exists());
}

#[test]
fn test_unwritable_export_dir_leaves_no_file() {
    let data = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    write_synthetic_folder(data.path());

    let export_dir = out.path().join("missing");
    let mut config = quick_config(data.path().to_path_buf(), export_dir.clone());
    config.training.epochs = 1;

    let err = run_pipeline::<TrainingBackend>(&config, &default_device()).unwrap_err();
    assert!(matches!(err, ClassifierError::Export(_)));
    assert!(!export_dir.join("model.tflite").exists());
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}
