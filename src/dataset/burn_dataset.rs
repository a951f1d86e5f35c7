//! Burn Dataset Integration
//!
//! This module implements Burn's Dataset trait and Batcher for the decoded
//! images. Every image is resized to a square, converted to RGB and stored
//! in CHW order, normalized with `(pixel - 127.5) / 127.5`.

use std::path::Path;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::imageops::FilterType;
use image::{ImageReader, RgbImage};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::loader::ImageFolder;
use crate::utils::error::{ClassifierError, Result};

/// Mean subtracted from every 8-bit channel value
pub const INPUT_MEAN: f32 = 127.5;

/// Divisor applied after the mean is subtracted
pub const INPUT_STD: f32 = 127.5;

/// Decode an image file and resize it exactly to `image_size²` RGB pixels
pub fn decode_resized(path: &Path, image_size: usize) -> Result<RgbImage> {
    let load_err = |msg: String| ClassifierError::ImageLoad(path.to_path_buf(), msg);

    let img = ImageReader::open(path)
        .map_err(|e| load_err(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| load_err(e.to_string()))?
        .decode()
        .map_err(|e| load_err(e.to_string()))?;

    Ok(img
        .resize_exact(image_size as u32, image_size as u32, FilterType::Triangle)
        .to_rgb8())
}

/// Flatten an RGB image into CHW floats computed as `(pixel - mean) / std`
pub fn rgb_to_chw(img: &RgbImage, mean: f32, std: f32) -> Vec<f32> {
    let (width, height) = (img.width() as usize, img.height() as usize);
    let plane = width * height;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in img.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        for channel in 0..3 {
            data[channel * plane + offset] = (pixel[channel] as f32 - mean) / std;
        }
    }

    data
}

/// Decode an image file into normalized CHW floats of `image_size²` pixels
pub fn load_image_chw(path: &Path, image_size: usize) -> Result<Vec<f32>> {
    let img = decode_resized(path, image_size)?;
    Ok(rgb_to_chw(&img, INPUT_MEAN, INPUT_STD))
}

/// A single decoded image ready for Burn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassificationItem {
    /// Image data as flattened CHW float array [3 * H * W]
    pub image: Vec<f32>,
    /// Class label
    pub label: usize,
    /// Image path (for debugging/logging)
    pub path: String,
}

impl ClassificationItem {
    /// Create a new item by loading and preprocessing an image
    pub fn from_path(path: &Path, label: usize, image_size: usize) -> Result<Self> {
        Ok(Self {
            image: load_image_chw(path, image_size)?,
            label,
            path: path.to_string_lossy().to_string(),
        })
    }

    /// Create from pre-loaded image data
    pub fn from_data(image: Vec<f32>, label: usize, path: String) -> Self {
        Self { image, label, path }
    }
}

/// In-memory dataset of decoded images implementing Burn's Dataset trait
#[derive(Debug, Clone)]
pub struct ClassificationDataset {
    items: Vec<ClassificationItem>,
    image_size: usize,
}

impl ClassificationDataset {
    /// Decode every sample of `folder` into memory
    ///
    /// A file that cannot be decoded fails the whole load, naming the path.
    pub fn load(folder: &ImageFolder, image_size: usize) -> Result<Self> {
        let total = folder.len();
        info!("Decoding {} images at {}x{}", total, image_size, image_size);

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .map_err(|e| ClassifierError::Dataset(e.to_string()))?
                .progress_chars("#>-"),
        );

        let mut items = Vec::with_capacity(total);
        for sample in &folder.samples {
            items.push(ClassificationItem::from_path(
                &sample.path,
                sample.label,
                image_size,
            )?);
            pb.inc(1);
        }
        pb.finish_and_clear();

        Ok(Self { items, image_size })
    }

    /// Create from already-decoded items
    pub fn from_items(items: Vec<ClassificationItem>, image_size: usize) -> Self {
        Self { items, image_size }
    }

    /// Side length of every image in the dataset
    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Get samples per class count
    pub fn class_distribution(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_classes];
        for item in &self.items {
            if item.label < num_classes {
                counts[item.label] += 1;
            }
        }
        counts
    }
}

impl Dataset<ClassificationItem> for ClassificationDataset {
    fn get(&self, index: usize) -> Option<ClassificationItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A batch of images for training or evaluation
#[derive(Clone, Debug)]
pub struct ClassificationBatch<B: Backend> {
    /// Batch of images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Batch of labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Batcher stacking decoded items into tensors
#[derive(Clone, Debug)]
pub struct ClassificationBatcher {
    image_size: usize,
}

impl ClassificationBatcher {
    /// Create a batcher for square images of `image_size` pixels
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, ClassificationItem, ClassificationBatch<B>> for ClassificationBatcher {
    fn batch(&self, items: Vec<ClassificationItem>, device: &B::Device) -> ClassificationBatch<B> {
        let batch_size = items.len();

        let images_data: Vec<f32> = items
            .iter()
            .flat_map(|item| item.image.iter().copied())
            .collect();

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(
                images_data,
                [batch_size, 3, self.image_size, self.image_size],
            ),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ClassificationBatch { images, targets }
    }
}
