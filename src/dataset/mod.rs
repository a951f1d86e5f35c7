//! Dataset module: discovery, splitting, decoding and preparation of images

pub mod burn_dataset;
pub mod loader;
pub mod prepare;
pub mod split;

pub use burn_dataset::{
    load_image_chw, ClassificationBatch, ClassificationBatcher, ClassificationDataset,
    ClassificationItem,
};
pub use loader::{ImageFolder, ImageSample};
pub use prepare::{prepare_images, PrepareStats};
pub use split::SplitConfig;
