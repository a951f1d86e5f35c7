//! Model module for the classifier architecture using the Burn framework
//!
//! This module provides:
//! - An EfficientNet-Lite backbone built from MBConv blocks
//! - The classification head placed on top of it
//!
//! The defaults mirror a mobile image classifier: 224x224 RGB input,
//! ReLU6 activations and dropout 0.2 before the final linear layer.

pub mod classifier;
pub mod efficientnet;

// Re-export main types for convenience
pub use classifier::{ImageClassifier, ImageClassifierConfig};
pub use efficientnet::{EfficientNet, EfficientNetConfig, StageConfig};
