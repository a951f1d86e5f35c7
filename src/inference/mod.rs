//! Inference module for classifying images with an exported model

pub mod predictor;

// Re-export main types for convenience
pub use predictor::{Prediction, Predictor};
