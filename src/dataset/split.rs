//! Train/test splitting
//!
//! The split is a seeded shuffle of sample indices followed by a cut at
//! `floor(fraction * N)`. Given the same folder and seed it is reproducible.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::loader::ImageFolder;
use crate::utils::error::{ClassifierError, Result};

/// Configuration for dataset splitting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of samples used for training
    pub train_fraction: f64,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            train_fraction: crate::DEFAULT_SPLIT_FRACTION,
            seed: crate::DEFAULT_SEED,
        }
    }
}

impl SplitConfig {
    /// Create a split configuration, rejecting fractions outside (0, 1)
    pub fn new(train_fraction: f64, seed: u64) -> Result<Self> {
        let config = Self {
            train_fraction,
            seed,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the fraction lies strictly between 0 and 1
    pub fn validate(&self) -> Result<()> {
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(ClassifierError::Config(format!(
                "Train fraction must be between 0.0 and 1.0 (exclusive), got {}",
                self.train_fraction
            )));
        }
        Ok(())
    }

    /// Number of training samples for a dataset of `total` samples
    pub fn train_count(&self, total: usize) -> usize {
        ((self.train_fraction * total as f64).floor() as usize).min(total)
    }
}

impl ImageFolder {
    /// Split into `(train, test)` with `floor(fraction * len)` training samples
    ///
    /// Both halves keep the full class list, so labels stay comparable even
    /// when a class ends up absent from the test half.
    pub fn split(&self, fraction: f64, seed: u64) -> Result<(ImageFolder, ImageFolder)> {
        let config = SplitConfig::new(fraction, seed)?;

        let mut indices: Vec<usize> = (0..self.len()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        indices.shuffle(&mut rng);

        let n_train = config.train_count(indices.len());
        let (train_idx, test_idx) = indices.split_at(n_train);

        let pick = |idx: &[usize]| {
            ImageFolder::from_samples(
                self.root_dir.clone(),
                idx.iter().map(|&i| self.samples[i].clone()).collect(),
                self.class_names.clone(),
            )
        };
        let train = pick(train_idx);
        let test = pick(test_idx);

        info!(
            "Split {} samples into {} train / {} test (fraction {}, seed {})",
            self.len(),
            train.len(),
            test.len(),
            config.train_fraction,
            config.seed
        );

        Ok((train, test))
    }
}
