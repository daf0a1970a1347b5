//! Deterministic train/validation split.
//!
//! The whole file list is shuffled with a seeded `ChaCha8Rng` and the last
//! `floor(n * validation_split)` entries become the validation set. The
//! default split is not stratified, so rare classes can end up
//! under-represented in validation; enable `stratified` to split each class
//! separately.

use std::collections::BTreeMap;

use plant_core::{Error, Result};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::dataset::LabeledImage;

/// Configuration for dataset splitting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    pub validation_split: f64,
    pub seed: u64,
    pub stratified: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            validation_split: 0.2,
            seed: 42,
            stratified: false,
        }
    }
}

/// Disjoint train and validation sets
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train: Vec<LabeledImage>,
    pub validation: Vec<LabeledImage>,
}

impl DatasetSplit {
    pub fn from_images(mut images: Vec<LabeledImage>, config: &SplitConfig) -> Result<Self> {
        if images.is_empty() {
            return Err(Error::Input("No images provided for splitting".to_string()));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        if config.stratified {
            let mut by_class: BTreeMap<usize, Vec<LabeledImage>> = BTreeMap::new();
            for image in images {
                by_class.entry(image.label).or_default().push(image);
            }

            let mut train = Vec::new();
            let mut validation = Vec::new();
            for (_, mut class_images) in by_class {
                class_images.shuffle(&mut rng);
                let num_val = validation_count(class_images.len(), config.validation_split);
                let split_at = class_images.len() - num_val;
                validation.extend(class_images.split_off(split_at));
                train.extend(class_images);
            }
            train.shuffle(&mut rng);
            return Self { train, validation }.non_empty(config);
        }

        images.shuffle(&mut rng);
        let num_val = validation_count(images.len(), config.validation_split);
        let validation = images.split_off(images.len() - num_val);
        Self {
            train: images,
            validation,
        }
        .non_empty(config)
    }

    /// Both sides must hold at least one image; an empty side would make
    /// every epoch report zero-sample metrics.
    fn non_empty(self, config: &SplitConfig) -> Result<Self> {
        if self.train.is_empty() || self.validation.is_empty() {
            return Err(Error::Input(format!(
                "Split of {} images at validation_split {} leaves {} for training and {} for validation",
                self.total(),
                config.validation_split,
                self.train.len(),
                self.validation.len()
            )));
        }
        Ok(self)
    }

    pub fn total(&self) -> usize {
        self.train.len() + self.validation.len()
    }
}

fn validation_count(n: usize, fraction: f64) -> usize {
    ((n as f64 * fraction).floor() as usize).min(n)
}
