//! Sample and batch types flowing through the pipeline.

use std::path::PathBuf;

use plant_core::{ImageDimensions, LabelSet, Result};
use serde::{Deserialize, Serialize};

/// An image file paired with its class index, before decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledImage {
    pub path: PathBuf,
    pub label: usize,
}

impl LabeledImage {
    pub fn new(path: impl Into<PathBuf>, label: usize) -> Self {
        Self {
            path: path.into(),
            label,
        }
    }
}

/// A decoded, preprocessed sample. Pixels are channel-major in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSample {
    pub pixels: Vec<f32>,
    pub dims: ImageDimensions,
    pub label: usize,
    /// One-hot encoding of `label` over the class set
    pub target: Vec<f32>,
}

impl ImageSample {
    /// Builds a sample, rejecting labels outside the class set.
    pub fn new(pixels: Vec<f32>, dims: ImageDimensions, label: usize, labels: &LabelSet) -> Result<Self> {
        let target = labels.one_hot(label)?;
        Ok(Self {
            pixels,
            dims,
            label,
            target,
        })
    }
}

/// One batch as produced by a stream (the last batch of an epoch may be short).
#[derive(Debug, Clone)]
pub struct SampleBatch {
    pub samples: Vec<ImageSample>,
}

impl SampleBatch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
