//! Core type definitions shared across the workspace.

use serde::{Deserialize, Serialize};

/// Input resolution of the classifier (square).
pub const IMAGE_SIZE: usize = 224;

/// Default number of samples per batch.
pub const BATCH_SIZE: usize = 32;

/// Image dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self { width, height, channels }
    }

    /// Square RGB input of the given side length
    pub fn square(size: usize) -> Self {
        Self::new(size as u32, size as u32, 3)
    }

    /// Total number of values per image
    pub fn num_values(&self) -> usize {
        (self.width * self.height * self.channels) as usize
    }

    /// Tensor shape in channel-major order
    pub fn chw(&self) -> [usize; 3] {
        [self.channels as usize, self.height as usize, self.width as usize]
    }
}

impl Default for ImageDimensions {
    fn default() -> Self {
        Self::square(IMAGE_SIZE)
    }
}

/// Training phases, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Frozen extractor, head-only training
    Transfer,
    /// Tail of the extractor unfrozen, lower learning rate
    FineTune,
}

impl Phase {
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Transfer => Some(Phase::FineTune),
            Phase::FineTune => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Transfer => write!(f, "transfer"),
            Phase::FineTune => write!(f, "fine_tune"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_dimensions() {
        let dims = ImageDimensions::default();
        assert_eq!(dims.num_values(), 224 * 224 * 3);
        assert_eq!(dims.chw(), [3, 224, 224]);
    }

    #[test]
    fn test_phase_order() {
        assert_eq!(Phase::Transfer.next(), Some(Phase::FineTune));
        assert_eq!(Phase::FineTune.next(), None);
        assert_eq!(Phase::FineTune.to_string(), "fine_tune");
    }
}
