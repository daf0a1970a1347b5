//! The seam between the phase/epoch state machine and the numerics.

use std::path::Path;

use plant_core::{Phase, Result};
use plant_dataset::{BatchStream, DatasetPipeline, SampleBatch};

use crate::layers::LayerPlan;

/// Mean loss and accuracy over one full pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassSummary {
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}

impl PassSummary {
    pub fn empty() -> Self {
        Self {
            loss: 0.0,
            accuracy: 0.0,
            samples: 0,
        }
    }
}

/// Per-epoch batch streams
pub trait EpochData {
    type Stream: Iterator<Item = Result<SampleBatch>>;

    /// Training batches for global epoch `epoch`
    fn train_stream(&self, epoch: usize, augment: bool) -> Self::Stream;

    /// Validation batches; identical on every call
    fn val_stream(&self) -> Self::Stream;
}

impl EpochData for DatasetPipeline {
    type Stream = BatchStream;

    fn train_stream(&self, epoch: usize, augment: bool) -> BatchStream {
        DatasetPipeline::train_stream(self, epoch, augment)
    }

    fn val_stream(&self) -> BatchStream {
        DatasetPipeline::val_stream(self)
    }
}

/// Owns the model parameters and optimizer state for the whole run.
pub trait TrainingEngine {
    /// In-memory copy of the parameters
    type Snapshot;

    /// Applies the phase's trainable mask and starts a fresh optimizer.
    fn begin_phase(&mut self, phase: Phase, layers: &LayerPlan) -> Result<()>;

    /// One optimization step per batch; batch errors abort the pass.
    fn train_pass<I>(&mut self, batches: I, learning_rate: f64) -> Result<PassSummary>
    where
        I: Iterator<Item = Result<SampleBatch>>;

    /// Forward-only pass in inference mode
    fn eval_pass<I>(&mut self, batches: I) -> Result<PassSummary>
    where
        I: Iterator<Item = Result<SampleBatch>>;

    fn snapshot(&self) -> Self::Snapshot;

    fn restore(&mut self, snapshot: Self::Snapshot);

    /// Persists the current parameters as a standalone artifact
    fn save_checkpoint(&self, path: &Path) -> Result<()>;
}
