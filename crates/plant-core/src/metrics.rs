//! Per-epoch metrics and phase histories.

use serde::{Deserialize, Serialize};

/// The four scalars produced by one epoch, plus the learning rate it ran at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
}

/// Metrics history of one phase
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_epoch(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    /// Number of epochs that actually ran
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Best validation accuracy
    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.epochs.iter().map(|m| m.val_accuracy).reduce(f64::max)
    }

    /// Epoch index (0-based) with best validation accuracy
    pub fn best_epoch(&self) -> Option<usize> {
        self.epochs
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.val_accuracy.total_cmp(&b.val_accuracy))
            .map(|(idx, _)| idx)
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}
