//! Epoch-end policies: best-checkpoint tracking, early stopping and
//! learning-rate decay on plateau.
//!
//! Each policy is a plain state record. The orchestrator feeds it the epoch's
//! validation metrics in a fixed order (checkpoint, early stop, decay) and acts
//! on the returned decision. Every phase starts with fresh records.

use plant_core::{EarlyStoppingConfig, LrDecayConfig};
use serde::{Deserialize, Serialize};

/// Tracks the best validation accuracy of a phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointPolicy {
    pub best: Option<f64>,
}

impl CheckpointPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `val_accuracy` strictly beats everything seen so far. The
    /// caller persists the artifact on `true`.
    pub fn observe(&mut self, val_accuracy: f64) -> bool {
        let improved = self.best.map_or(true, |best| val_accuracy > best);
        if improved {
            self.best = Some(val_accuracy);
        }
        improved
    }
}

/// Outcome of one early-stopping observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    /// New best validation loss; snapshot the weights
    Improved,
    Continue,
    /// Patience exhausted; end the phase
    Stop,
}

/// Stops a phase once validation loss has not improved for `patience` epochs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub patience: usize,
    pub min_delta: f64,
    pub restore_best_weights: bool,
    pub best: f64,
    pub counter: usize,
}

impl EarlyStopping {
    pub fn new(config: &EarlyStoppingConfig) -> Self {
        Self {
            patience: config.patience,
            min_delta: config.min_delta,
            restore_best_weights: config.restore_best_weights,
            best: f64::INFINITY,
            counter: 0,
        }
    }

    pub fn observe(&mut self, val_loss: f64) -> StopDecision {
        if val_loss < self.best - self.min_delta {
            self.best = val_loss;
            self.counter = 0;
            return StopDecision::Improved;
        }

        self.counter += 1;
        if self.counter >= self.patience {
            StopDecision::Stop
        } else {
            StopDecision::Continue
        }
    }
}

/// Outcome of one decay observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LrDecision {
    Unchanged,
    Reduced { from: f64, to: f64 },
}

/// Multiplies the learning rate by `factor` after `patience` epochs without
/// improvement, never going below `min_lr`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LrDecay {
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
    pub min_delta: f64,
    pub best: f64,
    pub counter: usize,
}

impl LrDecay {
    pub fn new(config: &LrDecayConfig) -> Self {
        Self {
            factor: config.factor,
            patience: config.patience,
            min_lr: config.min_lr,
            min_delta: config.min_delta,
            best: f64::INFINITY,
            counter: 0,
        }
    }

    pub fn observe(&mut self, val_loss: f64, lr: f64) -> LrDecision {
        if val_loss < self.best - self.min_delta {
            self.best = val_loss;
            self.counter = 0;
            return LrDecision::Unchanged;
        }

        self.counter += 1;
        if self.counter < self.patience {
            return LrDecision::Unchanged;
        }

        self.counter = 0;
        let reduced = (lr * self.factor).max(self.min_lr);
        if reduced < lr {
            LrDecision::Reduced { from: lr, to: reduced }
        } else {
            LrDecision::Unchanged
        }
    }
}
