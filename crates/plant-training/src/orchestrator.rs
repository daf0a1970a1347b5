//! Two-phase transfer-learning state machine.
//!
//! `Running(Transfer)` trains the head on a frozen extractor,
//! `Running(FineTune)` unfreezes the extractor tail at a lower learning rate,
//! then `Done`. The transition happens when a phase exhausts its epoch budget
//! or stops early; it never depends on the metrics themselves.

use std::path::PathBuf;

use colored::Colorize;
use plant_core::{EpochMetrics, Error, Phase, PhaseConfig, Result, TrainingConfig, TrainingHistory};
use tracing::{info, warn};

use crate::engine::{EpochData, TrainingEngine};
use crate::layers::{unfreeze_tail, ExtractorHandle, LayerPlan};
use crate::policy::{CheckpointPolicy, EarlyStopping, LrDecay, LrDecision, StopDecision};
use crate::run_log::{RunEvent, RunLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Running(Phase),
    Done,
}

/// What one phase did
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub phase: Phase,
    pub history: TrainingHistory,
    pub stopped_early: bool,
    /// Best validation accuracy, i.e. the one stored in the phase's checkpoint
    pub best_val_accuracy: Option<f64>,
    pub final_learning_rate: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TrainingReport {
    pub phases: Vec<PhaseReport>,
}

impl TrainingReport {
    pub fn total_epochs(&self) -> usize {
        self.phases.iter().map(|p| p.history.len()).sum()
    }

    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.phases
            .iter()
            .filter_map(|p| p.best_val_accuracy)
            .reduce(f64::max)
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == phase)
    }
}

/// Drives an engine through both phases.
pub struct TrainingOrchestrator<E: TrainingEngine> {
    engine: E,
    config: TrainingConfig,
    layers: LayerPlan,
    extractor: ExtractorHandle,
    run_log: RunLog,
    checkpoint_path: PathBuf,
    state: OrchestratorState,
    epochs_run: usize,
}

impl<E: TrainingEngine> TrainingOrchestrator<E> {
    pub fn new(engine: E, config: TrainingConfig, layers: LayerPlan, extractor: ExtractorHandle, run_log: RunLog) -> Self {
        let checkpoint_path = config.output_dir.join("best_model.mpk");
        Self {
            engine,
            config,
            layers,
            extractor,
            run_log,
            checkpoint_path,
            state: OrchestratorState::Running(Phase::Transfer),
            epochs_run: 0,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn checkpoint_path(&self) -> &PathBuf {
        &self.checkpoint_path
    }

    /// Runs every remaining phase to completion.
    pub fn run<D: EpochData>(&mut self, data: &D) -> Result<TrainingReport> {
        let mut report = TrainingReport::default();
        while let OrchestratorState::Running(phase) = self.state {
            let phase_config = match phase {
                Phase::Transfer => self.config.transfer.clone(),
                Phase::FineTune => self.config.fine_tune.clone(),
            };
            report.phases.push(self.run_phase(phase, &phase_config, data)?);
            self.state = match phase.next() {
                Some(next) => OrchestratorState::Running(next),
                None => OrchestratorState::Done,
            };
        }
        Ok(report)
    }

    /// Engine and the mask of the last phase
    pub fn into_parts(self) -> (E, LayerPlan) {
        (self.engine, self.layers)
    }

    fn run_phase<D: EpochData>(&mut self, phase: Phase, phase_config: &PhaseConfig, data: &D) -> Result<PhaseReport> {
        self.layers = unfreeze_tail(&self.layers, &self.extractor, phase_config.unfreeze_layers);
        self.engine.begin_phase(phase, &self.layers)?;

        println!();
        println!(
            "{}",
            format!(
                "Phase {}: {} epochs, lr {:e}, {} trainable params",
                phase,
                phase_config.epochs,
                phase_config.learning_rate,
                self.layers.trainable_params()
            )
            .cyan()
            .bold()
        );
        // Only parameterised layers count towards unfreeze_layers
        let first_unfrozen = self.layers.first_unfrozen().map(String::from);
        if let Some(id) = &first_unfrozen {
            info!(
                "Unfroze the last {} parameterised extractor layers, starting at {}",
                phase_config.unfreeze_layers.min(self.extractor.len()),
                id
            );
        }
        self.run_log.log_event(&RunEvent::PhaseStarted {
            phase,
            max_epochs: phase_config.epochs,
            learning_rate: phase_config.learning_rate,
            trainable_params: self.layers.trainable_params(),
            first_unfrozen,
        })?;

        let augment = self.layers.has_augmentation();
        let mut checkpoint = CheckpointPolicy::new();
        let mut early_stopping = EarlyStopping::new(&self.config.early_stopping);
        let mut lr_decay = LrDecay::new(&self.config.lr_decay);
        let mut best_weights: Option<E::Snapshot> = None;
        let mut learning_rate = phase_config.learning_rate;
        let mut history = TrainingHistory::new();
        let mut stopped_early = false;

        for epoch in 1..=phase_config.epochs {
            println!("{}", format!("Epoch {}/{}", epoch, phase_config.epochs).yellow().bold());

            let train = self
                .engine
                .train_pass(data.train_stream(self.epochs_run, augment), learning_rate)?;
            let val = self.engine.eval_pass(data.val_stream())?;
            self.epochs_run += 1;

            ensure_finite(phase, epoch, "train_loss", train.loss)?;
            ensure_finite(phase, epoch, "val_loss", val.loss)?;

            let metrics = EpochMetrics {
                train_loss: train.loss,
                train_accuracy: train.accuracy,
                val_loss: val.loss,
                val_accuracy: val.accuracy,
                learning_rate,
            };

            if checkpoint.observe(val.accuracy) {
                self.engine.save_checkpoint(&self.checkpoint_path)?;
                info!(
                    "val_accuracy improved to {:.4}, saved {}",
                    val.accuracy,
                    self.checkpoint_path.display()
                );
                self.run_log.log_event(&RunEvent::Checkpoint {
                    phase,
                    epoch,
                    val_accuracy: val.accuracy,
                    path: self.checkpoint_path.clone(),
                })?;
            }

            match early_stopping.observe(val.loss) {
                StopDecision::Improved if early_stopping.restore_best_weights => {
                    best_weights = Some(self.engine.snapshot());
                }
                StopDecision::Stop => stopped_early = true,
                _ => {}
            }

            if let LrDecision::Reduced { from, to } = lr_decay.observe(val.loss, learning_rate) {
                learning_rate = to;
                info!("Reducing learning rate from {:e} to {:e}", from, to);
                self.run_log.log_event(&RunEvent::LrReduced { phase, epoch, from, to })?;
            }

            history.add_epoch(metrics);
            self.run_log.log_epoch(phase, epoch, &metrics)?;
            println!(
                "  loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4} - lr: {:e}",
                metrics.train_loss, metrics.train_accuracy, metrics.val_loss, metrics.val_accuracy, metrics.learning_rate
            );

            if stopped_early {
                let restored = match best_weights.take() {
                    Some(snapshot) => {
                        self.engine.restore(snapshot);
                        true
                    }
                    None => false,
                };
                warn!(
                    "Early stopping in phase {} after epoch {} (val_loss stalled for {} epochs)",
                    phase, epoch, early_stopping.patience
                );
                if restored {
                    info!("Restored weights from the epoch with best val_loss {:.4}", early_stopping.best);
                }
                self.run_log.log_event(&RunEvent::EarlyStop {
                    phase,
                    epoch,
                    restored_best_weights: restored,
                })?;
                break;
            }
        }

        self.run_log.log_event(&RunEvent::PhaseFinished {
            phase,
            epochs_run: history.len(),
            best_val_accuracy: checkpoint.best,
        })?;

        Ok(PhaseReport {
            phase,
            history,
            stopped_early,
            best_val_accuracy: checkpoint.best,
            final_learning_rate: learning_rate,
        })
    }
}

fn ensure_finite(phase: Phase, epoch: usize, metric: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::ConvergenceAnomaly {
            phase: phase.to_string(),
            epoch,
            metric: metric.to_string(),
            value,
        })
    }
}
