//! Per-run log directory: `logs/<%Y%m%d-%H%M%S>/` with `metrics.csv`,
//! `events.jsonl` and a `run.json` config snapshot.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use plant_core::{EpochMetrics, Phase, Result};
use serde::Serialize;
use tracing::{debug, info};

const METRICS_HEADER: &str = "phase,epoch,train_loss,train_accuracy,val_loss,val_accuracy,learning_rate,timestamp";

/// Something worth recording besides the per-epoch metrics
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    PhaseStarted {
        phase: Phase,
        max_epochs: usize,
        learning_rate: f64,
        trainable_params: usize,
        /// Earliest trainable extractor layer; absent while the extractor is frozen
        #[serde(skip_serializing_if = "Option::is_none")]
        first_unfrozen: Option<String>,
    },
    Epoch {
        phase: Phase,
        epoch: usize,
        #[serde(flatten)]
        metrics: EpochMetrics,
    },
    Checkpoint {
        phase: Phase,
        epoch: usize,
        val_accuracy: f64,
        path: PathBuf,
    },
    LrReduced {
        phase: Phase,
        epoch: usize,
        from: f64,
        to: f64,
    },
    EarlyStop {
        phase: Phase,
        epoch: usize,
        restored_best_weights: bool,
    },
    PhaseFinished {
        phase: Phase,
        epochs_run: usize,
        best_val_accuracy: Option<f64>,
    },
}

#[derive(Serialize)]
struct EventLine<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a RunEvent,
}

/// Append-only logs of one training run
pub struct RunLog {
    dir: PathBuf,
    metrics: File,
    events: File,
}

impl RunLog {
    /// Creates a fresh timestamped run directory under `root`.
    pub fn create(root: &Path) -> Result<Self> {
        let run_id = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let mut dir = root.join(&run_id);
        let mut suffix = 1;
        while dir.exists() {
            dir = root.join(format!("{run_id}-{suffix}"));
            suffix += 1;
        }
        fs::create_dir_all(&dir)?;

        let mut metrics = open_append(&dir.join("metrics.csv"))?;
        writeln!(metrics, "{METRICS_HEADER}")?;
        let events = open_append(&dir.join("events.jsonl"))?;

        info!("Run logs: {}", dir.display());
        Ok(Self { dir, metrics, events })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot of the configuration the run was started with
    pub fn write_config<T: Serialize>(&self, config: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        fs::write(self.dir.join("run.json"), json)?;
        Ok(())
    }

    /// One CSV row plus an `epoch` event; `epoch` is 1-based
    pub fn log_epoch(&mut self, phase: Phase, epoch: usize, metrics: &EpochMetrics) -> Result<()> {
        writeln!(
            self.metrics,
            "{},{},{:.6},{:.6},{:.6},{:.6},{:e},{}",
            phase,
            epoch,
            metrics.train_loss,
            metrics.train_accuracy,
            metrics.val_loss,
            metrics.val_accuracy,
            metrics.learning_rate,
            Utc::now().to_rfc3339()
        )?;
        self.metrics.flush()?;

        self.log_event(&RunEvent::Epoch {
            phase,
            epoch,
            metrics: *metrics,
        })
    }

    pub fn log_event(&mut self, event: &RunEvent) -> Result<()> {
        let line = serde_json::to_string(&EventLine {
            timestamp: Utc::now().to_rfc3339(),
            event,
        })?;
        writeln!(self.events, "{line}")?;
        self.events.flush()?;
        debug!("{line}");
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metrics() -> EpochMetrics {
        EpochMetrics {
            train_loss: 1.25,
            train_accuracy: 0.5,
            val_loss: 1.5,
            val_accuracy: 0.4,
            learning_rate: 1e-3,
        }
    }

    #[test]
    fn test_metrics_csv() {
        let root = TempDir::new().unwrap();
        let mut log = RunLog::create(root.path()).unwrap();
        log.log_epoch(Phase::Transfer, 1, &metrics()).unwrap();
        log.log_epoch(Phase::FineTune, 1, &metrics()).unwrap();

        let csv = fs::read_to_string(log.dir().join("metrics.csv")).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], METRICS_HEADER);
        assert!(lines[1].starts_with("transfer,1,1.250000,0.500000,1.500000,0.400000,1e-3,"));
        assert!(lines[2].starts_with("fine_tune,1,"));
    }

    #[test]
    fn test_events_jsonl() {
        let root = TempDir::new().unwrap();
        let mut log = RunLog::create(root.path()).unwrap();
        log.log_epoch(Phase::Transfer, 2, &metrics()).unwrap();
        log.log_event(&RunEvent::LrReduced {
            phase: Phase::Transfer,
            epoch: 2,
            from: 1e-3,
            to: 2e-4,
        })
        .unwrap();

        let text = fs::read_to_string(log.dir().join("events.jsonl")).unwrap();
        let events: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "epoch");
        assert_eq!(events[0]["phase"], "transfer");
        assert_eq!(events[0]["val_accuracy"], 0.4);
        assert_eq!(events[1]["event"], "lr_reduced");
        assert!(events[1]["timestamp"].is_string());
    }

    #[test]
    fn test_same_second_runs_get_distinct_dirs() {
        let root = TempDir::new().unwrap();
        let a = RunLog::create(root.path()).unwrap();
        let b = RunLog::create(root.path()).unwrap();
        assert_ne!(a.dir(), b.dir());
    }
}
