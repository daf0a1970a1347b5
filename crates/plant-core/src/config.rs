//! Configuration structures for the training pipeline.
//!
//! Every struct deserializes from TOML with missing fields falling back to
//! the defaults below, so a config file only needs the values it changes.

use crate::types::{BATCH_SIZE, IMAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable consulted for the remote dataset archive URL.
pub const DATASET_URL_ENV: &str = "PLANTVILLAGE_URL";

/// Main configuration for a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub data: DataConfig,
    pub model: ModelSettings,
    /// Phase 1: head-only transfer learning
    pub transfer: PhaseConfig,
    /// Phase 2: fine-tuning the extractor tail
    pub fine_tune: PhaseConfig,
    pub early_stopping: EarlyStoppingConfig,
    pub lr_decay: LrDecayConfig,
    /// Where artifacts, checkpoints and logs are written
    pub output_dir: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            model: ModelSettings::default(),
            transfer: PhaseConfig::transfer(),
            fine_tune: PhaseConfig::fine_tune(),
            early_stopping: EarlyStoppingConfig::default(),
            lr_decay: LrDecayConfig::default(),
            output_dir: PathBuf::from("./saved_model"),
        }
    }
}

impl TrainingConfig {
    /// Checks values that would otherwise fail deep inside a run.
    pub fn validate(&self) -> Result<(), String> {
        if self.data.batch_size == 0 {
            return Err("batch_size must be greater than 0".to_string());
        }
        let split = self.data.validation_split;
        if !(split > 0.0 && split < 1.0) {
            return Err(format!(
                "validation_split must be in (0, 1), got {}",
                split
            ));
        }
        if self.data.prefetch_batches == 0 {
            return Err("prefetch_batches must be greater than 0".to_string());
        }
        for (name, phase) in [("transfer", &self.transfer), ("fine_tune", &self.fine_tune)] {
            if phase.learning_rate <= 0.0 {
                return Err(format!("{name}.learning_rate must be positive"));
            }
        }
        if !(0.0..1.0).contains(&self.lr_decay.factor) {
            return Err(format!("lr_decay.factor must be in [0, 1), got {}", self.lr_decay.factor));
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return Err(format!("model.dropout must be in [0, 1), got {}", self.model.dropout));
        }
        Ok(())
    }
}

/// Dataset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Local PlantVillage directory (one sub-directory per class)
    pub data_dir: Option<PathBuf>,
    /// Remote `.tar.gz` archive used when no local directory is usable
    pub remote_url: Option<String>,
    /// Download and extraction cache for the remote archive
    pub cache_dir: PathBuf,
    /// Square side length images are resized to
    pub image_size: usize,
    pub batch_size: usize,
    /// Fraction of samples held out for validation
    pub validation_split: f64,
    pub seed: u64,
    /// Split each class separately instead of the whole file list
    pub stratified: bool,
    /// Batches buffered ahead of the consumer
    pub prefetch_batches: usize,
    pub augmentation: AugmentationConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            remote_url: None,
            cache_dir: PathBuf::from("./data"),
            image_size: IMAGE_SIZE,
            batch_size: BATCH_SIZE,
            validation_split: 0.2,
            seed: 42,
            stratified: false,
            prefetch_batches: 4,
            augmentation: AugmentationConfig::default(),
        }
    }
}

impl DataConfig {
    /// Remote URL from config, falling back to the environment.
    pub fn resolved_remote_url(&self) -> Option<String> {
        self.remote_url
            .clone()
            .or_else(|| std::env::var(DATASET_URL_ENV).ok())
            .filter(|url| !url.trim().is_empty())
    }
}

/// Training-time augmentation. Factors follow the usual
/// "fraction of range" convention: rotation 0.2 is ±0.2 of a full turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    pub enabled: bool,
    pub horizontal_flip: bool,
    pub rotation_factor: f32,
    pub zoom_factor: f32,
    pub contrast_factor: f32,
    pub brightness_factor: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            horizontal_flip: true,
            rotation_factor: 0.2,
            zoom_factor: 0.2,
            contrast_factor: 0.2,
            brightness_factor: 0.2,
        }
    }
}

impl AugmentationConfig {
    /// All transforms disabled
    pub fn none() -> Self {
        Self {
            enabled: false,
            horizontal_flip: false,
            rotation_factor: 0.0,
            zoom_factor: 0.0,
            contrast_factor: 0.0,
            brightness_factor: 0.0,
        }
    }
}

/// Classification head and extractor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub hidden_units: usize,
    pub dropout: f64,
    /// Channel multiplier of the extractor
    pub width_multiplier: f64,
    /// Pretrained extractor weights (burn record)
    pub pretrained_weights: Option<PathBuf>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            hidden_units: 256,
            dropout: 0.5,
            width_multiplier: 1.0,
            pretrained_weights: None,
        }
    }
}

/// Budget and optimizer settings of one phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    /// Trailing extractor layers left trainable (0 = fully frozen)
    pub unfreeze_layers: usize,
}

impl PhaseConfig {
    pub fn transfer() -> Self {
        Self {
            epochs: 10,
            learning_rate: 1e-3,
            unfreeze_layers: 0,
        }
    }

    pub fn fine_tune() -> Self {
        Self {
            epochs: 5,
            learning_rate: 1e-4,
            unfreeze_layers: 20,
        }
    }
}

/// Stop a phase when validation loss stalls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStoppingConfig {
    pub patience: usize,
    pub min_delta: f64,
    pub restore_best_weights: bool,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            patience: 3,
            min_delta: 0.0,
            restore_best_weights: true,
        }
    }
}

/// Shrink the learning rate when validation loss plateaus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LrDecayConfig {
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
    pub min_delta: f64,
}

impl Default for LrDecayConfig {
    fn default() -> Self {
        Self {
            factor: 0.2,
            patience: 2,
            min_lr: 1e-6,
            min_delta: 1e-4,
        }
    }
}
