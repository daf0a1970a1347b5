//! Files written under the output directory and how to read them back.

use std::fs;
use std::path::{Path, PathBuf};

use burn::config::Config;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, PrettyJsonFileRecorder};
use plant_core::{Error, LabelSet, Result};
use tracing::info;

use crate::builder::ClassifierModel;
use crate::layers::LayerPlan;
use crate::model::{ClassifierConfig, PlantClassifier};

pub const FINAL_MODEL: &str = "plant_disease_model";
pub const BEST_MODEL: &str = "best_model.mpk";
pub const MODEL_CONFIG: &str = "model_config.json";
pub const ARCHITECTURE: &str = "architecture.json";
pub const CLASS_LABELS: &str = "class_labels.json";

/// Paths of everything a training run leaves behind
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn final_mpk(&self) -> PathBuf {
        self.root.join(format!("{FINAL_MODEL}.mpk"))
    }

    pub fn final_json(&self) -> PathBuf {
        self.root.join(format!("{FINAL_MODEL}.json"))
    }

    pub fn best_model(&self) -> PathBuf {
        self.root.join(BEST_MODEL)
    }

    pub fn model_config(&self) -> PathBuf {
        self.root.join(MODEL_CONFIG)
    }

    pub fn architecture(&self) -> PathBuf {
        self.root.join(ARCHITECTURE)
    }

    pub fn class_labels(&self) -> PathBuf {
        self.root.join(CLASS_LABELS)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Written before training so `best_model.mpk` is loadable on its own
    pub fn write_model_config(&self, config: &ClassifierConfig) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        config.save(self.model_config())?;
        Ok(())
    }

    /// Saves the final model in both serialized forms plus its sidecar files.
    pub fn persist_final<B: Backend>(
        &self,
        model: &ClassifierModel<B>,
        config: &ClassifierConfig,
        labels: &LabelSet,
    ) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.root)?;

        let mpk = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        model.network.clone().save_file(self.final_mpk(), &mpk)?;
        info!("Saved model: {}", self.final_mpk().display());

        let json = PrettyJsonFileRecorder::<FullPrecisionSettings>::new();
        model.network.clone().save_file(self.final_json(), &json)?;
        info!("Saved model: {}", self.final_json().display());

        self.write_model_config(config)?;
        fs::write(self.architecture(), serde_json::to_string_pretty(&model.layers)?)?;
        labels.save_metadata(&self.class_labels())?;

        Ok(vec![
            self.final_mpk(),
            self.final_json(),
            self.model_config(),
            self.architecture(),
            self.class_labels(),
        ])
    }
}

/// Loads a model artifact (`.mpk` or `.json`) using the `model_config.json`
/// next to it.
pub fn load_artifact<B: Backend>(path: &Path, device: &B::Device) -> Result<(PlantClassifier<B>, ClassifierConfig)> {
    if !path.exists() {
        return Err(Error::missing_path("Model artifact", path));
    }
    let config_path = path.with_file_name(MODEL_CONFIG);
    if !config_path.exists() {
        return Err(Error::missing_path("Model config", &config_path));
    }
    let config = ClassifierConfig::load(&config_path)
        .map_err(|e| Error::Config(format!("Invalid {}: {e:?}", config_path.display())))?;

    let model = config.init::<B>(device);
    let model = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => {
            let recorder = PrettyJsonFileRecorder::<FullPrecisionSettings>::new();
            model.load_file(path.to_path_buf(), &recorder, device)?
        }
        _ => {
            let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
            model.load_file(path.to_path_buf(), &recorder, device)?
        }
    };

    info!("Loaded model artifact: {}", path.display());
    Ok((model, config))
}

/// The layer descriptors saved with an artifact, or a fresh description
/// when `architecture.json` is absent.
pub fn load_layer_plan(artifact: &Path, config: &ClassifierConfig) -> Result<LayerPlan> {
    let path = artifact.with_file_name(ARCHITECTURE);
    if !path.exists() {
        return Ok(config.describe(false));
    }
    let json = fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModelBuilder;
    use crate::params::ParamDict;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn config() -> ClassifierConfig {
        ClassifierConfig::new()
            .with_image_size(32)
            .with_width_multiplier(0.35)
            .with_hidden_units(8)
    }

    #[test]
    fn test_persist_and_load_both_forms() {
        let dir = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        let device = Default::default();
        let (model, _) = ModelBuilder::new(config()).build::<TestBackend>(false, &device).unwrap();

        let written = layout.persist_final(&model, &config(), &LabelSet::plant_village()).unwrap();
        for path in &written {
            assert!(path.exists(), "{}", path.display());
        }

        let expected = ParamDict::export(&model.network).unwrap();
        for path in [layout.final_mpk(), layout.final_json()] {
            let (loaded, loaded_config) = load_artifact::<TestBackend>(&path, &device).unwrap();
            assert_eq!(loaded_config.hidden_units, 8);
            let actual = ParamDict::export(&loaded).unwrap();
            assert_eq!(expected.get("predictions.weight"), actual.get("predictions.weight"));
            assert_eq!(expected.get("Conv_1_bn.running_var"), actual.get("Conv_1_bn.running_var"));
        }

        let plan = load_layer_plan(&layout.final_mpk(), &config()).unwrap();
        assert_eq!(plan, model.layers);
    }

    #[test]
    fn test_load_missing_artifact() {
        let device = Default::default();
        let result = load_artifact::<TestBackend>(Path::new("/nonexistent/model.mpk"), &device);
        assert!(matches!(result, Err(Error::Input(_))));
    }

    #[test]
    fn test_load_without_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.mpk");
        fs::write(&path, b"not a model").unwrap();
        let device = Default::default();
        let result = load_artifact::<TestBackend>(&path, &device);
        assert!(matches!(result, Err(Error::Input(msg)) if msg.contains("Model config")));
    }

    #[test]
    fn test_layer_plan_fallback() {
        let dir = TempDir::new().unwrap();
        let plan = load_layer_plan(&dir.path().join("model.mpk"), &config()).unwrap();
        assert_eq!(plan, config().describe(false));
    }
}
