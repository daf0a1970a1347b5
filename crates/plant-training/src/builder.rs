//! Model construction and inference rebuild.

use std::path::{Path, PathBuf};

use burn::module::ParamId;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use plant_core::{Error, ModelSettings, Result};
use tracing::info;

use crate::layers::{freeze, ExtractorHandle, LayerPlan};
use crate::model::{ClassifierConfig, MobileNetExtractor, PlantClassifier};
use crate::params::ParamDict;

/// A network together with its layer descriptors and trainable mask
#[derive(Debug)]
pub struct ClassifierModel<B: Backend> {
    pub network: PlantClassifier<B>,
    pub layers: LayerPlan,
}

impl<B: Backend> ClassifierModel<B> {
    /// Learnable parameter ids of every trainable layer
    pub fn trainable_param_ids(&self) -> Vec<ParamId> {
        self.network.param_ids_of(&self.layers.trainable_ids())
    }

    pub fn summary(&self) -> String {
        self.layers.summary()
    }
}

/// Builds the classifier: optional augmentation stage, scaling, extractor, head.
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    config: ClassifierConfig,
    pretrained: Option<PathBuf>,
}

impl ModelBuilder {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            pretrained: None,
        }
    }

    pub fn from_settings(settings: &ModelSettings, image_size: usize, num_classes: usize) -> Self {
        let config = ClassifierConfig::new()
            .with_num_classes(num_classes)
            .with_image_size(image_size)
            .with_hidden_units(settings.hidden_units)
            .with_dropout(settings.dropout)
            .with_width_multiplier(settings.width_multiplier);
        Self {
            config,
            pretrained: settings.pretrained_weights.clone(),
        }
    }

    /// Extractor weights saved as a named MessagePack record
    pub fn with_pretrained(mut self, path: impl Into<PathBuf>) -> Self {
        self.pretrained = Some(path.into());
        self
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Build the model with the extractor fully frozen.
    pub fn build<B: Backend>(&self, augment: bool, device: &B::Device) -> Result<(ClassifierModel<B>, ExtractorHandle)> {
        let mut network = self.config.init::<B>(device);
        match &self.pretrained {
            Some(path) => {
                network.extractor = load_extractor(network.extractor, path, device)?;
                info!("Loaded pretrained extractor weights from {}", path.display());
            }
            None => info!("No pretrained weights configured, extractor starts from random init"),
        }

        let plan = self.config.describe(augment);
        let extractor = plan.extractor();
        let layers = freeze(&plan, &extractor);

        info!(
            "Built classifier: {} extractor layers, {} trainable / {} total params",
            extractor.len(),
            layers.trainable_params(),
            layers.total_params()
        );

        Ok((ClassifierModel { network, layers }, extractor))
    }

    /// Fresh augmentation-free graph carrying the trained weights and mask.
    pub fn rebuild_for_inference<B: Backend>(&self, trained: &ClassifierModel<B>) -> Result<ClassifierModel<B>> {
        let device = trained.network.devices().into_iter().next().unwrap_or_default();
        let mut network = self.config.init::<B>(&device);

        let params = ParamDict::export(&trained.network)?;
        params.transplant_into(&mut network)?;

        let layers = self.config.describe(false).with_mask_of(&trained.layers);
        info!("Rebuilt inference model ({} tensors transplanted)", params.len());

        Ok(ClassifierModel { network, layers })
    }
}

fn load_extractor<B: Backend>(
    extractor: MobileNetExtractor<B>,
    path: &Path,
    device: &B::Device,
) -> Result<MobileNetExtractor<B>> {
    if !path.exists() {
        return Err(Error::missing_path("Pretrained weights", path));
    }
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    Ok(extractor.load_file(path.to_path_buf(), &recorder, device)?)
}
