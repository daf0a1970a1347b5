use std::fs;
use std::path::{Path, PathBuf};

use burn::config::Config;
use plant_core::{format_size, Error, Result};
use plant_training::artifacts::{CLASS_LABELS, MODEL_CONFIG};
use plant_training::ClassifierConfig;
use tracing::{info, warn};

use crate::converter::{ConversionOptions, ModelConverter};
use crate::metadata::ModelMetadata;
use crate::shards::ShardConverter;

pub const LABELS_FILE: &str = "labels.json";

/// What an export produced
#[derive(Debug, Clone)]
pub struct ExportBundle {
    pub dir: PathBuf,
    pub model_json: PathBuf,
    /// File name and size in bytes, sorted by name
    pub files: Vec<(String, u64)>,
}

impl ExportBundle {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|(_, size)| size).sum()
    }

    /// One line per file plus a total, sizes human-readable
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for (name, size) in &self.files {
            out.push_str(&format!("  {name}: {}\n", format_size(*size)));
        }
        out.push_str(&format!("  Total: {}", format_size(self.total_bytes())));
        out
    }
}

pub struct ExportPipeline {
    converter: Box<dyn ModelConverter>,
}

impl Default for ExportPipeline {
    fn default() -> Self {
        Self::new(Box::new(ShardConverter::default()))
    }
}

impl ExportPipeline {
    pub fn new(converter: Box<dyn ModelConverter>) -> Self {
        Self { converter }
    }

    pub fn converter_name(&self) -> &str {
        self.converter.name()
    }

    pub fn export(&self, artifact: &Path, output_dir: &Path, quantize: bool) -> Result<ExportBundle> {
        if !artifact.exists() {
            return Err(Error::Input(format!(
                "Model artifact not found: {}. Run the train tool first.",
                artifact.display()
            )));
        }

        fs::create_dir_all(output_dir)?;
        info!("Converting {} with {}", artifact.display(), self.converter.name());
        let model_json = self
            .converter
            .convert(artifact, output_dir, &ConversionOptions { quantize })?;

        let labels = artifact.with_file_name(CLASS_LABELS);
        if labels.exists() {
            fs::copy(&labels, output_dir.join(LABELS_FILE))?;
            info!("Copied class labels to {}", output_dir.join(LABELS_FILE).display());
        } else {
            warn!("Class labels not found at {}", labels.display());
        }

        metadata_for(artifact).save(output_dir)?;

        let files = list_files(output_dir)?;
        let bundle = ExportBundle {
            dir: output_dir.to_path_buf(),
            model_json,
            files,
        };
        info!("Export complete: {} files, {}", bundle.files.len(), format_size(bundle.total_bytes()));
        Ok(bundle)
    }
}

/// Shapes come from the artifact's config when it has one.
fn metadata_for(artifact: &Path) -> ModelMetadata {
    let config_path = artifact.with_file_name(MODEL_CONFIG);
    match ClassifierConfig::load(&config_path) {
        Ok(config) => ModelMetadata::new(config.image_size, config.num_classes),
        Err(_) => ModelMetadata::default(),
    }
}

fn list_files(dir: &Path) -> Result<Vec<(String, u64)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_file() {
            files.push((entry.file_name().to_string_lossy().into_owned(), meta.len()));
        }
    }
    files.sort();
    Ok(files)
}
