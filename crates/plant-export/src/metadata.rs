//! `metadata.json`, the frontend-facing description of an exported model.

use std::fs;
use std::path::Path;

use plant_core::{Error, Result, CROPS, IMAGE_SIZE, NUM_CLASSES};
use serde::{Deserialize, Serialize};

pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub shape: Vec<usize>,
    pub dtype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preprocessing: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub input: TensorSpec,
    pub output: TensorSpec,
    pub classes: usize,
    pub crops: Vec<String>,
    pub training_dataset: String,
    pub architecture: String,
    pub framework: String,
}

impl ModelMetadata {
    pub fn new(image_size: usize, num_classes: usize) -> Self {
        Self {
            name: "PlantDiseaseClassifier".to_string(),
            version: "1.0.0".to_string(),
            description: "CNN model for plant disease classification trained on PlantVillage dataset".to_string(),
            input: TensorSpec {
                shape: vec![1, image_size, image_size, 3],
                dtype: "float32".to_string(),
                preprocessing: Some("Normalize to [0, 1] by dividing by 255".to_string()),
                activation: None,
                description: None,
            },
            output: TensorSpec {
                shape: vec![1, num_classes],
                dtype: "float32".to_string(),
                preprocessing: None,
                activation: Some("softmax".to_string()),
                description: Some(format!("Probability distribution over {num_classes} disease classes")),
            },
            classes: num_classes,
            crops: CROPS.iter().map(|c| c.to_string()).collect(),
            training_dataset: "PlantVillage".to_string(),
            architecture: "MobileNetV2 + Custom Classification Head".to_string(),
            framework: "TensorFlow.js".to_string(),
        }
    }

    pub fn save(&self, output_dir: &Path) -> Result<()> {
        let path = output_dir.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)
            .map_err(|e| Error::Serialization(format!("Failed to write {}: {e}", path.display())))
    }
}

impl Default for ModelMetadata {
    fn default() -> Self {
        Self::new(IMAGE_SIZE, NUM_CLASSES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_document() {
        let dir = TempDir::new().unwrap();
        ModelMetadata::default().save(dir.path()).unwrap();

        let doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(METADATA_FILE)).unwrap()).unwrap();
        assert_eq!(doc["name"], "PlantDiseaseClassifier");
        assert_eq!(doc["input"]["shape"], serde_json::json!([1, 224, 224, 3]));
        assert_eq!(doc["output"]["shape"], serde_json::json!([1, 38]));
        assert_eq!(doc["output"]["activation"], "softmax");
        assert_eq!(doc["classes"], 38);
        assert_eq!(doc["crops"].as_array().unwrap().len(), 14);
        assert_eq!(doc["trainingDataset"], "PlantVillage");
        assert!(doc["input"].get("activation").is_none());
    }
}
