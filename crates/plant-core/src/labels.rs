//! The fixed PlantVillage class set and the label metadata document.

use std::fs;
use std::path::Path;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Canonical PlantVillage labels in class-index order.
pub const CLASS_LABELS: [&str; 38] = [
    "Apple___Apple_scab",
    "Apple___Black_rot",
    "Apple___Cedar_apple_rust",
    "Apple___healthy",
    "Blueberry___healthy",
    "Cherry_(including_sour)___Powdery_mildew",
    "Cherry_(including_sour)___healthy",
    "Corn_(maize)___Cercospora_leaf_spot_Gray_leaf_spot",
    "Corn_(maize)___Common_rust_",
    "Corn_(maize)___Northern_Leaf_Blight",
    "Corn_(maize)___healthy",
    "Grape___Black_rot",
    "Grape___Esca_(Black_Measles)",
    "Grape___Leaf_blight_(Isariopsis_Leaf_Spot)",
    "Grape___healthy",
    "Orange___Haunglongbing_(Citrus_greening)",
    "Peach___Bacterial_spot",
    "Peach___healthy",
    "Pepper,_bell___Bacterial_spot",
    "Pepper,_bell___healthy",
    "Potato___Early_blight",
    "Potato___Late_blight",
    "Potato___healthy",
    "Raspberry___healthy",
    "Soybean___healthy",
    "Squash___Powdery_mildew",
    "Strawberry___Leaf_scorch",
    "Strawberry___healthy",
    "Tomato___Bacterial_spot",
    "Tomato___Early_blight",
    "Tomato___Late_blight",
    "Tomato___Leaf_Mold",
    "Tomato___Septoria_leaf_spot",
    "Tomato___Spider_mites_Two-spotted_spider_mite",
    "Tomato___Target_Spot",
    "Tomato___Tomato_Yellow_Leaf_Curl_Virus",
    "Tomato___Tomato_mosaic_virus",
    "Tomato___healthy",
];

/// Number of classes in the fixed label set.
pub const NUM_CLASSES: usize = CLASS_LABELS.len();

/// Crops covered by the label set, as published in bundle metadata.
pub const CROPS: [&str; 14] = [
    "Apple",
    "Blueberry",
    "Cherry",
    "Corn",
    "Grape",
    "Orange",
    "Peach",
    "Pepper",
    "Potato",
    "Raspberry",
    "Soybean",
    "Squash",
    "Strawberry",
    "Tomato",
];

const CROP_SEPARATOR: &str = "___";

/// One entry of the fixed class set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLabel {
    pub id: usize,
    /// Directory-style name, e.g. `Tomato___Late_blight`
    pub original: String,
    /// Display name, e.g. `Tomato - Late Blight`
    pub name: String,
    pub crop: String,
    pub condition: String,
}

impl ClassLabel {
    pub fn from_canonical(id: usize, original: &str) -> Self {
        let name = title_case(&original.replace(CROP_SEPARATOR, " - ").replace('_', " "));
        let mut parts = original.splitn(2, CROP_SEPARATOR);
        let crop = parts.next().unwrap_or_default().replace('_', " ");
        let condition = match parts.next() {
            Some(rest) => title_case(&rest.replace('_', " ")),
            None => "Unknown".to_string(),
        };

        Self {
            id,
            original: original.to_string(),
            name,
            crop,
            condition,
        }
    }
}

/// Upper-cases a letter that follows a non-letter, lower-cases the rest.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_is_letter = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if prev_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_letter = true;
        } else {
            out.push(c);
            prev_is_letter = false;
        }
    }
    out
}

/// The immutable set of class labels, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    labels: Vec<ClassLabel>,
}

impl LabelSet {
    /// The canonical 38-class PlantVillage set.
    pub fn plant_village() -> Self {
        let labels = CLASS_LABELS
            .iter()
            .enumerate()
            .map(|(id, name)| ClassLabel::from_canonical(id, name))
            .collect();
        Self { labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&ClassLabel> {
        self.labels.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassLabel> {
        self.labels.iter()
    }

    /// Class index for a canonical directory name.
    pub fn index_of(&self, original: &str) -> Option<usize> {
        self.labels.iter().position(|l| l.original == original)
    }

    /// One-hot vector of length `len()` with a single 1 at `label`.
    pub fn one_hot(&self, label: usize) -> Result<Vec<f32>> {
        if label >= self.labels.len() {
            return Err(Error::Input(format!(
                "label {label} outside class set of {}",
                self.labels.len()
            )));
        }
        let mut encoded = vec![0.0; self.labels.len()];
        encoded[label] = 1.0;
        Ok(encoded)
    }

    /// Writes `class_labels.json`: stringified index to label metadata.
    pub fn save_metadata(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&LabelMetadata(self))?;
        fs::write(path, json).map_err(|e| {
            Error::Serialization(format!("Failed to write {}: {e}", path.display()))
        })?;
        tracing::info!("Class labels saved to {}", path.display());
        Ok(())
    }
}

impl Default for LabelSet {
    fn default() -> Self {
        Self::plant_village()
    }
}

#[derive(Serialize)]
struct LabelEntry<'a> {
    name: &'a str,
    original: &'a str,
    crop: &'a str,
    condition: &'a str,
}

/// Serializes in index order ("0", "1", ... "37").
struct LabelMetadata<'a>(&'a LabelSet);

impl Serialize for LabelMetadata<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for label in self.0.iter() {
            map.serialize_entry(
                &label.id.to_string(),
                &LabelEntry {
                    name: &label.name,
                    original: &label.original,
                    crop: &label.crop,
                    condition: &label.condition,
                },
            )?;
        }
        map.end()
    }
}
