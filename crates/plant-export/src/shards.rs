//! Native writer for the layers-model bundle format: a `model.json`
//! topology plus a weights manifest pointing at binary shard files.

use std::fs;
use std::path::{Path, PathBuf};

use burn_ndarray::NdArray;
use plant_core::{Error, Result, VERSION};
use plant_training::{load_artifact, load_layer_plan, ClassifierConfig, LayerPlan, ParamDict, ParamTensor};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::converter::{ConversionOptions, ModelConverter};

pub const MODEL_JSON: &str = "model.json";
pub const DEFAULT_SHARD_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BundleManifest {
    format: &'static str,
    generated_by: String,
    converted_by: String,
    model_topology: ModelTopology,
    weights_manifest: Vec<WeightGroup>,
}

#[derive(Debug, Serialize)]
struct ModelTopology {
    class_name: &'static str,
    config: serde_json::Value,
    layers: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct WeightGroup {
    paths: Vec<String>,
    weights: Vec<WeightEntry>,
}

#[derive(Debug, Serialize)]
struct WeightEntry {
    name: String,
    shape: Vec<usize>,
    dtype: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    quantization: Option<Quantization>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Quantization {
    dtype: &'static str,
    pub scale: f32,
    pub min: f32,
}

/// Affine uint8 quantization over the whole tensor.
pub fn quantize(values: &[f32]) -> (Vec<u8>, Quantization) {
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let (min, max) = if values.is_empty() { (0.0, 0.0) } else { (min, max) };

    let range = max - min;
    let scale = if range > 0.0 { range / 255.0 } else { 1.0 };
    let bytes = values
        .iter()
        .map(|v| ((v - min) / scale).round().clamp(0.0, 255.0) as u8)
        .collect();

    (bytes, Quantization { dtype: "uint8", scale, min })
}

pub fn dequantize(bytes: &[u8], q: &Quantization) -> Vec<f32> {
    bytes.iter().map(|&b| b as f32 * q.scale + q.min).collect()
}

/// Converts `.mpk`/`.json` artifacts without any external tooling.
#[derive(Debug, Clone)]
pub struct ShardConverter {
    shard_size: usize,
}

impl Default for ShardConverter {
    fn default() -> Self {
        Self {
            shard_size: DEFAULT_SHARD_SIZE,
        }
    }
}

impl ShardConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shard_size(mut self, bytes: usize) -> Self {
        self.shard_size = bytes.max(1);
        self
    }

    fn encode(&self, params: &ParamDict, quantize_weights: bool) -> (Vec<WeightEntry>, Vec<u8>) {
        let mut entries = Vec::with_capacity(params.len());
        let mut buffer = Vec::new();

        for (name, tensor) in params.iter() {
            let quantization = if quantize_weights {
                let (bytes, q) = quantize(&tensor.values);
                buffer.extend_from_slice(&bytes);
                Some(q)
            } else {
                for v in &tensor.values {
                    buffer.extend_from_slice(&v.to_le_bytes());
                }
                None
            };
            entries.push(weight_entry(name, tensor, quantization));
        }

        (entries, buffer)
    }

    fn write_shards(&self, buffer: &[u8], output_dir: &Path) -> Result<Vec<String>> {
        let chunks: Vec<&[u8]> = if buffer.is_empty() {
            vec![buffer]
        } else {
            buffer.chunks(self.shard_size).collect()
        };
        let total = chunks.len();

        let mut paths = Vec::with_capacity(total);
        for (i, chunk) in chunks.into_iter().enumerate() {
            let name = format!("group1-shard{}of{}.bin", i + 1, total);
            fs::write(output_dir.join(&name), chunk)?;
            debug!("Wrote shard {} ({} bytes)", name, chunk.len());
            paths.push(name);
        }
        Ok(paths)
    }
}

fn weight_entry(name: &str, tensor: &ParamTensor, quantization: Option<Quantization>) -> WeightEntry {
    WeightEntry {
        name: name.to_string(),
        shape: tensor.shape.clone(),
        dtype: "float32",
        quantization,
    }
}

fn topology(config: &ClassifierConfig, plan: &LayerPlan) -> ModelTopology {
    let layers = plan
        .layers
        .iter()
        .map(|layer| {
            json!({
                "class_name": layer.kind.to_string(),
                "config": {
                    "name": layer.id,
                    "trainable": layer.trainable,
                }
            })
        })
        .collect();

    ModelTopology {
        class_name: "Sequential",
        config: json!({
            "name": "plant_disease_classifier",
            "batch_input_shape": [null, config.image_size, config.image_size, 3],
            "num_classes": config.num_classes,
        }),
        layers,
    }
}

impl ModelConverter for ShardConverter {
    fn name(&self) -> &str {
        "native shards"
    }

    fn convert(&self, artifact: &Path, output_dir: &Path, options: &ConversionOptions) -> Result<PathBuf> {
        let device = Default::default();
        let (model, config) = load_artifact::<NdArray>(artifact, &device)?;
        let plan = load_layer_plan(artifact, &config)?;
        let params = ParamDict::export(&model)?;

        let (weights, buffer) = self.encode(&params, options.quantize);
        fs::create_dir_all(output_dir)?;
        let paths = self.write_shards(&buffer, output_dir)?;
        info!(
            "Encoded {} tensors ({} values) into {} shard(s){}",
            params.len(),
            params.total_values(),
            paths.len(),
            if options.quantize { ", uint8 quantized" } else { "" }
        );

        let manifest = BundleManifest {
            format: "layers-model",
            generated_by: format!("plant-training {VERSION}"),
            converted_by: format!("plant-export {VERSION}"),
            model_topology: topology(&config, &plan),
            weights_manifest: vec![WeightGroup { paths, weights }],
        };

        let path = output_dir.join(MODEL_JSON);
        let json = serde_json::to_string_pretty(&manifest)?;
        fs::write(&path, json)
            .map_err(|e| Error::Serialization(format!("Failed to write {}: {e}", path.display())))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plant_core::LabelSet;
    use plant_training::{ArtifactLayout, ModelBuilder};
    use tempfile::TempDir;

    fn small_config() -> ClassifierConfig {
        ClassifierConfig::new()
            .with_image_size(32)
            .with_width_multiplier(0.35)
            .with_hidden_units(8)
    }

    fn trained_artifact(dir: &Path) -> PathBuf {
        let layout = ArtifactLayout::new(dir);
        let device = Default::default();
        let (model, _) = ModelBuilder::new(small_config()).build::<NdArray>(false, &device).unwrap();
        layout
            .persist_final(&model, &small_config(), &LabelSet::plant_village())
            .unwrap();
        layout.final_mpk()
    }

    fn shard_bytes(dir: &Path) -> u64 {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".bin"))
            .map(|e| e.metadata().unwrap().len())
            .sum()
    }

    #[test]
    fn test_quantize_error_bound() {
        let values: Vec<f32> = (0..1000).map(|i| ((i as f32) * 0.37).sin() * 3.0).collect();
        let (bytes, q) = quantize(&values);
        let restored = dequantize(&bytes, &q);
        for (a, b) in values.iter().zip(&restored) {
            assert!((a - b).abs() <= q.scale / 2.0 + 1e-5, "{a} vs {b}");
        }
    }

    #[test]
    fn test_quantize_constant_tensor() {
        let (bytes, q) = quantize(&[0.5; 16]);
        assert_eq!(q.scale, 1.0);
        assert_eq!(q.min, 0.5);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_quantized_bundle_is_smaller() {
        let dir = TempDir::new().unwrap();
        let artifact = trained_artifact(&dir.path().join("saved_model"));
        let plain = dir.path().join("plain");
        let quantized = dir.path().join("quantized");

        let converter = ShardConverter::new();
        converter
            .convert(&artifact, &plain, &ConversionOptions { quantize: false })
            .unwrap();
        converter
            .convert(&artifact, &quantized, &ConversionOptions { quantize: true })
            .unwrap();

        let plain_bytes = shard_bytes(&plain);
        let quantized_bytes = shard_bytes(&quantized);
        assert!(quantized_bytes < plain_bytes);
        assert_eq!(plain_bytes, quantized_bytes * 4);
    }

    #[test]
    fn test_manifest_lists_every_shard() {
        let dir = TempDir::new().unwrap();
        let artifact = trained_artifact(&dir.path().join("saved_model"));
        let out = dir.path().join("bundle");

        let model_json = ShardConverter::new()
            .with_shard_size(64 * 1024)
            .convert(&artifact, &out, &ConversionOptions::default())
            .unwrap();

        let manifest: serde_json::Value = serde_json::from_str(&fs::read_to_string(model_json).unwrap()).unwrap();
        assert_eq!(manifest["format"], "layers-model");
        let paths = manifest["weightsManifest"][0]["paths"].as_array().unwrap();
        assert!(paths.len() > 1);
        for path in paths {
            assert!(out.join(path.as_str().unwrap()).exists());
        }
        let first = manifest["weightsManifest"][0]["weights"][0]["name"].as_str().unwrap();
        assert_eq!(first, "Conv1.weight");
        assert_eq!(manifest["modelTopology"]["layers"][0]["config"]["name"], "rescaling");
    }

    #[test]
    fn test_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let result = ShardConverter::new().convert(
            &dir.path().join("missing.mpk"),
            &dir.path().join("out"),
            &ConversionOptions::default(),
        );
        assert!(matches!(result, Err(Error::Input(_))));
    }
}
