//! Parameter dictionary keyed by `<layer id>.<tensor name>`.
//!
//! Used to move weights between two builds of the architecture (training
//! graph -> inference graph) and as the source for weight shards on export.

use std::collections::BTreeMap;

use burn::module::{Param, RunningState};
use burn::prelude::*;
use plant_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::model::{LayerMut, LayerRef, PlantClassifier};

/// Host copy of one tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl ParamTensor {
    fn capture<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Self> {
        let shape = tensor.dims().to_vec();
        let values = tensor
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| Error::Model(format!("Failed to read tensor data: {e:?}")))?;
        Ok(Self { shape, values })
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }
}

/// Ordered `<layer>.<tensor>` -> tensor mapping
#[derive(Debug, Clone, Default)]
pub struct ParamDict {
    entries: Vec<(String, ParamTensor)>,
    index: BTreeMap<String, usize>,
}

impl ParamDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, tensor: ParamTensor) {
        let key = key.into();
        match self.index.get(&key) {
            Some(&pos) => self.entries[pos].1 = tensor,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, tensor));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamTensor> {
        self.index.get(key).map(|&pos| &self.entries[pos].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in layer order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamTensor)> {
        self.entries.iter().map(|(k, t)| (k.as_str(), t))
    }

    pub fn total_values(&self) -> usize {
        self.entries.iter().map(|(_, t)| t.num_values()).sum()
    }

    /// Copies every parameter and running statistic out of `model`.
    pub fn export<B: Backend>(model: &PlantClassifier<B>) -> Result<Self> {
        let mut dict = Self::new();
        for (id, layer) in model.layers() {
            match layer {
                LayerRef::Conv(conv) => {
                    dict.insert(format!("{id}.weight"), ParamTensor::capture(conv.weight.val())?);
                    if let Some(bias) = &conv.bias {
                        dict.insert(format!("{id}.bias"), ParamTensor::capture(bias.val())?);
                    }
                }
                LayerRef::Norm(bn) => {
                    dict.insert(format!("{id}.gamma"), ParamTensor::capture(bn.gamma.val())?);
                    dict.insert(format!("{id}.beta"), ParamTensor::capture(bn.beta.val())?);
                    dict.insert(format!("{id}.running_mean"), ParamTensor::capture(bn.running_mean.value_sync())?);
                    dict.insert(format!("{id}.running_var"), ParamTensor::capture(bn.running_var.value_sync())?);
                }
                LayerRef::Dense(linear) => {
                    dict.insert(format!("{id}.weight"), ParamTensor::capture(linear.weight.val())?);
                    if let Some(bias) = &linear.bias {
                        dict.insert(format!("{id}.bias"), ParamTensor::capture(bias.val())?);
                    }
                }
            }
        }
        Ok(dict)
    }

    /// Overwrites every parameter of `model` from this dictionary.
    ///
    /// Every tensor of the target must have a matching entry of the same
    /// shape; a missing or differently shaped entry is a `ShapeMismatch`.
    pub fn transplant_into<B: Backend>(&self, model: &mut PlantClassifier<B>) -> Result<()> {
        for (id, layer) in model.layers_mut() {
            match layer {
                LayerMut::Conv(conv) => {
                    conv.weight = self.restore_param(&format!("{id}.weight"), &conv.weight)?;
                    if let Some(bias) = conv.bias.as_mut() {
                        *bias = self.restore_param(&format!("{id}.bias"), bias)?;
                    }
                }
                LayerMut::Norm(bn) => {
                    bn.gamma = self.restore_param(&format!("{id}.gamma"), &bn.gamma)?;
                    bn.beta = self.restore_param(&format!("{id}.beta"), &bn.beta)?;
                    bn.running_mean = RunningState::new(
                        self.restore(&format!("{id}.running_mean"), &bn.running_mean.value())?,
                    );
                    bn.running_var = RunningState::new(
                        self.restore(&format!("{id}.running_var"), &bn.running_var.value())?,
                    );
                }
                LayerMut::Dense(linear) => {
                    linear.weight = self.restore_param(&format!("{id}.weight"), &linear.weight)?;
                    if let Some(bias) = linear.bias.as_mut() {
                        *bias = self.restore_param(&format!("{id}.bias"), bias)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn restore_param<B: Backend, const D: usize>(
        &self,
        key: &str,
        current: &Param<Tensor<B, D>>,
    ) -> Result<Param<Tensor<B, D>>> {
        let current_val = current.val();
        let require_grad = current_val.is_require_grad();
        let tensor = self.restore(key, &current_val)?.set_require_grad(require_grad);
        Ok(Param::initialized(current.id, tensor))
    }

    fn restore<B: Backend, const D: usize>(&self, key: &str, current: &Tensor<B, D>) -> Result<Tensor<B, D>> {
        let expected = current.dims().to_vec();
        let entry = self.get(key).ok_or_else(|| Error::ShapeMismatch {
            layer: key.to_string(),
            expected: expected.clone(),
            found: Vec::new(),
        })?;
        if entry.shape != expected {
            return Err(Error::ShapeMismatch {
                layer: key.to_string(),
                expected,
                found: entry.shape.clone(),
            });
        }

        let data = TensorData::new(entry.values.clone(), entry.shape.clone());
        Ok(Tensor::from_data(data, &current.device()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ClassifierConfig;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn config() -> ClassifierConfig {
        ClassifierConfig::new()
            .with_image_size(32)
            .with_width_multiplier(0.35)
            .with_hidden_units(8)
    }

    #[test]
    fn test_export_keys() {
        let device = Default::default();
        let model = config().init::<TestBackend>(&device);
        let dict = ParamDict::export(&model).unwrap();

        assert!(dict.get("Conv1.weight").is_some());
        assert!(dict.get("Conv1.bias").is_none());
        assert!(dict.get("bn_Conv1.running_var").is_some());
        assert_eq!(dict.get("fc1.bias").unwrap().shape, vec![8]);
        assert_eq!(dict.get("predictions.weight").unwrap().shape, vec![8, 38]);
        assert_eq!(dict.iter().next().unwrap().0, "Conv1.weight");
    }

    #[test]
    fn test_export_reads_current_running_statistics() {
        let device = Default::default();
        let mut model = config().init::<TestBackend>(&device);
        let channels = ParamDict::export(&model).unwrap().get("bn_Conv1.running_mean").unwrap().num_values();

        for (id, layer) in model.layers_mut() {
            if let (LayerMut::Norm(bn), "bn_Conv1") = (layer, id.as_str()) {
                bn.running_mean = RunningState::new(Tensor::full([channels], 0.25, &device));
            }
        }

        let dict = ParamDict::export(&model).unwrap();
        let mean = dict.get("bn_Conv1.running_mean").unwrap();
        assert!(mean.values.iter().all(|v| (*v - 0.25).abs() < 1e-6));
        assert!(dict.get("block_1_expand_BN.running_mean").unwrap().values.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_transplant_copies_weights() {
        let device = Default::default();
        let source = config().init::<TestBackend>(&device);
        let mut target = config().init::<TestBackend>(&device);

        let dict = ParamDict::export(&source).unwrap();
        dict.transplant_into(&mut target).unwrap();

        let copied = ParamDict::export(&target).unwrap();
        for (key, tensor) in dict.iter() {
            assert_eq!(copied.get(key), Some(tensor), "{key}");
        }
    }

    #[test]
    fn test_transplant_shape_mismatch() {
        let device = Default::default();
        let source = config().init::<TestBackend>(&device);
        let mut target = config().with_hidden_units(16).init::<TestBackend>(&device);

        let dict = ParamDict::export(&source).unwrap();
        match dict.transplant_into(&mut target) {
            Err(Error::ShapeMismatch { layer, expected, found }) => {
                assert_eq!(layer, "fc1.weight");
                assert_eq!(expected, vec![1280, 16]);
                assert_eq!(found, vec![1280, 8]);
            }
            other => panic!("expected shape mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_transplant_missing_entry() {
        let device = Default::default();
        let mut target = config().init::<TestBackend>(&device);
        let result = ParamDict::new().transplant_into(&mut target);
        assert!(matches!(result, Err(Error::ShapeMismatch { found, .. }) if found.is_empty()));
    }
}
