//! Layer descriptors: the architecture as an ordered list with per-layer
//! trainable flags.
//!
//! Descriptors are immutable; [`freeze`] and [`unfreeze_tail`] return a new
//! [`LayerPlan`] instead of toggling flags in place, so every phase starts
//! from an explicit, inspectable mask.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which part of the network a layer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Augmentation,
    Input,
    Extractor,
    Head,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    RandomAugmentation,
    Rescaling,
    Conv2d,
    DepthwiseConv2d,
    BatchNorm,
    GlobalAveragePooling,
    Dense,
    Dropout,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LayerKind::RandomAugmentation => "RandomAugmentation",
            LayerKind::Rescaling => "Rescaling",
            LayerKind::Conv2d => "Conv2D",
            LayerKind::DepthwiseConv2d => "DepthwiseConv2D",
            LayerKind::BatchNorm => "BatchNormalization",
            LayerKind::GlobalAveragePooling => "GlobalAveragePooling2D",
            LayerKind::Dense => "Dense",
            LayerKind::Dropout => "Dropout",
        };
        write!(f, "{name}")
    }
}

/// One layer with a stable identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    /// Stable across builds; used as the transplant key
    pub id: String,
    pub kind: LayerKind,
    pub stage: Stage,
    pub trainable: bool,
    /// Learnable parameters
    pub params: usize,
    /// Non-learnable state (batch-norm running statistics)
    pub buffers: usize,
}

impl LayerDescriptor {
    pub fn new(id: impl Into<String>, kind: LayerKind, stage: Stage, params: usize, buffers: usize) -> Self {
        Self {
            id: id.into(),
            kind,
            stage,
            trainable: true,
            params,
            buffers,
        }
    }

    fn with_trainable(&self, trainable: bool) -> Self {
        Self {
            trainable,
            ..self.clone()
        }
    }
}

/// Ordered layer list of a whole model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerPlan {
    pub layers: Vec<LayerDescriptor>,
}

impl LayerPlan {
    pub fn new(layers: Vec<LayerDescriptor>) -> Self {
        Self { layers }
    }

    pub fn get(&self, id: &str) -> Option<&LayerDescriptor> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn has_augmentation(&self) -> bool {
        self.layers.iter().any(|l| l.stage == Stage::Augmentation)
    }

    /// Ids of layers that own parameters and are currently trainable
    pub fn trainable_ids(&self) -> Vec<&str> {
        self.layers
            .iter()
            .filter(|l| l.trainable && l.params > 0)
            .map(|l| l.id.as_str())
            .collect()
    }

    pub fn trainable_params(&self) -> usize {
        self.layers.iter().filter(|l| l.trainable).map(|l| l.params).sum()
    }

    pub fn non_trainable_params(&self) -> usize {
        self.layers
            .iter()
            .map(|l| if l.trainable { l.buffers } else { l.params + l.buffers })
            .sum()
    }

    pub fn total_params(&self) -> usize {
        self.layers.iter().map(|l| l.params + l.buffers).sum()
    }

    /// Extractor layers in order, as a handle for freeze/unfreeze
    /// Id of the earliest trainable extractor layer, where fine-tuning starts
    pub fn first_unfrozen(&self) -> Option<&str> {
        self.layers
            .iter()
            .find(|l| l.stage == Stage::Extractor && l.trainable)
            .map(|l| l.id.as_str())
    }

    pub fn extractor(&self) -> ExtractorHandle {
        ExtractorHandle {
            layer_ids: self
                .layers
                .iter()
                .filter(|l| l.stage == Stage::Extractor)
                .map(|l| l.id.clone())
                .collect(),
        }
    }

    /// Copies trainable flags from `other` for every id both plans share.
    pub fn with_mask_of(&self, other: &LayerPlan) -> LayerPlan {
        let layers = self
            .layers
            .iter()
            .map(|l| match other.get(&l.id) {
                Some(o) => l.with_trainable(o.trainable),
                None => l.clone(),
            })
            .collect();
        LayerPlan { layers }
    }

    /// Per-layer table with parameter totals
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("{:<28} {:<24} {:<12} {:>12}\n", "Layer", "Type", "Status", "Params"));
        out.push_str(&format!("{}\n", "-".repeat(79)));
        for layer in &self.layers {
            let status = if layer.trainable { "Trainable" } else { "Frozen" };
            out.push_str(&format!(
                "{:<28} {:<24} {:<12} {:>12}\n",
                layer.id,
                layer.kind.to_string(),
                status,
                layer.params + layer.buffers
            ));
        }
        out.push_str(&format!("{}\n", "-".repeat(79)));
        out.push_str(&format!("Total trainable params:     {}\n", self.trainable_params()));
        out.push_str(&format!("Total non-trainable params: {}\n", self.non_trainable_params()));
        out.push_str(&format!("Total params:               {}\n", self.total_params()));
        out
    }
}

/// The extractor's layer ids, in forward order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorHandle {
    pub layer_ids: Vec<String>,
}

impl ExtractorHandle {
    pub fn len(&self) -> usize {
        self.layer_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layer_ids.is_empty()
    }
}

/// Marks every extractor layer non-trainable.
pub fn freeze(plan: &LayerPlan, extractor: &ExtractorHandle) -> LayerPlan {
    unfreeze_tail(plan, extractor, 0)
}

/// Makes exactly `min(k, extractor.len())` trailing extractor layers
/// trainable and every other extractor layer frozen. Layers outside the
/// extractor keep their flags.
pub fn unfreeze_tail(plan: &LayerPlan, extractor: &ExtractorHandle, k: usize) -> LayerPlan {
    let k = k.min(extractor.len());
    let first_trainable = extractor.len() - k;
    let layers = plan
        .layers
        .iter()
        .map(|layer| match extractor.layer_ids.iter().position(|id| *id == layer.id) {
            Some(pos) => layer.with_trainable(pos >= first_trainable),
            None => layer.clone(),
        })
        .collect();
    LayerPlan { layers }
}
