//! MobileNetV2-style classifier for plant disease images.
//!
//! Architecture:
//! - Input scaling [0, 1] -> [-1, 1]
//! - Extractor: stem conv, 17 inverted-residual blocks, 1x1 head conv
//! - Global average pooling
//! - `fc1` (ReLU) -> dropout -> `predictions` (softmax)
//!
//! Every parameterised layer carries a stable id (`Conv1`, `block_3_expand_BN`,
//! `predictions`, ...) used for freezing, transplanting and export.

use burn::module::ParamId;
use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    Relu,
};
use burn::prelude::*;
use burn::tensor::activation::{log_softmax, softmax};

use crate::layers::{LayerDescriptor, LayerKind, LayerPlan, Stage};

/// Expansion factor, output channels, repeats, first stride
const BLOCK_SETTINGS: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

const STEM_CHANNELS: f64 = 32.0;
const LAST_CHANNELS: usize = 1280;
const BN_EPSILON: f64 = 1e-3;

/// Architecture configuration, saved next to every artifact as `model_config.json`
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    #[config(default = 38)]
    pub num_classes: usize,
    #[config(default = 224)]
    pub image_size: usize,
    #[config(default = 256)]
    pub hidden_units: usize,
    #[config(default = 0.5)]
    pub dropout: f64,
    #[config(default = 1.0)]
    pub width_multiplier: f64,
}

/// Channel layout of one inverted-residual block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSpec {
    pub prefix: String,
    pub input: usize,
    pub expanded: usize,
    pub output: usize,
    pub stride: usize,
    pub expand: bool,
}

impl BlockSpec {
    pub fn is_residual(&self) -> bool {
        self.stride == 1 && self.input == self.output
    }
}

/// Rounds `value` to a multiple of `divisor`, never dropping more than 10%.
pub fn make_divisible(value: f64, divisor: usize) -> usize {
    let d = divisor as f64;
    let rounded = (((value + d / 2.0) / d).floor() * d).max(d);
    if rounded < 0.9 * value {
        (rounded + d) as usize
    } else {
        rounded as usize
    }
}

fn block_prefix(index: usize) -> String {
    if index == 0 {
        "expanded_conv".to_string()
    } else {
        format!("block_{index}")
    }
}

impl ClassifierConfig {
    pub fn stem_channels(&self) -> usize {
        make_divisible(STEM_CHANNELS * self.width_multiplier, 8)
    }

    pub fn last_channels(&self) -> usize {
        if self.width_multiplier > 1.0 {
            make_divisible(LAST_CHANNELS as f64 * self.width_multiplier, 8)
        } else {
            LAST_CHANNELS
        }
    }

    pub fn block_specs(&self) -> Vec<BlockSpec> {
        let mut specs = Vec::new();
        let mut input = self.stem_channels();
        for (t, c, n, s) in BLOCK_SETTINGS {
            let output = make_divisible(c as f64 * self.width_multiplier, 8);
            for repeat in 0..n {
                specs.push(BlockSpec {
                    prefix: block_prefix(specs.len()),
                    input,
                    expanded: input * t,
                    output,
                    stride: if repeat == 0 { s } else { 1 },
                    expand: t != 1,
                });
                input = output;
            }
        }
        specs
    }

    /// Layer descriptors for this architecture, all trainable.
    pub fn describe(&self, augment: bool) -> LayerPlan {
        let mut layers = Vec::new();
        if augment {
            layers.push(LayerDescriptor::new(
                "random_augmentation",
                LayerKind::RandomAugmentation,
                Stage::Augmentation,
                0,
                0,
            ));
        }
        layers.push(LayerDescriptor::new("rescaling", LayerKind::Rescaling, Stage::Input, 0, 0));

        let conv = |id: String, kind, params| LayerDescriptor::new(id, kind, Stage::Extractor, params, 0);
        let norm = |id: String, c: usize| LayerDescriptor::new(id, LayerKind::BatchNorm, Stage::Extractor, 2 * c, 2 * c);

        let stem = self.stem_channels();
        layers.push(conv("Conv1".into(), LayerKind::Conv2d, 3 * stem * 9));
        layers.push(norm("bn_Conv1".into(), stem));

        let specs = self.block_specs();
        for spec in &specs {
            let p = &spec.prefix;
            if spec.expand {
                layers.push(conv(format!("{p}_expand"), LayerKind::Conv2d, spec.input * spec.expanded));
                layers.push(norm(format!("{p}_expand_BN"), spec.expanded));
            }
            layers.push(conv(format!("{p}_depthwise"), LayerKind::DepthwiseConv2d, spec.expanded * 9));
            layers.push(norm(format!("{p}_depthwise_BN"), spec.expanded));
            layers.push(conv(format!("{p}_project"), LayerKind::Conv2d, spec.expanded * spec.output));
            layers.push(norm(format!("{p}_project_BN"), spec.output));
        }

        let features = specs.last().map(|s| s.output).unwrap_or(stem);
        let last = self.last_channels();
        layers.push(conv("Conv_1".into(), LayerKind::Conv2d, features * last));
        layers.push(norm("Conv_1_bn".into(), last));

        let head = |id: &str, kind, params| LayerDescriptor::new(id, kind, Stage::Head, params, 0);
        layers.push(head("global_average_pooling2d", LayerKind::GlobalAveragePooling, 0));
        layers.push(head("fc1", LayerKind::Dense, last * self.hidden_units + self.hidden_units));
        layers.push(head("dropout", LayerKind::Dropout, 0));
        layers.push(head(
            "predictions",
            LayerKind::Dense,
            self.hidden_units * self.num_classes + self.num_classes,
        ));

        LayerPlan::new(layers)
    }

    /// Initialize a classifier with fresh weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> PlantClassifier<B> {
        let last = self.last_channels();
        PlantClassifier {
            extractor: MobileNetExtractor::new(self, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc1: LinearConfig::new(last, self.hidden_units).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            predictions: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

/// Borrowed view of one parameterised layer
pub enum LayerRef<'a, B: Backend> {
    Conv(&'a Conv2d<B>),
    Norm(&'a BatchNorm<B, 2>),
    Dense(&'a Linear<B>),
}

impl<B: Backend> LayerRef<'_, B> {
    /// Ids of the learnable tensors (running statistics excluded)
    pub fn param_ids(&self) -> Vec<ParamId> {
        match self {
            LayerRef::Conv(conv) => std::iter::once(conv.weight.id)
                .chain(conv.bias.as_ref().map(|b| b.id))
                .collect(),
            LayerRef::Norm(bn) => vec![bn.gamma.id, bn.beta.id],
            LayerRef::Dense(linear) => std::iter::once(linear.weight.id)
                .chain(linear.bias.as_ref().map(|b| b.id))
                .collect(),
        }
    }
}

/// Mutable view of one parameterised layer
pub enum LayerMut<'a, B: Backend> {
    Conv(&'a mut Conv2d<B>),
    Norm(&'a mut BatchNorm<B, 2>),
    Dense(&'a mut Linear<B>),
}

/// Convolution followed by batch normalization
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBn<B> {
    fn new(config: Conv2dConfig, channels: usize, device: &B::Device) -> Self {
        Self {
            conv: config.with_bias(false).init(device),
            bn: BatchNormConfig::new(channels).with_epsilon(BN_EPSILON).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>, relu6: bool) -> Tensor<B, 4> {
        let x = self.normalize(self.conv.forward(x));
        if relu6 {
            x.clamp(0.0, 6.0)
        } else {
            x
        }
    }

    /// Normalizes with the stored running statistics, in training as well as
    /// inference. The extractor always runs in inference mode, so its running
    /// statistics never move; gamma and beta still learn once unfrozen.
    fn normalize(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = x.dims();
        let shape = [1, channels, 1, 1];
        let mean = self.bn.running_mean.value().reshape(shape);
        let var = self.bn.running_var.value().reshape(shape);
        let gamma = self.bn.gamma.val().reshape(shape);
        let beta = self.bn.beta.val().reshape(shape);

        x.sub(mean).div(var.add_scalar(self.bn.epsilon).sqrt()).mul(gamma).add(beta)
    }

    fn push<'a>(&'a self, conv_id: String, bn_id: String, out: &mut Vec<(String, LayerRef<'a, B>)>) {
        out.push((conv_id, LayerRef::Conv(&self.conv)));
        out.push((bn_id, LayerRef::Norm(&self.bn)));
    }

    fn push_mut<'a>(&'a mut self, conv_id: String, bn_id: String, out: &mut Vec<(String, LayerMut<'a, B>)>) {
        let ConvBn { conv, bn } = self;
        out.push((conv_id, LayerMut::Conv(conv)));
        out.push((bn_id, LayerMut::Norm(bn)));
    }
}

/// Expand (1x1) -> depthwise (3x3) -> linear projection (1x1), with a
/// skip connection when the block preserves shape.
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    pub expand: Option<ConvBn<B>>,
    pub depthwise: ConvBn<B>,
    pub project: ConvBn<B>,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(spec: &BlockSpec, device: &B::Device) -> Self {
        let expand = spec
            .expand
            .then(|| ConvBn::new(Conv2dConfig::new([spec.input, spec.expanded], [1, 1]), spec.expanded, device));
        let depthwise = ConvBn::new(
            Conv2dConfig::new([spec.expanded, spec.expanded], [3, 3])
                .with_groups(spec.expanded)
                .with_stride([spec.stride, spec.stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1)),
            spec.expanded,
            device,
        );
        let project = ConvBn::new(Conv2dConfig::new([spec.expanded, spec.output], [1, 1]), spec.output, device);

        Self {
            expand,
            depthwise,
            project,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone(), true),
            None => input.clone(),
        };
        let x = self.depthwise.forward(x, true);
        let x = self.project.forward(x, false);

        // Stride 1 with equal channel counts keeps the shape
        if x.dims() == input.dims() {
            x + input
        } else {
            x
        }
    }
}

/// Convolutional feature extractor
#[derive(Module, Debug)]
pub struct MobileNetExtractor<B: Backend> {
    pub stem: ConvBn<B>,
    pub blocks: Vec<InvertedResidual<B>>,
    pub last_conv: ConvBn<B>,
}

impl<B: Backend> MobileNetExtractor<B> {
    pub fn new(config: &ClassifierConfig, device: &B::Device) -> Self {
        let stem_channels = config.stem_channels();
        let stem = ConvBn::new(
            Conv2dConfig::new([3, stem_channels], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1)),
            stem_channels,
            device,
        );

        let specs = config.block_specs();
        let blocks = specs.iter().map(|spec| InvertedResidual::new(spec, device)).collect();

        let features = specs.last().map(|s| s.output).unwrap_or(stem_channels);
        let last = config.last_channels();
        let last_conv = ConvBn::new(Conv2dConfig::new([features, last], [1, 1]), last, device);

        Self {
            stem,
            blocks,
            last_conv,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.stem.forward(x, true);
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.last_conv.forward(x, true)
    }

    /// Parameterised layers in forward order, with their ids
    pub fn layers(&self) -> Vec<(String, LayerRef<'_, B>)> {
        let mut out = Vec::new();
        self.stem.push("Conv1".into(), "bn_Conv1".into(), &mut out);
        for (i, block) in self.blocks.iter().enumerate() {
            let p = block_prefix(i);
            if let Some(expand) = &block.expand {
                expand.push(format!("{p}_expand"), format!("{p}_expand_BN"), &mut out);
            }
            block.depthwise.push(format!("{p}_depthwise"), format!("{p}_depthwise_BN"), &mut out);
            block.project.push(format!("{p}_project"), format!("{p}_project_BN"), &mut out);
        }
        self.last_conv.push("Conv_1".into(), "Conv_1_bn".into(), &mut out);
        out
    }

    pub fn layers_mut(&mut self) -> Vec<(String, LayerMut<'_, B>)> {
        let mut out = Vec::new();
        let MobileNetExtractor {
            stem,
            blocks,
            last_conv,
        } = self;
        stem.push_mut("Conv1".into(), "bn_Conv1".into(), &mut out);
        for (i, block) in blocks.iter_mut().enumerate() {
            let p = block_prefix(i);
            let InvertedResidual {
                expand,
                depthwise,
                project,
            } = block;
            if let Some(expand) = expand {
                expand.push_mut(format!("{p}_expand"), format!("{p}_expand_BN"), &mut out);
            }
            depthwise.push_mut(format!("{p}_depthwise"), format!("{p}_depthwise_BN"), &mut out);
            project.push_mut(format!("{p}_project"), format!("{p}_project_BN"), &mut out);
        }
        last_conv.push_mut("Conv_1".into(), "Conv_1_bn".into(), &mut out);
        out
    }
}

/// Plant disease classifier: extractor plus classification head
#[derive(Module, Debug)]
pub struct PlantClassifier<B: Backend> {
    pub extractor: MobileNetExtractor<B>,
    pool: AdaptiveAvgPool2d,
    pub fc1: Linear<B>,
    dropout: Dropout,
    pub predictions: Linear<B>,
    activation: Relu,
}

impl<B: Backend> PlantClassifier<B> {
    /// Unnormalized class scores, `[batch, num_classes]`
    pub fn forward_logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = images.mul_scalar(2.0).sub_scalar(1.0);
        let x = self.extractor.forward(x);
        let x = self.pool.forward(x);

        // Flatten [batch, channels, 1, 1] -> [batch, channels]
        let [batch, channels, _, _] = x.dims();
        let x: Tensor<B, 2> = x.reshape([batch, channels]);

        let x = self.activation.forward(self.fc1.forward(x));
        let x = self.dropout.forward(x);
        self.predictions.forward(x)
    }

    /// Class probabilities; each row is non-negative and sums to 1
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward_logits(images), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.predictions.weight.dims()[1]
    }

    pub fn layers(&self) -> Vec<(String, LayerRef<'_, B>)> {
        let mut out = self.extractor.layers();
        out.push(("fc1".to_string(), LayerRef::Dense(&self.fc1)));
        out.push(("predictions".to_string(), LayerRef::Dense(&self.predictions)));
        out
    }

    pub fn layers_mut(&mut self) -> Vec<(String, LayerMut<'_, B>)> {
        let PlantClassifier {
            extractor,
            fc1,
            predictions,
            ..
        } = self;
        let mut out = extractor.layers_mut();
        out.push(("fc1".to_string(), LayerMut::Dense(fc1)));
        out.push(("predictions".to_string(), LayerMut::Dense(predictions)));
        out
    }

    /// Learnable parameter ids of the given layers
    pub fn param_ids_of(&self, layer_ids: &[&str]) -> Vec<ParamId> {
        self.layers()
            .into_iter()
            .filter(|(id, _)| layer_ids.contains(&id.as_str()))
            .flat_map(|(_, layer)| layer.param_ids())
            .collect()
    }
}

/// Categorical cross-entropy between logits and one-hot targets
pub fn categorical_cross_entropy<B: Backend>(logits: Tensor<B, 2>, one_hot: Tensor<B, 2>) -> Tensor<B, 1> {
    log_softmax(logits, 1).mul(one_hot).sum_dim(1).mean().neg()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn small_config() -> ClassifierConfig {
        ClassifierConfig::new()
            .with_image_size(32)
            .with_width_multiplier(0.35)
            .with_hidden_units(16)
    }

    #[test]
    fn test_make_divisible() {
        assert_eq!(make_divisible(32.0, 8), 32);
        assert_eq!(make_divisible(11.2, 8), 16);
        assert_eq!(make_divisible(3.0, 8), 8);
        assert_eq!(make_divisible(112.0, 8), 112);
    }

    #[test]
    fn test_full_width_layer_count_and_params() {
        let plan = ClassifierConfig::new().describe(false);
        let extractor: Vec<_> = plan.layers.iter().filter(|l| l.stage == Stage::Extractor).collect();

        assert_eq!(extractor.len(), 104);
        assert_eq!(extractor.first().unwrap().id, "Conv1");
        assert_eq!(extractor.last().unwrap().id, "Conv_1_bn");
        assert_eq!(extractor.iter().map(|l| l.params + l.buffers).sum::<usize>(), 2_257_984);
        assert_eq!(extractor.iter().map(|l| l.buffers).sum::<usize>(), 34_112);
    }

    #[test]
    fn test_describe_stage_order() {
        let plan = ClassifierConfig::new().describe(true);
        let ids: Vec<&str> = plan.layers.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(&ids[..3], &["random_augmentation", "rescaling", "Conv1"]);
        assert_eq!(&ids[ids.len() - 4..], &["global_average_pooling2d", "fc1", "dropout", "predictions"]);
        assert!(!ClassifierConfig::new().describe(false).has_augmentation());
    }

    #[test]
    fn test_residual_blocks() {
        let specs = ClassifierConfig::new().block_specs();
        assert_eq!(specs.len(), 17);
        assert!(!specs[0].expand);
        assert!(!specs[1].is_residual());
        assert!(specs[2].is_residual());
        assert_eq!(specs.iter().filter(|s| s.is_residual()).count(), 10);
    }

    #[test]
    fn test_module_layers_match_descriptors() {
        let config = small_config();
        let device = Default::default();
        let model = config.init::<TestBackend>(&device);

        let described: Vec<String> = config
            .describe(false)
            .layers
            .into_iter()
            .filter(|l| l.params > 0)
            .map(|l| l.id)
            .collect();
        let actual: Vec<String> = model.layers().into_iter().map(|(id, _)| id).collect();
        assert_eq!(actual, described);
    }

    #[test]
    fn test_forward_is_distribution() {
        let config = small_config();
        let device = Default::default();
        let model = config.init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::ones([2, 3, 32, 32], &device).mul_scalar(0.5);
        let probs = model.forward(images);
        assert_eq!(probs.dims(), [2, 38]);

        let values: Vec<f32> = probs.clone().into_data().to_vec().unwrap();
        assert!(values.iter().all(|p| *p >= 0.0));
        let sums: Vec<f32> = probs.sum_dim(1).into_data().to_vec().unwrap();
        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_cross_entropy_of_uniform_logits() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::zeros([1, 4], &device);
        let one_hot = Tensor::<TestBackend, 2>::from_floats([[0.0, 1.0, 0.0, 0.0]], &device);
        let loss: f32 = categorical_cross_entropy(logits, one_hot).into_scalar();
        assert!((loss - 4.0f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_normalize_uses_running_statistics() {
        use burn::module::RunningState;

        let device = Default::default();
        let mut block = ConvBn::<TestBackend>::new(Conv2dConfig::new([3, 4], [1, 1]), 4, &device);
        block.bn.running_mean = RunningState::new(Tensor::from_floats([0.5, -0.25, 1.0, 0.0], &device));
        block.bn.running_var = RunningState::new(Tensor::from_floats([2.0, 0.5, 1.0, 4.0], &device));

        let x = Tensor::<TestBackend, 4>::random([2, 3, 5, 5], burn::tensor::Distribution::Default, &device);
        let expected: Vec<f32> = block.bn.forward(block.conv.forward(x.clone())).into_data().to_vec().unwrap();
        let actual: Vec<f32> = block.forward(x, false).into_data().to_vec().unwrap();

        for (a, e) in actual.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-5);
        }
    }

    #[test]
    fn test_param_ids_of() {
        let device = Default::default();
        let model = small_config().init::<TestBackend>(&device);
        assert_eq!(model.param_ids_of(&["fc1"]).len(), 2);
        assert_eq!(model.param_ids_of(&["Conv1", "bn_Conv1"]).len(), 3);
        assert!(model.param_ids_of(&["dropout"]).is_empty());
    }
}
