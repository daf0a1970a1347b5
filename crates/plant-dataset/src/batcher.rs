//! Conversion of preprocessed samples into burn tensors.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use burn::tensor::TensorData;

use crate::dataset::ImageSample;

/// Batch of images with one-hot targets and class indices
#[derive(Clone, Debug)]
pub struct ClassifierBatch<B: Backend> {
    /// `[batch, 3, height, width]`, values in [0, 1]
    pub images: Tensor<B, 4>,
    /// `[batch, num_classes]`
    pub one_hot: Tensor<B, 2>,
    /// `[batch]`
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ClassifierBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.targets.dims()[0]
    }
}

/// Stateless batcher; shapes come from the samples themselves.
#[derive(Clone, Debug, Default)]
pub struct ClassifierBatcher;

impl<B: Backend> Batcher<B, ImageSample, ClassifierBatch<B>> for ClassifierBatcher {
    fn batch(&self, items: Vec<ImageSample>, device: &B::Device) -> ClassifierBatch<B> {
        let batch_size = items.len();
        let [channels, height, width] = items
            .first()
            .map(|s| s.dims.chw())
            .unwrap_or([3, 0, 0]);
        let num_classes = items.first().map(|s| s.target.len()).unwrap_or(0);

        let images_data: Vec<f32> = items.iter().flat_map(|s| s.pixels.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, channels, height, width]),
            device,
        );

        let one_hot_data: Vec<f32> = items.iter().flat_map(|s| s.target.iter().copied()).collect();
        let one_hot = Tensor::<B, 2>::from_floats(
            TensorData::new(one_hot_data, [batch_size, num_classes]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|s| s.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ClassifierBatch {
            images,
            one_hot,
            targets,
        }
    }
}
