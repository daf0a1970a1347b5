//! PlantVillage dataset pipeline.
//!
//! Loads class-per-directory images (locally or from a cached remote
//! archive), splits them deterministically, and serves per-epoch batch
//! streams that preprocess, augment (training only) and prefetch on a
//! producer thread.

pub mod augmentation;
pub mod batcher;
pub mod dataset;
pub mod loader;
pub mod pipeline;
pub mod preprocess;
pub mod remote;
pub mod split;
pub mod stream;

pub use augmentation::Augmenter;
pub use batcher::{ClassifierBatch, ClassifierBatcher};
pub use dataset::{ImageSample, LabeledImage, SampleBatch};
pub use loader::ImageLoader;
pub use pipeline::{DatasetPipeline, DatasetSource};
pub use preprocess::ImagePreprocessor;
pub use remote::RemoteDataset;
pub use split::{DatasetSplit, SplitConfig};
pub use stream::BatchStream;
