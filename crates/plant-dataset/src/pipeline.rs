//! Dataset pipeline: source resolution, split, and per-epoch streams.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use plant_core::{DataConfig, Error, LabelSet, Result};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use crate::augmentation::Augmenter;
use crate::dataset::LabeledImage;
use crate::loader::ImageLoader;
use crate::preprocess::ImagePreprocessor;
use crate::remote::RemoteDataset;
use crate::split::{DatasetSplit, SplitConfig};
use crate::stream::{BatchStream, StreamSpec};

/// Where the images come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSource {
    Local(PathBuf),
    Remote { url: String, cache_dir: PathBuf },
}

impl DatasetSource {
    /// A readable local directory wins; otherwise the remote archive is used.
    ///
    /// A local path that is given but missing or unreadable is not an error
    /// by itself: the remote copy replaces it, with a warning.
    pub fn resolve(config: &DataConfig) -> Result<Self> {
        if let Some(dir) = &config.data_dir {
            if is_readable_dir(dir) {
                return Ok(DatasetSource::Local(dir.clone()));
            }
            warn!(
                "Dataset directory {} is missing or unreadable, falling back to the remote copy",
                dir.display()
            );
        }

        match config.resolved_remote_url() {
            Some(url) => Ok(DatasetSource::Remote {
                url,
                cache_dir: config.cache_dir.clone(),
            }),
            None => Err(Error::Input(format!(
                "No usable dataset: provide a readable data directory or set a remote archive URL ({})",
                plant_core::DATASET_URL_ENV
            ))),
        }
    }
}

fn is_readable_dir(dir: &Path) -> bool {
    dir.is_dir() && std::fs::read_dir(dir).is_ok()
}

/// Train/validation streams over a fixed split of the dataset.
pub struct DatasetPipeline {
    train: Arc<[LabeledImage]>,
    validation: Arc<[LabeledImage]>,
    labels: LabelSet,
    preprocessor: ImagePreprocessor,
    augmenter: Augmenter,
    batch_size: usize,
    prefetch: usize,
    seed: u64,
}

impl DatasetPipeline {
    /// Resolves the source, scans it and splits it. Fails before any
    /// batch is produced if no images can be found.
    pub fn load(config: &DataConfig, labels: LabelSet) -> Result<Self> {
        let root = match DatasetSource::resolve(config)? {
            DatasetSource::Local(dir) => {
                info!("Loading from local directory: {}", dir.display());
                dir
            }
            DatasetSource::Remote { url, cache_dir } => {
                RemoteDataset::new(url, cache_dir).fetch(&labels)?
            }
        };

        let images = ImageLoader::new(&root).scan_class_directories(&labels)?;
        let split = DatasetSplit::from_images(
            images,
            &SplitConfig {
                validation_split: config.validation_split,
                seed: config.seed,
                stratified: config.stratified,
            },
        )?;
        info!(
            "Found {} images: {} for training, {} for validation",
            split.total(),
            split.train.len(),
            split.validation.len()
        );

        Ok(Self::from_split(split, labels, config))
    }

    pub fn from_split(split: DatasetSplit, labels: LabelSet, config: &DataConfig) -> Self {
        Self {
            train: split.train.into(),
            validation: split.validation.into(),
            labels,
            preprocessor: ImagePreprocessor::new(config.image_size),
            augmenter: Augmenter::new(config.augmentation.clone()),
            batch_size: config.batch_size,
            prefetch: config.prefetch_batches,
            seed: config.seed,
        }
    }

    /// Training pass for `epoch`: reshuffled, augmented when `augment` is set.
    pub fn train_stream(&self, epoch: usize, augment: bool) -> BatchStream {
        let mut order: Vec<usize> = (0..self.train.len()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
        order.shuffle(&mut rng);

        let augmenter = (augment && self.augmenter.config().enabled).then(|| self.augmenter.clone());
        BatchStream::spawn(self.spec(self.train.clone(), order, augmenter))
    }

    /// Validation pass: fixed order, never augmented.
    pub fn val_stream(&self) -> BatchStream {
        let order = (0..self.validation.len()).collect();
        BatchStream::spawn(self.spec(self.validation.clone(), order, None))
    }

    fn spec(&self, items: Arc<[LabeledImage]>, order: Vec<usize>, augmenter: Option<Augmenter>) -> StreamSpec {
        StreamSpec {
            items,
            order,
            batch_size: self.batch_size,
            prefetch: self.prefetch,
            preprocessor: self.preprocessor.clone(),
            labels: self.labels.clone(),
            augmenter,
        }
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn num_train(&self) -> usize {
        self.train.len()
    }

    pub fn num_validation(&self) -> usize {
        self.validation.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}
