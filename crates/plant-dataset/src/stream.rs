//! Prefetching batch streams.
//!
//! A producer thread decodes, preprocesses and (for training) augments
//! batches and pushes them into a bounded channel. The producer blocks when
//! `prefetch` batches are waiting; the consumer blocks when none are ready.
//! Dropping the stream disconnects the channel and joins the producer. A
//! producer panic surfaces as one final `Err` item.

use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

use plant_core::{Error, LabelSet, Result};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::augmentation::Augmenter;
use crate::dataset::{LabeledImage, SampleBatch};
use crate::preprocess::ImagePreprocessor;

/// Everything the producer thread needs, shared read-only.
#[derive(Clone)]
pub(crate) struct StreamSpec {
    pub items: Arc<[LabeledImage]>,
    pub order: Vec<usize>,
    pub batch_size: usize,
    pub prefetch: usize,
    pub preprocessor: ImagePreprocessor,
    pub labels: LabelSet,
    pub augmenter: Option<Augmenter>,
}

/// Lazily produced, ordered sequence of batches for one pass.
pub struct BatchStream {
    rx: Option<Receiver<Result<SampleBatch>>>,
    worker: Option<JoinHandle<()>>,
    num_batches: usize,
    yielded: usize,
}

impl BatchStream {
    pub(crate) fn spawn(spec: StreamSpec) -> Self {
        let num_batches = spec.order.len().div_ceil(spec.batch_size.max(1));
        let (tx, rx) = sync_channel::<Result<SampleBatch>>(spec.prefetch.max(1));

        let worker = std::thread::spawn(move || {
            for chunk in spec.order.chunks(spec.batch_size.max(1)) {
                let batch = produce_batch(&spec, chunk);
                let failed = batch.is_err();
                if tx.send(batch).is_err() {
                    debug!("Batch stream consumer dropped, producer exiting");
                    break;
                }
                if failed {
                    break;
                }
            }
        });

        Self {
            rx: Some(rx),
            worker: Some(worker),
            num_batches,
            yielded: 0,
        }
    }

    /// Number of batches this pass will yield if nothing fails
    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    /// Disconnects and joins the producer, returning its panic as an error.
    fn finish(&mut self) -> Option<Error> {
        self.rx.take();
        let panic = self.worker.take()?.join().err()?;
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown cause".to_string());
        Some(Error::Input(format!("Batch producer panicked: {message}")))
    }
}

impl Iterator for BatchStream {
    type Item = Result<SampleBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rx.as_ref()?.recv() {
            Ok(batch) => {
                self.yielded += 1;
                Some(batch)
            }
            Err(_) => self.finish().map(Err),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.num_batches.saturating_sub(self.yielded)))
    }
}

impl Drop for BatchStream {
    fn drop(&mut self) {
        if let Some(err) = self.finish() {
            warn!("{}", err);
        }
    }
}

fn produce_batch(spec: &StreamSpec, chunk: &[usize]) -> Result<SampleBatch> {
    // Per-sample seeds are drawn up front so decoding can run in parallel.
    let seeds: Vec<u64> = match spec.augmenter {
        Some(_) => {
            let mut rng = ChaCha8Rng::seed_from_u64(rand::random::<u64>());
            chunk.iter().map(|_| rng.gen()).collect()
        }
        None => vec![0; chunk.len()],
    };

    let samples = chunk
        .par_iter()
        .zip(seeds.par_iter())
        .map(|(&idx, &seed)| {
            let mut sample = spec.preprocessor.load_sample(&spec.items[idx], &spec.labels)?;
            if let Some(augmenter) = &spec.augmenter {
                augmenter.augment(&mut sample, &mut ChaCha8Rng::seed_from_u64(seed));
            }
            Ok(sample)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(SampleBatch { samples })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::test_support::create_test_image;
    use tempfile::TempDir;

    fn spec_for(dir: &TempDir, count: usize, batch_size: usize, prefetch: usize) -> StreamSpec {
        let items: Vec<LabeledImage> = (0..count)
            .map(|i| {
                let path = dir.path().join(format!("leaf_{i}.png"));
                create_test_image(&path, 6, 6, [i as u8 * 10, 0, 0]);
                LabeledImage::new(path, i % 38)
            })
            .collect();
        StreamSpec {
            items: items.into(),
            order: (0..count).collect(),
            batch_size,
            prefetch,
            preprocessor: ImagePreprocessor::new(4),
            labels: LabelSet::plant_village(),
            augmenter: None,
        }
    }

    #[test]
    fn test_stream_yields_all_batches_in_order() {
        let dir = TempDir::new().unwrap();
        let stream = BatchStream::spawn(spec_for(&dir, 7, 3, 1));
        assert_eq!(stream.num_batches(), 3);

        let batches: Vec<SampleBatch> = stream.map(|b| b.unwrap()).collect();
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);

        let labels: Vec<usize> = batches.iter().flat_map(|b| b.samples.iter().map(|s| s.label)).collect();
        assert_eq!(labels, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_dropping_stream_early_joins_producer() {
        let dir = TempDir::new().unwrap();
        let mut stream = BatchStream::spawn(spec_for(&dir, 10, 1, 1));
        assert!(stream.next().is_some());
        drop(stream);
    }

    #[test]
    fn test_decode_error_is_forwarded() {
        let dir = TempDir::new().unwrap();
        let mut spec = spec_for(&dir, 2, 1, 2);
        let mut items: Vec<LabeledImage> = spec.items.to_vec();
        items[1].path = dir.path().join("missing.png");
        spec.items = items.into();

        let results: Vec<Result<SampleBatch>> = BatchStream::spawn(spec).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::Input(_))));
    }

    #[test]
    fn test_producer_panic_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut spec = spec_for(&dir, 2, 1, 2);
        // Index past the end makes the producer panic on the second batch
        spec.order = vec![0, 5];

        let results: Vec<Result<SampleBatch>> = BatchStream::spawn(spec).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(Error::Input(message)) => assert!(message.contains("panicked"), "{message}"),
            other => panic!("expected producer panic error, got {other:?}"),
        }
    }
}
