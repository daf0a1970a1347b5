//! Burn implementation of the training engine.

use std::fs;
use std::path::Path;

use burn::data::dataloader::batcher::Batcher;
use burn::module::{AutodiffModule, ParamId};
use burn::optim::{GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use indicatif::{ProgressBar, ProgressStyle};
use plant_core::{Error, Phase, Result};
use plant_dataset::{ClassifierBatch, ClassifierBatcher, SampleBatch};
use tracing::{debug, info};

use crate::engine::{PassSummary, TrainingEngine};
use crate::layers::LayerPlan;
use crate::model::{categorical_cross_entropy, PlantClassifier};

/// Running sums over a pass
#[derive(Default)]
struct PassTotals {
    loss_sum: f64,
    correct: usize,
    samples: usize,
}

impl PassTotals {
    fn add(&mut self, batch_loss: f64, correct: usize, batch_size: usize) {
        self.loss_sum += batch_loss * batch_size as f64;
        self.correct += correct;
        self.samples += batch_size;
    }

    fn summary(&self) -> PassSummary {
        if self.samples == 0 {
            return PassSummary::empty();
        }
        PassSummary {
            loss: self.loss_sum / self.samples as f64,
            accuracy: self.correct as f64 / self.samples as f64,
            samples: self.samples,
        }
    }
}

fn correct_predictions<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    let predictions: Tensor<B, 1, Int> = logits.argmax(1).reshape([batch_size]);
    predictions.equal(targets).int().sum().into_scalar().elem::<i64>() as usize
}

fn batch_bar(len: Option<usize>, visible: bool, label: &str) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len.unwrap_or(0) as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("  {msg:5} [{bar:30.cyan/blue}] {pos}/{len} batches ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    bar.set_message(label.to_string());
    bar
}

/// Optimizes a [`PlantClassifier`] with a per-phase optimizer and trainable mask.
pub struct BurnEngine<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<PlantClassifier<B>, B>,
{
    model: PlantClassifier<B>,
    optimizer: O,
    new_optimizer: Box<dyn Fn() -> O>,
    trainable: Vec<ParamId>,
    device: B::Device,
    show_progress: bool,
}

impl<B, O> BurnEngine<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<PlantClassifier<B>, B>,
{
    /// `new_optimizer` is called once now and again at every phase start.
    pub fn new(model: PlantClassifier<B>, device: B::Device, new_optimizer: impl Fn() -> O + 'static) -> Self {
        Self {
            model,
            optimizer: new_optimizer(),
            new_optimizer: Box::new(new_optimizer),
            trainable: Vec::new(),
            device,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn model(&self) -> &PlantClassifier<B> {
        &self.model
    }

    pub fn into_model(self) -> PlantClassifier<B> {
        self.model
    }
}

impl<B, O> TrainingEngine for BurnEngine<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<PlantClassifier<B>, B>,
{
    type Snapshot = <PlantClassifier<B> as Module<B>>::Record;

    fn begin_phase(&mut self, phase: Phase, layers: &LayerPlan) -> Result<()> {
        self.trainable = self.model.param_ids_of(&layers.trainable_ids());
        self.optimizer = (self.new_optimizer)();
        info!(
            "Phase {}: {} trainable tensors, fresh optimizer state",
            phase,
            self.trainable.len()
        );
        Ok(())
    }

    fn train_pass<I>(&mut self, batches: I, learning_rate: f64) -> Result<PassSummary>
    where
        I: Iterator<Item = Result<SampleBatch>>,
    {
        let bar = batch_bar(batches.size_hint().1, self.show_progress, "train");
        let mut totals = PassTotals::default();

        for batch in batches {
            let batch: ClassifierBatch<B> = ClassifierBatcher.batch(batch?.samples, &self.device);
            let batch_size = batch.batch_size();

            let model = self.model.clone();
            let logits = model.forward_logits(batch.images);
            let loss = categorical_cross_entropy(logits.clone(), batch.one_hot);
            let loss_value = loss.clone().into_scalar().elem::<f64>();
            let correct = correct_predictions(logits, batch.targets);

            let mut grads = loss.backward();
            let grads = GradientsParams::from_params(&mut grads, &model, &self.trainable);
            self.model = self.optimizer.step(learning_rate, model, grads);

            totals.add(loss_value, correct, batch_size);
            bar.inc(1);
        }

        bar.finish_and_clear();
        let summary = totals.summary();
        debug!("Train pass: {:?}", summary);
        Ok(summary)
    }

    fn eval_pass<I>(&mut self, batches: I) -> Result<PassSummary>
    where
        I: Iterator<Item = Result<SampleBatch>>,
    {
        let model = self.model.valid();
        let device = model.devices().into_iter().next().unwrap_or_default();
        let bar = batch_bar(batches.size_hint().1, self.show_progress, "val");
        let mut totals = PassTotals::default();

        for batch in batches {
            let batch: ClassifierBatch<B::InnerBackend> = ClassifierBatcher.batch(batch?.samples, &device);
            let batch_size = batch.batch_size();

            let logits = model.forward_logits(batch.images);
            let loss = categorical_cross_entropy(logits.clone(), batch.one_hot);
            let correct = correct_predictions(logits, batch.targets);

            totals.add(loss.into_scalar().elem::<f64>(), correct, batch_size);
            bar.inc(1);
        }

        bar.finish_and_clear();
        let summary = totals.summary();
        debug!("Eval pass: {:?}", summary);
        Ok(summary)
    }

    fn snapshot(&self) -> Self::Snapshot {
        self.model.clone().into_record()
    }

    fn restore(&mut self, snapshot: Self::Snapshot) {
        self.model = self.model.clone().load_record(snapshot);
    }

    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Serialization(format!("Cannot create checkpoint directory {}: {e}", parent.display()))
            })?;
        }
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        self.model.clone().save_file(path.to_path_buf(), &recorder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModelBuilder;
    use crate::layers::unfreeze_tail;
    use crate::model::ClassifierConfig;
    use crate::params::ParamDict;
    use burn::backend::Autodiff;
    use burn::optim::AdamConfig;
    use burn_ndarray::NdArray;
    use plant_core::{ImageDimensions, LabelSet};
    use plant_dataset::ImageSample;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    const SIZE: usize = 32;

    fn batches(count: usize) -> Vec<Result<SampleBatch>> {
        let labels = LabelSet::plant_village();
        let dims = ImageDimensions::square(SIZE);
        (0..count)
            .map(|b| {
                let samples = (0..2)
                    .map(|i| {
                        let value = (b * 2 + i) as f32 / 10.0;
                        ImageSample::new(vec![value; dims.num_values()], dims, i, &labels).unwrap()
                    })
                    .collect();
                Ok(SampleBatch { samples })
            })
            .collect()
    }

    fn engine() -> (
        BurnEngine<TestBackend, impl Optimizer<PlantClassifier<TestBackend>, TestBackend>>,
        crate::builder::ClassifierModel<TestBackend>,
        crate::layers::ExtractorHandle,
    ) {
        let device = Default::default();
        let builder = ModelBuilder::new(
            ClassifierConfig::new()
                .with_image_size(SIZE)
                .with_width_multiplier(0.35)
                .with_hidden_units(8),
        );
        let (model, extractor) = builder.build::<TestBackend>(false, &device).unwrap();
        let engine = BurnEngine::new(model.network.clone(), device, || {
            AdamConfig::new()
                .with_epsilon(1e-7)
                .init::<TestBackend, PlantClassifier<TestBackend>>()
        })
        .with_progress(false);
        (engine, model, extractor)
    }

    #[test]
    fn test_train_pass_respects_frozen_layers() {
        let (mut engine, model, _) = engine();
        engine.begin_phase(Phase::Transfer, &model.layers).unwrap();

        let before = ParamDict::export(engine.model()).unwrap();
        let summary = engine.train_pass(batches(2).into_iter(), 1e-2).unwrap();
        let after = ParamDict::export(engine.model()).unwrap();

        assert_eq!(summary.samples, 4);
        assert!(summary.loss.is_finite());
        assert!((0.0..=1.0).contains(&summary.accuracy));
        assert_eq!(before.get("Conv1.weight"), after.get("Conv1.weight"));
        assert_eq!(before.get("block_16_project.weight"), after.get("block_16_project.weight"));
        assert_ne!(before.get("predictions.weight"), after.get("predictions.weight"));
    }

    #[test]
    fn test_frozen_batch_norm_statistics_are_untouched() {
        let (mut engine, model, _) = engine();
        engine.begin_phase(Phase::Transfer, &model.layers).unwrap();

        let before = ParamDict::export(engine.model()).unwrap();
        engine.train_pass(batches(2).into_iter(), 1e-2).unwrap();
        let after = ParamDict::export(engine.model()).unwrap();

        for key in ["bn_Conv1.running_mean", "bn_Conv1.running_var", "Conv_1_bn.running_var"] {
            assert!(before.get(key).is_some());
            assert_eq!(before.get(key), after.get(key), "{key} moved");
        }
        assert_eq!(before.get("bn_Conv1.gamma"), after.get("bn_Conv1.gamma"));
    }

    #[test]
    fn test_unfrozen_tail_is_updated() {
        let (mut engine, model, extractor) = engine();
        let plan = unfreeze_tail(&model.layers, &extractor, 2);
        engine.begin_phase(Phase::FineTune, &plan).unwrap();

        let before = ParamDict::export(engine.model()).unwrap();
        engine.train_pass(batches(1).into_iter(), 1e-2).unwrap();
        let after = ParamDict::export(engine.model()).unwrap();

        assert_ne!(before.get("Conv_1.weight"), after.get("Conv_1.weight"));
        assert_ne!(before.get("Conv_1_bn.gamma"), after.get("Conv_1_bn.gamma"));
        assert_eq!(before.get("Conv_1_bn.running_mean"), after.get("Conv_1_bn.running_mean"));
        assert_eq!(before.get("block_16_project.weight"), after.get("block_16_project.weight"));
    }

    #[test]
    fn test_eval_pass_is_deterministic() {
        let (mut engine, model, _) = engine();
        engine.begin_phase(Phase::Transfer, &model.layers).unwrap();
        let a = engine.eval_pass(batches(2).into_iter()).unwrap();
        let b = engine.eval_pass(batches(2).into_iter()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.samples, 4);
    }

    #[test]
    fn test_empty_pass() {
        let (mut engine, model, _) = engine();
        engine.begin_phase(Phase::Transfer, &model.layers).unwrap();
        let summary = engine.eval_pass(std::iter::empty()).unwrap();
        assert_eq!(summary, PassSummary::empty());
    }

    #[test]
    fn test_snapshot_restore() {
        let (mut engine, model, _) = engine();
        engine.begin_phase(Phase::Transfer, &model.layers).unwrap();

        let expected = ParamDict::export(engine.model()).unwrap();
        let snapshot = engine.snapshot();
        engine.train_pass(batches(2).into_iter(), 1e-2).unwrap();
        engine.restore(snapshot);

        let restored = ParamDict::export(engine.model()).unwrap();
        assert_eq!(expected.get("predictions.weight"), restored.get("predictions.weight"));
        assert_eq!(expected.get("bn_Conv1.running_mean"), restored.get("bn_Conv1.running_mean"));
    }

    #[test]
    fn test_save_checkpoint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("best_model.mpk");
        let (engine, _, _) = engine();
        engine.save_checkpoint(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_unwritable_checkpoint_is_serialization_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"file").unwrap();
        let (engine, _, _) = engine();

        let result = engine.save_checkpoint(&blocker.join("best_model.mpk"));
        assert!(matches!(result, Err(Error::Serialization(_))), "{result:?}");
    }

    #[test]
    fn test_batch_error_aborts_pass() {
        let (mut engine, model, _) = engine();
        engine.begin_phase(Phase::Transfer, &model.layers).unwrap();
        let mut input = batches(1);
        input.push(Err(Error::Input("corrupt image".into())));
        assert!(engine.train_pass(input.into_iter(), 1e-3).is_err());
    }
}
