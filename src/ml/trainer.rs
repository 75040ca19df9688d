// ============================================================
// Layer 5 - Training Loop
// ============================================================
// Init → {TrainEpoch → ValidateEpoch → SelectBest} × N → Finalize
//
//   TrainEpoch:    DataLoaderBuilder with a seeded shuffle over a
//                  RandomFlip-mapped dataset, cross-entropy, Adam
//                  step with weight decay.
//                  epoch loss = total batch loss / batches
//                  epoch acc  = correct / samples
//   ValidateEpoch: unshuffled loader on model.valid(), i.e. the
//                  inner backend with no autodiff graph.
//                  Runs every epoch.
//   SelectBest:    val_loss and val_acc offered to their own
//                  trackers; a record of the model is captured
//                  only on strict improvement.
//   Finalize:      the record for the configured metric is
//                  loaded back into the model.
//
// Burn's loader iterator stops at the first item a dataset
// cannot produce, so every pass counts its samples and fails
// with InvalidInput when it saw fewer than the dataset holds.
//
// No retries: any error aborts the run and nothing is logged
// to the registry.
//
// Key Burn insight:
//   - Training runs on B (an AutodiffBackend) for gradients
//   - model.valid() returns the model on B::InnerBackend
//   - the validation loader must also batch on B::InnerBackend
//   - frozen trunk parameters never reach GradientsParams, so
//     Adam only updates what still requires gradients
//   - a module clone shares BatchNorm running statistics with
//     its source module; a record owns its tensors
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use std::sync::Arc;

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::AutodiffModule,
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::data::{
    batcher::{ImageBatch, ImageBatcher},
    dataset::{with_random_flip, ImageItem},
};
use crate::domain::config::{SelectionMetric, TrainingConfiguration};
use crate::domain::error::{Error, Result};
use crate::domain::run::EpochMetrics;
use crate::infra::metrics::MetricsLogger;
use crate::ml::model::ImageClassifier;
use crate::ml::selection::SnapshotStore;

/// Probability of mirroring a training image.
const FLIP_PROBABILITY: f64 = 0.5;

/// Owned copy of every parameter and buffer of a classifier.
pub type ClassifierRecord<B> = <ImageClassifier<B> as Module<B>>::Record;

/// What a finished loop hands back.
pub struct TrainingOutcome<B: AutodiffBackend> {
    /// Model with the selected snapshot loaded
    pub model:          ImageClassifier<B>,
    pub history:        Vec<EpochMetrics>,
    /// (value, epoch) of the best validation loss
    pub best_val_loss:  Option<(f64, usize)>,
    /// (value, epoch) of the best validation accuracy
    pub best_val_acc:   Option<(f64, usize)>,
    /// Epoch whose weights ended up in `model`
    pub selected_epoch: Option<usize>,
}

impl<B: AutodiffBackend> TrainingOutcome<B> {
    pub fn best(&self, metric: SelectionMetric) -> Option<(f64, usize)> {
        match metric {
            SelectionMetric::ValLoss => self.best_val_loss,
            SelectionMetric::ValAcc  => self.best_val_acc,
        }
    }
}

/// Run the full loop.
///
/// `image_size` is the side length every item was transformed to.
/// `metrics`, when given, receives one CSV row per epoch.
pub fn train<B, DT, DV>(
    cfg:        &TrainingConfiguration,
    model:      ImageClassifier<B>,
    train_set:  DT,
    val_set:    DV,
    image_size: usize,
    metrics:    Option<&MetricsLogger>,
    device:     &B::Device,
) -> Result<TrainingOutcome<B>>
where
    B:  AutodiffBackend,
    DT: Dataset<ImageItem> + 'static,
    DV: Dataset<ImageItem> + 'static,
{
    // ── Step 1: Init ──────────────────────────────────────────────────────────
    cfg.validate()?;
    if train_set.is_empty() {
        return Err(Error::InvalidArgument("training partition is empty".into()));
    }
    if val_set.is_empty() {
        return Err(Error::InvalidArgument("validation partition is empty".into()));
    }
    let n_train = train_set.len();
    let n_val   = val_set.len();

    let mut model = model;
    let mut optim = AdamConfig::new()
        .with_weight_decay(Some(WeightDecayConfig::new(cfg.weight_decay as f32)))
        .init::<B, ImageClassifier<B>>();

    let train_loader = DataLoaderBuilder::new(ImageBatcher::<B>::new(device.clone(), image_size))
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .build(with_random_flip(train_set, image_size, FLIP_PROBABILITY, cfg.seed));
    let val_loader =
        eval_loader::<B::InnerBackend, _>(val_set, device, image_size, cfg.batch_size);

    let mut store: SnapshotStore<ClassifierRecord<B>> = SnapshotStore::new();
    let mut history = Vec::with_capacity(cfg.epochs);

    tracing::info!(
        "Training {} for {} epochs: {} train / {} val samples, batch {}, lr {}, selecting on {}",
        cfg.architecture,
        cfg.epochs,
        n_train,
        n_val,
        cfg.batch_size,
        cfg.learning_rate,
        cfg.selection_metric,
    );

    for epoch in 1..=cfg.epochs {

        // ── Step 2: TrainEpoch ────────────────────────────────────────────────
        let mut loss_sum = 0.0f64;
        let mut batches  = 0usize;
        let mut correct  = 0usize;
        let mut samples  = 0usize;

        for batch in train_loader.iter() {
            samples += batch.targets.dims()[0];

            let (loss, logits) = model.forward_loss(batch.images, batch.targets.clone());
            loss_sum += loss.clone().into_scalar().elem::<f64>();
            batches  += 1;
            correct  += ImageClassifier::correct(logits.detach(), batch.targets);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(cfg.learning_rate, model, grads);
        }
        ensure_complete(samples, n_train, "training")?;

        let train_loss = loss_sum / batches as f64;
        let train_acc  = correct as f64 / samples as f64;

        // ── Step 3: ValidateEpoch ─────────────────────────────────────────────
        let (val_loss, val_acc) = evaluate(&model.valid(), val_loader.as_ref(), "validation")?;

        let m = EpochMetrics::new(epoch, train_loss, train_acc, val_loss, val_acc);
        println!(
            "Epoch {:>3}/{} | train_loss={:.4} | train_acc={:.4} | val_loss={:.4} | val_acc={:.4}",
            epoch, cfg.epochs, train_loss, train_acc, val_loss, val_acc,
        );
        if let Some(logger) = metrics {
            logger.log(&m)?;
        }

        // ── Step 4: SelectBest ────────────────────────────────────────────────
        for metric in store.observe(&m, || model.clone().into_record()) {
            tracing::info!(
                "Epoch {}: new best {} = {:.4}",
                epoch,
                metric,
                m.value_of(metric)
            );
        }
        history.push(m);
    }

    // ── Step 5: Finalize ──────────────────────────────────────────────────────
    let best_val_loss = store.best(SelectionMetric::ValLoss);
    let best_val_acc  = store.best(SelectionMetric::ValAcc);

    let selected_epoch = match store.take(cfg.selection_metric) {
        Some(snapshot) => {
            tracing::info!(
                "Loading best {} snapshot from epoch {} ({:.4})",
                cfg.selection_metric,
                snapshot.epoch,
                snapshot.value
            );
            model = model.load_record(snapshot.state);
            Some(snapshot.epoch)
        }
        None => {
            tracing::warn!(
                "No epoch produced a comparable {}; keeping final weights",
                cfg.selection_metric
            );
            None
        }
    };

    tracing::info!("Training complete!");
    Ok(TrainingOutcome { model, history, best_val_loss, best_val_acc, selected_epoch })
}

/// Unshuffled loader for validation and test passes.
pub fn eval_loader<B, D>(
    dataset:    D,
    device:     &B::Device,
    image_size: usize,
    batch_size: usize,
) -> Arc<dyn DataLoader<ImageBatch<B>>>
where
    B: Backend,
    D: Dataset<ImageItem> + 'static,
{
    DataLoaderBuilder::new(ImageBatcher::<B>::new(device.clone(), image_size))
        .batch_size(batch_size)
        .build(dataset)
}

/// Mean batch loss and accuracy over everything `loader` yields.
pub fn evaluate<B: Backend>(
    model:     &ImageClassifier<B>,
    loader:    &dyn DataLoader<ImageBatch<B>>,
    partition: &str,
) -> Result<(f64, f64)> {
    let expected = loader.num_items();
    if expected == 0 {
        return Err(Error::InvalidArgument(format!("{partition} partition is empty")));
    }

    let mut loss_sum = 0.0f64;
    let mut batches  = 0usize;
    let mut correct  = 0usize;
    let mut samples  = 0usize;

    for batch in loader.iter() {
        samples += batch.targets.dims()[0];

        let (loss, logits) = model.forward_loss(batch.images, batch.targets.clone());
        loss_sum += loss.into_scalar().elem::<f64>();
        batches  += 1;
        correct  += ImageClassifier::correct(logits, batch.targets);
    }
    ensure_complete(samples, expected, partition)?;

    Ok((loss_sum / batches as f64, correct as f64 / samples as f64))
}

fn ensure_complete(seen: usize, expected: usize, partition: &str) -> Result<()> {
    if seen < expected {
        return Err(Error::InvalidInput(format!(
            "{partition}: only {seen} of {expected} samples could be loaded"
        )));
    }
    Ok(())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::data::dataloader::batcher::Batcher;
    use burn::data::dataset::InMemDataset;

    use crate::domain::config::{Architecture, DeviceTarget};
    use crate::ml::model;

    type TestBackend = Autodiff<NdArray>;

    const SIZE: usize = 16;

    /// Two trivially separable classes: dark images are `dark`, bright are `1 - dark`.
    fn toy_items(per_class: usize, dark: usize) -> Vec<ImageItem> {
        let plane = 3 * SIZE * SIZE;
        let mut items = Vec::new();
        for i in 0..per_class {
            let jitter = i as f32 * 0.01;
            items.push(ImageItem { pixels: vec![-1.0 - jitter; plane], label: dark });
            items.push(ImageItem { pixels: vec![1.0 + jitter; plane], label: 1 - dark });
        }
        items
    }

    fn toy_set(per_class: usize) -> InMemDataset<ImageItem> {
        InMemDataset::new(toy_items(per_class, 0))
    }

    /// Same images as `toy_set` with every label swapped.
    fn inverted_set(per_class: usize) -> InMemDataset<ImageItem> {
        InMemDataset::new(toy_items(per_class, 1))
    }

    fn config(epochs: usize) -> TrainingConfiguration {
        TrainingConfiguration {
            architecture:     Architecture::MobileNetV3Small,
            n_classes:        2,
            epochs,
            learning_rate:    1e-3,
            weight_decay:     1e-4,
            batch_size:       4,
            device:           DeviceTarget::Cpu,
            selection_metric: SelectionMetric::ValAcc,
            seed:             7,
            load_pretrained:  false,
        }
    }

    fn val_loss(net: &ImageClassifier<TestBackend>, set: InMemDataset<ImageItem>) -> f64 {
        let device = Default::default();
        let loader = eval_loader::<NdArray, _>(set, &device, SIZE, 4);
        evaluate(&net.valid(), loader.as_ref(), "validation").unwrap().0
    }

    /// Dataset with a hole: `get` fails for the last index.
    struct Truncated(InMemDataset<ImageItem>);

    impl Dataset<ImageItem> for Truncated {
        fn get(&self, index: usize) -> Option<ImageItem> {
            if index + 1 == self.0.len() { None } else { self.0.get(index) }
        }

        fn len(&self) -> usize {
            self.0.len()
        }
    }

    #[test]
    fn test_loop_produces_history_and_selection() {
        let device = Default::default();
        let cfg = config(2);
        let net = model::create::<TestBackend>(cfg.architecture, 2, false, None, &device).unwrap();

        let outcome = train(&cfg, net, toy_set(4), toy_set(2), SIZE, None, &device).unwrap();

        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.history[0].epoch, 1);
        for m in &outcome.history {
            assert!(m.train_loss.is_finite() && m.val_loss.is_finite());
            assert!((0.0..=1.0).contains(&m.train_acc));
            assert!((0.0..=1.0).contains(&m.val_acc));
        }
        // epoch 1 always beats the ±inf starting point
        let (_, acc_epoch) = outcome.best_val_acc.unwrap();
        assert_eq!(outcome.selected_epoch, Some(acc_epoch));
        let (best_loss, _) = outcome.best_val_loss.unwrap();
        let min_loss = outcome.history.iter().map(|m| m.val_loss).fold(f64::INFINITY, f64::min);
        assert_eq!(best_loss, min_loss);
    }

    #[test]
    fn test_finalized_model_reproduces_selected_val_metrics() {
        let device = Default::default();
        let mut cfg = config(2);
        cfg.selection_metric = SelectionMetric::ValLoss;
        let net = model::create::<TestBackend>(cfg.architecture, 2, false, None, &device).unwrap();

        let outcome = train(&cfg, net, toy_set(4), toy_set(2), SIZE, None, &device).unwrap();
        let loss = val_loss(&outcome.model, toy_set(2));

        let (best, _) = outcome.best_val_loss.unwrap();
        assert!((loss - best).abs() < 1e-5, "{loss} vs {best}");
    }

    #[test]
    fn test_record_snapshot_is_unaffected_by_later_batch_norm_updates() {
        let device = Default::default();
        let net = model::create::<TestBackend>(Architecture::MobileNetV3Small, 2, false, None, &device)
            .unwrap();
        let batcher = ImageBatcher::<TestBackend>::new(device, SIZE);

        // train-mode forwards move the BatchNorm running statistics
        let _ = net.forward(batcher.batch(toy_items(2, 0)).images);
        let record = net.clone().into_record();
        let captured = val_loss(&net, toy_set(2));

        for step in 0..4 {
            let mut items = toy_items(2, 0);
            for item in items.iter_mut() {
                item.pixels.iter_mut().for_each(|p| *p = *p * 3.0 + step as f32);
            }
            let _ = net.forward(batcher.batch(items).images);
        }
        assert!((val_loss(&net, toy_set(2)) - captured).abs() > 1e-6);

        let restored = net.clone().load_record(record);
        let reloaded = val_loss(&restored, toy_set(2));
        assert!((reloaded - captured).abs() < 1e-6, "{reloaded} vs {captured}");
    }

    #[test]
    fn test_finalize_restores_an_earlier_epoch_when_validation_degrades() {
        let device = Default::default();
        let mut cfg = config(3);
        cfg.selection_metric = SelectionMetric::ValLoss;
        cfg.learning_rate = 5e-3;
        let net = model::create::<TestBackend>(cfg.architecture, 2, false, None, &device).unwrap();

        // fitting the training labels pushes the swapped validation labels further away
        let outcome =
            train(&cfg, net, toy_set(6), inverted_set(2), SIZE, None, &device).unwrap();

        let (best, best_epoch) = outcome.best_val_loss.unwrap();
        assert!(best_epoch < cfg.epochs, "best epoch {best_epoch} is the last one");
        assert_eq!(outcome.selected_epoch, Some(best_epoch));
        let last = outcome.history.last().unwrap().val_loss;
        assert!(last > best);

        let loss = val_loss(&outcome.model, inverted_set(2));
        assert!((loss - best).abs() < 1e-5, "{loss} vs {best}");
    }

    #[test]
    fn test_empty_validation_fails_before_training() {
        let device = Default::default();
        let cfg = config(1);
        let net = model::create::<TestBackend>(cfg.architecture, 2, false, None, &device).unwrap();
        let empty: InMemDataset<ImageItem> = InMemDataset::new(Vec::new());

        let err = train(&cfg, net, toy_set(2), empty, SIZE, None, &device).err().unwrap();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_unreadable_sample_aborts_the_pass() {
        let device = Default::default();
        let net = model::create::<NdArray>(Architecture::MobileNetV3Small, 2, false, None, &device)
            .unwrap();
        let loader = eval_loader::<NdArray, _>(Truncated(toy_set(3)), &device, SIZE, 4);

        let err = evaluate(&net, loader.as_ref(), "test").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(ref msg) if msg.contains("5 of 6")), "{err}");
    }
}
