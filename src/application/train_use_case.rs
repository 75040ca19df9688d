// ============================================================
// Layer 2 - TrainUseCase
// ============================================================
// Orchestrates one training run end to end:
//
//   Step 1: Parse names into closed enums   (Layer 3 - domain)
//   Step 2: Open the data version           (Layer 4 - data)
//   Step 3: Build datasets                  (Layer 4 - data)
//   Step 4: Open the registry               (Layer 6 - infra)
//   Step 5: Stage dir, config, metrics CSV  (Layer 6 - infra)
//   Step 6: Create model + run the loop     (Layer 5 - ml)
//   Step 7: Save the finalized weights      (Layer 6 - infra)
//   Step 8: Reload them, evaluate test      (Layer 5 - ml)
//   Step 9: Log the run to the registry     (Layer 6 - infra)
//
// A bad architecture, metric or device name fails in Step 1,
// before any data is read or any epoch runs. Any failure after
// that aborts the run and nothing reaches the registry.
//
// Test metrics come from the weights read back from the staged
// file, so a checkpoint that does not load fails the run here
// rather than at serving time.
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::{module::AutodiffModule, tensor::backend::AutodiffBackend};
use serde::{Deserialize, Serialize};

use crate::data::{
    dataset::ImageDataset,
    loader::DataVersion,
    preprocessor::{ImageTransform, IMAGENET_MEAN, IMAGENET_STD, IMAGE_SIZE},
};
use crate::domain::config::{Architecture, DeviceTarget, SelectionMetric, TrainingConfiguration};
use crate::domain::run::{RunParams, RunSubmission, RunTags};
use crate::domain::traits::ArtifactRegistry;
use crate::infra::{checkpoint::CheckpointManager, metrics::MetricsLogger, registry::FileRegistry};
use crate::ml::{self, model, trainer};

// ─── Training Configuration ──────────────────────────────────────────────────
// Everything a `train` invocation can set. Names stay strings here
// and are parsed in Step 1 so every bad value is reported the same
// way. Saved next to the staged checkpoint as train_config.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub data_dir:          String,
    pub data_version:      String,
    pub model_name:        String,
    pub epochs:            usize,
    pub batch_size:        usize,
    pub lr:                f64,
    pub weight_decay:      f64,
    pub best_model_metric: String,
    pub device:            String,
    pub seed:              u64,
    pub load_pretrained:   bool,
    pub trunk_weights:     Option<String>,
    pub image_size:        usize,
    pub checkpoint_dir:    String,
    pub tracking_uri:      String,
    pub experiment_name:   String,
    pub run_name:          Option<String>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            data_dir:          "data".to_string(),
            data_version:      String::new(),
            model_name:        "resnet_18".to_string(),
            epochs:            5,
            batch_size:        32,
            lr:                1e-4,
            weight_decay:      1e-5,
            best_model_metric: "val_loss".to_string(),
            device:            "cpu".to_string(),
            seed:              42,
            load_pretrained:   false,
            trunk_weights:     None,
            image_size:        IMAGE_SIZE,
            checkpoint_dir:    "checkpoints".to_string(),
            tracking_uri:      "./mlruns".to_string(),
            experiment_name:   "catdog".to_string(),
            run_name:          None,
        }
    }
}

/// Result of a logged run, for the CLI to print.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub run_id:         String,
    pub run_name:       String,
    pub selected_epoch: Option<usize>,
    pub summary:        BTreeMap<String, f64>,
    pub artifact:       PathBuf,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<TrainReport> {
        let cfg = &self.config;

        // ── Step 1: Parse names ───────────────────────────────────────────────
        let architecture: Architecture = cfg.model_name.parse()?;
        let selection_metric: SelectionMetric = cfg.best_model_metric.parse()?;
        let device: DeviceTarget = cfg.device.parse()?;
        if cfg.data_version.trim().is_empty() {
            anyhow::bail!("a data version is required (--data-version)");
        }
        if cfg.image_size == 0 {
            anyhow::bail!("image size must be > 0");
        }

        // ── Step 2: Open the data version ─────────────────────────────────────
        let data = DataVersion::open(&cfg.data_dir, &cfg.data_version)
            .with_context(|| format!("opening data version '{}'", cfg.data_version))?;
        let classes = data.classes().to_vec();
        tracing::info!("Data version '{}': classes {:?}", data.version, classes);

        let training = TrainingConfiguration {
            architecture,
            n_classes: classes.len(),
            epochs: cfg.epochs,
            learning_rate: cfg.lr,
            weight_decay: cfg.weight_decay,
            batch_size: cfg.batch_size,
            device,
            selection_metric,
            seed: cfg.seed,
            load_pretrained: cfg.load_pretrained,
        };
        training.validate()?;

        // ── Step 3: Build datasets ────────────────────────────────────────────
        let transform = ImageTransform::new(cfg.image_size, IMAGENET_MEAN, IMAGENET_STD);
        let datasets = Datasets {
            train: ImageDataset::new(data.train, transform.clone()),
            val:   ImageDataset::new(data.val, transform.clone()),
            test:  data.test.map(|t| ImageDataset::new(t, transform.clone())),
        };

        // ── Step 4: Open the registry ─────────────────────────────────────────
        // Connect before training so an unusable tracking URI costs nothing.
        let registry = FileRegistry::open(&cfg.tracking_uri)
            .with_context(|| format!("opening tracking store '{}'", cfg.tracking_uri))?;

        // ── Step 5: Staging directory ─────────────────────────────────────────
        let ckpt = CheckpointManager::new(&cfg.checkpoint_dir)?;
        ckpt.save_config(cfg)?;
        let metrics = MetricsLogger::new(ckpt.dir())?;

        let plan = RunPlan { training, transform, classes, ckpt, metrics };

        // ── Step 6-8: Train, save, evaluate on the chosen device ─────────────
        let staged = match device {
            DeviceTarget::Cpu  => self.run::<ml::CpuTrainBackend>(&plan, datasets, ml::cpu_device())?,
            DeviceTarget::Cuda => self.run::<ml::GpuTrainBackend>(&plan, datasets, ml::gpu_device())?,
        };

        // ── Step 9: Log the run ───────────────────────────────────────────────
        let run_name = cfg.run_name.clone().unwrap_or_else(|| {
            format!("{}-{}", architecture, chrono::Utc::now().format("%Y%m%d-%H%M%S"))
        });
        let submission = RunSubmission {
            run_name: run_name.clone(),
            tags:     RunTags::new(&cfg.data_version, &plan.classes),
            params:   RunParams::from_config(
                &plan.training,
                plan.transform.size,
                plan.transform.mean,
                plan.transform.std,
            ),
            history:  staged.history,
            summary:  staged.summary.clone(),
            artifact: staged.artifact.clone(),
        };
        let run_id = registry
            .log_run(&cfg.experiment_name, submission)
            .context("logging the run to the registry")?;

        Ok(TrainReport {
            run_id,
            run_name,
            selected_epoch: staged.selected_epoch,
            summary: staged.summary,
            artifact: staged.artifact,
        })
    }

    /// Steps 6 to 8 on one backend.
    fn run<B: AutodiffBackend>(
        &self,
        plan:     &RunPlan,
        datasets: Datasets,
        device:   B::Device,
    ) -> Result<StagedRun> {
        let cfg = &plan.training;
        B::seed(cfg.seed);

        // ── Step 6: Create model + run the loop ───────────────────────────────
        let trunk_weights = self.config.trunk_weights.as_ref().map(PathBuf::from);
        let net = model::create::<B>(
            cfg.architecture,
            cfg.n_classes,
            cfg.load_pretrained,
            trunk_weights.as_deref(),
            &device,
        )?;

        let outcome = trainer::train(
            cfg,
            net,
            datasets.train,
            datasets.val,
            plan.transform.size,
            Some(&plan.metrics),
            &device,
        )?;

        let mut summary = BTreeMap::new();
        for metric in SelectionMetric::ALL {
            if let Some((value, _)) = outcome.best(metric) {
                summary.insert(metric.summary_key().to_string(), value);
            }
        }

        // ── Step 7: Save the finalized weights ────────────────────────────────
        let artifact = plan.ckpt.save_model(&outcome.model.valid())?;
        tracing::info!("Staged model at '{}'", artifact.display());

        // ── Step 8: Reload the staged weights, evaluate test ──────────────────
        let staged = plan
            .ckpt
            .load_model::<B::InnerBackend>(cfg.architecture, cfg.n_classes, &device)
            .context("reading back the staged model")?;
        if let Some(test) = datasets.test {
            let loader = trainer::eval_loader::<B::InnerBackend, _>(
                test,
                &device,
                plan.transform.size,
                cfg.batch_size,
            );
            let (test_loss, test_acc) = trainer::evaluate(&staged, loader.as_ref(), "test")?;
            tracing::info!("Test: loss={:.4} acc={:.4}", test_loss, test_acc);
            summary.insert("test_loss".to_string(), test_loss);
            summary.insert("test_acc".to_string(), test_acc);
        } else {
            tracing::info!("No test partition; skipping test evaluation");
        }

        Ok(StagedRun {
            history: outcome.history,
            selected_epoch: outcome.selected_epoch,
            summary,
            artifact,
        })
    }
}

struct Datasets {
    train: ImageDataset,
    val:   ImageDataset,
    test:  Option<ImageDataset>,
}

/// Everything resolved before the backend is chosen.
struct RunPlan {
    training:  TrainingConfiguration,
    transform: ImageTransform,
    classes:   Vec<String>,
    ckpt:      CheckpointManager,
    metrics:   MetricsLogger,
}

struct StagedRun {
    history:        Vec<crate::domain::run::EpochMetrics>,
    selected_epoch: Option<usize>,
    summary:        BTreeMap<String, f64>,
    artifact:       PathBuf,
}
