// ============================================================
// Layer 3 - Runs, Versions and their Typed Metadata
// ============================================================
// These are the documents that cross the registry boundary.
//
// Every field has a type. A document is parsed once when it is
// read, and anything that does not fit the schema is a
// SchemaMismatch at load time rather than a surprise at
// prediction time.
//
// Ownership:
//   RunRecord      - owned by the registry, sealed at log time
//   ModelVersion   - append-only, never mutated
//   RegisteredModel.aliases - the only mutable pointer

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::config::{Architecture, DeviceTarget, SelectionMetric, TrainingConfiguration};
use crate::domain::error::{Error, Result};

// ─── EpochMetrics ─────────────────────────────────────────────────────────────
/// One row of the per-epoch history. Produced once per epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch:      usize,
    pub train_loss: f64,
    pub train_acc:  f64,
    pub val_loss:   f64,
    pub val_acc:    f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train_loss: f64, train_acc: f64, val_loss: f64, val_acc: f64) -> Self {
        Self { epoch, train_loss, train_acc, val_loss, val_acc }
    }

    /// Value of the given validation metric for this epoch.
    pub fn value_of(&self, metric: SelectionMetric) -> f64 {
        match metric {
            SelectionMetric::ValLoss => self.val_loss,
            SelectionMetric::ValAcc => self.val_acc,
        }
    }
}

// ─── Tags and Params ──────────────────────────────────────────────────────────
/// Write-once tags of a run: where the data came from and how
/// class indices map to names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTags {
    pub data_version: String,
    pub id2label:     BTreeMap<usize, String>,
    pub label2id:     BTreeMap<String, usize>,
}

impl RunTags {
    pub fn new(data_version: impl Into<String>, classes: &[String]) -> Self {
        let id2label: BTreeMap<usize, String> =
            classes.iter().cloned().enumerate().collect();
        let label2id = classes.iter().cloned().enumerate().map(|(i, c)| (c, i)).collect();
        Self { data_version: data_version.into(), id2label, label2id }
    }
}

/// Write-once parameters of a run. `optimizer` and `criterion` are
/// informational: there is exactly one of each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    pub model:             String,
    pub model_name:        Architecture,
    pub n_epochs:          usize,
    pub batch_size:        usize,
    pub lr:                f64,
    pub weight_decay:      f64,
    pub best_model_metric: SelectionMetric,
    pub device:            DeviceTarget,
    pub seed:              u64,
    pub n_classes:         usize,
    pub image_size:        usize,
    pub image_mean:        [f32; 3],
    pub image_std:         [f32; 3],
    pub optimizer:         String,
    pub criterion:         String,
    #[serde(default)]
    pub load_pretrained:   bool,
}

impl RunParams {
    pub fn from_config(
        cfg: &TrainingConfiguration,
        image_size: usize,
        image_mean: [f32; 3],
        image_std: [f32; 3],
    ) -> Self {
        Self {
            model:             cfg.architecture.family().to_string(),
            model_name:        cfg.architecture,
            n_epochs:          cfg.epochs,
            batch_size:        cfg.batch_size,
            lr:                cfg.learning_rate,
            weight_decay:      cfg.weight_decay,
            best_model_metric: cfg.selection_metric,
            device:            cfg.device,
            seed:              cfg.seed,
            n_classes:         cfg.n_classes,
            image_size,
            image_mean,
            image_std,
            optimizer:         "Adam".to_string(),
            criterion:         "CrossEntropyLoss".to_string(),
            load_pretrained:   cfg.load_pretrained,
        }
    }
}

// ─── Runs ─────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

/// Everything a finished training run hands to the registry.
/// `artifact` is a staged model file the registry copies into
/// its own storage.
#[derive(Debug, Clone)]
pub struct RunSubmission {
    pub run_name: String,
    pub tags:     RunTags,
    pub params:   RunParams,
    pub history:  Vec<EpochMetrics>,
    pub summary:  BTreeMap<String, f64>,
    pub artifact: PathBuf,
}

/// A sealed training run as stored by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id:       String,
    pub run_name:     String,
    pub experiment:   String,
    pub status:       RunStatus,
    pub start_time:   DateTime<Utc>,
    pub end_time:     Option<DateTime<Utc>>,
    pub tags:         RunTags,
    pub params:       RunParams,
    pub history:      Vec<EpochMetrics>,
    pub metrics:      BTreeMap<String, f64>,
    pub artifact_uri: Option<PathBuf>,
}

impl RunRecord {
    /// Look up a summary metric. Per-epoch validation metrics are
    /// also reachable by name, resolving to their final-epoch value.
    pub fn metric(&self, key: &str) -> Option<f64> {
        if let Some(v) = self.metrics.get(key) {
            return Some(*v);
        }
        let last = self.history.last()?;
        match key {
            "training_loss" => Some(last.train_loss),
            "training_acc" => Some(last.train_acc),
            "val_loss" => Some(last.val_loss),
            "val_acc" => Some(last.val_acc),
            _ => None,
        }
    }
}

/// What the serving side needs to know about the run behind a version.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMetadata {
    pub run_id: String,
    pub tags:   RunTags,
    pub params: RunParams,
}

impl RunMetadata {
    /// Cross-field checks that serde alone cannot express.
    pub fn validate(&self) -> Result<()> {
        let ctx = format!("run {}", self.run_id);
        if self.tags.id2label.len() != self.params.n_classes {
            return Err(Error::schema(
                ctx,
                format!(
                    "id2label has {} entries but n_classes is {}",
                    self.tags.id2label.len(),
                    self.params.n_classes
                ),
            ));
        }
        if let Some(missing) = (0..self.params.n_classes).find(|i| !self.tags.id2label.contains_key(i)) {
            return Err(Error::schema(ctx, format!("id2label has no entry for class {missing}")));
        }
        if self.params.image_size == 0 {
            return Err(Error::schema(ctx, "image_size must be > 0"));
        }
        if self.params.image_std.iter().any(|s| *s <= 0.0) {
            return Err(Error::schema(ctx, "image_std entries must be > 0"));
        }
        Ok(())
    }

    /// Class names ordered by index.
    pub fn class_names(&self) -> Vec<String> {
        self.tags.id2label.values().cloned().collect()
    }
}

// ─── Model versions ───────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name:       String,
    pub version:    u32,
    pub run_id:     String,
    /// Location of the model artifact this version is bound to
    pub source:     PathBuf,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name:       String,
    pub created_at: DateTime<Utc>,
    pub versions:   Vec<ModelVersion>,
    /// alias -> version number
    pub aliases:    BTreeMap<String, u32>,
}

impl RegisteredModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name:       name.into(),
            created_at: Utc::now(),
            versions:   Vec::new(),
            aliases:    BTreeMap::new(),
        }
    }

    pub fn version(&self, version: u32) -> Option<&ModelVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub fn next_version(&self) -> u32 {
        self.versions.iter().map(|v| v.version).max().unwrap_or(0) + 1
    }
}

// ─── Ranking ──────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricOrder {
    Ascending,
    Descending,
}

impl MetricOrder {
    /// Natural ranking for a summary metric: losses ascend, accuracies descend.
    pub fn natural_for(metric_key: &str) -> Self {
        if metric_key.contains("loss") {
            MetricOrder::Ascending
        } else {
            MetricOrder::Descending
        }
    }
}

impl FromStr for MetricOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(MetricOrder::Ascending),
            "desc" | "descending" => Ok(MetricOrder::Descending),
            other => Err(Error::InvalidArgument(format!(
                "invalid order '{other}', expected ASC or DESC"
            ))),
        }
    }
}

/// Strip the optional `metrics.` prefix from a metric expression.
pub fn metric_key(expr: &str) -> Result<&str> {
    let key = expr.trim();
    let key = key.strip_prefix("metrics.").unwrap_or(key);
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(Error::InvalidArgument(format!("invalid metric expression '{expr}'")));
    }
    Ok(key)
}
