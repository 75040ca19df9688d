// ============================================================
// Layer 2 - RegisterUseCase
// ============================================================
// Promotes the best finished run of an experiment:
//
//   Step 1: Parse metric, order and filter     (Layer 3 - domain)
//   Step 2: Search the best run                (Layer 6 - infra)
//   Step 3: Register a new model version       (Layer 6 - infra)
//   Step 4: Point the alias at it              (Layer 6 - infra)
//   Step 5: Write the serve config             (local file)
//
// The registered model name defaults to the best run's
// architecture name, so serving "resnet_18@Production" always
// means "the best ResNet-18 promoted so far".
//
// When no run qualifies the use case fails with NotFound and
// nothing is registered.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::filter::RunFilter;
use crate::domain::run::{metric_key, MetricOrder, ModelVersion};
use crate::domain::traits::ArtifactRegistry;
use crate::infra::registry::FileRegistry;

const BEST_METRICS: [&str; 2] = ["best_val_loss", "best_val_acc"];

// ─── Serve Config ─────────────────────────────────────────────────────────────
// `<serve_config_dir>/<config_name>.json`, read back by `predict`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServeConfig {
    pub config_name: String,
    pub model_name:  String,
    pub model_alias: String,
}

impl ServeConfig {
    pub fn path(dir: impl AsRef<Path>, config_name: &str) -> PathBuf {
        dir.as_ref().join(format!("{config_name}.json"))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("reading serve config '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("parsing serve config '{}'", path.display()))
    }

    pub fn save(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).with_context(|| format!("creating '{}'", dir.display()))?;
        let path = Self::path(dir, &self.config_name);
        fs::write(&path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("writing serve config '{}'", path.display()))?;
        Ok(path)
    }
}

// ─── Register Configuration ──────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterConfig {
    pub tracking_uri:     String,
    pub experiment_name:  String,
    pub config_name:      String,
    pub filter_string:    String,
    pub best_metric:      String,
    /// ASC / DESC; the metric's natural order when absent
    pub order:            Option<String>,
    pub model_alias:      String,
    /// Registered model name; the best run's architecture when absent
    pub model_name:       Option<String>,
    pub serve_config_dir: String,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            tracking_uri:     "./mlruns".to_string(),
            experiment_name:  "catdog".to_string(),
            config_name:      "raw_data".to_string(),
            filter_string:    String::new(),
            best_metric:      "best_val_loss".to_string(),
            order:            None,
            model_alias:      "Production".to_string(),
            model_name:       None,
            serve_config_dir: "configs/serve".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisterReport {
    pub run_id:       String,
    pub version:      ModelVersion,
    pub alias:        String,
    pub serve_config: PathBuf,
}

// ─── RegisterUseCase ──────────────────────────────────────────────────────────
pub struct RegisterUseCase {
    config:   RegisterConfig,
    registry: Box<dyn ArtifactRegistry>,
}

impl RegisterUseCase {
    /// Open the registry behind `config.tracking_uri`.
    pub fn new(config: RegisterConfig) -> Result<Self> {
        let registry = FileRegistry::open(&config.tracking_uri)
            .with_context(|| format!("opening tracking store '{}'", config.tracking_uri))?;
        Ok(Self::with_registry(config, Box::new(registry)))
    }

    pub fn with_registry(config: RegisterConfig, registry: Box<dyn ArtifactRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn execute(&self) -> Result<RegisterReport> {
        let cfg = &self.config;

        // ── Step 1: Parse inputs ──────────────────────────────────────────────
        let key = metric_key(&cfg.best_metric)?;
        if !BEST_METRICS.contains(&key) {
            anyhow::bail!(
                "invalid best metric '{}', expected one of {:?}",
                cfg.best_metric,
                BEST_METRICS
            );
        }
        let order = match &cfg.order {
            Some(o) => o.parse::<MetricOrder>()?,
            None    => MetricOrder::natural_for(key),
        };
        let filter: RunFilter = cfg.filter_string.parse()?;
        if cfg.model_alias.trim().is_empty() {
            anyhow::bail!("model alias must not be empty");
        }

        // ── Step 2: Search the best run ───────────────────────────────────────
        let run_id = self
            .registry
            .search_best_run(&cfg.experiment_name, &filter, &format!("metrics.{key}"), order)
            .with_context(|| format!("searching experiment '{}'", cfg.experiment_name))?;
        let run = self.registry.get_run(&run_id)?;
        let model_name = cfg
            .model_name
            .clone()
            .unwrap_or_else(|| run.params.model_name.to_string());
        tracing::info!(
            "Best run '{}' ({}) with {} = {:?}",
            run.run_name,
            run_id,
            key,
            run.metric(key)
        );

        // ── Step 3: Register a new version ────────────────────────────────────
        let version = self.registry.register_version(&model_name, &run_id)?;

        // ── Step 4: Point the alias ───────────────────────────────────────────
        self.registry.set_alias(&model_name, &cfg.model_alias, version.version)?;
        tracing::info!(
            "{}@{} → version {}",
            model_name,
            cfg.model_alias,
            version.version
        );

        // ── Step 5: Serve config ──────────────────────────────────────────────
        let serve = ServeConfig {
            config_name: cfg.config_name.clone(),
            model_name,
            model_alias: cfg.model_alias.clone(),
        };
        let serve_config = serve.save(&cfg.serve_config_dir)?;
        tracing::info!("Wrote serve config '{}'", serve_config.display());

        Ok(RegisterReport { run_id, version, alias: cfg.model_alias.clone(), serve_config })
    }
}
