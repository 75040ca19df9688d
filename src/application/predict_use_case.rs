// ============================================================
// Layer 2 - PredictUseCase
// ============================================================
// Serves a batch of image files through one Predictor:
//
//   Step 1: Decide which model to serve       (flags, env, serve config)
//   Step 2: Open registry + prediction log    (Layer 6 - infra)
//   Step 3: Resolve and load the alias        (Layer 5 - ml)
//   Step 4: Fan the files out to workers      (scoped threads)
//
// Every worker shares the same Predictor. A file that cannot be
// read or decoded is reported on its own and the rest continue;
// any other failure stops the workers and fails the batch.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use anyhow::{Context, Result};
use burn::prelude::Backend;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::application::register_use_case::ServeConfig;
use crate::data::loader::is_image;
use crate::domain::config::DeviceTarget;
use crate::domain::error::Error;
use crate::domain::prediction::{ModelIdentity, PredictionResponse};
use crate::domain::traits::{ArtifactRegistry, ImagePredictor};
use crate::infra::{prediction_log::PredictionLog, registry::FileRegistry};
use crate::ml::{self, predictor::Predictor};

const DEFAULT_ALIAS: &str = "Production";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictConfig {
    pub tracking_uri: String,
    pub model_name:   Option<String>,
    pub model_alias:  Option<String>,
    /// Serve config written by `register`; flags win over its fields
    pub serve_config: Option<String>,
    pub device:       String,
    pub cache_dir:    String,
    pub capture_dir:  Option<String>,
    pub workers:      usize,
    /// Image files or directories of images
    pub inputs:       Vec<String>,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            tracking_uri: "./mlruns".to_string(),
            model_name:   None,
            model_alias:  None,
            serve_config: None,
            device:       "cpu".to_string(),
            cache_dir:    "cache".to_string(),
            capture_dir:  None,
            workers:      4,
            inputs:       Vec::new(),
        }
    }
}

/// What happened to one submitted file.
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub file: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<PredictionResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct PredictReport {
    pub identity:  ModelIdentity,
    pub version:   u32,
    pub outcomes:  Vec<FileOutcome>,
    pub cache_csv: PathBuf,
}

impl PredictReport {
    pub fn rejected(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_some()).count()
    }
}

// ─── PredictUseCase ───────────────────────────────────────────────────────────
pub struct PredictUseCase {
    config: PredictConfig,
}

impl PredictUseCase {
    pub fn new(config: PredictConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<PredictReport> {
        let cfg = &self.config;

        // ── Step 1: Which model ───────────────────────────────────────────────
        let identity = self.identity()?;
        let device: DeviceTarget = cfg.device.parse()?;
        let files = expand_inputs(&cfg.inputs)?;
        if files.is_empty() {
            anyhow::bail!("no image files to predict");
        }

        // ── Step 2: Registry + prediction log ─────────────────────────────────
        let registry: Arc<dyn ArtifactRegistry> = Arc::new(
            FileRegistry::open(&cfg.tracking_uri)
                .with_context(|| format!("opening tracking store '{}'", cfg.tracking_uri))?,
        );
        let log = Arc::new(PredictionLog::open(
            &cfg.cache_dir,
            cfg.capture_dir.as_ref().map(PathBuf::from),
        )?);
        let cache_csv = log.csv_path().to_path_buf();

        // ── Step 3-4: Load and serve on the chosen device ─────────────────────
        let (version, outcomes) = match device {
            DeviceTarget::Cpu => {
                serve::<ml::CpuBackend>(registry, identity.clone(), ml::cpu_device(), log, &files, cfg.workers)?
            }
            DeviceTarget::Cuda => {
                serve::<ml::GpuBackend>(registry, identity.clone(), ml::gpu_device(), log, &files, cfg.workers)?
            }
        };

        Ok(PredictReport { identity, version, outcomes, cache_csv })
    }

    /// Flags first, then the serve config, then the default alias.
    fn identity(&self) -> Result<ModelIdentity> {
        let cfg = &self.config;
        let from_file = match &cfg.serve_config {
            Some(path) => Some(ServeConfig::load(path)?),
            None => None,
        };

        let name = cfg
            .model_name
            .clone()
            .or_else(|| from_file.as_ref().map(|s| s.model_name.clone()))
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| {
                Error::InvalidArgument(
                    "no model name: pass --model-name, set MODEL_NAME or give --serve-config".into(),
                )
            })?;
        let alias = cfg
            .model_alias
            .clone()
            .or_else(|| from_file.map(|s| s.model_alias))
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ALIAS.to_string());

        Ok(ModelIdentity::new(name, alias))
    }
}

fn serve<B: Backend>(
    registry: Arc<dyn ArtifactRegistry>,
    identity: ModelIdentity,
    device:   B::Device,
    log:      Arc<PredictionLog>,
    files:    &[PathBuf],
    workers:  usize,
) -> Result<(u32, Vec<FileOutcome>)> {
    let predictor = Predictor::<B>::start(registry, identity, device, log)
        .context("loading the aliased model")?;
    let version = predictor.version();
    let outcomes = predict_files(&predictor, files, workers)?;
    Ok((version, outcomes))
}

/// Run `files` through `predictor` on up to `workers` threads.
/// Outcomes come back in input order.
pub fn predict_files(
    predictor: &dyn ImagePredictor,
    files:     &[PathBuf],
    workers:   usize,
) -> crate::domain::error::Result<Vec<FileOutcome>> {
    let next = AtomicUsize::new(0);
    let fatal: Mutex<Option<Error>> = Mutex::new(None);
    let slots: Mutex<Vec<Option<FileOutcome>>> = Mutex::new(vec![None; files.len()]);
    let workers = workers.clamp(1, files.len().max(1));
    tracing::debug!("Predicting {} files on {} workers", files.len(), workers);

    thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| loop {
                if fatal.lock().is_some() {
                    break;
                }
                let i = next.fetch_add(1, Ordering::Relaxed);
                let Some(path) = files.get(i) else { break };
                match predict_file(predictor, path) {
                    Ok(outcome) => slots.lock()[i] = Some(outcome),
                    Err(e) => {
                        tracing::error!("Stopping batch at '{}': {}", path.display(), e);
                        fatal.lock().get_or_insert(e);
                        break;
                    }
                }
            });
        }
    });

    if let Some(e) = fatal.into_inner() {
        return Err(e);
    }
    Ok(slots.into_inner().into_iter().flatten().collect())
}

fn predict_file(predictor: &dyn ImagePredictor, path: &Path) -> crate::domain::error::Result<FileOutcome> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let result = fs::read(path)
        .map_err(|e| Error::InvalidInput(format!("cannot read '{}': {e}", path.display())))
        .and_then(|bytes| predictor.predict(&bytes, &name));

    match result {
        Ok(response) => Ok(FileOutcome { file: path.to_path_buf(), response: Some(response), error: None }),
        Err(e) if e.is_request_local() => {
            Ok(FileOutcome { file: path.to_path_buf(), response: None, error: Some(e.to_string()) })
        }
        Err(e) => Err(e),
    }
}

/// Directories expand to their image files, sorted; other paths
/// are kept as given so a missing file is reported per file.
fn expand_inputs(inputs: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let path = PathBuf::from(input);
        if path.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(&path)
                .with_context(|| format!("listing '{}'", path.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| is_image(p))
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(path);
        }
    }
    Ok(files)
}
