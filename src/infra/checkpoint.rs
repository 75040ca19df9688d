// ============================================================
// Layer 6 - Checkpoint Manager
// ============================================================
// Stages the finalized model of a run on local disk before it
// is handed to the registry, using Burn's CompactRecorder.
//
// What gets saved per run:
//   1. best_model.mpk.gz  - parameters of the selected snapshot
//   2. train_config.json  - the configuration that produced it
//   3. metrics.csv        - written by MetricsLogger, same dir
//
// Burn's CompactRecorder:
//   - Serialises model parameters to MessagePack format
//   - Compresses with gzip for smaller file size
//   - Type-safe: loading fails if architecture doesn't match
//   - Appends `.mpk.gz` itself, so it is given the stem only
//
// File naming convention:
//   checkpoints/
//     best_model.mpk.gz
//     train_config.json
//     metrics.csv
//
// Reference: Burn Book §5 (Records and Checkpointing)

use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use serde::Serialize;

use crate::domain::config::Architecture;
use crate::domain::error::{Error, Result};
use crate::ml::model::{self, ImageClassifier};

const MODEL_STEM: &str = "best_model";
const CONFIG_FILE: &str = "train_config.json";

/// Manages the staged files of one training run.
pub struct CheckpointManager {
    /// Path to the directory where checkpoints are stored
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create a new CheckpointManager, creating the directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| Error::storage(dir.display(), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the staged model file.
    pub fn model_path(&self) -> PathBuf {
        self.dir.join(format!("{MODEL_STEM}.mpk.gz"))
    }

    /// Save model weights and return the written file.
    pub fn save_model<B: Backend>(&self, model: &ImageClassifier<B>) -> Result<PathBuf> {
        let stem = self.dir.join(MODEL_STEM);
        CompactRecorder::new()
            .record(model.clone().into_record(), stem)
            .map_err(|e| Error::Model(format!("cannot save checkpoint in '{}': {e}", self.dir.display())))?;

        let path = self.model_path();
        tracing::debug!("Saved checkpoint: '{}'", path.display());
        Ok(path)
    }

    /// Rebuild `architecture` and restore the staged weights. The
    /// train use case evaluates the test partition on this copy.
    pub fn load_model<B: Backend>(
        &self,
        architecture: Architecture,
        n_classes:    usize,
        device:       &B::Device,
    ) -> Result<ImageClassifier<B>> {
        let path = self.model_path();
        if !path.is_file() {
            return Err(Error::NotFound(format!(
                "no staged model at '{}'. Have you trained the model first?",
                path.display()
            )));
        }
        model::load(architecture, n_classes, &path, device)
    }

    /// Save the run configuration next to the weights.
    pub fn save_config<T: Serialize>(&self, cfg: &T) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)
            .map_err(|e| Error::schema(CONFIG_FILE, e))?;
        fs::write(&path, json).map_err(|e| Error::storage(path.display(), e))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }
}
