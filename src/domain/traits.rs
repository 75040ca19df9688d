// ============================================================
// Layer 3 - Core Traits (Abstractions)
// ============================================================
// The two seams of the system:
//
//   ArtifactRegistry - the experiment tracking / model registry
//                      store. Treated as an external, possibly
//                      unavailable service. FileRegistry is the
//                      implementation shipped here.
//
//   ImagePredictor   - "submit image + filename, get a
//                      PredictionResponse". The network layer
//                      (out of scope) would sit on top of this.
//
// Connectivity failures from a registry are StorageFailure and
// are never retried inside the core.

use crate::domain::error::Result;
use crate::domain::filter::RunFilter;
use crate::domain::prediction::PredictionResponse;
use crate::domain::run::{MetricOrder, ModelVersion, RunMetadata, RunRecord, RunSubmission};

// ─── ArtifactRegistry ─────────────────────────────────────────────────────────
pub trait ArtifactRegistry: Send + Sync {
    /// Record one sealed training run. Tags and params are write-once.
    fn log_run(&self, experiment: &str, run: RunSubmission) -> Result<String>;

    /// Rank finished runs of `experiment` that pass `filter` by the
    /// metric expression (`metrics.<key>`) and return the top run id.
    /// No candidate is `NotFound`; there is no fallback.
    fn search_best_run(
        &self,
        experiment: &str,
        filter: &RunFilter,
        metric: &str,
        order: MetricOrder,
    ) -> Result<String>;

    /// Full sealed record of one run.
    fn get_run(&self, run_id: &str) -> Result<RunRecord>;

    /// Create the registered model entry. "Already exists" is success.
    fn create_registered_model(&self, model_name: &str) -> Result<()>;

    /// New immutable version bound to `run_id`'s artifact.
    /// Creates the registered model first if needed.
    fn register_version(&self, model_name: &str, run_id: &str) -> Result<ModelVersion>;

    /// Atomically point `alias` at `version`.
    fn set_alias(&self, model_name: &str, alias: &str, version: u32) -> Result<()>;

    /// Version currently behind `alias` plus its run metadata.
    /// Unset alias or removed version is `NotFound`.
    fn resolve_alias(&self, model_name: &str, alias: &str) -> Result<(ModelVersion, RunMetadata)>;
}

// ─── ImagePredictor ───────────────────────────────────────────────────────────
pub trait ImagePredictor: Send + Sync {
    /// `filename` is only used for the audit trail, never for decisions.
    fn predict(&self, image: &[u8], filename: &str) -> Result<PredictionResponse>;
}
