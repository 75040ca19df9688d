// ============================================================
// Layer 6 - File Registry
// ============================================================
// ArtifactRegistry over a local tracking root.
//
// Tracking URI forms accepted:
//   file:///abs/path/mlruns
//   ./relative/mlruns          (plain path)
// Any other scheme (http, https, databricks, ...) is rejected
// with InvalidArgument; this store has no network client.
//
// Layout under the root:
//
//   experiments/<experiment>/<run_id>/run.json
//   experiments/<experiment>/<run_id>/artifacts/model.mpk.gz
//   models/<model_name>/registered_model.json
//
// Experiment names, model names and run ids become single path
// components. A name that is empty, is `.` or `..`, or holds a
// path separator is rejected with InvalidArgument before any
// path is built, so nothing is read or written outside the root.
//
// Every document write goes to a temporary sibling first and is
// then renamed over the target, so readers see either the old or
// the new document, never half of one. Writers in this process
// are serialised by one mutex; read-modify-write on a registered
// model therefore cannot lose an update.
//
// Reference: Rust Book §12 (I/O and File Handling)

use std::{
    cmp::Ordering,
    fs,
    path::{Path, PathBuf},
};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::error::{Error, Result};
use crate::domain::filter::RunFilter;
use crate::domain::run::{
    metric_key, MetricOrder, ModelVersion, RegisteredModel, RunMetadata, RunRecord, RunStatus,
    RunSubmission,
};
use crate::domain::traits::ArtifactRegistry;

const RUN_FILE: &str = "run.json";
const MODEL_FILE: &str = "registered_model.json";
const ARTIFACT_DIR: &str = "artifacts";
const ARTIFACT_FILE: &str = "model.mpk.gz";

pub struct FileRegistry {
    root:  PathBuf,
    write: Mutex<()>,
}

impl FileRegistry {
    /// Open (and create if needed) the store behind `tracking_uri`.
    pub fn open(tracking_uri: &str) -> Result<Self> {
        let root = parse_tracking_uri(tracking_uri)?;
        fs::create_dir_all(&root).map_err(|e| Error::storage(root.display(), e))?;
        tracing::info!("Registry root: '{}'", root.display());
        Ok(Self { root, write: Mutex::new(()) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn experiment_dir(&self, experiment: &str) -> Result<PathBuf> {
        Ok(self.root.join("experiments").join(path_component("experiment name", experiment)?))
    }

    fn model_file(&self, model_name: &str) -> Result<PathBuf> {
        Ok(self.root.join("models").join(path_component("model name", model_name)?).join(MODEL_FILE))
    }

    /// All runs of one experiment, oldest first.
    fn runs(&self, experiment: &str) -> Result<Vec<RunRecord>> {
        let dir = self.experiment_dir(experiment)?;
        if !dir.is_dir() {
            return Err(Error::NotFound(format!("experiment '{experiment}' does not exist")));
        }
        let mut runs = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| Error::storage(dir.display(), e))? {
            let path = entry?.path().join(RUN_FILE);
            if path.is_file() {
                runs.push(read_json::<RunRecord>(&path)?);
            }
        }
        runs.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.run_id.cmp(&b.run_id)));
        Ok(runs)
    }

    /// Locate a run by id in any experiment.
    fn find_run(&self, run_id: &str) -> Result<RunRecord> {
        let run_id = path_component("run id", run_id)?;
        let experiments = self.root.join("experiments");
        if experiments.is_dir() {
            for entry in fs::read_dir(&experiments).map_err(|e| Error::storage(experiments.display(), e))? {
                let path = entry?.path().join(run_id).join(RUN_FILE);
                if path.is_file() {
                    return read_json(&path);
                }
            }
        }
        Err(Error::NotFound(format!("run '{run_id}' does not exist")))
    }

    fn load_model(&self, model_name: &str) -> Result<RegisteredModel> {
        let path = self.model_file(model_name)?;
        if !path.is_file() {
            return Err(Error::NotFound(format!("registered model '{model_name}' does not exist")));
        }
        read_json(&path)
    }
}

impl ArtifactRegistry for FileRegistry {
    fn log_run(&self, experiment: &str, run: RunSubmission) -> Result<String> {
        let _guard = self.write.lock();

        let run_id = format!("{:032x}", rand::random::<u128>());
        let run_dir = self.experiment_dir(experiment)?.join(&run_id);
        let artifact_dir = run_dir.join(ARTIFACT_DIR);
        fs::create_dir_all(&artifact_dir).map_err(|e| Error::storage(artifact_dir.display(), e))?;

        let artifact = artifact_dir.join(ARTIFACT_FILE);
        fs::copy(&run.artifact, &artifact).map_err(|e| {
            Error::storage(format!("copy {} -> {}", run.artifact.display(), artifact.display()), e)
        })?;

        let now = Utc::now();
        let record = RunRecord {
            run_id:       run_id.clone(),
            run_name:     run.run_name,
            experiment:   experiment.to_string(),
            status:       RunStatus::Finished,
            start_time:   now,
            end_time:     Some(now),
            tags:         run.tags,
            params:       run.params,
            history:      run.history,
            metrics:      run.summary,
            artifact_uri: Some(artifact),
        };
        write_json(&run_dir.join(RUN_FILE), &record)?;

        tracing::info!("Logged run '{}' ({}) in experiment '{}'", record.run_name, run_id, experiment);
        Ok(run_id)
    }

    fn search_best_run(
        &self,
        experiment: &str,
        filter: &RunFilter,
        metric: &str,
        order: MetricOrder,
    ) -> Result<String> {
        let key = metric_key(metric)?;

        let mut candidates: Vec<(f64, RunRecord)> = self
            .runs(experiment)?
            .into_iter()
            .filter(|r| r.status == RunStatus::Finished && filter.matches(r))
            .filter_map(|r| r.metric(key).filter(|v| !v.is_nan()).map(|v| (v, r)))
            .collect();

        // stable sort: equal values keep the oldest run first
        candidates.sort_by(|(a, _), (b, _)| {
            let ord = a.partial_cmp(b).unwrap_or(Ordering::Equal);
            match order {
                MetricOrder::Ascending  => ord,
                MetricOrder::Descending => ord.reverse(),
            }
        });

        let (value, best) = candidates.into_iter().next().ok_or_else(|| {
            Error::NotFound(format!(
                "no finished run in experiment '{experiment}' matches the filter and has metric '{key}'"
            ))
        })?;
        tracing::info!("Best run by {} ({:?}): {} = {:.4}", key, order, best.run_id, value);
        Ok(best.run_id)
    }

    fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        self.find_run(run_id)
    }

    fn create_registered_model(&self, model_name: &str) -> Result<()> {
        let path = self.model_file(model_name)?;
        let _guard = self.write.lock();
        if path.is_file() {
            tracing::debug!("Registered model '{}' already exists", model_name);
            return Ok(());
        }
        write_json(&path, &RegisteredModel::new(model_name))?;
        tracing::info!("Created registered model '{}'", model_name);
        Ok(())
    }

    fn register_version(&self, model_name: &str, run_id: &str) -> Result<ModelVersion> {
        self.create_registered_model(model_name)?;

        let _guard = self.write.lock();
        let run = self.find_run(run_id)?;
        let source = run.artifact_uri.ok_or_else(|| {
            Error::NotFound(format!("run '{run_id}' has no logged model artifact"))
        })?;

        let mut model = self.load_model(model_name)?;
        let version = ModelVersion {
            name:       model_name.to_string(),
            version:    model.next_version(),
            run_id:     run_id.to_string(),
            source,
            created_at: Utc::now(),
        };
        model.versions.push(version.clone());
        write_json(&self.model_file(model_name)?, &model)?;

        tracing::info!("Registered '{}' version {} from run {}", model_name, version.version, run_id);
        Ok(version)
    }

    fn set_alias(&self, model_name: &str, alias: &str, version: u32) -> Result<()> {
        if alias.trim().is_empty() {
            return Err(Error::InvalidArgument("alias must not be empty".into()));
        }
        let _guard = self.write.lock();
        let mut model = self.load_model(model_name)?;
        if model.version(version).is_none() {
            return Err(Error::NotFound(format!("'{model_name}' has no version {version}")));
        }
        let previous = model.aliases.insert(alias.to_string(), version);
        write_json(&self.model_file(model_name)?, &model)?;

        match previous {
            Some(old) if old != version => {
                tracing::info!("Alias '{}@{}' moved {} → {}", model_name, alias, old, version)
            }
            _ => tracing::info!("Alias '{}@{}' → version {}", model_name, alias, version),
        }
        Ok(())
    }

    fn resolve_alias(&self, model_name: &str, alias: &str) -> Result<(ModelVersion, RunMetadata)> {
        let model = self.load_model(model_name)?;
        let number = *model.aliases.get(alias).ok_or_else(|| {
            Error::NotFound(format!("alias '{alias}' is not set on model '{model_name}'"))
        })?;
        let version = model.version(number).cloned().ok_or_else(|| {
            Error::NotFound(format!("'{model_name}@{alias}' points at missing version {number}"))
        })?;

        let run = self.find_run(&version.run_id)?;
        let metadata = RunMetadata { run_id: run.run_id, tags: run.tags, params: run.params };
        metadata.validate()?;
        Ok((version, metadata))
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn parse_tracking_uri(uri: &str) -> Result<PathBuf> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(Error::InvalidArgument("tracking URI is empty".into()));
    }
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if let Some((scheme, _)) = uri.split_once("://") {
        return Err(Error::InvalidArgument(format!(
            "unsupported tracking URI scheme '{scheme}', expected file:// or a local path"
        )));
    }
    Ok(PathBuf::from(uri))
}

/// `name` as one directory entry under the root.
fn path_component<'a>(kind: &str, name: &'a str) -> Result<&'a str> {
    if name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || Path::new(name).is_absolute()
    {
        return Err(Error::InvalidArgument(format!(
            "{kind} '{name}' must be a single path component"
        )));
    }
    Ok(name)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| Error::storage(path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| Error::schema(path.display().to_string(), e))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::storage(parent.display(), e))?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::schema(path.display().to_string(), e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| Error::storage(tmp.display(), e))?;
    fs::rename(&tmp, path).map_err(|e| Error::storage(path.display(), e))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::domain::config::{Architecture, DeviceTarget, SelectionMetric, TrainingConfiguration};
    use crate::domain::run::{EpochMetrics, RunParams, RunTags};

    pub(crate) fn temp_registry(tag: &str) -> (FileRegistry, PathBuf) {
        let dir = std::env::temp_dir().join(format!("catdog-registry-{tag}-{}", rand::random::<u64>()));
        let registry = FileRegistry::open(&format!("file://{}", dir.display())).unwrap();
        (registry, dir)
    }

    pub(crate) fn submission(dir: &Path, arch: Architecture, best_val_acc: f64) -> RunSubmission {
        let artifact = dir.join(format!("staged-{}.mpk.gz", rand::random::<u32>()));
        fs::write(&artifact, b"weights").unwrap();
        let cfg = TrainingConfiguration {
            architecture:     arch,
            n_classes:        2,
            epochs:           1,
            learning_rate:    1e-3,
            weight_decay:     0.0,
            batch_size:       8,
            device:           DeviceTarget::Cpu,
            selection_metric: SelectionMetric::ValAcc,
            seed:             1,
            load_pretrained:  false,
        };
        let mut summary = BTreeMap::new();
        summary.insert("best_val_acc".to_string(), best_val_acc);
        summary.insert("best_val_loss".to_string(), 1.0 - best_val_acc);
        RunSubmission {
            run_name: format!("{arch}-run"),
            tags:     RunTags::new("v1", &["cat".to_string(), "dog".to_string()]),
            params:   RunParams::from_config(&cfg, 224, [0.485, 0.456, 0.406], [0.229, 0.224, 0.225]),
            history:  vec![EpochMetrics::new(1, 0.5, 0.7, 1.0 - best_val_acc, best_val_acc)],
            summary,
            artifact,
        }
    }

    #[test]
    fn register_then_resolve_round_trips() {
        let (registry, dir) = temp_registry("roundtrip");
        let run_id = registry.log_run("catdog", submission(&dir, Architecture::ResNet18, 0.9)).unwrap();

        let version = registry.register_version("catdog_model", &run_id).unwrap();
        assert_eq!(version.version, 1);
        registry.set_alias("catdog_model", "Production", version.version).unwrap();

        let (resolved, meta) = registry.resolve_alias("catdog_model", "Production").unwrap();
        assert_eq!(resolved, version);
        assert_eq!(meta.run_id, run_id);
        assert_eq!(meta.class_names(), vec!["cat".to_string(), "dog".to_string()]);
        assert!(resolved.source.is_file());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn names_that_escape_the_root_are_rejected() {
        let (registry, dir) = temp_registry("names");
        let outside = dir.parent().unwrap().join(format!("escaped-{}", rand::random::<u32>()));

        let err = registry.log_run("../escaped", submission(&dir, Architecture::ResNet18, 0.9)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "{err}");
        for name in ["..", ".", "", "a/b", "a\\b"] {
            let err = registry.create_registered_model(name).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "{name}: {err}");
        }
        let err = registry.create_registered_model(&outside.display().to_string()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(matches!(registry.get_run("../x"), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            registry.search_best_run("..", &RunFilter::default(), "best_val_acc", MetricOrder::Descending),
            Err(Error::InvalidArgument(_))
        ));
        assert!(!outside.exists());

        let run_id = registry.log_run("catdog", submission(&dir, Architecture::ResNet18, 0.9)).unwrap();
        let err = registry.register_version("../../m", &run_id).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(!dir.join("m").exists());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn create_registered_model_is_idempotent() {
        let (registry, dir) = temp_registry("idempotent");
        registry.create_registered_model("catdog_model").unwrap();
        registry.create_registered_model("catdog_model").unwrap();

        let run_id = registry.log_run("catdog", submission(&dir, Architecture::ResNet18, 0.8)).unwrap();
        assert_eq!(registry.register_version("catdog_model", &run_id).unwrap().version, 1);
        assert_eq!(registry.register_version("catdog_model", &run_id).unwrap().version, 2);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn alias_repoint_moves_resolution() {
        let (registry, dir) = temp_registry("repoint");
        let a = registry.log_run("catdog", submission(&dir, Architecture::ResNet18, 0.7)).unwrap();
        let b = registry.log_run("catdog", submission(&dir, Architecture::MobileNetV2, 0.8)).unwrap();
        let v1 = registry.register_version("m", &a).unwrap();
        let v2 = registry.register_version("m", &b).unwrap();

        registry.set_alias("m", "Production", v1.version).unwrap();
        registry.set_alias("m", "Production", v2.version).unwrap();
        let (resolved, meta) = registry.resolve_alias("m", "Production").unwrap();
        assert_eq!(resolved.version, 2);
        assert_eq!(meta.params.model_name, Architecture::MobileNetV2);

        let err = registry.set_alias("m", "Production", 9).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn unset_alias_is_not_found() {
        let (registry, dir) = temp_registry("unset");
        registry.create_registered_model("m").unwrap();
        let err = registry.resolve_alias("m", "Production").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let err = registry.resolve_alias("missing", "Production").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn search_ranks_filters_and_keeps_earliest_tie() {
        let (registry, dir) = temp_registry("search");
        let first = registry.log_run("catdog", submission(&dir, Architecture::ResNet18, 0.9)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let _tie = registry.log_run("catdog", submission(&dir, Architecture::ResNet18, 0.9)).unwrap();
        let mobile = registry.log_run("catdog", submission(&dir, Architecture::MobileNetV2, 0.95)).unwrap();
        let all = RunFilter::default();

        let best = registry
            .search_best_run("catdog", &all, "metrics.best_val_acc", MetricOrder::Descending)
            .unwrap();
        assert_eq!(best, mobile);

        let resnets: RunFilter = "params.model_name = 'resnet_18'".parse().unwrap();
        let best = registry
            .search_best_run("catdog", &resnets, "metrics.best_val_acc", MetricOrder::Descending)
            .unwrap();
        assert_eq!(best, first);
        assert_eq!(registry.get_run(&best).unwrap().params.model_name, Architecture::ResNet18);

        let lowest_loss = registry
            .search_best_run("catdog", &all, "best_val_loss", MetricOrder::Ascending)
            .unwrap();
        assert_eq!(lowest_loss, mobile);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn search_without_candidates_is_not_found() {
        let (registry, dir) = temp_registry("empty");
        let all = RunFilter::default();
        let err = registry
            .search_best_run("nothing-here", &all, "metrics.best_val_acc", MetricOrder::Descending)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        registry.log_run("catdog", submission(&dir, Architecture::ResNet18, 0.9)).unwrap();
        let err = registry
            .search_best_run("catdog", &all, "metrics.test_acc", MetricOrder::Descending)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn network_schemes_are_rejected() {
        assert!(matches!(FileRegistry::open("http://localhost:5000"), Err(Error::InvalidArgument(_))));
        assert_eq!(parse_tracking_uri("file:///tmp/mlruns").unwrap(), PathBuf::from("/tmp/mlruns"));
        assert_eq!(parse_tracking_uri("mlruns").unwrap(), PathBuf::from("mlruns"));
    }

    #[test]
    fn malformed_run_document_is_schema_mismatch() {
        let (registry, dir) = temp_registry("schema");
        let run_dir = registry.experiment_dir("catdog").unwrap().join("broken");
        fs::create_dir_all(&run_dir).unwrap();
        fs::write(run_dir.join(RUN_FILE), "{\"run_id\": 3}").unwrap();
        let err = registry
            .search_best_run("catdog", &RunFilter::default(), "best_val_acc", MetricOrder::Descending)
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
        fs::remove_dir_all(dir).ok();
    }
}
