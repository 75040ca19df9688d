// ============================================================
// Layer 5 - Model Resolver + Predictor
// ============================================================
// Serving path, in two halves:
//
//   ModelResolver (startup / reload):
//     (name, alias) → registry.resolve_alias
//                   → typed run metadata, validated
//                   → rebuild architecture, load record
//                   → ServeableModel
//
//   Predictor::predict (per request):
//     bytes → decode (InvalidInput, nothing logged)
//           → RGB, resize, normalise (same ImageTransform
//             that training used, from the run's params)
//           → forward + softmax on a non-autodiff backend
//           → argmax + class-name lookup
//           → prediction log: optional capture of the raw
//             upload, then the CSV row
//           → PredictionResponse
//
// A request that fails at any step leaves neither a row nor a
// captured copy.
//
// The current model sits behind a mutex that is held only long
// enough to clone it. Inference runs on the clone, so requests
// never block each other and a reload swaps the whole model in
// one step: a request sees either the old model or the new one.

use std::sync::Arc;

use burn::{prelude::*, tensor::{activation::softmax, TensorData}};
use chrono::Utc;
use parking_lot::Mutex;
use tracing::Span;

use crate::data::preprocessor::ImageTransform;
use crate::domain::error::{Error, Result};
use crate::domain::prediction::{ModelIdentity, PredictionRecord, PredictionResponse};
use crate::domain::traits::{ArtifactRegistry, ImagePredictor};
use crate::infra::prediction_log::PredictionLog;
use crate::ml::model::{self, ImageClassifier};

// ─── ServeableModel ───────────────────────────────────────────────────────────

/// Everything needed to answer a request, loaded once.
#[derive(Debug, Clone)]
pub struct ServeableModel<B: Backend> {
    pub model:     ImageClassifier<B>,
    /// Class names by index
    pub classes:   Vec<String>,
    pub transform: ImageTransform,
    pub identity:  ModelIdentity,
    pub version:   u32,
    pub run_id:    String,
}

/// Softmax output of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassScores {
    pub probs:        Vec<f32>,
    pub predicted_id: usize,
    /// Rounded to 6 decimals
    pub best_prob:    f64,
}

impl<B: Backend> ServeableModel<B> {
    /// Forward one transformed image. No autodiff graph exists on
    /// a serving backend, so nothing is tracked.
    pub fn infer(&self, pixels: Vec<f32>, device: &B::Device) -> Result<ClassScores> {
        let side = self.transform.size;
        if pixels.len() != self.transform.tensor_len() {
            return Err(Error::Model(format!(
                "expected {} input values, got {}",
                self.transform.tensor_len(),
                pixels.len()
            )));
        }
        let images = Tensor::<B, 4>::from_data(TensorData::new(pixels, [1, 3, side, side]), device);
        output_to_prediction(self.model.forward(images))
    }
}

/// Softmax over the class axis of a single-row logit tensor, then
/// argmax. Ties go to the lowest index.
pub fn output_to_prediction<B: Backend>(logits: Tensor<B, 2>) -> Result<ClassScores> {
    let probs: Vec<f32> = softmax(logits, 1)
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| Error::Model(format!("cannot read probabilities: {e:?}")))?;

    let (predicted_id, best) = probs
        .iter()
        .copied()
        .enumerate()
        .fold(None, |acc: Option<(usize, f32)>, (i, p)| match acc {
            Some((_, best)) if p <= best => acc,
            _ => Some((i, p)),
        })
        .ok_or_else(|| Error::Model("model produced no class scores".into()))?;

    Ok(ClassScores { probs, predicted_id, best_prob: round6(best as f64) })
}

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

// ─── ModelResolver ────────────────────────────────────────────────────────────

pub struct ModelResolver {
    registry: Arc<dyn ArtifactRegistry>,
}

impl ModelResolver {
    pub fn new(registry: Arc<dyn ArtifactRegistry>) -> Self {
        Self { registry }
    }

    /// Resolve `identity` to a loaded model. An unset alias is
    /// NotFound and a malformed run document is SchemaMismatch;
    /// both are fatal at startup.
    pub fn resolve<B: Backend>(
        &self,
        identity: &ModelIdentity,
        device:   &B::Device,
    ) -> Result<ServeableModel<B>> {
        let (version, meta) = self.registry.resolve_alias(&identity.name, &identity.alias)?;
        let params = &meta.params;

        let model = model::load::<B>(params.model_name, params.n_classes, &version.source, device)?;
        let transform = ImageTransform::new(params.image_size, params.image_mean, params.image_std);

        tracing::info!(
            "Model loaded: {} → version {} ({}, {} classes, {}px) from run {}",
            identity,
            version.version,
            params.model_name,
            params.n_classes,
            params.image_size,
            meta.run_id,
        );

        Ok(ServeableModel {
            model,
            classes: meta.class_names(),
            transform,
            identity: identity.clone(),
            version: version.version,
            run_id: meta.run_id,
        })
    }
}

// ─── Predictor ────────────────────────────────────────────────────────────────

pub struct Predictor<B: Backend> {
    resolver: ModelResolver,
    identity: ModelIdentity,
    device:   B::Device,
    current:  Mutex<ServeableModel<B>>,
    log:      Arc<PredictionLog>,
    span:     Span,
}

impl<B: Backend> Predictor<B> {
    /// Resolve and load the aliased model. Fails if the alias is unset.
    pub fn start(
        registry: Arc<dyn ArtifactRegistry>,
        identity: ModelIdentity,
        device:   B::Device,
        log:      Arc<PredictionLog>,
    ) -> Result<Self> {
        let span = tracing::info_span!("predictor", model_name = %identity.name, model_alias = %identity.alias);
        let resolver = ModelResolver::new(registry);
        let serving = span.in_scope(|| resolver.resolve::<B>(&identity, &device))?;
        Ok(Self { resolver, identity, device, current: Mutex::new(serving), log, span })
    }

    pub fn identity(&self) -> &ModelIdentity {
        &self.identity
    }

    /// Version currently serving requests.
    pub fn version(&self) -> u32 {
        self.current.lock().version
    }

    /// Re-resolve the alias and swap the whole model in.
    /// On failure the old model keeps serving.
    pub fn reload(&self) -> Result<u32> {
        let _enter = self.span.enter();
        let fresh = self.resolver.resolve::<B>(&self.identity, &self.device)?;
        let version = fresh.version;
        let previous = std::mem::replace(&mut *self.current.lock(), fresh).version;
        tracing::info!("Reloaded {}: version {} → {}", self.identity, previous, version);
        Ok(version)
    }
}

impl<B: Backend> ImagePredictor for Predictor<B> {
    fn predict(&self, image: &[u8], filename: &str) -> Result<PredictionResponse> {
        let _enter = self.span.enter();

        let decoded = ImageTransform::decode(image).map_err(|e| {
            tracing::warn!("Rejected '{}': {}", filename, e);
            e
        })?;
        let serving = self.current.lock().clone();

        let pixels = serving.transform.apply(&decoded);
        let scores = serving.infer(pixels, &self.device)?;
        let predicted_class = serving
            .classes
            .get(scores.predicted_id)
            .cloned()
            .ok_or_else(|| Error::Model(format!("class index {} has no name", scores.predicted_id)))?;

        let record = PredictionRecord {
            image_name: filename.to_string(),
            probs: scores.probs,
            best_prob: scores.best_prob,
            predicted_id: scores.predicted_id,
            predicted_class,
            model: serving.identity.clone(),
            timestamp: Utc::now(),
        };
        tracing::info!(
            "'{}' → {} ({}) p={} [v{}]",
            filename,
            record.predicted_class,
            record.predicted_id,
            record.best_prob,
            serving.version,
        );

        self.log.record(&record, image)?;
        Ok(record.to_response())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
    use proptest::prelude::*;
    use std::fs;

    use crate::data::preprocessor::tests::png_bytes;
    use crate::domain::config::Architecture;
    use crate::domain::run::RunSubmission;
    use crate::infra::checkpoint::CheckpointManager;
    use crate::infra::registry::tests::{submission, temp_registry};
    use crate::infra::registry::FileRegistry;

    type TestBackend = NdArray;

    const SIZE: usize = 16;

    /// A registered two-class MobileNetV3 working at 16px.
    fn staged_submission(dir: &std::path::Path) -> RunSubmission {
        let device = Default::default();
        let net = model::create::<TestBackend>(Architecture::MobileNetV3Small, 2, false, None, &device).unwrap();
        let ckpt = CheckpointManager::new(dir.join(format!("ckpt-{}", rand::random::<u32>()))).unwrap();

        let mut run = submission(dir, Architecture::MobileNetV3Small, 0.9);
        run.params.image_size = SIZE;
        run.artifact = ckpt.save_model(&net).unwrap();
        run
    }

    fn serving_setup(tag: &str) -> (Arc<FileRegistry>, std::path::PathBuf, u32) {
        let (registry, dir) = temp_registry(tag);
        let run_id = registry.log_run("catdog", staged_submission(&dir)).unwrap();
        let version = registry.register_version("catdog_model", &run_id).unwrap().version;
        registry.set_alias("catdog_model", "Production", version).unwrap();
        (Arc::new(registry), dir, version)
    }

    fn start(registry: Arc<FileRegistry>, log: Arc<PredictionLog>) -> Result<Predictor<TestBackend>> {
        Predictor::start(
            registry,
            ModelIdentity::new("catdog_model", "Production"),
            Default::default(),
            log,
        )
    }

    #[test]
    fn predicts_and_logs_one_row() {
        let (registry, dir, _) = serving_setup("predict");
        let log = Arc::new(PredictionLog::open(dir.join("cache"), None).unwrap());
        let predictor = start(registry, log.clone()).unwrap();

        let img = png_bytes(DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([200, 120, 40]))));
        let response = predictor.predict(&img, "tabby.png").unwrap();

        assert_eq!(response.probs.len(), 2);
        let sum: f32 = response.probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert!(["cat", "dog"].contains(&response.predicted_class.as_str()));
        assert_eq!(response.predicted_name, "catdog_model");
        assert_eq!(response.predicted_alias, "Production");

        let rows = fs::read_to_string(log.csv_path()).unwrap();
        assert_eq!(rows.lines().count(), 2);
        assert!(rows.lines().nth(1).unwrap().starts_with("tabby.png,"));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn rgba_upload_is_served_like_rgb() {
        let (registry, dir, _) = serving_setup("rgba");
        let log = Arc::new(PredictionLog::open(dir.join("cache"), None).unwrap());
        let predictor = start(registry, log).unwrap();

        let rgba = png_bytes(DynamicImage::ImageRgba8(RgbaImage::from_pixel(20, 20, Rgba([10, 200, 30, 90]))));
        let rgb = png_bytes(DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 20, Rgb([10, 200, 30]))));
        let a = predictor.predict(&rgba, "alpha.png").unwrap();
        let b = predictor.predict(&rgb, "plain.png").unwrap();
        assert_eq!(a.probs, b.probs);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn undecodable_upload_is_invalid_input_and_not_logged() {
        let (registry, dir, _) = serving_setup("garbage");
        let log = Arc::new(PredictionLog::open(dir.join("cache"), Some(dir.join("captured"))).unwrap());
        let predictor = start(registry, log.clone()).unwrap();

        let err = predictor.predict(b"GIF89a?? not really", "broken.gif").unwrap_err();
        assert!(err.is_request_local());
        assert!(!log.csv_path().exists());
        assert_eq!(fs::read_dir(dir.join("captured")).unwrap().count(), 0);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn capture_follows_the_logged_row() {
        let (registry, dir, _) = serving_setup("capture");
        let captured = dir.join("captured");
        let log = Arc::new(PredictionLog::open(dir.join("cache"), Some(captured.clone())).unwrap());
        let predictor = start(registry, log.clone()).unwrap();
        let img = png_bytes(DynamicImage::ImageRgb8(RgbImage::from_pixel(24, 24, Rgb([90, 60, 30]))));

        // a model whose class names are missing fails after decoding
        let classes = std::mem::take(&mut predictor.current.lock().classes);
        let err = predictor.predict(&img, "first.png").unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        assert!(!log.csv_path().exists());
        assert_eq!(fs::read_dir(&captured).unwrap().count(), 0);

        predictor.current.lock().classes = classes;
        predictor.predict(&img, "second.png").unwrap();
        let copies: Vec<_> = fs::read_dir(&captured).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(copies.len(), 1);
        assert!(copies[0].to_string_lossy().ends_with("_second.png"));
        assert_eq!(fs::read_to_string(log.csv_path()).unwrap().lines().count(), 2);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn unset_alias_fails_startup() {
        let (registry, dir) = temp_registry("noalias");
        registry.create_registered_model("catdog_model").unwrap();
        let log = Arc::new(PredictionLog::open(dir.join("cache"), None).unwrap());

        let err = start(Arc::new(registry), log).err().unwrap();
        assert!(matches!(err, Error::NotFound(_)));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn reload_swaps_to_repointed_version() {
        let (registry, dir, first) = serving_setup("reload");
        let log = Arc::new(PredictionLog::open(dir.join("cache"), None).unwrap());
        let predictor = start(registry.clone(), log).unwrap();
        assert_eq!(predictor.version(), first);

        let run_id = registry.log_run("catdog", staged_submission(&dir)).unwrap();
        let second = registry.register_version("catdog_model", &run_id).unwrap().version;
        registry.set_alias("catdog_model", "Production", second).unwrap();

        assert_eq!(predictor.reload().unwrap(), second);
        assert_eq!(predictor.version(), second);
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn best_prob_is_rounded_to_six_places() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats([[0.3, 1.7, -0.2]], &device);
        let scores = output_to_prediction(logits).unwrap();
        assert_eq!(scores.predicted_id, 1);
        assert_eq!(scores.best_prob, round6(scores.best_prob));
        assert!((scores.best_prob - scores.probs[1] as f64).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn softmax_sums_to_one_and_argmax_matches(
            logits in prop::collection::vec(-20.0f32..20.0, 2..12)
        ) {
            let device = Default::default();
            let n = logits.len();
            let tensor = Tensor::<TestBackend, 2>::from_data(TensorData::new(logits.clone(), [1, n]), &device);
            let scores = output_to_prediction(tensor).unwrap();

            let sum: f32 = scores.probs.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-4);

            let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            prop_assert!(scores.probs[scores.predicted_id] >= scores.probs.iter().cloned().fold(0.0, f32::max) - 1e-7);
            prop_assert!((logits[scores.predicted_id] - max).abs() < 1e-3);
        }
    }
}
