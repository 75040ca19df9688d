// ============================================================
// Layer 5 - Image Classifier + Model Factory
// ============================================================
// Every architecture is split into two parts:
//
//   trunk: the feature extractor (ResNet / MobileNet body)
//          images [B, 3, H, W] → features [B, F]
//   head:  one Linear layer F → n_classes
//
// The head is always freshly sized to n_classes. With a
// pretrained trunk the trunk's parameters are marked as not
// requiring gradients, so the optimiser only ever sees the
// head's weight and bias.
//
// Backbone keeps one optional slot per family; exactly one is
// populated by the factory. The saved record therefore encodes
// which family it belongs to, and loading a record into a
// model of another family fails.
//
// Reference: Burn Book §3 (Building Blocks), §5 (Records)

use std::path::{Path, PathBuf};

use burn::{
    nn::{
        loss::CrossEntropyLossConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    record::CompactRecorder,
};

use crate::domain::config::Architecture;
use crate::domain::error::{Error, Result};
use crate::ml::mobilenet::{
    MobileNetV2, MobileNetV3Small, MOBILENET_V2_FEATURES, MOBILENET_V3_SMALL_FEATURES,
};
use crate::ml::resnet::{ResNet, RESNET_FEATURES};

#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub resnet:       Option<ResNet<B>>,
    pub mobilenet_v2: Option<MobileNetV2<B>>,
    pub mobilenet_v3: Option<MobileNetV3Small<B>>,
}

impl<B: Backend> Backbone<B> {
    pub fn new(architecture: Architecture, device: &B::Device) -> Self {
        let mut trunk = Self { resnet: None, mobilenet_v2: None, mobilenet_v3: None };
        match architecture {
            Architecture::ResNet18         => trunk.resnet = Some(ResNet::resnet18(device)),
            Architecture::ResNet34         => trunk.resnet = Some(ResNet::resnet34(device)),
            Architecture::MobileNetV2      => trunk.mobilenet_v2 = Some(MobileNetV2::new(device)),
            Architecture::MobileNetV3Small => trunk.mobilenet_v3 = Some(MobileNetV3Small::new(device)),
        }
        trunk
    }

    /// Width of the feature vector fed to the head.
    pub fn features(architecture: Architecture) -> usize {
        match architecture {
            Architecture::ResNet18 | Architecture::ResNet34 => RESNET_FEATURES,
            Architecture::MobileNetV2                       => MOBILENET_V2_FEATURES,
            Architecture::MobileNetV3Small                  => MOBILENET_V3_SMALL_FEATURES,
        }
    }

    /// Whether this trunk has the layout `architecture` builds.
    /// Loading a record zips Option and Vec modules with the
    /// record, so a record of another family leaves slots empty
    /// or blocks missing instead of failing.
    pub fn matches(&self, architecture: Architecture) -> bool {
        let resnet = |blocks: usize| {
            self.resnet.as_ref().is_some_and(|n| {
                n.blocks.len() == blocks
                    && n.blocks.iter().filter(|b| b.downsample.is_some()).count() == 3
            })
        };
        match architecture {
            Architecture::ResNet18         => resnet(8),
            Architecture::ResNet34         => resnet(16),
            Architecture::MobileNetV2      => self.mobilenet_v2.is_some(),
            Architecture::MobileNetV3Small => self.mobilenet_v3.is_some(),
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        if let Some(net) = &self.resnet {
            return net.forward(images);
        }
        if let Some(net) = &self.mobilenet_v2 {
            return net.forward(images);
        }
        match &self.mobilenet_v3 {
            Some(net) => net.forward(images),
            None      => unreachable!("Backbone::new always populates one family"),
        }
    }
}

#[derive(Module, Debug)]
pub struct ImageClassifier<B: Backend> {
    pub trunk:     Backbone<B>,
    pub head:      Linear<B>,
    pub n_classes: usize,
}

impl<B: Backend> ImageClassifier<B> {
    /// images: [batch, 3, H, W] → logits: [batch, n_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.trunk.forward(images))
    }

    /// Cross-entropy over the logits. Works on any backend, so
    /// the same call serves training and evaluation.
    pub fn forward_loss(
        &self,
        images:  Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let logits = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), targets);
        (loss, logits)
    }

    /// Number of correct argmax predictions in a batch.
    pub fn correct(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
        // argmax(1) returns [batch, 1], flatten before comparing
        let predicted = logits.argmax(1).flatten::<1>(0, 1);
        predicted.equal(targets).int().sum().into_scalar().elem::<i64>() as usize
    }
}

/// CompactRecorder appends its own `.mpk.gz`, so paths handed to it
/// must not carry the extension already.
pub fn record_stem(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    match text.strip_suffix(".mpk.gz") {
        Some(stem) => PathBuf::from(stem),
        None       => path.to_path_buf(),
    }
}

// ─── Model Factory ────────────────────────────────────────────────────────────

/// Build a classifier for `architecture` with an `n_classes` head.
///
/// Parameter initialisation draws from the backend RNG, so the
/// caller seeds the backend (`B::seed`) first for reproducibility.
///
/// With `pretrained`, the trunk is loaded from `trunk_weights`
/// when given and then frozen.
pub fn create<B: Backend>(
    architecture:  Architecture,
    n_classes:     usize,
    pretrained:    bool,
    trunk_weights: Option<&Path>,
    device:        &B::Device,
) -> Result<ImageClassifier<B>> {
    if n_classes == 0 {
        return Err(Error::InvalidArgument("n_classes must be at least 1".into()));
    }

    let mut trunk = Backbone::new(architecture, device);
    let head = LinearConfig::new(Backbone::<B>::features(architecture), n_classes).init(device);

    if pretrained {
        match trunk_weights {
            Some(path) => {
                trunk = trunk
                    .load_file(record_stem(path), &CompactRecorder::new(), device)
                    .map_err(|e| Error::Model(format!(
                        "cannot load trunk weights '{}': {e}",
                        path.display()
                    )))?;
                if !trunk.matches(architecture) {
                    return Err(Error::Model(format!(
                        "'{}' does not hold {} trunk weights",
                        path.display(),
                        architecture
                    )));
                }
                tracing::info!("Loaded {} trunk weights from '{}'", architecture, path.display());
            }
            None => tracing::warn!(
                "Pretrained {} requested without trunk weights; freezing a randomly initialised trunk",
                architecture
            ),
        }
        trunk = trunk.no_grad();
    }

    tracing::info!(
        "Built {} classifier: {} features → {} classes{}",
        architecture,
        Backbone::<B>::features(architecture),
        n_classes,
        if pretrained { " (trunk frozen)" } else { "" },
    );
    Ok(ImageClassifier { trunk, head, n_classes })
}

/// Rebuild an architecture and load a full classifier record into it.
pub fn load<B: Backend>(
    architecture: Architecture,
    n_classes:    usize,
    path:         &Path,
    device:       &B::Device,
) -> Result<ImageClassifier<B>> {
    let model = create::<B>(architecture, n_classes, false, None, device)?
        .load_file(record_stem(path), &CompactRecorder::new(), device)
        .map_err(|e| Error::Model(format!("cannot load model '{}': {e}", path.display())))?;

    let [features, classes] = model.head.weight.dims();
    if !model.trunk.matches(architecture)
        || features != Backbone::<B>::features(architecture)
        || classes != n_classes
    {
        return Err(Error::Model(format!(
            "'{}' is not a {} model with {} classes",
            path.display(),
            architecture,
            n_classes
        )));
    }
    Ok(model)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::optim::GradientsParams;

    type TestBackend = NdArray;
    type TestAutodiff = Autodiff<NdArray>;

    #[test]
    fn head_matches_class_count_for_every_architecture() {
        let device = Default::default();
        for arch in Architecture::ALL {
            let model = create::<TestBackend>(arch, 3, false, None, &device).unwrap();
            let x = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
            assert_eq!(model.forward(x).dims(), [2, 3], "{arch}");
        }
    }

    #[test]
    fn zero_classes_is_rejected() {
        let device = Default::default();
        let err = create::<TestBackend>(Architecture::ResNet18, 0, false, None, &device).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn pretrained_trunk_receives_no_gradients() {
        let device = Default::default();
        let model =
            create::<TestAutodiff>(Architecture::ResNet18, 2, true, None, &device).unwrap();
        let x = Tensor::<TestAutodiff, 4>::ones([2, 3, 32, 32], &device);
        let y = Tensor::<TestAutodiff, 1, Int>::from_ints([0, 1], &device);

        let (loss, _) = model.forward_loss(x, y);
        let grads = GradientsParams::from_grads(loss.backward(), &model);
        // only the head's weight and bias are tracked
        assert_eq!(grads.len(), 2);
    }

    #[test]
    fn record_stem_strips_recorder_extension() {
        assert_eq!(record_stem(Path::new("a/model.mpk.gz")), PathBuf::from("a/model"));
        assert_eq!(record_stem(Path::new("a/model")), PathBuf::from("a/model"));
    }

    #[test]
    fn correct_counts_argmax_hits() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats([[2.0, 1.0], [0.0, 3.0], [5.0, 0.0]], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 1, 1], &device);
        assert_eq!(ImageClassifier::correct(logits, targets), 2);
    }
}
