// ============================================================
// Layer 5 - ML / Model Layer (Burn)
// ============================================================
// Everything that touches Burn tensors or modules lives here.
// Other layers hand in datasets and configs and get back a
// trained model or a prediction.
//
// What's in this layer:
//
//   layers.rs    - conv + batch-norm unit and the hard
//                  activations shared by the backbones
//
//   resnet.rs    - ResNet-18 / ResNet-34 trunks (basic blocks)
//
//   mobilenet.rs - MobileNetV2 and MobileNetV3-Small trunks
//                  (inverted residuals, squeeze-excite)
//
//   model.rs     - Model Factory: backbone + linear head,
//                  optional frozen pretrained trunk
//
//   selection.rs - per-metric best trackers and the
//                  snapshot store used by the training loop
//
//   trainer.rs   - the training loop: train, validate,
//                  select best, finalize
//
//   predictor.rs - alias resolution, model loading and
//                  per-request inference
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            He et al. (2016), Sandler et al. (2018), Howard et al. (2019)

use burn::backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu};

/// Shared building blocks for the backbones
pub mod layers;

/// Residual network trunks
pub mod resnet;

/// Mobile inverted-residual trunks
pub mod mobilenet;

/// Classifier assembly, creation and loading
pub mod model;

/// Best-epoch tracking
pub mod selection;

/// Full training loop with validation and best-snapshot selection
pub mod trainer;

/// Serving: resolver, predictor, reload
pub mod predictor;

/// Backend used for `--device cpu`.
pub type CpuBackend = NdArray;
/// Backend used for `--device cuda`.
pub type GpuBackend = Wgpu;

pub type CpuTrainBackend = Autodiff<CpuBackend>;
pub type GpuTrainBackend = Autodiff<GpuBackend>;

pub fn cpu_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

pub fn gpu_device() -> WgpuDevice {
    WgpuDevice::default()
}
