// ============================================================
// Layer 5 - MobileNet Backbones
// ============================================================
// Two depthwise-separable families:
//
//   MobileNetV2 (Sandler et al., 2018)
//     stem conv 3x3/2 (32) → 17 inverted residual blocks
//     → conv 1x1 (1280) → global average → dropout(0.2)
//     Features: 1280
//
//   MobileNetV3-Small (Howard et al., 2019)
//     stem conv 3x3/2 (16, hard-swish) → 11 blocks, some with
//     squeeze-excitation → conv 1x1 (576) → global average
//     → linear 576→1024 → hard-swish → dropout(0.2)
//     Features: 1024
//
// The 576→1024 layer of V3 sits in front of the final
// classifier, so it belongs to the trunk and is frozen with
// the rest of it when a pretrained trunk is used.
//
// Inverted residual block:
//   x ──► [1x1 expand] → 3x3/5x5 depthwise → [SE] → 1x1 project ──► (+)
//   │                                                                ▲
//   └──────────── identity (stride 1 and same width only) ──────────┘

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::relu,
};

use crate::ml::layers::{hard_sigmoid, hard_swish, relu6, ConvNorm};

pub const MOBILENET_V2_FEATURES: usize = 1280;
pub const MOBILENET_V3_SMALL_FEATURES: usize = 1024;

const CLASSIFIER_DROPOUT: f64 = 0.2;

/// Round `v` to a multiple of 8 without dropping more than 10%.
fn make_divisible(v: usize) -> usize {
    let rounded = ((v + 4) / 8 * 8).max(8);
    if (rounded as f64) < 0.9 * v as f64 { rounded + 8 } else { rounded }
}

// ─── MobileNetV2 ──────────────────────────────────────────────────────────────

/// (expansion t, output channels c, repeats n, first stride s)
const V2_SETTINGS: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    pub expand:    Option<ConvNorm<B>>,
    pub depthwise: ConvNorm<B>,
    pub project:   ConvNorm<B>,
    pub residual:  bool,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(
        channels_in:  usize,
        channels_out: usize,
        stride:       usize,
        expansion:    usize,
        device:       &B::Device,
    ) -> Self {
        let hidden = channels_in * expansion;
        let expand = (expansion != 1).then(|| ConvNorm::new(channels_in, hidden, 1, 1, 1, device));
        Self {
            expand,
            depthwise: ConvNorm::new(hidden, hidden, 3, stride, hidden, device),
            project:   ConvNorm::new(hidden, channels_out, 1, 1, 1, device),
            residual:  stride == 1 && channels_in == channels_out,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = x.clone();
        if let Some(expand) = &self.expand {
            out = relu6(expand.forward(out));
        }
        out = relu6(self.depthwise.forward(out));
        out = self.project.forward(out);
        if self.residual { out + x } else { out }
    }
}

#[derive(Module, Debug)]
pub struct MobileNetV2<B: Backend> {
    pub stem:    ConvNorm<B>,
    pub blocks:  Vec<InvertedResidual<B>>,
    pub last:    ConvNorm<B>,
    pub avg:     AdaptiveAvgPool2d,
    pub dropout: Dropout,
}

impl<B: Backend> MobileNetV2<B> {
    pub fn new(device: &B::Device) -> Self {
        let stem = ConvNorm::new(3, 32, 3, 2, 1, device);

        let mut blocks = Vec::new();
        let mut channels_in = 32;
        for (t, c, n, s) in V2_SETTINGS {
            for i in 0..n {
                let stride = if i == 0 { s } else { 1 };
                blocks.push(InvertedResidual::new(channels_in, c, stride, t, device));
                channels_in = c;
            }
        }

        Self {
            stem,
            blocks,
            last:    ConvNorm::new(channels_in, MOBILENET_V2_FEATURES, 1, 1, 1, device),
            avg:     AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(CLASSIFIER_DROPOUT).init(),
        }
    }

    /// images: [batch, 3, H, W] → features: [batch, 1280]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = relu6(self.stem.forward(images));
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = relu6(self.last.forward(x));
        self.dropout.forward(self.avg.forward(x).flatten::<2>(1, 3))
    }
}

// ─── MobileNetV3-Small ────────────────────────────────────────────────────────

/// (kernel, expanded channels, output channels, squeeze-excite, hard-swish, stride)
const V3_SMALL_SETTINGS: [(usize, usize, usize, bool, bool, usize); 11] = [
    (3, 16, 16, true, false, 2),
    (3, 72, 24, false, false, 2),
    (3, 88, 24, false, false, 1),
    (5, 96, 40, true, true, 2),
    (5, 240, 40, true, true, 1),
    (5, 240, 40, true, true, 1),
    (5, 120, 48, true, true, 1),
    (5, 144, 48, true, true, 1),
    (5, 288, 96, true, true, 2),
    (5, 576, 96, true, true, 1),
    (5, 576, 96, true, true, 1),
];

const V3_SMALL_LAST_CONV: usize = 576;

#[derive(Module, Debug)]
pub struct SqueezeExcite<B: Backend> {
    pub avg:    AdaptiveAvgPool2d,
    pub reduce: Conv2d<B>,
    pub expand: Conv2d<B>,
}

impl<B: Backend> SqueezeExcite<B> {
    fn new(channels: usize, device: &B::Device) -> Self {
        let squeezed = make_divisible(channels / 4);
        Self {
            avg:    AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            reduce: Conv2dConfig::new([channels, squeezed], [1, 1]).init(device),
            expand: Conv2dConfig::new([squeezed, channels], [1, 1]).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.avg.forward(x.clone());
        let scale = relu(self.reduce.forward(scale));
        let scale = hard_sigmoid(self.expand.forward(scale));
        x * scale
    }
}

#[derive(Module, Debug)]
pub struct V3Block<B: Backend> {
    pub expand:     Option<ConvNorm<B>>,
    pub depthwise:  ConvNorm<B>,
    pub se:         Option<SqueezeExcite<B>>,
    pub project:    ConvNorm<B>,
    pub hard_swish: bool,
    pub residual:   bool,
}

impl<B: Backend> V3Block<B> {
    fn new(
        channels_in: usize,
        setting:     (usize, usize, usize, bool, bool, usize),
        device:      &B::Device,
    ) -> Self {
        let (kernel, expanded, channels_out, use_se, hard_swish, stride) = setting;
        let expand = (expanded != channels_in)
            .then(|| ConvNorm::new(channels_in, expanded, 1, 1, 1, device));
        Self {
            expand,
            depthwise: ConvNorm::new(expanded, expanded, kernel, stride, expanded, device),
            se:        use_se.then(|| SqueezeExcite::new(expanded, device)),
            project:   ConvNorm::new(expanded, channels_out, 1, 1, 1, device),
            hard_swish,
            residual:  stride == 1 && channels_in == channels_out,
        }
    }

    fn activate(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        if self.hard_swish { hard_swish(x) } else { relu(x) }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = x.clone();
        if let Some(expand) = &self.expand {
            out = self.activate(expand.forward(out));
        }
        out = self.activate(self.depthwise.forward(out));
        if let Some(se) = &self.se {
            out = se.forward(out);
        }
        out = self.project.forward(out);
        if self.residual { out + x } else { out }
    }
}

#[derive(Module, Debug)]
pub struct MobileNetV3Small<B: Backend> {
    pub stem:    ConvNorm<B>,
    pub blocks:  Vec<V3Block<B>>,
    pub last:    ConvNorm<B>,
    pub avg:     AdaptiveAvgPool2d,
    pub hidden:  Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> MobileNetV3Small<B> {
    pub fn new(device: &B::Device) -> Self {
        let stem = ConvNorm::new(3, 16, 3, 2, 1, device);

        let mut blocks = Vec::with_capacity(V3_SMALL_SETTINGS.len());
        let mut channels_in = 16;
        for setting in V3_SMALL_SETTINGS {
            blocks.push(V3Block::new(channels_in, setting, device));
            channels_in = setting.2;
        }

        Self {
            stem,
            blocks,
            last:    ConvNorm::new(channels_in, V3_SMALL_LAST_CONV, 1, 1, 1, device),
            avg:     AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            hidden:  LinearConfig::new(V3_SMALL_LAST_CONV, MOBILENET_V3_SMALL_FEATURES).init(device),
            dropout: DropoutConfig::new(CLASSIFIER_DROPOUT).init(),
        }
    }

    /// images: [batch, 3, H, W] → features: [batch, 1024]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = hard_swish(self.stem.forward(images));
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = hard_swish(self.last.forward(x));
        let x = self.avg.forward(x).flatten::<2>(1, 3);
        self.dropout.forward(hard_swish(self.hidden.forward(x)))
    }
}
