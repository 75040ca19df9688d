// ============================================================
// Layer 5 - ResNet Backbone
// ============================================================
// Basic-block residual networks (He et al., 2016):
//
//   stem:   conv 7x7/2 (64) → BN → ReLU → maxpool 3x3/2
//   stages: 4 stages of BasicBlocks, widths 64/128/256/512
//           resnet_18: [2, 2, 2, 2] blocks
//           resnet_34: [3, 4, 6, 3] blocks
//   pool:   global average → 512-d feature vector
//
// BasicBlock:
//   x ──► conv3x3 → BN → ReLU → conv3x3 → BN ──► (+) ──► ReLU
//   │                                            ▲
//   └────────── identity / 1x1 projection ───────┘
//
// The first block of stages 2-4 halves the spatial size and
// needs a 1x1 strided projection on the shortcut.
//
// Reference: Burn Book §3 (Building Blocks)

use burn::{
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::relu,
};

use crate::ml::layers::ConvNorm;

/// Output width of the pooled feature vector.
pub const RESNET_FEATURES: usize = 512;

const STAGE_WIDTHS: [usize; 4] = [64, 128, 256, 512];

#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    pub conv1:      ConvNorm<B>,
    pub conv2:      ConvNorm<B>,
    pub downsample: Option<ConvNorm<B>>,
}

impl<B: Backend> BasicBlock<B> {
    fn new(channels_in: usize, channels_out: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || channels_in != channels_out)
            .then(|| ConvNorm::new(channels_in, channels_out, 1, stride, 1, device));
        Self {
            conv1: ConvNorm::new(channels_in, channels_out, 3, stride, 1, device),
            conv2: ConvNorm::new(channels_out, channels_out, 3, 1, 1, device),
            downsample,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(proj) => proj.forward(x.clone()),
            None       => x.clone(),
        };
        let out = relu(self.conv1.forward(x));
        let out = self.conv2.forward(out);
        relu(out + identity)
    }
}

#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    pub stem:   ConvNorm<B>,
    pub pool:   MaxPool2d,
    pub blocks: Vec<BasicBlock<B>>,
    pub avg:    AdaptiveAvgPool2d,
}

impl<B: Backend> ResNet<B> {
    /// `stages` holds the block count of each of the four stages.
    pub fn new(stages: [usize; 4], device: &B::Device) -> Self {
        let stem = ConvNorm::new(3, 64, 7, 2, 1, device);
        let pool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut blocks = Vec::with_capacity(stages.iter().sum());
        let mut channels_in = 64;
        for (stage, (&count, &width)) in stages.iter().zip(STAGE_WIDTHS.iter()).enumerate() {
            for i in 0..count {
                let stride = if stage > 0 && i == 0 { 2 } else { 1 };
                blocks.push(BasicBlock::new(channels_in, width, stride, device));
                channels_in = width;
            }
        }

        let avg = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        Self { stem, pool, blocks, avg }
    }

    pub fn resnet18(device: &B::Device) -> Self {
        Self::new([2, 2, 2, 2], device)
    }

    pub fn resnet34(device: &B::Device) -> Self {
        Self::new([3, 4, 6, 3], device)
    }

    /// images: [batch, 3, H, W] → features: [batch, 512]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.pool.forward(relu(self.stem.forward(images)));
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.avg.forward(x).flatten::<2>(1, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn block_counts_follow_depth() {
        let device = Default::default();
        assert_eq!(ResNet::<TestBackend>::resnet18(&device).blocks.len(), 8);
        assert_eq!(ResNet::<TestBackend>::resnet34(&device).blocks.len(), 16);
    }

    #[test]
    fn only_stage_entries_project_the_shortcut() {
        let device = Default::default();
        let net = ResNet::<TestBackend>::resnet18(&device);
        let projected: Vec<usize> = net
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, b)| b.downsample.is_some())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(projected, vec![2, 4, 6]);
    }

    #[test]
    fn forward_yields_512_features() {
        let device = Default::default();
        let net = ResNet::<TestBackend>::resnet18(&device);
        let x = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);
        assert_eq!(net.forward(x).dims(), [1, RESNET_FEATURES]);
    }
}
