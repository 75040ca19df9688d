// ============================================================
// Layer 4 - Image Batcher
// ============================================================
// Implements Burn's Batcher trait to stack a Vec<ImageItem>
// into one image tensor and one target tensor.
//
// How batching works here:
//   Input:  N items, each a flat CHW buffer of 3 * S * S floats
//   Output: images  [N, 3, S, S]
//           targets [N]
//
// All items were produced by the same ImageTransform, so every
// buffer has the same length and a plain concatenation followed
// by a reshape is enough.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::data::dataset::ImageItem;

#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// Shape: [batch_size, 3, size, size]
    pub images: Tensor<B, 4>,

    /// Ground-truth class indices - shape: [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct ImageBatcher<B: Backend> {
    pub device: B::Device,
    /// Square side length of every item
    pub size: usize,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device, size: usize) -> Self {
        Self { device, size }
    }
}

impl<B: Backend> Batcher<ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> ImageBatch<B> {
        let batch_size = items.len();
        let plane = 3 * self.size * self.size;

        let mut flat: Vec<f32> = Vec::with_capacity(batch_size * plane);
        let mut labels: Vec<i64> = Vec::with_capacity(batch_size);
        for item in items {
            debug_assert_eq!(item.pixels.len(), plane);
            flat.extend_from_slice(&item.pixels);
            labels.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(flat, [batch_size, 3, self.size, self.size]),
            &self.device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(labels, [batch_size]),
            &self.device,
        );

        ImageBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn stacks_items_into_nchw() {
        let device = Default::default();
        let batcher = ImageBatcher::<NdArray>::new(device, 2);
        let items = vec![
            ImageItem { pixels: vec![0.0; 12], label: 0 },
            ImageItem { pixels: vec![1.0; 12], label: 1 },
            ImageItem { pixels: vec![2.0; 12], label: 1 },
        ];

        let batch = batcher.batch(items);
        assert_eq!(batch.images.dims(), [3, 3, 2, 2]);
        assert_eq!(batch.targets.dims(), [3]);

        let labels: Vec<i64> = batch.targets.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(labels, vec![0, 1, 1]);
        let second: f32 = batch.images.slice([1..2, 0..1, 0..1, 0..1]).into_scalar().elem();
        assert_eq!(second, 1.0);
    }
}
