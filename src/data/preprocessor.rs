// ============================================================
// Layer 4 - Image Preprocessor
// ============================================================
// Turns encoded image bytes into the flat CHW float buffer the
// model consumes. The same transform runs at training time and
// at serving time, so the two can never drift apart.
//
// Steps (applied in order):
//   1. Decode (jpeg / png / bmp / webp)
//   2. Convert to 3-channel RGB; an alpha channel is dropped
//   3. Resize to size x size (bilinear)
//   4. Scale to [0, 1]
//   5. Normalise each channel: (x - mean[c]) / std[c]
//   6. Lay out as [C, H, W]
//
// Training adds one augmentation on top: a random horizontal
// flip, applied to the already-normalised buffer.
//
// Reference: image crate docs (DynamicImage, imageops::resize)

use image::{imageops::FilterType, DynamicImage};

use crate::domain::error::{Error, Result};

/// Default square input size.
pub const IMAGE_SIZE: usize = 224;

/// ImageNet channel statistics.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, PartialEq)]
pub struct ImageTransform {
    pub size: usize,
    pub mean: [f32; 3],
    pub std:  [f32; 3],
}

impl Default for ImageTransform {
    fn default() -> Self {
        Self { size: IMAGE_SIZE, mean: IMAGENET_MEAN, std: IMAGENET_STD }
    }
}

impl ImageTransform {
    pub fn new(size: usize, mean: [f32; 3], std: [f32; 3]) -> Self {
        Self { size, mean, std }
    }

    /// Number of floats produced per image.
    pub fn tensor_len(&self) -> usize {
        3 * self.size * self.size
    }

    /// Decode raw bytes. Anything the decoder rejects is InvalidInput.
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory(bytes)
            .map_err(|e| Error::InvalidInput(format!("cannot decode image: {e}")))
    }

    /// Run steps 2-6 on an already decoded image.
    pub fn apply(&self, img: &DynamicImage) -> Vec<f32> {
        // to_rgb8 discards alpha rather than compositing it
        let rgb = img.to_rgb8();
        let side = self.size as u32;
        let resized = image::imageops::resize(&rgb, side, side, FilterType::Triangle);

        let plane = self.size * self.size;
        let mut out = vec![0.0f32; 3 * plane];
        for (x, y, px) in resized.enumerate_pixels() {
            let idx = y as usize * self.size + x as usize;
            for c in 0..3 {
                let v = px.0[c] as f32 / 255.0;
                out[c * plane + idx] = (v - self.mean[c]) / self.std[c];
            }
        }
        out
    }

    /// Decode + transform in one go.
    pub fn apply_bytes(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        let img = Self::decode(bytes)?;
        Ok(self.apply(&img))
    }
}

/// Mirror a CHW buffer left-to-right in place.
pub fn flip_horizontal(pixels: &mut [f32], size: usize) {
    for row in pixels.chunks_mut(size) {
        row.reverse();
    }
}
