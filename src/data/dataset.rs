use burn::data::dataset::{
    transform::{Mapper, MapperDataset},
    Dataset,
};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::loader::ImageFolder;
use crate::data::preprocessor::{flip_horizontal, ImageTransform};
use crate::domain::error::{Error, Result};

/// One decoded, normalised image and its class index.
/// `pixels` is CHW, length 3 * size * size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageItem {
    pub pixels: Vec<f32>,
    pub label:  usize,
}

/// Lazily decoding view over an ImageFolder.
pub struct ImageDataset {
    folder:    ImageFolder,
    transform: ImageTransform,
}

impl ImageDataset {
    pub fn new(folder: ImageFolder, transform: ImageTransform) -> Self {
        Self { folder, transform }
    }

    pub fn classes(&self) -> &[String] {
        &self.folder.classes
    }

    /// Decode one sample, keeping the error. `get` drops it.
    pub fn load(&self, index: usize) -> Result<ImageItem> {
        let (path, label) = self
            .folder
            .samples
            .get(index)
            .ok_or_else(|| Error::InvalidArgument(format!("sample index {index} out of range")))?;
        let bytes = std::fs::read(path).map_err(|e| Error::storage(path.display(), e))?;
        let pixels = self.transform.apply_bytes(&bytes).map_err(|e| {
            Error::InvalidInput(format!("{}: {e}", path.display()))
        })?;
        Ok(ImageItem { pixels, label: *label })
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        match self.load(index) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!("Sample {} unavailable: {}", index, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.folder.len()
    }
}

/// Training-time augmentation: mirrors an item left to right with
/// probability `p`. Draws come from one seeded RNG, so a fixed seed
/// and a fixed visiting order give the same flips on every run.
pub struct RandomFlip {
    size: usize,
    p:    f64,
    rng:  Mutex<StdRng>,
}

impl RandomFlip {
    pub fn new(size: usize, p: f64, seed: u64) -> Self {
        Self { size, p: p.clamp(0.0, 1.0), rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl Mapper<ImageItem, ImageItem> for RandomFlip {
    fn map(&self, item: &ImageItem) -> ImageItem {
        let mut item = item.clone();
        if self.rng.lock().gen_bool(self.p) {
            flip_horizontal(&mut item.pixels, self.size);
        }
        item
    }
}

/// A dataset whose items pass through [`RandomFlip`] on every read.
pub type FlippedDataset<D> = MapperDataset<D, RandomFlip, ImageItem>;

pub fn with_random_flip<D>(dataset: D, size: usize, p: f64, seed: u64) -> FlippedDataset<D>
where
    D: Dataset<ImageItem>,
{
    MapperDataset::new(dataset, RandomFlip::new(size, p, seed))
}
