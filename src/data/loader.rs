// ============================================================
// Layer 4 - Image Folder Loader
// ============================================================
// Scans a partition directory laid out the ImageFolder way:
//
//   <data_dir>/<data_version>/
//       train/
//           cat/  0001.jpg 0002.jpg ...
//           dog/  0001.jpg ...
//       val/   (same class folders)
//       test/  (optional)
//
// Class index = position of the class folder name in sorted
// order, so the mapping is stable across machines and runs.
// Only the file paths are collected here; decoding happens
// lazily in the dataset.

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::error::{Error, Result};

/// Extensions the preprocessor can decode.
const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// One scanned partition: sorted class names and labelled paths.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    pub root:    PathBuf,
    pub classes: Vec<String>,
    pub samples: Vec<(PathBuf, usize)>,
}

impl ImageFolder {
    /// Scan `root`. A missing directory is NotFound.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::NotFound(format!(
                "image folder '{}' does not exist",
                root.display()
            )));
        }

        let mut classes = Vec::new();
        for entry in fs::read_dir(&root).map_err(|e| Error::storage(root.display(), e))? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    classes.push(name.to_string());
                }
            }
        }
        classes.sort();

        let mut samples = Vec::new();
        for (label, class) in classes.iter().enumerate() {
            let class_dir = root.join(class);
            let mut files: Vec<PathBuf> = fs::read_dir(&class_dir)
                .map_err(|e| Error::storage(class_dir.display(), e))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| is_image(p))
                .collect();
            files.sort();
            tracing::debug!("Class '{}' -> {} ({} images)", class, label, files.len());
            samples.extend(files.into_iter().map(|p| (p, label)));
        }

        tracing::info!(
            "Scanned '{}': {} classes, {} images",
            root.display(),
            classes.len(),
            samples.len()
        );
        Ok(Self { root, classes, samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// File with one of the accepted image extensions.
pub fn is_image(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.iter().any(|ok| ok.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
}

/// The partitions of one data version.
#[derive(Debug, Clone)]
pub struct DataVersion {
    pub version: String,
    pub train:   ImageFolder,
    pub val:     ImageFolder,
    pub test:    Option<ImageFolder>,
}

impl DataVersion {
    /// Open `<data_dir>/<version>/{train,val[,test]}`.
    ///
    /// The validation and test partitions must carry exactly the
    /// training classes, otherwise label indices would disagree.
    pub fn open(data_dir: impl AsRef<Path>, version: &str) -> Result<Self> {
        let base = data_dir.as_ref().join(version);
        if !base.is_dir() {
            return Err(Error::NotFound(format!("data version '{version}' not found under '{}'",
                data_dir.as_ref().display())));
        }

        let train = ImageFolder::open(base.join("train"))?;
        let val = ImageFolder::open(base.join("val"))?;
        let test_dir = base.join("test");
        let test = if test_dir.is_dir() { Some(ImageFolder::open(test_dir)?) } else { None };

        for (name, part) in [("val", Some(&val)), ("test", test.as_ref())] {
            if let Some(part) = part {
                if part.classes != train.classes {
                    return Err(Error::InvalidArgument(format!(
                        "{name} classes {:?} differ from train classes {:?}",
                        part.classes, train.classes
                    )));
                }
            }
        }

        Ok(Self { version: version.to_string(), train, val, test })
    }

    pub fn classes(&self) -> &[String] {
        &self.train.classes
    }
}
