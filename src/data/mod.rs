// ============================================================
// Layer 4 - Data Pipeline
// ============================================================
// This layer handles everything from image files on disk
// all the way to tensor batches.
//
// The pipeline flows in this order:
//
//   <data_dir>/<version>/{train,val,test}/<class>/*.jpg
//       │
//       ▼
//   ImageFolder       → scans class folders, sorted labels
//       │
//       ▼
//   ImageTransform    → decode, RGB, resize, normalise (CHW)
//       │
//       ▼
//   ImageDataset      → implements Burn's Dataset trait
//       │
//       ▼
//   RandomFlip        → seeded mirror, training split only
//       │
//       ▼
//   DataLoaderBuilder → seeded shuffle, fixed-size batches
//       │
//       ▼
//   ImageBatcher      → stacks items into tensor batches
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Scans ImageFolder-style partitions of a data version
pub mod loader;

/// Decoding, resizing and normalisation shared by train and serve
pub mod preprocessor;

/// Implements Burn's Dataset trait for image samples, plus flip augmentation
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;
