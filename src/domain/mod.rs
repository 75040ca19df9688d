// ============================================================
// Layer 3 - Domain Layer
// ============================================================
// Plain Rust structs, enums and traits that define what the
// system talks about: training configurations, runs, model
// versions, predictions, and the two seams (registry and
// predictor).
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O or network calls
//   - Only types, validation and traits
//
// Everything in here is testable without a backend.

/// Typed error taxonomy shared by every core layer
pub mod error;

/// Architecture / metric / device enums and TrainingConfiguration
pub mod config;

/// Runs, versions, aliases and their typed metadata
pub mod run;

/// Run search filter strings
pub mod filter;

/// PredictionResponse and PredictionRecord
pub mod prediction;

/// ArtifactRegistry and ImagePredictor
pub mod traits;
