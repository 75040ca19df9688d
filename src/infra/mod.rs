// ============================================================
// Layer 6 - Infrastructure Layer
// ============================================================
// Everything that persists state outside the process:
//
//   checkpoint.rs     - staging the finalized model of a run
//                       (CompactRecorder) plus its config JSON
//
//   metrics.rs        - per-epoch metrics CSV next to the
//                       staged checkpoint
//
//   registry.rs       - FileRegistry, the ArtifactRegistry over
//                       a local tracking root: runs, search,
//                       registered models, versions, aliases
//
//   prediction_log.rs - the append-only request cache CSV and
//                       optional capture of submitted images
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling)
//            Burn Book §5 (Checkpointing)

/// Model checkpoint saving and loading
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;

/// Local experiment tracking and model registry
pub mod registry;

/// Durable log of served predictions
pub mod prediction_log;
