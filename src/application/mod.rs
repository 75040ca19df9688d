// ============================================================
// Layer 2 - Application / Use Cases
// ============================================================
// One use case per CLI subcommand. Each one wires the lower
// layers together for a single goal and nothing more.
//
// Rules for this layer:
//   - No tensor math or model code here
//   - No printing here (that's Layer 1)
//   - Errors leave as anyhow::Error with context attached;
//     the typed domain error stays reachable via downcast
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Train one run and log it to the registry
pub mod train_use_case;

// Promote the best run to a registry alias
pub mod register_use_case;

// Serve image files through the aliased model
pub mod predict_use_case;
