//! fabula-lib: narration engine.
//!
//! Synthesis cascade, artifact cache, segment stitching, and HTTP API.
//! Depends on fabula-core for pure types and text analysis.

pub mod cache;
pub mod error;
pub mod pipeline;
pub mod server;
pub mod stitch;
pub mod synth;

// Re-export fabula-core for convenience
pub use fabula_core;
