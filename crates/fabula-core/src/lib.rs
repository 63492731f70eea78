//! fabula-core: pure types and text analysis for narration.
//!
//! No async runtime, no I/O.

pub mod artifact;
pub mod cache_key;
pub mod catalog;
pub mod segment;
pub mod text_prep;
pub mod types;
pub mod voice;
