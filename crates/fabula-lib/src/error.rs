//! Error types for the narration engine.
//!
//! None of these escape [`NarrationPipeline::synthesize`](crate::pipeline::NarrationPipeline::synthesize);
//! every failure there turns into a fallback branch.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of one call to the synthesis provider.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("no synthesis credential configured")]
    NoCredential,

    #[error("synthesis timed out after {0:?}")]
    Timeout(Duration),

    /// Network error, non-success status or unreadable body.
    #[error("synthesis failed: {0}")]
    Transient(String),

    /// The provider does not offer this capability (e.g. multi-speaker dialogue).
    #[error("unsupported by provider: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for SynthesisError {
    fn from(e: reqwest::Error) -> Self {
        SynthesisError::Transient(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StitchError {
    #[error("concatenation tool '{0}' is not available")]
    ToolUnavailable(String),

    #[error("concatenation failed: {0}")]
    Failed(String),

    #[error("no artifacts to stitch")]
    Empty,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| CacheError::Io { path, source }
    }
}
