//! Joins per-segment audio into one artifact.
//!
//! Concatenation shells out to ffmpeg's concat demuxer. When ffmpeg is
//! missing or fails, the first segment is used on its own.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::cache::SCRATCH_DIR;
use crate::error::StitchError;

/// How a stitched artifact was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchMode {
    /// Single input, copied as-is.
    Copied,
    /// Several inputs joined by the external tool.
    Concatenated,
    /// Joining failed; only the first input was kept.
    FirstOnly,
}

#[derive(Debug, Clone)]
pub struct Stitcher {
    ffmpeg: String,
}

impl Stitcher {
    pub fn new(ffmpeg: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    /// Join `parts` in order into `dest`. `dest` must not exist yet.
    pub async fn stitch(&self, parts: &[PathBuf], dest: &Path) -> Result<StitchMode, StitchError> {
        let Some(first) = parts.first() else {
            return Err(StitchError::Empty);
        };
        if parts.len() == 1 {
            tokio::fs::copy(first, dest).await?;
            return Ok(StitchMode::Copied);
        }

        match self.concat(parts, dest).await {
            Ok(()) => Ok(StitchMode::Concatenated),
            Err(e @ (StitchError::ToolUnavailable(_) | StitchError::Failed(_))) => {
                warn!("stitch: {e}; keeping first of {} segments", parts.len());
                let _ = tokio::fs::remove_file(dest).await;
                tokio::fs::copy(first, dest).await?;
                Ok(StitchMode::FirstOnly)
            }
            Err(e) => Err(e),
        }
    }

    async fn concat(&self, parts: &[PathBuf], dest: &Path) -> Result<(), StitchError> {
        let list = dest.with_extension("list");
        tokio::fs::write(&list, concat_list(parts)?).await?;

        debug!("stitch: concatenating {} segments with {}", parts.len(), self.ffmpeg);
        let output = tokio::process::Command::new(&self.ffmpeg)
            .args(["-y", "-f", "concat", "-safe", "0", "-i"])
            .arg(&list)
            .args(["-c", "copy"])
            .arg(dest)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;
        let _ = tokio::fs::remove_file(&list).await;

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StitchError::ToolUnavailable(self.ffmpeg.clone()));
            }
            Err(e) => return Err(StitchError::Failed(format!("failed to spawn {}: {e}", self.ffmpeg))),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
            return Err(StitchError::Failed(format!("{}: {tail}", output.status)));
        }
        Ok(())
    }
}

/// Concat demuxer input: one `file '<absolute path>'` line per part.
fn concat_list(parts: &[PathBuf]) -> Result<String, StitchError> {
    let mut list = String::new();
    for part in parts {
        let abs = std::path::absolute(part)?;
        let escaped = abs.to_string_lossy().replace('\'', r"'\''");
        list.push_str(&format!("file '{escaped}'\n"));
    }
    Ok(list)
}

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Scratch directory for one request's segment artifacts, removed on drop.
#[derive(Debug)]
pub struct SegmentScratch {
    dir: PathBuf,
}

impl SegmentScratch {
    /// Create `<cache_dir>/temp_segments/<unique>`. The shared parent is
    /// left in place when the guard drops.
    pub async fn create(cache_dir: &Path) -> std::io::Result<Self> {
        let n = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = cache_dir
            .join(SCRATCH_DIR)
            .join(format!("{}-{n}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Path for the `index`th segment.
    pub fn part_path(&self, index: usize, extension: &str) -> PathBuf {
        self.dir.join(format!("segment_{index:03}.{extension}"))
    }
}

impl Drop for SegmentScratch {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("stitch: failed to remove scratch {}: {e}", self.dir.display());
            }
        }
    }
}
