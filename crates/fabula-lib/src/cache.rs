//! Content-addressed artifact cache on the local filesystem.
//!
//! Flat directory of `voice_<scope>_<lang>_<digest>.<ext>` files. A file's
//! existence is its validity, so every write is staged under a hidden name
//! and renamed into place.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use tracing::{debug, warn};

use fabula_core::cache_key::CacheKey;
use fabula_core::types::AudioFormat;

use crate::error::CacheError;

/// Subdirectory for per-request segment scratch space.
pub const SCRATCH_DIR: &str = "temp_segments";

static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    format: AudioFormat,
}

impl CacheStore {
    /// Open (creating if needed) the cache at `dir`.
    pub async fn open(dir: impl Into<PathBuf>, format: AudioFormat) -> Result<Self, CacheError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(CacheError::io(&dir))?;
        Ok(Self { dir, format })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.file_name(self.format.extension()))
    }

    /// Path of the entry for `key`, if it exists.
    pub async fn lookup(&self, key: &CacheKey) -> Option<PathBuf> {
        let path = self.path_for(key);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Some(path),
            _ => None,
        }
    }

    /// A fresh hidden staging path next to the entry for `key`.
    pub fn staging_path(&self, key: &CacheKey) -> PathBuf {
        let n = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = key.file_name(self.format.extension());
        self.dir.join(format!(
            ".{name}.{}-{n}.tmp.{}",
            std::process::id(),
            self.format.extension()
        ))
    }

    /// Atomically move a fully written staging file into place as `key`.
    pub async fn commit(&self, staging: &Path, key: &CacheKey) -> Result<PathBuf, CacheError> {
        let dest = self.path_for(key);
        if let Err(e) = tokio::fs::rename(staging, &dest).await {
            let _ = tokio::fs::remove_file(staging).await;
            return Err(CacheError::io(&dest)(e));
        }
        debug!("cache: stored {}", dest.display());
        Ok(dest)
    }

    /// Write `bytes` as the entry for `key`.
    pub async fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<PathBuf, CacheError> {
        let staging = self.staging_path(key);
        if let Err(e) = tokio::fs::write(&staging, bytes).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(CacheError::io(&staging)(e));
        }
        self.commit(&staging, key).await
    }

    /// Keep the `max_entries` most recently modified artifacts and delete
    /// the rest. Returns how many were removed.
    pub async fn evict(&self, max_entries: usize) -> Result<usize, CacheError> {
        let mut entries: Vec<(SystemTime, PathBuf)> = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(CacheError::io(&self.dir))?;

        while let Some(entry) = dir.next_entry().await.map_err(CacheError::io(&self.dir))? {
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push((modified, entry.path()));
        }

        if entries.len() <= max_entries {
            return Ok(0);
        }

        entries.sort_by(|a, b| b.0.cmp(&a.0));
        let mut removed = 0;
        for (_, path) in entries.into_iter().skip(max_entries) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("cache: failed to evict {}: {e}", path.display()),
            }
        }
        debug!("cache: evicted {removed} file(s), cap {max_entries}");
        Ok(removed)
    }
}
