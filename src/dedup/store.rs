//! State-file persistence for the dedup cache.
//!
//! # File Format
//!
//! ```json
//! { "version": 1, "updated_at": "...", "seen": ["id", ...],
//!   "latest_by_source": { "channel:UC..": "2025-01-01T00:00:00Z" } }
//! ```
//!
//! Writes go to `<path>.tmp` first and are renamed into place, so a crash
//! mid-write leaves the previous state intact. Loading never fails: a missing
//! file is an empty cache, an unreadable one is logged and also treated as empty.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use super::DedupCache;

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Minimum spacing between unforced writes.
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedCache {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub seen: Vec<String>,
    pub latest_by_source: BTreeMap<String, DateTime<Utc>>,
}

impl PersistedCache {
    pub fn from_cache(cache: &DedupCache, now: DateTime<Utc>) -> Self {
        let mut seen: Vec<String> = cache.seen().iter().cloned().collect();
        seen.sort_unstable();
        Self {
            version: SCHEMA_VERSION,
            updated_at: now,
            seen,
            latest_by_source: cache.latest_by_source().clone(),
        }
    }

    pub fn into_cache(self) -> DedupCache {
        let seen: HashSet<String> = self.seen.into_iter().collect();
        DedupCache::from_parts(seen, self.latest_by_source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    /// Skipped because the last write was too recent.
    Throttled,
    /// No state file configured.
    MemoryOnly,
}

/// Owns the state file location and the write throttle.
#[derive(Debug)]
pub struct CacheStore {
    path: Option<PathBuf>,
    min_interval: Duration,
    last_write: Option<Instant>,
}

impl CacheStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            min_interval: DEFAULT_SAVE_INTERVAL,
            last_write: None,
        }
    }

    pub fn memory_only() -> Self {
        Self::new(None)
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the cache, falling back to empty on any problem.
    pub fn load(&self) -> DedupCache {
        let Some(path) = &self.path else {
            tracing::info!("no cache path configured, running memory-only");
            return DedupCache::new();
        };
        match read_state(path) {
            Ok(Some(state)) => {
                let cache = state.into_cache();
                tracing::info!(
                    path = %path.display(),
                    seen = cache.len(),
                    sources = cache.source_count(),
                    "dedup cache loaded"
                );
                cache
            }
            Ok(None) => {
                tracing::info!(path = %path.display(), "no cache file yet, starting empty");
                DedupCache::new()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cache file unreadable, starting empty");
                DedupCache::new()
            }
        }
    }

    /// Persist `cache` unless a write happened within the throttle interval.
    /// `force` bypasses the throttle.
    pub fn save(&mut self, cache: &DedupCache, force: bool) -> Result<SaveOutcome, CacheError> {
        let Some(path) = &self.path else {
            return Ok(SaveOutcome::MemoryOnly);
        };
        let now = Instant::now();
        if !force {
            if let Some(last) = self.last_write {
                if now.saturating_duration_since(last) < self.min_interval {
                    return Ok(SaveOutcome::Throttled);
                }
            }
        }
        write_state_atomic(path, &PersistedCache::from_cache(cache, Utc::now()))?;
        self.last_write = Some(now);
        tracing::debug!(path = %path.display(), seen = cache.len(), force, "dedup cache saved");
        Ok(SaveOutcome::Written)
    }
}

/// `Ok(None)` when the file does not exist.
pub fn read_state(path: &Path) -> Result<Option<PersistedCache>, CacheError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let state: PersistedCache = serde_json::from_slice(&bytes)?;
    if state.version != SCHEMA_VERSION {
        return Err(CacheError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            got: state.version,
        });
    }
    Ok(Some(state))
}

pub fn write_state_atomic(path: &Path, state: &PersistedCache) -> Result<(), CacheError> {
    use std::fs::OpenOptions;
    use std::io::Write;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);
    let bytes = serde_json::to_vec_pretty(state)?;
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
