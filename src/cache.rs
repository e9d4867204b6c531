// src/cache.rs
//
// Persistent per-repository analysis cache.
//
// One JSON file per (partition, repository, parent-pair key). Records are
// only ever extended: `merge_put` re-reads what is on disk and fills in the
// fields that are still missing there. Different processes writing the same
// key are not locked against each other; both compute the same values, so
// the last rename wins with identical content.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::CacheError;
use crate::state::AnalysisRecord;

pub trait CacheStore: Send + Sync {
    fn lookup(
        &self,
        key: &str,
        scope: &str,
        partition: &str,
    ) -> Result<Option<AnalysisRecord>, CacheError>;

    fn store(
        &self,
        key: &str,
        record: &AnalysisRecord,
        scope: &str,
        partition: &str,
    ) -> Result<(), CacheError>;

    /// Adds the fields of `record` that the stored entry lacks and returns the
    /// combined entry. Writes only when something was added.
    fn merge_put(
        &self,
        key: &str,
        record: &AnalysisRecord,
        scope: &str,
        partition: &str,
    ) -> Result<AnalysisRecord, CacheError> {
        let mut merged = self.lookup(key, scope, partition)?.unwrap_or_default();
        if merged.fill_missing(record) {
            self.store(key, &merged, scope, partition)?;
        }
        Ok(merged)
    }
}

/* ============================================================
   Filesystem store
   ============================================================ */

#[derive(Debug, Clone)]
pub struct FsCacheStore {
    root: PathBuf,
}

impl FsCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn entry_path(&self, key: &str, scope: &str, partition: &str) -> PathBuf {
        self.root
            .join(partition)
            .join(scope)
            .join(format!("{}.json", file_stem(key)))
    }
}

impl CacheStore for FsCacheStore {
    fn lookup(
        &self,
        key: &str,
        scope: &str,
        partition: &str,
    ) -> Result<Option<AnalysisRecord>, CacheError> {
        let path = self.entry_path(key, scope, partition);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| CacheError::Malformed { path, source })
    }

    fn store(
        &self,
        key: &str,
        record: &AnalysisRecord,
        scope: &str,
        partition: &str,
    ) -> Result<(), CacheError> {
        let path = self.entry_path(key, scope, partition);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let text = serde_json::to_string_pretty(record).map_err(|source| CacheError::Malformed {
            path: path.clone(),
            source,
        })?;

        write_atomic(&path, &text)?;
        debug!(key, scope, "cache entry written");
        Ok(())
    }
}

fn write_atomic(path: &Path, text: &str) -> Result<(), CacheError> {
    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
    fs::write(&tmp, text).map_err(|source| CacheError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Commit-id keys are used verbatim; anything else is hashed.
fn file_stem(key: &str) -> String {
    let safe = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if safe {
        return key.to_string();
    }

    let mut h = Sha256::new();
    h.update(key.as_bytes());
    hex::encode(h.finalize())
}

/* ============================================================
   In-process key locks
   ============================================================ */

/// One mutex per key, created on first use and dropped once nobody holds or
/// waits for it.
#[derive(Default)]
pub struct KeyLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    /// Runs `f` while holding the lock for `key`.
    pub fn with_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let slot = self.slot(key);
        let out = {
            let _guard = slot.lock().unwrap_or_else(|e| e.into_inner());
            f()
        };
        self.release(key, slot);
        out
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(key.to_string()).or_default().clone()
    }

    // Clones are only handed out under the map lock, so a count of one here
    // means no other caller holds or waits on the slot.
    fn release(&self, key: &str, slot: Arc<Mutex<()>>) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        drop(slot);
        if slots.get(key).is_some_and(|s| Arc::strong_count(s) == 1) {
            slots.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
