//! Response cache consulted by the forecast client before each request.
//!
//! Caching is best effort: every failure here reads as a miss.

use chrono::Utc;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::PathBuf, time::Duration};
use tracing::debug;

pub trait ResponseCache: Send + Sync + fmt::Debug {
    /// Cached body for `key`, if one exists and is younger than the TTL.
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, body: &str);
}

/// Disk cache, one JSON file per request URL.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
    ttl: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    stored_at: i64,
    key: String,
    body: String,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self { dir: dir.into(), ttl }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = blake3::hash(key.as_bytes());
        self.dir.join(format!("{}.json", digest.to_hex()))
    }

    fn read_entry(&self, key: &str) -> Option<CacheEntry> {
        let path = self.entry_path(key);
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) if entry.key == key => Some(entry),
            Ok(_) => None,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "Ignoring unreadable cache entry");
                None
            }
        }
    }
}

impl ResponseCache for FileCache {
    fn get(&self, key: &str) -> Option<String> {
        let entry = self.read_entry(key)?;
        let age = Utc::now().timestamp().saturating_sub(entry.stored_at);
        if age < 0 || (age as u64) >= self.ttl.as_secs() {
            return None;
        }
        Some(entry.body)
    }

    fn set(&self, key: &str, body: &str) {
        if let Err(err) = fs::create_dir_all(&self.dir) {
            debug!(dir = %self.dir.display(), error = %err, "Cannot create cache directory");
            return;
        }

        let entry = CacheEntry {
            stored_at: Utc::now().timestamp(),
            key: key.to_string(),
            body: body.to_string(),
        };
        let path = self.entry_path(key);
        let written = serde_json::to_string(&entry)
            .map_err(|e| e.to_string())
            .and_then(|json| fs::write(&path, json).map_err(|e| e.to_string()));

        if let Err(err) = written {
            debug!(path = %path.display(), error = %err, "Cannot write cache entry");
        }
    }
}

/// In-process cache, mostly for tests and one-shot runs. Expired entries are
/// evicted by moka, not just skipped.
pub struct MemoryCache {
    entries: Cache<String, String>,
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

impl MemoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder().time_to_live(ttl).build(),
        }
    }

    /// Live entries, after pending evictions are applied.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key)
    }

    fn set(&self, key: &str, body: &str) {
        self.entries.insert(key.to_string(), body.to_string());
    }
}

/// Cache that never hits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl ResponseCache for NoCache {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _body: &str) {}
}
