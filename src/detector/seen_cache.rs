use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::info;

use crate::store::snapshot::{read_json_or_default, write_json_atomic};
use crate::utils::time::now_ms;

pub fn buy_key(wallet: &str, mint: &str) -> String {
    format!("buy:{}:{}", wallet, mint)
}

/// Debounce cache: key -> stamp in epoch ms. Dedup is advisory, so the
/// get-then-set window between concurrent callers is acceptable; the entry
/// API still keeps single-key stamping atomic.
#[derive(Clone)]
pub struct SeenCache {
    cache: Arc<DashMap<String, u64>>,
    ttl_ms: u64,
    path: Option<PathBuf>,
}

impl SeenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(DashMap::new()),
            ttl_ms: ttl.as_millis() as u64,
            path: None,
        }
    }

    /// Loads the snapshot at `path`; missing or corrupt files start empty.
    pub fn load(path: PathBuf, ttl: Duration) -> Self {
        let entries: HashMap<String, u64> = read_json_or_default(&path);
        let cache = SeenCache {
            cache: Arc::new(entries.into_iter().collect()),
            ttl_ms: ttl.as_millis() as u64,
            path: Some(path),
        };
        if cache.len() > 0 {
            info!(entries = cache.len(), "restored dedup cache from snapshot");
        }
        cache
    }

    /// Returns true and stamps the key when it is new or expired; returns
    /// false when a live entry exists.
    pub fn check_and_stamp(&self, key: &str) -> bool {
        let now = now_ms();
        match self.cache.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if now.saturating_sub(*entry.get()) < self.ttl_ms {
                    return false;
                }
                entry.insert(now);
                true
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.cache
            .get(key)
            .map(|stamp| now_ms().saturating_sub(*stamp) < self.ttl_ms)
            .unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.cache.get(key).map(|stamp| *stamp)
    }

    pub fn set(&self, key: &str, stamp_ms: u64) {
        self.cache.insert(key.to_string(), stamp_ms);
    }

    pub fn delete(&self, key: &str) {
        self.cache.remove(key);
    }

    /// Drop expired entries. Called periodically, never on the hot path.
    pub fn prune(&self) {
        let now = now_ms();
        self.cache
            .retain(|_, stamp| now.saturating_sub(*stamp) < self.ttl_ms);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Best-effort snapshot; errors are the caller's to log.
    pub fn persist(&self) -> crate::error::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let entries: HashMap<String, u64> = self
            .cache
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        write_json_atomic(path, &entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamps_once_within_ttl() {
        let cache = SeenCache::new(Duration::from_secs(60));
        let key = buy_key("W", "M");

        assert!(cache.check_and_stamp(&key));
        assert!(!cache.check_and_stamp(&key));
        assert!(cache.has(&key));
    }

    #[test]
    fn expired_entries_are_reaccepted_and_pruned() {
        let cache = SeenCache::new(Duration::from_millis(50));
        let key = buy_key("W", "M");

        // Backdate the stamp past the TTL instead of sleeping.
        cache.set(&key, now_ms() - 100);
        assert!(!cache.has(&key));
        assert!(cache.check_and_stamp(&key));

        cache.set("stale", now_ms() - 100);
        cache.prune();
        assert_eq!(cache.get("stale"), None);
    }

    #[test]
    fn delete_forgets_key() {
        let cache = SeenCache::new(Duration::from_secs(60));
        cache.set("k", now_ms());
        cache.delete("k");
        assert!(!cache.has("k"));
    }

    #[test]
    fn persists_and_reloads() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("seen.json");

        let cache = SeenCache::load(path.clone(), Duration::from_secs(60));
        cache.check_and_stamp(&buy_key("W", "M"));
        cache.persist()?;

        let reloaded = SeenCache::load(path, Duration::from_secs(60));
        assert!(reloaded.has(&buy_key("W", "M")));
        Ok(())
    }
}
