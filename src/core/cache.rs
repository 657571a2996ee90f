use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{CACHE_KEY_PREFIX, CACHE_MAX_ENTRIES};
use crate::core::db::Db;
use crate::core::errors::Result;
use crate::core::helpers::Clock;

/// A byte cache with per-entry time-to-live.
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;
    fn clear(&self) -> Result<()>;

    /// Return the live entry under `key`, or compute, store and return a new one.
    /// `compute` may decline to cache its result by returning `cacheable = false`.
    fn get_or_compute(
        &self,
        key: &str,
        ttl: Duration,
        compute: &mut dyn FnMut() -> Result<(Vec<u8>, bool)>,
    ) -> Result<Vec<u8>> {
        if let Some(hit) = self.get(key)? {
            tracing::debug!(key, "cache hit");
            return Ok(hit);
        }
        let (value, cacheable) = compute()?;
        if cacheable {
            self.set(key, &value, ttl)?;
        }
        Ok(value)
    }
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    expires_at: DateTime<Utc>,
    body: Vec<u8>,
}

/// Cache entries kept in the app's own key-value store under `cache:`.
///
/// Every write first drops expired entries, then the ones closest to expiry
/// while the cache holds `max_entries` or more.
pub struct KvCache {
    db: Db,
    clock: Arc<dyn Clock>,
    max_entries: usize,
}

impl KvCache {
    pub fn new(db: Db, clock: Arc<dyn Clock>) -> Self {
        Self::with_max_entries(db, clock, CACHE_MAX_ENTRIES)
    }

    pub fn with_max_entries(db: Db, clock: Arc<dyn Clock>, max_entries: usize) -> Self {
        Self {
            db,
            clock,
            max_entries: max_entries.max(1),
        }
    }

    fn key(key: &str) -> String {
        format!("{}{}", CACHE_KEY_PREFIX, key)
    }

    fn cull(&self, keep: &str) -> Result<()> {
        let now = self.clock.now();
        let mut live = Vec::new();
        for key in self.db.keys_with_prefix(CACHE_KEY_PREFIX)? {
            if key == keep {
                continue;
            }
            match self.db.get_json::<CacheEntry>(&key)? {
                Some(entry) if entry.expires_at > now => live.push((entry.expires_at, key)),
                Some(_) => self.db.delete(&key)?,
                None => {}
            }
        }

        if live.len() >= self.max_entries {
            live.sort();
            let excess = live.len() + 1 - self.max_entries;
            for (_, key) in live.drain(..excess) {
                self.db.delete(&key)?;
            }
            tracing::debug!(evicted = excess, "cache culled");
        }
        Ok(())
    }
}

impl ResponseCache for KvCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let full_key = Self::key(key);
        match self.db.get_json::<CacheEntry>(&full_key)? {
            Some(entry) if entry.expires_at > self.clock.now() => Ok(Some(entry.body)),
            Some(_) => {
                self.db.delete(&full_key)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let full_key = Self::key(key);
        self.cull(&full_key)?;
        let entry = CacheEntry {
            expires_at: self.clock.now() + ttl,
            body: value.to_vec(),
        };
        self.db.set_json(&full_key, &entry)
    }

    fn clear(&self) -> Result<()> {
        for key in self.db.keys_with_prefix(CACHE_KEY_PREFIX)? {
            self.db.delete(&key)?;
        }
        Ok(())
    }
}
