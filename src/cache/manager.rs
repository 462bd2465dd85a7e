//! TTL-qualified response cache on top of the `apiCache` partition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::error::Result;
use crate::store::{Partition, Record, SqliteStore, Store};

/// A cached response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  /// Cache key (see [`cache_key`](super::cache_key))
  pub id: String,
  pub data: Value,
  /// Write time in epoch milliseconds
  pub timestamp: i64,
  /// Always true; cache entries are never pending
  pub synced: bool,
  /// Retention window in milliseconds, used by pruning
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ttl: Option<i64>,
}

impl CacheEntry {
  pub fn age(&self, now: i64) -> i64 {
    now - self.timestamp
  }

  /// Whether the entry may be served for a read that tolerates `max_age`.
  /// A zero `max_age` never accepts anything.
  pub fn is_fresh(&self, now: i64, max_age: Duration) -> bool {
    !max_age.is_zero() && self.age(now) <= max_age.as_millis() as i64
  }

  /// Whether the entry has outlived its own ttl.
  pub fn is_expired(&self, now: i64) -> bool {
    self.ttl.is_some_and(|ttl| self.age(now) > ttl)
  }

  pub fn cached_at(&self) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(self.timestamp)
  }
}

impl Record for CacheEntry {
  fn key(&self) -> String {
    self.id.clone()
  }

  fn timestamp(&self) -> Option<i64> {
    Some(self.timestamp)
  }

  fn partition() -> Partition {
    Partition::ApiCache
  }
}

/// Cache manager that owns freshness and pruning rules.
///
/// Writes are unconditional overwrites (last writer wins) and expiry is lazy:
/// an entry older than the caller's `max_age` is deleted when read through
/// [`get`](Self::get).
pub struct CacheManager<S: Store = SqliteStore> {
  store: Arc<S>,
  clock: SharedClock,
}

impl<S: Store> CacheManager<S> {
  pub fn new(store: Arc<S>, clock: SharedClock) -> Self {
    Self { store, clock }
  }

  /// Return the payload for `key` if it is at most `max_age` old.
  ///
  /// An entry that is too old is deleted and reported as a miss.
  pub fn get(&self, key: &str, max_age: Duration) -> Result<Option<Value>> {
    let Some(entry) = self.store.get::<CacheEntry>(key)? else {
      debug!(key, "cache miss");
      return Ok(None);
    };

    let now = self.clock.now_millis();
    if entry.is_fresh(now, max_age) {
      debug!(key, age_ms = entry.age(now), "cache hit");
      return Ok(Some(entry.data));
    }

    if !max_age.is_zero() {
      debug!(key, age_ms = entry.age(now), "cache entry expired");
      self.store.delete::<CacheEntry>(key)?;
    }
    Ok(None)
  }

  /// Return the entry for `key` regardless of its age.
  pub fn get_stale(&self, key: &str) -> Result<Option<CacheEntry>> {
    self.store.get::<CacheEntry>(key)
  }

  /// Store `payload` under `key`, replacing any previous entry.
  ///
  /// Afterwards, entries older than their own ttl are pruned. Pruning is
  /// best-effort and never fails the write.
  pub fn set(&self, key: &str, payload: Value, ttl: Duration) -> Result<()> {
    let entry = CacheEntry {
      id: key.to_string(),
      data: payload,
      timestamp: self.clock.now_millis(),
      synced: true,
      ttl: Some(ttl.as_millis() as i64),
    };
    self.store.put(&entry)?;

    if let Err(e) = self.prune() {
      warn!(error = %e, "cache pruning failed");
    }
    Ok(())
  }

  /// Delete every entry that has outlived its own ttl.
  pub fn prune(&self) -> Result<usize> {
    let now = self.clock.now_millis();
    let mut removed = 0;
    for entry in self.store.get_all::<CacheEntry>()? {
      if entry.is_expired(now) && self.store.delete::<CacheEntry>(&entry.id)? {
        removed += 1;
      }
    }
    if removed > 0 {
      debug!(removed, "pruned expired cache entries");
    }
    Ok(removed)
  }

  /// Drop the whole cache.
  pub fn clear(&self) -> Result<usize> {
    self.store.clear(Partition::ApiCache)
  }

  pub fn len(&self) -> Result<usize> {
    self.store.count(Partition::ApiCache)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }
}

impl<S: Store> Clone for CacheManager<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      clock: Arc::clone(&self.clock),
    }
  }
}
