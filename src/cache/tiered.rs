//! Two-tier cache orchestration.
//!
//! Reads check the fast in-process tier first, then the durable tier, and
//! promote durable hits back into the fast tier. Writes go to both tiers
//! independently; a failure on one side never rolls back the other. The
//! fast tier is a per-instance accelerator only - the durable tier is the
//! sole state visible across processes.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::entry::{CacheEntry, CacheHealth, CacheStats, StoreError, WriteOutcome};
use super::memory::{MemoryLookup, MemoryTier};
use super::store::{PersistentEntry, PersistentTier};

/// Tuning knobs for both tiers.
#[derive(Debug, Clone)]
pub struct CacheConfig {
  /// Default fast-tier TTL when `set` gets no override
  pub memory_ttl: StdDuration,
  /// Default durable-tier TTL when `set` gets no override
  pub persistent_ttl: StdDuration,
  pub max_items: usize,
  pub max_bytes: usize,
  pub sweep_interval: StdDuration,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      memory_ttl: StdDuration::from_secs(300),
      persistent_ttl: StdDuration::from_secs(3600),
      max_items: 500,
      max_bytes: 10 * 1024 * 1024,
      sweep_interval: StdDuration::from_secs(60),
    }
  }
}

/// Cache composed of a fast in-process tier and a durable backend.
pub struct TieredCache<S: PersistentTier> {
  memory: Mutex<MemoryTier>,
  store: S,
  stats: Mutex<CacheStats>,
  memory_ttl: Duration,
  persistent_ttl: Duration,
  max_items: usize,
  max_bytes: usize,
}

impl<S: PersistentTier> TieredCache<S> {
  pub fn new(config: CacheConfig, store: S) -> Self {
    Self {
      memory: Mutex::new(MemoryTier::new(config.max_items, config.max_bytes)),
      store,
      stats: Mutex::new(CacheStats::default()),
      memory_ttl: to_chrono(config.memory_ttl),
      persistent_ttl: to_chrono(config.persistent_ttl),
      max_items: config.max_items,
      max_bytes: config.max_bytes,
    }
  }

  /// Look up a key, fast tier first. A durable hit is promoted into the
  /// fast tier before returning. Never fails: tier errors and undecodable
  /// payloads degrade to a miss.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let now = Utc::now();

    if let Some(value) = self.memory_lookup(key, now) {
      self.bump(|s| {
        s.total_requests += 1;
        s.memory_hits += 1;
      });
      return Some(value);
    }

    match self.store_lookup(key, now) {
      Some(value) => {
        self.bump(|s| {
          s.total_requests += 1;
          s.persistent_hits += 1;
        });
        Some(value)
      }
      None => {
        self.bump(|s| {
          s.total_requests += 1;
          s.misses += 1;
        });
        None
      }
    }
  }

  fn memory_lookup<T: DeserializeOwned>(&self, key: &str, now: DateTime<Utc>) -> Option<T> {
    let mut tier = match self.memory.lock() {
      Ok(tier) => tier,
      Err(e) => {
        warn!(key, error = %e, "fast tier lock poisoned, treating as miss");
        return None;
      }
    };

    match tier.get(key, now) {
      MemoryLookup::Hit(data) => match serde_json::from_str(&data) {
        Ok(value) => Some(value),
        Err(e) => {
          warn!(key, error = %e, "cached payload undecodable, dropping entry");
          tier.remove(key);
          None
        }
      },
      MemoryLookup::Expired => {
        drop(tier);
        self.bump(|s| s.expired_removals += 1);
        None
      }
      MemoryLookup::Miss => None,
    }
  }

  fn store_lookup<T: DeserializeOwned>(&self, key: &str, now: DateTime<Utc>) -> Option<T> {
    let row = match self.store.fetch(key) {
      Ok(Some(row)) => row,
      Ok(None) => return None,
      Err(e) => {
        warn!(key, error = %e, "durable tier unreachable, treating as miss");
        return None;
      }
    };

    // Expired rows are deleted lazily on read
    if row.expires_at <= now {
      if let Err(e) = self.store.remove(key) {
        debug!(key, error = %e, "expired row not deleted");
      }
      return None;
    }

    let value: T = match serde_json::from_str(&row.data) {
      Ok(value) => value,
      Err(e) => {
        warn!(key, error = %e, "persisted payload undecodable, dropping row");
        let _ = self.store.remove(key);
        return None;
      }
    };

    if let Err(e) = self.store.record_hit(key) {
      debug!(key, error = %e, "hit counter not recorded");
    }
    self.promote(row, now);
    Some(value)
  }

  /// Re-insert a durable row into the fast tier, keeping its tags and hit
  /// count. The promoted entry lives for the shorter of the row's remaining
  /// lifetime and the fast-tier default.
  fn promote(&self, row: PersistentEntry, now: DateTime<Utc>) {
    let ttl = (row.expires_at - now).min(self.memory_ttl);
    let tags: Vec<&str> = row.tags.split(',').filter(|t| !t.is_empty()).collect();
    let mut entry = CacheEntry::new(&row.key, row.data.clone(), &tags, now, ttl);
    entry.hit_count = row.hit_count;

    if let Ok(mut tier) = self.memory.lock() {
      let evicted = tier.insert(entry);
      drop(tier);
      if evicted > 0 {
        self.bump(|s| s.evictions += evicted as u64);
      }
    }
  }

  /// Write a value to both tiers. The tiers are written independently:
  /// neither write prevents or rolls back the other. A value that fails to
  /// serialize is replaced by a `null` placeholder instead of propagating.
  pub fn set<T: Serialize>(
    &self,
    key: &str,
    value: &T,
    tags: &[&str],
    ttl: Option<StdDuration>,
  ) -> WriteOutcome {
    let data = match serde_json::to_string(value) {
      Ok(data) => data,
      Err(e) => {
        warn!(key, error = %e, "payload failed to serialize, caching placeholder");
        "null".to_string()
      }
    };

    let now = Utc::now();
    let override_ttl = ttl.map(to_chrono);
    let memory_ttl = override_ttl.unwrap_or(self.memory_ttl);
    let persistent_ttl = override_ttl.unwrap_or(self.persistent_ttl);

    let entry = CacheEntry::new(key, data, tags, now, memory_ttl);
    let row = PersistentEntry {
      key: entry.key.clone(),
      data: entry.data.clone(),
      tags: tags.join(","),
      expires_at: now + persistent_ttl,
      hit_count: 0,
      created_at: entry.created_at,
      last_accessed_at: entry.last_accessed_at,
    };

    let memory = match self.memory.lock() {
      Ok(mut tier) => {
        let evicted = tier.insert(entry);
        drop(tier);
        if evicted > 0 {
          self.bump(|s| s.evictions += evicted as u64);
        }
        Ok(())
      }
      Err(e) => Err(StoreError::Unavailable(format!(
        "fast tier lock poisoned: {}",
        e
      ))),
    };

    let persistent = self.store.upsert(&row);
    if let Err(e) = &persistent {
      warn!(key, error = %e, "durable tier write failed, fast tier unaffected");
    }

    WriteOutcome { memory, persistent }
  }

  /// Remove a key from both tiers immediately.
  pub fn invalidate(&self, key: &str) -> WriteOutcome {
    let memory = match self.memory.lock() {
      Ok(mut tier) => {
        tier.remove(key);
        Ok(())
      }
      Err(e) => Err(StoreError::Unavailable(format!(
        "fast tier lock poisoned: {}",
        e
      ))),
    };

    let persistent = self.store.remove(key);
    if let Err(e) = &persistent {
      warn!(key, error = %e, "durable tier invalidation failed");
    }
    WriteOutcome { memory, persistent }
  }

  /// Remove every entry whose tag set intersects `tags`, in both tiers.
  pub fn invalidate_by_tags(&self, tags: &[&str]) -> WriteOutcome {
    let memory = match self.memory.lock() {
      Ok(mut tier) => {
        let removed = tier.remove_by_tags(tags);
        debug!(?tags, removed, "tag invalidation in fast tier");
        Ok(())
      }
      Err(e) => Err(StoreError::Unavailable(format!(
        "fast tier lock poisoned: {}",
        e
      ))),
    };

    let mut persistent = Ok(());
    for tag in tags {
      if let Err(e) = self.store.remove_by_tag(tag) {
        warn!(tag, error = %e, "durable tier tag invalidation failed");
        persistent = Err(e);
      }
    }
    WriteOutcome { memory, persistent }
  }

  /// Snapshot of the counters, with the current fast-tier byte estimate.
  pub fn stats(&self) -> CacheStats {
    let mut stats = self
      .stats
      .lock()
      .map(|s| s.clone())
      .unwrap_or_default();
    if let Ok(tier) = self.memory.lock() {
      stats.memory_bytes = tier.estimated_bytes();
    }
    stats
  }

  pub fn health(&self) -> CacheHealth {
    let (memory_items, estimated_bytes) = self
      .memory
      .lock()
      .map(|tier| (tier.len(), tier.estimated_bytes()))
      .unwrap_or((0, 0));

    let persistent_items = match self.store.count() {
      Ok(count) => Some(count),
      Err(e) => {
        warn!(error = %e, "durable tier count unavailable");
        None
      }
    };

    CacheHealth {
      memory_items,
      max_items: self.max_items,
      max_bytes: self.max_bytes,
      estimated_bytes,
      persistent_items,
    }
  }

  /// Keys currently held in the fast tier. Diagnostic only.
  pub fn memory_keys(&self) -> Vec<String> {
    self.memory.lock().map(|tier| tier.keys()).unwrap_or_default()
  }

  /// Drop both tiers and reset all counters.
  pub fn clear_all(&self) {
    if let Ok(mut tier) = self.memory.lock() {
      tier.clear();
    }
    if let Err(e) = self.store.clear() {
      warn!(error = %e, "durable tier clear failed");
    }
    if let Ok(mut stats) = self.stats.lock() {
      *stats = CacheStats::default();
    }
  }

  /// Remove expired fast-tier entries now. Returns the number removed.
  pub fn sweep_expired(&self) -> usize {
    let now = Utc::now();
    let removed = self
      .memory
      .lock()
      .map(|mut tier| tier.sweep_expired(now))
      .unwrap_or(0);
    if removed > 0 {
      self.bump(|s| s.expired_removals += removed as u64);
    }
    removed
  }

  fn bump(&self, update: impl FnOnce(&mut CacheStats)) {
    if let Ok(mut stats) = self.stats.lock() {
      update(&mut stats);
    }
  }
}

impl<S: PersistentTier + 'static> TieredCache<S> {
  /// Start the periodic expiry sweep as an owned background task. The
  /// returned handle aborts the task when dropped, so the sweep lives
  /// exactly as long as its owner. The task holds only a weak reference
  /// and exits once the cache itself is gone.
  pub fn spawn_sweeper(cache: &Arc<Self>, interval: StdDuration) -> SweeperHandle {
    let cache = Arc::downgrade(cache);
    let handle = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        let Some(cache) = cache.upgrade() else { break };
        let removed = cache.sweep_expired();
        if removed > 0 {
          debug!(removed, "expiry sweep");
        }
      }
    });
    SweeperHandle { handle }
  }
}

/// Blanket impl so a tier can be shared between cache instances (and with
/// tests observing the durable side directly).
impl<T: PersistentTier> PersistentTier for Arc<T> {
  fn upsert(&self, entry: &PersistentEntry) -> Result<(), StoreError> {
    (**self).upsert(entry)
  }

  fn fetch(&self, key: &str) -> Result<Option<PersistentEntry>, StoreError> {
    (**self).fetch(key)
  }

  fn record_hit(&self, key: &str) -> Result<(), StoreError> {
    (**self).record_hit(key)
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    (**self).remove(key)
  }

  fn remove_by_tag(&self, tag: &str) -> Result<usize, StoreError> {
    (**self).remove_by_tag(tag)
  }

  fn count(&self) -> Result<u64, StoreError> {
    (**self).count()
  }

  fn clear(&self) -> Result<(), StoreError> {
    (**self).clear()
  }
}

/// Owner of the background expiry sweep.
pub struct SweeperHandle {
  handle: JoinHandle<()>,
}

impl SweeperHandle {
  pub fn shutdown(self) {
    self.handle.abort();
  }
}

impl Drop for SweeperHandle {
  fn drop(&mut self) {
    self.handle.abort();
  }
}

fn to_chrono(duration: StdDuration) -> Duration {
  Duration::from_std(duration).unwrap_or_else(|_| Duration::days(3650))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::store::{NoopTier, SqliteTier};
  use serde::Deserialize;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Payload {
    name: String,
    value: f64,
  }

  fn payload(name: &str) -> Payload {
    Payload {
      name: name.to_string(),
      value: 1.5,
    }
  }

  fn sqlite_cache() -> TieredCache<SqliteTier> {
    TieredCache::new(CacheConfig::default(), SqliteTier::in_memory().unwrap())
  }

  #[test]
  fn set_then_get_returns_equal_value() {
    let cache = sqlite_cache();
    let value = payload("round-trip");
    cache.set("k", &value, &[], None);
    assert_eq!(cache.get::<Payload>("k"), Some(value));
  }

  #[test]
  fn miss_and_hit_counters_are_exclusive() {
    let cache = sqlite_cache();
    assert_eq!(cache.get::<Payload>("absent"), None);
    cache.set("k", &payload("x"), &[], None);
    let _ = cache.get::<Payload>("k");
    let _ = cache.get::<Payload>("k");

    let stats = cache.stats();
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.memory_hits, 2);
    assert_eq!(stats.persistent_hits, 0);
    assert_eq!(stats.hit_ratio(), 0.67);
  }

  #[test]
  fn expired_entry_is_a_miss_and_counted_once() {
    let cache = sqlite_cache();
    cache.set("k", &payload("x"), &[], Some(StdDuration::from_millis(50)));
    std::thread::sleep(StdDuration::from_millis(100));

    assert_eq!(cache.get::<Payload>("k"), None);
    let stats = cache.stats();
    assert_eq!(stats.expired_removals, 1);
    assert_eq!(stats.misses, 1);
  }

  #[test]
  fn durable_hit_is_promoted_into_fast_tier() {
    let tier = Arc::new(SqliteTier::in_memory().unwrap());
    let writer = TieredCache::new(CacheConfig::default(), Arc::clone(&tier));
    let reader = TieredCache::new(CacheConfig::default(), tier);

    // Written through one instance, visible to the other only durably
    writer.set("k", &payload("shared"), &["odds"], None);
    assert_eq!(reader.get::<Payload>("k"), Some(payload("shared")));
    assert_eq!(reader.stats().persistent_hits, 1);

    // Second read comes from the promoted fast-tier entry, tags intact
    assert_eq!(reader.get::<Payload>("k"), Some(payload("shared")));
    assert_eq!(reader.stats().memory_hits, 1);

    reader.invalidate_by_tags(&["odds"]);
    assert_eq!(reader.get::<Payload>("k"), None);
  }

  #[test]
  fn tag_invalidation_spans_both_tiers() {
    let cache = sqlite_cache();
    cache.set("a1", &payload("1"), &["A"], None);
    cache.set("a2", &payload("2"), &["A"], None);
    cache.set("b1", &payload("3"), &["B"], None);

    cache.invalidate_by_tags(&["A"]);

    assert_eq!(cache.get::<Payload>("a1"), None);
    assert_eq!(cache.get::<Payload>("a2"), None);
    assert_eq!(cache.get::<Payload>("b1"), Some(payload("3")));
    assert_eq!(cache.health().persistent_items, Some(1));
  }

  #[test]
  fn invalidate_removes_from_both_tiers() {
    let cache = sqlite_cache();
    cache.set("k", &payload("x"), &[], None);
    let outcome = cache.invalidate("k");
    assert!(outcome.fully_written());
    assert_eq!(cache.get::<Payload>("k"), None);
    assert_eq!(cache.health().persistent_items, Some(0));
  }

  #[test]
  fn clear_all_resets_counters_and_tiers() {
    let cache = sqlite_cache();
    cache.set("k", &payload("x"), &[], None);
    let _ = cache.get::<Payload>("k");
    cache.clear_all();

    let stats = cache.stats();
    assert_eq!(stats.total_requests, 0);
    assert_eq!(cache.health().memory_items, 0);
    assert_eq!(cache.health().persistent_items, Some(0));
  }

  #[test]
  fn lru_eviction_bumps_counter() {
    let config = CacheConfig {
      max_items: 2,
      ..CacheConfig::default()
    };
    let cache = TieredCache::new(config, NoopTier);
    cache.set("a", &payload("a"), &[], None);
    cache.set("b", &payload("b"), &[], None);
    cache.set("c", &payload("c"), &[], None);

    assert_eq!(cache.stats().evictions, 1);
    assert_eq!(cache.health().memory_items, 2);
  }

  struct FailingTier;

  impl PersistentTier for FailingTier {
    fn upsert(&self, _entry: &PersistentEntry) -> Result<(), StoreError> {
      Err(StoreError::Unavailable("down".into()))
    }

    fn fetch(&self, _key: &str) -> Result<Option<PersistentEntry>, StoreError> {
      Err(StoreError::Unavailable("down".into()))
    }

    fn record_hit(&self, _key: &str) -> Result<(), StoreError> {
      Err(StoreError::Unavailable("down".into()))
    }

    fn remove(&self, _key: &str) -> Result<(), StoreError> {
      Err(StoreError::Unavailable("down".into()))
    }

    fn remove_by_tag(&self, _tag: &str) -> Result<usize, StoreError> {
      Err(StoreError::Unavailable("down".into()))
    }

    fn count(&self) -> Result<u64, StoreError> {
      Err(StoreError::Unavailable("down".into()))
    }

    fn clear(&self) -> Result<(), StoreError> {
      Err(StoreError::Unavailable("down".into()))
    }
  }

  #[test]
  fn durable_failure_degrades_to_fast_tier_only() {
    let cache = TieredCache::new(CacheConfig::default(), FailingTier);

    let outcome = cache.set("k", &payload("x"), &[], None);
    assert!(outcome.memory.is_ok());
    assert!(outcome.persistent.is_err());

    // The value is still served from the surviving tier
    assert_eq!(cache.get::<Payload>("k"), Some(payload("x")));
    assert_eq!(cache.health().persistent_items, None);
  }

  #[tokio::test]
  async fn sweeper_removes_expired_entries_in_background() {
    let cache = Arc::new(TieredCache::new(CacheConfig::default(), NoopTier));
    cache.set("k", &payload("x"), &[], Some(StdDuration::from_millis(20)));

    let handle = TieredCache::spawn_sweeper(&cache, StdDuration::from_millis(10));
    tokio::time::sleep(StdDuration::from_millis(80)).await;

    assert!(cache.memory_keys().is_empty());
    assert!(cache.stats().expired_removals >= 1);
    handle.shutdown();
  }
}
