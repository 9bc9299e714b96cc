//! Fast in-process cache tier.
//!
//! Plain `HashMap` guarded by the caller's mutex; at family-league scale a
//! linear scan for the LRU victim beats maintaining an ordering structure.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::entry::CacheEntry;

/// Result of a fast-tier lookup.
#[derive(Debug)]
pub enum MemoryLookup {
  /// Unexpired entry; carries the serialized payload
  Hit(String),
  /// Entry was present but past `expires_at`; it has been purged
  Expired,
  Miss,
}

pub struct MemoryTier {
  entries: HashMap<String, CacheEntry>,
  max_items: usize,
  max_bytes: usize,
  current_bytes: usize,
}

impl MemoryTier {
  pub fn new(max_items: usize, max_bytes: usize) -> Self {
    Self {
      entries: HashMap::new(),
      max_items,
      max_bytes,
      current_bytes: 0,
    }
  }

  /// Look up a key, purging it lazily when expired. A hit bumps the entry's
  /// hit count and access time.
  pub fn get(&mut self, key: &str, now: DateTime<Utc>) -> MemoryLookup {
    let Some(entry) = self.entries.get_mut(key) else {
      return MemoryLookup::Miss;
    };

    if entry.is_expired(now) {
      self.remove(key);
      return MemoryLookup::Expired;
    }

    entry.hit_count += 1;
    entry.last_accessed_at = now;
    MemoryLookup::Hit(entry.data.clone())
  }

  /// Insert an entry, replacing any existing one under the same key, then
  /// evict least-recently-accessed entries until both the item and byte
  /// ceilings hold again. Returns how many entries were evicted.
  pub fn insert(&mut self, entry: CacheEntry) -> usize {
    let key = entry.key.clone();
    if let Some(old) = self.entries.remove(&key) {
      self.current_bytes = self.current_bytes.saturating_sub(old.estimated_bytes());
    }
    self.current_bytes += entry.estimated_bytes();
    self.entries.insert(key, entry);

    let mut evicted = 0;
    while self.entries.len() > self.max_items || self.current_bytes > self.max_bytes {
      let Some(victim) = self.lru_key() else { break };
      self.remove(&victim);
      evicted += 1;
    }
    evicted
  }

  /// Key of the least-recently-accessed entry.
  fn lru_key(&self) -> Option<String> {
    self
      .entries
      .values()
      .min_by_key(|e| e.last_accessed_at)
      .map(|e| e.key.clone())
  }

  pub fn remove(&mut self, key: &str) -> bool {
    match self.entries.remove(key) {
      Some(old) => {
        self.current_bytes = self.current_bytes.saturating_sub(old.estimated_bytes());
        true
      }
      None => false,
    }
  }

  /// Remove every entry whose tag set intersects `tags`. Returns the number
  /// removed.
  pub fn remove_by_tags(&mut self, tags: &[&str]) -> usize {
    let victims: Vec<String> = self
      .entries
      .values()
      .filter(|e| e.matches_any_tag(tags))
      .map(|e| e.key.clone())
      .collect();
    for key in &victims {
      self.remove(key);
    }
    victims.len()
  }

  /// Remove every entry past its expiry. Returns the number removed.
  pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
    let victims: Vec<String> = self
      .entries
      .values()
      .filter(|e| e.is_expired(now))
      .map(|e| e.key.clone())
      .collect();
    for key in &victims {
      self.remove(key);
    }
    victims.len()
  }

  pub fn clear(&mut self) {
    self.entries.clear();
    self.current_bytes = 0;
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn estimated_bytes(&self) -> usize {
    self.current_bytes
  }

  pub fn keys(&self) -> Vec<String> {
    self.entries.keys().cloned().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn entry(key: &str, now: DateTime<Utc>, ttl_secs: i64) -> CacheEntry {
    CacheEntry::new(key, format!("\"{}\"", key), &[], now, Duration::seconds(ttl_secs))
  }

  #[test]
  fn round_trip() {
    let now = Utc::now();
    let mut tier = MemoryTier::new(10, 1 << 20);
    tier.insert(entry("a", now, 60));

    match tier.get("a", now) {
      MemoryLookup::Hit(data) => assert_eq!(data, "\"a\""),
      other => panic!("expected hit, got {:?}", other),
    }
  }

  #[test]
  fn expired_entry_is_purged_on_get() {
    let now = Utc::now();
    let mut tier = MemoryTier::new(10, 1 << 20);
    tier.insert(entry("a", now, 1));

    let later = now + Duration::seconds(2);
    assert!(matches!(tier.get("a", later), MemoryLookup::Expired));
    // Purged: the second lookup is a plain miss
    assert!(matches!(tier.get("a", later), MemoryLookup::Miss));
    assert_eq!(tier.len(), 0);
  }

  #[test]
  fn lru_eviction_removes_oldest_access() {
    let now = Utc::now();
    let mut tier = MemoryTier::new(3, 1 << 20);
    tier.insert(entry("a", now, 60));
    tier.insert(entry("b", now + Duration::seconds(1), 60));
    tier.insert(entry("c", now + Duration::seconds(2), 60));

    // Touch "a" so "b" becomes the LRU victim
    let _ = tier.get("a", now + Duration::seconds(3));

    let evicted = tier.insert(entry("d", now + Duration::seconds(4), 60));
    assert_eq!(evicted, 1);
    assert!(matches!(tier.get("b", now + Duration::seconds(5)), MemoryLookup::Miss));
    for key in ["a", "c", "d"] {
      assert!(
        matches!(tier.get(key, now + Duration::seconds(5)), MemoryLookup::Hit(_)),
        "{} should have survived",
        key
      );
    }
  }

  #[test]
  fn byte_ceiling_triggers_eviction() {
    let now = Utc::now();
    // Generous item limit, byte limit that fits one entry but not two
    let mut tier = MemoryTier::new(100, 300);
    tier.insert(CacheEntry::new("a", "x".repeat(100), &[], now, Duration::seconds(60)));
    let evicted = tier.insert(CacheEntry::new(
      "b",
      "y".repeat(100),
      &[],
      now + Duration::seconds(1),
      Duration::seconds(60),
    ));
    assert_eq!(evicted, 1);
    assert_eq!(tier.len(), 1);
    assert!(tier.estimated_bytes() <= 300);
  }

  #[test]
  fn tag_removal_spares_other_tags() {
    let now = Utc::now();
    let mut tier = MemoryTier::new(10, 1 << 20);
    tier.insert(CacheEntry::new("a1", "1".into(), &["A"], now, Duration::seconds(60)));
    tier.insert(CacheEntry::new("a2", "2".into(), &["A", "x"], now, Duration::seconds(60)));
    tier.insert(CacheEntry::new("b1", "3".into(), &["B"], now, Duration::seconds(60)));

    assert_eq!(tier.remove_by_tags(&["A"]), 2);
    assert!(matches!(tier.get("a1", now), MemoryLookup::Miss));
    assert!(matches!(tier.get("a2", now), MemoryLookup::Miss));
    assert!(matches!(tier.get("b1", now), MemoryLookup::Hit(_)));
  }

  #[test]
  fn sweep_removes_only_expired() {
    let now = Utc::now();
    let mut tier = MemoryTier::new(10, 1 << 20);
    tier.insert(entry("short", now, 1));
    tier.insert(entry("long", now, 600));

    assert_eq!(tier.sweep_expired(now + Duration::seconds(2)), 1);
    assert_eq!(tier.len(), 1);
    assert!(matches!(tier.get("long", now + Duration::seconds(2)), MemoryLookup::Hit(_)));
  }

  #[test]
  fn replacing_a_key_updates_byte_accounting() {
    let now = Utc::now();
    let mut tier = MemoryTier::new(10, 1 << 20);
    tier.insert(CacheEntry::new("a", "x".repeat(500), &[], now, Duration::seconds(60)));
    let big = tier.estimated_bytes();
    tier.insert(CacheEntry::new("a", "x".repeat(5), &[], now, Duration::seconds(60)));
    assert!(tier.estimated_bytes() < big);
    assert_eq!(tier.len(), 1);
  }
}
