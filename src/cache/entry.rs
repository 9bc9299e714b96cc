//! Core types for the tiered cache.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;

/// Fixed per-entry overhead added to the size estimate, covering struct
/// fields that don't scale with the payload.
const ENTRY_OVERHEAD_BYTES: usize = 96;

/// A single cached value with its bookkeeping.
///
/// The payload is kept serialized so the same representation feeds both
/// tiers and the size estimate.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: String,
  /// Serialized JSON payload
  pub data: String,
  pub expires_at: DateTime<Utc>,
  /// Reserved for optimistic concurrency checks
  #[allow(dead_code)]
  pub version: u32,
  pub tags: BTreeSet<String>,
  pub hit_count: u64,
  pub created_at: DateTime<Utc>,
  pub last_accessed_at: DateTime<Utc>,
}

impl CacheEntry {
  /// Create an entry expiring `ttl` after `now`. A zero or negative TTL is
  /// clamped to one millisecond so `expires_at > created_at` always holds.
  pub fn new(key: &str, data: String, tags: &[&str], now: DateTime<Utc>, ttl: Duration) -> Self {
    let ttl = ttl.max(Duration::milliseconds(1));
    Self {
      key: key.to_string(),
      data,
      expires_at: now + ttl,
      version: 0,
      tags: tags.iter().map(|t| t.to_string()).collect(),
      hit_count: 0,
      created_at: now,
      last_accessed_at: now,
    }
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    now >= self.expires_at
  }

  /// Approximate memory footprint. This overestimates proportionally to
  /// character count; it only has to be monotonic and bounded, not exact.
  pub fn estimated_bytes(&self) -> usize {
    let tag_bytes: usize = self.tags.iter().map(|t| t.len() + 2).sum();
    self.key.len() + self.data.len() + tag_bytes + ENTRY_OVERHEAD_BYTES
  }

  pub fn matches_any_tag(&self, tags: &[&str]) -> bool {
    tags.iter().any(|t| self.tags.contains(*t))
  }
}

/// Counters reported by [`TieredCache::stats`](super::TieredCache::stats).
///
/// Every `get` increments `total_requests` and exactly one of
/// `memory_hits`, `persistent_hits`, or `misses`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
  pub memory_hits: u64,
  pub persistent_hits: u64,
  pub misses: u64,
  pub total_requests: u64,
  pub evictions: u64,
  pub expired_removals: u64,
  /// Estimated fast-tier footprint at the time of the snapshot
  pub memory_bytes: usize,
}

impl CacheStats {
  /// Hit ratio across both tiers, rounded to two decimals.
  pub fn hit_ratio(&self) -> f64 {
    if self.total_requests == 0 {
      return 0.0;
    }
    let hits = (self.memory_hits + self.persistent_hits) as f64;
    (hits / self.total_requests as f64 * 100.0).round() / 100.0
  }
}

/// Read-only health snapshot of both tiers.
#[derive(Debug, Clone)]
pub struct CacheHealth {
  pub memory_items: usize,
  pub max_items: usize,
  pub max_bytes: usize,
  pub estimated_bytes: usize,
  /// `None` when the persistent tier could not be reached
  pub persistent_items: Option<u64>,
}

/// Failure from a cache tier.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("cache tier unavailable: {0}")]
  Unavailable(String),
  #[error("cache store query failed: {0}")]
  Query(String),
  #[error("timestamp column unreadable: {0}")]
  Timestamp(String),
}

/// Per-tier result of a write. The tiers are written independently, so one
/// side failing says nothing about the other; callers decide whether a
/// partially-applied write needs a retry or an alert.
#[derive(Debug)]
pub struct WriteOutcome {
  pub memory: Result<(), StoreError>,
  pub persistent: Result<(), StoreError>,
}

impl WriteOutcome {
  pub fn fully_written(&self) -> bool {
    self.memory.is_ok() && self.persistent.is_ok()
  }

  pub fn any_written(&self) -> bool {
    self.memory.is_ok() || self.persistent.is_ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn entry_expiry_is_after_creation_even_for_zero_ttl() {
    let now = Utc::now();
    let entry = CacheEntry::new("k", "{}".to_string(), &[], now, Duration::zero());
    assert!(entry.expires_at > entry.created_at);
  }

  #[test]
  fn size_estimate_grows_with_payload() {
    let now = Utc::now();
    let small = CacheEntry::new("k", "x".repeat(10), &["a"], now, Duration::seconds(60));
    let large = CacheEntry::new("k", "x".repeat(1000), &["a"], now, Duration::seconds(60));
    assert!(large.estimated_bytes() > small.estimated_bytes());
    assert!(small.estimated_bytes() >= 10);
  }

  #[test]
  fn hit_ratio_rounds_to_two_decimals() {
    let stats = CacheStats {
      memory_hits: 1,
      persistent_hits: 1,
      misses: 1,
      total_requests: 3,
      ..Default::default()
    };
    assert_eq!(stats.hit_ratio(), 0.67);

    let empty = CacheStats::default();
    assert_eq!(empty.hit_ratio(), 0.0);
  }

  #[test]
  fn tag_matching_intersects() {
    let now = Utc::now();
    let entry = CacheEntry::new("k", "{}".into(), &["odds", "game:1"], now, Duration::seconds(5));
    assert!(entry.matches_any_tag(&["game:1", "other"]));
    assert!(!entry.matches_any_tag(&["game:2"]));
  }
}
