//! Persistent cache tier contract and its SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use super::entry::StoreError;

/// Row shape the persistent tier stores. Tags are joined into a single
/// string so tag invalidation can run as a substring delete.
#[derive(Debug, Clone)]
pub struct PersistentEntry {
  pub key: String,
  pub data: String,
  pub tags: String,
  pub expires_at: DateTime<Utc>,
  pub hit_count: u64,
  pub created_at: DateTime<Utc>,
  pub last_accessed_at: DateTime<Utc>,
}

/// Contract the tiered cache needs from a durable backend.
pub trait PersistentTier: Send + Sync {
  fn upsert(&self, entry: &PersistentEntry) -> Result<(), StoreError>;

  fn fetch(&self, key: &str) -> Result<Option<PersistentEntry>, StoreError>;

  /// Bump the hit counter and access time of an existing row.
  fn record_hit(&self, key: &str) -> Result<(), StoreError>;

  fn remove(&self, key: &str) -> Result<(), StoreError>;

  /// Delete every row whose joined tag string contains `tag`. Returns the
  /// number of rows deleted.
  fn remove_by_tag(&self, tag: &str) -> Result<usize, StoreError>;

  fn count(&self) -> Result<u64, StoreError>;

  fn clear(&self) -> Result<(), StoreError>;
}

/// Tier that persists nothing. Used when durable caching is disabled and
/// for test isolation - all operations are no-ops.
pub struct NoopTier;

impl PersistentTier for NoopTier {
  fn upsert(&self, _entry: &PersistentEntry) -> Result<(), StoreError> {
    Ok(()) // Discard
  }

  fn fetch(&self, _key: &str) -> Result<Option<PersistentEntry>, StoreError> {
    Ok(None) // Always miss
  }

  fn record_hit(&self, _key: &str) -> Result<(), StoreError> {
    Ok(())
  }

  fn remove(&self, _key: &str) -> Result<(), StoreError> {
    Ok(())
  }

  fn remove_by_tag(&self, _tag: &str) -> Result<usize, StoreError> {
    Ok(0)
  }

  fn count(&self) -> Result<u64, StoreError> {
    Ok(0)
  }

  fn clear(&self) -> Result<(), StoreError> {
    Ok(())
  }
}

/// Schema for the persistent tier's table.
const TIER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '',
    expires_at TEXT NOT NULL,
    hit_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    last_accessed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expires
    ON cache_entries(expires_at);
"#;

/// SQLite-backed persistent tier.
pub struct SqliteTier {
  conn: Mutex<Connection>,
}

impl SqliteTier {
  /// Open (or create) the tier at `path` and run migrations.
  pub fn open(path: &Path) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| StoreError::Unavailable(format!("cache directory: {}", e)))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;

    Self::with_connection(conn)
  }

  /// In-memory tier, used by tests.
  pub fn in_memory() -> Result<Self, StoreError> {
    let conn =
      Connection::open_in_memory().map_err(|e| StoreError::Unavailable(e.to_string()))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self, StoreError> {
    conn
      .execute_batch(TIER_SCHEMA)
      .map_err(|e| StoreError::Query(format!("migrations: {}", e)))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
    self
      .conn
      .lock()
      .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
  }
}

impl PersistentTier for SqliteTier {
  fn upsert(&self, entry: &PersistentEntry) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries
           (key, data, tags, expires_at, hit_count, created_at, last_accessed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          entry.key,
          entry.data,
          entry.tags,
          entry.expires_at.to_rfc3339(),
          entry.hit_count,
          entry.created_at.to_rfc3339(),
          entry.last_accessed_at.to_rfc3339(),
        ],
      )
      .map_err(|e| StoreError::Query(format!("upsert: {}", e)))?;
    Ok(())
  }

  fn fetch(&self, key: &str) -> Result<Option<PersistentEntry>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT data, tags, expires_at, hit_count, created_at, last_accessed_at
         FROM cache_entries WHERE key = ?",
      )
      .map_err(|e| StoreError::Query(format!("prepare fetch: {}", e)))?;

    let row: Option<(String, String, String, u64, String, String)> = stmt
      .query_row(params![key], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .ok();

    let Some((data, tags, expires_at, hit_count, created_at, last_accessed_at)) = row else {
      return Ok(None);
    };

    Ok(Some(PersistentEntry {
      key: key.to_string(),
      data,
      tags,
      expires_at: parse_ts(&expires_at)?,
      hit_count,
      created_at: parse_ts(&created_at)?,
      last_accessed_at: parse_ts(&last_accessed_at)?,
    }))
  }

  fn record_hit(&self, key: &str) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn
      .execute(
        "UPDATE cache_entries SET hit_count = hit_count + 1, last_accessed_at = ?
         WHERE key = ?",
        params![Utc::now().to_rfc3339(), key],
      )
      .map_err(|e| StoreError::Query(format!("record hit: {}", e)))?;
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM cache_entries WHERE key = ?", params![key])
      .map_err(|e| StoreError::Query(format!("remove: {}", e)))?;
    Ok(())
  }

  fn remove_by_tag(&self, tag: &str) -> Result<usize, StoreError> {
    let conn = self.lock()?;
    let removed = conn
      .execute(
        "DELETE FROM cache_entries WHERE tags LIKE ?",
        params![format!("%{}%", tag)],
      )
      .map_err(|e| StoreError::Query(format!("remove by tag: {}", e)))?;
    Ok(removed)
  }

  fn count(&self) -> Result<u64, StoreError> {
    let conn = self.lock()?;
    conn
      .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))
      .map_err(|e| StoreError::Query(format!("count: {}", e)))
  }

  fn clear(&self) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM cache_entries", [])
      .map_err(|e| StoreError::Query(format!("clear: {}", e)))?;
    Ok(())
  }
}

/// Parse an RFC 3339 timestamp column.
fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| StoreError::Timestamp(format!("'{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Duration;

  fn sample(key: &str, tags: &str) -> PersistentEntry {
    let now = Utc::now();
    PersistentEntry {
      key: key.to_string(),
      data: format!("\"{}\"", key),
      tags: tags.to_string(),
      expires_at: now + Duration::minutes(60),
      hit_count: 0,
      created_at: now,
      last_accessed_at: now,
    }
  }

  #[test]
  fn upsert_then_fetch_round_trips() {
    let tier = SqliteTier::in_memory().unwrap();
    tier.upsert(&sample("a", "odds,game:1")).unwrap();

    let row = tier.fetch("a").unwrap().expect("row should exist");
    assert_eq!(row.data, "\"a\"");
    assert_eq!(row.tags, "odds,game:1");
    assert_eq!(row.hit_count, 0);
  }

  #[test]
  fn fetch_missing_is_none() {
    let tier = SqliteTier::in_memory().unwrap();
    assert!(tier.fetch("nope").unwrap().is_none());
  }

  #[test]
  fn upsert_replaces_existing_row() {
    let tier = SqliteTier::in_memory().unwrap();
    tier.upsert(&sample("a", "")).unwrap();
    let mut updated = sample("a", "");
    updated.data = "\"newer\"".to_string();
    tier.upsert(&updated).unwrap();

    assert_eq!(tier.count().unwrap(), 1);
    assert_eq!(tier.fetch("a").unwrap().unwrap().data, "\"newer\"");
  }

  #[test]
  fn record_hit_increments_counter() {
    let tier = SqliteTier::in_memory().unwrap();
    tier.upsert(&sample("a", "")).unwrap();
    tier.record_hit("a").unwrap();
    tier.record_hit("a").unwrap();
    assert_eq!(tier.fetch("a").unwrap().unwrap().hit_count, 2);
  }

  #[test]
  fn remove_by_tag_matches_substring() {
    let tier = SqliteTier::in_memory().unwrap();
    tier.upsert(&sample("a1", "A,week:3")).unwrap();
    tier.upsert(&sample("a2", "A")).unwrap();
    tier.upsert(&sample("b1", "B")).unwrap();

    assert_eq!(tier.remove_by_tag("A").unwrap(), 2);
    assert_eq!(tier.count().unwrap(), 1);
    assert!(tier.fetch("b1").unwrap().is_some());
  }

  #[test]
  fn clear_empties_the_table() {
    let tier = SqliteTier::in_memory().unwrap();
    tier.upsert(&sample("a", "")).unwrap();
    tier.upsert(&sample("b", "")).unwrap();
    tier.clear().unwrap();
    assert_eq!(tier.count().unwrap(), 0);
  }
}
