//! Freshness service for betting lines.
//!
//! Owns the fallback chain cache -> provider -> last snapshot, decides how
//! long fetched lines may live from kickoff proximity, and records every
//! observed update in the append-only history. Provider failures never
//! reach callers; the worst outcome is a stale snapshot or `None`.

use chrono::Utc;
use color_eyre::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheHealth, CacheStats, SqliteTier, TieredCache};
use crate::db::Database;

use super::matching::{odds_match_game, ttl_for_kickoff, AliasTable};
use super::provider::OddsProvider;
use super::types::{CachedOdds, Game, GameOdds, RefreshSummary, UsageStats};

fn cache_key(game_id: &str) -> String {
  format!("odds:{}", game_id)
}

/// Per-subject freshness state machine: absent until the first successful
/// fetch, cached while the TTL holds, then the snapshot carries the value
/// until a later refresh succeeds. Snapshots and history never regress to
/// absent - nothing here deletes them.
pub struct OddsService<P: OddsProvider> {
  cache: Arc<TieredCache<SqliteTier>>,
  provider: P,
  db: Arc<Database>,
  aliases: AliasTable,
  /// Per-key gates so concurrent misses for the same game coalesce into
  /// one upstream call
  inflight: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<P: OddsProvider> OddsService<P> {
  pub fn new(
    cache: Arc<TieredCache<SqliteTier>>,
    provider: P,
    db: Arc<Database>,
    aliases: AliasTable,
  ) -> Self {
    Self {
      cache,
      provider,
      db,
      aliases,
      inflight: tokio::sync::Mutex::new(HashMap::new()),
    }
  }

  /// Current lines for a game. Served from the cache unless `force_refresh`
  /// is set; a miss goes to the provider, and a provider failure falls back
  /// to the last persisted snapshot (or `None` before the first fetch).
  pub async fn get_odds(&self, game_id: &str, force_refresh: bool) -> Result<Option<GameOdds>> {
    let key = cache_key(game_id);

    if !force_refresh {
      if let Some(cached) = self.cache.get::<CachedOdds>(&key) {
        debug!(game_id, "serving cached lines");
        return Ok(Some(cached.odds));
      }
    }

    // Single-flight: losers of the race park here, then re-check the cache
    // the winner just populated.
    let gate = self.inflight_gate(&key).await;
    let guard = gate.lock().await;

    let rechecked = if force_refresh {
      None
    } else {
      self.cache.get::<CachedOdds>(&key)
    };
    let result = match rechecked {
      Some(cached) => Ok(Some(cached.odds)),
      None => self.refresh_game(game_id).await,
    };

    drop(guard);
    drop(gate);
    self.release_gate(&key).await;
    result
  }

  async fn refresh_game(&self, game_id: &str) -> Result<Option<GameOdds>> {
    let Some(game) = self.db.get_game(game_id)? else {
      debug!(game_id, "game not on the schedule, serving last snapshot");
      return self.db.get_odds(game_id);
    };

    // A call without credentials can only fail; skip straight to the
    // snapshot instead of burning a doomed request
    if !self.provider.is_configured() {
      debug!(game_id, "provider not configured, serving last snapshot");
      return self.db.get_odds(game_id);
    }

    let fetched = self
      .provider
      .fetch_one(&game.home_team, &game.away_team, game.commence_time)
      .await;

    match fetched {
      Ok(Some(odds)) => Ok(Some(self.store_update(&game, odds)?)),
      Ok(None) => {
        debug!(game_id, "feed has no match for game, serving last snapshot");
        self.db.get_odds(game_id)
      }
      Err(e) => {
        warn!(game_id, error = %e, "provider fetch failed, serving last snapshot");
        self.db.get_odds(game_id)
      }
    }
  }

  /// Write a fetched record everywhere it belongs: tiered cache with the
  /// proximity TTL, snapshot row, history row.
  fn store_update(&self, game: &Game, fetched: GameOdds) -> Result<GameOdds> {
    let mut odds = fetched;
    // Snapshot, history, and cache key off the league's game id, not the
    // feed's event id
    odds.game_id = game.id.clone();

    let ttl = ttl_for_kickoff(game.commence_time, Utc::now());
    let game_tag = format!("game:{}", game.id);
    let outcome = self.cache.set(
      &cache_key(&game.id),
      &CachedOdds::new(odds.clone(), ttl),
      &["odds", &game_tag],
      Some(ttl),
    );
    if !outcome.any_written() {
      warn!(game_id = %game.id, "lines not cached on either tier");
    } else if !outcome.fully_written() {
      warn!(game_id = %game.id, "lines cached on one tier only");
    }

    self.db.upsert_odds(&odds)?;
    self.db.append_history(&odds)?;
    info!(
      game_id = %game.id,
      source = %odds.source,
      ttl_secs = ttl.as_secs(),
      "lines refreshed"
    );
    Ok(odds)
  }

  /// Refresh every open game of a week from a single bulk fetch. Per-game
  /// failures are collected, never fatal; a failed bulk fetch reports one
  /// error and zero updates.
  pub async fn refresh_week(&self, week: u32) -> Result<RefreshSummary> {
    let games = self.db.games_for_week(week, true)?;
    if games.is_empty() {
      debug!(week, "no open games to refresh");
      return Ok(RefreshSummary::default());
    }

    if !self.provider.is_configured() {
      return Ok(RefreshSummary {
        updated: 0,
        errors: vec!["provider not configured".to_string()],
      });
    }

    // One bulk call for the whole slate - a call per game would burn the
    // rate-limited upstream's quota for nothing.
    let feed = match self.provider.fetch_all().await {
      Ok(feed) => feed,
      Err(e) => {
        warn!(week, error = %e, "bulk odds fetch failed");
        return Ok(RefreshSummary {
          updated: 0,
          errors: vec![format!("bulk fetch failed: {}", e)],
        });
      }
    };

    let mut summary = RefreshSummary::default();
    for game in &games {
      let matched = feed.iter().find(|odds| {
        odds_match_game(
          odds,
          &game.home_team,
          &game.away_team,
          game.commence_time,
          &self.aliases,
        )
      });

      match matched {
        Some(fetched) => match self.store_update(game, fetched.clone()) {
          Ok(_) => summary.updated += 1,
          Err(e) => summary.errors.push(format!("{}: {}", game.id, e)),
        },
        None => summary.errors.push(format!(
          "{}: no feed match for {} at {}",
          game.id, game.away_team, game.home_team
        )),
      }
    }

    info!(
      week,
      updated = summary.updated,
      failed = summary.errors.len(),
      "weekly refresh complete"
    );
    Ok(summary)
  }

  /// Bulk read. Cache hits are served directly; when more than one game
  /// misses, the misses share a single bulk fetch instead of paying one
  /// upstream call each.
  pub async fn get_many(&self, game_ids: &[String]) -> Result<HashMap<String, Option<GameOdds>>> {
    let mut results: HashMap<String, Option<GameOdds>> = HashMap::new();
    let mut misses: Vec<String> = Vec::new();

    for id in game_ids {
      if results.contains_key(id) {
        continue;
      }
      match self.cache.get::<CachedOdds>(&cache_key(id)) {
        Some(cached) => {
          results.insert(id.clone(), Some(cached.odds));
        }
        None => {
          misses.push(id.clone());
          results.insert(id.clone(), None);
        }
      }
    }

    if misses.len() == 1 {
      let id = &misses[0];
      let odds = self.get_odds(id, false).await?;
      results.insert(id.clone(), odds);
    } else if misses.len() > 1 {
      let feed = if self.provider.is_configured() {
        match self.provider.fetch_all().await {
          Ok(feed) => Some(feed),
          Err(e) => {
            warn!(error = %e, "bulk odds fetch failed, serving snapshots");
            None
          }
        }
      } else {
        None
      };
      for id in &misses {
        let odds = self.resolve_miss(id, feed.as_deref())?;
        results.insert(id.clone(), odds);
      }
    }

    Ok(results)
  }

  fn resolve_miss(&self, game_id: &str, feed: Option<&[GameOdds]>) -> Result<Option<GameOdds>> {
    let Some(game) = self.db.get_game(game_id)? else {
      return self.db.get_odds(game_id);
    };

    if let Some(feed) = feed {
      let matched = feed.iter().find(|odds| {
        odds_match_game(
          odds,
          &game.home_team,
          &game.away_team,
          game.commence_time,
          &self.aliases,
        )
      });
      if let Some(fetched) = matched {
        match self.store_update(&game, fetched.clone()) {
          Ok(odds) => return Ok(Some(odds)),
          Err(e) => warn!(game_id, error = %e, "update not persisted, serving snapshot"),
        }
      }
    }

    self.db.get_odds(game_id)
  }

  /// Provider quota and cache occupancy. Diagnostic only.
  pub fn usage_stats(&self) -> UsageStats {
    let mut cached_game_ids: Vec<String> = self
      .cache
      .memory_keys()
      .iter()
      .filter_map(|key| key.strip_prefix("odds:"))
      .map(String::from)
      .collect();
    cached_game_ids.sort();

    UsageStats {
      provider: self.provider.name().to_string(),
      remaining_quota: self.provider.remaining_quota(),
      cached_items: cached_game_ids.len(),
      cached_game_ids,
    }
  }

  pub fn cache_stats(&self) -> CacheStats {
    self.cache.stats()
  }

  pub fn cache_health(&self) -> CacheHealth {
    self.cache.health()
  }

  pub fn clear_cache(&self) {
    self.cache.clear_all();
  }

  async fn inflight_gate(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
    let mut map = self.inflight.lock().await;
    map
      .entry(key.to_string())
      .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
      .clone()
  }

  async fn release_gate(&self, key: &str) {
    let mut map = self.inflight.lock().await;
    if let Some(gate) = map.get(key) {
      // Only the map itself still holds the gate: no one is waiting
      if Arc::strong_count(gate) == 1 {
        map.remove(key);
      }
    }
  }
}
