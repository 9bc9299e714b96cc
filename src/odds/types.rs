use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Betting lines for a single game, normalized from whichever provider
/// produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameOdds {
  pub game_id: String,
  pub home_team: String,
  pub away_team: String,
  /// Scheduled kickoff
  pub commence_time: DateTime<Utc>,
  pub markets: MarketPrices,
  /// Bookmaker key the lines were taken from (e.g. "draftkings")
  pub source: String,
  pub updated_at: DateTime<Utc>,
}

/// The numeric market fields. Any of them may be missing when the
/// bookmaker doesn't offer that market for a game.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketPrices {
  /// Point spread from the home team's perspective (negative = favored)
  pub spread_points: Option<f64>,
  pub spread_home_price: Option<f64>,
  pub spread_away_price: Option<f64>,
  /// Over/under total
  pub total_points: Option<f64>,
  pub over_price: Option<f64>,
  pub under_price: Option<f64>,
  pub moneyline_home: Option<f64>,
  pub moneyline_away: Option<f64>,
}

impl MarketPrices {
  pub fn is_empty(&self) -> bool {
    self.spread_points.is_none()
      && self.total_points.is_none()
      && self.moneyline_home.is_none()
      && self.moneyline_away.is_none()
  }
}

/// What actually goes into the tiered cache: the odds plus the freshness
/// metadata assigned when they were cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedOdds {
  pub odds: GameOdds,
  pub cached_at: DateTime<Utc>,
  /// TTL that was assigned at cache time, in seconds
  pub ttl_secs: u64,
}

impl CachedOdds {
  pub fn new(odds: GameOdds, ttl: Duration) -> Self {
    Self {
      odds,
      cached_at: Utc::now(),
      ttl_secs: ttl.as_secs(),
    }
  }
}

/// A game as the league schedules it. Odds hang off this by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
  pub id: String,
  pub week: u32,
  pub home_team: String,
  pub away_team: String,
  pub commence_time: DateTime<Utc>,
  #[serde(default)]
  pub completed: bool,
}

/// One observed set of lines, recorded whenever a refresh lands.
/// Rows are append-only; nothing in this crate mutates or deletes them.
#[derive(Debug, Clone, PartialEq)]
pub struct OddsHistoryEntry {
  pub game_id: String,
  pub markets: MarketPrices,
  pub recorded_at: DateTime<Utc>,
}

/// Outcome of a weekly bulk refresh. Per-game failures land in `errors`
/// without aborting the rest of the batch.
#[derive(Debug, Default)]
pub struct RefreshSummary {
  pub updated: usize,
  pub errors: Vec<String>,
}

/// Diagnostic snapshot of provider quota and cache occupancy.
#[derive(Debug, Clone)]
pub struct UsageStats {
  pub provider: String,
  pub remaining_quota: Option<i64>,
  pub cached_items: usize,
  pub cached_game_ids: Vec<String>,
}
