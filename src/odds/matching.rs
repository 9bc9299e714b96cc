//! Pure decision functions of the freshness layer: how long lines may be
//! cached, and whether two free-text team names mean the same team.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

use super::types::GameOdds;

/// Cache lifetime as a step function of hours until kickoff. Lines move
/// faster as the game approaches, so the closer the kickoff the shorter
/// the TTL. Bucket lower bounds are inclusive: exactly 1.0 hours out is
/// still the 5-minute bucket. Games already under way get the shortest
/// lifetime.
pub fn ttl_for_hours_until(hours: f64) -> Duration {
  let secs = if hours <= 1.0 {
    300
  } else if hours <= 6.0 {
    900
  } else if hours <= 24.0 {
    3_600
  } else if hours <= 72.0 {
    21_600
  } else {
    86_400
  };
  Duration::from_secs(secs)
}

/// TTL for lines on a game kicking off at `commence`, seen from `now`.
pub fn ttl_for_kickoff(commence: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
  let hours = (commence - now).num_milliseconds() as f64 / 3_600_000.0;
  ttl_for_hours_until(hours)
}

/// Team-name equivalences that containment can't catch (renames, old
/// franchise names). Keys and values are stored lowercased.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
  canonical: HashMap<String, String>,
}

impl AliasTable {
  pub fn new(pairs: &HashMap<String, String>) -> Self {
    let canonical = pairs
      .iter()
      .map(|(alias, name)| (alias.to_lowercase(), name.to_lowercase()))
      .collect();
    Self { canonical }
  }

  fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
    self.canonical.get(name).map(String::as_str).unwrap_or(name)
  }
}

/// Whether two free-text team names refer to the same team: containment in
/// either direction (case-insensitive) or an alias-table equivalence.
///
/// Deliberately permissive. Upstream feeds are inconsistent about market
/// names ("LA Chargers" vs "Los Angeles Chargers"), and silently dropping
/// a valid update is worse than the occasional false positive, which the
/// family spots the moment the line looks wrong.
pub fn teams_match(a: &str, b: &str, aliases: &AliasTable) -> bool {
  let a = a.trim().to_lowercase();
  let b = b.trim().to_lowercase();
  if a.is_empty() || b.is_empty() {
    return false;
  }
  if a.contains(&b) || b.contains(&a) {
    return true;
  }
  aliases.resolve(&a) == aliases.resolve(&b)
}

pub fn same_calendar_day(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
  a.date_naive() == b.date_naive()
}

/// Best-effort match of a provider record against a scheduled game: both
/// team names must match and kickoff must fall on the same UTC calendar
/// day.
pub fn odds_match_game(
  odds: &GameOdds,
  home_team: &str,
  away_team: &str,
  commence: DateTime<Utc>,
  aliases: &AliasTable,
) -> bool {
  same_calendar_day(odds.commence_time, commence)
    && teams_match(&odds.home_team, home_team, aliases)
    && teams_match(&odds.away_team, away_team, aliases)
}
