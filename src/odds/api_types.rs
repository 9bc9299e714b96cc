//! Serde-deserializable types matching the odds feed's responses.
//!
//! These are separate from domain types so deserialization stays tolerant
//! of feed fields we don't use, while domain types stay focused on what
//! the league needs.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::types::{GameOdds, MarketPrices};

#[derive(Debug, Deserialize)]
pub struct ApiEvent {
  pub id: String,
  #[serde(default)]
  pub sport_key: String,
  pub commence_time: DateTime<Utc>,
  pub home_team: String,
  pub away_team: String,
  #[serde(default)]
  pub bookmakers: Vec<ApiBookmaker>,
}

#[derive(Debug, Deserialize)]
pub struct ApiBookmaker {
  pub key: String,
  #[serde(default)]
  pub title: String,
  pub last_update: Option<DateTime<Utc>>,
  #[serde(default)]
  pub markets: Vec<ApiMarket>,
}

#[derive(Debug, Deserialize)]
pub struct ApiMarket {
  pub key: String,
  #[serde(default)]
  pub outcomes: Vec<ApiOutcome>,
}

#[derive(Debug, Deserialize)]
pub struct ApiOutcome {
  pub name: String,
  pub price: Option<f64>,
  pub point: Option<f64>,
}

impl ApiEvent {
  /// Flatten one bookmaker's markets into the normalized record.
  ///
  /// Prefers the first entry of `preferred` the feed offers, then falls
  /// back to whichever bookmaker is listed first. Returns `None` when no
  /// bookmaker quotes the game, or the chosen one carries no recognized
  /// market. Individual markets a bookmaker doesn't carry stay `None`.
  pub fn into_odds(mut self, preferred: &[String]) -> Option<GameOdds> {
    let bookmaker = pick_bookmaker(std::mem::take(&mut self.bookmakers), preferred)?;

    let mut markets = MarketPrices::default();
    for market in &bookmaker.markets {
      match market.key.as_str() {
        "h2h" => {
          for outcome in &market.outcomes {
            if outcome.name.eq_ignore_ascii_case(&self.home_team) {
              markets.moneyline_home = outcome.price;
            } else if outcome.name.eq_ignore_ascii_case(&self.away_team) {
              markets.moneyline_away = outcome.price;
            }
          }
        }
        "spreads" => {
          for outcome in &market.outcomes {
            if outcome.name.eq_ignore_ascii_case(&self.home_team) {
              // Spread is stored from the home side's perspective
              markets.spread_points = outcome.point;
              markets.spread_home_price = outcome.price;
            } else if outcome.name.eq_ignore_ascii_case(&self.away_team) {
              markets.spread_away_price = outcome.price;
            }
          }
        }
        "totals" => {
          for outcome in &market.outcomes {
            if outcome.name.eq_ignore_ascii_case("over") {
              markets.total_points = outcome.point;
              markets.over_price = outcome.price;
            } else if outcome.name.eq_ignore_ascii_case("under") {
              markets.under_price = outcome.price;
            }
          }
        }
        _ => {}
      }
    }

    if markets.is_empty() {
      return None;
    }

    Some(GameOdds {
      game_id: self.id,
      home_team: self.home_team,
      away_team: self.away_team,
      commence_time: self.commence_time,
      markets,
      source: bookmaker.key,
      updated_at: bookmaker.last_update.unwrap_or_else(Utc::now),
    })
  }
}

fn pick_bookmaker(mut bookmakers: Vec<ApiBookmaker>, preferred: &[String]) -> Option<ApiBookmaker> {
  for want in preferred {
    if let Some(idx) = bookmakers
      .iter()
      .position(|b| b.key.eq_ignore_ascii_case(want))
    {
      return Some(bookmakers.swap_remove(idx));
    }
  }
  if bookmakers.is_empty() {
    None
  } else {
    Some(bookmakers.remove(0))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"{
    "id": "abc123",
    "sport_key": "americanfootball_nfl",
    "commence_time": "2025-11-09T18:00:00Z",
    "home_team": "Green Bay Packers",
    "away_team": "Chicago Bears",
    "bookmakers": [
      {
        "key": "fanduel",
        "title": "FanDuel",
        "last_update": "2025-11-08T12:30:00Z",
        "markets": [
          {
            "key": "h2h",
            "outcomes": [
              { "name": "Green Bay Packers", "price": -160 },
              { "name": "Chicago Bears", "price": 140 }
            ]
          },
          {
            "key": "spreads",
            "outcomes": [
              { "name": "Green Bay Packers", "price": -110, "point": -3.5 },
              { "name": "Chicago Bears", "price": -110, "point": 3.5 }
            ]
          },
          {
            "key": "totals",
            "outcomes": [
              { "name": "Over", "price": -105, "point": 44.5 },
              { "name": "Under", "price": -115, "point": 44.5 }
            ]
          }
        ]
      },
      {
        "key": "draftkings",
        "title": "DraftKings",
        "last_update": "2025-11-08T12:31:00Z",
        "markets": [
          {
            "key": "h2h",
            "outcomes": [
              { "name": "Green Bay Packers", "price": -150 },
              { "name": "Chicago Bears", "price": 130 }
            ]
          }
        ]
      }
    ]
  }"#;

  #[test]
  fn normalizes_first_bookmaker_by_default() {
    let event: ApiEvent = serde_json::from_str(SAMPLE).unwrap();
    let odds = event.into_odds(&[]).unwrap();

    assert_eq!(odds.game_id, "abc123");
    assert_eq!(odds.source, "fanduel");
    assert_eq!(odds.markets.moneyline_home, Some(-160.0));
    assert_eq!(odds.markets.moneyline_away, Some(140.0));
    assert_eq!(odds.markets.spread_points, Some(-3.5));
    assert_eq!(odds.markets.spread_home_price, Some(-110.0));
    assert_eq!(odds.markets.total_points, Some(44.5));
    assert_eq!(odds.markets.over_price, Some(-105.0));
    assert_eq!(odds.markets.under_price, Some(-115.0));
  }

  #[test]
  fn preferred_bookmaker_wins_when_present() {
    let event: ApiEvent = serde_json::from_str(SAMPLE).unwrap();
    let odds = event.into_odds(&["draftkings".to_string()]).unwrap();

    assert_eq!(odds.source, "draftkings");
    assert_eq!(odds.markets.moneyline_home, Some(-150.0));
    // DraftKings only quoted the moneyline here
    assert_eq!(odds.markets.spread_points, None);
    assert_eq!(odds.markets.total_points, None);
  }

  #[test]
  fn bookmaker_without_recognized_markets_yields_nothing() {
    let exotic = r#"{
      "id": "x",
      "commence_time": "2025-11-09T18:00:00Z",
      "home_team": "A",
      "away_team": "B",
      "bookmakers": [
        {
          "key": "fanduel",
          "markets": [
            { "key": "player_pass_tds", "outcomes": [ { "name": "C", "price": 100 } ] }
          ]
        }
      ]
    }"#;
    let event: ApiEvent = serde_json::from_str(exotic).unwrap();
    assert!(event.into_odds(&[]).is_none());
  }

  #[test]
  fn event_without_bookmakers_yields_nothing() {
    let bare = r#"{
      "id": "x",
      "commence_time": "2025-11-09T18:00:00Z",
      "home_team": "A",
      "away_team": "B"
    }"#;
    let event: ApiEvent = serde_json::from_str(bare).unwrap();
    assert!(event.into_odds(&[]).is_none());
  }
}
