//! Odds provider contract and the odds-api.com client.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;
use url::Url;

use crate::config::ProviderConfig;

use super::api_types::ApiEvent;
use super::matching::{odds_match_game, AliasTable};
use super::types::GameOdds;

/// Upstream source of betting lines. The feed is slow and rate limited,
/// so callers refreshing more than one game should go through `fetch_all`.
#[async_trait]
pub trait OddsProvider: Send + Sync {
  /// One network call returning every game the feed currently quotes.
  async fn fetch_all(&self) -> Result<Vec<GameOdds>>;

  /// Single-game lookup built on `fetch_all` - it costs the same quota as
  /// a full fetch.
  async fn fetch_one(
    &self,
    home_team: &str,
    away_team: &str,
    commence: DateTime<Utc>,
  ) -> Result<Option<GameOdds>>;

  /// Requests the upstream will still accept. Best effort - `None` when
  /// nothing is known.
  fn remaining_quota(&self) -> Option<i64>;

  /// Whether credentials are present, so certain-to-fail calls can be
  /// short-circuited.
  fn is_configured(&self) -> bool;

  fn name(&self) -> &str;
}

/// Client for the-odds-api.com v4 feed.
pub struct TheOddsApi {
  http: reqwest::Client,
  config: ProviderConfig,
  api_key: Option<String>,
  aliases: AliasTable,
  /// Client-side quota estimate, replaced by the upstream's
  /// `x-requests-remaining` header whenever a response carries one
  remaining: AtomicI64,
}

impl TheOddsApi {
  pub fn new(config: ProviderConfig, api_key: Option<String>, aliases: AliasTable) -> Result<Self> {
    let http = reqwest::Client::builder()
      .user_agent(concat!("pickline/", env!("CARGO_PKG_VERSION")))
      .timeout(std::time::Duration::from_secs(20))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    let remaining = AtomicI64::new(config.monthly_quota);
    Ok(Self {
      http,
      config,
      api_key,
      aliases,
      remaining,
    })
  }

  fn odds_url(&self) -> Result<Url> {
    let key = self.api_key.as_deref().filter(|k| !k.is_empty()).ok_or_else(|| {
      eyre!("Odds API key not configured. Set PICKLINE_ODDS_API_KEY or ODDS_API_KEY.")
    })?;

    let endpoint = format!(
      "{}/sports/{}/odds",
      self.config.base_url.trim_end_matches('/'),
      self.config.sport
    );

    Url::parse_with_params(
      &endpoint,
      &[
        ("apiKey", key),
        ("regions", self.config.regions.as_str()),
        ("markets", self.config.markets.as_str()),
        ("oddsFormat", "american"),
      ],
    )
    .map_err(|e| eyre!("Invalid provider URL {}: {}", endpoint, e))
  }

  fn note_quota(&self, response: &reqwest::Response) {
    let reported = response
      .headers()
      .get("x-requests-remaining")
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.parse::<f64>().ok());

    match reported {
      Some(remaining) => self.remaining.store(remaining as i64, Ordering::Relaxed),
      None => {
        self.remaining.fetch_sub(1, Ordering::Relaxed);
      }
    }
  }
}

#[async_trait]
impl OddsProvider for TheOddsApi {
  async fn fetch_all(&self) -> Result<Vec<GameOdds>> {
    let url = self.odds_url()?;

    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Odds request failed: {}", e))?;
    self.note_quota(&response);

    let response = response
      .error_for_status()
      .map_err(|e| eyre!("Odds request rejected: {}", e))?;

    let events: Vec<ApiEvent> = response
      .json()
      .await
      .map_err(|e| eyre!("Failed to parse odds response: {}", e))?;

    let odds: Vec<GameOdds> = events
      .into_iter()
      .filter_map(|event| event.into_odds(&self.config.bookmakers))
      .collect();
    debug!(games = odds.len(), "fetched odds feed");
    Ok(odds)
  }

  async fn fetch_one(
    &self,
    home_team: &str,
    away_team: &str,
    commence: DateTime<Utc>,
  ) -> Result<Option<GameOdds>> {
    let all = self.fetch_all().await?;
    Ok(
      all
        .into_iter()
        .find(|odds| odds_match_game(odds, home_team, away_team, commence, &self.aliases)),
    )
  }

  fn remaining_quota(&self) -> Option<i64> {
    self.api_key.as_ref()?;
    Some(self.remaining.load(Ordering::Relaxed))
  }

  fn is_configured(&self) -> bool {
    self.api_key.as_deref().is_some_and(|k| !k.is_empty())
  }

  fn name(&self) -> &str {
    "the-odds-api"
  }
}
