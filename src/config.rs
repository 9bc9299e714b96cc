use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cache::CacheConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub provider: ProviderConfig,
  pub cache: CacheTuning,
  /// Override for the SQLite database location
  pub db_path: Option<PathBuf>,
  /// Team-name aliases (alias -> canonical), matched case-insensitively
  pub aliases: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
  pub base_url: String,
  /// Sport key in the upstream's catalog
  pub sport: String,
  pub regions: String,
  /// Comma-separated market keys requested from the feed
  pub markets: String,
  /// Bookmakers in preference order; first one quoting a game wins
  pub bookmakers: Vec<String>,
  /// Request allowance per month, used as the starting quota estimate
  pub monthly_quota: i64,
}

impl Default for ProviderConfig {
  fn default() -> Self {
    Self {
      base_url: "https://api.the-odds-api.com/v4".to_string(),
      sport: "americanfootball_nfl".to_string(),
      regions: "us".to_string(),
      markets: "h2h,spreads,totals".to_string(),
      bookmakers: Vec::new(),
      monthly_quota: 500,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheTuning {
  pub memory_ttl_secs: u64,
  pub persistent_ttl_secs: u64,
  pub max_items: usize,
  pub max_bytes: usize,
  pub sweep_interval_secs: u64,
}

impl Default for CacheTuning {
  fn default() -> Self {
    Self {
      memory_ttl_secs: 300,
      persistent_ttl_secs: 3600,
      max_items: 500,
      max_bytes: 10 * 1024 * 1024,
      sweep_interval_secs: 60,
    }
  }
}

impl CacheTuning {
  pub fn to_cache_config(&self) -> CacheConfig {
    CacheConfig {
      memory_ttl: std::time::Duration::from_secs(self.memory_ttl_secs),
      persistent_ttl: std::time::Duration::from_secs(self.persistent_ttl_secs),
      max_items: self.max_items,
      max_bytes: self.max_bytes,
      sweep_interval: std::time::Duration::from_secs(self.sweep_interval_secs),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./pickline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pickline/config.yaml
  ///
  /// Every field has a default, so a missing file just means defaults.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => {
        debug!("no config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("pickline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("pickline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Database location: explicit override, else the platform data dir.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.db_path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("pickline").join("pickline.db"))
  }

  /// Get the odds API key from environment variables.
  ///
  /// Checks PICKLINE_ODDS_API_KEY first, then ODDS_API_KEY as fallback.
  /// Credentials never live in the config file.
  pub fn api_key() -> Option<String> {
    std::env::var("PICKLINE_ODDS_API_KEY")
      .or_else(|_| std::env::var("ODDS_API_KEY"))
      .ok()
      .filter(|k| !k.is_empty())
  }
}
