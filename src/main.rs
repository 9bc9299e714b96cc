mod cache;
mod config;
mod db;
mod odds;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use cache::{SqliteTier, TieredCache};
use config::Config;
use db::Database;
use odds::{AliasTable, Game, GameOdds, OddsService, TheOddsApi};

#[derive(Parser, Debug)]
#[command(name = "pickline")]
#[command(about = "Freshness-aware betting-line cache for a family pick'em league")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pickline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Load or update the schedule from a YAML file
  Seed {
    /// Schedule file: a list of games with id, week, teams, kickoff
    file: PathBuf,
  },
  /// Refresh lines for every open game of a week with one bulk fetch
  Refresh { week: u32 },
  /// Show current lines for a game
  Show {
    game_id: String,
    /// Bypass the cache and fetch fresh lines
    #[arg(short, long)]
    force: bool,
  },
  /// Print cache and provider diagnostics
  Stats,
  /// Drop both cache tiers and reset counters
  ClearCache,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let db_path = config.database_path()?;

  let log_dir = db_path
    .parent()
    .map(|p| p.join("logs"))
    .unwrap_or_else(|| PathBuf::from("logs"));
  let _log_guard = init_tracing(&log_dir)?;

  let api_key = Config::api_key();
  if api_key.is_none() {
    warn!("no odds API key configured; refreshes will fall back to stored snapshots");
  }

  let db = Arc::new(Database::open(&db_path)?);
  let cache_config = config.cache.to_cache_config();
  let sweep_interval = cache_config.sweep_interval;
  let cache = Arc::new(TieredCache::new(cache_config, SqliteTier::open(&db_path)?));
  let _sweeper = TieredCache::spawn_sweeper(&cache, sweep_interval);

  let aliases = AliasTable::new(&config.aliases);
  let provider = TheOddsApi::new(config.provider.clone(), api_key, aliases.clone())?;
  let service = OddsService::new(Arc::clone(&cache), provider, Arc::clone(&db), aliases);

  match args.command {
    Command::Seed { file } => {
      let contents = std::fs::read_to_string(&file)
        .map_err(|e| eyre!("Failed to read schedule {}: {}", file.display(), e))?;
      let games: Vec<Game> = serde_yaml::from_str(&contents)
        .map_err(|e| eyre!("Failed to parse schedule {}: {}", file.display(), e))?;

      for game in &games {
        db.upsert_game(game)?;
      }
      println!("Seeded {} games", games.len());
    }

    Command::Refresh { week } => {
      let summary = service.refresh_week(week).await?;
      println!("Updated {} games", summary.updated);
      for error in &summary.errors {
        println!("  failed: {}", error);
      }
    }

    Command::Show { game_id, force } => match service.get_odds(&game_id, force).await? {
      Some(odds) => print_odds(&odds),
      None => println!("No lines available for {}", game_id),
    },

    Command::Stats => {
      let stats = service.cache_stats();
      let health = service.cache_health();
      let usage = service.usage_stats();

      println!("Cache");
      println!(
        "  requests: {} (memory {} / persistent {} / miss {})",
        stats.total_requests, stats.memory_hits, stats.persistent_hits, stats.misses
      );
      println!("  hit ratio: {:.2}", stats.hit_ratio());
      println!("  evictions: {}  expired: {}", stats.evictions, stats.expired_removals);
      println!(
        "  memory: {} items, ~{} bytes (limits: {} items, {} bytes)",
        health.memory_items, health.estimated_bytes, health.max_items, health.max_bytes
      );
      match health.persistent_items {
        Some(count) => println!("  persistent: {} items", count),
        None => println!("  persistent: unavailable"),
      }

      println!("Provider ({})", usage.provider);
      match usage.remaining_quota {
        Some(quota) => println!("  remaining quota: ~{}", quota),
        None => println!("  remaining quota: unknown"),
      }
      println!("  cached games: {}", usage.cached_items);
      for id in &usage.cached_game_ids {
        println!("    {}", id);
      }
    }

    Command::ClearCache => {
      service.clear_cache();
      println!("Cache cleared");
    }
  }

  Ok(())
}

fn print_odds(odds: &GameOdds) {
  println!("{} at {}", odds.away_team, odds.home_team);
  println!("  kickoff: {}", odds.commence_time.to_rfc3339());
  println!(
    "  spread:  {} ({} / {})",
    fmt_line(odds.markets.spread_points),
    fmt_line(odds.markets.spread_home_price),
    fmt_line(odds.markets.spread_away_price)
  );
  println!(
    "  total:   {} (o{} / u{})",
    fmt_line(odds.markets.total_points),
    fmt_line(odds.markets.over_price),
    fmt_line(odds.markets.under_price)
  );
  println!(
    "  moneyline: {} / {}",
    fmt_line(odds.markets.moneyline_home),
    fmt_line(odds.markets.moneyline_away)
  );
  println!("  source: {} (updated {})", odds.source, odds.updated_at.to_rfc3339());
}

fn fmt_line(value: Option<f64>) -> String {
  match value {
    Some(v) => format!("{:+}", v),
    None => "-".to_string(),
  }
}

/// Log to stderr and a daily-rolled file next to the database. The guard
/// must stay alive for the file writer to flush.
fn init_tracing(log_dir: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pickline=info"));

  let file_appender = tracing_appender::rolling::daily(log_dir, "pickline.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
    .with(fmt::layer().with_writer(file_writer).with_ansi(false))
    .init();

  Ok(guard)
}
