//! Persistent store for the league schedule, line snapshots, and line
//! history. Snapshots are the fallback when the feed is down; history is
//! append-only and feeds the line-movement view.

pub mod schema;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::odds::{Game, GameOdds, MarketPrices, OddsHistoryEntry};

/// Database connection wrapper.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database at the given location.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// In-memory database, used by tests.
  pub fn in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations()?;
    Ok(db)
  }

  /// Run database migrations.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  pub fn upsert_game(&self, game: &Game) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO games (id, week, home_team, away_team, commence_time, completed)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          game.id,
          game.week,
          game.home_team,
          game.away_team,
          game.commence_time.to_rfc3339(),
          game.completed,
        ],
      )
      .map_err(|e| eyre!("Failed to store game {}: {}", game.id, e))?;
    Ok(())
  }

  pub fn get_game(&self, id: &str) -> Result<Option<Game>> {
    let conn = self.lock()?;
    let row: Option<(u32, String, String, String, bool)> = conn
      .query_row(
        "SELECT week, home_team, away_team, commence_time, completed
         FROM games WHERE id = ?",
        params![id],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to load game {}: {}", id, e))?;

    let Some((week, home_team, away_team, commence_time, completed)) = row else {
      return Ok(None);
    };

    Ok(Some(Game {
      id: id.to_string(),
      week,
      home_team,
      away_team,
      commence_time: parse_datetime(&commence_time)?,
      completed,
    }))
  }

  /// Games scheduled for a week. With `open_only`, games already marked
  /// completed are skipped - their lines no longer move.
  pub fn games_for_week(&self, week: u32, open_only: bool) -> Result<Vec<Game>> {
    let conn = self.lock()?;
    let sql = if open_only {
      "SELECT id, week, home_team, away_team, commence_time, completed
       FROM games WHERE week = ? AND completed = 0 ORDER BY commence_time, id"
    } else {
      "SELECT id, week, home_team, away_team, commence_time, completed
       FROM games WHERE week = ? ORDER BY commence_time, id"
    };

    let mut stmt = conn
      .prepare(sql)
      .map_err(|e| eyre!("Failed to prepare games query: {}", e))?;

    let rows: Vec<(String, u32, String, String, String, bool)> = stmt
      .query_map(params![week], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query games for week {}: {}", week, e))?
      .collect::<std::result::Result<_, _>>()
      .map_err(|e| eyre!("Failed to read game row: {}", e))?;

    rows
      .into_iter()
      .map(|(id, week, home_team, away_team, commence_time, completed)| {
        Ok(Game {
          id,
          week,
          home_team,
          away_team,
          commence_time: parse_datetime(&commence_time)?,
          completed,
        })
      })
      .collect()
  }

  /// Last persisted lines for a game, rebuilt against the schedule row.
  pub fn get_odds(&self, game_id: &str) -> Result<Option<GameOdds>> {
    let conn = self.lock()?;
    let row: Option<OddsRow> = conn
      .query_row(
        "SELECT g.home_team, g.away_team, g.commence_time,
                s.spread_points, s.spread_home_price, s.spread_away_price,
                s.total_points, s.over_price, s.under_price,
                s.moneyline_home, s.moneyline_away,
                s.source, s.updated_at
         FROM odds_snapshots s
         INNER JOIN games g ON g.id = s.game_id
         WHERE s.game_id = ?",
        params![game_id],
        |row| {
          Ok(OddsRow {
            home_team: row.get(0)?,
            away_team: row.get(1)?,
            commence_time: row.get(2)?,
            markets: MarketPrices {
              spread_points: row.get(3)?,
              spread_home_price: row.get(4)?,
              spread_away_price: row.get(5)?,
              total_points: row.get(6)?,
              over_price: row.get(7)?,
              under_price: row.get(8)?,
              moneyline_home: row.get(9)?,
              moneyline_away: row.get(10)?,
            },
            source: row.get(11)?,
            updated_at: row.get(12)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to load odds for {}: {}", game_id, e))?;

    let Some(row) = row else {
      return Ok(None);
    };

    Ok(Some(GameOdds {
      game_id: game_id.to_string(),
      home_team: row.home_team,
      away_team: row.away_team,
      commence_time: parse_datetime(&row.commence_time)?,
      markets: row.markets,
      source: row.source,
      updated_at: parse_datetime(&row.updated_at)?,
    }))
  }

  /// Replace the snapshot row for a game.
  pub fn upsert_odds(&self, odds: &GameOdds) -> Result<()> {
    let conn = self.lock()?;
    let m = &odds.markets;
    conn
      .execute(
        "INSERT OR REPLACE INTO odds_snapshots
           (game_id, spread_points, spread_home_price, spread_away_price,
            total_points, over_price, under_price,
            moneyline_home, moneyline_away, source, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          odds.game_id,
          m.spread_points,
          m.spread_home_price,
          m.spread_away_price,
          m.total_points,
          m.over_price,
          m.under_price,
          m.moneyline_home,
          m.moneyline_away,
          odds.source,
          odds.updated_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store odds for {}: {}", odds.game_id, e))?;
    Ok(())
  }

  /// Record the observed lines as a new history row.
  pub fn append_history(&self, odds: &GameOdds) -> Result<()> {
    let conn = self.lock()?;
    let m = &odds.markets;
    conn
      .execute(
        "INSERT INTO odds_history
           (game_id, spread_points, spread_home_price, spread_away_price,
            total_points, over_price, under_price,
            moneyline_home, moneyline_away, recorded_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          odds.game_id,
          m.spread_points,
          m.spread_home_price,
          m.spread_away_price,
          m.total_points,
          m.over_price,
          m.under_price,
          m.moneyline_home,
          m.moneyline_away,
          Utc::now().to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to append history for {}: {}", odds.game_id, e))?;
    Ok(())
  }

  /// Observed line movement for a game, oldest first.
  pub fn history_for_game(&self, game_id: &str) -> Result<Vec<OddsHistoryEntry>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT spread_points, spread_home_price, spread_away_price,
                total_points, over_price, under_price,
                moneyline_home, moneyline_away, recorded_at
         FROM odds_history WHERE game_id = ? ORDER BY recorded_at, id",
      )
      .map_err(|e| eyre!("Failed to prepare history query: {}", e))?;

    let rows: Vec<(MarketPrices, String)> = stmt
      .query_map(params![game_id], |row| {
        Ok((
          MarketPrices {
            spread_points: row.get(0)?,
            spread_home_price: row.get(1)?,
            spread_away_price: row.get(2)?,
            total_points: row.get(3)?,
            over_price: row.get(4)?,
            under_price: row.get(5)?,
            moneyline_home: row.get(6)?,
            moneyline_away: row.get(7)?,
          },
          row.get(8)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query history for {}: {}", game_id, e))?
      .collect::<std::result::Result<_, _>>()
      .map_err(|e| eyre!("Failed to read history row: {}", e))?;

    rows
      .into_iter()
      .map(|(markets, recorded_at)| {
        Ok(OddsHistoryEntry {
          game_id: game_id.to_string(),
          markets,
          recorded_at: parse_datetime(&recorded_at)?,
        })
      })
      .collect()
  }
}

/// Intermediate shape for the snapshot join.
struct OddsRow {
  home_team: String,
  away_team: String,
  commence_time: String,
  markets: MarketPrices,
  source: String,
  updated_at: String,
}

/// Parse an RFC 3339 timestamp column.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
