//! SQL schema for the league's domain tables.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS games (
    id TEXT PRIMARY KEY,
    week INTEGER NOT NULL,
    home_team TEXT NOT NULL,
    away_team TEXT NOT NULL,
    commence_time TEXT NOT NULL,
    completed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_games_week ON games(week);

-- Current lines, one row per game, updated in place on refresh
CREATE TABLE IF NOT EXISTS odds_snapshots (
    game_id TEXT PRIMARY KEY REFERENCES games(id),
    spread_points REAL,
    spread_home_price REAL,
    spread_away_price REAL,
    total_points REAL,
    over_price REAL,
    under_price REAL,
    moneyline_home REAL,
    moneyline_away REAL,
    source TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Every observed update; rows are never rewritten or deleted
CREATE TABLE IF NOT EXISTS odds_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    game_id TEXT NOT NULL,
    spread_points REAL,
    spread_home_price REAL,
    spread_away_price REAL,
    total_points REAL,
    over_price REAL,
    under_price REAL,
    moneyline_home REAL,
    moneyline_away REAL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_odds_history_game
    ON odds_history(game_id, recorded_at);
"#;
