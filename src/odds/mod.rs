//! Betting-line domain: normalized odds types, the upstream provider
//! client, and the freshness service that decides when cached lines are
//! too old to trust.

pub mod api_types;
pub mod matching;
pub mod provider;
pub mod service;
pub mod types;

pub use matching::AliasTable;
pub use provider::{OddsProvider, TheOddsApi};
pub use service::OddsService;
pub use types::{CachedOdds, Game, GameOdds, MarketPrices, OddsHistoryEntry, RefreshSummary, UsageStats};
