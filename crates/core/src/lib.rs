//! Core types, configuration, and the cache contract for the basis trade
//! engine.
//!
//! This crate holds everything the decision-and-lifecycle engine shares with
//! its collaborators: market data snapshots, funding rate entries, the
//! configuration surface, the error taxonomy, and the abstract key-value
//! cache that ingestion writes into and the engine reads from.

pub mod cache;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod funding;
pub mod market;

pub use cache::{keys, CacheStore, MemoryCache};
pub use config::{AppConfig, ExchangeConfig, ExecutorConfig, StrategyConfig};
pub use config_loader::ConfigLoader;
pub use error::{CoreError, LegName};
pub use funding::{spot_to_perp, FundingRateEntry};
pub use market::PriceSnapshot;
