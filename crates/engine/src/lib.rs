//! Funding-rate basis trade engine: detection, execution, and lifecycle.
//!
//! This crate is the decision-and-lifecycle core of the system. Ingestion
//! (out of scope here) keeps a cache of price snapshots and funding rate
//! entries fresh; the engine turns those facts into positions:
//!
//! ```text
//! funding entry ──▶ Strategy ──entry/exit test──▶ TradeSignal
//!                      │                              │
//!                      │ admission / fill reports     ▼
//!                      ▼                         TradeExecutor ── spot leg ──▶ gateway
//!               PositionManager ◀── LegFill ◀──       └─────── perp leg ──▶ gateway
//!                      │
//!                      ▼
//!            ledger + trade history (cache)
//! ```
//!
//! A basis trade holds spot long against a short perpetual on the same
//! exchange and collects the funding premium while the annualized rate
//! stays attractive:
//!
//! ```text
//! funding  0.04% / 8h  ->  43.8% annualized
//! entry:   buy  1.0 BTC/USDT spot  @ 100.0
//!          sell 1.0 BTC/USDT:USDT perp @ 100.0   (delta neutral)
//! collect: qty x mark x rate, every funding interval
//! exit:    when the rate flips negative or drops below threshold
//! ```
//!
//! # Modules
//!
//! - [`types`]: signals, leg fills, and the joined two-leg outcome
//! - [`detector`]: normalized opportunity derivation from funding entries
//! - [`fees`]: fee schedules and breakeven estimation
//! - [`position`]: the position state machine and P&L
//! - [`manager`]: the capacity-safe position ledger
//! - [`executor`]: coordinated two-leg execution over a gateway port
//! - [`paper`]: deterministic paper-trading gateway
//! - [`strategy`]: the evaluation loop tying it all together
//! - [`notify`]: fire-and-forget lifecycle notifications
//! - [`metrics`]: performance reporting
//!
//! # Safety
//!
//! The position manager is the single serialization point for capacity:
//! admission is an atomic check-and-reserve, so per-exchange and global
//! caps hold under concurrent evaluations, and a half-filled entry or exit
//! is always surfaced as a distinguishable outcome rather than silently
//! dropped.

pub mod detector;
pub mod executor;
pub mod fees;
pub mod manager;
pub mod metrics;
pub mod notify;
pub mod paper;
pub mod position;
pub mod strategy;
pub mod types;

pub use detector::{BasisOpportunity, DetectorConfig, OpportunityDetector};
pub use executor::{
    GatewayError, GatewayFill, OrderGateway, OrderQuantity, OrderRequest, OrderType, TradeExecutor,
};
pub use fees::{BreakevenEstimate, ExchangeFees, FeeSchedule};
pub use manager::{EntryProgress, ExitProgress, PositionManager, RecoveryReport};
pub use metrics::PerformanceReport;
pub use notify::{LogNotifier, Notifier};
pub use paper::PaperGateway;
pub use position::{ClosedPositionRecord, Position, PositionState};
pub use strategy::{spawn_poll_feed, BasisTradeStrategy};
pub use types::{
    LegFill, LegKind, PairFills, Side, TradeAction, TradeDirection, TradeSignal,
};
