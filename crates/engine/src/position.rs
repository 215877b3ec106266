//! Position lifecycle state and P&L.
//!
//! A position moves through a small state machine owned by the position
//! manager:
//!
//! ```text
//! Reserved ──entry legs ok──▶ Open ──begin_exit──▶ ExitPending ──exit legs ok──▶ Closed
//!     │                        ▲                        │
//!     └──any entry leg fails──▶ Released               └──any exit leg fails──▶ back to Open
//! ```
//!
//! Illegal transitions are unrepresentable through the manager's commands;
//! the strategy and executor only ever observe cloned snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use basis_arb_core::cache::keys;

use crate::types::{LegFill, LegKind, TradeDirection};

// =============================================================================
// Position State
// =============================================================================

/// Lifecycle state of a basis trade position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionState {
    /// Capacity reserved, entry legs not yet confirmed.
    Reserved,
    /// Both entry legs filled; collecting funding.
    Open,
    /// Close signal dispatched, exit legs in flight.
    ExitPending,
    /// Both exit legs filled; P&L finalized.
    Closed,
    /// Entry failed; capacity returned.
    Released,
}

impl PositionState {
    /// Returns true if the position consumes capacity.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Reserved | Self::Open | Self::ExitPending)
    }

    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Open => "open",
            Self::ExitPending => "exit_pending",
            Self::Closed => "closed",
            Self::Released => "released",
        }
    }
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Position
// =============================================================================

/// A basis trade position. Exclusively owned by the position manager;
/// everything outside sees clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Unique position identifier.
    pub id: Uuid,

    /// Exchange the position lives on.
    pub exchange: String,

    /// Spot symbol.
    pub symbol: String,

    /// Perpetual symbol.
    pub perp_symbol: String,

    /// Trade direction.
    pub direction: TradeDirection,

    /// Lifecycle state.
    pub state: PositionState,

    /// Position notional in USDT.
    pub size_usdt: Decimal,

    /// Entry leg fills (at most one spot, one perp).
    pub entry_fills: Vec<LegFill>,

    /// Exit leg fills from the current close attempt.
    pub exit_fills: Vec<LegFill>,

    /// Funding rate at entry.
    pub entry_funding_rate: Decimal,

    /// Annualized funding rate (percent) at entry.
    pub entry_annualized_pct: Decimal,

    /// Funding accrued since open.
    pub funding_collected: Decimal,

    /// Last time funding was accrued.
    pub last_funding_accrual: DateTime<Utc>,

    /// Failed close attempts so far.
    pub failed_exits: u32,

    /// When capacity was reserved.
    pub reserved_at: DateTime<Utc>,

    /// When the position became open.
    pub opened_at: Option<DateTime<Utc>>,

    /// When the position closed.
    pub closed_at: Option<DateTime<Utc>>,

    /// Final P&L; set if and only if the state is `Closed`.
    pub realized_pnl: Option<Decimal>,
}

impl Position {
    /// Creates a freshly reserved position.
    #[must_use]
    pub fn reserved(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        perp_symbol: impl Into<String>,
        direction: TradeDirection,
        size_usdt: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            exchange: exchange.into(),
            symbol: symbol.into(),
            perp_symbol: perp_symbol.into(),
            direction,
            state: PositionState::Reserved,
            size_usdt,
            entry_fills: Vec::new(),
            exit_fills: Vec::new(),
            entry_funding_rate: Decimal::ZERO,
            entry_annualized_pct: Decimal::ZERO,
            funding_collected: Decimal::ZERO,
            last_funding_accrual: now,
            failed_exits: 0,
            reserved_at: now,
            opened_at: None,
            closed_at: None,
            realized_pnl: None,
        }
    }

    /// Cache key this position persists under.
    #[must_use]
    pub fn cache_key(&self) -> String {
        keys::position(&self.exchange, &self.symbol)
    }

    /// Returns the entry fill for a leg, if recorded.
    #[must_use]
    pub fn entry_leg(&self, leg: LegKind) -> Option<&LegFill> {
        self.entry_fills.iter().find(|f| f.leg == leg)
    }

    /// Returns the exit fill for a leg, if recorded.
    #[must_use]
    pub fn exit_leg(&self, leg: LegKind) -> Option<&LegFill> {
        self.exit_fills.iter().find(|f| f.leg == leg)
    }

    /// Returns true once both entry legs have reported.
    #[must_use]
    pub fn entry_complete(&self) -> bool {
        self.entry_leg(LegKind::Spot).is_some() && self.entry_leg(LegKind::Perp).is_some()
    }

    /// Returns true once both exit legs have reported.
    #[must_use]
    pub fn exit_complete(&self) -> bool {
        self.exit_leg(LegKind::Spot).is_some() && self.exit_leg(LegKind::Perp).is_some()
    }

    /// Number of succeeded entry legs.
    #[must_use]
    pub fn succeeded_entry_legs(&self) -> usize {
        self.entry_fills.iter().filter(|f| f.succeeded).count()
    }

    /// Number of succeeded exit legs.
    #[must_use]
    pub fn succeeded_exit_legs(&self) -> usize {
        self.exit_fills.iter().filter(|f| f.succeeded).count()
    }

    /// Spot quantity held, from the entry fill.
    #[must_use]
    pub fn spot_quantity(&self) -> Decimal {
        self.entry_leg(LegKind::Spot)
            .map_or(Decimal::ZERO, |f| f.quantity)
    }

    /// Perp quantity held, from the entry fill.
    #[must_use]
    pub fn perp_quantity(&self) -> Decimal {
        self.entry_leg(LegKind::Perp)
            .map_or(Decimal::ZERO, |f| f.quantity)
    }

    /// Total fees across all recorded fills.
    #[must_use]
    pub fn total_fees(&self) -> Decimal {
        self.entry_fills
            .iter()
            .chain(self.exit_fills.iter())
            .map(|f| f.fee)
            .sum()
    }

    /// Holding time so far (or total, once closed).
    #[must_use]
    pub fn holding_time(&self, now: DateTime<Utc>) -> chrono::Duration {
        let opened = self.opened_at.unwrap_or(self.reserved_at);
        self.closed_at.unwrap_or(now) - opened
    }

    /// Realized P&L from recorded entry and exit fills plus collected
    /// funding, net of all fees.
    ///
    /// Returns `None` until both exit legs have succeeded.
    #[must_use]
    pub fn compute_realized_pnl(&self) -> Option<Decimal> {
        let spot_entry = self.entry_leg(LegKind::Spot).filter(|f| f.succeeded)?;
        let perp_entry = self.entry_leg(LegKind::Perp).filter(|f| f.succeeded)?;
        let spot_exit = self.exit_leg(LegKind::Spot).filter(|f| f.succeeded)?;
        let perp_exit = self.exit_leg(LegKind::Perp).filter(|f| f.succeeded)?;

        let (spot_pnl, perp_pnl) = match self.direction {
            TradeDirection::LongSpotShortPerp => (
                (spot_exit.price - spot_entry.price) * spot_entry.quantity,
                (perp_entry.price - perp_exit.price) * perp_entry.quantity,
            ),
            TradeDirection::ShortSpotLongPerp => (
                (spot_entry.price - spot_exit.price) * spot_entry.quantity,
                (perp_exit.price - perp_entry.price) * perp_entry.quantity,
            ),
        };

        Some(spot_pnl + perp_pnl + self.funding_collected - self.total_fees())
    }

    /// Estimated unrealized P&L for an open position at current prices.
    #[must_use]
    pub fn unrealized_pnl(&self, spot_price: Decimal, perp_price: Decimal) -> Decimal {
        let spot_entry = self
            .entry_leg(LegKind::Spot)
            .map_or(Decimal::ZERO, |f| f.price);
        let perp_entry = self
            .entry_leg(LegKind::Perp)
            .map_or(Decimal::ZERO, |f| f.price);

        let (spot_pnl, perp_pnl) = match self.direction {
            TradeDirection::LongSpotShortPerp => (
                (spot_price - spot_entry) * self.spot_quantity(),
                (perp_entry - perp_price) * self.perp_quantity(),
            ),
            TradeDirection::ShortSpotLongPerp => (
                (spot_entry - spot_price) * self.spot_quantity(),
                (perp_price - perp_entry) * self.perp_quantity(),
            ),
        };

        spot_pnl + perp_pnl + self.funding_collected
    }
}

// =============================================================================
// Closed Position Record
// =============================================================================

/// History record appended to the trade log when a position closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPositionRecord {
    /// Position identifier.
    pub id: Uuid,

    /// Exchange the position was on.
    pub exchange: String,

    /// Spot symbol.
    pub symbol: String,

    /// Trade direction.
    pub direction: TradeDirection,

    /// Position notional in USDT.
    pub size_usdt: Decimal,

    /// When the position opened.
    pub opened_at: DateTime<Utc>,

    /// When the position closed.
    pub closed_at: DateTime<Utc>,

    /// Final realized P&L.
    pub realized_pnl: Decimal,

    /// Funding collected over the holding period.
    pub funding_collected: Decimal,

    /// Why the position was closed.
    pub exit_reason: String,
}

impl ClosedPositionRecord {
    /// Builds the history record for a closed position.
    ///
    /// Returns `None` if the position has not finalized its P&L.
    #[must_use]
    pub fn from_position(position: &Position, exit_reason: impl Into<String>) -> Option<Self> {
        Some(Self {
            id: position.id,
            exchange: position.exchange.clone(),
            symbol: position.symbol.clone(),
            direction: position.direction,
            size_usdt: position.size_usdt,
            opened_at: position.opened_at?,
            closed_at: position.closed_at?,
            realized_pnl: position.realized_pnl?,
            funding_collected: position.funding_collected,
            exit_reason: exit_reason.into(),
        })
    }
}
