//! Shared types for basis trade signals and leg execution.
//!
//! This module defines the immutable data passed between the strategy, the
//! executor, and the position manager: signals, leg fills, and the joined
//! two-leg outcome.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use basis_arb_core::LegName;

// =============================================================================
// Side and Leg Types
// =============================================================================

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Buy the instrument.
    Buy,
    /// Sell the instrument.
    Sell,
}

impl Side {
    /// Returns the opposite side.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which leg of the basis trade an order belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegKind {
    /// The spot leg.
    Spot,
    /// The perpetual leg.
    Perp,
}

impl LegKind {
    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Perp => "perp",
        }
    }

    /// Converts into the error-taxonomy leg name.
    #[must_use]
    pub fn name(self) -> LegName {
        match self {
            Self::Spot => LegName::Spot,
            Self::Perp => LegName::Perp,
        }
    }
}

impl std::fmt::Display for LegKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Direction and Action
// =============================================================================

/// Direction of a basis trade.
///
/// Positive funding pays shorts, so the collecting direction is long spot
/// plus short perp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeDirection {
    /// Long spot, short perpetual — collects positive funding.
    LongSpotShortPerp,
    /// Short spot, long perpetual — collects negative funding.
    ShortSpotLongPerp,
}

impl TradeDirection {
    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LongSpotShortPerp => "long_spot_short_perp",
            Self::ShortSpotLongPerp => "short_spot_long_perp",
        }
    }
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a trade signal asks the executor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeAction {
    /// Open a new position.
    Open,
    /// Close an existing position.
    Close,
}

impl TradeAction {
    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Trade Signal
// =============================================================================

/// An immutable instruction produced by one strategy evaluation.
///
/// Exactly one signal is emitted per evaluation that crosses a threshold;
/// it lives only for the executor handoff and is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    /// Open or close.
    pub action: TradeAction,

    /// Exchange to execute on.
    pub exchange: String,

    /// Spot symbol (e.g. "BTC/USDT").
    pub symbol: String,

    /// Perpetual symbol (e.g. "BTC/USDT:USDT").
    pub perp_symbol: String,

    /// Trade direction.
    pub direction: TradeDirection,

    /// Position notional in USDT.
    pub size_usdt: Decimal,

    /// Funding rate that triggered the signal.
    pub funding_rate: Decimal,

    /// Annualized funding rate (percent) at signal time.
    pub annualized_pct: Decimal,

    /// Human-readable trigger description.
    pub reason: String,

    /// When the signal was generated.
    pub generated_at: DateTime<Utc>,
}

impl TradeSignal {
    /// Creates an open signal.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        perp_symbol: impl Into<String>,
        direction: TradeDirection,
        size_usdt: Decimal,
        funding_rate: Decimal,
        annualized_pct: Decimal,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action: TradeAction::Open,
            exchange: exchange.into(),
            symbol: symbol.into(),
            perp_symbol: perp_symbol.into(),
            direction,
            size_usdt,
            funding_rate,
            annualized_pct,
            reason: reason.into(),
            generated_at: Utc::now(),
        }
    }

    /// Creates a close signal.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn close(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        perp_symbol: impl Into<String>,
        direction: TradeDirection,
        size_usdt: Decimal,
        funding_rate: Decimal,
        annualized_pct: Decimal,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action: TradeAction::Close,
            exchange: exchange.into(),
            symbol: symbol.into(),
            perp_symbol: perp_symbol.into(),
            direction,
            size_usdt,
            funding_rate,
            annualized_pct,
            reason: reason.into(),
            generated_at: Utc::now(),
        }
    }
}

// =============================================================================
// Leg Fills
// =============================================================================

/// Outcome of one leg order attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegFill {
    /// Which leg this fill belongs to.
    pub leg: LegKind,

    /// Order side.
    pub side: Side,

    /// Instrument symbol.
    pub symbol: String,

    /// Fill price; zero for a failed leg.
    pub price: Decimal,

    /// Filled quantity in base units; zero for a failed leg.
    pub quantity: Decimal,

    /// Fee charged in quote currency.
    pub fee: Decimal,

    /// When the attempt completed.
    pub filled_at: DateTime<Utc>,

    /// Whether the leg filled.
    pub succeeded: bool,

    /// Failure reason for an unsuccessful leg.
    pub error: Option<String>,
}

impl LegFill {
    /// Creates a successful fill.
    #[must_use]
    pub fn filled(
        leg: LegKind,
        side: Side,
        symbol: impl Into<String>,
        price: Decimal,
        quantity: Decimal,
        fee: Decimal,
    ) -> Self {
        Self {
            leg,
            side,
            symbol: symbol.into(),
            price,
            quantity,
            fee,
            filled_at: Utc::now(),
            succeeded: true,
            error: None,
        }
    }

    /// Creates a failed leg outcome.
    #[must_use]
    pub fn failed(
        leg: LegKind,
        side: Side,
        symbol: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            leg,
            side,
            symbol: symbol.into(),
            price: Decimal::ZERO,
            quantity: Decimal::ZERO,
            fee: Decimal::ZERO,
            filled_at: Utc::now(),
            succeeded: false,
            error: Some(error.into()),
        }
    }

    /// Fill notional (price × quantity).
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// The joined outcome of one signal's two legs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairFills {
    /// Spot leg outcome.
    pub spot: LegFill,

    /// Perpetual leg outcome.
    pub perp: LegFill,
}

impl PairFills {
    /// Returns true if both legs filled.
    #[must_use]
    pub fn both_succeeded(&self) -> bool {
        self.spot.succeeded && self.perp.succeeded
    }

    /// Returns true if exactly one leg filled — unhedged exposure.
    #[must_use]
    pub fn partial_exposure(&self) -> bool {
        self.spot.succeeded != self.perp.succeeded
    }

    /// Total fees across both legs.
    #[must_use]
    pub fn total_fees(&self) -> Decimal {
        self.spot.fee + self.perp.fee
    }
}
