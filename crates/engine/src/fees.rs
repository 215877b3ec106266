//! Fee schedules and breakeven estimation for basis trades.
//!
//! Entry legs cross the spread as market orders (taker), exits target
//! maker pricing on the perp leg. Breakeven answers: how many funding
//! periods must a position collect before round-trip fees are covered?

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use basis_arb_core::ExchangeConfig;

/// Maximum funding periods to breakeven for a viable entry (3 days at 8h
/// intervals).
pub const MAX_BREAKEVEN_PERIODS: u32 = 9;

// =============================================================================
// Fee Schedule
// =============================================================================

/// Fee rates for one exchange, as fractions of notional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeFees {
    /// Spot taker fee.
    pub spot: Decimal,

    /// Perpetual maker fee.
    pub perp_maker: Decimal,

    /// Perpetual taker fee.
    pub perp_taker: Decimal,
}

impl Default for ExchangeFees {
    fn default() -> Self {
        Self {
            spot: dec!(0.001),
            perp_maker: dec!(0.0005),
            perp_taker: dec!(0.001),
        }
    }
}

/// Per-exchange fee lookup with safe defaults for unknown venues.
#[derive(Debug, Clone, Default)]
pub struct FeeSchedule {
    fees: HashMap<String, ExchangeFees>,
}

impl FeeSchedule {
    /// Creates a schedule with the standard (non-VIP) rates for the
    /// supported venues.
    #[must_use]
    pub fn standard() -> Self {
        let mut fees = HashMap::new();
        fees.insert(
            "bitget".to_string(),
            ExchangeFees {
                spot: dec!(0.001),
                perp_maker: dec!(0.0002),
                perp_taker: dec!(0.0006),
            },
        );
        fees.insert(
            "okx".to_string(),
            ExchangeFees {
                spot: dec!(0.001),
                perp_maker: dec!(0.0002),
                perp_taker: dec!(0.0005),
            },
        );
        fees.insert(
            "mexc".to_string(),
            ExchangeFees {
                spot: dec!(0.0002),
                perp_maker: Decimal::ZERO,
                perp_taker: dec!(0.0006),
            },
        );
        Self { fees }
    }

    /// Builds a schedule from configured exchanges, overriding the taker
    /// rates with each exchange's configured `taker_fee_pct`.
    #[must_use]
    pub fn from_config(exchanges: &[ExchangeConfig]) -> Self {
        let mut schedule = Self::standard();
        for exchange in exchanges {
            let taker = exchange.taker_fee_pct / Decimal::ONE_HUNDRED;
            let entry = schedule
                .fees
                .entry(exchange.id.clone())
                .or_insert_with(ExchangeFees::default);
            entry.spot = taker;
            entry.perp_taker = taker;
        }
        schedule
    }

    /// Returns the fees for an exchange, falling back to defaults for
    /// unknown venues.
    #[must_use]
    pub fn for_exchange(&self, exchange: &str) -> ExchangeFees {
        self.fees.get(exchange).copied().unwrap_or_default()
    }

    /// Taker fee charged on one leg's notional.
    #[must_use]
    pub fn taker_fee(&self, exchange: &str, notional: Decimal, perp: bool) -> Decimal {
        let fees = self.for_exchange(exchange);
        let rate = if perp { fees.perp_taker } else { fees.spot };
        notional * rate
    }
}

// =============================================================================
// Breakeven Estimation
// =============================================================================

/// Round-trip cost versus funding income for a prospective position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakevenEstimate {
    /// Entry cost: spot taker + perp taker on the full notional.
    pub entry_cost_usdt: Decimal,

    /// Exit cost: spot taker + perp maker on the full notional.
    pub exit_cost_usdt: Decimal,

    /// Entry + exit cost.
    pub total_cost_usdt: Decimal,

    /// Funding collected per period at the current rate.
    pub funding_per_period: Decimal,

    /// Periods of funding needed to cover `total_cost_usdt`; `None` when
    /// the rate produces no income.
    pub breakeven_periods: Option<Decimal>,
}

impl BreakevenEstimate {
    /// Estimates breakeven for a position of `size_usdt` at the given
    /// per-period funding rate.
    #[must_use]
    pub fn calculate(
        size_usdt: Decimal,
        funding_rate: Decimal,
        exchange: &str,
        schedule: &FeeSchedule,
    ) -> Self {
        let fees = schedule.for_exchange(exchange);

        let entry_cost = size_usdt * (fees.spot + fees.perp_taker);
        let exit_cost = size_usdt * (fees.spot + fees.perp_maker);
        let total_cost = entry_cost + exit_cost;

        let funding_per_period = size_usdt * funding_rate;
        let breakeven_periods = if funding_per_period > Decimal::ZERO {
            Some(total_cost / funding_per_period)
        } else {
            None
        };

        Self {
            entry_cost_usdt: entry_cost,
            exit_cost_usdt: exit_cost,
            total_cost_usdt: total_cost,
            funding_per_period,
            breakeven_periods,
        }
    }

    /// Breakeven expressed in hours for the given funding interval.
    #[must_use]
    pub fn breakeven_hours(&self, interval_hours: u32) -> Option<Decimal> {
        self.breakeven_periods
            .map(|p| p * Decimal::from(interval_hours))
    }

    /// Returns true when the position covers its fees within
    /// [`MAX_BREAKEVEN_PERIODS`].
    #[must_use]
    pub fn viable(&self) -> bool {
        self.breakeven_periods
            .is_some_and(|p| p < Decimal::from(MAX_BREAKEVEN_PERIODS))
    }
}
