//! Funding-rate arbitrage opportunity detection.
//!
//! The detector is a pure function of a single funding rate entry: it
//! normalizes the per-interval rate into an annualized percentage, applies
//! the freshness and magnitude gates, and reports the collecting direction.
//! No I/O, no side effects — the strategy decides what to do with the
//! result.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::trace;

use basis_arb_core::{CoreError, FundingRateEntry};

use crate::types::TradeDirection;

// =============================================================================
// Detection Configuration
// =============================================================================

/// Configuration for opportunity detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Minimum absolute annualized rate (percent) to report an opportunity.
    pub min_abs_annualized_pct: Decimal,

    /// Entries older than this are rejected as stale.
    pub max_entry_age_secs: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_abs_annualized_pct: dec!(5),
            max_entry_age_secs: 600,
        }
    }
}

impl DetectorConfig {
    /// Creates a conservative configuration that only reports strong
    /// opportunities on fresh data.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            min_abs_annualized_pct: dec!(10),
            max_entry_age_secs: 300,
        }
    }

    /// Sets the minimum absolute annualized rate.
    #[must_use]
    pub fn with_min_abs_annualized_pct(mut self, pct: Decimal) -> Self {
        self.min_abs_annualized_pct = pct;
        self
    }

    /// Sets the maximum acceptable entry age.
    #[must_use]
    pub fn with_max_entry_age_secs(mut self, secs: i64) -> Self {
        self.max_entry_age_secs = secs;
        self
    }
}

// =============================================================================
// Basis Opportunity
// =============================================================================

/// A normalized funding arbitrage signal, recomputed on every evaluation
/// and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasisOpportunity {
    /// Exchange the funding rate was observed on.
    pub exchange: String,

    /// Perpetual symbol.
    pub symbol: String,

    /// Spot symbol of the pair.
    pub spot_symbol: String,

    /// Per-interval funding rate.
    pub funding_rate: Decimal,

    /// Annualized funding rate as a percentage.
    pub annualized_pct: Decimal,

    /// Direction that collects the funding premium.
    pub direction: TradeDirection,

    /// When the opportunity was derived.
    pub detected_at: DateTime<Utc>,
}

impl BasisOpportunity {
    /// Returns true for the long-spot/short-perp direction, the only one
    /// the strategy enters.
    #[must_use]
    pub fn collects_positive_funding(&self) -> bool {
        self.direction == TradeDirection::LongSpotShortPerp
    }
}

// =============================================================================
// Opportunity Detector
// =============================================================================

/// Derives [`BasisOpportunity`] values from raw funding rate entries.
#[derive(Debug, Clone, Default)]
pub struct OpportunityDetector {
    config: DetectorConfig,
}

impl OpportunityDetector {
    /// Creates a detector with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a detector with custom configuration.
    #[must_use]
    pub fn with_config(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Evaluates one funding entry.
    ///
    /// Returns `Ok(None)` when the rate is zero or the annualized magnitude
    /// is below threshold.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StaleData`] when the entry is older than the
    /// configured maximum age; the evaluation is skipped, not retried.
    pub fn detect(
        &self,
        entry: &FundingRateEntry,
        now: DateTime<Utc>,
    ) -> Result<Option<BasisOpportunity>, CoreError> {
        let age = entry.age(now);
        let max_age = Duration::seconds(self.config.max_entry_age_secs);
        if age > max_age {
            return Err(CoreError::StaleData {
                exchange: entry.exchange.clone(),
                symbol: entry.spot_symbol.clone(),
                age_secs: age.num_seconds(),
                max_age_secs: self.config.max_entry_age_secs,
            });
        }

        if entry.rate.is_zero() {
            return Ok(None);
        }

        let annualized = entry.annualized_pct();
        if annualized.abs() < self.config.min_abs_annualized_pct {
            trace!(
                exchange = %entry.exchange,
                symbol = %entry.spot_symbol,
                annualized_pct = %annualized,
                min_pct = %self.config.min_abs_annualized_pct,
                "Annualized rate below detection threshold"
            );
            return Ok(None);
        }

        let direction = if entry.rate > Decimal::ZERO {
            TradeDirection::LongSpotShortPerp
        } else {
            TradeDirection::ShortSpotLongPerp
        };

        Ok(Some(BasisOpportunity {
            exchange: entry.exchange.clone(),
            symbol: entry.symbol.clone(),
            spot_symbol: entry.spot_symbol.clone(),
            funding_rate: entry.rate,
            annualized_pct: annualized,
            direction,
            detected_at: now,
        }))
    }
}
