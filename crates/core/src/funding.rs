//! Perpetual funding rate entries and annualization.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Hours in a (non-leap) year, used to annualize per-interval rates.
const HOURS_PER_YEAR: u32 = 8760;

/// Converts a spot symbol to its linear perpetual symbol.
///
/// `BTC/USDT` becomes `BTC/USDT:USDT`; symbols that already carry a
/// settlement suffix are returned unchanged.
#[must_use]
pub fn spot_to_perp(symbol: &str) -> String {
    if symbol.contains(':') {
        return symbol.to_string();
    }
    let quote = symbol.split('/').nth(1).unwrap_or("USDT");
    format!("{symbol}:{quote}")
}

/// A single funding rate observation for one (exchange, perp symbol) pair.
///
/// The `rate` is the per-interval fraction the exchange publishes (e.g.
/// `0.0001` = 0.01% per 8h period). Positive funding means perpetual longs
/// pay shorts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRateEntry {
    /// Exchange identifier.
    pub exchange: String,

    /// Perpetual symbol (e.g. "BTC/USDT:USDT").
    pub symbol: String,

    /// Spot symbol the perp settles against (e.g. "BTC/USDT").
    pub spot_symbol: String,

    /// Funding rate per interval, as a fraction.
    pub rate: Decimal,

    /// Length of one funding interval in hours (8 on most venues).
    pub interval_hours: u32,

    /// Time of the next scheduled funding exchange, if known.
    pub next_funding_time: Option<DateTime<Utc>>,

    /// When this observation was taken.
    pub timestamp: DateTime<Utc>,
}

impl FundingRateEntry {
    /// Creates an entry with the standard 8-hour interval.
    #[must_use]
    pub fn new(
        exchange: impl Into<String>,
        spot_symbol: impl Into<String>,
        rate: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let spot_symbol = spot_symbol.into();
        Self {
            exchange: exchange.into(),
            symbol: spot_to_perp(&spot_symbol),
            spot_symbol,
            rate,
            interval_hours: 8,
            next_funding_time: None,
            timestamp,
        }
    }

    /// Sets a non-standard funding interval.
    #[must_use]
    pub fn with_interval_hours(mut self, hours: u32) -> Self {
        self.interval_hours = hours.max(1);
        self
    }

    /// Annualized funding rate as a percentage.
    ///
    /// `rate * (8760 / interval_hours) * 100`; an 8h interval pays
    /// 3 * 365 = 1095 times per year.
    #[must_use]
    pub fn annualized_pct(&self) -> Decimal {
        let periods_per_year = Decimal::from(HOURS_PER_YEAR) / Decimal::from(self.interval_hours.max(1));
        self.rate * periods_per_year * Decimal::ONE_HUNDRED
    }

    /// Funding rate as a plain percentage per interval.
    #[must_use]
    pub fn rate_pct(&self) -> Decimal {
        self.rate * Decimal::ONE_HUNDRED
    }

    /// One funding interval as a `Duration`.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::hours(i64::from(self.interval_hours.max(1)))
    }

    /// Age of the observation relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }

    /// Returns true if the observation is older than `max_age`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }
}
