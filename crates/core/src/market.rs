//! Market data snapshots produced by the ingestion layer.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest top-of-book state for one (exchange, symbol) pair.
///
/// Produced by the ingestion tasks and read-only to the engine. A snapshot
/// older than the configured staleness threshold must not be used in a
/// trading decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Exchange identifier (e.g. "okx").
    pub exchange: String,

    /// Spot symbol (e.g. "BTC/USDT").
    pub symbol: String,

    /// Best bid price.
    pub bid: Decimal,

    /// Best ask price.
    pub ask: Decimal,

    /// Size available at the best bid.
    pub bid_volume: Decimal,

    /// Size available at the best ask.
    pub ask_volume: Decimal,

    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

impl PriceSnapshot {
    /// Midpoint between best bid and best ask.
    #[must_use]
    pub fn mid_price(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Bid/ask spread as a percentage of the bid.
    ///
    /// Returns zero for a zero bid rather than dividing by it.
    #[must_use]
    pub fn spread_pct(&self) -> Decimal {
        if self.bid.is_zero() {
            return Decimal::ZERO;
        }
        (self.ask - self.bid) / self.bid * Decimal::ONE_HUNDRED
    }

    /// Age of the snapshot relative to `now`.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }

    /// Returns true if the snapshot is older than `max_age`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.age(now) > max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(bid: Decimal, ask: Decimal) -> PriceSnapshot {
        PriceSnapshot {
            exchange: "okx".to_string(),
            symbol: "BTC/USDT".to_string(),
            bid,
            ask,
            bid_volume: dec!(1.5),
            ask_volume: dec!(2.0),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_mid_price() {
        let snap = snapshot(dec!(100), dec!(102));
        assert_eq!(snap.mid_price(), dec!(101));
    }

    #[test]
    fn test_spread_pct() {
        let snap = snapshot(dec!(100), dec!(100.5));
        assert_eq!(snap.spread_pct(), dec!(0.5));
    }

    #[test]
    fn test_spread_pct_zero_bid() {
        let snap = snapshot(Decimal::ZERO, dec!(100));
        assert_eq!(snap.spread_pct(), Decimal::ZERO);
    }

    #[test]
    fn test_staleness() {
        let mut snap = snapshot(dec!(100), dec!(101));
        let now = Utc::now();

        snap.timestamp = now - Duration::seconds(30);
        assert!(!snap.is_stale(now, Duration::seconds(60)));

        snap.timestamp = now - Duration::seconds(120);
        assert!(snap.is_stale(now, Duration::seconds(60)));
    }

    #[test]
    fn test_serialization_round_trip() {
        let snap = snapshot(dec!(42000.5), dec!(42001));
        let json = serde_json::to_string(&snap).unwrap();
        let back: PriceSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snap, back);
    }
}
