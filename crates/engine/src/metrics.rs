//! Performance reporting over the closed-trade history.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::position::{ClosedPositionRecord, Position};

/// Aggregated performance and capital metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceReport {
    /// Number of closed trades.
    pub total_trades: u32,

    /// Fraction of closed trades with positive P&L (0.0 to 1.0).
    pub win_rate: f64,

    /// Sum of realized P&L across closed trades.
    pub total_realized_pnl: Decimal,

    /// Average realized P&L per closed trade.
    pub avg_pnl_per_trade: Decimal,

    /// Funding collected across closed trades.
    pub total_funding_collected: Decimal,

    /// Funding collected as a percentage of closed notional.
    pub funding_yield_pct: Decimal,

    /// Notional currently deployed in live positions.
    pub capital_deployed: Decimal,

    /// Number of live positions.
    pub open_positions: u32,
}

impl PerformanceReport {
    /// Builds a report from the trade history and the live snapshot.
    #[must_use]
    pub fn from_history(history: &[ClosedPositionRecord], open: &[Position]) -> Self {
        let total_trades = history.len() as u32;
        let total_realized_pnl: Decimal = history.iter().map(|t| t.realized_pnl).sum();
        let total_funding: Decimal = history.iter().map(|t| t.funding_collected).sum();
        let total_size: Decimal = history.iter().map(|t| t.size_usdt).sum();
        let wins = history
            .iter()
            .filter(|t| t.realized_pnl > Decimal::ZERO)
            .count();

        let win_rate = if history.is_empty() {
            0.0
        } else {
            wins as f64 / history.len() as f64
        };
        let avg_pnl = if total_trades == 0 {
            Decimal::ZERO
        } else {
            total_realized_pnl / Decimal::from(total_trades)
        };
        let funding_yield = if total_size.is_zero() {
            Decimal::ZERO
        } else {
            total_funding / total_size * dec!(100)
        };

        Self {
            total_trades,
            win_rate,
            total_realized_pnl,
            avg_pnl_per_trade: avg_pnl,
            total_funding_collected: total_funding,
            funding_yield_pct: funding_yield,
            capital_deployed: open.iter().map(|p| p.size_usdt).sum(),
            open_positions: open.len() as u32,
        }
    }
}

impl std::fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "trades:           {:>8}", self.total_trades)?;
        writeln!(f, "win rate:         {:>7.1}%", self.win_rate * 100.0)?;
        writeln!(f, "realized pnl:    ${:>10}", self.total_realized_pnl.round_dp(4).to_string())?;
        writeln!(f, "avg pnl/trade:   ${:>10}", self.avg_pnl_per_trade.round_dp(4).to_string())?;
        writeln!(f, "funding:         ${:>10}", self.total_funding_collected.round_dp(4).to_string())?;
        writeln!(f, "funding yield:    {:>7}%", self.funding_yield_pct.round_dp(2).to_string())?;
        writeln!(f, "deployed:        ${:>10}", self.capital_deployed.round_dp(2).to_string())?;
        write!(f, "open positions:   {:>8}", self.open_positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeDirection;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(pnl: Decimal, funding: Decimal, size: Decimal) -> ClosedPositionRecord {
        ClosedPositionRecord {
            id: Uuid::new_v4(),
            exchange: "okx".to_string(),
            symbol: "BTC/USDT".to_string(),
            direction: TradeDirection::LongSpotShortPerp,
            size_usdt: size,
            opened_at: Utc::now(),
            closed_at: Utc::now(),
            realized_pnl: pnl,
            funding_collected: funding,
            exit_reason: "funding_drop".to_string(),
        }
    }

    #[test]
    fn test_empty_history() {
        let report = PerformanceReport::from_history(&[], &[]);
        assert_eq!(report.total_trades, 0);
        assert!(report.win_rate.abs() < f64::EPSILON);
        assert_eq!(report.total_realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_aggregates() {
        let history = vec![
            record(dec!(5), dec!(3), dec!(100)),
            record(dec!(-1), dec!(1), dec!(100)),
            record(dec!(2), dec!(2), dec!(200)),
        ];
        let report = PerformanceReport::from_history(&history, &[]);

        assert_eq!(report.total_trades, 3);
        assert_eq!(report.total_realized_pnl, dec!(6));
        assert_eq!(report.avg_pnl_per_trade, dec!(2));
        assert_eq!(report.total_funding_collected, dec!(6));
        assert_eq!(report.funding_yield_pct, dec!(1.5));
        assert!((report.win_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_capital_deployed_from_open_positions() {
        let open = vec![
            Position::reserved(
                "okx",
                "BTC/USDT",
                "BTC/USDT:USDT",
                TradeDirection::LongSpotShortPerp,
                dec!(250),
                Utc::now(),
            ),
            Position::reserved(
                "bitget",
                "ETH/USDT",
                "ETH/USDT:USDT",
                TradeDirection::LongSpotShortPerp,
                dec!(180),
                Utc::now(),
            ),
        ];
        let report = PerformanceReport::from_history(&[], &open);

        assert_eq!(report.capital_deployed, dec!(430));
        assert_eq!(report.open_positions, 2);
    }
}
