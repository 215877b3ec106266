//! Deterministic paper-trading gateway.
//!
//! Fills market orders at the best bid/ask from the cache's latest price
//! snapshot and charges the schedule's taker fee. No slippage model, no
//! partial fills — the simulator is intentionally deterministic so paper
//! runs are reproducible from the same cache contents.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use basis_arb_core::CacheStore;

use crate::executor::{GatewayError, GatewayFill, OrderGateway, OrderQuantity, OrderRequest};
use crate::fees::FeeSchedule;
use crate::types::{LegKind, Side};

/// Paper-trading implementation of [`OrderGateway`].
pub struct PaperGateway {
    cache: Arc<dyn CacheStore>,
    fees: FeeSchedule,
    max_snapshot_age: Duration,
}

impl PaperGateway {
    /// Creates a paper gateway reading prices from `cache`.
    #[must_use]
    pub fn new(cache: Arc<dyn CacheStore>, fees: FeeSchedule, max_snapshot_age_secs: i64) -> Self {
        Self {
            cache,
            fees,
            max_snapshot_age: Duration::seconds(max_snapshot_age_secs),
        }
    }

    /// Spot symbol used for the price lookup; perp symbols share the spot
    /// book in the simulator (basis spread is negligible at this level).
    fn lookup_symbol(symbol: &str) -> &str {
        symbol.split(':').next().unwrap_or(symbol)
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place_order(&self, request: &OrderRequest) -> Result<GatewayFill, GatewayError> {
        let symbol = Self::lookup_symbol(&request.symbol);
        let snapshot = self
            .cache
            .latest_snapshot(&request.exchange, symbol)
            .await
            .map_err(|e| GatewayError::Transient(e.to_string()))?
            .ok_or_else(|| {
                GatewayError::Rejected(format!(
                    "no market data for {}:{symbol}",
                    request.exchange
                ))
            })?;

        let now = Utc::now();
        if snapshot.is_stale(now, self.max_snapshot_age) {
            return Err(GatewayError::Rejected(format!(
                "market data for {}:{symbol} is {}s old",
                request.exchange,
                snapshot.age(now).num_seconds()
            )));
        }

        // Market orders cross the spread.
        let price = match request.side {
            Side::Buy => snapshot.ask,
            Side::Sell => snapshot.bid,
        };
        if price <= Decimal::ZERO {
            return Err(GatewayError::Rejected(format!(
                "no {} liquidity for {}:{symbol}",
                request.side, request.exchange
            )));
        }

        let quantity = match request.quantity {
            OrderQuantity::Base(q) => q,
            OrderQuantity::Notional(n) => n / price,
        };
        if quantity <= Decimal::ZERO {
            return Err(GatewayError::Rejected("zero quantity".to_string()));
        }

        let notional = price * quantity;
        let fee = self
            .fees
            .taker_fee(&request.exchange, notional, request.leg == LegKind::Perp);

        Ok(GatewayFill {
            price,
            quantity,
            fee,
        })
    }
}
