//! Coordinated two-leg trade execution.
//!
//! The executor turns an approved signal into a pair of leg orders against
//! an [`OrderGateway`] — the paper simulator or a live exchange client.
//! Both legs are dispatched concurrently and joined, so one leg's latency
//! or failure never extends the other's exposure window. The executor
//! never touches position state; it only reports [`LegFill`] outcomes to
//! its caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use basis_arb_core::ExecutorConfig;

use crate::types::{LegFill, LegKind, PairFills, Side, TradeDirection, TradeSignal};

// =============================================================================
// Gateway Port
// =============================================================================

/// How much to trade, resolved by the gateway at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderQuantity {
    /// Quantity in base units (used for closes, where holdings are known).
    Base(Decimal),
    /// Quote notional to convert at the fill price (used for opens).
    Notional(Decimal),
}

/// Order type for a leg order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Cross the spread immediately.
    Market,
}

/// A single leg order handed to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Exchange to route to.
    pub exchange: String,

    /// Instrument symbol.
    pub symbol: String,

    /// Which market the symbol lives in.
    pub leg: LegKind,

    /// Order side.
    pub side: Side,

    /// Amount to trade.
    pub quantity: OrderQuantity,

    /// Order type.
    pub order_type: OrderType,
}

/// A fill reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayFill {
    /// Average fill price.
    pub price: Decimal,

    /// Filled quantity in base units.
    pub quantity: Decimal,

    /// Fee charged in quote currency.
    pub fee: Decimal,
}

/// Gateway-level failures.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Network-level failure worth one bounded retry.
    #[error("transient gateway failure: {0}")]
    Transient(String),

    /// Terminal rejection (insufficient balance, unknown symbol, ...).
    #[error("order rejected: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Returns true for failures worth a bounded retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Order placement port implemented by the paper simulator and live
/// exchange clients.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Places one leg order and reports the fill.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Transient`] for retryable network failures
    /// and [`GatewayError::Rejected`] for terminal rejections.
    async fn place_order(&self, request: &OrderRequest) -> Result<GatewayFill, GatewayError>;
}

// =============================================================================
// Trade Executor
// =============================================================================

/// Executes a signal's two legs against a gateway.
pub struct TradeExecutor {
    gateway: Arc<dyn OrderGateway>,
    leg_timeout: Duration,
    max_leg_retries: u32,
}

impl std::fmt::Debug for TradeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeExecutor")
            .field("leg_timeout", &self.leg_timeout)
            .field("max_leg_retries", &self.max_leg_retries)
            .finish()
    }
}

impl TradeExecutor {
    /// Creates an executor over the given gateway.
    #[must_use]
    pub fn new(gateway: Arc<dyn OrderGateway>, config: &ExecutorConfig) -> Self {
        Self {
            gateway,
            leg_timeout: Duration::from_secs(config.leg_timeout_secs),
            max_leg_retries: config.max_leg_retries,
        }
    }

    /// Executes an open signal: both entry legs sized from the signal's
    /// notional, dispatched concurrently, outcomes joined.
    pub async fn execute_open(&self, signal: &TradeSignal) -> PairFills {
        let (spot_side, perp_side) = entry_sides(signal.direction);

        let spot_request = OrderRequest {
            exchange: signal.exchange.clone(),
            symbol: signal.symbol.clone(),
            leg: LegKind::Spot,
            side: spot_side,
            quantity: OrderQuantity::Notional(signal.size_usdt),
            order_type: OrderType::Market,
        };
        let perp_request = OrderRequest {
            exchange: signal.exchange.clone(),
            symbol: signal.perp_symbol.clone(),
            leg: LegKind::Perp,
            side: perp_side,
            quantity: OrderQuantity::Notional(signal.size_usdt),
            order_type: OrderType::Market,
        };

        let (spot, perp) = tokio::join!(
            self.run_leg(spot_request),
            self.run_leg(perp_request)
        );

        debug!(
            exchange = %signal.exchange,
            symbol = %signal.symbol,
            spot_ok = spot.succeeded,
            perp_ok = perp.succeeded,
            "Open execution joined"
        );

        PairFills { spot, perp }
    }

    /// Executes a close signal for the given held quantities.
    pub async fn execute_close(
        &self,
        signal: &TradeSignal,
        spot_quantity: Decimal,
        perp_quantity: Decimal,
    ) -> PairFills {
        let (spot_side, perp_side) = entry_sides(signal.direction);

        let spot_request = OrderRequest {
            exchange: signal.exchange.clone(),
            symbol: signal.symbol.clone(),
            leg: LegKind::Spot,
            side: spot_side.opposite(),
            quantity: OrderQuantity::Base(spot_quantity),
            order_type: OrderType::Market,
        };
        let perp_request = OrderRequest {
            exchange: signal.exchange.clone(),
            symbol: signal.perp_symbol.clone(),
            leg: LegKind::Perp,
            side: perp_side.opposite(),
            quantity: OrderQuantity::Base(perp_quantity),
            order_type: OrderType::Market,
        };

        let (spot, perp) = tokio::join!(
            self.run_leg(spot_request),
            self.run_leg(perp_request)
        );

        debug!(
            exchange = %signal.exchange,
            symbol = %signal.symbol,
            spot_ok = spot.succeeded,
            perp_ok = perp.succeeded,
            "Close execution joined"
        );

        PairFills { spot, perp }
    }

    /// Runs one leg with its timeout and bounded transient retry.
    ///
    /// An elapsed timeout is terminal for the attempt — a leg is never
    /// left pending.
    async fn run_leg(&self, request: OrderRequest) -> LegFill {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let attempt = tokio::time::timeout(self.leg_timeout, self.gateway.place_order(&request));

            match attempt.await {
                Ok(Ok(fill)) => {
                    return LegFill::filled(
                        request.leg,
                        request.side,
                        request.symbol,
                        fill.price,
                        fill.quantity,
                        fill.fee,
                    );
                }
                Ok(Err(e)) if e.is_transient() && attempts <= self.max_leg_retries => {
                    warn!(
                        exchange = %request.exchange,
                        symbol = %request.symbol,
                        leg = %request.leg,
                        attempt = attempts,
                        error = %e,
                        "Transient leg failure; retrying"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        exchange = %request.exchange,
                        symbol = %request.symbol,
                        leg = %request.leg,
                        error = %e,
                        "Leg execution failed"
                    );
                    return LegFill::failed(request.leg, request.side, request.symbol, e.to_string());
                }
                Err(_) => {
                    warn!(
                        exchange = %request.exchange,
                        symbol = %request.symbol,
                        leg = %request.leg,
                        timeout_secs = self.leg_timeout.as_secs(),
                        "Leg timed out"
                    );
                    return LegFill::failed(
                        request.leg,
                        request.side,
                        request.symbol,
                        format!("timed out after {}s", self.leg_timeout.as_secs()),
                    );
                }
            }
        }
    }
}

/// Entry sides for a direction: the close uses the opposites.
fn entry_sides(direction: TradeDirection) -> (Side, Side) {
    match direction {
        TradeDirection::LongSpotShortPerp => (Side::Buy, Side::Sell),
        TradeDirection::ShortSpotLongPerp => (Side::Sell, Side::Buy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    /// Gateway scripted per symbol: each call pops the next response.
    #[derive(Default)]
    struct ScriptedGateway {
        responses: Mutex<HashMap<String, Vec<Result<GatewayFill, GatewayError>>>>,
        calls: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl ScriptedGateway {
        fn script(
            &self,
            symbol: &str,
            responses: Vec<Result<GatewayFill, GatewayError>>,
        ) {
            self.responses
                .lock()
                .insert(symbol.to_string(), responses);
        }

        fn call_count(&self, symbol: &str) -> usize {
            self.calls.lock().iter().filter(|s| *s == symbol).count()
        }
    }

    #[async_trait]
    impl OrderGateway for ScriptedGateway {
        async fn place_order(&self, request: &OrderRequest) -> Result<GatewayFill, GatewayError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().push(request.symbol.clone());
            let mut responses = self.responses.lock();
            responses
                .get_mut(&request.symbol)
                .and_then(|queue| {
                    if queue.is_empty() {
                        None
                    } else {
                        Some(queue.remove(0))
                    }
                })
                .unwrap_or_else(|| Err(GatewayError::Rejected("no scripted response".to_string())))
        }
    }

    fn fill(price: Decimal) -> Result<GatewayFill, GatewayError> {
        Ok(GatewayFill {
            price,
            quantity: dec!(1),
            fee: dec!(0.1),
        })
    }

    fn open_signal() -> TradeSignal {
        TradeSignal::open(
            "okx",
            "BTC/USDT",
            "BTC/USDT:USDT",
            TradeDirection::LongSpotShortPerp,
            dec!(100),
            dec!(0.0001),
            dec!(10.95),
            "test",
        )
    }

    fn executor(gateway: Arc<ScriptedGateway>) -> TradeExecutor {
        let config = ExecutorConfig {
            leg_timeout_secs: 1,
            max_leg_retries: 1,
            paper: true,
        };
        TradeExecutor::new(gateway, &config)
    }

    // ==================== Happy Path Tests ====================

    #[tokio::test]
    async fn test_execute_open_both_legs_fill() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.script("BTC/USDT", vec![fill(dec!(100))]);
        gateway.script("BTC/USDT:USDT", vec![fill(dec!(100))]);

        let fills = executor(Arc::clone(&gateway)).execute_open(&open_signal()).await;

        assert!(fills.both_succeeded());
        assert_eq!(fills.spot.side, Side::Buy);
        assert_eq!(fills.perp.side, Side::Sell);
        assert_eq!(fills.total_fees(), dec!(0.2));
    }

    #[tokio::test]
    async fn test_execute_close_inverts_sides() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.script("BTC/USDT", vec![fill(dec!(102))]);
        gateway.script("BTC/USDT:USDT", vec![fill(dec!(97))]);

        let fills = executor(Arc::clone(&gateway))
            .execute_close(&open_signal(), dec!(1), dec!(1))
            .await;

        assert!(fills.both_succeeded());
        assert_eq!(fills.spot.side, Side::Sell);
        assert_eq!(fills.perp.side, Side::Buy);
    }

    // ==================== Failure Path Tests ====================

    #[tokio::test]
    async fn test_one_leg_rejection_does_not_block_other() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.script("BTC/USDT", vec![fill(dec!(100))]);
        gateway.script(
            "BTC/USDT:USDT",
            vec![Err(GatewayError::Rejected("insufficient balance".to_string()))],
        );

        let fills = executor(Arc::clone(&gateway)).execute_open(&open_signal()).await;

        assert!(fills.spot.succeeded);
        assert!(!fills.perp.succeeded);
        assert!(fills.partial_exposure());
        assert!(fills
            .perp
            .error
            .as_deref()
            .unwrap()
            .contains("insufficient balance"));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_once() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.script(
            "BTC/USDT",
            vec![
                Err(GatewayError::Transient("connection reset".to_string())),
                fill(dec!(100)),
            ],
        );
        gateway.script("BTC/USDT:USDT", vec![fill(dec!(100))]);

        let fills = executor(Arc::clone(&gateway)).execute_open(&open_signal()).await;

        assert!(fills.both_succeeded());
        assert_eq!(gateway.call_count("BTC/USDT"), 2);
    }

    #[tokio::test]
    async fn test_transient_retries_are_bounded() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.script(
            "BTC/USDT",
            vec![
                Err(GatewayError::Transient("reset".to_string())),
                Err(GatewayError::Transient("reset".to_string())),
                fill(dec!(100)),
            ],
        );
        gateway.script("BTC/USDT:USDT", vec![fill(dec!(100))]);

        let fills = executor(Arc::clone(&gateway)).execute_open(&open_signal()).await;

        // One retry allowed: two attempts total, then the leg fails.
        assert!(!fills.spot.succeeded);
        assert_eq!(gateway.call_count("BTC/USDT"), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let gateway = Arc::new(ScriptedGateway::default());
        gateway.script(
            "BTC/USDT",
            vec![
                Err(GatewayError::Rejected("bad symbol".to_string())),
                fill(dec!(100)),
            ],
        );
        gateway.script("BTC/USDT:USDT", vec![fill(dec!(100))]);

        let fills = executor(Arc::clone(&gateway)).execute_open(&open_signal()).await;

        assert!(!fills.spot.succeeded);
        assert_eq!(gateway.call_count("BTC/USDT"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_leg_times_out_as_failure() {
        let gateway = Arc::new(ScriptedGateway {
            delay: Some(Duration::from_secs(5)),
            ..ScriptedGateway::default()
        });
        gateway.script("BTC/USDT", vec![fill(dec!(100))]);
        gateway.script("BTC/USDT:USDT", vec![fill(dec!(100))]);

        let fills = executor(Arc::clone(&gateway)).execute_open(&open_signal()).await;

        assert!(!fills.spot.succeeded);
        assert!(!fills.perp.succeeded);
        assert!(fills.spot.error.as_deref().unwrap().contains("timed out"));
    }
}
