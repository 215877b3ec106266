//! The basis trade strategy: one evaluation per observed funding entry.
//!
//! The strategy is the only producer of trade signals. Each evaluation of
//! an (exchange, symbol) pair runs exactly one of two mutually exclusive
//! paths — the exit test when the pair has a live position, the entry test
//! otherwise — and emits at most one signal. Capacity and lifecycle state
//! are never touched directly: admission and fill reporting go through the
//! position manager, which keeps the accounting serialized in one owner.
//!
//! Funding data reaches the strategy as a single stream of
//! [`FundingRateEntry`] events regardless of whether the ingestion side
//! pushes (WebSocket) or the poll feed bridges REST reads into the same
//! channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use basis_arb_core::{CacheStore, CoreError, FundingRateEntry, StrategyConfig};

use crate::detector::{DetectorConfig, OpportunityDetector};
use crate::executor::TradeExecutor;
use crate::fees::{BreakevenEstimate, FeeSchedule};
use crate::manager::{EntryProgress, ExitProgress, PositionManager};
use crate::metrics::PerformanceReport;
use crate::notify::{notify_closed, notify_opened, Notifier};
use crate::position::{Position, PositionState};
use crate::types::TradeSignal;

/// Consecutive negative funding observations that force an exit
/// regardless of the minimum hold time.
const NEGATIVE_FUNDING_FORCE_EXIT: u32 = 2;

/// Evaluations between periodic performance summaries.
const SUMMARY_EVERY: u64 = 10;

/// Event-driven basis trade strategy.
pub struct BasisTradeStrategy {
    cache: Arc<dyn CacheStore>,
    executor: TradeExecutor,
    manager: Arc<PositionManager>,
    detector: OpportunityDetector,
    fees: FeeSchedule,
    config: StrategyConfig,
    notifier: Arc<dyn Notifier>,
    negative_funding: Mutex<HashMap<String, u32>>,
    evaluations: AtomicU64,
}

impl std::fmt::Debug for BasisTradeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasisTradeStrategy")
            .field("config", &self.config)
            .finish()
    }
}

impl BasisTradeStrategy {
    /// Creates a strategy wired to its collaborators.
    #[must_use]
    pub fn new(
        cache: Arc<dyn CacheStore>,
        executor: TradeExecutor,
        manager: Arc<PositionManager>,
        fees: FeeSchedule,
        config: StrategyConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let detector = OpportunityDetector::with_config(
            DetectorConfig::default()
                .with_min_abs_annualized_pct(config.min_entry_annualized_pct)
                .with_max_entry_age_secs(config.staleness_threshold_secs as i64),
        );
        Self {
            cache,
            executor,
            manager,
            detector,
            fees,
            config,
            notifier,
            negative_funding: Mutex::new(HashMap::new()),
            evaluations: AtomicU64::new(0),
        }
    }

    /// Consumes the funding event stream until it closes.
    pub async fn run(&self, mut events: mpsc::Receiver<FundingRateEntry>) {
        info!(
            min_entry_annualized_pct = %self.config.min_entry_annualized_pct,
            min_exit_annualized_pct = %self.config.min_exit_annualized_pct,
            max_total_positions = self.config.max_total_positions,
            "Basis trade strategy started"
        );

        while let Some(entry) = events.recv().await {
            self.evaluate_pair(&entry).await;

            let count = self.evaluations.fetch_add(1, Ordering::Relaxed) + 1;
            if count % SUMMARY_EVERY == 0 {
                self.log_summary().await;
            }
        }

        info!("Funding event stream closed; strategy stopping");
    }

    /// Runs one evaluation for the entry's (exchange, symbol) pair.
    ///
    /// Returns the signal that was emitted and handled, if any. Entry and
    /// exit are mutually exclusive per evaluation: a pair with a live
    /// position is only ever considered for exit.
    pub async fn evaluate_pair(&self, entry: &FundingRateEntry) -> Option<TradeSignal> {
        match self.manager.position_for(&entry.exchange, &entry.spot_symbol) {
            Some(position) if position.state == PositionState::Open => {
                self.evaluate_exit(&position, entry).await
            }
            Some(position) => {
                // Reserved or exit-pending: another evaluation's legs are
                // still in flight.
                debug!(
                    exchange = %entry.exchange,
                    symbol = %entry.spot_symbol,
                    state = %position.state,
                    "Pair busy; skipping evaluation"
                );
                None
            }
            None => self.evaluate_entry(entry).await,
        }
    }

    // ------------------------------------------------------------------
    // Entry path
    // ------------------------------------------------------------------

    async fn evaluate_entry(&self, entry: &FundingRateEntry) -> Option<TradeSignal> {
        let now = Utc::now();

        let opportunity = match self.detector.detect(entry, now) {
            Ok(Some(opportunity)) => opportunity,
            Ok(None) => return None,
            Err(e) => {
                debug!(
                    exchange = %entry.exchange,
                    symbol = %entry.spot_symbol,
                    error = %e,
                    "Entry evaluation skipped"
                );
                return None;
            }
        };

        // Only positive funding is collected: long spot + short perp.
        if !opportunity.collects_positive_funding() {
            debug!(
                exchange = %entry.exchange,
                symbol = %entry.spot_symbol,
                annualized_pct = %opportunity.annualized_pct,
                "Negative-funding opportunity observed; not traded"
            );
            return None;
        }

        let max_age = Duration::seconds(self.config.staleness_threshold_secs as i64);
        let snapshot = match self
            .cache
            .latest_snapshot(&entry.exchange, &entry.spot_symbol)
            .await
        {
            Ok(Some(snapshot)) if !snapshot.is_stale(now, max_age) => snapshot,
            Ok(_) => {
                debug!(
                    exchange = %entry.exchange,
                    symbol = %entry.spot_symbol,
                    "No fresh price snapshot; skipping entry"
                );
                return None;
            }
            Err(e) => {
                error!(
                    exchange = %entry.exchange,
                    symbol = %entry.spot_symbol,
                    error = %e,
                    "Price lookup failed; skipping entry"
                );
                return None;
            }
        };

        let breakeven = BreakevenEstimate::calculate(
            self.config.position_size_usdt,
            entry.rate,
            &entry.exchange,
            &self.fees,
        );
        if !breakeven.viable() {
            debug!(
                exchange = %entry.exchange,
                symbol = %entry.spot_symbol,
                breakeven_periods = ?breakeven.breakeven_periods,
                "Breakeven not viable; skipping entry"
            );
            return None;
        }

        let id = match self
            .manager
            .try_reserve(
                &entry.exchange,
                &entry.spot_symbol,
                &entry.symbol,
                opportunity.direction,
                self.config.position_size_usdt,
                entry.rate,
                opportunity.annualized_pct,
            )
            .await
        {
            Ok(id) => id,
            Err(CoreError::CapacityDenied { reason }) => {
                debug!(
                    exchange = %entry.exchange,
                    symbol = %entry.spot_symbol,
                    reason = %reason,
                    "Reservation denied"
                );
                return None;
            }
            Err(e) => {
                error!(
                    exchange = %entry.exchange,
                    symbol = %entry.spot_symbol,
                    error = %e,
                    "Reservation failed"
                );
                return None;
            }
        };

        let reason = format!(
            "funding {:.2}% ann, breakeven {:.1} periods, mid {}",
            opportunity.annualized_pct,
            breakeven.breakeven_periods.unwrap_or_default(),
            snapshot.mid_price(),
        );
        let signal = TradeSignal::open(
            entry.exchange.clone(),
            entry.spot_symbol.clone(),
            entry.symbol.clone(),
            opportunity.direction,
            self.config.position_size_usdt,
            entry.rate,
            opportunity.annualized_pct,
            reason,
        );

        let fills = self.executor.execute_open(&signal).await;
        let mut last_progress = None;
        for fill in [fills.spot, fills.perp] {
            match self.manager.record_entry_fill(id, fill).await {
                Ok(progress) => last_progress = Some(progress),
                Err(e) => {
                    error!(position_id = %id, error = %e, "Recording entry fill failed");
                    return Some(signal);
                }
            }
        }

        if last_progress == Some(EntryProgress::Opened) {
            if let Some(position) = self.manager.position_for(&entry.exchange, &entry.spot_symbol)
            {
                notify_opened(self.notifier.as_ref(), &position).await;
            }
        }

        Some(signal)
    }

    // ------------------------------------------------------------------
    // Exit path
    // ------------------------------------------------------------------

    async fn evaluate_exit(
        &self,
        position: &Position,
        entry: &FundingRateEntry,
    ) -> Option<TradeSignal> {
        let now = Utc::now();
        let max_age = Duration::seconds(self.config.staleness_threshold_secs as i64);
        if entry.is_stale(now, max_age) {
            debug!(
                exchange = %entry.exchange,
                symbol = %entry.spot_symbol,
                age_secs = entry.age(now).num_seconds(),
                "Stale funding entry; skipping exit evaluation"
            );
            return None;
        }

        // Accrue funding from the latest observation before deciding.
        if let Ok(Some(snapshot)) = self
            .cache
            .latest_snapshot(&entry.exchange, &entry.spot_symbol)
            .await
        {
            if !snapshot.is_stale(now, max_age) {
                if let Err(e) = self
                    .manager
                    .accrue_funding(position.id, entry, snapshot.mid_price(), now)
                    .await
                {
                    warn!(position_id = %position.id, error = %e, "Funding accrual failed");
                }
            }
        }

        let annualized = entry.annualized_pct();
        let negative_streak = self.track_negative_funding(entry);
        let hold = position.holding_time(now);
        let min_hold = Duration::seconds(self.config.min_hold_secs as i64);

        let exit_reason = if entry.rate < Decimal::ZERO {
            if negative_streak >= NEGATIVE_FUNDING_FORCE_EXIT {
                warn!(
                    exchange = %entry.exchange,
                    symbol = %entry.spot_symbol,
                    streak = negative_streak,
                    rate = %entry.rate,
                    "Funding negative for consecutive periods; forcing exit"
                );
                Some("funding_negative")
            } else if hold >= min_hold {
                Some("funding_negative")
            } else {
                debug!(
                    exchange = %entry.exchange,
                    symbol = %entry.spot_symbol,
                    streak = negative_streak,
                    "Single negative observation inside minimum hold; waiting"
                );
                None
            }
        } else if annualized < self.config.min_exit_annualized_pct {
            if hold >= min_hold {
                Some("funding_drop")
            } else {
                debug!(
                    exchange = %entry.exchange,
                    symbol = %entry.spot_symbol,
                    hold_hours = hold.num_hours(),
                    "Exit threshold crossed inside minimum hold; waiting"
                );
                None
            }
        } else {
            None
        };

        let exit_reason = exit_reason?;

        if let Err(e) = self.manager.begin_exit(position.id, exit_reason).await {
            // A concurrent evaluation won the race; drop this signal.
            debug!(position_id = %position.id, error = %e, "Exit already in flight");
            return None;
        }

        let signal = TradeSignal::close(
            entry.exchange.clone(),
            entry.spot_symbol.clone(),
            entry.symbol.clone(),
            position.direction,
            position.size_usdt,
            entry.rate,
            annualized,
            format!("{exit_reason}: funding {annualized:.2}% ann"),
        );

        let fills = self
            .executor
            .execute_close(&signal, position.spot_quantity(), position.perp_quantity())
            .await;

        let mut outcome = None;
        for fill in [fills.spot, fills.perp] {
            match self
                .manager
                .record_exit_fill(position.id, fill, exit_reason)
                .await
            {
                Ok(progress) => outcome = Some(progress),
                Err(e) => {
                    error!(position_id = %position.id, error = %e, "Recording exit fill failed");
                    return Some(signal);
                }
            }
        }

        if let Some(ExitProgress::Closed { realized_pnl }) = outcome {
            self.reset_negative_funding(entry);
            let mut closed = position.clone();
            closed.state = PositionState::Closed;
            closed.closed_at = Some(Utc::now());
            closed.realized_pnl = Some(realized_pnl);
            notify_closed(self.notifier.as_ref(), &closed).await;
        }

        Some(signal)
    }

    // ------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------

    fn track_negative_funding(&self, entry: &FundingRateEntry) -> u32 {
        let key = pair_key(entry);
        let mut counts = self.negative_funding.lock();
        if entry.rate < Decimal::ZERO {
            let count = counts.entry(key).or_insert(0);
            *count += 1;
            *count
        } else {
            counts.insert(key, 0);
            0
        }
    }

    fn reset_negative_funding(&self, entry: &FundingRateEntry) {
        self.negative_funding.lock().remove(&pair_key(entry));
    }

    async fn log_summary(&self) {
        let open = self.manager.snapshot(None, None);
        match self.manager.trade_history().await {
            Ok(history) => {
                let report = PerformanceReport::from_history(&history, &open);
                info!(
                    trades = report.total_trades,
                    realized_pnl = %report.total_realized_pnl,
                    funding = %report.total_funding_collected,
                    deployed = %report.capital_deployed,
                    open_positions = report.open_positions,
                    "Performance summary"
                );
            }
            Err(e) => warn!(error = %e, "Could not read trade history for summary"),
        }
    }
}

fn pair_key(entry: &FundingRateEntry) -> String {
    format!("{}:{}", entry.exchange, entry.spot_symbol)
}

// =============================================================================
// Poll Feed
// =============================================================================

/// Bridges cache polling into the strategy's funding event stream.
///
/// Every `poll_interval` the feed reads the latest funding entry for each
/// (exchange, symbol) pair and forwards it down the channel; the strategy
/// stays agnostic to whether data arrived via push or pull. The task stops
/// when the receiver is dropped.
pub fn spawn_poll_feed(
    cache: Arc<dyn CacheStore>,
    exchanges: Vec<String>,
    symbols: Vec<String>,
    poll_interval: StdDuration,
    tx: mpsc::Sender<FundingRateEntry>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            for exchange in &exchanges {
                for symbol in &symbols {
                    match cache.funding_entry(exchange, symbol).await {
                        Ok(Some(entry)) => {
                            if tx.send(entry).await.is_err() {
                                debug!("Funding event receiver dropped; poll feed stopping");
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(
                                exchange = %exchange,
                                symbol = %symbol,
                                error = %e,
                                "Funding poll failed"
                            );
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{
        GatewayError, GatewayFill, OrderGateway, OrderRequest,
    };
    use crate::fees::FeeSchedule;
    use crate::notify::LogNotifier;
    use crate::paper::PaperGateway;
    use crate::types::LegKind;
    use async_trait::async_trait;
    use basis_arb_core::{ExecutorConfig, MemoryCache, PriceSnapshot};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicBool;

    /// Paper gateway wrapper that can be told to reject perp legs.
    struct FlakyPerpGateway {
        inner: PaperGateway,
        fail_perp: AtomicBool,
    }

    #[async_trait]
    impl OrderGateway for FlakyPerpGateway {
        async fn place_order(&self, request: &OrderRequest) -> Result<GatewayFill, GatewayError> {
            if request.leg == LegKind::Perp && self.fail_perp.load(Ordering::SeqCst) {
                return Err(GatewayError::Rejected("perp rejected".to_string()));
            }
            self.inner.place_order(request).await
        }
    }

    struct World {
        cache: Arc<MemoryCache>,
        strategy: BasisTradeStrategy,
        manager: Arc<PositionManager>,
        fail_perp: Arc<FlakyPerpGateway>,
    }

    fn build_world(config: StrategyConfig) -> World {
        let cache = Arc::new(MemoryCache::new());
        let fees = FeeSchedule::standard();
        let gateway = Arc::new(FlakyPerpGateway {
            inner: PaperGateway::new(
                Arc::clone(&cache) as Arc<dyn CacheStore>,
                fees.clone(),
                config.staleness_threshold_secs as i64,
            ),
            fail_perp: AtomicBool::new(false),
        });
        let executor = TradeExecutor::new(
            Arc::clone(&gateway) as Arc<dyn OrderGateway>,
            &ExecutorConfig::default(),
        );
        let manager = Arc::new(PositionManager::new(
            Arc::clone(&cache) as Arc<dyn CacheStore>,
            &config,
        ));
        let strategy = BasisTradeStrategy::new(
            Arc::clone(&cache) as Arc<dyn CacheStore>,
            executor,
            Arc::clone(&manager),
            fees,
            config,
            Arc::new(LogNotifier),
        );
        World {
            cache,
            strategy,
            manager,
            fail_perp: gateway,
        }
    }

    fn quick_exit_config() -> StrategyConfig {
        StrategyConfig {
            min_hold_secs: 0,
            position_size_usdt: dec!(100),
            ..StrategyConfig::default()
        }
    }

    async fn seed_snapshot(world: &World, exchange: &str, symbol: &str) {
        world
            .cache
            .store_snapshot(&PriceSnapshot {
                exchange: exchange.to_string(),
                symbol: symbol.to_string(),
                bid: dec!(99),
                ask: dec!(100),
                bid_volume: dec!(10),
                ask_volume: dec!(10),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
    }

    fn funding(exchange: &str, symbol: &str, rate: Decimal) -> FundingRateEntry {
        FundingRateEntry::new(exchange, symbol, rate, Utc::now())
    }

    /// A rate comfortably above both the entry threshold and the
    /// breakeven gate (0.0004/8h -> 43.8% annualized).
    fn strong_rate() -> Decimal {
        dec!(0.0004)
    }

    // ==================== Entry Tests ====================

    #[tokio::test]
    async fn test_entry_emits_one_open_signal_and_opens() {
        let world = build_world(quick_exit_config());
        seed_snapshot(&world, "okx", "BTC/USDT").await;

        let signal = world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", strong_rate()))
            .await
            .expect("entry signal");

        assert_eq!(signal.action, crate::types::TradeAction::Open);
        let position = world.manager.position_for("okx", "BTC/USDT").unwrap();
        assert_eq!(position.state, PositionState::Open);
        // Buy spot at ask 100, notional 100 -> qty 1.
        assert_eq!(position.spot_quantity(), dec!(1));
    }

    #[tokio::test]
    async fn test_reevaluation_with_open_position_is_not_an_entry() {
        let world = build_world(quick_exit_config());
        seed_snapshot(&world, "okx", "BTC/USDT").await;

        let entry = funding("okx", "BTC/USDT", strong_rate());
        world.strategy.evaluate_pair(&entry).await.unwrap();

        // Unchanged inputs: the pair has an open position and the rate is
        // healthy, so no second signal of any kind is emitted.
        let second = world.strategy.evaluate_pair(&entry).await;
        assert!(second.is_none());
        assert_eq!(world.manager.live_count(), 1);
    }

    #[tokio::test]
    async fn test_entry_below_threshold_is_ignored() {
        let world = build_world(quick_exit_config());
        seed_snapshot(&world, "okx", "BTC/USDT").await;

        // 0.00005 -> 5.475% annualized, below the 10% entry threshold.
        let signal = world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", dec!(0.00005)))
            .await;
        assert!(signal.is_none());
        assert_eq!(world.manager.live_count(), 0);
    }

    #[tokio::test]
    async fn test_entry_negative_rate_is_not_traded() {
        let world = build_world(quick_exit_config());
        seed_snapshot(&world, "okx", "BTC/USDT").await;

        let signal = world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", -strong_rate()))
            .await;
        assert!(signal.is_none());
    }

    #[tokio::test]
    async fn test_entry_stale_funding_produces_no_signal() {
        let world = build_world(quick_exit_config());
        seed_snapshot(&world, "okx", "BTC/USDT").await;

        let mut entry = funding("okx", "BTC/USDT", strong_rate());
        entry.timestamp = Utc::now() - Duration::seconds(700);

        assert!(world.strategy.evaluate_pair(&entry).await.is_none());
    }

    #[tokio::test]
    async fn test_entry_without_price_snapshot_is_skipped() {
        let world = build_world(quick_exit_config());

        let signal = world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", strong_rate()))
            .await;
        assert!(signal.is_none());
        assert_eq!(world.manager.live_count(), 0);
    }

    #[tokio::test]
    async fn test_entry_breakeven_gate() {
        let world = build_world(quick_exit_config());
        seed_snapshot(&world, "okx", "BTC/USDT").await;

        // 21.9% annualized passes the threshold but needs 13.5 periods to
        // cover fees on okx.
        let signal = world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", dec!(0.0002)))
            .await;
        assert!(signal.is_none());
    }

    #[tokio::test]
    async fn test_capacity_caps_block_new_entries() {
        let config = StrategyConfig {
            max_total_positions: 1,
            ..quick_exit_config()
        };
        let world = build_world(config);
        seed_snapshot(&world, "okx", "BTC/USDT").await;
        seed_snapshot(&world, "bitget", "ETH/USDT").await;

        world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", strong_rate()))
            .await
            .unwrap();

        // Global cap reached; the second pair is denied at reservation.
        let signal = world
            .strategy
            .evaluate_pair(&funding("bitget", "ETH/USDT", strong_rate()))
            .await;
        assert!(signal.is_none());
        assert_eq!(world.manager.live_count(), 1);
    }

    #[tokio::test]
    async fn test_partial_entry_releases_and_allows_retry() {
        let world = build_world(quick_exit_config());
        seed_snapshot(&world, "okx", "BTC/USDT").await;

        world.fail_perp.fail_perp.store(true, Ordering::SeqCst);
        let signal = world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", strong_rate()))
            .await;

        // A signal was emitted, but the position was released.
        assert!(signal.is_some());
        assert_eq!(world.manager.live_count(), 0);

        // A later evaluation can re-attempt the entry.
        world.fail_perp.fail_perp.store(false, Ordering::SeqCst);
        world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", strong_rate()))
            .await
            .unwrap();
        assert_eq!(world.manager.live_count(), 1);
    }

    // ==================== Exit Tests ====================

    #[tokio::test]
    async fn test_exit_on_funding_drop_closes_position() {
        let world = build_world(quick_exit_config());
        seed_snapshot(&world, "okx", "BTC/USDT").await;

        world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", strong_rate()))
            .await
            .unwrap();

        // 0.00002 -> 2.19% annualized, below the 3% exit threshold.
        let signal = world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", dec!(0.00002)))
            .await
            .expect("close signal");

        assert_eq!(signal.action, crate::types::TradeAction::Close);
        assert_eq!(world.manager.live_count(), 0);

        let history = world.manager.trade_history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].exit_reason, "funding_drop");
    }

    #[tokio::test]
    async fn test_exit_respects_minimum_hold_for_threshold_exits() {
        let config = StrategyConfig {
            position_size_usdt: dec!(100),
            min_hold_secs: 28800,
            ..StrategyConfig::default()
        };
        let world = build_world(config);
        seed_snapshot(&world, "okx", "BTC/USDT").await;

        world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", strong_rate()))
            .await
            .unwrap();

        // Rate collapse right after opening: inside the minimum hold the
        // threshold exit waits.
        let signal = world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", dec!(0.00002)))
            .await;
        assert!(signal.is_none());
        assert_eq!(world.manager.live_count(), 1);
    }

    #[tokio::test]
    async fn test_exit_on_consecutive_negative_funding_bypasses_hold() {
        let config = StrategyConfig {
            position_size_usdt: dec!(100),
            min_hold_secs: 28800,
            ..StrategyConfig::default()
        };
        let world = build_world(config);
        seed_snapshot(&world, "okx", "BTC/USDT").await;

        world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", strong_rate()))
            .await
            .unwrap();

        // First negative observation inside the hold: tracked, no exit.
        let first = world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", dec!(-0.0001)))
            .await;
        assert!(first.is_none());
        assert_eq!(world.manager.live_count(), 1);

        // Second consecutive negative forces the close.
        let second = world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", dec!(-0.0001)))
            .await
            .expect("forced close");
        assert_eq!(second.action, crate::types::TradeAction::Close);
        assert_eq!(world.manager.live_count(), 0);

        let history = world.manager.trade_history().await.unwrap();
        assert_eq!(history[0].exit_reason, "funding_negative");
    }

    #[tokio::test]
    async fn test_exit_stale_funding_produces_no_signal() {
        let world = build_world(quick_exit_config());
        seed_snapshot(&world, "okx", "BTC/USDT").await;

        world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", strong_rate()))
            .await
            .unwrap();

        let mut stale = funding("okx", "BTC/USDT", dec!(-0.0001));
        stale.timestamp = Utc::now() - Duration::seconds(700);

        assert!(world.strategy.evaluate_pair(&stale).await.is_none());
        assert_eq!(world.manager.live_count(), 1);
    }

    #[tokio::test]
    async fn test_healthy_position_accrues_funding_without_exit() {
        let world = build_world(quick_exit_config());
        seed_snapshot(&world, "okx", "BTC/USDT").await;

        world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", strong_rate()))
            .await
            .unwrap();

        // Healthy rate: no signal, but accrual ran (possibly zero for
        // zero elapsed time) and the position stays open.
        let signal = world
            .strategy
            .evaluate_pair(&funding("okx", "BTC/USDT", strong_rate()))
            .await;
        assert!(signal.is_none());

        let position = world.manager.position_for("okx", "BTC/USDT").unwrap();
        assert_eq!(position.state, PositionState::Open);
        assert!(position.funding_collected >= Decimal::ZERO);
    }

    // ==================== Poll Feed Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_poll_feed_forwards_cache_entries() {
        let cache = Arc::new(MemoryCache::new());
        cache
            .store_funding(&funding("okx", "BTC/USDT", dec!(0.0001)))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let handle = spawn_poll_feed(
            Arc::clone(&cache) as Arc<dyn CacheStore>,
            vec!["okx".to_string()],
            vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()],
            StdDuration::from_secs(300),
            tx,
        );

        // First tick fires immediately; only the seeded pair is forwarded.
        let entry = rx.recv().await.unwrap();
        assert_eq!(entry.exchange, "okx");
        assert_eq!(entry.spot_symbol, "BTC/USDT");

        drop(rx);
        // Next tick notices the dropped receiver and stops.
        handle.await.unwrap();
    }
}
