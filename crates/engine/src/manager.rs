//! The position manager: authoritative ledger, capacity invariants, and
//! lifecycle persistence.
//!
//! All capacity checks and lifecycle transitions go through this one owner.
//! Admission (`try_reserve`) is a single check-and-create critical section,
//! so "at most N" is enforced exclusively rather than advisorily: two
//! concurrent reservations for the same pair yield exactly one winner.
//!
//! The in-memory ledger is the decision authority; every accepted
//! transition is mirrored to the cache so a restart can classify survivors
//! (see [`PositionManager::recover`]). The ledger mutex is never held
//! across an await point.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use basis_arb_core::cache::keys;
use basis_arb_core::{CacheStore, CoreError, FundingRateEntry, StrategyConfig};

use crate::position::{ClosedPositionRecord, Position, PositionState};
use crate::types::{LegFill, TradeDirection};

// =============================================================================
// Progress Reports
// =============================================================================

/// Outcome of recording an entry leg fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryProgress {
    /// One leg recorded, waiting for the other.
    AwaitingLeg,

    /// Both legs succeeded; the position is open.
    Opened,

    /// At least one leg failed; capacity was returned.
    ///
    /// `partial_exposure` is true when exactly one leg filled — the
    /// half-filled condition is surfaced, never silently dropped.
    Released {
        /// True when one leg filled and the other did not.
        partial_exposure: bool,
    },
}

/// Outcome of recording an exit leg fill.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitProgress {
    /// One leg recorded, waiting for the other.
    AwaitingLeg,

    /// Both legs succeeded; the position is closed and P&L finalized.
    Closed {
        /// Final realized P&L.
        realized_pnl: Decimal,
    },

    /// The close attempt failed; the position is back to `Open` and a
    /// later evaluation will retry.
    Retry {
        /// True when exactly one exit leg filled.
        partial_exposure: bool,
    },
}

/// Classification of persisted positions found during startup recovery.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Open positions reloaded into the ledger.
    pub reloaded: Vec<Uuid>,

    /// Stale reservations with no fills, released.
    pub released: Vec<Uuid>,

    /// Positions with partial fills, left for external reconciliation.
    pub needs_reconciliation: Vec<Uuid>,
}

// =============================================================================
// Position Manager
// =============================================================================

#[derive(Debug, Default)]
struct Ledger {
    live: HashMap<Uuid, Position>,
}

impl Ledger {
    fn pair_taken(&self, exchange: &str, symbol: &str) -> bool {
        self.live
            .values()
            .any(|p| p.exchange == exchange && p.symbol == symbol)
    }

    fn exchange_count(&self, exchange: &str) -> usize {
        self.live.values().filter(|p| p.exchange == exchange).count()
    }
}

/// Owns the position ledger and enforces the capacity invariants.
pub struct PositionManager {
    cache: Arc<dyn CacheStore>,
    max_per_exchange: u32,
    max_total: u32,
    ledger: Mutex<Ledger>,
}

impl std::fmt::Debug for PositionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionManager")
            .field("max_per_exchange", &self.max_per_exchange)
            .field("max_total", &self.max_total)
            .field("live_positions", &self.ledger.lock().live.len())
            .finish()
    }
}

impl PositionManager {
    /// Creates a manager with limits taken from the strategy configuration.
    #[must_use]
    pub fn new(cache: Arc<dyn CacheStore>, config: &StrategyConfig) -> Self {
        Self {
            cache,
            max_per_exchange: config.max_positions_per_exchange,
            max_total: config.max_total_positions,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Atomically checks capacity and creates a `Reserved` position.
    ///
    /// The duplicate-pair, per-exchange, and global checks plus the insert
    /// happen under one lock; no other reservation can observe the
    /// intermediate state. The reservation is then persisted; if the write
    /// fails it is rolled back and the error returned.
    ///
    /// # Errors
    ///
    /// [`CoreError::CapacityDenied`] when any invariant would be violated;
    /// [`CoreError::Persistence`] when the reservation could not be made
    /// durable (in which case it does not count against capacity).
    #[allow(clippy::too_many_arguments)]
    pub async fn try_reserve(
        &self,
        exchange: &str,
        symbol: &str,
        perp_symbol: &str,
        direction: TradeDirection,
        size_usdt: Decimal,
        entry_funding_rate: Decimal,
        entry_annualized_pct: Decimal,
    ) -> Result<Uuid, CoreError> {
        let position = {
            let mut ledger = self.ledger.lock();

            if ledger.pair_taken(exchange, symbol) {
                return Err(CoreError::CapacityDenied {
                    reason: format!("position already live for {exchange}:{symbol}"),
                });
            }
            let exchange_count = ledger.exchange_count(exchange);
            if exchange_count >= self.max_per_exchange as usize {
                return Err(CoreError::CapacityDenied {
                    reason: format!(
                        "per-exchange limit reached for {exchange}: {exchange_count}/{}",
                        self.max_per_exchange
                    ),
                });
            }
            if ledger.live.len() >= self.max_total as usize {
                return Err(CoreError::CapacityDenied {
                    reason: format!("global limit reached: {}/{}", ledger.live.len(), self.max_total),
                });
            }

            let mut position = Position::reserved(
                exchange,
                symbol,
                perp_symbol,
                direction,
                size_usdt,
                Utc::now(),
            );
            position.entry_funding_rate = entry_funding_rate;
            position.entry_annualized_pct = entry_annualized_pct;
            ledger.live.insert(position.id, position.clone());
            position
        };

        if let Err(e) = self.persist(&position).await {
            self.ledger.lock().live.remove(&position.id);
            return Err(e);
        }

        debug!(
            position_id = %position.id,
            exchange = %exchange,
            symbol = %symbol,
            size_usdt = %size_usdt,
            "Reserved capacity for new position"
        );
        Ok(position.id)
    }

    // ------------------------------------------------------------------
    // Entry
    // ------------------------------------------------------------------

    /// Attaches an entry leg fill to a reserved position.
    ///
    /// When both legs have reported: both succeeded transitions the
    /// position to `Open`; any failure releases the reservation and
    /// returns capacity. A release with one filled leg is reported with
    /// `partial_exposure: true`.
    ///
    /// # Errors
    ///
    /// [`CoreError::PositionNotFound`], [`CoreError::InvalidTransition`]
    /// for misuse, [`CoreError::Persistence`] when the ledger write fails
    /// (the in-memory transition stands; the caller must re-read truth).
    pub async fn record_entry_fill(
        &self,
        id: Uuid,
        fill: LegFill,
    ) -> Result<EntryProgress, CoreError> {
        let (progress, position) = {
            let mut ledger = self.ledger.lock();
            let position = ledger
                .live
                .get_mut(&id)
                .ok_or(CoreError::PositionNotFound(id))?;

            if position.state != PositionState::Reserved {
                return Err(CoreError::InvalidTransition {
                    id,
                    detail: format!("entry fill in state {}", position.state),
                });
            }
            if position.entry_leg(fill.leg).is_some() {
                return Err(CoreError::InvalidTransition {
                    id,
                    detail: format!("duplicate {} entry fill", fill.leg),
                });
            }

            position.entry_fills.push(fill);

            if !position.entry_complete() {
                (EntryProgress::AwaitingLeg, position.clone())
            } else if position.succeeded_entry_legs() == 2 {
                position.state = PositionState::Open;
                let now = Utc::now();
                position.opened_at = Some(now);
                position.last_funding_accrual = now;
                (EntryProgress::Opened, position.clone())
            } else {
                let partial = position.succeeded_entry_legs() == 1;
                position.state = PositionState::Released;
                let snapshot = position.clone();
                ledger.live.remove(&id);
                (EntryProgress::Released { partial_exposure: partial }, snapshot)
            }
        };

        match &progress {
            EntryProgress::AwaitingLeg => {
                self.persist(&position).await?;
            }
            EntryProgress::Opened => {
                self.persist(&position).await?;
                info!(
                    position_id = %id,
                    exchange = %position.exchange,
                    symbol = %position.symbol,
                    spot_qty = %position.spot_quantity(),
                    perp_qty = %position.perp_quantity(),
                    "Position open"
                );
            }
            EntryProgress::Released { partial_exposure } => {
                self.cache.delete(&position.cache_key()).await?;
                if *partial_exposure {
                    self.record_for_reconciliation(&position).await?;
                    error!(
                        position_id = %id,
                        exchange = %position.exchange,
                        symbol = %position.symbol,
                        "Entry released with one leg filled; external reconciliation required"
                    );
                } else {
                    warn!(
                        position_id = %id,
                        exchange = %position.exchange,
                        symbol = %position.symbol,
                        "Entry failed on both legs; capacity released"
                    );
                }
            }
        }

        Ok(progress)
    }

    // ------------------------------------------------------------------
    // Exit
    // ------------------------------------------------------------------

    /// Marks an open position as exiting. Exactly one caller wins a race;
    /// the loser receives `InvalidTransition` and drops its signal.
    ///
    /// # Errors
    ///
    /// [`CoreError::PositionNotFound`], [`CoreError::InvalidTransition`],
    /// or [`CoreError::Persistence`].
    pub async fn begin_exit(&self, id: Uuid, reason: &str) -> Result<(), CoreError> {
        let position = {
            let mut ledger = self.ledger.lock();
            let position = ledger
                .live
                .get_mut(&id)
                .ok_or(CoreError::PositionNotFound(id))?;

            if position.state != PositionState::Open {
                return Err(CoreError::InvalidTransition {
                    id,
                    detail: format!("begin_exit in state {}", position.state),
                });
            }
            position.state = PositionState::ExitPending;
            position.exit_fills.clear();
            position.clone()
        };

        self.persist(&position).await?;
        debug!(position_id = %id, reason = %reason, "Exit pending");
        Ok(())
    }

    /// Attaches an exit leg fill.
    ///
    /// Both legs succeeded finalizes P&L, appends the trade history record,
    /// and releases capacity. Any failure puts the position back to `Open`
    /// for a retry on the next qualifying evaluation — it is never left
    /// half-closed or abandoned.
    ///
    /// # Errors
    ///
    /// [`CoreError::PositionNotFound`], [`CoreError::InvalidTransition`]
    /// for misuse, [`CoreError::Persistence`] when ledger writes fail.
    pub async fn record_exit_fill(
        &self,
        id: Uuid,
        fill: LegFill,
        exit_reason: &str,
    ) -> Result<ExitProgress, CoreError> {
        let (progress, position, half_filled_attempt) = {
            let mut ledger = self.ledger.lock();
            let position = ledger
                .live
                .get_mut(&id)
                .ok_or(CoreError::PositionNotFound(id))?;

            if position.state != PositionState::ExitPending {
                return Err(CoreError::InvalidTransition {
                    id,
                    detail: format!("exit fill in state {}", position.state),
                });
            }
            if position.exit_leg(fill.leg).is_some() {
                return Err(CoreError::InvalidTransition {
                    id,
                    detail: format!("duplicate {} exit fill", fill.leg),
                });
            }

            position.exit_fills.push(fill);

            if !position.exit_complete() {
                (ExitProgress::AwaitingLeg, position.clone(), None)
            } else if position.succeeded_exit_legs() == 2 {
                position.state = PositionState::Closed;
                position.closed_at = Some(Utc::now());
                // Both exit legs succeeded, so the P&L inputs are present.
                let pnl = position.compute_realized_pnl().unwrap_or(Decimal::ZERO);
                position.realized_pnl = Some(pnl);
                let snapshot = position.clone();
                ledger.live.remove(&id);
                (ExitProgress::Closed { realized_pnl: pnl }, snapshot, None)
            } else {
                let partial = position.succeeded_exit_legs() == 1;
                // Capture the attempt with its fills before clearing, so
                // the reconciliation log keeps the half-filled evidence.
                let attempt = partial.then(|| position.clone());
                position.failed_exits += 1;
                position.exit_fills.clear();
                position.state = PositionState::Open;
                (
                    ExitProgress::Retry { partial_exposure: partial },
                    position.clone(),
                    attempt,
                )
            }
        };

        match &progress {
            ExitProgress::AwaitingLeg => {
                self.persist(&position).await?;
            }
            ExitProgress::Closed { realized_pnl } => {
                if let Some(record) = ClosedPositionRecord::from_position(&position, exit_reason) {
                    let raw = serde_json::to_string(&record)
                        .map_err(|e| CoreError::Persistence(e.to_string()))?;
                    self.cache.append(keys::TRADE_HISTORY, &raw).await?;
                }
                self.cache.delete(&position.cache_key()).await?;
                info!(
                    position_id = %id,
                    exchange = %position.exchange,
                    symbol = %position.symbol,
                    realized_pnl = %realized_pnl,
                    funding_collected = %position.funding_collected,
                    exit_reason = %exit_reason,
                    "Position closed"
                );
            }
            ExitProgress::Retry { partial_exposure } => {
                self.persist(&position).await?;
                if *partial_exposure {
                    if let Some(attempt) = &half_filled_attempt {
                        self.record_for_reconciliation(attempt).await?;
                    }
                    error!(
                        position_id = %id,
                        exchange = %position.exchange,
                        symbol = %position.symbol,
                        failed_exits = position.failed_exits,
                        "Exit half-filled; position back to open, reconciliation required"
                    );
                } else {
                    warn!(
                        position_id = %id,
                        exchange = %position.exchange,
                        symbol = %position.symbol,
                        failed_exits = position.failed_exits,
                        "Exit failed on both legs; will retry next cycle"
                    );
                }
            }
        }

        Ok(progress)
    }

    // ------------------------------------------------------------------
    // Funding accrual
    // ------------------------------------------------------------------

    /// Accrues funding on an open position from the latest observed rate.
    ///
    /// The payment approximates continuous accrual from polled entries:
    /// `perp_qty × mark × rate × elapsed / interval`.
    ///
    /// # Errors
    ///
    /// [`CoreError::PositionNotFound`], [`CoreError::InvalidTransition`]
    /// when the position is not open, or [`CoreError::Persistence`].
    pub async fn accrue_funding(
        &self,
        id: Uuid,
        entry: &FundingRateEntry,
        mark_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, CoreError> {
        let (payment, position) = {
            let mut ledger = self.ledger.lock();
            let position = ledger
                .live
                .get_mut(&id)
                .ok_or(CoreError::PositionNotFound(id))?;

            if position.state != PositionState::Open {
                return Err(CoreError::InvalidTransition {
                    id,
                    detail: format!("funding accrual in state {}", position.state),
                });
            }

            let elapsed_secs = (now - position.last_funding_accrual).num_seconds().max(0);
            let interval_secs = position_interval_secs(entry);
            let fraction = Decimal::from(elapsed_secs) / Decimal::from(interval_secs);
            let payment = position.perp_quantity() * mark_price * entry.rate * fraction;

            position.funding_collected += payment;
            position.last_funding_accrual = now;
            (payment, position.clone())
        };

        self.persist(&position).await?;
        debug!(
            position_id = %id,
            payment = %payment,
            total = %position.funding_collected,
            "Funding accrued"
        );
        Ok(payment)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Read-only view of live positions, optionally filtered.
    #[must_use]
    pub fn snapshot(&self, exchange: Option<&str>, symbol: Option<&str>) -> Vec<Position> {
        let ledger = self.ledger.lock();
        ledger
            .live
            .values()
            .filter(|p| exchange.map_or(true, |e| p.exchange == e))
            .filter(|p| symbol.map_or(true, |s| p.symbol == s))
            .cloned()
            .collect()
    }

    /// The live position for a pair, if any.
    #[must_use]
    pub fn position_for(&self, exchange: &str, symbol: &str) -> Option<Position> {
        let ledger = self.ledger.lock();
        ledger
            .live
            .values()
            .find(|p| p.exchange == exchange && p.symbol == symbol)
            .cloned()
    }

    /// Number of live positions.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.ledger.lock().live.len()
    }

    /// Reads the closed-trade history from the cache.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] on store failure or corrupt
    /// records.
    pub async fn trade_history(&self) -> Result<Vec<ClosedPositionRecord>, CoreError> {
        let raw = self.cache.list(keys::TRADE_HISTORY).await?;
        raw.iter()
            .map(|item| {
                serde_json::from_str(item)
                    .map_err(|e| CoreError::Persistence(format!("corrupt history record: {e}")))
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Startup pass over persisted positions.
    ///
    /// Open positions are reloaded into the ledger. Reservations with no
    /// fills are released. Anything holding partial fills is left
    /// persisted and reported for external reconciliation — a stale
    /// reservation could mask an already-executed order, so nothing is
    /// retried automatically.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Persistence`] if the scan itself fails;
    /// individual corrupt entries are logged and skipped.
    pub async fn recover(&self) -> Result<RecoveryReport, CoreError> {
        let mut report = RecoveryReport::default();
        let position_keys = self.cache.scan(keys::POSITION_PREFIX).await?;

        for key in position_keys {
            let Some(raw) = self.cache.get(&key).await? else {
                continue;
            };
            let position: Position = match serde_json::from_str(&raw) {
                Ok(p) => p,
                Err(e) => {
                    error!(key = %key, error = %e, "Corrupt persisted position; skipping");
                    continue;
                }
            };

            match position.state {
                PositionState::Open => {
                    info!(
                        position_id = %position.id,
                        exchange = %position.exchange,
                        symbol = %position.symbol,
                        "Recovered open position"
                    );
                    report.reloaded.push(position.id);
                    self.ledger.lock().live.insert(position.id, position);
                }
                PositionState::Reserved if position.entry_fills.is_empty() => {
                    info!(
                        position_id = %position.id,
                        exchange = %position.exchange,
                        symbol = %position.symbol,
                        "Releasing stale reservation"
                    );
                    report.released.push(position.id);
                    self.cache.delete(&key).await?;
                }
                PositionState::ExitPending if position.exit_fills.is_empty() => {
                    // The close never got a fill report; safe to retry as open.
                    let mut position = position;
                    position.state = PositionState::Open;
                    info!(
                        position_id = %position.id,
                        exchange = %position.exchange,
                        symbol = %position.symbol,
                        "Recovered exiting position as open; close will be re-evaluated"
                    );
                    self.persist(&position).await?;
                    report.reloaded.push(position.id);
                    self.ledger.lock().live.insert(position.id, position);
                }
                PositionState::Reserved | PositionState::ExitPending => {
                    error!(
                        position_id = %position.id,
                        exchange = %position.exchange,
                        symbol = %position.symbol,
                        state = %position.state,
                        "Partially filled position found; external reconciliation required"
                    );
                    report.needs_reconciliation.push(position.id);
                }
                PositionState::Closed | PositionState::Released => {
                    // Terminal states should not be persisted; clean up.
                    self.cache.delete(&key).await?;
                }
            }
        }

        Ok(report)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn persist(&self, position: &Position) -> Result<(), CoreError> {
        let raw =
            serde_json::to_string(position).map_err(|e| CoreError::Persistence(e.to_string()))?;
        self.cache.set(&position.cache_key(), &raw, None).await
    }

    /// Appends a half-filled position to the reconciliation log so the
    /// exposure is never lost, even after the ledger moves on.
    async fn record_for_reconciliation(&self, position: &Position) -> Result<(), CoreError> {
        let raw =
            serde_json::to_string(position).map_err(|e| CoreError::Persistence(e.to_string()))?;
        self.cache.append(keys::RECONCILIATION, &raw).await
    }
}

fn position_interval_secs(entry: &FundingRateEntry) -> i64 {
    i64::from(entry.interval_hours.max(1)) * 3600
}
