//! Fire-and-forget trade notifications.
//!
//! Delivery failures are logged and swallowed — a broken notification
//! channel must never block or fail a trade.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::position::Position;

/// Notification port for position lifecycle events.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Called after a position opens.
    ///
    /// # Errors
    /// Implementations may fail; callers log and ignore the error.
    async fn position_opened(&self, position: &Position) -> anyhow::Result<()>;

    /// Called after a position closes.
    ///
    /// # Errors
    /// Implementations may fail; callers log and ignore the error.
    async fn position_closed(&self, position: &Position) -> anyhow::Result<()>;
}

/// Default notifier that writes structured log events.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn position_opened(&self, position: &Position) -> anyhow::Result<()> {
        info!(
            position_id = %position.id,
            exchange = %position.exchange,
            symbol = %position.symbol,
            size_usdt = %position.size_usdt,
            annualized_pct = %position.entry_annualized_pct,
            "OPENED basis position"
        );
        Ok(())
    }

    async fn position_closed(&self, position: &Position) -> anyhow::Result<()> {
        info!(
            position_id = %position.id,
            exchange = %position.exchange,
            symbol = %position.symbol,
            realized_pnl = ?position.realized_pnl,
            funding_collected = %position.funding_collected,
            "CLOSED basis position"
        );
        Ok(())
    }
}

/// Sends a notification without letting failure propagate.
pub async fn notify_opened(notifier: &dyn Notifier, position: &Position) {
    if let Err(e) = notifier.position_opened(position).await {
        warn!(position_id = %position.id, error = %e, "Open notification failed");
    }
}

/// Sends a notification without letting failure propagate.
pub async fn notify_closed(notifier: &dyn Notifier, position: &Position) {
    if let Err(e) = notifier.position_closed(position).await {
        warn!(position_id = %position.id, error = %e, "Close notification failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TradeDirection;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn position_opened(&self, _position: &Position) -> anyhow::Result<()> {
            anyhow::bail!("smtp down")
        }

        async fn position_closed(&self, _position: &Position) -> anyhow::Result<()> {
            anyhow::bail!("smtp down")
        }
    }

    #[tokio::test]
    async fn test_notifier_failure_is_swallowed() {
        let position = Position::reserved(
            "okx",
            "BTC/USDT",
            "BTC/USDT:USDT",
            TradeDirection::LongSpotShortPerp,
            dec!(100),
            Utc::now(),
        );

        // Must not panic or propagate.
        notify_opened(&FailingNotifier, &position).await;
        notify_closed(&FailingNotifier, &position).await;
    }
}
