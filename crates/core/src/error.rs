//! Error taxonomy shared by the engine and its collaborators.

use thiserror::Error;

/// Leg identifier used in execution errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegName {
    /// The spot leg of a basis trade.
    Spot,
    /// The perpetual leg of a basis trade.
    Perp,
}

impl std::fmt::Display for LegName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spot => write!(f, "spot"),
            Self::Perp => write!(f, "perp"),
        }
    }
}

/// Errors surfaced by the decision-and-lifecycle engine.
///
/// The variants map directly onto how the caller must react: `StaleData`
/// and `CapacityDenied` end the current evaluation quietly, `TransientIo`
/// is retried once at the leg level, everything else is terminal for the
/// operation that produced it.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Input data is older than the configured freshness threshold.
    /// The evaluation is skipped, not retried within the cycle.
    #[error("stale data for {exchange}:{symbol}: age {age_secs}s exceeds {max_age_secs}s")]
    StaleData {
        /// Exchange the data came from.
        exchange: String,
        /// Symbol the data is for.
        symbol: String,
        /// Observed age in seconds.
        age_secs: i64,
        /// Configured maximum age in seconds.
        max_age_secs: i64,
    },

    /// A reservation was refused; the signal is dropped.
    #[error("capacity denied: {reason}")]
    CapacityDenied {
        /// Why the reservation was refused.
        reason: String,
    },

    /// A leg order was terminally rejected or timed out.
    #[error("{leg} leg execution failed: {reason}")]
    LegExecutionFailed {
        /// Which leg failed.
        leg: LegName,
        /// Gateway-reported reason.
        reason: String,
    },

    /// A transient network-level failure; retried once before being
    /// treated as `LegExecutionFailed`.
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    /// A ledger write failed. The caller must not assume the state change
    /// took effect and must re-derive truth from the ledger.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// A command referenced a position id the ledger does not hold.
    #[error("position {0} not found")]
    PositionNotFound(uuid::Uuid),

    /// A lifecycle command that the position's current state forbids.
    #[error("invalid transition for position {id}: {detail}")]
    InvalidTransition {
        /// Position id.
        id: uuid::Uuid,
        /// What was attempted against which state.
        detail: String,
    },
}

impl CoreError {
    /// Returns true for failures worth one bounded local retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = CoreError::StaleData {
            exchange: "okx".to_string(),
            symbol: "BTC/USDT".to_string(),
            age_secs: 700,
            max_age_secs: 600,
        };
        assert_eq!(
            err.to_string(),
            "stale data for okx:BTC/USDT: age 700s exceeds 600s"
        );

        let err = CoreError::LegExecutionFailed {
            leg: LegName::Perp,
            reason: "insufficient balance".to_string(),
        };
        assert_eq!(err.to_string(), "perp leg execution failed: insufficient balance");
    }

    #[test]
    fn test_is_transient() {
        assert!(CoreError::TransientIo("timeout".to_string()).is_transient());
        assert!(!CoreError::CapacityDenied {
            reason: "full".to_string()
        }
        .is_transient());
    }
}
