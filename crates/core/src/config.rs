//! Configuration surface consumed by the engine.
//!
//! Values are resolved once at startup and passed by reference into
//! strategy/executor construction; nothing re-reads configuration per
//! decision.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Exchanges the engine trades on.
    pub exchanges: Vec<ExchangeConfig>,

    /// Spot symbols to evaluate (e.g. "BTC/USDT").
    pub symbols: Vec<String>,

    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,
}

impl AppConfig {
    /// Returns the enabled exchange ids.
    #[must_use]
    pub fn enabled_exchanges(&self) -> Vec<&str> {
        self.exchanges
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.id.as_str())
            .collect()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            exchanges: vec![
                ExchangeConfig::new("okx"),
                ExchangeConfig::new("bitget"),
                ExchangeConfig::new("mexc"),
            ],
            symbols: vec![
                "BTC/USDT".to_string(),
                "ETH/USDT".to_string(),
                "SOL/USDT".to_string(),
            ],
            strategy: StrategyConfig::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

/// Per-exchange settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Exchange identifier (e.g. "okx").
    pub id: String,

    /// Disabled exchanges are skipped entirely.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Taker fee as a percentage of notional (0.1 = 0.1%).
    #[serde(default = "default_taker_fee_pct")]
    pub taker_fee_pct: Decimal,
}

impl ExchangeConfig {
    /// Creates an enabled exchange entry with the default fee.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
            taker_fee_pct: default_taker_fee_pct(),
        }
    }
}

/// Decision thresholds and capacity limits for the basis trade strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Minimum annualized funding rate (percent) to open a position.
    #[serde(default = "default_min_entry_annualized_pct")]
    pub min_entry_annualized_pct: Decimal,

    /// Annualized funding rate (percent) below which an open position is
    /// closed.
    #[serde(default = "default_min_exit_annualized_pct")]
    pub min_exit_annualized_pct: Decimal,

    /// Notional size of each position in USDT.
    #[serde(default = "default_position_size_usdt")]
    pub position_size_usdt: Decimal,

    /// Maximum live positions per exchange.
    #[serde(default = "default_max_positions_per_exchange")]
    pub max_positions_per_exchange: u32,

    /// Maximum live positions across all exchanges.
    #[serde(default = "default_max_total_positions")]
    pub max_total_positions: u32,

    /// Poll interval for funding data when no push feed exists.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Cache entries older than this are unusable in decisions.
    #[serde(default = "default_staleness_threshold_secs")]
    pub staleness_threshold_secs: u64,

    /// Minimum holding time before a threshold-driven exit. Zero closes on
    /// the first qualifying evaluation; one funding period (28800) avoids
    /// paying round-trip fees on short-lived rate dips.
    #[serde(default = "default_min_hold_secs")]
    pub min_hold_secs: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_entry_annualized_pct: default_min_entry_annualized_pct(),
            min_exit_annualized_pct: default_min_exit_annualized_pct(),
            position_size_usdt: default_position_size_usdt(),
            max_positions_per_exchange: default_max_positions_per_exchange(),
            max_total_positions: default_max_total_positions(),
            poll_interval_secs: default_poll_interval_secs(),
            staleness_threshold_secs: default_staleness_threshold_secs(),
            min_hold_secs: default_min_hold_secs(),
        }
    }
}

/// Leg execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Per-leg order timeout in seconds; an elapsed timeout is a failed leg.
    #[serde(default = "default_leg_timeout_secs")]
    pub leg_timeout_secs: u64,

    /// Bounded retries per leg on transient failures.
    #[serde(default = "default_max_leg_retries")]
    pub max_leg_retries: u32,

    /// Paper-simulate fills instead of routing to a live gateway.
    #[serde(default = "default_true")]
    pub paper: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            leg_timeout_secs: default_leg_timeout_secs(),
            max_leg_retries: default_max_leg_retries(),
            paper: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_taker_fee_pct() -> Decimal {
    Decimal::new(1, 1) // 0.1%
}

fn default_min_entry_annualized_pct() -> Decimal {
    Decimal::from(10)
}

fn default_min_exit_annualized_pct() -> Decimal {
    Decimal::from(3)
}

fn default_position_size_usdt() -> Decimal {
    Decimal::from(250)
}

fn default_max_positions_per_exchange() -> u32 {
    1
}

fn default_max_total_positions() -> u32 {
    3
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_staleness_threshold_secs() -> u64 {
    600
}

fn default_min_hold_secs() -> u64 {
    0
}

fn default_leg_timeout_secs() -> u64 {
    5
}

fn default_max_leg_retries() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_strategy_defaults() {
        let cfg = StrategyConfig::default();

        assert_eq!(cfg.min_entry_annualized_pct, dec!(10));
        assert_eq!(cfg.min_exit_annualized_pct, dec!(3));
        assert_eq!(cfg.max_positions_per_exchange, 1);
        assert_eq!(cfg.max_total_positions, 3);
        assert_eq!(cfg.min_hold_secs, 0);
    }

    #[test]
    fn test_enabled_exchanges_filter() {
        let mut cfg = AppConfig::default();
        cfg.exchanges[1].enabled = false;

        assert_eq!(cfg.enabled_exchanges(), vec!["okx", "mexc"]);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            symbols = ["BTC/USDT"]

            [[exchanges]]
            id = "okx"

            [strategy]
            min_entry_annualized_pct = 12
            "#,
        )
        .unwrap();

        assert_eq!(cfg.strategy.min_entry_annualized_pct, dec!(12));
        assert_eq!(cfg.strategy.min_exit_annualized_pct, dec!(3));
        assert!(cfg.exchanges[0].enabled);
        assert_eq!(cfg.exchanges[0].taker_fee_pct, dec!(0.1));
        assert!(cfg.executor.paper);
    }
}
