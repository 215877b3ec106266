//! Abstract cache contract and the in-memory implementation.
//!
//! Ingestion writes freshness-stamped entries into the cache; the engine
//! reads them and persists its own position ledger through the same
//! contract. The backing technology (Redis in production deployments) is
//! deliberately out of scope — anything satisfying [`CacheStore`] works.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::funding::FundingRateEntry;
use crate::market::PriceSnapshot;

/// Key layout shared by ingestion and the engine.
pub mod keys {
    /// List key holding the append-only closed-trade history.
    pub const TRADE_HISTORY: &str = "trade_history";

    /// List key holding positions that ended half-filled and need
    /// external reconciliation.
    pub const RECONCILIATION: &str = "reconciliation";

    /// Key for the latest price snapshot of an (exchange, symbol) pair.
    #[must_use]
    pub fn latest(exchange: &str, symbol: &str) -> String {
        format!("latest:{exchange}:{symbol}")
    }

    /// Key for the latest funding rate entry of an (exchange, symbol) pair.
    #[must_use]
    pub fn funding(exchange: &str, symbol: &str) -> String {
        format!("funding:{exchange}:{symbol}")
    }

    /// Key for the persisted position of an (exchange, symbol) pair.
    #[must_use]
    pub fn position(exchange: &str, symbol: &str) -> String {
        format!("position:{exchange}:{symbol}")
    }

    /// Prefix matching all persisted positions.
    pub const POSITION_PREFIX: &str = "position:";
}

/// Durable key/value store with TTL support and an append-only list.
///
/// All values are JSON strings; typed accessors for the common entry kinds
/// are provided as default methods.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the value stored at `key`, if any.
    ///
    /// # Errors
    /// Returns [`CoreError::Persistence`] if the backing store fails.
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError>;

    /// Stores `value` at `key`, optionally expiring after `ttl`.
    ///
    /// # Errors
    /// Returns [`CoreError::Persistence`] if the backing store fails.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CoreError>;

    /// Removes `key` if present.
    ///
    /// # Errors
    /// Returns [`CoreError::Persistence`] if the backing store fails.
    async fn delete(&self, key: &str) -> Result<(), CoreError>;

    /// Appends `value` to the list stored at `list_key`.
    ///
    /// # Errors
    /// Returns [`CoreError::Persistence`] if the backing store fails.
    async fn append(&self, list_key: &str, value: &str) -> Result<(), CoreError>;

    /// Returns the full contents of the list stored at `list_key`.
    ///
    /// # Errors
    /// Returns [`CoreError::Persistence`] if the backing store fails.
    async fn list(&self, list_key: &str) -> Result<Vec<String>, CoreError>;

    /// Returns all keys starting with `prefix`.
    ///
    /// # Errors
    /// Returns [`CoreError::Persistence`] if the backing store fails.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, CoreError>;

    /// Fetches and decodes the latest price snapshot for a pair.
    ///
    /// # Errors
    /// Returns [`CoreError::Persistence`] on store failure or a corrupt
    /// entry.
    async fn latest_snapshot(
        &self,
        exchange: &str,
        symbol: &str,
    ) -> Result<Option<PriceSnapshot>, CoreError> {
        match self.get(&keys::latest(exchange, symbol)).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CoreError::Persistence(format!("corrupt price snapshot: {e}"))),
            None => Ok(None),
        }
    }

    /// Fetches and decodes the latest funding entry for a pair.
    ///
    /// # Errors
    /// Returns [`CoreError::Persistence`] on store failure or a corrupt
    /// entry.
    async fn funding_entry(
        &self,
        exchange: &str,
        symbol: &str,
    ) -> Result<Option<FundingRateEntry>, CoreError> {
        match self.get(&keys::funding(exchange, symbol)).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| CoreError::Persistence(format!("corrupt funding entry: {e}"))),
            None => Ok(None),
        }
    }

    /// Stores a price snapshot under its canonical key.
    ///
    /// # Errors
    /// Returns [`CoreError::Persistence`] if the backing store fails.
    async fn store_snapshot(&self, snapshot: &PriceSnapshot) -> Result<(), CoreError> {
        let raw = serde_json::to_string(snapshot)
            .map_err(|e| CoreError::Persistence(e.to_string()))?;
        self.set(&keys::latest(&snapshot.exchange, &snapshot.symbol), &raw, None)
            .await
    }

    /// Stores a funding entry under its canonical key.
    ///
    /// # Errors
    /// Returns [`CoreError::Persistence`] if the backing store fails.
    async fn store_funding(&self, entry: &FundingRateEntry) -> Result<(), CoreError> {
        let raw =
            serde_json::to_string(entry).map_err(|e| CoreError::Persistence(e.to_string()))?;
        self.set(&keys::funding(&entry.exchange, &entry.spot_symbol), &raw, None)
            .await
    }
}

// =============================================================================
// In-Memory Cache
// =============================================================================

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-memory [`CacheStore`] used by paper trading and tests.
///
/// TTLs are enforced lazily on read.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    lists: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(Instant::now()))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CoreError> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn append(&self, list_key: &str, value: &str) -> Result<(), CoreError> {
        self.lists
            .write()
            .await
            .entry(list_key.to_string())
            .or_default()
            .push(value.to_string());
        Ok(())
    }

    async fn list(&self, list_key: &str) -> Result<Vec<String>, CoreError> {
        Ok(self
            .lists
            .read()
            .await
            .get(list_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, CoreError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    // ==================== Key Tests ====================

    #[test]
    fn test_key_layout() {
        assert_eq!(keys::latest("okx", "BTC/USDT"), "latest:okx:BTC/USDT");
        assert_eq!(keys::funding("okx", "BTC/USDT"), "funding:okx:BTC/USDT");
        assert_eq!(keys::position("okx", "BTC/USDT"), "position:okx:BTC/USDT");
    }

    // ==================== MemoryCache Tests ====================

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemoryCache::new();

        cache.set("k", "v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = MemoryCache::new();

        cache
            .set("k", "v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(cache.get("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_append_and_list() {
        let cache = MemoryCache::new();

        cache.append(keys::TRADE_HISTORY, "a").await.unwrap();
        cache.append(keys::TRADE_HISTORY, "b").await.unwrap();

        let items = cache.list(keys::TRADE_HISTORY).await.unwrap();
        assert_eq!(items, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_scan_prefix() {
        let cache = MemoryCache::new();

        cache.set("position:okx:BTC/USDT", "{}", None).await.unwrap();
        cache.set("position:okx:ETH/USDT", "{}", None).await.unwrap();
        cache.set("latest:okx:BTC/USDT", "{}", None).await.unwrap();

        let mut found = cache.scan(keys::POSITION_PREFIX).await.unwrap();
        found.sort();
        assert_eq!(
            found,
            vec![
                "position:okx:BTC/USDT".to_string(),
                "position:okx:ETH/USDT".to_string()
            ]
        );
    }

    // ==================== Typed Accessor Tests ====================

    #[tokio::test]
    async fn test_snapshot_round_trip_via_cache() {
        let cache = MemoryCache::new();
        let snap = PriceSnapshot {
            exchange: "okx".to_string(),
            symbol: "BTC/USDT".to_string(),
            bid: dec!(42000),
            ask: dec!(42001),
            bid_volume: dec!(3),
            ask_volume: dec!(2),
            timestamp: Utc::now(),
        };

        cache.store_snapshot(&snap).await.unwrap();
        let back = cache.latest_snapshot("okx", "BTC/USDT").await.unwrap();
        assert_eq!(back, Some(snap));
    }

    #[tokio::test]
    async fn test_funding_round_trip_via_cache() {
        let cache = MemoryCache::new();
        let entry = FundingRateEntry::new("okx", "BTC/USDT", dec!(0.0001), Utc::now());

        cache.store_funding(&entry).await.unwrap();
        let back = cache.funding_entry("okx", "BTC/USDT").await.unwrap();
        assert_eq!(back, Some(entry));
    }

    #[tokio::test]
    async fn test_missing_entries_are_none() {
        let cache = MemoryCache::new();
        assert!(cache.latest_snapshot("okx", "BTC/USDT").await.unwrap().is_none());
        assert!(cache.funding_entry("okx", "BTC/USDT").await.unwrap().is_none());
    }
}
