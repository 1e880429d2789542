//! Process-wide snapshot map.
//!
//! Feed tasks write the latest bar and spread per market; plan runtimes read
//! lock-free through `DataFeed`. One instance is shared by every plan.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::trace;

use smo_core::{Candle, FeedKey, SpreadSnapshot};

use crate::DataFeed;

#[derive(Debug, Clone)]
struct PriceEntry {
    candle: Candle,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct SpreadEntry {
    spread: SpreadSnapshot,
    updated_at: DateTime<Utc>,
}

/// Shared per-market snapshot store.
#[derive(Debug, Default)]
pub struct SnapshotMap {
    prices: DashMap<FeedKey, PriceEntry>,
    spreads: DashMap<FeedKey, SpreadEntry>,
}

impl SnapshotMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest bar for a market.
    pub fn store_price(&self, key: FeedKey, candle: Candle) {
        trace!(key = %key, close = %candle.close, "price snapshot updated");
        self.prices.insert(
            key,
            PriceEntry {
                candle,
                updated_at: Utc::now(),
            },
        );
    }

    /// Store the latest spread for a market.
    pub fn store_spread(&self, key: FeedKey, spread: SpreadSnapshot) {
        trace!(key = %key, bid = %spread.best_bid, ask = %spread.best_ask, "spread snapshot updated");
        self.spreads.insert(
            key,
            SpreadEntry {
                spread,
                updated_at: Utc::now(),
            },
        );
    }

    /// Age of the newest price snapshot in milliseconds, if any.
    pub fn price_age_ms(&self, key: &FeedKey) -> Option<i64> {
        self.prices
            .get(key)
            .map(|e| (Utc::now() - e.updated_at).num_milliseconds())
    }

    /// Age of the newest spread snapshot in milliseconds, if any.
    pub fn spread_age_ms(&self, key: &FeedKey) -> Option<i64> {
        self.spreads
            .get(key)
            .map(|e| (Utc::now() - e.updated_at).num_milliseconds())
    }

    /// Number of markets with at least one price snapshot.
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl DataFeed for SnapshotMap {
    fn price(&self, key: &FeedKey) -> Option<Candle> {
        self.prices.get(key).map(|e| e.candle)
    }

    fn spread(&self, key: &FeedKey) -> Option<SpreadSnapshot> {
        self.spreads.get(key).map(|e| e.spread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use smo_core::{MarketKind, Price, Symbol};

    fn key() -> FeedKey {
        FeedKey::new("binance", Symbol::new("BTC_USDT"), MarketKind::Futures)
    }

    #[test]
    fn test_price_roundtrip() {
        let map = SnapshotMap::new();
        assert!(map.price(&key()).is_none());

        map.store_price(key(), Candle::flat(Price::new(dec!(7000))));
        let candle = map.price(&key()).unwrap();
        assert_eq!(candle.close, Price::new(dec!(7000)));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_latest_wins() {
        let map = SnapshotMap::new();
        map.store_price(key(), Candle::flat(Price::new(dec!(7000))));
        map.store_price(key(), Candle::flat(Price::new(dec!(7010))));
        assert_eq!(map.price(&key()).unwrap().close, Price::new(dec!(7010)));
    }

    #[test]
    fn test_spread_roundtrip() {
        let map = SnapshotMap::new();
        assert!(map.spread(&key()).is_none());

        map.store_spread(
            key(),
            SpreadSnapshot {
                best_bid: Price::new(dec!(6999)),
                best_ask: Price::new(dec!(7001)),
                close: Price::new(dec!(7000)),
            },
        );
        let spread = map.spread(&key()).unwrap();
        assert_eq!(spread.best_bid, Price::new(dec!(6999)));
    }

    #[test]
    fn test_keys_are_market_scoped() {
        let map = SnapshotMap::new();
        let spot = FeedKey::new("binance", Symbol::new("BTC_USDT"), MarketKind::Spot);
        map.store_price(key(), Candle::flat(Price::new(dec!(7000))));
        assert!(map.price(&spot).is_none());
    }
}
