//! Market data value types: price bars and order-book snapshots.

use serde::{Deserialize, Serialize};

use crate::plan::{MarketKind, Symbol};
use crate::{Price, Qty};

/// One OHLCV price bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Qty,
}

impl Candle {
    /// A degenerate bar where every field is the same price.
    ///
    /// Replay feeds and tests use this for single-price ticks.
    pub fn flat(price: Price) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Qty::ZERO,
        }
    }
}

/// Best bid/ask snapshot of an order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpreadSnapshot {
    pub best_bid: Price,
    pub best_ask: Price,
    pub close: Price,
}

impl SpreadSnapshot {
    /// Relative spread: `best_ask / best_bid - 1`.
    ///
    /// Returns `None` on an empty or crossed book.
    pub fn relative(&self) -> Option<rust_decimal::Decimal> {
        if !self.best_bid.is_positive() || self.best_ask < self.best_bid {
            return None;
        }
        Some(self.best_ask.inner() / self.best_bid.inner() - rust_decimal::Decimal::ONE)
    }
}

/// Key addressing one market's snapshot in the shared feed map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedKey {
    pub exchange: String,
    pub symbol: Symbol,
    pub market_kind: MarketKind,
}

impl FeedKey {
    pub fn new(exchange: impl Into<String>, symbol: Symbol, market_kind: MarketKind) -> Self {
        Self {
            exchange: exchange.into(),
            symbol,
            market_kind,
        }
    }
}

impl std::fmt::Display for FeedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.exchange, self.symbol, self.market_kind)
    }
}
