//! Market data access for the smart-order engine.
//!
//! The engine never owns a transport; it reads the latest OHLCV bar and
//! best bid/ask snapshot per `(exchange, symbol, market_kind)` through the
//! `DataFeed` trait. `SnapshotMap` is the live implementation written by
//! feed tasks; `ReplayFeed` is the deterministic implementation used in
//! tests and backtest-style runs.

pub mod error;
pub mod replay;
pub mod snapshot;

pub use error::{FeedError, FeedResult};
pub use replay::ReplayFeed;
pub use snapshot::SnapshotMap;

use smo_core::{Candle, FeedKey, SpreadSnapshot};

/// Non-blocking snapshot supplier.
///
/// Both methods return the latest known snapshot, or `None` when the feed
/// has not yet produced one for the key.
pub trait DataFeed: Send + Sync {
    /// Latest OHLCV bar.
    fn price(&self, key: &FeedKey) -> Option<Candle>;

    /// Latest best bid/ask snapshot.
    fn spread(&self, key: &FeedKey) -> Option<SpreadSnapshot>;
}
