//! Deterministic replay feed for tests and backtest-style runs.

use parking_lot::Mutex;
use std::collections::VecDeque;

use smo_core::{Candle, FeedKey, SpreadSnapshot};

use crate::DataFeed;

/// A scripted feed that steps through a fixed sequence of bars.
///
/// `price()` returns the current bar without consuming it; the driver calls
/// `advance()` between engine steps. This keeps runs reproducible: the same
/// script yields the same sequence of snapshots regardless of timing.
#[derive(Debug)]
pub struct ReplayFeed {
    bars: Mutex<VecDeque<Candle>>,
    current: Mutex<Option<Candle>>,
    spreads: Mutex<VecDeque<SpreadSnapshot>>,
    current_spread: Mutex<Option<SpreadSnapshot>>,
}

impl ReplayFeed {
    pub fn new(bars: Vec<Candle>) -> Self {
        Self {
            bars: Mutex::new(bars.into()),
            current: Mutex::new(None),
            spreads: Mutex::new(VecDeque::new()),
            current_spread: Mutex::new(None),
        }
    }

    /// Build from a flat list of close prices.
    pub fn from_closes(closes: Vec<smo_core::Price>) -> Self {
        Self::new(closes.into_iter().map(Candle::flat).collect())
    }

    /// Queue spread snapshots alongside the bar script.
    pub fn with_spreads(self, spreads: Vec<SpreadSnapshot>) -> Self {
        *self.spreads.lock() = spreads.into();
        self
    }

    /// Move to the next bar. Returns it, or `None` when the script is done.
    pub fn advance(&self) -> Option<Candle> {
        let next = self.bars.lock().pop_front();
        *self.current.lock() = next;
        if let Some(spread) = self.spreads.lock().pop_front() {
            *self.current_spread.lock() = Some(spread);
        }
        next
    }

    /// Bars not yet replayed.
    pub fn remaining(&self) -> usize {
        self.bars.lock().len()
    }
}

impl DataFeed for ReplayFeed {
    fn price(&self, _key: &FeedKey) -> Option<Candle> {
        *self.current.lock()
    }

    fn spread(&self, _key: &FeedKey) -> Option<SpreadSnapshot> {
        *self.current_spread.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use smo_core::{MarketKind, Price, Symbol};

    fn key() -> FeedKey {
        FeedKey::new("backtest", Symbol::new("BTC_USDT"), MarketKind::Futures)
    }

    #[test]
    fn test_replay_sequence() {
        let feed = ReplayFeed::from_closes(vec![
            Price::new(dec!(7005)),
            Price::new(dec!(6950)),
            Price::new(dec!(6952.5)),
        ]);

        assert!(feed.price(&key()).is_none());
        assert_eq!(feed.remaining(), 3);

        feed.advance();
        assert_eq!(feed.price(&key()).unwrap().close, Price::new(dec!(7005)));
        // Reads do not consume.
        assert_eq!(feed.price(&key()).unwrap().close, Price::new(dec!(7005)));

        feed.advance();
        feed.advance();
        assert_eq!(feed.price(&key()).unwrap().close, Price::new(dec!(6952.5)));
        assert_eq!(feed.remaining(), 0);

        // Past the end the script stays exhausted.
        assert!(feed.advance().is_none());
        assert!(feed.price(&key()).is_none());
    }

    #[test]
    fn test_replay_spreads() {
        let feed = ReplayFeed::from_closes(vec![Price::new(dec!(100))]).with_spreads(vec![
            SpreadSnapshot {
                best_bid: Price::new(dec!(99)),
                best_ask: Price::new(dec!(101)),
                close: Price::new(dec!(100)),
            },
        ]);
        feed.advance();
        assert_eq!(feed.spread(&key()).unwrap().best_ask, Price::new(dec!(101)));
    }
}
