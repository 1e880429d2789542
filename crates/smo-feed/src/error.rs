//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("No snapshot for market: {0}")]
    NoSnapshot(String),

    #[error("Stale snapshot for market {market}: {age_ms}ms old")]
    Stale { market: String, age_ms: i64 },
}

pub type FeedResult<T> = Result<T, FeedError>;
