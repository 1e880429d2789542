//! Store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("plan not found: {0}")]
    PlanNotFound(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("subscription failed: {0}")]
    Subscription(String),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
