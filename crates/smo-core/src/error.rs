//! Error types for smo-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
