//! Gateway error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid json: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("gateway rejected request: {0}")]
    Rejected(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
