//! Engine error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("gateway error: {0}")]
    Gateway(#[from] smo_gateway::GatewayError),

    #[error("store error: {0}")]
    Store(#[from] smo_store::StoreError),

    #[error("plan aborted: peer plan already active on {0}")]
    PeerActive(String),

    #[error("runtime stopped")]
    Stopped,
}

pub type EngineResult<T> = Result<T, EngineError>;
