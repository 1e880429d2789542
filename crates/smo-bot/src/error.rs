//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("engine error: {0}")]
    Engine(#[from] smo_engine::EngineError),

    #[error("store error: {0}")]
    Store(#[from] smo_store::StoreError),

    #[error("telemetry error: {0}")]
    Telemetry(#[from] smo_telemetry::TelemetryError),
}

pub type AppResult<T> = Result<T, AppError>;
