//! Telemetry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("logging initialization failed: {0}")]
    Logging(String),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;
