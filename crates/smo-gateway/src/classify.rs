//! Classification of gateway error messages.
//!
//! The exchange service reports failures as free-text messages. A small set
//! of them is transient and worth retrying with a known backoff; the rest
//! either demand a specific recovery flow or are fatal for the plan.

use std::time::Duration;

/// Retry parameters for a transient fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySpec {
    /// Wait before the next attempt.
    pub delay: Duration,
    /// Extra attempts after the first failure.
    pub max_retries: u32,
}

impl RetrySpec {
    pub const fn new(delay: Duration, max_retries: u32) -> Self {
        Self { delay, max_retries }
    }
}

/// Classified gateway fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayFault {
    /// Credential busy at the service; long backoff, single retry.
    KeyProcessing,
    /// Hedge-mode position side mismatch; settles quickly.
    PositionSideMismatch,
    /// Serialization hiccup at the service boundary.
    InvalidJson,
    /// Transport-level failure before a structured response.
    Network,
    /// Stop order would trigger immediately at the current price.
    ImmediateTrigger,
    /// Reduce-only order rejected: position already gone. Fatal for the plan.
    ReduceOnlyRejected,
    /// Anything else: unrecoverable, park the plan in `Error`.
    Other(String),
}

impl GatewayFault {
    /// Retry parameters, or `None` for faults that are not plain retries.
    pub fn retry_spec(&self) -> Option<RetrySpec> {
        match self {
            Self::KeyProcessing => Some(RetrySpec::new(Duration::from_secs(60), 1)),
            Self::PositionSideMismatch => Some(RetrySpec::new(Duration::from_secs(5), 3)),
            Self::InvalidJson => Some(RetrySpec::new(Duration::from_secs(2), 3)),
            Self::Network => Some(RetrySpec::new(Duration::from_secs(2), 3)),
            _ => None,
        }
    }

    /// True when the fault never surfaces past the executor.
    pub fn is_transient(&self) -> bool {
        self.retry_spec().is_some()
    }
}

impl std::fmt::Display for GatewayFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyProcessing => write!(f, "key is processing"),
            Self::PositionSideMismatch => write!(f, "position side does not match"),
            Self::InvalidJson => write!(f, "invalid json"),
            Self::Network => write!(f, "network error"),
            Self::ImmediateTrigger => write!(f, "order would immediately trigger"),
            Self::ReduceOnlyRejected => write!(f, "reduce-only order rejected"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

/// Classify a gateway error message.
///
/// Matching is substring-based and case-insensitive: the service embeds
/// these phrases in longer exchange-specific messages.
pub fn classify_message(msg: &str) -> GatewayFault {
    let lower = msg.to_lowercase();
    if lower.contains("key is processing") {
        GatewayFault::KeyProcessing
    } else if lower.contains("position side does not match") {
        GatewayFault::PositionSideMismatch
    } else if lower.contains("invalid json") {
        GatewayFault::InvalidJson
    } else if lower.contains("network error") {
        GatewayFault::Network
    } else if lower.contains("immediately trigger") {
        GatewayFault::ImmediateTrigger
    } else if lower.contains("reduceonly order is rejected") {
        GatewayFault::ReduceOnlyRejected
    } else {
        GatewayFault::Other(msg.to_string())
    }
}
