//! Iteration-scoped timers.
//!
//! Every timer captures the plan's `iteration` at scheduling time. Expiry is
//! delivered as an `EngineEvent::Timer` through the runtime's event channel;
//! the machine drops it silently if the iteration advanced or the guarding
//! phase no longer holds.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

use smo_core::{Plan, Price};

use crate::runtime::EngineEvent;

/// Deferred arming delay for the forced loss after a multi-entry start:
/// gives all legs time to settle at the exchange.
pub const FORCED_LOSS_ARM_DELAY: Duration = Duration::from_secs(3);

/// Timer kinds, each guarding a specific phase predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Entry never triggered within `waiting_entry_timeout`.
    WaitingEntryTimeout,
    /// Periodic activation-price drift while waiting for entry.
    ActivationMove,
    /// Adverse latch expiry: exit at market if still underwater.
    TimeoutWhenLoss,
    /// Profitable latch expiry: take the profit at market.
    TimeoutIfProfitable,
    /// Deferred stop-loss placement at the originally observed price.
    TimeoutLoss { price: Price },
    /// Arm the forced loss once multi-entry legs can settle.
    ForcedLossArm,
}

impl TimerKind {
    /// Delay until expiry for this kind under the given plan.
    ///
    /// Returns `None` when the plan does not configure the timer.
    pub fn delay(&self, plan: &Plan) -> Option<Duration> {
        let secs = match self {
            Self::WaitingEntryTimeout => plan.waiting_entry_timeout_secs,
            Self::ActivationMove => plan.activation_move_timeout_secs,
            Self::TimeoutWhenLoss => plan.timeout_when_loss_secs,
            Self::TimeoutIfProfitable => plan.timeout_if_profitable_secs,
            Self::TimeoutLoss { .. } => plan.timeout_loss_secs,
            Self::ForcedLossArm => return Some(FORCED_LOSS_ARM_DELAY),
        };
        (secs > 0).then(|| Duration::from_secs(secs as u64))
    }
}

/// Spawn a one-shot timer delivering into the runtime's event channel.
///
/// The send fails silently when the runtime is gone; that is the correct
/// behavior for a timer outliving its plan.
pub fn spawn_timer(
    events: mpsc::Sender<EngineEvent>,
    kind: TimerKind,
    delay: Duration,
    iteration: u64,
) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trace!(?kind, iteration, "timer fired");
        let _ = events.send(EngineEvent::Timer { kind, iteration }).await;
    });
}
