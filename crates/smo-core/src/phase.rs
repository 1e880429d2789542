//! State-machine vocabulary: phases, triggers and their payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::market::{Candle, SpreadSnapshot};
use crate::order::OrderRecord;
use crate::plan::PlanId;

/// Execution phase of one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No position yet; waiting for the entry predicate.
    #[default]
    WaitForEntry,
    /// Activation crossed; tracking a running extremum for the stop entry.
    TrailingEntry,
    /// Position held; normal operating state.
    InEntry,
    /// Averaging entry in progress; some legs filled, more pending.
    InMultiEntry,
    /// A profit target is being executed.
    TakeProfit,
    /// Another take-profit leg can be placed while still in TakeProfit.
    EnterNextTarget,
    /// Loss threshold met; exit in progress.
    Stoploss,
    /// Paired-strategy loss coordination: hedge being placed.
    HedgeLoss,
    /// Paired-strategy loss coordination: waiting on the peer.
    WaitLossHedge,
    /// Entry never triggered within the waiting window.
    Timeout,
    /// Cancellation requested externally or by policy.
    Canceled,
    /// Unrecoverable gateway rejection; plan disabled.
    Error,
    /// Terminal success.
    End,
}

impl Phase {
    /// Phases after which the runtime issues no new orders.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End | Self::Canceled | Self::Timeout | Self::Error)
    }

    /// Phases in which a position is (or may be) held.
    pub fn holds_position(&self) -> bool {
        matches!(
            self,
            Self::InEntry
                | Self::InMultiEntry
                | Self::TakeProfit
                | Self::EnterNextTarget
                | Self::Stoploss
                | Self::HedgeLoss
                | Self::WaitLossHedge
        )
    }

    /// Phases still waiting for the entry to trigger.
    pub fn is_pre_entry(&self) -> bool {
        matches!(self, Self::WaitForEntry | Self::TrailingEntry)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WaitForEntry => "wait_for_entry",
            Self::TrailingEntry => "trailing_entry",
            Self::InEntry => "in_entry",
            Self::InMultiEntry => "in_multi_entry",
            Self::TakeProfit => "take_profit",
            Self::EnterNextTarget => "enter_next_target",
            Self::Stoploss => "stoploss",
            Self::HedgeLoss => "hedge_loss",
            Self::WaitLossHedge => "wait_loss_hedge",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::Error => "error",
            Self::End => "end",
        };
        write!(f, "{s}")
    }
}

/// State-machine trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trigger {
    /// New market tick.
    Trade,
    /// New best bid/ask snapshot.
    Spread,
    /// A fill/cancel callback arrived.
    CheckExistingOrders,
    CheckProfitTrade,
    CheckLossTrade,
    CheckTrailingProfitTrade,
    CheckTrailingLossTrade,
    CheckHedgeLoss,
    CheckSpreadProfitTrade,
    TriggerTimeout,
    Restart,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Tagged trigger payload; guards destructure explicitly.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum TriggerPayload {
    Tick(Candle),
    Spread(SpreadSnapshot),
    Order(OrderRecord),
    Strategy(PlanId),
    #[default]
    None,
}

impl TriggerPayload {
    pub fn tick(&self) -> Option<&Candle> {
        match self {
            Self::Tick(c) => Some(c),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<&SpreadSnapshot> {
        match self {
            Self::Spread(s) => Some(s),
            _ => None,
        }
    }

    pub fn order(&self) -> Option<&OrderRecord> {
        match self {
            Self::Order(o) => Some(o),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phases() {
        assert!(Phase::End.is_terminal());
        assert!(Phase::Canceled.is_terminal());
        assert!(Phase::Timeout.is_terminal());
        assert!(Phase::Error.is_terminal());
        assert!(!Phase::InEntry.is_terminal());
        assert!(!Phase::TakeProfit.is_terminal());
    }

    #[test]
    fn test_position_phases() {
        assert!(Phase::InEntry.holds_position());
        assert!(Phase::Stoploss.holds_position());
        assert!(!Phase::WaitForEntry.holds_position());
        assert!(!Phase::End.holds_position());
    }

    #[test]
    fn test_pre_entry_phases() {
        assert!(Phase::WaitForEntry.is_pre_entry());
        assert!(Phase::TrailingEntry.is_pre_entry());
        assert!(!Phase::InEntry.is_pre_entry());
    }
}
