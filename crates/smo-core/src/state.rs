//! Mutable runtime state of one executing plan.
//!
//! Persisted on every phase transition and on every material delta; the plan
//! record in the store is the durable source of truth and this state is
//! reconstructible from it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::{Price, Qty};
use crate::order::OrderId;
use crate::phase::Phase;

/// Spot fills reserve ~1% for fees: completion compares against
/// `entry_amount * 0.99`. Planning never applies this factor.
pub fn spot_fill_tolerance() -> Decimal {
    Decimal::new(99, 2)
}

/// Timestamp latch value meaning "timer fired, reset".
pub const LATCH_FIRED: i64 = -1;

/// Mutable, persisted execution state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeState {
    pub phase: Phase,

    /// Average entry fill price.
    #[serde(default)]
    pub entry_price: Price,
    /// Average exit fill price (latest exit leg).
    #[serde(default)]
    pub exit_price: Price,
    #[serde(default)]
    pub hedge_exit_price: Price,
    /// Running extremum while trailing the entry.
    #[serde(default)]
    pub trailing_entry_price: Price,
    /// Running extremum while trailing an exit target.
    #[serde(default)]
    pub trailing_exit_price: Price,
    #[serde(default)]
    pub trailing_hedge_exit_price: Price,

    /// Pending slice waiting to be placed.
    #[serde(default)]
    pub amount: Qty,
    /// Total filled so far across all exit legs.
    #[serde(default)]
    pub executed_amount: Qty,
    /// Total filled so far across entry legs (averaging entries).
    #[serde(default)]
    pub entry_filled: Qty,
    /// Resolved entry amount (absolute, after balance resolution).
    #[serde(default)]
    pub entry_amount: Qty,
    /// How many exit targets have been reached.
    #[serde(default)]
    pub reached_target_count: usize,
    /// Exit target currently being executed.
    #[serde(default)]
    pub selected_exit_target: usize,

    /// Every id ever placed for this plan.
    #[serde(default)]
    pub orders: Vec<OrderId>,
    /// Ids currently active for the current leg.
    #[serde(default)]
    pub executed_orders: Vec<OrderId>,
    #[serde(default)]
    pub stop_loss_order_ids: Vec<OrderId>,
    #[serde(default)]
    pub forced_loss_order_ids: Vec<OrderId>,
    #[serde(default)]
    pub take_profit_order_ids: Vec<OrderId>,
    #[serde(default)]
    pub wait_for_entry_ids: Vec<OrderId>,

    /// Unix seconds; `-1` means the timer fired and the latch is reset.
    #[serde(default)]
    pub stop_loss_at: i64,
    #[serde(default)]
    pub lossable_at: i64,
    #[serde(default)]
    pub profitable_at: i64,

    /// Bumped on every re-arm; timers and callbacks key off it.
    #[serde(default)]
    pub iteration: u64,
    /// Set when Stop flattened an open position.
    #[serde(default)]
    pub position_was_closed: bool,
    /// Error/diagnostic message.
    #[serde(default)]
    pub msg: String,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly placed order id into the global ledger and the
    /// per-purpose bucket.
    pub fn record_order(&mut self, id: OrderId, bucket: OrderBucket) {
        if !self.orders.contains(&id) {
            self.orders.push(id.clone());
        }
        if !self.executed_orders.contains(&id) {
            self.executed_orders.push(id.clone());
        }
        let bucket = match bucket {
            OrderBucket::WaitForEntry => &mut self.wait_for_entry_ids,
            OrderBucket::TakeProfit => &mut self.take_profit_order_ids,
            OrderBucket::StopLoss => &mut self.stop_loss_order_ids,
            OrderBucket::ForcedLoss => &mut self.forced_loss_order_ids,
            OrderBucket::Other => return,
        };
        if !bucket.contains(&id) {
            bucket.push(id);
        }
    }

    /// Drop a terminal id from every active bucket. The global `orders`
    /// ledger keeps it.
    pub fn retire_order(&mut self, id: &OrderId) {
        self.executed_orders.retain(|o| o != id);
        self.wait_for_entry_ids.retain(|o| o != id);
        self.take_profit_order_ids.retain(|o| o != id);
        self.stop_loss_order_ids.retain(|o| o != id);
        self.forced_loss_order_ids.retain(|o| o != id);
    }

    /// All ids that may still be resting at the exchange.
    pub fn active_order_ids(&self) -> Vec<OrderId> {
        self.executed_orders.clone()
    }

    /// Completion test: executed amount covers the entry amount, with the
    /// spot fee reserve applied on spot markets.
    pub fn fill_complete(&self, spot: bool) -> bool {
        if self.entry_amount.is_zero() {
            return false;
        }
        let target = if spot {
            self.entry_amount.inner() * spot_fill_tolerance()
        } else {
            self.entry_amount.inner()
        };
        self.executed_amount.inner() >= target
    }

    /// Reset mutable state for a re-arm, bumping the iteration.
    ///
    /// Order history (`orders`) and the resolved entry amount survive;
    /// everything leg-scoped resets.
    pub fn rearm(&mut self) {
        let iteration = self.iteration + 1;
        let orders = std::mem::take(&mut self.orders);
        let entry_amount = self.entry_amount;
        *self = Self {
            phase: Phase::WaitForEntry,
            orders,
            iteration,
            entry_amount,
            ..Self::default()
        };
    }
}

/// Per-purpose id buckets in the runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBucket {
    WaitForEntry,
    TakeProfit,
    StopLoss,
    ForcedLoss,
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_record_and_retire_order() {
        let mut state = RuntimeState::new();
        let id = OrderId::from("a1");
        state.record_order(id.clone(), OrderBucket::TakeProfit);

        assert_eq!(state.orders, vec![id.clone()]);
        assert_eq!(state.executed_orders, vec![id.clone()]);
        assert_eq!(state.take_profit_order_ids, vec![id.clone()]);

        state.retire_order(&id);
        assert!(state.executed_orders.is_empty());
        assert!(state.take_profit_order_ids.is_empty());
        // Global ledger keeps terminal ids.
        assert_eq!(state.orders, vec![id]);
    }

    #[test]
    fn test_record_order_dedup() {
        let mut state = RuntimeState::new();
        let id = OrderId::from("a1");
        state.record_order(id.clone(), OrderBucket::StopLoss);
        state.record_order(id.clone(), OrderBucket::StopLoss);
        assert_eq!(state.orders.len(), 1);
        assert_eq!(state.stop_loss_order_ids.len(), 1);
    }

    #[test]
    fn test_fill_complete_futures() {
        let mut state = RuntimeState::new();
        state.entry_amount = Qty::new(dec!(0.05));
        state.executed_amount = Qty::new(dec!(0.049));
        assert!(!state.fill_complete(false));

        state.executed_amount = Qty::new(dec!(0.05));
        assert!(state.fill_complete(false));
    }

    #[test]
    fn test_fill_complete_spot_tolerance() {
        let mut state = RuntimeState::new();
        state.entry_amount = Qty::new(dec!(0.05));
        // 0.0495 = 0.05 * 0.99, right at the spot tolerance
        state.executed_amount = Qty::new(dec!(0.0495));
        assert!(state.fill_complete(true));
        assert!(!state.fill_complete(false));
    }

    #[test]
    fn test_fill_complete_unresolved_entry() {
        let state = RuntimeState::new();
        assert!(!state.fill_complete(false));
    }

    #[test]
    fn test_rearm_resets_and_bumps_iteration() {
        let mut state = RuntimeState::new();
        state.phase = Phase::End;
        state.entry_price = Price::new(dec!(7000));
        state.executed_amount = Qty::new(dec!(0.05));
        state.iteration = 3;
        state.record_order(OrderId::from("a1"), OrderBucket::WaitForEntry);

        state.rearm();

        assert_eq!(state.phase, Phase::WaitForEntry);
        assert_eq!(state.iteration, 4);
        assert!(state.entry_price.is_zero());
        assert!(state.executed_amount.is_zero());
        assert!(state.executed_orders.is_empty());
        assert!(state.wait_for_entry_ids.is_empty());
        // Full order history survives re-arms.
        assert_eq!(state.orders.len(), 1);
    }
}
