//! The per-plan finite state machine.
//!
//! `fire` is a pure transition function over `(phase, trigger)`: guards read
//! the plan, the runtime state and the trigger payload, and side effects come
//! back as `Action` values for the runtime to execute. Guard evaluation never
//! places orders.
//!
//! Re-entry into the same state is explicitly permitted for:
//! - `TrailingEntry` on `Trade` (extremum replacement)
//! - `TakeProfit` on `CheckProfitTrade` (next target)
//! - `Stoploss` on `CheckLossTrade` (deferred market close)
//! - `InMultiEntry` and `End` on `CheckExistingOrders`

use rust_decimal::Decimal;
use tracing::{debug, trace};

use smo_core::{
    Candle, Phase, Plan, Price, Qty, RuntimeState, Trigger, TriggerPayload, LATCH_FIRED,
};

use crate::planner::Step;
use crate::timers::TimerKind;

/// What the runtime persists after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistKind {
    Phase,
    EntryPrice,
    Execution,
    Conditions,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Run the planner and submit the resulting order.
    Place {
        step: Step,
        price: Price,
        amount: Option<Qty>,
    },
    /// Cancel these ids concurrently.
    CancelOrders(Vec<smo_core::OrderId>),
    /// Cancel these ids one at a time (spot).
    CancelOrdersConsistently(Vec<smo_core::OrderId>),
    /// Start a timer scoped to the current iteration.
    Schedule(TimerKind),
    /// Kick off the paired hedge strategy.
    PlaceHedge,
    /// Persist a slice of state.
    Persist(PersistKind),
    /// Cascade another trigger in the same event turn.
    Publish(Trigger),
    /// The plan reached a terminal phase; run the stop cycle.
    Finished,
}

/// The plan and its runtime state under the transition lock.
#[derive(Debug)]
pub struct PlanCell {
    pub plan: Plan,
    pub state: RuntimeState,
}

impl PlanCell {
    pub fn new(plan: Plan, state: RuntimeState) -> Self {
        Self { plan, state }
    }
}

/// Fire one trigger. Returns the side effects to execute, in order.
pub fn fire(
    cell: &mut PlanCell,
    trigger: Trigger,
    payload: &TriggerPayload,
    now: i64,
) -> Vec<Action> {
    let phase = cell.state.phase;
    trace!(phase = %phase, trigger = %trigger, "firing");

    match (phase, trigger) {
        (Phase::WaitForEntry, Trigger::Trade) => on_wait_for_entry_trade(cell, payload),
        (Phase::WaitForEntry, Trigger::Spread) => on_wait_for_entry_spread(cell, payload),
        (Phase::WaitForEntry | Phase::TrailingEntry, Trigger::TriggerTimeout) => {
            transition(cell, Phase::Timeout, "entry wait timed out");
            let mut actions = cancel_active(cell);
            actions.push(Action::Persist(PersistKind::Phase));
            actions.push(Action::Finished);
            actions
        }

        (Phase::TrailingEntry, Trigger::Trade) => on_trailing_entry_trade(cell, payload),
        (Phase::WaitForEntry | Phase::TrailingEntry, Trigger::CheckExistingOrders) => {
            on_entry_fill(cell, payload)
        }
        (Phase::InEntry, Trigger::CheckExistingOrders) => {
            // Without the order purpose, fall back on the fill accounting:
            // before any exit fill this must be the entry's own callback.
            if cell.state.executed_amount.is_zero() {
                on_entry_fill(cell, payload)
            } else {
                on_exit_fill(cell, payload)
            }
        }
        (Phase::InMultiEntry, Trigger::CheckExistingOrders) => {
            on_multi_entry_leg_fill(cell, payload)
        }

        (
            Phase::InEntry | Phase::InMultiEntry | Phase::TakeProfit | Phase::EnterNextTarget,
            Trigger::Trade,
        ) => on_position_trade(cell, payload, now),
        (Phase::Stoploss | Phase::HedgeLoss, Trigger::Trade) => {
            vec![Action::Publish(Trigger::CheckLossTrade)]
        }
        (
            Phase::InEntry | Phase::InMultiEntry | Phase::TakeProfit | Phase::EnterNextTarget,
            Trigger::Spread,
        ) => on_position_spread(cell, payload),

        (
            Phase::InEntry | Phase::InMultiEntry | Phase::TakeProfit | Phase::EnterNextTarget,
            Trigger::CheckProfitTrade | Trigger::CheckSpreadProfitTrade,
        ) => check_profit(cell, payload),
        (
            Phase::InEntry | Phase::InMultiEntry | Phase::TakeProfit | Phase::EnterNextTarget,
            Trigger::CheckTrailingProfitTrade,
        ) => check_trailing_profit(cell, payload),
        (
            Phase::InEntry | Phase::InMultiEntry | Phase::Stoploss,
            Trigger::CheckLossTrade | Trigger::CheckTrailingLossTrade,
        ) => check_loss(cell, payload, now),
        (Phase::InEntry | Phase::InMultiEntry, Trigger::CheckHedgeLoss) => {
            check_hedge_loss(cell, payload)
        }

        (
            Phase::TakeProfit
            | Phase::EnterNextTarget
            | Phase::Stoploss
            | Phase::HedgeLoss
            | Phase::Canceled,
            Trigger::CheckExistingOrders,
        ) => on_exit_fill(cell, payload),
        (Phase::WaitLossHedge, Trigger::CheckHedgeLoss | Trigger::CheckExistingOrders) => {
            // The peer strategy reported; we are done.
            transition(cell, Phase::End, "");
            vec![Action::Persist(PersistKind::Phase), Action::Finished]
        }
        (Phase::End, Trigger::CheckExistingOrders) => {
            // Late callbacks after completion only retire bookkeeping.
            vec![]
        }

        (Phase::Timeout | Phase::End | Phase::Canceled, Trigger::Restart) => on_restart(cell),

        _ => {
            trace!(phase = %phase, trigger = %trigger, "no transition");
            vec![]
        }
    }
}

/// Reconciler entry point: route a terminal order callback by its purpose.
///
/// This is `CheckExistingOrders` with the ambiguity resolved: the in-flight
/// map knows whether the id belonged to an entry or an exit.
pub fn fire_order(
    cell: &mut PlanCell,
    record: &smo_core::OrderRecord,
    purpose: crate::executor::OrderPurpose,
    _now: i64,
) -> Vec<Action> {
    use crate::executor::OrderPurpose;
    let payload = TriggerPayload::Order(record.clone());
    if cell.state.phase == Phase::End {
        return vec![];
    }
    match purpose {
        OrderPurpose::Entry | OrderPurpose::TrailingEntry => on_entry_fill(cell, &payload),
        OrderPurpose::EntryLeg(_) => on_multi_entry_leg_fill(cell, &payload),
        _ => on_exit_fill(cell, &payload),
    }
}

/// Change phase and record the diagnostic message.
fn transition(cell: &mut PlanCell, to: Phase, msg: &str) {
    debug!(plan = %cell.plan.id, from = %cell.state.phase, to = %to, "phase transition");
    cell.state.phase = to;
    if !msg.is_empty() {
        cell.state.msg = msg.to_string();
    }
}

/// Cancel everything still resting, serially on spot.
fn cancel_active(cell: &PlanCell) -> Vec<Action> {
    let ids = cell.state.active_order_ids();
    if ids.is_empty() {
        return vec![];
    }
    if cell.plan.is_spot() {
        vec![Action::CancelOrdersConsistently(ids)]
    } else {
        vec![Action::CancelOrders(ids)]
    }
}

/// Entry trigger crossing test: price has reached the activation level in
/// the side's direction.
fn activation_crossed(close: Price, activate: Price, side: smo_core::OrderSide) -> bool {
    if activate.is_market_sentinel() {
        return true;
    }
    match side {
        smo_core::OrderSide::Buy => close <= activate,
        smo_core::OrderSide::Sell => close >= activate,
    }
}

// ============================================================================
// WaitForEntry
// ============================================================================

fn on_wait_for_entry_trade(cell: &mut PlanCell, payload: &TriggerPayload) -> Vec<Action> {
    let Some(tick) = payload.tick().copied() else {
        return vec![];
    };
    if !cell.plan.enabled {
        return vec![];
    }
    // A placement already in flight: never double-submit the entry.
    if !cell.state.wait_for_entry_ids.is_empty() {
        return vec![];
    }

    let entry = &cell.plan.entry;
    let close = tick.close;

    // Trailing entry arms once the activation level is crossed.
    if entry.is_trailing() {
        if !activation_crossed(close, entry.activate_price, entry.side) {
            return vec![];
        }
        transition(cell, Phase::TrailingEntry, "");
        cell.state.trailing_entry_price = close;
        return vec![
            Action::Persist(PersistKind::Phase),
            Action::Place {
                step: Step::TrailingEntry,
                price: close,
                amount: None,
            },
        ];
    }

    // Conditional (activation-gated) entries wait for the crossing.
    if !entry.activate_price.is_zero()
        && !activation_crossed(close, entry.activate_price, entry.side)
    {
        return vec![];
    }

    // Averaging entry: place every leg at once.
    if cell.plan.has_entry_levels() {
        transition(cell, Phase::InMultiEntry, "");
        let mut actions = vec![Action::Persist(PersistKind::Phase)];
        for (i, leg) in cell.plan.entry_levels.iter().enumerate() {
            actions.push(Action::Place {
                step: Step::EntryLeg(i),
                price: leg.price,
                amount: Some(leg.amount),
            });
        }
        actions.push(Action::Schedule(TimerKind::ForcedLossArm));
        return actions;
    }

    // Plain entry.
    transition(cell, Phase::InEntry, "");
    vec![
        Action::Persist(PersistKind::Phase),
        Action::Place {
            step: Step::WaitForEntry,
            price: close,
            amount: None,
        },
    ]
}

fn on_wait_for_entry_spread(cell: &mut PlanCell, payload: &TriggerPayload) -> Vec<Action> {
    let Some(spread) = payload.spread().copied() else {
        return vec![];
    };
    if !spread_tradeable(&cell.plan, &spread) {
        return vec![];
    }
    on_wait_for_entry_trade(cell, &TriggerPayload::Tick(Candle::flat(spread.close)))
}

/// Liquidity filter for spread-driven events:
/// `best_ask/best_bid - 1 > 2 * fee_rate`.
fn spread_tradeable(plan: &Plan, spread: &smo_core::SpreadSnapshot) -> bool {
    let Some(relative) = spread.relative() else {
        return false;
    };
    let fee = smo_core::fee_rate_pct(plan.market_kind) / Decimal::ONE_HUNDRED;
    relative > fee * Decimal::TWO
}

// ============================================================================
// TrailingEntry
// ============================================================================

fn on_trailing_entry_trade(cell: &mut PlanCell, payload: &TriggerPayload) -> Vec<Action> {
    let Some(tick) = payload.tick().copied() else {
        return vec![];
    };
    let side = cell.plan.entry.side;
    let close = tick.close;

    // Seed the extremum from the first bar when resuming mid-trail.
    if cell.state.trailing_entry_price.is_zero() {
        cell.state.trailing_entry_price = tick.open;
    }

    let extremum = cell.state.trailing_entry_price;

    // New extremum in the adverse-to-entry direction: follow it down (buy)
    // or up (sell) and replace the resting stop.
    let new_extremum = match side {
        smo_core::OrderSide::Buy => close < extremum,
        smo_core::OrderSide::Sell => close > extremum,
    };
    if new_extremum {
        cell.state.trailing_entry_price = close;
        return vec![Action::Place {
            step: Step::TrailingEntry,
            price: close,
            amount: None,
        }];
    }

    // Reversal beyond the deviation: fire the entry. On futures the resting
    // stop order is already in the book and will fill on its own; the spot
    // market path places the entry synchronously.
    let deviation = cell.plan.entry.entry_deviation_pct / cell.plan.effective_leverage();
    let moved = close
        .pct_from(extremum)
        .map(|p| p.abs() >= deviation)
        .unwrap_or(false);
    if moved
        && cell.plan.is_spot()
        && cell.plan.entry.order_type == smo_core::OrderKind::Market
        && cell.state.wait_for_entry_ids.is_empty()
    {
        transition(cell, Phase::InEntry, "");
        return vec![
            Action::Persist(PersistKind::Phase),
            Action::Place {
                step: Step::InEntry,
                price: close,
                amount: None,
            },
        ];
    }

    vec![]
}

// ============================================================================
// Entry fills
// ============================================================================

fn on_entry_fill(cell: &mut PlanCell, payload: &TriggerPayload) -> Vec<Action> {
    let Some(order) = payload.order() else {
        return vec![];
    };
    if !order.status.is_fill() {
        // A canceled/expired entry order leaves us waiting.
        return vec![];
    }

    let was_trailing = cell.state.phase == Phase::TrailingEntry;
    transition(cell, Phase::InEntry, "");

    let mut actions = vec![
        Action::Persist(PersistKind::EntryPrice),
        Action::Persist(PersistKind::Phase),
    ];

    // Superseded trailing stops may still rest at the exchange.
    if was_trailing && !cell.state.wait_for_entry_ids.is_empty() {
        actions.push(Action::CancelOrders(cell.state.wait_for_entry_ids.clone()));
    }

    // The hard stop goes in as soon as the position exists.
    if cell.plan.forced_loss_armed() {
        actions.push(Action::Place {
            step: Step::ForcedLoss,
            price: cell.state.entry_price,
            amount: None,
        });
    }

    if cell.plan.timeout_if_profitable_secs > 0 {
        actions.push(Action::Schedule(TimerKind::TimeoutIfProfitable));
    }

    actions
}

// ============================================================================
// Position phases: tick fan-out
// ============================================================================

fn on_position_trade(cell: &mut PlanCell, payload: &TriggerPayload, now: i64) -> Vec<Action> {
    let Some(tick) = payload.tick().copied() else {
        return vec![];
    };
    let mut actions = vec![];

    // Profitable-timeout latch: first profitable tick starts the clock.
    if cell.plan.timeout_if_profitable_secs > 0 && !cell.state.entry_price.is_zero() {
        let pct = smo_core::profit_pct(
            cell.state.entry_price,
            tick.close,
            cell.plan.effective_leverage(),
            cell.plan.entry.side,
        );
        if pct > Decimal::ZERO {
            if cell.state.profitable_at == 0 {
                cell.state.profitable_at = now;
            }
        } else if cell.state.profitable_at > 0 {
            cell.state.profitable_at = 0;
        }
    }

    // Break-even stop once profit clears the configured threshold.
    if should_arm_without_loss(cell, tick.close) {
        actions.push(Action::Place {
            step: Step::WithoutLoss,
            price: tick.close,
            amount: None,
        });
    }

    let has_trailing_exit = cell
        .plan
        .exit_levels
        .iter()
        .any(smo_core::ExitLevel::is_trailing);

    actions.push(Action::Publish(Trigger::CheckProfitTrade));
    if has_trailing_exit {
        actions.push(Action::Publish(Trigger::CheckTrailingProfitTrade));
    }
    actions.push(Action::Publish(Trigger::CheckLossTrade));
    if cell.plan.hedge.hedging {
        actions.push(Action::Publish(Trigger::CheckHedgeLoss));
    }
    actions
}

fn should_arm_without_loss(cell: &PlanCell, close: Price) -> bool {
    let threshold = cell.plan.without_loss_after_profit_pct;
    if threshold.is_zero() || cell.state.entry_price.is_zero() {
        return false;
    }
    if !cell.state.stop_loss_order_ids.is_empty() {
        return false;
    }
    let pct = smo_core::profit_pct(
        cell.state.entry_price,
        close,
        cell.plan.effective_leverage(),
        cell.plan.entry.side,
    );
    pct >= threshold
}

fn on_position_spread(cell: &mut PlanCell, payload: &TriggerPayload) -> Vec<Action> {
    let Some(spread) = payload.spread().copied() else {
        return vec![];
    };
    if !spread_tradeable(&cell.plan, &spread) {
        return vec![];
    }
    vec![Action::Publish(Trigger::CheckSpreadProfitTrade)]
}

// ============================================================================
// Profit guards
// ============================================================================

/// Price carried by either a tick or a spread payload.
fn payload_close(payload: &TriggerPayload) -> Option<Price> {
    match payload {
        TriggerPayload::Tick(tick) => Some(tick.close),
        TriggerPayload::Spread(spread) => Some(spread.close),
        _ => None,
    }
}

/// The slice for exit level `i`; the last target absorbs rounding leftovers.
pub fn slice_for_level(plan: &Plan, entry_amount: Qty, i: usize) -> Qty {
    if i + 1 == plan.exit_levels.len() {
        let prior: Qty = plan.exit_levels[..i]
            .iter()
            .fold(Qty::ZERO, |acc, l| acc + l.amount.resolve(entry_amount));
        entry_amount - prior
    } else {
        plan.exit_levels[i].amount.resolve(entry_amount)
    }
}

fn check_profit(cell: &mut PlanCell, payload: &TriggerPayload) -> Vec<Action> {
    let Some(close) = payload_close(payload) else {
        return vec![];
    };
    if cell.state.entry_price.is_zero() {
        return vec![];
    }

    let i = cell.state.reached_target_count;
    let Some(level) = cell.plan.exit_levels.get(i) else {
        return vec![];
    };
    if level.is_trailing() {
        return vec![];
    }

    let lev = cell.plan.effective_leverage();
    let side = cell.plan.entry.side;
    let target = level.target_price(cell.state.entry_price, side, lev);
    let crossed = match side {
        smo_core::OrderSide::Buy => close >= target,
        smo_core::OrderSide::Sell => close <= target,
    };
    if !crossed {
        return vec![];
    }

    let level_order_type = level.order_type;

    let slice = slice_for_level(&cell.plan, cell.state.entry_amount, i);
    cell.state.reached_target_count = i + 1;
    cell.state.selected_exit_target = i;
    cell.state.amount = slice;

    let from_phase = cell.state.phase;
    let mut actions = vec![];
    if from_phase == Phase::TakeProfit {
        // Another leg while the previous one executes.
        transition(cell, Phase::EnterNextTarget, "");
    } else if from_phase != Phase::EnterNextTarget {
        transition(cell, Phase::TakeProfit, "");
    }
    actions.push(Action::Persist(PersistKind::Phase));
    actions.push(Action::Place {
        step: Step::TakeProfit,
        price: close,
        amount: Some(slice),
    });

    // Market-style futures targets may cascade into the next level on the
    // same tick, capped by the number of levels.
    let market_like = level_order_type == smo_core::OrderKind::Market
        && !cell.plan.is_spot()
        && cell.state.reached_target_count < cell.plan.exit_levels.len();
    if market_like {
        actions.push(Action::Publish(Trigger::CheckProfitTrade));
    }
    actions
}

fn check_trailing_profit(cell: &mut PlanCell, payload: &TriggerPayload) -> Vec<Action> {
    let Some(close) = payload_close(payload) else {
        return vec![];
    };
    if cell.state.entry_price.is_zero() {
        return vec![];
    }

    let i = cell.state.reached_target_count;
    let Some(level) = cell.plan.exit_levels.get(i) else {
        return vec![];
    };
    if !level.is_trailing() {
        return vec![];
    }

    let lev = cell.plan.effective_leverage();
    let side = cell.plan.entry.side;

    // Not yet activated: wait for the activation crossing in profit direction.
    if cell.state.trailing_exit_price.is_zero() {
        let threshold = match level.kind {
            smo_core::ExitKind::AbsolutePrice => level.activate_price,
            smo_core::ExitKind::PercentOfEntry => cell
                .state
                .entry_price
                .offset_pct(side.direction() * level.activate_price.inner() / lev),
        };
        let crossed = match side {
            smo_core::OrderSide::Buy => close >= threshold,
            smo_core::OrderSide::Sell => close <= threshold,
        };
        if !crossed {
            return vec![];
        }
        cell.state.trailing_exit_price = close;
        cell.state.selected_exit_target = i;
        cell.state.amount = slice_for_level(&cell.plan, cell.state.entry_amount, i);
        return vec![Action::Place {
            step: Step::TakeProfit,
            price: close,
            amount: Some(cell.state.amount),
        }];
    }

    // Trailing: follow new extrema in the profit direction and replace the
    // resting target order.
    let better = match side {
        smo_core::OrderSide::Buy => close > cell.state.trailing_exit_price,
        smo_core::OrderSide::Sell => close < cell.state.trailing_exit_price,
    };
    if better {
        cell.state.trailing_exit_price = close;
        return vec![Action::Place {
            step: Step::TakeProfit,
            price: close,
            amount: Some(cell.state.amount),
        }];
    }
    vec![]
}

// ============================================================================
// Loss guards
// ============================================================================

fn check_loss(cell: &mut PlanCell, payload: &TriggerPayload, now: i64) -> Vec<Action> {
    let Some(close) = payload_close(payload) else {
        return vec![];
    };
    if cell.state.entry_price.is_zero() {
        return vec![];
    }
    // Stop-loss owned by an external system: nothing to do here. The hard
    // stop, when mandated, was placed on entry.
    if !cell.plan.owns_stop_loss() {
        return vec![];
    }

    let plan = &cell.plan;
    let no_timeouts = plan.timeout_when_loss_secs == 0 && plan.timeout_loss_secs == 0;
    if !cell.state.stop_loss_order_ids.is_empty() && no_timeouts {
        return vec![];
    }

    let side = plan.entry.side;
    let lev = plan.effective_leverage();
    let entry = cell.state.entry_price;

    // Absolute override `-1`: exit at market now.
    if plan.stop_loss_price.is_market_sentinel() {
        return place_stop(cell, Price::MARKET_SENTINEL);
    }

    let loss_pct = match side {
        smo_core::OrderSide::Buy => {
            (entry.inner() - close.inner()) / entry.inner() * Decimal::ONE_HUNDRED
        }
        smo_core::OrderSide::Sell => {
            (close.inner() - entry.inner()) / entry.inner() * Decimal::ONE_HUNDRED
        }
    };

    let adverse = if plan.stop_loss_price.is_positive() {
        match side {
            smo_core::OrderSide::Buy => close <= plan.stop_loss_price,
            smo_core::OrderSide::Sell => close >= plan.stop_loss_price,
        }
    } else if plan.stop_loss_pct.is_zero() {
        false
    } else {
        loss_pct >= plan.stop_loss_pct / lev
    };

    // Deferred-exit mode: the first adverse tick latches the timestamp; the
    // exit happens only if the timer finds the latch unchanged.
    if plan.timeout_when_loss_secs > 0 {
        if adverse {
            if cell.state.lossable_at == 0 {
                cell.state.lossable_at = now;
                return vec![Action::Schedule(TimerKind::TimeoutWhenLoss)];
            }
        } else if cell.state.lossable_at > 0 {
            // Recovered before the timer: reset the latch.
            cell.state.lossable_at = 0;
        }
        return vec![];
    }

    if !adverse {
        return vec![];
    }

    // Spot hard stop: a crossed forced-loss exits at market immediately.
    if plan.is_spot() && !plan.forced_loss_pct.is_zero() {
        let forced = loss_pct >= plan.forced_loss_pct / lev;
        if forced {
            return place_stop(cell, Price::MARKET_SENTINEL);
        }
    }

    if cell.state.stop_loss_order_ids.is_empty() {
        return place_stop(cell, close);
    }
    vec![]
}

fn place_stop(cell: &mut PlanCell, price: Price) -> Vec<Action> {
    if cell.state.phase != Phase::Stoploss {
        transition(cell, Phase::Stoploss, "");
    }
    vec![
        Action::Persist(PersistKind::Phase),
        Action::Place {
            step: Step::Stoploss,
            price,
            amount: None,
        },
    ]
}

fn check_hedge_loss(cell: &mut PlanCell, payload: &TriggerPayload) -> Vec<Action> {
    let Some(close) = payload_close(payload) else {
        return vec![];
    };
    let plan = &cell.plan;
    if !plan.hedge.hedging || cell.state.entry_price.is_zero() {
        return vec![];
    }
    let deviation = plan.hedge.hedge_loss_deviation_pct;
    if deviation.is_zero() {
        return vec![];
    }

    let pct = smo_core::profit_pct(
        cell.state.entry_price,
        close,
        plan.effective_leverage(),
        plan.entry.side,
    );
    if pct > -deviation {
        return vec![];
    }

    transition(cell, Phase::HedgeLoss, "");
    vec![
        Action::Persist(PersistKind::Phase),
        Action::PlaceHedge,
        Action::Place {
            step: Step::Stoploss,
            price: Price::MARKET_SENTINEL,
            amount: None,
        },
    ]
}

// ============================================================================
// Exit fills and completion
// ============================================================================

/// Averaging entry: a filled leg refreshes the aggregate stop-loss at most
/// once, against the new weighted entry price.
fn on_multi_entry_leg_fill(cell: &mut PlanCell, payload: &TriggerPayload) -> Vec<Action> {
    let Some(order) = payload.order() else {
        return vec![];
    };
    let mut actions = vec![Action::Persist(PersistKind::Execution)];
    if !order.status.is_fill() {
        return actions;
    }
    if cell.plan.owns_stop_loss() && !cell.plan.stop_loss_pct.is_zero() {
        let old = cell.state.stop_loss_order_ids.clone();
        if !old.is_empty() {
            actions.push(if cell.plan.is_spot() {
                Action::CancelOrdersConsistently(old)
            } else {
                Action::CancelOrders(old)
            });
            cell.state.stop_loss_order_ids.clear();
        }
        actions.push(Action::Place {
            step: Step::Stoploss,
            price: cell.state.entry_price,
            amount: None,
        });
    }
    actions
}

fn on_exit_fill(cell: &mut PlanCell, payload: &TriggerPayload) -> Vec<Action> {
    if payload.order().is_none() {
        return vec![];
    }

    let mut actions = vec![Action::Persist(PersistKind::Execution)];

    // EnterNextTarget resolves back into TakeProfit once its order reports.
    if cell.state.phase == Phase::EnterNextTarget {
        transition(cell, Phase::TakeProfit, "");
        actions.push(Action::Persist(PersistKind::Phase));
    }

    // Exit complete? Canceled stays canceled; its stop cycle already ran.
    if cell.state.fill_complete(cell.plan.is_spot()) && cell.state.phase != Phase::Canceled {
        if cell.plan.hedge.hedging {
            transition(cell, Phase::WaitLossHedge, "");
            actions.push(Action::Persist(PersistKind::Phase));
        } else {
            transition(cell, Phase::End, "");
            actions.push(Action::Persist(PersistKind::Phase));
            actions.push(Action::Finished);
        }
    }
    actions
}

// ============================================================================
// Re-arm
// ============================================================================

fn on_restart(cell: &mut PlanCell) -> Vec<Action> {
    if !cell.plan.continue_if_ended || cell.state.position_was_closed {
        return vec![];
    }
    cell.state.rearm();
    // Hedge flows re-enter with the entry side flipped.
    if cell.plan.hedge.hedging {
        cell.plan.entry.side = cell.plan.entry.side.opposite();
    }
    debug!(plan = %cell.plan.id, iteration = cell.state.iteration, "re-armed");
    vec![
        Action::Persist(PersistKind::Phase),
        Action::Schedule(TimerKind::WaitingEntryTimeout),
        Action::Schedule(TimerKind::ActivationMove),
    ]
}

/// Timer expiry entry point: validates iteration and phase, then returns the
/// actions for the timer's effect. Stale timers are dropped silently.
pub fn fire_timer(cell: &mut PlanCell, kind: TimerKind, iteration: u64, now: i64) -> Vec<Action> {
    if iteration != cell.state.iteration {
        trace!(?kind, "stale timer dropped (iteration advanced)");
        return vec![];
    }
    match kind {
        TimerKind::WaitingEntryTimeout => {
            if cell.state.phase.is_pre_entry() {
                fire(cell, Trigger::TriggerTimeout, &TriggerPayload::None, now)
            } else {
                vec![]
            }
        }
        TimerKind::ActivationMove => {
            if cell.state.phase != Phase::WaitForEntry {
                return vec![];
            }
            let step = cell.plan.activation_move_step_pct / cell.plan.effective_leverage();
            let entry = &mut cell.plan.entry;
            // Walk the trigger toward the market so a drifting price still
            // meets the entry eventually.
            entry.activate_price = match entry.side {
                smo_core::OrderSide::Buy => entry.activate_price.offset_pct(step),
                smo_core::OrderSide::Sell => entry.activate_price.offset_pct(-step),
            };
            vec![
                Action::Persist(PersistKind::Conditions),
                Action::Schedule(TimerKind::ActivationMove),
            ]
        }
        TimerKind::TimeoutWhenLoss => {
            // Only exit if the adverse latch survived until expiry.
            if cell.state.lossable_at > 0 && cell.state.phase.holds_position() {
                cell.state.lossable_at = LATCH_FIRED;
                place_stop(cell, Price::MARKET_SENTINEL)
            } else {
                vec![]
            }
        }
        TimerKind::TimeoutIfProfitable => {
            if cell.state.profitable_at > 0 && cell.state.phase.holds_position() {
                cell.state.profitable_at = LATCH_FIRED;
                cell.state.selected_exit_target = cell.state.reached_target_count;
                vec![Action::Place {
                    step: Step::TakeProfit,
                    price: Price::MARKET_SENTINEL,
                    amount: None,
                }]
            } else {
                vec![]
            }
        }
        TimerKind::TimeoutLoss { price } => {
            if cell.state.phase == Phase::Stoploss {
                vec![Action::Place {
                    step: Step::Stoploss,
                    price,
                    amount: None,
                }]
            } else {
                vec![]
            }
        }
        TimerKind::ForcedLossArm => {
            if cell.state.phase == Phase::InMultiEntry && cell.plan.forced_loss_armed() {
                vec![Action::Place {
                    step: Step::ForcedLoss,
                    price: cell.state.entry_price,
                    amount: None,
                }]
            } else {
                vec![]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{plan_builder, tick};
    use rust_decimal_macros::dec;
    use smo_core::{ExitKind, LevelAmount, OrderKind, OrderSide};

    fn cell_with(plan: Plan) -> PlanCell {
        let mut state = RuntimeState::new();
        state.entry_amount = Qty::new(dec!(0.05));
        PlanCell::new(plan, state)
    }

    #[test]
    fn test_market_entry_fires_immediately() {
        let plan = plan_builder().build();
        let mut cell = cell_with(plan);

        let actions = fire(&mut cell, Trigger::Trade, &tick(dec!(7005)), 0);
        assert_eq!(cell.state.phase, Phase::InEntry);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Place { step: Step::WaitForEntry, .. })));
    }

    #[test]
    fn test_conditional_entry_waits_for_crossing() {
        let plan = plan_builder()
            .entry_activate(dec!(7000))
            .entry_limit(dec!(6999))
            .build();
        let mut cell = cell_with(plan);

        // Above the trigger: no entry for a buy.
        let actions = fire(&mut cell, Trigger::Trade, &tick(dec!(7005)), 0);
        assert!(actions.is_empty());
        assert_eq!(cell.state.phase, Phase::WaitForEntry);

        // Crossing from above fires.
        let actions = fire(&mut cell, Trigger::Trade, &tick(dec!(6900)), 0);
        assert_eq!(cell.state.phase, Phase::InEntry);
        assert!(!actions.is_empty());
    }

    #[test]
    fn test_trailing_entry_arms_and_tracks() {
        let plan = plan_builder()
            .entry_activate(dec!(6950))
            .entry_deviation(dec!(3))
            .leverage(100)
            .build();
        let mut cell = cell_with(plan);

        // No crossing yet.
        assert!(fire(&mut cell, Trigger::Trade, &tick(dec!(7005)), 0).is_empty());

        // Crossing arms trailing and records the extremum.
        let actions = fire(&mut cell, Trigger::Trade, &tick(dec!(6950)), 0);
        assert_eq!(cell.state.phase, Phase::TrailingEntry);
        assert_eq!(cell.state.trailing_entry_price, Price::new(dec!(6950)));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Place { step: Step::TrailingEntry, .. })));

        // New low replaces the stop.
        let actions = fire(&mut cell, Trigger::Trade, &tick(dec!(6940)), 0);
        assert_eq!(cell.state.trailing_entry_price, Price::new(dec!(6940)));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Place { step: Step::TrailingEntry, .. })));

        // Higher tick within the deviation: no action.
        assert!(fire(&mut cell, Trigger::Trade, &tick(dec!(6940.5)), 0).is_empty());
    }

    #[test]
    fn test_entry_fill_advances_to_in_entry() {
        let plan = plan_builder()
            .entry_activate(dec!(6950))
            .entry_deviation(dec!(3))
            .leverage(100)
            .build();
        let mut cell = cell_with(plan);
        cell.state.phase = Phase::TrailingEntry;
        cell.state.entry_price = Price::new(dec!(6952.5));

        let payload = TriggerPayload::Order(smo_core::OrderRecord::new(
            smo_core::OrderId::from("e1"),
            smo_core::OrderStatus::Filled,
            Price::new(dec!(6952.085)),
            Price::new(dec!(6952.5)),
            Qty::new(dec!(0.05)),
        ));
        fire(&mut cell, Trigger::CheckExistingOrders, &payload, 0);
        assert_eq!(cell.state.phase, Phase::InEntry);
    }

    #[test]
    fn test_check_profit_places_slice_and_cascades() {
        let mut plan = plan_builder().leverage(100).build();
        plan.exit_levels = vec![
            smo_core::ExitLevel {
                kind: ExitKind::PercentOfEntry,
                value: dec!(2),
                amount: LevelAmount::Percent(dec!(50)),
                order_type: OrderKind::Market,
                activate_price: Price::ZERO,
                entry_deviation_pct: Decimal::ZERO,
            },
            smo_core::ExitLevel {
                kind: ExitKind::PercentOfEntry,
                value: dec!(4),
                amount: LevelAmount::Percent(dec!(50)),
                order_type: OrderKind::Market,
                activate_price: Price::ZERO,
                entry_deviation_pct: Decimal::ZERO,
            },
        ];
        let mut cell = cell_with(plan);
        cell.state.phase = Phase::InEntry;
        cell.state.entry_price = Price::new(dec!(7000));

        // First target at 7000 * (1 + 0.02/100) = 7001.4.
        let actions = fire(
            &mut cell,
            Trigger::CheckProfitTrade,
            &tick(dec!(7001.4)),
            0,
        );
        assert_eq!(cell.state.phase, Phase::TakeProfit);
        assert_eq!(cell.state.reached_target_count, 1);
        assert_eq!(cell.state.amount, Qty::new(dec!(0.025)));
        // Market futures target cascades to check the next level.
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Publish(Trigger::CheckProfitTrade))));
    }

    #[test]
    fn test_check_profit_second_level_enters_next_target() {
        let mut plan = plan_builder().leverage(1).build();
        plan.exit_levels = vec![
            smo_core::ExitLevel {
                kind: ExitKind::AbsolutePrice,
                value: dec!(7100),
                amount: LevelAmount::Percent(dec!(50)),
                order_type: OrderKind::Limit,
                activate_price: Price::ZERO,
                entry_deviation_pct: Decimal::ZERO,
            },
            smo_core::ExitLevel {
                kind: ExitKind::AbsolutePrice,
                value: dec!(7200),
                amount: LevelAmount::Percent(dec!(50)),
                order_type: OrderKind::Limit,
                activate_price: Price::ZERO,
                entry_deviation_pct: Decimal::ZERO,
            },
        ];
        let mut cell = cell_with(plan);
        cell.state.phase = Phase::TakeProfit;
        cell.state.entry_price = Price::new(dec!(7000));
        cell.state.reached_target_count = 1;

        let actions = fire(&mut cell, Trigger::CheckProfitTrade, &tick(dec!(7200)), 0);
        assert_eq!(cell.state.phase, Phase::EnterNextTarget);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Place { step: Step::TakeProfit, .. })));
    }

    #[test]
    fn test_check_loss_fires_once() {
        let plan = plan_builder().stop_loss(dec!(5)).leverage(1).build();
        let mut cell = cell_with(plan);
        cell.state.phase = Phase::InEntry;
        cell.state.entry_price = Price::new(dec!(7000));

        // 5% below 7000 = 6650.
        let actions = fire(&mut cell, Trigger::CheckLossTrade, &tick(dec!(6600)), 0);
        assert_eq!(cell.state.phase, Phase::Stoploss);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Place { step: Step::Stoploss, .. })));

        // Pretend the stop is in flight: no duplicate.
        cell.state
            .record_order(smo_core::OrderId::from("sl1"), smo_core::OrderBucket::StopLoss);
        let actions = fire(&mut cell, Trigger::CheckLossTrade, &tick(dec!(6500)), 0);
        assert!(!actions
            .iter()
            .any(|a| matches!(a, Action::Place { .. })));
    }

    #[test]
    fn test_check_loss_latches_timeout() {
        let plan = plan_builder()
            .stop_loss(dec!(5))
            .timeout_when_loss(5)
            .leverage(1)
            .build();
        let mut cell = cell_with(plan);
        cell.state.phase = Phase::InEntry;
        cell.state.entry_price = Price::new(dec!(7000));

        let actions = fire(&mut cell, Trigger::CheckLossTrade, &tick(dec!(6600)), 100);
        assert_eq!(cell.state.lossable_at, 100);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Schedule(TimerKind::TimeoutWhenLoss))));
        // Still InEntry: the exit is deferred.
        assert_eq!(cell.state.phase, Phase::InEntry);

        // Recovery resets the latch.
        fire(&mut cell, Trigger::CheckLossTrade, &tick(dec!(7000)), 101);
        assert_eq!(cell.state.lossable_at, 0);
    }

    #[test]
    fn test_timeout_when_loss_timer_exits_at_market() {
        let plan = plan_builder()
            .stop_loss(dec!(5))
            .timeout_when_loss(5)
            .leverage(1)
            .build();
        let mut cell = cell_with(plan);
        cell.state.phase = Phase::InEntry;
        cell.state.entry_price = Price::new(dec!(7000));
        cell.state.lossable_at = 100;

        let actions = fire_timer(&mut cell, TimerKind::TimeoutWhenLoss, 0, 105);
        assert_eq!(cell.state.lossable_at, LATCH_FIRED);
        assert_eq!(cell.state.phase, Phase::Stoploss);
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Place { step: Step::Stoploss, price, .. } if price.is_market_sentinel()
        )));
    }

    #[test]
    fn test_stale_timer_dropped() {
        let plan = plan_builder().build();
        let mut cell = cell_with(plan);
        cell.state.iteration = 2;
        let actions = fire_timer(&mut cell, TimerKind::WaitingEntryTimeout, 1, 0);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_waiting_entry_timeout() {
        let plan = plan_builder().build();
        let mut cell = cell_with(plan);

        let actions = fire_timer(&mut cell, TimerKind::WaitingEntryTimeout, 0, 0);
        assert_eq!(cell.state.phase, Phase::Timeout);
        assert!(actions.iter().any(|a| matches!(a, Action::Finished)));
    }

    #[test]
    fn test_restart_rearms_and_flips_hedge_side() {
        let mut plan = plan_builder().build();
        plan.continue_if_ended = true;
        plan.hedge.hedging = true;
        let mut cell = cell_with(plan);
        cell.state.phase = Phase::End;
        cell.state.iteration = 1;

        fire(&mut cell, Trigger::Restart, &TriggerPayload::None, 0);
        assert_eq!(cell.state.phase, Phase::WaitForEntry);
        assert_eq!(cell.state.iteration, 2);
        assert_eq!(cell.plan.entry.side, OrderSide::Sell);
    }

    #[test]
    fn test_restart_blocked_when_position_closed() {
        let mut plan = plan_builder().build();
        plan.continue_if_ended = true;
        let mut cell = cell_with(plan);
        cell.state.phase = Phase::Timeout;
        cell.state.position_was_closed = true;

        let actions = fire(&mut cell, Trigger::Restart, &TriggerPayload::None, 0);
        assert!(actions.is_empty());
        assert_eq!(cell.state.phase, Phase::Timeout);
    }

    #[test]
    fn test_completion_goes_to_end() {
        let plan = plan_builder().build();
        let mut cell = cell_with(plan);
        cell.state.phase = Phase::TakeProfit;
        cell.state.entry_price = Price::new(dec!(7000));
        cell.state.executed_amount = Qty::new(dec!(0.05));

        let payload = TriggerPayload::Order(smo_core::OrderRecord::new(
            smo_core::OrderId::from("tp1"),
            smo_core::OrderStatus::Filled,
            Price::new(dec!(7100)),
            Price::new(dec!(7100)),
            Qty::new(dec!(0.05)),
        ));
        let actions = fire(&mut cell, Trigger::CheckExistingOrders, &payload, 0);
        assert_eq!(cell.state.phase, Phase::End);
        assert!(actions.iter().any(|a| matches!(a, Action::Finished)));
    }

    #[test]
    fn test_hedged_completion_waits_for_peer() {
        let mut plan = plan_builder().build();
        plan.hedge.hedging = true;
        let mut cell = cell_with(plan);
        cell.state.phase = Phase::HedgeLoss;
        cell.state.entry_price = Price::new(dec!(7000));
        cell.state.executed_amount = Qty::new(dec!(0.05));

        let payload = TriggerPayload::Order(smo_core::OrderRecord::new(
            smo_core::OrderId::from("h1"),
            smo_core::OrderStatus::Filled,
            Price::new(dec!(6800)),
            Price::new(dec!(6800)),
            Qty::new(dec!(0.05)),
        ));
        fire(&mut cell, Trigger::CheckExistingOrders, &payload, 0);
        assert_eq!(cell.state.phase, Phase::WaitLossHedge);
    }

    #[test]
    fn test_activation_move_walks_trigger() {
        let mut plan = plan_builder()
            .entry_activate(dec!(7000))
            .entry_limit(dec!(6999))
            .leverage(1)
            .build();
        plan.activation_move_timeout_secs = 30;
        plan.activation_move_step_pct = dec!(1);
        let mut cell = cell_with(plan);

        let actions = fire_timer(&mut cell, TimerKind::ActivationMove, 0, 0);
        // Buy trigger walks up by 1%.
        assert_eq!(cell.plan.entry.activate_price, Price::new(dec!(7070)));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Schedule(TimerKind::ActivationMove))));
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Persist(PersistKind::Conditions))));
    }
}
