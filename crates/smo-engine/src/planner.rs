//! The order planner.
//!
//! A pure function of `(step, plan, runtime state, price)` producing the next
//! order request, a deferral, or nothing. All prices and amounts are
//! quantized half-up to the per-market precision fetched at runtime
//! construction.

use rust_decimal::Decimal;
use tracing::trace;

use smo_core::{
    break_even_fee_pct, MarketRules, OrderBucket, OrderKind, OrderParams, OrderRequest,
    OrderVariant, Plan, PositionSide, Price, Qty, RuntimeState,
};

use crate::timers::TimerKind;

/// Planner step: which order the state machine asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Initial entry placement (market/limit/conditional).
    WaitForEntry,
    /// Trailing-entry stop placement/replacement at the current extremum.
    TrailingEntry,
    /// Post-trailing market entry (spot only).
    InEntry,
    /// One leg of an averaging entry.
    EntryLeg(usize),
    /// Take-profit slice for the selected exit target.
    TakeProfit,
    /// Stop-loss exit.
    Stoploss,
    /// Hard stop, always market-style, futures only.
    ForcedLoss,
    /// Break-even stop after profit.
    WithoutLoss,
    /// Flatten on cancellation.
    Canceled,
}

/// Planner decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Planned {
    /// Submit this order.
    Order(PlannedOrder),
    /// Nothing yet: arm a timer and come back.
    Defer(TimerKind),
    /// Nothing to do for this step.
    Skip,
}

/// A fully built order plus its bookkeeping hints.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedOrder {
    pub request: OrderRequest,
    /// Which state bucket records the id.
    pub bucket: OrderBucket,
    /// Cancel the previous id in the bucket after this one is accepted.
    pub cancel_previous: bool,
}

/// Produce the next order for a step, or decide not to.
pub fn plan_order(
    step: Step,
    plan: &Plan,
    state: &mut RuntimeState,
    price: Price,
    rules: &MarketRules,
    now: i64,
) -> Planned {
    trace!(?step, %price, "planning");
    match step {
        Step::WaitForEntry => plan_entry(plan, state, price, rules),
        Step::TrailingEntry => plan_trailing_entry(plan, state, rules),
        Step::InEntry => plan_post_trailing_entry(plan, state, price, rules),
        Step::EntryLeg(i) => plan_entry_leg(plan, state, i, rules),
        Step::TakeProfit => plan_take_profit(plan, state, price, rules),
        Step::Stoploss => plan_stop_loss(plan, state, price, rules, now),
        Step::ForcedLoss => plan_forced_loss(plan, state, rules),
        Step::WithoutLoss => plan_without_loss(plan, state, price, rules),
        Step::Canceled => plan_flatten(plan, state, price, rules),
    }
}

fn base_request(
    plan: &Plan,
    variant: OrderVariant,
    side: smo_core::OrderSide,
    amount: Qty,
    price: Price,
    stop_price: Option<Price>,
    reduce_only: bool,
    rules: &MarketRules,
) -> OrderRequest {
    let mut params = OrderParams {
        advanced_type: variant.advanced_type().map(str::to_string),
        ..Default::default()
    };
    // Spot stop-family orders carry balance/retry hints for the service.
    if plan.is_spot() && variant.is_trigger() {
        params.max_if_not_enough = Some(1);
        params.retry = Some(true);
    }
    OrderRequest {
        symbol: plan.symbol.as_str().to_string(),
        market_type: plan.market_kind.wire_name().to_string(),
        order_type: variant.wire_type().to_string(),
        side,
        amount: rules.round_amount(amount),
        price: rules.round_price(price),
        stop_price: stop_price.map(|p| rules.round_price(p)),
        reduce_only: reduce_only.then_some(true),
        position_side: (!plan.is_spot()).then(|| PositionSide::for_entry(plan.entry.side)),
        time_in_force: None,
        post_only: (variant == OrderVariant::MakerOnly).then_some(true),
        params,
    }
}

/// Leverage-scaled deviation offset in percent for trailing math.
fn trailing_offset_pct(plan: &Plan, deviation_pct: Decimal) -> Decimal {
    deviation_pct / plan.effective_leverage()
}

// ============================================================================
// Entries
// ============================================================================

fn plan_entry(plan: &Plan, state: &mut RuntimeState, price: Price, rules: &MarketRules) -> Planned {
    // Trailing entries place nothing here; TrailingEntry owns the stop.
    if plan.entry.is_trailing() {
        return Planned::Skip;
    }
    let entry = &plan.entry;
    let variant = entry.order_type.variant();
    let order_price = if variant == OrderVariant::Market || !entry.price.is_positive() {
        price
    } else {
        entry.price
    };
    let request = base_request(
        plan,
        variant,
        entry.side,
        state.entry_amount,
        order_price,
        None,
        entry.reduce_only,
        rules,
    );
    Planned::Order(PlannedOrder {
        request,
        bucket: OrderBucket::WaitForEntry,
        cancel_previous: false,
    })
}

fn plan_trailing_entry(plan: &Plan, state: &mut RuntimeState, rules: &MarketRules) -> Planned {
    // No stop-market support on spot: the market entry happens post-trail.
    if plan.is_spot() && plan.entry.order_type == OrderKind::Market {
        return Planned::Skip;
    }
    let entry = &plan.entry;
    let offset = trailing_offset_pct(plan, entry.entry_deviation_pct);
    // The stop rests on the reversal side of the extremum: above for buys,
    // below for sells.
    let trigger = state
        .trailing_entry_price
        .offset_pct(entry.side.direction() * offset);
    let variant = entry.order_type.variant().as_stop();
    let request = base_request(
        plan,
        variant,
        entry.side,
        state.entry_amount,
        trigger,
        Some(trigger),
        entry.reduce_only,
        rules,
    );
    // TrailingEntry supersedes explicitly: the runtime cancels the previous
    // stop after the replacement is accepted.
    Planned::Order(PlannedOrder {
        request,
        bucket: OrderBucket::WaitForEntry,
        cancel_previous: false,
    })
}

fn plan_post_trailing_entry(
    plan: &Plan,
    state: &mut RuntimeState,
    price: Price,
    rules: &MarketRules,
) -> Planned {
    // Only the spot trailing-market path lands here.
    if !plan.is_spot() {
        return Planned::Skip;
    }
    let request = base_request(
        plan,
        OrderVariant::Market,
        plan.entry.side,
        state.entry_amount,
        price,
        None,
        plan.entry.reduce_only,
        rules,
    );
    Planned::Order(PlannedOrder {
        request,
        bucket: OrderBucket::WaitForEntry,
        cancel_previous: false,
    })
}

fn plan_entry_leg(
    plan: &Plan,
    _state: &mut RuntimeState,
    index: usize,
    rules: &MarketRules,
) -> Planned {
    let Some(leg) = plan.entry_levels.get(index) else {
        return Planned::Skip;
    };
    let request = base_request(
        plan,
        OrderVariant::Limit,
        plan.entry.side,
        leg.amount,
        leg.price,
        None,
        false,
        rules,
    );
    Planned::Order(PlannedOrder {
        request,
        bucket: OrderBucket::WaitForEntry,
        cancel_previous: false,
    })
}

// ============================================================================
// Exits
// ============================================================================

fn plan_take_profit(
    plan: &Plan,
    state: &mut RuntimeState,
    price: Price,
    rules: &MarketRules,
) -> Planned {
    let side = plan.entry.side.opposite();

    // Sentinel: immediate market exit of whatever remains.
    if price.is_market_sentinel() {
        let remaining = state.entry_amount - state.executed_amount;
        if !remaining.is_positive() {
            return Planned::Skip;
        }
        let request = base_request(
            plan,
            OrderVariant::Market,
            side,
            remaining,
            Price::ZERO,
            None,
            true,
            rules,
        );
        return Planned::Order(PlannedOrder {
            request,
            bucket: OrderBucket::TakeProfit,
            cancel_previous: false,
        });
    }

    let Some(level) = plan.exit_levels.get(state.selected_exit_target) else {
        return Planned::Skip;
    };
    let amount = if state.amount.is_positive() {
        state.amount
    } else {
        level.amount.resolve(state.entry_amount)
    };

    let mut variant = level.order_type.variant();
    let trailing = level.is_trailing();
    let (order_price, stop_price) = if trailing {
        // Trail the extremum back by the leverage-scaled deviation. The
        // trigger sits on the give-back side of the extremum, so this is a
        // stop-family order even though it locks in profit.
        let offset = trailing_offset_pct(plan, level.entry_deviation_pct);
        let trigger = state
            .trailing_exit_price
            .offset_pct(-plan.entry.side.direction() * offset);
        variant = variant.as_stop();
        (trigger, Some(trigger))
    } else {
        let target =
            level.target_price(state.entry_price, plan.entry.side, plan.effective_leverage());
        if !plan.is_spot() && level.order_type != OrderKind::Market {
            variant = variant.as_take_profit();
            (target, Some(target))
        } else {
            (target, None)
        }
    };

    let request = base_request(plan, variant, side, amount, order_price, stop_price, true, rules);
    Planned::Order(PlannedOrder {
        request,
        bucket: OrderBucket::TakeProfit,
        // A trailing target replaces its predecessor.
        cancel_previous: trailing,
    })
}

fn plan_stop_loss(
    plan: &Plan,
    state: &mut RuntimeState,
    price: Price,
    rules: &MarketRules,
    now: i64,
) -> Planned {
    let side = plan.entry.side.opposite();
    let remaining = state.entry_amount - state.executed_amount;
    if !remaining.is_positive() {
        return Planned::Skip;
    }

    // Market-now paths: the `-1` override or a fired loss timer.
    let market_now = price.is_market_sentinel()
        || plan.stop_loss_price.is_market_sentinel()
        || state.lossable_at == smo_core::LATCH_FIRED;
    if market_now {
        let request = base_request(
            plan,
            OrderVariant::Market,
            side,
            remaining,
            Price::ZERO,
            None,
            true,
            rules,
        );
        return Planned::Order(PlannedOrder {
            request,
            bucket: OrderBucket::StopLoss,
            cancel_previous: false,
        });
    }

    // Deferred stop: the first call only latches and schedules; the
    // post-timer call places the order.
    if plan.timeout_loss_secs > 0 && state.stop_loss_at == 0 {
        state.stop_loss_at = now;
        return Planned::Defer(TimerKind::TimeoutLoss { price });
    }

    let lev = plan.effective_leverage();
    let trigger = if plan.stop_loss_price.is_positive() {
        plan.stop_loss_price
    } else {
        state
            .entry_price
            .offset_pct(-plan.entry.side.direction() * plan.stop_loss_pct / lev)
    };

    let variant = match plan.stop_loss_type {
        smo_core::StopLossKind::Market => {
            if plan.is_spot() {
                // No resting stop-market on spot: the loss guard already
                // fired, so exit at market directly.
                let request = base_request(
                    plan,
                    OrderVariant::Market,
                    side,
                    remaining,
                    Price::ZERO,
                    None,
                    true,
                    rules,
                );
                return Planned::Order(PlannedOrder {
                    request,
                    bucket: OrderBucket::StopLoss,
                    cancel_previous: false,
                });
            }
            OrderVariant::StopMarket
        }
        smo_core::StopLossKind::Limit => OrderVariant::StopLimit,
    };

    let request = base_request(plan, variant, side, remaining, trigger, Some(trigger), true, rules);
    Planned::Order(PlannedOrder {
        request,
        bucket: OrderBucket::StopLoss,
        cancel_previous: false,
    })
}

fn plan_forced_loss(plan: &Plan, state: &mut RuntimeState, rules: &MarketRules) -> Planned {
    // The hard stop is a futures trigger order; spot exits go through the
    // market-now stop-loss path instead.
    if plan.is_spot() {
        return Planned::Skip;
    }
    let side = plan.entry.side.opposite();
    let remaining = state.entry_amount - state.executed_amount;
    if !remaining.is_positive() {
        return Planned::Skip;
    }
    let trigger = if plan.forced_loss_price.is_positive() {
        plan.forced_loss_price
    } else {
        let lev = plan.effective_leverage();
        state
            .entry_price
            .offset_pct(-plan.entry.side.direction() * plan.forced_loss_pct / lev)
    };
    let request = base_request(
        plan,
        OrderVariant::StopMarket,
        side,
        remaining,
        trigger,
        Some(trigger),
        true,
        rules,
    );
    Planned::Order(PlannedOrder {
        request,
        bucket: OrderBucket::ForcedLoss,
        cancel_previous: false,
    })
}

fn plan_without_loss(
    plan: &Plan,
    state: &mut RuntimeState,
    price: Price,
    rules: &MarketRules,
) -> Planned {
    if state.entry_price.is_zero() {
        return Planned::Skip;
    }
    let side = plan.entry.side.opposite();
    let remaining = state.entry_amount - state.executed_amount;
    if !remaining.is_positive() {
        return Planned::Skip;
    }

    let fee = break_even_fee_pct(plan.market_kind, plan.hedge.hedging);
    let be_price = state
        .entry_price
        .offset_pct(plan.entry.side.direction() * fee);

    // If the market already moved past break-even, a stop there would be
    // rejected as immediate-trigger; use the take-profit variant instead.
    let passed = match plan.entry.side {
        smo_core::OrderSide::Buy => price > be_price,
        smo_core::OrderSide::Sell => price < be_price,
    };
    let variant = if passed {
        OrderVariant::TakeProfitMarket
    } else {
        OrderVariant::StopMarket
    };
    if plan.is_spot() && variant == OrderVariant::StopMarket {
        return Planned::Skip;
    }

    let request = base_request(
        plan,
        variant,
        side,
        remaining,
        be_price,
        Some(be_price),
        true,
        rules,
    );
    Planned::Order(PlannedOrder {
        request,
        bucket: OrderBucket::StopLoss,
        cancel_previous: false,
    })
}

fn plan_flatten(
    plan: &Plan,
    state: &mut RuntimeState,
    price: Price,
    rules: &MarketRules,
) -> Planned {
    // Never entered or already fully out: nothing to flatten.
    if state.entry_price.is_zero() || state.fill_complete(plan.is_spot()) {
        return Planned::Skip;
    }
    let remaining = state.entry_amount - state.executed_amount;
    if !remaining.is_positive() {
        return Planned::Skip;
    }
    let request = base_request(
        plan,
        OrderVariant::Market,
        plan.entry.side.opposite(),
        remaining,
        price,
        None,
        true,
        rules,
    );
    Planned::Order(PlannedOrder {
        request,
        bucket: OrderBucket::Other,
        cancel_previous: false,
    })
}
