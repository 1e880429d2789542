//! End-to-end scenarios: a plan runtime driven by a scripted feed, a
//! recording gateway and the in-memory store, under a paused clock.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use smo_core::{
    Candle, ExitKind, ExitLevel, LevelAmount, MarketKind, MarketRules, OrderKind, OrderSide,
    Phase, Price, Qty, RuntimeState, Symbol,
};
use smo_engine::testsupport::{plan_builder, MockGateway};
use smo_engine::{PlanRuntime, RuntimeConfig};
use smo_feed::ReplayFeed;
use smo_store::MemoryStore;

struct Harness {
    runtime: Arc<PlanRuntime>,
    gateway: Arc<MockGateway>,
    store: MemoryStore,
}

async fn harness(plan: smo_core::Plan) -> Harness {
    harness_with_state(plan, RuntimeState::new()).await
}

async fn harness_with_state(plan: smo_core::Plan, state: RuntimeState) -> Harness {
    let store = MemoryStore::new();
    store.set_market_rules(plan.symbol.clone(), plan.market_kind, MarketRules::new(2, 4));
    store.insert_plan(plan.clone());
    let gateway = Arc::new(MockGateway::new().with_store(store.clone()));
    let feed = Arc::new(ReplayFeed::from_closes(vec![]));

    let runtime = PlanRuntime::resume(
        plan,
        state,
        gateway.clone(),
        Arc::new(store.clone()),
        feed,
        RuntimeConfig::default(),
    )
    .await
    .expect("runtime builds");
    runtime.start().await.expect("runtime starts");

    Harness {
        runtime,
        gateway,
        store,
    }
}

impl Harness {
    /// Feed one traded price: resting triggers cross first, then the tick
    /// reaches the machine, then callbacks drain.
    async fn step(&self, close: Decimal) {
        self.gateway.cross(close);
        self.runtime.on_tick(Candle::flat(Price::new(close))).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    async fn drive(&self, closes: &[Decimal]) {
        for close in closes {
            self.step(*close).await;
        }
    }

    fn sells(&self) -> usize {
        self.gateway
            .create_calls()
            .iter()
            .filter(|c| c.side == OrderSide::Sell)
            .count()
    }

    fn buys(&self) -> usize {
        self.gateway
            .create_calls()
            .iter()
            .filter(|c| c.side == OrderSide::Buy)
            .count()
    }
}

fn percent_level(value: Decimal, amount_pct: Decimal, order_type: OrderKind) -> ExitLevel {
    ExitLevel {
        kind: ExitKind::PercentOfEntry,
        value,
        amount: LevelAmount::Percent(amount_pct),
        order_type,
        activate_price: Price::ZERO,
        entry_deviation_pct: Decimal::ZERO,
    }
}

fn in_entry_state(entry: Decimal, amount: Decimal) -> RuntimeState {
    let mut state = RuntimeState::new();
    state.phase = Phase::InEntry;
    state.entry_price = Price::new(entry);
    state.entry_amount = Qty::new(amount);
    state.entry_filled = Qty::new(amount);
    state
}

// ============================================================================
// Scenario 1: long entry + trailing TP + trend follow
// ============================================================================

#[tokio::test(start_paused = true)]
async fn trailing_entry_then_trailing_exit_follows_trend() {
    let mut plan = plan_builder()
        .entry_activate(dec!(6950))
        .entry_deviation(dec!(3))
        .amount(dec!(0.05))
        .leverage(100)
        .build();
    plan.exit_levels = vec![ExitLevel {
        kind: ExitKind::PercentOfEntry,
        value: dec!(5),
        amount: LevelAmount::Percent(dec!(100)),
        order_type: OrderKind::Limit,
        activate_price: Price::new(dec!(5)),
        entry_deviation_pct: dec!(3),
    }];

    let h = harness(plan).await;
    h.drive(&[
        dec!(7005),
        dec!(6950),
        dec!(6952.5),
        dec!(6959.5),
        dec!(6970),
        dec!(6975),
        dec!(7170),
    ])
    .await;

    let state = h.runtime.state_snapshot().await;
    assert_eq!(state.phase, Phase::InEntry);
    assert_eq!(state.entry_price, Price::new(dec!(6952.5)));
    assert_eq!(state.trailing_exit_price, Price::new(dec!(7170)));
    // The trailing exit kept replacing its stop as the trend extended.
    assert!(h.gateway.cancel_calls().len() >= 2);
    assert!(state.executed_amount.is_zero());
}

// ============================================================================
// Scenario 2: stop-loss on spot, market exit
// ============================================================================

#[tokio::test(start_paused = true)]
async fn spot_stop_loss_exits_at_market() {
    let plan = plan_builder()
        .market(MarketKind::Spot)
        .entry_limit(dec!(6999))
        .entry_activate(dec!(7000))
        .amount(dec!(0.05))
        .stop_loss(dec!(5))
        .leverage(1)
        .build();

    let h = harness_with_state(plan, in_entry_state(dec!(7000), dec!(0.05))).await;
    h.drive(&[dec!(7005), dec!(6900), dec!(6600)]).await;

    let state = h.runtime.state_snapshot().await;
    assert_eq!(state.phase, Phase::End);
    assert!(h.sells() >= 1);
    assert!(h
        .gateway
        .create_calls()
        .iter()
        .any(|c| c.symbol == "BTC_USDT"));
    assert_eq!(state.executed_amount, Qty::new(dec!(0.05)));
}

// ============================================================================
// Scenario 3: timeout-when-loss defers the exit
// ============================================================================

#[tokio::test(start_paused = true)]
async fn timeout_when_loss_defers_market_exit() {
    let plan = plan_builder()
        .market(MarketKind::Spot)
        .entry_limit(dec!(6999))
        .entry_activate(dec!(7000))
        .amount(dec!(0.05))
        .stop_loss(dec!(5))
        .timeout_when_loss(5)
        .leverage(1)
        .build();

    let h = harness_with_state(plan, in_entry_state(dec!(7000), dec!(0.05))).await;
    h.drive(&[dec!(7005), dec!(6900)]).await;

    // Not yet past the threshold: no latch.
    assert_eq!(h.runtime.state_snapshot().await.lossable_at, 0);

    h.drive(&[dec!(6600), dec!(6500), dec!(6500)]).await;

    // The first adverse tick latched; the position is still open.
    let state = h.runtime.state_snapshot().await;
    assert!(state.lossable_at > 0);
    assert_eq!(state.phase, Phase::InEntry);
    assert_eq!(h.sells(), 0);

    // After the 5-second window the exit fires at market.
    h.step(dec!(6500)).await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    h.step(dec!(6500)).await;

    let state = h.runtime.state_snapshot().await;
    assert_eq!(state.lossable_at, smo_core::LATCH_FIRED);
    assert_eq!(state.phase, Phase::End);
    assert!(h.sells() >= 1);
}

// ============================================================================
// Scenario 4: take-profit through all targets
// ============================================================================

#[tokio::test(start_paused = true)]
async fn take_profit_sweeps_all_targets() {
    let mut plan = plan_builder().amount(dec!(0.05)).leverage(1).build();
    plan.exit_levels = vec![
        percent_level(dec!(2), dec!(33), OrderKind::Market),
        percent_level(dec!(3), dec!(33), OrderKind::Market),
        percent_level(dec!(5), dec!(34), OrderKind::Market),
    ];

    let h = harness(plan).await;
    h.drive(&[dec!(7000), dec!(7140), dec!(7210), dec!(7350)]).await;

    let state = h.runtime.state_snapshot().await;
    assert_eq!(state.phase, Phase::End);
    assert_eq!(h.sells(), 3);

    let sold: Decimal = h
        .gateway
        .create_calls()
        .iter()
        .filter(|c| c.side == OrderSide::Sell)
        .map(|c| c.amount.inner())
        .sum();
    assert_eq!(sold, dec!(0.05));
    assert_eq!(state.executed_amount, Qty::new(dec!(0.05)));

    // Invariant: End issues no further orders.
    let calls_at_end = h.gateway.create_calls().len();
    h.step(dec!(7400)).await;
    assert_eq!(h.gateway.create_calls().len(), calls_at_end);
}

// ============================================================================
// Scenario 5: mandatory forced loss with external stop-loss
// ============================================================================

#[tokio::test(start_paused = true)]
async fn mandatory_forced_loss_places_hard_stop_only() {
    let mut plan = plan_builder().amount(dec!(0.05)).leverage(20).build();
    plan.stop_loss_external = true;
    plan.mandatory_forced_loss = true;
    plan.forced_loss_pct = dec!(10);

    let h = harness(plan).await;
    h.drive(&[dec!(7000), dec!(6995), dec!(6990)]).await;

    // Exactly one sell (the forced-loss stop), two calls total on the pair.
    assert_eq!(h.sells(), 1);
    assert_eq!(h.buys(), 1);
    let calls = h.gateway.create_calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.symbol == "BTC_USDT"));

    // The hard stop is a trigger order resting at the exchange.
    assert_eq!(h.gateway.resting_count(), 1);
    let state = h.runtime.state_snapshot().await;
    assert_eq!(state.forced_loss_order_ids.len(), 1);
}

// ============================================================================
// Scenario 6: averaging entry + aggregate close
// ============================================================================

#[tokio::test(start_paused = true)]
async fn multi_entry_averages_and_closes_aggregate() {
    let mut plan = plan_builder().stop_loss(dec!(5)).leverage(1).build();
    plan.entry_levels = vec![
        smo_core::EntryLeg {
            amount: Qty::new(dec!(0.01)),
            price: Price::new(dec!(6900)),
            place_without_loss: false,
        },
        smo_core::EntryLeg {
            amount: Qty::new(dec!(0.02)),
            price: Price::new(dec!(6800)),
            place_without_loss: false,
        },
        smo_core::EntryLeg {
            amount: Qty::new(dec!(0.02)),
            price: Price::new(dec!(6700)),
            place_without_loss: false,
        },
    ];
    plan.exit_levels = vec![percent_level(dec!(2), dec!(100), OrderKind::Market)];

    let h = harness(plan).await;
    h.drive(&[dec!(7000)]).await;

    // All legs filled; weighted entry = (69 + 136 + 134) / 0.05 = 6780.
    let state = h.runtime.state_snapshot().await;
    assert_eq!(state.entry_filled, Qty::new(dec!(0.05)));
    assert_eq!(state.entry_price, Price::new(dec!(6780)));
    assert_eq!(h.buys(), 3);

    // Aggregate stop-loss was refreshed once per leg fill.
    let stop_calls = h
        .gateway
        .create_calls()
        .iter()
        .filter(|c| {
            c.params.advanced_type.as_deref() == Some("stop-market") && c.side == OrderSide::Sell
        })
        .count();
    assert!(stop_calls >= 1 && stop_calls <= 3);

    h.drive(&[dec!(7100)]).await;

    let state = h.runtime.state_snapshot().await;
    assert_eq!(state.phase, Phase::End);
    assert_eq!(state.executed_amount, Qty::new(dec!(0.05)));
    assert!(h.sells() >= 1);

    // Terminal cleanup disabled the plan in the store.
    let stored = h
        .store
        .pnl_rows();
    assert!(!stored.is_empty());
}

// ============================================================================
// Persist → rehydrate → resume
// ============================================================================

#[tokio::test(start_paused = true)]
async fn state_rehydrates_and_resumes_to_terminal() {
    let plan = plan_builder()
        .market(MarketKind::Spot)
        .entry_limit(dec!(6999))
        .entry_activate(dec!(7000))
        .amount(dec!(0.05))
        .stop_loss(dec!(5))
        .leverage(1)
        .build();

    // Serialize the mid-flight state and bring it back.
    let state = in_entry_state(dec!(7000), dec!(0.05));
    let json = serde_json::to_string(&state).expect("serializes");
    let restored: RuntimeState = serde_json::from_str(&json).expect("deserializes");
    assert_eq!(state, restored);

    let h = harness_with_state(plan, restored).await;
    h.drive(&[dec!(6900), dec!(6600)]).await;

    let state = h.runtime.state_snapshot().await;
    assert_eq!(state.phase, Phase::End);
    assert_eq!(state.executed_amount, Qty::new(dec!(0.05)));
    assert_eq!(state.exit_price, Price::new(dec!(6600)));
}

// ============================================================================
// Peer probe
// ============================================================================

#[tokio::test(start_paused = true)]
async fn cancel_if_any_active_aborts_at_start() {
    let mut plan = plan_builder().build();
    plan.cancel_if_any_active = true;

    let peer = plan_builder().id("peer").build();

    let store = MemoryStore::new();
    store.set_market_rules(
        Symbol::new("BTC_USDT"),
        MarketKind::Futures,
        MarketRules::new(2, 4),
    );
    store.insert_plan(plan.clone());
    store.insert_plan(peer);

    let gateway = Arc::new(MockGateway::new());
    let feed = Arc::new(ReplayFeed::from_closes(vec![]));
    let runtime = PlanRuntime::new(
        plan,
        gateway.clone(),
        Arc::new(store.clone()),
        feed,
        RuntimeConfig::default(),
    )
    .await
    .expect("runtime builds");

    let result = runtime.start().await;
    assert!(result.is_err());
    assert_eq!(
        runtime.state_snapshot().await.phase,
        Phase::Canceled
    );
    assert!(gateway.create_calls().is_empty());
}
