//! The per-plan runtime: one event loop driving one state machine.
//!
//! Each plan runs as an independent tokio task. Within a plan, a single
//! transition mutex (the `PlanCell` lock) serializes guard evaluation and
//! state mutation; the executor's in-flight map has its own lock; order
//! placement and retries run with the transition lock released.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use smo_core::{
    Candle, FeedKey, MarketRules, OrderBucket, OrderId, OrderRecord, Phase, Plan, Price, Qty,
    RuntimeState, SpreadSnapshot, Trigger, TriggerPayload,
};
use smo_feed::DataFeed;
use smo_gateway::TradingGateway;
use smo_store::StateStore;

use crate::error::{EngineError, EngineResult};
use crate::executor::{OrderExecutor, OrderPurpose, SubmitOutcome};
use crate::machine::{self, Action, PersistKind, PlanCell};
use crate::planner::{self, Planned, Step};
use crate::reconciler;
use crate::timers::{spawn_timer, TimerKind};

/// Default market poll interval for the OHLCV path.
pub const POLL_INTERVAL: Duration = Duration::from_millis(60);

/// Cap on trigger cascades within one event turn.
const MAX_CASCADE: usize = 16;

/// Runtime construction parameters.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Exchange name for feed snapshot lookups.
    pub exchange: String,
    /// Market poll interval.
    pub poll_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            exchange: "binance".to_string(),
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// Events consumed by the plan's event loop.
#[derive(Debug)]
pub enum EngineEvent {
    Tick(Candle),
    Spread(SpreadSnapshot),
    OrderUpdate(OrderRecord),
    Timer { kind: TimerKind, iteration: u64 },
    Stop,
}

/// One plan's execution runtime.
pub struct PlanRuntime {
    cell: Mutex<PlanCell>,
    executor: OrderExecutor,
    gateway: Arc<dyn TradingGateway>,
    store: Arc<dyn StateStore>,
    feed: Arc<dyn DataFeed>,
    rules: MarketRules,
    feed_key: FeedKey,
    config: RuntimeConfig,
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<EngineEvent>>>,
    stopped: AtomicBool,
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

impl PlanRuntime {
    /// Build a runtime for a fresh plan.
    pub async fn new(
        plan: Plan,
        gateway: Arc<dyn TradingGateway>,
        store: Arc<dyn StateStore>,
        feed: Arc<dyn DataFeed>,
        config: RuntimeConfig,
    ) -> EngineResult<Arc<Self>> {
        Self::resume(plan, RuntimeState::new(), gateway, store, feed, config).await
    }

    /// Rehydrate a runtime from persisted state.
    pub async fn resume(
        plan: Plan,
        state: RuntimeState,
        gateway: Arc<dyn TradingGateway>,
        store: Arc<dyn StateStore>,
        feed: Arc<dyn DataFeed>,
        config: RuntimeConfig,
    ) -> EngineResult<Arc<Self>> {
        let rules = store
            .market_rules(&plan.symbol, plan.market_kind)
            .await?
            .ok_or_else(|| {
                EngineError::InvalidPlan(format!(
                    "no market rules for {} {}",
                    plan.symbol, plan.market_kind
                ))
            })?;

        let feed_key = FeedKey::new(config.exchange.clone(), plan.symbol.clone(), plan.market_kind);
        let executor = OrderExecutor::new(gateway.clone(), plan.id.clone());
        let (events_tx, events_rx) = mpsc::channel(256);

        Ok(Arc::new(Self {
            cell: Mutex::new(PlanCell::new(plan, state)),
            executor,
            gateway,
            store,
            feed,
            rules,
            feed_key,
            config,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            stopped: AtomicBool::new(false),
        }))
    }

    /// Plan id, for logs and registries.
    pub async fn plan_id(&self) -> smo_core::PlanId {
        self.cell.lock().await.plan.id.clone()
    }

    /// Snapshot the runtime state (tests, admin surfaces).
    pub async fn state_snapshot(&self) -> RuntimeState {
        self.cell.lock().await.state.clone()
    }

    /// Prepare the plan for execution and start the event loop.
    ///
    /// Performs the peer probe, resolves the entry amount, pushes leverage,
    /// persists the initial phase and arms the waiting timers.
    pub async fn start(self: &Arc<Self>) -> EngineResult<()> {
        let (plan, iteration) = {
            let cell = self.cell.lock().await;
            (cell.plan.clone(), cell.state.iteration)
        };

        // Peer probe: abort when another enabled plan works the same market.
        if plan.cancel_if_any_active {
            let peers = self
                .store
                .active_peers(&plan.account_key, &plan.symbol, plan.market_kind)
                .await?;
            if peers.iter().any(|p| *p != plan.id) {
                warn!(plan = %plan.id, "peer plan active, canceling at start");
                {
                    let mut cell = self.cell.lock().await;
                    cell.state.phase = Phase::Canceled;
                    cell.state.msg = "peer plan active".to_string();
                }
                self.persist(PersistKind::Phase).await;
                self.store.set_enabled(&plan.id, false).await?;
                return Err(EngineError::PeerActive(plan.symbol.to_string()));
            }
        }

        // Resolve the entry amount once; percent sizing reads the balance.
        let entry_amount = if plan.has_entry_levels() {
            plan.entry_levels_total()
        } else {
            match plan.entry.amount {
                smo_core::AmountSpec::Absolute(qty) => qty,
                smo_core::AmountSpec::PercentOfBalance(pct) => {
                    let balance = self.store.free_balance(&plan.account_key).await?.ok_or_else(
                        || {
                            EngineError::InvalidPlan(format!(
                                "no balance for account {}",
                                plan.account_key
                            ))
                        },
                    )?;
                    balance.pct(pct)
                }
            }
        };
        {
            let mut cell = self.cell.lock().await;
            if cell.state.entry_amount.is_zero() {
                cell.state.entry_amount = self.rules.round_amount(entry_amount);
            }
        }

        // Leverage is pushed once at start; spot always runs at 1.
        if !plan.is_spot() && plan.leverage > 1 {
            if let Err(err) = self
                .gateway
                .update_leverage(&plan.account_key, plan.leverage, &plan.symbol)
                .await
            {
                warn!(plan = %plan.id, error = %err, "leverage update failed");
            }
        }
        if plan.hedge.hedging {
            if let Err(err) = self.gateway.set_hedge_mode(&plan.account_key, true).await {
                warn!(plan = %plan.id, error = %err, "hedge mode update failed");
            }
        }

        self.persist(PersistKind::Phase).await;
        self.schedule(TimerKind::WaitingEntryTimeout, iteration).await;
        self.schedule(TimerKind::ActivationMove, iteration).await;

        // Event loop: order callbacks and timers.
        let rx = self.events_rx.lock().await.take();
        if let Some(mut rx) = rx {
            let runtime = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if runtime.stopped.load(Ordering::Acquire) {
                        break;
                    }
                    runtime.process_event(event).await;
                }
            });
        }

        info!(plan = %plan.id, "runtime started");
        Ok(())
    }

    /// Market poll loop. Runs until the plan stops.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if self.stopped.load(Ordering::Acquire) {
                break;
            }
            if let Some(candle) = self.feed.price(&self.feed_key) {
                self.on_tick(candle).await;
            }
            if let Some(spread) = self.feed.spread(&self.feed_key) {
                self.on_spread(spread).await;
            }
        }
        debug!("poll loop finished");
    }

    async fn process_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::Tick(candle) => self.on_tick(candle).await,
            EngineEvent::Spread(spread) => self.on_spread(spread).await,
            EngineEvent::OrderUpdate(record) => self.on_order_update(record).await,
            EngineEvent::Timer { kind, iteration } => self.on_timer(kind, iteration).await,
            EngineEvent::Stop => self.stop().await,
        }
    }

    /// Feed a market tick through the machine.
    pub async fn on_tick(&self, candle: Candle) {
        self.dispatch(Trigger::Trade, TriggerPayload::Tick(candle)).await;
    }

    /// Feed a spread snapshot through the machine.
    pub async fn on_spread(&self, spread: SpreadSnapshot) {
        self.dispatch(Trigger::Spread, TriggerPayload::Spread(spread)).await;
    }

    /// Handle a terminal order callback.
    pub async fn on_order_update(&self, record: OrderRecord) {
        if !record.status.is_terminal() {
            return;
        }
        // At-most-once: absent means a duplicate or foreign callback.
        let Some(purpose) = self.executor.take_in_flight(&record.id) else {
            debug!(order = %record.id, "duplicate or unknown callback, ignoring");
            return;
        };

        let (applied, actions, symbol) = {
            let mut cell = self.cell.lock().await;
            let applied = reconciler::apply_order(&mut cell, &record, purpose);
            let actions = machine::fire_order(&mut cell, &record, purpose, now_secs());
            (applied, actions, cell.plan.symbol.clone())
        };
        smo_telemetry::metrics::ORDERS_RECONCILED
            .with_label_values(&[symbol.as_str(), &record.status.to_string()])
            .inc();

        if applied.entry_updated {
            self.persist(PersistKind::EntryPrice).await;
        }
        if let Some(fill) = applied.exit_fill {
            self.persist(PersistKind::Execution).await;
            let (plan_id, template, hedge_exit) = {
                let cell = self.cell.lock().await;
                let hedge_exit = (cell.plan.hedge.hedging
                    && !cell.state.hedge_exit_price.is_zero())
                .then_some(cell.state.hedge_exit_price);
                (
                    cell.plan.id.clone(),
                    cell.plan.template_id.clone(),
                    hedge_exit,
                )
            };
            if let Some(price) = hedge_exit {
                if let Err(err) = self.store.update_hedge_exit_price(&plan_id, price).await {
                    warn!(error = %err, "hedge exit price persist failed");
                }
            }
            let pnl_key = template.unwrap_or(plan_id);
            if let Err(err) = self.store.append_pnl(&pnl_key, fill.amount).await {
                warn!(error = %err, "pnl append failed");
            }
            if let Some(pnl) = fill.amount.to_f64() {
                smo_telemetry::metrics::REALIZED_PNL
                    .with_label_values(&[pnl_key.as_str()])
                    .add(pnl);
            }
        }

        let mut queue = VecDeque::new();
        self.execute_actions(actions, &TriggerPayload::Order(record), &mut queue)
            .await;
        self.drain_cascade(queue).await;
    }

    /// Handle a timer expiry.
    pub async fn on_timer(&self, kind: TimerKind, iteration: u64) {
        let actions = {
            let mut cell = self.cell.lock().await;
            machine::fire_timer(&mut cell, kind, iteration, now_secs())
        };
        let mut queue = VecDeque::new();
        self.execute_actions(actions, &TriggerPayload::None, &mut queue)
            .await;
        self.drain_cascade(queue).await;
    }

    async fn dispatch(&self, trigger: Trigger, payload: TriggerPayload) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let mut queue = VecDeque::new();
        queue.push_back((trigger, payload));
        self.drain_cascade(queue).await;
    }

    async fn drain_cascade(&self, mut queue: VecDeque<(Trigger, TriggerPayload)>) {
        let mut fired = 0;
        while let Some((trigger, payload)) = queue.pop_front() {
            fired += 1;
            if fired > MAX_CASCADE {
                warn!("trigger cascade cap hit, dropping remainder");
                break;
            }
            let (actions, before, after) = {
                let mut cell = self.cell.lock().await;
                let before = cell.state.phase;
                let actions = machine::fire(&mut cell, trigger, &payload, now_secs());
                (actions, before, cell.state.phase)
            };
            if before != after {
                smo_telemetry::metrics::PHASE_TRANSITIONS
                    .with_label_values(&[&before.to_string(), &after.to_string()])
                    .inc();
            }
            self.execute_actions(actions, &payload, &mut queue).await;
        }
    }

    async fn execute_actions(
        &self,
        actions: Vec<Action>,
        payload: &TriggerPayload,
        queue: &mut VecDeque<(Trigger, TriggerPayload)>,
    ) {
        for action in actions {
            match action {
                Action::Publish(trigger) => queue.push_back((trigger, payload.clone())),
                Action::Place { step, price, amount } => {
                    self.place_order(price, amount, step).await;
                }
                Action::CancelOrders(ids) => {
                    let plan = self.plan_snapshot().await;
                    self.executor.cancel_all(&plan, &ids).await;
                }
                Action::CancelOrdersConsistently(ids) => {
                    let plan = self.plan_snapshot().await;
                    self.executor.cancel_all_consistently(&plan, &ids).await;
                }
                Action::Schedule(kind) => {
                    let iteration = self.cell.lock().await.state.iteration;
                    self.schedule(kind, iteration).await;
                }
                Action::PlaceHedge => {
                    let plan = self.plan_snapshot().await;
                    if let Err(err) = self.gateway.place_hedge(&plan).await {
                        warn!(plan = %plan.id, error = %err, "hedge placement failed");
                    }
                }
                Action::Persist(kind) => self.persist(kind).await,
                Action::Finished => self.finish().await,
            }
        }
    }

    async fn plan_snapshot(&self) -> Plan {
        self.cell.lock().await.plan.clone()
    }

    /// Plan and submit one order. Public for the admin/backtest surface.
    pub async fn place_order(&self, price: Price, amount: Option<Qty>, step: Step) {
        // Compute the request under the transition lock, submit without it.
        let (planned, plan, supersede) = {
            let mut cell = self.cell.lock().await;
            // Terminal phases issue no new orders; the cancellation flatten
            // is the one deliberate exception.
            if cell.state.phase == Phase::End
                || (cell.state.phase.is_terminal() && step != Step::Canceled)
            {
                return;
            }
            if !cell.plan.enabled && step != Step::Canceled {
                return;
            }
            if let Some(amount) = amount {
                cell.state.amount = amount;
            }
            let (plan_clone, planned) = {
                let PlanCell { plan, state } = &mut *cell;
                let planned = planner::plan_order(step, plan, state, price, &self.rules, now_secs());
                (plan.clone(), planned)
            };
            // Trailing replacements supersede the previous resting order.
            let supersede = match step {
                Step::TrailingEntry => cell.state.wait_for_entry_ids.clone(),
                _ => vec![],
            };
            (planned, plan_clone, supersede)
        };

        match planned {
            Planned::Skip => {}
            Planned::Defer(kind) => {
                let iteration = self.cell.lock().await.state.iteration;
                self.schedule(kind, iteration).await;
            }
            Planned::Order(order) => {
                let purpose = purpose_for(step);
                let cancel_previous = order.cancel_previous;
                let bucket = order.bucket;
                smo_telemetry::metrics::ORDERS_SUBMITTED
                    .with_label_values(&[plan.symbol.as_str(), step_label(step)])
                    .inc();
                match self.executor.submit(&plan, order.request, purpose).await {
                    Ok(SubmitOutcome::Placed(id)) | Ok(SubmitOutcome::PlacedDemoted(id)) => {
                        let previous = {
                            let mut cell = self.cell.lock().await;
                            let previous = if cancel_previous {
                                bucket_ids(&cell.state, bucket)
                                    .iter()
                                    .filter(|prev| **prev != id)
                                    .cloned()
                                    .collect()
                            } else {
                                supersede
                            };
                            for prev in &previous {
                                cell.state.retire_order(prev);
                            }
                            cell.state.record_order(id.clone(), bucket);
                            previous
                        };
                        if let Err(err) = self.store.append_executed_order(&plan.id, &id).await {
                            warn!(error = %err, "executed-order append failed");
                        }
                        self.subscribe(id.clone()).await;
                        if !previous.is_empty() {
                            if plan.is_spot() {
                                self.executor.cancel_all_consistently(&plan, &previous).await;
                            } else {
                                self.executor.cancel_all(&plan, &previous).await;
                            }
                        }
                    }
                    Ok(SubmitOutcome::CancelPlan) => {
                        self.cancel("order would immediately trigger").await;
                    }
                    Ok(SubmitOutcome::DisablePlan) => {
                        {
                            let mut cell = self.cell.lock().await;
                            cell.plan.enabled = false;
                        }
                        if let Err(err) = self.store.set_enabled(&plan.id, false).await {
                            warn!(error = %err, "disable persist failed");
                        }
                    }
                    Ok(SubmitOutcome::Fatal(msg)) => self.fail(&msg).await,
                    Err(err) => self.fail(&err.to_string()).await,
                }
            }
        }
    }

    /// Subscribe to the id's status stream and forward into the event loop.
    async fn subscribe(&self, id: OrderId) {
        match self.store.subscribe_order(&id).await {
            Ok(mut rx) => {
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    while let Some(record) = rx.recv().await {
                        if events.send(EngineEvent::OrderUpdate(record)).await.is_err() {
                            break;
                        }
                    }
                });
            }
            Err(err) => {
                // Degraded mode: read whatever the store has right now so a
                // terminal status observed before the failure still lands.
                warn!(order = %id, error = %err, "status subscription failed, falling back to fetch");
                if let Ok(Some(record)) = self.store.order(&id).await {
                    if record.status.is_terminal() {
                        let _ = self.events_tx.send(EngineEvent::OrderUpdate(record)).await;
                    }
                }
            }
        }
    }

    async fn schedule(&self, kind: TimerKind, iteration: u64) {
        let delay = {
            let cell = self.cell.lock().await;
            kind.delay(&cell.plan)
        };
        if let Some(delay) = delay {
            spawn_timer(self.events_tx.clone(), kind, delay, iteration);
        }
    }

    async fn persist(&self, kind: PersistKind) {
        let (id, phase, msg, entry_price, executed, exit_price, entry) = {
            let cell = self.cell.lock().await;
            (
                cell.plan.id.clone(),
                cell.state.phase,
                cell.state.msg.clone(),
                cell.state.entry_price,
                cell.state.executed_amount,
                cell.state.exit_price,
                cell.plan.entry.clone(),
            )
        };
        let result = match kind {
            PersistKind::Phase => self.store.update_state(&id, phase, &msg).await,
            PersistKind::EntryPrice => self.store.update_entry_price(&id, entry_price).await,
            PersistKind::Execution => self.store.update_execution(&id, executed, exit_price).await,
            PersistKind::Conditions => self.store.update_conditions(&id, &entry).await,
        };
        if let Err(err) = result {
            warn!(plan = %id, ?kind, error = %err, "persist failed");
        }
    }

    /// Unrecoverable failure: park the plan in `Error`.
    async fn fail(&self, msg: &str) {
        error!(msg, "plan failed");
        {
            let mut cell = self.cell.lock().await;
            cell.state.phase = Phase::Error;
            cell.state.msg = msg.to_string();
        }
        self.persist(PersistKind::Phase).await;
        self.stopped.store(true, Ordering::Release);
    }

    /// Cancellation flow: cancel resting orders, flatten, stop.
    pub async fn cancel(&self, reason: &str) {
        {
            let mut cell = self.cell.lock().await;
            if cell.state.phase.is_terminal() {
                return;
            }
            cell.state.phase = Phase::Canceled;
            cell.state.msg = reason.to_string();
        }
        self.persist(PersistKind::Phase).await;
        self.finish().await;
    }

    /// External stop request.
    pub async fn stop(&self) {
        self.cancel("stop requested").await;
    }

    /// Stop cycle: cancel everything, flatten any remaining position, then
    /// disable or re-arm.
    ///
    /// Boxed because the cycle re-enters action execution (flatten orders,
    /// restart cascades), which would otherwise make the future unsized.
    fn finish(&self) -> futures_util::future::BoxFuture<'_, ()> {
        Box::pin(self.finish_inner())
    }

    async fn finish_inner(&self) {
        let (plan, ids, needs_flatten, last_price) = {
            let cell = self.cell.lock().await;
            let needs_flatten = !cell.state.entry_price.is_zero()
                && !cell.state.fill_complete(cell.plan.is_spot())
                && cell.state.phase == Phase::Canceled;
            let last = self
                .feed
                .price(&self.feed_key)
                .map(|c| c.close)
                .unwrap_or(cell.state.entry_price);
            (
                cell.plan.clone(),
                cell.state.active_order_ids(),
                needs_flatten,
                last,
            )
        };

        if !ids.is_empty() {
            if plan.is_spot() {
                self.executor.cancel_all_consistently(&plan, &ids).await;
            } else {
                self.executor.cancel_all(&plan, &ids).await;
            }
        }

        if needs_flatten {
            self.place_order(last_price, None, Step::Canceled).await;
            let mut cell = self.cell.lock().await;
            cell.state.position_was_closed = true;
        }

        let (rearm, id) = {
            let cell = self.cell.lock().await;
            (
                cell.plan.continue_if_ended && !cell.state.position_was_closed,
                cell.plan.id.clone(),
            )
        };

        if rearm {
            let actions = {
                let mut cell = self.cell.lock().await;
                machine::fire(&mut cell, Trigger::Restart, &TriggerPayload::None, now_secs())
            };
            let mut queue = VecDeque::new();
            self.execute_actions(actions, &TriggerPayload::None, &mut queue)
                .await;
            self.drain_cascade(queue).await;
        } else {
            if let Err(err) = self.store.set_enabled(&id, false).await {
                warn!(error = %err, "disable persist failed");
            }
            self.stopped.store(true, Ordering::Release);
            info!(plan = %id, "runtime stopped");
        }
    }

    // --- internal runtime API (admin surface) ---

    /// Cancel the given ids concurrently.
    pub async fn try_cancel_all(&self, ids: &[OrderId]) {
        let plan = self.plan_snapshot().await;
        self.executor.cancel_all(&plan, ids).await;
    }

    /// Cancel the given ids one at a time.
    pub async fn try_cancel_all_consistently(&self, ids: &[OrderId]) {
        let plan = self.plan_snapshot().await;
        self.executor.cancel_all_consistently(&plan, ids).await;
    }

    /// Select the exit target the next take-profit placement uses.
    pub async fn set_selected_exit_target(&self, index: usize) {
        self.cell.lock().await.state.selected_exit_target = index;
    }

    /// Whether an id is still awaiting its terminal callback.
    pub fn is_order_in_map(&self, id: &OrderId) -> bool {
        self.executor.is_in_flight(id)
    }

    /// Whether the runtime has shut down.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

fn bucket_ids(state: &RuntimeState, bucket: OrderBucket) -> Vec<OrderId> {
    match bucket {
        OrderBucket::WaitForEntry => state.wait_for_entry_ids.clone(),
        OrderBucket::TakeProfit => state.take_profit_order_ids.clone(),
        OrderBucket::StopLoss => state.stop_loss_order_ids.clone(),
        OrderBucket::ForcedLoss => state.forced_loss_order_ids.clone(),
        OrderBucket::Other => vec![],
    }
}

fn step_label(step: Step) -> &'static str {
    match step {
        Step::WaitForEntry | Step::InEntry => "entry",
        Step::TrailingEntry => "trailing_entry",
        Step::EntryLeg(_) => "entry_leg",
        Step::TakeProfit => "take_profit",
        Step::Stoploss => "stoploss",
        Step::ForcedLoss => "forced_loss",
        Step::WithoutLoss => "without_loss",
        Step::Canceled => "flatten",
    }
}

fn purpose_for(step: Step) -> OrderPurpose {
    match step {
        Step::WaitForEntry | Step::InEntry => OrderPurpose::Entry,
        Step::TrailingEntry => OrderPurpose::TrailingEntry,
        Step::EntryLeg(i) => OrderPurpose::EntryLeg(i),
        Step::TakeProfit => OrderPurpose::TakeProfit,
        Step::Stoploss => OrderPurpose::StopLoss,
        Step::ForcedLoss => OrderPurpose::ForcedLoss,
        Step::WithoutLoss => OrderPurpose::WithoutLoss,
        Step::Canceled => OrderPurpose::Flatten,
    }
}
