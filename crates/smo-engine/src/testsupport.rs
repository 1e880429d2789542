//! Shared test doubles for unit and integration tests.
//!
//! `MockGateway` records every call and can drive the full callback pipeline
//! when attached to a `MemoryStore`: market-style orders fill immediately,
//! trigger orders rest until `cross` observes a price through their trigger.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use smo_core::{
    AccountKey, AmountSpec, Candle, EntrySpec, HedgeSpec, MarketKind, OrderId, OrderRecord,
    OrderRequest, OrderSide, OrderStatus, Plan, PlanId, Price, Qty, StopLossKind, Symbol,
    TriggerPayload,
};
use smo_gateway::{CancelRequest, GatewayResponse, GatewayResult, TradingGateway};
use smo_store::MemoryStore;

/// Tick payload helper for machine-level tests.
pub fn tick(close: Decimal) -> TriggerPayload {
    TriggerPayload::Tick(Candle::flat(Price::new(close)))
}

// ============================================================================
// Plan builder
// ============================================================================

/// Builder for test plans. Defaults: futures, buy, market entry, 0.05.
pub struct PlanBuilder {
    plan: Plan,
}

pub fn plan_builder() -> PlanBuilder {
    PlanBuilder {
        plan: Plan {
            id: PlanId::new("plan-1"),
            account_key: AccountKey::new("key-1"),
            symbol: Symbol::new("BTC_USDT"),
            market_kind: MarketKind::Futures,
            enabled: true,
            entry: EntrySpec {
                side: OrderSide::Buy,
                order_type: smo_core::OrderKind::Market,
                amount: AmountSpec::Absolute(Qty::new(Decimal::new(5, 2))),
                activate_price: Price::ZERO,
                entry_deviation_pct: Decimal::ZERO,
                price: Price::ZERO,
                reduce_only: false,
            },
            exit_levels: vec![],
            entry_levels: vec![],
            stop_loss_pct: Decimal::ZERO,
            forced_loss_pct: Decimal::ZERO,
            stop_loss_price: Price::ZERO,
            forced_loss_price: Price::ZERO,
            stop_loss_type: StopLossKind::Market,
            timeout_when_loss_secs: 0,
            timeout_loss_secs: 0,
            timeout_if_profitable_secs: 0,
            stop_loss_external: false,
            mandatory_forced_loss: false,
            leverage: 20,
            continue_if_ended: false,
            waiting_entry_timeout_secs: 0,
            activation_move_timeout_secs: 0,
            activation_move_step_pct: Decimal::ZERO,
            without_loss_after_profit_pct: Decimal::ZERO,
            cancel_if_any_active: false,
            hedge: HedgeSpec::default(),
            template_id: None,
        },
    }
}

impl PlanBuilder {
    pub fn id(mut self, id: &str) -> Self {
        self.plan.id = PlanId::new(id);
        self
    }

    pub fn market(mut self, kind: MarketKind) -> Self {
        self.plan.market_kind = kind;
        self
    }

    pub fn side(mut self, side: OrderSide) -> Self {
        self.plan.entry.side = side;
        self
    }

    pub fn amount(mut self, qty: Decimal) -> Self {
        self.plan.entry.amount = AmountSpec::Absolute(Qty::new(qty));
        self
    }

    pub fn entry_activate(mut self, price: Decimal) -> Self {
        self.plan.entry.activate_price = Price::new(price);
        self
    }

    pub fn entry_deviation(mut self, pct: Decimal) -> Self {
        self.plan.entry.entry_deviation_pct = pct;
        self
    }

    pub fn entry_limit(mut self, price: Decimal) -> Self {
        self.plan.entry.order_type = smo_core::OrderKind::Limit;
        self.plan.entry.price = Price::new(price);
        self
    }

    pub fn leverage(mut self, leverage: u32) -> Self {
        self.plan.leverage = leverage;
        self
    }

    pub fn stop_loss(mut self, pct: Decimal) -> Self {
        self.plan.stop_loss_pct = pct;
        self
    }

    pub fn stop_loss_limit(mut self) -> Self {
        self.plan.stop_loss_type = StopLossKind::Limit;
        self
    }

    pub fn timeout_when_loss(mut self, secs: i64) -> Self {
        self.plan.timeout_when_loss_secs = secs;
        self
    }

    pub fn build(self) -> Plan {
        self.plan
    }
}

// ============================================================================
// MockGateway
// ============================================================================

#[derive(Debug, Clone)]
struct RestingOrder {
    id: OrderId,
    side: OrderSide,
    trigger: Price,
    amount: Qty,
    take_profit: bool,
}

/// Recording gateway double.
#[derive(Default)]
pub struct MockGateway {
    create_calls: Mutex<Vec<OrderRequest>>,
    cancel_calls: Mutex<Vec<CancelRequest>>,
    leverage_calls: Mutex<Vec<(AccountKey, u32)>>,
    hedge_calls: Mutex<Vec<PlanId>>,
    failures: Mutex<VecDeque<String>>,
    store: Mutex<Option<MemoryStore>>,
    auto_fill: AtomicBool,
    resting: Mutex<Vec<RestingOrder>>,
    last_price: Mutex<Price>,
    next_id: AtomicU64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a store and enable the auto-fill pipeline: accepted orders
    /// produce terminal records the reconciler will pick up.
    pub fn with_store(self, store: MemoryStore) -> Self {
        *self.store.lock() = Some(store);
        self.auto_fill.store(true, Ordering::Release);
        self
    }

    /// Queue a failure message for the next create call.
    pub fn fail_next(&self, msg: &str) {
        self.failures.lock().push_back(msg.to_string());
    }

    pub fn create_calls(&self) -> Vec<OrderRequest> {
        self.create_calls.lock().clone()
    }

    pub fn cancel_calls(&self) -> Vec<CancelRequest> {
        self.cancel_calls.lock().clone()
    }

    pub fn leverage_calls(&self) -> Vec<(AccountKey, u32)> {
        self.leverage_calls.lock().clone()
    }

    pub fn hedge_calls(&self) -> Vec<PlanId> {
        self.hedge_calls.lock().clone()
    }

    /// Orders whose triggers have not been crossed yet.
    pub fn resting_count(&self) -> usize {
        self.resting.lock().len()
    }

    /// Observe a traded price: fill any resting trigger order whose trigger
    /// the price crossed, at this price.
    pub fn cross(&self, price: Decimal) {
        let price = Price::new(price);
        *self.last_price.lock() = price;
        let store = self.store.lock().clone();
        let Some(store) = store else {
            return;
        };
        let triggered: Vec<RestingOrder> = {
            let mut resting = self.resting.lock();
            let (hit, rest): (Vec<RestingOrder>, Vec<RestingOrder>) = resting
                .drain(..)
                .partition(|order| crossed(order.side, order.take_profit, order.trigger, price));
            *resting = rest;
            hit
        };
        for order in triggered {
            store.push_order(OrderRecord::new(
                order.id,
                OrderStatus::Filled,
                order.trigger,
                price,
                order.amount,
            ));
        }
    }

    fn fresh_id(&self) -> OrderId {
        let n = self.next_id.fetch_add(1, Ordering::AcqRel);
        OrderId::from(format!("ord-{n}"))
    }
}

/// Trigger-crossing rule: stop orders trigger through the adverse side,
/// take-profit orders through the favorable one.
fn crossed(side: OrderSide, take_profit: bool, trigger: Price, price: Price) -> bool {
    match (side, take_profit) {
        (OrderSide::Buy, false) => price >= trigger,
        (OrderSide::Sell, false) => price <= trigger,
        (OrderSide::Buy, true) => price <= trigger,
        (OrderSide::Sell, true) => price >= trigger,
    }
}

#[async_trait]
impl TradingGateway for MockGateway {
    async fn create_order(
        &self,
        _key: &AccountKey,
        order: &OrderRequest,
    ) -> GatewayResult<GatewayResponse> {
        self.create_calls.lock().push(order.clone());
        if let Some(msg) = self.failures.lock().pop_front() {
            return Ok(GatewayResponse::err_with_msg(msg));
        }

        let id = self.fresh_id();
        if self.auto_fill.load(Ordering::Acquire) {
            if let Some(stop_price) = order.stop_price {
                // Trigger order: rest until crossed.
                let take_profit = order
                    .params
                    .advanced_type
                    .as_deref()
                    .map(|t| t.starts_with("take-profit"))
                    .unwrap_or(false);
                self.resting.lock().push(RestingOrder {
                    id: id.clone(),
                    side: order.side,
                    trigger: stop_price,
                    amount: order.amount,
                    take_profit,
                });
            } else if let Some(store) = self.store.lock().clone() {
                // Market/limit order: fill immediately.
                let average = if order.price.is_positive() {
                    order.price
                } else {
                    *self.last_price.lock()
                };
                store.push_order(OrderRecord::new(
                    id.clone(),
                    OrderStatus::Filled,
                    order.price,
                    average,
                    order.amount,
                ));
            }
        }
        Ok(GatewayResponse::ok_with_id(id))
    }

    async fn cancel_order(
        &self,
        _key: &AccountKey,
        cancel: &CancelRequest,
    ) -> GatewayResult<GatewayResponse> {
        self.cancel_calls.lock().push(cancel.clone());
        self.resting.lock().retain(|o| o.id != cancel.order_id);
        if let Some(store) = self.store.lock().clone() {
            store.push_order(OrderRecord::new(
                cancel.order_id.clone(),
                OrderStatus::Canceled,
                Price::ZERO,
                Price::ZERO,
                Qty::ZERO,
            ));
        }
        Ok(GatewayResponse::ok_with_id(cancel.order_id.clone()))
    }

    async fn update_leverage(
        &self,
        key: &AccountKey,
        leverage: u32,
        _pair: &Symbol,
    ) -> GatewayResult<()> {
        self.leverage_calls.lock().push((key.clone(), leverage));
        Ok(())
    }

    async fn place_hedge(&self, plan: &Plan) -> GatewayResult<()> {
        self.hedge_calls.lock().push(plan.id.clone());
        Ok(())
    }

    async fn set_hedge_mode(&self, _key: &AccountKey, _enabled: bool) -> GatewayResult<()> {
        Ok(())
    }

    async fn transfer(
        &self,
        _from: &AccountKey,
        _to: &AccountKey,
        _amount: Decimal,
    ) -> GatewayResult<()> {
        Ok(())
    }
}
