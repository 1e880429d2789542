//! In-memory store.
//!
//! Backs tests, backtest-style runs and local development. Order-status
//! subscriptions combine a push notification with a 2-second poll fallback,
//! delivering the first terminal status exactly once per subscriber.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use smo_core::{
    AccountKey, EntrySpec, MarketKind, MarketRules, OrderId, OrderRecord, Phase, Plan, PlanId,
    Price, Qty, Symbol,
};

use crate::error::{StoreError, StoreResult};
use crate::{OrderStatusStream, StateStore};

/// Poll interval for the subscription fallback.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Inner {
    plans: DashMap<PlanId, Plan>,
    orders: DashMap<OrderId, OrderRecord>,
    notifiers: DashMap<OrderId, Arc<Notify>>,
    balances: DashMap<AccountKey, Qty>,
    markets: DashMap<(Symbol, MarketKind), MarketRules>,
    pnl: Mutex<Vec<(PlanId, Decimal)>>,
    /// `(plan_id, phase, msg)` history, newest last.
    state_log: Mutex<Vec<(PlanId, Phase, String)>>,
    executed_orders: DashMap<PlanId, Vec<OrderId>>,
}

/// In-memory `StateStore` implementation.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- seeding and inspection helpers (used by tests and the backtest driver) ---

    pub fn insert_plan(&self, plan: Plan) {
        self.inner.plans.insert(plan.id.clone(), plan);
    }

    pub fn set_balance(&self, key: AccountKey, balance: Qty) {
        self.inner.balances.insert(key, balance);
    }

    pub fn set_market_rules(&self, symbol: Symbol, market: MarketKind, rules: MarketRules) {
        self.inner.markets.insert((symbol, market), rules);
    }

    /// Write an order record and wake its subscribers.
    pub fn push_order(&self, record: OrderRecord) {
        let id = record.id.clone();
        self.inner.orders.insert(id.clone(), record);
        if let Some(notify) = self.inner.notifiers.get(&id) {
            notify.notify_waiters();
        }
    }

    /// Recorded PnL rows.
    pub fn pnl_rows(&self) -> Vec<(PlanId, Decimal)> {
        self.inner.pnl.lock().clone()
    }

    /// Persisted phase history for a plan.
    pub fn phase_history(&self, id: &PlanId) -> Vec<Phase> {
        self.inner
            .state_log
            .lock()
            .iter()
            .filter(|(p, _, _)| p == id)
            .map(|(_, phase, _)| *phase)
            .collect()
    }

    /// Persisted executed-order ids for a plan.
    pub fn executed_orders(&self, id: &PlanId) -> Vec<OrderId> {
        self.inner
            .executed_orders
            .get(id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    fn notifier(&self, id: &OrderId) -> Arc<Notify> {
        self.inner
            .notifiers
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn with_plan<F>(&self, id: &PlanId, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Plan),
    {
        match self.inner.plans.get_mut(id) {
            Some(mut plan) => {
                f(&mut plan);
                Ok(())
            }
            None => Err(StoreError::PlanNotFound(id.to_string())),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn plan(&self, id: &PlanId) -> StoreResult<Option<Plan>> {
        Ok(self.inner.plans.get(id).map(|p| p.clone()))
    }

    async fn set_enabled(&self, id: &PlanId, enabled: bool) -> StoreResult<()> {
        self.with_plan(id, |plan| plan.enabled = enabled)
    }

    async fn update_state(&self, id: &PlanId, phase: Phase, msg: &str) -> StoreResult<()> {
        debug!(plan = %id, %phase, msg, "persisting state");
        self.inner
            .state_log
            .lock()
            .push((id.clone(), phase, msg.to_string()));
        Ok(())
    }

    async fn update_conditions(&self, id: &PlanId, entry: &EntrySpec) -> StoreResult<()> {
        self.with_plan(id, |plan| plan.entry = entry.clone())
    }

    async fn update_entry_price(&self, _id: &PlanId, _price: Price) -> StoreResult<()> {
        Ok(())
    }

    async fn update_execution(&self, _id: &PlanId, _executed: Qty, _exit: Price) -> StoreResult<()> {
        Ok(())
    }

    async fn append_executed_order(&self, id: &PlanId, order_id: &OrderId) -> StoreResult<()> {
        self.inner
            .executed_orders
            .entry(id.clone())
            .or_default()
            .push(order_id.clone());
        Ok(())
    }

    async fn update_hedge_exit_price(&self, _id: &PlanId, _price: Price) -> StoreResult<()> {
        Ok(())
    }

    async fn active_peers(
        &self,
        account: &AccountKey,
        symbol: &Symbol,
        market: MarketKind,
    ) -> StoreResult<Vec<PlanId>> {
        Ok(self
            .inner
            .plans
            .iter()
            .filter(|p| {
                p.enabled
                    && p.account_key == *account
                    && p.symbol == *symbol
                    && p.market_kind == market
            })
            .map(|p| p.id.clone())
            .collect())
    }

    async fn order(&self, id: &OrderId) -> StoreResult<Option<OrderRecord>> {
        Ok(self.inner.orders.get(id).map(|o| o.clone()))
    }

    async fn subscribe_order(&self, id: &OrderId) -> StoreResult<OrderStatusStream> {
        let (tx, rx) = mpsc::channel(8);
        let id = id.clone();
        let notify = self.notifier(&id);
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                let record = store.inner.orders.get(&id).map(|o| o.clone());
                if let Some(record) = record {
                    if record.status.is_terminal() {
                        // One terminal delivery per subscriber, then done.
                        let _ = tx.send(record).await;
                        return;
                    }
                }
                tokio::select! {
                    _ = notify.notified() => {}
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                }
                if tx.is_closed() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    async fn free_balance(&self, key: &AccountKey) -> StoreResult<Option<Qty>> {
        Ok(self.inner.balances.get(key).map(|b| *b))
    }

    async fn market_rules(
        &self,
        symbol: &Symbol,
        market: MarketKind,
    ) -> StoreResult<Option<MarketRules>> {
        Ok(self
            .inner
            .markets
            .get(&(symbol.clone(), market))
            .map(|r| *r))
    }

    async fn append_pnl(&self, template_id: &PlanId, profit_amount: Decimal) -> StoreResult<()> {
        self.inner
            .pnl
            .lock()
            .push((template_id.clone(), profit_amount));
        Ok(())
    }
}
