//! Persistence store interface.
//!
//! The store is the durable source of truth for plans, orders and PnL. The
//! engine only depends on the `StateStore` trait; the production backend
//! lives outside this repository. `MemoryStore` implements the full trait
//! for tests, backtest-style runs and local development.

pub mod error;
pub mod memory;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use smo_core::{
    AccountKey, EntrySpec, MarketKind, MarketRules, OrderId, OrderRecord, Phase, Plan, PlanId,
    Price, Qty, Symbol,
};

/// Stream of status updates for one order id.
///
/// The store guarantees the first terminal status is delivered exactly once
/// per subscriber, whether the backend is a change stream or a poll loop.
pub type OrderStatusStream = mpsc::Receiver<OrderRecord>;

/// CRUD plus change-subscription over plans, orders and PnL.
#[async_trait]
pub trait StateStore: Send + Sync {
    // --- plans ---

    async fn plan(&self, id: &PlanId) -> StoreResult<Option<Plan>>;

    async fn set_enabled(&self, id: &PlanId, enabled: bool) -> StoreResult<()>;

    /// Persist the phase and diagnostic message.
    async fn update_state(&self, id: &PlanId, phase: Phase, msg: &str) -> StoreResult<()>;

    /// Persist the entry conditions (activation drift rewrites them).
    async fn update_conditions(&self, id: &PlanId, entry: &EntrySpec) -> StoreResult<()>;

    async fn update_entry_price(&self, id: &PlanId, price: Price) -> StoreResult<()>;

    /// Persist executed amount and the latest exit price together.
    async fn update_execution(&self, id: &PlanId, executed: Qty, exit: Price) -> StoreResult<()>;

    async fn append_executed_order(&self, id: &PlanId, order_id: &OrderId) -> StoreResult<()>;

    async fn update_hedge_exit_price(&self, id: &PlanId, price: Price) -> StoreResult<()>;

    /// Enabled peer plans on the same account and symbol.
    async fn active_peers(
        &self,
        account: &AccountKey,
        symbol: &Symbol,
        market: MarketKind,
    ) -> StoreResult<Vec<PlanId>>;

    // --- orders ---

    async fn order(&self, id: &OrderId) -> StoreResult<Option<OrderRecord>>;

    /// Subscribe to status updates for an id.
    async fn subscribe_order(&self, id: &OrderId) -> StoreResult<OrderStatusStream>;

    // --- assets & markets ---

    /// Free balance for the credential, in the quote asset.
    async fn free_balance(&self, key: &AccountKey) -> StoreResult<Option<Qty>>;

    /// Price/amount precision for a pair.
    async fn market_rules(
        &self,
        symbol: &Symbol,
        market: MarketKind,
    ) -> StoreResult<Option<MarketRules>>;

    // --- pnl ---

    /// Append realized profit under the aggregating template id.
    async fn append_pnl(&self, template_id: &PlanId, profit_amount: Decimal) -> StoreResult<()>;
}
