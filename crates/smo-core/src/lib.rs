//! Core domain types for the smart-order execution engine.
//!
//! This crate provides the types shared by every other crate:
//! - `Price`, `Qty`: precision-safe numeric types
//! - `Plan`: the immutable-at-rest order contract
//! - `RuntimeState`: the mutable, persisted execution state
//! - `Phase`, `Trigger`, `TriggerPayload`: state-machine vocabulary
//! - PnL and fee arithmetic

pub mod decimal;
pub mod error;
pub mod market;
pub mod order;
pub mod phase;
pub mod plan;
pub mod pnl;
pub mod state;

pub use decimal::{Price, Qty};
pub use error::{CoreError, Result};
pub use order::{
    OrderId, OrderRecord, OrderRequest, OrderParams, OrderSide, OrderStatus, OrderVariant,
    PositionSide, TimeInForce,
};
pub use phase::{Phase, Trigger, TriggerPayload};
pub use plan::{
    AccountKey, AmountSpec, EntryLeg, EntrySpec, ExitKind, ExitLevel, HedgeSpec, LevelAmount,
    MarketKind, MarketRules, OrderKind, Plan, PlanId, StopLossKind, Symbol,
};
pub use pnl::{
    break_even_fee_pct, fee_rate_pct, profit_amount, profit_pct, FUTURES_FEE_PCT, SPOT_FEE_PCT,
};
pub use market::{Candle, FeedKey, SpreadSnapshot};
pub use state::{spot_fill_tolerance, OrderBucket, RuntimeState, LATCH_FIRED};
