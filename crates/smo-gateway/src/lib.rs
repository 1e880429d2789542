//! Trading gateway facade.
//!
//! The engine talks to the exchange through a request/response HTTP service
//! (`EXCHANGESERVICE`). This crate provides the `TradingGateway` capability
//! trait, the wire types, the reqwest-backed client, and the classification
//! of gateway error messages into retryable/fatal faults.

pub mod classify;
pub mod error;
pub mod http;
pub mod wire;

pub use classify::{classify_message, GatewayFault, RetrySpec};
pub use error::{GatewayError, GatewayResult};
pub use http::HttpGateway;
pub use wire::{CancelRequest, GatewayResponse, ResponseData, ResponseStatus};

use async_trait::async_trait;
use smo_core::{AccountKey, OrderRequest, Plan, Symbol};

/// Request/response facade over the exchange service.
///
/// Implementations: `HttpGateway` (live) and the recording mock in
/// `smo-engine`'s test support.
#[async_trait]
pub trait TradingGateway: Send + Sync {
    /// Submit an order under the given credential.
    async fn create_order(
        &self,
        key: &AccountKey,
        order: &OrderRequest,
    ) -> GatewayResult<GatewayResponse>;

    /// Cancel a resting order.
    async fn cancel_order(
        &self,
        key: &AccountKey,
        cancel: &CancelRequest,
    ) -> GatewayResult<GatewayResponse>;

    /// Push the leverage setting for a pair (futures only).
    async fn update_leverage(
        &self,
        key: &AccountKey,
        leverage: u32,
        pair: &Symbol,
    ) -> GatewayResult<()>;

    /// Kick off the paired hedge strategy for a plan.
    async fn place_hedge(&self, plan: &Plan) -> GatewayResult<()>;

    /// Toggle hedge mode on the account.
    async fn set_hedge_mode(&self, key: &AccountKey, enabled: bool) -> GatewayResult<()>;

    /// Move balance between the paired strategies' accounts.
    async fn transfer(
        &self,
        from: &AccountKey,
        to: &AccountKey,
        amount: rust_decimal::Decimal,
    ) -> GatewayResult<()>;
}
