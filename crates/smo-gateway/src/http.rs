//! HTTP client for the exchange service.
//!
//! One pooled client is shared across every plan runtime. Requests carry the
//! credential id; the service holds the actual API keys.

use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, instrument};

use smo_core::{AccountKey, OrderRequest, Plan, Symbol};

use crate::error::{GatewayError, GatewayResult};
use crate::wire::{CancelRequest, GatewayResponse};
use crate::TradingGateway;

/// Reqwest-backed gateway client posting JSON to `EXCHANGESERVICE`.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    key_id: &'a str,
    #[serde(flatten)]
    body: &'a T,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Build with a caller-configured client (timeouts, proxies).
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn post<T: Serialize>(
        &self,
        path: &str,
        key: &AccountKey,
        body: &T,
    ) -> GatewayResult<GatewayResponse> {
        let url = format!("{}/{path}", self.base_url);
        let envelope = Envelope {
            key_id: key.as_str(),
            body,
        };
        let response = self
            .client
            .post(&url)
            .json(&envelope)
            .send()
            .await?
            .error_for_status()?;
        let parsed = response.json::<GatewayResponse>().await?;
        debug!(path, status = ?parsed.status, msg = parsed.message(), "gateway response");
        Ok(parsed)
    }
}

#[async_trait::async_trait]
impl TradingGateway for HttpGateway {
    #[instrument(skip(self, order), fields(symbol = %order.symbol, side = %order.side))]
    async fn create_order(
        &self,
        key: &AccountKey,
        order: &OrderRequest,
    ) -> GatewayResult<GatewayResponse> {
        self.post("order/create", key, order).await
    }

    #[instrument(skip(self, cancel), fields(order_id = %cancel.order_id))]
    async fn cancel_order(
        &self,
        key: &AccountKey,
        cancel: &CancelRequest,
    ) -> GatewayResult<GatewayResponse> {
        self.post("order/cancel", key, cancel).await
    }

    async fn update_leverage(
        &self,
        key: &AccountKey,
        leverage: u32,
        pair: &Symbol,
    ) -> GatewayResult<()> {
        let body = json!({ "leverage": leverage, "pair": pair.as_str() });
        let resp = self.post("account/leverage", key, &body).await?;
        if resp.is_ok() {
            Ok(())
        } else {
            Err(GatewayError::Rejected(resp.message().to_string()))
        }
    }

    async fn place_hedge(&self, plan: &Plan) -> GatewayResult<()> {
        let key = plan
            .hedge
            .hedge_key_id
            .clone()
            .unwrap_or_else(|| plan.account_key.clone());
        let resp = self.post("hedge/place", &key, plan).await?;
        if resp.is_ok() {
            Ok(())
        } else {
            Err(GatewayError::Rejected(resp.message().to_string()))
        }
    }

    async fn set_hedge_mode(&self, key: &AccountKey, enabled: bool) -> GatewayResult<()> {
        let body = json!({ "enabled": enabled });
        let resp = self.post("account/hedge-mode", key, &body).await?;
        if resp.is_ok() {
            Ok(())
        } else {
            Err(GatewayError::Rejected(resp.message().to_string()))
        }
    }

    async fn transfer(
        &self,
        from: &AccountKey,
        to: &AccountKey,
        amount: rust_decimal::Decimal,
    ) -> GatewayResult<()> {
        let body = json!({ "to_key_id": to.as_str(), "amount": amount });
        let resp = self.post("account/transfer", from, &body).await?;
        if resp.is_ok() {
            Ok(())
        } else {
            Err(GatewayError::Rejected(resp.message().to_string()))
        }
    }
}
