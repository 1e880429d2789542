//! Wire request/response types for the exchange service.

use serde::{Deserialize, Serialize};

use smo_core::{OrderId, OrderStatus, Price, Qty};

/// Cancel-order request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelRequest {
    pub order_id: OrderId,
    pub pair: String,
    pub market_type: String,
}

impl CancelRequest {
    pub fn new(order_id: OrderId, pair: impl Into<String>, market_type: impl Into<String>) -> Self {
        Self {
            order_id,
            pair: pair.into(),
            market_type: market_type.into(),
        }
    }
}

/// Top-level response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERR")]
    Err,
}

/// Response payload. Fields are optional because the service omits whatever
/// does not apply to the call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(default)]
    pub id: Option<OrderId>,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub price: Option<Price>,
    #[serde(default)]
    pub average: Option<Price>,
    #[serde(default)]
    pub filled: Option<Qty>,
    #[serde(default)]
    pub order_id: Option<OrderId>,
}

/// Structured gateway response: `{status, data: {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub status: ResponseStatus,
    #[serde(default)]
    pub data: ResponseData,
}

impl GatewayResponse {
    pub fn ok_with_id(id: OrderId) -> Self {
        Self {
            status: ResponseStatus::Ok,
            data: ResponseData {
                id: Some(id),
                ..Default::default()
            },
        }
    }

    pub fn err_with_msg(msg: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Err,
            data: ResponseData {
                msg: msg.into(),
                ..Default::default()
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    /// The exchange order id, whichever field the service populated.
    pub fn order_id(&self) -> Option<&OrderId> {
        self.data.id.as_ref().or(self.data.order_id.as_ref())
    }

    /// Error/diagnostic message, empty string when none.
    pub fn message(&self) -> &str {
        &self.data.msg
    }
}
