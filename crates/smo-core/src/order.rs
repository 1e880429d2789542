//! Order-related types: sides, variants, statuses, wire requests.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{Price, Qty};

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Returns 1 for buy, -1 for sell (PnL sign).
    pub fn sign(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }

    /// Direction multiplier as a decimal, for price offset math.
    pub fn direction(&self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Position side designator for hedged futures accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// The position side opened by an entry on `side`.
    pub fn for_entry(side: OrderSide) -> Self {
        match side {
            OrderSide::Buy => Self::Long,
            OrderSide::Sell => Self::Short,
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Time-in-force for orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good-til-cancelled.
    #[default]
    #[serde(rename = "GTC")]
    GoodTilCancelled,
    /// Immediate-or-cancel.
    #[serde(rename = "IOC")]
    ImmediateOrCancel,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GoodTilCancelled => write!(f, "GTC"),
            Self::ImmediateOrCancel => write!(f, "IOC"),
        }
    }
}

/// Fully-resolved order variant as the planner computes it.
///
/// Trigger variants (`Stop*`, `TakeProfit*`) are rewritten for the wire:
/// the request carries `type = "stop"`, the trigger price in `stop_price`
/// and the exact variant in `params.advanced_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderVariant {
    Market,
    Limit,
    MakerOnly,
    StopMarket,
    StopLimit,
    TakeProfitMarket,
    TakeProfitLimit,
}

impl OrderVariant {
    /// True if this is a trigger-style (stop/take-profit) variant.
    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            Self::StopMarket | Self::StopLimit | Self::TakeProfitMarket | Self::TakeProfitLimit
        )
    }

    /// True for variants that execute at market once (or as soon as) active.
    pub fn is_market_like(&self) -> bool {
        matches!(self, Self::Market | Self::StopMarket | Self::TakeProfitMarket)
    }

    /// The `type` field as sent to the gateway.
    pub fn wire_type(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Limit => "limit",
            Self::MakerOnly => "maker-only",
            _ => "stop",
        }
    }

    /// The `advanced_type` hint for trigger variants.
    pub fn advanced_type(&self) -> Option<&'static str> {
        match self {
            Self::StopMarket => Some("stop-market"),
            Self::StopLimit => Some("stop-limit"),
            Self::TakeProfitMarket => Some("take-profit-market"),
            Self::TakeProfitLimit => Some("take-profit-limit"),
            _ => None,
        }
    }

    /// Prefix with `stop-`. Non-trigger market/limit only; others unchanged.
    pub fn as_stop(&self) -> Self {
        match self {
            Self::Market => Self::StopMarket,
            Self::Limit | Self::MakerOnly => Self::StopLimit,
            other => *other,
        }
    }

    /// Prefix with `take-profit-`.
    pub fn as_take_profit(&self) -> Self {
        match self {
            Self::Market => Self::TakeProfitMarket,
            Self::Limit | Self::MakerOnly => Self::TakeProfitLimit,
            Self::StopMarket => Self::TakeProfitMarket,
            Self::StopLimit => Self::TakeProfitLimit,
            other => *other,
        }
    }

    /// Strip any trigger behavior, falling back to a plain market order.
    ///
    /// Used when the gateway rejects a trailing stop as immediate-trigger.
    pub fn demoted_to_market(&self) -> Self {
        Self::Market
    }
}

impl fmt::Display for OrderVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Market => "market",
            Self::Limit => "limit",
            Self::MakerOnly => "maker-only",
            Self::StopMarket => "stop-market",
            Self::StopLimit => "stop-limit",
            Self::TakeProfitMarket => "take-profit-market",
            Self::TakeProfitLimit => "take-profit-limit",
        };
        write!(f, "{s}")
    }
}

/// Exchange order identifier.
///
/// Every submission also carries a locally generated id so retries stay
/// idempotent on the gateway side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    /// Generate a fresh client-side id: `smo_{timestamp_ms}_{uuid8}`.
    pub fn generate() -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let suffix = &Uuid::new_v4().to_string()[..8];
        Self(format!("smo_{ts}_{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order status as reported by the store/gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    New,
    Open,
    #[serde(rename = "partially_filled")]
    PartiallyFilled,
    Filled,
    Canceled,
    Closed,
    Expired,
}

impl OrderStatus {
    /// Terminal statuses trigger reconciliation exactly once per id.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Closed | Self::Expired
        )
    }

    /// True if the order produced fills worth accounting for.
    pub fn is_fill(&self) -> bool {
        matches!(self, Self::Filled | Self::Closed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Open => "open",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Canceled => "canceled",
            Self::Closed => "closed",
            Self::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// Auxiliary hints carried in the request `params` object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderParams {
    /// Exact trigger variant for `type = "stop"` requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced_type: Option<String>,
    /// Spot stop-family hint: fill with whatever balance remains.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_if_not_enough: Option<u8>,
    /// Spot stop-family hint: retry on transient placement failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<bool>,
}

/// A create-order request as posted to the trading gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub market_type: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: OrderSide,
    pub amount: Qty,
    pub price: Price,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Price>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_side: Option<PositionSide>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_only: Option<bool>,
    #[serde(default)]
    pub params: OrderParams,
}

/// An order as read back from the store or a gateway response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub status: OrderStatus,
    /// Requested price.
    pub price: Price,
    /// Average fill price.
    pub average: Price,
    /// Cumulative filled quantity.
    pub filled: Qty,
}

impl OrderRecord {
    pub fn new(id: OrderId, status: OrderStatus, price: Price, average: Price, filled: Qty) -> Self {
        Self {
            id,
            status,
            price,
            average,
            filled,
        }
    }
}
