//! The declarative order plan: the per-order contract persisted in the store.
//!
//! A `Plan` is immutable at rest. The execution runtime reads it, mutates its
//! own `RuntimeState`, and writes material progress back through the store.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::order::OrderSide;
use crate::{Price, Qty};

/// Opaque plan identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub String);

impl PlanId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the credential used at the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountKey(pub String);

impl AccountKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trading pair, e.g. `BTC_USDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Market kind. Spot forces leverage 1 everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketKind {
    Spot,
    Futures,
}

impl MarketKind {
    pub fn is_spot(&self) -> bool {
        matches!(self, Self::Spot)
    }

    /// The `market_type` field as sent on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Futures => "futures",
        }
    }
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

/// Order type as declared in the plan (before stop/take-profit prefixing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderKind {
    #[default]
    Market,
    Limit,
    MakerOnly,
}

impl OrderKind {
    /// Resolved planner-level variant before any trigger prefixing.
    pub fn variant(&self) -> crate::order::OrderVariant {
        match self {
            Self::Market => crate::order::OrderVariant::Market,
            Self::Limit => crate::order::OrderVariant::Limit,
            Self::MakerOnly => crate::order::OrderVariant::MakerOnly,
        }
    }
}

/// Order amount: absolute quantity or a percentage of free balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmountSpec {
    Absolute(Qty),
    PercentOfBalance(Decimal),
}

impl AmountSpec {
    /// Resolve against a free balance snapshot. Absolute amounts ignore it.
    pub fn resolve(&self, free_balance: Qty) -> Qty {
        match self {
            Self::Absolute(qty) => *qty,
            Self::PercentOfBalance(pct) => free_balance.pct(*pct),
        }
    }
}

/// Exit-level amount: absolute or a percentage of the entry amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelAmount {
    Absolute(Qty),
    Percent(Decimal),
}

impl LevelAmount {
    pub fn resolve(&self, entry_amount: Qty) -> Qty {
        match self {
            Self::Absolute(qty) => *qty,
            Self::Percent(pct) => entry_amount.pct(*pct),
        }
    }
}

/// How an exit level's price is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    AbsolutePrice,
    PercentOfEntry,
}

/// Entry specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySpec {
    pub side: OrderSide,
    #[serde(default)]
    pub order_type: OrderKind,
    pub amount: AmountSpec,
    /// Non-zero enables trailing entry; `-1` fires immediately.
    #[serde(default = "price_zero")]
    pub activate_price: Price,
    /// Trailing deviation in percent (scaled by leverage at use sites).
    #[serde(default)]
    pub entry_deviation_pct: Decimal,
    /// Limit price for non-trailing limit entries.
    #[serde(default = "price_zero")]
    pub price: Price,
    #[serde(default)]
    pub reduce_only: bool,
}

fn price_zero() -> Price {
    Price::ZERO
}

impl EntrySpec {
    /// Trailing entry is armed by any non-zero activation price.
    pub fn is_trailing(&self) -> bool {
        !self.activate_price.is_zero()
    }

    /// `-1` activation means "fire immediately".
    pub fn fires_immediately(&self) -> bool {
        self.activate_price.is_market_sentinel()
    }
}

/// One take-profit target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitLevel {
    pub kind: ExitKind,
    /// Absolute price or percent-of-entry depending on `kind`.
    pub value: Decimal,
    pub amount: LevelAmount,
    #[serde(default)]
    pub order_type: OrderKind,
    /// Non-zero enables trailing exit at this target.
    #[serde(default = "price_zero")]
    pub activate_price: Price,
    #[serde(default)]
    pub entry_deviation_pct: Decimal,
}

impl ExitLevel {
    pub fn is_trailing(&self) -> bool {
        !self.activate_price.is_zero()
    }

    /// Target price for a given entry price, side and leverage.
    ///
    /// Percent targets scale the offset down by leverage.
    pub fn target_price(&self, entry: Price, side: OrderSide, leverage: Decimal) -> Price {
        match self.kind {
            ExitKind::AbsolutePrice => Price::new(self.value),
            ExitKind::PercentOfEntry => {
                entry.offset_pct(side.direction() * self.value / leverage)
            }
        }
    }
}

/// One leg of an averaging (multi-leg) entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryLeg {
    pub amount: Qty,
    pub price: Price,
    /// Place the break-even order for this leg once filled.
    #[serde(default)]
    pub place_without_loss: bool,
}

/// Stop-loss kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopLossKind {
    #[default]
    Market,
    Limit,
}

/// Per-market precision rules fetched from the store at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketRules {
    /// Decimal places for prices.
    pub price_precision: u32,
    /// Decimal places for amounts.
    pub amount_precision: u32,
}

impl MarketRules {
    pub fn new(price_precision: u32, amount_precision: u32) -> Self {
        Self {
            price_precision,
            amount_precision,
        }
    }

    pub fn round_price(&self, price: Price) -> Price {
        price.to_fixed(self.price_precision)
    }

    pub fn round_amount(&self, qty: Qty) -> Qty {
        qty.to_fixed(self.amount_precision)
    }
}

/// Paired-strategy hedging settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HedgeSpec {
    #[serde(default)]
    pub hedging: bool,
    #[serde(default)]
    pub hedge_strategy_id: Option<PlanId>,
    #[serde(default)]
    pub hedge_key_id: Option<AccountKey>,
    /// Loss percent that arms the hedge flow.
    #[serde(default)]
    pub hedge_loss_deviation_pct: Decimal,
    #[serde(default = "price_zero")]
    pub take_profit_hedge_price: Price,
}

/// The per-order contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub account_key: AccountKey,
    pub symbol: Symbol,
    pub market_kind: MarketKind,
    pub enabled: bool,

    pub entry: EntrySpec,
    #[serde(default)]
    pub exit_levels: Vec<ExitLevel>,
    /// Averaging-entry legs; empty means single-leg entry.
    #[serde(default)]
    pub entry_levels: Vec<EntryLeg>,

    /// Soft stop-loss threshold in percent (0 disables).
    #[serde(default)]
    pub stop_loss_pct: Decimal,
    /// Hard stop threshold in percent, always exits at market (0 disables).
    #[serde(default)]
    pub forced_loss_pct: Decimal,
    /// Absolute stop override; `-1` means "exit at market now".
    #[serde(default = "price_zero")]
    pub stop_loss_price: Price,
    /// Absolute forced-loss price override.
    #[serde(default = "price_zero")]
    pub forced_loss_price: Price,
    #[serde(default)]
    pub stop_loss_type: StopLossKind,
    /// Exit only after this long underwater (seconds; 0 disables).
    #[serde(default)]
    pub timeout_when_loss_secs: i64,
    /// Delay the actual stop placement (seconds; 0 disables).
    #[serde(default)]
    pub timeout_loss_secs: i64,
    /// Market-exit after this long in profit (seconds; 0 disables).
    #[serde(default)]
    pub timeout_if_profitable_secs: i64,
    /// An external system owns the stop-loss for this plan.
    #[serde(default)]
    pub stop_loss_external: bool,
    /// Force the hard stop even when stop-loss is externally owned.
    #[serde(default)]
    pub mandatory_forced_loss: bool,

    /// Declared leverage; spot always runs at 1.
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Re-arm after a terminal phase instead of stopping.
    #[serde(default)]
    pub continue_if_ended: bool,
    /// Entry must trigger within this window (seconds; 0 disables).
    #[serde(default)]
    pub waiting_entry_timeout_secs: i64,
    /// Drift the activation price every this many seconds (0 disables).
    #[serde(default)]
    pub activation_move_timeout_secs: i64,
    /// Drift step in percent, leverage-scaled.
    #[serde(default)]
    pub activation_move_step_pct: Decimal,
    /// Arm a break-even stop after this much profit (percent; 0 disables).
    #[serde(default)]
    pub without_loss_after_profit_pct: Decimal,
    /// Abort at start when a peer plan is active on the same account+symbol.
    #[serde(default)]
    pub cancel_if_any_active: bool,

    #[serde(default)]
    pub hedge: HedgeSpec,

    /// Parent template aggregating PnL across derived plans.
    #[serde(default)]
    pub template_id: Option<PlanId>,
}

fn default_leverage() -> u32 {
    1
}

impl Plan {
    /// Leverage with the spot clamp applied.
    pub fn effective_leverage(&self) -> Decimal {
        if self.market_kind.is_spot() {
            Decimal::ONE
        } else {
            Decimal::from(self.leverage.max(1))
        }
    }

    pub fn is_spot(&self) -> bool {
        self.market_kind.is_spot()
    }

    /// Averaging entry configured.
    pub fn has_entry_levels(&self) -> bool {
        !self.entry_levels.is_empty()
    }

    /// Total quantity across all averaging legs.
    pub fn entry_levels_total(&self) -> Qty {
        self.entry_levels
            .iter()
            .fold(Qty::ZERO, |acc, leg| acc + leg.amount)
    }

    /// Whether this plan should place its own stop-loss orders.
    pub fn owns_stop_loss(&self) -> bool {
        !self.stop_loss_external
    }

    /// Whether the hard stop applies (configured, and either internally
    /// owned or mandated despite external ownership).
    pub fn forced_loss_armed(&self) -> bool {
        (!self.forced_loss_pct.is_zero() || self.forced_loss_price.is_positive())
            && (self.owns_stop_loss() || self.mandatory_forced_loss)
    }
}
