//! Precision-safe decimal types.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. Prices and quantities
//! are distinct newtypes so the two cannot be mixed up in planner math.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};
use std::str::FromStr;

/// Round a raw decimal to `dp` places, half-up.
///
/// Idempotent: applying it twice with the same `dp` is a no-op.
#[inline]
pub fn to_fixed(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Price with exact decimal precision.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Sentinel meaning "exit at market now" in stop-loss overrides.
    pub const MARKET_SENTINEL: Self = Self(Decimal::NEGATIVE_ONE);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// True for the `-1` "market now" sentinel.
    #[inline]
    pub fn is_market_sentinel(&self) -> bool {
        self.0 == Decimal::NEGATIVE_ONE
    }

    /// Round to `dp` decimal places, half-up.
    #[inline]
    pub fn to_fixed(&self, dp: u32) -> Self {
        Self(to_fixed(self.0, dp))
    }

    /// This price shifted by `pct` percent: `price * (1 + pct/100)`.
    ///
    /// Negative `pct` shifts down. Callers pass leverage-scaled percentages.
    #[inline]
    pub fn offset_pct(&self, pct: Decimal) -> Self {
        Self(self.0 * (Decimal::ONE + pct / Decimal::ONE_HUNDRED))
    }

    /// Percentage distance from `base`: `(self/base - 1) * 100`.
    #[inline]
    pub fn pct_from(&self, base: Price) -> Option<Decimal> {
        if base.is_zero() {
            return None;
        }
        Some((self.0 / base.0 - Decimal::ONE) * Decimal::ONE_HUNDRED)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// Order/position quantity with exact decimal precision.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Qty(pub Decimal);

impl Qty {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round to `dp` decimal places, half-up.
    #[inline]
    pub fn to_fixed(&self, dp: u32) -> Self {
        Self(to_fixed(self.0, dp))
    }

    /// Fraction of this quantity: `qty * pct / 100`.
    #[inline]
    pub fn pct(&self, pct: Decimal) -> Self {
        Self(self.0 * pct / Decimal::ONE_HUNDRED)
    }

    /// Notional value: qty * price.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        self.0 * price.0
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Qty {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Qty {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Qty {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Qty {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Qty {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Qty {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_to_fixed_half_up() {
        assert_eq!(to_fixed(dec!(1.2345), 3), dec!(1.235));
        assert_eq!(to_fixed(dec!(1.2344), 3), dec!(1.234));
        assert_eq!(to_fixed(dec!(1.5), 0), dec!(2));
    }

    #[test]
    fn test_to_fixed_idempotent() {
        let once = to_fixed(dec!(6952.4567), 2);
        let twice = to_fixed(once, 2);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_price_offset_pct() {
        let p = Price::new(dec!(7000));
        // +0.03% (3% deviation at 100x leverage)
        assert_eq!(p.offset_pct(dec!(0.03)), Price::new(dec!(7002.1)));
        assert_eq!(p.offset_pct(dec!(-0.03)), Price::new(dec!(6997.9)));
    }

    #[test]
    fn test_price_pct_from() {
        let base = Price::new(dec!(6950));
        let p = Price::new(dec!(6952.5));
        let pct = p.pct_from(base).unwrap();
        assert!(pct > dec!(0.035) && pct < dec!(0.037));
        assert!(p.pct_from(Price::ZERO).is_none());
    }

    #[test]
    fn test_market_sentinel() {
        assert!(Price::MARKET_SENTINEL.is_market_sentinel());
        assert!(!Price::new(dec!(100)).is_market_sentinel());
    }

    #[test]
    fn test_qty_pct() {
        let q = Qty::new(dec!(0.05));
        assert_eq!(q.pct(dec!(33)), Qty::new(dec!(0.0165)));
        assert_eq!(q.pct(dec!(100)), q);
    }

    #[test]
    fn test_qty_notional() {
        let q = Qty::new(dec!(0.5));
        assert_eq!(q.notional(Price::new(dec!(50000))), dec!(25000));
    }
}
