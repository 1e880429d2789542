//! PnL and fee arithmetic.

use rust_decimal::Decimal;

use crate::order::OrderSide;
use crate::plan::MarketKind;
use crate::{Price, Qty};

/// Taker fee on futures markets, in percent.
pub const FUTURES_FEE_PCT: Decimal = Decimal::from_parts(4, 0, 0, false, 2); // 0.04

/// Taker fee on spot markets, in percent.
pub const SPOT_FEE_PCT: Decimal = Decimal::from_parts(12, 0, 0, false, 2); // 0.12

/// Base fee rate for a market kind, in percent.
pub fn fee_rate_pct(kind: MarketKind) -> Decimal {
    match kind {
        MarketKind::Spot => SPOT_FEE_PCT,
        MarketKind::Futures => FUTURES_FEE_PCT,
    }
}

/// Break-even offset in percent: the round-trip fee, doubled again under
/// hedging because the paired strategy pays its own round trip.
pub fn break_even_fee_pct(kind: MarketKind, hedging: bool) -> Decimal {
    let multiplier = if hedging {
        Decimal::from(4)
    } else {
        Decimal::TWO
    };
    fee_rate_pct(kind) * multiplier
}

/// Leveraged profit percentage:
/// `(exit/entry * 100 - 100) * leverage * side_sign`.
///
/// Returns zero when the entry price is unknown.
pub fn profit_pct(entry: Price, exit: Price, leverage: Decimal, side: OrderSide) -> Decimal {
    if entry.is_zero() {
        return Decimal::ZERO;
    }
    let raw = exit.inner() / entry.inner() * Decimal::ONE_HUNDRED - Decimal::ONE_HUNDRED;
    raw * leverage * Decimal::from(side.sign())
}

/// Absolute profit: `(amount/leverage) * entry * profit_pct / 100`.
pub fn profit_amount(amount: Qty, leverage: Decimal, entry: Price, pct: Decimal) -> Decimal {
    if leverage.is_zero() {
        return Decimal::ZERO;
    }
    amount.inner() / leverage * entry.inner() * pct / Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fee_constants() {
        assert_eq!(FUTURES_FEE_PCT, dec!(0.04));
        assert_eq!(SPOT_FEE_PCT, dec!(0.12));
    }

    #[test]
    fn test_break_even_fee() {
        assert_eq!(break_even_fee_pct(MarketKind::Futures, false), dec!(0.08));
        assert_eq!(break_even_fee_pct(MarketKind::Futures, true), dec!(0.16));
        assert_eq!(break_even_fee_pct(MarketKind::Spot, false), dec!(0.24));
        assert_eq!(break_even_fee_pct(MarketKind::Spot, true), dec!(0.48));
    }

    #[test]
    fn test_profit_pct_long() {
        // Entry 7000, exit 7070: +1% raw, 10x leverage => +10%
        let pct = profit_pct(
            Price::new(dec!(7000)),
            Price::new(dec!(7070)),
            dec!(10),
            OrderSide::Buy,
        );
        assert_eq!(pct, dec!(10));
    }

    #[test]
    fn test_profit_pct_short() {
        // Short entry 7000, exit 7070: price rose 1%, shorts lose
        let pct = profit_pct(
            Price::new(dec!(7000)),
            Price::new(dec!(7070)),
            dec!(10),
            OrderSide::Sell,
        );
        assert_eq!(pct, dec!(-10));
    }

    #[test]
    fn test_profit_pct_unknown_entry() {
        let pct = profit_pct(Price::ZERO, Price::new(dec!(7070)), dec!(10), OrderSide::Buy);
        assert_eq!(pct, Decimal::ZERO);
    }

    #[test]
    fn test_profit_amount() {
        // 0.05 at 10x on a 7000 entry with +10% leveraged profit:
        // (0.05/10) * 7000 * 0.10 = 3.5
        let amount = profit_amount(Qty::new(dec!(0.05)), dec!(10), Price::new(dec!(7000)), dec!(10));
        assert_eq!(amount, dec!(3.5));
    }
}
