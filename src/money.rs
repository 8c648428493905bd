//! Strongly-typed money. `Quote` and `Base` wrap `Decimal` so a function
//! returning quote P&L can't be multiplied by a price and mistaken for base
//! units, or vice versa — the regression fixed here once reported P&L in
//! base currency and then multiplied by price, inflating the figure by the
//! quote/base ratio.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// An amount denominated in the quote currency (e.g. USDT in BTC/USDT).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quote(pub Decimal);

/// An amount denominated in the base currency (e.g. BTC in BTC/USDT).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Base(pub Decimal);

/// A price: quote per unit of base. Multiplying a `Base` by a `Price` gives
/// a `Quote` — the only sanctioned way to cross the unit boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(pub Decimal);

impl Quote {
    pub const ZERO: Quote = Quote(Decimal::ZERO);

    pub fn new(d: Decimal) -> Self {
        Quote(d)
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn max(self, other: Quote) -> Quote {
        Quote(self.0.max(other.0))
    }

    pub fn min(self, other: Quote) -> Quote {
        Quote(self.0.min(other.0))
    }

    pub fn abs(self) -> Quote {
        Quote(self.0.abs())
    }
}

impl Base {
    pub const ZERO: Base = Base(Decimal::ZERO);

    pub fn new(d: Decimal) -> Self {
        Base(d)
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Quantize down to the exchange's lot step size (floor, never round up
    /// past what the account can actually afford).
    pub fn floor_to_step(self, step: Decimal) -> Base {
        if step.is_zero() {
            return self;
        }
        Base((self.0 / step).floor() * step)
    }
}

impl Price {
    pub fn new(d: Decimal) -> Self {
        Price(d)
    }
}

// Quote +/- Quote = Quote
impl Add for Quote {
    type Output = Quote;
    fn add(self, rhs: Quote) -> Quote {
        Quote(self.0 + rhs.0)
    }
}
impl Sub for Quote {
    type Output = Quote;
    fn sub(self, rhs: Quote) -> Quote {
        Quote(self.0 - rhs.0)
    }
}
impl AddAssign for Quote {
    fn add_assign(&mut self, rhs: Quote) {
        self.0 += rhs.0;
    }
}
impl SubAssign for Quote {
    fn sub_assign(&mut self, rhs: Quote) {
        self.0 -= rhs.0;
    }
}
impl Neg for Quote {
    type Output = Quote;
    fn neg(self) -> Quote {
        Quote(-self.0)
    }
}
impl Sum for Quote {
    fn sum<I: Iterator<Item = Quote>>(iter: I) -> Quote {
        iter.fold(Quote::ZERO, Add::add)
    }
}

// Quote * scalar fraction (risk_per_trade, etc.)
impl Mul<Decimal> for Quote {
    type Output = Quote;
    fn mul(self, rhs: Decimal) -> Quote {
        Quote(self.0 * rhs)
    }
}
impl Div<Decimal> for Quote {
    type Output = Quote;
    fn div(self, rhs: Decimal) -> Quote {
        Quote(self.0 / rhs)
    }
}

// Base +/- Base = Base
impl Add for Base {
    type Output = Base;
    fn add(self, rhs: Base) -> Base {
        Base(self.0 + rhs.0)
    }
}
impl Sub for Base {
    type Output = Base;
    fn sub(self, rhs: Base) -> Base {
        Base(self.0 - rhs.0)
    }
}
impl Mul<Decimal> for Base {
    type Output = Base;
    fn mul(self, rhs: Decimal) -> Base {
        Base(self.0 * rhs)
    }
}
impl Div<Decimal> for Base {
    type Output = Base;
    fn div(self, rhs: Decimal) -> Base {
        Base(self.0 / rhs)
    }
}

// The only legal Quote <-> Base bridges: through a Price.
impl Mul<Price> for Base {
    type Output = Quote;
    fn mul(self, rhs: Price) -> Quote {
        Quote(self.0 * rhs.0)
    }
}
impl Mul<Base> for Price {
    type Output = Quote;
    fn mul(self, rhs: Base) -> Quote {
        Quote(self.0 * rhs.0)
    }
}
impl Div<Price> for Quote {
    type Output = Base;
    fn div(self, rhs: Price) -> Base {
        Base(self.0 / rhs.0)
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}
impl fmt::Display for Base {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.8}", self.0)
    }
}
impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.8}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn base_times_price_is_quote() {
        let qty = Base::new(dec!(0.05));
        let price = Price::new(dec!(30_000));
        let notional = qty * price;
        assert_eq!(notional, Quote::new(dec!(1500.00)));
    }

    #[test]
    fn floor_to_step_never_rounds_up() {
        let qty = Base::new(dec!(0.0734));
        let floored = qty.floor_to_step(dec!(0.001));
        assert_eq!(floored, Base::new(dec!(0.073)));
    }

    #[test]
    fn quote_division_by_price_is_base() {
        let risk = Quote::new(dec!(20.0));
        let stop_distance = Price::new(dec!(200.0));
        let qty = risk / stop_distance;
        assert_eq!(qty, Base::new(dec!(0.1)));
    }
}
