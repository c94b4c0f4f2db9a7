use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Currency amount with exactly two fractional digits.
///
/// Every constructor rounds to cents, so equality between two `Money`
/// values is exact equality in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);
    const SCALE: u32 = 2;
    /// Exclusive bound of every ledger amount column (`NUMERIC(14,2)`).
    const LIMIT_MAJOR: i64 = 1_000_000_000_000;

    pub fn from_decimal(value: Decimal) -> Self {
        let mut cents =
            value.round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero);
        cents.rescale(Self::SCALE);
        Money(cents)
    }

    pub fn from_major(amount: i64) -> Self {
        Self::from_decimal(Decimal::new(amount, 0))
    }

    /// Gateways report amounts in minor units (cents).
    pub fn from_minor(amount: i64) -> Self {
        Money(Decimal::new(amount, Self::SCALE))
    }

    pub fn parse(raw: &str) -> Result<Self, rust_decimal::Error> {
        Ok(Self::from_decimal(Decimal::from_str(raw.trim())?))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Amount in minor units. `None` if it does not fit an `i64`.
    pub fn to_minor(&self) -> Option<i64> {
        let cents = self.0.checked_mul(Decimal::ONE_HUNDRED)?.trunc();
        i64::try_from(cents).ok()
    }

    /// Whether the amount fits the ledger's amount columns.
    pub fn is_storable(&self) -> bool {
        self.0.abs() < Decimal::from(Self::LIMIT_MAJOR)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn min(self, other: Self) -> Self {
        Money(self.0.min(other.0))
    }

    pub fn max(self, other: Self) -> Self {
        Money(self.0.max(other.0))
    }

    /// `rate` is a percentage, e.g. `2` for 2%.
    pub fn percentage(&self, rate: Decimal) -> Self {
        Self::from_decimal(self.0 * rate / Decimal::ONE_HUNDRED)
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self::from_decimal(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}
