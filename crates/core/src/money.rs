use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("Invalid amount: '{0}'")]
    Invalid(String),
    #[error("Amount out of range: '{0}'")]
    OutOfRange(String),
}

/// Currency-exact amount, always held at two decimal places.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(Decimal);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, 2))
    }

    /// Saturates at the i64 bounds; parsed amounts are range-checked up front.
    pub fn to_cents(self) -> i64 {
        let scaled = (self.0 * Decimal::ONE_HUNDRED).round();
        scaled.to_i64().unwrap_or(if scaled.is_sign_negative() {
            i64::MIN
        } else {
            i64::MAX
        })
    }

    pub fn from_decimal(decimal: Decimal) -> Self {
        Money(decimal.round_dp(2))
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }

    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    /// Absolute distance between two amounts.
    pub fn distance(self, other: Money) -> Money {
        (self - other).abs()
    }

    /// Parses statement-style amounts: `1,200.00`, `$45.10`, `-5`, `(75.25)`.
    pub fn parse(s: &str) -> Result<Self, MoneyError> {
        let trimmed = s.trim();
        let (negative, body) = if trimmed.starts_with('(') && trimmed.ends_with(')') {
            (true, &trimmed[1..trimmed.len() - 1])
        } else {
            (false, trimmed)
        };
        let cleaned = body.replace([',', '$', ' '], "");
        if cleaned.is_empty() {
            return Err(MoneyError::Invalid(s.to_string()));
        }
        let mut dec = Decimal::from_str(&cleaned).map_err(|_| MoneyError::Invalid(s.to_string()))?;
        if negative {
            dec = -dec;
        }
        let money = Money::from_decimal(dec);
        (money.0 * Decimal::ONE_HUNDRED)
            .to_i64()
            .ok_or_else(|| MoneyError::OutOfRange(s.to_string()))?;
        Ok(money)
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::parse(s)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negative() {
            write!(f, "-${:.2}", self.0.abs())
        } else {
            write!(f, "${:.2}", self.0)
        }
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Self;
    fn neg(self) -> Self {
        Money(-self.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |a, b| a + b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_round_trip_is_exact() {
        assert_eq!(Money::from_cents(120_000).to_cents(), 120_000);
        assert_eq!(Money::from_cents(-1).to_cents(), -1);
    }

    #[test]
    fn parse_statement_formats() {
        assert_eq!(Money::parse("1,200.00").unwrap(), Money::from_cents(120_000));
        assert_eq!(Money::parse("$45.10").unwrap(), Money::from_cents(4_510));
        assert_eq!(Money::parse("(75.25)").unwrap(), Money::from_cents(-7_525));
        assert_eq!(Money::parse("-5").unwrap(), Money::from_cents(-500));
    }

    #[test]
    fn parse_rejects_garbage_and_empty() {
        assert!(matches!(Money::parse(""), Err(MoneyError::Invalid(_))));
        assert!(matches!(Money::parse("twelve"), Err(MoneyError::Invalid(_))));
    }

    #[test]
    fn decimal_arithmetic_has_no_float_drift() {
        let total: Money = (0..10).map(|_| Money::parse("0.10").unwrap()).sum();
        assert_eq!(total, Money::from_cents(100));
    }

    #[test]
    fn distance_is_symmetric() {
        let a = Money::from_cents(50_000);
        let b = Money::from_cents(49_999);
        assert_eq!(a.distance(b), Money::from_cents(1));
        assert_eq!(b.distance(a), Money::from_cents(1));
    }

    #[test]
    fn display_two_places() {
        assert_eq!(Money::from_cents(120_000).to_string(), "$1200.00");
    }

    #[test]
    fn display_puts_sign_before_symbol() {
        assert_eq!(Money::from_cents(-6_000).to_string(), "-$60.00");
        assert_eq!(Money::from_cents(-1).to_string(), "-$0.01");
        assert_eq!(Money::zero().to_string(), "$0.00");
    }
}
