//! Amount type
//!
//! Domain primitives for monetary values. All ledger arithmetic is done on
//! `Decimal` with a fixed scale of two fractional digits, so repeated
//! additions never drift the way binary floating point does.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum allowed amount or balance (1 trillion)
const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// Fixed number of fractional digits
pub const SCALE: u32 = 2;

/// Amount represents a validated, strictly positive monetary value.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - At most 2 decimal places; the stored value is always rescaled to exactly 2
/// - Maximum value is 1 trillion
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use mini_ledger::domain::Amount;
///
/// let amount = Amount::new(Decimal::new(10050, 2)).unwrap();
/// assert_eq!(amount.to_string(), "100.50");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(Decimal);

/// Errors that can occur when creating an Amount or Balance
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(Decimal),

    #[error("Balance cannot be negative (got {0})")]
    Negative(Decimal),

    #[error("Amount has too many decimal places (max {SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("Amount exceeds maximum allowed value ({MAX_AMOUNT})")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// Values with more than two fractional digits are rejected rather than
    /// rounded.
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }

        let value = value.normalize();
        if value.scale() > SCALE {
            return Err(AmountError::TooManyDecimals(value.scale()));
        }

        if value > MAX_AMOUNT {
            return Err(AmountError::Overflow);
        }

        Ok(Self(fixed_scale(value)))
    }

    /// Create an Amount from a whole number of units.
    pub fn from_integer(value: i64) -> Result<Self, AmountError> {
        Self::new(Decimal::from(value))
    }

    /// Get the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// The signed delta this amount contributes when credited.
    pub fn as_credit(&self) -> Decimal {
        self.0
    }

    /// The signed delta this amount contributes when debited.
    pub fn as_debit(&self) -> Decimal {
        -self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal =
            Decimal::from_str(s.trim()).map_err(|e| AmountError::ParseError(e.to_string()))?;
        Amount::new(decimal)
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Amount::from_str(&value)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.to_string()
    }
}

/// Balance represents an account balance (zero or positive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Balance(Decimal);

impl Balance {
    /// Create a new balance (zero or positive)
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value < Decimal::ZERO {
            return Err(AmountError::Negative(value));
        }

        if value > MAX_AMOUNT {
            return Err(AmountError::Overflow);
        }

        Ok(Self(fixed_scale(value)))
    }

    /// Create a zero balance
    pub fn zero() -> Self {
        Self(fixed_scale(Decimal::ZERO))
    }

    /// Get the underlying value
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Check if balance covers a withdrawal of `amount`
    pub fn is_sufficient_for(&self, amount: &Amount) -> bool {
        self.0 >= amount.value()
    }

    /// Apply a signed delta; fails when the result would be negative or overflow
    pub fn apply(&self, delta: Decimal) -> Result<Balance, AmountError> {
        Balance::new(self.0 + delta)
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Default for Balance {
    fn default() -> Self {
        Self::zero()
    }
}

/// Rescale a value to exactly two fractional digits.
///
/// Callers only pass values whose scale is already at most two, so this
/// never rounds.
pub fn fixed_scale(value: Decimal) -> Decimal {
    let mut value = value;
    value.rescale(SCALE);
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_positive() {
        let amount = Amount::new(dec!(100)).unwrap();
        assert_eq!(amount.value(), dec!(100.00));
        assert_eq!(amount.value().scale(), 2);
    }

    #[test]
    fn test_amount_zero_rejected() {
        let amount = Amount::new(Decimal::ZERO);
        assert!(matches!(amount, Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_amount_negative_rejected() {
        let amount = Amount::new(dec!(-0.01));
        assert!(matches!(amount, Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_amount_three_decimals_rejected() {
        let amount = Amount::new(dec!(0.001));
        assert!(matches!(amount, Err(AmountError::TooManyDecimals(3))));
    }

    #[test]
    fn test_amount_trailing_zeros_allowed() {
        // 1.500 has scale 3 but is exactly representable with 2 digits
        let amount = Amount::new(dec!(1.500)).unwrap();
        assert_eq!(amount.to_string(), "1.50");
    }

    #[test]
    fn test_amount_overflow() {
        let amount = Amount::new(dec!(1000000000000.01));
        assert!(matches!(amount, Err(AmountError::Overflow)));
    }

    #[test]
    fn test_amount_max_value_ok() {
        assert!(Amount::new(dec!(1000000000000)).is_ok());
    }

    #[test]
    fn test_amount_from_str() {
        let amount: Amount = " 123.45 ".parse().unwrap();
        assert_eq!(amount.value(), dec!(123.45));

        let bad: Result<Amount, _> = "abc".parse();
        assert!(matches!(bad, Err(AmountError::ParseError(_))));
    }

    #[test]
    fn test_amount_serde_as_string() {
        let amount = Amount::from_integer(7).unwrap();
        assert_eq!(serde_json::to_string(&amount).unwrap(), r#""7.00""#);

        let parsed: Amount = serde_json::from_str(r#""0.10""#).unwrap();
        assert_eq!(parsed.value(), dec!(0.10));

        let rejected: Result<Amount, _> = serde_json::from_str(r#""0""#);
        assert!(rejected.is_err());
    }

    #[test]
    fn test_repeated_cents_do_not_drift() {
        let cent = Amount::new(dec!(0.01)).unwrap();
        let mut balance = Balance::zero();
        for _ in 0..10_000 {
            balance = balance.apply(cent.as_credit()).unwrap();
        }
        assert_eq!(balance.value(), dec!(100.00));
    }

    #[test]
    fn test_balance_apply_exact_to_zero() {
        let balance = Balance::new(dec!(70.00)).unwrap();
        let amount = Amount::new(dec!(70.00)).unwrap();
        let balance = balance.apply(amount.as_debit()).unwrap();
        assert_eq!(balance.value(), Decimal::ZERO);
        assert_eq!(balance.to_string(), "0.00");
    }

    #[test]
    fn test_balance_insufficient() {
        let balance = Balance::new(dec!(50)).unwrap();
        let amount = Amount::new(dec!(50.01)).unwrap();

        assert!(!balance.is_sufficient_for(&amount));
        assert!(matches!(
            balance.apply(amount.as_debit()),
            Err(AmountError::Negative(_))
        ));
    }
}
