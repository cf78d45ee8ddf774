use crate::error::{EngineError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul};

/// A non-negative running total of money, such as what a student has paid so far.
///
/// Wraps `rust_decimal::Decimal` so monetary arithmetic never goes through floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Balance(pub Decimal);

/// A strictly positive monetary amount: an hourly rate, a contract price or a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(EngineError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Price of `quantity` units at this rate.
    pub fn times(self, quantity: Decimal) -> Result<Self> {
        Self::new(self.0 * quantity)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = EngineError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl Mul<u32> for Amount {
    type Output = Self;
    fn mul(self, rhs: u32) -> Self::Output {
        Self(self.0 * Decimal::from(rhs))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// True once this balance covers the whole of `amount`.
    pub fn covers(&self, amount: Amount) -> bool {
        self.0 >= amount.value()
    }
}

impl Add<Amount> for Balance {
    type Output = Self;
    fn add(self, rhs: Amount) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign<Amount> for Balance {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 += rhs.0;
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1.0)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(EngineError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(EngineError::ValidationError(_))
        ));
    }

    #[test]
    fn test_amount_deserialization_rejects_non_positive() {
        let ok: Amount = serde_json::from_str("\"12.50\"").unwrap();
        assert_eq!(ok.value(), dec!(12.50));
        assert!(serde_json::from_str::<Amount>("\"0\"").is_err());
    }

    #[test]
    fn test_contract_price() {
        let rate = Amount::new(dec!(20.0)).unwrap();
        let per_session = rate.times(dec!(1.5)).unwrap();
        assert_eq!((per_session * 10).value(), dec!(300.0));
    }

    #[test]
    fn test_balance_accumulates_payments() {
        let price = Amount::new(dec!(100.0)).unwrap();
        let mut paid = Balance::ZERO;
        paid += Amount::new(dec!(40.0)).unwrap();
        assert!(!paid.covers(price));
        paid += Amount::new(dec!(60.0)).unwrap();
        assert!(paid.covers(price));
        assert_eq!(paid, Balance::new(dec!(100.0)));
    }
}
