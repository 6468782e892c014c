//! Arbitrary-precision currency amounts.
//!
//! Amounts flow through ATXP as [`rust_decimal::Decimal`] end to end and are only
//! converted to integer minor units at the edge, when a [`PaymentMaker`] builds a
//! transfer. Each currency specifies its own decimal places and rounding mode;
//! USDC uses 6 decimal places, rounded half-up.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A non-negative decimal currency amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoneyAmount(#[serde(with = "rust_decimal::serde::str")] Decimal);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MoneyAmountError {
    #[error("invalid decimal amount: {0}")]
    InvalidFormat(String),
    #[error("amount must be strictly positive, got {0}")]
    NotPositive(Decimal),
}

impl MoneyAmount {
    pub fn from_decimal(value: Decimal) -> Result<Self, MoneyAmountError> {
        if value <= Decimal::ZERO {
            return Err(MoneyAmountError::NotPositive(value));
        }
        Ok(MoneyAmount(value))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Converts to an integer count of minor units (e.g. USDC's 6-decimal base units),
    /// rounding half-up at the given number of decimal places.
    pub fn to_minor_units(&self, decimals: u32) -> u128 {
        let scaled = self
            .0
            .round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
            * Decimal::from(10u64.pow(decimals));
        scaled.trunc().try_into().unwrap_or(u128::MAX)
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal =
            Decimal::from_str(s.trim()).map_err(|_| MoneyAmountError::InvalidFormat(s.to_string()))?;
        MoneyAmount::from_decimal(decimal)
    }
}

impl fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}
