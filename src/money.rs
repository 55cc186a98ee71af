//! Money Value Type
//!
//! Exact, non-negative, zero-decimal monetary amount. All amounts that enter
//! the transaction core MUST go through this type.
//!
//! ## Design Principles
//! 1. Never negative: subtraction that would go below zero is an error, not a result
//! 2. Normalized on construction: scale is always 0 (rounded half-up)
//! 3. Immutable: every operation returns a new value
//!
//! ## Usage
//! ```rust
//! use txn_core::money::Money;
//!
//! let balance = Money::of(150_000)?;
//! let after = balance.checked_add(Money::of(100_000)?)?;
//! assert_eq!(after, Money::of(250_000)?);
//! assert!(balance.subtract(after).is_err());
//! # Ok::<(), txn_core::TransactionError>(())
//! ```

use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use crate::transaction::error::TransactionError;

/// Number of decimal places kept by [`Money`].
const SCALE: u32 = 0;

/// Rounding applied on construction (half-up for non-negative values).
const ROUNDING: RoundingStrategy = RoundingStrategy::MidpointAwayFromZero;

/// Non-negative integral-currency amount
///
/// # Invariants (ENFORCED by private field):
/// - amount >= 0
/// - scale == 0
///
/// Equality, ordering and hashing compare the numeric value, so `Money::parse("100.0")`
/// equals `Money::of(100)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Zero amount
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Build from an integer amount
    ///
    /// # Errors
    /// * `InvalidAmount` - if `amount` is negative
    pub fn of(amount: i64) -> Result<Self, TransactionError> {
        Self::from_decimal(Decimal::from(amount))
    }

    /// Build from an exact decimal, rounding half-up to zero decimals
    ///
    /// # Errors
    /// * `InvalidAmount` - if `amount` is negative
    pub fn from_decimal(amount: Decimal) -> Result<Self, TransactionError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(TransactionError::InvalidAmount {
                amount: Some(amount.to_string()),
            });
        }
        let mut normalized = amount.round_dp_with_strategy(SCALE, ROUNDING);
        normalized.rescale(SCALE);
        normalized.set_sign_positive(true);
        Ok(Self(normalized))
    }

    /// Parse a client-supplied amount string (e.g. `"1500"`, `"99.5"`)
    ///
    /// # Errors
    /// * `InvalidAmount` - if the string is not a number or is negative
    pub fn parse(amount: &str) -> Result<Self, TransactionError> {
        let decimal = Decimal::from_str(amount.trim()).map_err(|_| {
            TransactionError::InvalidAmount {
                amount: Some(amount.to_string()),
            }
        })?;
        Self::from_decimal(decimal)
    }

    /// Underlying decimal value (always scale 0)
    #[inline]
    pub fn amount(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    #[inline]
    pub fn is_greater_than(&self, other: &Money) -> bool {
        self > other
    }

    #[inline]
    pub fn is_greater_than_or_equal(&self, other: &Money) -> bool {
        self >= other
    }

    /// Subtract `other`, refusing to go below zero
    ///
    /// # Errors
    /// * `InsufficientFunds` - carries both operands when `other > self`
    pub fn subtract(&self, other: Money) -> Result<Money, TransactionError> {
        if other > *self {
            return Err(TransactionError::InsufficientFunds {
                balance: *self,
                requested: other,
            });
        }
        Ok(Money(self.0 - other.0))
    }

    /// Add `other`
    ///
    /// The only failure is exceeding the decimal range (about 7.9e28), far
    /// beyond any real balance.
    ///
    /// # Errors
    /// * `InvalidAmount` - the sum is not representable
    pub fn checked_add(&self, other: Money) -> Result<Money, TransactionError> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| TransactionError::InvalidAmount {
                amount: Some(format!("{} + {}", self.0, other.0)),
            })
    }

    /// Sum of `amounts`, starting from zero
    ///
    /// # Errors
    /// * `InvalidAmount` - the running total is not representable
    pub fn total<I>(amounts: I) -> Result<Money, TransactionError>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, amount| acc.checked_add(amount))
    }

    /// Lossy conversion for storage columns; `None` beyond `i64::MAX`
    pub fn to_i64(&self) -> Option<i64> {
        self.0.to_i64()
    }

    /// Thousands-grouped display form, e.g. `"1,234,567"`
    pub fn formatted(&self) -> String {
        let digits = self.0.to_string();
        let mut out = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                out.push(',');
            }
            out.push(ch);
        }
        out
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::ZERO
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Money {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Money::parse(s)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = TransactionError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Money::from_decimal(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Decimal {
        value.0
    }
}
