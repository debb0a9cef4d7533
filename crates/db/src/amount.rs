//! Token amounts.
//!
//! Amounts are kept as normalized decimal strings, never as floating point
//! values, so that ledger-scale integers round-trip without drift.

use std::{fmt, str::FromStr};

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

/// Amount parsing errors.
#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum AmountError {
    /// Amount string is empty.
    #[display(fmt = "amount is empty")]
    Empty,

    /// Amount is negative.
    #[display(fmt = "amount must not be negative: {}", _0)]
    Negative(#[error(not(source))] String),

    /// Amount contains non-numeric characters.
    #[display(fmt = "malformed amount: {}", _0)]
    Malformed(#[error(not(source))] String),
}

/// Non-negative decimal token amount.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(String);

impl Amount {
    /// Zero amount.
    pub fn zero() -> Self {
        Self(String::from("0"))
    }

    /// Check if the current amount equals zero.
    pub fn is_zero(&self) -> bool {
        self.0 == "0"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.is_empty() {
            return Err(AmountError::Empty);
        }

        if s.starts_with('-') {
            return Err(AmountError::Negative(s.to_string()));
        }

        let (integer, fraction) = match s.split_once('.') {
            Some((integer, fraction)) => (integer, fraction),
            None => (s, ""),
        };

        let is_digits = |part: &str| part.bytes().all(|byte| byte.is_ascii_digit());

        if (integer.is_empty() && fraction.is_empty())
            || !is_digits(integer)
            || !is_digits(fraction)
            || (s.contains('.') && fraction.is_empty())
        {
            return Err(AmountError::Malformed(s.to_string()));
        }

        let integer = integer.trim_start_matches('0');
        let fraction = fraction.trim_end_matches('0');

        let integer = if integer.is_empty() { "0" } else { integer };

        let normalized = if fraction.is_empty() {
            integer.to_string()
        } else {
            format!("{integer}.{fraction}")
        };

        Ok(Self(normalized))
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Amount> for String {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
