//! Money Module
//!
//! Exact fixed-point amounts and the supported currency set. Every amount that
//! reaches a balance goes through [`Amount::new`] or [`parse_amount`].
//!
//! ## Rules
//! - Amounts are `rust_decimal::Decimal`, never floats
//! - An amount must be strictly positive
//! - Fractional digits may not exceed the currency's minor units (no silent rounding)
//! - An amount must fit a `NUMERIC(20,2)` column ([`max_amount`])
//!
//! ```rust
//! use paysettle::money::{parse_amount, Currency};
//!
//! let amount = parse_amount("100.50", Currency::Usd).unwrap();
//! assert_eq!(amount.to_string(), "100.50");
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount must be greater than 0")]
    NotPositive,

    #[error("precision overflow: provided {provided} decimals, {currency} allows {max}")]
    PrecisionOverflow {
        provided: u32,
        max: u32,
        currency: Currency,
    },

    #[error("amount exceeds the maximum of {max}")]
    TooLarge { max: Decimal },

    #[error("invalid amount format: {0}")]
    InvalidFormat(String),

    #[error("invalid currency: {0} (supported: TRY, USD, EUR)")]
    UnsupportedCurrency(String),
}

// ============================================================================
// Currency
// ============================================================================

/// Supported settlement currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Try,
    Usd,
    Eur,
}

impl Currency {
    pub const ALL: [Currency; 3] = [Currency::Try, Currency::Usd, Currency::Eur];

    /// ISO 4217 code, uppercase.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Try => "TRY",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
        }
    }

    /// Maximum fractional digits an amount in this currency may carry.
    pub fn minor_units(&self) -> u32 {
        2
    }

    /// Case-insensitive parse. Surrounding whitespace is ignored.
    pub fn parse(code: &str) -> Result<Self, MoneyError> {
        let normalized = code.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|c| c.code() == normalized)
            .ok_or_else(|| MoneyError::UnsupportedCurrency(code.to_string()))
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ============================================================================
// Amount
// ============================================================================

/// Largest value a balance or amount column (`NUMERIC(20,2)`) can hold.
pub fn max_amount() -> Decimal {
    Decimal::from_i128_with_scale(99_999_999_999_999_999_999, 2)
}

/// Strictly positive monetary amount, scale-checked against its currency.
///
/// The inner value is private so an `Amount` can only exist after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal, currency: Currency) -> Result<Self, MoneyError> {
        if value <= Decimal::ZERO {
            return Err(MoneyError::NotPositive);
        }
        // "10.500" is fine for a 2-digit currency, "10.505" is not
        let scale = value.normalize().scale();
        if scale > currency.minor_units() {
            return Err(MoneyError::PrecisionOverflow {
                provided: scale,
                max: currency.minor_units(),
                currency,
            });
        }
        if value > max_amount() {
            return Err(MoneyError::TooLarge { max: max_amount() });
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Amount> for Decimal {
    fn from(a: Amount) -> Self {
        a.0
    }
}

/// Parse a client-supplied decimal string.
///
/// Rejects signs, exponent notation and ambiguous forms such as `.5` or `5.`.
pub fn parse_amount(input: &str, currency: Currency) -> Result<Amount, MoneyError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }
    if s.starts_with('-') {
        return Err(MoneyError::NotPositive);
    }

    let (whole, frac) = match s.split_once('.') {
        None => (s, None),
        Some((w, f)) => {
            if w.is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (use 0.5 instead of .5)".into(),
                ));
            }
            if f.is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (use 5.0 instead of 5.)".into(),
                ));
            }
            (w, Some(f))
        }
    };

    let all_digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    if !all_digits(whole) || !frac.is_none_or(all_digits) {
        return Err(MoneyError::InvalidFormat(format!("not a plain decimal: {}", s)));
    }

    let value = Decimal::from_str(s).map_err(|e| MoneyError::InvalidFormat(e.to_string()))?;
    Amount::new(value, currency)
}
