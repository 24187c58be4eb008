//! Payment request validation
//!
//! Checks run in a fixed order and the first failure wins:
//! payment id, idempotency key, amount, currency, from_account, to_account,
//! distinct accounts.

use std::fmt;

use super::models::InitiatePaymentRequest;
use crate::money::{Amount, Currency, MoneyError};

pub const MAX_PAYMENT_ID_LEN: usize = 128;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValidationError {
    #[error("payment_id is required")]
    MissingPaymentId,

    #[error("payment_id exceeds {max} characters")]
    PaymentIdTooLong { max: usize },

    #[error("idempotency_key is required")]
    MissingIdempotencyKey,

    #[error(transparent)]
    Money(#[from] MoneyError),

    #[error("invalid {field} format: '{value}' (expected UUID)")]
    InvalidAccountId { field: &'static str, value: String },

    #[error("from_account and to_account cannot be the same")]
    SameAccount,
}

// ============================================================================
// AccountId - canonical 8-4-4-4-12 hex identifier (private field)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountId(String);

impl AccountId {
    const GROUPS: [usize; 5] = [8, 4, 4, 4, 12];

    /// Accepts `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` with hex digits of
    /// either case. The caller's spelling is kept.
    pub fn parse(field: &'static str, value: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidAccountId {
            field,
            value: value.to_string(),
        };

        let groups: Vec<&str> = value.split('-').collect();
        if groups.len() != Self::GROUPS.len() {
            return Err(invalid());
        }
        for (group, len) in groups.iter().zip(Self::GROUPS) {
            if group.len() != len || !group.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid());
            }
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity ignoring hex case.
    pub fn same_account(&self, other: &AccountId) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request that passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPayment {
    pub payment_id: String,
    pub from_account: AccountId,
    pub to_account: AccountId,
    pub amount: Amount,
    pub currency: Currency,
    pub idempotency_key: String,
}

pub fn validate_initiate_payment(
    req: &InitiatePaymentRequest,
) -> Result<ValidatedPayment, ValidationError> {
    let payment_id = req.payment_id.trim();
    if payment_id.is_empty() {
        return Err(ValidationError::MissingPaymentId);
    }
    if payment_id.chars().count() > MAX_PAYMENT_ID_LEN {
        return Err(ValidationError::PaymentIdTooLong {
            max: MAX_PAYMENT_ID_LEN,
        });
    }

    let idempotency_key = req.idempotency_key.trim();
    if idempotency_key.is_empty() {
        return Err(ValidationError::MissingIdempotencyKey);
    }

    // Sign before currency so a negative amount in an unknown currency
    // reports the amount
    if req.amount <= rust_decimal::Decimal::ZERO {
        return Err(MoneyError::NotPositive.into());
    }
    let currency = Currency::parse(&req.currency)?;
    let amount = Amount::new(req.amount, currency)?;

    let from_account = AccountId::parse("from_account", &req.from_account)?;
    let to_account = AccountId::parse("to_account", &req.to_account)?;
    if from_account.same_account(&to_account) {
        return Err(ValidationError::SameAccount);
    }

    Ok(ValidatedPayment {
        payment_id: payment_id.to_string(),
        from_account,
        to_account,
        amount,
        currency,
        idempotency_key: idempotency_key.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const A: &str = "3f2b8c1e-9a4d-4e7b-8c2f-1a2b3c4d5e6f";
    const B: &str = "7d6c5b4a-3f2e-4d1c-9b8a-0f1e2d3c4b5a";

    fn request() -> InitiatePaymentRequest {
        InitiatePaymentRequest {
            payment_id: "pay-001".into(),
            from_account: A.into(),
            to_account: B.into(),
            amount: Decimal::from_str("100.50").unwrap(),
            currency: "usd".into(),
            idempotency_key: "key-001".into(),
        }
    }

    #[test]
    fn test_valid_request() {
        let v = validate_initiate_payment(&request()).unwrap();
        assert_eq!(v.currency, Currency::Usd);
        assert_eq!(v.amount.value(), Decimal::from_str("100.50").unwrap());
        assert_eq!(v.from_account.as_str(), A);
    }

    #[test]
    fn test_amount_must_be_positive() {
        for amount in ["0", "-5"] {
            let mut r = request();
            r.amount = Decimal::from_str(amount).unwrap();
            assert_eq!(
                validate_initiate_payment(&r),
                Err(ValidationError::Money(MoneyError::NotPositive))
            );
        }
    }

    #[test]
    fn test_negative_amount_reported_before_bad_currency() {
        let mut r = request();
        r.amount = Decimal::from_str("-1").unwrap();
        r.currency = "GBP".into();
        assert_eq!(
            validate_initiate_payment(&r),
            Err(ValidationError::Money(MoneyError::NotPositive))
        );
    }

    #[test]
    fn test_unsupported_currency() {
        let mut r = request();
        r.currency = "GBP".into();
        let err = validate_initiate_payment(&r).unwrap_err();
        assert_eq!(err.to_string(), "invalid currency: GBP (supported: TRY, USD, EUR)");
    }

    #[test]
    fn test_precision_rejected() {
        let mut r = request();
        r.amount = Decimal::from_str("1.005").unwrap();
        assert!(matches!(
            validate_initiate_payment(&r),
            Err(ValidationError::Money(MoneyError::PrecisionOverflow { .. }))
        ));
    }

    #[test]
    fn test_oversized_amount_rejected() {
        let mut r = request();
        r.amount = Decimal::from_str("1000000000000000000.00").unwrap();
        assert!(matches!(
            validate_initiate_payment(&r),
            Err(ValidationError::Money(MoneyError::TooLarge { .. }))
        ));
    }

    #[test]
    fn test_account_format() {
        for bad in [
            "",
            "not-a-uuid",
            "3f2b8c1e9a4d4e7b8c2f1a2b3c4d5e6f",
            "3f2b8c1e-9a4d-4e7b-8c2f-1a2b3c4d5e6",
            "3f2b8c1e-9a4d-4e7b-8c2f-1a2b3c4d5e6g",
            "{3f2b8c1e-9a4d-4e7b-8c2f-1a2b3c4d5e6f}",
        ] {
            let mut r = request();
            r.from_account = bad.into();
            assert!(
                matches!(
                    validate_initiate_payment(&r),
                    Err(ValidationError::InvalidAccountId { field: "from_account", .. })
                ),
                "{:?} should be rejected",
                bad
            );
        }

        let mut r = request();
        r.to_account = "xyz".into();
        assert!(matches!(
            validate_initiate_payment(&r),
            Err(ValidationError::InvalidAccountId { field: "to_account", .. })
        ));
    }

    #[test]
    fn test_uppercase_hex_accepted() {
        let mut r = request();
        r.from_account = A.to_uppercase();
        assert!(validate_initiate_payment(&r).is_ok());
    }

    #[test]
    fn test_same_account_rejected_ignoring_case() {
        let mut r = request();
        r.to_account = A.to_uppercase();
        assert_eq!(validate_initiate_payment(&r), Err(ValidationError::SameAccount));
    }

    #[test]
    fn test_missing_identifiers() {
        let mut r = request();
        r.payment_id = "  ".into();
        assert_eq!(validate_initiate_payment(&r), Err(ValidationError::MissingPaymentId));

        let mut r = request();
        r.payment_id = "x".repeat(MAX_PAYMENT_ID_LEN + 1);
        assert!(matches!(
            validate_initiate_payment(&r),
            Err(ValidationError::PaymentIdTooLong { .. })
        ));

        let mut r = request();
        r.idempotency_key = "".into();
        assert_eq!(
            validate_initiate_payment(&r),
            Err(ValidationError::MissingIdempotencyKey)
        );
    }
}
