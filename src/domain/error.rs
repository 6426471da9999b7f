//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use thiserror::Error;

/// Business rule violations and domain invariant failures.
///
/// These are terminal outcomes of processing a request: retrying the same
/// request cannot change them. The worker acknowledges the message and moves
/// on; infrastructure faults are a different taxonomy (`StoreError`).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Withdrawal exceeds the current balance
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    },

    /// Invalid amount (zero, negative, or exceeds limit)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Account does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(i64),

    /// Applying the delta would overflow the balance column
    #[error("Balance out of range: {0}")]
    BalanceOutOfRange(String),
}

impl DomainError {
    /// Create an insufficient funds error
    pub fn insufficient_funds(
        required: rust_decimal::Decimal,
        available: rust_decimal::Decimal,
    ) -> Self {
        Self::InsufficientFunds {
            required,
            available,
        }
    }
}

impl From<super::AmountError> for DomainError {
    fn from(err: super::AmountError) -> Self {
        DomainError::InvalidAmount(err.to_string())
    }
}
