//! Core Error Types
//!
//! Splits failures into domain errors (business-rule violations, terminal,
//! never retried) and infrastructure errors (lock timeouts, storage faults,
//! anything unexpected — retried up to a bounded attempt count).

use thiserror::Error;

use crate::lock::LockError;
use crate::store::StoreError;

/// Business-rule violation.
///
/// Domain errors are terminal: they are never retried, and when one is
/// raised during execution dispatch the transaction is marked FAILED.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("{0}")]
    AmountInvalid(String),

    #[error("{0}")]
    AccountStatusInvalid(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("{0}")]
    TransactionAccountInvalid(String),

    #[error("{0}")]
    TransactionStatusInvalid(String),

    #[error("{0}")]
    TransactionTypeInvalid(String),

    #[error("Account not found")]
    AccountNotFound,

    #[error("Transaction not found")]
    TransactionNotFound,
}

impl DomainError {
    /// Stable error code for the outer adapter layers
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::AmountInvalid(_) => "AMOUNT_INVALID",
            DomainError::AccountStatusInvalid(_) => "ACCOUNT_STATUS_INVALID",
            DomainError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            DomainError::TransactionAccountInvalid(_) => "TRANSACTION_ACCOUNT_INVALID",
            DomainError::TransactionStatusInvalid(_) => "TRANSACTION_STATUS_INVALID",
            DomainError::TransactionTypeInvalid(_) => "TRANSACTION_TYPE_INVALID",
            DomainError::AccountNotFound => "ACCOUNT_NOT_FOUND",
            DomainError::TransactionNotFound => "TRANSACTION_NOT_FOUND",
        }
    }
}

/// Error surface of the core services.
///
/// Only the `Domain` variant maps to a caller-visible rejection; everything
/// else is an infrastructure fault and eligible for bounded retry.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

impl CoreError {
    /// True for business-rule violations (terminal, never retried)
    pub fn is_domain(&self) -> bool {
        matches!(self, CoreError::Domain(_))
    }

    /// Infrastructure failures are retried by the operation that hit them
    pub fn is_retryable(&self) -> bool {
        !self.is_domain()
    }

    /// The wrapped domain error, if any
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            CoreError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(DomainError::InsufficientBalance.code(), "INSUFFICIENT_BALANCE");
        assert_eq!(
            DomainError::AmountInvalid("amount must be positive".into()).code(),
            "AMOUNT_INVALID"
        );
        assert_eq!(DomainError::AccountNotFound.code(), "ACCOUNT_NOT_FOUND");
    }

    #[test]
    fn test_display_carries_reason() {
        let err = DomainError::AccountStatusInvalid("not in activated status: FROZEN".into());
        assert_eq!(err.to_string(), "not in activated status: FROZEN");
        assert_eq!(DomainError::InsufficientBalance.to_string(), "Insufficient balance");
    }

    #[test]
    fn test_retry_classification() {
        let domain: CoreError = DomainError::InsufficientBalance.into();
        assert!(domain.is_domain());
        assert!(!domain.is_retryable());

        let infra: CoreError = LockError::WaitTimeout {
            name: "account:1".into(),
            waited_ms: 10_000,
        }
        .into();
        assert!(!infra.is_domain());
        assert!(infra.is_retryable());
        assert!(infra.domain().is_none());
    }
}
