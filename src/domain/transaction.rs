//! Transaction Aggregate
//!
//! State machine for money-movement operations. A transaction references
//! its accounts by id; the caller loads them and passes `&mut Account` into
//! the operations, and must serialize access (combined execution lock).
//!
//! Terminal states: COMPLETED (except the compensating `rollback`), FAILED,
//! CANCELLED, ROLLBACK.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::account::{Account, AccountId};
use super::error::DomainError;

/// Transaction identifier, assigned by the store on insert
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct TransactionId(pub i64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Money-movement kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Withdrawal,
    Deposit,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Withdrawal => "WITHDRAWAL",
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Transfer => "TRANSFER",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "WITHDRAWAL" => Some(TransactionKind::Withdrawal),
            "DEPOSIT" => Some(TransactionKind::Deposit),
            "TRANSFER" => Some(TransactionKind::Transfer),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Rollback,
    Cancelled,
    Failed,
}

impl TransactionStatus {
    /// Everything except PENDING is terminal (COMPLETED only leaves through
    /// the compensating rollback)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Rollback => "ROLLBACK",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TransactionStatus::Pending),
            "COMPLETED" => Some(TransactionStatus::Completed),
            "ROLLBACK" => Some(TransactionStatus::Rollback),
            "CANCELLED" => Some(TransactionStatus::Cancelled),
            "FAILED" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Money-movement record and state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub source_account_id: AccountId,
    pub target_account_id: Option<AccountId>,
    pub amount: i64,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub failure_reason: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// New PENDING transaction. The id is assigned by the store.
    pub fn new(
        source_account_id: AccountId,
        target_account_id: Option<AccountId>,
        kind: TransactionKind,
        amount: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransactionId(0),
            source_account_id,
            target_account_id,
            amount,
            kind,
            status: TransactionStatus::Pending,
            failure_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Pre-persist invariant check, run by the service before insert
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.amount <= 0 {
            return Err(DomainError::AmountInvalid("Amount must be positive".into()));
        }
        match self.kind {
            TransactionKind::Withdrawal | TransactionKind::Deposit => {
                if self.target_account_id.is_some() {
                    return Err(DomainError::TransactionAccountInvalid(format!(
                        "Target account must not be provided for {}",
                        self.kind
                    )));
                }
            }
            TransactionKind::Transfer => {
                let target = self.target_account_id.ok_or_else(|| {
                    DomainError::TransactionAccountInvalid(
                        "Both source and target accounts must be provided for transfer".into(),
                    )
                })?;
                if target == self.source_account_id {
                    return Err(DomainError::TransactionAccountInvalid(
                        "Source and target accounts cannot be the same".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Execute the transaction against its accounts.
    ///
    /// Idempotent: a COMPLETED transaction is a no-op. Any account-level
    /// error propagates with the transaction left PENDING; the caller
    /// decides whether to `fail` it.
    pub fn execute(
        &mut self,
        source: &mut Account,
        target: Option<&mut Account>,
    ) -> Result<(), DomainError> {
        info!(transaction_id = %self.id, kind = %self.kind, amount = self.amount, "executing transaction");
        if self.status == TransactionStatus::Completed {
            return Ok(());
        }
        if self.status != TransactionStatus::Pending {
            return Err(DomainError::TransactionStatusInvalid(
                "Transaction is not in pending state".into(),
            ));
        }

        match self.kind {
            TransactionKind::Withdrawal => source.withdraw(self.amount)?,
            TransactionKind::Deposit => source.deposit(self.amount)?,
            TransactionKind::Transfer => {
                let target = target.ok_or_else(|| {
                    DomainError::TransactionAccountInvalid(
                        "Target account must be provided for transfer".into(),
                    )
                })?;
                source.withdraw(self.amount)?;
                target.deposit(self.amount)?;
            }
        }

        self.status = TransactionStatus::Completed;
        Ok(())
    }

    /// Mark the transaction FAILED. No-op when already FAILED.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        if self.status == TransactionStatus::Failed {
            return Ok(());
        }
        if self.status != TransactionStatus::Pending {
            return Err(DomainError::TransactionStatusInvalid(
                "Transaction is not in pending state".into(),
            ));
        }
        self.status = TransactionStatus::Failed;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    /// Cancel a PENDING transaction. No-op when already CANCELLED.
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        if self.status == TransactionStatus::Cancelled {
            return Ok(());
        }
        if self.status != TransactionStatus::Pending {
            return Err(DomainError::TransactionStatusInvalid(
                "Transaction is not in pending status".into(),
            ));
        }
        self.status = TransactionStatus::Cancelled;
        Ok(())
    }

    /// Compensate a COMPLETED transaction by applying the inverse account
    /// operations. No-op when already ROLLBACK.
    pub fn rollback(
        &mut self,
        source: &mut Account,
        target: Option<&mut Account>,
    ) -> Result<(), DomainError> {
        if self.status == TransactionStatus::Rollback {
            return Ok(());
        }
        if self.status != TransactionStatus::Completed {
            return Err(DomainError::TransactionStatusInvalid(
                "Transaction is not in completed status".into(),
            ));
        }

        match self.kind {
            TransactionKind::Withdrawal => source.deposit(self.amount)?,
            TransactionKind::Deposit => source.withdraw(self.amount)?,
            TransactionKind::Transfer => {
                let target = target.ok_or_else(|| {
                    DomainError::TransactionAccountInvalid(
                        "Target account must be provided for transfer".into(),
                    )
                })?;
                target.withdraw(self.amount)?;
                source.deposit(self.amount)?;
            }
        }

        info!(transaction_id = %self.id, kind = %self.kind, "transaction rolled back");
        self.status = TransactionStatus::Rollback;
        Ok(())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction[{}] {} amount={} source={} target={} status={}",
            self.id,
            self.kind,
            self.amount,
            self.source_account_id,
            self.target_account_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".into()),
            self.status
        )
    }
}
