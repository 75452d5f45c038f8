//! Account Aggregate
//!
//! Balance and lifecycle operations. None of these operations are
//! internally synchronized: callers serialize access, either through the
//! per-account status lock or the combined execution lock.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::DomainError;

/// Account identifier, assigned by the store on insert
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account lifecycle status
///
/// Transitions: INITIAL -> ACTIVATED (activate), ACTIVATED <-> FROZEN
/// (freeze/defreeze, idempotent at the target state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Initial,
    Activated,
    Frozen,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Initial => "INITIAL",
            AccountStatus::Activated => "ACTIVATED",
            AccountStatus::Frozen => "FROZEN",
        }
    }

    /// Parse the storage representation
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "INITIAL" => Some(AccountStatus::Initial),
            "ACTIVATED" => Some(AccountStatus::Activated),
            "FROZEN" => Some(AccountStatus::Frozen),
            _ => None,
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Monetary account
///
/// Invariants: `balance >= 0` at all committed states; the balance only
/// changes through [`deposit`](Account::deposit) / [`withdraw`](Account::withdraw)
/// on an ACTIVATED account. The `version` counter backs the store's
/// optimistic write check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub account_number: String,
    pub status: AccountStatus,
    pub balance: i64,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// New account in INITIAL status. The id is assigned by the store.
    pub fn new(account_number: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: AccountId(0),
            account_number: account_number.into(),
            status: AccountStatus::Initial,
            balance: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn deposit(&mut self, amount: i64) -> Result<(), DomainError> {
        Self::assert_amount(amount)?;
        self.assert_active()?;
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| DomainError::AmountInvalid("amount overflows balance".into()))?;
        info!(account_id = %self.id, amount, balance = self.balance, "deposit");
        Ok(())
    }

    pub fn withdraw(&mut self, amount: i64) -> Result<(), DomainError> {
        if !self.can_withdraw(amount)? {
            return Err(DomainError::InsufficientBalance);
        }
        self.balance -= amount;
        info!(account_id = %self.id, amount, balance = self.balance, "withdraw");
        Ok(())
    }

    pub fn can_withdraw(&self, amount: i64) -> Result<bool, DomainError> {
        Self::assert_amount(amount)?;
        self.assert_active()?;
        Ok(self.balance >= amount)
    }

    /// Freeze the account. No-op when already FROZEN.
    pub fn freeze(&mut self) -> Result<(), DomainError> {
        if self.status == AccountStatus::Initial {
            return Err(DomainError::AccountStatusInvalid("account not activated".into()));
        }
        if self.status != AccountStatus::Frozen {
            info!(account_id = %self.id, "freeze");
            self.status = AccountStatus::Frozen;
        }
        Ok(())
    }

    /// Lift a freeze. No-op when already ACTIVATED.
    pub fn defreeze(&mut self) -> Result<(), DomainError> {
        if self.status == AccountStatus::Activated {
            return Ok(());
        }
        if self.status == AccountStatus::Frozen {
            info!(account_id = %self.id, "defreeze");
            self.status = AccountStatus::Activated;
            Ok(())
        } else {
            Err(DomainError::AccountStatusInvalid("not in frozen status".into()))
        }
    }

    /// INITIAL -> ACTIVATED; any other starting state is an error,
    /// including re-activation.
    pub fn activate(&mut self) -> Result<(), DomainError> {
        if self.status == AccountStatus::Initial {
            info!(account_id = %self.id, "activate");
            self.status = AccountStatus::Activated;
            Ok(())
        } else {
            Err(DomainError::AccountStatusInvalid("not in initial status".into()))
        }
    }

    pub fn assert_active(&self) -> Result<(), DomainError> {
        if self.status != AccountStatus::Activated {
            return Err(DomainError::AccountStatusInvalid(format!(
                "not in activated status: {}",
                self.status
            )));
        }
        Ok(())
    }

    fn assert_amount(amount: i64) -> Result<(), DomainError> {
        if amount <= 0 {
            return Err(DomainError::AmountInvalid("amount must be positive".into()));
        }
        Ok(())
    }
}
