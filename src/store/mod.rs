//! Storage Abstraction
//!
//! The core talks to its durable store through [`Store`]/[`UnitOfWork`]:
//! bounded scopes of reads and writes that commit or roll back atomically,
//! with REPEATABLE READ-equivalent isolation, optimistic version checks on
//! every save and commit-deferred callbacks.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::account::{Account, AccountId};
use crate::domain::transaction::{Transaction, TransactionId, TransactionStatus};

/// Isolation level requested for a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    ReadCommitted,
    RepeatableRead,
}

/// Callback registered during a unit of work, run exactly once strictly
/// after a successful commit, never after a rollback
pub type CommitHook = Box<dyn FnOnce() + Send + 'static>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("account number already exists: {0}")]
    DuplicateAccountNumber(String),

    #[error("version conflict on {entity} {id}")]
    VersionConflict { entity: &'static str, id: i64 },

    #[error("unit of work already finished")]
    Finished,

    #[error("backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self, isolation: Isolation) -> Result<Box<dyn UnitOfWork>, StoreError>;
}

/// A bounded scope of storage operations.
///
/// Writes become visible to other sessions only at `commit`, which fails
/// with [`StoreError::VersionConflict`] when a concurrent writer got to an
/// entity first. Dropping an unfinished unit of work rolls it back.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn insert_account(&mut self, account: Account) -> Result<Account, StoreError>;
    async fn find_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError>;
    async fn find_account_by_number(&mut self, number: &str)
    -> Result<Option<Account>, StoreError>;
    async fn save_account(&mut self, account: &Account) -> Result<(), StoreError>;

    async fn insert_transaction(&mut self, txn: Transaction) -> Result<Transaction, StoreError>;
    async fn find_transaction(&mut self, id: TransactionId)
    -> Result<Option<Transaction>, StoreError>;
    async fn save_transaction(&mut self, txn: &Transaction) -> Result<(), StoreError>;

    /// Ids of transactions sitting in `status` since before `cutoff`,
    /// oldest first, at most `limit`
    async fn find_stuck_transactions(
        &mut self,
        status: TransactionStatus,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TransactionId>, StoreError>;

    /// Register a callback to run once, strictly after a successful commit
    fn on_commit(&mut self, hook: CommitHook);

    async fn commit(&mut self) -> Result<(), StoreError>;
    async fn rollback(&mut self) -> Result<(), StoreError>;
}
