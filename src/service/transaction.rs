//! Transaction Service
//!
//! Creation persists a PENDING transaction and defers the "created"
//! notification to commit. Execution takes one combined lock over every
//! referenced account, then runs the state transition in its own freshly
//! isolated unit of work, so the caller's transaction scope cannot stretch
//! the lock hold.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::LockConfig;
use crate::defer::Defers;
use crate::domain::account::Account;
use crate::domain::error::{CoreError, DomainError};
use crate::domain::event::TransactionEvent;
use crate::domain::transaction::{Transaction, TransactionId, TransactionKind};
use crate::lock::LockBroker;
use crate::service::account::AccountService;
use crate::service::retry::{RetryPolicy, with_retry};
use crate::store::{Isolation, Store};

pub struct TransactionService {
    store: Arc<dyn Store>,
    broker: Arc<dyn LockBroker>,
    accounts: Arc<AccountService>,
    defers: Defers,
    locks: LockConfig,
    retry: RetryPolicy,
}

impl TransactionService {
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<dyn LockBroker>,
        accounts: Arc<AccountService>,
        defers: Defers,
        locks: LockConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self { store, broker, accounts, defers, locks, retry }
    }

    pub async fn create_transfer_transaction(
        &self,
        from_number: &str,
        to_number: &str,
        amount: i64,
    ) -> Result<Transaction, CoreError> {
        let accounts = self.accounts.get_valid_accounts(&[from_number, to_number]).await?;
        self.create_transaction(
            accounts.first(),
            accounts.get(1),
            TransactionKind::Transfer,
            amount,
        )
        .await
    }

    pub async fn create_withdraw_transaction(
        &self,
        account_number: &str,
        amount: i64,
    ) -> Result<Transaction, CoreError> {
        let source = self.accounts.get_valid_account(account_number).await?;
        self.create_transaction(Some(&source), None, TransactionKind::Withdrawal, amount).await
    }

    pub async fn create_deposit_transaction(
        &self,
        account_number: &str,
        amount: i64,
    ) -> Result<Transaction, CoreError> {
        let source = self.accounts.get_valid_account(account_number).await?;
        self.create_transaction(Some(&source), None, TransactionKind::Deposit, amount).await
    }

    /// Persist a new PENDING transaction.
    ///
    /// The "created" notification is deferred to the unit of work's commit:
    /// a consumer reacting to it can always read the transaction it was
    /// notified about.
    pub async fn create_transaction(
        &self,
        source: Option<&Account>,
        target: Option<&Account>,
        kind: TransactionKind,
        amount: i64,
    ) -> Result<Transaction, CoreError> {
        let source = source.ok_or_else(|| {
            DomainError::TransactionAccountInvalid("Source accounts cannot be null".into())
        })?;
        if kind == TransactionKind::Transfer {
            let target = target.ok_or_else(|| {
                DomainError::TransactionAccountInvalid("Target accounts cannot be null".into())
            })?;
            if source.id == target.id {
                return Err(DomainError::TransactionAccountInvalid(
                    "Source and target accounts cannot be the same".into(),
                )
                .into());
            }
        }
        if amount <= 0 {
            return Err(
                DomainError::AmountInvalid("Amount must be greater than zero".into()).into()
            );
        }

        let draft = Transaction::new(source.id, target.map(|t| t.id), kind, amount);
        draft.validate()?;

        let mut uow = self.store.begin(Isolation::RepeatableRead).await?;
        let txn = uow.insert_transaction(draft).await?;
        info!(transaction_id = %txn.id, kind = %kind, amount, "transaction created");
        self.defers
            .publish_on_commit(uow.as_mut(), TransactionEvent::Created { transaction_id: txn.id });
        uow.commit().await?;
        Ok(txn)
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, CoreError> {
        let mut uow = self.store.begin(Isolation::ReadCommitted).await?;
        let txn = uow.find_transaction(id).await?.ok_or(DomainError::TransactionNotFound)?;
        Ok(txn)
    }

    /// Execute a transaction by id.
    ///
    /// Idempotent: redelivered queue messages and recovery re-submissions
    /// funnel through here. Unexpected failures are retried a bounded number
    /// of times; after that the transaction is left PENDING for the recovery
    /// sweep, never marked FAILED.
    pub async fn execute_transaction(&self, id: TransactionId) -> Result<(), CoreError> {
        with_retry("execute transaction", &self.retry, || self.execute_once(id)).await
    }

    async fn execute_once(&self, id: TransactionId) -> Result<(), CoreError> {
        // resolve the referenced accounts outside the lock
        let txn = {
            let mut uow = self.store.begin(Isolation::ReadCommitted).await?;
            uow.find_transaction(id).await?.ok_or(DomainError::TransactionNotFound)?
        };

        // one combined lock over every referenced account: no lost-update
        // window between reading the account set and mutating it
        let mut names = vec![format!("t:a:{}", txn.source_account_id)];
        if let Some(target) = txn.target_account_id {
            names.push(format!("t:a:{target}"));
        }
        let _guard = self
            .broker
            .acquire_all(&names, self.locks.execution_wait(), self.locks.execution_hold())
            .await?;

        self.do_execute(id).await
    }

    /// The locked execution body, in its own REPEATABLE READ unit of work.
    ///
    /// Only domain errors raised by the dispatch below may mark the
    /// transaction FAILED; load failures and infrastructure errors leave its
    /// status untouched.
    async fn do_execute(&self, id: TransactionId) -> Result<(), CoreError> {
        let mut uow = self.store.begin(Isolation::RepeatableRead).await?;
        let mut txn = uow.find_transaction(id).await?.ok_or(DomainError::TransactionNotFound)?;

        if txn.status.is_terminal() {
            // redelivered request for an already settled transaction;
            // nothing to do and nothing to emit
            debug!(transaction_id = %id, status = %txn.status, "transaction already settled");
            uow.rollback().await?;
            return Ok(());
        }

        let mut source = uow
            .find_account(txn.source_account_id)
            .await?
            .ok_or(DomainError::AccountNotFound)?;
        let mut target = match txn.target_account_id {
            Some(target_id) => {
                Some(uow.find_account(target_id).await?.ok_or(DomainError::AccountNotFound)?)
            }
            None => None,
        };

        match txn.execute(&mut source, target.as_mut()) {
            Ok(()) => {
                uow.save_account(&source).await?;
                if let Some(target) = &target {
                    uow.save_account(target).await?;
                }
                uow.save_transaction(&txn).await?;
                info!(transaction_id = %id, "transaction completed");
                self.defers.publish_on_commit(
                    uow.as_mut(),
                    TransactionEvent::Completed { transaction: txn.clone() },
                );
            }
            Err(e) => {
                // domain rejection: terminal, the mutated accounts are NOT saved
                error!(transaction_id = %id, error = %e, "transaction failed");
                let reason = e.to_string();
                txn.fail(reason.clone())?;
                uow.save_transaction(&txn).await?;
                self.defers.publish_on_commit(
                    uow.as_mut(),
                    TransactionEvent::Failed { transaction: txn.clone(), reason },
                );
            }
        }

        uow.commit().await?;
        Ok(())
    }
}
