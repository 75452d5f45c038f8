//! Account Service
//!
//! Status mutations run under a single-account named lock so concurrent
//! toggles cannot lose updates. This lock is deliberately not the combined
//! execution lock: no balance movement happens in here, and an execution
//! that slipped in just before a freeze is bounded by REPEATABLE READ
//! isolation to at most one in-flight transaction.

use std::sync::Arc;

use tracing::info;

use crate::config::LockConfig;
use crate::domain::account::{Account, AccountId};
use crate::domain::error::{CoreError, DomainError};
use crate::lock::LockBroker;
use crate::service::retry::{RetryPolicy, with_retry};
use crate::store::{Isolation, Store};

pub struct AccountService {
    store: Arc<dyn Store>,
    broker: Arc<dyn LockBroker>,
    locks: LockConfig,
    retry: RetryPolicy,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<dyn LockBroker>,
        locks: LockConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self { store, broker, locks, retry }
    }

    pub async fn create_account(&self, account_number: &str) -> Result<Account, CoreError> {
        let mut uow = self.store.begin(Isolation::ReadCommitted).await?;
        let account = uow.insert_account(Account::new(account_number)).await?;
        uow.commit().await?;
        info!(account_id = %account.id, account_number, "account created");
        Ok(account)
    }

    pub async fn activate_account(&self, id: AccountId) -> Result<(), CoreError> {
        self.update_with_lock(id, "activate account", |account| account.activate()).await
    }

    pub async fn freeze_account(&self, id: AccountId) -> Result<(), CoreError> {
        self.update_with_lock(id, "freeze account", |account| account.freeze()).await
    }

    pub async fn unfreeze_account(&self, id: AccountId) -> Result<(), CoreError> {
        self.update_with_lock(id, "unfreeze account", |account| account.defreeze()).await
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Account, CoreError> {
        let mut uow = self.store.begin(Isolation::ReadCommitted).await?;
        let account = uow.find_account(id).await?.ok_or(DomainError::AccountNotFound)?;
        Ok(account)
    }

    /// Load an account by number and require it to be ACTIVATED
    pub async fn get_valid_account(&self, account_number: &str) -> Result<Account, CoreError> {
        let mut uow = self.store.begin(Isolation::ReadCommitted).await?;
        let account = uow
            .find_account_by_number(account_number)
            .await?
            .ok_or(DomainError::AccountNotFound)?;
        account.assert_active()?;
        Ok(account)
    }

    pub async fn get_valid_accounts(
        &self,
        account_numbers: &[&str],
    ) -> Result<Vec<Account>, CoreError> {
        let mut uow = self.store.begin(Isolation::ReadCommitted).await?;
        let mut accounts = Vec::with_capacity(account_numbers.len());
        for number in account_numbers {
            let account = uow
                .find_account_by_number(number)
                .await?
                .ok_or(DomainError::AccountNotFound)?;
            account.assert_active()?;
            accounts.push(account);
        }
        Ok(accounts)
    }

    /// Acquire the account's status lock, then run `op` in a fresh unit of
    /// work. Unexpected failures are retried; domain errors are not.
    async fn update_with_lock<F>(&self, id: AccountId, label: &str, op: F) -> Result<(), CoreError>
    where
        F: Fn(&mut Account) -> Result<(), DomainError>,
    {
        with_retry(label, &self.retry, || async {
            let name = format!("account:{id}");
            let _guard = self
                .broker
                .acquire(&name, self.locks.account_wait(), self.locks.account_hold())
                .await?;

            let mut uow = self.store.begin(Isolation::RepeatableRead).await?;
            let mut account = uow.find_account(id).await?.ok_or(DomainError::AccountNotFound)?;
            op(&mut account)?;
            uow.save_account(&account).await?;
            uow.commit().await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::AccountStatus;
    use crate::lock::LocalLockBroker;
    use crate::store::MemoryStore;

    fn service() -> Arc<AccountService> {
        Arc::new(AccountService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(LocalLockBroker::new()),
            LockConfig::default(),
            RetryPolicy::default(),
        ))
    }

    #[tokio::test]
    async fn test_account_lifecycle() {
        let service = service();
        let account = service.create_account("6225-0001").await.unwrap();
        assert_eq!(account.status, AccountStatus::Initial);

        service.activate_account(account.id).await.unwrap();
        assert_eq!(service.get_account(account.id).await.unwrap().status, AccountStatus::Activated);

        service.freeze_account(account.id).await.unwrap();
        assert_eq!(service.get_account(account.id).await.unwrap().status, AccountStatus::Frozen);

        service.unfreeze_account(account.id).await.unwrap();
        assert_eq!(service.get_account(account.id).await.unwrap().status, AccountStatus::Activated);
    }

    #[tokio::test]
    async fn test_missing_account() {
        let service = service();
        let err = service.activate_account(AccountId(404)).await.unwrap_err();
        assert_eq!(err.domain(), Some(&DomainError::AccountNotFound));
        let err = service.get_account(AccountId(404)).await.unwrap_err();
        assert_eq!(err.domain(), Some(&DomainError::AccountNotFound));
    }

    #[tokio::test]
    async fn test_get_valid_account_requires_activated() {
        let service = service();
        let account = service.create_account("6225-0001").await.unwrap();

        let err = service.get_valid_account("6225-0001").await.unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::AccountStatusInvalid(_))));

        service.activate_account(account.id).await.unwrap();
        let valid = service.get_valid_account("6225-0001").await.unwrap();
        assert_eq!(valid.id, account.id);

        let err = service.get_valid_accounts(&["6225-0001", "nope"]).await.unwrap_err();
        assert_eq!(err.domain(), Some(&DomainError::AccountNotFound));
    }

    #[tokio::test]
    async fn test_concurrent_activations_single_winner() {
        let service = service();
        let account = service.create_account("6225-0001").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..99 {
            let service = Arc::clone(&service);
            let id = account.id;
            handles.push(tokio::spawn(async move { service.activate_account(id).await }));
        }

        let mut activated = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => activated += 1,
                Err(e) => {
                    assert!(
                        matches!(e.domain(), Some(DomainError::AccountStatusInvalid(_))),
                        "unexpected error: {e}"
                    );
                    rejected += 1;
                }
            }
        }
        assert_eq!(activated, 1, "exactly one activation must win");
        assert_eq!(rejected, 98);

        // a freeze after the winning activation sticks
        service.freeze_account(account.id).await.unwrap();
        assert_eq!(service.get_account(account.id).await.unwrap().status, AccountStatus::Frozen);
    }
}
