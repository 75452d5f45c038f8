//! In-Memory Store
//!
//! Sessions take snapshot reads and buffer writes; commit re-validates
//! optimistic versions against the shared tables under a single mutex, so a
//! concurrent writer that slipped past the lock broker fails the unit of
//! work instead of silently losing an update. Used by tests and
//! single-node runs; the PostgreSQL store is the durable counterpart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CommitHook, Isolation, Store, StoreError, UnitOfWork};
use crate::domain::account::{Account, AccountId};
use crate::domain::transaction::{Transaction, TransactionId, TransactionStatus};

#[derive(Default)]
struct Tables {
    accounts: HashMap<i64, Account>,
    // unique index: account number -> account id
    account_numbers: HashMap<String, i64>,
    transactions: HashMap<i64, Transaction>,
}

struct Inner {
    tables: Mutex<Tables>,
    account_seq: AtomicI64,
    transaction_seq: AtomicI64,
}

pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(Tables::default()),
                account_seq: AtomicI64::new(0),
                transaction_seq: AtomicI64::new(0),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self, isolation: Isolation) -> Result<Box<dyn UnitOfWork>, StoreError> {
        Ok(Box::new(MemorySession {
            inner: Arc::clone(&self.inner),
            isolation,
            read_accounts: HashMap::new(),
            read_transactions: HashMap::new(),
            new_accounts: HashMap::new(),
            dirty_accounts: HashMap::new(),
            new_transactions: HashMap::new(),
            dirty_transactions: HashMap::new(),
            hooks: Vec::new(),
            finished: false,
        }))
    }
}

struct MemorySession {
    inner: Arc<Inner>,
    isolation: Isolation,
    // first-read snapshots, including misses (repeatable read)
    read_accounts: HashMap<i64, Option<Account>>,
    read_transactions: HashMap<i64, Option<Transaction>>,
    new_accounts: HashMap<i64, Account>,
    dirty_accounts: HashMap<i64, Account>,
    new_transactions: HashMap<i64, Transaction>,
    dirty_transactions: HashMap<i64, Transaction>,
    hooks: Vec<CommitHook>,
    finished: bool,
}

impl MemorySession {
    fn tables(&self) -> Result<std::sync::MutexGuard<'_, Tables>, StoreError> {
        self.inner
            .tables
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".into()))
    }

    fn assert_open(&self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::Finished);
        }
        Ok(())
    }

    /// Validate optimistic versions and apply buffered writes atomically
    fn apply(&mut self) -> Result<(), StoreError> {
        let inner = Arc::clone(&self.inner);
        let mut tables = inner
            .tables
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".into()))?;

        for (id, account) in &self.dirty_accounts {
            match tables.accounts.get(id) {
                Some(stored) if stored.version == account.version => {}
                Some(_) => {
                    return Err(StoreError::VersionConflict { entity: "account", id: *id });
                }
                None => {
                    return Err(StoreError::Backend(format!("account {id} vanished")));
                }
            }
        }
        for (id, txn) in &self.dirty_transactions {
            match tables.transactions.get(id) {
                Some(stored) if stored.version == txn.version => {}
                Some(_) => {
                    return Err(StoreError::VersionConflict { entity: "transaction", id: *id });
                }
                None => {
                    return Err(StoreError::Backend(format!("transaction {id} vanished")));
                }
            }
        }
        for account in self.new_accounts.values() {
            if tables.account_numbers.contains_key(&account.account_number) {
                return Err(StoreError::DuplicateAccountNumber(account.account_number.clone()));
            }
        }

        let now = Utc::now();
        for (id, account) in self.new_accounts.drain() {
            tables.account_numbers.insert(account.account_number.clone(), id);
            tables.accounts.insert(id, account);
        }
        for (id, mut account) in self.dirty_accounts.drain() {
            account.version += 1;
            account.updated_at = now;
            tables.accounts.insert(id, account);
        }
        for (id, txn) in self.new_transactions.drain() {
            tables.transactions.insert(id, txn);
        }
        for (id, mut txn) in self.dirty_transactions.drain() {
            txn.version += 1;
            txn.updated_at = now;
            tables.transactions.insert(id, txn);
        }
        Ok(())
    }
}

#[async_trait]
impl UnitOfWork for MemorySession {
    async fn insert_account(&mut self, mut account: Account) -> Result<Account, StoreError> {
        self.assert_open()?;
        {
            let tables = self.tables()?;
            let taken = tables.account_numbers.contains_key(&account.account_number)
                || self
                    .new_accounts
                    .values()
                    .any(|a| a.account_number == account.account_number);
            if taken {
                return Err(StoreError::DuplicateAccountNumber(account.account_number));
            }
        }

        let id = self.inner.account_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        account.id = AccountId(id);
        account.version = 0;
        account.created_at = now;
        account.updated_at = now;
        self.new_accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn find_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.assert_open()?;
        if let Some(account) = self.dirty_accounts.get(&id.0) {
            return Ok(Some(account.clone()));
        }
        if let Some(account) = self.new_accounts.get(&id.0) {
            return Ok(Some(account.clone()));
        }
        if self.isolation == Isolation::RepeatableRead {
            if let Some(cached) = self.read_accounts.get(&id.0) {
                return Ok(cached.clone());
            }
        }
        let found = self.tables()?.accounts.get(&id.0).cloned();
        if self.isolation == Isolation::RepeatableRead {
            self.read_accounts.insert(id.0, found.clone());
        }
        Ok(found)
    }

    async fn find_account_by_number(
        &mut self,
        number: &str,
    ) -> Result<Option<Account>, StoreError> {
        self.assert_open()?;
        if let Some(account) = self.new_accounts.values().find(|a| a.account_number == number) {
            return Ok(Some(account.clone()));
        }
        let id = { self.tables()?.account_numbers.get(number).copied() };
        match id {
            Some(id) => self.find_account(AccountId(id)).await,
            None => Ok(None),
        }
    }

    async fn save_account(&mut self, account: &Account) -> Result<(), StoreError> {
        self.assert_open()?;
        if let Some(inserted) = self.new_accounts.get_mut(&account.id.0) {
            *inserted = account.clone();
        } else {
            self.dirty_accounts.insert(account.id.0, account.clone());
        }
        Ok(())
    }

    async fn insert_transaction(&mut self, mut txn: Transaction) -> Result<Transaction, StoreError> {
        self.assert_open()?;
        let id = self.inner.transaction_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        txn.id = TransactionId(id);
        txn.version = 0;
        txn.created_at = now;
        txn.updated_at = now;
        self.new_transactions.insert(id, txn.clone());
        Ok(txn)
    }

    async fn find_transaction(
        &mut self,
        id: TransactionId,
    ) -> Result<Option<Transaction>, StoreError> {
        self.assert_open()?;
        if let Some(txn) = self.dirty_transactions.get(&id.0) {
            return Ok(Some(txn.clone()));
        }
        if let Some(txn) = self.new_transactions.get(&id.0) {
            return Ok(Some(txn.clone()));
        }
        if self.isolation == Isolation::RepeatableRead {
            if let Some(cached) = self.read_transactions.get(&id.0) {
                return Ok(cached.clone());
            }
        }
        let found = self.tables()?.transactions.get(&id.0).cloned();
        if self.isolation == Isolation::RepeatableRead {
            self.read_transactions.insert(id.0, found.clone());
        }
        Ok(found)
    }

    async fn save_transaction(&mut self, txn: &Transaction) -> Result<(), StoreError> {
        self.assert_open()?;
        if let Some(inserted) = self.new_transactions.get_mut(&txn.id.0) {
            *inserted = txn.clone();
        } else {
            self.dirty_transactions.insert(txn.id.0, txn.clone());
        }
        Ok(())
    }

    async fn find_stuck_transactions(
        &mut self,
        status: TransactionStatus,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TransactionId>, StoreError> {
        self.assert_open()?;
        let mut stuck: Vec<(DateTime<Utc>, TransactionId)> = self
            .tables()?
            .transactions
            .values()
            .filter(|t| t.status == status && t.created_at <= cutoff)
            .map(|t| (t.created_at, t.id))
            .collect();
        stuck.sort();
        stuck.truncate(limit.max(0) as usize);
        Ok(stuck.into_iter().map(|(_, id)| id).collect())
    }

    fn on_commit(&mut self, hook: CommitHook) {
        self.hooks.push(hook);
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.assert_open()?;
        self.finished = true;
        let hooks = std::mem::take(&mut self.hooks);
        self.apply()?;
        for hook in hooks {
            hook();
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.finished = true;
        self.hooks.clear();
        self.new_accounts.clear();
        self.dirty_accounts.clear();
        self.new_transactions.clear();
        self.dirty_transactions.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::TransactionKind;
    use std::sync::atomic::AtomicUsize;

    async fn committed_account(store: &MemoryStore, number: &str) -> Account {
        let mut uow = store.begin(Isolation::ReadCommitted).await.unwrap();
        let account = uow.insert_account(Account::new(number)).await.unwrap();
        uow.commit().await.unwrap();
        account
    }

    #[tokio::test]
    async fn test_insert_and_find_account() {
        let store = MemoryStore::new();
        let account = committed_account(&store, "6225-0001").await;
        assert!(account.id.0 > 0);

        let mut uow = store.begin(Isolation::ReadCommitted).await.unwrap();
        let by_id = uow.find_account(account.id).await.unwrap().unwrap();
        assert_eq!(by_id.account_number, "6225-0001");
        let by_number = uow.find_account_by_number("6225-0001").await.unwrap().unwrap();
        assert_eq!(by_number.id, account.id);
        assert!(uow.find_account_by_number("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryStore::new();
        let mut uow = store.begin(Isolation::ReadCommitted).await.unwrap();
        let account = uow.insert_account(Account::new("6225-0001")).await.unwrap();

        let mut other = store.begin(Isolation::ReadCommitted).await.unwrap();
        assert!(other.find_account(account.id).await.unwrap().is_none());

        uow.commit().await.unwrap();
        assert!(other.find_account(account.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_duplicate_account_number_rejected() {
        let store = MemoryStore::new();
        committed_account(&store, "6225-0001").await;

        let mut uow = store.begin(Isolation::ReadCommitted).await.unwrap();
        let err = uow.insert_account(Account::new("6225-0001")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateAccountNumber(_)));
    }

    #[tokio::test]
    async fn test_duplicate_account_number_race_fails_at_commit() {
        let store = MemoryStore::new();
        let mut first = store.begin(Isolation::ReadCommitted).await.unwrap();
        let mut second = store.begin(Isolation::ReadCommitted).await.unwrap();
        first.insert_account(Account::new("6225-0001")).await.unwrap();
        second.insert_account(Account::new("6225-0001")).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateAccountNumber(_)));
    }

    #[tokio::test]
    async fn test_version_conflict_on_concurrent_save() {
        let store = MemoryStore::new();
        let account = committed_account(&store, "6225-0001").await;

        let mut first = store.begin(Isolation::RepeatableRead).await.unwrap();
        let mut second = store.begin(Isolation::RepeatableRead).await.unwrap();
        let mut a1 = first.find_account(account.id).await.unwrap().unwrap();
        let mut a2 = second.find_account(account.id).await.unwrap().unwrap();

        a1.status = crate::domain::account::AccountStatus::Activated;
        first.save_account(&a1).await.unwrap();
        first.commit().await.unwrap();

        a2.status = crate::domain::account::AccountStatus::Activated;
        second.save_account(&a2).await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { entity: "account", .. }));
    }

    #[tokio::test]
    async fn test_repeatable_read_snapshot() {
        let store = MemoryStore::new();
        let account = committed_account(&store, "6225-0001").await;

        let mut reader = store.begin(Isolation::RepeatableRead).await.unwrap();
        let before = reader.find_account(account.id).await.unwrap().unwrap();

        let mut writer = store.begin(Isolation::RepeatableRead).await.unwrap();
        let mut fresh = writer.find_account(account.id).await.unwrap().unwrap();
        fresh.status = crate::domain::account::AccountStatus::Activated;
        writer.save_account(&fresh).await.unwrap();
        writer.commit().await.unwrap();

        // same session re-read sees the snapshot, not the concurrent commit
        let again = reader.find_account(account.id).await.unwrap().unwrap();
        assert_eq!(again, before);
    }

    #[tokio::test]
    async fn test_commit_hooks_run_after_commit_only() {
        let store = MemoryStore::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut uow = store.begin(Isolation::ReadCommitted).await.unwrap();
        uow.insert_account(Account::new("6225-0001")).await.unwrap();
        let hook_calls = Arc::clone(&calls);
        uow.on_commit(Box::new(move || {
            hook_calls.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        uow.commit().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut rolled_back = store.begin(Isolation::ReadCommitted).await.unwrap();
        let hook_calls = Arc::clone(&calls);
        rolled_back.on_commit(Box::new(move || {
            hook_calls.fetch_add(1, Ordering::SeqCst);
        }));
        rolled_back.rollback().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        let mut uow = store.begin(Isolation::ReadCommitted).await.unwrap();
        let account = uow.insert_account(Account::new("6225-0001")).await.unwrap();
        uow.rollback().await.unwrap();

        let mut check = store.begin(Isolation::ReadCommitted).await.unwrap();
        assert!(check.find_account(account.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_stuck_transactions() {
        let store = MemoryStore::new();
        let account = committed_account(&store, "6225-0001").await;

        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut uow = store.begin(Isolation::ReadCommitted).await.unwrap();
            let txn = uow
                .insert_transaction(Transaction::new(account.id, None, TransactionKind::Deposit, 100))
                .await
                .unwrap();
            uow.commit().await.unwrap();
            ids.push(txn.id);
        }

        // backdate the first two past the cutoff
        let cutoff = Utc::now() - chrono::Duration::hours(1);
        for (offset, id) in ids.iter().take(2).enumerate() {
            let mut uow = store.begin(Isolation::ReadCommitted).await.unwrap();
            let mut txn = uow.find_transaction(*id).await.unwrap().unwrap();
            txn.created_at = cutoff - chrono::Duration::minutes(10 - offset as i64);
            uow.save_transaction(&txn).await.unwrap();
            uow.commit().await.unwrap();
        }

        let mut uow = store.begin(Isolation::ReadCommitted).await.unwrap();
        let stuck = uow
            .find_stuck_transactions(TransactionStatus::Pending, cutoff, 1000)
            .await
            .unwrap();
        assert_eq!(stuck, vec![ids[0], ids[1]]);

        let bounded = uow
            .find_stuck_transactions(TransactionStatus::Pending, cutoff, 1)
            .await
            .unwrap();
        assert_eq!(bounded, vec![ids[0]]);
    }
}
