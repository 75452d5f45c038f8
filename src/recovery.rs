//! Stuck-Transaction Recovery
//!
//! Safety net against lost or indefinitely delayed execution requests: a
//! periodic sweep, serialized cluster-wide by a leader lock, selects old
//! PENDING transactions and re-submits them through the normal execution
//! path.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::{LockConfig, RecoveryConfig};
use crate::domain::error::CoreError;
use crate::domain::transaction::TransactionStatus;
use crate::lock::{LockBroker, LockError};
use crate::service::TransactionService;
use crate::store::{Isolation, Store};

const LEADER_LOCK: &str = "transaction:recovery";

pub struct RecoveryScheduler {
    store: Arc<dyn Store>,
    broker: Arc<dyn LockBroker>,
    service: Arc<TransactionService>,
    config: RecoveryConfig,
    locks: LockConfig,
}

impl RecoveryScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        broker: Arc<dyn LockBroker>,
        service: Arc<TransactionService>,
        config: RecoveryConfig,
        locks: LockConfig,
    ) -> Self {
        Self { store, broker, service, config, locks }
    }

    /// Run the sweep loop; never returns under normal operation
    pub async fn run(&self) {
        info!(
            scan_interval_secs = self.config.scan_interval_secs,
            stale_after_secs = self.config.stale_after_secs,
            batch_size = self.config.batch_size,
            "starting recovery scheduler"
        );

        loop {
            match self.sweep().await {
                Ok(0) => {}
                Ok(recovered) => info!(count = recovered, "recovered stuck transactions"),
                Err(CoreError::Lock(LockError::WaitTimeout { .. })) => {
                    // another node holds the leader lock this cycle
                    debug!("recovery leader lock busy, skipping sweep");
                }
                Err(e) => error!(error = %e, "recovery sweep failed"),
            }
            tokio::time::sleep(self.config.scan_interval()).await;
        }
    }

    /// One sweep cycle; returns how many transactions were re-submitted
    pub async fn sweep(&self) -> Result<usize, CoreError> {
        let _leader = self
            .broker
            .acquire(LEADER_LOCK, self.locks.recovery_wait(), self.locks.recovery_hold())
            .await?;

        let cutoff =
            chrono::Utc::now() - chrono::Duration::seconds(self.config.stale_after_secs as i64);
        let stuck = {
            let mut uow = self.store.begin(Isolation::ReadCommitted).await?;
            uow.find_stuck_transactions(TransactionStatus::Pending, cutoff, self.config.batch_size)
                .await?
        };

        if stuck.is_empty() {
            debug!("no stuck transactions found");
            return Ok(0);
        }
        info!(count = stuck.len(), "re-submitting stuck transactions");

        let mut submitted = 0;
        for id in stuck {
            match self.service.execute_transaction(id).await {
                Ok(()) => submitted += 1,
                Err(e) => {
                    error!(transaction_id = %id, error = %e, "failed to recover transaction");
                }
            }
        }
        Ok(submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defer::Defers;
    use crate::domain::event::EventBus;
    use crate::lock::LocalLockBroker;
    use crate::service::{AccountService, RetryPolicy};
    use crate::store::MemoryStore;
    use std::time::Duration;

    struct Fixture {
        store: Arc<dyn Store>,
        broker: Arc<dyn LockBroker>,
        accounts: Arc<AccountService>,
        transactions: Arc<TransactionService>,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let broker: Arc<dyn LockBroker> = Arc::new(LocalLockBroker::new());
        let defers = Defers::new(EventBus::new(64));
        let accounts = Arc::new(AccountService::new(
            Arc::clone(&store),
            Arc::clone(&broker),
            LockConfig::default(),
            RetryPolicy::default(),
        ));
        let transactions = Arc::new(TransactionService::new(
            Arc::clone(&store),
            Arc::clone(&broker),
            Arc::clone(&accounts),
            defers,
            LockConfig::default(),
            RetryPolicy::default(),
        ));
        Fixture { store, broker, accounts, transactions }
    }

    fn scheduler(f: &Fixture, config: RecoveryConfig) -> RecoveryScheduler {
        RecoveryScheduler::new(
            Arc::clone(&f.store),
            Arc::clone(&f.broker),
            Arc::clone(&f.transactions),
            config,
            LockConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_sweep_executes_stale_pending_transactions() {
        let f = fixture();
        let account = f.accounts.create_account("6225-0001").await.unwrap();
        f.accounts.activate_account(account.id).await.unwrap();

        // created but never executed: the "lost message" case
        let txn = f.transactions.create_deposit_transaction("6225-0001", 500).await.unwrap();

        let sweeper = scheduler(&f, RecoveryConfig { stale_after_secs: 0, ..Default::default() });
        let recovered = sweeper.sweep().await.unwrap();
        assert_eq!(recovered, 1);

        let settled = f.transactions.get_transaction(txn.id).await.unwrap();
        assert_eq!(settled.status, TransactionStatus::Completed);
        assert_eq!(f.accounts.get_account(account.id).await.unwrap().balance, 500);

        // settled transactions are no longer swept
        assert_eq!(sweeper.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fresh_pending_transactions_are_not_swept() {
        let f = fixture();
        let account = f.accounts.create_account("6225-0001").await.unwrap();
        f.accounts.activate_account(account.id).await.unwrap();
        f.transactions.create_deposit_transaction("6225-0001", 500).await.unwrap();

        // default one-hour cutoff leaves a fresh transaction alone
        let sweeper = scheduler(&f, RecoveryConfig::default());
        assert_eq!(sweeper.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_skips_when_leader_lock_is_held() {
        let f = fixture();
        let sweeper = scheduler(&f, RecoveryConfig { stale_after_secs: 0, ..Default::default() });

        let _leader = f
            .broker
            .acquire(LEADER_LOCK, Duration::from_secs(1), Duration::from_secs(600))
            .await
            .unwrap();

        let err = sweeper.sweep().await.unwrap_err();
        assert!(matches!(err, CoreError::Lock(LockError::WaitTimeout { .. })));
    }
}
