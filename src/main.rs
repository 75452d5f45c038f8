//! bankcore daemon
//!
//! Wires the execution core together: store, lock broker, services, the
//! async execution bridge and the recovery scheduler. The HTTP/API surface
//! lives outside this binary and calls in through the service layer.

use std::sync::Arc;

use tracing::{info, warn};

use bankcore::bridge::{ExecutionBridge, InProcessQueue};
use bankcore::config::AppConfig;
use bankcore::defer::Defers;
use bankcore::domain::event::EventBus;
use bankcore::lock::{LocalLockBroker, LockBroker};
use bankcore::recovery::RecoveryScheduler;
use bankcore::service::{AccountService, TransactionService};
use bankcore::store::{MemoryStore, PgStore, Store};
use bankcore::logging;

#[tokio::main]
async fn main() {
    let env = std::env::args().nth(1).unwrap_or_else(|| "dev".to_string());
    let config = AppConfig::load(&env);
    let _log_guard = logging::init_logging(&config);

    info!(env, "starting bankcore");

    let store: Arc<dyn Store> = match &config.postgres_url {
        Some(url) => {
            let store = PgStore::connect(url).await.expect("failed to connect to PostgreSQL");
            store.ensure_schema().await.expect("failed to ensure schema");
            info!("using PostgreSQL store");
            Arc::new(store)
        }
        None => {
            warn!("no postgres_url configured, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let broker: Arc<dyn LockBroker> = Arc::new(LocalLockBroker::new());
    let bus = EventBus::new(4096);
    let defers = Defers::new(bus.clone());

    let accounts = Arc::new(AccountService::new(
        Arc::clone(&store),
        Arc::clone(&broker),
        config.locks.clone(),
        config.retry.policy(),
    ));
    let transactions = Arc::new(TransactionService::new(
        Arc::clone(&store),
        Arc::clone(&broker),
        Arc::clone(&accounts),
        defers,
        config.locks.clone(),
        config.retry.policy(),
    ));

    let queue = Arc::new(InProcessQueue::new());
    let bridge = Arc::new(ExecutionBridge::new(
        bus.clone(),
        queue,
        Arc::clone(&transactions),
        config.queue.max_deliveries,
    ));
    tokio::spawn({
        let bridge = Arc::clone(&bridge);
        async move { bridge.run_forwarder().await }
    });
    tokio::spawn({
        let bridge = Arc::clone(&bridge);
        async move { bridge.run_consumer().await }
    });

    let recovery = RecoveryScheduler::new(
        Arc::clone(&store),
        Arc::clone(&broker),
        Arc::clone(&transactions),
        config.recovery.clone(),
        config.locks.clone(),
    );
    tokio::spawn(async move { recovery.run().await });

    info!("bankcore ready");

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    info!("shutting down");
}
