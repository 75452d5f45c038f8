//! bankcore - Reliable Banking Core
//!
//! Transaction execution engine for monetary accounts: state machines with
//! strict balance invariants, per-account locking, idempotent execution
//! under at-least-once delivery, commit-deferred notifications and a
//! stuck-transaction recovery sweep.
//!
//! # Modules
//!
//! - [`domain`] - Account/Transaction aggregates, errors and events
//! - [`store`] - unit-of-work storage (in-memory and PostgreSQL)
//! - [`lock`] - named lock broker with bounded wait/hold times
//! - [`defer`] - commit-deferred side effects
//! - [`service`] - account and transaction services
//! - [`bridge`] - async execution bridge (at-least-once queue)
//! - [`recovery`] - periodic stuck-transaction sweep

pub mod bridge;
pub mod config;
pub mod defer;
pub mod domain;
pub mod lock;
pub mod logging;
pub mod recovery;
pub mod service;
pub mod store;

// Convenient re-exports at crate root
pub use bridge::{ExecutionBridge, ExecutionQueue, ExecutionRequest, InProcessQueue};
pub use config::AppConfig;
pub use defer::Defers;
pub use domain::account::{Account, AccountId, AccountStatus};
pub use domain::error::{CoreError, DomainError};
pub use domain::event::{EventBus, TransactionEvent};
pub use domain::transaction::{Transaction, TransactionId, TransactionKind, TransactionStatus};
pub use lock::{LocalLockBroker, LockBroker, LockError, LockGuard};
pub use recovery::RecoveryScheduler;
pub use service::{AccountService, RetryPolicy, TransactionService};
pub use store::{Isolation, MemoryStore, PgStore, Store, StoreError, UnitOfWork};
