//! Domain Services
//!
//! Orchestration over the aggregates: locking, units of work, deferred
//! notifications and bounded retry.

pub mod account;
pub mod retry;
pub mod transaction;

pub use account::AccountService;
pub use retry::{RetryPolicy, with_retry};
pub use transaction::TransactionService;
