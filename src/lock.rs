//! Named Locks
//!
//! The core serializes account mutations through an external
//! mutual-exclusion broker: named leases with a bounded wait and a bounded
//! hold, plus a combined variant covering several names at once.
//!
//! [`LocalLockBroker`] is the in-process implementation. Leases auto-expire
//! at the hold deadline, so a crashed holder cannot block others forever —
//! any broker with the same bounded-wait, auto-expiring semantics can stand
//! in behind the [`LockBroker`] trait.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock `{name}` wait timed out after {waited_ms}ms")]
    WaitTimeout { name: String, waited_ms: u64 },

    #[error("lock broker failure: {0}")]
    Broker(String),
}

/// A lease on a single name; releasing happens on drop.
pub trait Lease: Send {}

/// RAII handle over one or more held names.
///
/// Dropping the guard releases the names in reverse acquisition order.
pub struct LockGuard {
    leases: Vec<Box<dyn Lease>>,
}

impl LockGuard {
    pub fn new(leases: Vec<Box<dyn Lease>>) -> Self {
        Self { leases }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("leases", &self.leases.len()).finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        while let Some(lease) = self.leases.pop() {
            drop(lease);
        }
    }
}

/// Named mutual-exclusion broker with bounded wait and hold times.
#[async_trait]
pub trait LockBroker: Send + Sync {
    /// Acquire the named lock, waiting at most `wait`. The hold auto-expires
    /// after `hold` so a leaked or crashed holder cannot deadlock others.
    async fn acquire(
        &self,
        name: &str,
        wait: Duration,
        hold: Duration,
    ) -> Result<LockGuard, LockError>;

    /// Acquire all names as one combined lock.
    ///
    /// Names are taken in canonical (sorted, deduplicated) order, so
    /// concurrent combined acquisitions cannot deadlock regardless of the
    /// order callers list them in.
    async fn acquire_all(
        &self,
        names: &[String],
        wait: Duration,
        hold: Duration,
    ) -> Result<LockGuard, LockError>;
}

struct Held {
    token: u64,
    deadline: Instant,
}

struct BrokerShared {
    held: DashMap<String, Held>,
    released: Notify,
    next_token: AtomicU64,
}

/// In-process lease-based lock broker
pub struct LocalLockBroker {
    shared: Arc<BrokerShared>,
}

impl LocalLockBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(BrokerShared {
                held: DashMap::new(),
                released: Notify::new(),
                next_token: AtomicU64::new(1),
            }),
        }
    }

    async fn acquire_one(
        &self,
        name: &str,
        wait_deadline: Instant,
        hold: Duration,
    ) -> Result<LocalLease, LockError> {
        let started = Instant::now();
        loop {
            // Register for release wakeups before inspecting the table, so a
            // release between the check and the await cannot be missed.
            let notified = self.shared.released.notified();
            tokio::pin!(notified);

            let now = Instant::now();
            let token = self.shared.next_token.fetch_add(1, Ordering::Relaxed);
            let holder_deadline = match self.shared.held.entry(name.to_string()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(Held { token, deadline: now + hold });
                    None
                }
                Entry::Occupied(mut occupied) => {
                    if occupied.get().deadline <= now {
                        warn!(name, "taking over expired lock lease");
                        occupied.insert(Held { token, deadline: now + hold });
                        None
                    } else {
                        Some(occupied.get().deadline)
                    }
                }
            };

            let holder_deadline = match holder_deadline {
                None => {
                    debug!(name, "lock acquired");
                    return Ok(LocalLease {
                        name: name.to_string(),
                        token,
                        shared: Arc::clone(&self.shared),
                    });
                }
                Some(deadline) => deadline,
            };

            if now >= wait_deadline {
                return Err(LockError::WaitTimeout {
                    name: name.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }

            // Wake on release, on the holder's lease expiry, or give up at
            // the wait deadline; the loop re-checks either way.
            let sleep_until = wait_deadline.min(holder_deadline);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(sleep_until) => {}
            }
        }
    }
}

impl Default for LocalLockBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockBroker for LocalLockBroker {
    async fn acquire(
        &self,
        name: &str,
        wait: Duration,
        hold: Duration,
    ) -> Result<LockGuard, LockError> {
        let wait_deadline = Instant::now() + wait;
        let lease = self.acquire_one(name, wait_deadline, hold).await?;
        Ok(LockGuard::new(vec![Box::new(lease)]))
    }

    async fn acquire_all(
        &self,
        names: &[String],
        wait: Duration,
        hold: Duration,
    ) -> Result<LockGuard, LockError> {
        let mut ordered: Vec<&String> = names.iter().collect();
        ordered.sort();
        ordered.dedup();

        let wait_deadline = Instant::now() + wait;
        let mut leases: Vec<Box<dyn Lease>> = Vec::with_capacity(ordered.len());
        for name in ordered {
            // Already-held leases release automatically if this one times out
            let lease = self.acquire_one(name, wait_deadline, hold).await?;
            leases.push(Box::new(lease));
        }
        Ok(LockGuard::new(leases))
    }
}

struct LocalLease {
    name: String,
    token: u64,
    shared: Arc<BrokerShared>,
}

impl Lease for LocalLease {}

impl Drop for LocalLease {
    fn drop(&mut self) {
        // Only remove our own lease; an expired one may already belong to a
        // new holder.
        let removed = self
            .shared
            .held
            .remove_if(&self.name, |_, held| held.token == self.token);
        if removed.is_some() {
            self.shared.released.notify_waiters();
        } else {
            debug!(name = %self.name, "lease already expired at release");
        }
    }
}
