//! Commit-Deferred Side Effects
//!
//! Notifications must never let a consumer observe a transaction id whose
//! creation later rolled back. Callbacks are therefore registered against
//! the active unit of work and run exactly once, strictly after it durably
//! commits — and never when it rolls back.

use tracing::debug;

use crate::domain::event::{EventBus, TransactionEvent};
use crate::store::UnitOfWork;

/// Registry facade for commit-deferred work
#[derive(Clone)]
pub struct Defers {
    bus: EventBus,
}

impl Defers {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    /// Run `f` once the unit of work commits
    pub fn defer_on_commit(&self, uow: &mut dyn UnitOfWork, f: impl FnOnce() + Send + 'static) {
        uow.on_commit(Box::new(f));
    }

    /// Publish `event` once the unit of work commits; dropped on rollback
    pub fn publish_on_commit(&self, uow: &mut dyn UnitOfWork, event: TransactionEvent) {
        let bus = self.bus.clone();
        uow.on_commit(Box::new(move || {
            debug!(transaction_id = %event.transaction_id(), "publishing deferred event");
            bus.publish(event);
        }));
    }
}
