//! Domain Events
//!
//! Notifications emitted once the unit of work that produced the state
//! change has durably committed. "Created" carries only the id (consumers
//! re-read the transaction they were notified about); completed/failed carry
//! a full snapshot.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::transaction::{Transaction, TransactionId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransactionEvent {
    /// A transaction was durably created in PENDING
    Created { transaction_id: TransactionId },
    /// Execution finished in COMPLETED
    Completed { transaction: Transaction },
    /// Execution finished in FAILED
    Failed { transaction: Transaction, reason: String },
}

impl TransactionEvent {
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            TransactionEvent::Created { transaction_id } => *transaction_id,
            TransactionEvent::Completed { transaction } => transaction.id,
            TransactionEvent::Failed { transaction, .. } => transaction.id,
        }
    }
}

/// In-process notification stream.
///
/// Fan-out to every subscriber; publishing never blocks. A subscriber that
/// falls behind sees a lag error, not lost publisher progress.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TransactionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to all current subscribers. Having none is not an error.
    pub fn publish(&self, event: TransactionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransactionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::AccountId;
    use crate::domain::transaction::TransactionKind;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(TransactionEvent::Created { transaction_id: TransactionId(7) });

        assert_eq!(rx1.recv().await.unwrap().transaction_id(), TransactionId(7));
        assert_eq!(rx2.recv().await.unwrap().transaction_id(), TransactionId(7));
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        bus.publish(TransactionEvent::Created { transaction_id: TransactionId(1) });
    }

    #[test]
    fn test_event_payload_serialization() {
        let txn = Transaction::new(AccountId(1), None, TransactionKind::Deposit, 500);
        let event = TransactionEvent::Failed { transaction: txn, reason: "Insufficient balance".into() };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"failed""#));
        assert!(json.contains(r#""kind":"DEPOSIT""#));
        assert!(json.contains("Insufficient balance"));
    }
}
