//! Async Execution Bridge
//!
//! Decouples transaction creation from execution: committed "created"
//! notifications are forwarded onto an at-least-once queue carrying
//! `{transaction_id, trace_id}`, and a consumer feeds them back into
//! [`TransactionService::execute_transaction`]. The consumer is idempotent,
//! so duplicate deliveries are harmless.
//!
//! [`InProcessQueue`] is the single-node implementation with bounded
//! redelivery; any at-least-once broker can stand behind [`ExecutionQueue`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::domain::event::{EventBus, TransactionEvent};
use crate::domain::transaction::TransactionId;
use crate::service::TransactionService;

/// Message carried on the execution queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub transaction_id: TransactionId,
    pub trace_id: String,
    #[serde(default = "first_delivery")]
    pub delivery: u32,
}

fn first_delivery() -> u32 {
    1
}

impl ExecutionRequest {
    pub fn new(transaction_id: TransactionId) -> Self {
        Self { transaction_id, trace_id: new_trace_id(), delivery: 1 }
    }
}

pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// At-least-once channel between creation and execution
#[async_trait]
pub trait ExecutionQueue: Send + Sync {
    fn send(&self, request: ExecutionRequest);
    async fn recv(&self) -> Option<ExecutionRequest>;
}

/// In-process execution queue
pub struct InProcessQueue {
    tx: mpsc::UnboundedSender<ExecutionRequest>,
    rx: Mutex<mpsc::UnboundedReceiver<ExecutionRequest>>,
}

impl InProcessQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Mutex::new(rx) }
    }
}

impl Default for InProcessQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionQueue for InProcessQueue {
    fn send(&self, request: ExecutionRequest) {
        let _ = self.tx.send(request);
    }

    async fn recv(&self) -> Option<ExecutionRequest> {
        self.rx.lock().await.recv().await
    }
}

/// Adapter between the notification stream and the execution queue
pub struct ExecutionBridge {
    bus: EventBus,
    queue: Arc<dyn ExecutionQueue>,
    service: Arc<TransactionService>,
    max_deliveries: u32,
}

impl ExecutionBridge {
    pub fn new(
        bus: EventBus,
        queue: Arc<dyn ExecutionQueue>,
        service: Arc<TransactionService>,
        max_deliveries: u32,
    ) -> Self {
        Self { bus, queue, service, max_deliveries }
    }

    /// Forward committed "created" notifications onto the queue
    pub async fn run_forwarder(&self) {
        let mut rx = self.bus.subscribe();
        loop {
            match rx.recv().await {
                Ok(TransactionEvent::Created { transaction_id }) => {
                    let request = ExecutionRequest::new(transaction_id);
                    debug!(
                        transaction_id = %transaction_id,
                        trace_id = %request.trace_id,
                        "forwarding execution request"
                    );
                    self.queue.send(request);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // the recovery sweep picks up anything lost here
                    warn!(skipped, "execution forwarder lagged behind the event stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Consume execution requests until the queue closes
    pub async fn run_consumer(self: Arc<Self>) {
        while let Some(request) = self.queue.recv().await {
            let bridge = Arc::clone(&self);
            tokio::spawn(async move { bridge.handle(request).await });
        }
    }

    async fn handle(&self, request: ExecutionRequest) {
        let span = info_span!(
            "execution",
            trace_id = %request.trace_id,
            transaction_id = %request.transaction_id,
        );
        async {
            info!("received transaction execution request");
            match self.service.execute_transaction(request.transaction_id).await {
                Ok(()) => {}
                Err(e) if e.is_domain() => {
                    // terminal; the transaction status already reflects it
                    error!(error = %e, "execution request rejected");
                }
                Err(e) => {
                    if request.delivery < self.max_deliveries {
                        warn!(error = %e, delivery = request.delivery, "redelivering execution request");
                        self.queue.send(ExecutionRequest {
                            delivery: request.delivery + 1,
                            ..request
                        });
                    } else {
                        // left PENDING; the recovery sweep will re-submit it
                        error!(error = %e, "execution request exhausted redeliveries");
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}
