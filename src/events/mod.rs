use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

/// Events emitted by the ledger after a committed write. Consumers get an
/// audit trail of accepted operations; delivery is best-effort and never
/// affects the outcome of the operation that produced the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    ItemCreated {
        item_id: i64,
        sku: String,
    },
    ItemUpdated {
        item_id: i64,
        version: i32,
    },
    ItemDeleted {
        item_id: i64,
    },
    StockReceived {
        item_id: i64,
        movement_id: i64,
        qty: i64,
        balance: i64,
    },
    StockIssued {
        item_id: i64,
        movement_id: i64,
        qty: i64,
        balance: i64,
    },
    StockAdjusted {
        item_id: i64,
        movement_id: i64,
        qty: i64,
        balance: i64,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender.
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Drains the event channel, logging each event. Spawn this once per
/// process next to the services that share the sender.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(event = ?event, "ledger event");
    }
}
