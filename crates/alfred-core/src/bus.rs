//! The shared ingestion bus — one bounded multi-producer/single-consumer
//! queue carrying normalized messages from every per-user client into the
//! processor.
//!
//! Publishing blocks when the queue is full. Dropping a message is
//! forbidden: downstream correctness rests on at-least-once delivery.

use tokio::sync::mpsc;

use crate::error::CoreError;
use crate::types::IngestedMessage;

/// Multi-producer handle. Cheap to clone; one per ingestion client.
#[derive(Clone)]
pub struct BusPublisher {
    tx: mpsc::Sender<IngestedMessage>,
}

impl BusPublisher {
    /// Publish a message, waiting for capacity when the bus is full.
    pub async fn publish(&self, msg: IngestedMessage) -> Result<(), CoreError> {
        self.tx.send(msg).await.map_err(|_| CoreError::BusClosed)
    }
}

/// The bus itself. The single receiver is taken exactly once by the
/// processor at startup; publishers are handed out freely.
pub struct MessageBus {
    tx: mpsc::Sender<IngestedMessage>,
    rx: Option<mpsc::Receiver<IngestedMessage>>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self { tx, rx: Some(rx) }
    }

    pub fn publisher(&self) -> BusPublisher {
        BusPublisher {
            tx: self.tx.clone(),
        }
    }

    /// Hand over the consumer side. Panics if called twice — there is
    /// exactly one processor per process.
    pub fn take_receiver(&mut self) -> mpsc::Receiver<IngestedMessage> {
        self.rx
            .take()
            .expect("bus receiver already taken — only one processor may consume")
    }
}
