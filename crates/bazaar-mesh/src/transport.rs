//! # Broker Transport Port
//!
//! The seam between the durable event channel and the broker that backs
//! it.
//!
//! ## Port / Adapter Split
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Transport Port                                     │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 DurableEventChannel (channel.rs)                │   │
//! │  │   owns subscriptions, envelopes, reconnect policy, ack rules    │   │
//! │  └────────────────────────────┬────────────────────────────────────┘   │
//! │                               │ BrokerTransport                         │
//! │              ┌────────────────┴────────────────┐                       │
//! │              ▼                                 ▼                        │
//! │  ┌────────────────────────┐     ┌────────────────────────────┐         │
//! │  │ NatsTransport (nats.rs)│     │ MemoryTransport (memory.rs)│         │
//! │  │ JetStream durable      │     │ In-process durable queues  │         │
//! │  │ streams + consumers    │     │ for tests & offline dev    │         │
//! │  └────────────────────────┘     └────────────────────────────┘         │
//! │                                                                         │
//! │  Both adapters honor the same contract: durable queues, per-queue      │
//! │  FIFO, explicit ack, redelivery on nack.                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::error::MeshResult;

// =============================================================================
// Transport Events
// =============================================================================

/// Connection lifecycle notifications emitted by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// The underlying connection was (re-)established.
    Connected,
    /// The underlying connection was lost unexpectedly. The channel's
    /// reconnect loop reacts to this; a graceful `close()` does not emit it.
    Disconnected,
}

// =============================================================================
// Delivery
// =============================================================================

/// Acknowledges or requeues one delivered message.
#[async_trait]
pub trait Acknowledger: Send {
    /// Confirms processing; the broker removes the message from the queue.
    async fn ack(self: Box<Self>) -> MeshResult<()>;

    /// Rejects processing; the broker requeues the message for redelivery.
    async fn nack(self: Box<Self>) -> MeshResult<()>;
}

/// One message pulled from a durable queue, with its pending
/// acknowledgment.
///
/// Dropping a delivery without acking leaves the message on the queue -
/// a crash between handler execution and acknowledgment causes redelivery,
/// which is exactly the at-least-once contract.
pub struct Delivery {
    payload: Vec<u8>,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    /// Wraps raw payload bytes and their acknowledger.
    pub fn new(payload: Vec<u8>, acker: Box<dyn Acknowledger>) -> Self {
        Delivery { payload, acker }
    }

    /// The message bytes as published.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Acknowledges the message.
    pub async fn ack(self) -> MeshResult<()> {
        self.acker.ack().await
    }

    /// Negatively acknowledges the message, requeuing it.
    pub async fn nack(self) -> MeshResult<()> {
        self.acker.nack().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

// =============================================================================
// Transport Port
// =============================================================================

/// A broker connection capable of persistent topic publishing and durable
/// queue consumption.
///
/// Adapters own the physical connection; the channel owns every policy
/// decision (reconnects, envelopes, ack rules).
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Establishes (or verifies) the connection. Idempotent: calling while
    /// connected is a no-op.
    async fn connect(&self) -> MeshResult<()>;

    /// Publishes `payload` to `topic` with the broker's durability flag,
    /// returning once the broker has accepted the message.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> MeshResult<()>;

    /// Idempotently declares the durable queue `queue` bound to `topic`
    /// and starts consuming it. Messages arrive on the returned receiver;
    /// dropping the receiver detaches the consumer without deleting the
    /// queue or its backlog.
    async fn bind_queue(&self, queue: &str, topic: &str) -> MeshResult<mpsc::Receiver<Delivery>>;

    /// Gracefully closes the connection. Durable queues and their backlogs
    /// survive; does not emit [`TransportEvent::Disconnected`].
    async fn close(&self) -> MeshResult<()>;

    /// Subscribes to connection lifecycle events.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}
