//! # In-Memory Transport
//!
//! In-process [`BrokerTransport`] adapter with the same durability
//! semantics as the JetStream adapter: queues and their backlogs survive
//! close/reopen, delivery is per-queue FIFO, and a nack (or a delivery
//! dropped without ack) redelivers the message.
//!
//! Used by the channel's integration tests and for offline development of
//! a single service without a broker. Fault-injection hooks
//! ([`MemoryTransport::fail_next_connects`],
//! [`MemoryTransport::force_disconnect`]) simulate broker outages so the
//! reconnect path is testable in-process.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tracing::debug;

use crate::error::{MeshError, MeshResult};
use crate::transport::{Acknowledger, BrokerTransport, Delivery, TransportEvent};

/// Buffered deliveries per consumer before backpressure.
const DELIVERY_BUFFER: usize = 64;

/// Pause before redelivering a nacked message, keeping a persistently
/// failing handler from busy-spinning the runtime.
const REDELIVERY_PAUSE: Duration = Duration::from_millis(5);

// =============================================================================
// Queue State
// =============================================================================

/// One durable queue: a FIFO backlog plus a wakeup for the pump task.
struct MemoryQueue {
    topic: String,
    backlog: Mutex<VecDeque<Vec<u8>>>,
    wakeup: Notify,
}

impl MemoryQueue {
    fn new(topic: &str) -> Self {
        MemoryQueue {
            topic: topic.to_string(),
            backlog: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
        }
    }

    fn enqueue(&self, payload: Vec<u8>) {
        self.backlog
            .lock()
            .expect("queue lock poisoned")
            .push_back(payload);
        // notify_one stores a permit, so an enqueue racing the pump's
        // empty-check is never lost.
        self.wakeup.notify_one();
    }
}

// =============================================================================
// Memory Transport
// =============================================================================

/// An in-process broker with durable queues.
pub struct MemoryTransport {
    connected: AtomicBool,
    /// Queues survive close/reopen: durability is the point.
    queues: Mutex<HashMap<String, Arc<MemoryQueue>>>,
    events_tx: broadcast::Sender<TransportEvent>,
    connect_count: AtomicU32,
    fail_connects: AtomicU32,
}

impl MemoryTransport {
    /// Creates a disconnected in-memory broker.
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(16);
        MemoryTransport {
            connected: AtomicBool::new(false),
            queues: Mutex::new(HashMap::new()),
            events_tx,
            connect_count: AtomicU32::new(0),
            fail_connects: AtomicU32::new(0),
        }
    }

    /// Makes the next `n` connect attempts fail with a transport error.
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Simulates an unexpected connection drop: consumers stall and a
    /// `Disconnected` event is emitted.
    pub fn force_disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events_tx.send(TransportEvent::Disconnected);
    }

    /// Number of successful connect attempts (idempotent no-ops included).
    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Messages currently waiting in `queue`.
    pub fn backlog_len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .expect("queues lock poisoned")
            .get(queue)
            .map(|q| q.backlog.lock().expect("queue lock poisoned").len())
            .unwrap_or(0)
    }

    fn queue(&self, name: &str, topic: &str) -> Arc<MemoryQueue> {
        self.queues
            .lock()
            .expect("queues lock poisoned")
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryQueue::new(topic)))
            .clone()
    }

    fn ensure_connected(&self) -> MeshResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MeshError::Transport("not connected to broker".into()))
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerTransport for MemoryTransport {
    async fn connect(&self) -> MeshResult<()> {
        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(MeshError::Transport("injected connect failure".into()));
        }

        self.connected.store(true, Ordering::SeqCst);
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        let _ = self.events_tx.send(TransportEvent::Connected);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> MeshResult<()> {
        self.ensure_connected()?;

        let queues: Vec<Arc<MemoryQueue>> = self
            .queues
            .lock()
            .expect("queues lock poisoned")
            .values()
            .filter(|q| q.topic == topic)
            .cloned()
            .collect();

        // Fan out to every queue bound to the topic. A topic nobody has
        // declared a queue for is dropped, exactly like a broker exchange
        // with no bindings.
        for queue in queues {
            queue.enqueue(payload.clone());
        }
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, topic: &str) -> MeshResult<mpsc::Receiver<Delivery>> {
        self.ensure_connected()?;

        let queue = self.queue(queue, topic);
        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
        tokio::spawn(pump(queue, tx));
        Ok(rx)
    }

    async fn close(&self) -> MeshResult<()> {
        // Graceful close: no Disconnected event, queues keep their backlog.
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events_tx.subscribe()
    }
}

// =============================================================================
// Delivery Pump
// =============================================================================

/// Delivers the head of the backlog and waits for its acknowledgment.
/// The head is removed only on ack: nack and dropped deliveries are
/// redelivered, preserving FIFO order and at-least-once semantics.
async fn pump(queue: Arc<MemoryQueue>, tx: mpsc::Sender<Delivery>) {
    loop {
        let payload = loop {
            if let Some(head) = queue
                .backlog
                .lock()
                .expect("queue lock poisoned")
                .front()
                .cloned()
            {
                break head;
            }
            queue.wakeup.notified().await;
        };

        let (ack_tx, ack_rx) = oneshot::channel::<bool>();
        let delivery = Delivery::new(payload, Box::new(MemoryAcker { result: ack_tx }));
        if tx.send(delivery).await.is_err() {
            // Consumer detached; backlog stays for the next binding.
            debug!(topic = %queue.topic, "Memory consumer detached");
            return;
        }

        match ack_rx.await {
            Ok(true) => {
                queue
                    .backlog
                    .lock()
                    .expect("queue lock poisoned")
                    .pop_front();
            }
            // Nacked or dropped without ack: leave at the front and
            // deliver again after a short pause.
            Ok(false) | Err(_) => {
                tokio::time::sleep(REDELIVERY_PAUSE).await;
            }
        }
    }
}

// =============================================================================
// Memory Acknowledger
// =============================================================================

struct MemoryAcker {
    result: oneshot::Sender<bool>,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(self: Box<Self>) -> MeshResult<()> {
        self.result
            .send(true)
            .map_err(|_| MeshError::Internal("queue pump gone".into()))
    }

    async fn nack(self: Box<Self>) -> MeshResult<()> {
        self.result
            .send(false)
            .map_err(|_| MeshError::Internal("queue pump gone".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Acks land through the pump asynchronously; poll until it has
    /// removed the head.
    async fn drain(transport: &MemoryTransport, queue: &str) {
        for _ in 0..200 {
            if transport.backlog_len(queue) == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue {queue} never drained");
    }

    #[tokio::test]
    async fn test_fifo_delivery_and_ack() {
        let transport = MemoryTransport::new();
        transport.connect().await.unwrap();

        let mut rx = transport.bind_queue("checkout.t", "t").await.unwrap();
        transport.publish("t", b"one".to_vec()).await.unwrap();
        transport.publish("t", b"two".to_vec()).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.payload(), b"one");
        first.ack().await.unwrap();

        let second = rx.recv().await.unwrap();
        assert_eq!(second.payload(), b"two");
        second.ack().await.unwrap();

        drain(&transport, "checkout.t").await;
    }

    #[tokio::test]
    async fn test_nack_redelivers_same_message() {
        let transport = MemoryTransport::new();
        transport.connect().await.unwrap();

        let mut rx = transport.bind_queue("checkout.t", "t").await.unwrap();
        transport.publish("t", b"flaky".to_vec()).await.unwrap();

        let first = rx.recv().await.unwrap();
        first.nack().await.unwrap();

        let redelivered = rx.recv().await.unwrap();
        assert_eq!(redelivered.payload(), b"flaky");
        redelivered.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_backlog_survives_consumer_detach() {
        let transport = MemoryTransport::new();
        transport.connect().await.unwrap();

        // Declare the queue, then detach the consumer.
        let rx = transport.bind_queue("checkout.t", "t").await.unwrap();
        drop(rx);

        transport.publish("t", b"kept".to_vec()).await.unwrap();
        transport.close().await.unwrap();
        transport.connect().await.unwrap();

        let mut rx = transport.bind_queue("checkout.t", "t").await.unwrap();
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.payload(), b"kept");
        delivery.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_unbound_topic_is_dropped() {
        let transport = MemoryTransport::new();
        transport.connect().await.unwrap();
        transport.publish("nobody.listens", b"gone".to_vec()).await.unwrap();
        assert_eq!(transport.backlog_len("nobody.listens"), 0);
    }

    #[tokio::test]
    async fn test_injected_connect_failures() {
        let transport = MemoryTransport::new();
        transport.fail_next_connects(2);

        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_ok());
    }
}
