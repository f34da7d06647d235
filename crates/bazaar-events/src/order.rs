//! # Order Events
//!
//! The checkout service's event adapter: publishes order lifecycle events
//! and drives an order's status forward from payment outcomes.
//!
//! ## Event Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Checkout Event Flow                                 │
//! │                                                                         │
//! │  PUBLISHES                          SUBSCRIBES                          │
//! │  order.created ───────►             payment.succeeded ──► sink         │
//! │  order.status.updated ─►            payment.failed ─────► sink         │
//! │                                     payment.refunded ───► sink         │
//! │                                                                         │
//! │  Each payment notice is applied at most once per correlation id;       │
//! │  redelivered copies are acknowledged without touching the sink.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The sink is the boundary to business state: the adapter never loads or
//! validates orders itself.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use bazaar_core::topics;
use bazaar_mesh::{handler_fn, DurableEventChannel, MeshResult, MessageHandler};

use crate::dedup::SeenSet;

/// Redelivery dedup window per adapter.
const SEEN_CAPACITY: usize = 4096;

// =============================================================================
// Payloads
// =============================================================================

/// Payload of `order.created`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: String,
    pub customer_id: String,
    pub total_cents: i64,
}

/// Payload of `order.status.updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusUpdated {
    pub order_id: String,
    pub status: OrderStatus,
}

/// Order lifecycle states announced on `order.status.updated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Paid,
    PaymentFailed,
    Refunded,
}

/// Payload of the `payment.*` outcome topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentNotice {
    pub order_id: String,
    pub payment_id: String,
    pub amount_cents: i64,
}

// =============================================================================
// Status Sink
// =============================================================================

/// Where payment outcomes land. Implemented by the checkout service's
/// order store; a failure nacks the notice for redelivery.
#[async_trait]
pub trait OrderStatusSink: Send + Sync {
    async fn payment_succeeded(&self, notice: &PaymentNotice) -> MeshResult<()>;
    async fn payment_failed(&self, notice: &PaymentNotice) -> MeshResult<()>;
    async fn payment_refunded(&self, notice: &PaymentNotice) -> MeshResult<()>;
}

// =============================================================================
// Order Events Adapter
// =============================================================================

/// Checkout's binding to the event channel.
pub struct OrderEvents {
    channel: Arc<DurableEventChannel>,
    sink: Arc<dyn OrderStatusSink>,
    seen: Arc<Mutex<SeenSet>>,
}

/// Which sink method a payment topic maps to.
#[derive(Clone, Copy)]
enum PaymentKind {
    Succeeded,
    Failed,
    Refunded,
}

impl OrderEvents {
    pub fn new(channel: Arc<DurableEventChannel>, sink: Arc<dyn OrderStatusSink>) -> Self {
        OrderEvents {
            channel,
            sink,
            seen: Arc::new(Mutex::new(SeenSet::new(SEEN_CAPACITY))),
        }
    }

    /// Registers the payment subscriptions. Call before (or after)
    /// connecting the channel; registration survives reconnects.
    pub async fn bind(&self) -> MeshResult<()> {
        let routes = [
            (topics::payment::SUCCEEDED, PaymentKind::Succeeded),
            (topics::payment::FAILED, PaymentKind::Failed),
            (topics::payment::REFUNDED, PaymentKind::Refunded),
        ];
        for (topic, kind) in routes {
            self.channel
                .on_message(topic, self.payment_handler(kind))
                .await?;
        }
        Ok(())
    }

    /// Announces a newly placed order.
    pub async fn publish_order_created(&self, order: &OrderCreated) -> MeshResult<()> {
        self.channel
            .publish(topics::order::CREATED, serde_json::to_value(order)?)
            .await
    }

    /// Announces an order status change.
    pub async fn publish_status_updated(&self, update: &OrderStatusUpdated) -> MeshResult<()> {
        self.channel
            .publish(topics::order::STATUS_UPDATED, serde_json::to_value(update)?)
            .await
    }

    fn payment_handler(&self, kind: PaymentKind) -> Arc<dyn MessageHandler> {
        let sink = self.sink.clone();
        let seen = self.seen.clone();
        handler_fn(move |envelope| {
            let sink = sink.clone();
            let seen = seen.clone();
            async move {
                let correlation_id = envelope.metadata.correlation_id.clone();
                if seen.lock().expect("seen set poisoned").contains(&correlation_id) {
                    debug!(
                        topic = %envelope.topic,
                        correlation_id = %correlation_id,
                        "Duplicate payment notice skipped"
                    );
                    return Ok(());
                }

                let notice: PaymentNotice = serde_json::from_value(envelope.payload)?;
                match kind {
                    PaymentKind::Succeeded => sink.payment_succeeded(&notice).await?,
                    PaymentKind::Failed => sink.payment_failed(&notice).await?,
                    PaymentKind::Refunded => sink.payment_refunded(&notice).await?,
                }

                seen.lock().expect("seen set poisoned").record(&correlation_id);
                Ok(())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use bazaar_core::Envelope;
    use bazaar_mesh::{BrokerTransport, ChannelConfig, MemoryTransport, MeshError};

    #[derive(Default)]
    struct RecordingSink {
        succeeded: AtomicU32,
        failed: AtomicU32,
        refunded: AtomicU32,
        reject_first: AtomicU32,
    }

    #[async_trait]
    impl OrderStatusSink for RecordingSink {
        async fn payment_succeeded(&self, _notice: &PaymentNotice) -> MeshResult<()> {
            if self.reject_first.load(Ordering::SeqCst) > 0 {
                self.reject_first.fetch_sub(1, Ordering::SeqCst);
                return Err(MeshError::Internal("order store busy".into()));
            }
            self.succeeded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn payment_failed(&self, _notice: &PaymentNotice) -> MeshResult<()> {
            self.failed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn payment_refunded(&self, _notice: &PaymentNotice) -> MeshResult<()> {
            self.refunded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn checkout_adapter(
        transport: Arc<MemoryTransport>,
    ) -> (Arc<DurableEventChannel>, OrderEvents, Arc<RecordingSink>) {
        let channel =
            DurableEventChannel::new("checkout", ChannelConfig::default(), transport);
        let sink = Arc::new(RecordingSink::default());
        let events = OrderEvents::new(channel.clone(), sink.clone());
        events.bind().await.unwrap();
        channel.connect().await.unwrap();
        (channel, events, sink)
    }

    fn notice_payload(order_id: &str) -> serde_json::Value {
        json!({"orderId": order_id, "paymentId": "pay-1", "amountCents": 2599})
    }

    async fn drain(transport: &MemoryTransport, queue: &str) {
        for _ in 0..200 {
            if transport.backlog_len(queue) == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("queue {queue} never drained");
    }

    #[tokio::test(start_paused = true)]
    async fn test_payment_outcomes_reach_the_sink() {
        let transport = Arc::new(MemoryTransport::new());
        let (channel, _events, sink) = checkout_adapter(transport.clone()).await;

        channel
            .publish(topics::payment::SUCCEEDED, notice_payload("ord-1"))
            .await
            .unwrap();
        channel
            .publish(topics::payment::FAILED, notice_payload("ord-2"))
            .await
            .unwrap();
        channel
            .publish(topics::payment::REFUNDED, notice_payload("ord-3"))
            .await
            .unwrap();

        drain(&transport, "checkout.payment.succeeded").await;
        drain(&transport, "checkout.payment.failed").await;
        drain(&transport, "checkout.payment.refunded").await;

        assert_eq!(sink.succeeded.load(Ordering::SeqCst), 1);
        assert_eq!(sink.failed.load(Ordering::SeqCst), 1);
        assert_eq!(sink.refunded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_correlation_id_is_applied_once() {
        let transport = Arc::new(MemoryTransport::new());
        let (_channel, _events, sink) = checkout_adapter(transport.clone()).await;

        // Redelivery reuses the envelope verbatim, correlation id included.
        let envelope = Envelope::new(
            topics::payment::SUCCEEDED,
            notice_payload("ord-4"),
            "payments",
        );
        let bytes = envelope.to_bytes().unwrap();
        transport
            .publish(topics::payment::SUCCEEDED, bytes.clone())
            .await
            .unwrap();
        transport
            .publish(topics::payment::SUCCEEDED, bytes)
            .await
            .unwrap();

        drain(&transport, "checkout.payment.succeeded").await;
        assert_eq!(sink.succeeded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_retries_until_applied() {
        let transport = Arc::new(MemoryTransport::new());
        let (channel, _events, sink) = checkout_adapter(transport.clone()).await;
        sink.reject_first.store(1, Ordering::SeqCst);

        channel
            .publish(topics::payment::SUCCEEDED, notice_payload("ord-5"))
            .await
            .unwrap();

        drain(&transport, "checkout.payment.succeeded").await;
        assert_eq!(sink.succeeded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_use_order_topics() {
        let transport = Arc::new(MemoryTransport::new());
        let (_channel, events, _sink) = checkout_adapter(transport.clone()).await;

        // A peer service's queue observes the published event.
        let mut rx = transport
            .bind_queue("catalog.order.created", topics::order::CREATED)
            .await
            .unwrap();

        events
            .publish_order_created(&OrderCreated {
                order_id: "ord-6".into(),
                customer_id: "cust-1".into(),
                total_cents: 4999,
            })
            .await
            .unwrap();

        let delivery = rx.recv().await.unwrap();
        let envelope = Envelope::from_bytes(delivery.payload()).unwrap();
        assert_eq!(envelope.topic, topics::order::CREATED);
        assert_eq!(envelope.payload["orderId"], "ord-6");
        assert_eq!(envelope.metadata.source, "checkout");
        delivery.ack().await.unwrap();
    }
}
