//! # Cart Events
//!
//! The cart service's event adapter: announces checkouts and re-prices
//! open carts when the catalog changes a product's price.
//!
//! Same shape as the order adapter: publishing wraps channel topics,
//! subscribing drives an injected trait, and a correlation-id seen-set
//! absorbs redeliveries.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use bazaar_core::topics;
use bazaar_mesh::{handler_fn, DurableEventChannel, MeshResult};

use crate::dedup::SeenSet;

/// Redelivery dedup window per adapter.
const SEEN_CAPACITY: usize = 4096;

// =============================================================================
// Payloads
// =============================================================================

/// Payload of `cart.checked_out`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartCheckedOut {
    pub cart_id: String,
    pub customer_id: String,
    pub order_id: String,
    pub total_cents: i64,
}

/// Payload of `product.price.changed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChange {
    pub product_id: String,
    pub old_price_cents: i64,
    pub new_price_cents: i64,
}

// =============================================================================
// Repricer
// =============================================================================

/// Applies a catalog price change to every open cart holding the product.
/// Implemented by the cart service's store; a failure nacks the change
/// for redelivery.
#[async_trait]
pub trait CartRepricer: Send + Sync {
    async fn reprice(&self, change: &PriceChange) -> MeshResult<()>;
}

// =============================================================================
// Cart Events Adapter
// =============================================================================

/// Cart's binding to the event channel.
pub struct CartEvents {
    channel: Arc<DurableEventChannel>,
    repricer: Arc<dyn CartRepricer>,
    seen: Arc<Mutex<SeenSet>>,
}

impl CartEvents {
    pub fn new(channel: Arc<DurableEventChannel>, repricer: Arc<dyn CartRepricer>) -> Self {
        CartEvents {
            channel,
            repricer,
            seen: Arc::new(Mutex::new(SeenSet::new(SEEN_CAPACITY))),
        }
    }

    /// Registers the price-change subscription. Registration survives
    /// reconnects.
    pub async fn bind(&self) -> MeshResult<()> {
        let repricer = self.repricer.clone();
        let seen = self.seen.clone();
        self.channel
            .on_message(
                topics::product::PRICE_CHANGED,
                handler_fn(move |envelope| {
                    let repricer = repricer.clone();
                    let seen = seen.clone();
                    async move {
                        let correlation_id = envelope.metadata.correlation_id.clone();
                        if seen.lock().expect("seen set poisoned").contains(&correlation_id) {
                            debug!(
                                correlation_id = %correlation_id,
                                "Duplicate price change skipped"
                            );
                            return Ok(());
                        }

                        let change: PriceChange = serde_json::from_value(envelope.payload)?;
                        repricer.reprice(&change).await?;

                        seen.lock().expect("seen set poisoned").record(&correlation_id);
                        Ok(())
                    }
                }),
            )
            .await
    }

    /// Announces a completed checkout.
    pub async fn publish_checked_out(&self, checkout: &CartCheckedOut) -> MeshResult<()> {
        self.channel
            .publish(topics::cart::CHECKED_OUT, serde_json::to_value(checkout)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use bazaar_core::Envelope;
    use bazaar_mesh::{BrokerTransport, ChannelConfig, MemoryTransport};

    #[derive(Default)]
    struct RecordingRepricer {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CartRepricer for RecordingRepricer {
        async fn reprice(&self, change: &PriceChange) -> MeshResult<()> {
            assert!(change.new_price_cents != change.old_price_cents);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
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
    async fn test_price_change_triggers_repricing_once() {
        let transport = Arc::new(MemoryTransport::new());
        let channel =
            DurableEventChannel::new("cart", ChannelConfig::default(), transport.clone());
        let repricer = Arc::new(RecordingRepricer::default());
        let events = CartEvents::new(channel.clone(), repricer.clone());
        events.bind().await.unwrap();
        channel.connect().await.unwrap();

        let envelope = Envelope::new(
            topics::product::PRICE_CHANGED,
            json!({"productId": "sku-1", "oldPriceCents": 1099, "newPriceCents": 999}),
            "catalog",
        );
        let bytes = envelope.to_bytes().unwrap();
        // Delivered twice with the same correlation id; repriced once.
        transport
            .publish(topics::product::PRICE_CHANGED, bytes.clone())
            .await
            .unwrap();
        transport
            .publish(topics::product::PRICE_CHANGED, bytes)
            .await
            .unwrap();

        drain(&transport, "cart.product.price.changed").await;
        assert_eq!(repricer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkout_publishes_on_cart_topic() {
        let transport = Arc::new(MemoryTransport::new());
        let channel =
            DurableEventChannel::new("cart", ChannelConfig::default(), transport.clone());
        let events = CartEvents::new(channel.clone(), Arc::new(RecordingRepricer::default()));
        channel.connect().await.unwrap();

        let mut rx = transport
            .bind_queue("checkout.cart.checked_out", topics::cart::CHECKED_OUT)
            .await
            .unwrap();

        events
            .publish_checked_out(&CartCheckedOut {
                cart_id: "cart-1".into(),
                customer_id: "cust-1".into(),
                order_id: "ord-1".into(),
                total_cents: 8450,
            })
            .await
            .unwrap();

        let delivery = rx.recv().await.unwrap();
        let envelope = Envelope::from_bytes(delivery.payload()).unwrap();
        assert_eq!(envelope.topic, topics::cart::CHECKED_OUT);
        assert_eq!(envelope.payload["cartId"], "cart-1");
        assert_eq!(envelope.metadata.source, "cart");
        delivery.ack().await.unwrap();
    }
}
