//! # NATS JetStream Transport
//!
//! Production [`BrokerTransport`] adapter over NATS JetStream.
//!
//! ## Broker Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      JetStream Layout                                   │
//! │                                                                         │
//! │  Stream: BAZAAR_EVENTS (file storage - survives broker restarts)       │
//! │  Subjects: bazaar.events.>                                              │
//! │                                                                         │
//! │  topic "order.created"      → subject bazaar.events.order.created      │
//! │  queue "checkout.payment.succeeded"                                     │
//! │        → durable consumer "checkout_payment_succeeded"                  │
//! │          filtered to bazaar.events.payment.succeeded                    │
//! │                                                                         │
//! │  Ack policy: Explicit - a message leaves the queue only on ack;        │
//! │  nak requeues it for redelivery.                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Durable consumer names derive deterministically from the queue name
//! (dots are not legal in consumer names, so they become underscores), so
//! a restarted service reattaches to its backlog.

use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::AckPolicy;
use async_nats::jetstream::stream::{Config as StreamConfig, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, AckKind};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::ChannelConfig;
use crate::error::{MeshError, MeshResult};
use crate::transport::{Acknowledger, BrokerTransport, Delivery, TransportEvent};

/// Buffered deliveries per consumer before backpressure.
const DELIVERY_BUFFER: usize = 64;

// =============================================================================
// Connection State
// =============================================================================

struct NatsState {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

// =============================================================================
// NATS Transport
// =============================================================================

/// [`BrokerTransport`] backed by NATS JetStream.
pub struct NatsTransport {
    broker_url: String,
    event_prefix: String,
    stream_name: String,
    state: Mutex<Option<NatsState>>,
    events_tx: broadcast::Sender<TransportEvent>,
}

impl NatsTransport {
    /// Creates a disconnected transport from channel configuration.
    pub fn new(config: &ChannelConfig) -> Self {
        let (events_tx, _) = broadcast::channel(16);
        NatsTransport {
            broker_url: config.broker_url.clone(),
            event_prefix: config.event_prefix.clone(),
            stream_name: config.stream_name.clone(),
            state: Mutex::new(None),
            events_tx,
        }
    }

    fn subject(&self, topic: &str) -> String {
        format!("{}.{}", self.event_prefix, topic)
    }
}

#[async_trait]
impl BrokerTransport for NatsTransport {
    async fn connect(&self) -> MeshResult<()> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.as_ref() {
            // Verify the held connection is alive; rebuild it if not.
            if existing.client.flush().await.is_ok() {
                return Ok(());
            }
            debug!(url = %self.broker_url, "Held broker connection is dead; rebuilding");
            *state = None;
        }

        let events_tx = self.events_tx.clone();
        let client = async_nats::ConnectOptions::new()
            .event_callback(move |event| {
                let events_tx = events_tx.clone();
                async move {
                    match event {
                        async_nats::Event::Disconnected => {
                            let _ = events_tx.send(TransportEvent::Disconnected);
                        }
                        async_nats::Event::Connected => {
                            let _ = events_tx.send(TransportEvent::Connected);
                        }
                        _ => {}
                    }
                }
            })
            .connect(&self.broker_url)
            .await
            .map_err(|e| MeshError::Transport(format!("broker connect failed: {}", e)))?;

        let js = jetstream::new(client.clone());
        js.get_or_create_stream(StreamConfig {
            name: self.stream_name.clone(),
            subjects: vec![format!("{}.>", self.event_prefix)],
            storage: StorageType::File,
            retention: RetentionPolicy::Limits,
            ..Default::default()
        })
        .await
        .map_err(|e| MeshError::Transport(format!("stream setup failed: {}", e)))?;

        info!(url = %self.broker_url, stream = %self.stream_name, "Broker connected");
        *state = Some(NatsState {
            client,
            jetstream: js,
        });
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> MeshResult<()> {
        let state = self.state.lock().await;
        let state = state
            .as_ref()
            .ok_or_else(|| MeshError::Transport("not connected to broker".into()))?;

        // Await the JetStream ack so persistence is confirmed, not assumed.
        state
            .jetstream
            .publish(self.subject(topic), payload.into())
            .await
            .map_err(|e| MeshError::Transport(format!("publish failed: {}", e)))?
            .await
            .map_err(|e| MeshError::Transport(format!("publish not persisted: {}", e)))?;
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, topic: &str) -> MeshResult<mpsc::Receiver<Delivery>> {
        let state = self.state.lock().await;
        let state = state
            .as_ref()
            .ok_or_else(|| MeshError::Transport("not connected to broker".into()))?;

        let stream = state
            .jetstream
            .get_stream(&self.stream_name)
            .await
            .map_err(|e| MeshError::Transport(format!("stream lookup failed: {}", e)))?;

        // Consumer names may not contain dots.
        let durable = queue.replace('.', "_");
        let consumer = stream
            .get_or_create_consumer(
                &durable,
                PullConfig {
                    durable_name: Some(durable.clone()),
                    filter_subject: self.subject(topic),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MeshError::Transport(format!("consumer setup failed: {}", e)))?;

        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
        let queue_name = queue.to_string();
        tokio::spawn(async move {
            let mut messages = match consumer.messages().await {
                Ok(messages) => messages,
                Err(e) => {
                    error!(queue = %queue_name, error = %e, "Consumer stream failed to start");
                    return;
                }
            };

            while let Some(next) = messages.next().await {
                match next {
                    Ok(message) => {
                        let payload = message.payload.to_vec();
                        let delivery =
                            Delivery::new(payload, Box::new(JetStreamAcker { message }));
                        if tx.send(delivery).await.is_err() {
                            // Receiver detached; the queue and its backlog
                            // remain on the broker.
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(queue = %queue_name, error = %e, "Consumer stream error");
                        break;
                    }
                }
            }
            debug!(queue = %queue_name, "Consumer detached");
        });

        Ok(rx)
    }

    async fn close(&self) -> MeshResult<()> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.take() {
            // Flush pending publishes before dropping the connection.
            existing.client.flush().await.ok();
            info!(url = %self.broker_url, "Broker connection closed");
        }
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events_tx.subscribe()
    }
}

// =============================================================================
// JetStream Acknowledger
// =============================================================================

struct JetStreamAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acknowledger for JetStreamAcker {
    async fn ack(self: Box<Self>) -> MeshResult<()> {
        self.message
            .ack()
            .await
            .map_err(|e| MeshError::Transport(format!("ack failed: {}", e)))
    }

    async fn nack(self: Box<Self>) -> MeshResult<()> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| MeshError::Transport(format!("nak failed: {}", e)))
    }
}
