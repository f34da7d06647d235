//! # Durable Event Channel
//!
//! Topic-based publish/subscribe with at-least-once delivery, durable
//! per-service queues and automatic reconnection.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Durable Event Channel States                           │
//! │                                                                         │
//! │  ┌────────────┐    connect()    ┌────────────┐   bind subscriptions    │
//! │  │Disconnected│ ──────────────► │ Connecting │ ──────────────────────┐ │
//! │  └────────────┘                 └────────────┘                       │ │
//! │        ▲                                                             ▼ │
//! │        │ disconnect()                                      ┌───────────┐│
//! │        └────────────────────────────────────────────────── │ Connected ││
//! │                                                            └─────┬─────┘│
//! │                                          transport Disconnected  │      │
//! │                                                            ┌─────▼─────┐│
//! │   RECONNECT POLICY (fixed delay, bounded)                  │Reconnecting││
//! │   ───────────────────────────────────────                 └─────┬─────┘│
//! │   attempt 1..max_attempts, `delay` apart;                        │      │
//! │   each attempt reconnects the transport and                      │      │
//! │   re-binds every subscription in registration     attempts       │      │
//! │   order. Success → Connected.                     exhausted      ▼      │
//! │                                                            ┌───────────┐│
//! │   Failed is terminal: ChannelDisconnected is               │  Failed   ││
//! │   published on the fatal watch for operational             └───────────┘│
//! │   monitoring.                                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery Contract
//! - Per-topic FIFO to each durable queue; no cross-topic ordering
//! - At-least-once: a crash between handler execution and ack redelivers,
//!   so handlers must be idempotent on the envelope's correlation id
//! - All handlers registered for a topic run before the message is acked;
//!   any handler failure nacks the message for redelivery
//!
//! The channel is an explicit instance constructed once at service start
//! and injected into consumers. There is deliberately no process-global
//! singleton.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use bazaar_core::{queue_name, Envelope};

use crate::config::ChannelConfig;
use crate::error::{MeshError, MeshResult};
use crate::transport::{BrokerTransport, Delivery, TransportEvent};

// =============================================================================
// Channel State
// =============================================================================

/// Connection state of the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not connected; subscriptions are registered but dormant.
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected; consumer loops are running.
    Connected,
    /// Connection lost; the reconnect loop is working through attempts.
    Reconnecting,
    /// Reconnect attempts exhausted. Terminal for this instance.
    Failed,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Disconnected => write!(f, "disconnected"),
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Connected => write!(f, "connected"),
            ChannelState::Reconnecting => write!(f, "reconnecting"),
            ChannelState::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Message Handler
// =============================================================================

/// A subscriber's message processing callback.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Processes one delivered envelope. Returning `Err` negatively
    /// acknowledges the message, causing redelivery.
    async fn handle(&self, envelope: &Envelope) -> MeshResult<()>;
}

/// Adapts an async closure into a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Envelope) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = MeshResult<()>> + Send + 'static,
{
    struct FnHandler<F>(F);

    #[async_trait]
    impl<F, Fut> MessageHandler for FnHandler<F>
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = MeshResult<()>> + Send + 'static,
    {
        async fn handle(&self, envelope: &Envelope) -> MeshResult<()> {
            (self.0)(envelope.clone()).await
        }
    }

    Arc::new(FnHandler(f))
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// One (topic → handlers) binding. Registration order is preserved so
/// re-subscription after reconnect happens in the original order.
struct Subscription {
    topic: String,
    handlers: Vec<Arc<dyn MessageHandler>>,
    consumer: Option<JoinHandle<()>>,
}

// =============================================================================
// Durable Event Channel
// =============================================================================

/// Reliable topic pub/sub for one service over a shared broker connection.
///
/// Construct once per process with [`DurableEventChannel::new`], share via
/// `Arc`, and call [`DurableEventChannel::disconnect`] on shutdown.
pub struct DurableEventChannel {
    service_name: String,
    config: ChannelConfig,
    transport: Arc<dyn BrokerTransport>,
    state: RwLock<ChannelState>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    /// Serializes connect attempts; makes `connect()` idempotent under
    /// concurrent triggers.
    connect_lock: Mutex<()>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    fatal_tx: watch::Sender<Option<String>>,
}

impl DurableEventChannel {
    /// Creates a disconnected channel for `service_name` over `transport`.
    pub fn new(
        service_name: impl Into<String>,
        config: ChannelConfig,
        transport: Arc<dyn BrokerTransport>,
    ) -> Arc<Self> {
        let (fatal_tx, _) = watch::channel(None);
        Arc::new(DurableEventChannel {
            service_name: service_name.into(),
            config,
            transport,
            state: RwLock::new(ChannelState::Disconnected),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            connect_lock: Mutex::new(()),
            supervisor: Mutex::new(None),
            fatal_tx,
        })
    }

    /// Establishes the broker connection and binds every registered
    /// subscription, in registration order.
    ///
    /// Idempotent: a call while already connecting waits for that attempt
    /// instead of starting a second one; a call while connected is a no-op.
    pub async fn connect(self: &Arc<Self>) -> MeshResult<()> {
        let _guard = self.connect_lock.lock().await;

        let state = *self.state.read().await;
        match state {
            ChannelState::Connected => return Ok(()),
            ChannelState::Failed => {
                return Err(MeshError::ChannelDisconnected {
                    attempts: self.config.reconnect.max_attempts,
                })
            }
            _ => {}
        }

        *self.state.write().await = ChannelState::Connecting;
        let result = async {
            self.transport.connect().await?;
            self.bind_all().await
        }
        .await;

        match result {
            Ok(()) => {
                *self.state.write().await = ChannelState::Connected;
                self.ensure_supervisor().await;
                info!(service = %self.service_name, "Event channel connected");
                Ok(())
            }
            Err(err) => {
                *self.state.write().await = ChannelState::Disconnected;
                Err(err)
            }
        }
    }

    /// Publishes `payload` on `topic`, wrapped in an [`Envelope`] stamped
    /// with a fresh correlation id and timestamp.
    ///
    /// Connects first if not connected, rather than failing.
    pub async fn publish(self: &Arc<Self>, topic: &str, payload: serde_json::Value) -> MeshResult<()> {
        let state = *self.state.read().await;
        match state {
            ChannelState::Connected => {}
            ChannelState::Failed => {
                return Err(MeshError::ChannelDisconnected {
                    attempts: self.config.reconnect.max_attempts,
                })
            }
            _ => self.connect().await?,
        }

        let envelope = Envelope::new(topic, payload, &self.service_name);
        debug!(
            service = %self.service_name,
            topic = %topic,
            correlation_id = %envelope.metadata.correlation_id,
            "Publishing event"
        );
        self.transport.publish(topic, envelope.to_bytes()?).await
    }

    /// Registers `handler` for `topic`, declaring the durable queue
    /// `{service}.{topic}` idempotently.
    ///
    /// Handlers registered for the same topic all run, in registration
    /// order, before a message is acknowledged. Registration is retained
    /// across disconnects and re-bound on every (re)connect.
    pub async fn on_message(
        self: &Arc<Self>,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> MeshResult<()> {
        let mut subscriptions = self.subscriptions.lock().await;

        if let Some(existing) = subscriptions.iter_mut().find(|s| s.topic == topic) {
            existing.handlers.push(handler);
            return Ok(());
        }

        subscriptions.push(Subscription {
            topic: topic.to_string(),
            handlers: vec![handler],
            consumer: None,
        });

        // When already connected, bind immediately; otherwise connect()
        // will bind everything.
        if *self.state.read().await == ChannelState::Connected {
            let index = subscriptions.len() - 1;
            self.bind_subscription(&mut subscriptions[index]).await?;
        }
        Ok(())
    }

    /// Gracefully closes the channel. Subscriptions are retained in memory
    /// so a later [`DurableEventChannel::connect`] re-declares and
    /// re-binds them.
    pub async fn disconnect(self: &Arc<Self>) -> MeshResult<()> {
        {
            let mut state = self.state.write().await;
            if *state == ChannelState::Disconnected {
                return Ok(());
            }
            *state = ChannelState::Disconnected;
        }

        let mut subscriptions = self.subscriptions.lock().await;
        for subscription in subscriptions.iter_mut() {
            if let Some(consumer) = subscription.consumer.take() {
                consumer.abort();
            }
        }
        drop(subscriptions);

        self.transport.close().await?;
        info!(service = %self.service_name, "Event channel disconnected");
        Ok(())
    }

    /// Current channel state.
    pub async fn state(&self) -> ChannelState {
        *self.state.read().await
    }

    /// Watch that turns `Some(reason)` when reconnect attempts are
    /// exhausted. Operational monitoring must observe this: a `Failed`
    /// channel means the service can no longer participate in
    /// asynchronous workflows.
    pub fn fatal_watch(&self) -> watch::Receiver<Option<String>> {
        self.fatal_tx.subscribe()
    }

    // -------------------------------------------------------------------------
    // Binding
    // -------------------------------------------------------------------------

    /// Binds every registered subscription, in registration order.
    async fn bind_all(self: &Arc<Self>) -> MeshResult<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        for subscription in subscriptions.iter_mut() {
            self.bind_subscription(subscription).await?;
        }
        Ok(())
    }

    /// (Re-)declares one subscription's durable queue and starts its
    /// consumer loop, replacing any previous loop.
    async fn bind_subscription(self: &Arc<Self>, subscription: &mut Subscription) -> MeshResult<()> {
        if let Some(previous) = subscription.consumer.take() {
            previous.abort();
        }

        let queue = queue_name(&self.service_name, &subscription.topic);
        let receiver = self.transport.bind_queue(&queue, &subscription.topic).await?;
        debug!(service = %self.service_name, queue = %queue, "Subscription bound");

        subscription.consumer = Some(tokio::spawn(consume_loop(
            subscription.topic.clone(),
            receiver,
            self.subscriptions.clone(),
        )));
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reconnection
    // -------------------------------------------------------------------------

    /// Spawns the supervisor that reacts to transport disconnects. One per
    /// channel; holds only a weak reference so the channel can be dropped.
    async fn ensure_supervisor(self: &Arc<Self>) {
        let mut supervisor = self.supervisor.lock().await;
        if supervisor.is_some() {
            return;
        }

        let weak = Arc::downgrade(self);
        let mut events = self.transport.events();
        *supervisor = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TransportEvent::Disconnected) => {
                        let Some(channel) = weak.upgrade() else { return };
                        channel.handle_disconnect().await;
                    }
                    Ok(TransportEvent::Connected) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        }));
    }

    /// Runs the fixed-delay, bounded reconnect loop after an unexpected
    /// connection loss.
    async fn handle_disconnect(self: Arc<Self>) {
        {
            let mut state = self.state.write().await;
            // A graceful disconnect() or an already-running reconnect loop
            // is not a connection loss.
            if *state != ChannelState::Connected {
                return;
            }
            *state = ChannelState::Reconnecting;
        }

        let max_attempts = self.config.reconnect.max_attempts;
        warn!(
            service = %self.service_name,
            max_attempts = max_attempts,
            "Broker connection lost; reconnecting"
        );

        for attempt in 1..=max_attempts {
            tokio::time::sleep(self.config.reconnect.delay).await;
            debug!(
                service = %self.service_name,
                attempt = attempt,
                max_attempts = max_attempts,
                "Reconnect attempt"
            );

            match self.transport.connect().await {
                Ok(()) => match self.bind_all().await {
                    Ok(()) => {
                        *self.state.write().await = ChannelState::Connected;
                        info!(
                            service = %self.service_name,
                            attempt = attempt,
                            "Event channel reconnected"
                        );
                        return;
                    }
                    Err(err) => {
                        warn!(
                            service = %self.service_name,
                            attempt = attempt,
                            error = %err,
                            "Re-subscription failed"
                        );
                    }
                },
                Err(err) => {
                    warn!(
                        service = %self.service_name,
                        attempt = attempt,
                        error = %err,
                        "Reconnect attempt failed"
                    );
                }
            }
        }

        *self.state.write().await = ChannelState::Failed;
        let fatal = MeshError::ChannelDisconnected {
            attempts: max_attempts,
        };
        error!(
            service = %self.service_name,
            error = %fatal,
            "Reconnect attempts exhausted; event channel is down"
        );
        let _ = self.fatal_tx.send(Some(fatal.to_string()));
    }
}

// =============================================================================
// Consumer Loop
// =============================================================================

/// Drains one durable queue: runs every handler registered for the topic,
/// acks only when all succeed, nacks otherwise.
async fn consume_loop(
    topic: String,
    mut receiver: mpsc::Receiver<Delivery>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
) {
    while let Some(delivery) = receiver.recv().await {
        let envelope = match Envelope::from_bytes(delivery.payload()) {
            Ok(envelope) => envelope,
            Err(err) => {
                // Undecodable messages are requeued; a broker-side
                // dead-letter limit eventually parks them.
                warn!(topic = %topic, error = %err, "Undecodable message requeued");
                if let Err(err) = delivery.nack().await {
                    warn!(topic = %topic, error = %err, "Nack failed");
                }
                continue;
            }
        };

        // Snapshot handlers at delivery time so registrations made after
        // this message arrived still apply to the next one.
        let handlers: Vec<Arc<dyn MessageHandler>> = {
            let subscriptions = subscriptions.lock().await;
            subscriptions
                .iter()
                .find(|s| s.topic == topic)
                .map(|s| s.handlers.clone())
                .unwrap_or_default()
        };

        let mut failure: Option<MeshError> = None;
        for handler in &handlers {
            if let Err(err) = handler.handle(&envelope).await {
                failure = Some(MeshError::Handler {
                    topic: topic.clone(),
                    reason: err.to_string(),
                });
                break;
            }
        }

        match failure {
            None => {
                if let Err(err) = delivery.ack().await {
                    warn!(
                        topic = %topic,
                        correlation_id = %envelope.metadata.correlation_id,
                        error = %err,
                        "Ack failed; message will be redelivered"
                    );
                }
            }
            Some(err) => {
                warn!(
                    topic = %topic,
                    correlation_id = %envelope.metadata.correlation_id,
                    error = %err,
                    "Handler failed; message requeued"
                );
                if let Err(err) = delivery.nack().await {
                    warn!(topic = %topic, error = %err, "Nack failed");
                }
            }
        }
    }
    debug!(topic = %topic, "Consumer loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
    use tokio::time::sleep;

    use crate::config::ReconnectConfig;
    use crate::memory::MemoryTransport;

    fn test_config(delay_ms: u64, max_attempts: u32) -> ChannelConfig {
        ChannelConfig {
            reconnect: ReconnectConfig {
                delay: Duration::from_millis(delay_ms),
                max_attempts,
            },
            ..ChannelConfig::default()
        }
    }

    /// Handler that forwards every envelope to a test channel.
    fn recording_handler(tx: UnboundedSender<Envelope>) -> Arc<dyn MessageHandler> {
        handler_fn(move |envelope| {
            let tx = tx.clone();
            async move {
                tx.send(envelope)
                    .map_err(|_| MeshError::Internal("test receiver gone".into()))
            }
        })
    }

    async fn wait_for_state(channel: &Arc<DurableEventChannel>, expected: ChannelState) {
        for _ in 0..200 {
            if channel.state().await == expected {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "channel never reached {}, still {}",
            expected,
            channel.state().await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_reaches_subscriber_with_envelope() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let transport = Arc::new(MemoryTransport::new());
        let channel = DurableEventChannel::new("checkout", test_config(100, 3), transport);

        let (tx, mut rx) = unbounded_channel();
        channel
            .on_message("order.created", recording_handler(tx))
            .await
            .unwrap();
        channel.connect().await.unwrap();

        channel
            .publish("order.created", json!({"orderId": "ord-1"}))
            .await
            .unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.topic, "order.created");
        assert_eq!(envelope.payload["orderId"], "ord-1");
        assert_eq!(envelope.metadata.source, "checkout");
        assert!(!envelope.metadata.correlation_id.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_handler_gets_redelivery_with_same_correlation_id() {
        let transport = Arc::new(MemoryTransport::new());
        let channel = DurableEventChannel::new("checkout", test_config(100, 3), transport);

        let attempts = Arc::new(AtomicU32::new(0));
        let (tx, mut rx) = unbounded_channel();
        let handler = {
            let attempts = attempts.clone();
            handler_fn(move |envelope| {
                let attempts = attempts.clone();
                let tx = tx.clone();
                async move {
                    // Fail the first delivery, succeed on redelivery.
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(MeshError::Internal("transient".into()));
                    }
                    tx.send(envelope).ok();
                    Ok(())
                }
            })
        };
        channel.on_message("payment.failed", handler).await.unwrap();
        channel.connect().await.unwrap();

        channel
            .publish("payment.failed", json!({"orderId": "ord-2"}))
            .await
            .unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(envelope.payload["orderId"], "ord-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_handlers_run_before_ack() {
        let transport = Arc::new(MemoryTransport::new());
        let channel =
            DurableEventChannel::new("checkout", test_config(100, 3), transport.clone());

        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();
        channel
            .on_message("order.created", recording_handler(tx_a))
            .await
            .unwrap();
        channel
            .on_message("order.created", recording_handler(tx_b))
            .await
            .unwrap();
        channel.connect().await.unwrap();

        channel
            .publish("order.created", json!({"orderId": "ord-3"}))
            .await
            .unwrap();

        let first = rx_a.recv().await.unwrap();
        let second = rx_b.recv().await.unwrap();
        assert_eq!(first.metadata.correlation_id, second.metadata.correlation_id);

        // Acked after both handlers: backlog drains.
        for _ in 0..200 {
            if transport.backlog_len("checkout.order.created") == 0 {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("message never acked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let transport = Arc::new(MemoryTransport::new());
        let channel =
            DurableEventChannel::new("checkout", test_config(100, 3), transport.clone());

        channel.connect().await.unwrap();
        channel.connect().await.unwrap();
        channel.connect().await.unwrap();

        assert_eq!(transport.connect_count(), 1);
        assert_eq!(channel.state().await, ChannelState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_auto_connects() {
        let transport = Arc::new(MemoryTransport::new());
        let channel = DurableEventChannel::new("checkout", test_config(100, 3), transport);

        assert_eq!(channel.state().await, ChannelState::Disconnected);
        channel
            .publish("order.created", json!({"orderId": "ord-4"}))
            .await
            .unwrap();
        assert_eq!(channel.state().await, ChannelState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_and_rebinds_after_connection_loss() {
        let transport = Arc::new(MemoryTransport::new());
        let channel =
            DurableEventChannel::new("checkout", test_config(100, 5), transport.clone());

        let (tx, mut rx) = unbounded_channel();
        channel
            .on_message("order.created", recording_handler(tx))
            .await
            .unwrap();
        channel.connect().await.unwrap();

        // First reconnect attempt fails, second succeeds. The supervisor
        // reacts asynchronously, so a second successful transport connect
        // is the reliable signal that reconnection ran; only then is
        // Connected the post-reconnect state rather than the stale one.
        transport.fail_next_connects(1);
        transport.force_disconnect();
        for _ in 0..200 {
            if transport.connect_count() >= 2 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(transport.connect_count() >= 2);
        wait_for_state(&channel, ChannelState::Connected).await;

        channel
            .publish("order.created", json!({"orderId": "ord-5"}))
            .await
            .unwrap();
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.payload["orderId"], "ord-5");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reconnects_fail_the_channel() {
        let transport = Arc::new(MemoryTransport::new());
        let channel =
            DurableEventChannel::new("checkout", test_config(100, 2), transport.clone());
        let mut fatal = channel.fatal_watch();

        channel.connect().await.unwrap();
        transport.fail_next_connects(10);
        transport.force_disconnect();

        wait_for_state(&channel, ChannelState::Failed).await;
        fatal.changed().await.unwrap();
        assert!(fatal.borrow().is_some());

        let err = channel
            .publish("order.created", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MeshError::ChannelDisconnected { attempts: 2 }
        ));
        assert!(channel.connect().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_graceful_disconnect_keeps_subscriptions_and_does_not_reconnect() {
        let transport = Arc::new(MemoryTransport::new());
        let channel =
            DurableEventChannel::new("checkout", test_config(100, 3), transport.clone());

        let (tx, mut rx) = unbounded_channel();
        channel
            .on_message("order.created", recording_handler(tx))
            .await
            .unwrap();
        channel.connect().await.unwrap();
        channel.disconnect().await.unwrap();

        // No reconnect loop after a graceful close.
        sleep(Duration::from_millis(500)).await;
        assert_eq!(channel.state().await, ChannelState::Disconnected);

        // Reconnecting re-binds the retained subscription.
        channel.connect().await.unwrap();
        channel
            .publish("order.created", json!({"orderId": "ord-6"}))
            .await
            .unwrap();
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.payload["orderId"], "ord-6");
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_published_while_down_waits_in_durable_queue() {
        let transport = Arc::new(MemoryTransport::new());

        let consumer =
            DurableEventChannel::new("checkout", test_config(100, 3), transport.clone());
        let (tx, mut rx) = unbounded_channel();
        consumer
            .on_message("payment.succeeded", recording_handler(tx))
            .await
            .unwrap();
        consumer.connect().await.unwrap();
        consumer.disconnect().await.unwrap();

        // A different service publishes while the consumer is offline.
        let producer =
            DurableEventChannel::new("payments", test_config(100, 3), transport.clone());
        producer.connect().await.unwrap();
        producer
            .publish("payment.succeeded", json!({"orderId": "ord-7"}))
            .await
            .unwrap();
        assert_eq!(transport.backlog_len("checkout.payment.succeeded"), 1);

        consumer.connect().await.unwrap();
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.payload["orderId"], "ord-7");
        assert_eq!(envelope.metadata.source, "payments");
    }
}
