//! # bazaar-mesh: Inter-Service Resilience Layer for Bazaar
//!
//! This crate provides the communication backbone between Bazaar platform
//! services: circuit-broken synchronous calls and durable asynchronous
//! events, so one slow or dead dependency never cascades through the mesh.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Service Mesh Architecture                          │
//! │                                                                         │
//! │  SYNCHRONOUS PATH (request/response)                                    │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                       ResilientClient                            │  │
//! │  │                                                                  │  │
//! │  │  ┌────────────────┐   ┌────────────────┐   ┌─────────────────┐  │  │
//! │  │  │ServiceDirectory│ → │ CircuitBreaker │ → │  HTTP request   │  │  │
//! │  │  │                │   │ (per-service)  │   │                 │  │  │
//! │  │  │ name → base URL│   │ Closed/Open/   │   │ timeout +       │  │  │
//! │  │  │                │   │ HalfOpen       │   │ x-calling-      │  │  │
//! │  │  │                │   │                │   │ service header  │  │  │
//! │  │  └────────────────┘   └────────────────┘   └─────────────────┘  │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  ASYNCHRONOUS PATH (events)                                             │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                     DurableEventChannel                          │  │
//! │  │                                                                  │  │
//! │  │  publish/subscribe over durable queues ({service}.{topic})       │  │
//! │  │  at-least-once, per-topic FIFO, ack after all handlers           │  │
//! │  │  bounded fixed-delay reconnect with full re-subscription         │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ BrokerTransport                         │
//! │              ┌────────────────┴────────────────┐                       │
//! │              ▼                                 ▼                        │
//! │  ┌────────────────────────┐     ┌────────────────────────────┐         │
//! │  │     NatsTransport      │     │      MemoryTransport       │         │
//! │  │  JetStream (prod)      │     │  in-process (tests/dev)    │         │
//! │  └────────────────────────┘     └────────────────────────────┘         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`breaker`] - Per-dependency circuit breaker state machine
//! - [`channel`] - Durable topic pub/sub with automatic reconnection
//! - [`client`] - Circuit-broken HTTP client for service-to-service calls
//! - [`config`] - Environment-driven mesh configuration
//! - [`directory`] - Service name to base URL resolution
//! - [`error`] - Mesh error types and classification helpers
//! - [`memory`] - In-process broker adapter for tests and offline dev
//! - [`nats`] - NATS JetStream broker adapter
//! - [`transport`] - Broker transport port shared by both adapters
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bazaar_mesh::{
//!     DurableEventChannel, MeshConfig, NatsTransport, ResilientClient,
//!     StaticDirectory, handler_fn, topics,
//! };
//!
//! let config = MeshConfig::from_env()?;
//!
//! // Synchronous calls with circuit breaking
//! let directory = Arc::new(StaticDirectory::from_env()?);
//! let client = ResilientClient::new(&config.service_name, config.client.clone(), directory)?;
//! let response = client.get("payments", "/api/charges/123").await?;
//!
//! // Durable events
//! let transport = Arc::new(NatsTransport::new(&config.channel));
//! let channel = DurableEventChannel::new(&config.service_name, config.channel.clone(), transport);
//! channel
//!     .on_message(topics::payment::SUCCEEDED, handler_fn(|envelope| async move {
//!         // idempotent on envelope.metadata.correlation_id
//!         Ok(())
//!     }))
//!     .await?;
//! channel.connect().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

// Synchronous path
pub mod breaker;
pub mod client;
pub mod directory;

// Asynchronous path
pub mod channel;
pub mod memory;
pub mod nats;
pub mod transport;

// Shared
pub mod config;
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Synchronous path
pub use breaker::{CircuitBreaker, CircuitState, StateObserver};
pub use client::{ResilientClient, ServiceResponse, CALLER_HEADER};
pub use directory::{ServiceDirectory, StaticDirectory};

// Asynchronous path
pub use channel::{handler_fn, ChannelState, DurableEventChannel, MessageHandler};
pub use memory::MemoryTransport;
pub use nats::NatsTransport;
pub use transport::{Acknowledger, BrokerTransport, Delivery, TransportEvent};

// Shared
pub use config::{BreakerConfig, ChannelConfig, ClientConfig, MeshConfig, ReconnectConfig};
pub use error::{MeshError, MeshResult};

// Envelope types live in bazaar-core; re-exported for subscriber code.
pub use bazaar_core::{queue_name, topics, Envelope, EnvelopeMetadata};
