//! # bazaar-core: Pure Message Types for Bazaar Commerce
//!
//! This crate defines the cross-service vocabulary of the Bazaar platform:
//! the message envelope every event travels in, the topic names services
//! publish and subscribe to, and the deterministic durable-queue naming
//! scheme. It contains zero I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Bazaar Commerce Architecture                       │
//! │                                                                         │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐                │
//! │  │   auth   │  │ catalog  │  │ checkout │  │ payments │  services      │
//! │  └────┬─────┘  └────┬─────┘  └────┬─────┘  └────┬─────┘                │
//! │       └─────────────┴──────┬──────┴─────────────┘                      │
//! │                            │                                            │
//! │  ┌─────────────────────────▼───────────────────────────────────────┐   │
//! │  │                      bazaar-mesh                                │   │
//! │  │    breaker • directory • client • channel • transport          │   │
//! │  └─────────────────────────┬───────────────────────────────────────┘   │
//! │                            │                                            │
//! │  ┌─────────────────────────▼───────────────────────────────────────┐   │
//! │  │               ★ bazaar-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────────────────────┐ │   │
//! │  │   │ envelope  │  │  topics   │  │ queue naming               │ │   │
//! │  │   │ Envelope  │  │ order.*   │  │ {service}.{topic}          │ │   │
//! │  │   │ Metadata  │  │ payment.* │  │ crash-stable, no surprises │ │   │
//! │  │   └───────────┘  └───────────┘  └────────────────────────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO BROKER • NO NETWORK • PURE TYPES                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`envelope`] - The `Envelope` wire type and its metadata
//! - [`topics`] - Topic constants and durable queue naming
//!
//! ## Design Principles
//!
//! 1. **Opaque payloads**: the envelope never inspects payload contents -
//!    consumers own their schema versioning
//! 2. **Immutable identity**: a correlation id is assigned exactly once at
//!    publish time and survives redelivery unchanged
//! 3. **Deterministic names**: queue names derive from (service, topic)
//!    alone, so a restarted consumer reattaches to the same queue

// =============================================================================
// Module Declarations
// =============================================================================

pub mod envelope;
pub mod topics;

// =============================================================================
// Re-exports
// =============================================================================

pub use envelope::{Envelope, EnvelopeError, EnvelopeMetadata};
pub use topics::queue_name;
