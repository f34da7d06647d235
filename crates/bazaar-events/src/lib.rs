//! # bazaar-events: Domain Event Adapters for Bazaar
//!
//! Per-service wrappers over the durable event channel. Each adapter owns
//! its service's topics and payload schemas, keeps consumption idempotent
//! across redeliveries, and hands business decisions to an injected trait.
//!
//! ## Adapter Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Domain Event Adapters                              │
//! │                                                                         │
//! │  checkout service                     cart service                      │
//! │  ┌──────────────────────────┐         ┌──────────────────────────┐     │
//! │  │       OrderEvents        │         │        CartEvents        │     │
//! │  │                          │         │                          │     │
//! │  │ pub  order.created       │         │ pub  cart.checked_out    │     │
//! │  │ pub  order.status.updated│         │ sub  product.price.      │     │
//! │  │ sub  payment.succeeded   │         │          changed         │     │
//! │  │ sub  payment.failed      │         │        │                 │     │
//! │  │ sub  payment.refunded    │         │        ▼                 │     │
//! │  │        │                 │         │  CartRepricer (injected) │     │
//! │  │        ▼                 │         └──────────────────────────┘     │
//! │  │ OrderStatusSink          │                                          │
//! │  │ (injected)               │   Both adapters dedup on correlation     │
//! │  └──────────────────────────┘   id, so redelivery never double-        │
//! │                                 applies a business effect.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bazaar_events::{OrderEvents, OrderStatusSink};
//!
//! let events = OrderEvents::new(channel.clone(), order_store);
//! events.bind().await?;
//! channel.connect().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod dedup;
pub mod order;

// =============================================================================
// Re-exports
// =============================================================================

pub use cart::{CartCheckedOut, CartEvents, CartRepricer, PriceChange};
pub use dedup::SeenSet;
pub use order::{
    OrderCreated, OrderEvents, OrderStatus, OrderStatusSink, OrderStatusUpdated, PaymentNotice,
};
