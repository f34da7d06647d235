//! # Event Topics
//!
//! Centralized topic constants for the Bazaar event mesh.
//!
//! This module is the single source of truth for all topic names,
//! preventing mismatches between publishers and consumers.
//!
//! ## Naming Convention
//! - Format: `{entity}.{action}` (dot-separated, lowercase)
//! - entity: the domain entity (order, payment, product, cart)
//! - action: what happened, past tense (created, succeeded, changed)
//!
//! ## Durable Queues
//! Each (consuming service, topic) pair binds a durable queue named
//! `{service}.{topic}`. The name derives from nothing else, so a consumer
//! that crashes and restarts reattaches to the same queue and no messages
//! are silently dropped.

/// Order lifecycle topics published by the checkout service.
pub mod order {
    /// A new order was placed.
    pub const CREATED: &str = "order.created";
    /// An order moved to a new status (paid, shipped, cancelled, ...).
    pub const STATUS_UPDATED: &str = "order.status.updated";
}

/// Payment outcome topics published by the payments service.
pub mod payment {
    /// A payment was captured successfully.
    pub const SUCCEEDED: &str = "payment.succeeded";
    /// A payment attempt failed.
    pub const FAILED: &str = "payment.failed";
    /// A captured payment was refunded.
    pub const REFUNDED: &str = "payment.refunded";
}

/// Catalog topics published by the catalog service.
pub mod product {
    /// A product's price changed; carts holding it must re-price.
    pub const PRICE_CHANGED: &str = "product.price.changed";
}

/// Cart topics published by the cart service.
pub mod cart {
    /// A cart was handed off to checkout.
    pub const CHECKED_OUT: &str = "cart.checked_out";
}

/// Derives the durable queue name for a (consuming service, topic) pair.
///
/// The name is deterministic: redelivery after a crash reuses the same
/// queue, which is what makes at-least-once delivery hold across restarts.
pub fn queue_name(service: &str, topic: &str) -> String {
    format!("{}.{}", service, topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_name_is_deterministic() {
        assert_eq!(
            queue_name("checkout", payment::SUCCEEDED),
            "checkout.payment.succeeded"
        );
        // Same inputs, same name - restart safety depends on this.
        assert_eq!(
            queue_name("checkout", payment::SUCCEEDED),
            queue_name("checkout", payment::SUCCEEDED)
        );
    }

    #[test]
    fn test_distinct_services_get_distinct_queues() {
        assert_ne!(
            queue_name("checkout", order::CREATED),
            queue_name("analytics", order::CREATED)
        );
    }
}
