//! Correlation-id deduplication for at-least-once consumers.
//!
//! The channel may redeliver a message the service already processed (a
//! crash between handler and ack, or a nack further down the handler
//! chain). Adapters record the correlation ids they have fully processed
//! and skip duplicates, which makes their handlers idempotent without
//! touching business state.

use std::collections::{HashSet, VecDeque};

/// Bounded set of recently processed correlation ids.
///
/// Eviction is FIFO: once `capacity` ids are held, recording a new one
/// forgets the oldest. The window only needs to outlast the broker's
/// redelivery horizon, not the process lifetime.
pub struct SeenSet {
    capacity: usize,
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl SeenSet {
    pub fn new(capacity: usize) -> Self {
        SeenSet {
            capacity: capacity.max(1),
            order: VecDeque::with_capacity(capacity.max(1)),
            ids: HashSet::with_capacity(capacity.max(1)),
        }
    }

    /// Whether `correlation_id` was already recorded.
    pub fn contains(&self, correlation_id: &str) -> bool {
        self.ids.contains(correlation_id)
    }

    /// Records a fully processed correlation id, evicting the oldest entry
    /// when full. Call only after the handler succeeded, so a failed
    /// attempt is retried on redelivery.
    pub fn record(&mut self, correlation_id: &str) {
        if self.ids.contains(correlation_id) {
            return;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(correlation_id.to_string());
        self.ids.insert(correlation_id.to_string());
    }
}
