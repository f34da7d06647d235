//! # Mesh Error Types
//!
//! Error types for inter-service communication.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Mesh Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Synchronous    │  │   Channel       │  │     Local               │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  BreakerOpen    │  │  ChannelDiscon- │  │  InvalidConfig          │ │
//! │  │  ServiceUnres.  │  │    nected       │  │  Serialization          │ │
//! │  │  Transport      │  │  Handler        │  │  Internal               │ │
//! │  │  Timeout        │  │                 │  │                         │ │
//! │  │  Application    │  │                 │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! - Every failure either changes breaker/channel state deterministically
//!   or is re-raised to the caller; nothing is swallowed
//! - Transport vs Application classification is explicit: ambiguity here
//!   would make breaker behavior nondeterministic
//! - All errors are `Send + Sync` for async compatibility

use thiserror::Error;

/// Result type alias for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

/// Mesh error type covering synchronous calls, the event channel and
/// local configuration.
#[derive(Debug, Error)]
pub enum MeshError {
    // =========================================================================
    // Synchronous Call Errors
    // =========================================================================
    /// The destination's circuit breaker is open; the call was rejected
    /// without touching the network. Callers must apply their own fallback
    /// (cached data, degraded response). Never retried by the mesh.
    #[error("Circuit breaker open for service '{service}'")]
    BreakerOpen { service: String },

    /// The logical service name is not registered in the directory.
    /// A configuration/deployment problem - fatal to the calling operation.
    #[error("Service '{service}' could not be resolved to an address")]
    ServiceUnresolved { service: String },

    /// Network-level failure: connect refused, reset, DNS, broker I/O.
    /// Recorded as a breaker failure. Callers may retry at their own
    /// discretion; the mesh performs no automatic retry.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The call exceeded the fixed request timeout.
    /// Counts as a breaker failure.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// The callee answered with a well-formed error response.
    /// Whether this trips the breaker is a client policy choice
    /// (`application_errors_trip_breaker`).
    #[error("Service returned error status {status}")]
    Application { status: u16, body: String },

    // =========================================================================
    // Event Channel Errors
    // =========================================================================
    /// Reconnect attempts were exhausted. Fatal for this process: the
    /// service can no longer participate in asynchronous workflows and
    /// operational monitoring must be alerted.
    #[error("Broker connection lost after {attempts} reconnect attempts")]
    ChannelDisconnected { attempts: u32 },

    /// A subscriber's handler failed; the message was negatively
    /// acknowledged so the broker redelivers it.
    #[error("Handler for topic '{topic}' failed: {reason}")]
    Handler { topic: String, reason: String },

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// Invalid mesh configuration.
    #[error("Invalid mesh configuration: {0}")]
    InvalidConfig(String),

    /// Failed to (de)serialize an envelope or body.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Internal channel/task plumbing failed.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        MeshError::Serialization(err.to_string())
    }
}

impl From<bazaar_core::EnvelopeError> for MeshError {
    fn from(err: bazaar_core::EnvelopeError) -> Self {
        MeshError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for MeshError {
    fn from(err: url::ParseError) -> Self {
        MeshError::InvalidConfig(format!("invalid url: {}", err))
    }
}

impl From<reqwest::Error> for MeshError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // The concrete timeout value is reported by the caller, which
            // knows the configured bound.
            MeshError::Transport(format!("timeout: {}", err))
        } else {
            MeshError::Transport(err.to_string())
        }
    }
}

// =============================================================================
// Error Categorization (for breaker accounting and retry logic)
// =============================================================================

impl MeshError {
    /// Returns true if this error reflects a dependency that produced no
    /// usable result over the network.
    pub fn is_transport(&self) -> bool {
        matches!(self, MeshError::Transport(_) | MeshError::Timeout(_))
    }

    /// Returns true if this is a well-formed error response from the callee.
    pub fn is_application(&self) -> bool {
        matches!(self, MeshError::Application { .. })
    }

    /// Returns true if the caller may reasonably retry the operation.
    ///
    /// Breaker rejections and unresolved services are deliberately not
    /// retryable: the former has its own recovery cycle, the latter is a
    /// deployment problem.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MeshError::Transport(_) | MeshError::Timeout(_))
    }

    /// Returns true if this is a fatal, process-level condition that must
    /// be surfaced to operational monitoring.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MeshError::ChannelDisconnected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(MeshError::Transport("connection refused".into()).is_transport());
        assert!(MeshError::Timeout(3000).is_transport());
        assert!(!MeshError::Application { status: 422, body: String::new() }.is_transport());
    }

    #[test]
    fn test_retryable_errors() {
        assert!(MeshError::Transport("reset".into()).is_retryable());
        assert!(MeshError::Timeout(3000).is_retryable());

        assert!(!MeshError::BreakerOpen { service: "catalog".into() }.is_retryable());
        assert!(!MeshError::ServiceUnresolved { service: "ghost".into() }.is_retryable());
        assert!(!MeshError::InvalidConfig("bad".into()).is_retryable());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(MeshError::ChannelDisconnected { attempts: 10 }.is_fatal());
        assert!(!MeshError::Transport("reset".into()).is_fatal());
    }

    #[test]
    fn test_error_display_includes_context() {
        let err = MeshError::BreakerOpen { service: "payments".into() };
        assert!(err.to_string().contains("payments"));

        let err = MeshError::Application { status: 409, body: "conflict".into() };
        assert!(err.to_string().contains("409"));
    }
}
