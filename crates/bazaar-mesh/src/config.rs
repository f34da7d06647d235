//! # Mesh Configuration
//!
//! Configuration for the resilience layer, supplied by the environment.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (deployment-supplied)                        │
//! │     BAZAAR_SERVICE_NAME=checkout                                       │
//! │     BAZAAR_BROKER_URL=nats://broker:4222                               │
//! │     BAZAAR_REQUEST_TIMEOUT_MS=3000                                     │
//! │     BAZAAR_BREAKER_FAILURE_THRESHOLD=5                                 │
//! │     BAZAAR_BREAKER_SUCCESS_THRESHOLD=2                                 │
//! │     BAZAAR_BREAKER_RESET_TIMEOUT_MS=30000                              │
//! │     BAZAAR_BREAKER_MONITOR_INTERVAL_MS=1000                            │
//! │     BAZAAR_RECONNECT_DELAY_MS=5000                                     │
//! │     BAZAAR_RECONNECT_MAX_ATTEMPTS=10                                   │
//! │     BAZAAR_APP_ERRORS_TRIP_BREAKER=true                                │
//! │     BAZAAR_EVENT_PREFIX=bazaar.events                                  │
//! │     BAZAAR_STREAM_NAME=BAZAAR_EVENTS                                   │
//! │                                                                         │
//! │  2. Default Values (lowest priority)                                   │
//! │     Conservative thresholds suitable for intra-cluster traffic         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No business values are hardcoded: thresholds, timeouts and addresses all
//! come from the deployment.

use std::time::Duration;

use crate::error::{MeshError, MeshResult};

// =============================================================================
// Defaults
// =============================================================================

const DEFAULT_BROKER_URL: &str = "nats://localhost:4222";
const DEFAULT_EVENT_PREFIX: &str = "bazaar.events";
const DEFAULT_STREAM_NAME: &str = "BAZAAR_EVENTS";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;
const DEFAULT_RESET_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MONITOR_INTERVAL_MS: u64 = 1_000;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 10;

// =============================================================================
// Breaker Configuration
// =============================================================================

/// Thresholds and timers for one circuit breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures in Closed before the breaker opens.
    pub failure_threshold: u32,

    /// Consecutive successes in HalfOpen before the breaker closes.
    pub success_threshold: u32,

    /// How long the breaker stays Open before probing again.
    pub reset_timeout: Duration,

    /// Poll interval of the background monitor that moves Open → HalfOpen.
    pub monitor_interval: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            reset_timeout: Duration::from_millis(DEFAULT_RESET_TIMEOUT_MS),
            monitor_interval: Duration::from_millis(DEFAULT_MONITOR_INTERVAL_MS),
        }
    }
}

impl BreakerConfig {
    /// Validates threshold sanity.
    pub fn validate(&self) -> MeshResult<()> {
        if self.failure_threshold == 0 {
            return Err(MeshError::InvalidConfig(
                "failure_threshold must be at least 1".into(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(MeshError::InvalidConfig(
                "success_threshold must be at least 1".into(),
            ));
        }
        if self.monitor_interval.is_zero() {
            return Err(MeshError::InvalidConfig(
                "monitor_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Reconnect Configuration
// =============================================================================

/// Fixed-delay, bounded reconnect policy for the event channel.
///
/// Deliberately not exponential: the broker sits on the same network
/// segment as the services, and a bounded number of evenly spaced attempts
/// gives operations a predictable time-to-fatal.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay between consecutive reconnect attempts.
    pub delay: Duration,

    /// Maximum number of attempts before the channel gives up and reports
    /// a fatal `ChannelDisconnected`.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            max_attempts: DEFAULT_RECONNECT_MAX_ATTEMPTS,
        }
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for the resilient request client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Fixed bound on every outbound request. A hang must not block the
    /// caller indefinitely; hitting the bound counts as a breaker failure.
    pub request_timeout: Duration,

    /// Whether a well-formed error response (4xx/5xx) counts as a breaker
    /// failure. Default true: the dependency produced no usable result.
    pub application_errors_trip_breaker: bool,

    /// Breaker thresholds applied to every destination.
    pub breaker: BreakerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            application_errors_trip_breaker: true,
            breaker: BreakerConfig::default(),
        }
    }
}

// =============================================================================
// Channel Configuration
// =============================================================================

/// Configuration for the durable event channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Broker connection URL.
    pub broker_url: String,

    /// Subject prefix all topics publish under (the "exchange").
    pub event_prefix: String,

    /// Name of the durable stream backing the prefix.
    pub stream_name: String,

    /// Reconnect policy.
    pub reconnect: ReconnectConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            event_prefix: DEFAULT_EVENT_PREFIX.to_string(),
            stream_name: DEFAULT_STREAM_NAME.to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

// =============================================================================
// Mesh Configuration
// =============================================================================

/// Top-level configuration for one service's mesh participation.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Logical name of this service (e.g. "checkout"). Used as the
    /// caller-identity header, envelope source and queue name prefix.
    pub service_name: String,

    /// Synchronous call configuration.
    pub client: ClientConfig,

    /// Event channel configuration.
    pub channel: ChannelConfig,
}

impl MeshConfig {
    /// Creates a config for `service_name` with defaults everywhere else.
    pub fn new(service_name: impl Into<String>) -> Self {
        MeshConfig {
            service_name: service_name.into(),
            client: ClientConfig::default(),
            channel: ChannelConfig::default(),
        }
    }

    /// Loads configuration from process environment variables.
    pub fn from_env() -> MeshResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through a lookup function.
    ///
    /// Separated from [`MeshConfig::from_env`] so parsing is testable
    /// without mutating process-global state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> MeshResult<Self> {
        let service_name = lookup("BAZAAR_SERVICE_NAME").ok_or_else(|| {
            MeshError::InvalidConfig("BAZAAR_SERVICE_NAME is not set".into())
        })?;

        let config = MeshConfig {
            service_name,
            client: ClientConfig {
                request_timeout: Duration::from_millis(parse_or(
                    &lookup,
                    "BAZAAR_REQUEST_TIMEOUT_MS",
                    DEFAULT_REQUEST_TIMEOUT_MS,
                )?),
                application_errors_trip_breaker: parse_or(
                    &lookup,
                    "BAZAAR_APP_ERRORS_TRIP_BREAKER",
                    true,
                )?,
                breaker: BreakerConfig {
                    failure_threshold: parse_or(
                        &lookup,
                        "BAZAAR_BREAKER_FAILURE_THRESHOLD",
                        DEFAULT_FAILURE_THRESHOLD,
                    )?,
                    success_threshold: parse_or(
                        &lookup,
                        "BAZAAR_BREAKER_SUCCESS_THRESHOLD",
                        DEFAULT_SUCCESS_THRESHOLD,
                    )?,
                    reset_timeout: Duration::from_millis(parse_or(
                        &lookup,
                        "BAZAAR_BREAKER_RESET_TIMEOUT_MS",
                        DEFAULT_RESET_TIMEOUT_MS,
                    )?),
                    monitor_interval: Duration::from_millis(parse_or(
                        &lookup,
                        "BAZAAR_BREAKER_MONITOR_INTERVAL_MS",
                        DEFAULT_MONITOR_INTERVAL_MS,
                    )?),
                },
            },
            channel: ChannelConfig {
                broker_url: lookup("BAZAAR_BROKER_URL")
                    .unwrap_or_else(|| DEFAULT_BROKER_URL.to_string()),
                event_prefix: lookup("BAZAAR_EVENT_PREFIX")
                    .unwrap_or_else(|| DEFAULT_EVENT_PREFIX.to_string()),
                stream_name: lookup("BAZAAR_STREAM_NAME")
                    .unwrap_or_else(|| DEFAULT_STREAM_NAME.to_string()),
                reconnect: ReconnectConfig {
                    delay: Duration::from_millis(parse_or(
                        &lookup,
                        "BAZAAR_RECONNECT_DELAY_MS",
                        DEFAULT_RECONNECT_DELAY_MS,
                    )?),
                    max_attempts: parse_or(
                        &lookup,
                        "BAZAAR_RECONNECT_MAX_ATTEMPTS",
                        DEFAULT_RECONNECT_MAX_ATTEMPTS,
                    )?,
                },
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the whole configuration tree.
    pub fn validate(&self) -> MeshResult<()> {
        if self.service_name.trim().is_empty() {
            return Err(MeshError::InvalidConfig("service_name is empty".into()));
        }
        if self.channel.event_prefix.trim().is_empty() {
            return Err(MeshError::InvalidConfig("event_prefix is empty".into()));
        }
        self.client.breaker.validate()
    }
}

/// Parses an optional env value, falling back to `default` when unset.
fn parse_or<T: std::str::FromStr>(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> MeshResult<T> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            MeshError::InvalidConfig(format!("{} has unparseable value '{}'", key, raw))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_defaults_applied_when_only_name_set() {
        let config = MeshConfig::from_lookup(env(&[("BAZAAR_SERVICE_NAME", "checkout")])).unwrap();

        assert_eq!(config.service_name, "checkout");
        assert_eq!(config.channel.broker_url, DEFAULT_BROKER_URL);
        assert_eq!(config.client.breaker.failure_threshold, 5);
        assert!(config.client.application_errors_trip_breaker);
        assert_eq!(config.channel.reconnect.max_attempts, 10);
    }

    #[test]
    fn test_missing_service_name_is_an_error() {
        let err = MeshConfig::from_lookup(env(&[])).unwrap_err();
        assert!(matches!(err, MeshError::InvalidConfig(_)));
    }

    #[test]
    fn test_env_overrides_are_parsed() {
        let config = MeshConfig::from_lookup(env(&[
            ("BAZAAR_SERVICE_NAME", "payments"),
            ("BAZAAR_BROKER_URL", "nats://broker:4222"),
            ("BAZAAR_REQUEST_TIMEOUT_MS", "1500"),
            ("BAZAAR_BREAKER_FAILURE_THRESHOLD", "3"),
            ("BAZAAR_APP_ERRORS_TRIP_BREAKER", "false"),
            ("BAZAAR_RECONNECT_MAX_ATTEMPTS", "4"),
        ]))
        .unwrap();

        assert_eq!(config.channel.broker_url, "nats://broker:4222");
        assert_eq!(config.client.request_timeout, Duration::from_millis(1500));
        assert_eq!(config.client.breaker.failure_threshold, 3);
        assert!(!config.client.application_errors_trip_breaker);
        assert_eq!(config.channel.reconnect.max_attempts, 4);
    }

    #[test]
    fn test_unparseable_value_is_rejected() {
        let err = MeshConfig::from_lookup(env(&[
            ("BAZAAR_SERVICE_NAME", "cart"),
            ("BAZAAR_REQUEST_TIMEOUT_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("BAZAAR_REQUEST_TIMEOUT_MS"));
    }

    #[test]
    fn test_zero_threshold_fails_validation() {
        let mut config = MeshConfig::new("cart");
        config.client.breaker.failure_threshold = 0;
        assert!(config.validate().is_err());
    }
}
