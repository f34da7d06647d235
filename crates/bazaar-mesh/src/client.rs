//! # Resilient Request Client
//!
//! Synchronous service-to-service calls by logical name, shielded by a
//! circuit breaker per destination.
//!
//! ## Call Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Resilient Call Path                                │
//! │                                                                         │
//! │  call("catalog", "/products/42", GET)                                   │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌───────────────┐  unknown name   ┌──────────────────────┐            │
//! │  │ Directory     │ ──────────────► │ ServiceUnresolved     │            │
//! │  │ resolve()     │                 │ (fatal, not retried)  │            │
//! │  └──────┬────────┘                 └──────────────────────┘            │
//! │         ▼                                                               │
//! │  ┌───────────────┐  open           ┌──────────────────────┐            │
//! │  │ Breaker for   │ ──────────────► │ BreakerOpen           │            │
//! │  │ "catalog"     │                 │ (no network attempt)  │            │
//! │  └──────┬────────┘                 └──────────────────────┘            │
//! │         ▼                                                               │
//! │  ┌───────────────┐  timeout/reset  ┌──────────────────────┐            │
//! │  │ HTTP request  │ ──────────────► │ Transport / Timeout   │            │
//! │  │ (fixed bound) │  non-2xx        │ Application {status}  │            │
//! │  └──────┬────────┘                 └──────────────────────┘            │
//! │         ▼                                                               │
//! │  ServiceResponse { status, data, headers }                              │
//! │                                                                         │
//! │  One breaker per destination: a failing catalog never trips payments.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Error classification is deterministic: anything that kept the callee
//! from producing a response is `Transport`/`Timeout`; a well-formed non-2xx
//! response is `Application`. Whether application errors feed the breaker
//! is the `application_errors_trip_breaker` policy flag.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Method;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::breaker::{CircuitBreaker, CircuitState, StateObserver};
use crate::config::ClientConfig;
use crate::directory::ServiceDirectory;
use crate::error::{MeshError, MeshResult};

/// Header carrying the caller's logical service name.
pub const CALLER_HEADER: &str = "x-calling-service";

/// Cap on error-body bytes carried inside an `Application` error.
const MAX_ERROR_BODY: usize = 2048;

// =============================================================================
// Response
// =============================================================================

/// A completed response from another service.
#[derive(Debug, Clone)]
pub struct ServiceResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body; non-JSON bodies arrive as a JSON string.
    pub data: serde_json::Value,
    /// Response headers.
    pub headers: HashMap<String, String>,
}

// =============================================================================
// Resilient Client
// =============================================================================

/// Performs synchronous calls to other services by logical name.
///
/// Holds one lazily created [`CircuitBreaker`] per destination. Call
/// [`ResilientClient::shutdown`] on service shutdown to stop the breakers'
/// recovery monitors.
pub struct ResilientClient {
    service_name: String,
    config: ClientConfig,
    directory: Arc<dyn ServiceDirectory>,
    http: reqwest::Client,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    observer: Option<StateObserver>,
}

impl ResilientClient {
    /// Creates a client identifying itself as `service_name`.
    pub fn new(
        service_name: impl Into<String>,
        config: ClientConfig,
        directory: Arc<dyn ServiceDirectory>,
    ) -> MeshResult<Self> {
        Self::with_observer(service_name, config, directory, None)
    }

    /// Creates a client whose breakers report transitions to `observer`.
    pub fn with_observer(
        service_name: impl Into<String>,
        config: ClientConfig,
        directory: Arc<dyn ServiceDirectory>,
        observer: Option<StateObserver>,
    ) -> MeshResult<Self> {
        config.breaker.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MeshError::Internal(format!("http client init failed: {}", e)))?;

        Ok(ResilientClient {
            service_name: service_name.into(),
            config,
            directory,
            http,
            breakers: RwLock::new(HashMap::new()),
            observer,
        })
    }

    /// Calls `endpoint` on the service registered as `service`.
    ///
    /// The caller-identity header and any pass-through `headers` are
    /// injected into the outbound request. The call is bounded by the
    /// configured request timeout and accounted against the destination's
    /// breaker.
    pub async fn call(
        &self,
        service: &str,
        endpoint: &str,
        method: Method,
        body: Option<serde_json::Value>,
        headers: Option<HashMap<String, String>>,
    ) -> MeshResult<ServiceResponse> {
        // Resolution failures are deployment problems; they are surfaced
        // before the breaker so they never count against the dependency.
        let base = self.directory.resolve(service).await?;
        let breaker = self.breaker_for(service).await;

        let app_errors_trip = self.config.application_errors_trip_breaker;
        let result = breaker
            .execute_classified(
                self.perform(&base, endpoint, method.clone(), body, headers),
                move |err| err.is_transport() || (app_errors_trip && err.is_application()),
            )
            .await;

        if let Err(err) = &result {
            warn!(
                caller = %self.service_name,
                service = %service,
                endpoint = %endpoint,
                method = %method,
                error = %err,
                "Outbound call failed"
            );
        }
        result
    }

    /// `GET` without a body.
    pub async fn get(&self, service: &str, endpoint: &str) -> MeshResult<ServiceResponse> {
        self.call(service, endpoint, Method::GET, None, None).await
    }

    /// `POST` with a JSON body.
    pub async fn post(
        &self,
        service: &str,
        endpoint: &str,
        body: serde_json::Value,
    ) -> MeshResult<ServiceResponse> {
        self.call(service, endpoint, Method::POST, Some(body), None)
            .await
    }

    /// Current breaker state for a destination, if a call has created one.
    pub async fn breaker_state(&self, service: &str) -> Option<CircuitState> {
        self.breakers.read().await.get(service).map(|b| b.state())
    }

    /// Forces a destination's breaker Closed (administrative override).
    pub async fn reset_breaker(&self, service: &str) {
        if let Some(breaker) = self.breakers.read().await.get(service) {
            breaker.reset();
        }
    }

    /// Stops every destination breaker's recovery monitor.
    pub async fn shutdown(&self) {
        for breaker in self.breakers.read().await.values() {
            breaker.shutdown();
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Returns the breaker guarding `service`, creating it on first use.
    async fn breaker_for(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(service) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                debug!(caller = %self.service_name, service = %service, "Creating breaker");
                Arc::new(CircuitBreaker::with_observer(
                    service,
                    self.config.breaker.clone(),
                    self.observer.clone(),
                ))
            })
            .clone()
    }

    /// Builds and sends the outbound request, classifying the outcome.
    async fn perform(
        &self,
        base: &Url,
        endpoint: &str,
        method: Method,
        body: Option<serde_json::Value>,
        headers: Option<HashMap<String, String>>,
    ) -> MeshResult<ServiceResponse> {
        let url = join_endpoint(base, endpoint);

        let mut request = self
            .http
            .request(method, url)
            .header(CALLER_HEADER, &self.service_name);
        if let Some(headers) = headers {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                MeshError::Timeout(self.config.request_timeout.as_millis() as u64)
            } else {
                MeshError::Transport(err.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let response_headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        // Reading the body is still network I/O.
        let text = response.text().await.map_err(|err| {
            if err.is_timeout() {
                MeshError::Timeout(self.config.request_timeout.as_millis() as u64)
            } else {
                MeshError::Transport(err.to_string())
            }
        })?;

        if !(200..300).contains(&status) {
            return Err(MeshError::Application {
                status,
                body: clip_error_body(text),
            });
        }

        let data = if text.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        };

        Ok(ServiceResponse {
            status,
            data,
            headers: response_headers,
        })
    }
}

/// Caps an error body at [`MAX_ERROR_BODY`] bytes, backing off to the
/// nearest char boundary so multibyte text never splits mid-character.
fn clip_error_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

/// Joins a base address and an endpoint path without double slashes.
fn join_endpoint(base: &Url, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}
