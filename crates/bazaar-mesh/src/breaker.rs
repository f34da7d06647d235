//! # Circuit Breaker
//!
//! Protects a caller from repeatedly invoking a failing dependency, and
//! automatically probes for recovery.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Circuit Breaker States                              │
//! │                                                                         │
//! │  ┌────────────┐  failure_threshold     ┌────────────┐                  │
//! │  │   Closed   │  consecutive failures  │    Open    │                  │
//! │  │ (pass all) │ ─────────────────────► │ (fail fast)│                  │
//! │  └────────────┘                        └─────┬──────┘                  │
//! │        ▲                                     │                          │
//! │        │ success_threshold                   │ monitor tick after       │
//! │        │ consecutive successes               │ reset_timeout elapsed    │
//! │        │                                     ▼                          │
//! │        │                               ┌────────────┐                  │
//! │        └────────────────────────────── │  HalfOpen  │                  │
//! │                                        │  (probing) │                  │
//! │                 any single failure ──► │            │ ──► back to Open │
//! │                                        └────────────┘                  │
//! │                                                                         │
//! │  One breaker per (caller, dependency) pair - a failing catalog         │
//! │  service must not trip calls to payments.                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The Open → HalfOpen transition is driven by a background monitor task
//! polling at a fixed interval, independent of call traffic. The monitor is
//! a real timer resource: call [`CircuitBreaker::shutdown`] on service
//! shutdown so it does not outlive the breaker's useful life.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;
use crate::error::{MeshError, MeshResult};

// =============================================================================
// Circuit State
// =============================================================================

/// The three breaker states. Exactly one is active per breaker instance;
/// transitions happen only via recorded call outcomes or the monitor timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation: calls pass through, failures are counted.
    Closed,
    /// Dependency presumed unhealthy: calls are rejected without being
    /// invoked.
    Open,
    /// Probe mode: calls pass through while the breaker gathers evidence
    /// of recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

// =============================================================================
// Observer
// =============================================================================

/// Callback invoked on every state transition: `(breaker_name, old, new)`.
///
/// Used for logging/alerting; must not block.
pub type StateObserver = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

// =============================================================================
// Breaker Internals
// =============================================================================

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Consecutive failures while Closed.
    consecutive_failures: u32,
    /// Consecutive successes while HalfOpen; meaningless in other states.
    consecutive_successes: u32,
    /// When the most recent failure was recorded.
    last_failure_at: Option<Instant>,
}

impl BreakerInner {
    fn new() -> Self {
        BreakerInner {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_failure_at: None,
        }
    }
}

// =============================================================================
// Circuit Breaker
// =============================================================================

/// A per-dependency circuit breaker.
///
/// Created once per (caller, dependency) pair at service start and lives
/// for the process lifetime.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
    observer: Option<StateObserver>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl CircuitBreaker {
    /// Creates a breaker named after its protected dependency and spawns
    /// its recovery monitor.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_observer(name, config, None)
    }

    /// Creates a breaker with a transition observer.
    pub fn with_observer(
        name: impl Into<String>,
        config: BreakerConfig,
        observer: Option<StateObserver>,
    ) -> Self {
        let name = name.into();
        let inner = Arc::new(Mutex::new(BreakerInner::new()));
        let monitor = spawn_monitor(
            name.clone(),
            config.clone(),
            inner.clone(),
            observer.clone(),
        );

        CircuitBreaker {
            name,
            config,
            inner,
            observer,
            monitor: Mutex::new(Some(monitor)),
        }
    }

    /// Executes `fut` through the breaker. Any `Err` counts as a failure.
    ///
    /// In Open state the future is dropped without being polled and the
    /// call fails immediately with [`MeshError::BreakerOpen`].
    pub async fn execute<T, F>(&self, fut: F) -> MeshResult<T>
    where
        F: Future<Output = MeshResult<T>>,
    {
        self.execute_classified(fut, |_| true).await
    }

    /// Executes `fut` through the breaker with caller-supplied failure
    /// classification.
    ///
    /// An `Err` for which `counts_as_failure` returns false is treated as
    /// evidence the dependency is alive (it answered), so it resets the
    /// failure streak exactly like a success, and is then re-raised.
    pub async fn execute_classified<T, F>(
        &self,
        fut: F,
        counts_as_failure: impl Fn(&MeshError) -> bool,
    ) -> MeshResult<T>
    where
        F: Future<Output = MeshResult<T>>,
    {
        if self.state() == CircuitState::Open {
            debug!(breaker = %self.name, "Rejecting call: breaker open");
            return Err(MeshError::BreakerOpen {
                service: self.name.clone(),
            });
        }

        match fut.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if counts_as_failure(&err) {
                    self.record_failure();
                } else {
                    self.record_success();
                }
                Err(err)
            }
        }
    }

    /// Returns the current state. Pure observer: no side effects.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    /// Forces the breaker Closed and clears all counters.
    ///
    /// Administrative override, e.g. after a known-good deploy of the
    /// dependency.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock().expect("breaker lock poisoned");
            let old = inner.state;
            inner.state = CircuitState::Closed;
            inner.consecutive_failures = 0;
            inner.consecutive_successes = 0;
            inner.last_failure_at = None;
            (old != CircuitState::Closed).then_some((old, CircuitState::Closed))
        };
        if let Some((old, new)) = transition {
            info!(breaker = %self.name, from = %old, to = %new, "Breaker reset");
            self.notify(old, new);
        }
    }

    /// Stops the recovery monitor. Must be called on shutdown so the
    /// periodic timer does not leak.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .monitor
            .lock()
            .expect("breaker monitor lock poisoned")
            .take()
        {
            handle.abort();
        }
    }

    // -------------------------------------------------------------------------
    // Outcome recording
    // -------------------------------------------------------------------------

    fn record_success(&self) {
        let transition = {
            let mut inner = self.inner.lock().expect("breaker lock poisoned");
            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= self.config.success_threshold {
                        inner.state = CircuitState::Closed;
                        inner.consecutive_failures = 0;
                        inner.consecutive_successes = 0;
                        inner.last_failure_at = None;
                        Some((CircuitState::HalfOpen, CircuitState::Closed))
                    } else {
                        None
                    }
                }
                // A success completing after the breaker opened carries no
                // signal we act on.
                CircuitState::Open => None,
            }
        };
        if let Some((old, new)) = transition {
            info!(breaker = %self.name, from = %old, to = %new, "Dependency recovered");
            self.notify(old, new);
        }
    }

    fn record_failure(&self) {
        let transition = {
            let mut inner = self.inner.lock().expect("breaker lock poisoned");
            inner.last_failure_at = Some(Instant::now());
            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures += 1;
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        inner.state = CircuitState::Open;
                        Some((CircuitState::Closed, CircuitState::Open))
                    } else {
                        None
                    }
                }
                // A single failed probe reopens immediately; it does not
                // wait for failure_threshold.
                CircuitState::HalfOpen => {
                    inner.state = CircuitState::Open;
                    inner.consecutive_successes = 0;
                    Some((CircuitState::HalfOpen, CircuitState::Open))
                }
                CircuitState::Open => None,
            }
        };
        if let Some((old, new)) = transition {
            warn!(breaker = %self.name, from = %old, to = %new, "Breaker opened");
            self.notify(old, new);
        }
    }

    fn notify(&self, old: CircuitState, new: CircuitState) {
        if let Some(observer) = &self.observer {
            observer(&self.name, old, new);
        }
    }
}

impl Drop for CircuitBreaker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Recovery Monitor
// =============================================================================

/// Spawns the periodic task that moves an Open breaker to HalfOpen once
/// `reset_timeout` has elapsed since the last recorded failure.
fn spawn_monitor(
    name: String,
    config: BreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
    observer: Option<StateObserver>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(config.monitor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let transition = {
                let mut guard = inner.lock().expect("breaker lock poisoned");
                let elapsed_enough = matches!(
                    guard.last_failure_at,
                    Some(at) if at.elapsed() >= config.reset_timeout
                );
                if guard.state == CircuitState::Open && elapsed_enough {
                    guard.state = CircuitState::HalfOpen;
                    guard.consecutive_successes = 0;
                    Some((CircuitState::Open, CircuitState::HalfOpen))
                } else {
                    None
                }
            };

            if let Some((old, new)) = transition {
                info!(breaker = %name, from = %old, to = %new, "Probing for recovery");
                if let Some(observer) = &observer {
                    observer(&name, old, new);
                }
            }
        }
    })
}
