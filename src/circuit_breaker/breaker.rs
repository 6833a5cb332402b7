use super::types::{CallError, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use crate::metrics;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker guarding calls to one dependency.
///
/// State is process-local; every instance decides on its own when to stop
/// calling the store. The lock is never held across an await point.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<Mutex<State>>,
    name: Arc<str>,
}

#[derive(Debug)]
struct State {
    circuit_state: CircuitState,
    /// Bumped on every transition
    generation: u64,
    /// Consecutive failures in closed state
    consecutive_failures: u32,
    /// Consecutive successes in half-open state
    consecutive_successes: u32,
    /// Half-open probes in flight
    half_open_requests: u32,
    opened_at: Option<Instant>,
    metrics: CircuitBreakerMetrics,
}

/// Admission to make one call.
///
/// A half-open probe slot is held until the outcome is recorded. If the
/// permit is dropped first (the caller's future was cancelled), the slot is
/// handed back so later calls can still probe.
#[must_use]
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    /// Generation of the half-open period this probe belongs to
    probe: Option<u64>,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.probe.take() {
            self.breaker.abandon_probe(generation);
        }
    }
}

enum Outcome {
    Success,
    Failure,
    Timeout,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name: String = name.into();
        info!(
            breaker = %name,
            failure_threshold = config.failure_threshold,
            success_threshold = config.success_threshold,
            open_secs = config.open_secs,
            call_timeout_ms = config.call_timeout_ms,
            "Creating circuit breaker"
        );
        metrics::record_circuit_breaker_state(&name, CircuitState::Closed);

        Self {
            config,
            state: Arc::new(Mutex::new(State {
                circuit_state: CircuitState::Closed,
                generation: 0,
                consecutive_failures: 0,
                consecutive_successes: 0,
                half_open_requests: 0,
                opened_at: None,
                metrics: CircuitBreakerMetrics::default(),
            })),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `fut` under the breaker.
    ///
    /// Rejected without polling when open; bounded by the configured call
    /// timeout otherwise. Timeouts and errors count as failures. Dropping the
    /// returned future mid-call releases any half-open slot it held.
    pub async fn call<T, E, F>(&self, fut: F) -> Result<T, CallError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.try_acquire() else {
            return Err(CallError::Open);
        };

        let timeout = self.config.call_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => {
                self.record(permit, Outcome::Success);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record(permit, Outcome::Failure);
                Err(CallError::Inner(e))
            }
            Err(_) => {
                self.record(permit, Outcome::Timeout);
                Err(CallError::Timeout(timeout))
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().circuit_state
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.lock().metrics.clone()
    }

    // Counters stay consistent even if a holder panicked
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut state = self.lock();

        match state.circuit_state {
            CircuitState::Closed => {
                state.metrics.total_requests += 1;
                Some(Permit {
                    breaker: self,
                    probe: None,
                })
            }
            CircuitState::Open => {
                let Some(opened_at) = state.opened_at else {
                    warn!(breaker = %self.name, "Circuit open but no opened_at timestamp");
                    return None;
                };

                if opened_at.elapsed() >= self.config.open_duration() {
                    self.transition(&mut state, CircuitState::HalfOpen);
                    Some(self.admit_probe(&mut state))
                } else {
                    state.metrics.rejected_requests += 1;
                    debug!(
                        breaker = %self.name,
                        time_remaining = ?self.config.open_duration().saturating_sub(opened_at.elapsed()),
                        "Circuit breaker open, skipping call"
                    );
                    None
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_requests < self.config.half_open_requests {
                    let permit = self.admit_probe(&mut state);
                    debug!(
                        breaker = %self.name,
                        half_open_requests = state.half_open_requests,
                        max = self.config.half_open_requests,
                        "Allowing half-open probe"
                    );
                    Some(permit)
                } else {
                    state.metrics.rejected_requests += 1;
                    debug!(breaker = %self.name, "Max half-open probes in flight, rejecting");
                    None
                }
            }
        }
    }

    fn admit_probe(&self, state: &mut State) -> Permit<'_> {
        state.metrics.total_requests += 1;
        state.half_open_requests += 1;
        Permit {
            breaker: self,
            probe: Some(state.generation),
        }
    }

    fn abandon_probe(&self, generation: u64) {
        let mut state = self.lock();
        if Self::release_probe(&mut state, generation) {
            debug!(breaker = %self.name, "Half-open probe cancelled, slot released");
        }
    }

    /// Returns true if the slot still belonged to the current half-open period
    fn release_probe(state: &mut State, generation: u64) -> bool {
        if state.circuit_state == CircuitState::HalfOpen && state.generation == generation {
            state.half_open_requests = state.half_open_requests.saturating_sub(1);
            true
        } else {
            false
        }
    }

    fn record(&self, mut permit: Permit<'_>, outcome: Outcome) {
        let mut state = self.lock();
        if let Some(generation) = permit.probe.take() {
            Self::release_probe(&mut state, generation);
        }

        match outcome {
            Outcome::Success => self.on_success(&mut state),
            Outcome::Failure => self.on_failure(&mut state),
            Outcome::Timeout => {
                state.metrics.timeout_count += 1;
                self.on_failure(&mut state);
            }
        }
    }

    fn on_success(&self, state: &mut State) {
        state.metrics.successful_requests += 1;

        match state.circuit_state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes += 1;

                debug!(
                    breaker = %self.name,
                    consecutive_successes = state.consecutive_successes,
                    threshold = self.config.success_threshold,
                    "Half-open probe succeeded"
                );

                if state.consecutive_successes >= self.config.success_threshold {
                    self.transition(state, CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened completed late
                debug!(breaker = %self.name, "Recording success in open state");
            }
        }
    }

    fn on_failure(&self, state: &mut State) {
        state.metrics.failed_requests += 1;

        match state.circuit_state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;

                debug!(
                    breaker = %self.name,
                    consecutive_failures = state.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "Call failed in closed state"
                );

                if state.consecutive_failures >= self.config.failure_threshold {
                    self.transition(state, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "Half-open probe failed, reopening circuit");
                self.transition(state, CircuitState::Open);
            }
            CircuitState::Open => {
                debug!(breaker = %self.name, "Recording failure in open state");
            }
        }
    }

    fn transition(&self, state: &mut State, to: CircuitState) {
        let from = state.circuit_state;
        info!(
            breaker = %self.name,
            from = %from,
            to = %to,
            consecutive_failures = state.consecutive_failures,
            consecutive_successes = state.consecutive_successes,
            "Circuit breaker state change"
        );

        state.circuit_state = to;
        state.generation += 1;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.half_open_requests = 0;

        match to {
            CircuitState::Open => {
                state.opened_at = Some(Instant::now());
                state.metrics.circuit_opened_count += 1;
            }
            CircuitState::HalfOpen => {
                state.metrics.circuit_half_opened_count += 1;
            }
            CircuitState::Closed => {
                state.opened_at = None;
                state.metrics.circuit_closed_count += 1;
            }
        }

        metrics::record_circuit_breaker_transition(&self.name, from, to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
        CircuitBreaker::new("test-store", config)
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<(), CallError<&'static str>> {
        cb.call(async { Ok(()) }).await
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), CallError<&'static str>> {
        cb.call(async { Err("down") }).await
    }

    async fn open(cb: &CircuitBreaker, failures: u32) {
        for _ in 0..failures {
            assert!(matches!(fail(cb).await, Err(CallError::Inner(_))));
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_circuit_breaker_starts_closed() {
        let cb = breaker(CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.name(), "test-store");
        assert!(succeed(&cb).await.is_ok());
    }

    #[tokio::test]
    async fn test_circuit_opens_after_threshold_failures() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        open(&cb, 3).await;
        assert!(matches!(succeed(&cb).await, Err(CallError::Open)));
    }

    #[tokio::test]
    async fn test_circuit_resets_on_success() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            ..Default::default()
        });

        for _ in 0..2 {
            let _ = fail(&cb).await;
        }
        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);

        open(&cb, 3).await;
    }

    #[tokio::test]
    async fn test_half_open_allows_limited_probes() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            half_open_requests: 2,
            open_secs: 0,
            ..Default::default()
        });

        open(&cb, 2).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let first = cb.try_acquire();
        assert!(first.is_some());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        let second = cb.try_acquire();
        assert!(second.is_some());
        assert!(cb.try_acquire().is_none());
    }

    #[tokio::test]
    async fn test_half_open_closes_on_success() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 2,
            half_open_requests: 3,
            open_secs: 0,
            ..Default::default()
        });

        open(&cb, 2).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_reopens_on_failure() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            open_secs: 0,
            ..Default::default()
        });

        open(&cb, 2).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.metrics().circuit_half_opened_count, 1);
    }

    #[tokio::test]
    async fn test_cancelled_call_releases_half_open_slot() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            half_open_requests: 1,
            open_secs: 0,
            call_timeout_ms: 500,
        });

        open(&cb, 1).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Caller gives up before the store answers
        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            cb.call(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, &'static str>(())
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(succeed(&cb).await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_stale_permit_does_not_free_newer_slot() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            half_open_requests: 2,
            open_secs: 0,
            ..Default::default()
        });

        open(&cb, 1).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let stale = cb.try_acquire();
        assert!(stale.is_some());
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let first = cb.try_acquire();
        let second = cb.try_acquire();
        assert!(first.is_some() && second.is_some());

        drop(stale);
        assert!(cb.try_acquire().is_none());
    }

    #[tokio::test]
    async fn test_call_passes_through_value_and_error() {
        let cb = breaker(CircuitBreakerConfig::default());

        let ok: Result<u32, CallError<String>> = cb.call(async { Ok::<_, String>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = cb.call(async { Err::<u32, _>("down".to_string()) }).await;
        assert!(matches!(err, Err(CallError::Inner(ref e)) if e == "down"));

        let metrics = cb.metrics();
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_call_times_out_and_opens() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            call_timeout_ms: 20,
            ..Default::default()
        });

        for _ in 0..2 {
            let result = cb
                .call(futures::future::pending::<Result<(), String>>())
                .await;
            assert!(matches!(result, Err(CallError::Timeout(_))));
        }

        assert_eq!(cb.state(), CircuitState::Open);
        let skipped = cb.call(async { Ok::<_, String>(()) }).await;
        assert!(matches!(skipped, Err(CallError::Open)));

        let metrics = cb.metrics();
        assert_eq!(metrics.timeout_count, 2);
        assert_eq!(metrics.rejected_requests, 1);
        assert_eq!(metrics.circuit_opened_count, 1);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let cb = breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let other = cb.clone();

        let _ = fail(&cb).await;
        assert_eq!(other.state(), CircuitState::Open);
    }
}
