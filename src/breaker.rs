//! Three-state circuit breaker guarding one downstream dependency.
//!
//! Closed: calls pass through and failures are counted over a rolling window.
//! Open: calls are rejected outright until the reset timeout elapses, at which
//! point the next call flips the breaker to half-open and runs as a probe.
//! Half-open: up to `success_threshold` probes run at a time and excess
//! callers are rejected; a failure reopens immediately; enough consecutive
//! successes close. Counters reset on every transition.
//!
//! State transitions are atomic with respect to the counters they read: all
//! state lives behind one mutex that is never held across the wrapped await.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::BreakerConfig;
use crate::error::BreakerError;
use crate::telemetry::{MetricsSink, NoopMetrics};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; calls pass through.
    Closed,
    /// Dependency considered down; calls rejected until the reset timeout.
    Open,
    /// Probation; limited probe calls decide whether to close or reopen.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half-open"),
        }
    }
}

/// Point-in-time view of a breaker for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    /// Failures currently inside the rolling window (closed state only).
    pub failure_count: u32,
    /// Consecutive half-open probe successes.
    pub success_count: u32,
}

struct Inner {
    state: CircuitState,
    /// Timestamps of recorded failures, oldest first. Pruned to the
    /// configured failure window.
    failures: VecDeque<Instant>,
    success_count: u32,
    /// Half-open probes currently in flight, capped at `success_threshold`.
    probes_in_flight: u32,
    last_transition: Instant,
}

/// Circuit breaker for a single named dependency.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    metrics: Arc<dyn MetricsSink>,
}

impl CircuitBreaker {
    /// Create a new breaker in the closed state.
    #[must_use]
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_metrics(name, config, Arc::new(NoopMetrics))
    }

    /// Create a new breaker reporting transitions to `metrics`.
    #[must_use]
    pub fn with_metrics(
        name: impl Into<String>,
        config: BreakerConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                success_count: 0,
                probes_in_flight: 0,
                last_transition: Instant::now(),
            }),
            metrics,
        }
    }

    /// The dependency name this breaker guards.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `operation` through the breaker.
    ///
    /// Success passes the value through and feeds the half-open success
    /// counter. An inner failure is recorded and re-raised unchanged as
    /// [`BreakerError::Inner`]. While open and before the reset timeout the
    /// operation is never polled and [`BreakerError::Open`] is returned; the
    /// first call after the timeout moves the breaker to half-open and runs
    /// as a probe.
    pub async fn execute<T, E, F>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if !self.admit() {
            self.metrics.increment_counter("breaker.rejected");
            return Err(BreakerError::Open);
        }

        match operation.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Observability snapshot of state and counters.
    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.prune_failures(&mut inner, now);
        BreakerSnapshot {
            state: inner.state,
            failure_count: u32::try_from(inner.failures.len()).unwrap_or(u32::MAX),
            success_count: inner.success_count,
        }
    }

    /// Decide whether a call may proceed, moving open -> half-open when the
    /// reset timeout has elapsed.
    fn admit(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if inner.probes_in_flight < self.config.success_threshold {
                    inner.probes_in_flight += 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::Open => {
                if inner.last_transition.elapsed() >= self.config.reset_timeout() {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probes_in_flight = 1;
                    debug!(breaker = %self.name, "allowing probe call");
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    self.transition(&mut inner, CircuitState::Closed);
                    info!(breaker = %self.name, "circuit closed after successful probes");
                    self.metrics.increment_counter("breaker.closed");
                }
            }
            // A closed-state success does not reset the window counter;
            // failures simply age out of the rolling window.
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open);
                warn!(breaker = %self.name, "probe failed, circuit reopened");
                self.metrics.increment_counter("breaker.opened");
            }
            CircuitState::Closed => {
                inner.failures.push_back(now);
                self.prune_failures(&mut inner, now);
                if inner.failures.len() >= self.config.failure_threshold as usize {
                    self.transition(&mut inner, CircuitState::Open);
                    warn!(
                        breaker = %self.name,
                        threshold = self.config.failure_threshold,
                        "failure threshold reached, circuit opened"
                    );
                    self.metrics.increment_counter("breaker.opened");
                }
            }
            // A straggler failing after the breaker already opened adds
            // nothing; the open state is already accounted.
            CircuitState::Open => {}
        }
    }

    /// Counters reset on every transition.
    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        inner.state = to;
        inner.failures.clear();
        inner.success_count = 0;
        inner.probes_in_flight = 0;
        inner.last_transition = Instant::now();
    }

    fn prune_failures(&self, inner: &mut Inner, now: Instant) {
        let Some(horizon) = now.checked_sub(self.config.failure_window()) else {
            return;
        };
        while inner.failures.front().is_some_and(|&ts| ts < horizon) {
            inner.failures.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    fn breaker(failure_threshold: u32, reset_timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold,
                failure_window_ms: 60_000,
                reset_timeout_ms,
                success_threshold: 2,
            },
        )
    }

    async fn ok(breaker: &CircuitBreaker) -> Result<&'static str, BreakerError<&'static str>> {
        breaker.execute(async { Ok::<_, &str>("ok") }).await
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<&'static str, BreakerError<&'static str>> {
        breaker.execute(async { Err::<&str, _>("boom") }).await
    }

    // --- closed-state tests ---

    #[tokio::test]
    async fn closed_passes_results_through() {
        let breaker = breaker(3, 1_000);

        let result = ok(&breaker).await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn inner_error_is_reraised_unchanged() {
        let breaker = breaker(3, 1_000);

        match fail(&breaker).await {
            Err(BreakerError::Inner(e)) => assert_eq!(e, "boom"),
            other => panic!("expected Inner, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failures_below_threshold_keep_circuit_closed() {
        let breaker = breaker(3, 1_000);

        fail(&breaker).await.ok();
        fail(&breaker).await.ok();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 2);
    }

    #[tokio::test]
    async fn threshold_failures_open_circuit() {
        let breaker = breaker(3, 1_000);

        for _ in 0..3 {
            fail(&breaker).await.ok();
        }

        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn failures_outside_window_no_longer_count() {
        let breaker = CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: 3,
                failure_window_ms: 100,
                reset_timeout_ms: 1_000,
                success_threshold: 2,
            },
        );

        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        sleep(Duration::from_millis(150)).await;

        // The two earlier failures have aged out; this one stands alone.
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 1);
    }

    // --- open-state tests ---

    #[tokio::test]
    async fn open_rejects_without_invoking_operation() {
        let breaker = breaker(3, 1_000);
        for _ in 0..3 {
            fail(&breaker).await.ok();
        }

        let invoked = AtomicU32::new(0);
        let result = breaker
            .execute(async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>("never")
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open)));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn probe_allowed_after_reset_timeout() {
        let breaker = breaker(3, 100);
        for _ in 0..3 {
            fail(&breaker).await.ok();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        sleep(Duration::from_millis(150)).await;

        let result = ok(&breaker).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    // --- half-open tests ---

    #[tokio::test]
    async fn successful_probes_close_circuit() {
        let breaker = breaker(3, 100);
        for _ in 0..3 {
            fail(&breaker).await.ok();
        }
        sleep(Duration::from_millis(150)).await;

        ok(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        ok(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_caps_concurrent_probes() {
        let breaker = Arc::new(CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: 3,
                failure_window_ms: 60_000,
                reset_timeout_ms: 100,
                success_threshold: 1,
            },
        ));
        for _ in 0..3 {
            fail(&breaker).await.ok();
        }
        sleep(Duration::from_millis(150)).await;

        // Hold the single probe slot in flight.
        let (probe_tx, probe_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move {
                breaker
                    .execute(async {
                        probe_rx.await.ok();
                        Ok::<_, &str>("ok")
                    })
                    .await
            })
        };
        sleep(Duration::from_millis(10)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // A second caller during probation is rejected, not let through.
        let result = ok(&breaker).await;
        assert!(matches!(result, Err(BreakerError::Open)));

        probe_tx.send(()).ok();
        assert!(probe.await.unwrap().is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_immediately() {
        let breaker = breaker(3, 100);
        for _ in 0..3 {
            fail(&breaker).await.ok();
        }
        sleep(Duration::from_millis(150)).await;

        ok(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);

        // New timeout window: still rejecting straight after reopening
        let result = ok(&breaker).await;
        assert!(matches!(result, Err(BreakerError::Open)));
    }

    // --- counter-reset tests ---

    #[tokio::test]
    async fn counters_reset_on_transition() {
        let breaker = breaker(3, 100);
        for _ in 0..3 {
            fail(&breaker).await.ok();
        }

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.success_count, 0);

        sleep(Duration::from_millis(150)).await;
        ok(&breaker).await.ok();
        assert_eq!(breaker.snapshot().success_count, 1);

        ok(&breaker).await.ok();
        let closed = breaker.snapshot();
        assert_eq!(closed.state, CircuitState::Closed);
        assert_eq!(closed.success_count, 0);
    }

    // --- concurrency ---

    #[tokio::test]
    async fn concurrent_failures_open_exactly_once() {
        let breaker = Arc::new(breaker(5, 1_000));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let breaker = Arc::clone(&breaker);
            handles.push(tokio::spawn(async move {
                breaker.execute(async { Err::<(), _>("boom") }).await.ok();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn breaker_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CircuitBreaker>();
    }
}
