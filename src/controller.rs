//! AIMD-adjusted concurrency bound for one named resource.
//!
//! The controller admits up to `current` in-flight operations; excess callers
//! suspend in a strict FIFO queue. Every completed operation leaves a latency
//! and success sample behind, and a background evaluator periodically turns
//! the recent sample window into a limit adjustment: halve on a high error
//! rate, multiply by 0.75 on high average latency, add one slot when both
//! signals are comfortably below half their thresholds.
//!
//! A limit decrease never cancels in-flight work; it only throttles future
//! admissions until the active count falls under the new ceiling.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::ControllerConfig;
use crate::telemetry::{MetricsSink, NoopMetrics};

/// One observation of a completed operation.
#[derive(Debug, Clone, Copy)]
struct Sample {
    recorded_at: Instant,
    latency: Duration,
    success: bool,
}

/// Point-in-time view of a controller for health dashboards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSnapshot {
    pub current_concurrency: usize,
    pub min_concurrency: usize,
    pub max_concurrency: usize,
    pub active_requests: usize,
    pub queued_requests: usize,
    /// Error rate over the recent sample window, in `[0, 1]`.
    pub recent_error_rate: f64,
    /// Average latency over the recent sample window.
    pub recent_avg_latency: Duration,
    pub sample_count: usize,
}

struct State {
    current: usize,
    active: usize,
    /// Pending acquisitions, longest-waiting first. A released slot is handed
    /// to the front waiter as a guard value without ever decrementing
    /// `active`; a handover the waiter never claims (cancelled mid-wake)
    /// comes back through the guard's drop.
    waiters: VecDeque<oneshot::Sender<SlotGuard>>,
    samples: VecDeque<Sample>,
}

/// Adaptive concurrency controller for one named resource.
///
/// Construct with [`AdaptiveConcurrencyController::new`] inside a tokio
/// runtime; the background evaluator task is owned by the instance and runs
/// until [`stop`](Self::stop) is called or the last `Arc` is dropped.
pub struct AdaptiveConcurrencyController {
    name: String,
    config: ControllerConfig,
    state: Mutex<State>,
    evaluator: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<dyn MetricsSink>,
}

/// Scoped slot acquisition: the slot is released on every exit path,
/// including panics and an unclaimed handover, when the guard drops.
///
/// `controller` is `None` only for a guard that never carried a slot (a
/// handover whose receiver was already gone); such a guard drops inert.
struct SlotGuard {
    controller: Option<Arc<AdaptiveConcurrencyController>>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(controller) = self.controller.take() {
            controller.release();
        }
    }
}

impl AdaptiveConcurrencyController {
    /// Create a controller and start its background evaluator.
    ///
    /// Must be called inside a tokio runtime. The evaluator holds only a weak
    /// reference, so dropping every `Arc` ends it without an explicit `stop`.
    #[must_use]
    pub fn new(name: impl Into<String>, config: ControllerConfig) -> Arc<Self> {
        Self::with_metrics(name, config, Arc::new(NoopMetrics))
    }

    /// Create a controller reporting adjustments and latencies to `metrics`.
    #[must_use]
    pub fn with_metrics(
        name: impl Into<String>,
        config: ControllerConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Arc<Self> {
        let initial = config.clamp(config.initial_concurrency);
        let controller = Arc::new(Self {
            name: name.into(),
            config,
            state: Mutex::new(State {
                current: initial,
                active: 0,
                waiters: VecDeque::new(),
                samples: VecDeque::new(),
            }),
            evaluator: Mutex::new(None),
            metrics,
        });

        let handle = Self::spawn_evaluator(Arc::downgrade(&controller));
        *controller.evaluator.lock() = Some(handle);
        controller
    }

    /// The resource name this controller bounds.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `operation` under the concurrency bound.
    ///
    /// Suspends in FIFO order while the bound is saturated. The operation's
    /// outcome and latency are recorded as a sample on every completion, and
    /// its error is re-raised unchanged. The slot itself is guaranteed
    /// released on every exit path.
    pub async fn run<T, E, F>(self: &Arc<Self>, operation: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let _guard = self.acquire().await;
        let start = Instant::now();
        let result = operation.await;
        let latency = start.elapsed();

        self.record_sample(latency, result.is_ok());
        self.metrics.record_latency(
            "controller.operation",
            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
        );
        result
    }

    /// Halt the background evaluator. Idempotent; required for deterministic
    /// shutdown and tests.
    pub fn stop(&self) {
        if let Some(handle) = self.evaluator.lock().take() {
            handle.abort();
            debug!(controller = %self.name, "background evaluator stopped");
        }
    }

    /// Observability snapshot over the pruned sample window.
    #[must_use]
    pub fn snapshot(&self) -> ControllerSnapshot {
        let mut state = self.state.lock();
        Self::prune_samples(&mut state.samples, Instant::now(), self.config.window());
        let (error_rate, avg_latency) = Self::window_stats(&state.samples);

        ControllerSnapshot {
            current_concurrency: state.current,
            min_concurrency: self.config.min_concurrency,
            max_concurrency: self.config.max_concurrency,
            active_requests: state.active,
            queued_requests: state.waiters.len(),
            recent_error_rate: error_rate,
            recent_avg_latency: avg_latency,
            sample_count: state.samples.len(),
        }
    }

    /// Run one evaluation round immediately.
    ///
    /// The background evaluator calls this on its fixed cadence; tests and
    /// operational tooling can call it directly for deterministic control.
    pub fn evaluate_now(self: &Arc<Self>) {
        let mut state = self.state.lock();
        let now = Instant::now();
        Self::prune_samples(&mut state.samples, now, self.config.window());

        if state.samples.len() < self.config.min_samples {
            debug!(
                controller = %self.name,
                samples = state.samples.len(),
                needed = self.config.min_samples,
                "skipping evaluation, not enough samples"
            );
            return;
        }

        let (error_rate, avg_latency) = Self::window_stats(&state.samples);
        let before = state.current;

        if error_rate > self.config.error_threshold {
            // Multiplicative decrease on errors
            state.current = self
                .config
                .clamp((state.current as f64 * 0.5).floor() as usize);
            self.metrics.increment_counter("controller.decreased");
        } else if avg_latency > self.config.latency_threshold() {
            // Gentler decrease on latency alone
            state.current = self
                .config
                .clamp((state.current as f64 * 0.75).floor() as usize);
            self.metrics.increment_counter("controller.decreased");
        } else if error_rate < self.config.error_threshold / 2.0
            && avg_latency < self.config.latency_threshold() / 2
        {
            // Additive increase when comfortably healthy
            state.current = self.config.clamp(state.current + 1);
            self.metrics.increment_counter("controller.increased");
        }

        if state.current != before {
            info!(
                controller = %self.name,
                from = before,
                to = state.current,
                error_rate = format!("{error_rate:.3}"),
                avg_latency_ms = avg_latency.as_millis() as u64,
                "concurrency limit adjusted"
            );
            if state.current > before {
                self.wake_waiters(&mut state);
            }
            // A decrease below `active` only throttles future admissions.
        }
    }

    async fn acquire(self: &Arc<Self>) -> SlotGuard {
        loop {
            let rx = {
                let mut state = self.state.lock();
                if state.active < state.current {
                    state.active += 1;
                    return SlotGuard {
                        controller: Some(Arc::clone(self)),
                    };
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                rx
            };

            match rx.await {
                // The guard arrives with the slot already accounted to this
                // caller. If this future is dropped before the receive, the
                // undelivered guard drops inside the channel and hands the
                // slot back itself.
                Ok(guard) => return guard,
                // Sender dropped without a handover; re-contend for a slot.
                Err(_) => {}
            }
        }
    }

    fn release(self: &Arc<Self>) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        self.wake_waiters(&mut state);
    }

    /// Hand free capacity to the longest-waiting callers, in order.
    fn wake_waiters(self: &Arc<Self>, state: &mut State) {
        while state.active < state.current {
            let Some(tx) = state.waiters.pop_front() else {
                break;
            };
            match tx.send(SlotGuard {
                controller: Some(Arc::clone(self)),
            }) {
                Ok(()) => state.active += 1,
                Err(mut unclaimed) => {
                    // Receiver is gone (caller dropped while queued). No slot
                    // was allocated for it, so the guard must drop inert here
                    // under the lock; try the next waiter.
                    unclaimed.controller = None;
                }
            }
        }
    }

    fn record_sample(&self, latency: Duration, success: bool) {
        let mut state = self.state.lock();
        let now = Instant::now();
        state.samples.push_back(Sample {
            recorded_at: now,
            latency,
            success,
        });
        Self::prune_samples(&mut state.samples, now, self.config.window());
    }

    fn prune_samples(samples: &mut VecDeque<Sample>, now: Instant, window: Duration) {
        let Some(horizon) = now.checked_sub(window) else {
            return;
        };
        while samples.front().is_some_and(|s| s.recorded_at < horizon) {
            samples.pop_front();
        }
    }

    fn window_stats(samples: &VecDeque<Sample>) -> (f64, Duration) {
        if samples.is_empty() {
            return (0.0, Duration::ZERO);
        }
        let total = samples.len() as f64;
        let errors = samples.iter().filter(|s| !s.success).count() as f64;
        let latency_sum: Duration = samples.iter().map(|s| s.latency).sum();
        (errors / total, latency_sum.div_f64(total))
    }

    fn spawn_evaluator(weak: Weak<Self>) -> JoinHandle<()> {
        let interval = weak
            .upgrade()
            .map(|c| c.config.evaluation_interval())
            .unwrap_or(Duration::from_secs(5));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; consume it so evaluation
            // starts one full interval after construction.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(controller) = weak.upgrade() else {
                    break;
                };
                controller.evaluate_now();
            }
        })
    }
}

impl Drop for AdaptiveConcurrencyController {
    fn drop(&mut self) {
        self.stop();
    }
}
