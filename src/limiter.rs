//! Per-key admission control over a trailing time window.
//!
//! Each key owns an ordered list of request timestamps. A request is admitted
//! when fewer than `max_requests` timestamps survive inside the trailing
//! window; entries older than the window are lazily purged on access. Keys
//! are fully independent: there is no global lock beyond the per-key shard
//! taken for the mutation itself.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::config::LimiterConfig;
use crate::error::Error;
use crate::telemetry::{MetricsSink, NoopMetrics};

/// Sliding-window request limiter.
///
/// # Example
///
/// ```
/// use regshield::config::LimiterConfig;
/// use regshield::limiter::SlidingWindowLimiter;
///
/// let limiter = SlidingWindowLimiter::new(LimiterConfig {
///     max_requests: 3,
///     window_ms: 1_000,
/// });
///
/// assert!(limiter.try_request("registrar:verisign"));
/// assert_eq!(limiter.remaining("registrar:verisign"), 2);
/// ```
pub struct SlidingWindowLimiter {
    /// Limiter configuration.
    config: LimiterConfig,
    /// Per-key request timestamps, oldest first.
    windows: DashMap<String, VecDeque<Instant>>,
    /// Metrics sink for admission decisions.
    metrics: Arc<dyn MetricsSink>,
}

impl SlidingWindowLimiter {
    /// Create a new limiter with the given configuration.
    #[must_use]
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    /// Create a new limiter reporting admission decisions to `metrics`.
    #[must_use]
    pub fn with_metrics(config: LimiterConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            metrics,
        }
    }

    /// Try to admit one request for `key`.
    ///
    /// Returns `false` without recording anything when the key already has
    /// `max_requests` admissions inside the window; otherwise records the
    /// request and returns `true`.
    pub fn try_request(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut window = self.windows.entry(key.to_string()).or_default();
        Self::purge(&mut window, now, self.config.window());

        if window.len() >= self.config.max_requests as usize {
            self.metrics.increment_counter("limiter.rejected");
            debug!(key, limit = self.config.max_requests, "request rejected");
            return false;
        }

        window.push_back(now);
        self.metrics.increment_counter("limiter.admitted");
        true
    }

    /// Admit one request for `key`, or return a structured rejection.
    ///
    /// The error carries the concrete duration after which the oldest
    /// in-window request expires, so callers can back off precisely.
    pub fn check(&self, key: &str) -> Result<(), Error> {
        if self.try_request(key) {
            Ok(())
        } else {
            Err(Error::RateLimitExceeded {
                retry_after: self.reset_after(key),
            })
        }
    }

    /// Requests still admissible for `key` in the current window.
    ///
    /// A key with no history has the full budget available.
    pub fn remaining(&self, key: &str) -> u32 {
        let now = Instant::now();
        match self.windows.get_mut(key) {
            Some(mut window) => {
                Self::purge(&mut window, now, self.config.window());
                let used = u32::try_from(window.len()).unwrap_or(u32::MAX);
                self.config.max_requests.saturating_sub(used)
            }
            None => self.config.max_requests,
        }
    }

    /// Time until the oldest in-window request for `key` ages out.
    ///
    /// Returns [`Duration::ZERO`] for a key with no in-window history.
    pub fn reset_after(&self, key: &str) -> Duration {
        let now = Instant::now();
        match self.windows.get_mut(key) {
            Some(mut window) => {
                Self::purge(&mut window, now, self.config.window());
                match window.front() {
                    Some(oldest) => {
                        let expires_at = *oldest + self.config.window();
                        expires_at.saturating_duration_since(now)
                    }
                    None => Duration::ZERO,
                }
            }
            None => Duration::ZERO,
        }
    }

    /// Number of keys with a recorded window.
    ///
    /// Purged lazily, so this may include keys whose entries have all aged out.
    pub fn key_count(&self) -> usize {
        self.windows.len()
    }

    /// Drop timestamps older than the trailing window.
    fn purge(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
        let Some(horizon) = now.checked_sub(span) else {
            return;
        };
        while window.front().is_some_and(|&ts| ts < horizon) {
            window.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    fn limiter(max_requests: u32, window_ms: u64) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(LimiterConfig {
            max_requests,
            window_ms,
        })
    }

    // --- try_request tests ---

    #[test]
    fn try_request_admits_up_to_limit() {
        let limiter = limiter(3, 1_000);

        assert!(limiter.try_request("key"));
        assert!(limiter.try_request("key"));
        assert!(limiter.try_request("key"));
        assert!(!limiter.try_request("key"));
    }

    #[test]
    fn try_request_rejection_records_nothing() {
        let limiter = limiter(2, 1_000);

        assert!(limiter.try_request("key"));
        assert!(limiter.try_request("key"));
        assert!(!limiter.try_request("key"));

        // Rejected requests do not consume budget
        assert_eq!(limiter.remaining("key"), 0);
        let window = limiter.windows.get("key").unwrap();
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn try_request_keys_are_independent() {
        let limiter = limiter(1, 1_000);

        assert!(limiter.try_request("alpha"));
        assert!(!limiter.try_request("alpha"));
        assert!(limiter.try_request("beta"));
    }

    #[tokio::test]
    async fn try_request_admits_again_after_window_elapses() {
        let limiter = limiter(3, 100);

        assert!(limiter.try_request("key"));
        assert!(limiter.try_request("key"));
        assert!(limiter.try_request("key"));
        assert!(!limiter.try_request("key"));

        sleep(Duration::from_millis(150)).await;

        assert!(limiter.try_request("key"));
    }

    // --- remaining tests ---

    #[test]
    fn remaining_is_full_budget_for_unknown_key() {
        let limiter = limiter(5, 1_000);
        assert_eq!(limiter.remaining("never-seen"), 5);
    }

    #[test]
    fn remaining_decreases_with_admissions() {
        let limiter = limiter(5, 1_000);

        limiter.try_request("key");
        limiter.try_request("key");

        assert_eq!(limiter.remaining("key"), 3);
    }

    #[tokio::test]
    async fn remaining_recovers_as_entries_age_out() {
        let limiter = limiter(2, 100);

        limiter.try_request("key");
        limiter.try_request("key");
        assert_eq!(limiter.remaining("key"), 0);

        sleep(Duration::from_millis(150)).await;
        assert_eq!(limiter.remaining("key"), 2);
    }

    // --- reset_after tests ---

    #[test]
    fn reset_after_is_zero_for_unknown_key() {
        let limiter = limiter(3, 1_000);
        assert_eq!(limiter.reset_after("never-seen"), Duration::ZERO);
    }

    #[test]
    fn reset_after_tracks_oldest_entry() {
        let limiter = limiter(3, 1_000);

        limiter.try_request("key");

        let reset = limiter.reset_after("key");
        assert!(reset > Duration::ZERO);
        assert!(reset <= Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn reset_after_zero_once_window_empty() {
        let limiter = limiter(3, 100);

        limiter.try_request("key");
        sleep(Duration::from_millis(150)).await;

        assert_eq!(limiter.reset_after("key"), Duration::ZERO);
    }

    // --- key_count tests ---

    #[test]
    fn key_count_tracks_keys_with_history() {
        let limiter = limiter(3, 1_000);
        assert_eq!(limiter.key_count(), 0);

        limiter.try_request("alpha");
        limiter.try_request("alpha");
        limiter.try_request("beta");

        assert_eq!(limiter.key_count(), 2);
    }

    // --- check tests ---

    #[test]
    fn check_maps_rejection_to_structured_error() {
        let limiter = limiter(1, 1_000);

        assert!(limiter.check("key").is_ok());

        match limiter.check("key") {
            Err(Error::RateLimitExceeded { retry_after }) => {
                assert!(retry_after > Duration::ZERO);
            }
            other => panic!("expected RateLimitExceeded, got {other:?}"),
        }
    }

    // --- thread safety ---

    #[test]
    fn limiter_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SlidingWindowLimiter>();
    }
}
