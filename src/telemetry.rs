//! Observability seams: metrics sink port and log-value masking.
//!
//! The resilience layer never talks to a metrics backend directly. Components
//! accept an [`MetricsSink`] implementation and emit fire-and-forget counter
//! and latency signals through it; the process wires in whatever backend it
//! runs (the default is a no-op).

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::config::MaskingConfig;

/// Fire-and-forget metrics port.
///
/// Implementations must never block and must never panic; a slow or broken
/// metrics backend must not be able to stall a call path.
pub trait MetricsSink: Send + Sync {
    /// Increment a named counter by one.
    fn increment_counter(&self, name: &str);

    /// Record a latency observation in milliseconds under a named series.
    fn record_latency(&self, name: &str, ms: u64);
}

/// Metrics sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment_counter(&self, _name: &str) {}

    fn record_latency(&self, _name: &str, _ms: u64) {}
}

/// Metrics sink that emits `tracing` debug events.
///
/// Useful in development and tests where no metrics backend is wired in but
/// the signal stream is still worth seeing.
#[derive(Debug, Default)]
pub struct TracingMetrics {
    counters: AtomicU64,
}

impl MetricsSink for TracingMetrics {
    fn increment_counter(&self, name: &str) {
        let total = self.counters.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(counter = name, total_signals = total, "metric counter");
    }

    fn record_latency(&self, name: &str, ms: u64) {
        debug!(series = name, latency_ms = ms, "metric latency");
    }
}

/// Mask a log field value if it looks like a secret.
///
/// Matches by key name first (case-insensitive substring against the
/// configured sensitive-key list), then applies a secondary net: any
/// sufficiently long unbroken alphanumeric string is treated as a credential.
/// Returns the value unchanged when neither net matches.
#[must_use]
pub fn mask_value(key: &str, value: &str, config: &MaskingConfig) -> String {
    let key_lower = key.to_ascii_lowercase();
    let key_sensitive = config
        .sensitive_keys
        .iter()
        .any(|needle| key_lower.contains(needle.as_str()));

    if key_sensitive || looks_like_secret(value, config.min_secret_len) {
        return mask(value);
    }

    value.to_string()
}

/// Secondary net: long unbroken alphanumeric strings.
fn looks_like_secret(value: &str, min_len: usize) -> bool {
    value.len() >= min_len && value.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Keep a short prefix for log correlation, mask the rest.
fn mask(value: &str) -> String {
    let visible = value.chars().take(4).collect::<String>();
    format!("{visible}***")
}
