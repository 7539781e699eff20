//! Configuration for the resilience layer.
//!
//! Every component config derives `Deserialize` so the whole layer can be
//! driven from a single TOML section, with serde defaults keeping hand-rolled
//! construction terse. The remote cache tier is configured out-of-band through
//! the `REGSHIELD_REMOTE_URL` environment variable; its absence selects
//! local-only mode.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::ConfigError;

/// Environment variable carrying the remote cache connection string.
pub const REMOTE_URL_ENV: &str = "REGSHIELD_REMOTE_URL";

const fn default_max_requests() -> u32 {
    60
}

const fn default_window_ms() -> u64 {
    60_000
}

/// Sliding-window rate limiter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimiterConfig {
    /// Maximum requests admitted per key within the window. Defaults to 60.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window duration in milliseconds. Defaults to 60000 (one minute).
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl LimiterConfig {
    /// The window as a [`Duration`].
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
        }
    }
}

const fn default_max_entries() -> usize {
    10_000
}

const fn default_ttl_secs() -> u64 {
    3_600
}

/// Local TTL cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TtlCacheConfig {
    /// Maximum number of entries before the oldest-inserted entry is evicted.
    /// Defaults to 10000.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// TTL applied when `set` is called without an explicit TTL.
    /// Defaults to 3600 seconds.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

impl TtlCacheConfig {
    /// The default TTL as a [`Duration`].
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl Default for TtlCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_failure_window_ms() -> u64 {
    60_000
}

const fn default_reset_timeout_ms() -> u64 {
    30_000
}

const fn default_success_threshold() -> u32 {
    2
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Failures within the failure window that open the breaker. Defaults to 5.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Rolling window over which failures are counted, in milliseconds.
    /// Defaults to 60000.
    #[serde(default = "default_failure_window_ms")]
    pub failure_window_ms: u64,

    /// Time spent open before the next call is allowed through as a probe,
    /// in milliseconds. Defaults to 30000.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Consecutive half-open successes required to close. Defaults to 2.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl BreakerConfig {
    /// The failure window as a [`Duration`].
    #[must_use]
    pub fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }

    /// The reset timeout as a [`Duration`].
    #[must_use]
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_window_ms: default_failure_window_ms(),
            reset_timeout_ms: default_reset_timeout_ms(),
            success_threshold: default_success_threshold(),
        }
    }
}

const fn default_min_concurrency() -> usize {
    2
}

const fn default_max_concurrency() -> usize {
    20
}

const fn default_initial_concurrency() -> usize {
    5
}

fn default_error_threshold() -> f64 {
    0.1
}

const fn default_latency_threshold_ms() -> u64 {
    2_000
}

const fn default_sample_window_ms() -> u64 {
    30_000
}

const fn default_min_samples() -> usize {
    10
}

const fn default_evaluation_interval_ms() -> u64 {
    5_000
}

/// Adaptive concurrency controller configuration.
///
/// The controller bounds in-flight work for one named resource and adjusts
/// the bound with an AIMD policy: halve on error rate, shave 25% on latency,
/// add one slot when both signals are comfortably healthy.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Floor for the concurrency limit. Defaults to 2.
    #[serde(default = "default_min_concurrency")]
    pub min_concurrency: usize,

    /// Ceiling for the concurrency limit. Defaults to 20.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Concurrency limit at startup. Defaults to 5.
    #[serde(default = "default_initial_concurrency")]
    pub initial_concurrency: usize,

    /// Error rate above which concurrency is halved. Defaults to 0.1.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: f64,

    /// Average latency above which concurrency is multiplied by 0.75,
    /// in milliseconds. Defaults to 2000.
    #[serde(default = "default_latency_threshold_ms")]
    pub latency_threshold_ms: u64,

    /// Sample retention window in milliseconds. Defaults to 30000.
    #[serde(default = "default_sample_window_ms")]
    pub window_ms: u64,

    /// Minimum in-window samples before an evaluation adjusts anything.
    /// Defaults to 10.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Cadence of the background evaluator in milliseconds. Defaults to 5000.
    #[serde(default = "default_evaluation_interval_ms")]
    pub evaluation_interval_ms: u64,
}

impl ControllerConfig {
    /// The sample window as a [`Duration`].
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// The latency threshold as a [`Duration`].
    #[must_use]
    pub fn latency_threshold(&self) -> Duration {
        Duration::from_millis(self.latency_threshold_ms)
    }

    /// The evaluator cadence as a [`Duration`].
    #[must_use]
    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_millis(self.evaluation_interval_ms)
    }

    /// Clamp a proposed concurrency limit into `[min, max]`.
    #[must_use]
    pub fn clamp(&self, concurrency: usize) -> usize {
        concurrency.clamp(self.min_concurrency, self.max_concurrency)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            min_concurrency: default_min_concurrency(),
            max_concurrency: default_max_concurrency(),
            initial_concurrency: default_initial_concurrency(),
            error_threshold: default_error_threshold(),
            latency_threshold_ms: default_latency_threshold_ms(),
            window_ms: default_sample_window_ms(),
            min_samples: default_min_samples(),
            evaluation_interval_ms: default_evaluation_interval_ms(),
        }
    }
}

const fn default_command_timeout_ms() -> u64 {
    2_000
}

const fn default_connect_timeout_ms() -> u64 {
    5_000
}

const fn default_connect_attempts() -> u32 {
    3
}

const fn default_connect_backoff_ms() -> u64 {
    500
}

/// Hybrid cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HybridCacheConfig {
    /// Per-command time bound for remote operations, in milliseconds.
    /// A call that loses the race is abandoned and counted as a failure.
    /// Defaults to 2000.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Time bound for each initial connection attempt, in milliseconds.
    /// Defaults to 5000.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Number of initial connection attempts before giving up and running
    /// local-only. Defaults to 3.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Base delay between connection attempts, doubled each retry,
    /// in milliseconds. Defaults to 500.
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,

    /// TTL applied to entries stored without an explicit TTL.
    /// Defaults to 3600 seconds.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

impl HybridCacheConfig {
    /// The per-command timeout as a [`Duration`].
    #[must_use]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// The per-attempt connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// The default entry TTL as a [`Duration`].
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl Default for HybridCacheConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: default_command_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            connect_attempts: default_connect_attempts(),
            connect_backoff_ms: default_connect_backoff_ms(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_sensitive_keys() -> Vec<String> {
    ["password", "secret", "token", "api_key", "authorization"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

const fn default_min_secret_len() -> usize {
    24
}

/// Log-value masking configuration.
///
/// Masking matches by key name first, then falls back to a value-pattern net
/// for long alphanumeric strings. Both nets are heuristics; the thresholds
/// are configurable rather than load-bearing.
#[derive(Debug, Clone, Deserialize)]
pub struct MaskingConfig {
    /// Key-name substrings (case-insensitive) whose values are always masked.
    #[serde(default = "default_sensitive_keys")]
    pub sensitive_keys: Vec<String>,

    /// Minimum length for the long-alphanumeric secondary net. Defaults to 24.
    #[serde(default = "default_min_secret_len")]
    pub min_secret_len: usize,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            sensitive_keys: default_sensitive_keys(),
            min_secret_len: default_min_secret_len(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl LoggingConfig {
    /// Initialize the tracing subscriber with this logging configuration.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

/// Aggregate configuration for the whole resilience layer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub limiter: LimiterConfig,

    #[serde(default)]
    pub local_cache: TtlCacheConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub hybrid_cache: HybridCacheConfig,

    #[serde(default)]
    pub masking: MaskingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ResilienceConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Remote cache connection string from the environment.
    ///
    /// Reads `.env` (if present) and then `REGSHIELD_REMOTE_URL`. `None`
    /// selects local-only mode.
    #[must_use]
    pub fn remote_url() -> Option<String> {
        dotenvy::dotenv().ok();
        std::env::var(REMOTE_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.limiter.max_requests == 0 {
            return Err(ConfigError::InvalidValue {
                field: "limiter.max_requests",
                reason: "must be at least 1".into(),
            });
        }
        if self.controller.min_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "controller.min_concurrency",
                reason: "must be at least 1".into(),
            });
        }
        if self.controller.min_concurrency > self.controller.max_concurrency {
            return Err(ConfigError::InvalidValue {
                field: "controller.min_concurrency",
                reason: format!(
                    "must not exceed max_concurrency ({})",
                    self.controller.max_concurrency
                ),
            });
        }
        if self.controller.initial_concurrency < self.controller.min_concurrency
            || self.controller.initial_concurrency > self.controller.max_concurrency
        {
            return Err(ConfigError::InvalidValue {
                field: "controller.initial_concurrency",
                reason: "must lie within [min_concurrency, max_concurrency]".into(),
            });
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "breaker.failure_threshold",
                reason: "must be at least 1".into(),
            });
        }
        if self.breaker.success_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "breaker.success_threshold",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}
