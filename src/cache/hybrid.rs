//! Hybrid cache: remote tier + local TTL fallback + circuit breaker.
//!
//! Reads try the remote tier first (when configured and advisedly reachable)
//! and fall back to the local tier on any remote miss or failure. Writes land
//! locally first, so a value can never be lost to a remote outage, then
//! mirror to the remote tier best-effort. Every remote command runs through
//! the breaker and is raced against a per-command timeout; losing the race
//! counts as a failure and the straggling command is abandoned harmlessly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::cache::remote::{ConnectionState, RemoteTier};
use crate::cache::ttl::TtlCache;
use crate::config::{BreakerConfig, HybridCacheConfig, TtlCacheConfig};
use crate::error::{BreakerError, RemoteError};
use crate::telemetry::{MetricsSink, NoopMetrics};

/// Diagnostic view of a hybrid cache, enough to spot degraded mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HybridCacheStats {
    /// Whether the remote tier is currently believed reachable.
    pub remote_connected: bool,
    /// Whether a remote tier was configured at all.
    pub remote_configured: bool,
    /// Entry count of the local tier.
    pub local_len: usize,
    /// State of the breaker guarding the remote tier.
    pub breaker_state: CircuitState,
}

/// Two-tier cache with graceful remote degradation.
///
/// Values must serialize to JSON for the remote tier; the local tier stores
/// them unserialized.
pub struct HybridCache<V> {
    name: String,
    config: HybridCacheConfig,
    local: TtlCache<V>,
    breaker: CircuitBreaker,
    remote: Option<Arc<dyn RemoteTier>>,
    /// Advisory connectivity flag: set by the initial connect outcome,
    /// cleared by `close`. Never trusted on its own.
    connected: AtomicBool,
    metrics: Arc<dyn MetricsSink>,
}

impl<V> HybridCache<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    /// Create a cache with no remote tier. All operations are local.
    #[must_use]
    pub fn local_only(
        name: impl Into<String>,
        config: HybridCacheConfig,
        local_config: TtlCacheConfig,
        breaker_config: BreakerConfig,
    ) -> Self {
        Self::build(name, config, local_config, breaker_config, None, Arc::new(NoopMetrics))
    }

    /// Create a cache backed by `remote` and attempt the initial connection.
    ///
    /// Runs a bounded connect schedule: `connect_attempts` tries, each capped
    /// at `connect_timeout`, with the backoff delay doubling between tries.
    /// If every attempt fails the cache comes up in local-only degraded mode;
    /// later reconnection is the remote client's own concern.
    pub async fn with_remote(
        name: impl Into<String>,
        config: HybridCacheConfig,
        local_config: TtlCacheConfig,
        breaker_config: BreakerConfig,
        remote: Arc<dyn RemoteTier>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let cache = Self::build(
            name,
            config,
            local_config,
            breaker_config,
            Some(remote),
            metrics,
        );
        cache.try_connect().await;
        cache
    }

    fn build(
        name: impl Into<String>,
        config: HybridCacheConfig,
        local_config: TtlCacheConfig,
        breaker_config: BreakerConfig,
        remote: Option<Arc<dyn RemoteTier>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let name = name.into();
        let breaker = CircuitBreaker::with_metrics(
            format!("{name}-remote"),
            breaker_config,
            Arc::clone(&metrics),
        );
        Self {
            name,
            config,
            local: TtlCache::new(local_config),
            breaker,
            remote,
            connected: AtomicBool::new(false),
            metrics,
        }
    }

    /// The cache name, used in logs and metrics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch `key`, remote tier first, local fallback on any remote trouble.
    pub async fn get(&self, key: &str) -> Option<V> {
        if let Some(remote) = self.remote_ready() {
            match self.remote_command(remote.get(key)).await {
                Ok(Some(payload)) => match serde_json::from_str(&payload) {
                    Ok(value) => {
                        self.metrics.increment_counter("cache.remote_hit");
                        return Some(value);
                    }
                    Err(e) => {
                        warn!(cache = %self.name, key, error = %e, "remote payload undecodable, falling back to local");
                        self.metrics.increment_counter("cache.remote_error");
                    }
                },
                Ok(None) => {
                    self.metrics.increment_counter("cache.remote_miss");
                }
                Err(e) => {
                    self.note_remote_failure("get", key, &e);
                }
            }
        }
        self.local.get(key)
    }

    /// Store `key`. Local write first, best-effort remote mirror second.
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        self.local.set(key, value.clone(), Some(ttl));

        let Some(remote) = self.remote_ready() else {
            return;
        };
        let payload = match serde_json::to_string(&value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(cache = %self.name, key, error = %e, "value not serializable, remote mirror skipped");
                return;
            }
        };
        if let Err(e) = self
            .remote_command(remote.set(key, &payload, ttl))
            .await
        {
            // The local write already satisfied the contract.
            self.note_remote_failure("set", key, &e);
        }
    }

    /// Remove `key` locally, and remotely best-effort. Idempotent.
    pub async fn delete(&self, key: &str) {
        self.local.delete(key);

        let Some(remote) = self.remote_ready() else {
            return;
        };
        if let Err(e) = self.remote_command(remote.delete(key)).await {
            self.note_remote_failure("delete", key, &e);
        }
    }

    /// Whether `key` resolves to a present value.
    ///
    /// Defined as `get` returning a value, so it pays the same remote
    /// round-trip cost as `get`.
    pub async fn has(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    /// Diagnostic snapshot.
    #[must_use]
    pub fn stats(&self) -> HybridCacheStats {
        let remote_connected = self
            .remote
            .as_ref()
            .is_some_and(|r| {
                self.connected.load(Ordering::Relaxed)
                    && r.connection_state() == ConnectionState::Connected
            });
        HybridCacheStats {
            remote_connected,
            remote_configured: self.remote.is_some(),
            local_len: self.local.len(),
            breaker_state: self.breaker.state(),
        }
    }

    /// Release the remote connection. Afterwards every operation runs purely
    /// against the local tier, indistinguishable from never-configured mode.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::Relaxed);
        if let Some(remote) = &self.remote {
            remote.close().await;
            info!(cache = %self.name, "remote tier connection released");
        }
    }

    /// The remote tier, if configured and advisedly reachable.
    fn remote_ready(&self) -> Option<&Arc<dyn RemoteTier>> {
        self.remote.as_ref().filter(|r| {
            self.connected.load(Ordering::Relaxed)
                && r.connection_state() != ConnectionState::Disconnected
        })
    }

    /// Run one remote command through breaker and timeout race.
    ///
    /// If the timeout fires first the command is abandoned; its eventual
    /// completion is ignored and the attempt counts as a failure.
    async fn remote_command<T>(
        &self,
        command: impl std::future::Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, BreakerError<RemoteError>> {
        let bound = self.config.command_timeout();
        self.breaker
            .execute(async {
                match timeout(bound, command).await {
                    Ok(result) => result,
                    Err(_) => Err(RemoteError::Timeout { elapsed: bound }),
                }
            })
            .await
    }

    fn note_remote_failure(&self, op: &str, key: &str, error: &BreakerError<RemoteError>) {
        self.metrics.increment_counter("cache.remote_error");
        if error.is_open() {
            debug!(cache = %self.name, op, key, "remote tier breaker open, using local tier");
        } else {
            warn!(cache = %self.name, op, key, error = %error, "remote tier operation failed, using local tier");
        }
    }

    async fn try_connect(&self) {
        let Some(remote) = &self.remote else {
            return;
        };
        let mut delay = Duration::from_millis(self.config.connect_backoff_ms);
        for attempt in 1..=self.config.connect_attempts {
            match timeout(self.config.connect_timeout(), remote.connect()).await {
                Ok(Ok(())) => {
                    self.connected.store(true, Ordering::Relaxed);
                    info!(cache = %self.name, attempt, "remote tier connected");
                    return;
                }
                Ok(Err(e)) => {
                    warn!(cache = %self.name, attempt, error = %e, "remote tier connection failed");
                }
                Err(_) => {
                    warn!(cache = %self.name, attempt, "remote tier connection timed out");
                }
            }
            if attempt < self.config.connect_attempts {
                sleep(delay).await;
                delay *= 2;
            }
        }
        warn!(cache = %self.name, "remote tier unreachable, starting in local-only mode");
        self.metrics.increment_counter("cache.remote_unavailable");
    }
}
