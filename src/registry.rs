//! Named-instance registries.
//!
//! Repeated lookups by the same logical resource name must share one
//! controller or cache instance rather than duplicating state, so the process
//! holds one registry per kind and creates instances lazily on first use.
//! Registries are explicit, injectable objects; tests construct isolated ones
//! instead of sharing module-level state. Instances live until explicit
//! teardown.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::cache::hybrid::HybridCache;
use crate::cache::remote::RemoteTier;
use crate::config::{BreakerConfig, ControllerConfig, HybridCacheConfig, TtlCacheConfig};
use crate::controller::AdaptiveConcurrencyController;
use crate::telemetry::{MetricsSink, NoopMetrics};

/// Hybrid cache holding arbitrary JSON values, the registry's common currency.
pub type JsonHybridCache = HybridCache<Value>;

/// Process-wide registry of adaptive concurrency controllers by resource name.
pub struct ControllerRegistry {
    config: ControllerConfig,
    controllers: DashMap<String, Arc<AdaptiveConcurrencyController>>,
    metrics: Arc<dyn MetricsSink>,
}

impl ControllerRegistry {
    /// Create a registry stamping out controllers with `config`.
    #[must_use]
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    /// Create a registry wiring `metrics` into every controller it creates.
    #[must_use]
    pub fn with_metrics(config: ControllerConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            config,
            controllers: DashMap::new(),
            metrics,
        }
    }

    /// Fetch the controller for `name`, creating it on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<AdaptiveConcurrencyController> {
        self.controllers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(controller = name, "creating controller");
                AdaptiveConcurrencyController::with_metrics(
                    name,
                    self.config.clone(),
                    Arc::clone(&self.metrics),
                )
            })
            .clone()
    }

    /// Number of registered controllers.
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    /// Whether no controller has been created yet.
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Halt every controller's evaluator and drop the instances.
    pub fn stop_all(&self) {
        for entry in self.controllers.iter() {
            entry.value().stop();
        }
        self.controllers.clear();
    }
}

/// Process-wide registry of hybrid caches by cache name.
///
/// Every cache created here shares the registry's remote tier client (or runs
/// local-only when none is configured).
pub struct CacheRegistry {
    cache_config: HybridCacheConfig,
    local_config: TtlCacheConfig,
    breaker_config: BreakerConfig,
    remote: Option<Arc<dyn RemoteTier>>,
    caches: DashMap<String, Arc<JsonHybridCache>>,
    metrics: Arc<dyn MetricsSink>,
}

impl CacheRegistry {
    /// Create a local-only registry.
    #[must_use]
    pub fn new(
        cache_config: HybridCacheConfig,
        local_config: TtlCacheConfig,
        breaker_config: BreakerConfig,
    ) -> Self {
        Self {
            cache_config,
            local_config,
            breaker_config,
            remote: None,
            caches: DashMap::new(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Create a registry whose caches mirror through `remote`.
    #[must_use]
    pub fn with_remote(
        cache_config: HybridCacheConfig,
        local_config: TtlCacheConfig,
        breaker_config: BreakerConfig,
        remote: Arc<dyn RemoteTier>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            cache_config,
            local_config,
            breaker_config,
            remote: Some(remote),
            caches: DashMap::new(),
            metrics,
        }
    }

    /// Fetch the cache for `name`, creating (and connecting) it on first use.
    pub async fn get_or_create(&self, name: &str) -> Arc<JsonHybridCache> {
        if let Some(cache) = self.caches.get(name) {
            return Arc::clone(&cache);
        }

        // Built outside the map entry lock: the initial remote connect awaits.
        let cache = match &self.remote {
            Some(remote) => Arc::new(
                JsonHybridCache::with_remote(
                    name,
                    self.cache_config.clone(),
                    self.local_config.clone(),
                    self.breaker_config.clone(),
                    Arc::clone(remote),
                    Arc::clone(&self.metrics),
                )
                .await,
            ),
            None => Arc::new(JsonHybridCache::local_only(
                name,
                self.cache_config.clone(),
                self.local_config.clone(),
                self.breaker_config.clone(),
            )),
        };

        debug!(cache = name, "registering cache");
        // Two tasks may have built concurrently; first insertion wins so all
        // callers share one instance.
        Arc::clone(
            self.caches
                .entry(name.to_string())
                .or_insert(cache)
                .value(),
        )
    }

    /// Number of registered caches.
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// Whether no cache has been created yet.
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Close every cache's remote connection and drop the instances.
    pub async fn close_all(&self) {
        let names: Vec<String> = self.caches.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, cache)) = self.caches.remove(&name) {
                cache.close().await;
            }
        }
    }
}
