//! End-to-end scenarios across the resilience layer.
//!
//! Drives the full admission chain (limiter -> controller -> breaker) against
//! a scripted flaky dependency, and the hybrid cache through a remote outage.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use regshield::breaker::{CircuitBreaker, CircuitState};
use regshield::cache::RemoteTier;
use regshield::config::{
    BreakerConfig, ControllerConfig, HybridCacheConfig, LimiterConfig, TtlCacheConfig,
};
use regshield::controller::AdaptiveConcurrencyController;
use regshield::error::BreakerError;
use regshield::limiter::SlidingWindowLimiter;
use regshield::registry::{CacheRegistry, ControllerRegistry};
use regshield::testkit::InMemoryRemote;
use regshield::telemetry::NoopMetrics;
use regshield::HybridCache;

/// Scripted downstream dependency: fails until `healthy_after` calls served.
struct FlakyRegistrar {
    calls: AtomicU32,
    healthy_after: u32,
}

impl FlakyRegistrar {
    fn new(healthy_after: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            healthy_after,
        }
    }

    async fn check_domain(&self, domain: &str) -> Result<String, String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.healthy_after {
            Err(format!("registrar unavailable for {domain}"))
        } else {
            Ok(format!("{domain}: available"))
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

fn tight_breaker() -> CircuitBreaker {
    CircuitBreaker::new(
        "registrar",
        BreakerConfig {
            failure_threshold: 3,
            failure_window_ms: 60_000,
            reset_timeout_ms: 100,
            success_threshold: 2,
        },
    )
}

// --- full call chain ---

#[tokio::test]
async fn call_chain_limits_admits_and_guards() {
    let limiter = SlidingWindowLimiter::new(LimiterConfig {
        max_requests: 5,
        window_ms: 60_000,
    });
    let controller = AdaptiveConcurrencyController::new(
        "registrar",
        ControllerConfig {
            min_concurrency: 1,
            max_concurrency: 4,
            initial_concurrency: 2,
            ..ControllerConfig::default()
        },
    );
    let breaker = Arc::new(tight_breaker());
    let registrar = Arc::new(FlakyRegistrar::new(0));

    let mut outcomes = Vec::new();
    for i in 0..8 {
        let domain = format!("example{i}.com");
        if !limiter.try_request("registrar") {
            outcomes.push("rate-limited");
            continue;
        }
        let breaker = Arc::clone(&breaker);
        let registrar = Arc::clone(&registrar);
        let result = controller
            .run(async move { breaker.execute(registrar.check_domain(&domain)).await })
            .await;
        outcomes.push(if result.is_ok() { "ok" } else { "failed" });
    }

    // 5 admitted by the limiter, 3 rejected without touching the registrar.
    assert_eq!(outcomes.iter().filter(|o| **o == "ok").count(), 5);
    assert_eq!(outcomes.iter().filter(|o| **o == "rate-limited").count(), 3);
    assert_eq!(registrar.calls(), 5);
    assert_eq!(controller.snapshot().sample_count, 5);

    controller.stop();
}

#[tokio::test]
async fn breaker_shields_registrar_and_recovers() {
    let controller =
        AdaptiveConcurrencyController::new("registrar", ControllerConfig::default());
    let breaker = Arc::new(tight_breaker());
    // Three failures, then healthy again.
    let registrar = Arc::new(FlakyRegistrar::new(3));

    for i in 0..6 {
        let domain = format!("example{i}.com");
        let breaker = Arc::clone(&breaker);
        let registrar = Arc::clone(&registrar);
        let _ = controller
            .run(async move { breaker.execute(registrar.check_domain(&domain)).await })
            .await;
    }

    // Calls 4-6 were rejected by the open breaker without reaching the wire.
    assert_eq!(registrar.calls(), 3);
    assert_eq!(breaker.state(), CircuitState::Open);

    // After the reset timeout, probes flow again and the circuit closes.
    tokio::time::sleep(Duration::from_millis(150)).await;
    for _ in 0..2 {
        let breaker = Arc::clone(&breaker);
        let registrar = Arc::clone(&registrar);
        let result = controller
            .run(async move { breaker.execute(registrar.check_domain("probe.com")).await })
            .await;
        assert!(result.is_ok());
    }
    assert_eq!(breaker.state(), CircuitState::Closed);

    // Failures were recorded as controller samples too.
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.sample_count, 8);
    assert!(snapshot.recent_error_rate > 0.5);

    controller.stop();
}

#[tokio::test]
async fn open_breaker_error_is_distinguishable() {
    let breaker = tight_breaker();

    for _ in 0..3 {
        let _ = breaker
            .execute(async { Err::<(), _>("connection reset") })
            .await;
    }

    let result = breaker.execute(async { Ok::<_, &str>("never runs") }).await;
    match result {
        Err(e) => assert!(e.is_open()),
        Ok(_) => panic!("open breaker must reject"),
    }
}

#[tokio::test]
async fn controller_adapts_to_scripted_failures() {
    let controller = AdaptiveConcurrencyController::new(
        "registrar",
        ControllerConfig {
            min_concurrency: 1,
            max_concurrency: 20,
            initial_concurrency: 8,
            min_samples: 5,
            ..ControllerConfig::default()
        },
    );
    let registrar = Arc::new(FlakyRegistrar::new(u32::MAX));

    for i in 0..10 {
        let domain = format!("example{i}.com");
        let registrar = Arc::clone(&registrar);
        let _ = controller
            .run(async move { registrar.check_domain(&domain).await })
            .await;
    }

    controller.evaluate_now();
    assert_eq!(controller.snapshot().current_concurrency, 4);

    controller.stop();
}

// --- hybrid cache degradation ---

#[tokio::test]
async fn cached_results_survive_remote_outage() {
    let remote = Arc::new(InMemoryRemote::new());
    let cache: HybridCache<String> = HybridCache::with_remote(
        "whois",
        HybridCacheConfig {
            command_timeout_ms: 200,
            connect_timeout_ms: 200,
            connect_attempts: 1,
            connect_backoff_ms: 10,
            default_ttl_secs: 3_600,
        },
        TtlCacheConfig::default(),
        BreakerConfig {
            failure_threshold: 2,
            failure_window_ms: 60_000,
            reset_timeout_ms: 60_000,
            success_threshold: 2,
        },
        Arc::clone(&remote) as Arc<dyn RemoteTier>,
        Arc::new(NoopMetrics),
    )
    .await;

    cache
        .set("example.com", "available=false".to_string(), None)
        .await;
    assert!(cache.stats().remote_connected);

    // Remote tier goes down hard.
    remote.fail_commands(true);

    // Reads still serve the locally written value while the breaker trips.
    for _ in 0..3 {
        assert_eq!(
            cache.get("example.com").await,
            Some("available=false".to_string())
        );
    }
    assert_eq!(cache.stats().breaker_state, CircuitState::Open);

    // Writes during the outage stay available too.
    cache
        .set("example.org", "available=true".to_string(), None)
        .await;
    assert_eq!(
        cache.get("example.org").await,
        Some("available=true".to_string())
    );
}

#[tokio::test]
async fn second_instance_sees_remote_writes() {
    // Two cache instances sharing one remote tier, as two processes would.
    let remote = Arc::new(InMemoryRemote::new());
    let config = HybridCacheConfig {
        connect_attempts: 1,
        connect_backoff_ms: 10,
        ..HybridCacheConfig::default()
    };

    let writer: HybridCache<String> = HybridCache::with_remote(
        "whois-a",
        config.clone(),
        TtlCacheConfig::default(),
        BreakerConfig::default(),
        Arc::clone(&remote) as Arc<dyn RemoteTier>,
        Arc::new(NoopMetrics),
    )
    .await;
    let reader: HybridCache<String> = HybridCache::with_remote(
        "whois-b",
        config,
        TtlCacheConfig::default(),
        BreakerConfig::default(),
        Arc::clone(&remote) as Arc<dyn RemoteTier>,
        Arc::new(NoopMetrics),
    )
    .await;

    writer
        .set("example.com", "available=false".to_string(), None)
        .await;

    // The reader has nothing local; the hit comes from the shared tier.
    assert_eq!(
        reader.get("example.com").await,
        Some("available=false".to_string())
    );
}

// --- registries ---

#[tokio::test]
async fn registries_share_state_by_name() {
    let controllers = ControllerRegistry::new(ControllerConfig::default());
    let caches = CacheRegistry::new(
        HybridCacheConfig::default(),
        TtlCacheConfig::default(),
        BreakerConfig::default(),
    );

    let first = controllers.get_or_create("registrar:verisign");
    let _: Result<(), &str> = first.run(async { Err("boom") }).await;

    // A later lookup by another caller observes the recorded sample.
    let second = controllers.get_or_create("registrar:verisign");
    assert_eq!(second.snapshot().sample_count, 1);

    caches
        .get_or_create("whois")
        .await
        .set("example.com", serde_json::json!({"premium": true}), None)
        .await;
    assert_eq!(
        caches.get_or_create("whois").await.get("example.com").await,
        Some(serde_json::json!({"premium": true}))
    );

    controllers.stop_all();
    caches.close_all().await;
}

// --- error propagation ---

#[tokio::test]
async fn operation_errors_propagate_unchanged_through_the_chain() {
    let controller =
        AdaptiveConcurrencyController::new("registrar", ControllerConfig::default());
    let breaker = Arc::new(tight_breaker());

    let breaker_for_call = Arc::clone(&breaker);
    let result: Result<(), BreakerError<&str>> = controller
        .run(async move {
            breaker_for_call
                .execute(async { Err::<(), _>("EAI_AGAIN registrar.example") })
                .await
        })
        .await;

    match result {
        Err(BreakerError::Inner(e)) => assert_eq!(e, "EAI_AGAIN registrar.example"),
        other => panic!("expected the registrar error back, got {other:?}"),
    }

    controller.stop();
}
