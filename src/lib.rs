//! Regshield - resilience layer for registrar-facing outbound calls.
//!
//! Services that fan out to flaky, rate-limited registrar APIs need four
//! things between themselves and the wire: fast rejection when a key is over
//! budget, a bounded and self-tuning amount of in-flight work, a guard that
//! stops hammering a dependency that is already down, and a cache that keeps
//! recent results available even when its shared tier is unreachable. This
//! crate provides exactly that layer; routing, registrar protocol parsing,
//! and persistence are the caller's business.
//!
//! # Architecture
//!
//! A call travels limiter -> controller -> breaker, and its outcome feeds
//! back into the controller's sample window and the breaker's state machine:
//!
//! - [`limiter::SlidingWindowLimiter`] - per-key admission over a trailing
//!   window
//! - [`controller::AdaptiveConcurrencyController`] - AIMD-adjusted bound on
//!   in-flight work, FIFO waiter queue, background evaluator
//! - [`breaker::CircuitBreaker`] - closed/open/half-open guard per dependency
//! - [`cache::HybridCache`] - remote tier + local [`cache::TtlCache`]
//!   fallback, every remote command behind the breaker and a timeout race
//! - [`registry`] - named-instance registries so callers sharing a resource
//!   name share one controller/cache
//!
//! # Modules
//!
//! - [`config`] - serde-backed configuration with TOML loading
//! - [`error`] - error taxonomy for the crate
//! - [`telemetry`] - metrics sink port and log-value masking
//! - [`testkit`] - remote-tier test doubles (requires `testkit` feature)
//!
//! # Example
//!
//! ```
//! use regshield::config::{ControllerConfig, LimiterConfig};
//! use regshield::controller::AdaptiveConcurrencyController;
//! use regshield::limiter::SlidingWindowLimiter;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let limiter = SlidingWindowLimiter::new(LimiterConfig::default());
//! let controller = AdaptiveConcurrencyController::new(
//!     "registrar:verisign",
//!     ControllerConfig::default(),
//! );
//!
//! if limiter.try_request("registrar:verisign") {
//!     let result: Result<&str, &str> =
//!         controller.run(async { Ok("domain available") }).await;
//!     assert!(result.is_ok());
//! }
//! controller.stop();
//! # }
//! ```

pub mod breaker;
pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod limiter;
pub mod registry;
pub mod telemetry;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use cache::{HybridCache, HybridCacheStats, RemoteTier, TtlCache};
pub use config::ResilienceConfig;
pub use controller::{AdaptiveConcurrencyController, ControllerSnapshot};
pub use error::{BreakerError, Error, RemoteError, Result};
pub use limiter::SlidingWindowLimiter;
pub use registry::{CacheRegistry, ControllerRegistry};
