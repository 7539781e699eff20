//! Caching tiers: local TTL store, remote tier port, and the hybrid
//! composition with graceful degradation.

pub mod hybrid;
pub mod remote;
pub mod ttl;

pub use hybrid::{HybridCache, HybridCacheStats};
pub use remote::{ConnectionState, RemoteTier};
pub use ttl::TtlCache;
