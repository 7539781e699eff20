//! Remote cache tier port.
//!
//! The hybrid cache talks to its shared remote tier (typically a managed
//! key/value service reachable by every process instance) exclusively through
//! this trait. Concrete clients live outside this crate; the `testkit`
//! feature ships an in-memory implementation for tests.
//!
//! Payloads are serialized JSON strings: remote entries cross a process
//! boundary, local entries never do.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RemoteError;

/// Connection state reported by a remote tier client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No usable connection.
    Disconnected,
    /// Client is establishing or re-establishing a connection.
    Connecting,
    /// Client believes it has a usable connection. Advisory only.
    Connected,
}

/// Remote key/value tier used as the shared cache layer.
///
/// All methods may be called from multiple tasks concurrently. After
/// [`close`](Self::close) the client must fail further commands with
/// [`RemoteError::Unavailable`] rather than panic.
#[async_trait]
pub trait RemoteTier: Send + Sync {
    /// Establish the connection. Called a bounded number of times by the
    /// hybrid cache at construction; afterwards reconnection is the client's
    /// own responsibility.
    async fn connect(&self) -> Result<(), RemoteError>;

    /// Current connection state as the client sees it. Advisory: a stale
    /// `Connected` reading must not be trusted blindly.
    fn connection_state(&self) -> ConnectionState;

    /// Fetch the serialized payload under `key`, if present.
    async fn get(&self, key: &str) -> Result<Option<String>, RemoteError>;

    /// Store a serialized payload under `key` with the given TTL.
    async fn set(&self, key: &str, payload: &str, ttl: Duration) -> Result<(), RemoteError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), RemoteError>;

    /// Release the connection.
    async fn close(&self);
}
