//! Shared test doubles for the remote cache tier.
//!
//! Gated behind the `testkit` feature so downstream crates can drive the
//! hybrid cache through outage scenarios without a real remote service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cache::remote::{ConnectionState, RemoteTier};
use crate::error::RemoteError;

/// In-memory [`RemoteTier`] with switchable failure modes.
///
/// Honors TTLs on read. `fail_commands` makes every command return
/// [`RemoteError::Io`]; `delay_commands` adds a fixed delay so callers can
/// exercise the per-command timeout race; `refuse_connections` makes
/// `connect` fail so the initial connect schedule can be tested.
#[derive(Default)]
pub struct InMemoryRemote {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    connected: AtomicBool,
    failing: AtomicBool,
    refuse_connect: AtomicBool,
    delay: Mutex<Option<Duration>>,
    connect_attempts: AtomicU32,
}

impl InMemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every command fail (or stop doing so).
    pub fn fail_commands(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every command by `delay` before it runs.
    pub fn delay_commands(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Make `connect` fail (or stop doing so).
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Number of `connect` calls seen so far.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Read a stored payload directly, bypassing failure modes.
    pub fn raw_get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock();
        entries.get(key).and_then(|(payload, expires_at)| {
            (Instant::now() <= *expires_at).then(|| payload.clone())
        })
    }

    /// Write a payload directly, bypassing failure modes.
    pub fn raw_set(&self, key: &str, payload: &str, ttl: Duration) {
        self.entries
            .lock()
            .insert(key.to_string(), (payload.to_string(), Instant::now() + ttl));
    }

    /// Delete a payload directly, bypassing failure modes.
    pub fn raw_delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    async fn guard(&self) -> Result<(), RemoteError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("not connected".into()));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Io("simulated failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteTier for InMemoryRemote {
    async fn connect(&self) -> Result<(), RemoteError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("connection refused".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, RemoteError> {
        self.guard().await?;
        Ok(self.raw_get(key))
    }

    async fn set(&self, key: &str, payload: &str, ttl: Duration) -> Result<(), RemoteError> {
        self.guard().await?;
        self.raw_set(key, payload, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RemoteError> {
        self.guard().await?;
        self.raw_delete(key);
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
