use std::time::Duration;

use thiserror::Error;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Failures of the remote cache tier.
///
/// These never surface to `HybridCache` callers directly: reads fall back to
/// the local tier and write mirrors are best-effort. They do feed the circuit
/// breaker guarding the remote tier.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote tier unavailable: {0}")]
    Unavailable(String),

    #[error("remote operation timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("remote I/O error: {0}")]
    Io(String),

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error returned by [`CircuitBreaker::execute`](crate::breaker::CircuitBreaker::execute).
///
/// `Open` means the breaker rejected the call without polling the wrapped
/// operation; callers should treat it as transient and retry after the
/// breaker's reset timeout. `Inner` re-raises the operation's own error
/// unchanged after it has been recorded as a failure.
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    #[error("circuit breaker is open")]
    Open,

    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Returns true if the breaker rejected the call without attempting it.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open)
    }

    /// Unwrap the operation's own error, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Open => None,
            BreakerError::Inner(e) => Some(e),
        }
    }
}

impl<E: Into<Error>> BreakerError<E> {
    /// Fold into the crate-level taxonomy, attaching the breaker's name to
    /// an open rejection so callers can tell breakers apart.
    pub fn into_error(self, name: impl Into<String>) -> Error {
        match self {
            BreakerError::Open => Error::CircuitOpen { name: name.into() },
            BreakerError::Inner(e) => e.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// The sliding-window limiter rejected the request. Callers should back
    /// off for at least `retry_after` before trying again.
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    /// A circuit breaker rejected the call without attempting it.
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: String },

    /// An operation exceeded its per-call time bound.
    #[error("operation timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error(transparent)]
    Remote(RemoteError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Remote timeouts fold into the taxonomy's own timeout variant; everything
/// else stays a remote-tier error.
impl From<RemoteError> for Error {
    fn from(e: RemoteError) -> Self {
        match e {
            RemoteError::Timeout { elapsed } => Error::Timeout { elapsed },
            other => Error::Remote(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
