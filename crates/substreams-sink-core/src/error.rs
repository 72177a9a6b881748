//! Error types for the sink supervisor.

use thiserror::Error;

/// Errors raised while resolving the run configuration.
///
/// Always fatal and always raised before any network or file I/O.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required option '{field}' (flag --{flag} or env {env})")]
    Missing {
        field: &'static str,
        flag: &'static str,
        env: &'static str,
    },

    #[error("invalid value {value:?} for '{field}': {reason}")]
    Invalid {
        field: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by a cursor backend.
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cursor I/O error at {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cursor HTTP error at {location}: {reason}")]
    Http { location: String, reason: String },

    #[error("cursor endpoint {location} answered with status {status}")]
    Status { location: String, status: u16 },
}

/// Top-level errors of the supervisor.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("authorization rejected: {0}")]
    Authorization(String),

    #[error("failed to open cursor store: {0}")]
    CursorSetup(#[source] CursorError),

    #[error("failed to read cursor: {0}")]
    CursorRead(#[source] CursorError),

    #[error("failed to write cursor: {0}")]
    CursorWrite(#[source] CursorError),

    #[error("no stream activity for {elapsed_secs}s (inactivity timeout {timeout_secs}s)")]
    Inactivity { elapsed_secs: u64, timeout_secs: u64 },

    #[error("stream closed with error: {0}")]
    Stream(String),

    #[error("stream reported fatal error: {0}")]
    Fatal(String),

    #[error("stream emitter failed: {0}")]
    Emitter(String),
}

impl SinkError {
    /// Returns `true` for errors raised before any connection attempt
    /// (configuration or credential problems).
    pub fn is_startup(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Authorization(_))
    }

    /// Returns `true` for terminal stream faults that an external process
    /// manager is expected to recover from by restarting the sink.
    pub fn is_restartable(&self) -> bool {
        matches!(
            self,
            Self::Inactivity { .. } | Self::Stream(_) | Self::Fatal(_) | Self::Emitter(_)
        )
    }
}
