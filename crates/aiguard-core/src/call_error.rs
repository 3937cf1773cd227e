//! Failure taxonomy for outbound calls (LLM signal service, exchange proxy).
//!
//! Health ledgers classify failures by [`ErrorKind`], never by matching on
//! message text.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure of an outbound call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Exchange proxy unreachable (connect/DNS/reset).
    #[error("Proxy unreachable: {0}")]
    Transport(String),

    /// Server-side rate limit with a mandatory wait.
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Authentication rejected.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Request rejected as invalid.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Call exceeded the caller-enforced deadline.
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// Malformed or hallucinated model output.
    #[error("Malformed response: {0}")]
    Parse(String),

    /// Any other failure.
    #[error("Call failed: {0}")]
    Other(String),
}

/// Coarse classification of a [`CallError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    RateLimit,
    Auth,
    Validation,
    Timeout,
    Parse,
    Other,
}

impl CallError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) => ErrorKind::Transport,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Server-mandated wait, if this is a rate-limit error.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Whether this layer may retry the call automatically.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl ErrorKind {
    /// Auth and validation failures are terminal for the current call.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Auth | Self::Validation)
    }

    /// Whether the failure is attributable to the symbol being processed.
    ///
    /// Transport failures describe the proxy, not the asset, and never
    /// count towards a symbol blacklist.
    pub fn counts_against_symbol(&self) -> bool {
        !matches!(self, Self::Transport)
    }

    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::RateLimit => "rate_limit",
            Self::Auth => "auth",
            Self::Validation => "validation",
            Self::Timeout => "timeout",
            Self::Parse => "parse",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
