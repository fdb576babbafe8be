//! Unified error handling for the relay.
//!
//! Mirrors the error taxonomy every inbound event can raise: validation,
//! authorization, rate limiting, not-found, unavailable, session, and
//! internal errors. Each variant carries enough context to both report to
//! the offending client and label metrics.

use relay_proto::ValidationError;
use thiserror::Error;

/// Errors raised while handling a single inbound event.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{role} is not permitted to send {event}")]
    Authorization { role: &'static str, event: &'static str },

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("driver {0} not found")]
    DriverNotFound(String),

    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("driver {0} is not currently live")]
    DriverUnavailable(String),

    #[error("unknown session token")]
    UnknownSession,

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Static error code used for metrics labeling and wire `error.code`.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Authorization { .. } => "authorization_error",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::DriverNotFound(_) => "not_found",
            Self::AccountNotFound(_) => "not_found",
            Self::DriverUnavailable(_) => "unavailable",
            Self::UnknownSession => "session_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether this error is reported to the client without mutating any
    /// registry or session state (spec.md §7 propagation policy).
    pub fn is_side_effect_free(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}
