//! Transport error types.
//!
//! Every failure that leaves the transport carries an [`ErrorClass`], so that
//! callers (and the diagnostics they eventually emit) can always name the
//! final underlying classification, even after retries ran out.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Coarse classification of a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    NotFound,
    Conflict,
    RateLimited,
    Transient,
    PermanentClient,
    PermanentServer,
    Cancelled,
}

impl ErrorClass {
    /// Whether a call failing with this class may be retried.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::RateLimited | ErrorClass::Transient)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::NotFound => "not_found",
            ErrorClass::Conflict => "conflict",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Transient => "transient",
            ErrorClass::PermanentClient => "permanent_client",
            ErrorClass::PermanentServer => "permanent_server",
            ErrorClass::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by the transport and the polling combinators.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The remote object does not exist (HTTP 404).
    #[error("not found: {message}")]
    NotFound { message: String },

    /// The remote rejected the write because of conflicting state (HTTP 409).
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// The remote asked us to slow down (HTTP 429).
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// A failure expected to clear up on its own (5xx, clean-up in progress).
    #[error("transient failure (HTTP {status}): {message}")]
    Transient {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    /// The request never produced a response.
    #[error("network error: {message}")]
    Network {
        message: String,
        /// False when the connection was never established, so the request
        /// cannot have reached the remote.
        request_sent: bool,
    },

    /// The remote rejected the request (4xx).
    #[error("request rejected (HTTP {status}): {message}")]
    PermanentClient { status: u16, message: String },

    /// The remote failed in a way retrying will not fix (501, unparseable body).
    #[error("server error (HTTP {status}): {message}")]
    PermanentServer { status: u16, message: String },

    /// Credentials were refused or a token could not be obtained.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The call context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The call context ran past its deadline before the call completed.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// Retries ran out, either by attempt count or by deadline.
    #[error("{operation} gave up after {attempts} attempt(s), last failure was {last_class}: {message}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_class: ErrorClass,
        message: String,
    },

    /// A convergence or status-transition poll did not reach its target state
    /// before the deadline.
    #[error("{operation} did not converge within {waited:?} (last observed: {last_observed})")]
    ConvergenceTimeout {
        operation: String,
        waited: Duration,
        last_observed: String,
    },

    /// A successful response could not be decoded.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// The transport was misconfigured.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ApiError {
    /// The classification of this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::NotFound { .. } => ErrorClass::NotFound,
            ApiError::Conflict { .. } => ErrorClass::Conflict,
            ApiError::RateLimited { .. } => ErrorClass::RateLimited,
            ApiError::Transient { .. } | ApiError::Network { .. } => ErrorClass::Transient,
            ApiError::PermanentClient { .. } | ApiError::Auth(_) | ApiError::InvalidConfig(_) => {
                ErrorClass::PermanentClient
            }
            ApiError::PermanentServer { .. } | ApiError::Parse(_) => ErrorClass::PermanentServer,
            ApiError::Cancelled => ErrorClass::Cancelled,
            ApiError::DeadlineExceeded => ErrorClass::Transient,
            ApiError::RetriesExhausted { last_class, .. } => *last_class,
            ApiError::ConvergenceTimeout { .. } => ErrorClass::Transient,
        }
    }

    /// Whether the transport may retry the failed call.
    ///
    /// Exhausted retries, convergence timeouts and an expired deadline are
    /// final even though their underlying class may be transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::RetriesExhausted { .. }
            | ApiError::ConvergenceTimeout { .. }
            | ApiError::DeadlineExceeded => false,
            other => other.class().is_retryable(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }

    /// Server-imposed floor for the next retry delay, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after, .. } | ApiError::Transient { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }

    /// Stable code used in diagnostics and logs.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::NotFound { .. } => "NOT_FOUND",
            ApiError::Conflict { .. } => "CONFLICT",
            ApiError::RateLimited { .. } => "RATE_LIMITED",
            ApiError::Transient { .. } => "TRANSIENT",
            ApiError::Network { .. } => "NETWORK_ERROR",
            ApiError::PermanentClient { .. } => "PERMANENT_CLIENT",
            ApiError::PermanentServer { .. } => "PERMANENT_SERVER",
            ApiError::Auth(_) => "AUTH_FAILED",
            ApiError::Cancelled => "CANCELLED",
            ApiError::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ApiError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            ApiError::ConvergenceTimeout { .. } => "CONVERGENCE_TIMEOUT",
            ApiError::Parse(_) => "PARSE_ERROR",
            ApiError::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ApiError::Parse(err.to_string());
        }
        if err.is_builder() {
            return ApiError::InvalidConfig(err.to_string());
        }
        ApiError::Network {
            request_sent: !err.is_connect(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Parse(err.to_string())
    }
}

/// Result type for transport operations.
pub type ApiResult<T> = Result<T, ApiError>;
