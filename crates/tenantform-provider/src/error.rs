//! Provider error types.
//!
//! Errors raised while reconciling a managed object, with transient/permanent
//! classification and stable codes used in diagnostics.

use tenantform_client::{ApiError, ConfigError, ErrorClass};
use thiserror::Error;

/// Error that can occur while reconciling a resource.
#[derive(Debug, Error)]
pub enum ProviderError {
    // Local errors, raised before any remote call
    /// Desired state violates an invariant.
    #[error("invalid configuration for {attribute}: {message}")]
    Validation { attribute: String, message: String },

    /// A deactivated principal received a change other than reactivation.
    #[error("only the status of a deactivated user can be updated, we detected other change (current status: {current_status})")]
    RollbackForbidden { current_status: String },

    /// A next-generation-only kind was used against a classic tenant.
    #[error("{kind} is only available on next-generation tenants; this tenant is configured with classic_org = true. Contact your tenant administrator or support to enable the feature")]
    FeatureGated { kind: String },

    /// Provider settings are missing or invalid.
    #[error("provider configuration error: {0}")]
    Config(#[from] ConfigError),

    /// No resource or data source is registered under this kind.
    #[error("unsupported resource kind: {kind}")]
    UnknownKind { kind: String },

    // Remote outcomes
    /// The object does not exist on the tenant.
    #[error("{kind} not found: {identifier}")]
    NotFound { kind: String, identifier: String },

    /// The object disappeared while being updated.
    #[error("{kind} {id} vanished during update")]
    ObjectVanished { kind: String, id: String },

    /// A lookup expected one result and found several.
    #[error("{kind}: found {count} objects matching {criteria}; narrow the filter so exactly one matches")]
    AmbiguousMatch {
        kind: String,
        criteria: String,
        count: usize,
    },

    /// A convergence or status-transition wait ran out of time.
    #[error("{operation} did not converge within {waited_secs}s (last observed: {last_observed})")]
    ConvergenceTimeout {
        operation: String,
        waited_secs: u64,
        last_observed: String,
    },

    /// Retries ran out; carries the last underlying classification.
    #[error("{operation} failed after {attempts} attempt(s) (final classification: {last_class}): {message}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_class: ErrorClass,
        message: String,
    },

    /// The call context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Any other remote failure.
    #[error("{operation}: {source}")]
    Api {
        operation: String,
        #[source]
        source: ApiError,
    },

    /// Several independent failures, e.g. from set member operations.
    #[error("{} operation(s) failed: {}", .0.len(), join_messages(.0))]
    Multiple(Vec<ProviderError>),

    /// Remote payload or desired state could not be (de)serialized.
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

fn join_messages(errors: &[ProviderError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ProviderError {
    /// Lift a transport error, naming the operation that failed.
    pub fn api(operation: impl Into<String>, source: ApiError) -> Self {
        let operation = operation.into();
        match source {
            ApiError::Cancelled => ProviderError::Cancelled,
            ApiError::RetriesExhausted {
                operation: op,
                attempts,
                last_class,
                message,
            } => ProviderError::RetriesExhausted {
                operation: format!("{operation} ({op})"),
                attempts,
                last_class,
                message,
            },
            ApiError::ConvergenceTimeout {
                operation: op,
                waited,
                last_observed,
            } => ProviderError::ConvergenceTimeout {
                operation: op,
                waited_secs: waited.as_secs(),
                last_observed,
            },
            source => ProviderError::Api { operation, source },
        }
    }

    /// Create a validation error.
    pub fn validation(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::Validation {
            attribute: attribute.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(kind: impl Into<String>, identifier: impl Into<String>) -> Self {
        ProviderError::NotFound {
            kind: kind.into(),
            identifier: identifier.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        ProviderError::Serialization {
            message: message.into(),
        }
    }

    /// Whether the remote reported the object as missing.
    pub fn is_not_found(&self) -> bool {
        match self {
            ProviderError::NotFound { .. } => true,
            ProviderError::Api { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled)
    }

    /// Check if this error is transient and a later reconcile may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::ConvergenceTimeout { .. } => true,
            ProviderError::RetriesExhausted { last_class, .. } => last_class.is_retryable(),
            ProviderError::Api { source, .. } => source.class().is_retryable(),
            ProviderError::Multiple(errors) => errors.iter().all(ProviderError::is_transient),
            _ => false,
        }
    }

    /// Whether the error was raised locally, before any remote call.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ProviderError::Validation { .. }
                | ProviderError::RollbackForbidden { .. }
                | ProviderError::FeatureGated { .. }
                | ProviderError::UnknownKind { .. }
                | ProviderError::Config(_)
        )
    }

    /// Get an error code for classification.
    pub fn error_code(&self) -> &'static str {
        match self {
            ProviderError::Validation { .. } => "VALIDATION_ERROR",
            ProviderError::RollbackForbidden { .. } => "ROLLBACK_FORBIDDEN",
            ProviderError::FeatureGated { .. } => "FEATURE_GATED",
            ProviderError::UnknownKind { .. } => "UNKNOWN_KIND",
            ProviderError::Config(_) => "CONFIG_ERROR",
            ProviderError::NotFound { .. } => "NOT_FOUND",
            ProviderError::ObjectVanished { .. } => "OBJECT_VANISHED",
            ProviderError::AmbiguousMatch { .. } => "AMBIGUOUS_MATCH",
            ProviderError::ConvergenceTimeout { .. } => "CONVERGENCE_TIMEOUT",
            ProviderError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            ProviderError::Cancelled => "CANCELLED",
            ProviderError::Api { source, .. } => source.error_code(),
            ProviderError::Multiple(_) => "MULTIPLE_ERRORS",
            ProviderError::Serialization { .. } => "SERIALIZATION_ERROR",
        }
    }
}

impl ProviderError {
    /// Lower back into a transport error, for probes run inside the client's
    /// poll combinator.
    pub fn into_api_error(self) -> ApiError {
        match self {
            ProviderError::Api { source, .. } => source,
            ProviderError::Cancelled => ApiError::Cancelled,
            ProviderError::RetriesExhausted {
                operation,
                attempts,
                last_class,
                message,
            } => ApiError::RetriesExhausted {
                operation,
                attempts,
                last_class,
                message,
            },
            ProviderError::NotFound { kind, identifier } => ApiError::NotFound {
                message: format!("{kind} {identifier}"),
            },
            other => ApiError::Parse(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::serialization(err.to_string())
    }
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Attach an operation name to transport errors.
pub trait ApiResultExt<T> {
    fn op(self, operation: &str) -> ProviderResult<T>;
}

impl<T> ApiResultExt<T> for Result<T, ApiError> {
    fn op(self, operation: &str) -> ProviderResult<T> {
        self.map_err(|e| ProviderError::api(operation, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exhausted_retries_keep_final_class() {
        let err = ProviderError::api(
            "create group",
            ApiError::RetriesExhausted {
                operation: "POST /api/v1/groups".into(),
                attempts: 5,
                last_class: ErrorClass::RateLimited,
                message: "rate limited: slow down".into(),
            },
        );
        assert_eq!(err.error_code(), "RETRIES_EXHAUSTED");
        assert!(err.to_string().contains("final classification: rate_limited"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_cancellation_is_preserved() {
        assert!(ProviderError::api("read user", ApiError::Cancelled).is_cancelled());
    }

    #[test]
    fn test_convergence_timeout_names_last_observation() {
        let err = ProviderError::api(
            "schema",
            ApiError::ConvergenceTimeout {
                operation: "user schema property 'size'".into(),
                waited: Duration::from_secs(120),
                last_observed: "property absent".into(),
            },
        );
        let message = err.to_string();
        assert!(message.contains("user schema property 'size'"));
        assert!(message.contains("property absent"));
    }

    #[test]
    fn test_not_found_through_api_error() {
        let err = ProviderError::api(
            "read group",
            ApiError::NotFound {
                message: "gone".into(),
            },
        );
        assert!(err.is_not_found());
        assert!(!err.is_local());
    }

    #[test]
    fn test_local_errors() {
        let local = vec![
            ProviderError::validation("recovery_answer", "too short"),
            ProviderError::RollbackForbidden {
                current_status: "DEPROVISIONED".into(),
            },
            ProviderError::FeatureGated {
                kind: "captcha".into(),
            },
        ];
        for err in local {
            assert!(err.is_local(), "{} should be local", err.error_code());
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn test_multiple_lists_every_failure() {
        let err = ProviderError::Multiple(vec![
            ProviderError::not_found("permission", "a"),
            ProviderError::validation("b", "bad"),
        ]);
        let message = err.to_string();
        assert!(message.starts_with("2 operation(s) failed"));
        assert!(message.contains("permission not found: a"));
    }

    #[test]
    fn test_rollback_forbidden_message() {
        let err = ProviderError::RollbackForbidden {
            current_status: "DEPROVISIONED".into(),
        };
        assert!(err
            .to_string()
            .starts_with("only the status of a deactivated user can be updated, we detected other change"));
    }
}
