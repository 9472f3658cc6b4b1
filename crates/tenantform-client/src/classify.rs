//! Response classification.
//!
//! Maps a non-success HTTP status and its error body onto an [`ApiError`].
//! The tenant reports some eventual-consistency conditions as ordinary 4xx or
//! 5xx responses, so the body text is inspected before the status.

use crate::error::ApiError;
use serde::Deserialize;
use std::time::Duration;

/// Body text returned while the tenant is still purging data for a previous
/// delete.
pub const CLEANUP_IN_PROGRESS: &str =
    "Wait until the data clean up process finishes and then try again";

/// Body text returned when a schema property is re-created while the delete of
/// a property with the same variable name is still running.
pub const ATTRIBUTE_DELETION_INCOMPLETE: &str =
    "deletion process for an attribute with the same variable name is incomplete";

/// Error body shape used by the management API.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_summary: Option<String>,
    #[serde(default)]
    pub error_causes: Vec<ErrorCause>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorCause {
    #[serde(default)]
    pub error_summary: Option<String>,
}

impl ErrorBody {
    /// Render the summary and its causes as one line, falling back to the raw
    /// body when it is not a structured error.
    #[must_use]
    pub fn describe(raw: &str) -> String {
        let Ok(body) = serde_json::from_str::<ErrorBody>(raw) else {
            return raw.trim().to_string();
        };
        let Some(summary) = body.error_summary else {
            return raw.trim().to_string();
        };
        let causes: Vec<String> = body
            .error_causes
            .into_iter()
            .filter_map(|c| c.error_summary)
            .collect();
        match (body.error_code, causes.is_empty()) {
            (Some(code), true) => format!("{code}: {summary}"),
            (Some(code), false) => format!("{code}: {summary} ({})", causes.join("; ")),
            (None, true) => summary,
            (None, false) => format!("{summary} ({})", causes.join("; ")),
        }
    }
}

/// Whether the body reports a condition that clears once the tenant finishes
/// background work.
#[must_use]
pub fn is_eventual_consistency_body(body: &str) -> bool {
    body.contains(CLEANUP_IN_PROGRESS) || body.contains(ATTRIBUTE_DELETION_INCOMPLETE)
}

/// Classify a non-success response.
///
/// `retry_after` is the delay floor derived from `Retry-After` or the
/// rate-limit reset header, if either was present. Every retryable class
/// keeps it.
#[must_use]
pub fn classify_response(status: u16, body: &str, retry_after: Option<Duration>) -> ApiError {
    let message = if body.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        ErrorBody::describe(body)
    };

    if is_eventual_consistency_body(body) {
        return ApiError::Transient {
            status,
            message,
            retry_after,
        };
    }

    match status {
        404 => ApiError::NotFound { message },
        409 => ApiError::Conflict { message },
        429 => ApiError::RateLimited {
            message,
            retry_after,
        },
        501 => ApiError::PermanentServer { status, message },
        500..=599 => ApiError::Transient {
            status,
            message,
            retry_after,
        },
        400..=499 => ApiError::PermanentClient { status, message },
        _ => ApiError::PermanentServer { status, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn test_status_mapping() {
        assert_eq!(classify_response(404, "", None).class(), ErrorClass::NotFound);
        assert_eq!(classify_response(409, "", None).class(), ErrorClass::Conflict);
        assert_eq!(classify_response(429, "", None).class(), ErrorClass::RateLimited);
        assert_eq!(classify_response(500, "", None).class(), ErrorClass::Transient);
        assert_eq!(classify_response(503, "", None).class(), ErrorClass::Transient);
        assert_eq!(
            classify_response(501, "", None).class(),
            ErrorClass::PermanentServer
        );
        assert_eq!(
            classify_response(400, "", None).class(),
            ErrorClass::PermanentClient
        );
        assert_eq!(
            classify_response(403, "", None).class(),
            ErrorClass::PermanentClient
        );
    }

    #[test]
    fn test_cleanup_phrase_is_transient_regardless_of_status() {
        let body = r#"{"errorCode":"E0000001","errorSummary":"Api validation failed","errorCauses":[{"errorSummary":"Wait until the data clean up process finishes and then try again"}]}"#;
        assert_eq!(classify_response(501, body, None).class(), ErrorClass::Transient);
        assert_eq!(classify_response(400, body, None).class(), ErrorClass::Transient);
    }

    #[test]
    fn test_attribute_deletion_phrase_is_transient() {
        let body = r#"{"errorSummary":"Api validation failed: deletion process for an attribute with the same variable name is incomplete"}"#;
        assert_eq!(classify_response(400, body, None).class(), ErrorClass::Transient);
    }

    #[test]
    fn test_describe_structured_body() {
        let body = r#"{"errorCode":"E0000001","errorSummary":"Api validation failed: login","errorCauses":[{"errorSummary":"login: An object with this field already exists"}]}"#;
        assert_eq!(
            ErrorBody::describe(body),
            "E0000001: Api validation failed: login (login: An object with this field already exists)"
        );
    }

    #[test]
    fn test_describe_falls_back_to_raw_text() {
        assert_eq!(ErrorBody::describe("  upstream timeout \n"), "upstream timeout");
    }

    #[test]
    fn test_rate_limit_carries_retry_after() {
        let err = classify_response(429, "", Some(Duration::from_secs(12)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_server_error_keeps_reset_floor() {
        let err = classify_response(503, "", Some(Duration::from_secs(4)));
        assert_eq!(err.class(), ErrorClass::Transient);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(4)));

        let err = classify_response(400, "", Some(Duration::from_secs(4)));
        assert_eq!(err.retry_after(), None);
    }
}
