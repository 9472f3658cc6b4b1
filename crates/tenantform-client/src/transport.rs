//! HTTP transport for the tenant management API.
//!
//! Every remote call goes through [`Transport::execute`], which paces the
//! request against the shared rate-limit budget, authenticates it, classifies
//! the response, and retries according to the request's [`OperationKind`].

use crate::auth::Authenticator;
use crate::classify::classify_response;
use crate::config::ProviderConfig;
use crate::context::CallContext;
use crate::error::{ApiError, ApiResult};
use crate::link;
use crate::pacer::{RateLimitPacer, RateLimitSnapshot};
use crate::retry::BackoffPolicy;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const USER_AGENT: &str = concat!("tenantform/", env!("CARGO_PKG_VERSION"));

/// How a request may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    IdempotentRead,
    IdempotentWrite,
    /// Retried only when the remote answered with a transient status, or the
    /// connection was never established.
    NonIdempotentWrite,
}

impl OperationKind {
    /// Whether a failed attempt of this kind may be replayed.
    #[must_use]
    pub fn allows_retry(self, error: &ApiError) -> bool {
        match (self, error) {
            (OperationKind::NonIdempotentWrite, ApiError::Network { request_sent, .. }) => {
                !request_sent
            }
            _ => error.is_retryable(),
        }
    }
}

/// A prepared request against a path below the tenant root.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    kind: OperationKind,
}

impl ApiRequest {
    fn new(method: Method, path: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            kind,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path, OperationKind::IdempotentRead)
    }

    /// POST is non-idempotent unless overridden with [`kind`](Self::kind).
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path, OperationKind::NonIdempotentWrite)
    }

    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path, OperationKind::IdempotentWrite)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path, OperationKind::IdempotentWrite)
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attach a JSON body. Serialization failures surface from
    /// [`Transport::execute`] as [`ApiError::Parse`].
    pub fn json<T: Serialize>(mut self, body: &T) -> ApiResult<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: OperationKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn operation_kind(&self) -> OperationKind {
        self.kind
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// `"<METHOD> <path>"`, used as the operation name in logs and errors.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Metadata of a successful response.
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    pub status: u16,
    pub next_link: Option<Url>,
    /// `after` cursor of the next page, if there is one.
    pub next_cursor: Option<String>,
    pub rate_limit: RateLimitSnapshot,
}

/// A successful response. `body` is `None` for empty bodies (e.g. 204).
#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub meta: ResponseMeta,
    pub body: Option<Value>,
}

impl ApiResponse {
    /// Decode the body.
    pub fn json<T: DeserializeOwned>(&self) -> ApiResult<T> {
        let body = self.body.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(body)?)
    }

    pub fn into_json<T: DeserializeOwned>(self) -> ApiResult<T> {
        Ok(serde_json::from_value(self.body.unwrap_or(Value::Null))?)
    }
}

/// Client for the tenant management API.
///
/// Clones share the rate-limit pacer and the cached OAuth token.
#[derive(Debug, Clone)]
pub struct Transport {
    base_url: Url,
    http_client: Client,
    auth: Authenticator,
    pacer: RateLimitPacer,
    backoff: BackoffPolicy,
}

impl Transport {
    /// Build a transport from resolved provider configuration.
    pub fn new(config: &ProviderConfig) -> ApiResult<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ApiError::InvalidConfig(format!("Failed to build HTTP client: {e}")))?;
        Self::with_http_client(config, http_client)
    }

    /// Build a transport around a pre-built `reqwest::Client`.
    pub fn with_http_client(config: &ProviderConfig, http_client: Client) -> ApiResult<Self> {
        let auth = Authenticator::new(
            config.credentials.clone(),
            &config.base_url,
            http_client.clone(),
        )?;
        Ok(Self {
            base_url: config.base_url.clone(),
            http_client,
            auth,
            pacer: RateLimitPacer::new(config.max_api_capacity),
            backoff: BackoffPolicy::new(config.retry_max_attempts, config.retry_max_wait),
        })
    }

    /// Replace the backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn pacer(&self) -> &RateLimitPacer {
        &self.pacer
    }

    #[must_use]
    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Execute `request` with pacing, classification, and retries.
    pub async fn execute(&self, ctx: &CallContext, request: &ApiRequest) -> ApiResult<ApiResponse> {
        let operation = request.describe();
        let kind = request.operation_kind();
        self.backoff
            .execute_when(
                ctx,
                &operation,
                |error| kind.allows_retry(error),
                || self.send_once(ctx, request),
            )
            .await
    }

    /// Execute and decode the body.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        request: &ApiRequest,
    ) -> ApiResult<T> {
        self.execute(ctx, request).await?.into_json()
    }

    /// Execute, discarding the body.
    pub async fn send(&self, ctx: &CallContext, request: &ApiRequest) -> ApiResult<ResponseMeta> {
        Ok(self.execute(ctx, request).await?.meta)
    }

    async fn send_once(&self, ctx: &CallContext, request: &ApiRequest) -> ApiResult<ApiResponse> {
        ctx.ensure_active()?;
        self.pacer.wait_turn(ctx).await?;

        let url = self
            .base_url
            .join(&request.path)
            .map_err(|e| ApiError::InvalidConfig(format!("invalid path '{}': {e}", request.path)))?;

        let mut builder = self.http_client.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let builder = self.auth.apply(builder).await?;

        debug!(method = %request.method, path = %request.path, "Tenant API request");
        let response = ctx
            .run(async { builder.send().await.map_err(ApiError::from) })
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let rate_limit = RateLimitSnapshot::from_headers(&headers);
        self.pacer.observe(rate_limit).await;

        let text = ctx
            .run(async { response.text().await.map_err(ApiError::from) })
            .await?;

        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                self.auth.invalidate().await;
            }
            let retry_after = retry_after(&headers, &rate_limit);
            let error = classify_response(status.as_u16(), &text, retry_after);
            if status == StatusCode::TOO_MANY_REQUESTS {
                warn!(
                    path = %request.path,
                    retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
                    "Tenant API rate limit hit"
                );
            } else {
                debug!(
                    path = %request.path,
                    status = status.as_u16(),
                    class = %error.class(),
                    "Tenant API request failed"
                );
            }
            return Err(error);
        }

        let body = if text.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(&text)?)
        };
        let next_link = link::next_link(&headers);
        let next_cursor = next_link.as_ref().and_then(link::cursor_of);

        Ok(ApiResponse {
            meta: ResponseMeta {
                status: status.as_u16(),
                next_link,
                next_cursor,
                rate_limit,
            },
            body,
        })
    }
}

/// Delay floor for the next attempt: `Retry-After` seconds, else the time
/// until the reported rate-limit reset.
fn retry_after(headers: &HeaderMap, rate_limit: &RateLimitSnapshot) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .or_else(|| rate_limit.until_reset(chrono::Utc::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_non_idempotent_write_never_replays_sent_request() {
        let sent = ApiError::Network {
            message: "timed out".into(),
            request_sent: true,
        };
        let refused = ApiError::Network {
            message: "connection refused".into(),
            request_sent: false,
        };
        assert!(!OperationKind::NonIdempotentWrite.allows_retry(&sent));
        assert!(OperationKind::NonIdempotentWrite.allows_retry(&refused));
        assert!(OperationKind::IdempotentRead.allows_retry(&sent));
    }

    #[test]
    fn test_non_idempotent_write_retries_transient_status() {
        let err = ApiError::Transient {
            status: 503,
            message: "unavailable".into(),
            retry_after: None,
        };
        assert!(OperationKind::NonIdempotentWrite.allows_retry(&err));
    }

    #[test]
    fn test_request_defaults() {
        let req = ApiRequest::post("/api/v1/users").query("activate", "false");
        assert_eq!(req.operation_kind(), OperationKind::NonIdempotentWrite);
        assert_eq!(req.describe(), "POST /api/v1/users");
        assert_eq!(req.query_pairs(), &[("activate".to_string(), "false".to_string())]);

        assert_eq!(
            ApiRequest::delete("/api/v1/groups/1").operation_kind(),
            OperationKind::IdempotentWrite
        );
    }

    #[test]
    fn test_retry_after_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(
            retry_after(&headers, &RateLimitSnapshot::default()),
            Some(Duration::from_secs(7))
        );
        assert_eq!(retry_after(&HeaderMap::new(), &RateLimitSnapshot::default()), None);
    }
}
