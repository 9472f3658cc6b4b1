//! Transport integration tests against a mock tenant.
//!
//! Tests cover:
//! - Authentication headers (API token, OAuth private-key JWT exchange)
//! - Response classification and retry behaviour per operation kind
//! - Pagination and rate-limit header handling
//! - Cancellation and call deadlines

use serde_json::json;
use std::time::Duration;
use tenantform_client::{
    ApiError, ApiRequest, BackoffPolicy, CallContext, Credentials, ErrorClass, OperationKind,
    ProviderConfig, Transport,
};
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TEST_KEY: &str = include_str!("fixtures/test_rsa_key.pem");

fn fast_backoff(max_attempts: u32) -> BackoffPolicy {
    BackoffPolicy {
        initial_delay: Duration::from_millis(10),
        multiplier: 2,
        max_delay: Duration::from_millis(50),
        max_attempts,
        jitter: false,
    }
}

fn token_config(server: &MockServer) -> ProviderConfig {
    ProviderConfig::new(
        Url::parse(&server.uri()).unwrap(),
        Credentials::ApiToken {
            token: "test-token-123".to_string(),
        },
    )
}

fn transport(server: &MockServer, max_attempts: u32) -> Transport {
    Transport::new(&token_config(server))
        .unwrap()
        .with_backoff(fast_backoff(max_attempts))
}

fn ctx() -> CallContext {
    CallContext::new(Duration::from_secs(30))
}

// ═══════════════════════════════════════════════════════════════════════════
// Authentication
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_api_token_sent_as_ssws() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/groups/00g1"))
        .and(header("Authorization", "SSWS test-token-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "00g1"})))
        .expect(1)
        .mount(&server)
        .await;

    let response = transport(&server, 3)
        .execute(&ctx(), &ApiRequest::get("/api/v1/groups/00g1"))
        .await
        .unwrap();

    assert_eq!(response.meta.status, 200);
    assert_eq!(response.body.unwrap()["id"], "00g1");
}

#[tokio::test]
async fn test_oauth_token_exchanged_once_and_cached() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth2/v1/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_assertion_type="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "oauth-access-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/users/00u1"))
        .and(header("Authorization", "Bearer oauth-access-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "00u1"})))
        .expect(2)
        .mount(&server)
        .await;

    let config = ProviderConfig::new(
        Url::parse(&server.uri()).unwrap(),
        Credentials::PrivateKey {
            client_id: "0oa-service".to_string(),
            scopes: vec!["okta.users.read".to_string()],
            private_key: TEST_KEY.to_string(),
        },
    );
    let transport = Transport::new(&config).unwrap().with_backoff(fast_backoff(1));
    let request = ApiRequest::get("/api/v1/users/00u1");

    transport.execute(&ctx(), &request).await.unwrap();
    transport.execute(&ctx(), &request).await.unwrap();
}

#[tokio::test]
async fn test_token_endpoint_failure_is_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth2/v1/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_client"
        })))
        .mount(&server)
        .await;

    let config = ProviderConfig::new(
        Url::parse(&server.uri()).unwrap(),
        Credentials::PrivateKey {
            client_id: "0oa-service".to_string(),
            scopes: vec!["okta.users.read".to_string()],
            private_key: TEST_KEY.to_string(),
        },
    );
    let result = Transport::new(&config)
        .unwrap()
        .execute(&ctx(), &ApiRequest::get("/api/v1/users/00u1"))
        .await;

    assert!(matches!(result, Err(ApiError::Auth(_))));
}

// ═══════════════════════════════════════════════════════════════════════════
// Classification and retries
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_transient_status_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/apps"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/apps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let response = transport(&server, 5)
        .execute(&ctx(), &ApiRequest::get("/api/v1/apps"))
        .await
        .unwrap();
    assert_eq!(response.body, Some(json!([])));
}

#[tokio::test]
async fn test_not_found_is_never_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/users/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "errorCode": "E0000007",
            "errorSummary": "Not found: Resource not found: missing (User)"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = transport(&server, 5)
        .execute(&ctx(), &ApiRequest::get("/api/v1/users/missing"))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(err.to_string().contains("E0000007"));
}

#[tokio::test]
async fn test_validation_error_fails_fast() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/users"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errorCode": "E0000001",
            "errorSummary": "Api validation failed: login",
            "errorCauses": [{"errorSummary": "login: An object with this field already exists"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = ApiRequest::post("/api/v1/users")
        .json(&json!({"profile": {"login": "a@b.c"}}))
        .unwrap();
    let err = transport(&server, 5).execute(&ctx(), &request).await.unwrap_err();

    assert_eq!(err.class(), ErrorClass::PermanentClient);
    assert!(err.to_string().contains("already exists"));
}

#[tokio::test]
async fn test_cleanup_in_progress_body_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/meta/schemas/group/default"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "errorCode": "E0000001",
            "errorSummary": "Api validation failed",
            "errorCauses": [{"errorSummary": "Wait until the data clean up process finishes and then try again"}]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/meta/schemas/group/default"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"definitions": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let request = ApiRequest::post("/api/v1/meta/schemas/group/default").body(json!({}));
    transport(&server, 3).execute(&ctx(), &request).await.unwrap();
}

#[tokio::test]
async fn test_rate_limited_request_honours_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/groups"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    transport(&server, 3)
        .execute(&ctx(), &ApiRequest::get("/api/v1/groups"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_server_error_waits_for_rate_limit_reset() {
    let server = MockServer::start().await;
    let reset = chrono::Utc::now().timestamp() + 2;

    Mock::given(method("GET"))
        .and(path("/api/v1/groups"))
        .respond_with(
            ResponseTemplate::new(503)
                .insert_header("X-Rate-Limit-Reset", reset.to_string().as_str()),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v1/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    transport(&server, 3)
        .execute(&ctx(), &ApiRequest::get("/api/v1/groups"))
        .await
        .unwrap();

    // The backoff alone would retry after 10ms.
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_exhausted_retries_report_final_class() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/api/v1/groups/00g1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let request = ApiRequest::put("/api/v1/groups/00g1").body(json!({"profile": {}}));
    let err = transport(&server, 3).execute(&ctx(), &request).await.unwrap_err();

    match err {
        ApiError::RetriesExhausted {
            attempts,
            last_class,
            ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(last_class, ErrorClass::Transient);
        }
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_non_idempotent_write_not_replayed_after_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/users"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_millis(500)))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = token_config(&server);
    config.request_timeout = Duration::from_millis(100);
    let transport = Transport::new(&config).unwrap().with_backoff(fast_backoff(5));

    let request = ApiRequest::post("/api/v1/users").body(json!({}));
    assert_eq!(request.operation_kind(), OperationKind::NonIdempotentWrite);
    let err = transport.execute(&ctx(), &request).await.unwrap_err();

    assert!(matches!(err, ApiError::Network { request_sent: true, .. }));
}

// ═══════════════════════════════════════════════════════════════════════════
// Pagination, rate-limit headers, cancellation
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_next_cursor_extracted_from_link_header() {
    let server = MockServer::start().await;
    let next = format!("<{}/api/v1/groups?after=00g2&limit=1>; rel=\"next\"", server.uri());

    Mock::given(method("GET"))
        .and(path("/api/v1/groups"))
        .and(query_param("limit", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"id": "00g1"}]))
                .append_header("Link", format!("<{}/api/v1/groups?limit=1>; rel=\"self\"", server.uri()).as_str())
                .append_header("Link", next.as_str()),
        )
        .mount(&server)
        .await;

    let response = transport(&server, 1)
        .execute(&ctx(), &ApiRequest::get("/api/v1/groups").query("limit", "1"))
        .await
        .unwrap();

    assert_eq!(response.meta.next_cursor.as_deref(), Some("00g2"));
}

#[tokio::test]
async fn test_rate_limit_headers_reach_pacer() {
    let server = MockServer::start().await;
    let reset = chrono::Utc::now().timestamp() + 60;

    Mock::given(method("GET"))
        .and(path("/api/v1/groups"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .insert_header("X-Rate-Limit-Limit", "600")
                .insert_header("X-Rate-Limit-Remaining", "598")
                .insert_header("X-Rate-Limit-Reset", reset.to_string().as_str()),
        )
        .mount(&server)
        .await;

    let transport = transport(&server, 1);
    transport
        .execute(&ctx(), &ApiRequest::get("/api/v1/groups"))
        .await
        .unwrap();

    let snapshot = transport.pacer().snapshot().await;
    assert_eq!(snapshot.limit, Some(600));
    assert_eq!(snapshot.remaining, Some(598));
    assert_eq!(snapshot.reset_at.map(|t| t.timestamp()), Some(reset));
}

#[tokio::test]
async fn test_cancelled_context_issues_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = ctx();
    ctx.cancel();
    let err = transport(&server, 3)
        .execute(&ctx, &ApiRequest::get("/api/v1/groups"))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_expired_context_issues_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "00g1"})))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = CallContext::new(Duration::from_millis(5));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = transport(&server, 3)
        .send(&ctx, &ApiRequest::get("/api/v1/groups/00g1"))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::DeadlineExceeded));
    assert_eq!(err.error_code(), "DEADLINE_EXCEEDED");
}

#[tokio::test]
async fn test_slow_response_cut_off_at_deadline() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/groups"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let ctx = CallContext::new(Duration::from_millis(200));
    let started = std::time::Instant::now();
    let err = transport(&server, 3)
        .execute(&ctx, &ApiRequest::get("/api/v1/groups"))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::DeadlineExceeded));
    assert!(started.elapsed() < Duration::from_secs(2));
}
