//! Mock tenant using wiremock for integration testing.
//!
//! Wraps a [`MockServer`] and hands out provider handles and runtimes wired
//! to it with millisecond backoff and poll intervals.

#![allow(dead_code)]

use serde_json::Value;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use tenantform_client::{BackoffPolicy, Credentials, ProviderConfig, Transport};
use tenantform_provider::logging::init_test_logging;
use tenantform_provider::prelude::*;

pub const TEST_TOKEN: &str = "test-token-123";

/// A mock tenant management API.
pub struct MockTenant {
    server: MockServer,
}

impl MockTenant {
    /// Start a new mock tenant.
    pub async fn start() -> Self {
        init_test_logging();
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URI of the mock tenant.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// The underlying server, for mounting scenario-specific mocks.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Provider configuration pointing at this tenant.
    pub fn config(&self) -> ProviderConfig {
        ProviderConfig::new(
            url::Url::parse(&self.uri()).unwrap(),
            Credentials::ApiToken {
                token: TEST_TOKEN.to_string(),
            },
        )
    }

    /// Handle with fast retries and polls.
    pub fn handle(&self) -> ProviderHandle {
        Self::handle_for(self.config())
    }

    /// Handle for a classic (non-next-generation) tenant.
    pub fn classic_handle(&self) -> ProviderHandle {
        let mut config = self.config();
        config.classic_org = true;
        Self::handle_for(config)
    }

    fn handle_for(config: ProviderConfig) -> ProviderHandle {
        let transport = Transport::new(&config)
            .unwrap()
            .with_backoff(fast_backoff());
        ProviderHandle::with_transport(config, transport).with_timings(Timings {
            schema_poll: Duration::from_millis(20),
            status_poll: Duration::from_millis(20),
        })
    }

    /// Runtime serving the full catalogue against this tenant.
    pub fn runtime(&self) -> ProviderRuntime {
        ProviderRuntime::new(self.handle())
    }

    pub fn classic_runtime(&self) -> ProviderRuntime {
        ProviderRuntime::new(self.classic_handle())
    }

    /// Drop every mounted mock and recorded request.
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Every request received so far.
    pub async fn requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// `METHOD /path` of every request other than a GET, in arrival order.
    pub async fn mutating_requests(&self) -> Vec<String> {
        self.requests()
            .await
            .iter()
            .filter(|r| r.method.to_string() != "GET")
            .map(|r| format!("{} {}", r.method, r.url.path()))
            .collect()
    }

    /// Mount a JSON response for `verb path`.
    pub async fn mock_json(&self, verb: &str, route: &str, status: u16, body: Value) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Mount a JSON response served once, ahead of later mocks on the route.
    pub async fn mock_json_once(&self, verb: &str, route: &str, status: u16, body: Value) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .up_to_n_times(1)
            .mount(&self.server)
            .await;
    }

    /// Mount an empty response for `verb path`.
    pub async fn mock_empty(&self, verb: &str, route: &str, status: u16) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Mount a tenant-style 404 for `verb path`.
    pub async fn mock_not_found(&self, verb: &str, route: &str) {
        self.mock_json(
            verb,
            route,
            404,
            serde_json::json!({
                "errorCode": "E0000007",
                "errorSummary": format!("Not found: Resource not found: {route}"),
                "errorCauses": []
            }),
        )
        .await;
    }

    /// Mount a JSON response that must be hit exactly `times` times.
    pub async fn expect_json(&self, verb: &str, route: &str, times: u64, body: Value) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(times)
            .mount(&self.server)
            .await;
    }
}

pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial_delay: Duration::from_millis(10),
        multiplier: 2,
        max_delay: Duration::from_millis(50),
        max_attempts: 3,
        jitter: false,
    }
}
