//! Data source and collection walk tests against a mock tenant.
//!
//! Tests cover:
//! - First-match resolution with client-side exact filtering
//! - Exhaustive walks across `Link` cursors, and their end on a repeated cursor
//! - Unique-required resolution and its ambiguity error
//! - Query fingerprints as data source ids

mod helpers;

use helpers::fixtures::{app_json, attrs, group_json, user_json};
use helpers::mock_tenant::MockTenant;
use serde_json::{json, Value};
use std::time::Duration;
use tenantform_client::CallContext;
use tenantform_provider::prelude::*;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, ResponseTemplate};

fn error_code(response: &DataResponse) -> Option<String> {
    response
        .diagnostics
        .iter()
        .find(|d| d.severity == Severity::Error)
        .and_then(|d| d.code.clone())
}

#[tokio::test]
async fn test_app_by_label_prefers_oldest_exact_match() {
    let tenant = MockTenant::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/apps"))
        .and(query_param("q", "Portal"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            app_json("0oa2", "Portal", "2024-03-01T00:00:00.000Z"),
            app_json("0oa3", "Portal Admin", "2021-01-01T00:00:00.000Z"),
            app_json("0oa1", "Portal", "2023-01-01T00:00:00.000Z"),
        ])))
        .expect(1)
        .mount(tenant.server())
        .await;

    let response = tenant
        .runtime()
        .read_data(DataRequest::new("app", "portal", attrs(json!({ "label": "Portal" }))))
        .await;

    assert_eq!(response.id.as_deref(), Some("0oa1"));
    assert_eq!(response.attributes["label"], "Portal");
    assert_eq!(response.attributes["sign_on_mode"], "BOOKMARK");
    let info: Vec<_> = response
        .diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Info)
        .collect();
    assert_eq!(info.len(), 1);
    assert_eq!(
        info[0].summary,
        "found multiple app objects with the criteria supplied, using the first one, sorted by creation date."
    );
    assert_eq!(info[0].address.as_deref(), Some("data.app.portal"));
}

#[tokio::test]
async fn test_app_by_label_without_exact_match_is_not_found() {
    let tenant = MockTenant::start().await;
    tenant
        .mock_json(
            "GET",
            "/api/v1/apps",
            200,
            json!([app_json("0oa3", "Portal Admin", "2021-01-01T00:00:00.000Z")]),
        )
        .await;

    let response = tenant
        .runtime()
        .read_data(DataRequest::new("app", "portal", attrs(json!({ "label": "Portal" }))))
        .await;

    assert!(response.id.is_none());
    assert_eq!(error_code(&response).as_deref(), Some("NOT_FOUND"));
}

#[tokio::test]
async fn test_groups_walk_follows_link_cursor() {
    let tenant = MockTenant::start().await;
    let next = format!(
        "<{}/api/v1/groups?after=00g2&limit=200>; rel=\"next\"",
        tenant.uri()
    );
    Mock::given(method("GET"))
        .and(path("/api/v1/groups"))
        .and(query_param("after", "00g2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([group_json("00g3", "engineering-ops")])),
        )
        .expect(1)
        .mount(tenant.server())
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/groups"))
        .and(query_param_is_missing("after"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Link", next.as_str())
                .set_body_json(json!([
                    group_json("00g1", "engineering"),
                    group_json("00g2", "engineering-web"),
                ])),
        )
        .expect(1)
        .mount(tenant.server())
        .await;

    let config = attrs(json!({ "q": "engineering" }));
    let response = tenant
        .runtime()
        .read_data(DataRequest::new("groups", "eng", config))
        .await;

    assert!(error_code(&response).is_none(), "{:?}", response.diagnostics);
    let groups = response.attributes["groups"].as_array().unwrap();
    let ids: Vec<&str> = groups.iter().filter_map(|g| g["id"].as_str()).collect();
    assert_eq!(ids, vec!["00g1", "00g2", "00g3"]);
    assert_eq!(groups[0]["name"], "engineering");
    assert_eq!(response.attributes["q"], "engineering");
    tenant.server().verify().await;
}

#[tokio::test]
async fn test_walk_stops_on_repeated_cursor() {
    let tenant = MockTenant::start().await;
    let next = format!("<{}/api/v1/groups?after=c1&limit=200>; rel=\"next\"", tenant.uri());
    Mock::given(method("GET"))
        .and(path("/api/v1/groups"))
        .and(query_param("after", "c1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Link", next.as_str())
                .set_body_json(json!([group_json("00g2", "engineering-web")])),
        )
        .expect(1)
        .mount(tenant.server())
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/groups"))
        .and(query_param_is_missing("after"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Link", next.as_str())
                .set_body_json(json!([group_json("00g1", "engineering")])),
        )
        .expect(1)
        .mount(tenant.server())
        .await;

    let resolution = tenant
        .handle()
        .collections()
        .resolve(
            &CallContext::new(Duration::from_secs(30)),
            "group",
            &CollectionQuery::new("/api/v1/groups").q("engineering"),
            ResolveMode::Exhaustive,
        )
        .await
        .unwrap();

    let ids: Vec<&str> = resolution.items.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["00g1", "00g2"]);
    assert_eq!(resolution.last_cursor.as_deref(), Some("c1"));
    tenant.server().verify().await;
}

#[tokio::test]
async fn test_first_match_without_exact_field_reports_multiple() {
    let tenant = MockTenant::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/apps"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            app_json("0oa2", "Portal", "2024-03-01T00:00:00.000Z"),
            app_json("0oa1", "Portal Admin", "2023-01-01T00:00:00.000Z"),
        ])))
        .expect(1)
        .mount(tenant.server())
        .await;

    let resolution = tenant
        .handle()
        .collections()
        .resolve(
            &CallContext::new(Duration::from_secs(30)),
            "app",
            &CollectionQuery::new("/api/v1/apps").q("Portal"),
            ResolveMode::FirstMatch,
        )
        .await
        .unwrap();

    assert_eq!(resolution.items.len(), 1);
    assert_eq!(resolution.items[0].id, "0oa1");
    assert_eq!(
        resolution
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Info)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_groups_id_is_stable_per_query() {
    let tenant = MockTenant::start().await;
    tenant
        .mock_json("GET", "/api/v1/groups", 200, json!([group_json("00g1", "engineering")]))
        .await;
    let runtime = tenant.runtime();

    let read = |config: Value| {
        let runtime = &runtime;
        async move {
            runtime
                .read_data(DataRequest::new("groups", "g", attrs(config)))
                .await
                .id
                .unwrap()
        }
    };
    let first = read(json!({ "q": "eng", "type": "OKTA_GROUP" })).await;
    let again = read(json!({ "type": "OKTA_GROUP", "q": "eng" })).await;
    let other = read(json!({ "q": "ops" })).await;

    assert_eq!(first, again);
    assert_ne!(first, other);
    assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[tokio::test]
async fn test_user_search_requires_a_unique_result() {
    let tenant = MockTenant::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/users"))
        .and(query_param("search", "profile.lastName eq \"Doe\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            user_json("00u1", "ACTIVE"),
            user_json("00u2", "ACTIVE"),
        ])))
        .mount(tenant.server())
        .await;

    let response = tenant
        .runtime()
        .read_data(DataRequest::new("user", "doe", attrs(json!({ "last_name": "Doe" }))))
        .await;

    assert!(response.id.is_none());
    assert_eq!(error_code(&response).as_deref(), Some("AMBIGUOUS_MATCH"));
}

#[tokio::test]
async fn test_user_search_with_groups() {
    let tenant = MockTenant::start().await;
    tenant
        .mock_json("GET", "/api/v1/users", 200, json!([user_json("00u1", "ACTIVE")]))
        .await;
    tenant
        .mock_json(
            "GET",
            "/api/v1/users/00u1/groups",
            200,
            json!([group_json("00g0", "Everyone"), group_json("00g1", "engineering")]),
        )
        .await;

    let config = attrs(json!({ "login": "jane.doe@example.com", "include": ["groups"] }));
    let response = tenant
        .runtime()
        .read_data(DataRequest::new("user", "jane", config))
        .await;

    assert_eq!(response.id.as_deref(), Some("00u1"));
    assert_eq!(response.attributes["first_name"], "Jane");
    assert_eq!(response.attributes["group_ids"], json!(["00g0", "00g1"]));
}

#[tokio::test]
async fn test_unknown_data_source() {
    let tenant = MockTenant::start().await;
    let response = tenant
        .runtime()
        .read_data(DataRequest::new("widgets", "all", Default::default()))
        .await;

    assert_eq!(error_code(&response).as_deref(), Some("UNKNOWN_KIND"));
    assert!(tenant.requests().await.is_empty());
}
