//! Read-only data sources backed by the collection resolver.

use super::{attributes, optional_str, string_set};
use crate::collection::{CollectionQuery, Filter, ResolveMode, ResourceReference};
use crate::diagnostics::Diagnostics;
use crate::error::{ApiResultExt, ProviderError, ProviderResult};
use crate::model::Attributes;
use crate::state_machine::OpContext;
use async_trait::async_trait;
use serde_json::Value;
use tenantform_client::ApiRequest;

/// What a data source read produces.
#[derive(Debug, Clone, Default)]
pub struct DataResult {
    pub id: String,
    pub attributes: Attributes,
    pub diagnostics: Diagnostics,
}

/// A named, read-only query over the tenant.
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn next_generation_only(&self) -> bool {
        false
    }

    /// Resolve `config` (the declared attributes) against the tenant.
    async fn read(&self, ctx: &OpContext<'_>, config: &Attributes) -> ProviderResult<DataResult>;
}

/// `app`: one application, by id or by label.
///
/// A label lookup uses the prefix-matching `q` parameter and keeps only exact
/// label matches; the oldest wins if there are several.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppDataSource;

impl AppDataSource {
    fn summarize(app: &Value) -> Attributes {
        let field = |name: &str| app.get(name).cloned().unwrap_or(Value::Null);
        attributes([
            ("id", field("id")),
            ("label", field("label")),
            ("name", field("name")),
            ("status", field("status")),
            ("sign_on_mode", field("signOnMode")),
        ])
    }
}

#[async_trait]
impl DataSource for AppDataSource {
    fn name(&self) -> &'static str {
        "app"
    }

    async fn read(&self, ctx: &OpContext<'_>, config: &Attributes) -> ProviderResult<DataResult> {
        if let Some(id) = optional_str(config, "id") {
            let app: Value = ctx
                .handle
                .transport()
                .fetch(ctx.call, &ApiRequest::get(format!("/api/v1/apps/{id}")))
                .await
                .op(&format!("read app {id}"))?;
            return Ok(DataResult {
                id: id.to_string(),
                attributes: Self::summarize(&app),
                diagnostics: Diagnostics::new(),
            });
        }

        let label = optional_str(config, "label")
            .ok_or_else(|| ProviderError::validation("label", "one of id or label is required"))?;
        let query = CollectionQuery::new("/api/v1/apps")
            .q(label)
            .exact("label", label);
        let (app, diagnostics) = ctx
            .handle
            .collections()
            .resolve(ctx.call, "app", &query, ResolveMode::FirstMatch)
            .await?
            .into_single("app")?;
        Ok(DataResult {
            id: app.id.clone(),
            attributes: Self::summarize(&app.item),
            diagnostics,
        })
    }
}

/// `groups`: every group matching the declared criteria. The id is the
/// fingerprint of the query.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupsDataSource;

impl GroupsDataSource {
    fn query(config: &Attributes) -> CollectionQuery {
        let mut query = CollectionQuery::new("/api/v1/groups");
        if let Some(q) = optional_str(config, "q") {
            query = query.q(q);
        }
        if let Some(search) = optional_str(config, "search") {
            query = query.search(search);
        }
        if let Some(group_type) = optional_str(config, "type") {
            query = query.filter(Filter::eq("type", group_type));
        }
        query
    }

    fn summarize(group: &ResourceReference) -> Value {
        let field = |path: &str| group.field(path).cloned().unwrap_or(Value::Null);
        Value::Object(attributes([
            ("id", Value::String(group.id.clone())),
            ("name", field("profile.name")),
            ("description", field("profile.description")),
            ("type", field("type")),
        ]))
    }
}

#[async_trait]
impl DataSource for GroupsDataSource {
    fn name(&self) -> &'static str {
        "groups"
    }

    async fn read(&self, ctx: &OpContext<'_>, config: &Attributes) -> ProviderResult<DataResult> {
        let query = Self::query(config);
        let resolution = ctx
            .handle
            .collections()
            .resolve(ctx.call, "group", &query, ResolveMode::Exhaustive)
            .await?;
        let groups = resolution.items.iter().map(Self::summarize).collect();
        let mut result_attributes = config.clone();
        result_attributes.insert("groups".to_string(), Value::Array(groups));
        Ok(DataResult {
            id: query.fingerprint(),
            attributes: result_attributes,
            diagnostics: resolution.diagnostics,
        })
    }
}

/// Declared user attributes that become search terms, with the remote field
/// each one matches.
const USER_FILTERS: &[(&str, &str)] = &[
    ("login", "profile.login"),
    ("email", "profile.email"),
    ("first_name", "profile.firstName"),
    ("last_name", "profile.lastName"),
    ("status", "status"),
];

/// `user`: exactly one user, by id or by declared profile fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserDataSource;

impl UserDataSource {
    /// `search` expression built only from declared attributes.
    fn search(config: &Attributes) -> ProviderResult<String> {
        let terms: Vec<Filter> = USER_FILTERS
            .iter()
            .filter_map(|(attr, field)| optional_str(config, attr).map(|v| Filter::eq(*field, v)))
            .collect();
        if terms.is_empty() {
            return Err(ProviderError::validation(
                "search",
                "one of id, login, email, first_name, last_name or status is required",
            ));
        }
        // Reuse the filter rendering; the search endpoint takes the same grammar.
        let query = terms
            .into_iter()
            .fold(CollectionQuery::default(), CollectionQuery::filter);
        query
            .filter_expression()
            .ok_or_else(|| ProviderError::validation("search", "empty search"))
    }

    fn summarize(user: &Value) -> Attributes {
        let profile = |name: &str| {
            user.get("profile")
                .and_then(|p| p.get(name))
                .cloned()
                .unwrap_or(Value::Null)
        };
        attributes([
            ("id", user.get("id").cloned().unwrap_or(Value::Null)),
            ("status", user.get("status").cloned().unwrap_or(Value::Null)),
            ("login", profile("login")),
            ("email", profile("email")),
            ("first_name", profile("firstName")),
            ("last_name", profile("lastName")),
        ])
    }
}

#[async_trait]
impl DataSource for UserDataSource {
    fn name(&self) -> &'static str {
        "user"
    }

    async fn read(&self, ctx: &OpContext<'_>, config: &Attributes) -> ProviderResult<DataResult> {
        if let Some(id) = optional_str(config, "id") {
            let user: Value = ctx
                .handle
                .transport()
                .fetch(ctx.call, &ApiRequest::get(format!("/api/v1/users/{id}")))
                .await
                .op(&format!("read user {id}"))?;
            return Ok(DataResult {
                id: id.to_string(),
                attributes: Self::summarize(&user),
                diagnostics: Diagnostics::new(),
            });
        }

        let query = CollectionQuery::new("/api/v1/users").search(Self::search(config)?);
        let (user, diagnostics) = ctx
            .handle
            .collections()
            .resolve(ctx.call, "user", &query, ResolveMode::UniqueRequired)
            .await?
            .into_single("user")?;
        let mut result = Self::summarize(&user.item);
        // Groups are only listed on request.
        if string_set(config, "include")?.contains("groups") {
            let groups: Vec<Value> = ctx
                .handle
                .transport()
                .fetch(ctx.call, &ApiRequest::get(format!("/api/v1/users/{}/groups", user.id)))
                .await
                .op(&format!("list groups of user {}", user.id))?;
            let ids = groups.into_iter().filter_map(|g| g.get("id").cloned()).collect();
            result.insert("group_ids".to_string(), Value::Array(ids));
        }
        Ok(DataResult {
            id: user.id,
            attributes: result,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_user_search_uses_declared_attributes_only() {
        let search = UserDataSource::search(&attrs(json!({
            "login": "a@example.com",
            "last_name": "Doe",
            "query": "ignored"
        })))
        .unwrap();
        assert_eq!(
            search,
            r#"profile.lastName eq "Doe" and profile.login eq "a@example.com""#
        );
        assert!(UserDataSource::search(&attrs(json!({"query": "x"}))).is_err());
    }

    #[test]
    fn test_groups_fingerprint_ignores_declaration_order() {
        let a = GroupsDataSource::query(&attrs(json!({"q": "eng", "type": "OKTA_GROUP"})));
        let b = GroupsDataSource::query(&attrs(json!({"type": "OKTA_GROUP", "q": "eng"})));
        assert_eq!(a.fingerprint(), b.fingerprint());
        let c = GroupsDataSource::query(&attrs(json!({"q": "ops", "type": "OKTA_GROUP"})));
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
