//! Concrete resource kinds and data sources.

pub mod captcha;
pub mod data;
pub mod group;
pub mod schema_property;
pub mod sets;
pub mod user;

use crate::error::{ProviderError, ProviderResult};
use crate::model::Attributes;
use crate::state_machine::ManagedResource;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

pub use data::DataSource;

/// Every managed resource kind.
pub fn resources() -> Vec<Arc<dyn ManagedResource>> {
    vec![
        Arc::new(user::UserResource),
        Arc::new(group::GroupResource),
        Arc::new(schema_property::SchemaPropertyResource::user()),
        Arc::new(schema_property::SchemaPropertyResource::user_base()),
        Arc::new(schema_property::SchemaPropertyResource::group()),
        Arc::new(schema_property::SchemaPropertyResource::app_user()),
        Arc::new(sets::SetResource::role_permissions()),
        Arc::new(sets::SetResource::group_memberships()),
        Arc::new(sets::SetResource::auth_server_trusted_servers()),
        Arc::new(sets::SetResource::policy_app_bindings()),
        Arc::new(captcha::CaptchaResource),
        Arc::new(captcha::CaptchaOrgSettingsResource),
    ]
}

/// Every data source.
pub fn data_sources() -> Vec<Arc<dyn DataSource>> {
    vec![
        Arc::new(data::AppDataSource),
        Arc::new(data::GroupsDataSource),
        Arc::new(data::UserDataSource),
    ]
}

// Attribute helpers shared by the kinds.

pub(crate) fn optional_str<'a>(attrs: &'a Attributes, key: &str) -> Option<&'a str> {
    attrs.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub(crate) fn required_str<'a>(attrs: &'a Attributes, key: &str) -> ProviderResult<&'a str> {
    optional_str(attrs, key)
        .ok_or_else(|| ProviderError::validation(key, format!("{key} is required")))
}

pub(crate) fn bool_attr(attrs: &Attributes, key: &str) -> bool {
    attrs.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// A declared list of strings as a set; absent means empty.
pub(crate) fn string_set(attrs: &Attributes, key: &str) -> ProviderResult<BTreeSet<String>> {
    match attrs.get(key) {
        None | Some(Value::Null) => Ok(BTreeSet::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(String::from).ok_or_else(|| {
                    ProviderError::validation(key, format!("{key} must only contain strings"))
                })
            })
            .collect(),
        Some(_) => Err(ProviderError::validation(
            key,
            format!("{key} must be a list of strings"),
        )),
    }
}

pub(crate) fn set_value(members: &BTreeSet<String>) -> Value {
    Value::Array(members.iter().cloned().map(Value::String).collect())
}

/// Build attributes from `(key, value)` pairs, skipping nulls.
pub(crate) fn attributes<I>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (&'static str, Value)>,
{
    pairs
        .into_iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.to_string(), v))
        .collect::<Map<String, Value>>()
}

/// `id` field of a remote object.
pub(crate) fn remote_id(body: &Value, kind: &str) -> ProviderResult<String> {
    body.get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| ProviderError::serialization(format!("{kind} response has no id")))
}
