//! Test data builders for tenant API payloads.

#![allow(dead_code)]

use serde_json::{json, Value};
use tenantform_provider::prelude::Attributes;

/// Object literal as an attribute map.
pub fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().expect("attribute literal must be an object")
}

/// Declared attributes of the test user.
pub fn user_desired() -> Attributes {
    attrs(json!({
        "login": "jane.doe@example.com",
        "first_name": "Jane",
        "last_name": "Doe",
        "email": "jane.doe@example.com"
    }))
}

/// Remote user body as the tenant returns it.
pub fn user_json(id: &str, status: &str) -> Value {
    json!({
        "id": id,
        "status": status,
        "created": "2024-05-01T10:00:00.000Z",
        "profile": {
            "login": "jane.doe@example.com",
            "firstName": "Jane",
            "lastName": "Doe",
            "email": "jane.doe@example.com"
        }
    })
}

/// User schema document with `custom` as the custom property map.
pub fn user_schema(custom: Value) -> Value {
    json!({
        "id": "https://tenant.example.com/meta/schemas/user/default",
        "lastUpdated": "2024-05-01T10:00:00.000Z",
        "definitions": {
            "base": {
                "id": "#base",
                "type": "object",
                "properties": {
                    "login": {
                        "title": "Username",
                        "type": "string",
                        "required": true,
                        "minLength": 5,
                        "maxLength": 100,
                        "pattern": ".+",
                        "mutability": "READ_WRITE",
                        "scope": "NONE"
                    }
                }
            },
            "custom": {
                "id": "#custom",
                "type": "object",
                "properties": custom
            }
        }
    })
}

pub fn app_json(id: &str, label: &str, created: &str) -> Value {
    json!({
        "id": id,
        "name": "bookmark",
        "label": label,
        "status": "ACTIVE",
        "signOnMode": "BOOKMARK",
        "created": created
    })
}

pub fn group_json(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "type": "OKTA_GROUP",
        "created": "2024-01-01T00:00:00.000Z",
        "profile": { "name": name, "description": format!("{name} team") }
    })
}

/// The tenant's built-in group every user belongs to.
pub fn everyone_json() -> Value {
    json!({
        "id": "00gEveryone",
        "type": "BUILT_IN",
        "created": "2020-01-01T00:00:00.000Z",
        "profile": { "name": "Everyone", "description": "All users in your organization" }
    })
}

/// Role permission listing body.
pub fn permissions_json(labels: &[&str]) -> Value {
    let permissions: Vec<Value> = labels
        .iter()
        .map(|label| json!({ "label": label, "created": "2024-01-01T00:00:00.000Z" }))
        .collect();
    json!({ "permissions": permissions })
}

/// Members of a set attribute, sorted.
pub fn members(observed: &Attributes, key: &str) -> Vec<String> {
    let mut members: Vec<String> = observed
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    members.sort();
    members
}
