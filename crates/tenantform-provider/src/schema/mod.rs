//! Profile schemas and the schema-evolution engine.

pub mod descriptor;
pub mod engine;

pub use descriptor::{PropertyDescriptor, PropertyInput, PropertyKind, PropertyType};
pub use engine::SchemaEngine;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Profile namespace a schema belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SchemaScope {
    /// User profile; `None` is the default user type.
    User { type_id: Option<String> },
    Group,
    /// Per-application user profile.
    AppUser { app_id: String },
}

impl SchemaScope {
    /// Schema endpoint below the tenant root.
    pub fn path(&self) -> String {
        match self {
            SchemaScope::User { type_id } => format!(
                "/api/v1/meta/schemas/user/{}",
                type_id.as_deref().unwrap_or("default")
            ),
            SchemaScope::Group => "/api/v1/meta/schemas/group/default".to_string(),
            SchemaScope::AppUser { app_id } => {
                format!("/api/v1/meta/schemas/apps/{app_id}/default")
            }
        }
    }

    /// Upper bound on waiting for a write to become visible.
    pub fn convergence_timeout(&self) -> Duration {
        match self {
            SchemaScope::AppUser { .. } => Duration::from_secs(30),
            SchemaScope::User { .. } | SchemaScope::Group => Duration::from_secs(120),
        }
    }
}

impl fmt::Display for SchemaScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaScope::User { type_id: None } => f.write_str("user schema"),
            SchemaScope::User { type_id: Some(t) } => write!(f, "user schema ({t})"),
            SchemaScope::Group => f.write_str("group schema"),
            SchemaScope::AppUser { app_id } => write!(f, "app user schema ({app_id})"),
        }
    }
}

/// A profile schema document: base and custom property maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "wire::SchemaDocument", into = "wire::SchemaDocument")]
pub struct ProfileSchema {
    pub base: BTreeMap<String, PropertyDescriptor>,
    pub custom: BTreeMap<String, PropertyDescriptor>,
    /// Remote `lastUpdated` stamp.
    pub version: Option<String>,
}

impl ProfileSchema {
    pub fn property(&self, kind: PropertyKind, key: &str) -> Option<&PropertyDescriptor> {
        match kind {
            PropertyKind::Base => self.base.get(key),
            PropertyKind::Custom => self.custom.get(key),
        }
    }
}

mod wire {
    use super::{ProfileSchema, PropertyDescriptor};
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Debug, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SchemaDocument {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub last_updated: Option<String>,
        #[serde(default)]
        pub definitions: Definitions,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct Definitions {
        #[serde(default)]
        pub base: Section,
        #[serde(default)]
        pub custom: Section,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub struct Section {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub id: Option<String>,
        #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
        pub section_type: Option<String>,
        #[serde(default)]
        pub properties: BTreeMap<String, Option<PropertyDescriptor>>,
    }

    impl Section {
        fn named(id: &str, properties: BTreeMap<String, PropertyDescriptor>) -> Self {
            Self {
                id: Some(id.to_string()),
                section_type: Some("object".to_string()),
                properties: properties.into_iter().map(|(k, v)| (k, Some(v))).collect(),
            }
        }

        fn live(self) -> BTreeMap<String, PropertyDescriptor> {
            self.properties
                .into_iter()
                .filter_map(|(k, v)| v.map(|v| (k, v)))
                .collect()
        }
    }

    impl From<SchemaDocument> for ProfileSchema {
        fn from(doc: SchemaDocument) -> Self {
            Self {
                base: doc.definitions.base.live(),
                custom: doc.definitions.custom.live(),
                version: doc.last_updated,
            }
        }
    }

    impl From<ProfileSchema> for SchemaDocument {
        fn from(schema: ProfileSchema) -> Self {
            Self {
                last_updated: schema.version,
                definitions: Definitions {
                    base: Section::named("#base", schema.base),
                    custom: Section::named("#custom", schema.custom),
                },
            }
        }
    }
}
