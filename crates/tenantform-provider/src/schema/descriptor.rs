//! Profile property descriptors.
//!
//! [`PropertyDescriptor`] is the remote JSON-Schema shape of one property;
//! [`PropertyInput`] is the flat attribute form declared by users and stored
//! as observed state. Conversion from input to descriptor enforces the local
//! invariants before anything is sent to the tenant.

use crate::error::{ProviderError, ProviderResult};
use crate::model::values_equal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// The only base property that accepts a `pattern`.
pub const LOGIN_PROPERTY: &str = "login";
pub const MASTER_OVERRIDE: &str = "OVERRIDE";
pub const NOT_UNIQUE: &str = "NOT_UNIQUE";

/// Which section of a profile schema a property lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// System-defined, cannot be created or removed.
    Base,
    /// User-defined, removable.
    Custom,
}

impl PropertyKind {
    pub fn section(self) -> &'static str {
        match self {
            PropertyKind::Base => "base",
            PropertyKind::Custom => "custom",
        }
    }
}

/// Element type of an array property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Boolean,
    Integer,
    Number,
}

impl ScalarType {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "string" => Some(ScalarType::String),
            "boolean" => Some(ScalarType::Boolean),
            "integer" => Some(ScalarType::Integer),
            "number" => Some(ScalarType::Number),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Boolean => "boolean",
            ScalarType::Integer => "integer",
            ScalarType::Number => "number",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayItems {
    #[serde(rename = "type")]
    pub item_type: ScalarType,
}

/// Property type, tagged by the JSON-Schema `type` keyword.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Boolean,
    Integer,
    Number,
    Array { items: ArrayItems },
    Object,
}

impl PropertyType {
    pub fn name(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Boolean => "boolean",
            PropertyType::Integer => "integer",
            PropertyType::Number => "number",
            PropertyType::Array { .. } => "array",
            PropertyType::Object => "object",
        }
    }

    pub fn array_type(&self) -> Option<ScalarType> {
        match self {
            PropertyType::Array { items } => Some(items.item_type),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneOf {
    #[serde(rename = "const")]
    pub value: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub principal: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterPriority {
    #[serde(rename = "type")]
    pub priority_type: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Master {
    #[serde(rename = "type")]
    pub master_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub priority: Vec<MasterPriority>,
}

/// Remote shape of one profile property. Server-assigned keys such as
/// `mutability` are dropped on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub property_type: PropertyType,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<OneOf>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// `Some(None)` is an explicit `null`, kept so it survives a round trip.
    #[serde(
        default,
        deserialize_with = "explicit_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub pattern: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Vec<Permission>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<Master>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn explicit_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl PropertyDescriptor {
    /// A descriptor of the given type with every optional field unset.
    pub fn of_type(property_type: PropertyType) -> Self {
        Self {
            title: None,
            description: None,
            property_type,
            enum_values: None,
            one_of: None,
            min_length: None,
            max_length: None,
            pattern: None,
            required: None,
            permissions: None,
            master: None,
            unique: None,
            external_name: None,
            external_namespace: None,
            scope: None,
        }
    }

    /// Check the descriptor invariants for property `key`.
    pub fn validate(&self, key: &str, kind: PropertyKind) -> ProviderResult<()> {
        if matches!(self.property_type, PropertyType::Array { .. }) {
            if self.enum_values.is_some() {
                return Err(ProviderError::validation(
                    "enum",
                    format!("'{key}': enum cannot be combined with array_type"),
                ));
            }
            if self.one_of.is_some() {
                return Err(ProviderError::validation(
                    "one_of",
                    format!("'{key}': one_of cannot be combined with array_type"),
                ));
            }
            if self.unique.as_deref().is_some_and(|u| u != NOT_UNIQUE) {
                return Err(ProviderError::validation(
                    "unique",
                    format!("'{key}': unique cannot be combined with array_type"),
                ));
            }
        }

        if let Some(master) = &self.master {
            if master.master_type == MASTER_OVERRIDE && master.priority.is_empty() {
                return Err(ProviderError::validation(
                    "master_override_priority",
                    format!("'{key}': master_override_priority must be set when master is OVERRIDE"),
                ));
            }
        }

        if let Some(Some(_)) = &self.pattern {
            if !(kind == PropertyKind::Base && key == LOGIN_PROPERTY) {
                return Err(ProviderError::validation(
                    "pattern",
                    format!("'{key}': pattern is only supported on the base '{LOGIN_PROPERTY}' property"),
                ));
            }
        }

        if let (Some(min), Some(max)) = (self.min_length, self.max_length) {
            if min > max {
                return Err(ProviderError::validation(
                    "min_length",
                    format!("'{key}': min_length {min} exceeds max_length {max}"),
                ));
            }
        }
        Ok(())
    }

    /// Whether `observed` reflects every attribute set on `self`.
    ///
    /// Attributes left unset on the submitted descriptor are filled in by the
    /// tenant and are not compared.
    pub fn matches(&self, observed: &PropertyDescriptor) -> bool {
        fn same<T: PartialEq>(submitted: &Option<T>, observed: &Option<T>) -> bool {
            submitted.is_none() || submitted == observed
        }

        let enum_matches = match (&self.enum_values, &observed.enum_values) {
            (None, _) => true,
            (Some(a), Some(b)) => values_equal(&Value::Array(a.clone()), &Value::Array(b.clone())),
            (Some(_), None) => false,
        };
        let pattern_matches = match &self.pattern {
            None => true,
            Some(submitted) => observed.pattern.clone().flatten() == *submitted,
        };

        self.property_type == observed.property_type
            && enum_matches
            && pattern_matches
            && same(&self.title, &observed.title)
            && same(&self.description, &observed.description)
            && same(&self.one_of, &observed.one_of)
            && same(&self.min_length, &observed.min_length)
            && same(&self.max_length, &observed.max_length)
            && same(&self.required, &observed.required)
            && same(&self.permissions, &observed.permissions)
            && same(&self.master, &observed.master)
            && same(&self.unique, &observed.unique)
            && same(&self.external_name, &observed.external_name)
            && same(&self.external_namespace, &observed.external_namespace)
            && same(&self.scope, &observed.scope)
    }

    /// First difference between `self` and `observed`, for poll diagnostics.
    pub fn describe_mismatch(&self, observed: &PropertyDescriptor) -> String {
        if self.property_type != observed.property_type {
            return format!(
                "type is {} (want {})",
                observed.property_type, self.property_type
            );
        }
        let submitted = PropertyInput::from_descriptor(self);
        let current = PropertyInput::from_descriptor(observed);
        match (serde_json::to_value(&submitted), serde_json::to_value(&current)) {
            (Ok(Value::Object(want)), Ok(Value::Object(have))) => want
                .iter()
                .find(|(k, v)| !have.get(*k).is_some_and(|h| values_equal(v, h)))
                .map(|(k, v)| {
                    let have = have.get(k).cloned().unwrap_or(Value::Null);
                    format!("{k} is {have} (want {v})")
                })
                .unwrap_or_else(|| "property differs".to_string()),
            _ => "property differs".to_string(),
        }
    }
}

/// Flat, user-facing form of a property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub property_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<OneOf>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Action granted to the `SELF` principal: `READ_WRITE`, `READ_ONLY` or `HIDE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub master_override_priority: Vec<MasterPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl PropertyInput {
    /// Validate and convert into the remote descriptor for property `key`.
    pub fn into_descriptor(self, key: &str, kind: PropertyKind) -> ProviderResult<PropertyDescriptor> {
        let property_type = match (self.property_type.as_str(), self.array_type.as_deref()) {
            ("array", Some(item)) => PropertyType::Array {
                items: ArrayItems {
                    item_type: ScalarType::parse(item).ok_or_else(|| {
                        ProviderError::validation(
                            "array_type",
                            format!("'{key}': unsupported array_type '{item}'"),
                        )
                    })?,
                },
            },
            ("array", None) => {
                return Err(ProviderError::validation(
                    "array_type",
                    format!("'{key}': array_type is required when type is array"),
                ))
            }
            (other, Some(_)) => {
                return Err(ProviderError::validation(
                    "array_type",
                    format!("'{key}': array_type is only allowed when type is array, got type '{other}'"),
                ))
            }
            ("string", None) => PropertyType::String,
            ("boolean", None) => PropertyType::Boolean,
            ("integer", None) => PropertyType::Integer,
            ("number", None) => PropertyType::Number,
            ("object", None) => PropertyType::Object,
            (other, None) => {
                return Err(ProviderError::validation(
                    "type",
                    format!("'{key}': unsupported type '{other}'"),
                ))
            }
        };

        let master = self.master.map(|master_type| Master {
            master_type,
            priority: self.master_override_priority,
        });
        let descriptor = PropertyDescriptor {
            title: self.title,
            description: self.description,
            property_type,
            enum_values: self.enum_values,
            one_of: self.one_of,
            min_length: self.min_length,
            max_length: self.max_length,
            pattern: self.pattern.map(Some),
            required: self.required,
            permissions: self.permissions.map(|action| {
                vec![Permission {
                    principal: "SELF".to_string(),
                    action,
                }]
            }),
            master,
            unique: self.unique,
            external_name: self.external_name,
            external_namespace: self.external_namespace,
            scope: self.scope,
        };
        descriptor.validate(key, kind)?;
        Ok(descriptor)
    }

    /// Flatten a remote descriptor into the user-facing form.
    pub fn from_descriptor(descriptor: &PropertyDescriptor) -> Self {
        let (master, master_override_priority) = match &descriptor.master {
            Some(master) => (Some(master.master_type.clone()), master.priority.clone()),
            None => (None, Vec::new()),
        };
        Self {
            title: descriptor.title.clone(),
            property_type: descriptor.property_type.name().to_string(),
            array_type: descriptor
                .property_type
                .array_type()
                .map(|t| t.as_str().to_string()),
            description: descriptor.description.clone(),
            required: descriptor.required,
            enum_values: descriptor.enum_values.clone(),
            one_of: descriptor.one_of.clone(),
            min_length: descriptor.min_length,
            max_length: descriptor.max_length,
            pattern: descriptor.pattern.clone().flatten(),
            permissions: descriptor
                .permissions
                .as_ref()
                .and_then(|p| p.first())
                .map(|p| p.action.clone()),
            master,
            master_override_priority,
            unique: descriptor.unique.clone(),
            external_name: descriptor.external_name.clone(),
            external_namespace: descriptor.external_namespace.clone(),
            scope: descriptor.scope.clone(),
        }
    }
}
