//! Managed object model.

use crate::error::{ProviderError, ProviderResult};
use crate::ids::{ImportForm, ImportId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute values keyed by attribute name.
pub type Attributes = Map<String, Value>;

/// Coarse lifecycle marker of a managed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStatus {
    Planned,
    Created,
    Live,
    Staged,
    Suspended,
    Deactivated,
    Destroyed,
}

impl ObjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectStatus::Planned => "planned",
            ObjectStatus::Created => "created",
            ObjectStatus::Live => "live",
            ObjectStatus::Staged => "staged",
            ObjectStatus::Suspended => "suspended",
            ObjectStatus::Deactivated => "deactivated",
            ObjectStatus::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained principal status reported by the tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteStatus {
    Active,
    Staged,
    Provisioned,
    Recovery,
    PasswordExpired,
    LockedOut,
    Suspended,
    Deprovisioned,
    Other(String),
}

impl RemoteStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => RemoteStatus::Active,
            "STAGED" => RemoteStatus::Staged,
            "PROVISIONED" => RemoteStatus::Provisioned,
            "RECOVERY" => RemoteStatus::Recovery,
            "PASSWORD_EXPIRED" => RemoteStatus::PasswordExpired,
            "LOCKED_OUT" => RemoteStatus::LockedOut,
            "SUSPENDED" => RemoteStatus::Suspended,
            "DEPROVISIONED" => RemoteStatus::Deprovisioned,
            _ => RemoteStatus::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RemoteStatus::Active => "ACTIVE",
            RemoteStatus::Staged => "STAGED",
            RemoteStatus::Provisioned => "PROVISIONED",
            RemoteStatus::Recovery => "RECOVERY",
            RemoteStatus::PasswordExpired => "PASSWORD_EXPIRED",
            RemoteStatus::LockedOut => "LOCKED_OUT",
            RemoteStatus::Suspended => "SUSPENDED",
            RemoteStatus::Deprovisioned => "DEPROVISIONED",
            RemoteStatus::Other(raw) => raw,
        }
    }

    /// Fold the remote status into the coarse marker.
    pub fn coarse(&self) -> ObjectStatus {
        match self {
            RemoteStatus::Active
            | RemoteStatus::Provisioned
            | RemoteStatus::Recovery
            | RemoteStatus::PasswordExpired
            | RemoteStatus::LockedOut
            | RemoteStatus::Other(_) => ObjectStatus::Live,
            RemoteStatus::Staged => ObjectStatus::Staged,
            RemoteStatus::Suspended => ObjectStatus::Suspended,
            RemoteStatus::Deprovisioned => ObjectStatus::Deactivated,
        }
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State-machine state of one object during a reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Planned,
    Creating,
    Live,
    Refreshing,
    Updating,
    Deactivating,
    Destroying,
    Destroyed,
}

impl LifecycleState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Planned, Creating)
                | (Planned, Refreshing)
                | (Creating, Live)
                | (Live, Refreshing)
                | (Live, Updating)
                | (Live, Deactivating)
                | (Live, Destroying)
                | (Refreshing, Live)
                | (Updating, Live)
                | (Deactivating, Destroying)
                | (Refreshing, Destroyed)
                | (Updating, Destroyed)
                | (Deactivating, Destroyed)
                | (Destroying, Destroyed)
                | (Destroyed, Creating)
                | (Destroyed, Destroyed)
        )
    }
}

/// Per-object side table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<DateTime<Utc>>,
    /// Remote status last reported, before folding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_status: Option<String>,
    /// Cursor of the last page read by a collection walk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cursor: Option<String>,
    /// Remote write attempts made by the last operation.
    #[serde(default)]
    pub remote_writes: u32,
}

/// One reconciled resource instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedObject {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub desired: Attributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<Attributes>,
    pub status: ObjectStatus,
    /// Parent keys of composite ids (`parent`, `user_type`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parent_keys: BTreeMap<String, String>,
    #[serde(default)]
    pub meta: ObjectMeta,
}

impl ManagedObject {
    /// A new object with declared values and no remote counterpart yet.
    pub fn planned(kind: impl Into<String>, desired: Attributes) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            desired,
            observed: None,
            status: ObjectStatus::Planned,
            parent_keys: BTreeMap::new(),
            meta: ObjectMeta::default(),
        }
    }

    /// An existing object known by id, e.g. from persisted state.
    pub fn existing(kind: impl Into<String>, id: impl Into<String>, desired: Attributes) -> Self {
        let mut obj = Self::planned(kind, desired);
        obj.id = Some(id.into());
        obj.status = ObjectStatus::Live;
        obj
    }

    #[must_use]
    pub fn with_parent_key(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parent_keys.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_observed(mut self, observed: Attributes) -> Self {
        self.observed = Some(observed);
        self
    }

    pub fn id(&self) -> ProviderResult<&str> {
        self.id
            .as_deref()
            .ok_or_else(|| ProviderError::validation("id", format!("{} has no id", self.kind)))
    }

    pub fn parent_key(&self, key: &str) -> Option<&str> {
        self.parent_keys.get(key).map(String::as_str)
    }

    pub fn desired_str(&self, key: &str) -> Option<&str> {
        self.desired.get(key).and_then(Value::as_str)
    }

    pub fn observed_str(&self, key: &str) -> Option<&str> {
        self.observed.as_ref()?.get(key).and_then(Value::as_str)
    }

    /// Adopt the remote view after a successful create or read.
    pub fn adopt(&mut self, id: String, observed: Attributes, status: ObjectStatus) {
        self.id = Some(id);
        self.observed = Some(observed);
        self.status = status;
        self.meta.refreshed_at = Some(Utc::now());
    }

    /// The remote object is gone: clear id and observed values.
    pub fn mark_destroyed(&mut self) {
        self.id = None;
        self.observed = None;
        self.status = ObjectStatus::Destroyed;
        self.meta.remote_status = None;
    }

    pub fn is_destroyed(&self) -> bool {
        self.status == ObjectStatus::Destroyed
    }

    /// Attributes whose declared value differs from the observed one.
    ///
    /// Attributes absent from `desired` are not managed and never appear.
    pub fn changes(&self) -> ChangeSet {
        let empty = Attributes::new();
        let observed = self.observed.as_ref().unwrap_or(&empty);
        let changed = self
            .desired
            .iter()
            .filter(|(key, value)| {
                let current = observed.get(*key).unwrap_or(&Value::Null);
                !values_equal(value, current)
            })
            .map(|(key, _)| key.clone())
            .collect();
        ChangeSet { changed }
    }

    /// Record declared values of `changes` as observed, once the remote has
    /// accepted them. Values the remote never returns keep this value on the
    /// next refresh.
    pub fn assume_applied(&mut self, changes: &ChangeSet) {
        let observed = self.observed.get_or_insert_with(Attributes::new);
        for key in changes.iter() {
            if let Some(value) = self.desired.get(key) {
                observed.insert(key.to_string(), value.clone());
            }
        }
    }

    /// Persistable record of this object.
    pub fn persist(&self) -> ProviderResult<PersistedState> {
        Ok(PersistedState {
            kind: self.kind.clone(),
            id: self.id()?.to_string(),
            parent_keys: self.parent_keys.clone(),
            attributes: self.observed.clone().unwrap_or_default(),
        })
    }

    /// Import identifier of this object, in the kind's import form.
    pub fn import_id(&self, form: ImportForm) -> ProviderResult<String> {
        let id = ImportId {
            id: self.id()?.to_string(),
            parent: self.parent_key("parent").map(String::from),
            user_type: self.parent_key("user_type").map(String::from),
        };
        Ok(id.render(form))
    }
}

/// Equality that treats sets of scalars declared as arrays as unordered, and
/// integers and floats with the same value as equal.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) if x.iter().chain(y.iter()).all(is_scalar) => {
            let xs: std::collections::BTreeSet<String> = x.iter().map(Value::to_string).collect();
            let ys: std::collections::BTreeSet<String> = y.iter().map(Value::to_string).collect();
            xs == ys
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

fn is_scalar(v: &Value) -> bool {
    matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// Names of attributes that differ between desired and observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    changed: std::collections::BTreeSet<String>,
}

impl ChangeSet {
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            changed: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.changed.contains(key)
    }

    /// Whether any of `keys` changed.
    pub fn touches(&self, keys: &[&str]) -> bool {
        keys.iter().any(|k| self.changed.contains(*k))
    }

    /// Whether anything other than `keys` changed.
    pub fn touches_other_than(&self, keys: &[&str]) -> bool {
        self.changed.iter().any(|k| !keys.contains(&k.as_str()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().map(String::as_str)
    }
}

/// What the host persists per resource address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub kind: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parent_keys: BTreeMap<String, String>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl PersistedState {
    /// Rebuild a managed object from persisted state; declared values come
    /// from the host separately.
    pub fn restore(self, desired: Attributes) -> ManagedObject {
        let mut obj = ManagedObject::existing(self.kind, self.id, desired);
        obj.parent_keys = self.parent_keys;
        obj.observed = Some(self.attributes);
        obj
    }
}
