//! Resource identifiers.
//!
//! Three disciplines are used:
//! - remote-assigned ids, stored as returned by the tenant;
//! - composite ids, `<parent>/<child>` (optionally `<user_type>/<parent>/<child>`);
//! - fingerprints, `hex(crc32(canonical query))`, for query-materialized data
//!   sources.

use crate::error::{ProviderError, ProviderResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use url::form_urlencoded;

pub const COMPOSITE_SEPARATOR: char = '/';
pub const USER_TYPE_SEPARATOR: char = '.';

/// Accepted shape of an import identifier, declared per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportForm {
    /// The remote id alone.
    Remote,
    /// `<parent>/<child>`, or `<user_type>/<parent>/<child>`.
    Composite,
    /// `<user_type>.<index>`, or a bare `<index>` for the default user type.
    UserTypeIndex,
}

/// A parsed import identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportId {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
}

impl ImportId {
    /// Id with no parent keys.
    pub fn remote(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent: None,
            user_type: None,
        }
    }

    /// Parse `raw` according to the kind's import form.
    pub fn parse(raw: &str, form: ImportForm) -> ProviderResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ProviderError::validation("id", "import id must not be empty"));
        }
        match form {
            ImportForm::Remote => Ok(Self::remote(raw)),
            ImportForm::Composite => Self::parse_composite(raw),
            ImportForm::UserTypeIndex => Ok(Self::parse_user_type_index(raw)),
        }
    }

    fn parse_composite(raw: &str) -> ProviderResult<Self> {
        let invalid = || {
            ProviderError::validation(
                "id",
                format!("expected '<parent>/<child>' or '<user_type>/<parent>/<child>', got '{raw}'"),
            )
        };
        let (head, child) = raw.rsplit_once(COMPOSITE_SEPARATOR).ok_or_else(invalid)?;
        if head.is_empty() || child.is_empty() {
            return Err(invalid());
        }
        let (user_type, parent) = match head.split_once(COMPOSITE_SEPARATOR) {
            Some((user_type, parent)) if !user_type.is_empty() && !parent.is_empty() => {
                (Some(user_type.to_string()), parent.to_string())
            }
            Some(_) => return Err(invalid()),
            None => (None, head.to_string()),
        };
        Ok(Self {
            id: child.to_string(),
            parent: Some(parent),
            user_type,
        })
    }

    fn parse_user_type_index(raw: &str) -> Self {
        match raw.split_once(USER_TYPE_SEPARATOR) {
            Some((user_type, index)) if !user_type.is_empty() && !index.is_empty() => Self {
                id: index.to_string(),
                parent: None,
                user_type: Some(user_type.to_string()),
            },
            _ => Self::remote(raw),
        }
    }

    /// Render back into the import form; the inverse of [`parse`](Self::parse).
    pub fn render(&self, form: ImportForm) -> String {
        match form {
            ImportForm::Remote => self.id.clone(),
            ImportForm::Composite => {
                let mut out = String::new();
                if let Some(user_type) = &self.user_type {
                    out.push_str(user_type);
                    out.push(COMPOSITE_SEPARATOR);
                }
                if let Some(parent) = &self.parent {
                    out.push_str(parent);
                    out.push(COMPOSITE_SEPARATOR);
                }
                out.push_str(&self.id);
                out
            }
            ImportForm::UserTypeIndex => match &self.user_type {
                Some(user_type) => format!("{user_type}{USER_TYPE_SEPARATOR}{}", self.id),
                None => self.id.clone(),
            },
        }
    }
}

impl fmt::Display for ImportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.user_type, &self.parent) {
            (_, Some(_)) => f.write_str(&self.render(ImportForm::Composite)),
            (Some(_), None) => f.write_str(&self.render(ImportForm::UserTypeIndex)),
            (None, None) => f.write_str(&self.id),
        }
    }
}

/// `<parent>/<child>`.
pub fn composite(parent: &str, child: &str) -> String {
    format!("{parent}{COMPOSITE_SEPARATOR}{child}")
}

/// Split a composite id on its last separator.
pub fn split_composite(id: &str) -> Option<(&str, &str)> {
    id.rsplit_once(COMPOSITE_SEPARATOR)
        .filter(|(parent, child)| !parent.is_empty() && !child.is_empty())
}

/// Canonical form of a query: pairs URL-encoded, de-duplicated, sorted by
/// key then value, joined with `&`.
pub fn canonical_query<I, K, V>(pairs: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let encoded: BTreeSet<(String, String)> = pairs
        .into_iter()
        .map(|(k, v)| {
            (
                form_urlencoded::byte_serialize(k.as_ref().as_bytes()).collect(),
                form_urlencoded::byte_serialize(v.as_ref().as_bytes()).collect(),
            )
        })
        .collect();
    encoded
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercase hex CRC-32/IEEE of the canonical query.
pub fn fingerprint<I, K, V>(pairs: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    format!("{:x}", crc32fast::hash(canonical_query(pairs).as_bytes()))
}
