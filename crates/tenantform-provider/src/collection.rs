//! Collection resolver: filtered, cursored listing walks.
//!
//! A [`CollectionQuery`] becomes `GET <path>?limit=&filter=&q=&after=` page
//! requests. Cursors come from the `Link: rel="next"` header and are passed
//! back verbatim. Three consumer modes are supported, see [`ResolveMode`].

use crate::diagnostics::Diagnostics;
use crate::error::{ApiResultExt, ProviderError, ProviderResult};
use crate::ids;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use tenantform_client::{ApiRequest, CallContext, Transport, CURSOR_PARAM};
use tracing::{debug, warn};

/// Page size used when a query does not set one.
pub const DEFAULT_PAGE_LIMIT: u32 = 200;

/// Comparison operator of a filter term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    StartsWith,
    Gt,
    Lt,
}

impl FilterOp {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::StartsWith => "sw",
            FilterOp::Gt => "gt",
            FilterOp::Lt => "lt",
        }
    }
}

/// One `field OP value` term.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: String,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn starts_with(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::StartsWith,
            value: value.into(),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let escaped = self.value.replace('\\', "\\\\").replace('"', "\\\"");
        write!(f, "{} {} \"{escaped}\"", self.field, self.op.as_str())
    }
}

/// Filter descriptor for a listing endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionQuery {
    pub path: String,
    /// Conjunction of terms, sent as the `filter` parameter.
    pub filters: Vec<Filter>,
    /// Free-text `q` parameter (prefix match on the remote).
    pub q: Option<String>,
    /// Expression for the `search` parameter.
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub cursor: Option<String>,
    pub sort: Option<String>,
    /// Additional endpoint-specific parameters.
    pub params: Vec<(String, String)>,
    /// Fields the returned items must equal exactly, checked client-side.
    pub exact: Vec<(String, String)>,
}

impl CollectionQuery {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn q(mut self, q: impl Into<String>) -> Self {
        self.q = Some(q.into());
        self
    }

    #[must_use]
    pub fn search(mut self, expression: impl Into<String>) -> Self {
        self.search = Some(expression.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Require `field` (dotted path) of every result to equal `value`.
    #[must_use]
    pub fn exact(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.exact.push((field.into(), value.into()));
        self
    }

    /// Terms sorted and de-duplicated, joined with `and`.
    pub fn filter_expression(&self) -> Option<String> {
        if self.filters.is_empty() {
            return None;
        }
        let mut terms: Vec<String> = self.filters.iter().map(ToString::to_string).collect();
        terms.sort();
        terms.dedup();
        Some(terms.join(" and "))
    }

    /// Query parameters, without the cursor.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(filter) = self.filter_expression() {
            params.push(("filter".to_string(), filter));
        }
        if let Some(q) = &self.q {
            params.push(("q".to_string(), q.clone()));
        }
        if let Some(search) = &self.search {
            params.push(("search".to_string(), search.clone()));
        }
        if let Some(sort) = &self.sort {
            params.push(("sortBy".to_string(), sort.clone()));
        }
        params.extend(self.params.iter().cloned());
        params
    }

    /// Stable id of the query's result set.
    ///
    /// Page size and cursor do not change which objects match, so they are
    /// left out.
    pub fn fingerprint(&self) -> String {
        let mut pairs = self.to_params();
        pairs.push(("path".to_string(), self.path.clone()));
        pairs.extend(
            self.exact
                .iter()
                .map(|(field, value)| (format!("exact.{field}"), value.clone())),
        );
        ids::fingerprint(pairs)
    }

    fn describe(&self) -> String {
        let mut criteria: Vec<String> = self
            .to_params()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        criteria.extend(self.exact.iter().map(|(k, v)| format!("{k}=\"{v}\"")));
        criteria.join(", ")
    }
}

/// How many results the consumer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// One result; the oldest wins when several match. Without an exact
    /// constraint only a two-item page is read, enough to report that the
    /// criteria were not unique.
    FirstMatch,
    /// Every result across all pages.
    Exhaustive,
    /// Exactly one result, otherwise an error.
    UniqueRequired,
}

/// A listed object: its id plus the summary returned by the listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceReference {
    pub id: String,
    pub item: Value,
}

impl ResourceReference {
    /// Look up a dotted path such as `profile.login`.
    pub fn field(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.item, |value, segment| value.get(segment))
    }

    pub fn field_str(&self, path: &str) -> Option<&str> {
        self.field(path).and_then(Value::as_str)
    }

    fn matches_exactly(&self, exact: &[(String, String)]) -> bool {
        exact
            .iter()
            .all(|(field, value)| self.field_str(field) == Some(value.as_str()))
    }
}

/// Result of a resolve.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub items: Vec<ResourceReference>,
    pub diagnostics: Diagnostics,
    /// Cursor of the last page read, if any.
    pub last_cursor: Option<String>,
}

impl Resolution {
    /// The single item of a first-match or unique resolve.
    pub fn into_single(self, kind: &str) -> ProviderResult<(ResourceReference, Diagnostics)> {
        let diagnostics = self.diagnostics;
        self.items
            .into_iter()
            .next()
            .map(|item| (item, diagnostics))
            .ok_or_else(|| ProviderError::not_found(kind, "query"))
    }
}

/// Walks listing endpoints through the transport.
#[derive(Debug, Clone)]
pub struct CollectionResolver {
    transport: Transport,
}

impl CollectionResolver {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Materialize `query` in `mode`. `kind` names the objects in errors.
    pub async fn resolve(
        &self,
        ctx: &CallContext,
        kind: &str,
        query: &CollectionQuery,
        mode: ResolveMode,
    ) -> ProviderResult<Resolution> {
        match mode {
            ResolveMode::FirstMatch => self.first_match(ctx, kind, query).await,
            ResolveMode::Exhaustive => self.walk(ctx, query, None).await,
            ResolveMode::UniqueRequired => {
                let resolution = self.walk(ctx, query, None).await?;
                match resolution.items.len() {
                    0 => Err(ProviderError::not_found(kind, query.describe())),
                    1 => Ok(resolution),
                    count => Err(ProviderError::AmbiguousMatch {
                        kind: kind.to_string(),
                        criteria: query.describe(),
                        count,
                    }),
                }
            }
        }
    }

    async fn first_match(
        &self,
        ctx: &CallContext,
        kind: &str,
        query: &CollectionQuery,
    ) -> ProviderResult<Resolution> {
        let page_limit = if query.exact.is_empty() {
            Some(2)
        } else {
            query.limit
        };
        let mut resolution = self.walk(ctx, query, Some(page_limit)).await?;
        if resolution.items.is_empty() {
            return Err(ProviderError::not_found(kind, query.describe()));
        }
        if resolution.items.len() > 1 {
            resolution.items.sort_by(|a, b| created(a).cmp(&created(b)));
            resolution.diagnostics.info(format!(
                "found multiple {kind} objects with the criteria supplied, using the first one, sorted by creation date."
            ));
        }
        resolution.items.truncate(1);
        Ok(resolution)
    }

    /// Read pages until the cursor runs out. `single_page` stops after the
    /// first page, with the given page size override.
    async fn walk(
        &self,
        ctx: &CallContext,
        query: &CollectionQuery,
        single_page: Option<Option<u32>>,
    ) -> ProviderResult<Resolution> {
        let limit = match single_page {
            Some(limit) => limit,
            None => query.limit,
        }
        .unwrap_or(DEFAULT_PAGE_LIMIT);
        let operation = format!("list {}", query.path);

        let mut resolution = Resolution::default();
        let mut seen_ids = HashSet::new();
        let mut seen_cursors = HashSet::new();
        let mut cursor = query.cursor.clone();
        let mut pages: u32 = 0;

        loop {
            let mut request = ApiRequest::get(query.path.as_str()).query("limit", limit.to_string());
            for (key, value) in query.to_params() {
                request = request.query(key, value);
            }
            if let Some(after) = &cursor {
                request = request.query(CURSOR_PARAM, after.clone());
            }

            let response = self.transport.execute(ctx, &request).await.op(&operation)?;
            pages += 1;
            let next = response.meta.next_cursor.clone();
            let page: Vec<Value> = response.into_json().op(&operation)?;

            for item in page {
                let Some(id) = item.get("id").and_then(Value::as_str).map(String::from) else {
                    warn!(path = %query.path, "Listed item without id skipped");
                    continue;
                };
                let reference = ResourceReference { id, item };
                if !reference.matches_exactly(&query.exact) {
                    continue;
                }
                if seen_ids.insert(reference.id.clone()) {
                    resolution.items.push(reference);
                }
            }

            if single_page.is_some() {
                break;
            }
            match next {
                Some(next) if seen_cursors.insert(next.clone()) => {
                    resolution.last_cursor = Some(next.clone());
                    cursor = Some(next);
                }
                Some(next) => {
                    warn!(path = %query.path, cursor = %next, "Cursor repeated, stopping walk");
                    break;
                }
                None => break,
            }
        }

        debug!(
            path = %query.path,
            pages = pages,
            items = resolution.items.len(),
            "Collection walk finished"
        );
        Ok(resolution)
    }
}

fn created(reference: &ResourceReference) -> &str {
    reference.field_str("created").unwrap_or("")
}
