//! # Tenantform provider
//!
//! Resource reconciliation runtime for declaratively managed identity
//! tenants. The host hands over desired state per managed object; the
//! runtime drives it through a state machine against the tenant's management
//! API and returns observed state plus diagnostics.
//!
//! ## Architecture
//!
//! - [`reconciler`] - host callbacks onto the state machine, kind registry
//! - [`state_machine`] - create/read/update/delete/import for one object,
//!   over per-kind capability traits
//! - [`schema`] - profile schema evolution with read-back convergence
//! - [`collection`] - filtered, cursored listing walks
//! - [`setdiff`] - add/remove reconciliation of owned member sets
//! - [`ids`] - import ids, composite ids and query fingerprints
//! - [`resources`] - the concrete resource kinds and data sources
//!
//! Every remote call goes through [`tenantform_client::Transport`].
//!
//! ## Example
//!
//! ```ignore
//! use tenantform_provider::prelude::*;
//!
//! let runtime = ProviderRuntime::new(ProviderHandle::from_env()?);
//! let response = runtime
//!     .apply(ResourceRequest::create("group", "engineering", desired))
//!     .await;
//! for diagnostic in response.diagnostics.iter() {
//!     eprintln!("{}: {}", diagnostic.address.as_deref().unwrap_or("-"), diagnostic.summary);
//! }
//! ```

pub mod collection;
pub mod diagnostics;
pub mod error;
pub mod ids;
pub mod logging;
pub mod model;
pub mod provider;
pub mod reconciler;
pub mod resources;
pub mod schema;
pub mod setdiff;
pub mod state_machine;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::collection::{CollectionQuery, CollectionResolver, Filter, ResolveMode};
    pub use crate::diagnostics::{Diagnostic, Diagnostics, Severity};
    pub use crate::error::{ProviderError, ProviderResult};
    pub use crate::ids::{ImportForm, ImportId};
    pub use crate::model::{Attributes, ManagedObject, ObjectStatus, PersistedState, RemoteStatus};
    pub use crate::provider::{ProviderHandle, Timings};
    pub use crate::reconciler::{
        DataRequest, DataResponse, Operation, ProviderRuntime, ResourceRequest, ResourceResponse,
    };
    pub use crate::resources::DataSource;
    pub use crate::schema::{SchemaEngine, SchemaScope};
    pub use crate::setdiff::{MemberOps, SetPolicy};
    pub use crate::state_machine::{
        CreateOp, DeleteOp, Identity, ImportOp, Lifecycle, ManagedResource, OpContext, ReadOp,
        StateMachine, UpdateOp,
    };
}

// Re-export async_trait for kind implementors
pub use async_trait::async_trait;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _query = CollectionQuery::new("/api/v1/groups").filter(Filter::eq("type", "OKTA_GROUP"));
        let _scope = SchemaScope::Group;
        let _status = ObjectStatus::Planned;
        let _op = Operation::Create;
        let _diagnostics = Diagnostics::new();
        assert_eq!(ImportId::remote("00g1").id, "00g1");
    }
}
