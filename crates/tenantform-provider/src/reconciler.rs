//! Reconciler loop: host callbacks onto the state machine.
//!
//! The host hands over one [`ResourceRequest`] per lifecycle callback. The
//! runtime looks the kind up, runs the matching [`StateMachine`] entry point
//! under the kind's deadline and returns the persisted state together with
//! diagnostics stamped with the resource address.

use crate::diagnostics::Diagnostics;
use crate::error::{ProviderError, ProviderResult};
use crate::model::{Attributes, ManagedObject, PersistedState};
use crate::provider::ProviderHandle;
use crate::resources::{self, DataSource};
use crate::state_machine::{ManagedResource, OpContext, StateMachine, DEFAULT_DEADLINE};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tenantform_client::CallContext;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle callback requested by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    Import,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Import => "import",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle callback for one managed object.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    /// `<kind>.<name>`.
    pub address: String,
    pub kind: String,
    pub operation: Operation,
    /// Declared attributes; empty for delete and import.
    pub desired: Attributes,
    /// What the host persisted after the previous callback.
    pub prior: Option<PersistedState>,
    /// Raw import identifier, for [`Operation::Import`].
    pub import_id: Option<String>,
}

impl ResourceRequest {
    fn new(kind: &str, name: &str, operation: Operation) -> Self {
        Self {
            address: format!("{kind}.{name}"),
            kind: kind.to_string(),
            operation,
            desired: Attributes::new(),
            prior: None,
            import_id: None,
        }
    }

    pub fn create(kind: &str, name: &str, desired: Attributes) -> Self {
        Self {
            desired,
            ..Self::new(kind, name, Operation::Create)
        }
    }

    pub fn read(kind: &str, name: &str, desired: Attributes, prior: PersistedState) -> Self {
        Self {
            desired,
            prior: Some(prior),
            ..Self::new(kind, name, Operation::Read)
        }
    }

    pub fn update(kind: &str, name: &str, desired: Attributes, prior: PersistedState) -> Self {
        Self {
            desired,
            prior: Some(prior),
            ..Self::new(kind, name, Operation::Update)
        }
    }

    pub fn delete(kind: &str, name: &str, prior: PersistedState) -> Self {
        Self {
            prior: Some(prior),
            ..Self::new(kind, name, Operation::Delete)
        }
    }

    pub fn import(kind: &str, name: &str, import_id: impl Into<String>) -> Self {
        Self {
            import_id: Some(import_id.into()),
            ..Self::new(kind, name, Operation::Import)
        }
    }
}

/// Outcome of one callback.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceResponse {
    pub address: String,
    pub operation: Operation,
    /// State to persist; `None` once the object is gone (or was never
    /// created).
    pub state: Option<PersistedState>,
    pub diagnostics: Diagnostics,
}

impl ResourceResponse {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    /// Observed attributes of the persisted state, if any.
    pub fn observed(&self) -> Option<&Attributes> {
        self.state.as_ref().map(|s| &s.attributes)
    }
}

/// A data source read.
#[derive(Debug, Clone)]
pub struct DataRequest {
    pub address: String,
    pub name: String,
    pub config: Attributes,
}

impl DataRequest {
    pub fn new(name: &str, label: &str, config: Attributes) -> Self {
        Self {
            address: format!("data.{name}.{label}"),
            name: name.to_string(),
            config,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DataResponse {
    pub address: String,
    pub id: Option<String>,
    pub attributes: Attributes,
    pub diagnostics: Diagnostics,
}

/// Registry of resource kinds and data sources bound to one provider handle.
pub struct ProviderRuntime {
    handle: ProviderHandle,
    kinds: HashMap<&'static str, Arc<dyn ManagedResource>>,
    data_sources: HashMap<&'static str, Arc<dyn DataSource>>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl fmt::Debug for ProviderRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRuntime")
            .field("handle", &self.handle)
            .field("kinds", &self.kinds())
            .field("data_sources", &self.data_source_names())
            .finish()
    }
}

impl ProviderRuntime {
    /// A runtime serving the full resource catalogue.
    pub fn new(handle: ProviderHandle) -> Self {
        Self::with_catalogue(handle, resources::resources(), resources::data_sources())
    }

    pub fn with_catalogue(
        handle: ProviderHandle,
        kinds: Vec<Arc<dyn ManagedResource>>,
        data_sources: Vec<Arc<dyn DataSource>>,
    ) -> Self {
        let parallelism = handle.config().parallelism.max(1);
        let kinds: HashMap<_, _> = kinds.into_iter().map(|k| (k.kind(), k)).collect();
        let data_sources: HashMap<_, _> = data_sources.into_iter().map(|d| (d.name(), d)).collect();
        info!(
            kinds = kinds.len(),
            data_sources = data_sources.len(),
            parallelism = parallelism,
            "Provider runtime ready"
        );
        Self {
            handle,
            kinds,
            data_sources,
            permits: Arc::new(Semaphore::new(parallelism)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn handle(&self) -> &ProviderHandle {
        &self.handle
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.kinds.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn data_source_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.data_sources.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Cancel every in-flight and future callback.
    pub fn shutdown(&self) {
        info!("Provider runtime shutdown requested");
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Run one lifecycle callback.
    pub async fn apply(&self, request: ResourceRequest) -> ResourceResponse {
        let address = request.address.clone();
        let operation = request.operation;
        let mut fallback = request.prior.clone();

        let outcome = match self.permits.acquire().await {
            Ok(_permit) => self.run(request, &mut fallback).await,
            Err(_) => Err(ProviderError::Cancelled),
        };

        let (state, mut diagnostics) = match outcome {
            Ok((state, diagnostics)) => (state, diagnostics),
            Err(err) => {
                warn!(
                    address = %address,
                    operation = %operation,
                    error_code = err.error_code(),
                    error = %err,
                    "Resource callback failed"
                );
                let mut diagnostics = Diagnostics::new();
                diagnostics.error(&err);
                (fallback, diagnostics)
            }
        };
        diagnostics.set_address(&address);
        ResourceResponse {
            address,
            operation,
            state,
            diagnostics,
        }
    }

    /// Run a batch of callbacks for distinct objects concurrently. Results
    /// come back in request order; a repeated address is rejected.
    pub async fn apply_all(&self, requests: Vec<ResourceRequest>) -> Vec<ResourceResponse> {
        let mut seen = HashSet::new();
        let duplicates: Vec<bool> = requests
            .iter()
            .map(|r| !seen.insert(r.address.clone()))
            .collect();

        let futures = requests
            .into_iter()
            .zip(duplicates)
            .map(|(request, duplicate)| async move {
                if duplicate {
                    return Self::duplicate(request);
                }
                self.apply(request).await
            });
        join_all(futures).await
    }

    fn duplicate(request: ResourceRequest) -> ResourceResponse {
        let err = ProviderError::validation(
            "address",
            format!("{} appears more than once in the batch", request.address),
        );
        let mut diagnostics = Diagnostics::new();
        diagnostics.error(&err);
        diagnostics.set_address(&request.address);
        ResourceResponse {
            address: request.address,
            operation: request.operation,
            state: request.prior,
            diagnostics,
        }
    }

    /// Dispatch to the state machine. On failure `fallback` holds the state
    /// the host should keep.
    async fn run(
        &self,
        request: ResourceRequest,
        fallback: &mut Option<PersistedState>,
    ) -> ProviderResult<(Option<PersistedState>, Diagnostics)> {
        let resource = self
            .kinds
            .get(request.kind.as_str())
            .ok_or_else(|| ProviderError::UnknownKind {
                kind: request.kind.clone(),
            })?;
        let call = CallContext::with_token(self.shutdown.child_token(), resource.deadline());
        let mut machine = StateMachine::new(resource.as_ref(), OpContext::new(&call, &self.handle));
        debug!(address = %request.address, operation = %request.operation, "Dispatching callback");

        if request.operation == Operation::Import {
            let raw_id = request
                .import_id
                .as_deref()
                .ok_or_else(|| ProviderError::validation("import_id", "an import id is required"))?;
            let obj = machine.import(raw_id).await?;
            info!(address = %request.address, id = ?obj.id, "Resource imported");
            return Ok((Some(obj.persist()?), Diagnostics::new()));
        }

        let mut obj = match (request.operation, request.prior) {
            (Operation::Create, _) => ManagedObject::planned(request.kind.as_str(), request.desired),
            (_, Some(prior)) => {
                if prior.kind != request.kind {
                    return Err(ProviderError::validation(
                        "kind",
                        format!("persisted state belongs to {}, not {}", prior.kind, request.kind),
                    ));
                }
                prior.restore(request.desired)
            }
            (Operation::Update, None) => {
                return Err(ProviderError::validation(
                    "id",
                    "cannot update an object that has no persisted state",
                ))
            }
            // Nothing was ever recorded, so there is nothing to read or delete.
            (_, None) => return Ok((None, Diagnostics::new())),
        };

        let result = match request.operation {
            Operation::Create => machine.create(&mut obj).await,
            Operation::Read => machine.read(&mut obj).await,
            Operation::Update => machine.update(&mut obj).await,
            Operation::Delete => machine.delete(&mut obj).await,
            Operation::Import => Err(ProviderError::validation(
                "operation",
                "import carries no persisted state",
            )),
        };

        // A create that got as far as an id is recorded even when a later
        // step failed, so the next plan sees the object.
        let state = if obj.is_destroyed() || obj.id.is_none() {
            None
        } else {
            Some(obj.persist()?)
        };
        match result {
            Ok(diagnostics) => {
                info!(
                    address = %request.address,
                    operation = %request.operation,
                    status = obj.status.as_str(),
                    "Resource callback completed"
                );
                Ok((state, diagnostics))
            }
            Err(err) => {
                *fallback = state;
                Err(err)
            }
        }
    }

    /// Read a data source.
    pub async fn read_data(&self, request: DataRequest) -> DataResponse {
        let outcome = match self.permits.acquire().await {
            Ok(_permit) => self.run_data(&request).await,
            Err(_) => Err(ProviderError::Cancelled),
        };
        let (id, attributes, mut diagnostics) = match outcome {
            Ok(result) => (Some(result.id), result.attributes, result.diagnostics),
            Err(err) => {
                warn!(address = %request.address, error = %err, "Data source read failed");
                let mut diagnostics = Diagnostics::new();
                diagnostics.error(&err);
                (None, Attributes::new(), diagnostics)
            }
        };
        diagnostics.set_address(&request.address);
        DataResponse {
            address: request.address,
            id,
            attributes,
            diagnostics,
        }
    }

    async fn run_data(&self, request: &DataRequest) -> ProviderResult<resources::data::DataResult> {
        let source = self
            .data_sources
            .get(request.name.as_str())
            .ok_or_else(|| ProviderError::UnknownKind {
                kind: format!("data.{}", request.name),
            })?;
        if source.next_generation_only() && self.handle.classic_org() {
            return Err(ProviderError::FeatureGated {
                kind: source.name().to_string(),
            });
        }
        let call = CallContext::with_token(self.shutdown.child_token(), DEFAULT_DEADLINE);
        source
            .read(&OpContext::new(&call, &self.handle), &request.config)
            .await
    }
}
