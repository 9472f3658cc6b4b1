//! Schema-evolution engine.
//!
//! Applies single-property deltas to a profile schema: POST the delta (merge
//! semantics, `null` removes a custom property), then poll the schema until
//! the change is visible. The tenant acknowledges writes before a new custom
//! property is visible everywhere, so the poll is what makes a write done.
//!
//! Concurrent writers must target disjoint custom keys; nothing here guards
//! against a third party overwriting the same key.

use super::descriptor::{PropertyDescriptor, PropertyKind};
use super::{ProfileSchema, SchemaScope};
use crate::error::{ApiResultExt, ProviderError, ProviderResult};
use serde_json::{json, Value};
use std::time::Duration;
use tenantform_client::{ApiRequest, CallContext, OperationKind, PollPolicy, Probe, Transport};
use tracing::{debug, info, instrument};

/// Deadline for the write itself, retries included.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(30);
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Applies profile schema deltas under convergence polling.
#[derive(Debug, Clone)]
pub struct SchemaEngine {
    transport: Transport,
    poll_interval: Duration,
}

impl SchemaEngine {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            poll_interval: POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Read the whole schema document.
    pub async fn read(&self, ctx: &CallContext, scope: &SchemaScope) -> ProviderResult<ProfileSchema> {
        let operation = format!("read {scope}");
        self.transport
            .fetch::<ProfileSchema>(ctx, &ApiRequest::get(scope.path()))
            .await
            .op(&operation)
    }

    /// Current descriptor of one property, `None` if absent.
    pub async fn property(
        &self,
        ctx: &CallContext,
        scope: &SchemaScope,
        kind: PropertyKind,
        key: &str,
    ) -> ProviderResult<Option<PropertyDescriptor>> {
        let schema = self.read(ctx, scope).await?;
        Ok(schema.property(kind, key).cloned())
    }

    /// Create or replace custom property `key`; returns the converged
    /// remote descriptor.
    #[instrument(skip(self, ctx, scope, descriptor), fields(scope = %scope))]
    pub async fn upsert_custom(
        &self,
        ctx: &CallContext,
        scope: &SchemaScope,
        key: &str,
        descriptor: &PropertyDescriptor,
    ) -> ProviderResult<PropertyDescriptor> {
        descriptor.validate(key, PropertyKind::Custom)?;
        self.write(ctx, scope, PropertyKind::Custom, key, serde_json::to_value(descriptor)?)
            .await?;
        self.await_match(ctx, scope, PropertyKind::Custom, key, descriptor)
            .await
    }

    /// Replace fields of base property `key`. Base properties cannot be
    /// created, so an unknown key is rejected.
    #[instrument(skip(self, ctx, scope, descriptor), fields(scope = %scope))]
    pub async fn upsert_base(
        &self,
        ctx: &CallContext,
        scope: &SchemaScope,
        key: &str,
        descriptor: &PropertyDescriptor,
    ) -> ProviderResult<PropertyDescriptor> {
        descriptor.validate(key, PropertyKind::Base)?;
        if self.property(ctx, scope, PropertyKind::Base, key).await?.is_none() {
            return Err(ProviderError::validation(
                "index",
                format!("'{key}' is not a base property of the {scope}; base properties cannot be created"),
            ));
        }
        self.write(ctx, scope, PropertyKind::Base, key, serde_json::to_value(descriptor)?)
            .await?;
        self.await_match(ctx, scope, PropertyKind::Base, key, descriptor)
            .await
    }

    /// Tombstone custom property `key` and wait until it is gone.
    #[instrument(skip(self, ctx, scope), fields(scope = %scope))]
    pub async fn delete_custom(
        &self,
        ctx: &CallContext,
        scope: &SchemaScope,
        key: &str,
    ) -> ProviderResult<()> {
        match self
            .write(ctx, scope, PropertyKind::Custom, key, Value::Null)
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!(key = key, "Schema already gone");
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        let operation = format!("removal of {scope} property '{key}'");
        let policy = PollPolicy::new(self.poll_interval, scope.convergence_timeout());
        policy
            .until(ctx, &operation, || async {
                match self.read(ctx, scope).await {
                    Ok(schema) if schema.custom.contains_key(key) => {
                        Ok(Probe::Pending("property still present".to_string()))
                    }
                    Ok(_) => Ok(Probe::Ready(())),
                    Err(err) if err.is_not_found() => Ok(Probe::Ready(())),
                    Err(err) => Err(err.into_api_error()),
                }
            })
            .await
            .op(&operation)?;
        info!(key = key, "Schema property removed");
        Ok(())
    }

    async fn write(
        &self,
        ctx: &CallContext,
        scope: &SchemaScope,
        kind: PropertyKind,
        key: &str,
        value: Value,
    ) -> ProviderResult<()> {
        let section = kind.section();
        let body = json!({
            "definitions": {
                section: {
                    "id": format!("#{section}"),
                    "type": "object",
                    "properties": { key: value }
                }
            }
        });
        // Schema POSTs merge by key, so replaying one is safe.
        let request = ApiRequest::post(scope.path())
            .body(body)
            .kind(OperationKind::IdempotentWrite);
        let write_ctx = ctx.child(WRITE_DEADLINE);
        let operation = format!("write {scope} property '{key}'");
        self.transport
            .send(&write_ctx, &request)
            .await
            .op(&operation)?;
        debug!(key = key, section = section, "Schema delta accepted");
        Ok(())
    }

    async fn await_match(
        &self,
        ctx: &CallContext,
        scope: &SchemaScope,
        kind: PropertyKind,
        key: &str,
        submitted: &PropertyDescriptor,
    ) -> ProviderResult<PropertyDescriptor> {
        let operation = format!("{scope} property '{key}'");
        let policy = PollPolicy::new(self.poll_interval, scope.convergence_timeout());
        let converged = policy
            .until(ctx, &operation, || async {
                let schema = self.read(ctx, scope).await.map_err(ProviderError::into_api_error)?;
                Ok(match schema.property(kind, key) {
                    Some(observed) if submitted.matches(observed) => Probe::Ready(observed.clone()),
                    Some(observed) => Probe::Pending(submitted.describe_mismatch(observed)),
                    None => Probe::Pending("property absent".to_string()),
                })
            })
            .await
            .op(&operation)?;
        info!(key = key, "Schema property converged");
        Ok(converged)
    }
}
