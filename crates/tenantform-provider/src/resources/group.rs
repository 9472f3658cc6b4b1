//! `group`: name and description, single-phase delete.

use super::{attributes, remote_id, required_str};
use crate::error::{ApiResultExt, ProviderResult};
use crate::model::{Attributes, ChangeSet, ManagedObject};
use crate::state_machine::{
    CreateOp, CreateOptions, DeleteOp, Identity, ImportOp, ManagedResource, Observation,
    OpContext, ReadOp, UpdateGroup, UpdateOp,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tenantform_client::ApiRequest;

pub const KIND: &str = "group";

#[derive(Debug, Clone, Copy, Default)]
pub struct GroupResource;

impl GroupResource {
    fn body(desired: &Attributes) -> Value {
        json!({
            "profile": {
                "name": desired.get("name").cloned().unwrap_or(Value::Null),
                "description": desired.get("description").cloned().unwrap_or(Value::Null),
            }
        })
    }

    fn observe(body: &Value) -> ProviderResult<Observation> {
        let id = remote_id(body, KIND)?;
        let profile = body.get("profile").cloned().unwrap_or(Value::Null);
        let observed = attributes([
            ("name", profile.get("name").cloned().unwrap_or(Value::Null)),
            (
                "description",
                profile.get("description").cloned().unwrap_or(Value::Null),
            ),
            ("type", body.get("type").cloned().unwrap_or(Value::Null)),
        ]);
        Ok(Observation::new(id, observed))
    }
}

impl Identity for GroupResource {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn validate(&self, desired: &Attributes) -> ProviderResult<()> {
        required_str(desired, "name").map(|_| ())
    }
}

#[async_trait]
impl CreateOp for GroupResource {
    async fn create(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        _options: CreateOptions,
    ) -> ProviderResult<Observation> {
        let request = ApiRequest::post("/api/v1/groups").body(Self::body(&obj.desired));
        let created: Value = ctx
            .handle
            .transport()
            .fetch(ctx.call, &request)
            .await
            .op("create group")?;
        Self::observe(&created)
    }
}

#[async_trait]
impl ReadOp for GroupResource {
    async fn read(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
    ) -> ProviderResult<Option<Observation>> {
        let id = obj.id()?;
        let body: Value = ctx
            .handle
            .transport()
            .fetch(ctx.call, &ApiRequest::get(format!("/api/v1/groups/{id}")))
            .await
            .op(&format!("read group {id}"))?;
        Self::observe(&body).map(Some)
    }
}

#[async_trait]
impl UpdateOp for GroupResource {
    async fn apply_group(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        _group: &UpdateGroup,
        _changes: &ChangeSet,
    ) -> ProviderResult<()> {
        let id = obj.id()?;
        let request =
            ApiRequest::put(format!("/api/v1/groups/{id}")).body(Self::body(&obj.desired));
        ctx.handle
            .transport()
            .send(ctx.call, &request)
            .await
            .op(&format!("update group {id}"))?;
        Ok(())
    }
}

#[async_trait]
impl DeleteOp for GroupResource {
    async fn delete(&self, ctx: &OpContext<'_>, obj: &ManagedObject) -> ProviderResult<()> {
        let id = obj.id()?;
        ctx.handle
            .transport()
            .send(ctx.call, &ApiRequest::delete(format!("/api/v1/groups/{id}")))
            .await
            .op(&format!("delete group {id}"))?;
        Ok(())
    }
}

impl ImportOp for GroupResource {}

impl ManagedResource for GroupResource {}
