//! Profile schema properties.
//!
//! `user_schema_property`, `user_base_schema_property`,
//! `group_schema_property` and `app_user_schema_property`, all driven by
//! the [`SchemaEngine`](crate::schema::SchemaEngine). The resource id is the
//! property index.

use super::{optional_str, required_str};
use crate::error::{ProviderError, ProviderResult};
use crate::ids::ImportForm;
use crate::model::{Attributes, ChangeSet, ManagedObject};
use crate::schema::{PropertyDescriptor, PropertyInput, PropertyKind, SchemaScope};
use crate::state_machine::{
    CreateOp, CreateOptions, DeleteOp, Identity, ImportOp, ManagedResource, Observation,
    OpContext, ReadOp, UpdateGroup, UpdateOp,
};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

const INDEX: &str = "index";
const USER_TYPE: &str = "user_type";
const APP_ID: &str = "app_id";
/// Declared attributes that locate the property rather than describe it.
const LOCATORS: &[&str] = &[INDEX, USER_TYPE, APP_ID];

/// Which profile namespace a kind writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Namespace {
    User,
    Group,
    AppUser,
}

#[derive(Debug, Clone, Copy)]
pub struct SchemaPropertyResource {
    kind: &'static str,
    namespace: Namespace,
    property_kind: PropertyKind,
}

impl SchemaPropertyResource {
    pub const fn user() -> Self {
        Self {
            kind: "user_schema_property",
            namespace: Namespace::User,
            property_kind: PropertyKind::Custom,
        }
    }

    pub const fn user_base() -> Self {
        Self {
            kind: "user_base_schema_property",
            namespace: Namespace::User,
            property_kind: PropertyKind::Base,
        }
    }

    pub const fn group() -> Self {
        Self {
            kind: "group_schema_property",
            namespace: Namespace::Group,
            property_kind: PropertyKind::Custom,
        }
    }

    pub const fn app_user() -> Self {
        Self {
            kind: "app_user_schema_property",
            namespace: Namespace::AppUser,
            property_kind: PropertyKind::Custom,
        }
    }

    fn scope(&self, obj: &ManagedObject) -> ProviderResult<SchemaScope> {
        Ok(match self.namespace {
            Namespace::User => SchemaScope::User {
                type_id: optional_str(&obj.desired, USER_TYPE)
                    .or_else(|| obj.parent_key(USER_TYPE))
                    .map(String::from),
            },
            Namespace::Group => SchemaScope::Group,
            Namespace::AppUser => SchemaScope::AppUser {
                app_id: optional_str(&obj.desired, APP_ID)
                    .or_else(|| obj.parent_key("parent"))
                    .map(String::from)
                    .ok_or_else(|| ProviderError::validation(APP_ID, "app_id is required"))?,
            },
        })
    }

    fn descriptor(&self, desired: &Attributes) -> ProviderResult<(String, PropertyDescriptor)> {
        let index = required_str(desired, INDEX)?.to_string();
        let fields: Attributes = desired
            .iter()
            .filter(|(k, _)| !LOCATORS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let input: PropertyInput = serde_json::from_value(Value::Object(fields))
            .map_err(|e| ProviderError::validation(self.kind, e.to_string()))?;
        let descriptor = input.into_descriptor(&index, self.property_kind)?;
        Ok((index, descriptor))
    }

    fn observe(
        &self,
        obj: &ManagedObject,
        index: &str,
        descriptor: &PropertyDescriptor,
    ) -> ProviderResult<Observation> {
        let mut observed = match serde_json::to_value(PropertyInput::from_descriptor(descriptor))? {
            Value::Object(map) => map,
            _ => Attributes::new(),
        };
        observed.insert(INDEX.into(), Value::String(index.to_string()));
        for locator in [USER_TYPE, APP_ID] {
            if let Some(value) = obj.desired.get(locator) {
                observed.insert(locator.into(), value.clone());
            }
        }
        Ok(Observation::new(index, observed))
    }

    async fn upsert(&self, ctx: &OpContext<'_>, obj: &ManagedObject) -> ProviderResult<Observation> {
        let (index, descriptor) = self.descriptor(&obj.desired)?;
        let scope = self.scope(obj)?;
        let engine = ctx.handle.schema_engine();
        let converged = match self.property_kind {
            PropertyKind::Custom => engine.upsert_custom(ctx.call, &scope, &index, &descriptor).await?,
            PropertyKind::Base => engine.upsert_base(ctx.call, &scope, &index, &descriptor).await?,
        };
        self.observe(obj, &index, &converged)
    }
}

impl Identity for SchemaPropertyResource {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn import_form(&self) -> ImportForm {
        match self.namespace {
            Namespace::User => ImportForm::UserTypeIndex,
            Namespace::Group => ImportForm::Remote,
            Namespace::AppUser => ImportForm::Composite,
        }
    }

    fn validate(&self, desired: &Attributes) -> ProviderResult<()> {
        if self.namespace == Namespace::AppUser {
            required_str(desired, APP_ID)?;
        }
        self.descriptor(desired).map(|_| ())
    }
}

#[async_trait]
impl CreateOp for SchemaPropertyResource {
    async fn create(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        _options: CreateOptions,
    ) -> ProviderResult<Observation> {
        self.upsert(ctx, obj).await
    }
}

#[async_trait]
impl ReadOp for SchemaPropertyResource {
    async fn read(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
    ) -> ProviderResult<Option<Observation>> {
        let index = obj.id()?;
        let scope = self.scope(obj)?;
        let current = ctx
            .handle
            .schema_engine()
            .property(ctx.call, &scope, self.property_kind, index)
            .await?;
        match current {
            Some(descriptor) => self.observe(obj, index, &descriptor).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl UpdateOp for SchemaPropertyResource {
    async fn apply_group(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        _group: &UpdateGroup,
        changes: &ChangeSet,
    ) -> ProviderResult<()> {
        if changes.touches(&[INDEX]) {
            return Err(ProviderError::validation(
                INDEX,
                "index cannot change; replace the property instead",
            ));
        }
        self.upsert(ctx, obj).await.map(|_| ())
    }
}

#[async_trait]
impl DeleteOp for SchemaPropertyResource {
    async fn delete(&self, ctx: &OpContext<'_>, obj: &ManagedObject) -> ProviderResult<()> {
        let index = obj.id()?;
        match self.property_kind {
            PropertyKind::Custom => {
                let scope = self.scope(obj)?;
                ctx.handle
                    .schema_engine()
                    .delete_custom(ctx.call, &scope, index)
                    .await
            }
            PropertyKind::Base => {
                info!(kind = self.kind, index = index, "Base properties cannot be removed; forgetting it");
                Ok(())
            }
        }
    }
}

impl ImportOp for SchemaPropertyResource {}

impl ManagedResource for SchemaPropertyResource {}
