//! Resources whose whole state is a set of scalar members under one owner.
//!
//! The object id is the owner id. Every kind declares its owner attribute,
//! its members attribute, the [`SetPolicy`] it reconciles with and the
//! [`MemberOps`] that reach the remote.

use super::{bool_attr, optional_str, required_str, set_value, string_set};
use crate::collection::{CollectionQuery, ResolveMode};
use crate::error::{ApiResultExt, ProviderError, ProviderResult};
use crate::model::{Attributes, ChangeSet, ManagedObject};
use crate::provider::ProviderHandle;
use crate::setdiff::{self, MemberOps, Ownership, SetPolicy};
use crate::state_machine::{
    CreateOp, CreateOptions, DeleteOp, Identity, ImportOp, ManagedResource, Observation,
    OpContext, ReadOp, UpdateGroup, UpdateOp,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tenantform_client::{ApiRequest, CallContext, Transport};
use tracing::debug;

type OpsFactory = fn(&ProviderHandle, &Attributes) -> Box<dyn MemberOps>;
type PolicyFn = fn(&Attributes) -> SetPolicy;

/// A set relationship resource kind.
#[derive(Clone, Copy)]
pub struct SetResource {
    kind: &'static str,
    owner_attr: &'static str,
    members_attr: &'static str,
    /// Settings that must be declared besides owner and members.
    settings: &'static [&'static str],
    policy: PolicyFn,
    ops: OpsFactory,
}

impl std::fmt::Debug for SetResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetResource")
            .field("kind", &self.kind)
            .field("owner_attr", &self.owner_attr)
            .field("members_attr", &self.members_attr)
            .finish()
    }
}

impl SetResource {
    /// Permissions of a custom admin role. Additive, add before remove.
    pub fn role_permissions() -> Self {
        Self {
            kind: "role_permissions",
            owner_attr: "role_id",
            members_attr: "permissions",
            settings: &[],
            policy: |_| SetPolicy::additive(),
            ops: |handle, _| Box::new(RolePermissions(handle.transport().clone())),
        }
    }

    /// Users of a group. Exclusive when `track_all_users` is set.
    pub fn group_memberships() -> Self {
        Self {
            kind: "group_memberships",
            owner_attr: "group_id",
            members_attr: "users",
            settings: &[],
            policy: |attrs| {
                if bool_attr(attrs, "track_all_users") {
                    SetPolicy::exclusive()
                } else {
                    SetPolicy::additive()
                }
            },
            ops: |handle, _| Box::new(GroupUsers(handle.clone())),
        }
    }

    /// Trusted servers of an authorization server. Exclusive; the remote
    /// rejects duplicates, so removals go first.
    pub fn auth_server_trusted_servers() -> Self {
        Self {
            kind: "auth_server_trusted_servers",
            owner_attr: "auth_server_id",
            members_attr: "trusted",
            settings: &[],
            policy: |_| SetPolicy::exclusive().remove_first(),
            ops: |handle, _| Box::new(TrustedServers(handle.transport().clone())),
        }
    }

    /// Apps bound to an app sign-on policy. Unbinding moves the app back to
    /// `default_policy_id`.
    pub fn policy_app_bindings() -> Self {
        Self {
            kind: "policy_app_bindings",
            owner_attr: "policy_id",
            members_attr: "apps",
            settings: &["default_policy_id"],
            policy: |_| SetPolicy::additive(),
            ops: |handle, attrs| {
                Box::new(PolicyApps {
                    transport: handle.transport().clone(),
                    default_policy: optional_str(attrs, "default_policy_id").map(String::from),
                })
            },
        }
    }

    fn owner<'a>(&self, obj: &'a ManagedObject) -> ProviderResult<&'a str> {
        match obj.id.as_deref() {
            Some(id) => Ok(id),
            None => required_str(&obj.desired, self.owner_attr),
        }
    }

    /// Members recorded by the last reconcile.
    fn previous(&self, obj: &ManagedObject) -> ProviderResult<BTreeSet<String>> {
        match &obj.observed {
            Some(observed) => string_set(observed, self.members_attr),
            None => Ok(BTreeSet::new()),
        }
    }

    fn observe(&self, obj: &ManagedObject, owner: &str, members: &BTreeSet<String>) -> Observation {
        let mut attributes = Attributes::new();
        attributes.insert(self.owner_attr.to_string(), Value::String(owner.to_string()));
        attributes.insert(self.members_attr.to_string(), set_value(members));
        // Settings that only shape the reconcile are echoed back.
        for (key, value) in &obj.desired {
            if key != self.owner_attr && key != self.members_attr {
                attributes.insert(key.clone(), value.clone());
            }
        }
        Observation::new(owner, attributes)
    }

    /// List the remote members, scope them to this object and reconcile
    /// towards `desired`. Returns the managed members afterwards.
    async fn converge(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        desired: &BTreeSet<String>,
    ) -> ProviderResult<BTreeSet<String>> {
        let owner = self.owner(obj)?;
        let policy = (self.policy)(&obj.desired);
        let ops = (self.ops)(ctx.handle, &obj.desired);
        let remote = ops.list(ctx.call, owner).await?;
        let previous = self.previous(obj)?;
        let observed = policy.scope_observed(&remote, &previous, desired);
        let diff = setdiff::reconcile(ctx.call, ops.as_ref(), owner, desired, &observed, &policy).await?;

        let mut members = observed;
        members.retain(|m| !diff.to_remove.contains(m));
        members.extend(diff.to_add);
        Ok(members)
    }
}

impl Identity for SetResource {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn validate(&self, desired: &Attributes) -> ProviderResult<()> {
        required_str(desired, self.owner_attr)?;
        string_set(desired, self.members_attr)?;
        for setting in self.settings {
            required_str(desired, setting)?;
        }
        let policy = (self.policy)(desired);
        if policy.ownership == Ownership::Exclusive && !desired.contains_key(self.members_attr) {
            return Err(ProviderError::validation(
                self.members_attr,
                format!("{} is required when the set is exclusively owned", self.members_attr),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CreateOp for SetResource {
    async fn create(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        _options: CreateOptions,
    ) -> ProviderResult<Observation> {
        let desired = string_set(&obj.desired, self.members_attr)?;
        let owner = required_str(&obj.desired, self.owner_attr)?;
        let members = self.converge(ctx, obj, &desired).await?;
        Ok(self.observe(obj, owner, &members))
    }
}

#[async_trait]
impl ReadOp for SetResource {
    async fn read(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
    ) -> ProviderResult<Option<Observation>> {
        let owner = self.owner(obj)?;
        let policy = (self.policy)(&obj.desired);
        let ops = (self.ops)(ctx.handle, &obj.desired);
        let remote = ops.list(ctx.call, owner).await?;
        let desired = string_set(&obj.desired, self.members_attr)?;
        let managed = policy.scope_observed(&remote, &self.previous(obj)?, &desired);
        Ok(Some(self.observe(obj, owner, &managed)))
    }
}

#[async_trait]
impl UpdateOp for SetResource {
    async fn apply_group(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        _group: &UpdateGroup,
        changes: &ChangeSet,
    ) -> ProviderResult<()> {
        if changes.contains(self.owner_attr) {
            return Err(ProviderError::validation(
                self.owner_attr,
                format!("{} cannot change; replace the resource instead", self.owner_attr),
            ));
        }
        let desired = string_set(&obj.desired, self.members_attr)?;
        self.converge(ctx, obj, &desired).await.map(|_| ())
    }
}

#[async_trait]
impl DeleteOp for SetResource {
    async fn delete(&self, ctx: &OpContext<'_>, obj: &ManagedObject) -> ProviderResult<()> {
        let removed = self.converge(ctx, obj, &BTreeSet::new()).await?;
        debug!(kind = self.kind, remaining = removed.len(), "Managed members removed");
        Ok(())
    }
}

impl ImportOp for SetResource {}

impl ManagedResource for SetResource {}

fn ids_of(items: &[Value]) -> BTreeSet<String> {
    items
        .iter()
        .filter_map(|item| item.get("id").and_then(Value::as_str).map(String::from))
        .collect()
}

struct RolePermissions(Transport);

#[async_trait]
impl MemberOps for RolePermissions {
    fn member_kind(&self) -> &str {
        "permission"
    }

    async fn list(&self, ctx: &CallContext, owner: &str) -> ProviderResult<BTreeSet<String>> {
        let body: Value = self
            .0
            .fetch(ctx, &ApiRequest::get(format!("/api/v1/iam/roles/{owner}/permissions")))
            .await
            .op(&format!("list permissions of role {owner}"))?;
        let permissions = body
            .get("permissions")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Ok(permissions
            .iter()
            .filter_map(|p| p.get("label").and_then(Value::as_str).map(String::from))
            .collect())
    }

    async fn add(&self, ctx: &CallContext, owner: &str, member: &str) -> ProviderResult<()> {
        self.0
            .send(ctx, &ApiRequest::post(format!("/api/v1/iam/roles/{owner}/permissions/{member}")))
            .await
            .op(&format!("grant {member} to role {owner}"))?;
        Ok(())
    }

    async fn remove(&self, ctx: &CallContext, owner: &str, member: &str) -> ProviderResult<()> {
        self.0
            .send(ctx, &ApiRequest::delete(format!("/api/v1/iam/roles/{owner}/permissions/{member}")))
            .await
            .op(&format!("revoke {member} from role {owner}"))?;
        Ok(())
    }
}

struct GroupUsers(ProviderHandle);

#[async_trait]
impl MemberOps for GroupUsers {
    fn member_kind(&self) -> &str {
        "group member"
    }

    async fn list(&self, ctx: &CallContext, owner: &str) -> ProviderResult<BTreeSet<String>> {
        let query = CollectionQuery::new(format!("/api/v1/groups/{owner}/users"));
        let resolution = self
            .0
            .collections()
            .resolve(ctx, "user", &query, ResolveMode::Exhaustive)
            .await?;
        Ok(resolution.items.into_iter().map(|item| item.id).collect())
    }

    async fn add(&self, ctx: &CallContext, owner: &str, member: &str) -> ProviderResult<()> {
        self.0
            .transport()
            .send(ctx, &ApiRequest::put(format!("/api/v1/groups/{owner}/users/{member}")))
            .await
            .op(&format!("add user {member} to group {owner}"))?;
        Ok(())
    }

    async fn remove(&self, ctx: &CallContext, owner: &str, member: &str) -> ProviderResult<()> {
        self.0
            .transport()
            .send(ctx, &ApiRequest::delete(format!("/api/v1/groups/{owner}/users/{member}")))
            .await
            .op(&format!("remove user {member} from group {owner}"))?;
        Ok(())
    }
}

struct TrustedServers(Transport);

#[async_trait]
impl MemberOps for TrustedServers {
    fn member_kind(&self) -> &str {
        "trusted server"
    }

    async fn list(&self, ctx: &CallContext, owner: &str) -> ProviderResult<BTreeSet<String>> {
        let request = ApiRequest::get(format!("/api/v1/authorizationServers/{owner}/associatedServers"))
            .query("trusted", "true");
        let servers: Vec<Value> = self
            .0
            .fetch(ctx, &request)
            .await
            .op(&format!("list trusted servers of {owner}"))?;
        Ok(ids_of(&servers))
    }

    async fn add(&self, ctx: &CallContext, owner: &str, member: &str) -> ProviderResult<()> {
        let request = ApiRequest::post(format!("/api/v1/authorizationServers/{owner}/associatedServers"))
            .body(json!({ "trusted": [member] }));
        self.0
            .send(ctx, &request)
            .await
            .op(&format!("trust {member} from {owner}"))?;
        Ok(())
    }

    async fn remove(&self, ctx: &CallContext, owner: &str, member: &str) -> ProviderResult<()> {
        self.0
            .send(
                ctx,
                &ApiRequest::delete(format!(
                    "/api/v1/authorizationServers/{owner}/associatedServers/{member}"
                )),
            )
            .await
            .op(&format!("untrust {member} from {owner}"))?;
        Ok(())
    }
}

struct PolicyApps {
    transport: Transport,
    /// Where unbound apps go; unbinding is refused without one.
    default_policy: Option<String>,
}

impl PolicyApps {
    async fn assign(&self, ctx: &CallContext, app: &str, policy: &str) -> ProviderResult<()> {
        self.transport
            .send(ctx, &ApiRequest::put(format!("/api/v1/apps/{app}/policies/{policy}")))
            .await
            .op(&format!("assign policy {policy} to app {app}"))?;
        Ok(())
    }
}

#[async_trait]
impl MemberOps for PolicyApps {
    fn member_kind(&self) -> &str {
        "policy app"
    }

    async fn list(&self, ctx: &CallContext, owner: &str) -> ProviderResult<BTreeSet<String>> {
        let apps: Vec<Value> = self
            .transport
            .fetch(ctx, &ApiRequest::get(format!("/api/v1/policies/{owner}/app")))
            .await
            .op(&format!("list apps of policy {owner}"))?;
        Ok(ids_of(&apps))
    }

    async fn add(&self, ctx: &CallContext, owner: &str, member: &str) -> ProviderResult<()> {
        self.assign(ctx, member, owner).await
    }

    async fn remove(&self, ctx: &CallContext, _owner: &str, member: &str) -> ProviderResult<()> {
        let default_policy = self.default_policy.as_deref().ok_or_else(|| {
            ProviderError::validation("default_policy_id", "default_policy_id is required to unbind apps")
        })?;
        self.assign(ctx, member, default_policy).await
    }
}
