//! `user`: the principal kind.
//!
//! Profile, status, admin roles, group memberships and credentials. Status
//! changes go through the lifecycle endpoints and are driven by the state
//! machine before any other sub-operation.

use super::{attributes, optional_str, remote_id, required_str, set_value, string_set};
use crate::error::{ApiResultExt, ProviderError, ProviderResult};
use crate::model::{Attributes, ChangeSet, ManagedObject, ObjectStatus, RemoteStatus};
use crate::setdiff::{self, MemberOps, SetPolicy, EVERYONE_GROUP};
use crate::state_machine::{
    CreateOp, CreateOptions, DeleteOp, Identity, ImportOp, Lifecycle, ManagedResource,
    Observation, OpContext, ReadOp, UpdateGroup, UpdateOp, STATUS_ATTRIBUTE,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use tenantform_client::{ApiRequest, CallContext, OperationKind, Transport};
use tracing::debug;

pub const KIND: &str = "user";
pub const MIN_RECOVERY_ANSWER_LEN: usize = 4;

/// Declared attribute -> remote profile field.
const PROFILE_FIELDS: &[(&str, &str)] = &[
    ("login", "login"),
    ("first_name", "firstName"),
    ("last_name", "lastName"),
    ("email", "email"),
];
const CUSTOM_PROFILE: &str = "custom_profile_attributes";
const ADMIN_ROLES: &str = "admin_roles";
const GROUP_MEMBERSHIPS: &str = "group_memberships";
const PASSWORD: &str = "password";
const RECOVERY_QUESTION: &str = "recovery_question";
const RECOVERY_ANSWER: &str = "recovery_answer";
/// Never returned by the remote.
const WRITE_ONLY: &[&str] = &[PASSWORD, RECOVERY_ANSWER];

const GROUPS: &[UpdateGroup] = &[
    UpdateGroup::rest("profile"),
    UpdateGroup::new("roles", &[ADMIN_ROLES]),
    UpdateGroup::new("groups", &[GROUP_MEMBERSHIPS]),
    UpdateGroup::new("credentials", &[PASSWORD, RECOVERY_QUESTION, RECOVERY_ANSWER]),
];

const ROLE_POLICY: SetPolicy = SetPolicy::exclusive();
const GROUP_POLICY: SetPolicy = SetPolicy::exclusive().ignoring(&[EVERYONE_GROUP]);

fn user_path(id: &str) -> String {
    format!("/api/v1/users/{id}")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UserResource;

impl UserResource {
    fn profile(desired: &Attributes) -> Value {
        let mut profile = Map::new();
        if let Some(Value::Object(custom)) = desired.get(CUSTOM_PROFILE) {
            profile.extend(custom.clone());
        }
        for (attr, field) in PROFILE_FIELDS {
            if let Some(value) = desired.get(*attr) {
                profile.insert((*field).to_string(), value.clone());
            }
        }
        Value::Object(profile)
    }

    fn credentials(desired: &Attributes, changes: Option<&ChangeSet>) -> Option<Value> {
        let wanted = |key: &str| changes.map_or(true, |c| c.contains(key));
        let mut credentials = Map::new();
        if let Some(password) = optional_str(desired, PASSWORD).filter(|_| wanted(PASSWORD)) {
            credentials.insert("password".into(), json!({ "value": password }));
        }
        if wanted(RECOVERY_QUESTION) || wanted(RECOVERY_ANSWER) {
            if let (Some(question), Some(answer)) = (
                optional_str(desired, RECOVERY_QUESTION),
                optional_str(desired, RECOVERY_ANSWER),
            ) {
                credentials.insert(
                    "recovery_question".into(),
                    json!({ "question": question, "answer": answer }),
                );
            }
        }
        (!credentials.is_empty()).then_some(Value::Object(credentials))
    }

    /// Project a remote user onto declared attributes.
    fn observe(
        body: &Value,
        obj: &ManagedObject,
        roles: Option<BTreeSet<String>>,
        groups: Option<BTreeSet<String>>,
    ) -> ProviderResult<Observation> {
        let id = remote_id(body, KIND)?;
        let profile = body.get("profile").cloned().unwrap_or(Value::Null);
        let status =
            RemoteStatus::parse(body.get("status").and_then(Value::as_str).unwrap_or("ACTIVE"));

        let mut observed = attributes(
            PROFILE_FIELDS
                .iter()
                .map(|(attr, field)| (*attr, profile.get(*field).cloned().unwrap_or(Value::Null))),
        );

        // Live-class statuses compare equal to a declared ACTIVE.
        let folded = match status.coarse() {
            ObjectStatus::Live => RemoteStatus::Active,
            _ => status.clone(),
        };
        observed.insert(STATUS_ATTRIBUTE.into(), Value::String(folded.to_string()));

        let custom_keys: BTreeSet<String> = [Some(&obj.desired), obj.observed.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|attrs| attrs.get(CUSTOM_PROFILE).and_then(Value::as_object))
            .flat_map(|custom| custom.keys().cloned())
            .collect();
        if !custom_keys.is_empty() {
            let custom: Map<String, Value> = custom_keys
                .into_iter()
                .filter_map(|k| profile.get(&k).cloned().map(|v| (k, v)))
                .collect();
            observed.insert(CUSTOM_PROFILE.into(), Value::Object(custom));
        }

        if let Some(question) = body
            .pointer("/credentials/recovery_question/question")
            .and_then(Value::as_str)
        {
            observed.insert(RECOVERY_QUESTION.into(), Value::String(question.to_string()));
        }
        for key in WRITE_ONLY {
            if let Some(value) = obj.observed.as_ref().and_then(|o| o.get(*key)) {
                observed.insert((*key).to_string(), value.clone());
            }
        }
        if let Some(roles) = roles {
            observed.insert(ADMIN_ROLES.into(), set_value(&roles));
        }
        if let Some(groups) = groups {
            observed.insert(GROUP_MEMBERSHIPS.into(), set_value(&groups));
        }
        if let Some(created) = body.get("created") {
            observed.insert("created".into(), created.clone());
        }
        Ok(Observation::new(id, observed).with_status(status))
    }

    fn manages(obj: &ManagedObject, key: &str) -> bool {
        obj.desired.contains_key(key)
            || obj.observed.as_ref().is_some_and(|o| o.contains_key(key))
    }

    async fn lifecycle_call(ctx: &OpContext<'_>, id: &str, action: &str) -> ProviderResult<()> {
        let request = ApiRequest::post(format!("{}/lifecycle/{action}", user_path(id)))
            .query("sendEmail", "false");
        ctx.handle
            .transport()
            .send(ctx.call, &request)
            .await
            .op(&format!("{action} user {id}"))?;
        debug!(id = id, action = action, "User lifecycle call issued");
        Ok(())
    }
}

impl Identity for UserResource {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn validate(&self, desired: &Attributes) -> ProviderResult<()> {
        for attr in ["login", "first_name", "last_name", "email"] {
            required_str(desired, attr)?;
        }
        if let Some(status) = optional_str(desired, STATUS_ATTRIBUTE) {
            if !matches!(status, "ACTIVE" | "STAGED" | "SUSPENDED" | "DEPROVISIONED") {
                return Err(ProviderError::validation(
                    STATUS_ATTRIBUTE,
                    format!("status must be one of ACTIVE, STAGED, SUSPENDED, DEPROVISIONED, got '{status}'"),
                ));
            }
        }
        if optional_str(desired, RECOVERY_QUESTION).is_some() {
            let answer = optional_str(desired, RECOVERY_ANSWER).unwrap_or("");
            if answer.chars().count() < MIN_RECOVERY_ANSWER_LEN {
                return Err(ProviderError::validation(
                    RECOVERY_ANSWER,
                    format!("recovery_answer must be at least {MIN_RECOVERY_ANSWER_LEN} characters when recovery_question is set"),
                ));
            }
        }
        string_set(desired, ADMIN_ROLES)?;
        string_set(desired, GROUP_MEMBERSHIPS)?;
        Ok(())
    }
}

#[async_trait]
impl CreateOp for UserResource {
    async fn create(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        options: CreateOptions,
    ) -> ProviderResult<Observation> {
        let mut body = json!({ "profile": Self::profile(&obj.desired) });
        if let Some(credentials) = Self::credentials(&obj.desired, None) {
            body["credentials"] = credentials;
        }
        let declared = string_set(&obj.desired, GROUP_MEMBERSHIPS)?;
        let built_in = if declared.is_empty() {
            BTreeSet::new()
        } else {
            UserGroups::new(ctx.handle.transport())
                .built_in(ctx.call)
                .await?
        };
        let assigned = assignable_groups(&declared, &built_in);
        if !assigned.is_empty() {
            body["groupIds"] = set_value(&assigned);
        }

        let request = ApiRequest::post("/api/v1/users")
            .query("activate", options.activate.to_string())
            .body(body);
        let created: Value = ctx
            .handle
            .transport()
            .fetch(ctx.call, &request)
            .await
            .op("create user")?;

        // Roles need the new id; they are assigned once it is recorded.
        let roles = obj.desired.contains_key(ADMIN_ROLES).then(BTreeSet::new);
        let groups = obj.desired.contains_key(GROUP_MEMBERSHIPS).then_some(declared);

        let mut observation = Self::observe(&created, obj, roles, groups)?;
        for key in WRITE_ONLY {
            if let Some(value) = obj.desired.get(*key) {
                observation.attributes.insert((*key).to_string(), value.clone());
            }
        }
        Ok(observation)
    }

    async fn after_create(
        &self,
        ctx: &OpContext<'_>,
        obj: &mut ManagedObject,
    ) -> ProviderResult<()> {
        if !obj.desired.contains_key(ADMIN_ROLES) {
            return Ok(());
        }
        let id = obj.id()?.to_string();
        let desired = string_set(&obj.desired, ADMIN_ROLES)?;
        let ops = UserRoles::new(ctx.handle.transport());
        setdiff::reconcile(ctx.call, &ops, &id, &desired, &BTreeSet::new(), &ROLE_POLICY).await?;
        if let Some(observed) = obj.observed.as_mut() {
            observed.insert(ADMIN_ROLES.into(), set_value(&desired));
        }
        Ok(())
    }
}

#[async_trait]
impl ReadOp for UserResource {
    async fn read(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
    ) -> ProviderResult<Option<Observation>> {
        let id = obj.id()?;
        let transport = ctx.handle.transport();
        let body: Value = transport
            .fetch(ctx.call, &ApiRequest::get(user_path(id)))
            .await
            .op(&format!("read user {id}"))?;

        let roles = if Self::manages(obj, ADMIN_ROLES) {
            Some(UserRoles::new(transport).list(ctx.call, id).await?)
        } else {
            None
        };
        let groups = if Self::manages(obj, GROUP_MEMBERSHIPS) {
            let memberships = UserGroups::new(transport).memberships(ctx.call, id).await?;
            let declared = string_set(&obj.desired, GROUP_MEMBERSHIPS)?;
            Some(memberships.as_declared(&declared))
        } else {
            None
        };
        Self::observe(&body, obj, roles, groups).map(Some)
    }
}

#[async_trait]
impl UpdateOp for UserResource {
    fn update_groups(&self) -> &'static [UpdateGroup] {
        GROUPS
    }

    async fn apply_group(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        group: &UpdateGroup,
        changes: &ChangeSet,
    ) -> ProviderResult<()> {
        let id = obj.id()?;
        let transport = ctx.handle.transport();
        match group.name {
            "profile" => {
                let request = ApiRequest::post(user_path(id))
                    .body(json!({ "profile": Self::profile(&obj.desired) }))
                    .kind(OperationKind::IdempotentWrite);
                transport
                    .send(ctx.call, &request)
                    .await
                    .op(&format!("update profile of user {id}"))?;
            }
            "roles" => {
                let ops = UserRoles::new(transport);
                let observed = ops.list(ctx.call, id).await?;
                let desired = string_set(&obj.desired, ADMIN_ROLES)?;
                setdiff::reconcile(ctx.call, &ops, id, &desired, &observed, &ROLE_POLICY).await?;
            }
            "groups" => {
                let ops = UserGroups::new(transport);
                let memberships = ops.memberships(ctx.call, id).await?;
                let declared = string_set(&obj.desired, GROUP_MEMBERSHIPS)?;
                let desired = assignable_groups(&declared, &memberships.built_in);
                setdiff::reconcile(
                    ctx.call,
                    &ops,
                    id,
                    &desired,
                    &memberships.assigned,
                    &GROUP_POLICY,
                )
                .await?;
            }
            "credentials" => {
                if let Some(credentials) = Self::credentials(&obj.desired, Some(changes)) {
                    let request = ApiRequest::post(user_path(id))
                        .body(json!({ "credentials": credentials }))
                        .kind(OperationKind::IdempotentWrite);
                    transport
                        .send(ctx.call, &request)
                        .await
                        .op(&format!("update credentials of user {id}"))?;
                }
            }
            other => debug!(group = other, "Unknown update group ignored"),
        }
        Ok(())
    }
}

#[async_trait]
impl DeleteOp for UserResource {
    async fn delete(&self, ctx: &OpContext<'_>, obj: &ManagedObject) -> ProviderResult<()> {
        let id = obj.id()?;
        ctx.handle
            .transport()
            .send(ctx.call, &ApiRequest::delete(user_path(id)))
            .await
            .op(&format!("delete user {id}"))?;
        Ok(())
    }
}

impl ImportOp for UserResource {}

#[async_trait]
impl Lifecycle for UserResource {
    async fn transition(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        from: &RemoteStatus,
        to: &RemoteStatus,
    ) -> ProviderResult<()> {
        let id = obj.id()?;
        let invalid = || {
            ProviderError::validation(
                STATUS_ATTRIBUTE,
                format!("cannot change user status from {from} to {to}"),
            )
        };
        match (from, to) {
            (RemoteStatus::Suspended, RemoteStatus::Active) => {
                Self::lifecycle_call(ctx, id, "unsuspend").await
            }
            (RemoteStatus::Deprovisioned | RemoteStatus::Staged, RemoteStatus::Active) => {
                Self::lifecycle_call(ctx, id, "activate").await
            }
            (RemoteStatus::LockedOut, RemoteStatus::Active) => {
                Self::lifecycle_call(ctx, id, "unlock").await
            }
            (_, RemoteStatus::Active) => Ok(()),
            (RemoteStatus::Staged, RemoteStatus::Suspended) => {
                Self::lifecycle_call(ctx, id, "activate").await?;
                Self::lifecycle_call(ctx, id, "suspend").await
            }
            (RemoteStatus::Deprovisioned, RemoteStatus::Suspended) => Err(invalid()),
            (_, RemoteStatus::Suspended) => Self::lifecycle_call(ctx, id, "suspend").await,
            (_, RemoteStatus::Deprovisioned) => Self::lifecycle_call(ctx, id, "deactivate").await,
            _ => Err(invalid()),
        }
    }

    async fn pending_transition(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
    ) -> ProviderResult<Option<String>> {
        let id = obj.id()?;
        let body: Value = ctx
            .handle
            .transport()
            .fetch(ctx.call, &ApiRequest::get(user_path(id)))
            .await
            .op(&format!("read user {id}"))?;
        Ok(body
            .get("transitioningToStatus")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from))
    }

    async fn deactivate(&self, ctx: &OpContext<'_>, obj: &ManagedObject) -> ProviderResult<()> {
        Self::lifecycle_call(ctx, obj.id()?, "deactivate").await
    }
}

impl ManagedResource for UserResource {
    fn lifecycle(&self) -> Option<&dyn Lifecycle> {
        Some(self)
    }
}

/// Admin role assignments of a user, keyed by role type.
struct UserRoles {
    transport: Transport,
}

impl UserRoles {
    fn new(transport: &Transport) -> Self {
        Self {
            transport: transport.clone(),
        }
    }

    async fn assignments(&self, ctx: &CallContext, user: &str) -> ProviderResult<Vec<Value>> {
        self.transport
            .fetch(ctx, &ApiRequest::get(format!("{}/roles", user_path(user))))
            .await
            .op(&format!("list roles of user {user}"))
    }
}

#[async_trait]
impl MemberOps for UserRoles {
    fn member_kind(&self) -> &str {
        "admin role"
    }

    async fn list(&self, ctx: &CallContext, owner: &str) -> ProviderResult<BTreeSet<String>> {
        Ok(self
            .assignments(ctx, owner)
            .await?
            .iter()
            .filter_map(|role| role.get("type").and_then(Value::as_str).map(String::from))
            .collect())
    }

    async fn add(&self, ctx: &CallContext, owner: &str, member: &str) -> ProviderResult<()> {
        let request = ApiRequest::post(format!("{}/roles", user_path(owner)))
            .body(json!({ "type": member }));
        self.transport
            .send(ctx, &request)
            .await
            .op(&format!("assign role {member} to user {owner}"))?;
        Ok(())
    }

    async fn remove(&self, ctx: &CallContext, owner: &str, member: &str) -> ProviderResult<()> {
        let assignment = self
            .assignments(ctx, owner)
            .await?
            .into_iter()
            .find(|role| role.get("type").and_then(Value::as_str) == Some(member))
            .ok_or_else(|| ProviderError::not_found("admin role", member))?;
        let assignment_id = remote_id(&assignment, "admin role")?;
        self.transport
            .send(
                ctx,
                &ApiRequest::delete(format!("{}/roles/{assignment_id}", user_path(owner))),
            )
            .await
            .op(&format!("unassign role {member} from user {owner}"))?;
        Ok(())
    }
}

/// Whether a group is the built-in `Everyone` group every user belongs to.
fn is_built_in(group: &Value) -> bool {
    group.get("type").and_then(Value::as_str) == Some("BUILT_IN")
        || group.pointer("/profile/name").and_then(Value::as_str) == Some(EVERYONE_GROUP)
}

/// Declared groups minus the implicit ones, by name or by id.
fn assignable_groups(
    declared: &BTreeSet<String>,
    built_in: &BTreeSet<String>,
) -> BTreeSet<String> {
    declared
        .iter()
        .filter(|g| g.as_str() != EVERYONE_GROUP && !built_in.contains(*g))
        .cloned()
        .collect()
}

/// A user's groups split into explicit assignments and implicit membership.
#[derive(Debug, Default)]
struct Memberships {
    assigned: BTreeSet<String>,
    built_in: BTreeSet<String>,
}

impl Memberships {
    fn from_groups(groups: &[Value]) -> Self {
        let mut memberships = Self::default();
        for group in groups {
            let Some(id) = group.get("id").and_then(Value::as_str) else {
                continue;
            };
            if is_built_in(group) {
                memberships.built_in.insert(id.to_string());
            } else {
                memberships.assigned.insert(id.to_string());
            }
        }
        memberships
    }

    /// Observed value of the declared set: explicit assignments, plus the
    /// implicit groups the declaration names, so they never show as drift.
    fn as_declared(&self, declared: &BTreeSet<String>) -> BTreeSet<String> {
        let implicit = declared
            .iter()
            .filter(|g| g.as_str() == EVERYONE_GROUP || self.built_in.contains(*g))
            .cloned();
        self.assigned.iter().cloned().chain(implicit).collect()
    }
}

/// Group memberships of a user. The built-in `Everyone` group is implicit
/// and never written.
struct UserGroups {
    transport: Transport,
}

impl UserGroups {
    fn new(transport: &Transport) -> Self {
        Self {
            transport: transport.clone(),
        }
    }

    async fn memberships(&self, ctx: &CallContext, user: &str) -> ProviderResult<Memberships> {
        let groups: Vec<Value> = self
            .transport
            .fetch(ctx, &ApiRequest::get(format!("{}/groups", user_path(user))))
            .await
            .op(&format!("list groups of user {user}"))?;
        Ok(Memberships::from_groups(&groups))
    }

    /// Ids of the tenant's built-in groups.
    async fn built_in(&self, ctx: &CallContext) -> ProviderResult<BTreeSet<String>> {
        let request = ApiRequest::get("/api/v1/groups").query("filter", "type eq \"BUILT_IN\"");
        let groups: Vec<Value> = self
            .transport
            .fetch(ctx, &request)
            .await
            .op("list built-in groups")?;
        Ok(groups
            .iter()
            .filter_map(|g| g.get("id").and_then(Value::as_str).map(String::from))
            .collect())
    }
}

#[async_trait]
impl MemberOps for UserGroups {
    fn member_kind(&self) -> &str {
        "group membership"
    }

    async fn list(&self, ctx: &CallContext, owner: &str) -> ProviderResult<BTreeSet<String>> {
        Ok(self.memberships(ctx, owner).await?.assigned)
    }

    async fn add(&self, ctx: &CallContext, owner: &str, member: &str) -> ProviderResult<()> {
        self.transport
            .send(ctx, &ApiRequest::put(format!("/api/v1/groups/{member}/users/{owner}")))
            .await
            .op(&format!("add user {owner} to group {member}"))?;
        Ok(())
    }

    async fn remove(&self, ctx: &CallContext, owner: &str, member: &str) -> ProviderResult<()> {
        self.transport
            .send(ctx, &ApiRequest::delete(format!("/api/v1/groups/{member}/users/{owner}")))
            .await
            .op(&format!("remove user {owner} from group {member}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desired(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    fn base() -> Value {
        json!({"login": "a@b.c", "first_name": "A", "last_name": "B", "email": "a@b.c"})
    }

    #[test]
    fn test_recovery_answer_length_boundary() {
        let mut attrs = desired(base());
        attrs.insert(RECOVERY_QUESTION.into(), json!("First pet?"));
        attrs.insert(RECOVERY_ANSWER.into(), json!("cat"));
        let err = UserResource.validate(&attrs).unwrap_err();
        assert!(matches!(err, ProviderError::Validation { ref attribute, .. } if attribute == RECOVERY_ANSWER));

        attrs.insert(RECOVERY_ANSWER.into(), json!("cats"));
        assert!(UserResource.validate(&attrs).is_ok());
    }

    #[test]
    fn test_unknown_status_rejected() {
        let mut attrs = desired(base());
        attrs.insert(STATUS_ATTRIBUTE.into(), json!("LOCKED_OUT"));
        assert!(UserResource.validate(&attrs).is_err());
    }

    #[test]
    fn test_profile_merges_custom_attributes() {
        let mut attrs = desired(base());
        attrs.insert(CUSTOM_PROFILE.into(), json!({"size": "M"}));
        let profile = UserResource::profile(&attrs);
        assert_eq!(profile["firstName"], "A");
        assert_eq!(profile["size"], "M");
    }

    #[test]
    fn test_observed_status_folds_live_statuses() {
        let obj = ManagedObject::planned(KIND, desired(base()));
        let body = json!({
            "id": "00u1",
            "status": "PROVISIONED",
            "profile": {"login": "a@b.c", "firstName": "A", "lastName": "B", "email": "a@b.c"}
        });
        let observation = UserResource::observe(&body, &obj, None, None).unwrap();
        assert_eq!(observation.attributes["status"], "ACTIVE");
        assert_eq!(observation.remote_status, Some(RemoteStatus::Provisioned));
        assert_eq!(observation.attributes["first_name"], "A");
    }

    #[test]
    fn test_built_in_groups_are_implicit() {
        let groups = vec![
            json!({"id": "00gE", "type": "BUILT_IN", "profile": {"name": "Everyone"}}),
            json!({"id": "00g1", "type": "OKTA_GROUP", "profile": {"name": "engineering"}}),
        ];
        let memberships = Memberships::from_groups(&groups);
        assert_eq!(memberships.assigned, BTreeSet::from(["00g1".to_string()]));

        let declared: BTreeSet<String> = ["00gE", "00g1", "00g2"].map(String::from).into();
        assert_eq!(
            assignable_groups(&declared, &memberships.built_in),
            ["00g1", "00g2"].map(String::from).into()
        );
        assert_eq!(
            memberships.as_declared(&declared),
            ["00gE", "00g1"].map(String::from).into()
        );
    }

    #[test]
    fn test_credentials_only_include_changed_parts() {
        let mut attrs = desired(base());
        attrs.insert(PASSWORD.into(), json!("Sup3r-secret"));
        attrs.insert(RECOVERY_QUESTION.into(), json!("First pet?"));
        attrs.insert(RECOVERY_ANSWER.into(), json!("cats"));

        let only_password = ChangeSet::from_keys([PASSWORD]);
        let credentials = UserResource::credentials(&attrs, Some(&only_password)).unwrap();
        assert!(credentials.get("password").is_some());
        assert!(credentials.get("recovery_question").is_none());
    }
}
