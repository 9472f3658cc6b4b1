//! Resource state machine.
//!
//! Drives create, read, update, delete and import for one [`ManagedObject`]
//! through a kind's capability set:
//!
//! - [`Identity`] - kind name, import form, gating and local validation
//! - [`CreateOp`], [`ReadOp`], [`UpdateOp`], [`DeleteOp`], [`ImportOp`]
//! - [`Lifecycle`] - status transitions of principal kinds
//!
//! A kind implements all of them and is used as `dyn ManagedResource`.

use crate::diagnostics::Diagnostics;
use crate::error::{ApiResultExt, ProviderError, ProviderResult};
use crate::ids::{ImportForm, ImportId};
use crate::model::{
    Attributes, ChangeSet, LifecycleState, ManagedObject, ObjectStatus, RemoteStatus,
};
use crate::provider::ProviderHandle;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tenantform_client::{CallContext, PollPolicy, Probe};
use tracing::{debug, info, instrument, warn};

/// Per-callback deadline unless a kind overrides it.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(20 * 60);

/// Attribute carrying the principal status.
pub const STATUS_ATTRIBUTE: &str = "status";

/// Everything a capability needs for one remote call sequence.
#[derive(Debug, Clone, Copy)]
pub struct OpContext<'a> {
    pub call: &'a CallContext,
    pub handle: &'a ProviderHandle,
}

impl<'a> OpContext<'a> {
    pub fn new(call: &'a CallContext, handle: &'a ProviderHandle) -> Self {
        Self { call, handle }
    }
}

/// What a create or read returns.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub id: String,
    pub attributes: Attributes,
    /// Fine-grained status, for principal kinds.
    pub remote_status: Option<RemoteStatus>,
}

impl Observation {
    pub fn new(id: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            id: id.into(),
            attributes,
            remote_status: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: RemoteStatus) -> Self {
        self.remote_status = Some(status);
        self
    }
}

/// Create-time options decided by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOptions {
    /// `false` creates a principal in the staged status.
    pub activate: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self { activate: true }
    }
}

/// A named group of attributes updated by one sub-operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateGroup {
    pub name: &'static str,
    /// Attributes owned by the group; empty means every attribute no other
    /// group owns.
    pub attributes: &'static [&'static str],
}

impl UpdateGroup {
    pub const fn new(name: &'static str, attributes: &'static [&'static str]) -> Self {
        Self { name, attributes }
    }

    /// Catch-all group.
    pub const fn rest(name: &'static str) -> Self {
        Self {
            name,
            attributes: &[],
        }
    }
}

/// Default update dispatch: a single catch-all group.
pub const SINGLE_GROUP: &[UpdateGroup] = &[UpdateGroup::rest("attributes")];

/// Kind identity and local policy.
pub trait Identity: Send + Sync {
    fn kind(&self) -> &'static str;

    fn import_form(&self) -> ImportForm {
        ImportForm::Remote
    }

    /// Refuse to run against classic tenants.
    fn next_generation_only(&self) -> bool {
        false
    }

    fn deadline(&self) -> Duration {
        DEFAULT_DEADLINE
    }

    /// Local checks on the declared values, run before any remote call.
    fn validate(&self, _desired: &Attributes) -> ProviderResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait CreateOp: Identity {
    async fn create(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        options: CreateOptions,
    ) -> ProviderResult<Observation>;

    /// Writes that need the new id. Runs once the id is recorded on `obj`, so
    /// a failure here still leaves the object tracked.
    async fn after_create(
        &self,
        _ctx: &OpContext<'_>,
        _obj: &mut ManagedObject,
    ) -> ProviderResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait ReadOp: Identity {
    /// Current remote state; `None` (or a not-found error) means gone.
    async fn read(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
    ) -> ProviderResult<Option<Observation>>;
}

#[async_trait]
pub trait UpdateOp: Identity {
    /// Sub-operations in the order they are applied.
    fn update_groups(&self) -> &'static [UpdateGroup] {
        SINGLE_GROUP
    }

    async fn apply_group(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        group: &UpdateGroup,
        changes: &ChangeSet,
    ) -> ProviderResult<()>;
}

#[async_trait]
pub trait DeleteOp: Identity {
    async fn delete(&self, ctx: &OpContext<'_>, obj: &ManagedObject) -> ProviderResult<()>;
}

pub trait ImportOp: Identity {
    /// Seed an object from a parsed import id.
    fn seed(&self, import: &ImportId) -> ManagedObject {
        let mut obj = ManagedObject::existing(self.kind(), import.id.clone(), Attributes::new());
        if let Some(parent) = &import.parent {
            obj.parent_keys.insert("parent".to_string(), parent.clone());
        }
        if let Some(user_type) = &import.user_type {
            obj.parent_keys
                .insert("user_type".to_string(), user_type.clone());
        }
        obj
    }
}

/// Status transitions of principal kinds.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Issue the lifecycle call(s) moving the object from `from` to `to`.
    async fn transition(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        from: &RemoteStatus,
        to: &RemoteStatus,
    ) -> ProviderResult<()>;

    /// The remote `transitioningToStatus`, if a transition is still running.
    async fn pending_transition(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
    ) -> ProviderResult<Option<String>>;

    /// First phase of a two-phase delete.
    async fn deactivate(&self, ctx: &OpContext<'_>, obj: &ManagedObject) -> ProviderResult<()>;
}

/// The full capability set of a resource kind.
pub trait ManagedResource: CreateOp + ReadOp + UpdateOp + DeleteOp + ImportOp {
    /// Present for lifecycled kinds; their delete is two-phase.
    fn lifecycle(&self) -> Option<&dyn Lifecycle> {
        None
    }
}

/// Drives one object through its lifecycle. Operations on one object are
/// strictly sequential.
pub struct StateMachine<'a> {
    resource: &'a dyn ManagedResource,
    ctx: OpContext<'a>,
    state: LifecycleState,
}

impl<'a> StateMachine<'a> {
    pub fn new(resource: &'a dyn ManagedResource, ctx: OpContext<'a>) -> Self {
        Self {
            resource,
            ctx,
            state: LifecycleState::Planned,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn enter(&mut self, next: LifecycleState) {
        if !self.state.can_transition_to(next) {
            warn!(
                kind = self.resource.kind(),
                from = ?self.state,
                to = ?next,
                "Unexpected state transition"
            );
        }
        debug!(kind = self.resource.kind(), from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }

    fn start_from(&mut self, obj: &ManagedObject) {
        self.state = if obj.is_destroyed() {
            LifecycleState::Destroyed
        } else if obj.id.is_some() {
            LifecycleState::Live
        } else {
            LifecycleState::Planned
        };
    }

    fn gate(&self) -> ProviderResult<()> {
        if self.resource.next_generation_only() && self.ctx.handle.classic_org() {
            return Err(ProviderError::FeatureGated {
                kind: self.resource.kind().to_string(),
            });
        }
        Ok(())
    }

    /// Create the remote object and adopt its id and observed values.
    #[instrument(skip(self, obj), fields(kind = self.resource.kind()))]
    pub async fn create(&mut self, obj: &mut ManagedObject) -> ProviderResult<Diagnostics> {
        self.gate()?;
        self.resource.validate(&obj.desired)?;
        self.start_from(obj);

        let lifecycle = self.resource.lifecycle();
        let desired_status = desired_status(obj);
        let options = CreateOptions {
            activate: !(lifecycle.is_some() && desired_status == Some(RemoteStatus::Staged)),
        };

        self.enter(LifecycleState::Creating);
        let observation = self.resource.create(&self.ctx, obj, options).await?;
        let id = observation.id.clone();
        self.adopt(obj, observation);
        obj.meta.created_at = Some(Utc::now());
        if obj.status == ObjectStatus::Planned {
            obj.status = ObjectStatus::Created;
        }
        self.enter(LifecycleState::Live);
        info!(kind = self.resource.kind(), id = %id, options = ?options, "Object created");

        if let Err(err) = self.resource.after_create(&self.ctx, obj).await {
            warn!(
                kind = self.resource.kind(),
                id = %id,
                error = %err,
                "Post-create step failed; object kept for the next apply"
            );
            return Err(err);
        }

        // Statuses reachable only through a lifecycle call after create.
        if let (Some(lifecycle), Some(target)) = (lifecycle, desired_status) {
            let current = current_status(obj);
            if current.as_ref() != Some(&target) && target != RemoteStatus::Staged {
                let from = current.unwrap_or(RemoteStatus::Active);
                self.drive_status(lifecycle, obj, &from, &target).await?;
                self.refresh(obj).await?;
            }
        }
        if obj.status == ObjectStatus::Created {
            obj.status = ObjectStatus::Live;
        }
        Ok(Diagnostics::new())
    }

    /// Refresh `observed`; a missing object becomes destroyed.
    #[instrument(skip(self, obj), fields(kind = self.resource.kind(), id = ?obj.id))]
    pub async fn read(&mut self, obj: &mut ManagedObject) -> ProviderResult<Diagnostics> {
        self.gate()?;
        self.start_from(obj);
        if obj.id.is_none() {
            obj.mark_destroyed();
            self.state = LifecycleState::Destroyed;
            return Ok(Diagnostics::new());
        }
        self.refresh(obj).await?;
        Ok(Diagnostics::new())
    }

    /// Apply declared changes, sub-operation by sub-operation.
    #[instrument(skip(self, obj), fields(kind = self.resource.kind(), id = ?obj.id))]
    pub async fn update(&mut self, obj: &mut ManagedObject) -> ProviderResult<Diagnostics> {
        self.gate()?;
        self.resource.validate(&obj.desired)?;
        obj.id()?;
        self.start_from(obj);
        let mut diagnostics = Diagnostics::new();

        if obj.observed.is_none() {
            self.refresh(obj).await?;
            if obj.is_destroyed() {
                diagnostics.info(vanished_message(self.resource.kind()));
                return Ok(diagnostics);
            }
        }

        let changes = obj.changes();
        if changes.is_empty() {
            debug!(kind = self.resource.kind(), "No changes to apply");
            return Ok(diagnostics);
        }

        let lifecycle = self.resource.lifecycle();
        let current = current_status(obj);
        if lifecycle.is_some()
            && current.as_ref().map(RemoteStatus::coarse) == Some(ObjectStatus::Deactivated)
            && changes.touches_other_than(&[STATUS_ATTRIBUTE])
        {
            return Err(ProviderError::RollbackForbidden {
                current_status: current
                    .map_or_else(|| "DEPROVISIONED".to_string(), |s| s.to_string()),
            });
        }

        self.enter(LifecycleState::Updating);
        let id = obj.id()?.to_string();

        if let Some(lifecycle) = lifecycle {
            if changes.contains(STATUS_ATTRIBUTE) {
                if let Some(target) = desired_status(obj) {
                    let from = current.unwrap_or(RemoteStatus::Active);
                    if let Err(err) = self.drive_status(lifecycle, obj, &from, &target).await {
                        return self.abort_update(obj, err, diagnostics);
                    }
                }
            }
        }

        let groups = self.resource.update_groups();
        for group in groups {
            if !group_touched(group, groups, &changes, lifecycle.is_some()) {
                continue;
            }
            debug!(kind = self.resource.kind(), id = %id, group = group.name, "Applying update group");
            if let Err(err) = self
                .resource
                .apply_group(&self.ctx, obj, group, &changes)
                .await
            {
                warn!(
                    kind = self.resource.kind(),
                    id = %id,
                    group = group.name,
                    error = %err,
                    "Update group failed; later groups skipped"
                );
                return self.abort_update(obj, err, diagnostics);
            }
        }

        obj.assume_applied(&changes);
        self.refresh(obj).await?;
        if obj.is_destroyed() {
            diagnostics.info(vanished_message(self.resource.kind()));
        } else {
            info!(kind = self.resource.kind(), id = %id, "Object updated");
        }
        Ok(diagnostics)
    }

    fn abort_update(
        &mut self,
        obj: &mut ManagedObject,
        err: ProviderError,
        mut diagnostics: Diagnostics,
    ) -> ProviderResult<Diagnostics> {
        if !err.is_not_found() {
            return Err(err);
        }
        let vanished = ProviderError::ObjectVanished {
            kind: self.resource.kind().to_string(),
            id: obj.id.clone().unwrap_or_default(),
        };
        info!(kind = self.resource.kind(), id = ?obj.id, "Object vanished during update");
        diagnostics.info(vanished.to_string());
        obj.mark_destroyed();
        self.enter(LifecycleState::Destroyed);
        Ok(diagnostics)
    }

    /// Destroy the remote object; lifecycled kinds are deactivated first.
    /// Deleting an object that is already gone succeeds.
    #[instrument(skip(self, obj), fields(kind = self.resource.kind(), id = ?obj.id))]
    pub async fn delete(&mut self, obj: &mut ManagedObject) -> ProviderResult<Diagnostics> {
        self.gate()?;
        self.start_from(obj);
        if obj.id.is_none() {
            obj.mark_destroyed();
            self.state = LifecycleState::Destroyed;
            return Ok(Diagnostics::new());
        }

        if let Some(lifecycle) = self.resource.lifecycle() {
            let already_deactivated = current_status(obj)
                .is_some_and(|s| s.coarse() == ObjectStatus::Deactivated);
            if !already_deactivated {
                self.enter(LifecycleState::Deactivating);
                match lifecycle.deactivate(&self.ctx, obj).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => return Ok(self.gone(obj)),
                    Err(err) => return Err(err),
                }
                self.wait_for_transition(lifecycle, obj).await?;
            }
        }

        self.enter(LifecycleState::Destroying);
        match self.resource.delete(&self.ctx, obj).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => return Ok(self.gone(obj)),
            Err(err) => return Err(err),
        }
        info!(kind = self.resource.kind(), id = ?obj.id, "Object destroyed");
        obj.mark_destroyed();
        self.enter(LifecycleState::Destroyed);
        Ok(Diagnostics::new())
    }

    fn gone(&mut self, obj: &mut ManagedObject) -> Diagnostics {
        debug!(kind = self.resource.kind(), id = ?obj.id, "Object already gone");
        obj.mark_destroyed();
        self.enter(LifecycleState::Destroyed);
        Diagnostics::new()
    }

    /// Parse an import id in the kind's form, seed the object and refresh it.
    #[instrument(skip(self), fields(kind = self.resource.kind()))]
    pub async fn import(&mut self, raw_id: &str) -> ProviderResult<ManagedObject> {
        self.gate()?;
        let import = ImportId::parse(raw_id, self.resource.import_form())?;
        let mut obj = self.resource.seed(&import);
        self.state = LifecycleState::Planned;
        self.refresh(&mut obj).await?;
        if obj.is_destroyed() {
            return Err(ProviderError::not_found(self.resource.kind(), raw_id));
        }
        self.enter(LifecycleState::Live);
        Ok(obj)
    }

    async fn refresh(&mut self, obj: &mut ManagedObject) -> ProviderResult<()> {
        self.enter(LifecycleState::Refreshing);
        match self.resource.read(&self.ctx, obj).await {
            Ok(Some(observation)) => {
                self.adopt(obj, observation);
                self.enter(LifecycleState::Live);
            }
            Ok(None) => {
                self.gone(obj);
            }
            Err(err) if err.is_not_found() => {
                self.gone(obj);
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    fn adopt(&self, obj: &mut ManagedObject, observation: Observation) {
        let status = match &observation.remote_status {
            Some(remote) => remote.coarse(),
            None if obj.status == ObjectStatus::Planned => ObjectStatus::Created,
            None if obj.is_destroyed() => ObjectStatus::Live,
            None => obj.status,
        };
        obj.meta.remote_status = observation.remote_status.as_ref().map(ToString::to_string);
        obj.adopt(observation.id, observation.attributes, status);
    }

    async fn drive_status(
        &mut self,
        lifecycle: &dyn Lifecycle,
        obj: &ManagedObject,
        from: &RemoteStatus,
        to: &RemoteStatus,
    ) -> ProviderResult<()> {
        if from == to {
            return Ok(());
        }
        info!(
            kind = self.resource.kind(),
            id = ?obj.id,
            from = %from,
            to = %to,
            "Driving status transition"
        );
        lifecycle.transition(&self.ctx, obj, from, to).await?;
        self.wait_for_transition(lifecycle, obj).await
    }

    /// Poll until the remote reports no transition in progress.
    async fn wait_for_transition(
        &self,
        lifecycle: &dyn Lifecycle,
        obj: &ManagedObject,
    ) -> ProviderResult<()> {
        let operation = format!(
            "status transition of {} {}",
            self.resource.kind(),
            obj.id.as_deref().unwrap_or("?")
        );
        let policy = PollPolicy::new(
            self.ctx.handle.timings().status_poll,
            self.ctx.call.remaining(),
        );
        let ctx = &self.ctx;
        policy
            .until(ctx.call, &operation, || async {
                match lifecycle.pending_transition(ctx, obj).await {
                    Ok(None) => Ok(Probe::Ready(())),
                    Ok(Some(target)) => {
                        Ok(Probe::Pending(format!("transitioningToStatus={target}")))
                    }
                    Err(err) => Err(err.into_api_error()),
                }
            })
            .await
            .op(&operation)
    }
}

/// Status the remote reports, from observed values or the side table.
fn current_status(obj: &ManagedObject) -> Option<RemoteStatus> {
    obj.observed_str(STATUS_ATTRIBUTE)
        .or(obj.meta.remote_status.as_deref())
        .map(RemoteStatus::parse)
}

fn desired_status(obj: &ManagedObject) -> Option<RemoteStatus> {
    obj.desired_str(STATUS_ATTRIBUTE).map(RemoteStatus::parse)
}

fn vanished_message(kind: &str) -> String {
    format!("{kind} was removed outside of the provider; it will be recreated on the next apply")
}

/// Whether `group` has work in `changes`.
fn group_touched(
    group: &UpdateGroup,
    all: &[UpdateGroup],
    changes: &ChangeSet,
    lifecycled: bool,
) -> bool {
    if !group.attributes.is_empty() {
        return changes.touches(group.attributes);
    }
    changes.iter().any(|key| {
        (!lifecycled || key != STATUS_ATTRIBUTE)
            && !all.iter().any(|other| other.attributes.contains(&key))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUPS: &[UpdateGroup] = &[
        UpdateGroup::rest("profile"),
        UpdateGroup::new("roles", &["admin_roles"]),
        UpdateGroup::new("groups", &["group_memberships"]),
    ];

    #[test]
    fn test_catch_all_group_skips_claimed_attributes() {
        let changes = ChangeSet::from_keys(["admin_roles"]);
        assert!(!group_touched(&GROUPS[0], GROUPS, &changes, true));
        assert!(group_touched(&GROUPS[1], GROUPS, &changes, true));
        assert!(!group_touched(&GROUPS[2], GROUPS, &changes, true));
    }

    #[test]
    fn test_status_is_not_a_profile_change_for_principals() {
        let changes = ChangeSet::from_keys(["status"]);
        assert!(!group_touched(&GROUPS[0], GROUPS, &changes, true));
        assert!(group_touched(&GROUPS[0], GROUPS, &changes, false));
    }

    #[test]
    fn test_current_status_prefers_observed() {
        let mut obj = ManagedObject::existing("user", "00u1", Attributes::new());
        obj.meta.remote_status = Some("ACTIVE".into());
        assert_eq!(current_status(&obj), Some(RemoteStatus::Active));

        let mut observed = Attributes::new();
        observed.insert("status".into(), "DEPROVISIONED".into());
        let obj = obj.with_observed(observed);
        assert_eq!(current_status(&obj), Some(RemoteStatus::Deprovisioned));
    }
}
