//! Set-diff reconciliation of owned scalar children.
//!
//! Permissions, group memberships, trusted servers and similar relationships
//! are mutated per member on the remote. The reconciler computes
//! `desired \ observed` and `observed \ desired` and applies them through a
//! [`MemberOps`] implementation in the order the kind requires.

use crate::error::{ProviderError, ProviderResult};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tenantform_client::CallContext;
use tracing::{debug, info, warn};

/// Members never written by the reconciler.
pub const EVERYONE_GROUP: &str = "Everyone";

/// Who owns the remote set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Only members this object declared (now or previously) are managed;
    /// anything else on the remote is left alone.
    Additive,
    /// The declared set is the whole remote set.
    Exclusive,
}

/// Which half of the diff goes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOrder {
    AddFirst,
    /// For remotes that reject a member duplicating an existing token.
    RemoveFirst,
}

/// Per-kind set reconciliation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetPolicy {
    pub ownership: Ownership,
    pub order: ApplyOrder,
    pub ignored: &'static [&'static str],
}

impl SetPolicy {
    pub const fn additive() -> Self {
        Self {
            ownership: Ownership::Additive,
            order: ApplyOrder::AddFirst,
            ignored: &[],
        }
    }

    pub const fn exclusive() -> Self {
        Self {
            ownership: Ownership::Exclusive,
            order: ApplyOrder::AddFirst,
            ignored: &[],
        }
    }

    #[must_use]
    pub const fn remove_first(mut self) -> Self {
        self.order = ApplyOrder::RemoveFirst;
        self
    }

    #[must_use]
    pub const fn ignoring(mut self, ignored: &'static [&'static str]) -> Self {
        self.ignored = ignored;
        self
    }

    fn is_ignored(&self, member: &str) -> bool {
        self.ignored.contains(&member)
    }

    /// The part of the remote set this object is responsible for.
    ///
    /// `previous` is the set recorded after the last successful reconcile.
    pub fn scope_observed(
        &self,
        remote: &BTreeSet<String>,
        previous: &BTreeSet<String>,
        desired: &BTreeSet<String>,
    ) -> BTreeSet<String> {
        remote
            .iter()
            .filter(|m| !self.is_ignored(m))
            .filter(|m| match self.ownership {
                Ownership::Exclusive => true,
                Ownership::Additive => previous.contains(*m) || desired.contains(*m),
            })
            .cloned()
            .collect()
    }
}

/// Add and remove lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetDiff {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl SetDiff {
    pub fn compute(
        desired: &BTreeSet<String>,
        observed: &BTreeSet<String>,
        policy: &SetPolicy,
    ) -> Self {
        let keep = |m: &&String| !policy.is_ignored(m);
        Self {
            to_add: desired.difference(observed).filter(keep).cloned().collect(),
            to_remove: observed.difference(desired).filter(keep).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }
}

/// Per-member remote operations for one relationship.
#[async_trait]
pub trait MemberOps: Send + Sync {
    /// Name used in logs and errors, e.g. `permission`.
    fn member_kind(&self) -> &str;

    /// Current remote members of `owner`.
    async fn list(&self, ctx: &CallContext, owner: &str) -> ProviderResult<BTreeSet<String>>;

    async fn add(&self, ctx: &CallContext, owner: &str, member: &str) -> ProviderResult<()>;

    async fn remove(&self, ctx: &CallContext, owner: &str, member: &str) -> ProviderResult<()>;
}

#[derive(Clone, Copy)]
enum Step {
    Add,
    Remove,
}

impl Step {
    fn label(self) -> &'static str {
        match self {
            Step::Add => "add",
            Step::Remove => "remove",
        }
    }
}

/// Apply `desired` against `observed` for `owner`.
///
/// Member operations are independent: every one is attempted, failures are
/// collected, and a single error or [`ProviderError::Multiple`] is returned.
/// Removing a member that is already gone counts as success.
pub async fn reconcile(
    ctx: &CallContext,
    ops: &dyn MemberOps,
    owner: &str,
    desired: &BTreeSet<String>,
    observed: &BTreeSet<String>,
    policy: &SetPolicy,
) -> ProviderResult<SetDiff> {
    let diff = SetDiff::compute(desired, observed, policy);
    if diff.is_empty() {
        debug!(owner = owner, member_kind = ops.member_kind(), "Set already converged");
        return Ok(diff);
    }

    let steps = match policy.order {
        ApplyOrder::AddFirst => [Step::Add, Step::Remove],
        ApplyOrder::RemoveFirst => [Step::Remove, Step::Add],
    };

    let mut errors = Vec::new();
    for step in steps {
        let members = match step {
            Step::Add => &diff.to_add,
            Step::Remove => &diff.to_remove,
        };
        for member in members {
            if let Err(err) = ctx.ensure_active() {
                errors.push(ProviderError::api(format!("{} of {owner}", ops.member_kind()), err));
                return Err(aggregate(errors));
            }
            let result = match step {
                Step::Add => ops.add(ctx, owner, member).await,
                Step::Remove => match ops.remove(ctx, owner, member).await {
                    Err(err) if err.is_not_found() => {
                        debug!(owner = owner, member = %member, "Member already removed");
                        Ok(())
                    }
                    other => other,
                },
            };
            match result {
                Ok(()) => debug!(
                    owner = owner,
                    member_kind = ops.member_kind(),
                    member = %member,
                    action = step.label(),
                    "Member operation applied"
                ),
                Err(err) => {
                    warn!(
                        owner = owner,
                        member_kind = ops.member_kind(),
                        member = %member,
                        error = %err,
                        "Member operation failed"
                    );
                    errors.push(err);
                }
            }
        }
    }

    if errors.is_empty() {
        info!(
            owner = owner,
            member_kind = ops.member_kind(),
            added = diff.to_add.len(),
            removed = diff.to_remove.len(),
            "Set reconciled"
        );
        Ok(diff)
    } else {
        Err(aggregate(errors))
    }
}

fn aggregate(mut errors: Vec<ProviderError>) -> ProviderError {
    if errors.len() == 1 {
        errors.remove(0)
    } else {
        ProviderError::Multiple(errors)
    }
}

/// Build a member set from string values.
pub fn member_set<I, S>(members: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    members.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        remote: Mutex<BTreeSet<String>>,
        calls: Mutex<Vec<String>>,
        fail_add: Option<&'static str>,
    }

    #[async_trait]
    impl MemberOps for Recorder {
        fn member_kind(&self) -> &str {
            "permission"
        }

        async fn list(&self, _ctx: &CallContext, _owner: &str) -> ProviderResult<BTreeSet<String>> {
            Ok(self.remote.lock().unwrap().clone())
        }

        async fn add(&self, _ctx: &CallContext, _owner: &str, member: &str) -> ProviderResult<()> {
            self.calls.lock().unwrap().push(format!("+{member}"));
            if self.fail_add == Some(member) {
                return Err(ProviderError::validation(member, "rejected"));
            }
            self.remote.lock().unwrap().insert(member.to_string());
            Ok(())
        }

        async fn remove(&self, _ctx: &CallContext, _owner: &str, member: &str) -> ProviderResult<()> {
            self.calls.lock().unwrap().push(format!("-{member}"));
            if !self.remote.lock().unwrap().remove(member) {
                return Err(ProviderError::not_found("permission", member));
            }
            Ok(())
        }
    }

    fn ctx() -> CallContext {
        CallContext::new(Duration::from_secs(60))
    }

    #[test]
    fn test_diff_is_set_subtraction() {
        let diff = SetDiff::compute(
            &member_set(["B", "C", "D", "E"]),
            &member_set(["A", "B", "C"]),
            &SetPolicy::additive(),
        );
        assert_eq!(diff.to_add, member_set(["D", "E"]));
        assert_eq!(diff.to_remove, member_set(["A"]));
    }

    #[test]
    fn test_everyone_is_never_diffed() {
        let policy = SetPolicy::exclusive().ignoring(&[EVERYONE_GROUP]);
        let diff = SetDiff::compute(
            &member_set(["Everyone", "eng"]),
            &member_set(["Everyone", "ops"]),
            &policy,
        );
        assert_eq!(diff.to_add, member_set(["eng"]));
        assert_eq!(diff.to_remove, member_set(["ops"]));
    }

    #[test]
    fn test_additive_scope_leaves_foreign_members() {
        let remote = member_set(["mine-old", "theirs", "keep"]);
        let previous = member_set(["mine-old", "keep"]);
        let desired = member_set(["keep", "new"]);

        let additive = SetPolicy::additive().scope_observed(&remote, &previous, &desired);
        assert_eq!(additive, member_set(["mine-old", "keep"]));

        let exclusive = SetPolicy::exclusive().scope_observed(&remote, &previous, &desired);
        assert_eq!(exclusive, remote);
    }

    #[tokio::test]
    async fn test_reconcile_reaches_declared_set() {
        let ops = Recorder::default();
        *ops.remote.lock().unwrap() = member_set(["A", "B", "C"]);
        let observed = ops.list(&ctx(), "cr0").await.unwrap();

        let diff = reconcile(
            &ctx(),
            &ops,
            "cr0",
            &member_set(["B", "C", "D", "E"]),
            &observed,
            &SetPolicy::additive(),
        )
        .await
        .unwrap();

        assert_eq!(diff.len(), 3);
        assert_eq!(*ops.remote.lock().unwrap(), member_set(["B", "C", "D", "E"]));
        assert_eq!(*ops.calls.lock().unwrap(), vec!["+D", "+E", "-A"]);
    }

    #[tokio::test]
    async fn test_remove_first_order() {
        let ops = Recorder::default();
        *ops.remote.lock().unwrap() = member_set(["old"]);
        reconcile(
            &ctx(),
            &ops,
            "aus1",
            &member_set(["new"]),
            &member_set(["old"]),
            &SetPolicy::exclusive().remove_first(),
        )
        .await
        .unwrap();
        assert_eq!(*ops.calls.lock().unwrap(), vec!["-old", "+new"]);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_other_members() {
        let ops = Recorder {
            fail_add: Some("D"),
            ..Recorder::default()
        };
        *ops.remote.lock().unwrap() = member_set(["A"]);

        let err = reconcile(
            &ctx(),
            &ops,
            "cr0",
            &member_set(["D", "E"]),
            &member_set(["A"]),
            &SetPolicy::additive(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ProviderError::Validation { .. }));
        assert_eq!(*ops.remote.lock().unwrap(), member_set(["E"]));
    }

    #[tokio::test]
    async fn test_already_removed_member_is_success() {
        let ops = Recorder::default();
        let diff = reconcile(
            &ctx(),
            &ops,
            "cr0",
            &BTreeSet::new(),
            &member_set(["ghost"]),
            &SetPolicy::additive(),
        )
        .await
        .unwrap();
        assert_eq!(diff.to_remove, member_set(["ghost"]));
    }

    #[tokio::test]
    async fn test_cancelled_context_issues_nothing() {
        let ops = Recorder::default();
        let ctx = ctx();
        ctx.cancel();
        let err = reconcile(
            &ctx,
            &ops,
            "cr0",
            &member_set(["A"]),
            &BTreeSet::new(),
            &SetPolicy::additive(),
        )
        .await
        .unwrap_err();
        assert!(err.is_cancelled());
        assert!(ops.calls.lock().unwrap().is_empty());
    }
}
