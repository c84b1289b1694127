//! Operator-driven changes: manual disable/enable and rule edits.
//!
//! These run outside a reconciliation pass. Callers that also run passes
//! must serialise the two themselves.

use serde::{Deserialize, Serialize};

use crate::{
  directory::Directory,
  error::{Error, Result},
  evaluate::{EvaluationContext, Presence, explain},
  schedule::{Axis, ScheduleRule, Uid},
  snapshot::{DisabledSnapshot, SnapshotTag},
  store::RestrictionStore,
};

// ─── Manual disable / enable ─────────────────────────────────────────────────

/// Remove an identity from the terminal, keeping a manual snapshot.
///
/// The reconciler never restores manual snapshots; only [`enable`] does.
pub async fn disable<S, D>(store: &S, directory: &D, uid: Uid) -> Result<DisabledSnapshot>
where
  S: RestrictionStore,
  D: Directory,
{
  let record = directory
    .list_identities()
    .await?
    .into_iter()
    .find(|r| r.uid == uid)
    .ok_or(Error::NotPresent(uid))?;

  let snapshot = DisabledSnapshot::capture(record, SnapshotTag::Manual);
  let previous = store.save_snapshot(snapshot.clone()).await.map_err(Error::store)?;

  if let Err(err) = directory.remove_identity(uid).await {
    let rollback = match previous {
      Some(previous) => store.save_snapshot(previous).await.map(drop),
      None => store.delete_snapshot(uid).await.map(drop),
    };
    rollback.map_err(Error::store)?;
    return Err(err.into());
  }

  tracing::info!(uid = %uid, "identity disabled manually");
  Ok(snapshot)
}

/// Outcome of [`enable`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enabled {
  pub snapshot:      DisabledSnapshot,
  pub cleared_rules: Vec<ScheduleRule>,
  /// Axes that will remove the identity again on the next pass at the
  /// evaluated instant. Always empty when rules were cleared.
  pub still_blocked: Vec<Axis>,
}

/// Put an identity back from its snapshot, whatever its tag.
///
/// With `clear_rules`, the identity's rules are dropped in the same store
/// transaction that deletes the snapshot.
pub async fn enable<S, D>(
  store: &S,
  directory: &D,
  uid: Uid,
  clear_rules: bool,
  ctx: EvaluationContext,
) -> Result<Enabled>
where
  S: RestrictionStore,
  D: Directory,
{
  let snapshot = store
    .snapshot(uid)
    .await
    .map_err(Error::store)?
    .ok_or(Error::NoSnapshot(uid))?;

  directory.upsert_identity(snapshot.restoration()).await?;

  let cleared_rules = if clear_rules {
    store.release(uid, None).await.map_err(Error::store)?
  } else {
    store.delete_snapshot(uid).await.map_err(Error::store)?;
    Vec::new()
  };

  let rules = store.rule_set(uid).await.map_err(Error::store)?;
  let evaluation = explain(&rules, &ctx);
  if evaluation.presence == Presence::Absent {
    tracing::warn!(
      uid = %uid,
      blocked_by = ?evaluation.blocked_by,
      "identity enabled but its rules will disable it again"
    );
  }
  tracing::info!(uid = %uid, cleared = cleared_rules.len(), "identity enabled");

  Ok(Enabled { snapshot, cleared_rules, still_blocked: evaluation.blocked_by })
}

// ─── Rule edits ──────────────────────────────────────────────────────────────

/// Replace the rule on `rule`'s axis. Returns the displaced rule.
pub async fn set_rule<S: RestrictionStore>(
  store: &S,
  uid: Uid,
  rule: ScheduleRule,
) -> Result<Option<ScheduleRule>> {
  tracing::debug!(uid = %uid, %rule, "writing rule");
  store.put_rule(uid, rule).await.map_err(Error::store)
}

/// Add `rule`'s values to an existing rule of the same kind on that axis.
/// A rule of the other kind is replaced, as with [`set_rule`].
pub async fn extend_rule<S: RestrictionStore>(
  store: &S,
  uid: Uid,
  rule: ScheduleRule,
) -> Result<ScheduleRule> {
  let existing = store.rule_set(uid).await.map_err(Error::store)?.get(rule.axis());
  let merged = match existing {
    Some(existing) => existing.merge(rule),
    None => rule,
  };
  store.put_rule(uid, merged.clone()).await.map_err(Error::store)?;
  Ok(merged)
}

/// Outcome of [`clear_rule`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cleared {
  pub removed:  Vec<ScheduleRule>,
  /// Whether the identity was put back from a rule-driven snapshot first.
  pub restored: bool,
}

/// Clear the rule on `axis`, or every rule when `axis` is `None`.
///
/// If that leaves a rule-driven snapshot with no rules, no pass would ever
/// restore it: the identity is restored here first, then the rules and the
/// snapshot are dropped together.
pub async fn clear_rule<S, D>(
  store: &S,
  directory: &D,
  uid: Uid,
  axis: Option<Axis>,
) -> Result<Cleared>
where
  S: RestrictionStore,
  D: Directory,
{
  let mut remaining = store.rule_set(uid).await.map_err(Error::store)?;
  match axis {
    Some(axis) => {
      remaining.clear(axis);
    }
    None => remaining = Default::default(),
  }

  let snapshot = store.snapshot(uid).await.map_err(Error::store)?;
  let releasing = remaining.is_empty()
    && snapshot.as_ref().is_some_and(DisabledSnapshot::is_rule_driven);

  if !releasing {
    let removed = match axis {
      Some(axis) => {
        let removed = store.clear_rule(uid, axis).await.map_err(Error::store)?;
        removed.into_iter().collect()
      }
      None => store.clear_rules(uid).await.map_err(Error::store)?,
    };
    return Ok(Cleared { removed, restored: false });
  }

  // A present identity's snapshot is stale; the live record wins.
  let live = directory.list_identities().await?.iter().any(|r| r.uid == uid);
  let restored = match snapshot {
    Some(snapshot) if !live => {
      directory.upsert_identity(snapshot.restoration()).await?;
      true
    }
    _ => false,
  };
  let removed = store.release(uid, axis).await.map_err(Error::store)?;
  tracing::info!(uid = %uid, restored, "last rule cleared; snapshot released");
  Ok(Cleared { removed, restored })
}
