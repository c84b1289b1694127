//! The reconciler: drives the live directory toward the presence each
//! identity's rules call for.
//!
//! A pass loads the store, lists the directory once, then walks every ruled
//! identity in uid order. Each identity's mutation completes (and is durable)
//! before the next one starts. A failure on one identity is recorded in the
//! report and the pass moves on.
//!
//! Ordering of the two writes per mutation:
//!
//! - disable: persist the rule-driven snapshot, then remove the identity. A
//!   failed removal puts the store back as it was.
//! - restore: upsert the record, then delete the snapshot.
//!
//! An interruption between the steps can therefore only leave an identity
//! that is present and still has a rule-driven snapshot. The directory is
//! authoritative: the next pass discards that snapshot if the identity should
//! be present, or re-captures it if it should not.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::{
  directory::{Directory, DirectoryRecord},
  error::{Error, PortError, Result},
  evaluate::{EvaluationContext, Presence, explain},
  schedule::{Axis, Uid},
  snapshot::{DisabledSnapshot, SnapshotTag},
  store::{InvariantViolation, RestrictionStore},
};

// ─── Report ──────────────────────────────────────────────────────────────────

/// Why a mutation did not happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Failure {
  Port { error: PortError },
  Store { message: String },
}

impl fmt::Display for Failure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Port { error } => error.fmt(f),
      Self::Store { message } => write!(f, "store error: {message}"),
    }
  }
}

impl From<PortError> for Failure {
  fn from(error: PortError) -> Self { Self::Port { error } }
}

/// What a pass did to one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
  NoOp,
  Disabled,
  Restored,
  FailedDisable { cause: Failure },
  FailedRestore { cause: Failure },
}

impl Outcome {
  pub fn is_failure(&self) -> bool {
    matches!(self, Self::FailedDisable { .. } | Self::FailedRestore { .. })
  }
}

impl fmt::Display for Outcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::NoOp => f.write_str("no-op"),
      Self::Disabled => f.write_str("disabled"),
      Self::Restored => f.write_str("restored"),
      Self::FailedDisable { cause } => write!(f, "failed to disable: {cause}"),
      Self::FailedRestore { cause } => write!(f, "failed to restore: {cause}"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
  pub uid:        Uid,
  /// Name from the live record or the snapshot; empty when neither exists.
  pub name:       String,
  pub desired:    Presence,
  pub blocked_by: Vec<Axis>,
  #[serde(flatten)]
  pub outcome:    Outcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
  pub no_op:          usize,
  pub disabled:       usize,
  pub restored:       usize,
  pub failed_disable: usize,
  pub failed_restore: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
  pub context:    EvaluationContext,
  pub entries:    Vec<ReportEntry>,
  /// Violations found on load. Identities whose rules are tainted by one
  /// are left untouched and have no entry.
  pub violations: Vec<InvariantViolation>,
}

impl ReconciliationReport {
  pub fn counts(&self) -> OutcomeCounts {
    let mut counts = OutcomeCounts::default();
    for entry in &self.entries {
      match entry.outcome {
        Outcome::NoOp => counts.no_op += 1,
        Outcome::Disabled => counts.disabled += 1,
        Outcome::Restored => counts.restored += 1,
        Outcome::FailedDisable { .. } => counts.failed_disable += 1,
        Outcome::FailedRestore { .. } => counts.failed_restore += 1,
      }
    }
    counts
  }

  /// Whether the pass changed nothing.
  pub fn is_quiescent(&self) -> bool {
    self.entries.iter().all(|e| e.outcome == Outcome::NoOp)
  }

  pub fn entry(&self, uid: Uid) -> Option<&ReportEntry> {
    self.entries.iter().find(|e| e.uid == uid)
  }
}

// ─── Pass ────────────────────────────────────────────────────────────────────

/// Run one reconciliation pass at `ctx`.
///
/// Fails only when the pass's inputs cannot be obtained (store unreadable,
/// directory listing unavailable); nothing has been mutated then.
pub async fn reconcile<S, D>(
  store: &S,
  directory: &D,
  ctx: EvaluationContext,
) -> Result<ReconciliationReport>
where
  S: RestrictionStore,
  D: Directory,
{
  let image = store.load().await.map_err(Error::store)?;
  let live: BTreeMap<Uid, DirectoryRecord> = directory
    .list_identities()
    .await?
    .into_iter()
    .map(|record| (record.uid, record))
    .collect();

  for violation in &image.violations {
    tracing::warn!(uid = %violation.uid(), %violation, "store invariant violated");
  }

  let mut entries = Vec::with_capacity(image.rules.len());
  for (uid, rules) in &image.rules {
    if image.violations.iter().any(|v| v.uid() == *uid && v.taints_rules()) {
      tracing::warn!(uid = %uid, "skipping identity with untrustworthy rules");
      continue;
    }

    let evaluation = explain(rules, &ctx);
    let record = live.get(uid);
    let snapshot = image.snapshots.get(uid);

    let outcome = match (evaluation.presence, record) {
      (Presence::Absent, Some(record)) => {
        disable_one(store, directory, record.clone(), snapshot.cloned()).await
      }
      (Presence::Present, None) => match snapshot {
        Some(snapshot) if snapshot.is_rule_driven() => {
          restore_one(store, directory, snapshot).await
        }
        _ => Outcome::NoOp,
      },
      (Presence::Present, Some(_)) => {
        if snapshot.is_some_and(DisabledSnapshot::is_rule_driven) {
          discard_stale(store, *uid).await;
        }
        Outcome::NoOp
      }
      (Presence::Absent, None) => Outcome::NoOp,
    };

    let name = record
      .map(|r| r.name.clone())
      .or_else(|| snapshot.map(|s| s.record.name.clone()))
      .unwrap_or_default();

    entries.push(ReportEntry {
      uid: *uid,
      name,
      desired: evaluation.presence,
      blocked_by: evaluation.blocked_by,
      outcome,
    });
  }

  let report = ReconciliationReport { context: ctx, entries, violations: image.violations };
  let counts = report.counts();
  tracing::info!(
    disabled = counts.disabled,
    restored = counts.restored,
    failed = counts.failed_disable + counts.failed_restore,
    unchanged = counts.no_op,
    "reconciliation pass complete"
  );
  Ok(report)
}

async fn disable_one<S, D>(
  store: &S,
  directory: &D,
  record: DirectoryRecord,
  previous: Option<DisabledSnapshot>,
) -> Outcome
where
  S: RestrictionStore,
  D: Directory,
{
  let uid = record.uid;
  let snapshot = DisabledSnapshot::capture(record, SnapshotTag::RuleDriven);

  if let Err(e) = store.save_snapshot(snapshot).await {
    tracing::error!(uid = %uid, error = %e, "could not persist snapshot; identity left present");
    return Outcome::FailedDisable { cause: Failure::Store { message: e.to_string() } };
  }

  match directory.remove_identity(uid).await {
    Ok(()) => {
      tracing::info!(uid = %uid, "identity disabled");
      Outcome::Disabled
    }
    // Gone already; the snapshot taken from the listing is still accurate.
    Err(PortError::NotFound(_)) => {
      tracing::warn!(uid = %uid, "identity vanished before removal");
      Outcome::Disabled
    }
    Err(error) => {
      tracing::warn!(uid = %uid, %error, "removal failed; rolling back snapshot");
      // Only a manual snapshot outlives the rollback. A rule-driven one is
      // stale: the listing just showed the identity present.
      let rollback = match previous.filter(|p| !p.is_rule_driven()) {
        Some(previous) => store.save_snapshot(previous).await.map(drop),
        None => store.delete_snapshot(uid).await.map(drop),
      };
      if let Err(e) = rollback {
        tracing::error!(uid = %uid, error = %e, "snapshot rollback failed");
      }
      Outcome::FailedDisable { cause: error.into() }
    }
  }
}

async fn restore_one<S, D>(store: &S, directory: &D, snapshot: &DisabledSnapshot) -> Outcome
where
  S: RestrictionStore,
  D: Directory,
{
  let uid = snapshot.uid();
  if let Err(error) = directory.upsert_identity(snapshot.restoration()).await {
    tracing::warn!(uid = %uid, %error, "restore failed; snapshot kept");
    return Outcome::FailedRestore { cause: error.into() };
  }
  if let Err(e) = store.delete_snapshot(uid).await {
    // Present with a stale snapshot; the next pass discards it.
    tracing::error!(uid = %uid, error = %e, "could not delete snapshot after restore");
  }
  tracing::info!(uid = %uid, "identity restored");
  Outcome::Restored
}

async fn discard_stale<S: RestrictionStore>(store: &S, uid: Uid) {
  match store.delete_snapshot(uid).await {
    Ok(_) => tracing::info!(uid = %uid, "discarded stale rule-driven snapshot"),
    Err(e) => tracing::error!(uid = %uid, error = %e, "could not discard stale snapshot"),
  }
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDateTime;

  use super::*;
  use crate::{
    directory::Privilege,
    memory::{MemoryDirectory, MemoryStore},
    schedule::{RuleMode, ScheduleRule},
  };

  fn at(s: &str) -> EvaluationContext {
    EvaluationContext::at(NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap())
  }

  const WEDNESDAY: &str = "2026-01-07 10:00";
  const SATURDAY: &str = "2026-01-10 10:00";

  fn alice() -> DirectoryRecord {
    DirectoryRecord {
      uid:       Uid(1),
      name:      "Alice".into(),
      privilege: Privilege::ADMIN,
      password:  "1234".into(),
      group_id:  Some(0),
      user_id:   "A-001".into(),
      card:      4_200_117,
    }
  }

  fn bob() -> DirectoryRecord {
    let mut bob = DirectoryRecord::new(Uid(2), "Bob");
    bob.group_id = None;
    bob
  }

  async fn weekend_denied(store: &MemoryStore, uid: Uid) {
    store
      .put_rule(uid, ScheduleRule::parse(Axis::Weekday, RuleMode::Deny, &["6,7"]).unwrap())
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn scenario_a_removes_on_saturday_only() {
    let store = MemoryStore::default();
    let dir = MemoryDirectory::with_records([alice()]);
    weekend_denied(&store, Uid(1)).await;

    let wed = reconcile(&store, &dir, at(WEDNESDAY)).await.unwrap();
    assert_eq!(wed.entry(Uid(1)).unwrap().outcome, Outcome::NoOp);
    assert!(dir.contains(Uid(1)));

    let sat = reconcile(&store, &dir, at(SATURDAY)).await.unwrap();
    let entry = sat.entry(Uid(1)).unwrap();
    assert_eq!(entry.outcome, Outcome::Disabled);
    assert_eq!(entry.desired, Presence::Absent);
    assert_eq!(entry.blocked_by, vec![Axis::Weekday]);
    assert!(!dir.contains(Uid(1)));

    let snapshot = store.snapshot(Uid(1)).await.unwrap().unwrap();
    assert_eq!(snapshot.tag, SnapshotTag::RuleDriven);
    assert_eq!(snapshot.record, alice());
  }

  #[tokio::test]
  async fn second_pass_is_quiescent() {
    let store = MemoryStore::default();
    let dir = MemoryDirectory::with_records([alice(), bob()]);
    weekend_denied(&store, Uid(1)).await;
    weekend_denied(&store, Uid(2)).await;

    let first = reconcile(&store, &dir, at(SATURDAY)).await.unwrap();
    assert_eq!(first.counts().disabled, 2);

    let second = reconcile(&store, &dir, at(SATURDAY)).await.unwrap();
    assert!(second.is_quiescent());
    assert_eq!(second.counts().no_op, 2);
  }

  #[tokio::test]
  async fn disable_then_restore_round_trips_every_field() {
    let store = MemoryStore::default();
    let dir = MemoryDirectory::with_records([alice(), bob()]);
    weekend_denied(&store, Uid(1)).await;
    weekend_denied(&store, Uid(2)).await;

    reconcile(&store, &dir, at(SATURDAY)).await.unwrap();
    let monday = reconcile(&store, &dir, at("2026-01-12 08:00")).await.unwrap();

    assert_eq!(monday.counts().restored, 2);
    assert_eq!(dir.get(Uid(1)), Some(alice()));
    assert_eq!(dir.get(Uid(2)), Some(bob()));
    assert!(store.snapshots().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn failed_removal_leaves_identity_present_and_retries() {
    // Scenario D.
    let store = MemoryStore::default();
    let dir = MemoryDirectory::with_records([alice(), bob()]);
    weekend_denied(&store, Uid(1)).await;
    weekend_denied(&store, Uid(2)).await;
    dir.fail_removals_for(Uid(1));

    let first = reconcile(&store, &dir, at(SATURDAY)).await.unwrap();
    assert!(matches!(
      first.entry(Uid(1)).unwrap().outcome,
      Outcome::FailedDisable { cause: Failure::Port { .. } }
    ));
    // The failure did not stop the pass.
    assert_eq!(first.entry(Uid(2)).unwrap().outcome, Outcome::Disabled);
    assert!(dir.contains(Uid(1)));
    assert!(store.snapshot(Uid(1)).await.unwrap().is_none());

    dir.clear_faults();
    let second = reconcile(&store, &dir, at(SATURDAY)).await.unwrap();
    assert_eq!(second.entry(Uid(1)).unwrap().outcome, Outcome::Disabled);
    assert!(!dir.contains(Uid(1)));
  }

  #[tokio::test]
  async fn failed_removal_restores_the_replaced_snapshot() {
    let store = MemoryStore::default();
    let dir = MemoryDirectory::with_records([alice()]);
    weekend_denied(&store, Uid(1)).await;
    let earlier = DisabledSnapshot::capture(alice(), SnapshotTag::Manual);
    store.save_snapshot(earlier.clone()).await.unwrap();
    dir.fail_removals_for(Uid(1));

    reconcile(&store, &dir, at(SATURDAY)).await.unwrap();
    assert_eq!(store.snapshot(Uid(1)).await.unwrap(), Some(earlier));
  }

  #[tokio::test]
  async fn failed_removal_drops_a_stale_rule_driven_snapshot() {
    let store = MemoryStore::default();
    let dir = MemoryDirectory::with_records([alice()]);
    weekend_denied(&store, Uid(1)).await;
    let stale = DisabledSnapshot::capture(alice(), SnapshotTag::RuleDriven);
    store.save_snapshot(stale).await.unwrap();
    dir.fail_removals_for(Uid(1));

    let report = reconcile(&store, &dir, at(SATURDAY)).await.unwrap();
    assert!(matches!(
      report.entry(Uid(1)).unwrap().outcome,
      Outcome::FailedDisable { cause: Failure::Port { error: PortError::Unavailable(_) } }
    ));
    assert!(dir.contains(Uid(1)));
    assert_eq!(store.snapshot(Uid(1)).await.unwrap(), None);
  }

  #[tokio::test]
  async fn failed_restore_keeps_snapshot() {
    let store = MemoryStore::default();
    let dir = MemoryDirectory::with_records([alice()]);
    weekend_denied(&store, Uid(1)).await;
    reconcile(&store, &dir, at(SATURDAY)).await.unwrap();

    dir.fail_upserts_for(Uid(1));
    let report = reconcile(&store, &dir, at(WEDNESDAY)).await.unwrap();
    assert!(matches!(
      report.entry(Uid(1)).unwrap().outcome,
      Outcome::FailedRestore { .. }
    ));
    assert!(!dir.contains(Uid(1)));
    assert!(store.snapshot(Uid(1)).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn never_fabricates_a_record() {
    let store = MemoryStore::default();
    let dir = MemoryDirectory::default();
    weekend_denied(&store, Uid(9)).await;

    let report = reconcile(&store, &dir, at(WEDNESDAY)).await.unwrap();
    assert_eq!(report.entry(Uid(9)).unwrap().outcome, Outcome::NoOp);
    assert!(!dir.contains(Uid(9)));
  }

  #[tokio::test]
  async fn manual_snapshots_are_not_restored() {
    let store = MemoryStore::default();
    let dir = MemoryDirectory::default();
    weekend_denied(&store, Uid(1)).await;
    store
      .save_snapshot(DisabledSnapshot::capture(alice(), SnapshotTag::Manual))
      .await
      .unwrap();

    let report = reconcile(&store, &dir, at(WEDNESDAY)).await.unwrap();
    assert_eq!(report.entry(Uid(1)).unwrap().outcome, Outcome::NoOp);
    assert!(!dir.contains(Uid(1)));
  }

  #[tokio::test]
  async fn stale_snapshot_of_present_identity_is_discarded() {
    let store = MemoryStore::default();
    let dir = MemoryDirectory::with_records([alice()]);
    weekend_denied(&store, Uid(1)).await;
    store
      .save_snapshot(DisabledSnapshot::capture(alice(), SnapshotTag::RuleDriven))
      .await
      .unwrap();

    let report = reconcile(&store, &dir, at(WEDNESDAY)).await.unwrap();
    assert!(report.is_quiescent());
    assert!(store.snapshot(Uid(1)).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn unruled_identities_are_ignored() {
    let store = MemoryStore::default();
    let dir = MemoryDirectory::with_records([alice(), bob()]);
    weekend_denied(&store, Uid(1)).await;

    let report = reconcile(&store, &dir, at(SATURDAY)).await.unwrap();
    assert_eq!(report.entries.len(), 1);
    assert!(dir.contains(Uid(2)));
  }

  #[tokio::test]
  async fn unavailable_inputs_mean_no_pass() {
    let store = MemoryStore::default();
    let dir = MemoryDirectory::with_records([alice()]);
    weekend_denied(&store, Uid(1)).await;

    dir.set_offline(true);
    let err = reconcile(&store, &dir, at(SATURDAY)).await.unwrap_err();
    assert!(matches!(err, Error::Port(PortError::Unavailable(_))));

    dir.set_offline(false);
    store.set_unavailable(true);
    let err = reconcile(&store, &dir, at(SATURDAY)).await.unwrap_err();
    assert!(matches!(err, Error::Store(_)));
    assert!(dir.contains(Uid(1)));
  }

  #[test]
  fn entry_json_is_flat() {
    let entry = ReportEntry {
      uid:        Uid(3),
      name:       "C".into(),
      desired:    Presence::Absent,
      blocked_by: vec![Axis::TimeOfDay],
      outcome:    Outcome::FailedDisable {
        cause: PortError::Unavailable("timeout".into()).into(),
      },
    };
    let json = serde_json::to_value(&entry).unwrap();
    assert_eq!(json["outcome"], "failed_disable");
    assert_eq!(json["cause"]["source"], "port");
    assert_eq!(json["cause"]["error"]["kind"], "unavailable");
    assert_eq!(json["blocked_by"][0], "time_of_day");
  }
}
