//! The `RestrictionStore` trait and the loaded image of a store.
//!
//! The trait is implemented by storage backends (e.g. `roster-store-sqlite`).
//! The reconciler and the lifecycle operations depend on this abstraction,
//! not on any concrete backend.

use std::{collections::BTreeMap, fmt, future::Future};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
  attendance::Punch,
  schedule::{Axis, RuleSet, ScheduleRule, Uid},
  snapshot::DisabledSnapshot,
};

// ─── Invariant violations ────────────────────────────────────────────────────

/// A state a well-behaved writer can never produce. Reported, never repaired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum InvariantViolation {
  /// Both a deny-set and an allow-set exist on one axis.
  ConflictingRules { uid: Uid, axis: Axis },
  /// A rule-driven snapshot for an identity that holds no rules; no pass
  /// will ever restore it.
  OrphanedSnapshot { uid: Uid },
  /// A stored value that does not decode.
  MalformedValue {
    uid:    Uid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    axis:   Option<Axis>,
    reason: String,
  },
}

impl InvariantViolation {
  pub fn uid(&self) -> Uid {
    match self {
      Self::ConflictingRules { uid, .. }
      | Self::OrphanedSnapshot { uid }
      | Self::MalformedValue { uid, .. } => *uid,
    }
  }

  /// Whether the identity's rule set cannot be trusted for evaluation.
  pub fn taints_rules(&self) -> bool {
    matches!(self, Self::ConflictingRules { .. } | Self::MalformedValue { .. })
  }
}

impl fmt::Display for InvariantViolation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::ConflictingRules { uid, axis } => {
        write!(f, "identity {uid}: both deny and allow rules on the {axis} axis")
      }
      Self::OrphanedSnapshot { uid } => {
        write!(f, "identity {uid}: rule-driven snapshot but no rules")
      }
      Self::MalformedValue { uid, axis: Some(axis), reason } => {
        write!(f, "identity {uid}: malformed {axis} rule: {reason}")
      }
      Self::MalformedValue { uid, axis: None, reason } => {
        write!(f, "identity {uid}: malformed record: {reason}")
      }
    }
  }
}

// ─── Image ───────────────────────────────────────────────────────────────────

/// The whole persisted restriction state at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreImage {
  /// Identities with at least one rule.
  pub rules:      BTreeMap<Uid, RuleSet>,
  pub snapshots:  BTreeMap<Uid, DisabledSnapshot>,
  #[serde(default)]
  pub violations: Vec<InvariantViolation>,
}

impl StoreImage {
  /// Build an image and add the violations visible only across tables.
  ///
  /// `violations` carries whatever the backend found while decoding.
  pub fn assemble(
    rules: BTreeMap<Uid, RuleSet>,
    snapshots: BTreeMap<Uid, DisabledSnapshot>,
    mut violations: Vec<InvariantViolation>,
  ) -> Self {
    let rules: BTreeMap<Uid, RuleSet> =
      rules.into_iter().filter(|(_, set)| !set.is_empty()).collect();

    for (uid, snapshot) in &snapshots {
      // An identity whose only rules failed to decode is already reported.
      let tainted = violations.iter().any(|v| v.uid() == *uid && v.taints_rules());
      if snapshot.is_rule_driven() && !rules.contains_key(uid) && !tainted {
        let orphan = InvariantViolation::OrphanedSnapshot { uid: *uid };
        if !violations.contains(&orphan) {
          violations.push(orphan);
        }
      }
    }
    violations.sort_by_key(InvariantViolation::uid);

    Self { rules, snapshots, violations }
  }

  pub fn is_consistent(&self) -> bool { self.violations.is_empty() }

  pub fn rule_set(&self, uid: Uid) -> RuleSet {
    self.rules.get(&uid).cloned().unwrap_or_default()
  }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a restriction store backend.
///
/// Every mutation is all-or-nothing. A single writer is assumed; callers
/// serialise passes themselves.
pub trait RestrictionStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Load every rule set and snapshot, together with the invariant
  /// violations found on the way.
  fn load(&self) -> impl Future<Output = Result<StoreImage, Self::Error>> + Send + '_;

  /// The rules one identity holds; empty if it holds none.
  fn rule_set(
    &self,
    uid: Uid,
  ) -> impl Future<Output = Result<RuleSet, Self::Error>> + Send + '_;

  fn snapshot(
    &self,
    uid: Uid,
  ) -> impl Future<Output = Result<Option<DisabledSnapshot>, Self::Error>> + Send + '_;

  fn snapshots(
    &self,
  ) -> impl Future<Output = Result<Vec<DisabledSnapshot>, Self::Error>> + Send + '_;

  // ── Rules ─────────────────────────────────────────────────────────────

  /// Write `rule` into its axis slot, replacing any rule of either kind
  /// there. Returns the displaced rule.
  fn put_rule(
    &self,
    uid: Uid,
    rule: ScheduleRule,
  ) -> impl Future<Output = Result<Option<ScheduleRule>, Self::Error>> + Send + '_;

  /// Remove the rule on `axis`, if any.
  ///
  /// Refused when it would leave a rule-driven snapshot without rules; use
  /// [`release`](Self::release) for that.
  fn clear_rule(
    &self,
    uid: Uid,
    axis: Axis,
  ) -> impl Future<Output = Result<Option<ScheduleRule>, Self::Error>> + Send + '_;

  /// Remove every rule the identity holds. Same refusal as
  /// [`clear_rule`](Self::clear_rule).
  fn clear_rules(
    &self,
    uid: Uid,
  ) -> impl Future<Output = Result<Vec<ScheduleRule>, Self::Error>> + Send + '_;

  /// Remove the rule on `axis` (every rule when `None`) together with the
  /// identity's snapshot, in one transaction. Returns the removed rules.
  fn release(
    &self,
    uid: Uid,
    axis: Option<Axis>,
  ) -> impl Future<Output = Result<Vec<ScheduleRule>, Self::Error>> + Send + '_;

  // ── Snapshots ─────────────────────────────────────────────────────────

  /// Persist a snapshot, replacing any earlier one for the same identity.
  /// Returns the replaced snapshot.
  fn save_snapshot(
    &self,
    snapshot: DisabledSnapshot,
  ) -> impl Future<Output = Result<Option<DisabledSnapshot>, Self::Error>> + Send + '_;

  /// Returns whether a snapshot existed.
  fn delete_snapshot(
    &self,
    uid: Uid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Replace every rule and snapshot with the contents of `image`.
  fn import(
    &self,
    image: StoreImage,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Attendance ────────────────────────────────────────────────────────

  /// Append punches not yet recorded for their `(uid, timestamp)`.
  /// Returns how many were new.
  fn record_punches(
    &self,
    punches: Vec<Punch>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Recorded punches in timestamp order, optionally restricted to one
  /// identity and to an inclusive date range.
  fn punches(
    &self,
    uid: Option<Uid>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
  ) -> impl Future<Output = Result<Vec<Punch>, Self::Error>> + Send + '_;
}
