//! Soft-disable: the saved record of an identity removed from the terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{directory::DirectoryRecord, schedule::Uid};

/// Who removed the identity.
///
/// The reconciler only ever restores `RuleDriven` snapshots. A `Manual` one
/// stays until an operator enables the identity again.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SnapshotTag {
  Manual,
  RuleDriven,
}

/// Everything needed to put a removed identity back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisabledSnapshot {
  pub record:      DirectoryRecord,
  pub tag:         SnapshotTag,
  pub captured_at: DateTime<Utc>,
}

impl DisabledSnapshot {
  pub fn capture(record: DirectoryRecord, tag: SnapshotTag) -> Self {
    Self { record, tag, captured_at: Utc::now() }
  }

  pub fn uid(&self) -> Uid { self.record.uid }

  pub fn is_rule_driven(&self) -> bool { self.tag == SnapshotTag::RuleDriven }

  /// The record to upsert when restoring.
  ///
  /// Fingerprint and face templates are not part of a [`DirectoryRecord`];
  /// a restored identity has to re-enroll them.
  pub fn restoration(&self) -> DirectoryRecord { self.record.clone() }
}
