//! Punch events pulled from the terminal's attendance log.

use std::{collections::BTreeMap, fmt};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::{
  directory::Directory,
  error::{Error, Result},
  schedule::Uid,
  store::RestrictionStore,
};

/// What a punch recorded, as the terminal encodes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum PunchKind {
  CheckIn,
  CheckOut,
  BreakOut,
  BreakIn,
  OvertimeIn,
  OvertimeOut,
  Other(u8),
}

impl From<u8> for PunchKind {
  fn from(code: u8) -> Self {
    match code {
      0 => Self::CheckIn,
      1 => Self::CheckOut,
      2 => Self::BreakOut,
      3 => Self::BreakIn,
      4 => Self::OvertimeIn,
      5 => Self::OvertimeOut,
      n => Self::Other(n),
    }
  }
}

impl From<PunchKind> for u8 {
  fn from(kind: PunchKind) -> Self {
    match kind {
      PunchKind::CheckIn => 0,
      PunchKind::CheckOut => 1,
      PunchKind::BreakOut => 2,
      PunchKind::BreakIn => 3,
      PunchKind::OvertimeIn => 4,
      PunchKind::OvertimeOut => 5,
      PunchKind::Other(n) => n,
    }
  }
}

impl fmt::Display for PunchKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::CheckIn => f.write_str("check-in"),
      Self::CheckOut => f.write_str("check-out"),
      Self::BreakOut => f.write_str("break-out"),
      Self::BreakIn => f.write_str("break-in"),
      Self::OvertimeIn => f.write_str("overtime-in"),
      Self::OvertimeOut => f.write_str("overtime-out"),
      Self::Other(n) => write!(f, "type {n}"),
    }
  }
}

/// One attendance event. `(uid, timestamp)` identifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Punch {
  pub uid:       Uid,
  /// Terminal-local time, second precision.
  pub timestamp: NaiveDateTime,
  pub kind:      PunchKind,
  /// Verification method code reported by the terminal.
  #[serde(default)]
  pub status:    u8,
}

impl Punch {
  pub fn date(&self) -> NaiveDate { self.timestamp.date() }
}

/// Result of one synchronisation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
  /// Punches held by the terminal.
  pub pulled: usize,
  /// Punches that were not in the store yet.
  pub added:  usize,
}

/// Copy the terminal's attendance log into the store.
///
/// The store keeps at most one punch per identity and timestamp, so running
/// this repeatedly only ever appends what is new.
pub async fn sync_attendance<S, D>(store: &S, directory: &D) -> Result<SyncSummary>
where
  S: RestrictionStore,
  D: Directory,
{
  let punches = directory.attendance().await?;
  let pulled = punches.len();
  let added = store.record_punches(punches).await.map_err(Error::store)?;
  tracing::info!(pulled, added, "attendance synchronised");
  Ok(SyncSummary { pulled, added })
}

/// Per-kind punch counts, in kind order.
pub fn tally(punches: &[Punch]) -> BTreeMap<PunchKind, usize> {
  let mut counts = BTreeMap::new();
  for punch in punches {
    *counts.entry(punch.kind).or_insert(0) += 1;
  }
  counts
}
