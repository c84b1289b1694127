//! In-process implementations of [`Directory`] and [`RestrictionStore`].
//!
//! Used by tests across the workspace. The directory supports fault
//! injection so failure paths can be exercised without a terminal.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::NaiveDate;
use thiserror::Error;

use crate::{
  attendance::Punch,
  directory::{DeviceInfo, Directory, DirectoryRecord},
  error::PortError,
  schedule::{Axis, RuleSet, ScheduleRule, Uid},
  snapshot::DisabledSnapshot,
  store::{RestrictionStore, StoreImage},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Directory ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct DirectoryState {
  records:        BTreeMap<Uid, DirectoryRecord>,
  punches:        Vec<Punch>,
  offline:        bool,
  failing_remove: BTreeSet<Uid>,
  failing_upsert: BTreeSet<Uid>,
}

/// A terminal that lives in memory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
  state: Mutex<DirectoryState>,
  info:  DeviceInfo,
}

impl MemoryDirectory {
  pub fn with_records(records: impl IntoIterator<Item = DirectoryRecord>) -> Self {
    let dir = Self::default();
    for record in records {
      dir.insert(record);
    }
    dir
  }

  pub fn insert(&self, record: DirectoryRecord) {
    lock(&self.state).records.insert(record.uid, record);
  }

  pub fn get(&self, uid: Uid) -> Option<DirectoryRecord> {
    lock(&self.state).records.get(&uid).cloned()
  }

  pub fn contains(&self, uid: Uid) -> bool { lock(&self.state).records.contains_key(&uid) }

  pub fn push_punch(&self, punch: Punch) { lock(&self.state).punches.push(punch); }

  // ── Fault injection ───────────────────────────────────────────────────

  /// Every call fails with [`PortError::Unavailable`] while offline.
  pub fn set_offline(&self, offline: bool) { lock(&self.state).offline = offline; }

  pub fn fail_removals_for(&self, uid: Uid) { lock(&self.state).failing_remove.insert(uid); }

  pub fn fail_upserts_for(&self, uid: Uid) { lock(&self.state).failing_upsert.insert(uid); }

  pub fn clear_faults(&self) {
    let mut state = lock(&self.state);
    state.offline = false;
    state.failing_remove.clear();
    state.failing_upsert.clear();
  }

  fn online(&self) -> Result<MutexGuard<'_, DirectoryState>, PortError> {
    let state = lock(&self.state);
    if state.offline {
      return Err(PortError::Unavailable("terminal offline".into()));
    }
    Ok(state)
  }
}

impl Directory for MemoryDirectory {
  async fn list_identities(&self) -> Result<Vec<DirectoryRecord>, PortError> {
    Ok(self.online()?.records.values().cloned().collect())
  }

  async fn upsert_identity(&self, record: DirectoryRecord) -> Result<(), PortError> {
    let mut state = self.online()?;
    if state.failing_upsert.contains(&record.uid) {
      return Err(PortError::Unavailable(format!("write of {} timed out", record.uid)));
    }
    state.records.insert(record.uid, record);
    Ok(())
  }

  async fn remove_identity(&self, uid: Uid) -> Result<(), PortError> {
    let mut state = self.online()?;
    if state.failing_remove.contains(&uid) {
      return Err(PortError::Unavailable(format!("delete of {uid} timed out")));
    }
    state.records.remove(&uid).map(drop).ok_or(PortError::NotFound(uid))
  }

  async fn device_info(&self) -> Result<DeviceInfo, PortError> {
    self.online()?;
    Ok(self.info.clone())
  }

  async fn attendance(&self) -> Result<Vec<Punch>, PortError> {
    Ok(self.online()?.punches.clone())
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MemoryStoreError {
  #[error("clearing rules of {0} would orphan its rule-driven snapshot")]
  WouldOrphanSnapshot(Uid),

  #[error("store unavailable")]
  Unavailable,
}

#[derive(Debug, Default)]
struct StoreState {
  rules:       BTreeMap<Uid, RuleSet>,
  snapshots:   BTreeMap<Uid, DisabledSnapshot>,
  punches:     BTreeMap<(Uid, chrono::NaiveDateTime), Punch>,
  unavailable: bool,
}

impl StoreState {
  fn would_orphan(&self, uid: Uid, remaining: &RuleSet) -> bool {
    remaining.is_empty()
      && self.snapshots.get(&uid).is_some_and(DisabledSnapshot::is_rule_driven)
  }
}

/// A restriction store held in memory; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
  state: Mutex<StoreState>,
}

impl MemoryStore {
  /// Every call fails while unavailable.
  pub fn set_unavailable(&self, unavailable: bool) {
    lock(&self.state).unavailable = unavailable;
  }

  fn state(&self) -> Result<MutexGuard<'_, StoreState>, MemoryStoreError> {
    let state = lock(&self.state);
    if state.unavailable {
      return Err(MemoryStoreError::Unavailable);
    }
    Ok(state)
  }
}

impl RestrictionStore for MemoryStore {
  type Error = MemoryStoreError;

  async fn load(&self) -> Result<StoreImage, Self::Error> {
    let state = self.state()?;
    Ok(StoreImage::assemble(
      state.rules.clone(),
      state.snapshots.clone(),
      Vec::new(),
    ))
  }

  async fn rule_set(&self, uid: Uid) -> Result<RuleSet, Self::Error> {
    Ok(self.state()?.rules.get(&uid).cloned().unwrap_or_default())
  }

  async fn snapshot(&self, uid: Uid) -> Result<Option<DisabledSnapshot>, Self::Error> {
    Ok(self.state()?.snapshots.get(&uid).cloned())
  }

  async fn snapshots(&self) -> Result<Vec<DisabledSnapshot>, Self::Error> {
    Ok(self.state()?.snapshots.values().cloned().collect())
  }

  async fn put_rule(
    &self,
    uid: Uid,
    rule: ScheduleRule,
  ) -> Result<Option<ScheduleRule>, Self::Error> {
    Ok(self.state()?.rules.entry(uid).or_default().set(rule))
  }

  async fn clear_rule(
    &self,
    uid: Uid,
    axis: Axis,
  ) -> Result<Option<ScheduleRule>, Self::Error> {
    let mut state = self.state()?;
    let mut remaining = state.rules.get(&uid).cloned().unwrap_or_default();
    let removed = remaining.clear(axis);
    if removed.is_some() && state.would_orphan(uid, &remaining) {
      return Err(MemoryStoreError::WouldOrphanSnapshot(uid));
    }
    state.rules.insert(uid, remaining);
    Ok(removed)
  }

  async fn clear_rules(&self, uid: Uid) -> Result<Vec<ScheduleRule>, Self::Error> {
    let mut state = self.state()?;
    let held = state.rules.get(&uid).cloned().unwrap_or_default();
    if !held.is_empty() && state.would_orphan(uid, &RuleSet::default()) {
      return Err(MemoryStoreError::WouldOrphanSnapshot(uid));
    }
    state.rules.remove(&uid);
    Ok(held.rules().collect())
  }

  async fn release(
    &self,
    uid: Uid,
    axis: Option<Axis>,
  ) -> Result<Vec<ScheduleRule>, Self::Error> {
    let mut state = self.state()?;
    let removed = match axis {
      Some(axis) => state
        .rules
        .get_mut(&uid)
        .and_then(|set| set.clear(axis))
        .into_iter()
        .collect(),
      None => state
        .rules
        .remove(&uid)
        .map(|set| set.rules().collect())
        .unwrap_or_default(),
    };
    state.snapshots.remove(&uid);
    Ok(removed)
  }

  async fn save_snapshot(
    &self,
    snapshot: DisabledSnapshot,
  ) -> Result<Option<DisabledSnapshot>, Self::Error> {
    Ok(self.state()?.snapshots.insert(snapshot.uid(), snapshot))
  }

  async fn delete_snapshot(&self, uid: Uid) -> Result<bool, Self::Error> {
    Ok(self.state()?.snapshots.remove(&uid).is_some())
  }

  async fn import(&self, image: StoreImage) -> Result<(), Self::Error> {
    let mut state = self.state()?;
    state.rules = image.rules;
    state.snapshots = image.snapshots;
    Ok(())
  }

  async fn record_punches(&self, punches: Vec<Punch>) -> Result<usize, Self::Error> {
    let mut state = self.state()?;
    let mut added = 0;
    for punch in punches {
      let key = (punch.uid, punch.timestamp);
      if !state.punches.contains_key(&key) {
        state.punches.insert(key, punch);
        added += 1;
      }
    }
    Ok(added)
  }

  async fn punches(
    &self,
    uid: Option<Uid>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
  ) -> Result<Vec<Punch>, Self::Error> {
    let state = self.state()?;
    let mut out: Vec<Punch> = state
      .punches
      .values()
      .filter(|p| uid.is_none_or(|u| p.uid == u))
      .filter(|p| from.is_none_or(|d| p.date() >= d))
      .filter(|p| to.is_none_or(|d| p.date() <= d))
      .cloned()
      .collect();
    out.sort_by_key(|p| (p.timestamp, p.uid));
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{schedule::RuleMode, snapshot::SnapshotTag};

  fn weekend() -> ScheduleRule {
    ScheduleRule::parse(Axis::Weekday, RuleMode::Deny, &["6,7"]).unwrap()
  }

  #[tokio::test]
  async fn remove_of_absent_identity_is_not_found() {
    let dir = MemoryDirectory::default();
    assert_eq!(
      dir.remove_identity(Uid(5)).await,
      Err(PortError::NotFound(Uid(5)))
    );
  }

  #[tokio::test]
  async fn faults_are_per_identity() {
    let dir = MemoryDirectory::with_records([
      DirectoryRecord::new(Uid(1), "a"),
      DirectoryRecord::new(Uid(2), "b"),
    ]);
    dir.fail_removals_for(Uid(1));
    assert!(dir.remove_identity(Uid(1)).await.is_err());
    assert!(dir.remove_identity(Uid(2)).await.is_ok());
    dir.clear_faults();
    assert!(dir.remove_identity(Uid(1)).await.is_ok());
  }

  #[tokio::test]
  async fn store_refuses_to_orphan_rule_driven_snapshot() {
    let store = MemoryStore::default();
    store.put_rule(Uid(1), weekend()).await.unwrap();
    store
      .save_snapshot(DisabledSnapshot::capture(
        DirectoryRecord::new(Uid(1), "a"),
        SnapshotTag::RuleDriven,
      ))
      .await
      .unwrap();

    assert!(matches!(
      store.clear_rule(Uid(1), Axis::Weekday).await,
      Err(MemoryStoreError::WouldOrphanSnapshot(Uid(1)))
    ));
    assert!(store.clear_rules(Uid(1)).await.is_err());

    let released = store.release(Uid(1), None).await.unwrap();
    assert_eq!(released, vec![weekend()]);
    assert!(store.snapshot(Uid(1)).await.unwrap().is_none());
    assert!(store.rule_set(Uid(1)).await.unwrap().is_empty());
  }
}
