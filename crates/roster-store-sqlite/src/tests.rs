//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{NaiveDate, NaiveDateTime};
use roster_core::{
  attendance::{Punch, PunchKind},
  directory::{DirectoryRecord, Privilege},
  evaluate::EvaluationContext,
  memory::MemoryDirectory,
  reconcile::{Outcome, reconcile},
  schedule::{Axis, RuleMode, ScheduleRule, Uid},
  snapshot::{DisabledSnapshot, SnapshotTag},
  store::{InvariantViolation, RestrictionStore, StoreImage},
};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn rule(axis: Axis, mode: RuleMode, values: &str) -> ScheduleRule {
  ScheduleRule::parse(axis, mode, &[values]).unwrap()
}

fn record(uid: u32) -> DirectoryRecord {
  DirectoryRecord {
    uid:       Uid(uid),
    name:      format!("user {uid}"),
    privilege: Privilege::USER,
    password:  "0000".into(),
    group_id:  Some(0),
    user_id:   format!("U{uid:03}"),
    card:      7_000_000 + u64::from(uid),
  }
}

fn at(s: &str) -> EvaluationContext {
  EvaluationContext::at(NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap())
}

// ─── Rules ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_store_loads_empty_image() {
  let s = store().await;
  let image = s.load().await.unwrap();
  assert_eq!(image, StoreImage::default());
}

#[tokio::test]
async fn put_and_read_rules() {
  let s = store().await;
  s.put_rule(Uid(1), rule(Axis::Weekday, RuleMode::Deny, "6,7")).await.unwrap();
  s.put_rule(Uid(1), rule(Axis::TimeOfDay, RuleMode::Allow, "08:00-12:00,13:00-17:00"))
    .await
    .unwrap();
  s.put_rule(Uid(2), rule(Axis::Date, RuleMode::Deny, "2026-12-24..2026-12-26"))
    .await
    .unwrap();

  let set = s.rule_set(Uid(1)).await.unwrap();
  assert_eq!(set.len(), 2);
  assert_eq!(set.get(Axis::TimeOfDay), Some(rule(
    Axis::TimeOfDay,
    RuleMode::Allow,
    "08:00-12:00,13:00-17:00"
  )));

  let image = s.load().await.unwrap();
  assert_eq!(image.rules.len(), 2);
  let ScheduleRule::Date(dates) = image.rules[&Uid(2)].get(Axis::Date).unwrap() else {
    panic!("wrong axis")
  };
  assert_eq!(dates.values.len(), 3);
}

#[tokio::test]
async fn writing_allow_replaces_deny_on_same_axis() {
  let s = store().await;
  s.put_rule(Uid(1), rule(Axis::Weekday, RuleMode::Deny, "6,7")).await.unwrap();
  let displaced = s
    .put_rule(Uid(1), rule(Axis::Weekday, RuleMode::Allow, "1,2,3"))
    .await
    .unwrap();

  assert_eq!(displaced, Some(rule(Axis::Weekday, RuleMode::Deny, "6,7")));
  let set = s.rule_set(Uid(1)).await.unwrap();
  assert_eq!(set.len(), 1);
  assert_eq!(set.get(Axis::Weekday).map(|r| r.mode()), Some(RuleMode::Allow));
}

#[tokio::test]
async fn clear_rule_and_clear_rules() {
  let s = store().await;
  s.put_rule(Uid(1), rule(Axis::Weekday, RuleMode::Deny, "6")).await.unwrap();
  s.put_rule(Uid(1), rule(Axis::Date, RuleMode::Deny, "2026-01-01")).await.unwrap();

  let removed = s.clear_rule(Uid(1), Axis::Weekday).await.unwrap();
  assert_eq!(removed.map(|r| r.axis()), Some(Axis::Weekday));
  assert!(s.clear_rule(Uid(1), Axis::Weekday).await.unwrap().is_none());

  let removed = s.clear_rules(Uid(1)).await.unwrap();
  assert_eq!(removed.len(), 1);
  assert!(s.rule_set(Uid(1)).await.unwrap().is_empty());
}

#[tokio::test]
async fn clearing_refuses_to_orphan_rule_driven_snapshot() {
  let s = store().await;
  s.put_rule(Uid(1), rule(Axis::Weekday, RuleMode::Deny, "6")).await.unwrap();
  s.save_snapshot(DisabledSnapshot::capture(record(1), SnapshotTag::RuleDriven))
    .await
    .unwrap();

  let err = s.clear_rule(Uid(1), Axis::Weekday).await.unwrap_err();
  assert!(matches!(err, Error::WouldOrphanSnapshot(Uid(1))));
  let err = s.clear_rules(Uid(1)).await.unwrap_err();
  assert!(matches!(err, Error::WouldOrphanSnapshot(Uid(1))));

  // Nothing was deleted.
  assert_eq!(s.rule_set(Uid(1)).await.unwrap().len(), 1);

  let released = s.release(Uid(1), Some(Axis::Weekday)).await.unwrap();
  assert_eq!(released.len(), 1);
  assert!(s.snapshot(Uid(1)).await.unwrap().is_none());
  assert!(s.load().await.unwrap().is_consistent());
}

#[tokio::test]
async fn manual_snapshot_does_not_block_clearing() {
  let s = store().await;
  s.put_rule(Uid(1), rule(Axis::Weekday, RuleMode::Deny, "6")).await.unwrap();
  s.save_snapshot(DisabledSnapshot::capture(record(1), SnapshotTag::Manual))
    .await
    .unwrap();
  assert!(s.clear_rules(Uid(1)).await.is_ok());
}

// ─── Snapshots ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn snapshot_round_trips_every_field() {
  let s = store().await;
  let mut rec = record(4);
  rec.privilege = Privilege::ADMIN;
  rec.group_id = None;
  let snapshot = DisabledSnapshot::capture(rec, SnapshotTag::RuleDriven);

  assert!(s.save_snapshot(snapshot.clone()).await.unwrap().is_none());
  let fetched = s.snapshot(Uid(4)).await.unwrap().unwrap();
  assert_eq!(fetched.record, snapshot.record);
  assert_eq!(fetched.tag, SnapshotTag::RuleDriven);
  assert_eq!(fetched.captured_at, snapshot.captured_at);
}

#[tokio::test]
async fn group_zero_survives_storage() {
  let s = store().await;
  s.save_snapshot(DisabledSnapshot::capture(record(5), SnapshotTag::Manual))
    .await
    .unwrap();
  let fetched = s.snapshot(Uid(5)).await.unwrap().unwrap();
  assert_eq!(fetched.record.group_id, Some(0));
}

#[tokio::test]
async fn save_snapshot_returns_replaced() {
  let s = store().await;
  let first = DisabledSnapshot::capture(record(6), SnapshotTag::Manual);
  s.save_snapshot(first.clone()).await.unwrap();
  let replaced = s
    .save_snapshot(DisabledSnapshot::capture(record(6), SnapshotTag::RuleDriven))
    .await
    .unwrap();
  assert_eq!(replaced.map(|r| r.tag), Some(SnapshotTag::Manual));
  assert_eq!(s.snapshots().await.unwrap().len(), 1);

  assert!(s.delete_snapshot(Uid(6)).await.unwrap());
  assert!(!s.delete_snapshot(Uid(6)).await.unwrap());
}

#[tokio::test]
async fn oversized_card_is_rejected() {
  let s = store().await;
  let mut rec = record(7);
  rec.card = u64::MAX;
  let err = s
    .save_snapshot(DisabledSnapshot::capture(rec, SnapshotTag::Manual))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::OutOfRange { field: "card", .. }));
}

#[tokio::test]
async fn load_reports_orphans() {
  let s = store().await;
  s.save_snapshot(DisabledSnapshot::capture(record(8), SnapshotTag::RuleDriven))
    .await
    .unwrap();
  let image = s.load().await.unwrap();
  assert_eq!(image.violations, vec![InvariantViolation::OrphanedSnapshot {
    uid: Uid(8),
  }]);
}

#[tokio::test]
async fn import_replaces_rules_and_snapshots() {
  let s = store().await;
  s.put_rule(Uid(1), rule(Axis::Weekday, RuleMode::Deny, "6")).await.unwrap();

  let image = StoreImage::assemble(
    [(
      Uid(2),
      [rule(Axis::Date, RuleMode::Allow, "2026-02-02")].into_iter().collect(),
    )]
    .into_iter()
    .collect(),
    [(Uid(2), DisabledSnapshot::capture(record(2), SnapshotTag::RuleDriven))]
      .into_iter()
      .collect(),
    Vec::new(),
  );
  s.import(image.clone()).await.unwrap();

  let loaded = s.load().await.unwrap();
  assert_eq!(loaded.rules, image.rules);
  assert_eq!(loaded.snapshots.len(), 1);
  assert!(!loaded.rules.contains_key(&Uid(1)));
}

// ─── Attendance ──────────────────────────────────────────────────────────────

fn punch(uid: u32, at: &str, kind: PunchKind) -> Punch {
  Punch {
    uid: Uid(uid),
    timestamp: NaiveDateTime::parse_from_str(at, "%Y-%m-%d %H:%M:%S").unwrap(),
    kind,
    status: 1,
  }
}

#[tokio::test]
async fn punches_are_deduplicated_per_identity_and_time() {
  let s = store().await;
  let batch = vec![
    punch(1, "2026-01-07 08:00:00", PunchKind::CheckIn),
    punch(1, "2026-01-07 17:00:00", PunchKind::CheckOut),
    punch(2, "2026-01-07 08:00:00", PunchKind::CheckIn),
  ];
  assert_eq!(s.record_punches(batch.clone()).await.unwrap(), 3);
  assert_eq!(s.record_punches(batch).await.unwrap(), 0);

  let mine = s.punches(Some(Uid(1)), None, None).await.unwrap();
  assert_eq!(mine.len(), 2);
  assert_eq!(mine[0].kind, PunchKind::CheckIn);
}

#[tokio::test]
async fn punches_filter_by_inclusive_date_range() {
  let s = store().await;
  s.record_punches(vec![
    punch(1, "2026-01-05 08:00:00", PunchKind::CheckIn),
    punch(1, "2026-01-06 08:00:00", PunchKind::CheckIn),
    punch(1, "2026-01-07 23:59:59", PunchKind::Other(9)),
    punch(1, "2026-01-08 08:00:00", PunchKind::CheckIn),
  ])
  .await
  .unwrap();

  let from = NaiveDate::from_ymd_opt(2026, 1, 6);
  let to = NaiveDate::from_ymd_opt(2026, 1, 7);
  let got = s.punches(None, from, to).await.unwrap();
  assert_eq!(got.len(), 2);
  assert_eq!(got[1].kind, PunchKind::Other(9));
}

// ─── Reconciliation against SQLite ───────────────────────────────────────────

#[tokio::test]
async fn reconcile_persists_snapshots_across_passes() {
  let s = store().await;
  let dir = MemoryDirectory::with_records([record(1)]);
  s.put_rule(Uid(1), rule(Axis::TimeOfDay, RuleMode::Allow, "08:00-18:00"))
    .await
    .unwrap();

  let night = reconcile(&s, &dir, at("2026-01-07 07:00")).await.unwrap();
  assert_eq!(night.entry(Uid(1)).unwrap().outcome, Outcome::Disabled);
  assert!(s.snapshot(Uid(1)).await.unwrap().is_some());

  let again = reconcile(&s, &dir, at("2026-01-07 07:30")).await.unwrap();
  assert!(again.is_quiescent());

  let morning = reconcile(&s, &dir, at("2026-01-07 09:00")).await.unwrap();
  assert_eq!(morning.entry(Uid(1)).unwrap().outcome, Outcome::Restored);
  assert_eq!(dir.get(Uid(1)), Some(record(1)));
  assert!(s.snapshot(Uid(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn malformed_rows_are_reported_and_skipped() {
  let s = store().await;
  let dir = MemoryDirectory::with_records([record(1)]);
  s.put_rule(Uid(1), rule(Axis::Weekday, RuleMode::Deny, "6,7")).await.unwrap();
  s.conn
    .call(|conn| {
      conn.execute("UPDATE rules SET values_json = '[9]' WHERE uid = 1", [])?;
      Ok(())
    })
    .await
    .unwrap();

  let image = s.load().await.unwrap();
  assert!(matches!(
    image.violations.as_slice(),
    [InvariantViolation::MalformedValue { uid: Uid(1), axis: Some(Axis::Weekday), .. }]
  ));

  let report = reconcile(&s, &dir, at("2026-01-10 10:00")).await.unwrap();
  assert!(report.entries.is_empty());
  assert!(dir.contains(Uid(1)));
}
