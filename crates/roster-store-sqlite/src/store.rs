//! The SQLite implementation of [`RestrictionStore`].

use std::{collections::BTreeMap, path::Path};

use chrono::{NaiveDate, Utc};
use rusqlite::OptionalExtension as _;

use roster_core::{
  attendance::Punch,
  schedule::{Axis, RuleSet, ScheduleRule, Uid},
  snapshot::{DisabledSnapshot, SnapshotTag},
  store::{InvariantViolation, RestrictionStore, StoreImage},
};

use crate::{
  Error, Result,
  encode::{
    RawPunch, RawRule, RawSnapshot, decode_axis, encode_dt, encode_punch_time,
    encode_rule, encode_snapshot, SnapshotRow,
  },
  schema::SCHEMA,
};

const RULE_COLUMNS: &str = "uid, axis, mode, values_json";
const SNAPSHOT_COLUMNS: &str =
  "uid, name, privilege, password, group_id, user_id, card, tag, captured_at";

// ─── Store ───────────────────────────────────────────────────────────────────

/// A restriction store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Delete rules (all of them when `axis` is `None`), optionally together
  /// with the snapshot. Without `release`, refuses (returns `None`) if that
  /// would strand a rule-driven snapshot.
  async fn delete_rules(
    &self,
    uid: Uid,
    axis: Option<Axis>,
    release: bool,
  ) -> Result<Vec<ScheduleRule>> {
    let axis: Option<&'static str> = axis.map(Into::into);
    let rule_driven: &'static str = SnapshotTag::RuleDriven.into();

    let removed: Option<Vec<RawRule>> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let removed = select_rules(&tx, uid, axis)?;

        if !release && !removed.is_empty() {
          let held: i64 = tx.query_row(
            "SELECT COUNT(*) FROM rules WHERE uid = ?1",
            rusqlite::params![uid.0],
            |r| r.get(0),
          )?;
          let stranded: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM snapshots WHERE uid = ?1 AND tag = ?2)",
            rusqlite::params![uid.0, rule_driven],
            |r| r.get(0),
          )?;
          if stranded && usize::try_from(held).is_ok_and(|n| n == removed.len()) {
            return Ok(None);
          }
        }

        tx.execute(
          "DELETE FROM rules WHERE uid = ?1 AND (?2 IS NULL OR axis = ?2)",
          rusqlite::params![uid.0, axis],
        )?;
        if release {
          tx.execute("DELETE FROM snapshots WHERE uid = ?1", rusqlite::params![uid.0])?;
        }
        tx.commit()?;
        Ok(Some(removed))
      })
      .await?;

    removed
      .ok_or(Error::WouldOrphanSnapshot(uid))?
      .into_iter()
      .map(RawRule::into_rule)
      .collect()
  }
}

fn select_rules(
  conn: &rusqlite::Connection,
  uid: Uid,
  axis: Option<&str>,
) -> rusqlite::Result<Vec<RawRule>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {RULE_COLUMNS} FROM rules
     WHERE uid = ?1 AND (?2 IS NULL OR axis = ?2)
     ORDER BY axis"
  ))?;
  stmt
    .query_map(rusqlite::params![uid.0, axis], RawRule::from_row)?
    .collect()
}

fn select_snapshot(
  conn: &rusqlite::Connection,
  uid: Uid,
) -> rusqlite::Result<Option<RawSnapshot>> {
  conn
    .query_row(
      &format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots WHERE uid = ?1"),
      rusqlite::params![uid.0],
      RawSnapshot::from_row,
    )
    .optional()
}

fn insert_snapshot(conn: &rusqlite::Connection, row: &SnapshotRow) -> rusqlite::Result<()> {
  conn.execute(
    &format!(
      "INSERT OR REPLACE INTO snapshots ({SNAPSHOT_COLUMNS})
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
    ),
    rusqlite::params![
      row.uid,
      row.name,
      row.privilege,
      row.password,
      row.group_id,
      row.user_id,
      row.card,
      row.tag,
      row.captured_at,
    ],
  )?;
  Ok(())
}

/// `(uid, axis, mode, values_json)` ready to insert.
type RuleRow = (u32, &'static str, &'static str, String);

fn insert_rule(conn: &rusqlite::Connection, row: &RuleRow, now: &str) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO rules (uid, axis, mode, values_json, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT (uid, axis) DO UPDATE SET
       mode        = excluded.mode,
       values_json = excluded.values_json,
       updated_at  = excluded.updated_at",
    rusqlite::params![row.0, row.1, row.2, row.3, now],
  )?;
  Ok(())
}

// ─── RestrictionStore impl ───────────────────────────────────────────────────

impl RestrictionStore for SqliteStore {
  type Error = Error;

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn load(&self) -> Result<StoreImage> {
    let (raw_rules, raw_snapshots) = self
      .conn
      .call(|conn| {
        let rules = {
          let mut stmt = conn
            .prepare(&format!("SELECT {RULE_COLUMNS} FROM rules ORDER BY uid, axis"))?;
          stmt
            .query_map([], RawRule::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        let snapshots = {
          let mut stmt = conn
            .prepare(&format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots ORDER BY uid"))?;
          stmt
            .query_map([], RawSnapshot::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok((rules, snapshots))
      })
      .await?;

    let mut violations = Vec::new();

    let mut rules: BTreeMap<Uid, RuleSet> = BTreeMap::new();
    for raw in raw_rules {
      let uid = raw.uid;
      let axis = decode_axis(&raw.axis).ok();
      match raw.into_rule() {
        Ok(rule) => {
          rules.entry(uid).or_default().set(rule);
        }
        Err(e) => {
          tracing::warn!(uid = %uid, error = %e, "undecodable rule row");
          violations.push(InvariantViolation::MalformedValue {
            uid,
            axis,
            reason: e.to_string(),
          });
        }
      }
    }

    let mut snapshots = BTreeMap::new();
    for raw in raw_snapshots {
      let uid = raw.uid;
      match raw.into_snapshot() {
        Ok(snapshot) => {
          snapshots.insert(uid, snapshot);
        }
        Err(e) => {
          tracing::warn!(uid = %uid, error = %e, "undecodable snapshot row");
          violations.push(InvariantViolation::MalformedValue {
            uid,
            axis: None,
            reason: e.to_string(),
          });
        }
      }
    }

    Ok(StoreImage::assemble(rules, snapshots, violations))
  }

  async fn rule_set(&self, uid: Uid) -> Result<RuleSet> {
    let raw = self
      .conn
      .call(move |conn| Ok(select_rules(conn, uid, None)?))
      .await?;
    raw.into_iter().map(RawRule::into_rule).collect()
  }

  async fn snapshot(&self, uid: Uid) -> Result<Option<DisabledSnapshot>> {
    let raw = self
      .conn
      .call(move |conn| Ok(select_snapshot(conn, uid)?))
      .await?;
    raw.map(RawSnapshot::into_snapshot).transpose()
  }

  async fn snapshots(&self) -> Result<Vec<DisabledSnapshot>> {
    let raw = self
      .conn
      .call(|conn| {
        let mut stmt = conn
          .prepare(&format!("SELECT {SNAPSHOT_COLUMNS} FROM snapshots ORDER BY uid"))?;
        let rows = stmt
          .query_map([], RawSnapshot::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raw.into_iter().map(RawSnapshot::into_snapshot).collect()
  }

  // ── Rules ─────────────────────────────────────────────────────────────────

  async fn put_rule(&self, uid: Uid, rule: ScheduleRule) -> Result<Option<ScheduleRule>> {
    rule.validate()?;
    let (axis, mode, values_json) = encode_rule(&rule)?;
    let row: RuleRow = (uid.0, axis, mode, values_json);
    let now = encode_dt(Utc::now());

    let previous = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let previous = select_rules(&tx, uid, Some(axis))?.pop();
        insert_rule(&tx, &row, &now)?;
        tx.commit()?;
        Ok(previous)
      })
      .await?;

    tracing::debug!(uid = %uid, %rule, "rule written");
    previous.map(RawRule::into_rule).transpose()
  }

  async fn clear_rule(&self, uid: Uid, axis: Axis) -> Result<Option<ScheduleRule>> {
    Ok(self.delete_rules(uid, Some(axis), false).await?.pop())
  }

  async fn clear_rules(&self, uid: Uid) -> Result<Vec<ScheduleRule>> {
    self.delete_rules(uid, None, false).await
  }

  async fn release(&self, uid: Uid, axis: Option<Axis>) -> Result<Vec<ScheduleRule>> {
    self.delete_rules(uid, axis, true).await
  }

  // ── Snapshots ─────────────────────────────────────────────────────────────

  async fn save_snapshot(
    &self,
    snapshot: DisabledSnapshot,
  ) -> Result<Option<DisabledSnapshot>> {
    let uid = snapshot.uid();
    let row = encode_snapshot(&snapshot)?;

    let previous = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let previous = select_snapshot(&tx, uid)?;
        insert_snapshot(&tx, &row)?;
        tx.commit()?;
        Ok(previous)
      })
      .await?;

    previous.map(RawSnapshot::into_snapshot).transpose()
  }

  async fn delete_snapshot(&self, uid: Uid) -> Result<bool> {
    let deleted = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM snapshots WHERE uid = ?1", rusqlite::params![uid.0])?)
      })
      .await?;
    Ok(deleted > 0)
  }

  async fn import(&self, image: StoreImage) -> Result<()> {
    let mut rule_rows: Vec<RuleRow> = Vec::new();
    for (uid, set) in &image.rules {
      for rule in set.rules() {
        rule.validate()?;
        let (axis, mode, values_json) = encode_rule(&rule)?;
        rule_rows.push((uid.0, axis, mode, values_json));
      }
    }
    let snapshot_rows = image
      .snapshots
      .values()
      .map(encode_snapshot)
      .collect::<Result<Vec<_>>>()?;
    let now = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM rules", [])?;
        tx.execute("DELETE FROM snapshots", [])?;
        for row in &rule_rows {
          insert_rule(&tx, row, &now)?;
        }
        for row in &snapshot_rows {
          insert_snapshot(&tx, row)?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Attendance ────────────────────────────────────────────────────────────

  async fn record_punches(&self, punches: Vec<Punch>) -> Result<usize> {
    let rows: Vec<(u32, String, u8, u8)> = punches
      .iter()
      .map(|p| (p.uid.0, encode_punch_time(p.timestamp), p.kind.into(), p.status))
      .collect();

    let added = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut added = 0;
        {
          let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO punches (uid, timestamp, kind, status)
             VALUES (?1, ?2, ?3, ?4)",
          )?;
          for (uid, timestamp, kind, status) in &rows {
            added += stmt.execute(rusqlite::params![uid, timestamp, kind, status])?;
          }
        }
        tx.commit()?;
        Ok(added)
      })
      .await?;
    Ok(added)
  }

  async fn punches(
    &self,
    uid: Option<Uid>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
  ) -> Result<Vec<Punch>> {
    let uid = uid.map(|u| u.0);
    let from = from.map(|d| d.to_string());
    let to = to.map(|d| d.to_string());

    let raw = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT uid, timestamp, kind, status FROM punches
           WHERE (?1 IS NULL OR uid = ?1)
             AND (?2 IS NULL OR substr(timestamp, 1, 10) >= ?2)
             AND (?3 IS NULL OR substr(timestamp, 1, 10) <= ?3)
           ORDER BY timestamp, uid",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![uid, from, to], RawPunch::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raw.into_iter().map(RawPunch::into_punch).collect()
  }
}
