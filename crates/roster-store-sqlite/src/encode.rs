//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings, punch times as
//! `YYYY-MM-DD HH:MM:SS`. Rule values are stored as compact JSON in the same
//! shape the API uses.

use chrono::{DateTime, NaiveDateTime, Utc};
use roster_core::{
  attendance::Punch,
  directory::{DirectoryRecord, Privilege, format_group_id, parse_group_id},
  schedule::{Axis, RuleMode, ScheduleRule, Uid},
  snapshot::{DisabledSnapshot, SnapshotTag},
};

use crate::{Error, Result};

pub const PUNCH_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("timestamp {s:?}: {e}")))
}

pub fn encode_punch_time(t: NaiveDateTime) -> String { t.format(PUNCH_FORMAT).to_string() }

pub fn decode_punch_time(s: &str) -> Result<NaiveDateTime> {
  NaiveDateTime::parse_from_str(s, PUNCH_FORMAT)
    .map_err(|e| Error::Decode(format!("punch time {s:?}: {e}")))
}

// ─── Enums ───────────────────────────────────────────────────────────────────

pub fn decode_axis(s: &str) -> Result<Axis> {
  s.parse().map_err(|_| Error::Decode(format!("unknown axis: {s:?}")))
}

pub fn decode_mode(s: &str) -> Result<RuleMode> {
  s.parse().map_err(|_| Error::Decode(format!("unknown rule mode: {s:?}")))
}

pub fn decode_tag(s: &str) -> Result<SnapshotTag> {
  s.parse().map_err(|_| Error::Decode(format!("unknown snapshot tag: {s:?}")))
}

// ─── Integers ────────────────────────────────────────────────────────────────

pub fn encode_card(card: u64) -> Result<i64> {
  i64::try_from(card).map_err(|_| Error::OutOfRange { field: "card", value: card })
}

pub fn decode_card(raw: i64) -> Result<u64> {
  u64::try_from(raw).map_err(|_| Error::Decode(format!("negative card number {raw}")))
}

// ─── Rules ───────────────────────────────────────────────────────────────────

/// Split a rule into `(axis, mode, values_json)` columns.
pub fn encode_rule(rule: &ScheduleRule) -> Result<(&'static str, &'static str, String)> {
  let values_json = match rule {
    ScheduleRule::Weekday(r) => serde_json::to_string(&r.values)?,
    ScheduleRule::Date(r) => serde_json::to_string(&r.values)?,
    ScheduleRule::TimeOfDay(r) => serde_json::to_string(&r.values)?,
  };
  Ok((rule.axis().into(), rule.mode().into(), values_json))
}

/// Raw strings read directly from a `rules` row.
pub struct RawRule {
  pub uid:         Uid,
  pub axis:        String,
  pub mode:        String,
  pub values_json: String,
}

impl RawRule {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      uid:         Uid(row.get(0)?),
      axis:        row.get(1)?,
      mode:        row.get(2)?,
      values_json: row.get(3)?,
    })
  }

  pub fn into_rule(self) -> Result<ScheduleRule> {
    let axis = decode_axis(&self.axis)?;
    let mode = decode_mode(&self.mode)?;
    let values: serde_json::Value = serde_json::from_str(&self.values_json)?;
    let rule: ScheduleRule = serde_json::from_value(serde_json::json!({
      "axis": axis,
      "mode": mode,
      "values": values,
    }))?;
    rule.validate()?;
    Ok(rule)
  }
}

// ─── Snapshots ───────────────────────────────────────────────────────────────

/// Column values for a `snapshots` row, in schema order.
pub struct SnapshotRow {
  pub uid:         u32,
  pub name:        String,
  pub privilege:   u8,
  pub password:    String,
  pub group_id:    String,
  pub user_id:     String,
  pub card:        i64,
  pub tag:         &'static str,
  pub captured_at: String,
}

pub fn encode_snapshot(snapshot: &DisabledSnapshot) -> Result<SnapshotRow> {
  let record = &snapshot.record;
  Ok(SnapshotRow {
    uid:         record.uid.0,
    name:        record.name.clone(),
    privilege:   record.privilege.0,
    password:    record.password.clone(),
    group_id:    format_group_id(record.group_id),
    user_id:     record.user_id.clone(),
    card:        encode_card(record.card)?,
    tag:         snapshot.tag.into(),
    captured_at: encode_dt(snapshot.captured_at),
  })
}

/// Raw values read directly from a `snapshots` row.
pub struct RawSnapshot {
  pub uid:         Uid,
  pub name:        String,
  pub privilege:   u8,
  pub password:    String,
  pub group_id:    String,
  pub user_id:     String,
  pub card:        i64,
  pub tag:         String,
  pub captured_at: String,
}

impl RawSnapshot {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      uid:         Uid(row.get(0)?),
      name:        row.get(1)?,
      privilege:   row.get(2)?,
      password:    row.get(3)?,
      group_id:    row.get(4)?,
      user_id:     row.get(5)?,
      card:        row.get(6)?,
      tag:         row.get(7)?,
      captured_at: row.get(8)?,
    })
  }

  pub fn into_snapshot(self) -> Result<DisabledSnapshot> {
    Ok(DisabledSnapshot {
      record:      DirectoryRecord {
        uid:       self.uid,
        name:      self.name,
        privilege: Privilege(self.privilege),
        password:  self.password,
        group_id:  parse_group_id(&self.group_id),
        user_id:   self.user_id,
        card:      decode_card(self.card)?,
      },
      tag:         decode_tag(&self.tag)?,
      captured_at: decode_dt(&self.captured_at)?,
    })
  }
}

// ─── Punches ─────────────────────────────────────────────────────────────────

/// Raw values read directly from a `punches` row.
pub struct RawPunch {
  pub uid:       Uid,
  pub timestamp: String,
  pub kind:      u8,
  pub status:    u8,
}

impl RawPunch {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      uid:       Uid(row.get(0)?),
      timestamp: row.get(1)?,
      kind:      row.get(2)?,
      status:    row.get(3)?,
    })
  }

  pub fn into_punch(self) -> Result<Punch> {
    Ok(Punch {
      uid:       self.uid,
      timestamp: decode_punch_time(&self.timestamp)?,
      kind:      self.kind.into(),
      status:    self.status,
    })
  }
}
