//! Import of the flat JSON state file kept by earlier terminal scripts.
//!
//! That file mixes two things in one object. Keys that are uids map to saved
//! user records (`temp_disabled: true` marks a schedule-driven removal). The
//! reserved keys `{day,date,time}_{restrictions,activations}` map uids to
//! deny-sets and allow-sets:
//!
//! ```json
//! {
//!   "12": { "uid": 12, "name": "Ann", "privilege": 0, "password": "",
//!           "group_id": "", "user_id": "12", "card": 0, "temp_disabled": true },
//!   "day_restrictions": { "12": [6, 7] },
//!   "time_activations": { "12": [{ "debut": "08:00", "fin": "18:00" }] }
//! }
//! ```

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::{
  directory::{DirectoryRecord, Privilege, parse_group_id},
  error::{Error, Result},
  schedule::{Axis, RuleMode, RuleSet, ScheduleRule, Uid},
  snapshot::{DisabledSnapshot, SnapshotTag},
  store::{InvariantViolation, RestrictionStore, StoreImage},
};

const RULE_KEYS: [(&str, Axis, RuleMode); 6] = [
  ("day_restrictions", Axis::Weekday, RuleMode::Deny),
  ("day_activations", Axis::Weekday, RuleMode::Allow),
  ("date_restrictions", Axis::Date, RuleMode::Deny),
  ("date_activations", Axis::Date, RuleMode::Allow),
  ("time_restrictions", Axis::TimeOfDay, RuleMode::Deny),
  ("time_activations", Axis::TimeOfDay, RuleMode::Allow),
];

fn parse_uid(key: &str) -> Result<Uid> {
  key
    .parse()
    .map_err(|_| Error::Legacy(format!("{key:?} is neither a uid nor a rule table")))
}

/// Parse a legacy state file into a typed image.
///
/// Problems with individual values become violations on the image rather
/// than errors, so every problem in the file can be reported at once. Only a
/// file whose shape is unrecognisable fails outright.
pub fn parse_legacy(json: &str) -> Result<StoreImage> {
  let root: Map<String, Value> = serde_json::from_str(json)?;

  let mut violations = Vec::new();
  let mut found: BTreeMap<(Uid, Axis), Vec<ScheduleRule>> = BTreeMap::new();

  for (key, axis, mode) in RULE_KEYS {
    let Some(table) = root.get(key) else { continue };
    let table = table
      .as_object()
      .ok_or_else(|| Error::Legacy(format!("{key} is not an object")))?;

    for (raw_uid, values) in table {
      let uid = parse_uid(raw_uid)?;
      match rule_from_values(axis, mode, values) {
        Ok(rule) => found.entry((uid, axis)).or_default().push(rule),
        Err(reason) => {
          violations.push(InvariantViolation::MalformedValue {
            uid,
            axis: Some(axis),
            reason,
          });
        }
      }
    }
  }

  let mut rules: BTreeMap<Uid, RuleSet> = BTreeMap::new();
  for ((uid, axis), mut candidates) in found {
    if candidates.len() > 1 {
      violations.push(InvariantViolation::ConflictingRules { uid, axis });
      continue;
    }
    if let Some(rule) = candidates.pop() {
      rules.entry(uid).or_default().set(rule);
    }
  }

  let mut snapshots = BTreeMap::new();
  for (key, value) in &root {
    if RULE_KEYS.iter().any(|(k, ..)| k == key) {
      continue;
    }
    let uid = parse_uid(key)?;
    match snapshot_from_value(uid, value) {
      Ok(snapshot) => {
        snapshots.insert(uid, snapshot);
      }
      Err(reason) => {
        violations.push(InvariantViolation::MalformedValue { uid, axis: None, reason });
      }
    }
  }

  Ok(StoreImage::assemble(rules, snapshots, violations))
}

/// Replace the store's rules and snapshots with a parsed legacy image.
///
/// Refused while the image carries any violation.
pub async fn import_legacy<S: RestrictionStore>(store: &S, image: StoreImage) -> Result<()> {
  if !image.is_consistent() {
    return Err(Error::Legacy(format!(
      "refusing to import: {} invariant violation(s)",
      image.violations.len()
    )));
  }
  let (rules, snapshots) = (image.rules.len(), image.snapshots.len());
  store.import(image).await.map_err(Error::store)?;
  tracing::info!(rules, snapshots, "legacy state imported");
  Ok(())
}

// ── Value coercion ────────────────────────────────────────────────────────

fn rule_from_values(
  axis: Axis,
  mode: RuleMode,
  values: &Value,
) -> std::result::Result<ScheduleRule, String> {
  let items = values
    .as_array()
    .ok_or_else(|| format!("expected a list, found {values}"))?;

  let tokens = items
    .iter()
    .map(|item| match (axis, item) {
      (Axis::TimeOfDay, Value::Object(window)) => {
        match (window.get("debut").and_then(Value::as_str), window.get("fin").and_then(Value::as_str)) {
          (Some(start), Some(end)) => Ok(format!("{start}-{end}")),
          _ => Err(format!("window {item} needs \"debut\" and \"fin\"")),
        }
      }
      (Axis::Weekday, Value::Number(n)) => Ok(n.to_string()),
      (Axis::Weekday | Axis::Date, Value::String(s)) => Ok(s.clone()),
      _ => Err(format!("unexpected {axis} value {item}")),
    })
    .collect::<std::result::Result<Vec<String>, String>>()?;

  ScheduleRule::parse(axis, mode, &tokens).map_err(|e| e.to_string())
}

fn text(value: Option<&Value>) -> String {
  match value {
    Some(Value::String(s)) => s.clone(),
    Some(Value::Number(n)) => n.to_string(),
    _ => String::new(),
  }
}

/// Integers may be stored as numbers, numeric strings, or falsy values
/// meaning zero.
fn integer(value: Option<&Value>, field: &str) -> std::result::Result<u64, String> {
  match value {
    None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(0),
    Some(Value::String(s)) if s.trim().is_empty() => Ok(0),
    Some(Value::String(s)) => s.trim().parse().map_err(|_| format!("{field} {s:?} is not a number")),
    Some(Value::Number(n)) => n.as_u64().ok_or_else(|| format!("{field} {n} is out of range")),
    Some(other) => Err(format!("{field} {other} is not a number")),
  }
}

fn snapshot_from_value(uid: Uid, value: &Value) -> std::result::Result<DisabledSnapshot, String> {
  let fields = value
    .as_object()
    .ok_or_else(|| format!("expected a saved record, found {value}"))?;

  let name = fields
    .get("name")
    .and_then(Value::as_str)
    .ok_or("saved record has no name")?;

  let privilege = u8::try_from(integer(fields.get("privilege"), "privilege")?)
    .map_err(|_| "privilege is out of range".to_owned())?;

  let group_id = match fields.get("group_id") {
    Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
    other => parse_group_id(&text(other)),
  };

  let record = DirectoryRecord {
    uid,
    name: name.to_owned(),
    privilege: Privilege(privilege),
    password: text(fields.get("password")),
    group_id,
    user_id: text(fields.get("user_id")),
    card: integer(fields.get("card"), "card")?,
  };

  let tag = if fields.get("temp_disabled").and_then(Value::as_bool).unwrap_or(false) {
    SnapshotTag::RuleDriven
  } else {
    SnapshotTag::Manual
  };

  Ok(DisabledSnapshot::capture(record, tag))
}
