//! The Directory Port: the terminal's live set of registered identities.
//!
//! The port is a remote, fallible peripheral. Removal is destructive (the
//! terminal has no notion of a suspended user), which is why the engine keeps
//! [`DisabledSnapshot`](crate::snapshot::DisabledSnapshot)s.

use std::{fmt, future::Future};

use serde::{Deserialize, Serialize};

use crate::{attendance::Punch, error::PortError, schedule::Uid};

// ─── Records ─────────────────────────────────────────────────────────────────

/// Terminal privilege level.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Privilege(pub u8);

impl Privilege {
  pub const USER: Self = Self(0);
  pub const ADMIN: Self = Self(14);
}

impl fmt::Display for Privilege {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      Self::USER => f.pad("user"),
      Self::ADMIN => f.pad("admin"),
      Self(other) => f.pad(&format!("level {other}")),
    }
  }
}

/// Every directory-visible field of one identity.
///
/// Biometric templates live on the terminal only and are not part of the
/// record; they do not survive a disable/restore cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
  pub uid:       Uid,
  pub name:      String,
  #[serde(default)]
  pub privilege: Privilege,
  /// Keypad credential; empty when unset.
  #[serde(default)]
  pub password:  String,
  /// `None` means "no group". Group `0` is a real group.
  #[serde(default, with = "group_repr")]
  pub group_id:  Option<u32>,
  /// Secondary identifier printed on badges and reports.
  #[serde(default)]
  pub user_id:   String,
  /// Badge number; `0` when no card is enrolled.
  #[serde(default)]
  pub card:      u64,
}

impl DirectoryRecord {
  pub fn new(uid: Uid, name: impl Into<String>) -> Self {
    Self {
      uid,
      name: name.into(),
      privilege: Privilege::USER,
      password: String::new(),
      group_id: None,
      user_id: uid.to_string(),
      card: 0,
    }
  }
}

// ─── Group coercion ──────────────────────────────────────────────────────────

/// Coerce a group id from its persisted string form.
///
/// Only a non-empty run of ASCII digits that fits in a `u32` names a group;
/// anything else (empty, padded, signed, alphabetic) means "no group" rather
/// than group zero. Leading zeros are accepted, so `"007"` is group 7.
pub fn parse_group_id(raw: &str) -> Option<u32> {
  if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  raw.parse().ok()
}

/// The persisted string form; `""` for "no group".
pub fn format_group_id(group: Option<u32>) -> String {
  group.map(|g| g.to_string()).unwrap_or_default()
}

/// Groups travel as strings on the wire; numbers and `null` are tolerated.
mod group_repr {
  use serde::{Deserialize, Deserializer, Serializer};

  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    Text(String),
    Number(u32),
  }

  pub fn serialize<S: Serializer>(group: &Option<u32>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&super::format_group_id(*group))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    Ok(match Option::<Raw>::deserialize(d)? {
      Some(Raw::Text(text)) => super::parse_group_id(&text),
      Some(Raw::Number(n)) => Some(n),
      None => None,
    })
  }
}

// ─── Device metadata ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
  pub name:          String,
  pub serial_number: String,
  pub firmware:      String,
  pub platform:      String,
  pub mac:           String,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the terminal's identity directory.
///
/// Every call blocks until the peripheral answers or times out. Failures are
/// values; the reconciler isolates them per identity.
pub trait Directory: Send + Sync {
  /// Every identity currently present on the terminal.
  fn list_identities(
    &self,
  ) -> impl Future<Output = Result<Vec<DirectoryRecord>, PortError>> + Send + '_;

  /// Add or overwrite the record keyed by `record.uid`.
  fn upsert_identity(
    &self,
    record: DirectoryRecord,
  ) -> impl Future<Output = Result<(), PortError>> + Send + '_;

  /// Delete an identity. Fails with [`PortError::NotFound`] if it is absent.
  fn remove_identity(
    &self,
    uid: Uid,
  ) -> impl Future<Output = Result<(), PortError>> + Send + '_;

  fn device_info(&self) -> impl Future<Output = Result<DeviceInfo, PortError>> + Send + '_;

  /// Every punch event held in the terminal's log.
  fn attendance(&self) -> impl Future<Output = Result<Vec<Punch>, PortError>> + Send + '_;
}
