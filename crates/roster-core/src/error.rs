//! Error types for `roster-core`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schedule::{Axis, Uid};

/// A rule rejected at write time. These never reach the evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
  #[error("weekday {0:?} is not a number between 1 (Monday) and 7 (Sunday)")]
  InvalidWeekday(String),

  #[error("date {0:?} is not a valid YYYY-MM-DD date")]
  InvalidDate(String),

  #[error("time {0:?} is not a valid HH:MM time")]
  InvalidTime(String),

  #[error("time window {0:?} must look like HH:MM-HH:MM")]
  InvalidWindow(String),

  #[error("time window starts at {start} but ends earlier, at {end}")]
  InvertedWindow { start: String, end: String },

  #[error("date range starts on {from} but ends earlier, on {to}")]
  InvertedRange { from: String, to: String },

  #[error("date range {from}..{to} spans more than {max} days")]
  RangeTooLong { from: String, to: String, max: i64 },

  #[error("a {0} rule needs at least one value")]
  EmptyValues(Axis),

  #[error("instant {0:?} must look like YYYY-MM-DDTHH:MM")]
  InvalidInstant(String),
}

/// A failure reported by the Directory Port.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PortError {
  #[error("directory unavailable: {0}")]
  Unavailable(String),

  #[error("directory rejected the record: {0}")]
  Rejected(String),

  #[error("identity {0} is not in the directory")]
  NotFound(Uid),
}

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Rule(#[from] RuleError),

  #[error(transparent)]
  Port(#[from] PortError),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("identity {0} is not present in the directory")]
  NotPresent(Uid),

  #[error("identity {0} has no disabled snapshot")]
  NoSnapshot(Uid),

  #[error("legacy state: {0}")]
  Legacy(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Box a backend error from any [`RestrictionStore`](crate::store::RestrictionStore).
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
