//! Error type for `roster-store-sqlite`.

use roster_core::schedule::Uid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("invalid rule: {0}")]
  Rule(#[from] roster_core::error::RuleError),

  /// A stored column that does not decode into its domain type.
  #[error("decode error: {0}")]
  Decode(String),

  #[error("{field} value {value} does not fit in a database integer")]
  OutOfRange { field: &'static str, value: u64 },

  /// Clearing these rules would leave a rule-driven snapshot that no pass
  /// will ever restore.
  #[error("clearing the rules of {0} would orphan its rule-driven snapshot")]
  WouldOrphanSnapshot(Uid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
