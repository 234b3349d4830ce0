//! Error types for `tempus-core`.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The interval would not cover a single instant. Produced when a close
  /// time does not strictly follow the open time; the write path surfaces
  /// this instead of recording a version that was never in effect.
  #[error("zero-width interval: end {to} does not follow start {from}")]
  ZeroWidthInterval {
    from: DateTime<Utc>,
    to:   DateTime<Utc>,
  },

  #[error("invalid identifier: {0:?}")]
  InvalidIdentifier(String),

  #[error("column {column:?} on table {table:?} is reserved")]
  ReservedColumn { table: String, column: String },

  #[error("duplicate column {column:?} on table {table:?}")]
  DuplicateColumn { table: String, column: String },

  #[error("table {table:?} has no column {column:?}")]
  UnknownColumn { table: String, column: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
