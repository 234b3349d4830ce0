//! Error type for `tempus-store-sqlite`.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] tempus_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("decode error: {0}")]
  Decode(String),

  /// Schema bootstrap failed; startup must abort. There is no degraded
  /// mode without both schema sides present.
  #[error("schema bootstrap failed: {0}")]
  Bootstrap(String),

  #[error("store not ready: ensure_schemas has not completed successfully")]
  NotReady,

  #[error("table not tracked: {0}")]
  UnknownTable(String),

  /// The two sides of a tracked table disagree on structure. Writes on
  /// the table are blocked until a structural repair re-verifies cleanly.
  #[error("structural mismatch on {table}: {detail}")]
  StructuralMismatch { table: String, detail: String },

  #[error("entity not found: {table}/{id}")]
  EntityNotFound { table: String, id: String },

  #[error("entity already exists: {table}/{id}")]
  DuplicateEntity { table: String, id: String },

  /// Lost-update race: the open version was closed by another writer
  /// between our read and our close. The caller may retry from scratch.
  #[error("concurrent modification on {table}/{id}")]
  ConcurrentModification { table: String, id: String },

  /// Per-key write lock not acquired within the bounded wait.
  #[error("write lock on {table}/{id} not acquired in time")]
  LockTimeout { table: String, id: String },

  /// Exclusive table lock for a structural change not acquired in time.
  #[error("table lock on {0} not acquired in time")]
  TableLockTimeout(String),

  /// The transaction time does not strictly follow the open version's
  /// `valid_from`; recording the write would produce a version that was
  /// never in effect. The write is rejected instead.
  #[error(
    "zero-width interval on {table}/{id}: write at {at} does not follow valid_from {valid_from}"
  )]
  ZeroWidthInterval {
    table:      String,
    id:         String,
    valid_from: DateTime<Utc>,
    at:         DateTime<Utc>,
  },

  /// SQLite cannot add a NOT NULL column to a populated table without a
  /// default; declare the column nullable instead.
  #[error("cannot add NOT NULL column {column} to {table}")]
  NotNullAddition { table: String, column: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
