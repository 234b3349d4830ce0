//! The `TemporalStore` trait — the seam between the core model and a
//! storage backend.
//!
//! The trait is implemented by storage backends (e.g.
//! `tempus-store-sqlite`). It is the single write-path choke point for
//! tracked tables: applications that mutate current state through any
//! other route lose the history guarantee.
//!
//! All methods return `Send` futures so the trait can be used from
//! multi-threaded async runtimes.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  layout::{ColumnDef, Layout, TableDef},
  record::{Attributes, Version},
};

/// Abstraction over a Tempus storage backend.
///
/// Every mutating operation is atomic with its history append: there is no
/// observable state in which the current side changed and the history side
/// did not, or vice versa. Writes to one entity key are serialized; writes
/// to different keys proceed independently.
pub trait TemporalStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Bootstrap & structure ─────────────────────────────────────────────

  /// Create the store-level schema objects if absent and re-verify the
  /// structure of every registered table. Idempotent; must complete
  /// successfully before any other operation is accepted. Failure is
  /// fatal — there is no degraded mode without both schema sides.
  fn ensure_schemas(
    &self,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Create both sides of a tracked table (idempotent), or verify the
  /// existing structure against `def` if the table is already registered.
  fn ensure_table<'a>(
    &'a self,
    def: &'a TableDef,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Add a tracked attribute column to both sides atomically.
  fn add_column<'a>(
    &'a self,
    table: &'a str,
    column: ColumnDef,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Remove a tracked attribute column from both sides atomically.
  fn drop_column<'a>(
    &'a self,
    table: &'a str,
    column: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Compare both sides against the registered definition. A detected
  /// mismatch blocks further writes on the table until a structural
  /// operation repairs it and re-verifies cleanly.
  fn verify_structure<'a>(
    &'a self,
    table: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// The complete, ordered structural description of all tracked tables.
  fn export_layout(
    &self,
  ) -> impl Future<Output = Result<Layout, Self::Error>> + Send + '_;

  /// Recreate tracked tables from an exported layout, in order.
  fn apply_layout<'a>(
    &'a self,
    layout: &'a Layout,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Change capture ────────────────────────────────────────────────────

  /// Create an entity. Attributes absent from `attributes` are null.
  /// Returns the new open version; a duplicate id is an error.
  fn insert<'a>(
    &'a self,
    table: &'a str,
    id: &'a str,
    attributes: Attributes,
  ) -> impl Future<Output = Result<Version, Self::Error>> + Send + 'a;

  /// Overlay `attributes` on the entity's current values. If at least one
  /// tracked attribute actually changes, the open version is closed and a
  /// new one opened; otherwise nothing is written. Returns the open
  /// version after the call either way.
  fn update<'a>(
    &'a self,
    table: &'a str,
    id: &'a str,
    attributes: Attributes,
  ) -> impl Future<Output = Result<Version, Self::Error>> + Send + 'a;

  /// Close the entity's open version and remove its current-state row.
  /// Returns the closed final version; the chain stays queryable.
  fn delete<'a>(
    &'a self,
    table: &'a str,
    id: &'a str,
  ) -> impl Future<Output = Result<Version, Self::Error>> + Send + 'a;

  // ── Temporal view ─────────────────────────────────────────────────────

  /// The entity's current version, straight from current-state storage.
  fn get_current<'a>(
    &'a self,
    table: &'a str,
    id: &'a str,
  ) -> impl Future<Output = Result<Option<Version>, Self::Error>> + Send + 'a;

  /// All live entities' current versions, ordered by id.
  fn current<'a>(
    &'a self,
    table: &'a str,
  ) -> impl Future<Output = Result<Vec<Version>, Self::Error>> + Send + 'a;

  /// The version of one entity whose interval contains `at`, if any.
  /// Absence (entity did not exist yet, or was already deleted) is not an
  /// error.
  fn get_as_of<'a>(
    &'a self,
    table: &'a str,
    id: &'a str,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<Version>, Self::Error>> + Send + 'a;

  /// Table state as it existed at `at`: for every entity, the version
  /// whose interval contains `at`. Ordered by id.
  fn as_of<'a>(
    &'a self,
    table: &'a str,
    at: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<Version>, Self::Error>> + Send + 'a;

  /// The entity's full version chain, oldest first.
  fn history_of<'a>(
    &'a self,
    table: &'a str,
    id: &'a str,
  ) -> impl Future<Output = Result<Vec<Version>, Self::Error>> + Send + 'a;

  /// The instants at which the entity changed, in order, including the
  /// terminal delete instant if the entity was deleted.
  fn timeline<'a>(
    &'a self,
    table: &'a str,
    id: &'a str,
  ) -> impl Future<Output = Result<Vec<DateTime<Utc>>, Self::Error>> + Send + 'a;
}
