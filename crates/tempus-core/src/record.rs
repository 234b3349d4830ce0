//! Versions — the immutable snapshots a tracked entity accrues over time.
//!
//! A version is never updated in place. Change capture closes the open
//! version's interval and appends a new one; the full chain stays
//! queryable forever.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interval::ValidityInterval;

// ─── Values ──────────────────────────────────────────────────────────────────

/// A single attribute value. Variants map 1:1 onto SQLite storage classes;
/// booleans are stored as integers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
  Bool(bool),
}

impl Value {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self { Self::Integer(v) }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self { Self::Real(v) }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self { Self::Text(v.to_owned()) }
}

impl From<String> for Value {
  fn from(v: String) -> Self { Self::Text(v) }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self { Self::Bool(v) }
}

/// Attribute values keyed by column name. A `BTreeMap` so iteration order
/// is deterministic everywhere columns are enumerated.
pub type Attributes = BTreeMap<String, Value>;

// ─── Version ─────────────────────────────────────────────────────────────────

/// An immutable snapshot of an entity's tracked attributes plus the period
/// it was (or still is) in effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
  /// The owning entity's key. Caller-owned; the store never invents it.
  pub id:          String,
  pub attributes:  Attributes,
  pub interval:    ValidityInterval,
  /// Physical write time; may lag `interval.valid_from` under bulk apply.
  pub recorded_at: DateTime<Utc>,
}

impl Version {
  /// Whether this is the entity's current (open-ended) version.
  pub fn is_current(&self) -> bool { self.interval.is_open() }
}
