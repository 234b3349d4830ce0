//! The structural layout of tracked tables, and the naming rule that binds
//! each current-state table to its history counterpart.
//!
//! The layout is serializable so deployment tooling can export it from one
//! database and recreate it on another. Identifier validation lives here:
//! backends interpolate these names into DDL and rely on `validate` having
//! rejected anything that is not a plain identifier.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Naming rule ─────────────────────────────────────────────────────────────

/// Table-name prefix of the current-state side.
pub const CURRENT_PREFIX: &str = "temporal_";

/// Table-name prefix of the append-only history side.
pub const HISTORY_PREFIX: &str = "history_";

/// The entity key column every tracked table carries implicitly.
pub const KEY_COLUMN: &str = "id";

/// Column names reserved for the key and the temporal machinery; a
/// `TableDef` may not declare them.
pub const RESERVED_COLUMNS: &[&str] =
  &["id", "hid", "valid_from", "valid_to", "recorded_at"];

/// Physical name of the current-state table for a tracked table.
pub fn current_table(name: &str) -> String {
  format!("{CURRENT_PREFIX}{name}")
}

/// Physical name of the history table for a tracked table.
pub fn history_table(name: &str) -> String {
  format!("{HISTORY_PREFIX}{name}")
}

// ─── Column & table definitions ──────────────────────────────────────────────

/// Storage type of a tracked attribute column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
  Integer,
  Real,
  Text,
  Bool,
}

/// One tracked attribute column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
  pub name:     String,
  pub ty:       ColumnType,
  pub nullable: bool,
}

impl ColumnDef {
  /// A nullable column — the common case.
  pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
    Self { name: name.into(), ty, nullable: true }
  }

  pub fn not_null(mut self) -> Self {
    self.nullable = false;
    self
  }
}

/// The definition of one tracked table: its name and attribute columns.
///
/// The entity key column and the temporal columns are implicit — every
/// tracked table has them and they never appear in a `TableDef`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
  pub name:    String,
  pub columns: Vec<ColumnDef>,
}

impl TableDef {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into(), columns: Vec::new() }
  }

  pub fn with_column(mut self, column: ColumnDef) -> Self {
    self.columns.push(column);
    self
  }

  pub fn column(&self, name: &str) -> Option<&ColumnDef> {
    self.columns.iter().find(|c| c.name == name)
  }

  /// Check names: plain identifiers only, no reserved names, no duplicates.
  pub fn validate(&self) -> Result<()> {
    if !is_identifier(&self.name) {
      return Err(Error::InvalidIdentifier(self.name.clone()));
    }
    for (i, col) in self.columns.iter().enumerate() {
      if !is_identifier(&col.name) {
        return Err(Error::InvalidIdentifier(col.name.clone()));
      }
      if RESERVED_COLUMNS.contains(&col.name.as_str()) {
        return Err(Error::ReservedColumn {
          table:  self.name.clone(),
          column: col.name.clone(),
        });
      }
      if self.columns[..i].iter().any(|c| c.name == col.name) {
        return Err(Error::DuplicateColumn {
          table:  self.name.clone(),
          column: col.name.clone(),
        });
      }
    }
    Ok(())
  }
}

/// `[A-Za-z_][A-Za-z0-9_]*` — everything a backend may splice into DDL.
fn is_identifier(s: &str) -> bool {
  let mut chars = s.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
    _ => return false,
  }
  chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ─── Layout ──────────────────────────────────────────────────────────────────

/// The complete, ordered structural description of a store — the unit of
/// schema-description export and import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
  pub tables: Vec<TableDef>,
}

impl Layout {
  pub fn to_json(&self) -> Result<String> {
    Ok(serde_json::to_string_pretty(self)?)
  }

  pub fn from_json(s: &str) -> Result<Self> {
    Ok(serde_json::from_str(s)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn items() -> TableDef {
    TableDef::new("items")
      .with_column(ColumnDef::new("label", ColumnType::Text).not_null())
      .with_column(ColumnDef::new("qty", ColumnType::Integer))
  }

  #[test]
  fn naming_rule_is_deterministic() {
    assert_eq!(current_table("items"), "temporal_items");
    assert_eq!(history_table("items"), "history_items");
  }

  #[test]
  fn validate_accepts_plain_identifiers() {
    assert!(items().validate().is_ok());
  }

  #[test]
  fn validate_rejects_reserved_and_duplicate_columns() {
    let reserved =
      TableDef::new("items").with_column(ColumnDef::new("valid_from", ColumnType::Text));
    assert!(matches!(
      reserved.validate(),
      Err(Error::ReservedColumn { .. })
    ));

    let dup = TableDef::new("items")
      .with_column(ColumnDef::new("label", ColumnType::Text))
      .with_column(ColumnDef::new("label", ColumnType::Integer));
    assert!(matches!(dup.validate(), Err(Error::DuplicateColumn { .. })));
  }

  #[test]
  fn validate_rejects_non_identifiers() {
    assert!(matches!(
      TableDef::new("items; DROP TABLE x").validate(),
      Err(Error::InvalidIdentifier(_))
    ));
    let bad_col =
      TableDef::new("items").with_column(ColumnDef::new("a b", ColumnType::Text));
    assert!(matches!(
      bad_col.validate(),
      Err(Error::InvalidIdentifier(_))
    ));
  }

  #[test]
  fn layout_json_round_trip() {
    let layout = Layout { tables: vec![items(), TableDef::new("empty")] };
    let json = layout.to_json().unwrap();
    assert_eq!(Layout::from_json(&json).unwrap(), layout);
  }
}
