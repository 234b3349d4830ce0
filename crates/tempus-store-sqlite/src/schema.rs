//! DDL for the dual-schema layout.
//!
//! Every builder here takes a [`TableDef`] that has already passed
//! `TableDef::validate`; identifier safety is established there, never
//! re-checked here.

use tempus_core::layout::{ColumnDef, ColumnType, TableDef, current_table, history_table};

/// Store-level objects; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const BOOTSTRAP: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- One row per tracked table, in registration order. `def` holds the
-- TableDef JSON used to re-verify structure on reopen and to export the
-- layout. Counterpart tables are located by the naming rule, never by
-- this catalog.
CREATE TABLE IF NOT EXISTS tempus_catalog (
    name     TEXT PRIMARY KEY,
    position INTEGER NOT NULL,
    def      TEXT NOT NULL
);
";

/// SQL type for a tracked attribute column. Booleans are integers.
pub fn sql_type(ty: ColumnType) -> &'static str {
  match ty {
    ColumnType::Integer => "INTEGER",
    ColumnType::Real => "REAL",
    ColumnType::Text => "TEXT",
    ColumnType::Bool => "INTEGER",
  }
}

fn column_sql(col: &ColumnDef) -> String {
  let null = if col.nullable { "" } else { " NOT NULL" };
  format!("    {} {}{}", col.name, sql_type(col.ty), null)
}

/// `CREATE TABLE` for the current-state side: one row per live entity,
/// carrying the open version's `valid_from` for fast as-of branching.
pub fn create_current_sql(def: &TableDef) -> String {
  let mut cols = vec!["    id TEXT PRIMARY KEY".to_owned()];
  cols.extend(def.columns.iter().map(column_sql));
  cols.push("    valid_from TEXT NOT NULL".to_owned());
  cols.push("    recorded_at TEXT NOT NULL".to_owned());
  format!(
    "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
    current_table(&def.name),
    cols.join(",\n"),
  )
}

/// `CREATE TABLE` for the history side. Append-only: rows are mutated only
/// to set `valid_to` once, and never deleted.
pub fn create_history_sql(def: &TableDef) -> String {
  let mut cols = vec![
    "    hid INTEGER PRIMARY KEY AUTOINCREMENT".to_owned(),
    "    id TEXT NOT NULL".to_owned(),
  ];
  cols.extend(def.columns.iter().map(column_sql));
  cols.push("    valid_from TEXT NOT NULL".to_owned());
  cols.push("    valid_to TEXT".to_owned());
  cols.push("    recorded_at TEXT NOT NULL".to_owned());
  format!(
    "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
    history_table(&def.name),
    cols.join(",\n"),
  )
}

/// Indexes on the history side: the chain index for per-entity reads, and
/// a partial unique index enforcing "at most one open version per entity"
/// in storage itself.
pub fn history_index_sql(name: &str) -> [String; 2] {
  let hist = history_table(name);
  [
    format!(
      "CREATE INDEX IF NOT EXISTS {hist}_chain_idx ON {hist}(id, valid_from)"
    ),
    format!(
      "CREATE UNIQUE INDEX IF NOT EXISTS {hist}_open_idx ON {hist}(id) WHERE valid_to IS NULL"
    ),
  ]
}

/// Expected `(name, sql_type)` pairs for the current side, used by the
/// structural mismatch check.
pub fn expected_current_columns(def: &TableDef) -> Vec<(String, &'static str)> {
  let mut cols = vec![("id".to_owned(), "TEXT")];
  cols.extend(def.columns.iter().map(|c| (c.name.clone(), sql_type(c.ty))));
  cols.push(("valid_from".to_owned(), "TEXT"));
  cols.push(("recorded_at".to_owned(), "TEXT"));
  cols
}

/// Expected `(name, sql_type)` pairs for the history side.
pub fn expected_history_columns(def: &TableDef) -> Vec<(String, &'static str)> {
  let mut cols = vec![("hid".to_owned(), "INTEGER"), ("id".to_owned(), "TEXT")];
  cols.extend(def.columns.iter().map(|c| (c.name.clone(), sql_type(c.ty))));
  cols.push(("valid_from".to_owned(), "TEXT"));
  cols.push(("valid_to".to_owned(), "TEXT"));
  cols.push(("recorded_at".to_owned(), "TEXT"));
  cols
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
  fn current_ddl_shape() {
    let sql = create_current_sql(&items());
    assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS temporal_items"));
    assert!(sql.contains("label TEXT NOT NULL"));
    assert!(sql.contains("qty INTEGER"));
    assert!(sql.contains("valid_from TEXT NOT NULL"));
    assert!(!sql.contains("valid_to"));
  }

  #[test]
  fn history_ddl_shape() {
    let sql = create_history_sql(&items());
    assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS history_items"));
    assert!(sql.contains("hid INTEGER PRIMARY KEY AUTOINCREMENT"));
    assert!(sql.contains("valid_to TEXT"));
  }

  #[test]
  fn open_index_is_partial_unique() {
    let [_, open] = history_index_sql("items");
    assert!(open.contains("UNIQUE"));
    assert!(open.contains("WHERE valid_to IS NULL"));
  }
}
