//! [`SqliteTemporalStore`] — the SQLite implementation of [`TemporalStore`].
//!
//! The write path is the single choke point for tracked tables: every
//! insert/update/delete runs its current-state mutation and its history
//! append inside one SQLite transaction, under a per-key write lock. The
//! read path composes the two sides in code — SQLite has no view that can
//! express the as-of branching.

use std::{
  collections::BTreeMap,
  path::Path,
  sync::{Arc, RwLock as StdRwLock},
  time::Duration,
};

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, params, params_from_iter};
use rusqlite::types::Value as SqlValue;
use tracing::{debug, info, warn};

use tempus_core::{
  layout::{ColumnDef, Layout, TableDef, current_table, history_table},
  record::{Attributes, Value, Version},
  store::TemporalStore,
};

use crate::{
  Error, Result,
  bootstrap::{Bootstrap, BootstrapState},
  encode::{RawVersion, encode_dt, now_micros, value_to_sql},
  locks::{DEFAULT_LOCK_WAIT, LockRegistry},
  schema,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tempus store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection and registries are
/// reference-counted. All database access serializes through one
/// connection, so a reader can never observe half of a change-capture
/// transaction.
#[derive(Clone)]
pub struct SqliteTemporalStore {
  conn:      tokio_rusqlite::Connection,
  bootstrap: Arc<Bootstrap>,
  locks:     Arc<LockRegistry>,
  tables:    Arc<StdRwLock<BTreeMap<String, Tracked>>>,
}

/// Registry entry for a tracked table. A `fault` is a structural-mismatch
/// detail; while present, writes on the table are refused.
#[derive(Clone)]
struct Tracked {
  def:   TableDef,
  fault: Option<String>,
}

impl SqliteTemporalStore {
  /// Open (or create) a store at `path`. Schemas are not touched until
  /// [`TemporalStore::ensure_schemas`] runs.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Ok(Self::new(tokio_rusqlite::Connection::open(path).await?))
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    Ok(Self::new(tokio_rusqlite::Connection::open_in_memory().await?))
  }

  fn new(conn: tokio_rusqlite::Connection) -> Self {
    Self {
      conn,
      bootstrap: Arc::new(Bootstrap::new()),
      locks: Arc::new(LockRegistry::new(DEFAULT_LOCK_WAIT)),
      tables: Arc::new(StdRwLock::new(BTreeMap::new())),
    }
  }

  /// Replace the bounded lock wait. Call before the store is shared.
  pub fn with_lock_wait(mut self, wait: Duration) -> Self {
    self.locks = Arc::new(LockRegistry::new(wait));
    self
  }

  // ── Registry ──────────────────────────────────────────────────────────

  /// Definition for a write: refuses unknown and quarantined tables.
  fn tracked_for_write(&self, table: &str) -> Result<TableDef> {
    let entry = self.tracked_entry(table)?;
    if let Some(detail) = entry.fault {
      return Err(Error::StructuralMismatch { table: table.to_owned(), detail });
    }
    Ok(entry.def)
  }

  /// Definition regardless of fault state — reads and repairs use this.
  fn tracked_entry(&self, table: &str) -> Result<Tracked> {
    self
      .tables
      .read()
      .expect("table registry poisoned")
      .get(table)
      .cloned()
      .ok_or_else(|| Error::UnknownTable(table.to_owned()))
  }

  fn set_tracked(&self, def: TableDef, fault: Option<String>) {
    self
      .tables
      .write()
      .expect("table registry poisoned")
      .insert(def.name.clone(), Tracked { def, fault });
  }

  /// Record a fault outcome in the registry and surface it as an error.
  fn apply_fault(&self, def: TableDef, fault: Option<String>) -> Result<()> {
    let table = def.name.clone();
    self.set_tracked(def, fault.clone());
    match fault {
      None => Ok(()),
      Some(detail) => {
        warn!(%table, %detail, "structural mismatch; writes blocked");
        Err(Error::StructuralMismatch { table, detail })
      }
    }
  }

  #[cfg(test)]
  pub(crate) async fn execute_raw(&self, sql: &str) -> Result<usize> {
    let sql = sql.to_owned();
    Ok(self.conn.call(move |conn| Ok(conn.execute(&sql, [])?)).await?)
  }
}

// ─── Closure outcomes ────────────────────────────────────────────────────────
// The `conn.call` closures return plain data; domain conditions are mapped
// onto the error enum on the async side.

enum EnsureOutcome {
  Created,
  Verified(Option<String>),
  DefinitionDiffers { registered: TableDef },
}

enum InsertOutcome {
  Written,
  Duplicate,
}

enum UpdateOutcome {
  Written { merged: Attributes },
  NoOp(RawVersion),
  NotFound,
  ZeroWidth { valid_from: String },
  Conflict,
}

enum DeleteOutcome {
  Written(RawVersion),
  NotFound,
  ZeroWidth { valid_from: String },
  Conflict,
}

// ─── SQL helpers ─────────────────────────────────────────────────────────────

/// Attribute column names plus `tail`, comma-joined for a SELECT list.
fn cols_csv(def: &TableDef, tail: &[&str]) -> String {
  let mut cols: Vec<&str> = def.columns.iter().map(|c| c.name.as_str()).collect();
  cols.extend_from_slice(tail);
  cols.join(", ")
}

fn insert_sql(table: &str, def: &TableDef, tail: &[&str]) -> String {
  let mut cols = vec!["id"];
  cols.extend(def.columns.iter().map(|c| c.name.as_str()));
  cols.extend_from_slice(tail);
  let placeholders = vec!["?"; cols.len()].join(", ");
  format!(
    "INSERT INTO {table} ({}) VALUES ({placeholders})",
    cols.join(", "),
  )
}

fn update_current_sql(def: &TableDef) -> String {
  let mut sets: Vec<String> =
    def.columns.iter().map(|c| format!("{} = ?", c.name)).collect();
  sets.push("valid_from = ?".to_owned());
  sets.push("recorded_at = ?".to_owned());
  format!(
    "UPDATE {} SET {} WHERE id = ?",
    current_table(&def.name),
    sets.join(", "),
  )
}

/// Attribute values in definition order; absent keys are null.
fn attr_params(def: &TableDef, attrs: &Attributes) -> Vec<SqlValue> {
  def
    .columns
    .iter()
    .map(|c| value_to_sql(attrs.get(&c.name).unwrap_or(&Value::Null)))
    .collect()
}

/// Every key in `attrs` must name a tracked column.
fn check_columns(def: &TableDef, attrs: &Attributes) -> Result<()> {
  for key in attrs.keys() {
    if def.column(key).is_none() {
      return Err(
        tempus_core::Error::UnknownColumn {
          table:  def.name.clone(),
          column: key.clone(),
        }
        .into(),
      );
    }
  }
  Ok(())
}

// ─── Structural verification ─────────────────────────────────────────────────

/// `(name, declared type)` for every column of `table`, or `None` if the
/// table does not exist.
fn actual_columns(
  conn: &rusqlite::Connection,
  table: &str,
) -> rusqlite::Result<Option<Vec<(String, String)>>> {
  let exists: Option<String> = conn
    .query_row(
      "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
      params![table],
      |r| r.get(0),
    )
    .optional()?;
  if exists.is_none() {
    return Ok(None);
  }

  let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
  let cols = stmt
    .query_map([], |row| {
      Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(Some(cols))
}

/// Describe how one side deviates from its expected column set, if it
/// does. Position is not compared — `ALTER TABLE ADD COLUMN` appends, so
/// a repaired table may order columns differently than a fresh one.
fn diff_side(
  side: &str,
  expected: &[(String, &'static str)],
  actual: Option<&[(String, String)]>,
) -> Option<String> {
  let Some(actual) = actual else {
    return Some(format!("{side} table missing"));
  };

  let mut faults = Vec::new();
  for (name, ty) in expected {
    match actual.iter().find(|(n, _)| n == name) {
      None => faults.push(format!("{side} side missing column {name}")),
      Some((_, actual_ty)) if !actual_ty.eq_ignore_ascii_case(ty) => {
        faults.push(format!(
          "{side} side column {name} is {actual_ty}, expected {ty}"
        ));
      }
      Some(_) => {}
    }
  }
  for (name, _) in actual {
    if !expected.iter().any(|(n, _)| n == name) {
      faults.push(format!("{side} side has unexpected column {name}"));
    }
  }

  if faults.is_empty() { None } else { Some(faults.join("; ")) }
}

/// Compare both sides of `def` against the layout they should have.
fn structure_mismatch(
  conn: &rusqlite::Connection,
  def: &TableDef,
) -> rusqlite::Result<Option<String>> {
  let current = actual_columns(conn, &current_table(&def.name))?;
  let history = actual_columns(conn, &history_table(&def.name))?;

  let mut faults = Vec::new();
  if let Some(d) = diff_side(
    "current",
    &schema::expected_current_columns(def),
    current.as_deref(),
  ) {
    faults.push(d);
  }
  if let Some(d) = diff_side(
    "history",
    &schema::expected_history_columns(def),
    history.as_deref(),
  ) {
    faults.push(d);
  }

  Ok(if faults.is_empty() { None } else { Some(faults.join("; ")) })
}

// ─── TemporalStore impl ──────────────────────────────────────────────────────

impl TemporalStore for SqliteTemporalStore {
  type Error = Error;

  // ── Bootstrap & structure ─────────────────────────────────────────────

  async fn ensure_schemas(&self) -> Result<()> {
    let _serial = self.bootstrap.serial().lock().await;
    match self.bootstrap.state() {
      BootstrapState::Ready => return Ok(()),
      BootstrapState::Failed => {
        return Err(Error::Bootstrap(
          "a previous ensure_schemas attempt failed".to_owned(),
        ));
      }
      _ => {}
    }

    self.bootstrap.begin();
    let result = self
      .conn
      .call(|conn| {
        conn.execute_batch(schema::BOOTSTRAP)?;

        // Reload the catalog and re-verify every registered table, so a
        // mismatch introduced while the process was down is caught now.
        let defs = {
          let mut stmt =
            conn.prepare("SELECT def FROM tempus_catalog ORDER BY position, name")?;
          stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut loaded = Vec::new();
        for json in defs {
          let def: TableDef = serde_json::from_str(&json)
            .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
          let fault = structure_mismatch(conn, &def)?;
          loaded.push((def, fault));
        }
        Ok(loaded)
      })
      .await;

    match result {
      Ok(loaded) => {
        let mut tables = self.tables.write().expect("table registry poisoned");
        for (def, fault) in loaded {
          if let Some(detail) = &fault {
            warn!(table = %def.name, %detail, "structural mismatch; writes blocked");
          }
          tables.insert(def.name.clone(), Tracked { def, fault });
        }
        drop(tables);
        self.bootstrap.finish(true);
        info!("schemas ready");
        Ok(())
      }
      Err(e) => {
        self.bootstrap.finish(false);
        Err(Error::Bootstrap(e.to_string()))
      }
    }
  }

  async fn ensure_table(&self, def: &TableDef) -> Result<()> {
    self.bootstrap.check_ready()?;
    def.validate()?;
    let _excl = self.locks.for_structure(&def.name).await?;

    let def_json = serde_json::to_string(def)?;
    let wanted = def.clone();
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let registered: Option<String> = tx
          .query_row(
            "SELECT def FROM tempus_catalog WHERE name = ?1",
            params![wanted.name],
            |r| r.get(0),
          )
          .optional()?;

        let outcome = match registered {
          None => {
            tx.execute(&schema::create_current_sql(&wanted), [])?;
            tx.execute(&schema::create_history_sql(&wanted), [])?;
            for idx in schema::history_index_sql(&wanted.name) {
              tx.execute(&idx, [])?;
            }
            tx.execute(
              "INSERT INTO tempus_catalog (name, position, def)
               VALUES (?1, (SELECT COALESCE(MAX(position), -1) + 1 FROM tempus_catalog), ?2)",
              params![wanted.name, def_json],
            )?;
            EnsureOutcome::Created
          }
          Some(json) => {
            let registered: TableDef = serde_json::from_str(&json)
              .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
            if registered != wanted {
              EnsureOutcome::DefinitionDiffers { registered }
            } else {
              EnsureOutcome::Verified(structure_mismatch(&tx, &wanted)?)
            }
          }
        };

        tx.commit()?;
        Ok(outcome)
      })
      .await?;

    match outcome {
      EnsureOutcome::Created => {
        debug!(table = %def.name, "tracked table created");
        self.set_tracked(def.clone(), None);
        Ok(())
      }
      EnsureOutcome::Verified(fault) => self.apply_fault(def.clone(), fault),
      EnsureOutcome::DefinitionDiffers { registered } => {
        // The stored sides still agree with the registered definition, so
        // the table stays writable; only the caller's definition is off.
        self.set_tracked(registered, None);
        Err(Error::StructuralMismatch {
          table:  def.name.clone(),
          detail: "given definition differs from the registered one; \
                   apply add_column/drop_column to migrate"
            .to_owned(),
        })
      }
    }
  }

  async fn add_column(&self, table: &str, column: ColumnDef) -> Result<()> {
    self.bootstrap.check_ready()?;
    let entry = self.tracked_entry(table)?;

    let mut new_def = entry.def;
    new_def.columns.push(column.clone());
    new_def.validate()?;
    if !column.nullable {
      return Err(Error::NotNullAddition {
        table:  table.to_owned(),
        column: column.name,
      });
    }

    let _excl = self.locks.for_structure(table).await?;

    let def_json = serde_json::to_string(&new_def)?;
    let def = new_def.clone();
    let col_sql = format!("{} {}", column.name, schema::sql_type(column.ty));
    let fault = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          &format!("ALTER TABLE {} ADD COLUMN {col_sql}", current_table(&def.name)),
          [],
        )?;
        tx.execute(
          &format!("ALTER TABLE {} ADD COLUMN {col_sql}", history_table(&def.name)),
          [],
        )?;
        tx.execute(
          "UPDATE tempus_catalog SET def = ?1 WHERE name = ?2",
          params![def_json, def.name],
        )?;
        let fault = structure_mismatch(&tx, &def)?;
        tx.commit()?;
        Ok(fault)
      })
      .await?;

    debug!(%table, column = %new_def.columns.last().expect("just pushed").name, "column added");
    self.apply_fault(new_def, fault)
  }

  async fn drop_column(&self, table: &str, column: &str) -> Result<()> {
    self.bootstrap.check_ready()?;
    let entry = self.tracked_entry(table)?;
    if entry.def.column(column).is_none() {
      return Err(
        tempus_core::Error::UnknownColumn {
          table:  table.to_owned(),
          column: column.to_owned(),
        }
        .into(),
      );
    }

    let mut new_def = entry.def;
    new_def.columns.retain(|c| c.name != column);

    let _excl = self.locks.for_structure(table).await?;

    let def_json = serde_json::to_string(&new_def)?;
    let def = new_def.clone();
    let col = column.to_owned();
    let fault = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          &format!("ALTER TABLE {} DROP COLUMN {col}", current_table(&def.name)),
          [],
        )?;
        tx.execute(
          &format!("ALTER TABLE {} DROP COLUMN {col}", history_table(&def.name)),
          [],
        )?;
        tx.execute(
          "UPDATE tempus_catalog SET def = ?1 WHERE name = ?2",
          params![def_json, def.name],
        )?;
        let fault = structure_mismatch(&tx, &def)?;
        tx.commit()?;
        Ok(fault)
      })
      .await?;

    debug!(%table, %column, "column dropped");
    self.apply_fault(new_def, fault)
  }

  async fn verify_structure(&self, table: &str) -> Result<()> {
    self.bootstrap.check_ready()?;
    let entry = self.tracked_entry(table)?;

    let def = entry.def.clone();
    let fault = self
      .conn
      .call(move |conn| Ok(structure_mismatch(conn, &def)?))
      .await?;

    self.apply_fault(entry.def, fault)
  }

  async fn export_layout(&self) -> Result<Layout> {
    self.bootstrap.check_ready()?;

    let defs = self
      .conn
      .call(|conn| {
        let mut stmt =
          conn.prepare("SELECT def FROM tempus_catalog ORDER BY position, name")?;
        let defs = stmt
          .query_map([], |row| row.get::<_, String>(0))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(defs)
      })
      .await?;

    let tables = defs
      .iter()
      .map(|json| serde_json::from_str(json))
      .collect::<Result<Vec<TableDef>, _>>()?;
    Ok(Layout { tables })
  }

  async fn apply_layout(&self, layout: &Layout) -> Result<()> {
    for def in &layout.tables {
      self.ensure_table(def).await?;
    }
    Ok(())
  }

  // ── Change capture ────────────────────────────────────────────────────

  async fn insert(
    &self,
    table: &str,
    id: &str,
    attributes: Attributes,
  ) -> Result<Version> {
    self.bootstrap.check_ready()?;
    let def = self.tracked_for_write(table)?;
    check_columns(&def, &attributes)?;

    let _guard = self.locks.for_write(table, id).await?;
    let at = now_micros();
    let at_str = encode_dt(at);

    // The full attribute row: absent columns are null.
    let mut full = Attributes::new();
    for col in &def.columns {
      let value = attributes.get(&col.name).cloned().unwrap_or(Value::Null);
      full.insert(col.name.clone(), value);
    }

    let id_param = id.to_owned();
    let t_param = at_str.clone();
    let def_cl = def.clone();
    let full_cl = full.clone();
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
          .query_row(
            &format!("SELECT 1 FROM {} WHERE id = ?1", current_table(&def_cl.name)),
            params![id_param],
            |r| r.get(0),
          )
          .optional()?;
        if exists.is_some() {
          return Ok(InsertOutcome::Duplicate);
        }

        let attrs = attr_params(&def_cl, &full_cl);

        let mut current_params = vec![SqlValue::Text(id_param.clone())];
        current_params.extend(attrs.iter().cloned());
        current_params.push(SqlValue::Text(t_param.clone()));
        current_params.push(SqlValue::Text(t_param.clone()));
        tx.execute(
          &insert_sql(
            &current_table(&def_cl.name),
            &def_cl,
            &["valid_from", "recorded_at"],
          ),
          params_from_iter(current_params),
        )?;

        let mut history_params = vec![SqlValue::Text(id_param.clone())];
        history_params.extend(attrs);
        history_params.push(SqlValue::Text(t_param.clone()));
        history_params.push(SqlValue::Null);
        history_params.push(SqlValue::Text(t_param));
        tx.execute(
          &insert_sql(
            &history_table(&def_cl.name),
            &def_cl,
            &["valid_from", "valid_to", "recorded_at"],
          ),
          params_from_iter(history_params),
        )?;

        tx.commit()?;
        Ok(InsertOutcome::Written)
      })
      .await?;

    match outcome {
      InsertOutcome::Duplicate => Err(Error::DuplicateEntity {
        table: table.to_owned(),
        id:    id.to_owned(),
      }),
      InsertOutcome::Written => {
        debug!(%table, %id, "entity inserted");
        Ok(Version {
          id: id.to_owned(),
          attributes: full,
          interval: tempus_core::interval::ValidityInterval::open(at),
          recorded_at: at,
        })
      }
    }
  }

  async fn update(
    &self,
    table: &str,
    id: &str,
    attributes: Attributes,
  ) -> Result<Version> {
    self.bootstrap.check_ready()?;
    let def = self.tracked_for_write(table)?;
    check_columns(&def, &attributes)?;

    let _guard = self.locks.for_write(table, id).await?;
    let at = now_micros();
    let at_str = encode_dt(at);

    let id_param = id.to_owned();
    let t_param = at_str.clone();
    let def_cl = def.clone();
    let overlay = attributes;
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let n_attrs = def_cl.columns.len();

        let row = tx
          .query_row(
            &format!(
              "SELECT {} FROM {} WHERE id = ?1",
              cols_csv(&def_cl, &["valid_from", "recorded_at"]),
              current_table(&def_cl.name),
            ),
            params![id_param],
            |row| {
              let attrs = RawVersion::read_attributes(&def_cl, row, 0)?;
              let valid_from: String = row.get(n_attrs)?;
              let recorded_at: String = row.get(n_attrs + 1)?;
              Ok((attrs, valid_from, recorded_at))
            },
          )
          .optional()?;
        let Some((old_attrs, valid_from, recorded_at)) = row else {
          return Ok(UpdateOutcome::NotFound);
        };

        let mut merged = old_attrs.clone();
        for (key, value) in &overlay {
          merged.insert(key.clone(), value.clone());
        }
        if merged == old_attrs {
          // Nothing actually changed; fabricating a version here would
          // record a change that never happened.
          return Ok(UpdateOutcome::NoOp(RawVersion {
            id: id_param,
            attributes: old_attrs,
            valid_from,
            valid_to: None,
            recorded_at,
          }));
        }

        if t_param.as_str() <= valid_from.as_str() {
          return Ok(UpdateOutcome::ZeroWidth { valid_from });
        }

        let closed = tx.execute(
          &format!(
            "UPDATE {} SET valid_to = ?1 WHERE id = ?2 AND valid_to IS NULL",
            history_table(&def_cl.name),
          ),
          params![t_param, id_param],
        )?;
        if closed == 0 {
          // The open version vanished between our read and our close:
          // another writer got there first.
          return Ok(UpdateOutcome::Conflict);
        }

        let attrs = attr_params(&def_cl, &merged);

        let mut history_params = vec![SqlValue::Text(id_param.clone())];
        history_params.extend(attrs.iter().cloned());
        history_params.push(SqlValue::Text(t_param.clone()));
        history_params.push(SqlValue::Null);
        history_params.push(SqlValue::Text(t_param.clone()));
        tx.execute(
          &insert_sql(
            &history_table(&def_cl.name),
            &def_cl,
            &["valid_from", "valid_to", "recorded_at"],
          ),
          params_from_iter(history_params),
        )?;

        let mut current_params = attrs;
        current_params.push(SqlValue::Text(t_param.clone()));
        current_params.push(SqlValue::Text(t_param));
        current_params.push(SqlValue::Text(id_param));
        tx.execute(&update_current_sql(&def_cl), params_from_iter(current_params))?;

        tx.commit()?;
        Ok(UpdateOutcome::Written { merged })
      })
      .await?;

    match outcome {
      UpdateOutcome::NotFound => Err(Error::EntityNotFound {
        table: table.to_owned(),
        id:    id.to_owned(),
      }),
      UpdateOutcome::NoOp(raw) => raw.into_version(),
      UpdateOutcome::ZeroWidth { valid_from } => Err(Error::ZeroWidthInterval {
        table:      table.to_owned(),
        id:         id.to_owned(),
        valid_from: crate::encode::decode_dt(&valid_from)?,
        at,
      }),
      UpdateOutcome::Conflict => Err(Error::ConcurrentModification {
        table: table.to_owned(),
        id:    id.to_owned(),
      }),
      UpdateOutcome::Written { merged } => {
        debug!(%table, %id, "entity updated");
        Ok(Version {
          id: id.to_owned(),
          attributes: merged,
          interval: tempus_core::interval::ValidityInterval::open(at),
          recorded_at: at,
        })
      }
    }
  }

  async fn delete(&self, table: &str, id: &str) -> Result<Version> {
    self.bootstrap.check_ready()?;
    let def = self.tracked_for_write(table)?;

    let _guard = self.locks.for_write(table, id).await?;
    let at = now_micros();
    let at_str = encode_dt(at);

    let id_param = id.to_owned();
    let t_param = at_str.clone();
    let def_cl = def.clone();
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let n_attrs = def_cl.columns.len();

        let row = tx
          .query_row(
            &format!(
              "SELECT {} FROM {} WHERE id = ?1",
              cols_csv(&def_cl, &["valid_from", "recorded_at"]),
              current_table(&def_cl.name),
            ),
            params![id_param],
            |row| {
              let attrs = RawVersion::read_attributes(&def_cl, row, 0)?;
              let valid_from: String = row.get(n_attrs)?;
              let recorded_at: String = row.get(n_attrs + 1)?;
              Ok((attrs, valid_from, recorded_at))
            },
          )
          .optional()?;
        let Some((attrs, valid_from, recorded_at)) = row else {
          return Ok(DeleteOutcome::NotFound);
        };

        if t_param.as_str() <= valid_from.as_str() {
          return Ok(DeleteOutcome::ZeroWidth { valid_from });
        }

        let closed = tx.execute(
          &format!(
            "UPDATE {} SET valid_to = ?1 WHERE id = ?2 AND valid_to IS NULL",
            history_table(&def_cl.name),
          ),
          params![t_param, id_param],
        )?;
        if closed == 0 {
          return Ok(DeleteOutcome::Conflict);
        }

        tx.execute(
          &format!("DELETE FROM {} WHERE id = ?1", current_table(&def_cl.name)),
          params![id_param],
        )?;

        tx.commit()?;
        Ok(DeleteOutcome::Written(RawVersion {
          id: id_param,
          attributes: attrs,
          valid_from,
          valid_to: Some(t_param),
          recorded_at,
        }))
      })
      .await?;

    match outcome {
      DeleteOutcome::NotFound => Err(Error::EntityNotFound {
        table: table.to_owned(),
        id:    id.to_owned(),
      }),
      DeleteOutcome::ZeroWidth { valid_from } => Err(Error::ZeroWidthInterval {
        table:      table.to_owned(),
        id:         id.to_owned(),
        valid_from: crate::encode::decode_dt(&valid_from)?,
        at,
      }),
      DeleteOutcome::Conflict => Err(Error::ConcurrentModification {
        table: table.to_owned(),
        id:    id.to_owned(),
      }),
      DeleteOutcome::Written(raw) => {
        debug!(%table, %id, "entity deleted");
        raw.into_version()
      }
    }
  }

  // ── Temporal view ─────────────────────────────────────────────────────

  async fn get_current(&self, table: &str, id: &str) -> Result<Option<Version>> {
    self.bootstrap.check_ready()?;
    let def = self.tracked_entry(table)?.def;

    let id_param = id.to_owned();
    let def_cl = def.clone();
    let raw = self
      .conn
      .call(move |conn| {
        let n_attrs = def_cl.columns.len();
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT id, {} FROM {} WHERE id = ?1",
                cols_csv(&def_cl, &["valid_from", "recorded_at"]),
                current_table(&def_cl.name),
              ),
              params![id_param],
              |row| {
                Ok(RawVersion {
                  id:          row.get(0)?,
                  attributes:  RawVersion::read_attributes(&def_cl, row, 1)?,
                  valid_from:  row.get(1 + n_attrs)?,
                  valid_to:    None,
                  recorded_at: row.get(2 + n_attrs)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawVersion::into_version).transpose()
  }

  async fn current(&self, table: &str) -> Result<Vec<Version>> {
    self.bootstrap.check_ready()?;
    let def = self.tracked_entry(table)?.def;

    let def_cl = def.clone();
    let raws = self
      .conn
      .call(move |conn| {
        let n_attrs = def_cl.columns.len();
        let mut stmt = conn.prepare(&format!(
          "SELECT id, {} FROM {} ORDER BY id",
          cols_csv(&def_cl, &["valid_from", "recorded_at"]),
          current_table(&def_cl.name),
        ))?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawVersion {
              id:          row.get(0)?,
              attributes:  RawVersion::read_attributes(&def_cl, row, 1)?,
              valid_from:  row.get(1 + n_attrs)?,
              valid_to:    None,
              recorded_at: row.get(2 + n_attrs)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawVersion::into_version).collect()
  }

  async fn get_as_of(
    &self,
    table: &str,
    id: &str,
    at: DateTime<Utc>,
  ) -> Result<Option<Version>> {
    self.bootstrap.check_ready()?;
    let def = self.tracked_entry(table)?.def;

    let id_param = id.to_owned();
    let t_param = encode_dt(at);
    let def_cl = def.clone();
    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let n_attrs = def_cl.columns.len();

        // Fast path: the entity is live and its open version covers `at`.
        let live = tx
          .query_row(
            &format!(
              "SELECT id, {} FROM {} WHERE id = ?1 AND valid_from <= ?2",
              cols_csv(&def_cl, &["valid_from", "recorded_at"]),
              current_table(&def_cl.name),
            ),
            params![id_param, t_param],
            |row| {
              Ok(RawVersion {
                id:          row.get(0)?,
                attributes:  RawVersion::read_attributes(&def_cl, row, 1)?,
                valid_from:  row.get(1 + n_attrs)?,
                valid_to:    None,
                recorded_at: row.get(2 + n_attrs)?,
              })
            },
          )
          .optional()?;
        if live.is_some() {
          return Ok(live);
        }

        // Otherwise a closed version may contain `at`.
        Ok(
          tx.query_row(
              &format!(
                "SELECT id, {} FROM {}
                 WHERE id = ?1 AND valid_from <= ?2
                   AND valid_to IS NOT NULL AND valid_to > ?2",
                cols_csv(&def_cl, &["valid_from", "valid_to", "recorded_at"]),
                history_table(&def_cl.name),
              ),
              params![id_param, t_param],
              |row| {
                Ok(RawVersion {
                  id:          row.get(0)?,
                  attributes:  RawVersion::read_attributes(&def_cl, row, 1)?,
                  valid_from:  row.get(1 + n_attrs)?,
                  valid_to:    row.get(2 + n_attrs)?,
                  recorded_at: row.get(3 + n_attrs)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawVersion::into_version).transpose()
  }

  async fn as_of(&self, table: &str, at: DateTime<Utc>) -> Result<Vec<Version>> {
    self.bootstrap.check_ready()?;
    let def = self.tracked_entry(table)?.def;

    let t_param = encode_dt(at);
    let def_cl = def.clone();
    let raws = self
      .conn
      .call(move |conn| {
        // One transaction, one logical instant: both legs see the same
        // database state.
        let tx = conn.transaction()?;
        let n_attrs = def_cl.columns.len();
        let mut rows = Vec::new();

        // Live entities whose open version contains `at`.
        let mut stmt = tx.prepare(&format!(
          "SELECT id, {} FROM {} WHERE valid_from <= ?1",
          cols_csv(&def_cl, &["valid_from", "recorded_at"]),
          current_table(&def_cl.name),
        ))?;
        let live = stmt
          .query_map(params![t_param], |row| {
            Ok(RawVersion {
              id:          row.get(0)?,
              attributes:  RawVersion::read_attributes(&def_cl, row, 1)?,
              valid_from:  row.get(1 + n_attrs)?,
              valid_to:    None,
              recorded_at: row.get(2 + n_attrs)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.extend(live);

        // Closed versions containing `at` — entities since deleted, or
        // updated after `at`. The two legs cannot both match one entity:
        // its intervals do not overlap.
        let mut stmt = tx.prepare(&format!(
          "SELECT id, {} FROM {}
           WHERE valid_from <= ?1 AND valid_to IS NOT NULL AND valid_to > ?1",
          cols_csv(&def_cl, &["valid_from", "valid_to", "recorded_at"]),
          history_table(&def_cl.name),
        ))?;
        let closed = stmt
          .query_map(params![t_param], |row| {
            Ok(RawVersion {
              id:          row.get(0)?,
              attributes:  RawVersion::read_attributes(&def_cl, row, 1)?,
              valid_from:  row.get(1 + n_attrs)?,
              valid_to:    row.get(2 + n_attrs)?,
              recorded_at: row.get(3 + n_attrs)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.extend(closed);

        Ok(rows)
      })
      .await?;

    let mut versions = raws
      .into_iter()
      .map(RawVersion::into_version)
      .collect::<Result<Vec<_>>>()?;
    versions.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(versions)
  }

  async fn history_of(&self, table: &str, id: &str) -> Result<Vec<Version>> {
    self.bootstrap.check_ready()?;
    let def = self.tracked_entry(table)?.def;

    let id_param = id.to_owned();
    let def_cl = def.clone();
    let raws = self
      .conn
      .call(move |conn| {
        let n_attrs = def_cl.columns.len();
        let mut stmt = conn.prepare(&format!(
          "SELECT id, {} FROM {} WHERE id = ?1 ORDER BY valid_from",
          cols_csv(&def_cl, &["valid_from", "valid_to", "recorded_at"]),
          history_table(&def_cl.name),
        ))?;
        let rows = stmt
          .query_map(params![id_param], |row| {
            Ok(RawVersion {
              id:          row.get(0)?,
              attributes:  RawVersion::read_attributes(&def_cl, row, 1)?,
              valid_from:  row.get(1 + n_attrs)?,
              valid_to:    row.get(2 + n_attrs)?,
              recorded_at: row.get(3 + n_attrs)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawVersion::into_version).collect()
  }

  async fn timeline(&self, table: &str, id: &str) -> Result<Vec<DateTime<Utc>>> {
    self.bootstrap.check_ready()?;
    let def = self.tracked_entry(table)?.def;

    let id_param = id.to_owned();
    let hist = history_table(&def.name);
    let bounds = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT valid_from, valid_to FROM {hist} WHERE id = ?1 ORDER BY valid_from",
        ))?;
        let rows = stmt
          .query_map(params![id_param], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut instants = Vec::with_capacity(bounds.len() + 1);
    for (i, (from, to)) in bounds.iter().enumerate() {
      instants.push(crate::encode::decode_dt(from)?);
      if let Some(to) = to {
        // A close that no successor starts at is a deletion — either the
        // end of the chain or a gap before a re-creation.
        let next_from = bounds.get(i + 1).map(|(f, _)| f.as_str());
        if next_from != Some(to.as_str()) {
          instants.push(crate::encode::decode_dt(to)?);
        }
      }
    }
    Ok(instants)
  }
}
