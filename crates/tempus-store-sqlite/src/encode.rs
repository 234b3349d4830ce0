//! Encoding helpers between Rust domain types and SQLite storage.
//!
//! Timestamps are RFC 3339 UTC with fixed microsecond precision so that
//! string comparison in SQL matches temporal order. Attribute values map
//! onto native SQLite storage classes; booleans are stored as integers and
//! read back through the declared column type.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use tempus_core::{
  interval::ValidityInterval,
  layout::{ColumnDef, ColumnType, TableDef},
  record::{Attributes, Value, Version},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The current instant, truncated to the stored microsecond precision so
/// that a version returned from the write path compares equal to the same
/// version read back later.
pub fn now_micros() -> DateTime<Utc> {
  let now = Utc::now();
  let sub_micro = i64::from(now.timestamp_subsec_nanos() % 1_000);
  now - chrono::Duration::nanoseconds(sub_micro)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Decode(format!("timestamp {s:?}: {e}")))
}

// ─── Values ──────────────────────────────────────────────────────────────────

/// Domain value to the rusqlite value bound into a statement.
pub fn value_to_sql(v: &Value) -> SqlValue {
  match v {
    Value::Null => SqlValue::Null,
    Value::Integer(i) => SqlValue::Integer(*i),
    Value::Real(f) => SqlValue::Real(*f),
    Value::Text(s) => SqlValue::Text(s.clone()),
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
  }
}

/// Read a domain value back out of a result row, guided by the declared
/// column type. Integer-typed storage of a `Real` column is widened, per
/// SQLite affinity rules.
pub fn value_from_sql(col: &ColumnDef, raw: ValueRef<'_>) -> Result<Value> {
  match (col.ty, raw) {
    (_, ValueRef::Null) => Ok(Value::Null),
    (ColumnType::Bool, ValueRef::Integer(i)) => Ok(Value::Bool(i != 0)),
    (ColumnType::Integer, ValueRef::Integer(i)) => Ok(Value::Integer(i)),
    (ColumnType::Real, ValueRef::Real(f)) => Ok(Value::Real(f)),
    (ColumnType::Real, ValueRef::Integer(i)) => Ok(Value::Real(i as f64)),
    (ColumnType::Text, ValueRef::Text(t)) => {
      let s = std::str::from_utf8(t)
        .map_err(|e| Error::Decode(format!("column {}: {e}", col.name)))?;
      Ok(Value::Text(s.to_owned()))
    }
    (ty, raw) => Err(Error::Decode(format!(
      "column {}: storage class {:?} does not fit declared type {ty:?}",
      col.name,
      raw.data_type(),
    ))),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// One row read from either side, before timestamp decoding. Attribute
/// values are decoded per-column at read time; timestamps stay text until
/// [`Self::into_version`].
pub struct RawVersion {
  pub id:          String,
  pub attributes:  Attributes,
  pub valid_from:  String,
  pub valid_to:    Option<String>,
  pub recorded_at: String,
}

impl RawVersion {
  /// Read the attribute columns of `def`, starting at `base` in the row.
  pub fn read_attributes(
    def: &TableDef,
    row: &rusqlite::Row<'_>,
    base: usize,
  ) -> rusqlite::Result<Attributes> {
    let mut attrs = Attributes::new();
    for (i, col) in def.columns.iter().enumerate() {
      let raw = row.get_ref(base + i)?;
      let value = value_from_sql(col, raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
          base + i,
          raw.data_type(),
          Box::new(SqlDecode(e.to_string())),
        )
      })?;
      attrs.insert(col.name.clone(), value);
    }
    Ok(attrs)
  }

  pub fn into_version(self) -> Result<Version> {
    let valid_from = decode_dt(&self.valid_from)?;
    let valid_to = self.valid_to.as_deref().map(decode_dt).transpose()?;
    Ok(Version {
      id:          self.id,
      attributes:  self.attributes,
      interval:    ValidityInterval { valid_from, valid_to },
      recorded_at: decode_dt(&self.recorded_at)?,
    })
  }
}

/// Carrier for decode failures raised inside rusqlite row mapping.
#[derive(Debug)]
struct SqlDecode(String);

impl std::fmt::Display for SqlDecode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

impl std::error::Error for SqlDecode {}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_encode_fixed_width_and_round_trip() {
    let dt = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap();
    let s = encode_dt(dt);
    assert_eq!(s, "2024-03-01T12:30:45.000000Z");
    assert_eq!(decode_dt(&s).unwrap(), dt);
  }

  #[test]
  fn timestamp_text_order_matches_temporal_order() {
    let early = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap();
    let late = early + chrono::Duration::microseconds(1);
    assert!(encode_dt(early) < encode_dt(late));
  }

  #[test]
  fn bool_values_round_trip_through_integers() {
    let col = ColumnDef::new("flag", ColumnType::Bool);
    assert_eq!(value_to_sql(&Value::Bool(true)), SqlValue::Integer(1));
    assert_eq!(
      value_from_sql(&col, ValueRef::Integer(1)).unwrap(),
      Value::Bool(true)
    );
    assert_eq!(
      value_from_sql(&col, ValueRef::Integer(0)).unwrap(),
      Value::Bool(false)
    );
  }

  #[test]
  fn real_column_widens_integer_storage() {
    let col = ColumnDef::new("score", ColumnType::Real);
    assert_eq!(
      value_from_sql(&col, ValueRef::Integer(3)).unwrap(),
      Value::Real(3.0)
    );
  }

  #[test]
  fn mismatched_storage_class_is_a_decode_error() {
    let col = ColumnDef::new("qty", ColumnType::Integer);
    assert!(matches!(
      value_from_sql(&col, ValueRef::Real(1.5)),
      Err(Error::Decode(_))
    ));
  }
}
