//! Write-lock registries.
//!
//! Change capture serializes writers per entity key; structural changes
//! take the whole table exclusively, which also excludes in-flight
//! change-capture writes on that table. Both acquisitions are bounded — a
//! writer that cannot get its lock in time fails with a timeout error
//! instead of deadlocking.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex as StdMutex},
  time::Duration,
};

use tokio::{
  sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock},
  time::timeout,
};

use crate::{Error, Result};

/// How long a writer waits for its locks before failing with a timeout.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

/// Registry of per-key write mutexes and per-table structural locks.
///
/// Entries are created on first use and never evicted; the maps are
/// bounded by the live key and table cardinality seen by this process.
pub struct LockRegistry {
  wait:   Duration,
  keys:   StdMutex<HashMap<(String, String), Arc<Mutex<()>>>>,
  tables: StdMutex<HashMap<String, Arc<RwLock<()>>>>,
}

/// The locks a change-capture write holds for its read-close-append-write
/// sequence: shared on the table, exclusive on the entity key.
#[derive(Debug)]
pub struct WriteGuard {
  _table: OwnedRwLockReadGuard<()>,
  _key:   OwnedMutexGuard<()>,
}

impl LockRegistry {
  pub fn new(wait: Duration) -> Self {
    Self {
      wait,
      keys: StdMutex::new(HashMap::new()),
      tables: StdMutex::new(HashMap::new()),
    }
  }

  fn key_lock(&self, table: &str, id: &str) -> Arc<Mutex<()>> {
    let mut keys = self.keys.lock().expect("lock registry poisoned");
    keys
      .entry((table.to_owned(), id.to_owned()))
      .or_default()
      .clone()
  }

  fn table_lock(&self, table: &str) -> Arc<RwLock<()>> {
    let mut tables = self.tables.lock().expect("lock registry poisoned");
    tables.entry(table.to_owned()).or_default().clone()
  }

  /// Acquire the locks for a change-capture write on `table`/`id`.
  pub async fn for_write(&self, table: &str, id: &str) -> Result<WriteGuard> {
    let table_lock = self.table_lock(table);
    let shared = timeout(self.wait, table_lock.read_owned())
      .await
      .map_err(|_| Error::TableLockTimeout(table.to_owned()))?;

    let key_lock = self.key_lock(table, id);
    let exclusive =
      timeout(self.wait, key_lock.lock_owned())
        .await
        .map_err(|_| Error::LockTimeout {
          table: table.to_owned(),
          id:    id.to_owned(),
        })?;

    Ok(WriteGuard { _table: shared, _key: exclusive })
  }

  /// Acquire the exclusive table lock for a structural change. Blocks new
  /// change-capture writes on the table and waits out in-flight ones.
  pub async fn for_structure(
    &self,
    table: &str,
  ) -> Result<OwnedRwLockWriteGuard<()>> {
    let table_lock = self.table_lock(table);
    timeout(self.wait, table_lock.write_owned())
      .await
      .map_err(|_| Error::TableLockTimeout(table.to_owned()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn quick() -> LockRegistry {
    LockRegistry::new(Duration::from_millis(20))
  }

  #[tokio::test]
  async fn same_key_waits_and_times_out() {
    let locks = quick();
    let held = locks.for_write("items", "e1").await.unwrap();

    let err = locks.for_write("items", "e1").await.unwrap_err();
    assert!(matches!(err, Error::LockTimeout { .. }));

    drop(held);
    locks.for_write("items", "e1").await.unwrap();
  }

  #[tokio::test]
  async fn different_keys_do_not_contend() {
    let locks = quick();
    let _a = locks.for_write("items", "e1").await.unwrap();
    let _b = locks.for_write("items", "e2").await.unwrap();
  }

  #[tokio::test]
  async fn structural_lock_excludes_writes() {
    let locks = quick();
    let excl = locks.for_structure("items").await.unwrap();

    let err = locks.for_write("items", "e1").await.unwrap_err();
    assert!(matches!(err, Error::TableLockTimeout(_)));

    drop(excl);
    locks.for_write("items", "e1").await.unwrap();
  }

  #[tokio::test]
  async fn write_excludes_structural_lock() {
    let locks = quick();
    let held = locks.for_write("items", "e1").await.unwrap();

    let err = locks.for_structure("items").await.unwrap_err();
    assert!(matches!(err, Error::TableLockTimeout(_)));

    drop(held);
    locks.for_structure("items").await.unwrap();
  }

  #[tokio::test]
  async fn structural_lock_on_other_table_is_independent() {
    let locks = quick();
    let _w = locks.for_write("items", "e1").await.unwrap();
    locks.for_structure("orders").await.unwrap();
  }
}
