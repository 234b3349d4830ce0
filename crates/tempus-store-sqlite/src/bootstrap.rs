//! Bootstrap state machine.
//!
//! `ensure_schemas` must complete before any schema-affecting or
//! change-capture operation runs. The state is explicit rather than a
//! call-order convention: every dependent operation checks it, and a
//! failed bootstrap stays failed for the life of the process.

use std::sync::RwLock;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
  Uninitialized,
  Ensuring,
  Ready,
  Failed,
}

pub struct Bootstrap {
  state:  RwLock<BootstrapState>,
  /// Serializes concurrent `ensure_schemas` callers.
  serial: tokio::sync::Mutex<()>,
}

impl Bootstrap {
  pub fn new() -> Self {
    Self {
      state:  RwLock::new(BootstrapState::Uninitialized),
      serial: tokio::sync::Mutex::new(()),
    }
  }

  pub fn state(&self) -> BootstrapState {
    *self.state.read().expect("bootstrap state poisoned")
  }

  pub fn serial(&self) -> &tokio::sync::Mutex<()> { &self.serial }

  pub fn begin(&self) {
    *self.state.write().expect("bootstrap state poisoned") =
      BootstrapState::Ensuring;
  }

  pub fn finish(&self, ok: bool) {
    *self.state.write().expect("bootstrap state poisoned") = if ok {
      BootstrapState::Ready
    } else {
      BootstrapState::Failed
    };
  }

  /// Err unless bootstrap has completed successfully.
  pub fn check_ready(&self) -> Result<()> {
    match self.state() {
      BootstrapState::Ready => Ok(()),
      BootstrapState::Failed => Err(Error::Bootstrap(
        "a previous ensure_schemas attempt failed".to_owned(),
      )),
      BootstrapState::Uninitialized | BootstrapState::Ensuring => {
        Err(Error::NotReady)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn not_ready_until_finished() {
    let b = Bootstrap::new();
    assert!(matches!(b.check_ready(), Err(Error::NotReady)));

    b.begin();
    assert!(matches!(b.check_ready(), Err(Error::NotReady)));

    b.finish(true);
    assert!(b.check_ready().is_ok());
  }

  #[test]
  fn failure_is_sticky() {
    let b = Bootstrap::new();
    b.begin();
    b.finish(false);
    assert_eq!(b.state(), BootstrapState::Failed);
    assert!(matches!(b.check_ready(), Err(Error::Bootstrap(_))));
  }
}
