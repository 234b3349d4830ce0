//! SQLite backend for the Tempus temporal store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. SQLite has no schema
//! namespaces, so the dual-schema layout is realised as the table-name
//! prefixes from [`tempus_core::layout`]: `temporal_<name>` holds current
//! state, `history_<name>` the append-only version chain.

mod bootstrap;
mod encode;
mod locks;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteTemporalStore;
