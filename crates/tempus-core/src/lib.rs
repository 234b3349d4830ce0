//! Core types and trait definitions for the Tempus temporal store.
//!
//! This crate is deliberately free of database dependencies. Storage
//! backends and tooling depend on it; it depends on nothing heavier than
//! chrono and serde.

pub mod error;
pub mod interval;
pub mod layout;
pub mod record;
pub mod store;

pub use error::{Error, Result};
