//! # classpet-store
//!
//! Durable per-device cache for the ClassPet sync engine, backed by SQLite.
//!
//! The primitive is a JSON key/value table (`get_json` / `set_json` /
//! `remove`).  Every collection the engine works with (students, pets, the
//! praise and emotion logs, notices, the offline queue, the current class
//! scope) is a thin typed wrapper over one namespaced key, so replacing a
//! collection is always a single `set`.

pub mod cache;
pub mod database;
pub mod emotions;
pub mod migrations;
pub mod models;
pub mod notices;
pub mod notifications;
pub mod pets;
pub mod praise;
pub mod queue;
pub mod scope;
pub mod settings;
pub mod students;
pub mod tombstones;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
