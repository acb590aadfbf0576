//! # StrataDB Storage
//!
//! Pluggable storage backends for StrataDB.
//!
//! This crate provides the lowest-level storage abstraction for StrataDB.
//! Backends are **key-value record stores**: every value is a JSON object
//! ([`Record`]) stored under a unique string key. The engines differ in
//! durability and transport, not in contract.
//!
//! ## Design Principles
//!
//! - One trait ([`StorageBackend`]) shared by every engine
//! - Explicit lifecycle: construct, `initialize`, use, `close`
//! - Engine errors never escape raw; they surface as [`QueryError`] with
//!   the failing operation and key attached
//! - Every backend fronts reads with a bounded LRU [`RecordCache`]
//! - Must be `Send + Sync`; one instance is driven from one thread at a
//!   time
//!
//! ## Available Backends
//!
//! - [`JsonBackend`] - single JSON file, atomic-rename saves, deep-copy
//!   transactions
//! - [`SqliteBackend`] - embedded SQLite in WAL mode, native transactions
//! - [`PostgresBackend`] - PostgreSQL over a bounded connection pool,
//!   `JSONB` rows
//!
//! ## Example
//!
//! ```rust
//! use strata_storage::{JsonBackend, Record, StorageBackend};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut backend = JsonBackend::new(dir.path().join("data.json"), 128);
//! backend.initialize().unwrap();
//!
//! let mut record = Record::new();
//! record.insert("name".to_string(), "alpha".into());
//! backend.set("items:1", record.clone()).unwrap();
//! assert_eq!(backend.get("items:1").unwrap(), Some(record));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod cache;
mod error;
mod json;
mod postgres;
mod record;
mod sqlite;

pub use backend::{BackendStats, StorageBackend, StorageBackendExt};
pub use cache::{CacheStats, RecordCache};
pub use error::{QueryError, QueryResult, StorageError, StorageResult};
pub use json::JsonBackend;
// `self::` keeps the module from clashing with the `postgres` crate.
pub use self::postgres::PostgresBackend;
pub use record::{Record, Snapshot};
pub use sqlite::SqliteBackend;
