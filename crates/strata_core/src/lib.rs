//! # StrataDB Core
//!
//! Database management layer for StrataDB: configuration, versioned
//! schema migrations with rollback, backups, and backend lifecycle.
//!
//! This crate sits on top of the pluggable key-value backends in
//! [`strata_storage`] and adds the bookkeeping that makes a raw store
//! operable in production:
//!
//! - Timestamp-versioned migrations with dependency validation
//! - Per-migration transactional application and audited rollback
//! - Automatic safety backups before risky changes
//! - Portable JSON backups that can move data between backends
//! - Health reporting across the manager and its backend
//!
//! ## Example
//!
//! ```rust
//! use strata_core::{DatabaseConfig, DatabaseManager, MigrationScript};
//!
//! let dir = tempfile::TempDir::new().unwrap();
//! let config = DatabaseConfig::new()
//!     .backend("json")
//!     .connection_string(dir.path().join("app.json").display().to_string())
//!     .backup_path(dir.path().join("backups"));
//!
//! let mut manager = DatabaseManager::new(config);
//! manager
//!     .register_migration(
//!         MigrationScript::new("20240101120000", "create_first_user", |backend, _config| {
//!             let mut record = strata_core::Record::new();
//!             record.insert("name".to_string(), serde_json::json!("ada"));
//!             backend.set("users:1", record)?;
//!             Ok(())
//!         })
//!         .unwrap()
//!         .with_down(|backend, _config| {
//!             backend.delete("users:1")?;
//!             Ok(())
//!         }),
//!     )
//!     .unwrap();
//!
//! let report = manager.initialize().unwrap();
//! assert_eq!(report.version, 20240101120000);
//! assert!(manager.backend().unwrap().exists("users:1").unwrap());
//! manager.close().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backup;
mod config;
mod error;
mod manager;
mod migration;

pub use backup::{BackupFile, BackupInfo, BackupManager};
pub use config::DatabaseConfig;
pub use error::{ConfigurationError, DatabaseError, DatabaseResult, MigrationError};
pub use manager::{
    BackendFactory, BackendRegistry, DatabaseManager, HealthStatus, ManagerState, MigrationReport,
    RollbackReport,
};
pub use migration::{
    parse_version, version_from_filename, MigrationFn, MigrationRecord, MigrationRegistry,
    MigrationScript, RollbackRecord, RollbackSafety, MIGRATION_HISTORY_KEY, ROLLBACK_HISTORY_KEY,
    SCHEMA_VERSION_KEY,
};

// The storage types appear throughout this crate's API.
pub use strata_storage::{
    BackendStats, CacheStats, JsonBackend, PostgresBackend, QueryError, Record, Snapshot,
    SqliteBackend, StorageBackend, StorageBackendExt, StorageError,
};
