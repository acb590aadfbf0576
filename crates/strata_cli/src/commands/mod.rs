//! CLI command implementations.

use strata_core::{DatabaseConfig, DatabaseManager, MigrationReport};

pub mod backup;
pub mod create;
pub mod health;
pub mod migrate;
pub mod rollback;
pub mod status;

/// Builds a manager for the configured database.
///
/// Applications register their compiled-in migration scripts here; the
/// CLI itself ships none, so `migrate` only reports what the store
/// already records.
pub(crate) fn registered_manager(config: DatabaseConfig) -> DatabaseManager {
    DatabaseManager::new(config)
}

/// Opens the configured database and runs pending migrations.
pub(crate) fn open_manager(
    config: DatabaseConfig,
) -> Result<(DatabaseManager, MigrationReport), Box<dyn std::error::Error>> {
    let mut manager = registered_manager(config);
    let report = manager.initialize()?;
    Ok((manager, report))
}

/// Opens the configured database without touching the schema.
///
/// Inspection and recovery commands go through here so that reading
/// status or restoring a backup never applies pending migrations as a
/// side effect.
pub(crate) fn connect_manager(
    config: DatabaseConfig,
) -> Result<DatabaseManager, Box<dyn std::error::Error>> {
    let mut manager = registered_manager(config);
    manager.connect()?;
    Ok(manager)
}
