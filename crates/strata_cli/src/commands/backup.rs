//! Backup and restore commands.
//!
//! Both commands go through the manager rather than touching storage
//! files directly, so the backup captures a consistent snapshot and the
//! restore honors backend and schema compatibility checks.

use std::path::{Path, PathBuf};
use strata_core::DatabaseConfig;
use tracing::info;

/// Creates a backup of the configured database.
pub fn create(
    config: DatabaseConfig,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut manager = super::connect_manager(config)?;

    let path = manager.backup_database(output)?;
    let document = manager.backups().load(&path)?;

    println!("✓ Backup created successfully");
    println!("  Path:           {}", path.display());
    println!("  Backend:        {}", document.backend_type);
    println!("  Schema version: {}", document.schema_version);
    println!("  Records:        {}", document.data.len());

    manager.close()?;
    Ok(())
}

/// Restores the configured database from a backup file.
pub fn restore(
    config: DatabaseConfig,
    file: &Path,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!(file = %file.display(), force, "restoring backup");
    let mut manager = super::connect_manager(config)?;

    manager.restore_database(file, force)?;
    println!("✓ Database restored from {}", file.display());
    println!("  Schema version: {}", manager.schema_version()?);

    manager.close()?;
    Ok(())
}
