//! Migrate command implementation.

use strata_core::DatabaseConfig;
use tracing::info;

/// Applies every pending migration and reports the outcome.
///
/// With `dry_run` set, lists what would run without touching the store.
pub fn run(config: DatabaseConfig, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    if dry_run {
        return preview(config);
    }

    info!(backend = config.backend.as_str(), "running migrations");
    let (mut manager, report) = super::open_manager(config)?;

    if report.applied.is_empty() {
        println!("✓ No pending migrations to run.");
    } else {
        println!("✓ Applied {} migration(s)", report.applied.len());
        for version in &report.applied {
            println!("  v{version}");
        }
        for backup in &report.backups {
            println!("  Safety backup: {}", backup.display());
        }
    }
    println!("  Schema version: {}", report.version);

    manager.close()?;
    Ok(())
}

fn preview(config: DatabaseConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut manager = super::connect_manager(config)?;
    let current = manager.schema_version()?;
    let pending = manager.migrations().pending_after(current);

    if pending.is_empty() {
        println!("✓ No pending migrations to run.");
    } else {
        println!("Would apply {} migration(s):", pending.len());
        for version in pending {
            let name = manager
                .migrations()
                .get(version)
                .map_or("?", |script| script.name());
            println!("  v{version} {name}");
        }
    }
    println!("  Schema version: {current}");

    manager.close()?;
    Ok(())
}
