//! Create-migration command implementation.

use strata_core::DatabaseConfig;

/// Scaffolds a new migration source file.
pub fn run(
    config: DatabaseConfig,
    name: &str,
    description: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = super::registered_manager(config);
    let path = manager.create_migration(name, description)?;

    println!("✓ Migration scaffold written");
    println!("  Path: {}", path.display());
    println!();
    println!("Edit the up and down transforms, then register the script through");
    println!("your application's DatabaseManager before deploying.");
    Ok(())
}
