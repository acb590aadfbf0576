//! Status command implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use strata_core::DatabaseConfig;

/// Migration status summary.
#[derive(Debug, Serialize)]
pub struct StatusResult {
    /// Active backend kind.
    pub backend: String,
    /// Current schema version.
    pub schema_version: u64,
    /// Applied migrations, oldest first.
    pub applied: Vec<AppliedEntry>,
    /// Rollback audit entries, oldest first.
    pub rollbacks: Vec<RollbackEntry>,
}

/// One applied migration.
#[derive(Debug, Serialize)]
pub struct AppliedEntry {
    /// The migration version.
    pub version: u64,
    /// The migration name.
    pub name: String,
    /// When it was applied.
    pub applied_at: DateTime<Utc>,
}

/// One rollback audit entry.
#[derive(Debug, Serialize)]
pub struct RollbackEntry {
    /// The rolled-back version.
    pub version: u64,
    /// The migration name.
    pub name: String,
    /// When the rollback ran.
    pub rolled_back_at: DateTime<Utc>,
}

/// Runs the status command.
pub fn run(config: DatabaseConfig, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut manager = super::connect_manager(config)?;

    let result = StatusResult {
        backend: manager.backend()?.kind().to_string(),
        schema_version: manager.schema_version()?,
        applied: manager
            .migration_history()?
            .into_iter()
            .map(|record| AppliedEntry {
                version: record.version,
                name: record.name,
                applied_at: record.applied_at,
            })
            .collect(),
        rollbacks: manager
            .rollback_history()?
            .into_iter()
            .map(|record| RollbackEntry {
                version: record.version,
                name: record.name,
                rolled_back_at: record.rolled_back_at,
            })
            .collect(),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text(&result),
    }

    manager.close()?;
    Ok(())
}

fn print_text(result: &StatusResult) {
    println!("StrataDB Migration Status");
    println!("=========================");
    println!();
    println!("  Backend:        {}", result.backend);
    println!("  Schema version: {}", result.schema_version);
    println!("  Applied:        {}", result.applied.len());

    if !result.applied.is_empty() {
        println!();
        println!("Applied Migrations:");
        for entry in &result.applied {
            println!(
                "  v{}: {} (applied at {})",
                entry.version,
                entry.name,
                entry.applied_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }

    if !result.rollbacks.is_empty() {
        println!();
        println!("Rollback History:");
        for entry in &result.rollbacks {
            println!(
                "  v{}: {} (rolled back at {})",
                entry.version,
                entry.name,
                entry.rolled_back_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }
}
