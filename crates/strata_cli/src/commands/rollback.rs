//! Rollback commands.

use strata_core::{DatabaseConfig, DatabaseManager};
use tracing::info;

/// Rolls back `steps` migrations, or everything newer than `to_version`.
///
/// Destructive rollbacks stop with a warning unless `yes` is set.
pub fn run(
    config: DatabaseConfig,
    steps: usize,
    to_version: Option<u64>,
    yes: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut manager = super::connect_manager(config)?;

    if !yes {
        if let Some(warning) = destructive_warning(&manager, steps, to_version)? {
            println!("⚠ {warning}");
            println!("  Re-run with --yes to proceed anyway.");
            manager.close()?;
            return Ok(());
        }
    }

    let report = match to_version {
        Some(target) => {
            info!(target, "rolling back to version");
            manager.rollback_to_version(target)?
        }
        None => {
            info!(steps, "rolling back");
            manager.rollback_migration(steps)?
        }
    };

    if report.skipped {
        println!("⚠ Another migration run is in progress; nothing was done.");
    } else if report.rolled_back.is_empty() {
        println!("✓ Nothing to roll back.");
    } else {
        println!("✓ Rolled back {} migration(s)", report.rolled_back.len());
        for version in &report.rolled_back {
            println!("  v{version}");
        }
        if let Some(backup) = &report.backup {
            println!("  Safety backup: {}", backup.display());
        }
    }
    println!("  Schema version: {}", report.version);

    manager.close()?;
    Ok(())
}

/// Assesses rolling back `version` without executing anything.
pub fn check(config: DatabaseConfig, version: u64) -> Result<(), Box<dyn std::error::Error>> {
    let manager = super::registered_manager(config);
    let safety = manager.check_rollback_safety(version)?;

    println!("Rollback Safety Check");
    println!("=====================");
    println!("  Version:          v{}", safety.version);
    println!("  Name:             {}", safety.name);
    println!("  Safe:             {}", if safety.safe { "yes" } else { "no" });
    println!(
        "  Data-destructive: {}",
        if safety.data_destructive { "yes" } else { "no" }
    );
    if let Some(warning) = &safety.warning {
        println!();
        println!("⚠ {warning}");
    }

    Ok(())
}

/// Scans the migrations a rollback would undo and reports the
/// destructive ones, if any.
///
/// Versions missing from the registry are passed through silently; the
/// rollback itself rejects them with a precise error.
fn destructive_warning(
    manager: &DatabaseManager,
    steps: usize,
    to_version: Option<u64>,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let history = manager.migration_history()?;
    let affected: Vec<u64> = match to_version {
        Some(target) => history
            .iter()
            .map(|record| record.version)
            .filter(|version| *version > target)
            .collect(),
        None => history
            .iter()
            .rev()
            .take(steps)
            .map(|record| record.version)
            .collect(),
    };

    let mut destructive = Vec::new();
    for version in affected {
        if let Ok(safety) = manager.check_rollback_safety(version) {
            if safety.data_destructive {
                destructive.push(version);
            }
        }
    }

    if destructive.is_empty() {
        return Ok(None);
    }
    let listed = destructive
        .iter()
        .map(|version| format!("v{version}"))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(Some(format!(
        "Rolling back {listed} may cause irrecoverable data loss."
    )))
}
