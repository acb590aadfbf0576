//! Health command implementation.

use strata_core::{DatabaseConfig, HealthStatus};

/// Runs the health command.
pub fn run(config: DatabaseConfig, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut manager = super::connect_manager(config)?;
    let health = manager.health_status()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&health)?),
        _ => print_text(&health),
    }

    manager.close()?;
    Ok(())
}

fn print_text(health: &HealthStatus) {
    println!("StrataDB Health");
    println!("===============");
    println!();
    println!("  State:          {}", health.state);
    if let Some(backend) = &health.backend {
        println!("  Backend:        {backend}");
    }
    if let Some(version) = health.schema_version {
        println!("  Schema version: {version}");
    }
    println!("  Registered:     {}", health.registered_migrations);
    if let Some(applied) = health.applied_migrations {
        println!("  Applied:        {applied}");
    }
    if let Some(pending) = health.pending_migrations {
        println!("  Pending:        {pending}");
    }

    if let Some(stats) = &health.backend_stats {
        println!();
        println!("Backend:");
        if let Some(keys) = stats.key_count {
            println!("  Keys:           {keys}");
        }
        if let Some(size) = stats.size_on_disk {
            println!("  Size on disk:   {size} bytes");
        }
        if let Some(pool) = stats.pool_size {
            let idle = stats.pool_idle.unwrap_or(0);
            println!("  Pool:           {idle}/{pool} idle");
        }
        println!("  In transaction: {}", stats.in_transaction);
        println!(
            "  Cache:          {}/{} entries, {:.1}% hit rate",
            stats.cache.len,
            stats.cache.capacity,
            stats.cache.hit_rate * 100.0
        );
    }
}
