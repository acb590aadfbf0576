//! StrataDB CLI
//!
//! Command-line operations for StrataDB databases.
//!
//! # Commands
//!
//! - `status` - Show schema version and migration history
//! - `migrate` - Apply pending migrations
//! - `rollback` - Roll back applied migrations
//! - `check-rollback` - Assess a rollback without executing it
//! - `backup` - Write a portable backup file
//! - `restore` - Restore a backup file
//! - `health` - Show manager and backend health
//! - `create-migration` - Scaffold a new migration source file

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strata_core::DatabaseConfig;
use tracing_subscriber::EnvFilter;

/// StrataDB command-line database operations.
#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Backend to operate on (json, sqlite, postgresql)
    #[arg(global = true, short, long)]
    backend: Option<String>,

    /// Connection string: file path for json/sqlite, URL for postgresql
    #[arg(global = true, short, long)]
    connection: Option<String>,

    /// Directory for backup files
    #[arg(global = true, long)]
    backups: Option<PathBuf>,

    /// Directory for migration scaffolds
    #[arg(global = true, long)]
    migrations: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show schema version and migration history
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Apply pending migrations
    Migrate {
        /// List what would run without applying anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Roll back applied migrations
    Rollback {
        /// Number of migrations to undo
        #[arg(short, long, default_value = "1", conflicts_with = "to_version")]
        steps: usize,

        /// Roll back to this schema version (0 undoes everything)
        #[arg(short, long)]
        to_version: Option<u64>,

        /// Proceed even when a rollback destroys data
        #[arg(short, long)]
        yes: bool,
    },

    /// Assess a rollback without executing it
    CheckRollback {
        /// The migration version to assess
        #[arg(long)]
        version: u64,
    },

    /// Write a portable backup file
    Backup {
        /// Output file (defaults to a timestamped file in the backup directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Restore a backup file
    Restore {
        /// The backup file to restore
        #[arg(short, long)]
        input: PathBuf,

        /// Restore even across backend kinds or newer schema versions
        #[arg(short, long)]
        force: bool,
    },

    /// Show manager and backend health
    Health {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Scaffold a new migration source file
    CreateMigration {
        /// Migration name (slugged into the filename)
        name: String,

        /// One-line description for the scaffold
        #[arg(short, long, default_value = "")]
        description: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = build_config(&cli)?;

    match cli.command {
        Commands::Status { format } => commands::status::run(config, &format)?,
        Commands::Migrate { dry_run } => commands::migrate::run(config, dry_run)?,
        Commands::Rollback {
            steps,
            to_version,
            yes,
        } => commands::rollback::run(config, steps, to_version, yes)?,
        Commands::CheckRollback { version } => commands::rollback::check(config, version)?,
        Commands::Backup { output } => commands::backup::create(config, output)?,
        Commands::Restore { input, force } => commands::backup::restore(config, &input, force)?,
        Commands::Health { format } => commands::health::run(config, &format)?,
        Commands::CreateMigration { name, description } => {
            commands::create::run(config, &name, &description)?;
        }
    }

    Ok(())
}

/// Builds the database configuration from the environment, then applies
/// command-line overrides.
fn build_config(cli: &Cli) -> Result<DatabaseConfig, Box<dyn std::error::Error>> {
    let mut config = DatabaseConfig::from_env()?;
    if let Some(backend) = &cli.backend {
        config = config.backend(backend.as_str());
    }
    if let Some(connection) = &cli.connection {
        config = config.connection_string(connection.as_str());
    }
    if let Some(backups) = &cli.backups {
        config = config.backup_path(backups);
    }
    if let Some(migrations) = &cli.migrations {
        config = config.migrations_path(migrations);
    }
    config.validate()?;
    Ok(config)
}
