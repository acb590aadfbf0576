//! Error types for the database layer.

use strata_storage::{QueryError, StorageError};
use thiserror::Error;

/// Result type for database manager operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The configured backend name has no registered factory.
    #[error("unsupported backend type `{backend}`")]
    UnsupportedBackend {
        /// The unrecognized backend name.
        backend: String,
    },

    /// A configuration value could not be parsed.
    #[error("invalid value `{value}` for {key}: {message}")]
    InvalidValue {
        /// The configuration key or environment variable.
        key: &'static str,
        /// The offending value.
        value: String,
        /// Why the value was rejected.
        message: String,
    },

    /// The configuration is structurally invalid.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigurationError {
    /// Creates an unsupported-backend error.
    pub fn unsupported_backend(backend: impl Into<String>) -> Self {
        Self::UnsupportedBackend {
            backend: backend.into(),
        }
    }

    /// Creates an invalid-value error for a configuration key.
    pub fn invalid_value(
        key: &'static str,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            key,
            value: value.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while registering, applying, or rolling back migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A version string was not in an accepted format.
    #[error(
        "invalid migration version `{input}`: expected 14 digits or an \
         8+6 digit pair joined by `.` or `_`"
    )]
    InvalidVersion {
        /// The rejected version text.
        input: String,
    },

    /// Two migrations resolved to the same version.
    #[error("duplicate migration version {version}: `{existing}` and `{incoming}`")]
    DuplicateVersion {
        /// The colliding version.
        version: u64,
        /// Name already registered under the version.
        existing: String,
        /// Name of the rejected migration.
        incoming: String,
    },

    /// No registered migration carries the version.
    #[error("no registered migration matches version {version}")]
    UnknownVersion {
        /// The missing version.
        version: u64,
    },

    /// The rollback target is neither 0 nor an applied version.
    #[error("rollback target {target} is not an applied migration version")]
    TargetNotFound {
        /// The requested target version.
        target: u64,
    },

    /// A migration declared a dependency that is not in history.
    #[error(
        "migration {version} `{name}` depends on {dependency}, \
         which has not been applied"
    )]
    UnmetDependency {
        /// Version of the migration being applied.
        version: u64,
        /// Name of the migration being applied.
        name: String,
        /// The dependency version missing from history.
        dependency: u64,
    },

    /// Rollback needs a down transform the migration does not define.
    #[error("migration {version} `{name}` has no down transform and cannot be rolled back")]
    MissingDown {
        /// Version of the migration.
        version: u64,
        /// Name of the migration.
        name: String,
    },

    /// A migration's up or down transform failed.
    #[error("migration {version} `{name}` failed during {phase}: {source}")]
    Execution {
        /// Version of the failing migration.
        version: u64,
        /// Name of the failing migration.
        name: String,
        /// Which transform failed ("up" or "down").
        phase: &'static str,
        /// The underlying failure.
        #[source]
        source: Box<MigrationError>,
    },

    /// A storage query inside a migration failed.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// A migration aborted with its own message.
    #[error("{0}")]
    Aborted(String),
}

impl MigrationError {
    /// Wraps a transform failure with the migration's identity.
    pub fn execution(
        version: u64,
        name: impl Into<String>,
        phase: &'static str,
        source: MigrationError,
    ) -> Self {
        Self::Execution {
            version,
            name: name.into(),
            phase,
            source: Box::new(source),
        }
    }

    /// Creates an error for a migration aborting on its own terms, such as
    /// a precondition over the stored data failing.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted(message.into())
    }
}

/// Umbrella error for database manager operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Configuration loading or validation failed.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// A backend lifecycle operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A CRUD operation against the live backend failed.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// A migration or rollback failed.
    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),

    /// The manager has not been initialized.
    #[error("database manager is not initialized")]
    NotInitialized,

    /// The manager has been closed.
    #[error("database manager is closed")]
    Closed,

    /// Creating or loading a backup failed.
    #[error("backup failed: {0}")]
    Backup(String),

    /// Restoring from a backup failed or was refused.
    #[error("restore failed: {0}")]
    Restore(String),
}

impl DatabaseError {
    /// Creates a backup failure with context.
    pub fn backup(message: impl Into<String>) -> Self {
        Self::Backup(message.into())
    }

    /// Creates a restore failure with context.
    pub fn restore(message: impl Into<String>) -> Self {
        Self::Restore(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmet_dependency_names_both_versions() {
        let err = MigrationError::UnmetDependency {
            version: 20240102120000,
            name: "add_orders".to_string(),
            dependency: 20240101120000,
        };
        let text = err.to_string();
        assert!(text.contains("20240102120000"));
        assert!(text.contains("20240101120000"));
        assert!(text.contains("add_orders"));
    }

    #[test]
    fn execution_preserves_source() {
        let inner = MigrationError::aborted("bad data");
        let err = MigrationError::execution(1, "m", "up", inner);
        let source = std::error::Error::source(&err);
        assert!(source.is_some());
        assert!(err.to_string().contains("up"));
    }

    #[test]
    fn storage_error_converts_to_database_error() {
        let err = DatabaseError::from(StorageError::NotInitialized);
        assert!(matches!(err, DatabaseError::Storage(_)));
    }
}
