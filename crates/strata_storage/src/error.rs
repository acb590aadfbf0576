//! Error types for storage backends.

use std::io;
use thiserror::Error;

/// Result type for backend lifecycle operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised while constructing, opening, persisting, or closing a
/// storage backend.
///
/// Engine-level failures (I/O, SQLite, PostgreSQL, pool exhaustion) convert
/// into this type at the backend boundary via `From`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// SQLite engine error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL engine error.
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Backend initialization failed.
    #[error("failed to initialize {backend} backend: {message}")]
    InitFailed {
        /// Name of the backend that failed.
        backend: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// The backend has not been initialized.
    #[error("backend is not initialized")]
    NotInitialized,

    /// The backend has been closed.
    #[error("backend is closed")]
    Closed,

    /// Another process holds the storage lock.
    #[error("storage locked: another process has exclusive access to {path}")]
    Locked {
        /// Path to the lock file.
        path: String,
    },

    /// A transaction is already active on this backend instance.
    #[error("a transaction is already active")]
    TransactionActive,

    /// No transaction is active.
    #[error("no active transaction")]
    NoTransaction,

    /// The persisted data is corrupted or has an unexpected shape.
    #[error("storage corrupted: {0}")]
    Corrupted(String),
}

impl StorageError {
    /// Creates an initialization failure error.
    pub fn init_failed(backend: &'static str, message: impl Into<String>) -> Self {
        Self::InitFailed {
            backend,
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}

/// Result type for CRUD operations against a live backend.
pub type QueryResult<T> = Result<T, QueryError>;

/// A CRUD or transaction-control failure, re-raised with the operation and
/// (where applicable) the key that was being accessed.
///
/// Backends never let raw engine errors escape their CRUD surface; they wrap
/// them here so callers always see which operation failed and on what.
#[derive(Debug, Error)]
pub enum QueryError {
    /// A single-key operation failed.
    #[error("`{operation}` failed for key `{key}`: {source}")]
    Key {
        /// The operation that failed (`get`, `set`, `delete`, ...).
        operation: &'static str,
        /// The key being accessed.
        key: String,
        /// The underlying engine failure.
        #[source]
        source: StorageError,
    },

    /// A whole-store operation failed.
    #[error("`{operation}` failed: {source}")]
    Store {
        /// The operation that failed (`list_keys`, `clear`, `export`, ...).
        operation: &'static str,
        /// The underlying engine failure.
        #[source]
        source: StorageError,
    },

    /// Transaction control (begin/commit/rollback) failed.
    #[error("transaction `{action}` failed: {source}")]
    Transaction {
        /// The transaction action that failed.
        action: &'static str,
        /// The underlying engine failure.
        #[source]
        source: StorageError,
    },
}

impl QueryError {
    /// Wraps an engine failure for a single-key operation.
    pub fn key(operation: &'static str, key: impl Into<String>, source: impl Into<StorageError>) -> Self {
        Self::Key {
            operation,
            key: key.into(),
            source: source.into(),
        }
    }

    /// Wraps an engine failure for a whole-store operation.
    pub fn store(operation: &'static str, source: impl Into<StorageError>) -> Self {
        Self::Store {
            operation,
            source: source.into(),
        }
    }

    /// Wraps an engine failure for a transaction-control action.
    pub fn transaction(action: &'static str, source: impl Into<StorageError>) -> Self {
        Self::Transaction {
            action,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_error_names_operation_and_key() {
        let err = QueryError::key("get", "users:1", StorageError::NotInitialized);
        let text = err.to_string();
        assert!(text.contains("get"));
        assert!(text.contains("users:1"));
    }

    #[test]
    fn io_error_converts() {
        let io = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = StorageError::from(io);
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[test]
    fn init_failed_display() {
        let err = StorageError::init_failed("json", "directory missing");
        assert!(err.to_string().contains("json"));
        assert!(err.to_string().contains("directory missing"));
    }
}
