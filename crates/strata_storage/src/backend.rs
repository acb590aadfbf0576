//! Storage backend trait definition.

use crate::cache::CacheStats;
use crate::error::{QueryError, QueryResult, StorageError, StorageResult};
use crate::record::{Record, Snapshot};
use serde::Serialize;
use std::collections::BTreeSet;

/// Lifecycle of a backend instance, shared by all implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifeState {
    New,
    Ready,
    Closed,
}

impl LifeState {
    /// Errors unless the backend has been initialized and not yet closed.
    pub(crate) fn ensure_ready(self) -> Result<(), StorageError> {
        match self {
            LifeState::Ready => Ok(()),
            LifeState::New => Err(StorageError::NotInitialized),
            LifeState::Closed => Err(StorageError::Closed),
        }
    }
}

/// Builds a `LIKE` pattern matching keys that start with `prefix`.
///
/// `%`, `_`, and `\` in the prefix are escaped with a backslash, so the
/// pattern must be used with backslash as the escape character.
pub(crate) fn like_prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for ch in prefix.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// A key-value storage backend for StrataDB.
///
/// Backends store [`Record`]s under unique string keys. The contract is the
/// same across engines; only durability and transaction mechanics differ
/// per implementation.
///
/// # Invariants
///
/// - `set` followed by `get` of the same key returns an equal record
/// - `delete` reports whether the key existed
/// - After `rollback_transaction`, reads reflect the pre-transaction state
///   and the read cache has been invalidated
/// - Backends must be `Send + Sync`; a single instance is nevertheless
///   driven from one thread at a time, and opening a second transaction
///   while one is active is an error
///
/// # Implementors
///
/// - [`crate::JsonBackend`] - single-file JSON store with deep-copy
///   transactions
/// - [`crate::SqliteBackend`] - embedded SQLite with native transactions
/// - [`crate::PostgresBackend`] - client-server PostgreSQL with a bounded
///   connection pool
pub trait StorageBackend: Send + Sync {
    /// The registry name of this backend ("json", "sqlite", "postgresql").
    fn kind(&self) -> &'static str;

    /// Performs idempotent setup: creates files, tables, and indexes and
    /// opens connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the filesystem is unreachable, the connection is
    /// refused, or the schema cannot be created. A backend whose
    /// `initialize` failed must not be used.
    fn initialize(&mut self) -> StorageResult<()>;

    /// Flushes and releases the backend's resources.
    ///
    /// # Errors
    ///
    /// Returns an error if a final flush fails. Closing twice is a no-op.
    fn close(&mut self) -> StorageResult<()>;

    /// Reads the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] naming the key if the engine read fails.
    fn get(&self, key: &str) -> QueryResult<Option<Record>>;

    /// Creates or replaces the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] naming the key if the engine write fails.
    fn set(&mut self, key: &str, value: Record) -> QueryResult<()>;

    /// Removes the record stored under `key`.
    ///
    /// Returns `true` if the key existed.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] naming the key if the engine write fails.
    fn delete(&mut self, key: &str) -> QueryResult<bool>;

    /// Returns whether a record exists under `key`.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] if the engine read fails.
    fn exists(&self, key: &str) -> QueryResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Lists every key starting with `prefix` (empty prefix lists all keys).
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] if the engine scan fails.
    fn list_keys(&self, prefix: &str) -> QueryResult<BTreeSet<String>>;

    /// Removes every record.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] if the engine write fails.
    fn clear(&mut self) -> QueryResult<()>;

    /// Exports a full snapshot of the store.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] if the engine scan fails.
    fn export_data(&self) -> QueryResult<Snapshot>;

    /// Replaces the entire store contents with `snapshot`.
    ///
    /// The read cache is invalidated so subsequent reads reflect the
    /// imported data.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] if the engine write fails.
    fn import_data(&mut self, snapshot: Snapshot) -> QueryResult<()>;

    /// Returns a point-in-time snapshot of backend statistics.
    fn stats(&self) -> BackendStats;

    /// Starts a transaction on this backend instance.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::StorageError::TransactionActive`] if a
    /// transaction is already open.
    fn begin_transaction(&mut self) -> QueryResult<()>;

    /// Commits the active transaction, making all writes inside it durable.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::StorageError::NoTransaction`] if no transaction
    /// is open, or with the engine error if the commit itself fails.
    fn commit_transaction(&mut self) -> QueryResult<()>;

    /// Rolls back the active transaction, undoing every write inside it and
    /// invalidating the read cache.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::StorageError::NoTransaction`] if no transaction
    /// is open.
    fn rollback_transaction(&mut self) -> QueryResult<()>;

    /// Whether a transaction is currently open on this instance.
    fn in_transaction(&self) -> bool;

    /// Stores several records, one `set` per entry.
    ///
    /// This is a convenience wrapper with no atomicity beyond the
    /// individual writes; wrap it in [`StorageBackendExt::transaction`] if
    /// all-or-nothing behavior is needed.
    ///
    /// # Errors
    ///
    /// Stops at the first failing write.
    fn set_many(&mut self, entries: Vec<(String, Record)>) -> QueryResult<()> {
        for (key, value) in entries {
            self.set(&key, value)?;
        }
        Ok(())
    }

    /// Deletes several keys, one `delete` per key, returning how many
    /// existed.
    ///
    /// # Errors
    ///
    /// Stops at the first failing delete.
    fn delete_many(&mut self, keys: &[String]) -> QueryResult<usize> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Scoped transaction helper for any [`StorageBackend`], including trait
/// objects.
///
/// ```ignore
/// backend.transaction::<_, QueryError, _>(|b| {
///     let mut rec = Record::new();
///     rec.insert("n".into(), 1.into());
///     b.set("counter", rec)
/// })?;
/// ```
pub trait StorageBackendExt: StorageBackend {
    /// Runs `body` inside a transaction.
    ///
    /// On `Ok` the transaction is committed; on `Err` it is rolled back and
    /// the error propagates unchanged. A rollback failure is logged but
    /// does not mask the original error.
    ///
    /// # Errors
    ///
    /// Returns the body's error, or a begin/commit failure converted via
    /// `From<QueryError>`.
    fn transaction<T, E, F>(&mut self, body: F) -> Result<T, E>
    where
        E: From<QueryError>,
        F: FnOnce(&mut Self) -> Result<T, E>,
    {
        self.begin_transaction()?;
        match body(self) {
            Ok(value) => {
                self.commit_transaction()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback_transaction() {
                    tracing::error!(error = %rollback_err, "rollback after failed transaction also failed");
                }
                Err(err)
            }
        }
    }
}

impl<B: StorageBackend + ?Sized> StorageBackendExt for B {}

/// A point-in-time snapshot of backend statistics.
///
/// Engine-specific fields are `None` where they do not apply.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStats {
    /// Registry name of the backend.
    pub backend: &'static str,
    /// Number of stored keys, when the engine could report it.
    pub key_count: Option<u64>,
    /// Whether a transaction is currently open.
    pub in_transaction: bool,
    /// Read cache statistics.
    pub cache: CacheStats,
    /// On-disk size in bytes (file-backed engines).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_on_disk: Option<u64>,
    /// Configured pool size (pooled engines).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<u32>,
    /// Idle pooled connections (pooled engines).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_idle: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_prefix_pattern(""), "%");
        assert_eq!(like_prefix_pattern("user:"), "user:%");
        assert_eq!(like_prefix_pattern("_schema"), "\\_schema%");
        assert_eq!(like_prefix_pattern("a%b_c\\d"), "a\\%b\\_c\\\\d%");
    }
}
