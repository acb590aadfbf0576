//! Embedded SQLite storage backend.

use crate::backend::{like_prefix_pattern, BackendStats, LifeState, StorageBackend};
use crate::cache::RecordCache;
use crate::error::{QueryError, QueryResult, StorageError, StorageResult};
use crate::record::{Record, Snapshot};
use chrono::Utc;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS storage (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)";

/// A storage backend on top of an embedded SQLite database.
///
/// Records are serialized to JSON text in a single `storage` table keyed by
/// the record key. The database runs in WAL mode with a busy timeout, and
/// transactions map directly onto SQLite transactions (`BEGIN IMMEDIATE`).
///
/// Pass `":memory:"` as the path for a throwaway in-memory database.
#[derive(Debug)]
pub struct SqliteBackend {
    path: PathBuf,
    busy_timeout: Duration,
    cache: RecordCache,
    conn: Mutex<Option<Connection>>,
    txn_active: AtomicBool,
    state: RwLock<LifeState>,
}

impl SqliteBackend {
    /// Creates a backend for the SQLite database at `path`.
    ///
    /// Nothing is opened until [`StorageBackend::initialize`] runs.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, cache_capacity: usize) -> Self {
        Self {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            cache: RecordCache::new(cache_capacity),
            conn: Mutex::new(None),
            txn_active: AtomicBool::new(false),
            state: RwLock::new(LifeState::New),
        }
    }

    /// Sets how long queries wait on a locked database (default 5s).
    #[must_use]
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Returns the path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MappedMutexGuard<'_, Connection>, StorageError> {
        self.state.read().ensure_ready()?;
        MutexGuard::try_map(self.conn.lock(), |slot| slot.as_mut())
            .map_err(|_| StorageError::NotInitialized)
    }

    fn is_memory(&self) -> bool {
        self.path == Path::new(":memory:")
    }

    fn replace_all(conn: &Connection, snapshot: &Snapshot) -> Result<(), StorageError> {
        conn.execute("DELETE FROM storage", [])?;
        let now = Utc::now().to_rfc3339();
        let mut stmt = conn.prepare(
            "INSERT INTO storage (key, value, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        )?;
        for (key, record) in snapshot {
            let text = serde_json::to_string(record)?;
            stmt.execute(params![key, text, now])?;
        }
        Ok(())
    }
}

impl StorageBackend for SqliteBackend {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    fn initialize(&mut self) -> StorageResult<()> {
        if *self.state.read() == LifeState::Ready {
            return Ok(());
        }

        if !self.is_memory() {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }

        let conn = Connection::open(&self.path).map_err(|err| {
            StorageError::init_failed("sqlite", format!("{}: {err}", self.path.display()))
        })?;
        conn.busy_timeout(self.busy_timeout)?;
        if !self.is_memory() {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute(CREATE_TABLE, [])?;

        *self.conn.lock() = Some(conn);
        *self.state.write() = LifeState::Ready;
        debug!(path = %self.path.display(), "sqlite backend initialized");
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        if *self.state.read() != LifeState::Ready {
            return Ok(());
        }
        if self.in_transaction() {
            warn!("closing sqlite backend with an open transaction; rolling back");
            let _ = self.rollback_transaction();
        }
        self.cache.clear();
        if let Some(conn) = self.conn.lock().take() {
            conn.close().map_err(|(_, err)| StorageError::from(err))?;
        }
        *self.state.write() = LifeState::Closed;
        Ok(())
    }

    fn get(&self, key: &str) -> QueryResult<Option<Record>> {
        if let Some(cached) = self.cache.get(key) {
            return Ok(Some(cached));
        }

        let text: Option<String> = {
            let conn = self.conn().map_err(|err| QueryError::key("get", key, err))?;
            conn.query_row(
                "SELECT value FROM storage WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| QueryError::key("get", key, err))?
        };

        match text {
            None => Ok(None),
            Some(text) => {
                let record: Record = serde_json::from_str(&text).map_err(|err| {
                    QueryError::key("get", key, StorageError::corrupted(err.to_string()))
                })?;
                self.cache.put(key, record.clone());
                Ok(Some(record))
            }
        }
    }

    fn set(&mut self, key: &str, value: Record) -> QueryResult<()> {
        let text = serde_json::to_string(&value)
            .map_err(|err| QueryError::key("set", key, StorageError::from(err)))?;
        let now = Utc::now().to_rfc3339();
        {
            let conn = self.conn().map_err(|err| QueryError::key("set", key, err))?;
            conn.execute(
                "INSERT INTO storage (key, value, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![key, text, now],
            )
            .map_err(|err| QueryError::key("set", key, err))?;
        }
        self.cache.put(key, value);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> QueryResult<bool> {
        let removed = {
            let conn = self
                .conn()
                .map_err(|err| QueryError::key("delete", key, err))?;
            conn.execute("DELETE FROM storage WHERE key = ?1", params![key])
                .map_err(|err| QueryError::key("delete", key, err))?
        };
        self.cache.remove(key);
        Ok(removed > 0)
    }

    fn exists(&self, key: &str) -> QueryResult<bool> {
        let conn = self
            .conn()
            .map_err(|err| QueryError::key("exists", key, err))?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM storage WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| QueryError::key("exists", key, err))?;
        Ok(found.is_some())
    }

    fn list_keys(&self, prefix: &str) -> QueryResult<BTreeSet<String>> {
        let conn = self
            .conn()
            .map_err(|err| QueryError::store("list_keys", err))?;
        let mut stmt = conn
            .prepare("SELECT key FROM storage WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key")
            .map_err(|err| QueryError::store("list_keys", err))?;
        let rows = stmt
            .query_map(params![like_prefix_pattern(prefix)], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|err| QueryError::store("list_keys", err))?;

        let mut keys = BTreeSet::new();
        for row in rows {
            keys.insert(row.map_err(|err| QueryError::store("list_keys", err))?);
        }
        Ok(keys)
    }

    fn clear(&mut self) -> QueryResult<()> {
        {
            let conn = self.conn().map_err(|err| QueryError::store("clear", err))?;
            conn.execute("DELETE FROM storage", [])
                .map_err(|err| QueryError::store("clear", err))?;
        }
        self.cache.clear();
        Ok(())
    }

    fn export_data(&self) -> QueryResult<Snapshot> {
        let conn = self.conn().map_err(|err| QueryError::store("export", err))?;
        let mut stmt = conn
            .prepare("SELECT key, value FROM storage ORDER BY key")
            .map_err(|err| QueryError::store("export", err))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|err| QueryError::store("export", err))?;

        let mut snapshot = Snapshot::new();
        for row in rows {
            let (key, text) = row.map_err(|err| QueryError::store("export", err))?;
            let record: Record = serde_json::from_str(&text).map_err(|err| {
                QueryError::key("export", &key, StorageError::corrupted(err.to_string()))
            })?;
            snapshot.insert(key, record);
        }
        Ok(snapshot)
    }

    fn import_data(&mut self, snapshot: Snapshot) -> QueryResult<()> {
        {
            let conn = self.conn().map_err(|err| QueryError::store("import", err))?;
            if self.txn_active.load(Ordering::SeqCst) {
                Self::replace_all(&conn, &snapshot)
                    .map_err(|err| QueryError::store("import", err))?;
            } else {
                let tx = conn
                    .unchecked_transaction()
                    .map_err(|err| QueryError::store("import", err))?;
                Self::replace_all(&tx, &snapshot)
                    .map_err(|err| QueryError::store("import", err))?;
                tx.commit().map_err(|err| QueryError::store("import", err))?;
            }
        }
        self.cache.invalidate();
        Ok(())
    }

    fn stats(&self) -> BackendStats {
        let key_count = self.conn().ok().and_then(|conn| {
            conn.query_row("SELECT COUNT(*) FROM storage", [], |row| {
                row.get::<_, i64>(0)
            })
            .ok()
            .map(|count| count.max(0) as u64)
        });
        BackendStats {
            backend: self.kind(),
            key_count,
            in_transaction: self.in_transaction(),
            cache: self.cache.stats(),
            size_on_disk: if self.is_memory() {
                None
            } else {
                fs::metadata(&self.path).ok().map(|meta| meta.len())
            },
            pool_size: None,
            pool_idle: None,
        }
    }

    fn begin_transaction(&mut self) -> QueryResult<()> {
        let conn = self
            .conn()
            .map_err(|err| QueryError::transaction("begin", err))?;
        if self.txn_active.load(Ordering::SeqCst) {
            return Err(QueryError::transaction(
                "begin",
                StorageError::TransactionActive,
            ));
        }
        conn.execute_batch("BEGIN IMMEDIATE")
            .map_err(|err| QueryError::transaction("begin", err))?;
        self.txn_active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn commit_transaction(&mut self) -> QueryResult<()> {
        let conn = self
            .conn()
            .map_err(|err| QueryError::transaction("commit", err))?;
        if !self.txn_active.load(Ordering::SeqCst) {
            return Err(QueryError::transaction(
                "commit",
                StorageError::NoTransaction,
            ));
        }
        if let Err(err) = conn.execute_batch("COMMIT") {
            let _ = conn.execute_batch("ROLLBACK");
            self.txn_active.store(false, Ordering::SeqCst);
            self.cache.invalidate();
            return Err(QueryError::transaction("commit", err));
        }
        self.txn_active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn rollback_transaction(&mut self) -> QueryResult<()> {
        let conn = self
            .conn()
            .map_err(|err| QueryError::transaction("rollback", err))?;
        if !self.txn_active.load(Ordering::SeqCst) {
            return Err(QueryError::transaction(
                "rollback",
                StorageError::NoTransaction,
            ));
        }
        conn.execute_batch("ROLLBACK")
            .map_err(|err| QueryError::transaction("rollback", err))?;
        self.txn_active.store(false, Ordering::SeqCst);
        self.cache.invalidate();
        debug!("sqlite transaction rolled back");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.txn_active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(value: i64) -> Record {
        let mut map = Record::new();
        map.insert("value".to_string(), json!(value));
        map
    }

    fn open_memory() -> SqliteBackend {
        let mut backend = SqliteBackend::new(":memory:", 16);
        backend.initialize().unwrap();
        backend
    }

    #[test]
    fn set_then_get_roundtrips() {
        let mut backend = open_memory();

        let mut nested = Record::new();
        nested.insert("name".to_string(), json!("alpha"));
        nested.insert("tags".to_string(), json!(["a", "b"]));
        nested.insert("meta".to_string(), json!({"depth": 2}));

        backend.set("item", nested.clone()).unwrap();
        assert_eq!(backend.get("item").unwrap(), Some(nested));
        assert_eq!(backend.get("missing").unwrap(), None);
    }

    #[test]
    fn overwrite_replaces_value() {
        let mut backend = open_memory();
        backend.set("a", record(1)).unwrap();
        backend.set("a", record(2)).unwrap();
        assert_eq!(backend.get("a").unwrap(), Some(record(2)));
    }

    #[test]
    fn delete_reports_existence() {
        let mut backend = open_memory();
        backend.set("a", record(1)).unwrap();
        assert!(backend.delete("a").unwrap());
        assert!(!backend.delete("a").unwrap());
        assert!(!backend.exists("a").unwrap());
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let mut backend = SqliteBackend::new(&path, 4);
            backend.initialize().unwrap();
            backend.set("a", record(1)).unwrap();
            backend.close().unwrap();
        }

        let mut backend = SqliteBackend::new(&path, 4);
        backend.initialize().unwrap();
        assert_eq!(backend.get("a").unwrap(), Some(record(1)));
    }

    #[test]
    fn list_keys_treats_underscores_literally() {
        let mut backend = open_memory();
        backend.set("_meta", record(1)).unwrap();
        backend.set("xmeta", record(2)).unwrap();
        backend.set("_metadata", record(3)).unwrap();

        // An unescaped LIKE would match "xmeta" via the "_" wildcard.
        let keys = backend.list_keys("_meta").unwrap();
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec!["_meta".to_string(), "_metadata".to_string()]
        );
    }

    #[test]
    fn transaction_commit_keeps_writes() {
        let mut backend = open_memory();
        backend.begin_transaction().unwrap();
        backend.set("a", record(1)).unwrap();
        backend.commit_transaction().unwrap();
        assert_eq!(backend.get("a").unwrap(), Some(record(1)));
        assert!(!backend.in_transaction());
    }

    #[test]
    fn rollback_undoes_writes_and_cache() {
        let mut backend = open_memory();
        backend.set("a", record(1)).unwrap();
        // Warm the cache with the pre-transaction value.
        assert_eq!(backend.get("a").unwrap(), Some(record(1)));

        backend.begin_transaction().unwrap();
        backend.set("a", record(99)).unwrap();
        backend.set("b", record(2)).unwrap();
        backend.rollback_transaction().unwrap();

        // A stale cache would still answer 99 here.
        assert_eq!(backend.get("a").unwrap(), Some(record(1)));
        assert_eq!(backend.get("b").unwrap(), None);
    }

    #[test]
    fn nested_transaction_rejected() {
        let mut backend = open_memory();
        backend.begin_transaction().unwrap();
        assert!(backend.begin_transaction().is_err());
        backend.rollback_transaction().unwrap();
        assert!(backend.rollback_transaction().is_err());
    }

    #[test]
    fn export_import_roundtrips() {
        let mut backend = open_memory();
        backend.set("a", record(1)).unwrap();
        backend.set("b", record(2)).unwrap();
        let exported = backend.export_data().unwrap();
        assert_eq!(exported.len(), 2);

        let mut other = open_memory();
        other.set("stale", record(9)).unwrap();
        other.import_data(exported.clone()).unwrap();
        assert_eq!(other.export_data().unwrap(), exported);
        assert_eq!(other.get("stale").unwrap(), None);
    }

    #[test]
    fn clear_empties_store() {
        let mut backend = open_memory();
        backend.set("a", record(1)).unwrap();
        backend.clear().unwrap();
        assert_eq!(backend.stats().key_count, Some(0));
        assert_eq!(backend.get("a").unwrap(), None);
    }

    #[test]
    fn uninitialized_backend_rejects_reads() {
        let backend = SqliteBackend::new(":memory:", 4);
        assert!(backend.get("a").is_err());
    }

    #[test]
    fn closed_backend_rejects_writes() {
        let mut backend = open_memory();
        backend.close().unwrap();
        let err = backend.set("a", record(1)).unwrap_err();
        assert!(matches!(
            err,
            QueryError::Key {
                source: StorageError::Closed,
                ..
            }
        ));
    }

    #[test]
    fn stats_report_counts() {
        let mut backend = open_memory();
        backend.set("a", record(1)).unwrap();
        backend.set("b", record(2)).unwrap();
        let stats = backend.stats();
        assert_eq!(stats.backend, "sqlite");
        assert_eq!(stats.key_count, Some(2));
        assert!(!stats.in_transaction);
    }
}
