//! Flat-file JSON storage backend.

use crate::backend::{BackendStats, LifeState, StorageBackend};
use crate::cache::RecordCache;
use crate::error::{QueryError, QueryResult, StorageError, StorageResult};
use crate::record::{Record, Snapshot};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// How many rotating `.bakN` copies of the data file are kept by default.
const DEFAULT_BACKUP_ROTATION: usize = 3;

/// A storage backend persisting all records in a single JSON file.
///
/// The whole store lives in memory as an ordered map and is written back on
/// every mutation (outside transactions). Writes go to a temporary file
/// that is atomically renamed over the data file, so a crash mid-save never
/// leaves a half-written store. Before each save the previous file is
/// rotated into `.bak1..bakN` copies.
///
/// # Transactions
///
/// `begin_transaction` deep-copies the in-memory map. Writes inside the
/// transaction mutate the live map but skip persistence; `commit` performs
/// one save, while `rollback` restores the copied map verbatim and
/// invalidates the read cache, leaving the file untouched.
///
/// # Locking
///
/// An advisory `fs2` lock on a sibling `.lock` file is held from
/// `initialize` to `close`, keeping a second process from opening the same
/// store. Concurrent multi-process access is otherwise unsupported for this
/// engine.
#[derive(Debug)]
pub struct JsonBackend {
    path: PathBuf,
    backup_rotation: usize,
    data: RwLock<Snapshot>,
    cache: RecordCache,
    txn_snapshot: Mutex<Option<Snapshot>>,
    state: RwLock<LifeState>,
    lock_file: Mutex<Option<File>>,
}

impl JsonBackend {
    /// Creates a backend for the JSON file at `path`.
    ///
    /// Nothing is touched on disk until [`StorageBackend::initialize`] runs.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, cache_capacity: usize) -> Self {
        Self {
            path: path.into(),
            backup_rotation: DEFAULT_BACKUP_ROTATION,
            data: RwLock::new(Snapshot::new()),
            cache: RecordCache::new(cache_capacity),
            txn_snapshot: Mutex::new(None),
            state: RwLock::new(LifeState::New),
            lock_file: Mutex::new(None),
        }
    }

    /// Sets how many rotating `.bakN` copies to keep before each save.
    #[must_use]
    pub fn with_backup_rotation(mut self, count: usize) -> Self {
        self.backup_rotation = count;
        self
    }

    /// Returns the path of the data file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_ready(&self) -> Result<(), StorageError> {
        self.state.read().ensure_ready()
    }

    /// Acquires the advisory lock next to the data file.
    fn acquire_lock(&self) -> StorageResult<File> {
        let lock_path = self.lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked {
                path: lock_path.display().to_string(),
            });
        }
        Ok(file)
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map_or_else(
            || std::ffi::OsString::from("storage"),
            std::ffi::OsStr::to_os_string,
        );
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.file_name().map_or_else(
            || std::ffi::OsString::from("storage"),
            std::ffi::OsStr::to_os_string,
        );
        name.push(format!(".bak{index}"));
        self.path.with_file_name(name)
    }

    /// Rotates `.bak` copies and shifts the current file into `.bak1`.
    fn rotate_backups(&self) -> Result<(), StorageError> {
        if self.backup_rotation == 0 || !self.path.exists() {
            return Ok(());
        }
        for index in (1..self.backup_rotation).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        fs::copy(&self.path, self.backup_path(1))?;
        Ok(())
    }

    /// Persists the in-memory map via write-to-temp-then-rename.
    fn save(&self) -> Result<(), StorageError> {
        self.rotate_backups()?;

        let serialized = {
            let data = self.data.read();
            serde_json::to_vec_pretty(&*data)?
        };

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&serialized)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        debug!(path = %self.path.display(), bytes = serialized.len(), "json store saved");
        Ok(())
    }

    /// Persists unless a transaction defers the write to commit time.
    fn save_unless_in_txn(&self) -> Result<(), StorageError> {
        if self.txn_snapshot.lock().is_some() {
            return Ok(());
        }
        self.save()
    }

    fn load(&self) -> Result<Snapshot, StorageError> {
        let bytes = fs::read(&self.path)?;
        serde_json::from_slice(&bytes).map_err(|err| {
            StorageError::corrupted(format!("{}: {err}", self.path.display()))
        })
    }
}

impl StorageBackend for JsonBackend {
    fn kind(&self) -> &'static str {
        "json"
    }

    fn initialize(&mut self) -> StorageResult<()> {
        if *self.state.read() == LifeState::Ready {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_file = self.acquire_lock()?;

        if self.path.exists() {
            let loaded = self.load()?;
            *self.data.write() = loaded;
        }

        *self.lock_file.lock() = Some(lock_file);
        *self.state.write() = LifeState::Ready;
        debug!(path = %self.path.display(), keys = self.data.read().len(), "json backend initialized");
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        if *self.state.read() != LifeState::Ready {
            return Ok(());
        }
        if self.txn_snapshot.lock().is_some() {
            warn!("closing json backend with an open transaction; rolling back");
            let _ = self.rollback_transaction();
        }
        self.cache.clear();
        *self.lock_file.lock() = None;
        *self.state.write() = LifeState::Closed;
        Ok(())
    }

    fn get(&self, key: &str) -> QueryResult<Option<Record>> {
        self.ensure_ready()
            .map_err(|err| QueryError::key("get", key, err))?;

        if let Some(cached) = self.cache.get(key) {
            return Ok(Some(cached));
        }

        let found = self.data.read().get(key).cloned();
        if let Some(record) = &found {
            self.cache.put(key, record.clone());
        }
        Ok(found)
    }

    fn set(&mut self, key: &str, value: Record) -> QueryResult<()> {
        self.ensure_ready()
            .map_err(|err| QueryError::key("set", key, err))?;

        self.data.write().insert(key.to_string(), value.clone());
        self.cache.put(key, value);
        self.save_unless_in_txn()
            .map_err(|err| QueryError::key("set", key, err))
    }

    fn delete(&mut self, key: &str) -> QueryResult<bool> {
        self.ensure_ready()
            .map_err(|err| QueryError::key("delete", key, err))?;

        let existed = self.data.write().remove(key).is_some();
        self.cache.remove(key);
        if existed {
            self.save_unless_in_txn()
                .map_err(|err| QueryError::key("delete", key, err))?;
        }
        Ok(existed)
    }

    fn exists(&self, key: &str) -> QueryResult<bool> {
        self.ensure_ready()
            .map_err(|err| QueryError::key("exists", key, err))?;
        Ok(self.data.read().contains_key(key))
    }

    fn list_keys(&self, prefix: &str) -> QueryResult<std::collections::BTreeSet<String>> {
        self.ensure_ready()
            .map_err(|err| QueryError::store("list_keys", err))?;
        Ok(self
            .data
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn clear(&mut self) -> QueryResult<()> {
        self.ensure_ready()
            .map_err(|err| QueryError::store("clear", err))?;
        self.data.write().clear();
        self.cache.clear();
        self.save_unless_in_txn()
            .map_err(|err| QueryError::store("clear", err))
    }

    fn export_data(&self) -> QueryResult<Snapshot> {
        self.ensure_ready()
            .map_err(|err| QueryError::store("export", err))?;
        Ok(self.data.read().clone())
    }

    fn import_data(&mut self, snapshot: Snapshot) -> QueryResult<()> {
        self.ensure_ready()
            .map_err(|err| QueryError::store("import", err))?;
        *self.data.write() = snapshot;
        self.cache.invalidate();
        self.save_unless_in_txn()
            .map_err(|err| QueryError::store("import", err))
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            backend: self.kind(),
            key_count: Some(self.data.read().len() as u64),
            in_transaction: self.in_transaction(),
            cache: self.cache.stats(),
            size_on_disk: fs::metadata(&self.path).ok().map(|meta| meta.len()),
            pool_size: None,
            pool_idle: None,
        }
    }

    fn begin_transaction(&mut self) -> QueryResult<()> {
        self.ensure_ready()
            .map_err(|err| QueryError::transaction("begin", err))?;
        let mut snapshot = self.txn_snapshot.lock();
        if snapshot.is_some() {
            return Err(QueryError::transaction(
                "begin",
                StorageError::TransactionActive,
            ));
        }
        *snapshot = Some(self.data.read().clone());
        Ok(())
    }

    fn commit_transaction(&mut self) -> QueryResult<()> {
        self.ensure_ready()
            .map_err(|err| QueryError::transaction("commit", err))?;
        let taken = self.txn_snapshot.lock().take();
        let Some(pre_state) = taken else {
            return Err(QueryError::transaction(
                "commit",
                StorageError::NoTransaction,
            ));
        };

        // A failed save restores the pre-transaction map so memory and disk
        // never diverge.
        if let Err(err) = self.save() {
            *self.data.write() = pre_state;
            self.cache.invalidate();
            return Err(QueryError::transaction("commit", err));
        }
        Ok(())
    }

    fn rollback_transaction(&mut self) -> QueryResult<()> {
        self.ensure_ready()
            .map_err(|err| QueryError::transaction("rollback", err))?;
        let taken = self.txn_snapshot.lock().take();
        let Some(pre_state) = taken else {
            return Err(QueryError::transaction(
                "rollback",
                StorageError::NoTransaction,
            ));
        };
        *self.data.write() = pre_state;
        self.cache.invalidate();
        debug!("json transaction rolled back");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.txn_snapshot.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StorageBackendExt;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(value: i64) -> Record {
        let mut map = Record::new();
        map.insert("value".to_string(), json!(value));
        map
    }

    fn open_backend(path: &Path) -> JsonBackend {
        let mut backend = JsonBackend::new(path, 16);
        backend.initialize().unwrap();
        backend
    }

    #[test]
    fn set_then_get_roundtrips() {
        let dir = tempdir().unwrap();
        let mut backend = open_backend(&dir.path().join("store.json"));

        backend.set("a", record(1)).unwrap();
        assert_eq!(backend.get("a").unwrap(), Some(record(1)));
        assert_eq!(backend.get("missing").unwrap(), None);
    }

    #[test]
    fn delete_reports_existence() {
        let dir = tempdir().unwrap();
        let mut backend = open_backend(&dir.path().join("store.json"));

        backend.set("a", record(1)).unwrap();
        assert!(backend.delete("a").unwrap());
        assert!(!backend.delete("a").unwrap());
        assert_eq!(backend.get("a").unwrap(), None);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let mut backend = open_backend(&path);
            backend.set("a", record(1)).unwrap();
            backend.close().unwrap();
        }

        let backend = open_backend(&path);
        assert_eq!(backend.get("a").unwrap(), Some(record(1)));
    }

    #[test]
    fn uninitialized_backend_rejects_reads() {
        let dir = tempdir().unwrap();
        let backend = JsonBackend::new(dir.path().join("store.json"), 4);
        assert!(backend.get("a").is_err());
    }

    #[test]
    fn second_instance_cannot_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let _first = open_backend(&path);
        let mut second = JsonBackend::new(&path, 4);
        let err = second.initialize().unwrap_err();
        assert!(matches!(err, StorageError::Locked { .. }));
    }

    #[test]
    fn lock_released_on_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let mut first = open_backend(&path);
        first.close().unwrap();

        let mut second = JsonBackend::new(&path, 4);
        assert!(second.initialize().is_ok());
    }

    #[test]
    fn rotating_backups_written_before_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let mut backend = open_backend(&path);

        backend.set("a", record(1)).unwrap();
        backend.set("a", record(2)).unwrap();
        backend.set("a", record(3)).unwrap();

        assert!(path.with_file_name("store.json.bak1").exists());
        assert!(path.with_file_name("store.json.bak2").exists());

        // bak1 holds the state just before the latest save.
        let bak1: Snapshot = serde_json::from_slice(
            &fs::read(path.with_file_name("store.json.bak1")).unwrap(),
        )
        .unwrap();
        assert_eq!(bak1.get("a"), Some(&record(2)));
    }

    #[test]
    fn transaction_commit_persists_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let mut backend = open_backend(&path);

        backend.begin_transaction().unwrap();
        backend.set("a", record(1)).unwrap();
        // Deferred: nothing on disk until commit.
        assert!(!path.exists());
        backend.commit_transaction().unwrap();

        assert!(path.exists());
        let on_disk: Snapshot = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.get("a"), Some(&record(1)));
    }

    #[test]
    fn rollback_restores_pre_transaction_state() {
        let dir = tempdir().unwrap();
        let mut backend = open_backend(&dir.path().join("store.json"));

        backend.set("keep", record(1)).unwrap();
        let before = backend.export_data().unwrap();

        backend.begin_transaction().unwrap();
        backend.set("keep", record(99)).unwrap();
        backend.set("discard", record(2)).unwrap();
        backend.delete("keep").unwrap();
        backend.rollback_transaction().unwrap();

        assert_eq!(backend.export_data().unwrap(), before);
        assert_eq!(backend.get("keep").unwrap(), Some(record(1)));
        assert_eq!(backend.get("discard").unwrap(), None);
    }

    #[test]
    fn failing_transaction_body_leaves_export_unchanged() {
        let dir = tempdir().unwrap();
        let mut backend = open_backend(&dir.path().join("store.json"));
        backend.set("a", record(1)).unwrap();
        let before = backend.export_data().unwrap();

        let result: Result<(), QueryError> = backend.transaction(|b| {
            b.set("a", record(2))?;
            b.set("b", record(3))?;
            Err(QueryError::store("test", StorageError::NotInitialized))
        });

        assert!(result.is_err());
        assert_eq!(backend.export_data().unwrap(), before);
        assert!(!backend.in_transaction());
    }

    #[test]
    fn nested_transaction_rejected() {
        let dir = tempdir().unwrap();
        let mut backend = open_backend(&dir.path().join("store.json"));

        backend.begin_transaction().unwrap();
        let err = backend.begin_transaction().unwrap_err();
        assert!(matches!(
            err,
            QueryError::Transaction {
                source: StorageError::TransactionActive,
                ..
            }
        ));
    }

    #[test]
    fn list_keys_filters_by_prefix() {
        let dir = tempdir().unwrap();
        let mut backend = open_backend(&dir.path().join("store.json"));

        backend.set("user:1", record(1)).unwrap();
        backend.set("user:2", record(2)).unwrap();
        backend.set("order:1", record(3)).unwrap();

        let users = backend.list_keys("user:").unwrap();
        assert_eq!(users.len(), 2);
        assert!(users.contains("user:1"));

        let all = backend.list_keys("").unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn import_replaces_everything() {
        let dir = tempdir().unwrap();
        let mut backend = open_backend(&dir.path().join("store.json"));
        backend.set("old", record(1)).unwrap();

        let mut snapshot = Snapshot::new();
        snapshot.insert("new".to_string(), record(2));
        backend.import_data(snapshot.clone()).unwrap();

        assert_eq!(backend.export_data().unwrap(), snapshot);
        assert_eq!(backend.get("old").unwrap(), None);
    }

    #[test]
    fn corrupted_file_fails_initialize() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, b"not json at all").unwrap();

        let mut backend = JsonBackend::new(&path, 4);
        let err = backend.initialize().unwrap_err();
        assert!(matches!(err, StorageError::Corrupted(_)));
    }

    #[test]
    fn stats_report_keys_and_cache() {
        let dir = tempdir().unwrap();
        let mut backend = open_backend(&dir.path().join("store.json"));
        backend.set("a", record(1)).unwrap();
        backend.get("a").unwrap();

        let stats = backend.stats();
        assert_eq!(stats.backend, "json");
        assert_eq!(stats.key_count, Some(1));
        assert!(stats.cache.hits >= 1);
        assert!(stats.size_on_disk.is_some());
    }
}
