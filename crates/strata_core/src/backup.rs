//! Database backup and restore.
//!
//! A backup is a full export of one backend's data, tagged with the
//! backend type and schema version so restores can refuse incompatible
//! targets.
//!
//! ## Backup Format
//!
//! Backups are single JSON documents named
//! `backup_<backend_type>_<timestamp>.json`:
//!
//! ```json
//! {
//!   "backend_type": "sqlite",
//!   "schema_version": 20240101120000,
//!   "created_at": "2024-01-01T12:00:00Z",
//!   "data": { "users:1": { "name": "alpha" } }
//! }
//! ```
//!
//! The `data` mapping is exactly what
//! [`export_data`](strata_storage::StorageBackend::export_data) produced,
//! reserved bookkeeping keys included, so importing it reproduces the
//! store byte for byte.

use crate::error::{DatabaseError, DatabaseResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use strata_storage::{Snapshot, StorageBackend};
use tracing::{debug, warn};

/// A parsed backup document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupFile {
    /// Kind of the backend the backup was taken from.
    pub backend_type: String,
    /// Schema version of the store at backup time.
    pub schema_version: u64,
    /// When the backup was created.
    pub created_at: DateTime<Utc>,
    /// The exported store contents.
    pub data: Snapshot,
}

/// Metadata about one backup on disk, as returned by
/// [`BackupManager::list`].
#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    /// Location of the backup document.
    pub path: PathBuf,
    /// Kind of the backend the backup was taken from.
    pub backend_type: String,
    /// Schema version of the store at backup time.
    pub schema_version: u64,
    /// When the backup was created.
    pub created_at: DateTime<Utc>,
    /// Size of the document in bytes.
    pub size_bytes: u64,
}

/// Creates, loads, and lists backup documents in a directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
}

impl BackupManager {
    /// Creates a manager writing to `dir` by default.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The default backup directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Exports `backend` into a backup document.
    ///
    /// Writes to `path` when given, otherwise to a timestamped file in the
    /// default directory. Returns the path written.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Query`] when the export fails and
    /// [`DatabaseError::Backup`] when the document cannot be written.
    pub fn create(
        &self,
        backend: &dyn StorageBackend,
        schema_version: u64,
        path: Option<PathBuf>,
    ) -> DatabaseResult<PathBuf> {
        let created_at = Utc::now();
        let backup = BackupFile {
            backend_type: backend.kind().to_string(),
            schema_version,
            created_at,
            data: backend.export_data()?,
        };

        let path = match path {
            Some(path) => path,
            None => self.default_path(&backup.backend_type, created_at)?,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    DatabaseError::backup(format!("{}: {err}", parent.display()))
                })?;
            }
        }

        let serialized = serde_json::to_vec_pretty(&backup)
            .map_err(|err| DatabaseError::backup(err.to_string()))?;
        let tmp_path = path.with_extension("tmp");
        let write = |tmp: &Path| -> std::io::Result<()> {
            let mut file = File::create(tmp)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
            fs::rename(tmp, &path)
        };
        write(&tmp_path).map_err(|err| {
            DatabaseError::backup(format!("{}: {err}", path.display()))
        })?;

        debug!(
            path = %path.display(),
            keys = backup.data.len(),
            schema_version,
            "backup written"
        );
        Ok(path)
    }

    /// Loads and parses the backup document at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Restore`] when the file is missing or not
    /// a valid backup document.
    pub fn load(&self, path: &Path) -> DatabaseResult<BackupFile> {
        let bytes = fs::read(path)
            .map_err(|err| DatabaseError::restore(format!("{}: {err}", path.display())))?;
        serde_json::from_slice(&bytes).map_err(|err| {
            DatabaseError::restore(format!("{} is not a valid backup: {err}", path.display()))
        })
    }

    /// Lists the backups in the default directory, newest first.
    ///
    /// Files that do not parse as backup documents are skipped with a
    /// warning.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Backup`] when the directory cannot be
    /// read. A missing directory lists as empty.
    pub fn list(&self) -> DatabaseResult<Vec<BackupInfo>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|err| {
            DatabaseError::backup(format!("{}: {err}", self.dir.display()))
        })?;

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                DatabaseError::backup(format!("{}: {err}", self.dir.display()))
            })?;
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("backup_") || !name.ends_with(".json") {
                continue;
            }
            match self.load(&path) {
                Ok(backup) => backups.push(BackupInfo {
                    backend_type: backup.backend_type,
                    schema_version: backup.schema_version,
                    created_at: backup.created_at,
                    size_bytes: entry.metadata().map(|meta| meta.len()).unwrap_or(0),
                    path,
                }),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable backup");
                }
            }
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    /// Picks a timestamped filename in the default directory that does not
    /// collide with an existing backup.
    fn default_path(
        &self,
        backend_type: &str,
        created_at: DateTime<Utc>,
    ) -> DatabaseResult<PathBuf> {
        let stamp = created_at.format("%Y%m%d%H%M%S");
        let base = format!("backup_{backend_type}_{stamp}");
        let mut candidate = self.dir.join(format!("{base}.json"));
        let mut counter = 2u32;
        while candidate.exists() {
            if counter > 1000 {
                return Err(DatabaseError::backup(format!(
                    "could not find a free backup name for {base}"
                )));
            }
            candidate = self.dir.join(format!("{base}_{counter}.json"));
            counter += 1;
        }
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_storage::{JsonBackend, Record};
    use tempfile::tempdir;

    fn seeded_backend(dir: &Path) -> JsonBackend {
        let mut backend = JsonBackend::new(dir.join("store.json"), 8);
        backend.initialize().unwrap();
        let mut record = Record::new();
        record.insert("value".to_string(), json!(1));
        backend.set("users:1", record).unwrap();
        backend
    }

    #[test]
    fn create_writes_named_document() {
        let dir = tempdir().unwrap();
        let backend = seeded_backend(dir.path());
        let manager = BackupManager::new(dir.path().join("backups"));

        let path = manager.create(&backend, 20240101120000, None).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("backup_json_"), "{name}");
        assert!(name.ends_with(".json"), "{name}");

        let backup = manager.load(&path).unwrap();
        assert_eq!(backup.backend_type, "json");
        assert_eq!(backup.schema_version, 20240101120000);
        assert_eq!(backup.data, backend.export_data().unwrap());
    }

    #[test]
    fn create_honors_explicit_path() {
        let dir = tempdir().unwrap();
        let backend = seeded_backend(dir.path());
        let manager = BackupManager::new(dir.path().join("backups"));

        let target = dir.path().join("elsewhere").join("snap.json");
        let path = manager.create(&backend, 1, Some(target.clone())).unwrap();
        assert_eq!(path, target);
        assert!(target.exists());
    }

    #[test]
    fn same_second_backups_do_not_collide() {
        let dir = tempdir().unwrap();
        let backend = seeded_backend(dir.path());
        let manager = BackupManager::new(dir.path().join("backups"));

        let first = manager.create(&backend, 1, None).unwrap();
        let second = manager.create(&backend, 1, None).unwrap();
        assert_ne!(first, second);
        assert!(first.exists());
        assert!(second.exists());
    }

    #[test]
    fn list_returns_newest_first_and_skips_junk() {
        let dir = tempdir().unwrap();
        let backend = seeded_backend(dir.path());
        let backups_dir = dir.path().join("backups");
        let manager = BackupManager::new(&backups_dir);

        manager.create(&backend, 1, None).unwrap();
        manager.create(&backend, 2, None).unwrap();
        fs::write(backups_dir.join("backup_json_garbage.json"), b"not json").unwrap();
        fs::write(backups_dir.join("unrelated.txt"), b"ignored").unwrap();

        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].created_at >= listed[1].created_at);
    }

    #[test]
    fn list_of_missing_directory_is_empty() {
        let dir = tempdir().unwrap();
        let manager = BackupManager::new(dir.path().join("nope"));
        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn load_rejects_missing_file() {
        let dir = tempdir().unwrap();
        let manager = BackupManager::new(dir.path());
        let err = manager.load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, DatabaseError::Restore(_)));
    }
}
