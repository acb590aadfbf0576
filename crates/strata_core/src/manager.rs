//! Database lifecycle, migration runs, rollback, and backup orchestration.

use crate::backup::BackupManager;
use crate::config::DatabaseConfig;
use crate::error::{ConfigurationError, DatabaseError, DatabaseResult, MigrationError};
use crate::migration::{
    MigrationRecord, MigrationRegistry, MigrationScript, RollbackRecord, RollbackSafety,
    MIGRATION_HISTORY_KEY, ROLLBACK_HISTORY_KEY, SCHEMA_VERSION_KEY,
};
use chrono::{DateTime, Datelike, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_storage::{
    BackendStats, JsonBackend, PostgresBackend, Record, SqliteBackend, StorageBackend,
    StorageBackendExt, StorageError,
};
use tracing::{debug, error, info, warn};

/// Builds an unopened backend from a configuration.
pub type BackendFactory = Box<dyn Fn(&DatabaseConfig) -> Box<dyn StorageBackend> + Send + Sync>;

/// String-keyed registry of backend factories.
///
/// Ships with the three built-in engines registered under "json",
/// "sqlite", and "postgresql"; additional engines can be registered
/// before the manager initializes.
pub struct BackendRegistry {
    factories: BTreeMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Creates a registry with the built-in engines.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            factories: BTreeMap::new(),
        };
        registry.register("json", |config: &DatabaseConfig| {
            Box::new(JsonBackend::new(config.json_path(), config.cache_size))
                as Box<dyn StorageBackend>
        });
        registry.register("sqlite", |config: &DatabaseConfig| {
            Box::new(
                SqliteBackend::new(config.sqlite_path(), config.cache_size)
                    .with_busy_timeout(config.timeout),
            ) as Box<dyn StorageBackend>
        });
        registry.register("postgresql", |config: &DatabaseConfig| {
            Box::new(
                PostgresBackend::new(config.postgres_url(), config.cache_size)
                    .with_pool_size(config.pool_size)
                    .with_connect_timeout(config.timeout),
            ) as Box<dyn StorageBackend>
        });
        registry
    }

    /// Registers a factory under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&DatabaseConfig) -> Box<dyn StorageBackend> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Builds the backend named by `config.backend`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnsupportedBackend`] for an
    /// unregistered name.
    pub fn create(
        &self,
        config: &DatabaseConfig,
    ) -> Result<Box<dyn StorageBackend>, ConfigurationError> {
        self.factories.get(&config.backend).map_or_else(
            || Err(ConfigurationError::unsupported_backend(&config.backend)),
            |factory| Ok(factory(config)),
        )
    }

    /// Registered backend names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Whether a factory is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Lifecycle state of a [`DatabaseManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerState {
    /// Constructed; no backend yet.
    Uninitialized,
    /// Backend constructed and initialized, migrations run.
    Initialized,
    /// Closed; the manager cannot be reused.
    Closed,
}

impl ManagerState {
    /// The state's lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Versions applied by this run, in order.
    pub applied: Vec<u64>,
    /// Backups written before risky migrations.
    pub backups: Vec<PathBuf>,
    /// Schema version after the run.
    pub version: u64,
    /// True when another run held the migration lock and nothing was done.
    pub skipped: bool,
}

/// Outcome of one rollback.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    /// Versions rolled back by this call, newest first.
    pub rolled_back: Vec<u64>,
    /// Schema version after the rollback.
    pub version: u64,
    /// The safety backup written before anything was undone.
    pub backup: Option<PathBuf>,
    /// True when another run held the migration lock and nothing was done.
    pub skipped: bool,
}

/// Point-in-time view of the manager and its backend.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Manager lifecycle state.
    pub state: ManagerState,
    /// Active backend kind, when initialized.
    pub backend: Option<String>,
    /// Current schema version, when initialized.
    pub schema_version: Option<u64>,
    /// Number of registered migration scripts.
    pub registered_migrations: usize,
    /// Number of applied migrations, when initialized.
    pub applied_migrations: Option<usize>,
    /// Number of registered-but-unapplied migrations, when initialized.
    pub pending_migrations: Option<usize>,
    /// Backend statistics, when initialized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_stats: Option<BackendStats>,
}

#[derive(Serialize, Deserialize)]
struct SchemaVersionDoc {
    version: u64,
}

#[derive(Serialize, Deserialize, Default)]
struct MigrationHistoryDoc {
    migrations: Vec<MigrationRecord>,
}

#[derive(Serialize, Deserialize, Default)]
struct RollbackHistoryDoc {
    rollbacks: Vec<RollbackRecord>,
}

fn to_record<T: Serialize>(value: &T) -> DatabaseResult<Record> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(StorageError::corrupted("bookkeeping record must be a JSON object").into()),
        Err(err) => Err(StorageError::from(err).into()),
    }
}

fn from_record<T: for<'de> Deserialize<'de>>(key: &str, record: Record) -> DatabaseResult<T> {
    serde_json::from_value(serde_json::Value::Object(record))
        .map_err(|err| StorageError::corrupted(format!("{key}: {err}")).into())
}

fn read_schema_version(backend: &dyn StorageBackend) -> DatabaseResult<u64> {
    match backend.get(SCHEMA_VERSION_KEY)? {
        Some(record) => {
            let doc: SchemaVersionDoc = from_record(SCHEMA_VERSION_KEY, record)?;
            Ok(doc.version)
        }
        None => Ok(0),
    }
}

fn write_schema_version(backend: &mut dyn StorageBackend, version: u64) -> DatabaseResult<()> {
    backend.set(SCHEMA_VERSION_KEY, to_record(&SchemaVersionDoc { version })?)?;
    Ok(())
}

fn read_migration_history(backend: &dyn StorageBackend) -> DatabaseResult<Vec<MigrationRecord>> {
    match backend.get(MIGRATION_HISTORY_KEY)? {
        Some(record) => {
            let doc: MigrationHistoryDoc = from_record(MIGRATION_HISTORY_KEY, record)?;
            Ok(doc.migrations)
        }
        None => Ok(Vec::new()),
    }
}

fn write_migration_history(
    backend: &mut dyn StorageBackend,
    migrations: &[MigrationRecord],
) -> DatabaseResult<()> {
    let doc = MigrationHistoryDoc {
        migrations: migrations.to_vec(),
    };
    backend.set(MIGRATION_HISTORY_KEY, to_record(&doc)?)?;
    Ok(())
}

fn read_rollback_history(backend: &dyn StorageBackend) -> DatabaseResult<Vec<RollbackRecord>> {
    match backend.get(ROLLBACK_HISTORY_KEY)? {
        Some(record) => {
            let doc: RollbackHistoryDoc = from_record(ROLLBACK_HISTORY_KEY, record)?;
            Ok(doc.rollbacks)
        }
        None => Ok(Vec::new()),
    }
}

fn write_rollback_history(
    backend: &mut dyn StorageBackend,
    rollbacks: &[RollbackRecord],
) -> DatabaseResult<()> {
    let doc = RollbackHistoryDoc {
        rollbacks: rollbacks.to_vec(),
    };
    backend.set(ROLLBACK_HISTORY_KEY, to_record(&doc)?)?;
    Ok(())
}

/// Releases the cooperative migration lock when dropped, so an early
/// return or panic cannot leave it held.
struct MigrationLockGuard {
    lock: Arc<AtomicBool>,
}

impl Drop for MigrationLockGuard {
    fn drop(&mut self) {
        self.lock.store(false, Ordering::SeqCst);
    }
}

fn timestamp_version(now: DateTime<Utc>) -> u64 {
    (now.year().max(0) as u64) * 10_000_000_000
        + u64::from(now.month()) * 100_000_000
        + u64::from(now.day()) * 1_000_000
        + u64::from(now.hour()) * 10_000
        + u64::from(now.minute()) * 100
        + u64::from(now.second())
}

fn sanitize_name(name: &str) -> Result<String, ConfigurationError> {
    let mut slug = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            slug.push(ch.to_ascii_lowercase());
            pending_separator = false;
        } else {
            pending_separator = true;
        }
    }
    if slug.is_empty() {
        return Err(ConfigurationError::Invalid(
            "migration name must contain at least one alphanumeric character".to_string(),
        ));
    }
    Ok(slug)
}

/// Orchestrates one backend instance: lifecycle, migrations, rollback,
/// backups, and health reporting.
///
/// The manager is synchronous and single-threaded: every call blocks for
/// its full I/O duration. A cooperative in-process lock turns re-entrant
/// migration or rollback calls into logged no-ops.
///
/// ```no_run
/// use strata_core::{DatabaseConfig, DatabaseManager, MigrationScript};
///
/// # fn demo() -> Result<(), strata_core::DatabaseError> {
/// let mut manager = DatabaseManager::new(DatabaseConfig::default());
/// manager.register_migration(
///     MigrationScript::new("20240101120000", "seed", |backend, _config| {
///         backend.set("greeting", strata_storage::Record::new())?;
///         Ok(())
///     })?
///     .with_down(|backend, _config| {
///         backend.delete("greeting")?;
///         Ok(())
///     }),
/// )?;
/// let report = manager.initialize()?;
/// assert_eq!(report.version, 20240101120000);
/// # Ok(())
/// # }
/// ```
pub struct DatabaseManager {
    config: DatabaseConfig,
    backends: BackendRegistry,
    registry: MigrationRegistry,
    backup: BackupManager,
    backend: Option<Box<dyn StorageBackend>>,
    state: ManagerState,
    cached_version: Mutex<Option<u64>>,
    migration_lock: Arc<AtomicBool>,
}

impl DatabaseManager {
    /// Creates a manager with the built-in backend registry and no
    /// migrations registered.
    #[must_use]
    pub fn new(config: DatabaseConfig) -> Self {
        Self::with_migrations(config, MigrationRegistry::new())
    }

    /// Creates a manager with a pre-populated migration registry.
    #[must_use]
    pub fn with_migrations(config: DatabaseConfig, registry: MigrationRegistry) -> Self {
        let backup = BackupManager::new(config.backup_path.clone());
        Self {
            config,
            backends: BackendRegistry::with_defaults(),
            registry,
            backup,
            backend: None,
            state: ManagerState::Uninitialized,
            cached_version: Mutex::new(None),
            migration_lock: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The manager's configuration.
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The manager's lifecycle state.
    #[must_use]
    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// The migration registry.
    #[must_use]
    pub fn migrations(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// The backend factory registry, for registering custom engines
    /// before [`initialize`](Self::initialize).
    pub fn backends_mut(&mut self) -> &mut BackendRegistry {
        &mut self.backends
    }

    /// The backup manager, for listing existing backups.
    #[must_use]
    pub fn backups(&self) -> &BackupManager {
        &self.backup
    }

    /// Registers one migration script.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::DuplicateVersion`] when the version is
    /// already registered.
    pub fn register_migration(&mut self, script: MigrationScript) -> Result<(), MigrationError> {
        self.registry.register(script)
    }

    /// Constructs and initializes the configured backend without running
    /// migrations.
    ///
    /// Read-only consumers (status inspection, backups) connect with this
    /// and skip the migration run; [`initialize`](Self::initialize) is
    /// `connect` followed by [`run_migrations`](Self::run_migrations).
    /// Connecting twice warns and is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnsupportedBackend`] for an unknown
    /// backend name, or the backend's own initialization failure.
    pub fn connect(&mut self) -> DatabaseResult<()> {
        match self.state {
            ManagerState::Initialized => {
                warn!("database manager is already initialized");
                return Ok(());
            }
            ManagerState::Closed => return Err(DatabaseError::Closed),
            ManagerState::Uninitialized => {}
        }

        self.config.validate()?;
        let mut backend = self.backends.create(&self.config)?;
        backend.initialize()?;
        info!(backend = backend.kind(), "storage backend initialized");

        self.backend = Some(backend);
        self.state = ManagerState::Initialized;
        Ok(())
    }

    /// Constructs and initializes the configured backend, then runs all
    /// pending migrations.
    ///
    /// Initializing an already-initialized manager warns and reports a
    /// skipped run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnsupportedBackend`] for an unknown
    /// backend name, the backend's own initialization failure, or the
    /// first migration failure.
    pub fn initialize(&mut self) -> DatabaseResult<MigrationReport> {
        if self.state == ManagerState::Initialized {
            warn!("database manager is already initialized");
            return Ok(MigrationReport {
                applied: Vec::new(),
                backups: Vec::new(),
                version: self.schema_version()?,
                skipped: true,
            });
        }
        self.connect()?;
        self.run_migrations()
    }

    /// Closes the backend and retires the manager.
    ///
    /// # Errors
    ///
    /// Returns the backend's close failure. Closing twice is a no-op.
    pub fn close(&mut self) -> DatabaseResult<()> {
        if self.state == ManagerState::Initialized {
            if let Some(backend) = self.backend.as_mut() {
                backend.close()?;
            }
        }
        self.backend = None;
        *self.cached_version.lock() = None;
        self.state = ManagerState::Closed;
        Ok(())
    }

    /// The live backend, for reads.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotInitialized`] or
    /// [`DatabaseError::Closed`] outside the initialized state.
    pub fn backend(&self) -> DatabaseResult<&dyn StorageBackend> {
        self.ensure_initialized()?;
        self.backend.as_deref().ok_or(DatabaseError::NotInitialized)
    }

    /// The live backend, for CRUD.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::NotInitialized`] or
    /// [`DatabaseError::Closed`] outside the initialized state.
    pub fn backend_mut(&mut self) -> DatabaseResult<&mut (dyn StorageBackend + 'static)> {
        self.ensure_initialized()?;
        self.backend
            .as_deref_mut()
            .ok_or(DatabaseError::NotInitialized)
    }

    /// The current schema version: the highest applied migration, or 0.
    ///
    /// Cached after the first read; migration runs, rollbacks, and
    /// restores refresh the cache.
    ///
    /// # Errors
    ///
    /// Returns a query failure from reading the version record.
    pub fn schema_version(&self) -> DatabaseResult<u64> {
        if let Some(version) = *self.cached_version.lock() {
            return Ok(version);
        }
        let version = read_schema_version(self.backend()?)?;
        *self.cached_version.lock() = Some(version);
        Ok(version)
    }

    /// History of applied migrations, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a query failure from reading the history record.
    pub fn migration_history(&self) -> DatabaseResult<Vec<MigrationRecord>> {
        read_migration_history(self.backend()?)
    }

    /// Audit history of rollbacks, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a query failure from reading the history record.
    pub fn rollback_history(&self) -> DatabaseResult<Vec<RollbackRecord>> {
        read_rollback_history(self.backend()?)
    }

    /// Applies every registered migration newer than the current schema
    /// version, in ascending order.
    ///
    /// Each migration validates its dependencies immediately before
    /// executing, then runs its `up` transform, the schema version bump,
    /// and the history append inside one backend transaction. A failure
    /// rolls that migration back completely and stops the run; migrations
    /// already applied by the same run stay applied.
    ///
    /// Risky and destructive migrations are preceded by a backup.
    ///
    /// # Errors
    ///
    /// Returns the first [`MigrationError`] encountered, already rolled
    /// back.
    pub fn run_migrations(&mut self) -> DatabaseResult<MigrationReport> {
        self.ensure_initialized()?;
        let Some(_guard) = self.acquire_migration_lock() else {
            warn!("migration run already in progress; ignoring");
            return Ok(MigrationReport {
                applied: Vec::new(),
                backups: Vec::new(),
                version: self.schema_version()?,
                skipped: true,
            });
        };
        self.run_migrations_locked()
    }

    fn run_migrations_locked(&mut self) -> DatabaseResult<MigrationReport> {
        let config = &self.config;
        let registry = &self.registry;
        let backup = &self.backup;
        let backend = self.backend.as_mut().ok_or(DatabaseError::NotInitialized)?;

        let mut version = read_schema_version(backend.as_ref())?;
        let mut history = read_migration_history(backend.as_ref())?;
        let pending = registry.pending_after(version);

        if pending.is_empty() {
            debug!(version, "schema is up to date");
            *self.cached_version.lock() = Some(version);
            return Ok(MigrationReport {
                applied: Vec::new(),
                backups: Vec::new(),
                version,
                skipped: false,
            });
        }
        info!(count = pending.len(), current = version, "applying pending migrations");

        let mut applied = Vec::new();
        let mut backups = Vec::new();
        for next in pending {
            let script = registry
                .get(next)
                .ok_or(MigrationError::UnknownVersion { version: next })?;

            let in_history: BTreeSet<u64> = history.iter().map(|record| record.version).collect();
            for dependency in script.dependencies() {
                if !in_history.contains(dependency) {
                    let err = MigrationError::UnmetDependency {
                        version: next,
                        name: script.name().to_string(),
                        dependency: *dependency,
                    };
                    error!(error = %err, "aborting migration run");
                    *self.cached_version.lock() = Some(version);
                    return Err(err.into());
                }
            }

            if script.is_risky() || script.is_destructive() {
                info!(version = next, name = script.name(), "backing up before risky migration");
                let path = backup.create(backend.as_ref(), version, None)?;
                backups.push(path);
            }

            let mut next_history = history.clone();
            next_history.push(MigrationRecord {
                version: next,
                name: script.name().to_string(),
                hash: script.hash(),
                applied_at: Utc::now(),
            });

            let outcome: DatabaseResult<()> = backend.as_mut().transaction(|b| {
                script.apply_up(b, config)?;
                write_schema_version(b, next)?;
                write_migration_history(b, &next_history)?;
                Ok(())
            });

            match outcome {
                Ok(()) => {
                    info!(version = next, name = script.name(), "migration applied");
                    history = next_history;
                    version = next;
                    applied.push(next);
                }
                Err(err) => {
                    error!(
                        version = next,
                        name = script.name(),
                        error = %err,
                        "migration failed and was rolled back"
                    );
                    *self.cached_version.lock() = Some(version);
                    return Err(err);
                }
            }
        }

        *self.cached_version.lock() = Some(version);
        Ok(MigrationReport {
            applied,
            backups,
            version,
            skipped: false,
        })
    }

    /// Rolls back the last `steps` applied migrations, newest first.
    ///
    /// `steps == 0` is a no-op; more steps than history entries rolls
    /// back everything. A backup is always written before the first
    /// `down` runs.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::MissingDown`] when a migration in range
    /// defines no `down`, or the first `down` failure.
    pub fn rollback_migration(&mut self, steps: usize) -> DatabaseResult<RollbackReport> {
        self.ensure_initialized()?;
        if steps == 0 {
            return Ok(RollbackReport {
                rolled_back: Vec::new(),
                version: self.schema_version()?,
                backup: None,
                skipped: false,
            });
        }
        let Some(_guard) = self.acquire_migration_lock() else {
            warn!("migration run already in progress; ignoring rollback");
            return Ok(RollbackReport {
                rolled_back: Vec::new(),
                version: self.schema_version()?,
                backup: None,
                skipped: true,
            });
        };
        let history = read_migration_history(self.backend_ref()?)?;
        let take = steps.min(history.len());
        let to_undo = history[history.len() - take..].to_vec();
        self.rollback_records_locked(to_undo)
    }

    /// Rolls back every migration newer than `target`, leaving the schema
    /// at exactly `target`.
    ///
    /// `target` must be 0 or an applied version.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::TargetNotFound`] for any other target,
    /// [`MigrationError::MissingDown`] when a migration in range defines
    /// no `down`, or the first `down` failure.
    pub fn rollback_to_version(&mut self, target: u64) -> DatabaseResult<RollbackReport> {
        self.ensure_initialized()?;
        let Some(_guard) = self.acquire_migration_lock() else {
            warn!("migration run already in progress; ignoring rollback");
            return Ok(RollbackReport {
                rolled_back: Vec::new(),
                version: self.schema_version()?,
                backup: None,
                skipped: true,
            });
        };
        let history = read_migration_history(self.backend_ref()?)?;
        if target != 0 && !history.iter().any(|record| record.version == target) {
            return Err(MigrationError::TargetNotFound { target }.into());
        }
        let to_undo: Vec<MigrationRecord> = history
            .iter()
            .filter(|record| record.version > target)
            .cloned()
            .collect();
        self.rollback_records_locked(to_undo)
    }

    fn rollback_records_locked(
        &mut self,
        to_undo: Vec<MigrationRecord>,
    ) -> DatabaseResult<RollbackReport> {
        let config = &self.config;
        let registry = &self.registry;
        let backup_mgr = &self.backup;
        let backend = self.backend.as_mut().ok_or(DatabaseError::NotInitialized)?;

        let mut history = read_migration_history(backend.as_ref())?;
        let mut rollbacks = read_rollback_history(backend.as_ref())?;
        let mut version = read_schema_version(backend.as_ref())?;

        if to_undo.is_empty() {
            *self.cached_version.lock() = Some(version);
            return Ok(RollbackReport {
                rolled_back: Vec::new(),
                version,
                backup: None,
                skipped: false,
            });
        }

        let backup_path = backup_mgr.create(backend.as_ref(), version, None)?;
        info!(path = %backup_path.display(), "pre-rollback backup written");

        let mut rolled_back = Vec::new();
        for record in to_undo.iter().rev() {
            let script = registry.get(record.version).ok_or(MigrationError::UnknownVersion {
                version: record.version,
            })?;
            if !script.has_down() {
                let err = MigrationError::MissingDown {
                    version: record.version,
                    name: script.name().to_string(),
                };
                error!(error = %err, "aborting rollback");
                *self.cached_version.lock() = Some(version);
                return Err(err.into());
            }
            if script.hash() != record.hash {
                warn!(
                    version = record.version,
                    name = script.name(),
                    "migration changed since it was applied; hashes differ"
                );
            }
            if script.is_destructive() {
                warn!(
                    version = record.version,
                    name = script.name(),
                    "rolling back a data-destructive migration"
                );
            }

            let next_history: Vec<MigrationRecord> = history
                .iter()
                .filter(|entry| entry.version != record.version)
                .cloned()
                .collect();
            let next_version = next_history
                .iter()
                .map(|entry| entry.version)
                .max()
                .unwrap_or(0);
            let mut next_rollbacks = rollbacks.clone();
            next_rollbacks.push(RollbackRecord {
                version: record.version,
                name: record.name.clone(),
                rolled_back_at: Utc::now(),
            });

            let outcome: DatabaseResult<()> = backend.as_mut().transaction(|b| {
                script.apply_down(b, config)?;
                write_migration_history(b, &next_history)?;
                write_rollback_history(b, &next_rollbacks)?;
                write_schema_version(b, next_version)?;
                Ok(())
            });

            match outcome {
                Ok(()) => {
                    info!(version = record.version, name = record.name.as_str(), "migration rolled back");
                    history = next_history;
                    rollbacks = next_rollbacks;
                    version = next_version;
                    rolled_back.push(record.version);
                }
                Err(err) => {
                    error!(
                        version = record.version,
                        error = %err,
                        "rollback failed and was undone"
                    );
                    *self.cached_version.lock() = Some(version);
                    return Err(err);
                }
            }
        }

        *self.cached_version.lock() = Some(version);
        Ok(RollbackReport {
            rolled_back,
            version,
            backup: Some(backup_path),
            skipped: false,
        })
    }

    /// Assesses rolling back `version` without executing anything.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::UnknownVersion`] when no script carries
    /// the version.
    pub fn check_rollback_safety(&self, version: u64) -> DatabaseResult<RollbackSafety> {
        let script = self
            .registry
            .get(version)
            .ok_or(MigrationError::UnknownVersion { version })?;

        let (safe, warning) = if !script.has_down() {
            (
                false,
                Some("migration defines no down transform and cannot be rolled back".to_string()),
            )
        } else if script.is_destructive() {
            (
                false,
                Some(
                    "rolling back this migration may cause irrecoverable data loss".to_string(),
                ),
            )
        } else {
            (true, None)
        };

        Ok(RollbackSafety {
            version,
            name: script.name().to_string(),
            safe,
            data_destructive: script.is_destructive(),
            warning,
        })
    }

    /// Exports the store into a backup document.
    ///
    /// Writes to `path` when given, otherwise to a timestamped file in
    /// the configured backup directory.
    ///
    /// # Errors
    ///
    /// Returns the export or write failure.
    pub fn backup_database(&self, path: Option<PathBuf>) -> DatabaseResult<PathBuf> {
        let version = self.schema_version()?;
        self.backup.create(self.backend()?, version, path)
    }

    /// Replaces the store's contents with a backup document.
    ///
    /// Refuses backups taken from a different backend kind or carrying a
    /// schema version newer than the latest registered migration, unless
    /// `force` is set.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::Restore`] for an unreadable or
    /// incompatible backup, or the import failure.
    pub fn restore_database(&mut self, path: &Path, force: bool) -> DatabaseResult<()> {
        self.ensure_initialized()?;
        let backup = self.backup.load(path)?;

        let active_kind = self.backend()?.kind();
        if backup.backend_type != active_kind {
            if force {
                warn!(
                    from = backup.backend_type.as_str(),
                    to = active_kind,
                    "restoring across backend kinds"
                );
            } else {
                return Err(DatabaseError::restore(format!(
                    "backup was taken from backend `{}` but the active backend is `{active_kind}`; \
                     use force to restore anyway",
                    backup.backend_type
                )));
            }
        }

        let latest = self.registry.latest_version();
        if backup.schema_version > latest {
            if force {
                warn!(
                    backup_version = backup.schema_version,
                    latest_registered = latest,
                    "restoring a backup newer than the registered migrations"
                );
            } else {
                return Err(DatabaseError::restore(format!(
                    "backup schema version {} is newer than the latest registered migration \
                     {latest}; use force to restore anyway",
                    backup.schema_version
                )));
            }
        }

        self.backend_mut()?.import_data(backup.data)?;
        *self.cached_version.lock() = None;
        info!(path = %path.display(), "database restored from backup");
        Ok(())
    }

    /// Merges the manager's state with the backend's statistics.
    ///
    /// # Errors
    ///
    /// Returns a query failure from reading bookkeeping records.
    pub fn health_status(&self) -> DatabaseResult<HealthStatus> {
        let mut status = HealthStatus {
            state: self.state,
            backend: None,
            schema_version: None,
            registered_migrations: self.registry.len(),
            applied_migrations: None,
            pending_migrations: None,
            backend_stats: None,
        };

        if self.state == ManagerState::Initialized {
            if let Some(backend) = self.backend.as_deref() {
                let version = self.schema_version()?;
                status.backend = Some(backend.kind().to_string());
                status.schema_version = Some(version);
                status.applied_migrations = Some(read_migration_history(backend)?.len());
                status.pending_migrations = Some(self.registry.pending_after(version).len());
                status.backend_stats = Some(backend.stats());
            }
        }
        Ok(status)
    }

    /// Scaffolds a migration source file in the configured migrations
    /// directory and returns its path.
    ///
    /// The file is named `<14-digit-version>_<name>.rs`, with the version
    /// taken from the current UTC time and bumped past any collision.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Invalid`] for a name with no
    /// alphanumeric characters, or the write failure.
    pub fn create_migration(&self, name: &str, description: &str) -> DatabaseResult<PathBuf> {
        let slug = sanitize_name(name)?;
        let dir = &self.config.migrations_path;
        fs::create_dir_all(dir).map_err(StorageError::from)?;

        let mut version = timestamp_version(Utc::now());
        let path = loop {
            let candidate = dir.join(format!("{version}_{slug}.rs"));
            if !candidate.exists() {
                break candidate;
            }
            version += 1;
        };

        let escaped = description.replace('\\', "\\\\").replace('"', "\\\"");
        let contents = format!(
            r#"//! {description}

use strata_core::{{DatabaseConfig, MigrationError, MigrationScript}};
use strata_storage::StorageBackend;

/// Migration version stamp.
pub const VERSION: &str = "{version}";

/// One-line summary shown in histories and reports.
pub const DESCRIPTION: &str = "{escaped}";

/// Versions that must already be applied before this one runs.
pub const DEPENDENCIES: &[&str] = &[];

/// Builds the `{slug}` migration for registration.
pub fn migration() -> Result<MigrationScript, MigrationError> {{
    let mut script = MigrationScript::new(VERSION, "{slug}", up)?
        .with_description(DESCRIPTION)
        .with_down(down);
    for dependency in DEPENDENCIES {{
        script = script.with_dependency(dependency)?;
    }}
    Ok(script)
}}

fn up(backend: &mut dyn StorageBackend, _config: &DatabaseConfig) -> Result<(), MigrationError> {{
    // TODO: apply the schema change.
    let _ = backend;
    Ok(())
}}

fn down(backend: &mut dyn StorageBackend, _config: &DatabaseConfig) -> Result<(), MigrationError> {{
    // TODO: undo the schema change.
    let _ = backend;
    Ok(())
}}
"#
        );
        fs::write(&path, contents).map_err(StorageError::from)?;
        info!(path = %path.display(), version, "migration scaffold written");
        Ok(path)
    }

    fn acquire_migration_lock(&self) -> Option<MigrationLockGuard> {
        if self.migration_lock.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(MigrationLockGuard {
            lock: Arc::clone(&self.migration_lock),
        })
    }

    fn backend_ref(&self) -> DatabaseResult<&dyn StorageBackend> {
        self.backend.as_deref().ok_or(DatabaseError::NotInitialized)
    }

    fn ensure_initialized(&self) -> DatabaseResult<()> {
        match self.state {
            ManagerState::Initialized => Ok(()),
            ManagerState::Uninitialized => Err(DatabaseError::NotInitialized),
            ManagerState::Closed => Err(DatabaseError::Closed),
        }
    }
}

impl fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("state", &self.state)
            .field("backend", &self.config.backend)
            .field("registered_migrations", &self.registry.len())
            .finish_non_exhaustive()
    }
}
