//! Migration scripts, version parsing, and the migration registry.
//!
//! A migration is a registered record: a version, a name, an `up`
//! transform, and optionally a `down` transform, plus dependency versions
//! and risk flags. Scripts register explicitly (typically from functions
//! scaffolded by `create_migration`) rather than being loaded from disk at
//! runtime, so the set of migrations is fixed at compile time and checked
//! by the compiler.

use crate::config::DatabaseConfig;
use crate::error::MigrationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use strata_storage::StorageBackend;

/// Reserved key holding the current schema version.
pub const SCHEMA_VERSION_KEY: &str = "_schema_version";

/// Reserved key holding the applied-migration history.
pub const MIGRATION_HISTORY_KEY: &str = "_migration_history";

/// Reserved key holding the rollback audit history.
pub const ROLLBACK_HISTORY_KEY: &str = "_rollback_history";

/// A migration transform over a live backend.
pub type MigrationFn =
    Box<dyn Fn(&mut dyn StorageBackend, &DatabaseConfig) -> Result<(), MigrationError> + Send + Sync>;

/// Parses a migration version string into its 14-digit integer form.
///
/// Accepted forms:
///
/// - `20240101120000` (14 digits)
/// - `20240101.120000` or `20240101_120000` (8 date digits and 6 time
///   digits), normalized to the 14-digit integer
///
/// # Errors
///
/// Returns [`MigrationError::InvalidVersion`] for anything else.
pub fn parse_version(input: &str) -> Result<u64, MigrationError> {
    let invalid = || MigrationError::InvalidVersion {
        input: input.to_string(),
    };

    let bytes = input.as_bytes();
    let mut digits = [0u8; 14];
    match bytes.len() {
        14 => digits.copy_from_slice(bytes),
        15 if matches!(bytes[8], b'.' | b'_') => {
            digits[..8].copy_from_slice(&bytes[..8]);
            digits[8..].copy_from_slice(&bytes[9..]);
        }
        _ => return Err(invalid()),
    }
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    // 14 ASCII digits always fit in a u64.
    std::str::from_utf8(&digits)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(invalid)
}

/// Splits a migration filename into its version and name.
///
/// Accepts `<version>_<name>[.rs]` where the version takes either form
/// [`parse_version`] accepts, e.g. `20240101120000_add_users.rs` or
/// `20240101_120000_add_users.rs`.
///
/// # Errors
///
/// Returns [`MigrationError::InvalidVersion`] when no version prefix or no
/// name is present.
pub fn version_from_filename(filename: &str) -> Result<(u64, String), MigrationError> {
    let invalid = || MigrationError::InvalidVersion {
        input: filename.to_string(),
    };
    let stem = filename.strip_suffix(".rs").unwrap_or(filename);
    let bytes = stem.as_bytes();

    let digits = |range: std::ops::Range<usize>| {
        bytes
            .get(range)
            .is_some_and(|slice| slice.iter().all(u8::is_ascii_digit))
    };

    // <14 digits>_<name>
    if digits(0..14) && bytes.get(14) == Some(&b'_') {
        let version = parse_version(&stem[..14])?;
        let name = &stem[15..];
        if name.is_empty() {
            return Err(invalid());
        }
        return Ok((version, name.to_string()));
    }

    // <8 digits>[._]<6 digits>_<name>
    if digits(0..8)
        && matches!(bytes.get(8), Some(&b'.') | Some(&b'_'))
        && digits(9..15)
        && bytes.get(15) == Some(&b'_')
    {
        let version = parse_version(&stem[..15])?;
        let name = &stem[16..];
        if name.is_empty() {
            return Err(invalid());
        }
        return Ok((version, name.to_string()));
    }

    Err(invalid())
}

/// A registered schema migration.
///
/// Built fluently and handed to a
/// [`MigrationRegistry`] (usually through
/// [`DatabaseManager::register_migration`](crate::DatabaseManager::register_migration)):
///
/// ```
/// use strata_core::{MigrationError, MigrationScript};
///
/// # fn demo() -> Result<MigrationScript, MigrationError> {
/// let script = MigrationScript::new("20240101120000", "add_users", |backend, _config| {
///     let mut record = strata_storage::Record::new();
///     record.insert("admin".to_string(), serde_json::json!(true));
///     backend.set("users:admin", record)?;
///     Ok(())
/// })?
/// .with_description("seed the admin user")
/// .with_down(|backend, _config| {
///     backend.delete("users:admin")?;
///     Ok(())
/// });
/// # Ok(script)
/// # }
/// # demo().unwrap();
/// ```
pub struct MigrationScript {
    version: u64,
    name: String,
    description: String,
    dependencies: Vec<u64>,
    risky: bool,
    destructive: bool,
    source_hash: Option<String>,
    up: MigrationFn,
    down: Option<MigrationFn>,
}

impl MigrationScript {
    /// Creates a script from a version string, a name, and an `up`
    /// transform.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::InvalidVersion`] when `version` is not in
    /// an accepted form.
    pub fn new<F>(version: &str, name: impl Into<String>, up: F) -> Result<Self, MigrationError>
    where
        F: Fn(&mut dyn StorageBackend, &DatabaseConfig) -> Result<(), MigrationError>
            + Send
            + Sync
            + 'static,
    {
        Ok(Self {
            version: parse_version(version)?,
            name: name.into(),
            description: String::new(),
            dependencies: Vec::new(),
            risky: false,
            destructive: false,
            source_hash: None,
            up: Box::new(up),
            down: None,
        })
    }

    /// Sets the human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a dependency on another migration's version.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::InvalidVersion`] when `version` is not in
    /// an accepted form.
    pub fn with_dependency(mut self, version: &str) -> Result<Self, MigrationError> {
        self.dependencies.push(parse_version(version)?);
        Ok(self)
    }

    /// Marks the migration risky: a backup is taken before it applies.
    #[must_use]
    pub fn risky(mut self) -> Self {
        self.risky = true;
        self
    }

    /// Marks the migration data-destructive: rolling it back risks
    /// irrecoverable data loss and requires explicit confirmation.
    #[must_use]
    pub fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }

    /// Sets the `down` transform enabling rollback.
    #[must_use]
    pub fn with_down<F>(mut self, down: F) -> Self
    where
        F: Fn(&mut dyn StorageBackend, &DatabaseConfig) -> Result<(), MigrationError>
            + Send
            + Sync
            + 'static,
    {
        self.down = Some(Box::new(down));
        self
    }

    /// Pins the integrity hash to an externally computed value, such as a
    /// hash of the generating source file.
    ///
    /// Without this, the hash derives from the script's identity fields.
    #[must_use]
    pub fn with_source_hash(mut self, hash: impl Into<String>) -> Self {
        self.source_hash = Some(hash.into());
        self
    }

    /// The normalized 14-digit version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The migration's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Versions that must be in history before this script applies.
    #[must_use]
    pub fn dependencies(&self) -> &[u64] {
        &self.dependencies
    }

    /// Whether a backup is taken before this script applies.
    #[must_use]
    pub fn is_risky(&self) -> bool {
        self.risky
    }

    /// Whether rolling this script back risks irrecoverable data loss.
    #[must_use]
    pub fn is_destructive(&self) -> bool {
        self.destructive
    }

    /// Whether the script can be rolled back.
    #[must_use]
    pub fn has_down(&self) -> bool {
        self.down.is_some()
    }

    /// The integrity hash recorded in history when this script applies.
    ///
    /// Either the pinned source hash or a SHA-256 over the identity
    /// fields. History entries whose hash no longer matches produce a
    /// warning during rollback.
    #[must_use]
    pub fn hash(&self) -> String {
        if let Some(hash) = &self.source_hash {
            return hash.clone();
        }
        let mut hasher = Sha256::new();
        hasher.update(self.version.to_string());
        hasher.update(b"\n");
        hasher.update(&self.name);
        hasher.update(b"\n");
        hasher.update(&self.description);
        hasher.update(b"\n");
        for dependency in &self.dependencies {
            hasher.update(dependency.to_string());
            hasher.update(b",");
        }
        hasher.update([u8::from(self.risky), u8::from(self.destructive)]);
        hex::encode(hasher.finalize())
    }

    /// Runs the `up` transform, wrapping any failure with this script's
    /// identity.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::Execution`] carrying the underlying
    /// failure.
    pub fn apply_up(
        &self,
        backend: &mut dyn StorageBackend,
        config: &DatabaseConfig,
    ) -> Result<(), MigrationError> {
        (self.up)(backend, config)
            .map_err(|err| MigrationError::execution(self.version, &self.name, "up", err))
    }

    /// Runs the `down` transform, wrapping any failure with this script's
    /// identity.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::MissingDown`] when the script defines no
    /// `down`, or [`MigrationError::Execution`] when the transform fails.
    pub fn apply_down(
        &self,
        backend: &mut dyn StorageBackend,
        config: &DatabaseConfig,
    ) -> Result<(), MigrationError> {
        let Some(down) = &self.down else {
            return Err(MigrationError::MissingDown {
                version: self.version,
                name: self.name.clone(),
            });
        };
        down(backend, config)
            .map_err(|err| MigrationError::execution(self.version, &self.name, "down", err))
    }
}

impl fmt::Debug for MigrationScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationScript")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("risky", &self.risky)
            .field("destructive", &self.destructive)
            .field("has_down", &self.down.is_some())
            .finish_non_exhaustive()
    }
}

/// The ordered set of registered migrations, keyed by version.
#[derive(Debug, Default)]
pub struct MigrationRegistry {
    scripts: BTreeMap<u64, MigrationScript>,
}

impl MigrationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a script.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::DuplicateVersion`] when another script
    /// already carries the same version. Two scripts resolving to one
    /// version is a configuration error, never silently resolved.
    pub fn register(&mut self, script: MigrationScript) -> Result<(), MigrationError> {
        if let Some(existing) = self.scripts.get(&script.version) {
            return Err(MigrationError::DuplicateVersion {
                version: script.version,
                existing: existing.name.clone(),
                incoming: script.name,
            });
        }
        self.scripts.insert(script.version, script);
        Ok(())
    }

    /// Registers every script in `scripts`, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Returns the first [`MigrationError::DuplicateVersion`] encountered.
    pub fn register_all(
        &mut self,
        scripts: impl IntoIterator<Item = MigrationScript>,
    ) -> Result<(), MigrationError> {
        for script in scripts {
            self.register(script)?;
        }
        Ok(())
    }

    /// Looks up a script by version.
    #[must_use]
    pub fn get(&self, version: u64) -> Option<&MigrationScript> {
        self.scripts.get(&version)
    }

    /// All registered versions, ascending.
    #[must_use]
    pub fn versions(&self) -> Vec<u64> {
        self.scripts.keys().copied().collect()
    }

    /// Versions greater than `current`, ascending: the pending set for a
    /// store at `current`.
    #[must_use]
    pub fn pending_after(&self, current: u64) -> Vec<u64> {
        self.scripts
            .range(current.saturating_add(1)..)
            .map(|(version, _)| *version)
            .collect()
    }

    /// The highest registered version, or 0 when empty.
    #[must_use]
    pub fn latest_version(&self) -> u64 {
        self.scripts.keys().next_back().copied().unwrap_or(0)
    }

    /// Number of registered scripts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    /// Whether no scripts are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Iterates scripts in ascending version order.
    pub fn iter(&self) -> impl Iterator<Item = &MigrationScript> {
        self.scripts.values()
    }
}

/// History entry for one applied migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// The applied version.
    pub version: u64,
    /// The migration's name.
    pub name: String,
    /// Integrity hash of the script at application time.
    pub hash: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

/// Audit entry for one rolled-back migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    /// The rolled-back version.
    pub version: u64,
    /// The migration's name.
    pub name: String,
    /// When the rollback ran.
    pub rolled_back_at: DateTime<Utc>,
}

/// Safety assessment for rolling back one migration, computed without
/// executing anything.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackSafety {
    /// The inspected version.
    pub version: u64,
    /// The migration's name.
    pub name: String,
    /// Whether the rollback can proceed without an operator override.
    pub safe: bool,
    /// Whether the migration is flagged data-destructive.
    pub data_destructive: bool,
    /// Why the rollback is unsafe, when it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}
