//! End-to-end migration, rollback, and backup flows across backends.

use strata_core::{
    DatabaseConfig, DatabaseManager, ManagerState, MigrationScript, Record,
};
use tempfile::TempDir;

const V1: u64 = 20240101120000;
const V2: u64 = 20240102120000;

fn record(value: i64) -> Record {
    let mut record = Record::new();
    record.insert("value".to_string(), serde_json::json!(value));
    record
}

fn config_for(dir: &TempDir, backend: &str) -> DatabaseConfig {
    let file = if backend == "json" { "flow.json" } else { "flow.db" };
    DatabaseConfig::new()
        .backend(backend)
        .connection_string(dir.path().join(file).display().to_string())
        .migrations_path(dir.path().join("migrations"))
        .backup_path(dir.path().join("backups"))
        .cache_size(16)
}

fn set_a_script() -> MigrationScript {
    MigrationScript::new("20240101120000", "set_a", |backend, _config| {
        backend.set("a", record(1))?;
        Ok(())
    })
    .unwrap()
    .with_description("seed the a record")
    .with_down(|backend, _config| {
        backend.delete("a")?;
        Ok(())
    })
}

fn set_b_script() -> MigrationScript {
    MigrationScript::new("20240102120000", "set_b", |backend, _config| {
        backend.set("b", record(2))?;
        Ok(())
    })
    .unwrap()
    .with_dependency("20240101120000")
    .unwrap()
    .with_down(|backend, _config| {
        backend.delete("b")?;
        Ok(())
    })
}

fn seeded_manager(dir: &TempDir, backend: &str) -> DatabaseManager {
    let mut manager = DatabaseManager::new(config_for(dir, backend));
    manager.register_migration(set_a_script()).unwrap();
    manager.register_migration(set_b_script()).unwrap();
    manager
}

#[test]
fn fresh_store_migrates_to_latest_and_rolls_back() {
    for backend in ["json", "sqlite"] {
        let dir = TempDir::new().unwrap();
        let mut manager = seeded_manager(&dir, backend);

        let report = manager.initialize().unwrap();
        assert_eq!(report.applied, vec![V1, V2], "backend {backend}");
        assert_eq!(manager.schema_version().unwrap(), V2);
        {
            let store = manager.backend().unwrap();
            assert_eq!(store.get("a").unwrap(), Some(record(1)));
            assert_eq!(store.get("b").unwrap(), Some(record(2)));
        }
        assert_eq!(manager.migration_history().unwrap().len(), 2);

        let rollback = manager.rollback_to_version(V1).unwrap();
        assert_eq!(rollback.rolled_back, vec![V2], "backend {backend}");
        assert_eq!(manager.schema_version().unwrap(), V1);
        {
            let store = manager.backend().unwrap();
            assert_eq!(store.get("a").unwrap(), Some(record(1)));
            assert_eq!(store.get("b").unwrap(), None);
        }
        assert_eq!(manager.rollback_history().unwrap().len(), 1);
        manager.close().unwrap();
    }
}

#[test]
fn schema_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let mut manager = seeded_manager(&dir, "json");
    manager.initialize().unwrap();
    manager.close().unwrap();

    let mut reopened = seeded_manager(&dir, "json");
    let report = reopened.initialize().unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(report.version, V2);
    assert_eq!(reopened.migration_history().unwrap().len(), 2);
    reopened.close().unwrap();
}

#[test]
fn reopened_store_applies_only_new_migrations() {
    let dir = TempDir::new().unwrap();

    // First deployment ships only the first migration.
    let mut first = DatabaseManager::new(config_for(&dir, "sqlite"));
    first.register_migration(set_a_script()).unwrap();
    first.initialize().unwrap();
    first.close().unwrap();

    // The next deployment adds one more; only that one runs.
    let mut second = seeded_manager(&dir, "sqlite");
    let report = second.initialize().unwrap();
    assert_eq!(report.applied, vec![V2]);
    assert_eq!(second.migration_history().unwrap().len(), 2);
    second.close().unwrap();
}

#[test]
fn backup_moves_data_between_backends() {
    let json_dir = TempDir::new().unwrap();
    let mut source = seeded_manager(&json_dir, "json");
    source.initialize().unwrap();
    source
        .backend_mut()
        .unwrap()
        .set("users:1", record(42))
        .unwrap();
    let backup = source.backup_database(None).unwrap();
    source.close().unwrap();

    let sqlite_dir = TempDir::new().unwrap();
    let mut target = seeded_manager(&sqlite_dir, "sqlite");
    target.initialize().unwrap();

    // Cross-backend restores require the force flag.
    assert!(target.restore_database(&backup, false).is_err());
    target.restore_database(&backup, true).unwrap();

    assert_eq!(
        target.backend().unwrap().get("users:1").unwrap(),
        Some(record(42))
    );
    assert_eq!(target.schema_version().unwrap(), V2);
    target.close().unwrap();
}

#[test]
fn manager_walks_through_lifecycle_states() {
    let dir = TempDir::new().unwrap();
    let mut manager = seeded_manager(&dir, "json");
    assert_eq!(manager.state(), ManagerState::Uninitialized);
    assert!(manager.backend().is_err());

    manager.initialize().unwrap();
    assert_eq!(manager.state(), ManagerState::Initialized);

    manager.close().unwrap();
    assert_eq!(manager.state(), ManagerState::Closed);
    assert!(manager.backend().is_err());
}

#[test]
fn bookkeeping_keys_are_listed_with_literal_prefix() {
    let dir = TempDir::new().unwrap();
    let mut manager = seeded_manager(&dir, "sqlite");
    manager.initialize().unwrap();

    let store = manager.backend().unwrap();
    let keys = store.list_keys("_").unwrap();
    assert!(keys.contains("_schema_version"));
    assert!(keys.contains("_migration_history"));
    // Data keys do not leak into the underscore prefix.
    assert!(!keys.contains("a"));
    manager.close().unwrap();
}
