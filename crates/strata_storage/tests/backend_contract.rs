//! Contract tests run against every file-based backend through trait
//! objects, the way the database layer drives them.

use serde_json::json;
use strata_storage::{
    JsonBackend, QueryError, Record, SqliteBackend, StorageBackend, StorageBackendExt,
};
use tempfile::TempDir;

fn record(value: i64) -> Record {
    let mut map = Record::new();
    map.insert("value".to_string(), json!(value));
    map
}

/// One initialized instance of each embedded engine, rooted in `dir`.
fn backends(dir: &TempDir) -> Vec<Box<dyn StorageBackend>> {
    let mut json = JsonBackend::new(dir.path().join("data.json"), 32);
    json.initialize().unwrap();
    let mut sqlite = SqliteBackend::new(dir.path().join("data.db"), 32);
    sqlite.initialize().unwrap();
    vec![Box::new(json), Box::new(sqlite)]
}

#[test]
fn contract_set_get_delete() {
    let dir = TempDir::new().unwrap();
    for mut backend in backends(&dir) {
        let kind = backend.kind();

        backend.set("a", record(1)).unwrap();
        assert_eq!(backend.get("a").unwrap(), Some(record(1)), "{kind}");
        assert!(backend.exists("a").unwrap(), "{kind}");

        backend.set("a", record(2)).unwrap();
        assert_eq!(backend.get("a").unwrap(), Some(record(2)), "{kind}");

        assert!(backend.delete("a").unwrap(), "{kind}");
        assert!(!backend.delete("a").unwrap(), "{kind}");
        assert_eq!(backend.get("a").unwrap(), None, "{kind}");
    }
}

#[test]
fn contract_list_keys_with_literal_underscores() {
    let dir = TempDir::new().unwrap();
    for mut backend in backends(&dir) {
        let kind = backend.kind();

        backend.set("_schema_version", record(1)).unwrap();
        backend.set("_migration_history", record(2)).unwrap();
        backend.set("users:1", record(3)).unwrap();
        backend.set("xschema", record(4)).unwrap();

        let all = backend.list_keys("").unwrap();
        assert_eq!(all.len(), 4, "{kind}");

        let reserved = backend.list_keys("_").unwrap();
        assert_eq!(reserved.len(), 2, "{kind}");
        assert!(reserved.contains("_schema_version"), "{kind}");
        assert!(!reserved.contains("xschema"), "{kind}");
    }
}

#[test]
fn contract_transaction_rollback_restores_state() {
    let dir = TempDir::new().unwrap();
    for mut backend in backends(&dir) {
        let kind = backend.kind();

        backend.set("keep", record(1)).unwrap();
        let before = backend.export_data().unwrap();

        backend.begin_transaction().unwrap();
        assert!(backend.in_transaction(), "{kind}");
        backend.set("keep", record(99)).unwrap();
        backend.set("extra", record(2)).unwrap();
        backend.delete("keep").unwrap();
        backend.rollback_transaction().unwrap();

        assert!(!backend.in_transaction(), "{kind}");
        assert_eq!(backend.export_data().unwrap(), before, "{kind}");
    }
}

#[test]
fn contract_transaction_helper_commits_on_ok() {
    let dir = TempDir::new().unwrap();
    for mut backend in backends(&dir) {
        let kind = backend.kind();
        let target: &mut dyn StorageBackend = backend.as_mut();

        target
            .transaction(|b| {
                b.set("a", record(1))?;
                b.set("b", record(2))?;
                Ok::<_, QueryError>(())
            })
            .unwrap();

        assert!(!backend.in_transaction(), "{kind}");
        assert_eq!(backend.get("a").unwrap(), Some(record(1)), "{kind}");
        assert_eq!(backend.get("b").unwrap(), Some(record(2)), "{kind}");
    }
}

#[test]
fn contract_snapshot_moves_between_engines() {
    let dir = TempDir::new().unwrap();

    let mut json = JsonBackend::new(dir.path().join("source.json"), 8);
    json.initialize().unwrap();
    json.set("users:1", record(1)).unwrap();
    json.set("_schema_version", record(3)).unwrap();
    let snapshot = json.export_data().unwrap();

    let mut sqlite = SqliteBackend::new(dir.path().join("target.db"), 8);
    sqlite.initialize().unwrap();
    sqlite.set("stale", record(9)).unwrap();
    sqlite.import_data(snapshot.clone()).unwrap();

    assert_eq!(sqlite.export_data().unwrap(), snapshot);
    assert_eq!(sqlite.get("stale").unwrap(), None);
}

#[test]
fn contract_set_many_and_delete_many() {
    let dir = TempDir::new().unwrap();
    for mut backend in backends(&dir) {
        let kind = backend.kind();

        backend
            .set_many(vec![
                ("a".to_string(), record(1)),
                ("b".to_string(), record(2)),
                ("c".to_string(), record(3)),
            ])
            .unwrap();
        assert_eq!(backend.list_keys("").unwrap().len(), 3, "{kind}");

        let removed = backend
            .delete_many(&["a".to_string(), "missing".to_string(), "c".to_string()])
            .unwrap();
        assert_eq!(removed, 2, "{kind}");
        assert_eq!(backend.list_keys("").unwrap().len(), 1, "{kind}");
    }
}
