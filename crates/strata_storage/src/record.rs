//! The record type shared by every backend.

use std::collections::BTreeMap;

/// A stored record: an arbitrary JSON object keyed by a unique string.
///
/// Records are backend-agnostic. The flat-file backend persists them as
/// JSON, SQLite stores their serialized text, and PostgreSQL stores them
/// natively as `JSONB`.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A full snapshot of a backend's contents, as produced by
/// [`export_data`](crate::StorageBackend::export_data) and consumed by
/// [`import_data`](crate::StorageBackend::import_data).
///
/// A `BTreeMap` keeps exported snapshots deterministically ordered, which
/// keeps backup files diffable.
pub type Snapshot = BTreeMap<String, Record>;
