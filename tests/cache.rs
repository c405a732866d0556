use std::sync::Arc;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;

use mascp_gator::cache::{
    BackendKind, CacheBackend, CacheStore, KeyValueBackend, MemoryBackend, NoopBackend,
    SqliteBackend, open_backend,
};
use mascp_gator::domain::FreshnessWindow;
use mascp_gator::error::GatorError;
use mascp_gator::transport::RawPayload;

fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

fn temp_root(dir: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
}

fn history_backends(dir: &tempfile::TempDir) -> Vec<Arc<dyn CacheBackend>> {
    let file = temp_root(dir).join("datacache.sqlite");
    vec![
        Arc::new(SqliteBackend::open_in_memory().unwrap()),
        Arc::new(SqliteBackend::open(&file).unwrap()),
        Arc::new(MemoryBackend::new()),
    ]
}

#[test]
fn reads_return_most_recent_record_in_window() {
    let dir = tempfile::tempdir().unwrap();
    for backend in history_backends(&dir) {
        let store = CacheStore::new(backend.clone());
        store.put_value_at("at1g01010", "tair", &json!({"v": 1}), day(2024, 1, 1) + Duration::hours(5));
        store.put_value_at("at1g01010", "tair", &json!({"v": 3}), day(2024, 3, 1));
        store.put_value_at("at1g01010", "tair", &json!({"v": 2}), day(2024, 2, 1));

        let hit = store.get("AT1G01010", "tair", None).unwrap();
        assert_eq!(hit.data, json!({"v": 3}), "{}", backend.name());
        assert_eq!(hit.retrieved, day(2024, 3, 1));

        let window = FreshnessWindow::new(day(2023, 12, 1), day(2024, 2, 15));
        let hit = store.get("at1g01010", "tair", Some(window)).unwrap();
        assert_eq!(hit.data, json!({"v": 2}), "{}", backend.name());

        let early = FreshnessWindow::until(day(2024, 1, 1));
        let hit = store.get("at1g01010", "tair", Some(early)).unwrap();
        assert_eq!(hit.data, json!({"v": 1}), "{}", backend.name());
        assert_eq!(hit.retrieved, day(2024, 1, 1));

        assert!(store.get("at1g01010", "other", None).is_none());
        assert!(store.get("at1g99999", "tair", None).is_none());
    }
}

#[test]
fn age_bounds_narrow_every_read() {
    let store = CacheStore::new(Arc::new(MemoryBackend::new()));
    store.put_value_at("acc", "svc", &json!({"old": true}), day(2020, 5, 5));
    store.put_value_at("acc", "svc", &json!({"new": true}), day(2024, 5, 5));

    store.set_maximum_age(Some(day(2021, 1, 1)));
    assert_eq!(store.get("acc", "svc", None).unwrap().data, json!({"old": true}));

    store.set_maximum_age(None);
    store.set_minimum_age(Some(day(2025, 1, 1)));
    assert!(store.get("acc", "svc", None).is_none());

    store.set_minimum_age(Some(day(2024, 1, 1)));
    let narrow = FreshnessWindow::until(day(2023, 1, 1));
    assert!(store.get("acc", "svc", Some(narrow)).is_none());
}

#[test]
fn only_json_containers_are_stored() {
    let store = CacheStore::new(Arc::new(MemoryBackend::new()));
    store.put("acc", "svc", &RawPayload::Text("plain".to_string()));
    store.put_value_at("acc", "svc", &json!("scalar"), Utc::now());
    store.put_value_at("acc", "svc", &json!(null), Utc::now());
    assert!(store.get("acc", "svc", None).is_none());

    store.put("acc", "svc", &RawPayload::Json(json!([1, 2])));
    assert_eq!(store.get("acc", "svc", None).unwrap().data, json!([1, 2]));
}

#[test]
fn bulk_scope_hides_reads_and_refuses_nesting() {
    let dir = tempfile::tempdir().unwrap();
    for backend in history_backends(&dir) {
        let store = Arc::new(CacheStore::new(backend.clone()));
        store.put_value_at("acc", "svc", &json!({"before": 1}), day(2024, 1, 1));

        let scope = store.begin_bulk().unwrap();
        assert!(store.in_bulk());
        assert_matches!(store.begin_bulk(), Err(GatorError::BulkInProgress));
        assert!(store.get("acc", "svc", None).is_none());
        store.put_value_at("acc", "svc", &json!({"during": 1}), day(2024, 2, 1));
        scope.end().unwrap();

        assert!(!store.in_bulk());
        let hit = store.get("acc", "svc", None).unwrap();
        assert_eq!(hit.data, json!({"during": 1}), "{}", backend.name());
    }
}

#[test]
fn dropping_bulk_scope_commits() {
    let store = Arc::new(CacheStore::new(Arc::new(MemoryBackend::new())));
    {
        let _scope = store.begin_bulk().unwrap();
        store.put_value_at("acc", "svc", &json!({"x": 1}), Utc::now());
    }
    assert!(!store.in_bulk());
    assert!(store.get("acc", "svc", None).is_some());
    let again = store.begin_bulk().unwrap();
    again.end().unwrap();
}

#[test]
fn listings_and_prefix_clear() {
    let dir = tempfile::tempdir().unwrap();
    for backend in history_backends(&dir) {
        let store = CacheStore::new(backend.clone());
        let when = day(2024, 4, 4);
        store.put_value_at("AT1G1", "tair.genes", &json!({}), when);
        store.put_value_at("at1g2", "tair.genes", &json!({}), when);
        store.put_value_at("at1g1", "tair.proteins", &json!({}), when);
        store.put_value_at("at1g1", "ppdb", &json!({}), when);

        assert_eq!(
            store.services_matching_prefix("tair").unwrap(),
            vec!["tair.genes", "tair.proteins"]
        );
        assert_eq!(
            store.accessions_for_service("tair.genes").unwrap(),
            vec!["at1g1", "at1g2"]
        );

        assert_eq!(store.clear("tair", Some("AT1G1")).unwrap(), 2, "{}", backend.name());
        assert_eq!(store.accessions_for_service("tair.genes").unwrap(), vec!["at1g2"]);
        assert_eq!(store.clear("tair", None).unwrap(), 1);
        assert_eq!(store.services_matching_prefix("").unwrap(), vec!["ppdb"]);
    }
}

#[test]
fn history_is_day_bucketed_and_sweepable() {
    let dir = tempfile::tempdir().unwrap();
    for backend in history_backends(&dir) {
        let store = CacheStore::new(backend.clone());
        store.put_value_at("a", "svc", &json!({}), day(2024, 1, 1) + Duration::hours(3));
        store.put_value_at("b", "svc", &json!({}), day(2024, 1, 1) + Duration::hours(20));
        store.put_value_at("a", "svc", &json!({}), day(2024, 1, 3) + Duration::minutes(1));

        assert_eq!(
            store.retrieval_timestamps("svc", None).unwrap(),
            vec![day(2024, 1, 1), day(2024, 1, 3)],
            "{}",
            backend.name()
        );

        assert_eq!(store.sweep(day(2024, 1, 2)).unwrap(), 2);
        assert_eq!(
            store.retrieval_timestamps("svc", None).unwrap(),
            vec![day(2024, 1, 3)]
        );
        assert_eq!(store.accessions_for_service("svc").unwrap(), vec!["a"]);
    }
}

#[test]
fn sqlite_file_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_root(&dir).join("nested").join("cache.sqlite");
    {
        let store = CacheStore::new(Arc::new(SqliteBackend::open(&path).unwrap()));
        store.put_value_at("acc", "svc", &json!({"kept": true}), day(2024, 6, 1));
    }
    let reopened = SqliteBackend::open(&path).unwrap();
    assert_eq!(reopened.schema_version().unwrap(), Some(1.3));
    let store = CacheStore::new(Arc::new(reopened));
    assert_eq!(store.get("acc", "svc", None).unwrap().data, json!({"kept": true}));
}

#[test]
fn keyvalue_keeps_latest_only() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(KeyValueBackend::open(&temp_root(&dir)).unwrap());
    let store = CacheStore::new(backend);
    store.put_value_at("at1g01010", "tair/genes", &json!({"v": 1}), day(2024, 1, 1));
    store.put_value_at("at1g01010", "tair/genes", &json!({"v": 2}), day(2024, 2, 1));

    let hit = store.get("AT1G01010", "tair/genes", None).unwrap();
    assert_eq!(hit.data, json!({"v": 2}));
    let window = FreshnessWindow::until(day(2024, 1, 15));
    assert!(store.get("at1g01010", "tair/genes", Some(window)).is_none());

    assert_eq!(store.services_matching_prefix("tair").unwrap(), vec!["tair/genes"]);
    assert_eq!(store.accessions_for_service("tair/genes").unwrap(), vec!["at1g01010"]);
    assert!(store.retrieval_timestamps("tair/genes", None).unwrap().is_empty());
    assert_eq!(store.sweep(day(2030, 1, 1)).unwrap(), 0);
    assert_eq!(store.clear("tair", None).unwrap(), 1);
    assert!(store.get("at1g01010", "tair/genes", None).is_none());
}

#[test]
fn noop_backend_stores_nothing() {
    let store = Arc::new(CacheStore::new(Arc::new(NoopBackend)));
    store.put_value_at("acc", "svc", &json!({"x": 1}), Utc::now());
    assert!(store.get("acc", "svc", None).is_none());
    assert!(store.services_matching_prefix("").unwrap().is_empty());
    assert_eq!(store.clear("svc", None).unwrap(), 0);
    store.begin_bulk().unwrap().end().unwrap();
}

#[test]
fn open_backend_by_kind() {
    let dir = tempfile::tempdir().unwrap();
    let root = temp_root(&dir);
    let names: Vec<&str> = [
        (BackendKind::Sqlite, root.join("db.sqlite")),
        (BackendKind::Memory, root.clone()),
        (BackendKind::Keyvalue, root.join("kv")),
        (BackendKind::Noop, root.clone()),
    ]
    .iter()
    .map(|(kind, path)| open_backend(*kind, path).unwrap().name())
    .collect();
    assert_eq!(names, vec!["sqlite", "memory", "keyvalue", "noop"]);
}
