use super::*;
use proptest::prelude::*;
use tempfile::TempDir;

fn create_test_store() -> (FileLocationStore, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = FileLocationStore::open(&temp_dir.path().join("locations.json"))
        .expect("Failed to open store");
    (store, temp_dir)
}

#[test]
fn test_missing_identity_is_absent() {
    let (store, _temp) = create_test_store();
    assert_eq!(store.get("doc:A").unwrap(), None);
}

#[test]
fn test_put_then_get() {
    let (store, _temp) = create_test_store();
    store.put("doc:B", "loc-42").unwrap();
    assert_eq!(store.get("doc:B").unwrap(), Some("loc-42".to_string()));
}

#[test]
fn test_put_is_idempotent() {
    let (store, _temp) = create_test_store();
    store.put("doc:B", "loc-42").unwrap();
    let first = store.get("doc:B").unwrap();
    store.put("doc:B", "loc-42").unwrap();
    assert_eq!(store.get("doc:B").unwrap(), first);
}

#[test]
fn test_last_write_wins() {
    let (store, _temp) = create_test_store();
    store.put("doc:B", "loc-1").unwrap();
    store.put("doc:B", "loc-2").unwrap();
    assert_eq!(store.get("doc:B").unwrap(), Some("loc-2".to_string()));
}

#[test]
fn test_positions_survive_reopen() {
    let (store, temp) = create_test_store();
    store.put("file:///books/a.epub", "epubcfi(/6/2)").unwrap();
    store.put("file:///books/b.epub", "epubcfi(/6/8)").unwrap();
    drop(store);

    let reopened = FileLocationStore::open(&temp.path().join("locations.json")).unwrap();
    assert_eq!(
        reopened.get("file:///books/a.epub").unwrap(),
        Some("epubcfi(/6/2)".to_string())
    );
    assert_eq!(reopened.entries().len(), 2);
}

#[test]
fn test_file_uses_prefixed_keys() {
    let (store, temp) = create_test_store();
    store.put("doc:A", "m").unwrap();

    let content = std::fs::read_to_string(temp.path().join("locations.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(json["version"], STORE_VERSION);
    assert_eq!(
        json["entries"]["readerSession:lastLocation:doc:A"]["marker"],
        "m"
    );
    assert!(!temp.path().join("locations.json.tmp").exists());
}

#[test]
fn test_two_handles_do_not_lose_keys() {
    let (first, temp) = create_test_store();
    let second = FileLocationStore::open(&temp.path().join("locations.json")).unwrap();

    first.put("doc:A", "a").unwrap();
    second.put("doc:B", "b").unwrap();

    let reopened = FileLocationStore::open(&temp.path().join("locations.json")).unwrap();
    assert_eq!(reopened.get("doc:A").unwrap(), Some("a".to_string()));
    assert_eq!(reopened.get("doc:B").unwrap(), Some("b".to_string()));
}

#[test]
fn test_unknown_marker_format_reads_as_absent() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("locations.json");
    std::fs::write(
        &path,
        r#"{"version":1,"entries":{
            "readerSession:lastLocation:doc:old":{"marker":"legacy","marker_format":0,"saved_at":""},
            "readerSession:lastLocation:doc:new":{"marker":"current"}
        }}"#,
    )
    .unwrap();

    let store = FileLocationStore::open(&path).unwrap();
    assert_eq!(store.get("doc:old").unwrap(), None);
    assert_eq!(store.get("doc:new").unwrap(), Some("current".to_string()));

    // Stale records are kept, never compacted.
    store.put("doc:other", "x").unwrap();
    let reopened = FileLocationStore::open(&path).unwrap();
    assert_eq!(reopened.entries().len(), 3);
}

#[test]
fn test_corrupt_file_is_moved_aside() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("locations.json");
    std::fs::write(&path, "{not json").unwrap();

    let store = FileLocationStore::open(&path).unwrap();
    assert_eq!(store.get("doc:A").unwrap(), None);
    assert!(temp.path().join("locations.json.corrupt").exists());
}

#[test]
fn test_newer_store_version_is_refused() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("locations.json");
    std::fs::write(&path, r#"{"version":99,"entries":{}}"#).unwrap();

    let err = FileLocationStore::open(&path).err().expect("should refuse");
    assert!(err.to_string().contains("version 99"));
}

#[test]
fn test_memory_store() {
    let store = MemoryLocationStore::new();
    assert_eq!(store.get("doc:A").unwrap(), None);
    store.put("doc:A", "loc-1").unwrap();
    assert_eq!(store.get("doc:A").unwrap(), Some("loc-1".to_string()));
}

struct UnavailableStore;

impl LocationStore for UnavailableStore {
    fn get(&self, _identity: &str) -> Result<Option<String>> {
        bail!("storage unavailable")
    }

    fn put(&self, _identity: &str, _marker: &str) -> Result<()> {
        bail!("storage unavailable")
    }
}

#[test]
fn test_read_position_swallows_storage_errors() {
    assert_eq!(read_position(&UnavailableStore, "doc:A"), None);

    let store = MemoryLocationStore::new();
    store.put("doc:A", "loc-7").unwrap();
    assert_eq!(read_position(&store, "doc:A"), Some("loc-7".to_string()));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_get_returns_last_put(
        writes in proptest::collection::vec(("[a-c]", "[a-z0-9/()!]{1,16}"), 1..20)
    ) {
        let (store, _temp) = create_test_store();
        let mut expected = std::collections::HashMap::new();
        for (identity, marker) in &writes {
            store.put(identity, marker).unwrap();
            expected.insert(identity.clone(), marker.clone());
        }
        for (identity, marker) in expected {
            prop_assert_eq!(store.get(&identity).unwrap(), Some(marker));
        }
    }
}
