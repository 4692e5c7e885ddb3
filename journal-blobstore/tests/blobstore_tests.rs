use journal_blobstore::{BlobLocator, BlobStore, BlobStoreError, DuckDbBlobStore, FsBlobStore};
use std::sync::{Arc, Mutex};

fn exercise_store(store: &dyn BlobStore) {
    let a = store.put(b"first sealed payload").unwrap();
    let b = store.put(b"second sealed payload").unwrap();
    assert_ne!(a, b);

    assert_eq!(store.get(&a).unwrap(), b"first sealed payload");
    assert_eq!(store.get(&b).unwrap(), b"second sealed payload");
    assert!(store.exists(&a).unwrap());

    store.delete(&a).unwrap();
    assert!(!store.exists(&a).unwrap());
    assert!(matches!(store.get(&a), Err(BlobStoreError::NotFound(_))));
    assert!(matches!(store.delete(&a), Err(BlobStoreError::NotFound(_))));

    // Unrelated blob untouched
    assert_eq!(store.get(&b).unwrap(), b"second sealed payload");
}

// ── Filesystem store ──

#[test]
fn fs_store_put_get_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsBlobStore::open(dir.path().join("blobs")).unwrap();
    exercise_store(&store);
}

#[test]
fn fs_store_shards_by_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsBlobStore::open(dir.path()).unwrap();
    let loc = store.put(b"data").unwrap();

    let expected = dir.path().join(&loc.as_str()[..2]).join(loc.as_str());
    assert_eq!(std::fs::read(expected).unwrap(), b"data");
}

#[test]
fn fs_store_leaves_no_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsBlobStore::open(dir.path()).unwrap();
    let loc = store.put(&vec![7u8; 64 * 1024]).unwrap();

    let shard = dir.path().join(&loc.as_str()[..2]);
    let names: Vec<_> = std::fs::read_dir(shard)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec![loc.as_str().to_string()]);
}

#[test]
fn fs_store_empty_blob() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsBlobStore::open(dir.path()).unwrap();
    let loc = store.put(b"").unwrap();
    assert!(store.get(&loc).unwrap().is_empty());
}

#[test]
fn fs_store_reopen_sees_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let loc = FsBlobStore::open(dir.path()).unwrap().put(b"kept").unwrap();
    let reopened = FsBlobStore::open(dir.path()).unwrap();
    assert_eq!(reopened.get(&loc).unwrap(), b"kept");
}

// ── DuckDB store ──

#[test]
fn duckdb_store_put_get_delete() {
    let store = DuckDbBlobStore::open_in_memory().unwrap();
    exercise_store(&store);
}

#[test]
fn duckdb_store_detects_altered_bytes() {
    let conn = Arc::new(Mutex::new(duckdb::Connection::open_in_memory().unwrap()));
    let store = DuckDbBlobStore::open_with_conn(conn.clone()).unwrap();
    let loc = store.put(b"original").unwrap();

    conn.lock()
        .unwrap()
        .execute(
            "UPDATE blobs SET data = ? WHERE blob_id = ?",
            duckdb::params![b"altered".to_vec(), loc.as_str()],
        )
        .unwrap();

    assert!(matches!(store.get(&loc), Err(BlobStoreError::Corrupt(_))));
}

#[test]
fn unknown_locator_is_not_found() {
    let store = DuckDbBlobStore::open_in_memory().unwrap();
    let loc = BlobLocator::parse("0123456789abcdef0123456789abcdef").unwrap();
    assert!(matches!(store.get(&loc), Err(BlobStoreError::NotFound(_))));
    assert!(!store.exists(&loc).unwrap());
}

// Property-based tests
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn fs_store_returns_what_was_put(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let dir = tempfile::tempdir().unwrap();
            let store = FsBlobStore::open(dir.path()).unwrap();
            let loc = store.put(&data).unwrap();
            prop_assert_eq!(store.get(&loc).unwrap(), data);
        }
    }
}
