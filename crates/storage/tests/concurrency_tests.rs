//! Concurrent writers on the same key
//!
//! Every backend must hand out each version exactly once, leave no gaps,
//! and keep the latest pointer on the highest version, however the
//! writers interleave.

use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

use kiwi_core::{Version, VersionedStore};
use kiwi_storage::{CachedStore, FileStore, SqliteStore};
use tempfile::TempDir;

const WRITERS: usize = 8;
const PUTS_PER_WRITER: usize = 10;

/// Run `WRITERS` threads, each with its own store handle, all putting to one key
fn hammer<S, F>(open: F) -> Vec<(Version, Vec<u8>)>
where
    S: VersionedStore + 'static,
    F: Fn() -> S,
{
    let barrier = Arc::new(Barrier::new(WRITERS));
    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let store = open();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..PUTS_PER_WRITER)
                    .map(|i| {
                        let value = format!("writer {w} put {i}").into_bytes();
                        let version = store.put("X", &value).unwrap();
                        (version, value)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect()
}

fn assert_dense_and_consistent(store: &dyn VersionedStore, written: &[(Version, Vec<u8>)]) {
    let total = WRITERS * PUTS_PER_WRITER;
    let versions: BTreeSet<u64> = written.iter().map(|(v, _)| v.as_u64()).collect();
    assert_eq!(versions.len(), total, "a version was handed out twice");
    assert_eq!(versions, (0..total as u64).collect::<BTreeSet<_>>());

    for (version, value) in written {
        assert_eq!(&store.get("X", Some(*version)).unwrap(), value);
    }

    let last = Version::new(total as u64 - 1);
    assert_eq!(store.get("X", None).unwrap(), store.get("X", Some(last)).unwrap());
    assert!(!store.has("X", Some(last.next())).unwrap());
}

#[test]
fn file_store_shared_handle() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let written = hammer(|| Arc::clone(&store));
    assert_dense_and_consistent(&*store, &written);
}

#[test]
fn file_store_separate_handles() {
    // Separate handles share nothing in memory; only the lock file serializes them
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let written = hammer(|| FileStore::open(&root).unwrap());
    let store = FileStore::open(dir.path()).unwrap();
    assert_dense_and_consistent(&store, &written);
}

#[test]
fn sqlite_store_shared_handle() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("kiwi.db")).unwrap());
    let written = hammer(|| Arc::clone(&store));
    assert_dense_and_consistent(&*store, &written);
}

#[test]
fn sqlite_store_separate_connections() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kiwi.db");
    // Create the schema once so openers do not race on it
    drop(SqliteStore::open(&path).unwrap());
    let written = hammer(|| SqliteStore::open(&path).unwrap());
    let store = SqliteStore::open(&path).unwrap();
    assert_dense_and_consistent(&store, &written);
}

#[test]
fn sqlite_two_writers_get_zero_and_one() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("kiwi.db");
    drop(SqliteStore::open(&path).unwrap());

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [b"a", b"b"]
        .into_iter()
        .map(|value| {
            let store = SqliteStore::open(&path).unwrap();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.put("X", value).unwrap()
            })
        })
        .collect();

    let versions: BTreeSet<Version> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(versions, [Version::new(0), Version::new(1)].into_iter().collect());
}

#[test]
fn cached_store_shared_across_threads() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(CachedStore::new(FileStore::open(dir.path()).unwrap()));
    let written = hammer(|| Arc::clone(&store));
    assert_dense_and_consistent(&*store, &written);
}

#[test]
fn readers_never_see_partial_writes() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    store.put("Page", &[0u8; 4096]).unwrap();

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 1..=50u8 {
                store.put("Page", &[i; 4096]).unwrap();
            }
        })
    };

    for _ in 0..500 {
        let page = store.get("Page", None).unwrap();
        assert_eq!(page.len(), 4096);
        assert!(page.iter().all(|b| *b == page[0]), "torn read");
    }
    writer.join().unwrap();
    assert_eq!(store.get("Page", None).unwrap(), vec![50u8; 4096]);
}
