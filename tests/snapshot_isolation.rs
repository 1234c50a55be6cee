//! Snapshot isolation and atomicity tests

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Barrier;
use tempfile::TempDir;
use zerostore::{Error, RawPayload, ReadError, ReadTxn, Store, StoreError, WriteError};

fn open(dir: &TempDir) -> Store {
    Store::open(dir.path(), &["nodes"], 4).unwrap()
}

fn visible(store: &Store, key: &[u8]) -> bool {
    store
        .read(|txn| txn.get::<RawPayload>("nodes", key).map(|v| v.is_some()))
        .unwrap()
}

#[test]
fn test_reader_never_sees_later_commit() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    store
        .read(|txn| {
            let before = txn.snapshot_id();
            assert!(txn.get::<RawPayload>("nodes", b"late")?.is_none());

            store
                .write(|w| w.put_aligned("nodes", b"late", b"value", 1))
                .unwrap();

            assert!(txn.get::<RawPayload>("nodes", b"late")?.is_none());
            assert_eq!(txn.snapshot_id(), before);
            Ok::<_, ReadError>(())
        })
        .unwrap();

    assert!(visible(&store, b"late"));
}

#[test]
fn test_reader_on_other_thread_keeps_snapshot() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let started = Barrier::new(2);
    let committed = Barrier::new(2);

    std::thread::scope(|s| {
        s.spawn(|| {
            store
                .read(|txn| {
                    started.wait();
                    committed.wait();
                    assert!(txn.get::<RawPayload>("nodes", b"k")?.is_none());
                    Ok::<_, ReadError>(())
                })
                .unwrap();
        });

        started.wait();
        store
            .write(|w| w.put_aligned("nodes", b"k", b"v", 1))
            .unwrap();
        committed.wait();
    });

    assert!(visible(&store, b"k"));
}

#[test]
fn test_explicit_abort_discards_both_records() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let nodes = store.table("nodes").unwrap();

    let hint = nodes.mode().required_hint();

    let mut txn = store.env().begin_rw_txn().unwrap();
    txn.reserve(nodes, b"a", 16, hint).unwrap().fill(0);
    txn.reserve(nodes, b"b", 16, hint).unwrap().fill(0);
    txn.abort();

    assert!(!visible(&store, b"a"));
    assert!(!visible(&store, b"b"));
}

#[test]
fn test_dropped_txn_discards_records() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let nodes = store.table("nodes").unwrap();
    let hint = nodes.mode().required_hint();
    let before = store.stats().unwrap().txn_id;

    {
        let mut txn = store.env().begin_rw_txn().unwrap();
        txn.reserve(nodes, b"a", 8, hint).unwrap().fill(1);
        txn.reserve(nodes, b"b", 8, hint).unwrap().fill(1);
    }

    assert!(!visible(&store, b"a"));
    assert!(!visible(&store, b"b"));
    assert_eq!(store.stats().unwrap().txn_id, before);
}

#[test]
fn test_error_in_write_closure_aborts() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let result = store.write(|txn| {
        txn.put_aligned("nodes", b"a", b"first", 1)?;
        txn.put_aligned("nodes", b"b", b"second", 1)?;
        Err::<(), _>(Error::Store(StoreError::InvalidConfig(
            "simulated failure".into(),
        )))
    });
    assert!(result.is_err());

    assert!(!visible(&store, b"a"));
    assert!(!visible(&store, b"b"));

    // The writer lock was released.
    store
        .write(|txn| txn.put_aligned("nodes", b"c", b"third", 1))
        .unwrap();
    assert!(visible(&store, b"c"));
}

#[test]
fn test_failing_put_aborts_earlier_puts() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let err = store
        .write(|txn| {
            txn.put_aligned("nodes", b"ok", b"fine", 1)?;
            txn.put_aligned("nodes", &[b'k'; 1024], b"too long a key", 1)?;
            Ok::<_, WriteError>(())
        })
        .unwrap_err();
    assert!(matches!(err, WriteError::KeyTooLarge { len: 1024, .. }));
    assert!(!visible(&store, b"ok"));
}

#[test]
fn test_panic_in_write_closure_aborts() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        store.write(|txn| {
            txn.put_aligned("nodes", b"a", b"first", 1)?;
            txn.put_aligned("nodes", b"b", b"second", 1)?;
            if txn.txn().id() > 0 {
                panic!("simulated crash before commit");
            }
            Ok::<_, WriteError>(())
        })
    }));
    assert!(outcome.is_err());

    assert!(!visible(&store, b"a"));
    assert!(!visible(&store, b"b"));

    store
        .write(|txn| txn.put_aligned("nodes", b"after", b"panic", 1))
        .unwrap();
    assert!(visible(&store, b"after"));
}

#[test]
fn test_write_sees_its_own_uncommitted_records() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    store
        .write(|txn| {
            txn.put_aligned("nodes", b"mine", b"pending", 1)?;
            let seen = txn
                .get::<RawPayload>("nodes", b"mine")?
                .map(|v| v.payload().to_vec());
            assert_eq!(seen.as_deref(), Some(&b"pending"[..]));
            assert!(!visible(&store, b"mine"));
            Ok::<_, Error>(())
        })
        .unwrap();

    assert!(visible(&store, b"mine"));
}
