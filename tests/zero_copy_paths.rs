//! Zero-copy fast path and aligned-copy fallback
//!
//! A counting global allocator checks how many allocations a single read
//! makes on the current thread.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use tempfile::TempDir;
use zerocopy::{FromBytes, Immutable, KnownLayout};
use zerostore::{
    AlignmentCheck, ArchivedRecord, Error, ReadError, ReadTxn, Store, StoreBuilder, VersionSet,
};

struct CountingAlloc;

thread_local! {
    static ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let _ = ALLOCATIONS.try_with(|n| n.set(n.get() + 1));
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static GLOBAL: CountingAlloc = CountingAlloc;

/// Allocations made on this thread while running `f`.
fn allocations<R>(f: impl FnOnce() -> R) -> (R, usize) {
    let before = ALLOCATIONS.with(Cell::get);
    let result = f();
    let after = ALLOCATIONS.with(Cell::get);
    (result, after - before)
}

#[derive(Debug, PartialEq, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
struct NodeHeader {
    id: u64,
    kind: u32,
    edge_count: u32,
}

impl ArchivedRecord for NodeHeader {
    const VERSIONS: VersionSet = VersionSet::single(1);
}

fn node_payload(id: u64) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&id.to_ne_bytes());
    payload.extend_from_slice(&3u32.to_ne_bytes());
    payload.extend_from_slice(&9u32.to_ne_bytes());
    payload.extend_from_slice(b"trailing label");
    payload
}

fn open(dir: &TempDir) -> Store {
    StoreBuilder::new()
        .path(dir.path())
        .map_size(1 << 20)
        .durable(false)
        .table("nodes")
        .unaligned_table("imports")
        .build()
        .unwrap()
}

#[test]
fn test_reserved_record_is_read_in_place() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let payload = node_payload(1);
    store
        .write(|txn| txn.put_aligned("nodes", b"node:1", &payload, 1))
        .unwrap();

    store
        .read(|txn| {
            // Warm up lazily initialized state (checksum backend, tracing).
            txn.get::<NodeHeader>("nodes", b"node:1")?;

            let (view, count) = allocations(|| txn.get::<NodeHeader>("nodes", b"node:1"));
            let view = view?.unwrap();
            assert_eq!(count, 0, "fast path must not allocate");

            assert!(view.is_zero_copy());
            assert!(txn.txn().contains(view.payload().as_ptr()));
            assert!(txn.txn().contains(&*view as *const NodeHeader as *const u8));
            assert_eq!(view.payload(), &payload[..]);
            Ok::<_, ReadError>(())
        })
        .unwrap();
}

#[test]
fn test_misaligned_record_is_copied_once() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let payload = node_payload(7);
    // Entries sit at even offsets with the value right after the key, so an
    // odd key length puts the payload at an odd address.
    store
        .write(|txn| txn.put("imports", b"node:01", &payload, 1))
        .unwrap();

    store
        .read(|txn| {
            txn.get::<NodeHeader>("imports", b"node:01")?;

            let (view, count) = allocations(|| txn.get::<NodeHeader>("imports", b"node:01"));
            let view = view?.unwrap();
            assert_eq!(count, 1, "fallback makes exactly one copy");

            assert!(!view.is_zero_copy());
            assert!(!txn.txn().contains(view.payload().as_ptr()));
            assert!(AlignmentCheck::is_aligned(
                view.payload().as_ptr(),
                std::mem::align_of::<NodeHeader>()
            ));
            assert_eq!(
                *view,
                NodeHeader {
                    id: 7,
                    kind: 3,
                    edge_count: 9
                }
            );
            assert_eq!(view.payload(), &payload[..]);
            assert_eq!(view.trailing(), b"trailing label");
            Ok::<_, ReadError>(())
        })
        .unwrap();
}

#[test]
fn test_packed_record_stored_misaligned() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store
        .write(|txn| txn.put("imports", b"node:01", &node_payload(1), 1))
        .unwrap();

    let nodes = store.table("imports").unwrap();
    let txn = store.env().begin_ro_txn().unwrap();
    let raw = txn.get(nodes, b"node:01").unwrap().unwrap();
    let payload = &raw[zerostore::HEADER_SIZE..];
    assert!(!AlignmentCheck::is_aligned(payload.as_ptr(), 8));
}

#[test]
fn test_aligned_table_views_match_unaligned_copies() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    store
        .write(|txn| {
            for id in 0..32u64 {
                let key = format!("node:{id:03}");
                txn.put_aligned("nodes", key.as_bytes(), &node_payload(id), 1)?;
                txn.put("imports", key.as_bytes(), &node_payload(id), 1)?;
            }
            Ok::<_, Error>(())
        })
        .unwrap();

    store
        .read(|txn| {
            for id in 0..32u64 {
                let key = format!("node:{id:03}");
                let a = txn.get::<NodeHeader>("nodes", key.as_bytes())?.unwrap();
                let b = txn.get::<NodeHeader>("imports", key.as_bytes())?.unwrap();
                assert!(a.is_zero_copy());
                assert!(!b.is_zero_copy());
                assert_eq!(*a, *b);
                assert_eq!(a.id, id);
            }
            Ok::<_, ReadError>(())
        })
        .unwrap();
}
