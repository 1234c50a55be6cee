#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::collections::BTreeMap;
use zerostore::{RawPayload, ReadError, Store, StoreBuilder, WriteError};

#[derive(Arbitrary, Debug)]
enum Op {
    PutAligned { key: u8, value: Vec<u8> },
    Put { key: u8, value: Vec<u8> },
    Delete { key: u8 },
    Abort { key: u8, value: Vec<u8> },
}

fn key_of(key: u8) -> [u8; 3] {
    [b'k', b'0' + key / 16, b'0' + key % 16]
}

fn check(store: &Store, model: &BTreeMap<[u8; 3], Vec<u8>>) {
    store
        .read(|txn| {
            for key in 0..=255u8 {
                let stored = txn
                    .get::<RawPayload>("aligned", &key_of(key))?
                    .map(|v| v.payload().to_vec());
                assert_eq!(stored.as_ref(), model.get(&key_of(key)));
            }
            Ok::<_, ReadError>(())
        })
        .unwrap();
}

// Store contents always match a map that applies only committed operations.
fuzz_target!(|ops: Vec<Op>| {
    let dir = tempfile::TempDir::new().unwrap();
    let store = StoreBuilder::new()
        .path(dir.path())
        .map_size(4 << 20)
        .durable(false)
        .table("aligned")
        .unaligned_table("packed")
        .build()
        .unwrap();
    let mut model = BTreeMap::new();

    for op in ops.into_iter().take(64) {
        match op {
            Op::PutAligned { key, value } => {
                if store
                    .write(|txn| txn.put_aligned("aligned", &key_of(key), &value, 1))
                    .is_ok()
                {
                    model.insert(key_of(key), value);
                }
            }
            Op::Put { key, value } => {
                let _ = store.write(|txn| txn.put("packed", &key_of(key), &value, 1));
            }
            Op::Delete { key } => {
                let existed = store
                    .write(|txn| txn.delete("aligned", &key_of(key)))
                    .unwrap();
                assert_eq!(existed, model.remove(&key_of(key)).is_some());
            }
            Op::Abort { key, value } => {
                let _ = store.write(|txn| {
                    txn.put_aligned("aligned", &key_of(key), &value, 1)?;
                    Err::<(), _>(WriteError::AlignmentRequired {
                        table: "aligned".into(),
                    })
                });
            }
        }
    }

    check(&store, &model);
});
