#![no_main]
use libfuzzer_sys::fuzz_target;
use zerostore::{RecordCodec, VersionSet};

// Arbitrary bytes must decode to a record or a corruption error, never panic.
fuzz_target!(|data: &[u8]| {
    let codec = RecordCodec::new();
    if let Ok(decoded) = codec.decode(data, &VersionSet::ALL) {
        let framed = codec.encode(decoded.payload, decoded.version).unwrap();
        assert_eq!(&framed[..], data);
    }
});
