//! Framed record layout
//!
//! ```text
//! [0:4)   magic     u32 LE  0x5A5A_AA55
//! [4]     version   u8
//! [5]     pad       u8      zero
//! [6:8)   reserved  u16     zero
//! [8:12)  length    u32 LE  payload bytes
//! [12:16) checksum  u32 LE  CRC-32C of the payload
//! [16..)  payload
//! ```
//!
//! The header travels with the value; nothing about a record is stored
//! out of band.

use crate::core::checksum::ChecksumEngine;
use crate::core::error::{CorruptionError, WriteError};

pub const RECORD_MAGIC: u32 = 0x5A5A_AA55;
pub const HEADER_SIZE: usize = 16;

/// Largest payload a record header can describe.
pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

/// Parsed record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub magic: u32,
    pub version: u8,
    pub pad: u8,
    pub reserved: u16,
    pub length: u32,
    pub checksum: u32,
}

impl RecordHeader {
    pub fn new(version: u8, length: u32, checksum: u32) -> Self {
        RecordHeader {
            magic: RECORD_MAGIC,
            version,
            pad: 0,
            reserved: 0,
            length,
            checksum,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4] = self.version;
        bytes[5] = self.pad;
        bytes[6..8].copy_from_slice(&self.reserved.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.length.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        RecordHeader {
            magic: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            version: bytes[4],
            pad: bytes[5],
            reserved: u16::from_le_bytes([bytes[6], bytes[7]]),
            length: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            checksum: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        }
    }
}

/// Set of payload versions a decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionSet {
    bits: [u64; 4],
}

impl VersionSet {
    pub const EMPTY: VersionSet = VersionSet { bits: [0; 4] };
    pub const ALL: VersionSet = VersionSet {
        bits: [u64::MAX; 4],
    };

    pub const fn single(version: u8) -> Self {
        Self::EMPTY.with(version)
    }

    /// Every version in `first..=last`.
    pub const fn range(first: u8, last: u8) -> Self {
        let mut set = Self::EMPTY;
        let mut v = first as u16;
        while v <= last as u16 {
            set = set.with(v as u8);
            v += 1;
        }
        set
    }

    pub const fn with(mut self, version: u8) -> Self {
        self.bits[(version >> 6) as usize] |= 1 << (version & 63);
        self
    }

    pub const fn contains(&self, version: u8) -> bool {
        self.bits[(version >> 6) as usize] & (1 << (version & 63)) != 0
    }
}

/// Successfully decoded record, borrowing the payload from the framed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded<'a> {
    pub version: u8,
    pub payload: &'a [u8],
}

/// Encodes and validates framed records.
#[derive(Debug, Clone, Copy)]
pub struct RecordCodec {
    checksum: &'static ChecksumEngine,
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordCodec {
    /// Codec using the process-wide checksum engine.
    pub fn new() -> Self {
        RecordCodec {
            checksum: ChecksumEngine::global(),
        }
    }

    pub fn with_checksum(checksum: &'static ChecksumEngine) -> Self {
        RecordCodec { checksum }
    }

    pub fn checksum_engine(&self) -> &'static ChecksumEngine {
        self.checksum
    }

    /// Framed size of a payload of `payload_len` bytes.
    pub fn framed_len(payload_len: usize) -> Result<usize, WriteError> {
        if payload_len > MAX_PAYLOAD_SIZE - HEADER_SIZE {
            return Err(WriteError::ValueTooLarge {
                len: payload_len,
                max: MAX_PAYLOAD_SIZE - HEADER_SIZE,
            });
        }
        Ok(HEADER_SIZE + payload_len)
    }

    /// Header for `payload`, checksum included.
    pub fn header_for(&self, payload: &[u8], version: u8) -> Result<RecordHeader, WriteError> {
        Self::framed_len(payload.len())?;
        Ok(RecordHeader::new(
            version,
            payload.len() as u32,
            self.checksum.compute(payload),
        ))
    }

    /// Header followed by payload in one new buffer.
    pub fn encode(&self, payload: &[u8], version: u8) -> Result<Vec<u8>, WriteError> {
        let header = self.header_for(payload, version)?;
        let mut framed = Vec::with_capacity(HEADER_SIZE + payload.len());
        framed.extend_from_slice(&header.to_bytes());
        framed.extend_from_slice(payload);
        Ok(framed)
    }

    /// Write header and payload into `dst`, which must be exactly
    /// `HEADER_SIZE + payload.len()` bytes.
    pub fn encode_into(
        &self,
        dst: &mut [u8],
        payload: &[u8],
        version: u8,
    ) -> Result<(), WriteError> {
        let header = self.header_for(payload, version)?;
        let (head, body) = dst.split_at_mut(HEADER_SIZE.min(dst.len()));
        if head.len() != HEADER_SIZE || body.len() != payload.len() {
            return Err(WriteError::ValueTooLarge {
                len: payload.len(),
                max: dst.len().saturating_sub(HEADER_SIZE),
            });
        }
        head.copy_from_slice(&header.to_bytes());
        body.copy_from_slice(payload);
        Ok(())
    }

    /// Validate `framed` and return its payload in place.
    pub fn decode<'a>(
        &self,
        framed: &'a [u8],
        versions: &VersionSet,
    ) -> Result<Decoded<'a>, CorruptionError> {
        let Some((head, payload)) = framed.split_first_chunk::<HEADER_SIZE>() else {
            return Err(CorruptionError::TooShort { len: framed.len() });
        };
        let header = RecordHeader::from_bytes(head);

        if header.magic != RECORD_MAGIC {
            return Err(CorruptionError::BadMagic {
                found: header.magic,
            });
        }

        if header.pad != 0 || header.reserved != 0 {
            return Err(CorruptionError::NonZeroPad {
                pad: header.pad,
                reserved: header.reserved,
            });
        }

        if !versions.contains(header.version) {
            return Err(CorruptionError::UnsupportedVersion {
                version: header.version,
            });
        }

        if header.length as usize != payload.len() {
            return Err(CorruptionError::LengthMismatch {
                declared: header.length,
                actual: payload.len(),
            });
        }

        let computed = self.checksum.compute(payload);
        if computed != header.checksum {
            return Err(CorruptionError::ChecksumMismatch {
                stored: header.checksum,
                computed,
            });
        }

        Ok(Decoded {
            version: header.version,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::CorruptionKind;

    fn codec() -> RecordCodec {
        RecordCodec::new()
    }

    #[test]
    fn test_header_layout() {
        let framed = codec().encode(b"hello", 3).unwrap();
        assert_eq!(framed.len(), HEADER_SIZE + 5);
        assert_eq!(&framed[0..4], &RECORD_MAGIC.to_le_bytes());
        assert_eq!(framed[4], 3);
        assert_eq!(&framed[5..8], &[0, 0, 0]);
        assert_eq!(&framed[8..12], &5u32.to_le_bytes());
        assert_eq!(&framed[12..16], &crate::core::checksum::checksum(b"hello").to_le_bytes());
        assert_eq!(&framed[16..], b"hello");
    }

    #[test]
    fn test_header_round_trip() {
        let header = RecordHeader::new(7, 1234, 0xDEAD_BEEF);
        assert_eq!(RecordHeader::from_bytes(&header.to_bytes()), header);
    }

    #[test]
    fn test_decode_borrows_payload() {
        let framed = codec().encode(b"payload bytes", 1).unwrap();
        let decoded = codec().decode(&framed, &VersionSet::single(1)).unwrap();

        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.payload, b"payload bytes");
        assert!(std::ptr::eq(decoded.payload.as_ptr(), framed[HEADER_SIZE..].as_ptr()));
    }

    #[test]
    fn test_empty_payload() {
        let framed = codec().encode(&[], 0).unwrap();
        let decoded = codec().decode(&framed, &VersionSet::ALL).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_too_short() {
        for len in 0..HEADER_SIZE {
            let err = codec().decode(&vec![0u8; len], &VersionSet::ALL).unwrap_err();
            assert_eq!(err, CorruptionError::TooShort { len });
        }
    }

    #[test]
    fn test_bad_magic_checked_before_version() {
        let mut framed = codec().encode(b"data", 1).unwrap();
        framed[0] ^= 0xFF;
        framed[4] = 200;
        let err = codec().decode(&framed, &VersionSet::single(1)).unwrap_err();
        assert_eq!(err.kind(), CorruptionKind::BadMagic);
    }

    #[test]
    fn test_nonzero_pad() {
        let mut framed = codec().encode(b"data", 1).unwrap();
        framed[5] = 1;
        let err = codec().decode(&framed, &VersionSet::ALL).unwrap_err();
        assert_eq!(err, CorruptionError::NonZeroPad { pad: 1, reserved: 0 });
    }

    #[test]
    fn test_unsupported_version() {
        let framed = codec().encode(b"data", 9).unwrap();
        let err = codec().decode(&framed, &VersionSet::range(1, 3)).unwrap_err();
        assert_eq!(err, CorruptionError::UnsupportedVersion { version: 9 });
    }

    #[test]
    fn test_length_mismatch_on_truncation() {
        let framed = codec().encode(b"some longer payload", 1).unwrap();
        let truncated = &framed[..framed.len() - 3];
        let err = codec().decode(truncated, &VersionSet::ALL).unwrap_err();
        assert!(matches!(
            err,
            CorruptionError::LengthMismatch { declared: 19, actual: 16 }
        ));
    }

    #[test]
    fn test_length_mismatch_on_trailing_bytes() {
        let mut framed = codec().encode(b"abc", 1).unwrap();
        framed.push(0);
        let err = codec().decode(&framed, &VersionSet::ALL).unwrap_err();
        assert_eq!(err.kind(), CorruptionKind::LengthMismatch);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut framed = codec().encode(b"abcdef", 1).unwrap();
        framed[HEADER_SIZE + 2] ^= 0x10;
        let err = codec().decode(&framed, &VersionSet::ALL).unwrap_err();
        assert_eq!(err.kind(), CorruptionKind::ChecksumMismatch);
    }

    #[test]
    fn test_encode_into_exact_buffer() {
        let mut buf = vec![0xAA; HEADER_SIZE + 4];
        codec().encode_into(&mut buf, b"wxyz", 2).unwrap();
        assert_eq!(buf, codec().encode(b"wxyz", 2).unwrap());
    }

    #[test]
    fn test_encode_into_wrong_size() {
        let mut buf = vec![0u8; HEADER_SIZE + 3];
        assert!(codec().encode_into(&mut buf, b"wxyz", 2).is_err());

        let mut tiny = vec![0u8; 4];
        assert!(codec().encode_into(&mut tiny, b"", 2).is_err());
    }

    #[test]
    fn test_version_set() {
        let set = VersionSet::single(1).with(4).with(255);
        assert!(set.contains(1));
        assert!(set.contains(4));
        assert!(set.contains(255));
        assert!(!set.contains(0));
        assert!(!set.contains(2));

        let range = VersionSet::range(250, 255);
        assert!(range.contains(250) && range.contains(255));
        assert!(!range.contains(249));

        assert!(VersionSet::ALL.contains(0) && VersionSet::ALL.contains(128));
        assert!(!VersionSet::EMPTY.contains(0));
    }

    #[test]
    fn test_codecs_with_separate_engines_interoperate() {
        let engine: &'static ChecksumEngine = Box::leak(Box::new(ChecksumEngine::detect()));
        let other = RecordCodec::with_checksum(engine);

        let framed = codec().encode(b"cross-engine", 1).unwrap();
        assert!(other.decode(&framed, &VersionSet::ALL).is_ok());
    }
}
