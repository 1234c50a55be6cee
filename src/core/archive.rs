//! rkyv archives as record payloads
//!
//! An archive is serialized once into an aligned buffer and framed like any
//! other payload. Readers validate it with bytecheck and view it in place;
//! see [`crate::core::reader::ZeroCopyReader::get_archived`].

use crate::core::record::VersionSet;
use rkyv::api::high::HighSerializer;
use rkyv::rancor;
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use rkyv::Serialize;

/// Alignment archives are read at. Payloads below it are copied first.
pub const ARCHIVE_ALIGN: usize = 16;

/// A type stored as an rkyv archive.
pub trait ArchivedValue: rkyv::Archive {
    /// Payload versions the archive layout can be read from.
    const VERSIONS: VersionSet;
}

/// Serialize `value` into a payload ready for framing.
pub fn to_payload<T>(value: &T) -> Result<AlignedVec, rancor::Error>
where
    T: for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, rancor::Error>>,
{
    rkyv::to_bytes::<rancor::Error>(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alignment::AlignmentCheck;

    #[derive(Debug, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
    struct Edge {
        from: u64,
        to: u64,
        weight: f32,
    }

    impl ArchivedValue for Edge {
        const VERSIONS: VersionSet = VersionSet::range(1, 2);
    }

    #[test]
    fn test_payload_is_accessible() {
        let edge = Edge {
            from: 1,
            to: 2,
            weight: 0.5,
        };
        let bytes = to_payload(&edge).unwrap();
        assert!(AlignmentCheck::is_aligned(bytes.as_ptr(), ARCHIVE_ALIGN));

        let archived = rkyv::access::<ArchivedEdge, rancor::Error>(&bytes).unwrap();
        assert_eq!(archived.from, 1);
        assert_eq!(
            rkyv::deserialize::<Edge, rancor::Error>(archived).unwrap(),
            edge
        );
    }

    #[test]
    fn test_truncated_payload_is_rejected() {
        let bytes = to_payload(&Edge {
            from: 1,
            to: 2,
            weight: 0.5,
        })
        .unwrap();
        let mut short = AlignedVec::<ARCHIVE_ALIGN>::new();
        short.extend_from_slice(&bytes[..bytes.len() - 4]);
        assert!(rkyv::access::<ArchivedEdge, rancor::Error>(&short).is_err());
    }

    #[test]
    fn test_versions() {
        assert!(Edge::VERSIONS.contains(2));
        assert!(!Edge::VERSIONS.contains(3));
    }
}
