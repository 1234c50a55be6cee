//! CRC-32C (Castagnoli) payload checksums
//!
//! Records are validated on every read, so the checksum sits on the hot path.
//! The `crc32c` crate runs the CPU's CRC instruction when there is one
//! (SSE4.2 on x86_64, the CRC extension on aarch64) and its own software
//! tables otherwise. Both paths compute the same polynomial, so a record
//! written on one machine validates on any other.
//!
//! CPU detection runs once per process; the selected engine is cached
//! and every later call goes through its function pointer.

use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

static GLOBAL: OnceLock<ChecksumEngine> = OnceLock::new();

/// Which code path a [`ChecksumEngine`] runs on this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumBackend {
    /// x86_64 SSE4.2 `crc32` instruction
    Sse42,
    /// aarch64 CRC extension
    ArmCrc,
    /// Table driven software fallback
    Portable,
}

impl ChecksumBackend {
    /// Check the CPU for a CRC instruction.
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if std::arch::is_x86_feature_detected!("sse4.2") {
                return ChecksumBackend::Sse42;
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            if std::arch::is_aarch64_feature_detected!("crc") {
                return ChecksumBackend::ArmCrc;
            }
        }

        ChecksumBackend::Portable
    }

    pub fn is_accelerated(&self) -> bool {
        !matches!(self, ChecksumBackend::Portable)
    }
}

/// CRC-32C calculator bound to one backend.
#[derive(Clone, Copy)]
pub struct ChecksumEngine {
    backend: ChecksumBackend,
    update: fn(u32, &[u8]) -> u32,
}

impl ChecksumEngine {
    /// Detect the CPU's CRC support and bind the matching code path.
    pub fn detect() -> Self {
        ChecksumEngine {
            backend: ChecksumBackend::detect(),
            update: crc32c::crc32c_append,
        }
    }

    /// Process-wide engine, detected on first use.
    pub fn global() -> &'static ChecksumEngine {
        GLOBAL.get_or_init(|| {
            let engine = Self::detect();
            debug!("Checksum backend selected: {:?}", engine.backend);
            engine
        })
    }

    pub fn backend(&self) -> ChecksumBackend {
        self.backend
    }

    /// CRC-32C of `payload`.
    #[inline]
    pub fn compute(&self, payload: &[u8]) -> u32 {
        (self.update)(0, payload)
    }

    /// Extend a running checksum with `data`.
    ///
    /// `update(compute(a), b)` equals `compute` over `a` followed by `b`.
    #[inline]
    pub fn update(&self, crc: u32, data: &[u8]) -> u32 {
        (self.update)(crc, data)
    }
}

impl fmt::Debug for ChecksumEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumEngine")
            .field("backend", &self.backend)
            .finish()
    }
}

/// CRC-32C of `payload` using the process-wide engine.
#[inline]
pub fn checksum(payload: &[u8]) -> u32 {
    ChecksumEngine::global().compute(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK_INPUT: &[u8] = b"123456789";
    const CHECK_VALUE: u32 = 0xE306_9283;

    #[test]
    fn test_check_value() {
        assert_eq!(ChecksumEngine::detect().compute(CHECK_INPUT), CHECK_VALUE);
        assert_eq!(checksum(CHECK_INPUT), CHECK_VALUE);
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(ChecksumEngine::detect().compute(&[]), 0);
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn test_known_vectors() {
        // RFC 3720 (iSCSI) test patterns
        let engine = ChecksumEngine::detect();
        assert_eq!(engine.compute(&[0u8; 32]), 0x8A91_36AA);
        assert_eq!(engine.compute(&[0xFFu8; 32]), 0x62A8_AB43);

        let ascending: Vec<u8> = (0u8..32).collect();
        assert_eq!(engine.compute(&ascending), 0x46DD_794E);
    }

    #[test]
    fn test_update_matches_one_shot_on_every_split() {
        let engine = ChecksumEngine::detect();
        let data: Vec<u8> = (0..1024u32).map(|i| (i * 31 + 7) as u8).collect();
        let whole = engine.compute(&data);

        for at in 0..64 {
            let (head, tail) = data.split_at(at);
            assert_eq!(engine.update(engine.compute(head), tail), whole, "split {at}");
        }
    }

    #[test]
    fn test_global_is_stable() {
        let a = ChecksumEngine::global();
        let b = ChecksumEngine::global();
        assert_eq!(a.backend(), b.backend());
        assert_eq!(a.backend(), ChecksumBackend::detect());
        assert!(std::ptr::eq(a, b));
    }
}
