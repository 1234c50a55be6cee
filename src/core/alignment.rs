//! Alignment checks and placement hints
//!
//! Zero-copy views require the payload to sit at its view type's alignment.
//! Tables written through reservation get that by construction; everything
//! else is checked with [`AlignmentCheck`] and, when misaligned, copied once
//! into an aligned buffer by the reader.

use crate::core::env::PAGE_SIZE;
use crate::core::error::StoreError;

/// Round `value` up to the next multiple of `align` (a power of two).
///
/// `None` when the result does not fit in a `u64`.
#[inline]
pub const fn checked_align_up(value: u64, align: u64) -> Option<u64> {
    match value.checked_add(align - 1) {
        Some(bumped) => Some(bumped & !(align - 1)),
        None => None,
    }
}

/// Read-side alignment check.
pub struct AlignmentCheck;

impl AlignmentCheck {
    /// True when `ptr` is a multiple of `required`.
    ///
    /// `required` must be a power of two; anything else reports misaligned.
    #[inline]
    pub fn is_aligned(ptr: *const u8, required: usize) -> bool {
        required.is_power_of_two() && (ptr as usize) & (required - 1) == 0
    }
}

/// Placement request passed to a reservation.
///
/// The engine places a value so that `value_start + offset` is a multiple
/// of `align`. Records carry a 16-byte header, so a writer that wants the
/// payload aligned asks for `offset = 16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignHint {
    pub align: usize,
    pub offset: usize,
}

impl AlignHint {
    /// No placement constraint: the value lands wherever the engine puts it.
    pub const NONE: AlignHint = AlignHint {
        align: 1,
        offset: 0,
    };

    pub fn new(align: usize, offset: usize) -> Result<Self, StoreError> {
        validate_alignment(align)?;
        Ok(AlignHint { align, offset })
    }

    /// First position `>= from` that satisfies this hint.
    pub(crate) fn place(&self, from: usize) -> usize {
        let offset = self.offset % self.align;
        (from + offset).next_multiple_of(self.align) - offset
    }

    /// True when every value placed by this hint is also placed as `other`
    /// requires.
    pub fn implies(&self, other: &AlignHint) -> bool {
        self.align >= other.align && self.offset % other.align == other.offset % other.align
    }
}

/// Alignments must be powers of two and at most a page, since the mapping
/// itself is only page aligned.
pub fn validate_alignment(align: usize) -> Result<(), StoreError> {
    if align.is_power_of_two() && align <= PAGE_SIZE {
        Ok(())
    } else {
        Err(StoreError::InvalidAlignment(align))
    }
}
