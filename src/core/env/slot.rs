//! Placement of values in alignment-guaranteed tables
//!
//! libmdbx keeps small values inside leaf pages, where their address moves
//! whenever the page is rewritten. Values too large for a leaf go to their
//! own large pages, and a large page's data always starts
//! [`LARGE_PAGE_HEADER`] bytes past a page boundary. Aligned tables
//! therefore store every value as a slot of at least [`MIN_SLOT`] bytes:
//!
//! ```text
//! [lead u32][len u32][zero fill][value: len bytes][zero fill]
//! ^ page + 20        ^ 8        ^ lead
//! ```
//!
//! `lead` is picked so that `page + 20 + lead + hint.offset` is a multiple
//! of `hint.align`. Page boundaries are multiples of the page size, so the
//! placement holds wherever the page sits in the map.

use super::PAGE_SIZE;
use crate::core::alignment::AlignHint;

/// Bytes in front of the data on a large page.
pub(crate) const LARGE_PAGE_HEADER: usize = 20;

const SLOT_HEADER: usize = 8;

/// Smallest stored value in an aligned table; anything this long is kept on
/// a large page.
pub(crate) const MIN_SLOT: usize = PAGE_SIZE - LARGE_PAGE_HEADER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotLayout {
    /// Offset of the value inside the slot
    pub lead: usize,
    pub len: usize,
    /// Bytes reserved in the engine
    pub total: usize,
}

impl SlotLayout {
    pub fn new(len: usize, hint: AlignHint) -> Option<Self> {
        let lead = hint.place(LARGE_PAGE_HEADER + SLOT_HEADER) - LARGE_PAGE_HEADER;
        let total = lead.checked_add(len)?.max(MIN_SLOT);
        u32::try_from(len).ok()?;
        Some(SlotLayout { lead, len, total })
    }

    /// Fill everything but the value and return the value's bytes.
    pub fn init<'a>(&self, slot: &'a mut [u8]) -> &'a mut [u8] {
        slot[0..4].copy_from_slice(&(self.lead as u32).to_le_bytes());
        slot[4..8].copy_from_slice(&(self.len as u32).to_le_bytes());
        slot[SLOT_HEADER..self.lead].fill(0);
        let (_, rest) = slot.split_at_mut(self.lead);
        let (value, tail) = rest.split_at_mut(self.len);
        tail.fill(0);
        value
    }
}

/// The value inside a stored slot.
///
/// A slot whose header does not describe a range inside it is returned
/// whole, so record validation reports it as damaged.
pub(crate) fn unwrap(slot: &[u8]) -> &[u8] {
    let Some(header) = slot.first_chunk::<SLOT_HEADER>() else {
        return slot;
    };
    let lead = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    match lead.checked_add(len) {
        Some(end) if lead >= SLOT_HEADER && end <= slot.len() => &slot[lead..end],
        _ => slot,
    }
}
