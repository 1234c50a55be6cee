use super::raw;
use super::slot;
use super::table::TableMode;
use crate::core::error::StoreError;
use mdbx_sys as ffi;
use std::marker::PhantomData;

/// Ordered iteration over one table of a transaction's snapshot.
///
/// Yields `(key, value)` pairs in ascending key order. A prefix cursor stops
/// at the first key that no longer starts with the prefix.
pub struct Cursor<'txn> {
    raw: *mut ffi::MDBX_cursor,
    mode: TableMode,
    prefix: Option<Vec<u8>>,
    started: bool,
    done: bool,
    _txn: PhantomData<&'txn ()>,
}

impl<'txn> Cursor<'txn> {
    /// # Safety
    /// `txn` must stay open for `'txn` and `dbi` must be valid in it.
    pub(crate) unsafe fn open(
        txn: *mut ffi::MDBX_txn,
        dbi: raw::Dbi,
        mode: TableMode,
        prefix: Option<&[u8]>,
    ) -> Result<Self, StoreError> {
        Ok(Cursor {
            raw: raw::cursor_open(txn, dbi)?,
            mode,
            prefix: prefix.filter(|p| !p.is_empty()).map(<[u8]>::to_vec),
            started: false,
            done: false,
            _txn: PhantomData,
        })
    }

    fn step(&mut self) -> Result<Option<(&'txn [u8], &'txn [u8])>, StoreError> {
        let seek = if self.started {
            None
        } else {
            self.prefix.as_deref()
        };
        // SAFETY: the cursor belongs to a transaction that outlives 'txn,
        // and pages it returns stay valid for that long.
        let entry = unsafe { raw::cursor_get(self.raw, seek, !self.started)? };
        self.started = true;
        Ok(entry)
    }
}

impl<'txn> Iterator for Cursor<'txn> {
    type Item = Result<(&'txn [u8], &'txn [u8]), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let (key, value) = match self.step() {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(err) => {
                self.done = true;
                return Some(Err(err));
            }
        };

        if let Some(prefix) = &self.prefix {
            if !key.starts_with(prefix) {
                self.done = true;
                return None;
            }
        }

        let value = match self.mode {
            TableMode::Aligned { .. } => slot::unwrap(value),
            TableMode::Unaligned => value,
        };
        Some(Ok((key, value)))
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        // SAFETY: opened in `open` and closed only here, before the
        // transaction ends.
        unsafe { ffi::mdbx_cursor_close(self.raw) }
    }
}
