//! Zero-copy record reads
//!
//! A read fetches the framed bytes from the map, validates the header, and
//! hands back a [`View`] that derefs to the archived type. When the payload
//! is suitably aligned the view points straight into the map; otherwise the
//! payload is copied once into an aligned buffer owned by the view. Either
//! way the view borrows the transaction, so it cannot outlive the snapshot
//! it was read from.
//!
//! Two kinds of view type are supported: plain-layout types through
//! [`ArchivedRecord`] (zerocopy casts) and rkyv archives through
//! [`ArchivedValue`].

use crate::core::alignment::AlignmentCheck;
use crate::core::archive::{ArchivedValue, ARCHIVE_ALIGN};
use crate::core::env::{ReadTxn, Table};
use crate::core::error::ReadError;
use crate::core::record::{Decoded, RecordCodec, VersionSet};
use rkyv::api::high::HighValidator;
use rkyv::bytecheck::CheckBytes;
use rkyv::rancor;
use rkyv::util::AlignedVec;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ops::Deref;
use std::ptr::NonNull;
use tracing::{trace, warn};
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// A type that can be viewed in place over a record payload.
///
/// The type occupies the start of the payload; any bytes after it are
/// available through [`View::trailing`].
pub trait ArchivedRecord: FromBytes + KnownLayout + Immutable {
    /// Payload versions this type can be read from. Records carrying any
    /// other version are rejected as unsupported.
    const VERSIONS: VersionSet;
}

/// Zero-sized view for untyped access to any record's payload.
#[derive(Debug, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RawPayload([u8; 0]);

impl ArchivedRecord for RawPayload {
    const VERSIONS: VersionSet = VersionSet::ALL;
}

/// Typed view over a record payload, valid for the transaction `'txn`.
pub struct View<'txn, T> {
    value: NonNull<T>,
    payload: NonNull<[u8]>,
    version: u8,

    /// Aligned copy backing `value` and `payload`, when the stored bytes
    /// could not be viewed in place
    copy: Option<AlignedVec<ARCHIVE_ALIGN>>,

    _txn: PhantomData<&'txn T>,
}

/// One allocation, aligned for any view type up to [`ARCHIVE_ALIGN`].
fn aligned_copy(payload: &[u8]) -> AlignedVec<ARCHIVE_ALIGN> {
    let mut copy = AlignedVec::<ARCHIVE_ALIGN>::with_capacity(payload.len());
    copy.extend_from_slice(payload);
    copy
}

impl<'txn, T> View<'txn, T> {
    /// The whole payload (without the record header).
    pub fn payload(&self) -> &[u8] {
        // SAFETY: points into the map (kept alive by 'txn) or into the heap
        // buffer of `self.copy`, which lives as long as self and never
        // reallocates.
        unsafe { self.payload.as_ref() }
    }

    /// Version the record was written with.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// True when the view points directly into the store's map.
    pub fn is_zero_copy(&self) -> bool {
        self.copy.is_none()
    }
}

impl<'txn, T: ArchivedRecord> View<'txn, T> {
    fn borrowed(key: &[u8], payload: &'txn [u8], version: u8) -> Result<Self, ReadError> {
        let (value, _) = T::ref_from_prefix(payload).map_err(|_| ReadError::Misaligned {
            key: key.to_vec(),
            required: align_of::<T>(),
        })?;

        Ok(View {
            value: NonNull::from(value),
            payload: NonNull::from(payload),
            version,
            copy: None,
            _txn: PhantomData,
        })
    }

    fn copied(key: &[u8], payload: &[u8], version: u8) -> Result<Self, ReadError> {
        let misaligned = || ReadError::Misaligned {
            key: key.to_vec(),
            required: align_of::<T>(),
        };
        if align_of::<T>() > ARCHIVE_ALIGN {
            return Err(misaligned());
        }

        let copy = aligned_copy(payload);
        let (value, _) = T::ref_from_prefix(copy.as_slice()).map_err(|_| misaligned())?;
        let value = NonNull::from(value);
        let payload = NonNull::from(copy.as_slice());

        Ok(View {
            value,
            payload,
            version,
            copy: Some(copy),
            _txn: PhantomData,
        })
    }

    /// Payload bytes following the viewed value.
    pub fn trailing(&self) -> &[u8] {
        &self.payload()[size_of::<T>()..]
    }
}

impl<T> Deref for View<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: `value` was produced by a checked cast or a validated
        // archive access over bytes that outlive this view (see `payload`).
        unsafe { self.value.as_ref() }
    }
}

impl<T: fmt::Debug> fmt::Debug for View<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("value", &**self)
            .field("version", &self.version)
            .field("len", &self.payload().len())
            .field("zero_copy", &self.is_zero_copy())
            .finish()
    }
}

/// Read path for framed records.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroCopyReader {
    codec: RecordCodec,
}

impl ZeroCopyReader {
    pub fn new(codec: RecordCodec) -> Self {
        ZeroCopyReader { codec }
    }

    /// Read and validate the record under `key`.
    ///
    /// Absent keys are `Ok(None)`. Damaged records are
    /// [`ReadError::Corrupt`], never `None`.
    pub fn get<'txn, T, R>(
        &self,
        txn: &'txn R,
        table: Table,
        key: &[u8],
    ) -> Result<Option<View<'txn, T>>, ReadError>
    where
        T: ArchivedRecord,
        R: ReadTxn + ?Sized,
    {
        match txn.get(table, key)? {
            Some(raw) => self.view_of(table, key, raw).map(Some),
            None => Ok(None),
        }
    }

    /// Read the record under `key` as a validated rkyv archive of `T`.
    pub fn get_archived<'txn, T, R>(
        &self,
        txn: &'txn R,
        table: Table,
        key: &[u8],
    ) -> Result<Option<View<'txn, T::Archived>>, ReadError>
    where
        T: ArchivedValue,
        T::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>,
        R: ReadTxn + ?Sized,
    {
        match txn.get(table, key)? {
            Some(raw) => self.archived_view_of::<T>(table, key, raw).map(Some),
            None => Ok(None),
        }
    }

    /// Every record whose key starts with `prefix`, in key order.
    ///
    /// Each record yields its own result, so a damaged record does not end
    /// the scan.
    pub fn scan_prefix<'txn, T, R>(
        &self,
        txn: &'txn R,
        table: Table,
        prefix: &[u8],
    ) -> Result<impl Iterator<Item = Result<(&'txn [u8], View<'txn, T>), ReadError>> + 'txn, ReadError>
    where
        T: ArchivedRecord + 'txn,
        R: ReadTxn + ?Sized,
    {
        let reader = *self;
        let cursor = txn.prefix(table, prefix)?;
        Ok(cursor.map(move |entry| {
            let (key, raw) = entry?;
            reader.view_of(table, key, raw).map(|view| (key, view))
        }))
    }

    fn decode<'txn>(
        &self,
        key: &[u8],
        raw: &'txn [u8],
        versions: &VersionSet,
    ) -> Result<Decoded<'txn>, ReadError> {
        self.codec.decode(raw, versions).map_err(|source| {
            warn!(
                "Corrupt record {:?}: {:?} ({})",
                String::from_utf8_lossy(key),
                source.kind(),
                source
            );
            ReadError::Corrupt {
                key: key.to_vec(),
                source,
            }
        })
    }

    /// Whether a payload read from `table` can be viewed in place at
    /// `required` alignment.
    fn in_place(table: Table, payload: &[u8], required: usize) -> bool {
        let mode = table.mode();
        let trusted = mode.is_alignment_guaranteed() && required <= mode.record_align();
        trusted || AlignmentCheck::is_aligned(payload.as_ptr(), required)
    }

    /// Validate framed bytes read from `table` and build a view over them.
    pub fn view_of<'txn, T: ArchivedRecord>(
        &self,
        table: Table,
        key: &[u8],
        raw: &'txn [u8],
    ) -> Result<View<'txn, T>, ReadError> {
        let decoded = self.decode(key, raw, &T::VERSIONS)?;

        if decoded.payload.len() < size_of::<T>() {
            return Err(ReadError::PayloadTooShort {
                key: key.to_vec(),
                required: size_of::<T>(),
                actual: decoded.payload.len(),
            });
        }

        let required = align_of::<T>();
        if Self::in_place(table, decoded.payload, required) {
            View::borrowed(key, decoded.payload, decoded.version)
        } else {
            trace!(
                "Record {:?} is misaligned for {}-byte view, copying {} bytes",
                String::from_utf8_lossy(key),
                required,
                decoded.payload.len()
            );
            View::copied(key, decoded.payload, decoded.version)
        }
    }

    /// Validate framed bytes read from `table` as an archive of `T`.
    pub fn archived_view_of<'txn, T>(
        &self,
        table: Table,
        key: &[u8],
        raw: &'txn [u8],
    ) -> Result<View<'txn, T::Archived>, ReadError>
    where
        T: ArchivedValue,
        T::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>,
    {
        let decoded = self.decode(key, raw, &T::VERSIONS)?;

        let copy = if Self::in_place(table, decoded.payload, ARCHIVE_ALIGN) {
            None
        } else {
            trace!(
                "Archive {:?} is misaligned, copying {} bytes",
                String::from_utf8_lossy(key),
                decoded.payload.len()
            );
            Some(aligned_copy(decoded.payload))
        };

        let bytes: &[u8] = copy.as_deref().unwrap_or(decoded.payload);
        let archived = rkyv::access::<T::Archived, rancor::Error>(bytes).map_err(|source| {
            warn!(
                "Record {:?} holds an invalid archive: {}",
                String::from_utf8_lossy(key),
                source
            );
            ReadError::Archive {
                key: key.to_vec(),
                source,
            }
        })?;
        let value = NonNull::from(archived);
        let payload = NonNull::from(bytes);

        Ok(View {
            value,
            payload,
            version: decoded.version,
            copy,
            _txn: PhantomData,
        })
    }
}
