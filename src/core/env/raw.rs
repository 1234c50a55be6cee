//! Thin wrappers over the libmdbx C API
//!
//! Every function here is `unsafe`: callers pass live handles obtained from
//! libmdbx and keep them alive for the duration of the call. Return codes
//! become [`StoreError`]s; absent keys become `None`.

use crate::core::error::StoreError;
use mdbx_sys as ffi;
use std::ffi::{c_int, c_void, CStr, CString};
use std::ptr;

pub(crate) type Dbi = ffi::MDBX_dbi;

/// Turn a libmdbx return code into a result.
pub(crate) fn check(rc: c_int) -> Result<(), StoreError> {
    if rc == ffi::MDBX_SUCCESS {
        Ok(())
    } else {
        Err(engine_error(rc))
    }
}

pub(crate) fn engine_error(rc: c_int) -> StoreError {
    // SAFETY: mdbx_strerror returns a static or thread-local C string for
    // any code.
    let message = unsafe { CStr::from_ptr(ffi::mdbx_strerror(rc)) }
        .to_string_lossy()
        .into_owned();
    StoreError::Engine { code: rc, message }
}

pub(crate) fn c_name(name: &str) -> Result<CString, StoreError> {
    CString::new(name)
        .map_err(|_| StoreError::InvalidConfig(format!("name {name:?} contains a NUL byte")))
}

#[inline]
fn val(bytes: &[u8]) -> ffi::MDBX_val {
    ffi::MDBX_val {
        iov_base: bytes.as_ptr() as *mut c_void,
        iov_len: bytes.len(),
    }
}

#[inline]
fn empty_val() -> ffi::MDBX_val {
    ffi::MDBX_val {
        iov_base: ptr::null_mut(),
        iov_len: 0,
    }
}

/// View a value returned by libmdbx.
///
/// # Safety
/// `v` must describe memory that stays valid and unmodified for `'a`.
#[inline]
pub(crate) unsafe fn as_slice<'a>(v: &ffi::MDBX_val) -> &'a [u8] {
    if v.iov_len == 0 || v.iov_base.is_null() {
        &[]
    } else {
        std::slice::from_raw_parts(v.iov_base as *const u8, v.iov_len)
    }
}

/// Writable view of a reservation.
///
/// # Safety
/// `ptr` must address `len` writable bytes that stay valid for `'a`.
#[inline]
pub(crate) unsafe fn as_mut_slice<'a>(ptr: *mut u8, len: usize) -> &'a mut [u8] {
    if len == 0 || ptr.is_null() {
        &mut []
    } else {
        std::slice::from_raw_parts_mut(ptr, len)
    }
}

pub(crate) unsafe fn begin(
    env: *mut ffi::MDBX_env,
    read_only: bool,
) -> Result<*mut ffi::MDBX_txn, StoreError> {
    let flags = if read_only {
        ffi::MDBX_TXN_RDONLY
    } else {
        ffi::MDBX_TXN_READWRITE
    };
    let mut txn: *mut ffi::MDBX_txn = ptr::null_mut();
    check(ffi::mdbx_txn_begin_ex(
        env,
        ptr::null_mut(),
        flags,
        &mut txn,
        ptr::null_mut(),
    ))?;
    Ok(txn)
}

/// Open the named table, creating it when `create` is set.
///
/// `Ok(None)` when the table does not exist and `create` is not set.
pub(crate) unsafe fn open_dbi(
    txn: *mut ffi::MDBX_txn,
    name: &str,
    create: bool,
) -> Result<Option<Dbi>, StoreError> {
    let name = c_name(name)?;
    let flags = if create {
        ffi::MDBX_CREATE
    } else {
        ffi::MDBX_DB_DEFAULTS
    };
    let mut dbi: Dbi = 0;
    match ffi::mdbx_dbi_open(txn, name.as_ptr(), flags, &mut dbi) {
        ffi::MDBX_SUCCESS => Ok(Some(dbi)),
        ffi::MDBX_NOTFOUND => Ok(None),
        rc => Err(engine_error(rc)),
    }
}

/// Value stored under `key`, borrowed from the transaction's pages.
pub(crate) unsafe fn get<'a>(
    txn: *mut ffi::MDBX_txn,
    dbi: Dbi,
    key: &[u8],
) -> Result<Option<&'a [u8]>, StoreError> {
    let key = val(key);
    let mut data = empty_val();
    match ffi::mdbx_get(txn, dbi, &key, &mut data) {
        ffi::MDBX_SUCCESS => Ok(Some(as_slice(&data))),
        ffi::MDBX_NOTFOUND => Ok(None),
        rc => Err(engine_error(rc)),
    }
}

/// Reserve `len` bytes for `key` and return their address in the map.
pub(crate) unsafe fn reserve(
    txn: *mut ffi::MDBX_txn,
    dbi: Dbi,
    key: &[u8],
    len: usize,
) -> Result<*mut u8, c_int> {
    let key = val(key);
    let mut data = ffi::MDBX_val {
        iov_base: ptr::null_mut(),
        iov_len: len,
    };
    match ffi::mdbx_put(txn, dbi, &key, &mut data, ffi::MDBX_UPSERT | ffi::MDBX_RESERVE) {
        ffi::MDBX_SUCCESS => Ok(data.iov_base as *mut u8),
        rc => Err(rc),
    }
}

pub(crate) unsafe fn put(
    txn: *mut ffi::MDBX_txn,
    dbi: Dbi,
    key: &[u8],
    value: &[u8],
) -> Result<(), c_int> {
    let key = val(key);
    let mut data = val(value);
    match ffi::mdbx_put(txn, dbi, &key, &mut data, ffi::MDBX_UPSERT) {
        ffi::MDBX_SUCCESS => Ok(()),
        rc => Err(rc),
    }
}

/// Remove `key`; `false` when it was not there.
pub(crate) unsafe fn del(
    txn: *mut ffi::MDBX_txn,
    dbi: Dbi,
    key: &[u8],
) -> Result<bool, StoreError> {
    let key = val(key);
    match ffi::mdbx_del(txn, dbi, &key, ptr::null()) {
        ffi::MDBX_SUCCESS => Ok(true),
        ffi::MDBX_NOTFOUND => Ok(false),
        rc => Err(engine_error(rc)),
    }
}

/// Number of entries in a table as of the transaction's snapshot.
pub(crate) unsafe fn entries(txn: *mut ffi::MDBX_txn, dbi: Dbi) -> Result<u64, StoreError> {
    let mut stat: ffi::MDBX_stat = std::mem::zeroed();
    check(ffi::mdbx_dbi_stat(
        txn,
        dbi,
        &mut stat,
        std::mem::size_of::<ffi::MDBX_stat>(),
    ))?;
    Ok(stat.ms_entries)
}

/// Whether `ptr` lies on a page mapped for `txn`.
pub(crate) unsafe fn is_mapped(txn: *mut ffi::MDBX_txn, ptr: *const u8) -> bool {
    matches!(
        ffi::mdbx_is_dirty(txn, ptr as *const c_void),
        ffi::MDBX_RESULT_TRUE | ffi::MDBX_RESULT_FALSE
    )
}

/// Raw cursor positioned by [`cursor_get`].
pub(crate) unsafe fn cursor_open(
    txn: *mut ffi::MDBX_txn,
    dbi: Dbi,
) -> Result<*mut ffi::MDBX_cursor, StoreError> {
    let mut cursor: *mut ffi::MDBX_cursor = ptr::null_mut();
    check(ffi::mdbx_cursor_open(txn, dbi, &mut cursor))?;
    Ok(cursor)
}

/// Step the cursor. `seek` positions at the first key `>= seek`; otherwise
/// `first` picks between the first entry and the next one.
pub(crate) unsafe fn cursor_get<'a>(
    cursor: *mut ffi::MDBX_cursor,
    seek: Option<&[u8]>,
    first: bool,
) -> Result<Option<(&'a [u8], &'a [u8])>, StoreError> {
    let (mut key, op) = match seek {
        Some(prefix) => (val(prefix), ffi::MDBX_SET_RANGE),
        None if first => (empty_val(), ffi::MDBX_FIRST),
        None => (empty_val(), ffi::MDBX_NEXT),
    };
    let mut data = empty_val();
    match ffi::mdbx_cursor_get(cursor, &mut key, &mut data, op) {
        ffi::MDBX_SUCCESS => Ok(Some((as_slice(&key), as_slice(&data)))),
        ffi::MDBX_NOTFOUND => Ok(None),
        rc => Err(engine_error(rc)),
    }
}
