use super::cursor::Cursor;
use super::raw;
use super::slot::{self, SlotLayout};
use super::table::{Catalog, Table, TableMode, CATALOG_NAME};
use super::{Env, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use crate::core::alignment::{validate_alignment, AlignHint, AlignmentCheck};
use crate::core::error::StoreError;
use mdbx_sys as ffi;
use parking_lot::MutexGuard;
use std::ffi::c_int;
use std::ptr;
use std::sync::Arc;
use tracing::{debug, info};

fn check_key(key: &[u8]) -> Result<(), StoreError> {
    if key.is_empty() {
        Err(StoreError::EmptyKey)
    } else if key.len() > MAX_KEY_SIZE {
        Err(StoreError::KeyTooLarge {
            len: key.len(),
            max: MAX_KEY_SIZE,
        })
    } else {
        Ok(())
    }
}

/// Stored bytes of a value as seen by callers.
fn stored_value(mode: TableMode, value: &[u8]) -> &[u8] {
    match mode {
        TableMode::Aligned { .. } => slot::unwrap(value),
        TableMode::Unaligned => value,
    }
}

/// What a transaction sees: its engine handle and its tables.
#[doc(hidden)]
pub struct TxnView<'a> {
    env: &'a Env,
    raw: *mut ffi::MDBX_txn,
    catalog: &'a Catalog,
}

/// Read operations shared by read and write transactions.
///
/// Every slice returned borrows from the transaction, so it cannot outlive
/// the snapshot it was read from.
pub trait ReadTxn {
    #[doc(hidden)]
    fn view(&self) -> TxnView<'_>;

    fn env(&self) -> &Env {
        self.view().env
    }

    /// Id of the commit this transaction reads from.
    fn snapshot_id(&self) -> u64;

    /// Look up a table by name.
    fn open_table(&self, name: &str) -> Option<Table> {
        self.view().catalog.find(name)
    }

    fn table_name(&self, table: Table) -> Option<&str> {
        let catalog = self.view().catalog;
        catalog.get(table).ok().map(|state| state.name.as_str())
    }

    /// All tables, in creation order.
    fn tables(&self) -> Vec<(String, Table)> {
        self.view()
            .catalog
            .iter()
            .map(|(table, state)| (state.name.clone(), table))
            .collect()
    }

    /// Raw value stored under `key`.
    fn get(&self, table: Table, key: &[u8]) -> Result<Option<&[u8]>, StoreError> {
        let view = self.view();
        view.catalog.get(table)?;
        if key.is_empty() || key.len() > MAX_KEY_SIZE {
            return Ok(None);
        }
        // SAFETY: pages read here stay valid while the transaction is
        // borrowed; writes need `&mut` and so cannot overlap the borrow.
        let value = unsafe { raw::get(view.raw, table.dbi, key)? };
        Ok(value.map(|value| stored_value(table.mode, value)))
    }

    /// Cursor over every entry of `table`, in key order.
    fn cursor(&self, table: Table) -> Result<Cursor<'_>, StoreError> {
        let view = self.view();
        view.catalog.get(table)?;
        // SAFETY: the cursor borrows the transaction, which outlives it.
        unsafe { Cursor::open(view.raw, table.dbi, table.mode, None) }
    }

    /// Cursor over the entries of `table` whose key starts with `prefix`.
    fn prefix(&self, table: Table, prefix: &[u8]) -> Result<Cursor<'_>, StoreError> {
        let view = self.view();
        view.catalog.get(table)?;
        // SAFETY: as in `cursor`.
        unsafe { Cursor::open(view.raw, table.dbi, table.mode, Some(prefix)) }
    }

    /// Number of entries in `table`.
    fn entries(&self, table: Table) -> Result<u64, StoreError> {
        let view = self.view();
        view.catalog.get(table)?;
        // SAFETY: live transaction and a table handle checked above.
        unsafe { raw::entries(view.raw, table.dbi) }
    }

    /// Whether `ptr` points into the store's mapped pages rather than the
    /// heap.
    fn contains(&self, ptr: *const u8) -> bool {
        // SAFETY: only compares the address against the mapping.
        unsafe { raw::is_mapped(self.view().raw, ptr) }
    }
}

/// Read transaction over a fixed snapshot.
///
/// Commits that land after `begin` are invisible for the whole life of the
/// transaction. Dropping it releases the snapshot. Not `Send`: the engine
/// handle stays on the thread that began it.
pub struct RoTxn<'env> {
    env: &'env Env,
    pub(super) raw: *mut ffi::MDBX_txn,
    catalog: Arc<Catalog>,
}

impl<'env> RoTxn<'env> {
    pub(crate) fn begin(env: &'env Env) -> Result<Self, StoreError> {
        // Tables are read before the snapshot is taken, so every table in
        // the catalog exists in the snapshot.
        let catalog = env.catalog();
        // SAFETY: the environment is open for 'env.
        let raw = unsafe { raw::begin(env.raw(), true)? };
        Ok(RoTxn { env, raw, catalog })
    }

    /// End the transaction.
    pub fn close(self) {}
}

impl ReadTxn for RoTxn<'_> {
    fn view(&self) -> TxnView<'_> {
        TxnView {
            env: self.env,
            raw: self.raw,
            catalog: &self.catalog,
        }
    }

    fn snapshot_id(&self) -> u64 {
        // SAFETY: live transaction.
        unsafe { ffi::mdbx_txn_id(self.raw) }
    }
}

impl Drop for RoTxn<'_> {
    fn drop(&mut self) {
        // SAFETY: read transactions end exactly once, here.
        unsafe {
            ffi::mdbx_txn_abort(self.raw);
        }
    }
}

/// The exclusive write transaction.
///
/// Owns the writer lock until committed, aborted or dropped. Dropping an
/// uncommitted transaction aborts it. The lock guard is not `Send`, so the
/// transaction stays on the thread that began it.
pub struct RwTxn<'env> {
    env: &'env Env,
    pub(super) raw: *mut ffi::MDBX_txn,

    /// Committed tables plus tables created by this transaction
    catalog: Catalog,

    tables_created: bool,
    dirty: bool,
    finished: bool,

    _guard: MutexGuard<'env, ()>,
}

impl<'env> RwTxn<'env> {
    pub(crate) fn begin(env: &'env Env, guard: MutexGuard<'env, ()>) -> Result<Self, StoreError> {
        let catalog = Catalog::clone(&env.catalog());
        // SAFETY: the environment is open for 'env and the writer lock is
        // held.
        let raw = unsafe { raw::begin(env.raw(), false)? };
        Ok(RwTxn {
            env,
            raw,
            catalog,
            tables_created: false,
            dirty: false,
            finished: false,
            _guard: guard,
        })
    }

    /// Id this transaction commits as.
    pub fn id(&self) -> u64 {
        // SAFETY: live transaction.
        unsafe { ffi::mdbx_txn_id(self.raw) }
    }

    fn write_error(&self, rc: c_int, requested: usize) -> StoreError {
        if rc == ffi::MDBX_MAP_FULL {
            StoreError::MapFull {
                requested: requested as u64,
                map_size: self.env.map_size(),
            }
        } else {
            raw::engine_error(rc)
        }
    }

    /// Open `name`, creating it with `mode` if it does not exist yet.
    pub fn create_table(&mut self, name: &str, mode: TableMode) -> Result<Table, StoreError> {
        if let Some(existing) = self.catalog.find(name) {
            if existing.mode != mode {
                return Err(StoreError::TableModeMismatch {
                    name: name.to_string(),
                });
            }
            return Ok(existing);
        }

        let max = self.env.options().max_tables;
        if self.catalog.len() >= max as usize {
            return Err(StoreError::TableLimitExceeded { max });
        }
        check_key(name.as_bytes())?;
        if name == CATALOG_NAME {
            return Err(StoreError::InvalidConfig(format!(
                "table name {name:?} is reserved"
            )));
        }
        mode.validate()?;

        let id = self.catalog.len() as super::TableId;
        // SAFETY: live write transaction.
        let dbi = unsafe { raw::open_dbi(self.raw, name, true) }
            .map_err(|err| match err {
                StoreError::Engine { code, .. } if code == ffi::MDBX_DBS_FULL => {
                    StoreError::TableLimitExceeded { max }
                }
                other => other,
            })?
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))?;

        let entry = mode.to_catalog(id);
        // SAFETY: live write transaction and the catalog's handle.
        unsafe { raw::put(self.raw, self.env.catalog_dbi(), name.as_bytes(), &entry) }
            .map_err(|rc| self.write_error(rc, entry.len()))?;

        let table = self.catalog.push(name.to_string(), dbi, mode);
        self.tables_created = true;
        self.dirty = true;

        info!("Created table {:?} (id {}, {:?})", name, id, mode);
        Ok(table)
    }

    /// Reserve `len` bytes for `key`, placed according to `hint`.
    ///
    /// The returned buffer is the value's final home in the map; its
    /// contents are unspecified until the caller fills it.
    ///
    /// Aligned tables refuse any hint weaker than the table's record
    /// placement. Unaligned tables store the value exactly as given and
    /// make no placement promise.
    pub fn reserve(
        &mut self,
        table: Table,
        key: &[u8],
        len: usize,
        hint: AlignHint,
    ) -> Result<&mut [u8], StoreError> {
        check_key(key)?;
        if len > MAX_VALUE_SIZE {
            return Err(StoreError::ValueTooLarge {
                len,
                max: MAX_VALUE_SIZE,
            });
        }
        validate_alignment(hint.align)?;
        let state = self.catalog.get(table)?;
        if !hint.implies(&table.mode.required_hint()) {
            return Err(StoreError::AlignmentRequired {
                table: state.name.clone(),
            });
        }

        match table.mode {
            TableMode::Unaligned => {
                // SAFETY: live write transaction and a checked table handle.
                let ptr = unsafe { raw::reserve(self.raw, table.dbi, key, len) }
                    .map_err(|rc| self.write_error(rc, len))?;
                self.dirty = true;
                // SAFETY: libmdbx reserved `len` writable bytes at `ptr`,
                // valid until the next write in this transaction.
                Ok(unsafe { raw::as_mut_slice(ptr, len) })
            }
            TableMode::Aligned { .. } => {
                let layout = SlotLayout::new(len, hint).ok_or(StoreError::ValueTooLarge {
                    len,
                    max: MAX_VALUE_SIZE,
                })?;
                // SAFETY: as above.
                let ptr = unsafe { raw::reserve(self.raw, table.dbi, key, layout.total) }
                    .map_err(|rc| self.write_error(rc, layout.total))?;
                self.dirty = true;

                let placed = ptr.wrapping_add(layout.lead + hint.offset);
                if !AlignmentCheck::is_aligned(placed, hint.align) {
                    // SAFETY: live write transaction.
                    unsafe { raw::del(self.raw, table.dbi, key)? };
                    return Err(StoreError::PlacementFailed {
                        align: hint.align,
                        offset: hint.offset,
                    });
                }

                // SAFETY: as above, for `layout.total` bytes.
                let slot = unsafe { raw::as_mut_slice(ptr, layout.total) };
                Ok(layout.init(slot))
            }
        }
    }

    /// Store `value` under `key` with no placement. Only unaligned tables
    /// accept it.
    pub fn put(&mut self, table: Table, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.reserve(table, key, value.len(), AlignHint::NONE)?
            .copy_from_slice(value);
        Ok(())
    }

    /// Remove `key`, returning whether it existed.
    pub fn delete(&mut self, table: Table, key: &[u8]) -> Result<bool, StoreError> {
        check_key(key)?;
        self.catalog.get(table)?;
        // SAFETY: live write transaction and a checked table handle.
        let existed = unsafe { raw::del(self.raw, table.dbi, key)? };
        self.dirty |= existed;
        Ok(existed)
    }

    /// Make every change durable and visible to transactions begun after
    /// this call.
    ///
    /// A transaction that hit an engine failure, such as a full map, cannot
    /// commit; it is rolled back and [`StoreError::TxnAborted`] returned.
    pub fn commit(mut self) -> Result<(), StoreError> {
        let txn_id = self.id();
        self.finished = true;

        // SAFETY: the handle is ended by this call whatever the outcome and
        // never used again.
        let rc = unsafe { ffi::mdbx_txn_commit_ex(self.raw, ptr::null_mut()) };
        if rc == ffi::MDBX_RESULT_TRUE {
            debug!("Write txn {} was poisoned and rolled back", txn_id);
            return Err(StoreError::TxnAborted);
        }
        raw::check(rc)?;

        if self.tables_created {
            self.env.publish(std::mem::take(&mut self.catalog));
        }

        if self.dirty {
            debug!("Write txn {} committed", txn_id);
        } else {
            debug!("Write txn {} committed with no changes", txn_id);
        }
        Ok(())
    }

    /// Discard every change.
    pub fn abort(self) {}
}

impl ReadTxn for RwTxn<'_> {
    fn view(&self) -> TxnView<'_> {
        TxnView {
            env: self.env,
            raw: self.raw,
            catalog: &self.catalog,
        }
    }

    fn snapshot_id(&self) -> u64 {
        self.id().saturating_sub(1)
    }
}

impl Drop for RwTxn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // SAFETY: the transaction was neither committed nor aborted.
            unsafe {
                ffi::mdbx_txn_abort(self.raw);
            }
            if self.dirty {
                debug!("Write txn aborted, changes discarded");
            }
        }
    }
}
