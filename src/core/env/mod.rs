//! Transactional key-value engine on libmdbx
//!
//! Every environment is one libmdbx file opened with a writable map, so
//! values returned by a transaction are references into the map and never
//! copies. Tables are libmdbx named tables; their [`TableMode`] lives in a
//! catalog table next to them.
//!
//! Readers see the snapshot current when they began. One writer runs at a
//! time, serialized by a lock in front of libmdbx's own so that the
//! in-memory catalog is only ever replaced by the lock holder.

mod cursor;
mod raw;
mod slot;
mod table;
mod txn;

pub use cursor::Cursor;
pub use table::{Table, TableId, TableMode};
pub use txn::{ReadTxn, RoTxn, RwTxn};

use self::raw::Dbi;
use self::table::{Catalog, TableState, CATALOG_NAME};
use crate::core::alignment::checked_align_up;
use crate::core::error::StoreError;
use mdbx_sys as ffi;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;
use tracing::{debug, info};

pub const PAGE_SIZE: usize = 4096;

/// Name of the store file inside the environment directory.
pub const DATA_FILE: &str = "mdbx.dat";

/// Longest key accepted.
pub const MAX_KEY_SIZE: usize = 511;

/// Largest value accepted by a single put or reservation.
pub const MAX_VALUE_SIZE: usize = 1 << 30;

/// Most tables one environment may hold. libmdbx caps named tables just
/// below this, and one is taken by the catalog.
pub const MAX_TABLES: u32 = 32_764;

/// Smallest accepted map.
pub const MIN_MAP_SIZE: u64 = 256 * 1024;

/// Environment options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvOptions {
    /// Most tables the environment may hold
    pub max_tables: u32,

    /// Upper bound of the map in bytes; the file grows up to it
    pub map_size: u64,

    /// Flush to disk on every commit
    pub durable: bool,
}

impl Default for EnvOptions {
    fn default() -> Self {
        EnvOptions {
            max_tables: 10,
            map_size: 64 * 1024 * 1024,
            durable: true,
        }
    }
}

impl EnvOptions {
    pub fn max_tables(mut self, max_tables: u32) -> Self {
        self.max_tables = max_tables;
        self
    }

    pub fn map_size(mut self, map_size: u64) -> Self {
        self.map_size = map_size;
        self
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        self.map_len().map(|_| ())
    }

    /// Map size rounded up to whole pages.
    fn map_len(&self) -> Result<isize, StoreError> {
        if self.max_tables > MAX_TABLES {
            return Err(StoreError::InvalidConfig(format!(
                "max_tables {} exceeds {}",
                self.max_tables, MAX_TABLES
            )));
        }
        if self.map_size < MIN_MAP_SIZE {
            return Err(StoreError::InvalidConfig(format!(
                "map_size {} is smaller than the minimum of {} bytes",
                self.map_size, MIN_MAP_SIZE
            )));
        }
        checked_align_up(self.map_size, PAGE_SIZE as u64)
            .and_then(|len| isize::try_from(len).ok())
            .ok_or_else(|| {
                StoreError::InvalidConfig(format!(
                    "map_size {} does not fit in the address space",
                    self.map_size
                ))
            })
    }
}

/// Per-table statistics.
#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub name: String,
    pub id: TableId,
    pub mode: TableMode,
    pub entries: u64,
}

/// Environment statistics as of the latest commit.
#[derive(Debug, Clone, Serialize)]
pub struct EnvStats {
    pub path: PathBuf,
    pub txn_id: u64,
    /// Bytes of the map holding pages, live or free
    pub used_bytes: u64,
    pub map_size: u64,
    pub max_tables: u32,
    pub tables: Vec<TableStats>,
}

struct RawEnv(*mut ffi::MDBX_env);

// SAFETY: opened with MDBX_NOSTICKYTHREADS; the handle itself is
// thread-safe and transactions are confined to one thread by their types.
unsafe impl Send for RawEnv {}
unsafe impl Sync for RawEnv {}

impl RawEnv {
    fn create() -> Result<Self, StoreError> {
        let mut env: *mut ffi::MDBX_env = ptr::null_mut();
        // SAFETY: out-pointer to a local.
        raw::check(unsafe { ffi::mdbx_env_create(&mut env) })?;
        Ok(RawEnv(env))
    }
}

impl Drop for RawEnv {
    fn drop(&mut self) {
        // SAFETY: every transaction borrows the owning Env, so none is left.
        unsafe {
            ffi::mdbx_env_close_ex(self.0, false);
        }
    }
}

fn env_flags(durable: bool) -> ffi::MDBX_env_flags_t {
    let flags = ffi::MDBX_WRITEMAP | ffi::MDBX_NOSTICKYTHREADS;
    if durable {
        flags
    } else {
        flags | ffi::MDBX_SAFE_NOSYNC
    }
}

/// An open store environment.
///
/// Shared by reference (or `Arc`) between threads. Any number of read
/// transactions may run alongside at most one write transaction.
pub struct Env {
    /// Environment directory
    path: PathBuf,

    options: EnvOptions,
    map_size: u64,

    /// Table holding every table's mode
    catalog_dbi: Dbi,

    /// Tables as of the latest commit
    catalog: RwLock<Arc<Catalog>>,

    /// Held by the active write transaction
    writer: Mutex<()>,

    raw: RawEnv,
}

impl Env {
    /// Open or create the environment in directory `path`.
    pub fn open<P: AsRef<Path>>(path: P, options: EnvOptions) -> Result<Self, StoreError> {
        let map_len = options.map_len()?;
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        let c_path = raw::c_name(&path.join(DATA_FILE).to_string_lossy())?;

        let env = RawEnv::create()?;
        // SAFETY: a fresh handle, configured before it is opened.
        unsafe {
            raw::check(ffi::mdbx_env_set_option(
                env.0,
                ffi::MDBX_opt_max_db,
                u64::from(options.max_tables) + 1,
            ))?;
            raw::check(ffi::mdbx_env_set_geometry(
                env.0,
                MIN_MAP_SIZE as isize,
                -1,
                map_len,
                -1,
                -1,
                PAGE_SIZE as isize,
            ))?;
            raw::check(ffi::mdbx_env_open(
                env.0,
                c_path.as_ptr(),
                env_flags(options.durable) | ffi::MDBX_NOSUBDIR,
                0o644,
            ))?;
        }

        let (catalog_dbi, catalog) = load_catalog(&env, &options)?;

        info!(
            "Opened store at {:?}: {} tables, {} byte map",
            path,
            catalog.len(),
            map_len
        );

        Ok(Env {
            path,
            options,
            map_size: map_len as u64,
            catalog_dbi,
            catalog: RwLock::new(Arc::new(catalog)),
            writer: Mutex::new(()),
            raw: env,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &EnvOptions {
        &self.options
    }

    /// Upper bound of the map in bytes.
    pub fn map_size(&self) -> u64 {
        self.map_size
    }

    pub(crate) fn raw(&self) -> *mut ffi::MDBX_env {
        self.raw.0
    }

    pub(crate) fn catalog_dbi(&self) -> Dbi {
        self.catalog_dbi
    }

    pub(crate) fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog.read())
    }

    pub(crate) fn publish(&self, catalog: Catalog) {
        *self.catalog.write() = Arc::new(catalog);
    }

    /// Committed table named `name`.
    pub fn table(&self, name: &str) -> Option<Table> {
        self.catalog.read().find(name)
    }

    /// Committed tables, in creation order.
    pub fn tables(&self) -> Vec<(String, Table)> {
        self.catalog
            .read()
            .iter()
            .map(|(table, state)| (state.name.clone(), table))
            .collect()
    }

    /// Begin a read transaction over the latest committed snapshot.
    pub fn begin_ro_txn(&self) -> Result<RoTxn<'_>, StoreError> {
        RoTxn::begin(self)
    }

    /// Begin the write transaction, blocking while another is active.
    pub fn begin_rw_txn(&self) -> Result<RwTxn<'_>, StoreError> {
        let guard = self.writer.lock();
        RwTxn::begin(self, guard)
    }

    /// Begin the write transaction unless another one is active.
    pub fn try_begin_rw_txn(&self) -> Result<Option<RwTxn<'_>>, StoreError> {
        match self.writer.try_lock() {
            Some(guard) => RwTxn::begin(self, guard).map(Some),
            None => Ok(None),
        }
    }

    /// Flush committed data to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        // SAFETY: open environment.
        match unsafe { ffi::mdbx_env_sync_ex(self.raw(), true, false) } {
            ffi::MDBX_SUCCESS | ffi::MDBX_RESULT_TRUE => Ok(()),
            rc => Err(raw::engine_error(rc)),
        }
    }

    pub fn stat(&self) -> Result<EnvStats, StoreError> {
        let txn = self.begin_ro_txn()?;

        // SAFETY: zeroed is a valid MDBX_envinfo, filled by libmdbx.
        let mut info: ffi::MDBX_envinfo = unsafe { std::mem::zeroed() };
        raw::check(unsafe {
            ffi::mdbx_env_info_ex(
                self.raw(),
                txn.raw,
                &mut info,
                std::mem::size_of::<ffi::MDBX_envinfo>(),
            )
        })?;

        let tables = txn
            .tables()
            .into_iter()
            .map(|(name, table)| {
                Ok(TableStats {
                    name,
                    id: table.id(),
                    mode: table.mode(),
                    entries: txn.entries(table)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(EnvStats {
            path: self.path.clone(),
            txn_id: txn.snapshot_id(),
            used_bytes: (info.mi_last_pgno + 1) * PAGE_SIZE as u64,
            map_size: info.mi_mapsize,
            max_tables: self.options.max_tables,
            tables,
        })
    }

    /// Flush and close the environment.
    pub fn close(self) -> Result<(), StoreError> {
        self.sync()?;
        info!("Closed store at {:?}", self.path);
        Ok(())
    }
}

/// Open the catalog and every table it names, in one write transaction.
fn load_catalog(env: &RawEnv, options: &EnvOptions) -> Result<(Dbi, Catalog), StoreError> {
    // SAFETY: the environment is open; the transaction ends on every path.
    unsafe {
        let txn = raw::begin(env.0, false)?;
        match read_catalog(txn, options) {
            Ok(loaded) => {
                raw::check(ffi::mdbx_txn_commit_ex(txn, ptr::null_mut()))?;
                Ok(loaded)
            }
            Err(err) => {
                ffi::mdbx_txn_abort(txn);
                Err(err)
            }
        }
    }
}

unsafe fn read_catalog(
    txn: *mut ffi::MDBX_txn,
    options: &EnvOptions,
) -> Result<(Dbi, Catalog), StoreError> {
    let catalog_dbi =
        raw::open_dbi(txn, CATALOG_NAME, true)?.ok_or_else(|| StoreError::CatalogCorrupted {
            name: CATALOG_NAME.to_string(),
        })?;

    let mut entries = Vec::new();
    for entry in Cursor::open(txn, catalog_dbi, TableMode::Unaligned, None)? {
        let (key, value) = entry?;
        let name = String::from_utf8_lossy(key).into_owned();
        match TableMode::from_catalog(value) {
            Some((id, mode)) if std::str::from_utf8(key).is_ok() => entries.push((id, name, mode)),
            _ => return Err(StoreError::CatalogCorrupted { name }),
        }
    }

    if entries.len() > options.max_tables as usize {
        return Err(StoreError::TableLimitExceeded {
            max: options.max_tables,
        });
    }

    let mut states = Vec::with_capacity(entries.len());
    for (id, name, mode) in entries {
        let dbi = raw::open_dbi(txn, &name, false)?
            .ok_or_else(|| StoreError::CatalogCorrupted { name: name.clone() })?;
        states.push((id, TableState { name, dbi, mode }));
    }

    debug!("Loaded {} tables from the catalog", states.len());
    Ok((catalog_dbi, Catalog::from_entries(states)?))
}
