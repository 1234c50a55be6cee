//! # zerostore - Zero-Copy Record Store
//!
//! `zerostore` stores immutable, checksummed records in a libmdbx
//! environment and reads them back as typed views that point straight into
//! the memory map:
//!
//! - **Zero-copy reads**: a record read returns a reference into mapped
//!   storage, not a deserialized copy. Plain-layout types are cast with
//!   zerocopy, rkyv archives are validated and accessed in place
//! - **Alignment at rest**: tables written through reservations place every
//!   payload at a fixed alignment, so views need no check and no copy
//! - **Corruption detection**: every read checks magic, version, length and
//!   a CRC-32C of the payload
//! - **Snapshot isolation**: one writer, any number of readers, each reader
//!   pinned to the commit it began on
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zerostore::{RawPayload, Result, Store};
//!
//! # fn main() -> Result<()> {
//! let store = Store::open("/var/lib/app/store", &["nodes"], 4)?;
//!
//! store.write(|txn| {
//!     txn.put_aligned("nodes", b"node:1", b"payload bytes", 1)?;
//!     Ok::<_, zerostore::Error>(())
//! })?;
//!
//! let len = store.read(|txn| {
//!     let view = txn.get::<RawPayload>("nodes", b"node:1")?;
//!     Ok::<_, zerostore::Error>(view.map(|v| v.payload().len()))
//! })?;
//! assert_eq!(len, Some(13));
//! # Ok(())
//! # }
//! ```
//!
//! ## Typed Views
//!
//! ```rust,no_run
//! use zerocopy::{FromBytes, Immutable, KnownLayout};
//! use zerostore::{ArchivedRecord, StoreBuilder, VersionSet};
//!
//! #[derive(FromBytes, KnownLayout, Immutable)]
//! #[repr(C)]
//! struct NodeHeader {
//!     id: u64,
//!     kind: u32,
//!     edge_count: u32,
//! }
//!
//! impl ArchivedRecord for NodeHeader {
//!     const VERSIONS: VersionSet = VersionSet::single(1);
//! }
//!
//! # fn main() -> zerostore::Result<()> {
//! let store = StoreBuilder::new()
//!     .path("/var/lib/app/store")
//!     .max_tables(4)
//!     .table("nodes")
//!     .unaligned_table("imports")
//!     .build()?;
//!
//! store.read(|txn| {
//!     if let Some(node) = txn.get::<NodeHeader>("nodes", b"node:1")? {
//!         println!("node {} has {} edges", node.id, node.edge_count);
//!     }
//!     Ok::<_, zerostore::Error>(())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use crate::core::{
    alignment::{AlignHint, AlignmentCheck},
    archive::ArchivedValue,
    checksum::{checksum, ChecksumBackend, ChecksumEngine},
    config::{StoreConfig, TableConfig},
    env::{Cursor, Env, EnvOptions, EnvStats, ReadTxn, RoTxn, RwTxn, Table, TableMode},
    error::{
        CorruptionError, CorruptionKind, Error, ReadError, Result, StoreError, WriteError,
    },
    reader::{ArchivedRecord, RawPayload, View, ZeroCopyReader},
    record::{RecordCodec, VersionSet, HEADER_SIZE, RECORD_MAGIC},
    writer::{CopyingWriter, CountingWriter, RecordWriter, ReservingWriter, TableWriter},
};

use rkyv::api::high::{HighSerializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::rancor;
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Resolve a table name against the tables `txn` can see.
fn resolve<R: ReadTxn + ?Sized>(txn: &R, name: &str) -> std::result::Result<Table, StoreError> {
    txn.open_table(name)
        .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
}

/// An open record store with a fixed set of named tables.
///
/// Owns the environment; share it by reference or `Arc`. All access goes
/// through [`Store::read`] and [`Store::write`], which scope a transaction
/// to a closure.
pub struct Store {
    env: Env,
    codec: RecordCodec,
    reader: ZeroCopyReader,
}

impl Store {
    /// Open the store in directory `path`, creating any of `table_names`
    /// that do not exist yet as alignment-guaranteed tables.
    pub fn open<P: AsRef<Path>>(path: P, table_names: &[&str], max_tables: u32) -> Result<Self> {
        let mut config = StoreConfig::new(path);
        config.max_tables = max_tables;
        config.tables = table_names
            .iter()
            .map(|name| TableConfig::aligned(*name))
            .collect();
        Self::open_with_config(&config)
    }

    /// Open the store described by `config`.
    pub fn open_with_config(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let env = Env::open(&config.path, config.env_options())?;
        let codec = RecordCodec::new();

        if !config.tables.is_empty() {
            let mut txn = env.begin_rw_txn()?;
            for table in &config.tables {
                txn.create_table(&table.name, table.mode())?;
            }
            txn.commit()?;
        }

        info!(
            "Opened record store at {:?} with {} tables",
            config.path,
            env.tables().len()
        );

        Ok(Store {
            env,
            codec,
            reader: ZeroCopyReader::new(codec),
        })
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// The underlying engine.
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Handle for the committed table called `name`.
    pub fn table(&self, name: &str) -> std::result::Result<Table, StoreError> {
        self.env
            .table(name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))
    }

    /// Names of every committed table, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.env.tables().into_iter().map(|(name, _)| name).collect();
        names.sort_unstable();
        names
    }

    /// Run `f` in a write transaction.
    ///
    /// Commits when `f` returns `Ok`. Aborts when it returns `Err` or
    /// panics, leaving the store exactly as it was.
    pub fn write<R, E, F>(&self, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&mut WriteScope<'_>) -> std::result::Result<R, E>,
        E: From<StoreError>,
    {
        let mut scope = WriteScope {
            store: self,
            txn: self.env.begin_rw_txn()?,
        };

        match f(&mut scope) {
            Ok(value) => {
                scope.txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                debug!("Write closure failed, aborting txn {}", scope.txn.id());
                scope.txn.abort();
                Err(err)
            }
        }
    }

    /// Run `f` in a read transaction pinned to the latest commit.
    ///
    /// Views obtained inside `f` cannot escape it.
    pub fn read<R, E, F>(&self, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&ReadScope<'_>) -> std::result::Result<R, E>,
        E: From<StoreError>,
    {
        let scope = ReadScope {
            store: self,
            txn: self.env.begin_ro_txn()?,
        };
        f(&scope)
    }

    pub fn stats(&self) -> std::result::Result<EnvStats, StoreError> {
        self.env.stat()
    }

    /// Flush and close the store.
    pub fn close(self) -> Result<()> {
        self.env.close()?;
        Ok(())
    }
}

/// Write transaction handed to [`Store::write`].
pub struct WriteScope<'s> {
    store: &'s Store,
    txn: RwTxn<'s>,
}

impl<'s> WriteScope<'s> {
    /// Write through a reservation so the payload is aligned at rest.
    pub fn put_aligned(
        &mut self,
        table: &str,
        key: &[u8],
        payload: &[u8],
        version: u8,
    ) -> std::result::Result<(), WriteError> {
        let table = resolve(&self.txn, table)?;
        ReservingWriter::new(self.store.codec).put_aligned(&mut self.txn, table, key, payload, version)
    }

    /// Serialize through `emit` straight into the reservation; see
    /// [`ReservingWriter::put_streamed`].
    pub fn put_streamed<F>(
        &mut self,
        table: &str,
        key: &[u8],
        version: u8,
        emit: F,
    ) -> std::result::Result<usize, WriteError>
    where
        F: FnMut(&mut dyn io::Write) -> io::Result<()>,
    {
        let table = resolve(&self.txn, table)?;
        ReservingWriter::new(self.store.codec).put_streamed(&mut self.txn, table, key, version, emit)
    }

    /// Archive `value` with rkyv and store it with the table's strategy.
    pub fn put_archived<T>(
        &mut self,
        table: &str,
        key: &[u8],
        value: &T,
        version: u8,
    ) -> std::result::Result<(), WriteError>
    where
        T: for<'a> rkyv::Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, rancor::Error>>,
    {
        let payload = crate::core::archive::to_payload(value)?;
        self.put_record(table, key, &payload, version)
    }

    /// Encode and store without placement. Only unaligned tables accept it.
    pub fn put(
        &mut self,
        table: &str,
        key: &[u8],
        payload: &[u8],
        version: u8,
    ) -> std::result::Result<(), WriteError> {
        let table = resolve(&self.txn, table)?;
        CopyingWriter::new(self.store.codec).put(&mut self.txn, table, key, payload, version)
    }

    /// Write with the strategy the table was configured for.
    pub fn put_record(
        &mut self,
        table: &str,
        key: &[u8],
        payload: &[u8],
        version: u8,
    ) -> std::result::Result<(), WriteError> {
        let table = resolve(&self.txn, table)?;
        TableWriter::for_mode(table.mode(), self.store.codec).write_record(
            &mut self.txn,
            table,
            key,
            payload,
            version,
        )
    }

    /// Remove `key`, returning whether it existed.
    pub fn delete(&mut self, table: &str, key: &[u8]) -> std::result::Result<bool, WriteError> {
        let table = resolve(&self.txn, table)?;
        Ok(self.txn.delete(table, key)?)
    }

    /// Read a record, including writes made earlier in this transaction.
    pub fn get<T: ArchivedRecord>(
        &self,
        table: &str,
        key: &[u8],
    ) -> std::result::Result<Option<View<'_, T>>, ReadError> {
        let table = resolve(&self.txn, table)?;
        self.store.reader.get(&self.txn, table, key)
    }

    /// Read an rkyv archive, including writes made earlier in this
    /// transaction.
    pub fn get_archived<T>(
        &self,
        table: &str,
        key: &[u8],
    ) -> std::result::Result<Option<View<'_, T::Archived>>, ReadError>
    where
        T: ArchivedValue,
        T::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>,
    {
        let table = resolve(&self.txn, table)?;
        self.store.reader.get_archived::<T, _>(&self.txn, table, key)
    }

    /// The engine transaction, for operations the scope does not wrap.
    pub fn txn(&mut self) -> &mut RwTxn<'s> {
        &mut self.txn
    }
}

/// Read transaction handed to [`Store::read`].
pub struct ReadScope<'s> {
    store: &'s Store,
    txn: RoTxn<'s>,
}

impl<'s> ReadScope<'s> {
    /// Read and validate the record under `key`.
    pub fn get<T: ArchivedRecord>(
        &self,
        table: &str,
        key: &[u8],
    ) -> std::result::Result<Option<View<'_, T>>, ReadError> {
        let table = resolve(&self.txn, table)?;
        self.store.reader.get(&self.txn, table, key)
    }

    /// Read and validate the rkyv archive under `key`.
    pub fn get_archived<T>(
        &self,
        table: &str,
        key: &[u8],
    ) -> std::result::Result<Option<View<'_, T::Archived>>, ReadError>
    where
        T: ArchivedValue,
        T::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>,
    {
        let table = resolve(&self.txn, table)?;
        self.store.reader.get_archived::<T, _>(&self.txn, table, key)
    }

    /// Records whose key starts with `prefix`, in key order, one result
    /// per record.
    pub fn scan_prefix<'a, T: ArchivedRecord + 'a>(
        &'a self,
        table: &str,
        prefix: &[u8],
    ) -> std::result::Result<
        impl Iterator<Item = std::result::Result<(&'a [u8], View<'a, T>), ReadError>> + 'a,
        ReadError,
    > {
        let table = resolve(&self.txn, table)?;
        let txn: &'a dyn ReadTxn = &self.txn;
        self.store.reader.scan_prefix(txn, table, prefix)
    }

    /// Id of the commit this scope reads from.
    pub fn snapshot_id(&self) -> u64 {
        self.txn.snapshot_id()
    }

    pub fn txn(&self) -> &RoTxn<'s> {
        &self.txn
    }
}

/// Builder for [`Store`], for configuration in code.
pub struct StoreBuilder {
    path: Option<PathBuf>,
    max_tables: Option<u32>,
    map_size: Option<u64>,
    durable: Option<bool>,
    tables: Vec<TableConfig>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        StoreBuilder {
            path: None,
            max_tables: None,
            map_size: None,
            durable: None,
            tables: Vec::new(),
        }
    }

    /// Environment directory (required)
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn max_tables(mut self, max_tables: u32) -> Self {
        self.max_tables = Some(max_tables);
        self
    }

    /// Map size in bytes, which caps the store's total size
    pub fn map_size(mut self, map_size: u64) -> Self {
        self.map_size = Some(map_size);
        self
    }

    /// Flush on every commit (default on)
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = Some(durable);
        self
    }

    /// Add an alignment-guaranteed table
    pub fn table<S: Into<String>>(mut self, name: S) -> Self {
        self.tables.push(TableConfig::aligned(name));
        self
    }

    /// Add a table written with plain puts and read with alignment probing
    pub fn unaligned_table<S: Into<String>>(mut self, name: S) -> Self {
        self.tables.push(TableConfig::unaligned(name));
        self
    }

    pub fn table_config(mut self, table: TableConfig) -> Self {
        self.tables.push(table);
        self
    }

    pub fn build(self) -> Result<Store> {
        let path = self
            .path
            .ok_or_else(|| StoreError::InvalidConfig("path must be set".into()))?;

        let mut config = StoreConfig::new(path);
        if let Some(max_tables) = self.max_tables {
            config.max_tables = max_tables;
        }
        if let Some(map_size) = self.map_size {
            config.map_size = map_size;
        }
        if let Some(durable) = self.durable {
            config.durable = durable;
        }
        config.tables = self.tables;

        debug!("Building store at {:?}", config.path);
        Store::open_with_config(&config)
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
