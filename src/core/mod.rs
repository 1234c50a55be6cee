//! Storage core: record format, checksums, the libmdbx engine and the
//! read/write paths layered on it.

pub mod alignment;
pub mod archive;
pub mod checksum;
pub mod config;
pub mod env;
pub mod error;
pub mod reader;
pub mod record;
pub mod writer;

pub use alignment::{AlignHint, AlignmentCheck};
pub use archive::{ArchivedValue, ARCHIVE_ALIGN};
pub use checksum::{checksum, ChecksumBackend, ChecksumEngine};
pub use config::{StoreConfig, TableConfig};
pub use env::{Cursor, Env, EnvOptions, EnvStats, ReadTxn, RoTxn, RwTxn, Table, TableMode};
pub use error::{CorruptionError, CorruptionKind, ReadError, StoreError, WriteError};
pub use reader::{ArchivedRecord, RawPayload, View, ZeroCopyReader};
pub use record::{Decoded, RecordCodec, RecordHeader, VersionSet, HEADER_SIZE, RECORD_MAGIC};
pub use writer::{CopyingWriter, CountingWriter, RecordWriter, ReservingWriter, TableWriter};
