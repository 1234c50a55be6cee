use thiserror::Error;

/// Why a framed record failed to decode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorruptionError {
    #[error("Record too short: {len} bytes, header needs 16")]
    TooShort { len: usize },

    #[error("Invalid record magic: {found:#010x}")]
    BadMagic { found: u32 },

    #[error("Reserved header bytes are not zero: pad={pad:#04x}, reserved={reserved:#06x}")]
    NonZeroPad { pad: u8, reserved: u16 },

    #[error("Unsupported record version: {version}")]
    UnsupportedVersion { version: u8 },

    #[error("Record length mismatch: header declares {declared} payload bytes, found {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("Record checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
}

/// Discriminant of [`CorruptionError`], convenient for matching and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorruptionKind {
    TooShort,
    BadMagic,
    NonZeroPad,
    UnsupportedVersion,
    LengthMismatch,
    ChecksumMismatch,
}

impl CorruptionError {
    pub fn kind(&self) -> CorruptionKind {
        match self {
            CorruptionError::TooShort { .. } => CorruptionKind::TooShort,
            CorruptionError::BadMagic { .. } => CorruptionKind::BadMagic,
            CorruptionError::NonZeroPad { .. } => CorruptionKind::NonZeroPad,
            CorruptionError::UnsupportedVersion { .. } => CorruptionKind::UnsupportedVersion,
            CorruptionError::LengthMismatch { .. } => CorruptionKind::LengthMismatch,
            CorruptionError::ChecksumMismatch { .. } => CorruptionKind::ChecksumMismatch,
        }
    }
}

/// Errors raised by the transactional engine.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage engine error {code}: {message}")]
    Engine { code: i32, message: String },

    #[error("Table catalog entry {name:?} is corrupted")]
    CatalogCorrupted { name: String },

    #[error("Table limit exceeded: at most {max} tables may be opened")]
    TableLimitExceeded { max: u32 },

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table {name} was created with a different mode")]
    TableModeMismatch { name: String },

    #[error("Key is empty")]
    EmptyKey,

    #[error("Key too large: {len} bytes (max {max})")]
    KeyTooLarge { len: usize, max: usize },

    #[error("Value too large: {len} bytes (max {max})")]
    ValueTooLarge { len: usize, max: usize },

    #[error("Map full: {requested} bytes requested from a {map_size} byte map")]
    MapFull { requested: u64, map_size: u64 },

    #[error("Invalid alignment: {0} (must be a power of two no larger than a page)")]
    InvalidAlignment(usize),

    #[error("Table {table} only accepts writes placed at its record alignment")]
    AlignmentRequired { table: String },

    #[error("Reservation landed off its {align}-byte placement (offset {offset})")]
    PlacementFailed { align: usize, offset: usize },

    #[error("Write transaction was aborted after an earlier failure")]
    TxnAborted,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration parse error: {0}")]
    Config(#[from] toml::de::Error),
}

/// Errors raised on the record write path.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Reservation failed: {0}")]
    ReservationFailed(#[source] StoreError),

    #[error("Key too large: {len} bytes (max {max})")]
    KeyTooLarge { len: usize, max: usize },

    #[error("Value too large: {len} bytes (max {max})")]
    ValueTooLarge { len: usize, max: usize },

    #[error("Table {table} only accepts aligned writes")]
    AlignmentRequired { table: String },

    #[error("Record emitter wrote {written} bytes after counting {counted}")]
    LengthChanged { counted: usize, written: usize },

    #[error("Record emitter failed: {0}")]
    Emit(#[from] std::io::Error),

    #[error("Archive serialization failed: {0}")]
    Archive(#[from] rkyv::rancor::Error),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for WriteError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::KeyTooLarge { len, max } => WriteError::KeyTooLarge { len, max },
            StoreError::ValueTooLarge { len, max } => WriteError::ValueTooLarge { len, max },
            StoreError::AlignmentRequired { table } => WriteError::AlignmentRequired { table },
            StoreError::MapFull { .. } => WriteError::ReservationFailed(err),
            other => WriteError::Store(other),
        }
    }
}

/// Errors raised on the record read path.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("Corrupt record {}: {source}", String::from_utf8_lossy(.key))]
    Corrupt {
        key: Vec<u8>,
        #[source]
        source: CorruptionError,
    },

    #[error("Record {} is not aligned to {required} bytes", String::from_utf8_lossy(.key))]
    Misaligned { key: Vec<u8>, required: usize },

    #[error(
        "Record {} payload is {actual} bytes, view needs at least {required}",
        String::from_utf8_lossy(.key)
    )]
    PayloadTooShort {
        key: Vec<u8>,
        required: usize,
        actual: usize,
    },

    #[error("Record {} is not a valid archive: {source}", String::from_utf8_lossy(.key))]
    Archive {
        key: Vec<u8>,
        #[source]
        source: rkyv::rancor::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReadError {
    /// Corruption kind, when this error reports a corrupt record.
    pub fn corruption_kind(&self) -> Option<CorruptionKind> {
        match self {
            ReadError::Corrupt { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

/// Umbrella error for the consumer-facing [`crate::Store`] API.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Corruption(#[from] CorruptionError),
}

pub type Result<T> = std::result::Result<T, Error>;
