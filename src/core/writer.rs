//! Record write paths
//!
//! Two strategies implement [`RecordWriter`]:
//!
//! - [`ReservingWriter`] reserves exactly `16 + len` bytes in the store,
//!   placed so the payload lands on the table's record alignment, and
//!   encodes straight into the reservation. One copy, aligned at rest.
//! - [`CopyingWriter`] encodes into a temporary buffer and stores it with a
//!   plain put. Two copies, no placement guarantee; readers check and fall
//!   back to an aligned copy when needed.
//!
//! A table's [`TableMode`] picks its strategy, see [`TableWriter::for_mode`].
//! Neither writer commits; transaction boundaries belong to the caller.

use crate::core::env::{RwTxn, Table, TableMode};
use crate::core::error::WriteError;
use crate::core::record::{RecordCodec, HEADER_SIZE};
use std::io;
use tracing::trace;

/// Writes one framed record inside an open write transaction.
pub trait RecordWriter {
    fn write_record(
        &self,
        txn: &mut RwTxn<'_>,
        table: Table,
        key: &[u8],
        payload: &[u8],
        version: u8,
    ) -> Result<(), WriteError>;
}

/// Reservation write path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReservingWriter {
    codec: RecordCodec,
}

impl ReservingWriter {
    pub fn new(codec: RecordCodec) -> Self {
        ReservingWriter { codec }
    }

    /// Reserve, then encode header and payload in place.
    ///
    /// In an aligned table the payload lands on the table's record
    /// alignment. Unaligned tables take the record wherever the engine puts
    /// it.
    pub fn put_aligned(
        &self,
        txn: &mut RwTxn<'_>,
        table: Table,
        key: &[u8],
        payload: &[u8],
        version: u8,
    ) -> Result<(), WriteError> {
        let framed_len = RecordCodec::framed_len(payload.len())?;
        let hint = table.mode().required_hint();

        let buf = txn.reserve(table, key, framed_len, hint)?;
        self.codec.encode_into(buf, payload, version)?;

        trace!(
            "Reserved {} bytes for {:?} at {}-byte alignment",
            framed_len,
            String::from_utf8_lossy(key),
            hint.align
        );
        Ok(())
    }

    /// Serialize a payload straight into its reservation.
    ///
    /// `emit` runs twice: once into a [`CountingWriter`] to size the record,
    /// then into the reserved bytes. It must write the same bytes both
    /// times. When the second pass writes a different length the key is
    /// removed and [`WriteError::LengthChanged`] returned. Returns the
    /// payload length.
    pub fn put_streamed<F>(
        &self,
        txn: &mut RwTxn<'_>,
        table: Table,
        key: &[u8],
        version: u8,
        mut emit: F,
    ) -> Result<usize, WriteError>
    where
        F: FnMut(&mut dyn io::Write) -> io::Result<()>,
    {
        let mut counter = CountingWriter::new();
        emit(&mut counter)?;
        let counted = counter.position();
        let framed_len = RecordCodec::framed_len(counted)?;

        let buf = txn.reserve(table, key, framed_len, table.mode().required_hint())?;
        let (head, body) = buf.split_at_mut(HEADER_SIZE);
        let mut fill = FillWriter {
            buf: &mut *body,
            written: 0,
        };
        let emitted = emit(&mut fill);
        let written = fill.written;

        if let Err(err) = emitted {
            txn.delete(table, key)?;
            return Err(err.into());
        }
        if written != counted {
            txn.delete(table, key)?;
            return Err(WriteError::LengthChanged { counted, written });
        }

        let header = self.codec.header_for(body, version)?;
        head.copy_from_slice(&header.to_bytes());

        trace!(
            "Streamed {} payload bytes into {:?}",
            counted,
            String::from_utf8_lossy(key)
        );
        Ok(counted)
    }
}

impl RecordWriter for ReservingWriter {
    fn write_record(
        &self,
        txn: &mut RwTxn<'_>,
        table: Table,
        key: &[u8],
        payload: &[u8],
        version: u8,
    ) -> Result<(), WriteError> {
        self.put_aligned(txn, table, key, payload, version)
    }
}

/// Encode-then-put write path.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyingWriter {
    codec: RecordCodec,
}

impl CopyingWriter {
    pub fn new(codec: RecordCodec) -> Self {
        CopyingWriter { codec }
    }

    /// Encode into a temporary buffer and store it unaligned.
    ///
    /// Refused for alignment-guaranteed tables, whose readers trust
    /// placement and skip the alignment check.
    pub fn put(
        &self,
        txn: &mut RwTxn<'_>,
        table: Table,
        key: &[u8],
        payload: &[u8],
        version: u8,
    ) -> Result<(), WriteError> {
        let framed = self.codec.encode(payload, version)?;
        txn.put(table, key, &framed)?;
        Ok(())
    }
}

impl RecordWriter for CopyingWriter {
    fn write_record(
        &self,
        txn: &mut RwTxn<'_>,
        table: Table,
        key: &[u8],
        payload: &[u8],
        version: u8,
    ) -> Result<(), WriteError> {
        self.put(txn, table, key, payload, version)
    }
}

/// The write strategy bound to a table.
#[derive(Debug, Clone, Copy)]
pub enum TableWriter {
    Reserving(ReservingWriter),
    Copying(CopyingWriter),
}

impl TableWriter {
    pub fn for_mode(mode: TableMode, codec: RecordCodec) -> Self {
        match mode {
            TableMode::Aligned { .. } => TableWriter::Reserving(ReservingWriter::new(codec)),
            TableMode::Unaligned => TableWriter::Copying(CopyingWriter::new(codec)),
        }
    }
}

impl RecordWriter for TableWriter {
    fn write_record(
        &self,
        txn: &mut RwTxn<'_>,
        table: Table,
        key: &[u8],
        payload: &[u8],
        version: u8,
    ) -> Result<(), WriteError> {
        match self {
            TableWriter::Reserving(writer) => writer.write_record(txn, table, key, payload, version),
            TableWriter::Copying(writer) => writer.write_record(txn, table, key, payload, version),
        }
    }
}

/// An [`io::Write`] sink that keeps only the number of bytes written.
///
/// Used as the sizing pass of [`ReservingWriter::put_streamed`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CountingWriter {
    position: usize,
}

impl CountingWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Framed size of a record holding everything written so far.
    pub fn framed_len(&self) -> Result<usize, WriteError> {
        RecordCodec::framed_len(self.position)
    }
}

impl io::Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.position = self.position.checked_add(buf.len()).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "record length overflows usize")
        })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Copies into a fixed buffer, counting every byte offered even past the
/// end so the caller can tell how far off the length was.
struct FillWriter<'a> {
    buf: &'a mut [u8],
    written: usize,
}

impl io::Write for FillWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let start = self.written.min(self.buf.len());
        let n = data.len().min(self.buf.len() - start);
        self.buf[start..start + n].copy_from_slice(&data[..n]);
        self.written = self.written.saturating_add(data.len());
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
