//! # Heap File Row Store
//!
//! An append-only file of rows addressed by byte offset. This is the row
//! store half of an overflow store: rows land here in arrival order and the
//! hash index points back at them by position.
//!
//! ## File Format
//!
//! ```text
//! HeapFile := [Header] [Record]*
//! Header   := [magic: 8] [column_count: u16] [reserved: 6]
//! Record   := [flags: u8] [len: u32] [crc32: u32] [row bytes: len]
//! ```
//!
//! The position of a record is its byte offset, so positions grow with
//! arrival order and a forward scan visits rows in insertion order.
//! `HEAP_FILE_HEADER_SIZE` is the first valid position.
//!
//! ## Deletes
//!
//! Deleting sets `HEAP_FLAG_DELETED` in the record's flag byte in place. The
//! space is never reclaimed; the file lives only as long as one hash table.
//!
//! ## I/O Strategy
//!
//! - Appends go through a `BufWriter` over an append-mode handle.
//! - Point reads and flag writes use a second read/write handle, flushing the
//!   writer first when it holds unwritten records.
//! - Forward scans read through an `Mmap` that is re-mapped whenever the file
//!   has grown past the mapped length.
//!
//! ## Template
//!
//! The row the heap was created with fixes the column count and, for each
//! non-NULL template column, the column type. Later rows must match; NULL is
//! accepted in any column.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crc::{Crc, CRC_32_ISCSI};
use eyre::{bail, ensure, Result, WrapErr};
use memmap2::Mmap;

use super::row_codec::RowCodec;
use super::{ConglomerateId, RowPosition, RowStore, ScannedRow, StorageError};
use crate::config::{
    HEAP_FILE_HEADER_SIZE, HEAP_FLAG_DELETED, HEAP_MAGIC, HEAP_RECORD_HEADER_SIZE,
};
use crate::types::{DataType, Value};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

struct RecordHeader {
    flags: u8,
    len: usize,
    crc: u32,
}

impl RecordHeader {
    fn parse(bytes: &[u8; HEAP_RECORD_HEADER_SIZE]) -> Self {
        Self {
            flags: bytes[0],
            len: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize,
            crc: u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
        }
    }

    fn is_deleted(&self) -> bool {
        self.flags & HEAP_FLAG_DELETED != 0
    }
}

pub struct HeapFile {
    id: ConglomerateId,
    path: PathBuf,
    template: Vec<Option<DataType>>,
    writer: BufWriter<File>,
    reader: File,
    end: u64,
    unflushed: bool,
    live_rows: u64,
    encode_buf: Vec<u8>,
    scan_map: Option<Mmap>,
    dropped: Arc<AtomicBool>,
}

impl HeapFile {
    pub(super) fn create(
        id: ConglomerateId,
        path: &Path,
        template: &[Value],
        dropped: Arc<AtomicBool>,
    ) -> Result<Self> {
        ensure!(
            template.len() <= u16::MAX as usize,
            "heap template has {} columns, at most {} supported",
            template.len(),
            u16::MAX
        );

        let mut header = [0u8; HEAP_FILE_HEADER_SIZE];
        header[..8].copy_from_slice(HEAP_MAGIC);
        header[8..10].copy_from_slice(&(template.len() as u16).to_be_bytes());

        let mut file = File::options()
            .write(true)
            .create_new(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create heap file: {:?}", path))?;
        file.write_all(&header)
            .wrap_err_with(|| format!("failed to write heap header: {:?}", path))?;
        drop(file);

        let writer = File::options()
            .append(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open heap file for append: {:?}", path))?;
        let mut reader = File::options()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open heap file: {:?}", path))?;

        let mut check = [0u8; 8];
        reader.read_exact(&mut check)?;
        if &check != HEAP_MAGIC {
            bail!(StorageError::BadHeader {
                path: path.to_path_buf()
            });
        }

        Ok(Self {
            id,
            path: path.to_path_buf(),
            template: template.iter().map(Value::data_type).collect(),
            writer: BufWriter::new(writer),
            reader,
            end: HEAP_FILE_HEADER_SIZE as u64,
            unflushed: false,
            live_rows: 0,
            encode_buf: Vec::with_capacity(256),
            scan_map: None,
            dropped,
        })
    }

    #[cfg(test)]
    fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_live(&self) -> Result<()> {
        if self.dropped.load(Ordering::Acquire) {
            bail!(StorageError::Dropped { id: self.id });
        }
        Ok(())
    }

    fn check_template(&self, values: &[Value]) -> Result<()> {
        if values.len() != self.template.len() {
            bail!(StorageError::ArityMismatch {
                id: self.id,
                expected: self.template.len(),
                found: values.len(),
            });
        }

        for (column, (value, expected)) in values.iter().zip(&self.template).enumerate() {
            let found = value.data_type();
            if let (Some(expected), Some(found)) = (expected, found) {
                if *expected != found {
                    bail!(StorageError::SchemaMismatch {
                        id: self.id,
                        column,
                        expected: Some(*expected),
                        found: Some(found),
                    });
                }
            }
        }
        Ok(())
    }

    fn flush_pending(&mut self) -> Result<()> {
        if self.unflushed {
            self.writer
                .flush()
                .wrap_err_with(|| format!("failed to flush heap file: {:?}", self.path))?;
            self.unflushed = false;
        }
        Ok(())
    }

    fn check_position(&self, position: RowPosition) -> Result<()> {
        let pos = position.0;
        if pos < HEAP_FILE_HEADER_SIZE as u64 || pos + HEAP_RECORD_HEADER_SIZE as u64 > self.end {
            bail!(StorageError::InvalidPosition {
                id: self.id,
                position,
            });
        }
        Ok(())
    }

    fn read_record_header(&mut self, position: RowPosition) -> Result<RecordHeader> {
        let mut raw = [0u8; HEAP_RECORD_HEADER_SIZE];
        self.reader.seek(SeekFrom::Start(position.0))?;
        self.reader
            .read_exact(&mut raw)
            .wrap_err_with(|| format!("failed to read heap record at {}", position.0))?;
        Ok(RecordHeader::parse(&raw))
    }

    fn decode_payload(&self, position: RowPosition, header: &RecordHeader, payload: &[u8]) -> Result<Vec<Value>> {
        if CRC32.checksum(payload) != header.crc {
            bail!(StorageError::ChecksumMismatch {
                id: self.id,
                position,
            });
        }
        RowCodec::decode(payload)
            .wrap_err_with(|| format!("{}: corrupt record at position {}", self.id, position.0))
    }

    fn ensure_mapped(&mut self) -> Result<&Mmap> {
        let stale = match &self.scan_map {
            Some(map) => (map.len() as u64) < self.end,
            None => true,
        };
        if stale {
            // SAFETY: the file is private to this heap; nothing truncates it
            // while the map is alive, and in-place flag writes only flip a
            // byte the scan re-reads.
            let map = unsafe { Mmap::map(&self.reader) }
                .wrap_err_with(|| format!("failed to mmap heap file: {:?}", self.path))?;
            self.scan_map = Some(map);
        }
        match &self.scan_map {
            Some(map) => Ok(map),
            None => bail!("heap scan map missing after remap"),
        }
    }
}

impl RowStore for HeapFile {
    fn id(&self) -> ConglomerateId {
        self.id
    }

    fn append(&mut self, values: &[Value]) -> Result<RowPosition> {
        self.ensure_live()?;
        self.check_template(values)?;

        self.encode_buf.clear();
        RowCodec::encode_into(values, &mut self.encode_buf);
        ensure!(
            self.encode_buf.len() <= u32::MAX as usize,
            "row of {} bytes exceeds heap record limit",
            self.encode_buf.len()
        );

        let mut header = [0u8; HEAP_RECORD_HEADER_SIZE];
        header[1..5].copy_from_slice(&(self.encode_buf.len() as u32).to_be_bytes());
        header[5..9].copy_from_slice(&CRC32.checksum(&self.encode_buf).to_be_bytes());

        self.writer
            .write_all(&header)
            .and_then(|_| self.writer.write_all(&self.encode_buf))
            .wrap_err_with(|| format!("failed to append to heap file: {:?}", self.path))?;

        let position = RowPosition(self.end);
        self.end += (HEAP_RECORD_HEADER_SIZE + self.encode_buf.len()) as u64;
        self.unflushed = true;
        self.live_rows += 1;
        Ok(position)
    }

    fn fetch(&mut self, position: RowPosition) -> Result<Option<Vec<Value>>> {
        self.ensure_live()?;
        self.check_position(position)?;
        self.flush_pending()?;

        let header = self.read_record_header(position)?;
        if header.is_deleted() {
            return Ok(None);
        }

        let mut payload = vec![0u8; header.len];
        self.reader
            .read_exact(&mut payload)
            .wrap_err_with(|| format!("failed to read heap record at {}", position.0))?;
        self.decode_payload(position, &header, &payload).map(Some)
    }

    fn delete(&mut self, position: RowPosition) -> Result<bool> {
        self.ensure_live()?;
        self.check_position(position)?;
        self.flush_pending()?;

        let header = self.read_record_header(position)?;
        if header.is_deleted() {
            return Ok(false);
        }

        self.reader.seek(SeekFrom::Start(position.0))?;
        self.reader
            .write_all(&[header.flags | HEAP_FLAG_DELETED])
            .wrap_err_with(|| format!("failed to delete heap record at {}", position.0))?;
        self.live_rows -= 1;
        Ok(true)
    }

    fn first_position(&self) -> RowPosition {
        RowPosition(HEAP_FILE_HEADER_SIZE as u64)
    }

    fn next_live(&mut self, from: RowPosition) -> Result<Option<ScannedRow>> {
        self.ensure_live()?;
        self.flush_pending()?;

        let id = self.id;
        let end = self.end;
        let mut pos = from.0.max(HEAP_FILE_HEADER_SIZE as u64);

        while pos + HEAP_RECORD_HEADER_SIZE as u64 <= end {
            let map = self.ensure_mapped()?;
            let start = pos as usize;
            let mut raw = [0u8; HEAP_RECORD_HEADER_SIZE];
            raw.copy_from_slice(&map[start..start + HEAP_RECORD_HEADER_SIZE]);
            let header = RecordHeader::parse(&raw);

            let body = start + HEAP_RECORD_HEADER_SIZE;
            let next = (body + header.len) as u64;
            ensure!(
                next <= end,
                "{}: record at {} runs past end of heap",
                id,
                pos
            );

            if !header.is_deleted() {
                let payload = map[body..body + header.len].to_vec();
                let values = self.decode_payload(RowPosition(pos), &header, &payload)?;
                return Ok(Some(ScannedRow {
                    position: RowPosition(pos),
                    next: RowPosition(next),
                    values,
                }));
            }
            pos = next;
        }

        Ok(None)
    }

    fn live_rows(&self) -> u64 {
        self.live_rows
    }
}
