//! Segment record format.
//!
//! A segment is an append-only file holding length-prefixed records:
//!
//! ```text
//! [record_len: u32 LE][body ...]
//!
//! body (put):    [op=0: u8][key_len: u32][key][size_value: u64]
//!                [size_value_compressed: u64][crc32: u32][data_len: u32][data]
//! body (delete): [op=1: u8][key_len: u32][key][crc32: u32]
//! ```
//!
//! `data` is the entry's final on-disk byte stream: a frame stream when
//! `size_value_compressed` is non-zero, the raw value otherwise. `crc32`
//! covers `key || data` for puts and `key` for deletes. `record_len` does not
//! include itself; it is the only bound on record size, so an entry may be
//! larger than the segment rotation limit. A length that reaches past the end
//! of the file cannot belong to a complete record, which is how corrupt
//! lengths are caught without a fixed cap.
//!
//! A truncated record at the tail of a file (crash mid-append) is treated as
//! a clean end of segment; all complete records before it remain valid.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use status::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: u64 = 64 * 1024;

const OP_PUT: u8 = 0;
const OP_DELETE: u8 = 1;

/// Entries are laid out in 64-byte blocks with one spare block of slack, so
/// the on-disk budget of a compressed entry always has room for at least one
/// frame header.
const BLOCK_SIZE: u64 = 64;

/// Alignment padding granted to an entry of `size_value` uncompressed bytes.
///
/// The padding is the compressor's overflow slack: a compressed stream may
/// use up to `size_value + entry_padding_size(size_value)` bytes on disk.
#[must_use]
pub fn entry_padding_size(size_value: u64) -> u64 {
    BLOCK_SIZE + (BLOCK_SIZE - size_value % BLOCK_SIZE) % BLOCK_SIZE
}

/// A single record read from or written to a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A complete entry in its final on-disk form.
    Put {
        key: Vec<u8>,
        /// Full uncompressed value size.
        size_value: u64,
        /// Non-zero when `data` is a frame stream.
        size_value_compressed: u64,
        /// CRC32 over `key || data`, computed by the chunk pipeline.
        crc32: u32,
        /// Frame stream or raw value bytes.
        data: Vec<u8>,
    },
    /// A tombstone.
    Delete { key: Vec<u8> },
}

impl Record {
    /// The key this record mutates.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        match self {
            Record::Put { key, .. } | Record::Delete { key } => key,
        }
    }
}

/// Decodes a put record's data back into the caller-visible value,
/// optionally verifying the entry checksum first.
pub fn decode_put(
    key: &[u8],
    data: &[u8],
    size_value: u64,
    size_value_compressed: u64,
    crc32: u32,
    verify_checksums: bool,
) -> Result<Vec<u8>> {
    if verify_checksums {
        let mut hasher = Crc32::new();
        hasher.update(key);
        hasher.update(data);
        let actual = hasher.finalize();
        if actual != crc32 {
            return Err(Error::io(format!(
                "crc32 mismatch for key {:?}: expected {:#010x}, got {:#010x}",
                String::from_utf8_lossy(key),
                crc32,
                actual
            )));
        }
    }
    if size_value_compressed != 0 {
        compressor::decode_value(data, size_value)
    } else {
        if data.len() as u64 != size_value {
            return Err(Error::io(format!(
                "raw entry length {} does not match declared size {}",
                data.len(),
                size_value
            )));
        }
        Ok(data.to_vec())
    }
}

/// Append-only writer for one segment file.
///
/// Records are serialized into a reusable scratch buffer and written with a
/// single `write_all`. When `sync` is set, every append is followed by
/// `sync_all` so the record is durable before the call returns.
#[derive(Debug)]
pub struct SegmentWriter {
    file: File,
    sync: bool,
    bytes_written: u64,
    buf: Vec<u8>,
}

impl SegmentWriter {
    /// Creates a fresh segment file at `path`. The file must not already
    /// exist; a segment is written exactly once and never reopened for
    /// append.
    pub fn create(path: &Path, sync: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            file,
            sync,
            bytes_written: 0,
            buf: Vec::with_capacity(256),
        })
    }

    /// Serializes `record` and appends it, returning the record's byte
    /// offset within the segment.
    pub fn append(&mut self, record: &Record) -> Result<u64> {
        let offset = self.bytes_written;

        self.buf.clear();
        self.buf.extend_from_slice(&[0u8; 4]); // record_len, filled below

        match record {
            Record::Put {
                key,
                size_value,
                size_value_compressed,
                crc32,
                data,
            } => {
                self.buf.write_u8(OP_PUT)?;
                self.buf.write_u32::<LittleEndian>(key.len() as u32)?;
                self.buf.extend_from_slice(key);
                self.buf.write_u64::<LittleEndian>(*size_value)?;
                self.buf.write_u64::<LittleEndian>(*size_value_compressed)?;
                self.buf.write_u32::<LittleEndian>(*crc32)?;
                self.buf.write_u32::<LittleEndian>(data.len() as u32)?;
                self.buf.extend_from_slice(data);
            }
            Record::Delete { key } => {
                let mut hasher = Crc32::new();
                hasher.update(key);
                self.buf.write_u8(OP_DELETE)?;
                self.buf.write_u32::<LittleEndian>(key.len() as u32)?;
                self.buf.extend_from_slice(key);
                self.buf.write_u32::<LittleEndian>(hasher.finalize())?;
            }
        }

        let body_len = (self.buf.len() - 4) as u64;
        if body_len > u32::MAX as u64 {
            return Err(Error::InvalidArgument(format!(
                "record of {} bytes exceeds the u32 length prefix",
                body_len
            )));
        }
        let header = (body_len as u32).to_le_bytes();
        self.buf[0..4].copy_from_slice(&header);

        self.file.write_all(&self.buf)?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_all()?;
        }

        self.bytes_written += self.buf.len() as u64;
        Ok(offset)
    }

    /// Bytes appended to this segment so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Forces all appended records to disk.
    pub fn sync_to_disk(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

fn parse_body(body: &[u8], verify_checksums: bool) -> Result<Record> {
    let corrupt = || Error::io("corrupt segment record");
    let mut rdr = body;

    let op = rdr.read_u8().map_err(|_| corrupt())?;
    let key_len = rdr.read_u32::<LittleEndian>().map_err(|_| corrupt())? as u64;
    if key_len > MAX_KEY_SIZE || key_len > body.len() as u64 {
        return Err(corrupt());
    }
    let mut key = vec![0u8; key_len as usize];
    rdr.read_exact(&mut key).map_err(|_| corrupt())?;

    match op {
        OP_PUT => {
            let size_value = rdr.read_u64::<LittleEndian>().map_err(|_| corrupt())?;
            let size_value_compressed = rdr.read_u64::<LittleEndian>().map_err(|_| corrupt())?;
            let crc32 = rdr.read_u32::<LittleEndian>().map_err(|_| corrupt())?;
            let data_len = rdr.read_u32::<LittleEndian>().map_err(|_| corrupt())? as usize;
            if data_len > rdr.len() {
                return Err(corrupt());
            }
            let mut data = vec![0u8; data_len];
            rdr.read_exact(&mut data).map_err(|_| corrupt())?;

            if verify_checksums {
                let mut hasher = Crc32::new();
                hasher.update(&key);
                hasher.update(&data);
                if hasher.finalize() != crc32 {
                    return Err(Error::io(format!(
                        "crc32 mismatch in segment record for key {:?}",
                        String::from_utf8_lossy(&key)
                    )));
                }
            }

            Ok(Record::Put {
                key,
                size_value,
                size_value_compressed,
                crc32,
                data,
            })
        }
        OP_DELETE => {
            let crc32 = rdr.read_u32::<LittleEndian>().map_err(|_| corrupt())?;
            if verify_checksums {
                let mut hasher = Crc32::new();
                hasher.update(&key);
                if hasher.finalize() != crc32 {
                    return Err(Error::io(format!(
                        "crc32 mismatch in tombstone for key {:?}",
                        String::from_utf8_lossy(&key)
                    )));
                }
            }
            Ok(Record::Delete { key })
        }
        _ => Err(corrupt()),
    }
}

/// Reads every complete record in the segment at `path`, returning each with
/// its byte offset. Record checksums are verified when `verify_checksums` is
/// set; recovery scans always verify, snapshot iteration passes the caller's
/// read options through.
///
/// A truncated tail record is ignored; a checksum failure (when verifying)
/// or malformed body is an error.
pub fn scan_segment(path: &Path, verify_checksums: bool) -> Result<Vec<(u64, Record)>> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut rdr = BufReader::new(file);
    let mut records = Vec::new();
    let mut offset = 0u64;

    loop {
        let record_len = match rdr.read_u32::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(records),
            Err(e) => return Err(e.into()),
        };
        if record_len == 0 {
            return Err(Error::io("corrupt segment: zero-length record"));
        }
        // A record cannot reach past the end of its file: such a length is a
        // truncated tail from a crash mid-append. Checking before allocating
        // also keeps a corrupt length from reserving absurd memory. The file
        // length was sampled at open, so records appended mid-scan read as
        // past-the-end and the scan stops at its opening snapshot.
        if record_len as u64 > file_len.saturating_sub(offset + 4) {
            return Ok(records);
        }

        let mut body = vec![0u8; record_len as usize];
        match rdr.read_exact(&mut body) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(records),
            Err(e) => return Err(e.into()),
        }

        records.push((offset, parse_body(&body, verify_checksums)?));
        offset += 4 + record_len as u64;
    }
}

/// Reads the single record starting at `offset` through a cached reader.
///
/// Checksum verification is left to the caller (see [`decode_put`]), so that
/// point reads can honor their read options.
pub fn read_record_at(rdr: &mut BufReader<File>, offset: u64) -> Result<Record> {
    let file_len = rdr.get_ref().metadata()?.len();
    rdr.seek(SeekFrom::Start(offset))?;
    let record_len = rdr.read_u32::<LittleEndian>()?;
    if record_len == 0 || record_len as u64 > file_len.saturating_sub(offset + 4) {
        return Err(Error::io("corrupt segment: absurd record length"));
    }
    let mut body = vec![0u8; record_len as usize];
    rdr.read_exact(&mut body)?;
    parse_body(&body, false)
}
