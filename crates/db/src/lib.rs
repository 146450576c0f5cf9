//! # DB — the CascadeKV database handle
//!
//! An embeddable, log-structured key-value store with chunked streaming
//! writes, per-chunk compression framing, CRC32 integrity and point-in-time
//! snapshots.
//!
//! ## Architecture
//!
//! ```text
//! Caller
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │                     DB                        │
//! │                                               │
//! │ write.rs → chunk pipeline → write buffer      │
//! │              |   (split, compress, budget,    │
//! │              |    CRC32, dispatch)            │
//! │              |  (threshold / sync?)           │
//! │              v                                │
//! │           flush() → storage engine segments   │
//! │                                               │
//! │ read.rs → write buffer → storage engine       │
//! │             (buffered tombstones win)         │
//! │                                               │
//! │ snapshot.rs → seal segment → read-only view   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module        | Purpose                                              |
//! |---------------|------------------------------------------------------|
//! | [`lib.rs`]    | `Db` struct, open/close, flush policy, `Debug`, `Drop` |
//! | [`write`]     | `put()`, `put_chunk()`, the chunk pipeline, `delete()` |
//! | [`read`]      | `get()` with the buffer-first lookup order             |
//! | [`snapshot`]  | `new_snapshot()`, `new_iterator()`, snapshot views     |
//! | [`stream`]    | Per-writer thread-local streaming state                |
//! | [`options`]   | `Options`, `ReadOptions`, `WriteOptions`               |
//!
//! ## Writing values of arbitrary size
//!
//! `put` writes a whole value at once; `put_chunk` streams a value as a
//! sequence of chunks with strictly increasing offsets, all from the same
//! thread. Each chunk is compressed into an independent frame; when the
//! compressed stream threatens to outgrow the entry's on-disk budget
//! (`size_value` plus the engine's alignment padding), the entry falls back
//! to verbatim storage for its remaining bytes.

mod options;
mod read;
mod snapshot;
mod stream;
mod write;

pub use compressor::CompressionType;
pub use options::{Options, ReadOptions, WriteOptions};
pub use snapshot::{Snapshot, SnapshotIterator};
pub use status::{Error, Result};

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storage::{Record, StorageEngine};
use tracing::debug;
use writebuf::{BufferOp, WriteBuffer};

/// The database handle. Cheap to share behind an `Arc`; every method takes
/// `&self` and the buffer and engine are internally synchronized.
pub struct Db {
    name: PathBuf,
    options: Options,
    buffer: Arc<WriteBuffer>,
    engine: Arc<StorageEngine>,
    /// Serializes drain-and-apply so ops reach the engine in buffer order.
    flush_lock: Mutex<()>,
    is_closed: AtomicBool,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("name", &self.name)
            .field("closed", &self.is_closed.load(Ordering::Acquire))
            .field("buffered_ops", &self.buffer.len())
            .field("engine", &self.engine)
            .finish()
    }
}

impl Db {
    /// Opens (or creates) a database at `path`, recovering any existing
    /// segments.
    pub fn open(path: impl AsRef<Path>, options: Options) -> Result<Db> {
        let name = path.as_ref().to_path_buf();
        let engine = StorageEngine::open(&name, options.segment_size, options.sync)?;
        debug!(name = %name.display(), "database opened");
        Ok(Db {
            name,
            options,
            buffer: Arc::new(WriteBuffer::new()),
            engine: Arc::new(engine),
            flush_lock: Mutex::new(()),
            is_closed: AtomicBool::new(false),
        })
    }

    /// Drains every completed buffered operation into the storage engine.
    pub fn flush(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::io("database is not open"));
        }
        self.flush_internal()
    }

    fn flush_internal(&self) -> Result<()> {
        let _guard = self.flush_lock.lock();
        for op in self.buffer.drain() {
            match op {
                BufferOp::Put(entry) => self.engine.append(Record::Put {
                    key: entry.key,
                    size_value: entry.size_value,
                    size_value_compressed: entry.size_value_compressed,
                    crc32: entry.crc32,
                    data: entry.data,
                })?,
                BufferOp::Delete { key } => self.engine.append(Record::Delete { key })?,
            }
        }
        Ok(())
    }

    /// Applies the flush policy after a completed write: drain on `sync`
    /// writes or once the buffer holds enough completed bytes.
    pub(crate) fn maybe_flush(&self, sync: bool) -> Result<()> {
        if sync {
            self.flush_internal()?;
            return self.engine.sync();
        }
        if self.buffer.ready_bytes() >= self.options.write_buffer_size {
            return self.flush_internal();
        }
        Ok(())
    }

    /// Flushes and marks the database closed. Every subsequent operation
    /// fails with `Io("database is not open")`. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.is_closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.flush_internal()?;
        self.engine.sync()?;
        debug!(name = %self.name.display(), "database closed");
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    pub(crate) fn options(&self) -> &Options {
        &self.options
    }

    pub(crate) fn name(&self) -> &Path {
        &self.name
    }

    pub(crate) fn buffer(&self) -> &WriteBuffer {
        &self.buffer
    }

    pub(crate) fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }
}

/// Best-effort flush on drop; remaining buffered data would otherwise be
/// lost since the buffer has no durability of its own.
impl Drop for Db {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests;
