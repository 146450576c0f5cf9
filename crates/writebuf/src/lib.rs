//! # Write buffer
//!
//! The in-memory staging area between the chunk pipeline and the storage
//! engine. Chunks arrive one at a time, already in their final on-disk form
//! (compressed frames or raw bytes), and are assembled per key until the
//! entry is complete. Completed entries and tombstones queue up in arrival
//! order until the database drains them into the engine.
//!
//! ## Visibility rules
//!
//! - A completed entry or a tombstone is immediately visible to [`WriteBuffer::get`]:
//!   the buffer is authoritative for recent mutations.
//! - A partially assembled entry is **not** visible; reads fall through to
//!   the engine until the last chunk arrives.
//! - A tombstone answers with [`status::Error::DeleteOrder`], which the
//!   database handle rewrites to `NotFound` at the public boundary.
//!
//! ## Entry completion
//!
//! A framed (compressed) stream announces its final chunk by carrying a
//! non-zero `size_value_compressed`. A raw stream is complete when its byte
//! count reaches `size_value`. An abandoned stream (writer error before the
//! last chunk) is silently discarded when the next first-chunk for the same
//! key arrives; it never surfaces from `get` or `drain`.

use bytes::Bytes;
use parking_lot::Mutex;
use status::{Error, Result};
use std::collections::HashMap;
use tracing::trace;

/// One operation drained from the buffer into the storage engine.
#[derive(Debug)]
pub enum BufferOp {
    /// A fully assembled entry.
    Put(Entry),
    /// A tombstone.
    Delete { key: Vec<u8> },
}

/// A completed entry, holding the exact bytes the engine will persist.
#[derive(Debug)]
pub struct Entry {
    pub key: Vec<u8>,
    /// Full uncompressed value size.
    pub size_value: u64,
    /// Non-zero when `data` is a frame stream; zero when `data` is raw.
    pub size_value_compressed: u64,
    /// CRC32 over `key || data`, computed by the chunk pipeline.
    pub crc32: u32,
    /// Final on-disk bytes.
    pub data: Vec<u8>,
}

impl Entry {
    /// True when `data` must go through the frame decoder.
    #[must_use]
    pub fn is_framed(&self) -> bool {
        self.size_value_compressed != 0
    }

    /// Decodes `data` back into the caller-visible value.
    pub fn decode(&self) -> Result<Vec<u8>> {
        if self.is_framed() {
            compressor::decode_value(&self.data, self.size_value)
        } else {
            if self.data.len() as u64 != self.size_value {
                return Err(Error::io(format!(
                    "raw entry length {} does not match declared size {}",
                    self.data.len(),
                    self.size_value
                )));
            }
            Ok(self.data.clone())
        }
    }
}

/// An entry still being assembled from its chunk stream.
#[derive(Debug)]
struct Pending {
    size_value: u64,
    data: Vec<u8>,
}

/// Where the latest buffered state of a key lives.
#[derive(Debug, Clone, Copy)]
enum Latest {
    Live(usize),
    Deleted,
}

#[derive(Debug, Default)]
struct Inner {
    pending: HashMap<Vec<u8>, Pending>,
    ready: Vec<BufferOp>,
    latest: HashMap<Vec<u8>, Latest>,
    ready_bytes: usize,
}

/// The shared, internally synchronized write buffer.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    inner: Mutex<Inner>,
}

impl WriteBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts one chunk of an entry's on-disk stream.
    ///
    /// `offset` is the chunk's byte offset within the stream and must be
    /// contiguous with the bytes already received; a gap or overlap means
    /// the writer violated the ordering contract and is rejected with
    /// `InvalidArgument`. `offset == 0` begins a new stream, discarding any
    /// abandoned one for the same key.
    pub fn put_chunk(
        &self,
        key: &[u8],
        chunk: Bytes,
        offset: u64,
        size_value: u64,
        size_value_compressed: u64,
        crc32: u32,
    ) -> Result<()> {
        let mut inner = self.inner.lock();

        if offset == 0 {
            // Pre-size for the declared value, but never trust the caller
            // with an unbounded allocation up front.
            let capacity = usize::min(size_value as usize, 1024 * 1024);
            inner.pending.insert(
                key.to_vec(),
                Pending {
                    size_value,
                    data: Vec::with_capacity(capacity),
                },
            );
        }

        let pending = inner.pending.get_mut(key).ok_or_else(|| {
            Error::InvalidArgument("chunk received for an entry that was never started".into())
        })?;
        if pending.size_value != size_value {
            return Err(Error::InvalidArgument(format!(
                "declared value size changed mid-stream ({} != {})",
                size_value, pending.size_value
            )));
        }
        if offset != pending.data.len() as u64 {
            return Err(Error::InvalidArgument(format!(
                "non-contiguous chunk stream: offset {} but {} bytes assembled",
                offset,
                pending.data.len()
            )));
        }

        pending.data.extend_from_slice(&chunk);

        // A framed stream signals completion through size_value_compressed;
        // a raw stream completes when its length reaches size_value.
        let complete =
            size_value_compressed != 0 || pending.data.len() as u64 == size_value;
        if complete {
            let pending = inner.pending.remove(key).expect("pending entry exists");
            trace!(
                key = %String::from_utf8_lossy(key),
                bytes = pending.data.len(),
                framed = size_value_compressed != 0,
                "buffer entry complete"
            );
            let entry = Entry {
                key: key.to_vec(),
                size_value,
                size_value_compressed,
                crc32,
                data: pending.data,
            };
            inner.ready_bytes += entry.key.len() + entry.data.len();
            let index = inner.ready.len();
            inner.latest.insert(key.to_vec(), Latest::Live(index));
            inner.ready.push(BufferOp::Put(entry));
        }

        Ok(())
    }

    /// Buffers a tombstone for `key`, discarding any in-flight stream.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.pending.remove(key);
        inner.latest.insert(key.to_vec(), Latest::Deleted);
        inner.ready_bytes += key.len();
        inner.ready.push(BufferOp::Delete { key: key.to_vec() });
        Ok(())
    }

    /// Looks up the latest buffered state of `key`.
    ///
    /// Returns the decoded value, `DeleteOrder` for a buffered tombstone, or
    /// `NotFound` when the buffer holds nothing complete for this key.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let inner = self.inner.lock();
        match inner.latest.get(key) {
            Some(Latest::Deleted) => Err(Error::DeleteOrder),
            Some(Latest::Live(index)) => match &inner.ready[*index] {
                BufferOp::Put(entry) => entry.decode(),
                BufferOp::Delete { .. } => Err(Error::DeleteOrder),
            },
            None => Err(Error::NotFound("unable to find entry".into())),
        }
    }

    /// Removes and returns every completed operation, in arrival order.
    ///
    /// In-flight chunk streams stay behind; they belong to the next drain
    /// once their last chunk arrives.
    pub fn drain(&self) -> Vec<BufferOp> {
        let mut inner = self.inner.lock();
        inner.latest.clear();
        inner.ready_bytes = 0;
        std::mem::take(&mut inner.ready)
    }

    /// Bytes held by completed operations, used for flush-threshold checks.
    #[must_use]
    pub fn ready_bytes(&self) -> usize {
        self.inner.lock().ready_bytes
    }

    /// Number of completed operations awaiting a drain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().ready.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
