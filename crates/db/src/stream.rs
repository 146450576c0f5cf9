//! Per-writer streaming state.
//!
//! The chunk pipeline ties the chunks of one entry together with four pieces
//! of state: the compression-enabled flag, the running fallback output
//! offset, the streaming CRC32 and the compressor's frame stream. The state
//! is strictly thread-local: the chunks of one entry must be submitted from
//! the same thread in order, and two entries written from different threads
//! never share anything.
//!
//! The state is reset on the first chunk of an entry (`offset_chunk == 0`)
//! and simply overwritten by the next entry's first chunk, so an aborted
//! entry leaves nothing to clean up.

use compressor::FrameStream;
use crc32fast::Hasher as Crc32;
use std::cell::RefCell;

pub(crate) struct WriterState {
    /// False once the uncompressed fallback engaged for the current entry;
    /// never flips back within an entry.
    pub compression_enabled: bool,
    /// Bytes emitted so far once the fallback is engaged.
    pub fallback_offset: u64,
    /// Streaming CRC32 over `key || final on-disk bytes`.
    pub crc32: Crc32,
    /// Per-entry compression accounting.
    pub frames: FrameStream,
}

impl WriterState {
    fn new() -> Self {
        Self {
            compression_enabled: true,
            fallback_offset: 0,
            crc32: Crc32::new(),
            frames: FrameStream::new(),
        }
    }
}

thread_local! {
    static WRITER_STATE: RefCell<WriterState> = RefCell::new(WriterState::new());
}

/// Runs `f` with this thread's writer state.
pub(crate) fn with_writer_state<R>(f: impl FnOnce(&mut WriterState) -> R) -> R {
    WRITER_STATE.with(|cell| f(&mut cell.borrow_mut()))
}
