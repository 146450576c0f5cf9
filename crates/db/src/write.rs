//! Write path: `put()`, the chunk pipeline behind `put_chunk()`, and
//! `delete()`.
//!
//! Every value flows through the same pipeline, whole values simply being
//! single-chunk streams. The pipeline splits oversize chunks, compresses
//! each chunk into an independent frame, enforces the entry's on-disk space
//! budget with a fallback to verbatim storage, accumulates the streaming
//! CRC32 and hands the finished chunk to the write buffer.

use crate::stream::with_writer_state;
use crate::{CompressionType, Db, Error, Result, WriteOptions};
use bytes::Bytes;
use storage::entry_padding_size;
use tracing::{error, trace};

impl Db {
    /// Inserts a whole value in one call.
    pub fn put(&self, write_options: &WriteOptions, key: &[u8], value: Bytes) -> Result<()> {
        let size_value = value.len() as u64;
        self.put_chunk(write_options, key, value, 0, size_value)
    }

    /// Streams one chunk of a value.
    ///
    /// `offset_chunk` is the chunk's byte offset within the uncompressed
    /// value and `size_value` the full value size, identical across all
    /// chunks of the entry. Chunks must arrive in offset order, all from
    /// the same thread; the first has offset 0 and the last ends at
    /// `size_value`.
    ///
    /// A chunk larger than the configured maximum is split into consecutive
    /// sub-chunks, submitted in order; the first failure aborts the loop.
    pub fn put_chunk(
        &self,
        write_options: &WriteOptions,
        key: &[u8],
        chunk: Bytes,
        offset_chunk: u64,
        size_value: u64,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(Error::io("database is not open"));
        }
        if size_value <= self.options().maximum_chunk_size {
            return self.put_chunk_valid_size(write_options, key, chunk, offset_chunk, size_value);
        }

        let max = self.options().maximum_chunk_size as usize;
        let size_chunk = chunk.len();
        let mut offset = 0usize;
        while offset < size_chunk {
            let end = usize::min(offset + max, size_chunk);
            self.put_chunk_valid_size(
                write_options,
                key,
                chunk.slice(offset..end),
                offset_chunk + offset as u64,
                size_value,
            )?;
            offset = end;
        }
        Ok(())
    }

    /// The pipeline proper. `chunk` is at most `maximum_chunk_size` bytes.
    fn put_chunk_valid_size(
        &self,
        write_options: &WriteOptions,
        key: &[u8],
        chunk: Bytes,
        offset_chunk: u64,
        size_value: u64,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(Error::io("database is not open"));
        }
        self.engine().filesystem_status()?;
        trace!(
            key = %String::from_utf8_lossy(key),
            offset_chunk,
            size_chunk = chunk.len(),
            "put_chunk"
        );

        let chunk_len = chunk.len() as u64;
        if offset_chunk + chunk_len > size_value {
            return Err(Error::InvalidArgument(
                "chunk reaches past the declared value size".into(),
            ));
        }
        if chunk.is_empty() && size_value > 0 {
            return Err(Error::InvalidArgument(
                "zero-length chunk for a non-empty value".into(),
            ));
        }

        let is_first_chunk = offset_chunk == 0;
        let is_last_chunk = offset_chunk + chunk_len == size_value;
        let do_compression =
            !chunk.is_empty() && self.options().compression != CompressionType::None;

        let (chunk_final, offset_chunk_compressed, size_value_compressed, crc32) =
            with_writer_state(|state| -> Result<(Bytes, u64, u64, u32)> {
                if is_first_chunk {
                    state.compression_enabled = true;
                    state.fallback_offset = 0;
                    state.crc32.reset();
                    state.crc32.update(key);
                    if do_compression {
                        state.frames.reset();
                    }
                }

                let mut offset_chunk_compressed = offset_chunk;
                let chunk_final: Bytes;

                if !state.compression_enabled {
                    // The fallback engaged on an earlier chunk of this
                    // entry: raw bytes continue the stored frame's region,
                    // no new header.
                    offset_chunk_compressed = state.fallback_offset;
                    state.fallback_offset += chunk_len;
                    chunk_final = chunk;
                } else if !do_compression {
                    chunk_final = chunk;
                } else {
                    offset_chunk_compressed = state.frames.size_compressed();
                    let mut frame = state.frames.compress(&chunk)?;
                    let mut out_len = frame.len() as u64;

                    // Space-budget check: would storing the rest of the
                    // entry verbatim, plus one frame header, still overflow
                    // the on-disk budget? If so, abandon this frame and
                    // switch the entry to verbatim storage for good.
                    let size_remaining = size_value - offset_chunk;
                    let space_left =
                        size_value + entry_padding_size(size_value) - offset_chunk_compressed;
                    if size_remaining - chunk_len + compressor::frame_header_size() + out_len
                        > space_left
                    {
                        state.frames.adjust_compressed_size(-(out_len as i64));
                        let mut stored =
                            vec![0u8; compressor::uncompressed_frame_size(chunk_len) as usize];
                        compressor::disable_compression_in_frame_header(&mut stored);
                        stored[compressor::frame_header_size() as usize..]
                            .copy_from_slice(&chunk);
                        out_len = stored.len() as u64;
                        frame = stored;
                        state.compression_enabled = false;
                        state.fallback_offset = state.frames.size_compressed() + out_len;
                        trace!(
                            key = %String::from_utf8_lossy(key),
                            offset_chunk,
                            "compression fallback engaged"
                        );
                    }
                    chunk_final = Bytes::from(frame);
                }

                let size_value_compressed = if do_compression && is_last_chunk {
                    if state.compression_enabled {
                        state.frames.size_compressed()
                    } else {
                        offset_chunk_compressed + chunk_len
                    }
                } else {
                    0
                };

                state.crc32.update(&chunk_final);
                let crc32 = if is_last_chunk {
                    state.crc32.clone().finalize()
                } else {
                    0
                };

                Ok((chunk_final, offset_chunk_compressed, size_value_compressed, crc32))
            })?;

        // The dispatched bytes must fit the entry's allocated on-disk
        // region. A violation is a programming error in a collaborator and
        // must never trigger in a well-behaved system.
        let size_padding = if do_compression {
            entry_padding_size(size_value)
        } else {
            0
        };
        if offset_chunk_compressed + chunk_final.len() as u64 > size_value + size_padding {
            error!(
                key = %String::from_utf8_lossy(key),
                offset_chunk_compressed,
                size_chunk_final = chunk_final.len(),
                size_value,
                "write was attempted outside of the allocated memory"
            );
            return Err(Error::io("write outside allocated memory"));
        }

        self.buffer().put_chunk(
            key,
            chunk_final,
            offset_chunk_compressed,
            size_value,
            size_value_compressed,
            crc32,
        )?;
        self.maybe_flush(write_options.sync)
    }

    /// Deletes a key by buffering a tombstone.
    ///
    /// The engine's filesystem status is checked first so a bad disk fails
    /// the call before anything is buffered.
    pub fn delete(&self, write_options: &WriteOptions, key: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::io("database is not open"));
        }
        trace!(key = %String::from_utf8_lossy(key), "delete");
        self.engine().filesystem_status()?;
        self.buffer().delete(key)?;
        self.maybe_flush(write_options.sync)
    }
}
