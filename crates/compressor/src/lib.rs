//! # Compressor — chunk-granular LZ4 framing
//!
//! Values are written as a stream of independent *frames*, one per chunk.
//! Each frame carries a fixed 8-byte header followed by its payload:
//!
//! ```text
//! [word0: u32 LE][word1: u32 LE][payload ...]
//!
//! word0 = payload_len | STORED_BIT
//! word1 = raw_len (uncompressed byte count covered by the frame)
//! ```
//!
//! - `STORED_BIT` clear: the payload is an LZ4 block of `raw_len` bytes.
//! - `STORED_BIT` set: the payload is stored verbatim. A stored frame is
//!   always the **final** frame of a stream and covers every byte that
//!   follows the header, including raw bytes appended after the frame was
//!   first written (the uncompressed-fallback region keeps growing without
//!   further headers).
//!
//! Frames are independent: a consumer can decode any prefix of the stream
//! that ends on a frame boundary.
//!
//! [`FrameStream`] is the per-entry, per-writer compression state. It only
//! tracks the cumulative number of emitted bytes; the chunk pipeline owns
//! the decision of where each frame lands in the entry's on-disk region.

use byteorder::{ByteOrder, LittleEndian};
use status::{Error, Result};

/// Fixed frame header length in bytes.
pub const FRAME_HEADER_SIZE: u64 = 8;

/// Marks a frame whose payload is stored verbatim.
const STORED_BIT: u32 = 0x8000_0000;

/// Compression codec selection for a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionType {
    /// Values are written raw; the frame layer is bypassed entirely.
    None,
    /// Per-chunk LZ4 block frames.
    #[default]
    Lz4,
}

impl std::str::FromStr for CompressionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(CompressionType::None),
            "lz4" => Ok(CompressionType::Lz4),
            other => Err(format!("unknown compression type: {}", other)),
        }
    }
}

/// Returns the constant frame-header length.
#[must_use]
pub fn frame_header_size() -> u64 {
    FRAME_HEADER_SIZE
}

/// Size of a frame that stores `n` bytes verbatim.
#[must_use]
pub fn uncompressed_frame_size(n: u64) -> u64 {
    FRAME_HEADER_SIZE + n
}

/// Rewrites the header of `frame` to mark it as a stored (verbatim) frame
/// covering the `frame.len() - 8` payload bytes that follow the header.
///
/// # Panics
///
/// Panics if `frame` is shorter than the header itself.
pub fn disable_compression_in_frame_header(frame: &mut [u8]) {
    let payload_len = (frame.len() as u64 - FRAME_HEADER_SIZE) as u32;
    LittleEndian::write_u32(&mut frame[0..4], payload_len | STORED_BIT);
    LittleEndian::write_u32(&mut frame[4..8], payload_len);
}

/// Per-entry streaming compression state.
///
/// One `FrameStream` lives per in-flight entry per writer. `compress` emits
/// one frame per call and accounts it in `size_compressed`; the pipeline may
/// retroactively discard a speculative frame with `adjust_compressed_size`.
#[derive(Debug, Default)]
pub struct FrameStream {
    size_compressed: u64,
}

impl FrameStream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a new entry's frame stream.
    pub fn reset(&mut self) {
        self.size_compressed = 0;
    }

    /// Cumulative bytes emitted (headers included) since the last `reset`.
    #[must_use]
    pub fn size_compressed(&self) -> u64 {
        self.size_compressed
    }

    /// Applies a signed correction after a speculative frame was discarded.
    pub fn adjust_compressed_size(&mut self, delta: i64) {
        if delta < 0 {
            self.size_compressed = self.size_compressed.saturating_sub(delta.unsigned_abs());
        } else {
            self.size_compressed += delta as u64;
        }
    }

    /// Produces one frame covering `chunk`. The output may be smaller or
    /// larger than the input; it is accounted in `size_compressed` either
    /// way.
    pub fn compress(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        // The header's length word keeps its top bit for STORED_BIT, so the
        // payload (worst case slightly larger than the input) must stay
        // below 2^31 bytes.
        if chunk.len() >= 1 << 30 {
            return Err(Error::InvalidArgument(format!(
                "chunk of {} bytes exceeds the frame format limit",
                chunk.len()
            )));
        }

        let payload = lz4_flex::block::compress(chunk);
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE as usize + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);

        self.size_compressed += frame.len() as u64;
        Ok(frame)
    }
}

/// Decodes a complete frame stream back into the original value.
///
/// Walks the stream frame by frame. A stored frame terminates the walk and
/// contributes every remaining byte verbatim. The decoded length must equal
/// `size_value`.
pub fn decode_value(stream: &[u8], size_value: u64) -> Result<Vec<u8>> {
    // size_value comes from disk; cap the up-front allocation so a corrupt
    // header cannot trigger an absurd reservation.
    let mut out = Vec::with_capacity(usize::min(size_value as usize, 1024 * 1024));
    let mut pos = 0usize;

    while pos < stream.len() {
        if stream.len() - pos < FRAME_HEADER_SIZE as usize {
            return Err(Error::io("corrupt frame stream: truncated frame header"));
        }
        let word0 = LittleEndian::read_u32(&stream[pos..pos + 4]);
        let raw_len = LittleEndian::read_u32(&stream[pos + 4..pos + 8]) as usize;
        pos += FRAME_HEADER_SIZE as usize;

        if word0 & STORED_BIT != 0 {
            // Stored frame: verbatim, covers the remainder of the stream.
            out.extend_from_slice(&stream[pos..]);
            pos = stream.len();
        } else {
            let payload_len = word0 as usize;
            if stream.len() - pos < payload_len {
                return Err(Error::io("corrupt frame stream: truncated frame payload"));
            }
            let raw = lz4_flex::block::decompress(&stream[pos..pos + payload_len], raw_len)
                .map_err(|e| Error::io(format!("lz4 decompression failed: {}", e)))?;
            out.extend_from_slice(&raw);
            pos += payload_len;
        }
    }

    if out.len() as u64 != size_value {
        return Err(Error::io(format!(
            "decoded value length {} does not match declared size {}",
            out.len(),
            size_value
        )));
    }
    Ok(out)
}
