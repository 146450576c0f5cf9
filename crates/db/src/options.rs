//! Database configuration.

use compressor::CompressionType;

/// Options fixed at [`Db::open`](crate::Db::open) time.
#[derive(Debug, Clone)]
pub struct Options {
    /// Largest chunk the storage layer accepts. Larger incoming chunks are
    /// split before entering the pipeline.
    pub maximum_chunk_size: u64,

    /// Per-chunk compression codec for values.
    pub compression: CompressionType,

    /// Completed buffered bytes that trigger a drain into the engine.
    pub write_buffer_size: usize,

    /// Segment size at which the engine rotates to a new append file.
    pub segment_size: u64,

    /// If `true`, every segment append is followed by `fsync`.
    pub sync: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            maximum_chunk_size: 1024 * 1024,
            compression: CompressionType::Lz4,
            write_buffer_size: 4 * 1024 * 1024,
            segment_size: 64 * 1024 * 1024,
            sync: false,
        }
    }
}

/// Per-call read options.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Verify the entry checksum on every engine read.
    pub verify_checksums: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            verify_checksums: true,
        }
    }
}

/// Per-call write options.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Drain the buffer and fsync before returning.
    pub sync: bool,
}
