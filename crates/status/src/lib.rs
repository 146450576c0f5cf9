//! # Status — unified result type for CascadeKV
//!
//! Every layer of the store (write buffer, storage engine, compressor, public
//! API) reports failures through the same [`Error`] enum so that callers can
//! branch on the *kind* of outcome rather than parse messages.
//!
//! Two kinds deserve a note:
//!
//! - [`Error::NotFound`] doubles as a normal lookup outcome on the read path.
//! - [`Error::DeleteOrder`] is internal: the write buffer returns it when a
//!   buffered tombstone shadows a key. The database handle rewrites it to
//!   `NotFound` before it can leave the public API.

use thiserror::Error;

/// Result type alias used across all CascadeKV crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for CascadeKV operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The key does not exist (or is hidden by a tombstone).
    #[error("not found: {0}")]
    NotFound(String),

    /// A buffered tombstone shadows this key. Never crosses the public API;
    /// the database handle rewrites it to [`Error::NotFound`].
    #[error("delete order pending for this key")]
    DeleteOrder,

    /// Filesystem failure, corruption, compressor failure, or a closed
    /// database.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An ill-formed request, e.g. a chunk stream violating the ordering
    /// contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Shorthand for an [`Error::Io`] carrying only a message.
    pub fn io(msg: impl Into<String>) -> Self {
        Error::Io(std::io::Error::new(std::io::ErrorKind::Other, msg.into()))
    }

    /// True if this is a [`Error::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// True if this is a [`Error::DeleteOrder`].
    #[must_use]
    pub fn is_delete_order(&self) -> bool {
        matches!(self, Error::DeleteOrder)
    }
}
