//! Read path: the buffer-first lookup order.

use crate::{Db, Error, ReadOptions, Result};
use tracing::trace;

impl Db {
    /// Looks up a key.
    ///
    /// The write buffer is consulted first: it is authoritative for recent
    /// mutations, including deletions. A buffered tombstone answers
    /// `DeleteOrder` internally and is rewritten to `NotFound` here, at the
    /// public boundary, so callers never observe it. Only a buffer miss
    /// falls through to the storage engine, whose result is returned
    /// unchanged.
    pub fn get(&self, read_options: &ReadOptions, key: &[u8]) -> Result<Vec<u8>> {
        if self.is_closed() {
            return Err(Error::io("database is not open"));
        }
        trace!(key = %String::from_utf8_lossy(key), "get");

        match self.buffer().get(key) {
            Ok(value) => {
                trace!("found in buffer");
                Ok(value)
            }
            Err(e) if e.is_delete_order() => {
                // A buffered tombstone hides any engine value.
                Err(Error::NotFound("unable to find entry".into()))
            }
            Err(e) if e.is_not_found() => {
                trace!("not found in buffer");
                self.engine().get_with(key, read_options.verify_checksums)
            }
            Err(e) => Err(e),
        }
    }
}
