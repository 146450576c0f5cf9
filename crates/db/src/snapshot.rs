//! Snapshots and ordered iteration.
//!
//! A snapshot pins the engine at a file boundary. Construction quiesces the
//! write path in order: drain the write buffer into the engine, seal the
//! current append segment (yielding `fileid_end`), obtain a snapshot id and
//! ignore set from the engine, then open a read-only engine view over the
//! segments at or below the boundary. Any failure along the way aborts the
//! construction and releases what was registered.
//!
//! Iteration walks file ids ascending and yields each live entry in
//! within-file record order: a record is live when the view's index still
//! points at its location and it is not a tombstone.

use crate::{Db, Error, ReadOptions, Result};
use std::sync::Arc;
use storage::{decode_put, EntryLocation, Record, StorageEngine};
use tracing::{debug, trace};

/// An immutable point-in-time view of the database.
pub struct Snapshot {
    /// The live engine; holding it keeps the snapshot registration (and its
    /// ignore set) alive until the snapshot is dropped.
    engine: Arc<StorageEngine>,
    /// Read-only engine view bounded by `fileid_end`.
    view: Arc<StorageEngine>,
    /// Ordered file ids the iterator walks.
    fileids: Vec<u32>,
    snapshot_id: u32,
}

impl Db {
    /// Builds a point-in-time snapshot.
    ///
    /// Fails with `Io("database is not open")` on a closed database and
    /// propagates any engine failure during the quiesce protocol.
    pub fn new_snapshot(&self) -> Result<Snapshot> {
        if self.is_closed() {
            return Err(Error::io("database is not open"));
        }
        trace!("new_snapshot");

        self.flush()?;
        let fileid_end = self.engine().flush_current_file_for_snapshot()?;
        let (snapshot_id, fileids_ignore) = self.engine().get_new_snapshot_data()?;

        let view = match StorageEngine::open_read_only(self.name(), &fileids_ignore, fileid_end) {
            Ok(view) => view,
            Err(e) => {
                self.engine().release_snapshot(snapshot_id);
                return Err(e);
            }
        };
        let fileids = view.fileids_iterator();
        debug!(snapshot_id, fileid_end, segments = fileids.len(), "snapshot created");

        Ok(Snapshot {
            engine: Arc::clone(self.engine()),
            view: Arc::new(view),
            fileids,
            snapshot_id,
        })
    }

    /// A snapshot plus its iterator in one call. The iterator holds the
    /// snapshot so the snapshot outlives it.
    pub fn new_iterator(&self, read_options: &ReadOptions) -> Result<SnapshotIterator> {
        let snapshot = self.new_snapshot()?;
        let mut iter = snapshot.iter(read_options);
        iter._parent = Some(Arc::new(snapshot));
        Ok(iter)
    }
}

impl Snapshot {
    /// The engine-assigned snapshot id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.snapshot_id
    }

    /// Looks up a key as of the snapshot.
    pub fn get(&self, read_options: &ReadOptions, key: &[u8]) -> Result<Vec<u8>> {
        self.view.get_with(key, read_options.verify_checksums)
    }

    /// An iterator over every live entry as of the snapshot, ordered by
    /// file id ascending, then within-file record order.
    #[must_use]
    pub fn iter(&self, read_options: &ReadOptions) -> SnapshotIterator {
        SnapshotIterator {
            view: Arc::clone(&self.view),
            verify_checksums: read_options.verify_checksums,
            fileids: self.fileids.clone().into_iter(),
            current_fileid: 0,
            current: Vec::new().into_iter(),
            _parent: None,
        }
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.engine.release_snapshot(self.snapshot_id);
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("snapshot_id", &self.snapshot_id)
            .field("fileids", &self.fileids)
            .finish()
    }
}

/// Iterator over the live entries of a [`Snapshot`].
pub struct SnapshotIterator {
    view: Arc<StorageEngine>,
    verify_checksums: bool,
    fileids: std::vec::IntoIter<u32>,
    current_fileid: u32,
    current: std::vec::IntoIter<(u64, Record)>,
    /// Set when the iterator was built by [`Db::new_iterator`]: holding the
    /// snapshot guarantees it outlives the iterator.
    _parent: Option<Arc<Snapshot>>,
}

impl std::fmt::Debug for SnapshotIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotIterator")
            .field("current_fileid", &self.current_fileid)
            .finish()
    }
}

impl Iterator for SnapshotIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.current.next() {
                Some((offset, record)) => {
                    let Record::Put {
                        key,
                        size_value,
                        size_value_compressed,
                        crc32,
                        data,
                    } = record
                    else {
                        continue; // tombstones are never yielded
                    };
                    let location = EntryLocation {
                        fileid: self.current_fileid,
                        offset,
                    };
                    if !self.view.is_current(&key, location) {
                        continue; // superseded by a newer record
                    }
                    let value = decode_put(
                        &key,
                        &data,
                        size_value,
                        size_value_compressed,
                        crc32,
                        self.verify_checksums,
                    );
                    return Some(value.map(|v| (key, v)));
                }
                None => match self.fileids.next() {
                    Some(fileid) => {
                        self.current_fileid = fileid;
                        match self.view.segment_entries(fileid, self.verify_checksums) {
                            Ok(entries) => self.current = entries.into_iter(),
                            Err(e) => return Some(Err(e)),
                        }
                    }
                    None => return None,
                },
            }
        }
    }
}
