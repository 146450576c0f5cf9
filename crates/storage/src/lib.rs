//! # Storage — log-structured segment engine
//!
//! The durable half of CascadeKV. Entries arrive from the write buffer in
//! their final on-disk form and are appended to numbered segment files; an
//! in-memory index maps each key to the segment and offset of its newest
//! record.
//!
//! ```text
//! data_dir/
//!   00000001.seg     ← sealed
//!   00000002.seg     ← sealed (snapshot boundary lives between files)
//!   00000003.seg     ← current append target
//! ```
//!
//! ## Write path
//!
//! [`StorageEngine::append`] serializes one record into the current segment
//! and updates the index. When the segment reaches the size limit it is
//! sealed and a new one is started; file ids grow monotonically and are
//! never reused.
//!
//! ## Read path
//!
//! [`StorageEngine::get`] is a single index lookup plus one seek + read
//! through a per-segment cached file handle. The entry checksum (CRC32 over
//! `key || data`) is verified unless the caller opted out, then the frame
//! stream is decoded.
//!
//! ## Snapshots
//!
//! A snapshot pins the engine at a file boundary: the current segment is
//! sealed ([`StorageEngine::flush_current_file_for_snapshot`] returns its
//! file id), the engine hands out a snapshot id plus an ignore set of file
//! ids that are on disk but younger than the snapshot, and a read-only
//! engine ([`StorageEngine::open_read_only`]) is built from the segments at
//! or below the boundary. The ignore set registration is released when the
//! snapshot is dropped.
//!
//! ## Recovery
//!
//! On [`StorageEngine::open`], existing segments are replayed in file-id
//! order (checksums verified, truncated tails tolerated) to rebuild the
//! index. The engine then starts a fresh segment; sealed files are never
//! appended to again.

mod segment;

pub use segment::{decode_put, entry_padding_size, scan_segment, Record, MAX_KEY_SIZE};

use parking_lot::{Mutex, RwLock};
use segment::{read_record_at, SegmentWriter};
use status::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File extension of segment files.
const SEGMENT_EXT: &str = "seg";

/// Where the newest record for a key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub fileid: u32,
    pub offset: u64,
}

#[derive(Debug)]
struct Inner {
    /// key → location of its newest record.
    index: BTreeMap<Vec<u8>, EntryLocation>,
    /// Every segment belonging to this engine view, ascending.
    fileids: Vec<u32>,
    /// Id of the current append segment (writable engines only).
    fileid_current: u32,
    writer: Option<SegmentWriter>,
    /// Active snapshot registrations: snapshot id → ignore set.
    snapshots: HashMap<u32, HashSet<u32>>,
    snapshot_counter: u32,
    /// Sticky record of the first I/O append failure; checked by
    /// `filesystem_status` so later writes fail fast on a bad disk.
    fs_error: Option<String>,
}

/// The storage engine. Shared by all writers and readers; internally
/// synchronized.
pub struct StorageEngine {
    dir: PathBuf,
    readonly: bool,
    sync: bool,
    segment_size_limit: u64,
    inner: RwLock<Inner>,
    /// Cached read handles, one per segment.
    readers: Mutex<HashMap<u32, BufReader<File>>>,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("StorageEngine")
            .field("dir", &self.dir)
            .field("readonly", &self.readonly)
            .field("segments", &inner.fileids.len())
            .field("fileid_current", &inner.fileid_current)
            .field("indexed_keys", &inner.index.len())
            .field("active_snapshots", &inner.snapshots.len())
            .finish()
    }
}

fn segment_path(dir: &Path, fileid: u32) -> PathBuf {
    dir.join(format!("{:08}.{}", fileid, SEGMENT_EXT))
}

/// Lists the segment file ids present in `dir`, ascending.
fn list_segments(dir: &Path) -> Result<Vec<u32>> {
    let mut fileids = Vec::new();
    for dirent in std::fs::read_dir(dir)? {
        let path = dirent?.path();
        if path.extension().map(|e| e == SEGMENT_EXT).unwrap_or(false) {
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u32>().ok())
            {
                fileids.push(id);
            }
        }
    }
    fileids.sort_unstable();
    Ok(fileids)
}

impl StorageEngine {
    /// Opens (or creates) a writable engine at `dir`.
    ///
    /// Recovery: replay every existing segment in file-id order to rebuild
    /// the index, then start a fresh append segment one past the highest id
    /// seen.
    pub fn open(dir: impl AsRef<Path>, segment_size_limit: u64, sync: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let mut fileids = list_segments(&dir)?;
        let mut index = BTreeMap::new();
        for &fileid in &fileids {
            Self::replay_segment(&dir, fileid, &mut index)?;
        }

        let fileid_current = fileids.last().copied().unwrap_or(0) + 1;
        let writer = SegmentWriter::create(&segment_path(&dir, fileid_current), sync)?;
        fileids.push(fileid_current);

        debug!(
            dir = %dir.display(),
            segments = fileids.len(),
            keys = index.len(),
            "storage engine opened"
        );

        Ok(Self {
            dir,
            readonly: false,
            sync,
            segment_size_limit,
            inner: RwLock::new(Inner {
                index,
                fileids,
                fileid_current,
                writer: Some(writer),
                snapshots: HashMap::new(),
                snapshot_counter: 0,
                fs_error: None,
            }),
            readers: Mutex::new(HashMap::new()),
        })
    }

    /// Opens a read-only engine over the segments of `dir` with file id at
    /// most `fileid_end`, excluding `fileids_ignore`.
    ///
    /// This is the snapshot view: segments written after the boundary (and
    /// any listed in the ignore set) are invisible.
    pub fn open_read_only(
        dir: impl AsRef<Path>,
        fileids_ignore: &HashSet<u32>,
        fileid_end: u32,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();

        let fileids: Vec<u32> = list_segments(&dir)?
            .into_iter()
            .filter(|id| *id <= fileid_end && !fileids_ignore.contains(id))
            .collect();

        let mut index = BTreeMap::new();
        for &fileid in &fileids {
            Self::replay_segment(&dir, fileid, &mut index)?;
        }

        Ok(Self {
            dir,
            readonly: true,
            sync: false,
            segment_size_limit: u64::MAX,
            inner: RwLock::new(Inner {
                index,
                fileids,
                fileid_current: fileid_end,
                writer: None,
                snapshots: HashMap::new(),
                snapshot_counter: 0,
                fs_error: None,
            }),
            readers: Mutex::new(HashMap::new()),
        })
    }

    fn replay_segment(
        dir: &Path,
        fileid: u32,
        index: &mut BTreeMap<Vec<u8>, EntryLocation>,
    ) -> Result<()> {
        // Recovery has no caller-supplied read options; always verify.
        for (offset, record) in scan_segment(&segment_path(dir, fileid), true)? {
            match record {
                Record::Put { key, .. } => {
                    index.insert(key, EntryLocation { fileid, offset });
                }
                Record::Delete { key } => {
                    index.remove(&key);
                }
            }
        }
        Ok(())
    }

    /// Reports the health of the underlying filesystem.
    ///
    /// Fails once an append has failed (sticky) or the data directory has
    /// gone away, so writers can fail fast before buffering more data.
    pub fn filesystem_status(&self) -> Result<()> {
        if let Some(msg) = &self.inner.read().fs_error {
            return Err(Error::io(msg.clone()));
        }
        if !self.dir.is_dir() {
            return Err(Error::io(format!(
                "data directory {} is not accessible",
                self.dir.display()
            )));
        }
        Ok(())
    }

    /// Appends one record to the current segment and updates the index.
    ///
    /// Rotates to a new segment first when the current one has reached the
    /// size limit.
    pub fn append(&self, record: Record) -> Result<()> {
        if self.readonly {
            return Err(Error::io("storage engine is read-only"));
        }
        let mut inner = self.inner.write();

        if inner
            .writer
            .as_ref()
            .map(|w| w.bytes_written() >= self.segment_size_limit)
            .unwrap_or(false)
        {
            self.rotate_locked(&mut inner)?;
        }

        let fileid = inner.fileid_current;
        let writer = inner
            .writer
            .as_mut()
            .ok_or_else(|| Error::io("storage engine has no append segment"))?;

        let offset = match writer.append(&record) {
            Ok(offset) => offset,
            Err(e) => {
                let msg = format!("segment append failed: {}", e);
                warn!("{}", msg);
                // Only a real I/O failure marks the filesystem unhealthy; a
                // rejected record (e.g. one exceeding the format limit) says
                // nothing about the disk and must not poison later writes.
                if matches!(e, Error::Io(_)) {
                    inner.fs_error = Some(msg);
                }
                return Err(e);
            }
        };

        match record {
            Record::Put { key, .. } => {
                inner.index.insert(key, EntryLocation { fileid, offset });
            }
            Record::Delete { key } => {
                inner.index.remove(&key);
            }
        }
        Ok(())
    }

    fn rotate_locked(&self, inner: &mut Inner) -> Result<()> {
        if let Some(writer) = inner.writer.as_mut() {
            writer.sync_to_disk()?;
        }
        let next = inner.fileid_current + 1;
        inner.writer = Some(SegmentWriter::create(&segment_path(&self.dir, next), self.sync)?);
        inner.fileid_current = next;
        inner.fileids.push(next);
        debug!(fileid = next, "segment rotated");
        Ok(())
    }

    /// Point lookup: index → one seek + read → checksum → decode.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.get_with(key, true)
    }

    /// [`get`](StorageEngine::get) with explicit checksum verification
    /// control.
    pub fn get_with(&self, key: &[u8], verify_checksums: bool) -> Result<Vec<u8>> {
        let location = match self.inner.read().index.get(key) {
            Some(loc) => *loc,
            None => return Err(Error::NotFound("unable to find entry".into())),
        };

        let record = self.read_record(location)?;
        match record {
            Record::Put {
                key: stored_key,
                size_value,
                size_value_compressed,
                crc32,
                data,
            } => {
                if stored_key != key {
                    return Err(Error::io("index pointed at a mismatching key"));
                }
                decode_put(
                    key,
                    &data,
                    size_value,
                    size_value_compressed,
                    crc32,
                    verify_checksums,
                )
            }
            Record::Delete { .. } => Err(Error::NotFound("unable to find entry".into())),
        }
    }

    fn read_record(&self, location: EntryLocation) -> Result<Record> {
        let mut readers = self.readers.lock();
        let rdr = match readers.entry(location.fileid) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let file = File::open(segment_path(&self.dir, location.fileid))?;
                e.insert(BufReader::new(file))
            }
        };
        read_record_at(rdr, location.offset)
    }

    /// True when `location` is still the newest record for `key` in this
    /// engine view. Snapshot iteration uses this to skip superseded records.
    pub fn is_current(&self, key: &[u8], location: EntryLocation) -> bool {
        self.inner.read().index.get(key) == Some(&location)
    }

    /// All records of one segment, in within-file order, with offsets.
    /// Checksum verification follows the caller's read options, as on the
    /// point-read path.
    pub fn segment_entries(&self, fileid: u32, verify_checksums: bool) -> Result<Vec<(u64, Record)>> {
        scan_segment(&segment_path(&self.dir, fileid), verify_checksums)
    }

    /// Seals the current append segment for a snapshot and starts a new one.
    ///
    /// Returns the file id that bounds the snapshot (`fileid_end`): every
    /// record at or below it is part of the snapshot, everything after is
    /// not. If nothing was appended since the last seal, no empty segment is
    /// left behind and the previous boundary is returned.
    pub fn flush_current_file_for_snapshot(&self) -> Result<u32> {
        if self.readonly {
            return Err(Error::io("storage engine is read-only"));
        }
        let mut inner = self.inner.write();

        let appended = inner
            .writer
            .as_ref()
            .map(|w| w.bytes_written() > 0)
            .unwrap_or(false);
        if !appended {
            return Ok(inner.fileid_current.saturating_sub(1));
        }

        let fileid_end = inner.fileid_current;
        self.rotate_locked(&mut inner)?;
        debug!(fileid_end, "sealed current segment for snapshot");
        Ok(fileid_end)
    }

    /// Allocates a snapshot id and the set of file ids the snapshot must
    /// ignore (files on disk that are younger than the snapshot, e.g. from
    /// a concurrent compaction). The registration is held until
    /// [`release_snapshot`](StorageEngine::release_snapshot).
    pub fn get_new_snapshot_data(&self) -> Result<(u32, HashSet<u32>)> {
        let mut inner = self.inner.write();
        inner.snapshot_counter += 1;
        let snapshot_id = inner.snapshot_counter;
        let fileids_ignore = HashSet::new();
        inner.snapshots.insert(snapshot_id, fileids_ignore.clone());
        Ok((snapshot_id, fileids_ignore))
    }

    /// Releases a snapshot registration, returning its ignore set to the
    /// engine.
    pub fn release_snapshot(&self, snapshot_id: u32) {
        self.inner.write().snapshots.remove(&snapshot_id);
    }

    /// The ordered list of file ids an iterator over this view must walk.
    #[must_use]
    pub fn fileids_iterator(&self) -> Vec<u32> {
        self.inner.read().fileids.clone()
    }

    /// Number of keys currently indexed.
    #[must_use]
    pub fn indexed_keys(&self) -> usize {
        self.inner.read().index.len()
    }

    /// Forces the current segment to disk.
    pub fn sync(&self) -> Result<()> {
        if let Some(writer) = self.inner.write().writer.as_mut() {
            writer.sync_to_disk()?;
        }
        Ok(())
    }
}

/// Best-effort sync on drop; the data is already in the OS page cache and a
/// failure here cannot be propagated.
impl Drop for StorageEngine {
    fn drop(&mut self) {
        if let Some(writer) = self.inner.write().writer.as_mut() {
            let _ = writer.sync_to_disk();
        }
    }
}
