use crate::{CompressionType, Db, Options};
use tempfile::TempDir;

/// Opens a database in a fresh temporary directory.
pub fn open_db(options: Options) -> (TempDir, Db) {
    let dir = TempDir::new().unwrap();
    let db = Db::open(dir.path(), options).unwrap();
    (dir, db)
}

/// Options with a small maximum chunk size, convenient for exercising the
/// splitter without megabyte-sized values.
pub fn chunked_options(maximum_chunk_size: u64, compression: CompressionType) -> Options {
    Options {
        maximum_chunk_size,
        compression,
        ..Options::default()
    }
}

/// The entry checksum the pipeline is expected to produce.
pub fn entry_crc(key: &[u8], on_disk: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(key);
    hasher.update(on_disk);
    hasher.finalize()
}

/// Fetches the newest put record for `key` from the engine's segments.
pub fn engine_record(db: &Db, key: &[u8]) -> Option<storage::Record> {
    let mut found = None;
    for fileid in db.engine().fileids_iterator() {
        let Ok(entries) = db.engine().segment_entries(fileid, true) else {
            continue;
        };
        for (_, record) in entries {
            if record.key() == key {
                found = Some(record);
            }
        }
    }
    found
}
