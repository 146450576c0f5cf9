use super::helpers::{chunked_options, engine_record, entry_crc, open_db};
use crate::{CompressionType, Db, Error, Options, ReadOptions, WriteOptions};
use bytes::Bytes;
use storage::Record;

// --------------------- whole-value puts ---------------------

#[test]
fn put_and_get_roundtrip() {
    let (_dir, db) = open_db(Options::default());
    let wo = WriteOptions::default();
    let ro = ReadOptions::default();

    db.put(&wo, b"name", Bytes::from_static(b"alice")).unwrap();
    assert_eq!(db.get(&ro, b"name").unwrap(), b"alice");
}

#[test]
fn overwrite_returns_newest_value() {
    let (_dir, db) = open_db(Options::default());
    let wo = WriteOptions::default();
    let ro = ReadOptions::default();

    db.put(&wo, b"k", Bytes::from_static(b"v1")).unwrap();
    db.put(&wo, b"k", Bytes::from_static(b"v2")).unwrap();
    assert_eq!(db.get(&ro, b"k").unwrap(), b"v2");
}

#[test]
fn empty_value_roundtrip() {
    let (_dir, db) = open_db(Options::default());
    db.put(&WriteOptions::default(), b"k", Bytes::new()).unwrap();
    assert_eq!(db.get(&ReadOptions::default(), b"k").unwrap(), b"");
}

// --------------------- the oversize splitter ---------------------

#[test]
fn oversize_value_splits_into_max_sized_chunks() {
    // Chunk size 4 and a 7-byte value: the splitter must submit chunks of
    // 4 and 3 bytes at offsets 0 and 4, and the reassembled value must
    // round-trip.
    let (_dir, db) = open_db(chunked_options(4, CompressionType::None));
    let wo = WriteOptions::default();
    let ro = ReadOptions::default();

    db.put(&wo, b"k", Bytes::from_static(b"abcdefg")).unwrap();
    assert_eq!(db.get(&ro, b"k").unwrap(), b"abcdefg");

    // The entry reaches the engine uncompressed, with the sentinel
    // compressed size and the CRC over key || value.
    db.flush().unwrap();
    match engine_record(&db, b"k").unwrap() {
        Record::Put {
            size_value,
            size_value_compressed,
            crc32,
            data,
            ..
        } => {
            assert_eq!(size_value, 7);
            assert_eq!(size_value_compressed, 0);
            assert_eq!(data, b"abcdefg");
            assert_eq!(crc32, entry_crc(b"k", b"abcdefg"));
        }
        other => panic!("expected put record, got {:?}", other),
    }
}

#[test]
fn manual_chunk_stream_roundtrip() {
    let (_dir, db) = open_db(chunked_options(4, CompressionType::None));
    let wo = WriteOptions::default();
    let ro = ReadOptions::default();

    db.put_chunk(&wo, b"k", Bytes::from_static(b"abcd"), 0, 7).unwrap();
    db.put_chunk(&wo, b"k", Bytes::from_static(b"efg"), 4, 7).unwrap();
    assert_eq!(db.get(&ro, b"k").unwrap(), b"abcdefg");
}

#[test]
fn large_value_many_chunks_roundtrip() {
    let (_dir, db) = open_db(chunked_options(1024, CompressionType::None));
    let value: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

    db.put(&WriteOptions::default(), b"big", Bytes::from(value.clone())).unwrap();
    assert_eq!(db.get(&ReadOptions::default(), b"big").unwrap(), value);
}

// --------------------- ill-formed chunk streams ---------------------

#[test]
fn chunk_past_declared_size_is_rejected() {
    let (_dir, db) = open_db(Options::default());
    let err = db
        .put_chunk(&WriteOptions::default(), b"k", Bytes::from_static(b"abcdef"), 0, 4)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn chunk_without_first_chunk_is_rejected() {
    let (_dir, db) = open_db(chunked_options(8, CompressionType::None));
    let err = db
        .put_chunk(&WriteOptions::default(), b"k", Bytes::from_static(b"late"), 4, 8)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn empty_chunk_for_nonempty_value_is_rejected() {
    let (_dir, db) = open_db(Options::default());
    let err = db
        .put_chunk(&WriteOptions::default(), b"k", Bytes::new(), 0, 10)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
}

// --------------------- delete ---------------------

#[test]
fn delete_then_get_is_not_found() {
    let (_dir, db) = open_db(Options::default());
    let wo = WriteOptions::default();
    let ro = ReadOptions::default();

    db.put(&wo, b"k", Bytes::from_static(b"v")).unwrap();
    db.delete(&wo, b"k").unwrap();
    assert!(db.get(&ro, b"k").unwrap_err().is_not_found());
}

#[test]
fn delete_of_missing_key_is_accepted() {
    let (_dir, db) = open_db(Options::default());
    db.delete(&WriteOptions::default(), b"ghost").unwrap();
    assert!(db.get(&ReadOptions::default(), b"ghost").unwrap_err().is_not_found());
}

// --------------------- flush policy and durability ---------------------

#[test]
fn auto_flush_when_buffer_threshold_reached() {
    let options = Options {
        write_buffer_size: 64,
        compression: CompressionType::None,
        ..Options::default()
    };
    let (_dir, db) = open_db(options);
    let wo = WriteOptions::default();

    db.put(&wo, b"k", Bytes::from(vec![b'x'; 256])).unwrap();
    // The threshold was crossed, so the entry already reached the engine.
    assert_eq!(db.buffer().len(), 0);
    assert!(engine_record(&db, b"k").is_some());
}

#[test]
fn sync_write_reaches_engine_immediately() {
    let (_dir, db) = open_db(Options::default());
    let wo = WriteOptions { sync: true };

    db.put(&wo, b"k", Bytes::from_static(b"durable")).unwrap();
    assert!(engine_record(&db, b"k").is_some());
}

#[test]
fn multi_megabyte_value_does_not_poison_the_database() {
    // An 8 MiB value flows through the chunk pipeline, the buffer, and one
    // large engine record; it must round-trip and leave the database fully
    // writable afterwards.
    let (_dir, db) = open_db(Options {
        compression: CompressionType::None,
        ..Options::default()
    });
    let wo = WriteOptions::default();
    let ro = ReadOptions::default();

    let value: Vec<u8> = (0..8 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    db.put(&wo, b"huge", Bytes::from(value.clone())).unwrap();
    db.flush().unwrap();
    assert_eq!(db.get(&ro, b"huge").unwrap(), value);

    db.put(&wo, b"after", Bytes::from_static(b"still writable")).unwrap();
    db.flush().unwrap();
    assert_eq!(db.get(&ro, b"after").unwrap(), b"still writable");
}

#[test]
fn values_survive_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    {
        let db = Db::open(dir.path(), Options::default()).unwrap();
        let wo = WriteOptions::default();
        db.put(&wo, b"a", Bytes::from_static(b"1")).unwrap();
        db.put(&wo, b"b", Bytes::from_static(b"2")).unwrap();
        db.delete(&wo, b"a").unwrap();
        db.close().unwrap();
    }

    let db = Db::open(dir.path(), Options::default()).unwrap();
    let ro = ReadOptions::default();
    assert!(db.get(&ro, b"a").unwrap_err().is_not_found());
    assert_eq!(db.get(&ro, b"b").unwrap(), b"2");
}

// --------------------- closed database ---------------------

#[test]
fn closed_database_rejects_every_operation() {
    let (_dir, db) = open_db(Options::default());
    let wo = WriteOptions::default();
    let ro = ReadOptions::default();

    db.put(&wo, b"k", Bytes::from_static(b"v")).unwrap();
    db.close().unwrap();

    let assert_closed = |err: Error| {
        assert!(err.to_string().contains("database is not open"), "{}", err);
    };
    assert_closed(db.put(&wo, b"k", Bytes::from_static(b"v2")).unwrap_err());
    assert_closed(db.get(&ro, b"k").unwrap_err());
    assert_closed(db.delete(&wo, b"k").unwrap_err());
    assert_closed(db.new_snapshot().unwrap_err());
    assert_closed(db.new_iterator(&ro).unwrap_err());
    assert_closed(db.flush().unwrap_err());

    // close() is idempotent.
    db.close().unwrap();
}
