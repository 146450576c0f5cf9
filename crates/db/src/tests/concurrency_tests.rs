use super::helpers::{chunked_options, open_db};
use crate::{CompressionType, ReadOptions, WriteOptions};
use bytes::Bytes;

/// 100 distinct keys written from 10 threads, each value split into
/// 3-byte chunks. Every value must round-trip and every stored CRC must
/// verify on the engine read path.
#[test]
fn concurrent_writers_on_distinct_keys() {
    let (_dir, db) = open_db(chunked_options(3, CompressionType::None));

    std::thread::scope(|scope| {
        for t in 0..10u32 {
            let db = &db;
            scope.spawn(move || {
                let wo = WriteOptions::default();
                for i in 0..10u32 {
                    let key = format!("key-{}-{}", t, i).into_bytes();
                    let value = format!("value-{:04}", t * 10 + i).into_bytes();
                    assert_eq!(value.len(), 10);
                    db.put(&wo, &key, Bytes::from(value)).unwrap();
                }
            });
        }
    });

    // Push everything through the engine so reads exercise checksum
    // verification on the persisted records.
    db.flush().unwrap();

    let ro = ReadOptions::default();
    for t in 0..10u32 {
        for i in 0..10u32 {
            let key = format!("key-{}-{}", t, i).into_bytes();
            let expected = format!("value-{:04}", t * 10 + i).into_bytes();
            assert_eq!(db.get(&ro, &key).unwrap(), expected, "key {:?}", key);
        }
    }
}

#[test]
fn concurrent_compressed_writers_roundtrip() {
    let (_dir, db) = open_db(chunked_options(512, CompressionType::Lz4));

    std::thread::scope(|scope| {
        for t in 0..8u32 {
            let db = &db;
            scope.spawn(move || {
                let wo = WriteOptions::default();
                let value: Vec<u8> = format!("payload-{} ", t)
                    .into_bytes()
                    .into_iter()
                    .cycle()
                    .take(4096)
                    .collect();
                let key = format!("writer-{}", t).into_bytes();
                db.put(&wo, &key, Bytes::from(value)).unwrap();
            });
        }
    });

    db.flush().unwrap();

    let ro = ReadOptions::default();
    for t in 0..8u32 {
        let key = format!("writer-{}", t).into_bytes();
        let expected: Vec<u8> = format!("payload-{} ", t)
            .into_bytes()
            .into_iter()
            .cycle()
            .take(4096)
            .collect();
        assert_eq!(db.get(&ro, &key).unwrap(), expected);
    }
}

#[test]
fn concurrent_readers_during_writes() {
    let (_dir, db) = open_db(chunked_options(64, CompressionType::None));
    let wo = WriteOptions::default();

    db.put(&wo, b"stable", Bytes::from_static(b"constant")).unwrap();
    db.flush().unwrap();

    std::thread::scope(|scope| {
        let db_ref = &db;
        scope.spawn(move || {
            let wo = WriteOptions::default();
            for i in 0..200u32 {
                let key = format!("churn-{}", i).into_bytes();
                db_ref.put(&wo, &key, Bytes::from(vec![b'x'; 200])).unwrap();
            }
        });

        for _ in 0..4 {
            scope.spawn(move || {
                let ro = ReadOptions::default();
                for _ in 0..500 {
                    assert_eq!(db_ref.get(&ro, b"stable").unwrap(), b"constant");
                }
            });
        }
    });
}
