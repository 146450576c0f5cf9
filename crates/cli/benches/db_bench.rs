use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use db::{Db, Options, ReadOptions, WriteOptions};
use tempfile::tempdir;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn populate(db: &Db) {
    let wo = WriteOptions::default();
    for i in 0..N_KEYS {
        db.put(
            &wo,
            format!("key{}", i).as_bytes(),
            Bytes::from(vec![b'x'; VALUE_SIZE]),
        )
        .unwrap();
    }
    db.flush().unwrap();
}

fn put_benchmark(c: &mut Criterion) {
    c.bench_function("db_put_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = Db::open(dir.path(), Options::default()).unwrap();
                (dir, db)
            },
            |(_dir, db)| {
                populate(&db);
            },
            BatchSize::SmallInput,
        );
    });
}

fn get_hit_benchmark(c: &mut Criterion) {
    c.bench_function("db_get_hit_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = Db::open(dir.path(), Options::default()).unwrap();
                populate(&db);
                (dir, db)
            },
            |(_dir, db)| {
                let ro = ReadOptions::default();
                for i in 0..N_KEYS {
                    let v = db.get(&ro, format!("key{}", i).as_bytes()).unwrap();
                    assert_eq!(v.len(), VALUE_SIZE);
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn get_miss_benchmark(c: &mut Criterion) {
    c.bench_function("db_get_miss_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = Db::open(dir.path(), Options::default()).unwrap();
                populate(&db);
                (dir, db)
            },
            |(_dir, db)| {
                let ro = ReadOptions::default();
                for i in 0..N_KEYS {
                    let r = db.get(&ro, format!("missing{}", i).as_bytes());
                    assert!(r.unwrap_err().is_not_found());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, put_benchmark, get_hit_benchmark, get_miss_benchmark);
criterion_main!(benches);
