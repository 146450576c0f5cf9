///! # CLI - CascadeKV Interactive Shell
///!
///! A REPL-style command-line interface for the CascadeKV store. Reads
///! commands from stdin, executes them against a database handle, and
///! prints results to stdout. Designed for both interactive use and
///! scripted testing (pipe commands via stdin).
///!
///! ## Commands
///!
///! ```text
///! SET key value      Insert or update a key-value pair
///! SETN key size      Stream the next `size` raw bytes from stdin into the
///!                    value via chunked puts
///! GET key            Look up a key (prints value or "(nil)")
///! DEL key            Delete a key (buffers a tombstone)
///! SCAN               List live entries (from the pinned snapshot if set)
///! SNAPSHOT           Pin a point-in-time snapshot; SCAN reads from it
///!                    until the next SNAPSHOT
///! FLUSH              Drain the write buffer into the storage engine
///! STATS              Print database debug info
///! EXIT / QUIT        Shut down gracefully
///! ```
///!
///! ## Configuration
///!
///! All settings are controlled via environment variables:
///!
///! ```text
///! CASCADE_DIR          Data directory              (default: "data/cascade")
///! CASCADE_CHUNK_KB     Maximum chunk size in KiB   (default: 1024 = 1 MiB)
///! CASCADE_COMPRESSION  "lz4" or "none"             (default: "lz4")
///! CASCADE_BUFFER_KB    Write buffer size in KiB    (default: 4096 = 4 MiB)
///! CASCADE_SYNC         fsync every segment append  (default: "false")
///! ```

use anyhow::Result;
use bytes::Bytes;
use db::{CompressionType, Db, Options, ReadOptions, Snapshot, WriteOptions};
use std::io::{self, BufRead, Read, Write};

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Streams `size_value` bytes from `input` into the database as a sequence
/// of chunked puts, `maximum_chunk_size` bytes at a time.
fn stream_value<R: Read>(
    database: &Db,
    write_options: &WriteOptions,
    key: &[u8],
    size_value: u64,
    input: &mut R,
    maximum_chunk_size: u64,
) -> Result<()> {
    if size_value == 0 {
        database.put_chunk(write_options, key, Bytes::new(), 0, 0)?;
        return Ok(());
    }

    let mut buf = vec![0u8; usize::min(maximum_chunk_size as usize, 1024 * 1024)];
    let mut offset = 0u64;
    while offset < size_value {
        let n = usize::min(buf.len(), (size_value - offset) as usize);
        input.read_exact(&mut buf[..n])?;
        database.put_chunk(
            write_options,
            key,
            Bytes::copy_from_slice(&buf[..n]),
            offset,
            size_value,
        )?;
        offset += n as u64;
    }
    Ok(())
}

fn print_entries(iter: db::SnapshotIterator) {
    let mut count = 0usize;
    for entry in iter {
        match entry {
            Ok((k, v)) => {
                println!(
                    "{} -> {}",
                    String::from_utf8_lossy(&k),
                    String::from_utf8_lossy(&v)
                );
                count += 1;
            }
            Err(e) => {
                println!("ERR iteration failed: {}", e);
                return;
            }
        }
    }
    if count == 0 {
        println!("(empty)");
    } else {
        println!("({} entries)", count);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let dir = env_or("CASCADE_DIR", "data/cascade");
    let chunk_kb: u64 = env_or("CASCADE_CHUNK_KB", "1024").parse().unwrap_or(1024);
    let compression: CompressionType = env_or("CASCADE_COMPRESSION", "lz4")
        .parse()
        .unwrap_or(CompressionType::Lz4);
    let buffer_kb: usize = env_or("CASCADE_BUFFER_KB", "4096").parse().unwrap_or(4096);
    let sync: bool = env_or("CASCADE_SYNC", "false").parse().unwrap_or(false);

    let maximum_chunk_size = chunk_kb * 1024;
    let options = Options {
        maximum_chunk_size,
        compression,
        write_buffer_size: buffer_kb * 1024,
        sync,
        ..Options::default()
    };
    let database = Db::open(&dir, options)?;
    let ro = ReadOptions::default();
    let wo = WriteOptions::default();
    let mut pinned: Option<Snapshot> = None;

    println!(
        "CascadeKV started (dir={}, chunk={}KiB, compression={:?}, buffer={}KiB, sync={})",
        dir, chunk_kb, compression, buffer_kb, sync
    );
    println!("Commands: SET key value | SETN key size | GET key | DEL key");
    println!("          SCAN | SNAPSHOT | FLUSH | STATS | EXIT");

    let mut input = io::stdin().lock();
    let mut line = String::new();

    loop {
        print!("> ");
        io::stdout().flush().ok();

        line.clear();
        if input.read_line(&mut line)? == 0 {
            break; // EOF
        }
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else {
            continue;
        };

        match cmd.to_uppercase().as_str() {
            "SET" => {
                if let Some(k) = parts.next() {
                    let v: String = parts.collect::<Vec<&str>>().join(" ");
                    if v.is_empty() {
                        println!("ERR usage: SET key value");
                    } else {
                        match database.put(&wo, k.as_bytes(), Bytes::from(v.into_bytes())) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR set failed: {}", e),
                        }
                    }
                } else {
                    println!("ERR usage: SET key value");
                }
            }
            "SETN" => {
                match (parts.next(), parts.next().and_then(|s| s.parse::<u64>().ok())) {
                    (Some(k), Some(size_value)) => {
                        let key = k.as_bytes().to_vec();
                        match stream_value(
                            &database,
                            &wo,
                            &key,
                            size_value,
                            &mut input,
                            maximum_chunk_size,
                        ) {
                            Ok(()) => println!("OK ({} bytes)", size_value),
                            Err(e) => println!("ERR setn failed: {}", e),
                        }
                    }
                    _ => println!("ERR usage: SETN key size"),
                }
            }
            "GET" => {
                if let Some(k) = parts.next() {
                    match database.get(&ro, k.as_bytes()) {
                        Ok(v) => println!("{}", String::from_utf8_lossy(&v)),
                        Err(e) if e.is_not_found() => println!("(nil)"),
                        Err(e) => println!("ERR read failed: {}", e),
                    }
                } else {
                    println!("ERR usage: GET key");
                }
            }
            "DEL" => {
                if let Some(k) = parts.next() {
                    match database.delete(&wo, k.as_bytes()) {
                        Ok(()) => println!("OK"),
                        Err(e) => println!("ERR del failed: {}", e),
                    }
                } else {
                    println!("ERR usage: DEL key");
                }
            }
            "SCAN" => match &pinned {
                Some(snapshot) => print_entries(snapshot.iter(&ro)),
                None => match database.new_iterator(&ro) {
                    Ok(iter) => print_entries(iter),
                    Err(e) => println!("ERR scan failed: {}", e),
                },
            },
            "SNAPSHOT" => match database.new_snapshot() {
                Ok(snapshot) => {
                    println!("OK snapshot {} pinned", snapshot.id());
                    pinned = Some(snapshot);
                }
                Err(e) => println!("ERR snapshot failed: {}", e),
            },
            "FLUSH" => match database.flush() {
                Ok(()) => println!("OK"),
                Err(e) => println!("ERR flush failed: {}", e),
            },
            "STATS" => {
                println!("{:?}", database);
                if let Some(snapshot) = &pinned {
                    println!("pinned snapshot: {}", snapshot.id());
                }
            }
            "EXIT" | "QUIT" => {
                database.close()?;
                println!("bye");
                break;
            }
            other => {
                println!("unknown command: {}", other);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::stream_value;
    use db::{CompressionType, Db, Options, ReadOptions, WriteOptions};
    use std::io::Cursor;

    fn tiny_chunk_db(dir: &std::path::Path) -> Db {
        Db::open(
            dir,
            Options {
                maximum_chunk_size: 4,
                compression: CompressionType::None,
                ..Options::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn stream_value_chunks_from_reader() {
        let dir = tempfile::tempdir().unwrap();
        let database = tiny_chunk_db(dir.path());

        let mut input = Cursor::new(b"abcdefg".to_vec());
        stream_value(&database, &WriteOptions::default(), b"k", 7, &mut input, 4).unwrap();

        assert_eq!(
            database.get(&ReadOptions::default(), b"k").unwrap(),
            b"abcdefg"
        );
    }

    #[test]
    fn stream_value_leaves_trailing_bytes_unread() {
        let dir = tempfile::tempdir().unwrap();
        let database = tiny_chunk_db(dir.path());

        let mut input = Cursor::new(b"payload-rest".to_vec());
        stream_value(&database, &WriteOptions::default(), b"k", 7, &mut input, 4).unwrap();

        assert_eq!(database.get(&ReadOptions::default(), b"k").unwrap(), b"payload");
        assert_eq!(input.position(), 7);
    }

    #[test]
    fn stream_value_empty_payload() {
        let dir = tempfile::tempdir().unwrap();
        let database = tiny_chunk_db(dir.path());

        let mut input = Cursor::new(Vec::new());
        stream_value(&database, &WriteOptions::default(), b"k", 0, &mut input, 4).unwrap();

        assert_eq!(database.get(&ReadOptions::default(), b"k").unwrap(), b"");
    }

    #[test]
    fn stream_value_truncated_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let database = tiny_chunk_db(dir.path());

        let mut input = Cursor::new(b"ab".to_vec());
        assert!(
            stream_value(&database, &WriteOptions::default(), b"k", 10, &mut input, 4).is_err()
        );
        // The entry never completed, so nothing is visible.
        assert!(database
            .get(&ReadOptions::default(), b"k")
            .unwrap_err()
            .is_not_found());
    }
}
