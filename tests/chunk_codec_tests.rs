//! Integration tests for the chunk codec as seen by storage and readers.

use std::sync::Arc;
use std::thread;

use tsquery::encoding::{Appender, Chunk, Encoding, CHUNK_HEADER_LEN};
use tsquery::partition::EncodedChunk;
use tsquery::series::SeriesIterator;
use tsquery::types::SampleValue;
use tsquery::DbError;

fn numeric_chunk(n: i64) -> Appender {
    let mut app = Appender::new(Encoding::Xor);
    for i in 0..n {
        app.append(i * 1000, (i as f64) * 0.5);
    }
    app
}

#[test]
fn numeric_samples_survive_encode_decode() {
    let app = numeric_chunk(500);
    let chunk = Chunk::from_data(Encoding::Xor, app.bytes(), 500).unwrap();
    assert_eq!(chunk.len(), 500);

    let mut it = chunk.iterator();
    let mut i = 0i64;
    while it.next() {
        let (t, v) = it.at();
        assert_eq!(t, i * 1000);
        assert_eq!(v, SampleValue::Float((i as f64) * 0.5));
        i += 1;
    }
    assert_eq!(i, 500);
    assert!(it.err().is_none());
}

#[test]
fn bytes_can_be_taken_while_appending() {
    let mut app = Appender::new(Encoding::Var);
    app.append(1, "a");
    let early = app.bytes().to_vec();
    app.append(2, "bb");
    let late = app.bytes().to_vec();

    assert_eq!(Chunk::from_data(Encoding::Var, &early, 1).unwrap().len(), 1);
    assert_eq!(Chunk::from_data(Encoding::Var, &late, 2).unwrap().len(), 2);
    // Only the header count changes; earlier records are untouched.
    assert_eq!(&late[CHUNK_HEADER_LEN..early.len()], &early[CHUNK_HEADER_LEN..]);
}

#[test]
fn stored_sample_count_is_checked() {
    let app = numeric_chunk(3);
    let stored = EncodedChunk {
        encoding: Encoding::Xor,
        bytes: app.bytes().to_vec(),
        samples: 4,
    };
    assert!(matches!(stored.decode(), Err(DbError::Decode(_))));

    let unknown = EncodedChunk { samples: 0, ..stored };
    assert_eq!(unknown.decode().unwrap().len(), 3);
}

#[test]
fn every_truncation_is_rejected() {
    let mut app = Appender::new(Encoding::Var);
    app.append(10, "hello");
    app.append(20, "world");
    let bytes = app.bytes();
    for cut in 0..bytes.len() {
        let err = Chunk::from_data(Encoding::Var, &bytes[..cut], 0).unwrap_err();
        assert!(matches!(err, DbError::Decode(_)), "cut at {}", cut);
    }
}

#[test]
fn decoded_chunk_is_shared_across_reader_threads() {
    let chunk = Arc::new(numeric_chunk(1000).finish().unwrap());
    let handles: Vec<_> = (0..4)
        .map(|k| {
            let chunk = Arc::clone(&chunk);
            thread::spawn(move || {
                let mut it = chunk.iterator();
                let target = k * 250_000;
                assert!(it.seek(target));
                let mut seen = 0;
                loop {
                    seen += 1;
                    if !it.next() {
                        break;
                    }
                }
                seen
            })
        })
        .collect();
    let seen: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(seen, vec![1000, 750, 500, 250]);
}

#[test]
fn seek_past_the_end_exhausts_the_iterator() {
    let chunk = numeric_chunk(10).finish().unwrap();
    let mut it = chunk.iterator();
    assert!(!it.seek(1_000_000));
    assert!(!it.next());
    assert!(!it.seek(0));
    assert!(it.err().is_none());
}

#[test]
fn kind_mismatch_between_storage_and_blob_fails() {
    let stored = EncodedChunk {
        encoding: Encoding::Var,
        bytes: numeric_chunk(2).bytes().to_vec(),
        samples: 2,
    };
    let err = stored.decode().unwrap_err();
    assert!(err.to_string().contains("cannot be read as"));
}
