//! Chunk codec: incremental appenders producing compact byte buffers, and random-access
//! decoded chunks with a raw forward iterator.

use crate::error::DbError;
use crate::series::SeriesIterator;
use crate::types::{SampleValue, Timestamp, Value};

use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};

// --- Public API ---

/// Value kind of a chunk. A chunk is homogeneous: every sample has the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Fixed-width 64-bit floats; "no data" is stored as NaN, never as a missing record.
    Xor,
    /// Length-prefixed UTF-8 payloads.
    Var,
}

impl Encoding {
    fn tag(self) -> u8 {
        match self {
            Encoding::Xor => ENC_TAG_XOR,
            Encoding::Var => ENC_TAG_VAR,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            ENC_TAG_XOR => Some(Encoding::Xor),
            ENC_TAG_VAR => Some(Encoding::Var),
            _ => None,
        }
    }
}

const ENC_TAG_XOR: u8 = 1;
const ENC_TAG_VAR: u8 = 2;

/// Chunk header: encoding tag (1 byte) + sample count (u32 LE).
pub const CHUNK_HEADER_LEN: usize = 1 + 4;
const XOR_RECORD_LEN: usize = 8 + 8;
// Timestamp + a single varint byte for an empty payload.
const VAR_MIN_RECORD_LEN: usize = 8 + 1;

/// Exclusive builder for one chunk.
///
/// Samples must be appended in non-decreasing timestamp order; the appender never
/// reorders. A sample whose value kind does not match the chunk encoding is
/// converted: text appended to a numeric chunk is parsed as a float (NaN when it
/// does not parse), floats appended to a string chunk are stored in their shortest
/// round-trip decimal form.
#[derive(Debug, Clone)]
pub struct Appender {
    encoding: Encoding,
    buf: Vec<u8>,
    count: u32,
}

impl Appender {
    pub fn new(encoding: Encoding) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.push(encoding.tag());
        write_u32(&mut buf, 0);
        Self {
            encoding,
            buf,
            count: 0,
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Appends one sample.
    pub fn append<'a>(&mut self, t: Timestamp, value: impl Into<SampleValue<'a>>) {
        let value = value.into();
        write_i64(&mut self.buf, t);
        match (self.encoding, value) {
            (Encoding::Xor, SampleValue::Float(v)) => write_f64(&mut self.buf, v),
            (Encoding::Xor, SampleValue::Text(s)) => {
                write_f64(&mut self.buf, s.trim().parse::<Value>().unwrap_or(f64::NAN))
            }
            (Encoding::Var, SampleValue::Text(s)) => write_payload(&mut self.buf, s.as_bytes()),
            (Encoding::Var, SampleValue::Float(v)) => {
                write_payload(&mut self.buf, v.to_string().as_bytes())
            }
        }
        self.count = self.count.saturating_add(1);
        self.buf[1..CHUNK_HEADER_LEN].copy_from_slice(&self.count.to_le_bytes());
    }

    /// Serialized form of everything appended so far. Repeatable and side-effect free.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Seals the appender into a decoded chunk.
    pub fn finish(self) -> Result<Chunk, DbError> {
        Chunk::from_data(self.encoding, &self.buf, 0)
    }
}

/// Decoded, immutable chunk. Shareable across threads for concurrent reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    encoding: Encoding,
    bytes: Vec<u8>,
    timestamps: Vec<Timestamp>,
    values: ChunkValues,
}

#[derive(Debug, Clone, PartialEq)]
enum ChunkValues {
    Float(Vec<Value>),
    Text(Vec<String>),
}

impl Chunk {
    /// Parses `data` as a chunk of the stated `encoding`.
    ///
    /// `expected_samples` is the sample count recorded by the storage layer next to the
    /// blob; 0 means unknown and skips the check.
    pub fn from_data(
        encoding: Encoding,
        data: &[u8],
        expected_samples: u16,
    ) -> Result<Self, DbError> {
        if data.len() < CHUNK_HEADER_LEN {
            return Err(DbError::Decode(format!(
                "chunk of {} bytes is shorter than its {} byte header",
                data.len(),
                CHUNK_HEADER_LEN
            )));
        }
        let actual = Encoding::from_tag(data[0])
            .ok_or_else(|| DbError::Decode(format!("unknown chunk encoding tag {}", data[0])))?;
        if actual != encoding {
            return Err(DbError::Decode(format!(
                "chunk encoded as {:?} cannot be read as {:?}",
                actual, encoding
            )));
        }

        let mut cur = Cursor::new(&data[1..]);
        let count = read_u32(&mut cur)? as usize;
        if expected_samples != 0 && count != expected_samples as usize {
            return Err(DbError::Decode(format!(
                "chunk header holds {} samples, storage recorded {}",
                count, expected_samples
            )));
        }
        let min_record = match encoding {
            Encoding::Xor => XOR_RECORD_LEN,
            Encoding::Var => VAR_MIN_RECORD_LEN,
        };
        let body_len = data.len() - CHUNK_HEADER_LEN;
        if count.checked_mul(min_record).unwrap_or(usize::MAX) > body_len {
            return Err(DbError::Decode(format!(
                "truncated chunk: {} samples cannot fit in {} bytes",
                count, body_len
            )));
        }

        let mut timestamps = Vec::with_capacity(count);
        let values = match encoding {
            Encoding::Xor => {
                let mut vals = Vec::with_capacity(count);
                for _ in 0..count {
                    timestamps.push(read_i64(&mut cur)?);
                    vals.push(f64::from_bits(read_u64(&mut cur)?));
                }
                ChunkValues::Float(vals)
            }
            Encoding::Var => {
                let mut vals = Vec::with_capacity(count);
                for _ in 0..count {
                    timestamps.push(read_i64(&mut cur)?);
                    vals.push(read_payload(&mut cur)?);
                }
                ChunkValues::Text(vals)
            }
        };

        let consumed = cur.position() as usize;
        if consumed != data.len() - 1 {
            return Err(DbError::Decode(format!(
                "{} trailing bytes after the last sample",
                data.len() - 1 - consumed
            )));
        }
        if let Some(i) = timestamps.windows(2).position(|w| w[1] < w[0]) {
            return Err(DbError::Decode(format!(
                "timestamps out of order at sample {}: {} < {}",
                i + 1,
                timestamps[i + 1],
                timestamps[i]
            )));
        }

        Ok(Self {
            encoding,
            bytes: data.to_vec(),
            timestamps,
            values,
        })
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Random access to the `i`-th sample.
    pub fn sample_at(&self, i: usize) -> Option<(Timestamp, SampleValue<'_>)> {
        let t = *self.timestamps.get(i)?;
        let v = match &self.values {
            ChunkValues::Float(vals) => SampleValue::Float(*vals.get(i)?),
            ChunkValues::Text(vals) => SampleValue::Text(vals.get(i)?.as_str()),
        };
        Some((t, v))
    }

    /// Fresh iterator positioned before the first sample.
    pub fn iterator(&self) -> ChunkIterator<'_> {
        ChunkIterator {
            chunk: self,
            cursor: None,
        }
    }
}

/// Raw forward cursor over a decoded chunk. Visits every sample in stored order.
#[derive(Debug, Clone)]
pub struct ChunkIterator<'a> {
    chunk: &'a Chunk,
    cursor: Option<usize>,
}

impl SeriesIterator for ChunkIterator<'_> {
    fn seek(&mut self, t: Timestamp) -> bool {
        if let Some(c) = self.cursor {
            if c < self.chunk.len() && self.chunk.timestamps[c] >= t {
                return true;
            }
        }
        while self.next() {
            if self.at().0 >= t {
                return true;
            }
        }
        false
    }

    fn next(&mut self) -> bool {
        let len = self.chunk.len();
        let n = self.cursor.map_or(0, |c| c.saturating_add(1)).min(len);
        self.cursor = Some(n);
        n < len
    }

    fn at(&self) -> (Timestamp, SampleValue<'_>) {
        self.cursor
            .and_then(|c| self.chunk.sample_at(c))
            .unwrap_or((Timestamp::MIN, SampleValue::Float(f64::NAN)))
    }

    fn err(&self) -> Option<&DbError> {
        // Chunks are fully validated by `from_data`; nothing can fail mid-iteration.
        None
    }
}

// --- Helpers (binary, varint) ---

pub fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}
pub fn write_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}
pub fn write_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_bits().to_le_bytes());
}

fn write_payload(buf: &mut Vec<u8>, payload: &[u8]) {
    write_var_u64(buf, payload.len() as u64);
    buf.extend_from_slice(payload);
}

fn truncated(e: std::io::Error) -> DbError {
    DbError::Decode(format!("truncated chunk record: {}", e))
}

pub fn read_u32<R: Read>(r: &mut R) -> Result<u32, DbError> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b).map_err(truncated)?;
    Ok(u32::from_le_bytes(b))
}
pub fn read_u64<R: Read>(r: &mut R) -> Result<u64, DbError> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b).map_err(truncated)?;
    Ok(u64::from_le_bytes(b))
}
pub fn read_i64<R: Read>(r: &mut R) -> Result<i64, DbError> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b).map_err(truncated)?;
    Ok(i64::from_le_bytes(b))
}

fn read_payload(cur: &mut Cursor<&[u8]>) -> Result<String, DbError> {
    let n = read_var_u64(cur).map_err(DbError::Decode)?;
    let remaining = (cur.get_ref().len() as u64).saturating_sub(cur.position());
    if n > remaining {
        return Err(DbError::Decode(format!(
            "payload length {} exceeds the {} remaining bytes",
            n, remaining
        )));
    }
    let mut b = vec![0u8; n as usize];
    cur.read_exact(&mut b).map_err(truncated)?;
    String::from_utf8(b).map_err(|e| DbError::Decode(format!("invalid UTF-8 payload: {}", e)))
}

fn write_var_u64(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

fn read_var_u64<R: Read>(r: &mut R) -> Result<u64, String> {
    let mut out: u64 = 0;
    let mut shift: u32 = 0;
    for _ in 0..10 {
        let mut b = [0u8; 1];
        r.read_exact(&mut b)
            .map_err(|e| format!("Truncated varint: {}", e))?;
        let byte = b[0];
        out |= ((byte & 0x7F) as u64) << shift;
        if (byte & 0x80) == 0 {
            return Ok(out);
        }
        shift = shift.saturating_add(7);
    }
    Err("Varint too long".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_chunk(list: &[&str], t0: Timestamp) -> Appender {
        let mut app = Appender::new(Encoding::Var);
        for (i, s) in list.iter().enumerate() {
            app.append(t0 + (i as i64) * 1000, *s);
        }
        app
    }

    #[test]
    fn string_chunk_roundtrip_preserves_empty_payload() {
        let list = ["abc", "", "123456"];
        let t0 = 1_700_000_000_000;
        let app = string_chunk(&list, t0);

        let chunk = Chunk::from_data(Encoding::Var, app.bytes(), 0).expect("decode");
        let mut it = chunk.iterator();
        let mut i = 0;
        while it.next() {
            let (t, v) = it.at();
            assert_eq!(t, t0 + (i as i64) * 1000);
            assert_eq!(v.as_str(), Some(list[i]));
            i += 1;
        }
        assert!(it.err().is_none());
        assert_eq!(i, list.len());
    }

    #[test]
    fn bytes_is_idempotent_and_tracks_appends() {
        let mut app = Appender::new(Encoding::Xor);
        app.append(10, 1.5);
        let first = app.bytes().to_vec();
        assert_eq!(app.bytes(), first.as_slice());
        assert_eq!(app.bytes(), first.as_slice());

        app.append(20, 2.5);
        assert_eq!(app.bytes().len(), first.len() + XOR_RECORD_LEN);
        let chunk = Chunk::from_data(Encoding::Xor, app.bytes(), 2).expect("decode");
        assert_eq!(chunk.len(), 2);
    }

    #[test]
    fn nan_is_stored_bit_exact() {
        let mut app = Appender::new(Encoding::Xor);
        app.append(1, f64::NAN);
        app.append(2, 3.0);
        let chunk = app.finish().expect("finish");
        let (t, v) = chunk.sample_at(0).expect("sample");
        assert_eq!(t, 1);
        assert!(v.as_f64().is_nan());
        assert_eq!(chunk.sample_at(1), Some((2, SampleValue::Float(3.0))));
        assert_eq!(chunk.sample_at(2), None);
    }

    #[test]
    fn duplicate_timestamps_are_kept_in_append_order() {
        let mut app = Appender::new(Encoding::Var);
        app.append(5, "first");
        app.append(5, "second");
        let chunk = app.finish().expect("finish");
        let mut it = chunk.iterator();
        assert!(it.next());
        assert_eq!(it.at().1.as_str(), Some("first"));
        assert!(it.next());
        assert_eq!(it.at().1.as_str(), Some("second"));
        assert!(!it.next());
    }

    #[test]
    fn mismatched_values_are_converted() {
        let mut app = Appender::new(Encoding::Xor);
        app.append(1, "2.5");
        app.append(2, "not a number");
        let chunk = app.finish().expect("finish");
        assert_eq!(chunk.sample_at(0).map(|(_, v)| v.as_f64()), Some(2.5));
        assert!(chunk.sample_at(1).map(|(_, v)| v.as_f64().is_nan()).unwrap_or(false));

        let mut app = Appender::new(Encoding::Var);
        app.append(1, 0.1);
        let chunk = app.finish().expect("finish");
        assert_eq!(chunk.sample_at(0).and_then(|(_, v)| v.as_str()), Some("0.1"));
    }

    #[test]
    fn decode_rejects_kind_mismatch() {
        let app = string_chunk(&["a"], 0);
        let err = Chunk::from_data(Encoding::Xor, app.bytes(), 0).unwrap_err();
        assert!(matches!(err, DbError::Decode(ref d) if d.contains("cannot be read as")));
    }

    #[test]
    fn decode_rejects_truncation_and_bad_lengths() {
        let app = string_chunk(&["abcdef", "xyz"], 0);
        let bytes = app.bytes();

        assert!(matches!(
            Chunk::from_data(Encoding::Var, &bytes[..3], 0),
            Err(DbError::Decode(_))
        ));
        assert!(matches!(
            Chunk::from_data(Encoding::Var, &bytes[..bytes.len() - 1], 0),
            Err(DbError::Decode(_))
        ));

        // Inflate the first payload length beyond the buffer.
        let mut corrupt = bytes.to_vec();
        corrupt[CHUNK_HEADER_LEN + 8] = 0x7F;
        let err = Chunk::from_data(Encoding::Var, &corrupt, 0).unwrap_err();
        assert!(matches!(err, DbError::Decode(_)), "got {err:?}");

        let mut trailing = bytes.to_vec();
        trailing.push(0);
        let err = Chunk::from_data(Encoding::Var, &trailing, 0).unwrap_err();
        assert!(matches!(err, DbError::Decode(ref d) if d.contains("trailing")));
    }

    #[test]
    fn decode_rejects_sample_count_mismatch() {
        let app = string_chunk(&["a", "b"], 0);
        assert!(Chunk::from_data(Encoding::Var, app.bytes(), 2).is_ok());
        assert!(matches!(
            Chunk::from_data(Encoding::Var, app.bytes(), 3),
            Err(DbError::Decode(_))
        ));
    }

    #[test]
    fn out_of_order_appends_surface_on_decode() {
        let mut app = Appender::new(Encoding::Xor);
        app.append(20, 1.0);
        app.append(10, 2.0);
        assert!(matches!(app.finish(), Err(DbError::Decode(ref d)) if d.contains("out of order")));
    }

    #[test]
    fn empty_chunk_decodes() {
        let app = Appender::new(Encoding::Xor);
        let chunk = Chunk::from_data(Encoding::Xor, app.bytes(), 0).expect("decode");
        assert!(chunk.is_empty());
        let mut it = chunk.iterator();
        assert!(!it.next());
        assert!(!it.seek(0));
    }

    #[test]
    fn chunk_iterator_seek_moves_forward_only() {
        let mut app = Appender::new(Encoding::Xor);
        for t in [10, 20, 30] {
            app.append(t, t as f64);
        }
        let chunk = app.finish().expect("finish");
        let mut it = chunk.iterator();
        assert!(it.seek(15));
        assert_eq!(it.at().0, 20);
        assert!(it.seek(5));
        assert_eq!(it.at().0, 20);
        assert!(it.seek(30));
        assert_eq!(it.at().0, 30);
        assert!(!it.seek(31));
        assert!(!it.next());
    }
}
