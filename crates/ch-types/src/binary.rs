//! Byte-level reads and writes for the native protocol.
//!
//! [`ByteSource`] consumes a stream of arbitrarily-sized chunks and exposes
//! exact reads: single bytes, fixed slices, LEB128 varints, and dense typed
//! arrays. Reads never come up short across chunk boundaries; a clean end
//! of input surfaces as [`Error::StreamComplete`] so the block framing
//! layer can tell "no more blocks" from truncation inside one.
//!
//! [`ByteSink`] is the write-side counterpart over a growable buffer.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Produces the chunks a [`ByteSource`] reads. `Ok(None)` is clean end of
/// stream; an `Err` is surfaced unchanged on the next read (the transport
/// uses this to deliver mid-stream server exceptions).
pub trait ChunkReader: Send {
    fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

struct SliceChunks {
    chunks: std::vec::IntoIter<Bytes>,
}

impl ChunkReader for SliceChunks {
    fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.chunks.next())
    }
}

/// Buffered reader over a [`ChunkReader`].
pub struct ByteSource {
    reader: Box<dyn ChunkReader>,
    chunk: Bytes,
    pos: usize,
    exhausted: bool,
}

impl ByteSource {
    pub fn new(reader: Box<dyn ChunkReader>) -> Self {
        Self {
            reader,
            chunk: Bytes::new(),
            pos: 0,
            exhausted: false,
        }
    }

    /// Source over a single in-memory buffer. Used to decode one value
    /// serialized as a full column (e.g. JSON shared data cells) and in
    /// tests.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::from_chunks(vec![data.into()])
    }

    /// Source over a fixed sequence of chunks.
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        Self::new(Box::new(SliceChunks {
            chunks: chunks.into_iter(),
        }))
    }

    fn remaining(&self) -> usize {
        self.chunk.len() - self.pos
    }

    /// Pulls the next non-empty chunk. Returns false on clean EOF.
    fn refill(&mut self) -> Result<bool> {
        if self.exhausted {
            return Ok(false);
        }
        loop {
            match self.reader.next_chunk()? {
                Some(chunk) if chunk.is_empty() => {}
                Some(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                    return Ok(true);
                }
                None => {
                    self.exhausted = true;
                    return Ok(false);
                }
            }
        }
    }

    /// True when every byte has been consumed and the reader is drained.
    /// Pulls ahead one chunk when the current one is spent.
    pub fn at_end(&mut self) -> Result<bool> {
        if self.remaining() > 0 {
            return Ok(false);
        }
        Ok(!self.refill()?)
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        if self.remaining() == 0 && !self.refill()? {
            return Err(Error::StreamComplete);
        }
        let b = self.chunk[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Reads exactly `n` bytes, concatenating across chunk boundaries.
    /// Zero-copy when the request fits inside the current chunk.
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes> {
        if self.remaining() >= n {
            let out = self.chunk.slice(self.pos..self.pos + n);
            self.pos += n;
            return Ok(out);
        }
        let mut out = BytesMut::with_capacity(n);
        out.extend_from_slice(&self.chunk[self.pos..]);
        self.pos = self.chunk.len();
        while out.len() < n {
            if !self.refill()? {
                return Err(Error::StreamComplete);
            }
            let take = (n - out.len()).min(self.chunk.len());
            out.extend_from_slice(&self.chunk[..take]);
            self.pos = take;
        }
        Ok(out.freeze())
    }

    /// Unsigned little-endian base-128 varint.
    pub fn read_leb128(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let b = self.read_byte()?;
            if shift >= 63 && b > 1 {
                return Err(Error::Data("LEB128 value overflows 64 bits".to_owned()));
            }
            value |= u64::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    /// LEB128 length-prefixed string. Invalid UTF-8 falls back to the hex
    /// rendering of the raw bytes.
    pub fn read_leb128_str(&mut self) -> Result<String> {
        let len = self.read_leb128()? as usize;
        let raw = self.read_bytes(len)?;
        Ok(decode_utf8_or_hex(&raw))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let raw = self.read_bytes(8)?;
        Ok(u64::from_le_bytes(raw.as_ref().try_into().expect("8 bytes")))
    }

    /// Vectorized String column read: `n` LEB128-prefixed rows.
    pub fn read_str_col(&mut self, num_rows: usize) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(num_rows);
        for _ in 0..num_rows {
            out.push(self.read_leb128_str()?);
        }
        Ok(out)
    }
}

fn decode_utf8_or_hex(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_owned(),
        Err(_) => raw.iter().map(|b| format!("{b:02x}")).collect(),
    }
}

macro_rules! read_array_impl {
    ($($fn_name:ident, $ty:ty, $size:expr;)*) => {
        impl ByteSource {
            $(
                /// Dense little-endian array read.
                pub fn $fn_name(&mut self, num_rows: usize) -> Result<Vec<$ty>> {
                    let raw = self.read_bytes(num_rows * $size)?;
                    Ok(raw
                        .chunks_exact($size)
                        .map(|c| <$ty>::from_le_bytes(c.try_into().expect("fixed width")))
                        .collect())
                }
            )*
        }
    };
}

read_array_impl! {
    read_i8s, i8, 1;
    read_u8s, u8, 1;
    read_i16s, i16, 2;
    read_u16s, u16, 2;
    read_i32s, i32, 4;
    read_u32s, u32, 4;
    read_i64s, i64, 8;
    read_u64s, u64, 8;
    read_i128s, i128, 16;
    read_u128s, u128, 16;
    read_f32s, f32, 4;
    read_f64s, f64, 8;
}

/// Growable write buffer for encoding blocks.
#[derive(Default)]
pub struct ByteSink {
    buf: BytesMut,
}

impl ByteSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Detaches the accumulated bytes, leaving the sink empty.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_slice(&mut self, v: &[u8]) {
        self.buf.put_slice(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn write_leb128(&mut self, mut v: u64) {
        loop {
            let b = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                self.buf.put_u8(b);
                return;
            }
            self.buf.put_u8(0x80 | b);
        }
    }

    pub fn write_leb128_str(&mut self, s: &str) {
        self.write_leb128(s.len() as u64);
        self.buf.put_slice(s.as_bytes());
    }

    /// Length-prefixed raw bytes (the String wire form for binary rows).
    pub fn write_leb128_bytes(&mut self, raw: &[u8]) {
        self.write_leb128(raw.len() as u64);
        self.buf.put_slice(raw);
    }
}

macro_rules! write_scalar_impl {
    ($($fn_name:ident, $ty:ty;)*) => {
        impl ByteSink {
            $(
                pub fn $fn_name(&mut self, v: $ty) {
                    self.buf.put_slice(&v.to_le_bytes());
                }
            )*
        }
    };
}

write_scalar_impl! {
    write_i8, i8;
    write_i16, i16;
    write_u16, u16;
    write_i32, i32;
    write_u32, u32;
    write_i64, i64;
    write_i128, i128;
    write_u128, u128;
    write_f32, f32;
    write_f64, f64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leb128_round_trip() {
        let mut sink = ByteSink::new();
        for v in [0u64, 1, 127, 128, 300, 16383, 16384, u64::from(u32::MAX), u64::MAX] {
            sink.write_leb128(v);
        }
        let mut source = ByteSource::from_bytes(sink.take());
        for v in [0u64, 1, 127, 128, 300, 16383, 16384, u64::from(u32::MAX), u64::MAX] {
            assert_eq!(source.read_leb128().unwrap(), v);
        }
        assert!(source.at_end().unwrap());
    }

    #[test]
    fn reads_span_chunk_boundaries() {
        let mut sink = ByteSink::new();
        sink.write_u64(0x0102_0304_0506_0708);
        sink.write_leb128_str("boundary");
        let all = sink.take();
        // Split into 3-byte chunks to force every read across a boundary.
        let chunks: Vec<Bytes> = all.chunks(3).map(Bytes::copy_from_slice).collect();
        let mut source = ByteSource::from_chunks(chunks);
        assert_eq!(source.read_u64().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(source.read_leb128_str().unwrap(), "boundary");
        assert!(source.at_end().unwrap());
    }

    #[test]
    fn eof_is_stream_complete() {
        let mut source = ByteSource::from_bytes(vec![1u8, 2]);
        assert_eq!(source.read_bytes(2).unwrap().as_ref(), &[1, 2]);
        assert!(matches!(source.read_byte(), Err(Error::StreamComplete)));
        assert!(matches!(source.read_bytes(4), Err(Error::StreamComplete)));
    }

    #[test]
    fn invalid_utf8_hex_fallback() {
        let mut sink = ByteSink::new();
        sink.write_leb128_bytes(&[0xff, 0xfe, 0x41]);
        let mut source = ByteSource::from_bytes(sink.take());
        assert_eq!(source.read_leb128_str().unwrap(), "fffe41");
    }

    #[test]
    fn typed_array_round_trip() {
        let mut sink = ByteSink::new();
        for v in [-3i32, 0, 7, i32::MAX, i32::MIN] {
            sink.write_i32(v);
        }
        sink.write_f64(2.5);
        let mut source = ByteSource::from_bytes(sink.take());
        assert_eq!(source.read_i32s(5).unwrap(), vec![-3, 0, 7, i32::MAX, i32::MIN]);
        assert_eq!(source.read_f64s(1).unwrap(), vec![2.5]);
    }

    #[test]
    fn empty_chunks_are_skipped() {
        let chunks = vec![
            Bytes::new(),
            Bytes::copy_from_slice(&[5]),
            Bytes::new(),
            Bytes::copy_from_slice(&[6]),
        ];
        let mut source = ByteSource::from_chunks(chunks);
        assert_eq!(source.read_byte().unwrap(), 5);
        assert_eq!(source.read_byte().unwrap(), 6);
        assert!(source.at_end().unwrap());
    }
}
