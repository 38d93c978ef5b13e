//! Incremental body compression and decompression.
//!
//! Responses decompress chunk-by-chunk inside the consumer loop of the
//! streaming bridge; inserts compress block-by-block as they are
//! serialized. LZ4 frames buffer until end of stream because the frame
//! format is not splittable at arbitrary chunk boundaries.

use std::io::Write;

use bytes::Bytes;
use ch_types::{Error, Result};

/// Response `Content-Encoding` values the bridge can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentEncoding {
    #[default]
    Identity,
    Gzip,
    Deflate,
    Zstd,
    Lz4,
}

impl ContentEncoding {
    pub fn from_header(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            None | Some("") | Some("identity") => Ok(Self::Identity),
            Some("gzip") | Some("x-gzip") => Ok(Self::Gzip),
            Some("deflate") => Ok(Self::Deflate),
            Some("zstd") => Ok(Self::Zstd),
            Some("lz4") => Ok(Self::Lz4),
            Some(other) => Err(Error::Operational(format!(
                "unsupported response content encoding '{other}'"
            ))),
        }
    }

    /// The `Accept-Encoding` list offered on requests.
    pub fn accept_header() -> &'static str {
        "gzip, deflate, zstd, lz4"
    }
}

/// Push-style decompressor fed by the bridge consumer.
pub enum StreamDecompressor {
    Identity,
    Gzip(flate2::write::GzDecoder<Vec<u8>>),
    Deflate(flate2::write::ZlibDecoder<Vec<u8>>),
    Zstd(zstd::stream::write::Decoder<'static, Vec<u8>>),
    Lz4 { buffered: Vec<u8> },
}

impl StreamDecompressor {
    pub fn new(encoding: ContentEncoding) -> Result<Self> {
        Ok(match encoding {
            ContentEncoding::Identity => Self::Identity,
            ContentEncoding::Gzip => Self::Gzip(flate2::write::GzDecoder::new(Vec::new())),
            ContentEncoding::Deflate => Self::Deflate(flate2::write::ZlibDecoder::new(Vec::new())),
            ContentEncoding::Zstd => Self::Zstd(
                zstd::stream::write::Decoder::new(Vec::new())
                    .map_err(|e| Error::Operational(format!("zstd init: {e}")))?,
            ),
            ContentEncoding::Lz4 => Self::Lz4 { buffered: Vec::new() },
        })
    }

    /// Feeds one compressed chunk, returning whatever decompressed bytes
    /// are available so far.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Bytes> {
        match self {
            Self::Identity => Ok(Bytes::copy_from_slice(chunk)),
            Self::Gzip(decoder) => {
                decoder
                    .write_all(chunk)
                    .map_err(|e| Error::Operational(format!("gzip decode: {e}")))?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
            Self::Deflate(decoder) => {
                decoder
                    .write_all(chunk)
                    .map_err(|e| Error::Operational(format!("deflate decode: {e}")))?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
            Self::Zstd(decoder) => {
                decoder
                    .write_all(chunk)
                    .map_err(|e| Error::Operational(format!("zstd decode: {e}")))?;
                decoder
                    .flush()
                    .map_err(|e| Error::Operational(format!("zstd decode: {e}")))?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
            Self::Lz4 { buffered } => {
                buffered.extend_from_slice(chunk);
                Ok(Bytes::new())
            }
        }
    }

    /// Drains anything held back at end of stream.
    pub fn finish(&mut self) -> Result<Bytes> {
        match self {
            Self::Identity => Ok(Bytes::new()),
            Self::Gzip(decoder) => {
                decoder
                    .try_finish()
                    .map_err(|e| Error::Operational(format!("gzip finish: {e}")))?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
            Self::Deflate(decoder) => {
                decoder
                    .try_finish()
                    .map_err(|e| Error::Operational(format!("deflate finish: {e}")))?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
            Self::Zstd(decoder) => {
                decoder
                    .flush()
                    .map_err(|e| Error::Operational(format!("zstd finish: {e}")))?;
                Ok(Bytes::from(std::mem::take(decoder.get_mut())))
            }
            Self::Lz4 { buffered } => {
                let mut out = Vec::new();
                let mut reader = lz4_flex::frame::FrameDecoder::new(buffered.as_slice());
                std::io::Read::read_to_end(&mut reader, &mut out)
                    .map_err(|e| Error::Operational(format!("lz4 decode: {e}")))?;
                buffered.clear();
                Ok(Bytes::from(out))
            }
        }
    }
}

/// Insert-body compression choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    pub fn content_encoding(self) -> Option<&'static str> {
        match self {
            Compression::None => None,
            Compression::Gzip => Some("gzip"),
        }
    }
}

/// Push-style compressor applied to serialized insert blocks.
pub enum StreamCompressor {
    Passthrough,
    Gzip(flate2::write::GzEncoder<Vec<u8>>),
}

impl StreamCompressor {
    pub fn new(compression: Compression) -> Self {
        match compression {
            Compression::None => Self::Passthrough,
            Compression::Gzip => Self::Gzip(flate2::write::GzEncoder::new(
                Vec::new(),
                flate2::Compression::default(),
            )),
        }
    }

    pub fn compress_block(&mut self, block: Bytes) -> Result<Bytes> {
        match self {
            Self::Passthrough => Ok(block),
            Self::Gzip(encoder) => {
                encoder
                    .write_all(&block)
                    .map_err(|e| Error::Operational(format!("gzip encode: {e}")))?;
                encoder
                    .flush()
                    .map_err(|e| Error::Operational(format!("gzip encode: {e}")))?;
                Ok(Bytes::from(std::mem::take(encoder.get_mut())))
            }
        }
    }

    /// The trailing frame footer, if any.
    pub fn complete(&mut self) -> Result<Option<Bytes>> {
        match self {
            Self::Passthrough => Ok(None),
            Self::Gzip(encoder) => {
                encoder
                    .try_finish()
                    .map_err(|e| Error::Operational(format!("gzip finish: {e}")))?;
                let tail = std::mem::take(encoder.get_mut());
                Ok((!tail.is_empty()).then(|| Bytes::from(tail)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trip_across_chunks() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let mut compressor = StreamCompressor::new(Compression::Gzip);
        let mut wire = Vec::new();
        for chunk in payload.chunks(257) {
            wire.extend_from_slice(&compressor.compress_block(Bytes::copy_from_slice(chunk)).unwrap());
        }
        if let Some(tail) = compressor.complete().unwrap() {
            wire.extend_from_slice(&tail);
        }

        let mut decompressor = StreamDecompressor::new(ContentEncoding::Gzip).unwrap();
        let mut out = Vec::new();
        for chunk in wire.chunks(100) {
            out.extend_from_slice(&decompressor.feed(chunk).unwrap());
        }
        out.extend_from_slice(&decompressor.finish().unwrap());
        assert_eq!(out, payload);
    }

    #[test]
    fn lz4_buffers_until_finish() {
        let payload = b"columnar".repeat(50);
        let mut wire = Vec::new();
        {
            let mut encoder = lz4_flex::frame::FrameEncoder::new(&mut wire);
            std::io::Write::write_all(&mut encoder, &payload).unwrap();
            encoder.finish().unwrap();
        }
        let mut decompressor = StreamDecompressor::new(ContentEncoding::Lz4).unwrap();
        let mut out = Vec::new();
        for chunk in wire.chunks(33) {
            out.extend_from_slice(&decompressor.feed(chunk).unwrap());
        }
        out.extend_from_slice(&decompressor.finish().unwrap());
        assert_eq!(out, payload);
    }

    #[test]
    fn zstd_round_trip() {
        let payload = b"blocks of data ".repeat(200);
        let wire = zstd::encode_all(payload.as_slice(), 3).unwrap();
        let mut decompressor = StreamDecompressor::new(ContentEncoding::Zstd).unwrap();
        let mut out = Vec::new();
        for chunk in wire.chunks(64) {
            out.extend_from_slice(&decompressor.feed(chunk).unwrap());
        }
        out.extend_from_slice(&decompressor.finish().unwrap());
        assert_eq!(out, payload);
    }

    #[test]
    fn unknown_encoding_rejected() {
        assert!(ContentEncoding::from_header(Some("br")).is_err());
        assert_eq!(
            ContentEncoding::from_header(None).unwrap(),
            ContentEncoding::Identity
        );
    }
}
