//! Bounded-queue bridges between the async HTTP transport and the
//! synchronous codec.
//!
//! Queries: a background task pushes body chunks onto a bounded channel;
//! the codec runs on a blocking thread pulling chunks through an optional
//! decompressor and the mid-stream exception scanner. Inserts run the
//! serializer on a blocking thread and feed the HTTP body through the
//! symmetric channel. Chunks leave each queue in producer order.

use bytes::Bytes;
use ch_types::{ChunkReader, Error, Result};
use tokio::sync::mpsc;

use crate::compression::StreamDecompressor;

/// Queue capacity between producer and consumer, in chunks.
pub const CHUNK_QUEUE_CAPACITY: usize = 10;

/// Target chunk size when reading a response body.
pub const READ_CHUNK_SIZE: usize = 512 * 1024;

/// Tail window retained for legacy `DB::Exception` detection.
const TAIL_WINDOW: usize = 1024;

/// Sync-side reader over the chunk queue. Implements the codec's
/// [`ChunkReader`] contract: decompressed data chunks in FIFO order,
/// `None` at end of stream, and a [`Error::StreamFailure`] when the
/// server embedded an exception in the body.
pub struct BridgeReader {
    receiver: mpsc::Receiver<Result<Bytes>>,
    decompressor: StreamDecompressor,
    scanner: ExceptionScanner,
    done: bool,
}

impl BridgeReader {
    pub fn new(
        receiver: mpsc::Receiver<Result<Bytes>>,
        decompressor: StreamDecompressor,
        exception_tag: Option<String>,
    ) -> Self {
        Self {
            receiver,
            decompressor,
            scanner: ExceptionScanner::new(exception_tag),
            done: false,
        }
    }

    fn finish(&mut self) -> Result<Option<Bytes>> {
        self.done = true;
        let tail = self.decompressor.finish()?;
        let flushed = self.scanner.finish(&tail)?;
        if flushed.is_empty() {
            Ok(None)
        } else {
            Ok(Some(flushed))
        }
    }
}

impl ChunkReader for BridgeReader {
    fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            if self.done {
                return Ok(None);
            }
            match self.receiver.blocking_recv() {
                Some(Ok(chunk)) => {
                    let decoded = self.decompressor.feed(&chunk)?;
                    let data = self.scanner.feed(&decoded)?;
                    if data.is_empty() {
                        continue;
                    }
                    return Ok(Some(data));
                }
                Some(Err(err)) => {
                    self.done = true;
                    return Err(err);
                }
                None => return self.finish(),
            }
        }
    }
}

/// Detects server exceptions embedded in a response body.
///
/// Modern servers mark each response with an `X-ClickHouse-Exception-Tag`
/// header value `T` and, on a mid-stream abort, write
/// `__exception__T\r\n<message>\r\n<len> T__exception__\r\n` into the
/// body. Legacy servers append `Code: NNN. DB::Exception: ...` text to a
/// truncated body; the scanner keeps a small tail window to catch it.
struct ExceptionScanner {
    marker: Option<Vec<u8>>,
    holdback: Vec<u8>,
    /// Bytes collected after the start marker was seen.
    exception_body: Option<Vec<u8>>,
    tail: Vec<u8>,
}

impl ExceptionScanner {
    fn new(exception_tag: Option<String>) -> Self {
        Self {
            marker: exception_tag.map(|tag| format!("__exception__{tag}").into_bytes()),
            holdback: Vec::new(),
            exception_body: None,
            tail: Vec::new(),
        }
    }

    /// Consumes a decompressed chunk, returning the data bytes in it.
    fn feed(&mut self, chunk: &[u8]) -> Result<Bytes> {
        if chunk.is_empty() {
            return Ok(Bytes::new());
        }
        self.tail.extend_from_slice(chunk);
        if self.tail.len() > TAIL_WINDOW {
            let excess = self.tail.len() - TAIL_WINDOW;
            self.tail.drain(..excess);
        }
        if let Some(body) = &mut self.exception_body {
            body.extend_from_slice(chunk);
            return Ok(Bytes::new());
        }
        let Some(marker) = &self.marker else {
            return Ok(Bytes::copy_from_slice(chunk));
        };
        let marker = marker.clone();
        let mut window = std::mem::take(&mut self.holdback);
        window.extend_from_slice(chunk);
        if let Some(found) = find_subslice(&window, &marker) {
            let data = Bytes::copy_from_slice(&window[..found]);
            self.exception_body = Some(window[found + marker.len()..].to_vec());
            return Ok(data);
        }
        // Keep enough bytes to match a marker split across chunks.
        let keep = (marker.len() - 1).min(window.len());
        let emit = window.len() - keep;
        self.holdback = window.split_off(emit);
        Ok(Bytes::from(window))
    }

    /// End of stream: surfaces a detected exception, or flushes the
    /// held-back bytes.
    fn finish(&mut self, decompressor_tail: &[u8]) -> Result<Bytes> {
        let trailing = self.feed(decompressor_tail)?;
        if let Some(body) = self.exception_body.take() {
            return Err(Error::StreamFailure(parse_tagged_exception(&body)));
        }
        // Legacy tail scan applies only when the server did not mark the
        // response with an exception tag.
        if self.marker.is_none() {
            if let Some(message) = scan_legacy_exception(&self.tail) {
                return Err(Error::StreamFailure(message));
            }
        }
        let mut out = trailing.to_vec();
        out.extend_from_slice(&std::mem::take(&mut self.holdback));
        Ok(Bytes::from(out))
    }
}

/// Extracts the message from `\r\n<message>\r\n<len> <tag>__exception__..`.
fn parse_tagged_exception(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let message = text.strip_prefix("\r\n").unwrap_or(&text);
    let message = match message.rfind("\r\n") {
        Some(end) => &message[..end],
        None => message,
    };
    // The length line sits between the message and the closing marker.
    let message = match message.rfind("\r\n") {
        Some(end) if message[end..].contains("__exception__") => &message[..end],
        _ => message,
    };
    message.trim().to_owned()
}

/// Legacy detection: `Code: NNN. DB::Exception:` appended to the body.
fn scan_legacy_exception(tail: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(tail);
    let start = text.rfind("Code: ")?;
    let candidate = &text[start..];
    if !candidate.contains("DB::Exception") {
        return None;
    }
    Some(candidate.trim().to_owned())
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Wraps an insert chunk receiver as a body stream for the HTTP client.
pub fn body_stream(
    receiver: mpsc::Receiver<Bytes>,
) -> impl futures::Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send {
    futures::stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|chunk| (Ok(chunk), receiver))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::ContentEncoding;

    fn reader_over(
        chunks: Vec<Result<Bytes>>,
        tag: Option<&str>,
    ) -> (BridgeReader, tokio::runtime::Runtime) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let (tx, rx) = mpsc::channel(CHUNK_QUEUE_CAPACITY);
        rt.spawn(async move {
            for chunk in chunks {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });
        let reader = BridgeReader::new(
            rx,
            StreamDecompressor::new(ContentEncoding::Identity).unwrap(),
            tag.map(str::to_owned),
        );
        (reader, rt)
    }

    fn drain(reader: &mut BridgeReader) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = reader.next_chunk()? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    #[test]
    fn chunks_stay_in_order() {
        let (mut reader, _rt) = reader_over(
            (0..20)
                .map(|i| Ok(Bytes::from(format!("chunk-{i:02};"))))
                .collect(),
            None,
        );
        let data = drain(&mut reader).unwrap();
        let text = String::from_utf8(data).unwrap();
        let expected: String = (0..20).map(|i| format!("chunk-{i:02};")).collect();
        assert_eq!(text, expected);
    }

    #[test]
    fn producer_errors_surface_on_pop() {
        let (mut reader, _rt) = reader_over(
            vec![
                Ok(Bytes::from_static(b"ok")),
                Err(Error::Operational("socket reset".to_owned())),
            ],
            None,
        );
        assert_eq!(reader.next_chunk().unwrap().unwrap().as_ref(), b"ok");
        assert!(matches!(reader.next_chunk(), Err(Error::Operational(_))));
    }

    #[test]
    fn tagged_exception_detected_across_chunk_split() {
        let tag = "abcdefgh12345678";
        let full = format!("DATA__exception__{tag}\r\nCode: 395. DB::Exception: thrown\r\n36 {tag}__exception__\r\n");
        let raw = full.into_bytes();
        // Split right inside the marker.
        let cut = 8;
        let (mut reader, _rt) = reader_over(
            vec![
                Ok(Bytes::copy_from_slice(&raw[..cut])),
                Ok(Bytes::copy_from_slice(&raw[cut..])),
            ],
            Some(tag),
        );
        let mut data = Vec::new();
        let err = loop {
            match reader.next_chunk() {
                Ok(Some(chunk)) => data.extend_from_slice(&chunk),
                Ok(None) => panic!("expected stream failure"),
                Err(err) => break err,
            }
        };
        assert_eq!(data, b"DATA");
        match err {
            Error::StreamFailure(message) => {
                assert!(message.contains("DB::Exception: thrown"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn legacy_tail_exception_detected() {
        let (mut reader, _rt) = reader_over(
            vec![
                Ok(Bytes::from_static(b"partial block bytes...")),
                Ok(Bytes::from_static(
                    b"Code: 159. DB::Exception: Timeout exceeded",
                )),
            ],
            None,
        );
        let err = loop {
            match reader.next_chunk() {
                Ok(Some(_)) => {}
                Ok(None) => panic!("expected stream failure"),
                Err(err) => break err,
            }
        };
        assert!(matches!(err, Error::StreamFailure(msg) if msg.contains("Timeout exceeded")));
    }

    #[test]
    fn clean_stream_flushes_holdback() {
        let tag = "abcdefgh12345678";
        let (mut reader, _rt) = reader_over(
            vec![Ok(Bytes::from_static(b"all data, no exception marker"))],
            Some(tag),
        );
        let data = drain(&mut reader).unwrap();
        assert_eq!(data, b"all data, no exception marker");
    }
}
