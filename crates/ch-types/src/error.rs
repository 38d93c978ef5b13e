//! Error types shared across the client.
//!
//! One closed taxonomy covers the codec, the contexts, and the HTTP
//! transport so that callers match on a single enum regardless of which
//! layer failed.

/// Client error shared across the codec, driver, and transport layers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// API misuse: invalid settings in strict mode, concurrent session
    /// reuse, empty inserts, mismatched column counts.
    #[error("programming error: {0}")]
    Programming(String),

    /// Data does not fit the declared column type.
    #[error("data error: {0}")]
    Data(String),

    /// The server rejected the request (non-2xx on the first attempt).
    #[error("database error: {0}")]
    Database(String),

    /// Network failure, or a non-2xx response after exhausting retries.
    #[error("operational error: {0}")]
    Operational(String),

    /// The server reported an exception in the middle of a streaming
    /// response (tail sentinel or exception tag).
    #[error("stream failure: {0}")]
    StreamFailure(String),

    /// A result stream was iterated after its scope was closed.
    #[error("stream closed")]
    StreamClosed,

    /// The type cannot be serialized or deserialized by the codec.
    #[error("{0} is not supported")]
    NotSupported(String),

    /// Registry lookup failed during an operation that requires a
    /// previously registered type.
    #[error("internal error: {0}")]
    Internal(String),

    /// A type name did not match the ClickHouse type grammar.
    #[error("cannot parse type name: {0}")]
    Parse(String),

    /// The base identifier of a type name is not registered.
    #[error("unknown ClickHouse type {0}")]
    UnknownType(String),

    /// Clean end of the byte stream. Raised by the byte source when no
    /// more chunks are available; the block framing layer converts this
    /// into a "no more blocks" result when it occurs between blocks.
    #[error("stream complete")]
    StreamComplete,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the error is the clean end-of-stream signal rather
    /// than an actual fault.
    pub fn is_stream_complete(&self) -> bool {
        matches!(self, Error::StreamComplete)
    }
}
