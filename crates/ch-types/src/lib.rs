//! ch-types — ClickHouse type registry and native wire-format codec.
//!
//! The leaf layers of the client:
//! - a parser and registry turning type names like
//!   `Array(LowCardinality(Nullable(String)))` into cached descriptors,
//! - a recursive column codec for the native binary format,
//! - byte source/sink abstractions over chunked streams,
//! - block framing for responses and inserts.
//!
//! Everything here is transport-agnostic; the HTTP driver composes these
//! pieces around a connection.

pub mod binary;
pub mod block;
pub mod codec;
pub mod context;
pub mod error;
pub mod formats;
pub mod registry;
pub mod types;
pub mod typedef;
pub mod tz;
pub mod value;

pub use binary::{ByteSink, ByteSource, ChunkReader};
pub use block::{Block, NativeReader, write_block};
pub use context::{ReadContext, UtcTzMode, WriteContext};
pub use error::{Error, Result};
pub use formats::{FormatOverrides, ReadFormat};
pub use registry::get_type;
pub use types::{ChType, TypeKind};
pub use typedef::{TypeDef, parse_type_name};
pub use tz::Tz;
pub use value::{Value, typed_variant};
