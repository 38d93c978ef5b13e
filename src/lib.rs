//! A ClickHouse client over HTTP with native-format streaming.
//!
//! Queries and inserts move data as blocks in ClickHouse's compact binary
//! column-oriented format, streamed through bounded queues with
//! backpressure, cancellation, and mid-stream server-exception detection.
//!
//! ```no_run
//! use clickhouse_client::{Client, Value};
//!
//! # async fn demo() -> clickhouse_client::Result<()> {
//! let client = Client::builder("http://localhost:8123")
//!     .username("default")
//!     .database("default")
//!     .connect()
//!     .await?;
//! let result = client.query("SELECT number, toString(number) FROM system.numbers LIMIT 5").await?;
//! for row in result.rows() {
//!     println!("{row:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The workspace splits along the protocol seams: [`ch_types`] holds the
//! type registry and codec, [`ch_driver`] the contexts, streaming bridge,
//! and HTTP transport. This crate re-exports the public surface.

pub use ch_driver::{
    BlockStream, Client, ClientBuilder, ColumnRenamer, Compression, ExternalData, InsertContext,
    InsertData, InvalidSettingAction, Parameters, QueryContext, QueryResult, RowStream, Setting,
    SettingsCatalog, Summary, blocking, finalize_query,
};
pub use ch_types::{
    Block, ChType, Error, FormatOverrides, ReadFormat, Result, Tz, TypeKind, UtcTzMode, Value,
    get_type, typed_variant,
};

/// Lower-level building blocks for integrations that frame their own
/// blocks or extend the registry.
pub mod native {
    pub use ch_types::binary::{ByteSink, ByteSource, ChunkReader};
    pub use ch_types::block::{NativeReader, write_block};
    pub use ch_types::codec::{read_column, read_prefix, write_column, write_prefix};
    pub use ch_types::context::{ReadContext, WriteContext};
    pub use ch_types::formats::{clear_default_formats, set_default_format};
    pub use ch_types::typedef::{TypeDef, parse_type_name};
}
