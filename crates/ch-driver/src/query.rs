//! Per-query state and result materialization.
//!
//! A [`QueryContext`] is mutable while it is being built and read-only
//! once execution starts. Results come back either materialized
//! ([`QueryResult`]) or as streams of blocks/rows with bounded buffering.

use std::collections::HashMap;
use std::sync::Arc;

use ch_types::{
    Block, ChType, Error, FormatOverrides, ReadContext, ReadFormat, Result, Tz, UtcTzMode, Value,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::binding::Parameters;
use crate::settings::Setting;

/// Column rename hook applied to response column names.
pub type ColumnRenamer = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// An ad-hoc read-only table shipped alongside a query as multipart form
/// data.
#[derive(Debug, Clone)]
pub struct ExternalData {
    pub name: String,
    /// Column structure, e.g. `id UInt32, val String`.
    pub structure: String,
    pub data: bytes::Bytes,
    /// Input format of `data`; the server default is TabSeparated.
    pub format: Option<String>,
}

/// Argument bundle for one query.
#[derive(Clone, Default)]
pub struct QueryContext {
    pub query: String,
    pub parameters: Parameters,
    pub settings: HashMap<String, Setting>,
    pub read_formats: FormatOverrides,
    pub column_tzs: HashMap<String, Tz>,
    pub query_tz: Option<Tz>,
    pub utc_tz_mode: UtcTzMode,
    pub use_none: bool,
    pub column_renamer: Option<ColumnRenamer>,
    pub query_id: Option<String>,
    pub external_data: Vec<ExternalData>,
}

impl std::fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryContext")
            .field("query", &self.query)
            .field("query_id", &self.query_id)
            .field("settings", &self.settings.keys())
            .finish_non_exhaustive()
    }
}

impl QueryContext {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            use_none: true,
            ..Self::default()
        }
    }

    pub fn with_params(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        match &mut self.parameters {
            Parameters::Named(map) => {
                map.insert(name.into(), value.into());
            }
            _ => {
                self.parameters =
                    Parameters::Named(HashMap::from([(name.into(), value.into())]));
            }
        }
        self
    }

    pub fn setting(mut self, name: impl Into<String>, value: impl Into<Setting>) -> Self {
        self.settings.insert(name.into(), value.into());
        self
    }

    /// Read-format override for one column by exact name.
    pub fn column_format(mut self, column: impl Into<String>, fmt: ReadFormat) -> Self {
        self.read_formats.set_column(column, fmt);
        self
    }

    /// Read-format override by type-class glob (`IP*`, `*Int64`).
    pub fn query_format(mut self, pattern: impl Into<String>, fmt: ReadFormat) -> Self {
        self.read_formats.set_class(pattern, fmt);
        self
    }

    pub fn timezone(mut self, tz: Tz) -> Self {
        self.query_tz = Some(tz);
        self
    }

    pub fn column_timezone(mut self, column: impl Into<String>, tz: Tz) -> Self {
        self.column_tzs.insert(column.into(), tz);
        self
    }

    pub fn query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = Some(query_id.into());
        self
    }

    pub fn rename_columns(mut self, renamer: ColumnRenamer) -> Self {
        self.column_renamer = Some(renamer);
        self
    }

    pub fn external_data(mut self, table: ExternalData) -> Self {
        self.external_data.push(table);
        self
    }

    /// The codec-facing read state, fixed at execution time.
    pub fn read_context(&self, server_tz: Option<Tz>, apply_server_timezone: bool) -> ReadContext {
        let mut ctx = ReadContext::default();
        ctx.use_none = self.use_none;
        ctx.formats = self.read_formats.clone();
        ctx.column_tzs = self.column_tzs.clone();
        ctx.query_tz = self.query_tz;
        ctx.server_tz = server_tz;
        ctx.apply_server_timezone = apply_server_timezone;
        ctx.utc_tz_mode = self.utc_tz_mode;
        ctx
    }

    pub fn rename(&self, name: &str) -> String {
        match &self.column_renamer {
            Some(renamer) => renamer(name),
            None => name.to_owned(),
        }
    }
}

/// Server-reported progress counters from the `X-ClickHouse-Summary`
/// header.
pub type Summary = HashMap<String, serde_json::Value>;

/// A fully materialized query result.
#[derive(Debug)]
pub struct QueryResult {
    pub column_names: Vec<String>,
    pub column_types: Vec<Arc<ChType>>,
    pub blocks: Vec<Block>,
    pub query_id: Option<String>,
    pub summary: Summary,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            column_names: Vec::new(),
            column_types: Vec::new(),
            blocks: Vec::new(),
            query_id: None,
            summary: Summary::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.blocks.iter().map(|b| b.num_rows).sum()
    }

    /// All rows across blocks.
    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        self.blocks.iter().flat_map(Block::rows)
    }

    pub fn first_row(&self) -> Option<Vec<Value>> {
        self.rows().next()
    }

    /// The single value of a one-cell result.
    pub fn scalar(&self) -> Option<Value> {
        self.first_row().and_then(|row| row.into_iter().next())
    }

    /// One column concatenated across blocks, by name.
    pub fn column(&self, name: &str) -> Option<Vec<Value>> {
        let ix = self.column_names.iter().position(|n| n == name)?;
        Some(
            self.blocks
                .iter()
                .flat_map(|b| b.columns[ix].iter().cloned())
                .collect(),
        )
    }

    /// Rows as name/value maps.
    pub fn named_rows(&self) -> impl Iterator<Item = HashMap<String, Value>> + '_ {
        self.rows().map(|row| {
            self.column_names
                .iter()
                .cloned()
                .zip(row)
                .collect::<HashMap<_, _>>()
        })
    }
}

/// A stream of decoded blocks with bounded buffering.
///
/// Closing the stream (or dropping it) cancels the background producer
/// and releases the HTTP response; iterating after close raises
/// [`Error::StreamClosed`].
pub struct BlockStream {
    receiver: mpsc::Receiver<Result<Block>>,
    producer: JoinHandle<()>,
    pub query_id: Option<String>,
    pub summary: Summary,
    closed: bool,
    finished: bool,
}

impl BlockStream {
    pub(crate) fn new(
        receiver: mpsc::Receiver<Result<Block>>,
        producer: JoinHandle<()>,
        query_id: Option<String>,
        summary: Summary,
    ) -> Self {
        Self {
            receiver,
            producer,
            query_id,
            summary,
            closed: false,
            finished: false,
        }
    }

    /// The next decoded block, or `None` at end of stream.
    pub async fn next_block(&mut self) -> Result<Option<Block>> {
        if self.closed {
            return Err(Error::StreamClosed);
        }
        if self.finished {
            return Ok(None);
        }
        match self.receiver.recv().await {
            Some(Ok(block)) => Ok(Some(block)),
            Some(Err(err)) => {
                self.finished = true;
                Err(err)
            }
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    /// Collects every remaining block.
    pub async fn collect(mut self) -> Result<QueryResult> {
        let mut blocks = Vec::new();
        while let Some(block) = self.next_block().await? {
            blocks.push(block);
        }
        let (column_names, column_types) = blocks
            .first()
            .map(|b| (b.column_names.clone(), b.column_types.clone()))
            .unwrap_or_default();
        Ok(QueryResult {
            column_names,
            column_types,
            blocks,
            query_id: self.query_id.clone(),
            summary: self.summary.clone(),
        })
    }

    /// Ends the stream: cancels the producer and rejects further reads.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.receiver.close();
            self.producer.abort();
        }
    }
}

impl Drop for BlockStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Row-at-a-time adapter over a [`BlockStream`].
pub struct RowStream {
    blocks: BlockStream,
    current: std::vec::IntoIter<Vec<Value>>,
}

impl RowStream {
    pub fn new(blocks: BlockStream) -> Self {
        Self {
            blocks,
            current: Vec::new().into_iter(),
        }
    }

    pub async fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        loop {
            if let Some(row) = self.current.next() {
                return Ok(Some(row));
            }
            match self.blocks.next_block().await? {
                Some(block) => {
                    self.current = block.rows().collect::<Vec<_>>().into_iter();
                }
                None => return Ok(None),
            }
        }
    }

    pub fn close(&mut self) {
        self.blocks.close();
    }
}
