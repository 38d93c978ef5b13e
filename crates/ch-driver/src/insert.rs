//! Per-insert state and the block serializer.
//!
//! Inserts stream: the caller's rows (or columns, or a row iterator) are
//! grouped into blocks bounded by a row count and an estimated byte
//! ceiling, and each block is encoded while the HTTP body is being
//! written. A serialization failure is captured on a shared slot and a
//! garbage sentinel chunk is emitted so the server rejects the partial
//! insert; the captured error is re-raised to the caller afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use ch_types::{ByteSink, ChType, Error, Result, Value, WriteContext, write_block};
use parking_lot::Mutex;

use crate::compression::{Compression, StreamCompressor};
use crate::settings::Setting;

/// Default rows per block.
pub const DEFAULT_BLOCK_ROW_COUNT: usize = 262_144;

/// Default estimated byte ceiling per block.
pub const DEFAULT_BLOCK_MAX_BYTES: usize = 1 << 20;

/// Garbage emitted after a serialization failure. The server cannot parse
/// it as a block header, so the whole insert fails instead of committing
/// a prefix of the data.
pub const SERIALIZE_FAILURE_SENTINEL: &[u8] = b"INTERNAL EXCEPTION WHILE SERIALIZING";

/// Insert payload shapes.
pub enum InsertData {
    /// Row-oriented: the outer axis is rows.
    Rows(Vec<Vec<Value>>),
    /// Column-oriented: one vector per column.
    Columns(Vec<Vec<Value>>),
    /// Streaming rows; blocks are emitted without materializing the
    /// whole input.
    RowIter(Box<dyn Iterator<Item = Vec<Value>> + Send>),
}

/// Shared slot carrying a serializer error across the thread boundary.
pub type InsertErrorSlot = Arc<Mutex<Option<Error>>>;

/// Argument bundle for one insert.
pub struct InsertContext {
    pub table: String,
    pub column_names: Vec<String>,
    pub column_types: Vec<Arc<ChType>>,
    pub settings: HashMap<String, Setting>,
    pub compression: Compression,
    pub block_row_count: usize,
    pub block_max_bytes: usize,
    pub write_context: WriteContext,
    data: Option<InsertData>,
}

impl InsertContext {
    pub fn new(
        table: impl Into<String>,
        column_names: Vec<String>,
        column_types: Vec<Arc<ChType>>,
    ) -> Self {
        Self {
            table: table.into(),
            column_names,
            column_types,
            settings: HashMap::new(),
            compression: Compression::None,
            block_row_count: DEFAULT_BLOCK_ROW_COUNT,
            block_max_bytes: DEFAULT_BLOCK_MAX_BYTES,
            write_context: WriteContext::new(),
            data: None,
        }
    }

    pub fn rows(mut self, rows: Vec<Vec<Value>>) -> Self {
        self.data = Some(InsertData::Rows(rows));
        self
    }

    pub fn columns(mut self, columns: Vec<Vec<Value>>) -> Self {
        self.data = Some(InsertData::Columns(columns));
        self
    }

    pub fn row_iter(mut self, rows: impl Iterator<Item = Vec<Value>> + Send + 'static) -> Self {
        self.data = Some(InsertData::RowIter(Box::new(rows)));
        self
    }

    pub fn setting(mut self, name: impl Into<String>, value: impl Into<Setting>) -> Self {
        self.settings.insert(name.into(), value.into());
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn is_empty(&self) -> bool {
        match &self.data {
            None => true,
            Some(InsertData::Rows(rows)) => rows.is_empty(),
            Some(InsertData::Columns(cols)) => cols.iter().all(Vec::is_empty),
            Some(InsertData::RowIter(_)) => false,
        }
    }

    /// Shape checks that can run before serialization starts.
    pub fn validate(&self) -> Result<()> {
        if self.column_names.len() != self.column_types.len() {
            return Err(Error::Programming(format!(
                "{} column names for {} column types",
                self.column_names.len(),
                self.column_types.len()
            )));
        }
        match &self.data {
            None => Err(Error::Programming("no data included in insert".to_owned())),
            Some(InsertData::Rows(rows)) => {
                if let Some(first) = rows.first() {
                    if first.len() != self.column_names.len() {
                        return Err(Error::Programming(format!(
                            "insert data has {} columns, table expects {}",
                            first.len(),
                            self.column_names.len()
                        )));
                    }
                }
                Ok(())
            }
            Some(InsertData::Columns(cols)) => {
                if cols.len() != self.column_names.len() {
                    return Err(Error::Programming(format!(
                        "insert data has {} columns, table expects {}",
                        cols.len(),
                        self.column_names.len()
                    )));
                }
                Ok(())
            }
            Some(InsertData::RowIter(_)) => Ok(()),
        }
    }

    /// Rows per block after the byte ceiling is applied to the
    /// per-row size estimate.
    pub fn effective_block_rows(&self) -> usize {
        let row_bytes: usize = self
            .column_types
            .iter()
            .map(|t| t.size_per_row())
            .sum::<usize>()
            .max(1);
        (self.block_max_bytes / row_bytes).clamp(1, self.block_row_count)
    }

    /// Converts the context into the chunk iterator fed to the HTTP body,
    /// plus the shared error slot checked after the request completes.
    pub fn into_chunks(self) -> (InsertChunkIter, InsertErrorSlot) {
        let slot: InsertErrorSlot = Arc::new(Mutex::new(None));
        let compressor = StreamCompressor::new(self.compression);
        let block_rows = self.effective_block_rows();
        let iter = InsertChunkIter {
            column_names: self.column_names,
            column_types: self.column_types,
            write_context: self.write_context,
            data: self.data,
            cursor: 0,
            block_rows,
            compressor,
            error_slot: Arc::clone(&slot),
            state: ChunkState::Blocks,
        };
        (iter, slot)
    }
}

enum ChunkState {
    Blocks,
    Footer,
    Done,
}

/// Iterator of encoded (and optionally compressed) body chunks.
pub struct InsertChunkIter {
    column_names: Vec<String>,
    column_types: Vec<Arc<ChType>>,
    write_context: WriteContext,
    data: Option<InsertData>,
    cursor: usize,
    block_rows: usize,
    compressor: StreamCompressor,
    error_slot: InsertErrorSlot,
    state: ChunkState,
}

impl InsertChunkIter {
    /// The next block's columns, or `None` when the data is exhausted.
    fn next_block_columns(&mut self) -> Option<Vec<Vec<Value>>> {
        match self.data.as_mut()? {
            InsertData::Rows(rows) => {
                if self.cursor >= rows.len() {
                    return None;
                }
                let end = (self.cursor + self.block_rows).min(rows.len());
                let slice = &rows[self.cursor..end];
                self.cursor = end;
                Some(pivot_rows(slice, self.column_names.len()))
            }
            InsertData::Columns(cols) => {
                let total = cols.first().map_or(0, Vec::len);
                if self.cursor >= total {
                    return None;
                }
                let end = (self.cursor + self.block_rows).min(total);
                // Ragged columns surface as a row-count mismatch when the
                // block is encoded.
                let block = cols
                    .iter()
                    .map(|col| {
                        col.get(self.cursor..end.min(col.len()))
                            .map(<[Value]>::to_vec)
                            .unwrap_or_default()
                    })
                    .collect();
                self.cursor = end;
                Some(block)
            }
            InsertData::RowIter(rows) => {
                let chunk: Vec<Vec<Value>> = rows.take(self.block_rows).collect();
                if chunk.is_empty() {
                    return None;
                }
                Some(pivot_rows(&chunk, self.column_names.len()))
            }
        }
    }

    fn encode_block(&mut self, columns: &[Vec<Value>]) -> Result<Bytes> {
        let mut sink = ByteSink::new();
        write_block(
            &self.column_names,
            &self.column_types,
            columns,
            &mut sink,
            &mut self.write_context,
        )?;
        self.compressor.compress_block(sink.take())
    }
}

impl Iterator for InsertChunkIter {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        loop {
            match self.state {
                ChunkState::Done => return None,
                ChunkState::Footer => {
                    self.state = ChunkState::Done;
                    match self.compressor.complete() {
                        Ok(tail) => return tail,
                        Err(err) => {
                            *self.error_slot.lock() = Some(err);
                            return Some(Bytes::from_static(SERIALIZE_FAILURE_SENTINEL));
                        }
                    }
                }
                ChunkState::Blocks => {
                    let Some(columns) = self.next_block_columns() else {
                        self.state = ChunkState::Footer;
                        continue;
                    };
                    match self.encode_block(&columns) {
                        Ok(chunk) if chunk.is_empty() => continue,
                        Ok(chunk) => return Some(chunk),
                        Err(err) => {
                            // Capture the real failure and poison the
                            // stream so the server rejects the insert.
                            *self.error_slot.lock() = Some(err);
                            self.state = ChunkState::Done;
                            return Some(Bytes::from_static(SERIALIZE_FAILURE_SENTINEL));
                        }
                    }
                }
            }
        }
    }
}

fn pivot_rows(rows: &[Vec<Value>], num_columns: usize) -> Vec<Vec<Value>> {
    let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(rows.len()); num_columns];
    for row in rows {
        for (ix, column) in columns.iter_mut().enumerate() {
            column.push(row.get(ix).cloned().unwrap_or(Value::Null));
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use ch_types::{ByteSource, NativeReader, ReadContext, get_type};

    fn context(rows: Vec<Vec<Value>>) -> InsertContext {
        InsertContext::new(
            "t",
            vec!["id".to_owned(), "name".to_owned()],
            vec![get_type("UInt32").unwrap(), get_type("String").unwrap()],
        )
        .rows(rows)
    }

    fn decode_all(chunks: Vec<Bytes>) -> Vec<ch_types::Block> {
        let mut reader = NativeReader::new(ByteSource::from_chunks(chunks), ReadContext::default());
        let mut blocks = Vec::new();
        while let Some(block) = reader.next_block().unwrap() {
            blocks.push(block);
        }
        blocks
    }

    #[test]
    fn rows_round_trip_through_blocks() {
        let rows: Vec<Vec<Value>> = (0..10)
            .map(|i| vec![Value::UInt32(i), Value::String(format!("r{i}"))])
            .collect();
        let mut ctx = context(rows.clone());
        ctx.block_row_count = 4;
        ctx.block_max_bytes = usize::MAX >> 1;
        let (chunks, slot) = ctx.into_chunks();
        let encoded: Vec<Bytes> = chunks.collect();
        assert!(slot.lock().is_none());
        let blocks = decode_all(encoded);
        assert_eq!(blocks.len(), 3); // 4 + 4 + 2 rows
        let decoded: Vec<Vec<Value>> = blocks.iter().flat_map(|b| b.rows()).collect();
        assert_eq!(decoded, rows);
    }

    #[test]
    fn column_oriented_input() {
        let ctx = InsertContext::new(
            "t",
            vec!["a".to_owned()],
            vec![get_type("Int64").unwrap()],
        )
        .columns(vec![vec![Value::Int64(1), Value::Int64(2)]]);
        let (chunks, slot) = ctx.into_chunks();
        let blocks = decode_all(chunks.collect());
        assert!(slot.lock().is_none());
        assert_eq!(blocks[0].columns[0], vec![Value::Int64(1), Value::Int64(2)]);
    }

    #[test]
    fn iterator_input_streams_blocks() {
        let mut ctx = InsertContext::new(
            "t",
            vec!["a".to_owned()],
            vec![get_type("UInt64").unwrap()],
        )
        .row_iter((0..25u64).map(|i| vec![Value::UInt64(i)]));
        ctx.block_row_count = 10;
        ctx.block_max_bytes = usize::MAX >> 1;
        let (chunks, _slot) = ctx.into_chunks();
        let blocks = decode_all(chunks.collect());
        assert_eq!(
            blocks.iter().map(|b| b.num_rows).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
    }

    #[test]
    fn byte_ceiling_shrinks_blocks() {
        let mut ctx = InsertContext::new(
            "t",
            vec!["s".to_owned()],
            vec![get_type("String").unwrap()],
        );
        // String rows estimate to 60 bytes; a 600-byte ceiling caps
        // blocks at 10 rows.
        ctx.block_max_bytes = 600;
        assert_eq!(ctx.effective_block_rows(), 10);
    }

    #[test]
    fn serializer_failure_captured_with_sentinel() {
        let rows = vec![
            vec![Value::UInt32(1), Value::String("ok".to_owned())],
            vec![Value::UInt32(2), Value::Int64(-1)], // not a string
        ];
        let (chunks, slot) = context(rows).into_chunks();
        let encoded: Vec<Bytes> = chunks.collect();
        assert_eq!(encoded.last().unwrap().as_ref(), SERIALIZE_FAILURE_SENTINEL);
        assert!(matches!(*slot.lock(), Some(Error::Data(_))));
    }

    #[test]
    fn empty_insert_is_programming_error() {
        let ctx = InsertContext::new(
            "t",
            vec!["a".to_owned()],
            vec![get_type("UInt8").unwrap()],
        );
        assert!(ctx.is_empty());
        assert!(matches!(ctx.validate(), Err(Error::Programming(_))));
    }

    #[test]
    fn column_count_mismatch_is_programming_error() {
        let ctx = InsertContext::new(
            "t",
            vec!["a".to_owned(), "b".to_owned()],
            vec![get_type("UInt8").unwrap(), get_type("UInt8").unwrap()],
        )
        .rows(vec![vec![Value::UInt8(1)]]);
        assert!(matches!(ctx.validate(), Err(Error::Programming(_))));
    }
}
