//! Native-format block framing.
//!
//! A response is a sequence of blocks: LEB128 column and row counts, then
//! per column its name, type name, prefix, and data. The first block fixes
//! the schema; later blocks must agree with it. The stream ends when no
//! bytes remain between blocks.

use std::sync::Arc;

use crate::binary::{ByteSink, ByteSource};
use crate::codec;
use crate::context::{ReadContext, WriteContext};
use crate::error::{Error, Result};
use crate::registry::get_type;
use crate::types::ChType;
use crate::value::Value;

/// One decoded block: column-oriented values plus the schema.
#[derive(Debug)]
pub struct Block {
    pub column_names: Vec<String>,
    pub column_types: Vec<Arc<ChType>>,
    pub num_rows: usize,
    pub columns: Vec<Vec<Value>>,
}

impl Block {
    /// Row-oriented view of the block.
    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.num_rows).map(move |row| {
            self.columns
                .iter()
                .map(|col| col[row].clone())
                .collect::<Vec<_>>()
        })
    }
}

/// Reads blocks off a byte source until clean end of stream.
pub struct NativeReader {
    source: ByteSource,
    ctx: ReadContext,
    schema: Vec<(String, Arc<ChType>)>,
    blocks_read: usize,
}

impl NativeReader {
    pub fn new(source: ByteSource, ctx: ReadContext) -> Self {
        Self {
            source,
            ctx,
            schema: Vec::new(),
            blocks_read: 0,
        }
    }

    /// Schema captured from the first block: empty until one block has
    /// been read.
    pub fn schema(&self) -> &[(String, Arc<ChType>)] {
        &self.schema
    }

    pub fn blocks_read(&self) -> usize {
        self.blocks_read
    }

    /// Next block, or `None` on clean end of stream. An end-of-stream
    /// inside a block propagates as [`Error::StreamComplete`] so the
    /// caller can distinguish truncation.
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        if self.source.at_end()? {
            return Ok(None);
        }
        if self.ctx.block_info {
            read_block_info(&mut self.source)?;
        }
        let num_cols = self.source.read_leb128()? as usize;
        let num_rows = self.source.read_leb128()? as usize;
        let mut column_names = Vec::with_capacity(num_cols);
        let mut column_types = Vec::with_capacity(num_cols);
        let mut columns = Vec::with_capacity(num_cols);
        for col_ix in 0..num_cols {
            let name = self.source.read_leb128_str()?;
            let type_name = self.source.read_leb128_str()?;
            let ch_type = if self.blocks_read == 0 {
                let ch_type = get_type(&type_name)?;
                self.schema.push((name.clone(), Arc::clone(&ch_type)));
                ch_type
            } else {
                let (_, expected) = self.schema.get(col_ix).ok_or_else(|| {
                    Error::StreamFailure(format!(
                        "block {} has more columns than the first block",
                        self.blocks_read
                    ))
                })?;
                let ch_type = get_type(&type_name)?;
                if ch_type.name != expected.name {
                    return Err(Error::StreamFailure(format!(
                        "column '{name}' changed type from {} to {} in block {}",
                        expected.name, ch_type.name, self.blocks_read
                    )));
                }
                ch_type
            };
            self.ctx.column_name.clone_from(&name);
            let prefix = codec::read_prefix(&ch_type, &mut self.source, &self.ctx)?;
            let column =
                codec::read_data(&ch_type, &mut self.source, num_rows, &self.ctx, &prefix)?;
            column_names.push(name);
            column_types.push(ch_type);
            columns.push(column);
        }
        self.blocks_read += 1;
        Ok(Some(Block {
            column_names,
            column_types,
            num_rows,
            columns,
        }))
    }
}

/// Consumes the block-info envelope sent ahead of the column count when
/// the connection pinned a client protocol version: numbered fields for
/// the overflow flag and bucket number, terminated by field 0.
fn read_block_info(source: &mut ByteSource) -> Result<()> {
    loop {
        match source.read_leb128()? {
            0 => return Ok(()),
            1 => {
                source.read_byte()?; // is_overflows
            }
            2 => {
                source.read_bytes(4)?; // bucket_num
            }
            other => {
                return Err(Error::StreamFailure(format!(
                    "unrecognized block info field {other}"
                )));
            }
        }
    }
}

/// Encodes one insert block: header, then per-column name, type name,
/// prefix, and data.
pub fn write_block(
    column_names: &[String],
    column_types: &[Arc<ChType>],
    columns: &[Vec<Value>],
    sink: &mut ByteSink,
    ctx: &mut WriteContext,
) -> Result<()> {
    if column_names.len() != column_types.len() || column_names.len() != columns.len() {
        return Err(Error::Programming(format!(
            "mismatched column counts: {} names, {} types, {} data columns",
            column_names.len(),
            column_types.len(),
            columns.len()
        )));
    }
    let num_rows = columns.first().map_or(0, Vec::len);
    if let Some(bad) = columns.iter().position(|c| c.len() != num_rows) {
        return Err(Error::Programming(format!(
            "column '{}' has {} rows, expected {num_rows}",
            column_names[bad],
            columns[bad].len()
        )));
    }
    sink.write_leb128(column_names.len() as u64);
    sink.write_leb128(num_rows as u64);
    for ((name, ch_type), column) in column_names.iter().zip(column_types).zip(columns) {
        ctx.column_name.clone_from(name);
        sink.write_leb128_str(name);
        sink.write_leb128_str(&codec::insert_name(ch_type, ctx));
        codec::write_column(ch_type, column, sink, ctx)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn block_bytes(columns: &[(&str, &str, Vec<Value>)]) -> Bytes {
        let mut sink = ByteSink::new();
        let names: Vec<String> = columns.iter().map(|(n, _, _)| (*n).to_owned()).collect();
        let types: Vec<Arc<ChType>> = columns
            .iter()
            .map(|(_, t, _)| get_type(t).unwrap())
            .collect();
        let data: Vec<Vec<Value>> = columns.iter().map(|(_, _, d)| d.clone()).collect();
        write_block(&names, &types, &data, &mut sink, &mut WriteContext::new()).unwrap();
        sink.take()
    }

    #[test]
    fn single_block_round_trip() {
        let encoded = block_bytes(&[
            (
                "id",
                "UInt32",
                vec![Value::UInt32(1), Value::UInt32(2), Value::UInt32(3)],
            ),
            (
                "val",
                "Nullable(Int8)",
                vec![Value::Int8(1), Value::Null, Value::Int8(3)],
            ),
            (
                "note",
                "String",
                vec![
                    Value::String("a".to_owned()),
                    Value::String("—".to_owned()),
                    Value::String("ω".to_owned()),
                ],
            ),
        ]);
        let mut reader = NativeReader::new(ByteSource::from_bytes(encoded), ReadContext::default());
        let block = reader.next_block().unwrap().expect("one block");
        assert_eq!(block.num_rows, 3);
        assert_eq!(block.column_names, vec!["id", "val", "note"]);
        let rows: Vec<Vec<Value>> = block.rows().collect();
        assert_eq!(
            rows[1],
            vec![Value::UInt32(2), Value::Null, Value::String("—".to_owned())]
        );
        assert!(reader.next_block().unwrap().is_none());
    }

    #[test]
    fn multi_block_stream_totals() {
        let mut all = Vec::new();
        for base in [0u32, 10, 20] {
            let chunk = block_bytes(&[(
                "n",
                "UInt32",
                (base..base + 5).map(Value::UInt32).collect(),
            )]);
            all.push(chunk);
        }
        let mut reader = NativeReader::new(ByteSource::from_chunks(all), ReadContext::default());
        let mut total_rows = 0;
        while let Some(block) = reader.next_block().unwrap() {
            assert_eq!(block.columns[0].len(), block.num_rows);
            total_rows += block.num_rows;
        }
        assert_eq!(total_rows, 15);
        assert_eq!(reader.blocks_read(), 3);
    }

    #[test]
    fn zero_row_block() {
        let encoded = block_bytes(&[("s", "String", vec![])]);
        let mut reader = NativeReader::new(ByteSource::from_bytes(encoded), ReadContext::default());
        let block = reader.next_block().unwrap().expect("block");
        assert_eq!(block.num_rows, 0);
        assert!(reader.next_block().unwrap().is_none());
    }

    #[test]
    fn empty_response_has_no_blocks() {
        let mut reader =
            NativeReader::new(ByteSource::from_chunks(Vec::new()), ReadContext::default());
        assert!(reader.next_block().unwrap().is_none());
    }

    #[test]
    fn type_change_across_blocks_fails() {
        let mut stream = block_bytes(&[("x", "UInt32", vec![Value::UInt32(1)])]).to_vec();
        stream.extend_from_slice(&block_bytes(&[("x", "Int64", vec![Value::Int64(1)])]));
        let mut reader =
            NativeReader::new(ByteSource::from_bytes(stream), ReadContext::default());
        reader.next_block().unwrap();
        assert!(matches!(
            reader.next_block(),
            Err(Error::StreamFailure(_))
        ));
    }

    #[test]
    fn truncated_block_reports_stream_complete() {
        let encoded = block_bytes(&[("x", "UInt64", vec![Value::UInt64(1), Value::UInt64(2)])]);
        let truncated = encoded.slice(..encoded.len() - 4);
        let mut reader =
            NativeReader::new(ByteSource::from_bytes(truncated), ReadContext::default());
        assert!(matches!(
            reader.next_block(),
            Err(Error::StreamComplete)
        ));
    }

    #[test]
    fn block_info_envelope_is_consumed() {
        let encoded = block_bytes(&[("x", "UInt8", vec![Value::UInt8(9)])]);
        let mut framed = vec![0x01, 0x00, 0x02, 0xff, 0xff, 0xff, 0xff, 0x00];
        framed.extend_from_slice(&encoded);
        let mut ctx = ReadContext::default();
        ctx.block_info = true;
        let mut reader = NativeReader::new(ByteSource::from_bytes(framed), ctx);
        let block = reader.next_block().unwrap().expect("block");
        assert_eq!(block.columns[0], vec![Value::UInt8(9)]);
        assert!(reader.next_block().unwrap().is_none());
    }

    #[test]
    fn mismatched_row_counts_rejected_on_write() {
        let names = vec!["a".to_owned(), "b".to_owned()];
        let types = vec![get_type("UInt8").unwrap(), get_type("UInt8").unwrap()];
        let data = vec![vec![Value::UInt8(1)], vec![]];
        let mut sink = ByteSink::new();
        let err = write_block(&names, &types, &data, &mut sink, &mut WriteContext::new());
        assert!(matches!(err, Err(Error::Programming(_))));
    }
}
