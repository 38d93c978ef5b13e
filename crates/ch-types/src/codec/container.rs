//! Array, Tuple, Map, and Nested encodings.
//!
//! Arrays serialize as cumulative u64 offsets followed by the flattened
//! child column; directly nested arrays flatten to one offsets array per
//! depth level. Maps are arrays of key/value pairs; Nested is an array of
//! named tuples.

use std::sync::Arc;

use crate::binary::{ByteSink, ByteSource};
use crate::codec::{Prefix, read_data, write_data};
use crate::context::{ReadContext, WriteContext};
use crate::error::{Error, Result};
use crate::formats::ReadFormat;
use crate::types::{ChType, TypeKind};
use crate::value::Value;

pub fn read_array(
    element: &Arc<ChType>,
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
    prefix: &Prefix,
) -> Result<Vec<Value>> {
    let mut final_type = element;
    let mut final_prefix = child_prefix(prefix);
    let mut depth = 1;
    while let TypeKind::Array(inner) = &final_type.kind {
        if final_type.nullable || final_type.low_card {
            break;
        }
        depth += 1;
        final_type = inner;
        final_prefix = child_prefix(final_prefix);
    }

    let mut offset_levels = Vec::with_capacity(depth);
    let mut level_size = num_rows;
    for _ in 0..depth {
        let offsets = src.read_u64s(level_size)?;
        level_size = offsets.last().copied().unwrap_or(0) as usize;
        offset_levels.push(offsets);
    }

    let mut values = if level_size > 0 {
        read_data(final_type, src, level_size, ctx, final_prefix)?
    } else {
        Vec::new()
    };
    for offsets in offset_levels.iter().rev() {
        let mut grouped = Vec::with_capacity(offsets.len());
        let mut last = 0usize;
        for offset in offsets {
            let end = *offset as usize;
            grouped.push(Value::Array(values[last..end].to_vec()));
            last = end;
        }
        values = grouped;
    }
    Ok(values)
}

pub fn write_array(
    element: &Arc<ChType>,
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    let mut final_type = element;
    let mut depth = 1;
    while let TypeKind::Array(inner) = &final_type.kind {
        if final_type.nullable || final_type.low_card {
            break;
        }
        depth += 1;
        final_type = inner;
    }

    let mut current: Vec<Value> = column.to_vec();
    for _ in 0..depth {
        let mut offsets = Vec::with_capacity(current.len());
        let mut flat = Vec::new();
        let mut total = 0u64;
        for v in &current {
            let items = match v {
                Value::Array(items) | Value::Tuple(items) => items.as_slice(),
                Value::Null => &[],
                other => {
                    return Err(Error::Data(format!(
                        "expected an array for column '{}', got {other:?}",
                        ctx.column_name
                    )));
                }
            };
            total += items.len() as u64;
            offsets.push(total);
            flat.extend_from_slice(items);
        }
        for offset in offsets {
            sink.write_u64(offset);
        }
        current = flat;
    }
    write_data(final_type, &current, sink, ctx)
}

fn child_prefix(prefix: &Prefix) -> &Prefix {
    match prefix {
        Prefix::Child(inner) => inner,
        _ => &Prefix::None,
    }
}

fn children_prefix(prefix: &Prefix, ix: usize) -> &Prefix {
    match prefix {
        Prefix::Children(list) => list.get(ix).unwrap_or(&Prefix::None),
        _ => &Prefix::None,
    }
}

pub fn read_tuple(
    names: &[String],
    element_types: &[Arc<ChType>],
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
    prefix: &Prefix,
) -> Result<Vec<Value>> {
    let mut columns = Vec::with_capacity(element_types.len());
    for (ix, element) in element_types.iter().enumerate() {
        columns.push(read_data(element, src, num_rows, ctx, children_prefix(prefix, ix))?);
    }
    let fmt = ctx.read_format("Tuple");
    let named = !names.is_empty() && fmt != ReadFormat::Tuple;
    let mut out = Vec::with_capacity(num_rows);
    for row in 0..num_rows {
        if named {
            let entries: Vec<(Value, Value)> = names
                .iter()
                .zip(&columns)
                .map(|(name, col)| (Value::String(name.clone()), col[row].clone()))
                .collect();
            if fmt == ReadFormat::Json {
                let map: serde_json::Map<String, serde_json::Value> = names
                    .iter()
                    .zip(&columns)
                    .map(|(name, col)| (name.clone(), col[row].to_json()))
                    .collect();
                out.push(Value::String(
                    serde_json::Value::Object(map).to_string(),
                ));
            } else {
                out.push(Value::Map(entries));
            }
        } else {
            out.push(Value::Tuple(
                columns.iter().map(|col| col[row].clone()).collect(),
            ));
        }
    }
    Ok(out)
}

pub fn write_tuple(
    names: &[String],
    element_types: &[Arc<ChType>],
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    let mut element_columns: Vec<Vec<Value>> =
        vec![Vec::with_capacity(column.len()); element_types.len()];
    for v in column {
        match v {
            Value::Tuple(items) | Value::Array(items) => {
                if items.len() != element_types.len() {
                    return Err(Error::Data(format!(
                        "tuple of {} elements does not match {}-element column '{}'",
                        items.len(),
                        element_types.len(),
                        ctx.column_name
                    )));
                }
                for (ix, item) in items.iter().enumerate() {
                    element_columns[ix].push(item.clone());
                }
            }
            Value::Map(entries) if !names.is_empty() => {
                for (ix, name) in names.iter().enumerate() {
                    let found = entries
                        .iter()
                        .find(|(k, _)| k.as_str() == Some(name))
                        .map(|(_, v)| v.clone())
                        .unwrap_or(Value::Null);
                    element_columns[ix].push(found);
                }
            }
            Value::Null => {
                for element_column in &mut element_columns {
                    element_column.push(Value::Null);
                }
            }
            other => {
                return Err(Error::Data(format!(
                    "expected a tuple for column '{}', got {other:?}",
                    ctx.column_name
                )));
            }
        }
    }
    for (element, element_column) in element_types.iter().zip(&element_columns) {
        write_data(element, element_column, sink, ctx)?;
    }
    Ok(())
}

pub fn read_map(
    key: &Arc<ChType>,
    value: &Arc<ChType>,
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
    prefix: &Prefix,
) -> Result<Vec<Value>> {
    let offsets = src.read_u64s(num_rows)?;
    let total = offsets.last().copied().unwrap_or(0) as usize;
    let keys = read_data(key, src, total, ctx, children_prefix(prefix, 0))?;
    let values = read_data(value, src, total, ctx, children_prefix(prefix, 1))?;
    let mut pairs = keys.into_iter().zip(values);
    let mut out = Vec::with_capacity(num_rows);
    let mut last = 0usize;
    for offset in offsets {
        let end = offset as usize;
        out.push(Value::Map(pairs.by_ref().take(end - last).collect()));
        last = end;
    }
    Ok(out)
}

pub fn write_map(
    key: &Arc<ChType>,
    value: &Arc<ChType>,
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    let mut keys = Vec::new();
    let mut values = Vec::new();
    let mut total = 0u64;
    let mut offsets = Vec::with_capacity(column.len());
    for v in column {
        let entries = match v {
            Value::Map(entries) => entries.as_slice(),
            Value::Null => &[],
            other => {
                return Err(Error::Data(format!(
                    "expected a map for column '{}', got {other:?}",
                    ctx.column_name
                )));
            }
        };
        total += entries.len() as u64;
        offsets.push(total);
        for (k, v) in entries {
            keys.push(k.clone());
            values.push(v.clone());
        }
    }
    for offset in offsets {
        sink.write_u64(offset);
    }
    write_data(key, &keys, sink, ctx)?;
    write_data(value, &values, sink, ctx)
}

/// Nested reads as `Array(Tuple(fields...))`: one offsets array, then the
/// field columns over the flattened length.
pub fn read_nested(
    names: &[String],
    element_types: &[Arc<ChType>],
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
    prefix: &Prefix,
) -> Result<Vec<Value>> {
    let offsets = src.read_u64s(num_rows)?;
    let total = offsets.last().copied().unwrap_or(0) as usize;
    let mut columns = Vec::with_capacity(element_types.len());
    for (ix, element) in element_types.iter().enumerate() {
        columns.push(read_data(element, src, total, ctx, children_prefix(prefix, ix))?);
    }
    let mut out = Vec::with_capacity(num_rows);
    let mut last = 0usize;
    for offset in offsets {
        let end = offset as usize;
        let mut rows = Vec::with_capacity(end - last);
        for row in last..end {
            rows.push(Value::Map(
                names
                    .iter()
                    .zip(&columns)
                    .map(|(name, col)| (Value::String(name.clone()), col[row].clone()))
                    .collect(),
            ));
        }
        out.push(Value::Array(rows));
        last = end;
    }
    Ok(out)
}

pub fn write_nested(
    names: &[String],
    element_types: &[Arc<ChType>],
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    let mut offsets = Vec::with_capacity(column.len());
    let mut flat = Vec::new();
    let mut total = 0u64;
    for v in column {
        let rows = match v {
            Value::Array(rows) => rows.as_slice(),
            Value::Null => &[],
            other => {
                return Err(Error::Data(format!(
                    "expected an array of field maps for column '{}', got {other:?}",
                    ctx.column_name
                )));
            }
        };
        total += rows.len() as u64;
        offsets.push(total);
        flat.extend_from_slice(rows);
    }
    for offset in offsets {
        sink.write_u64(offset);
    }
    write_tuple(names, element_types, &flat, sink, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_column, write_column};
    use crate::registry::get_type;

    fn round_trip(type_name: &str, column: Vec<Value>) -> Vec<Value> {
        let t = get_type(type_name).unwrap();
        let mut sink = ByteSink::new();
        write_column(&t, &column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        read_column(&t, &mut src, column.len(), &ReadContext::default()).unwrap()
    }

    fn arr(items: Vec<Value>) -> Value {
        Value::Array(items)
    }

    #[test]
    fn array_round_trip() {
        let column = vec![
            arr(vec![Value::UInt32(1), Value::UInt32(2)]),
            arr(vec![]),
            arr(vec![Value::UInt32(3)]),
        ];
        assert_eq!(round_trip("Array(UInt32)", column.clone()), column);
    }

    #[test]
    fn array_depth_three() {
        let leaf = |v: u32| Value::UInt32(v);
        let column = vec![
            arr(vec![
                arr(vec![arr(vec![leaf(1)]), arr(vec![])]),
                arr(vec![arr(vec![leaf(2), leaf(3)])]),
            ]),
            arr(vec![]),
        ];
        assert_eq!(round_trip("Array(Array(Array(UInt32)))", column.clone()), column);
    }

    #[test]
    fn array_of_nullable_strings() {
        let column = vec![arr(vec![
            Value::String("x".to_owned()),
            Value::Null,
            Value::String("y".to_owned()),
        ])];
        assert_eq!(round_trip("Array(Nullable(String))", column.clone()), column);
    }

    #[test]
    fn empty_array_column() {
        let column: Vec<Value> = Vec::new();
        assert_eq!(round_trip("Array(String)", column.clone()), column);
    }

    #[test]
    fn unnamed_tuple_round_trip() {
        let column = vec![Value::Tuple(vec![
            Value::UInt32(1),
            Value::String("a".to_owned()),
        ])];
        assert_eq!(round_trip("Tuple(UInt32, String)", column.clone()), column);
    }

    #[test]
    fn named_tuple_reads_as_map() {
        let t = get_type("Tuple(id UInt32, name String)").unwrap();
        let column = vec![Value::Tuple(vec![
            Value::UInt32(7),
            Value::String("x".to_owned()),
        ])];
        let mut sink = ByteSink::new();
        write_column(&t, &column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        let decoded = read_column(&t, &mut src, 1, &ReadContext::default()).unwrap();
        assert_eq!(
            decoded,
            vec![Value::Map(vec![
                (Value::String("id".to_owned()), Value::UInt32(7)),
                (Value::String("name".to_owned()), Value::String("x".to_owned())),
            ])]
        );
    }

    #[test]
    fn named_tuple_tuple_format() {
        let t = get_type("Tuple(id UInt32, name String)").unwrap();
        let column = vec![Value::Tuple(vec![
            Value::UInt32(7),
            Value::String("x".to_owned()),
        ])];
        let mut sink = ByteSink::new();
        write_column(&t, &column, &mut sink, &WriteContext::new()).unwrap();
        let mut ctx = ReadContext::default();
        ctx.formats.set_class("Tuple", ReadFormat::Tuple);
        let mut src = ByteSource::from_bytes(sink.take());
        assert_eq!(read_column(&t, &mut src, 1, &ctx).unwrap(), column);
    }

    #[test]
    fn map_round_trip() {
        let column = vec![
            Value::Map(vec![
                (Value::String("a".to_owned()), Value::Int64(1)),
                (Value::String("b".to_owned()), Value::Int64(2)),
            ]),
            Value::Map(vec![]),
        ];
        assert_eq!(round_trip("Map(String, Int64)", column.clone()), column);
    }

    #[test]
    fn map_with_lc_key_and_nullable_value() {
        let column = vec![Value::Map(vec![
            (Value::String("k1".to_owned()), Value::Null),
            (Value::String("k2".to_owned()), Value::Int64(5)),
        ])];
        assert_eq!(
            round_trip("Map(LowCardinality(String), Nullable(Int64))", column.clone()),
            column
        );
    }

    #[test]
    fn nested_round_trip() {
        let column = vec![arr(vec![
            Value::Map(vec![
                (Value::String("x".to_owned()), Value::UInt8(1)),
                (Value::String("s".to_owned()), Value::String("one".to_owned())),
            ]),
            Value::Map(vec![
                (Value::String("x".to_owned()), Value::UInt8(2)),
                (Value::String("s".to_owned()), Value::String("two".to_owned())),
            ]),
        ])];
        assert_eq!(
            round_trip("Nested(x UInt8, s String)", column.clone()),
            column
        );
    }

    #[test]
    fn tuple_arity_mismatch_fails() {
        let t = get_type("Tuple(UInt32, String)").unwrap();
        let mut sink = ByteSink::new();
        let err = write_column(
            &t,
            &[Value::Tuple(vec![Value::UInt32(1)])],
            &mut sink,
            &WriteContext::new(),
        );
        assert!(matches!(err, Err(Error::Data(_))));
    }
}
