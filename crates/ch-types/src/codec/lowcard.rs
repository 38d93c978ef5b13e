//! LowCardinality dictionary encoding.
//!
//! Layout: u64 version, u64 flags+index-width, u64 key count, the
//! dictionary keys as a plain column of the inner type with Nullable
//! stripped, u64 index count (equal to the row count), then the dense
//! index array. Dictionary key 0 is the null slot when the inner type is
//! nullable. A zero-row column writes nothing at all after the version.

use std::collections::HashMap;

use crate::binary::{ByteSink, ByteSource};
use crate::codec::{null_sentinel, read_data, write_data, Prefix};
use crate::context::{ReadContext, WriteContext};
use crate::error::{Error, Result};
use crate::types::ChType;
use crate::value::Value;

pub const LOW_CARD_VERSION: u64 = 1;

/// Flag bit: the block carries its own dictionary keys.
const HAS_ADDITIONAL_KEYS: u64 = 1 << 9;
/// Flag bit: a new dictionary replaces any shared one.
const NEEDS_UPDATE_DICTIONARY: u64 = 1 << 10;

/// The inner type serialized for dictionary keys: wrappers stripped.
fn key_type(t: &ChType) -> ChType {
    ChType::new(t.base_name.clone(), t.kind.clone(), false, false)
}

pub fn read_low_card(
    t: &ChType,
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
    _prefix: &Prefix,
) -> Result<Vec<Value>> {
    if num_rows == 0 {
        return Ok(Vec::new());
    }
    let key_data = src.read_u64()?;
    let index_width = 1usize << (key_data & 0xff);
    let key_count = src.read_u64()? as usize;
    let keys_type = key_type(t);
    let mut keys = read_data(&keys_type, src, key_count, ctx, &Prefix::None)?;
    if t.nullable {
        if keys.is_empty() {
            return Err(Error::Data(format!(
                "empty low cardinality dictionary for nullable column '{}'",
                ctx.column_name
            )));
        }
        keys[0] = null_sentinel(t, ctx);
    }
    let index_count = src.read_u64()? as usize;
    if index_count != num_rows {
        return Err(Error::Data(format!(
            "low cardinality index count {index_count} does not match {num_rows} rows in column '{}'",
            ctx.column_name
        )));
    }
    let indexes: Vec<usize> = match index_width {
        1 => src.read_u8s(num_rows)?.into_iter().map(usize::from).collect(),
        2 => src.read_u16s(num_rows)?.into_iter().map(usize::from).collect(),
        4 => src.read_u32s(num_rows)?.into_iter().map(|v| v as usize).collect(),
        8 => src.read_u64s(num_rows)?.into_iter().map(|v| v as usize).collect(),
        other => {
            return Err(Error::Data(format!(
                "unsupported low cardinality index width {other} in column '{}'",
                ctx.column_name
            )));
        }
    };
    let mut out = Vec::with_capacity(num_rows);
    for ix in indexes {
        let key = keys.get(ix).ok_or_else(|| {
            Error::Data(format!(
                "low cardinality index {ix} outside dictionary of {key_count} keys in column '{}'",
                ctx.column_name
            ))
        })?;
        out.push(key.clone());
    }
    Ok(out)
}

pub fn write_low_card(
    t: &ChType,
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    if column.is_empty() {
        return Ok(());
    }
    let keys_type = key_type(t);
    let mut keys: Vec<Value> = Vec::new();
    let mut indexes: Vec<u64> = Vec::with_capacity(column.len());
    // Dictionary deduplication keys on the encoded bytes of each value,
    // which sidesteps float equality.
    let mut seen: HashMap<Vec<u8>, u64> = HashMap::new();
    if t.nullable {
        // Key 0 is the null slot, serialized as the inner type's zero.
        keys.push(keys_type.zero_value());
    }
    let mut scratch = ByteSink::new();
    for v in column {
        if v.is_null() {
            if !t.nullable {
                return Err(Error::Data(format!(
                    "null value for non-nullable column '{}' ({})",
                    ctx.column_name, t.name
                )));
            }
            indexes.push(0);
            continue;
        }
        write_data(&keys_type, std::slice::from_ref(v), &mut scratch, ctx)?;
        let encoded = scratch.take().to_vec();
        let next_key = keys.len() as u64;
        let entry = seen.entry(encoded).or_insert_with(|| {
            keys.push(v.clone());
            next_key
        });
        indexes.push(*entry);
    }
    let index_width_power = (keys.len() as u64).ilog2() >> 3;
    sink.write_u64(HAS_ADDITIONAL_KEYS | NEEDS_UPDATE_DICTIONARY | u64::from(index_width_power));
    sink.write_u64(keys.len() as u64);
    write_data(&keys_type, &keys, sink, ctx)?;
    sink.write_u64(indexes.len() as u64);
    match 1u32 << index_width_power {
        1 => {
            for ix in indexes {
                sink.write_u8(ix as u8);
            }
        }
        2 => {
            for ix in indexes {
                sink.write_u16(ix as u16);
            }
        }
        4 => {
            for ix in indexes {
                sink.write_u32(ix as u32);
            }
        }
        _ => {
            for ix in indexes {
                sink.write_u64(ix);
            }
        }
    }
    Ok(())
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

    #[test]
    fn low_card_string_round_trip() {
        let column: Vec<Value> = ["a", "b", "a", "c", "b", "a"]
            .iter()
            .map(|s| Value::String((*s).to_owned()))
            .collect();
        assert_eq!(round_trip("LowCardinality(String)", column.clone()), column);
    }

    #[test]
    fn low_card_nullable_reserves_key_zero() {
        let column = vec![
            Value::String("x".to_owned()),
            Value::Null,
            Value::String("x".to_owned()),
            Value::Null,
        ];
        assert_eq!(
            round_trip("LowCardinality(Nullable(String))", column.clone()),
            column
        );
    }

    #[test]
    fn empty_low_card_column_writes_only_version() {
        let t = get_type("LowCardinality(String)").unwrap();
        let mut sink = ByteSink::new();
        write_column(&t, &[], &mut sink, &WriteContext::new()).unwrap();
        assert_eq!(sink.len(), 8);
        let mut src = ByteSource::from_bytes(sink.take());
        assert_eq!(read_column(&t, &mut src, 0, &ReadContext::default()).unwrap(), vec![]);
    }

    #[test]
    fn index_width_grows_with_dictionary() {
        // 300 distinct keys force 2-byte indexes.
        let column: Vec<Value> = (0..300).map(|i| Value::String(format!("k{i}"))).collect();
        let t = get_type("LowCardinality(String)").unwrap();
        let mut sink = ByteSink::new();
        write_column(&t, &column, &mut sink, &WriteContext::new()).unwrap();
        let encoded = sink.take();
        // Skip version, read the flags word: low byte is the width power.
        let width_power = encoded[8];
        assert_eq!(width_power, 1, "expected 2-byte indexes");
        let mut src = ByteSource::from_bytes(encoded);
        assert_eq!(read_column(&t, &mut src, 300, &ReadContext::default()).unwrap(), column);
    }

    #[test]
    fn small_dictionary_uses_single_byte() {
        let column: Vec<Value> = (0..100).map(|i| Value::String(format!("k{}", i % 3))).collect();
        let t = get_type("LowCardinality(String)").unwrap();
        let mut sink = ByteSink::new();
        write_column(&t, &column, &mut sink, &WriteContext::new()).unwrap();
        let encoded = sink.take();
        assert_eq!(encoded[8], 0);
        let mut src = ByteSource::from_bytes(encoded);
        assert_eq!(read_column(&t, &mut src, 100, &ReadContext::default()).unwrap(), column);
    }

    #[test]
    fn low_card_int_round_trip() {
        let column: Vec<Value> = (0..50).map(|i| Value::Int32(i % 5)).collect();
        assert_eq!(round_trip("LowCardinality(Int32)", column.clone()), column);
    }
}
