//! Enum, Nothing, and QBit encodings.

use std::sync::Arc;

use crate::binary::{ByteSink, ByteSource};
use crate::context::WriteContext;
use crate::error::{Error, Result};
use crate::types::{ChType, EnumTable, TypeKind};
use crate::value::Value;

pub fn read_enum(
    width: u32,
    table: &EnumTable,
    src: &mut ByteSource,
    num_rows: usize,
) -> Result<Vec<Value>> {
    let raw: Vec<i32> = if width == 8 {
        src.read_i8s(num_rows)?.into_iter().map(i32::from).collect()
    } else {
        src.read_i16s(num_rows)?.into_iter().map(i32::from).collect()
    };
    Ok(raw
        .into_iter()
        .map(|v| match table.name_of(v) {
            Some(name) => Value::Enum(name.to_owned()),
            None => Value::Null,
        })
        .collect())
}

pub fn write_enum(
    width: u32,
    table: &EnumTable,
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    for v in column {
        let raw = match v {
            Value::Null => 0,
            Value::Enum(name) | Value::String(name) => table.value_of(name).ok_or_else(|| {
                Error::Data(format!(
                    "'{name}' is not a key of the enum column '{}'",
                    ctx.column_name
                ))
            })?,
            other => {
                let raw = other.to_i128().ok_or_else(|| {
                    Error::Data(format!(
                        "expected an enum key or value for column '{}', got {other:?}",
                        ctx.column_name
                    ))
                })?;
                i32::try_from(raw).ok().filter(|v| table.name_of(*v).is_some()).ok_or_else(
                    || {
                        Error::Data(format!(
                            "{raw} is not a value of the enum column '{}'",
                            ctx.column_name
                        ))
                    },
                )?
            }
        };
        if width == 8 {
            sink.write_i8(raw as i8);
        } else {
            sink.write_i16(raw as i16);
        }
    }
    Ok(())
}

/// `Nothing` rows occupy one placeholder byte each and decode as nulls.
/// The type exists for literal NULL columns and is not meant for inserts.
pub fn read_nothing(src: &mut ByteSource, num_rows: usize) -> Result<Vec<Value>> {
    src.read_bytes(num_rows)?;
    Ok(vec![Value::Null; num_rows])
}

pub fn write_nothing(column: &[Value], sink: &mut ByteSink) -> Result<()> {
    for _ in column {
        sink.write_u8(0x30);
    }
    Ok(())
}

/// QBit vectors are fixed-length float sequences; each row serializes as
/// `dimension` element-width values. A wrong-length vector is a
/// dimension mismatch.
pub fn read_qbit(
    element: &Arc<ChType>,
    dimension: usize,
    src: &mut ByteSource,
    num_rows: usize,
) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(num_rows);
    for _ in 0..num_rows {
        let values = super::scalar::read_float(&element.kind, src, dimension)?;
        out.push(Value::Array(values));
    }
    Ok(out)
}

pub fn write_qbit(
    element: &Arc<ChType>,
    dimension: usize,
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    for v in column {
        let items = match v {
            Value::Null => {
                // Null rows under a Nullable wrapper zero-fill the full
                // vector width.
                let zeros = vec![Value::Float32(0.0); dimension];
                super::scalar::write_float(&element.kind, &zeros, sink, ctx)?;
                continue;
            }
            Value::Array(items) | Value::Tuple(items) => items,
            other => {
                return Err(Error::Data(format!(
                    "expected a vector for column '{}', got {other:?}",
                    ctx.column_name
                )));
            }
        };
        if items.len() != dimension {
            return Err(Error::Data(format!(
                "vector of {} elements does not match QBit dimension {dimension} for column '{}'",
                items.len(),
                ctx.column_name
            )));
        }
        super::scalar::write_float(&element.kind, items, sink, ctx)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_column, write_column};
    use crate::context::ReadContext;
    use crate::registry::get_type;

    #[test]
    fn enum_round_trip_by_key_and_value() {
        let t = get_type("Enum8('a' = 1, 'b' = -2)").unwrap();
        let column = vec![
            Value::Enum("a".to_owned()),
            Value::String("b".to_owned()),
            Value::Int32(1),
        ];
        let mut sink = ByteSink::new();
        write_column(&t, &column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        let decoded = read_column(&t, &mut src, 3, &ReadContext::default()).unwrap();
        assert_eq!(
            decoded,
            vec![
                Value::Enum("a".to_owned()),
                Value::Enum("b".to_owned()),
                Value::Enum("a".to_owned()),
            ]
        );
    }

    #[test]
    fn unknown_enum_key_fails() {
        let t = get_type("Enum8('a' = 1)").unwrap();
        let mut sink = ByteSink::new();
        let err = write_column(
            &t,
            &[Value::String("missing".to_owned())],
            &mut sink,
            &WriteContext::new(),
        );
        assert!(matches!(err, Err(Error::Data(_))));
    }

    #[test]
    fn enum16_negative_values() {
        let t = get_type("Enum16('lo' = -300, 'hi' = 300)").unwrap();
        let column = vec![Value::Enum("lo".to_owned()), Value::Enum("hi".to_owned())];
        let mut sink = ByteSink::new();
        write_column(&t, &column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        assert_eq!(read_column(&t, &mut src, 2, &ReadContext::default()).unwrap(), column);
    }

    #[test]
    fn qbit_round_trip() {
        let t = get_type("QBit(Float32, 4)").unwrap();
        let column = vec![Value::Array(vec![
            Value::Float32(1.0),
            Value::Float32(-2.0),
            Value::Float32(0.5),
            Value::Float32(8.25),
        ])];
        let mut sink = ByteSink::new();
        write_column(&t, &column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        assert_eq!(read_column(&t, &mut src, 1, &ReadContext::default()).unwrap(), column);
    }

    #[test]
    fn qbit_dimension_mismatch() {
        let t = get_type("QBit(Float32, 4)").unwrap();
        let mut sink = ByteSink::new();
        let err = write_column(
            &t,
            &[Value::Array(vec![Value::Float32(1.0)])],
            &mut sink,
            &WriteContext::new(),
        );
        assert!(matches!(err, Err(Error::Data(_))));
    }

    #[test]
    fn aggregate_function_is_unsupported() {
        let t = get_type("AggregateFunction(sum, UInt64)").unwrap();
        let mut src = ByteSource::from_bytes(vec![0u8; 8]);
        let err = read_column(&t, &mut src, 1, &ReadContext::default());
        assert!(matches!(err, Err(Error::NotSupported(msg)) if msg.contains("AggregateFunction")));
    }

    #[test]
    fn simple_aggregate_function_delegates() {
        let t = get_type("SimpleAggregateFunction(max, Int32)").unwrap();
        let column = vec![Value::Int32(9), Value::Int32(-9)];
        let mut sink = ByteSink::new();
        write_column(&t, &column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        assert_eq!(read_column(&t, &mut src, 2, &ReadContext::default()).unwrap(), column);
    }
}
