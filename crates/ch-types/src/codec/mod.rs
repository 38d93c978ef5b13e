//! Native-format column codec.
//!
//! Four operations per type: read prefix, read data, write prefix, write
//! data. The wrapper layers (`Nullable` null maps, `LowCardinality`
//! dictionaries) are handled here; the per-kind encodings live in the
//! submodules.
//!
//! Conventions shared by every leaf writer:
//! - `Value::Null` encodes as the type's zero value. The nullable wrapper
//!   has already recorded the null positions in the null map, and
//!   LowCardinality dictionaries reserve key 0 for it.
//! - A value that cannot encode under the column type raises
//!   [`Error::Data`] naming the current column.

pub mod container;
pub mod dynamic;
pub mod lowcard;
pub mod network;
pub mod scalar;
pub mod special;
pub mod string;
pub mod temporal;

use std::sync::Arc;

use crate::binary::{ByteSink, ByteSource};
use crate::context::{ReadContext, WriteContext};
use crate::error::{Error, Result};
use crate::types::{ChType, TypeKind};
use crate::value::Value;

/// Per-column header state captured before the row data. Only
/// LowCardinality, Variant, Dynamic, and JSON columns carry real prefixes;
/// containers hold their children's.
#[derive(Debug, Default)]
pub enum Prefix {
    #[default]
    None,
    Child(Box<Prefix>),
    Children(Vec<Prefix>),
    Variant(VariantPrefix),
    Dynamic(DynamicPrefix),
    Json(JsonPrefix),
}

#[derive(Debug)]
pub struct VariantPrefix {
    pub discriminator_mode: u64,
    pub elements: Vec<Prefix>,
}

/// Variant layout discovered from a Dynamic column prefix: the inlined
/// type names plus the trailing String fallback.
#[derive(Debug)]
pub struct DynamicPrefix {
    pub variant_types: Vec<Arc<ChType>>,
    pub elements: Vec<Prefix>,
}

#[derive(Debug)]
pub struct JsonPrefix {
    pub serialize_version: u64,
    pub dynamic_paths: Vec<String>,
    pub typed: Vec<Prefix>,
    pub dynamic: Vec<DynamicPrefix>,
}

/// Reads a column's prefix bytes. Must run before any data read, even for
/// columns nested inside containers.
pub fn read_prefix(t: &ChType, src: &mut ByteSource, ctx: &ReadContext) -> Result<Prefix> {
    if t.low_card {
        let version = src.read_u64()?;
        if version != lowcard::LOW_CARD_VERSION {
            tracing::warn!(version, column = %ctx.column_name, "unexpected low cardinality version");
        }
    }
    match &t.kind {
        TypeKind::Array(element) => Ok(Prefix::Child(Box::new(read_prefix(element, src, ctx)?))),
        TypeKind::Tuple { element_types, .. } | TypeKind::Nested { element_types, .. } => {
            let children = element_types
                .iter()
                .map(|e| read_prefix(e, src, ctx))
                .collect::<Result<Vec<_>>>()?;
            Ok(Prefix::Children(children))
        }
        TypeKind::Map { key, value } => Ok(Prefix::Children(vec![
            read_prefix(key, src, ctx)?,
            read_prefix(value, src, ctx)?,
        ])),
        TypeKind::Variant { element_types } => {
            let discriminator_mode = src.read_u64()?;
            let elements = element_types
                .iter()
                .map(|e| read_prefix(e, src, ctx))
                .collect::<Result<Vec<_>>>()?;
            Ok(Prefix::Variant(VariantPrefix {
                discriminator_mode,
                elements,
            }))
        }
        TypeKind::Dynamic { .. } => Ok(Prefix::Dynamic(dynamic::read_dynamic_prefix(src, ctx)?)),
        TypeKind::Json(decl) => Ok(Prefix::Json(dynamic::read_json_prefix(decl, src, ctx)?)),
        TypeKind::SimpleAggregateFunction { value } => read_prefix(value, src, ctx),
        _ => Ok(Prefix::None),
    }
}

/// Writes a column's prefix bytes.
pub fn write_prefix(t: &ChType, sink: &mut ByteSink, ctx: &WriteContext) -> Result<()> {
    if t.low_card {
        sink.write_u64(lowcard::LOW_CARD_VERSION);
    }
    match &t.kind {
        TypeKind::Array(element) => write_prefix(element, sink, ctx),
        TypeKind::Tuple { element_types, .. } | TypeKind::Nested { element_types, .. } => {
            for element in element_types {
                write_prefix(element, sink, ctx)?;
            }
            Ok(())
        }
        TypeKind::Map { key, value } => {
            write_prefix(key, sink, ctx)?;
            write_prefix(value, sink, ctx)
        }
        TypeKind::Variant { element_types } => {
            sink.write_u64(0);
            for element in element_types {
                write_prefix(element, sink, ctx)?;
            }
            Ok(())
        }
        // Dynamic inserts are typed as String; no prefix.
        TypeKind::Dynamic { .. } => Ok(()),
        TypeKind::Json(_) => {
            if ctx.json_serialization_version > 0 {
                sink.write_u64(ctx.json_serialization_version);
            }
            Ok(())
        }
        TypeKind::ObjectJson => {
            sink.write_u8(0x01);
            Ok(())
        }
        TypeKind::SimpleAggregateFunction { value } => write_prefix(value, sink, ctx),
        _ => Ok(()),
    }
}

/// Prefix plus data read for a standalone column.
pub fn read_column(
    t: &ChType,
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
) -> Result<Vec<Value>> {
    let prefix = read_prefix(t, src, ctx)?;
    read_data(t, src, num_rows, ctx, &prefix)
}

/// Prefix plus data write for a standalone column.
pub fn write_column(
    t: &ChType,
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    write_prefix(t, sink, ctx)?;
    write_data(t, column, sink, ctx)
}

/// Reads `num_rows` values, applying the wrapper layers.
pub fn read_data(
    t: &ChType,
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
    prefix: &Prefix,
) -> Result<Vec<Value>> {
    if t.low_card {
        return lowcard::read_low_card(t, src, num_rows, ctx, prefix);
    }
    if t.nullable {
        let null_map = src.read_bytes(num_rows)?;
        let mut column = read_base(t, src, num_rows, ctx, prefix)?;
        let sentinel = null_sentinel(t, ctx);
        for (ix, flag) in null_map.iter().enumerate() {
            if *flag != 0 {
                column[ix] = sentinel.clone();
            }
        }
        return Ok(column);
    }
    read_base(t, src, num_rows, ctx, prefix)
}

/// Writes a column's data, applying the wrapper layers.
pub fn write_data(
    t: &ChType,
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    if t.low_card {
        return lowcard::write_low_card(t, column, sink, ctx);
    }
    if t.nullable {
        for v in column {
            sink.write_u8(u8::from(v.is_null()));
        }
    } else if let Some(pos) = column.iter().position(Value::is_null) {
        // Non-nullable leaf writers zero-fill nulls when a wrapper above
        // them owns the null map; a bare column rejects them. Sum types
        // and JSON carry their own null encodings.
        if !matches!(
            t.kind,
            TypeKind::Variant { .. }
                | TypeKind::Dynamic { .. }
                | TypeKind::Nothing
                | TypeKind::Json(_)
                | TypeKind::ObjectJson
        ) {
            return Err(Error::Data(format!(
                "null value at row {pos} for non-nullable column '{}' ({})",
                ctx.column_name, t.name
            )));
        }
    }
    write_base(t, column, sink, ctx)
}

/// The null substitute selected by the read context.
pub(crate) fn null_sentinel(t: &ChType, ctx: &ReadContext) -> Value {
    if ctx.use_none {
        Value::Null
    } else {
        t.zero_value()
    }
}

fn read_base(
    t: &ChType,
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
    prefix: &Prefix,
) -> Result<Vec<Value>> {
    match &t.kind {
        TypeKind::Int8
        | TypeKind::Int16
        | TypeKind::Int32
        | TypeKind::Int64
        | TypeKind::UInt8
        | TypeKind::UInt16
        | TypeKind::UInt32
        | TypeKind::UInt64 => scalar::read_int(&t.kind, src, num_rows, ctx),
        TypeKind::Int128 | TypeKind::UInt128 | TypeKind::Int256 | TypeKind::UInt256 => {
            scalar::read_big_int(&t.kind, src, num_rows, ctx)
        }
        TypeKind::Float32 | TypeKind::Float64 | TypeKind::Float16 | TypeKind::BFloat16 => {
            scalar::read_float(&t.kind, src, num_rows)
        }
        TypeKind::Bool => scalar::read_bool(src, num_rows),
        TypeKind::Decimal {
            precision,
            scale,
            bits,
        } => scalar::read_decimal(*precision, *scale, *bits, src, num_rows, ctx),
        TypeKind::String => string::read_string(src, num_rows, ctx),
        TypeKind::FixedString(size) => string::read_fixed_string(*size, src, num_rows, ctx),
        TypeKind::Date => temporal::read_date(src, num_rows, ctx),
        TypeKind::Date32 => temporal::read_date32(src, num_rows, ctx),
        TypeKind::DateTime { tz } => temporal::read_datetime(*tz, src, num_rows, ctx),
        TypeKind::DateTime64 { scale, tz } => {
            temporal::read_datetime64(*scale, *tz, src, num_rows, ctx)
        }
        TypeKind::Time => temporal::read_time(src, num_rows, ctx),
        TypeKind::Time64 { scale } => temporal::read_time64(*scale, src, num_rows, ctx),
        TypeKind::Uuid => network::read_uuid(src, num_rows, ctx),
        TypeKind::Ipv4 => network::read_ipv4(src, num_rows, ctx),
        TypeKind::Ipv6 => network::read_ipv6(src, num_rows, ctx),
        TypeKind::Enum { width, table } => special::read_enum(*width, table, src, num_rows),
        TypeKind::Array(element) => container::read_array(element, src, num_rows, ctx, prefix),
        TypeKind::Tuple {
            names,
            element_types,
        } => container::read_tuple(names, element_types, src, num_rows, ctx, prefix),
        TypeKind::Map { key, value } => container::read_map(key, value, src, num_rows, ctx, prefix),
        TypeKind::Nested {
            names,
            element_types,
        } => container::read_nested(names, element_types, src, num_rows, ctx, prefix),
        TypeKind::Variant { element_types } => {
            let Prefix::Variant(state) = prefix else {
                return Err(Error::Internal(format!(
                    "missing Variant prefix for column '{}'",
                    ctx.column_name
                )));
            };
            dynamic::read_variant(element_types, &state.elements, src, num_rows, ctx)
        }
        TypeKind::Dynamic { .. } => {
            let Prefix::Dynamic(state) = prefix else {
                return Err(Error::Internal(format!(
                    "missing Dynamic prefix for column '{}'",
                    ctx.column_name
                )));
            };
            dynamic::read_variant(&state.variant_types, &state.elements, src, num_rows, ctx)
        }
        TypeKind::Json(decl) => {
            let Prefix::Json(state) = prefix else {
                return Err(Error::Internal(format!(
                    "missing JSON prefix for column '{}'",
                    ctx.column_name
                )));
            };
            dynamic::read_json(decl, state, src, num_rows, ctx)
        }
        TypeKind::QBit { element, dimension } => {
            special::read_qbit(element, *dimension, src, num_rows)
        }
        TypeKind::Nothing => special::read_nothing(src, num_rows),
        TypeKind::SimpleAggregateFunction { value } => read_data(value, src, num_rows, ctx, prefix),
        TypeKind::Unsupported | TypeKind::ObjectJson => {
            Err(Error::NotSupported(format!("{} deserialization", t.name)))
        }
    }
}

fn write_base(
    t: &ChType,
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    match &t.kind {
        TypeKind::Int8
        | TypeKind::Int16
        | TypeKind::Int32
        | TypeKind::Int64
        | TypeKind::UInt8
        | TypeKind::UInt16
        | TypeKind::UInt32
        | TypeKind::UInt64 => scalar::write_int(&t.kind, column, sink, ctx),
        TypeKind::Int128 | TypeKind::UInt128 | TypeKind::Int256 | TypeKind::UInt256 => {
            scalar::write_big_int(&t.kind, column, sink, ctx)
        }
        TypeKind::Float32 | TypeKind::Float64 | TypeKind::Float16 | TypeKind::BFloat16 => {
            scalar::write_float(&t.kind, column, sink, ctx)
        }
        TypeKind::Bool => scalar::write_bool(column, sink),
        TypeKind::Decimal { scale, bits, .. } => {
            scalar::write_decimal(*scale, *bits, column, sink, ctx)
        }
        TypeKind::String => string::write_string(column, sink, ctx),
        TypeKind::FixedString(size) => string::write_fixed_string(*size, column, sink, ctx),
        TypeKind::Date => temporal::write_date(column, sink, ctx),
        TypeKind::Date32 => temporal::write_date32(column, sink, ctx),
        TypeKind::DateTime { tz } => temporal::write_datetime(*tz, column, sink, ctx),
        TypeKind::DateTime64 { scale, tz } => {
            temporal::write_datetime64(*scale, *tz, column, sink, ctx)
        }
        TypeKind::Time => temporal::write_time(column, sink, ctx),
        TypeKind::Time64 { scale } => temporal::write_time64(*scale, column, sink, ctx),
        TypeKind::Uuid => network::write_uuid(column, sink, ctx),
        TypeKind::Ipv4 => network::write_ipv4(column, sink, ctx),
        TypeKind::Ipv6 => network::write_ipv6(column, sink, ctx),
        TypeKind::Enum { width, table } => special::write_enum(*width, table, column, sink, ctx),
        TypeKind::Array(element) => container::write_array(element, column, sink, ctx),
        TypeKind::Tuple {
            names,
            element_types,
        } => container::write_tuple(names, element_types, column, sink, ctx),
        TypeKind::Map { key, value } => container::write_map(key, value, column, sink, ctx),
        TypeKind::Nested {
            names,
            element_types,
        } => container::write_nested(names, element_types, column, sink, ctx),
        TypeKind::Variant { element_types } => {
            dynamic::write_variant(element_types, column, sink, ctx)
        }
        TypeKind::Dynamic { .. } => dynamic::write_dynamic(column, sink, ctx),
        TypeKind::Json(_) | TypeKind::ObjectJson => dynamic::write_json(column, sink, ctx),
        TypeKind::QBit { element, dimension } => {
            special::write_qbit(element, *dimension, column, sink, ctx)
        }
        TypeKind::Nothing => special::write_nothing(column, sink),
        TypeKind::SimpleAggregateFunction { value } => write_data(value, column, sink, ctx),
        TypeKind::Unsupported => Err(Error::NotSupported(format!("{} serialization", t.name))),
    }
}

/// The type name written into insert block headers. Dynamic columns (and
/// JSON columns under the legacy serialization) are always sent to the
/// server as String.
pub fn insert_name(t: &ChType, ctx: &WriteContext) -> String {
    match &t.kind {
        TypeKind::Dynamic { .. } => "String".to_owned(),
        TypeKind::Json(_) if ctx.json_serialization_version == 0 => "String".to_owned(),
        _ => t.name.clone(),
    }
}
