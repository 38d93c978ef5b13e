//! Variant, Dynamic, and JSON object encodings.
//!
//! All three share the discriminator-packed column layout: one byte per
//! row (255 for null) followed by each member's packed sub-column. Dynamic
//! discovers its member list from the column prefix; JSON adds typed
//! paths, runtime dynamic paths, and a shared-data catch-all.

use std::collections::HashMap;
use std::mem::Discriminant;
use std::sync::Arc;

use percent_encoding::percent_decode_str;

use crate::binary::{ByteSink, ByteSource};
use crate::codec::{read_data, read_prefix, write_data, DynamicPrefix, JsonPrefix, Prefix};
use crate::context::{ReadContext, WriteContext};
use crate::error::{Error, Result};
use crate::formats::ReadFormat;
use crate::registry::get_type;
use crate::types::{ChType, JsonDecl};
use crate::value::Value;

/// Row discriminator marking a null.
const NULL_DISCRIMINATOR: u8 = 255;

/// The catch-all auxiliary column trailing a JSON column body.
fn shared_data_type() -> Arc<ChType> {
    get_type("Array(Tuple(String, String))").expect("shared data type")
}

pub fn read_dynamic_prefix(src: &mut ByteSource, ctx: &ReadContext) -> Result<DynamicPrefix> {
    let struct_version = src.read_u64()?;
    match struct_version {
        1 => {
            src.read_leb128()?; // Legacy max-types hint, unused.
        }
        2 => {}
        other => {
            return Err(Error::Data(format!(
                "unrecognized dynamic structure version {other} in column '{}'",
                ctx.column_name
            )));
        }
    }
    let num_variants = src.read_leb128()? as usize;
    let mut variant_types = Vec::with_capacity(num_variants + 1);
    for _ in 0..num_variants {
        let name = src.read_leb128_str()?;
        variant_types.push(get_type(&name)?);
    }
    variant_types.push(get_type("String")?);
    let discriminator_mode = src.read_u64()?;
    if discriminator_mode != 0 {
        return Err(Error::Data(format!(
            "unexpected discriminator format {discriminator_mode} in column '{}'",
            ctx.column_name
        )));
    }
    let elements = variant_types
        .iter()
        .map(|t| read_prefix(t, src, ctx))
        .collect::<Result<Vec<_>>>()?;
    Ok(DynamicPrefix {
        variant_types,
        elements,
    })
}

/// Discriminator-packed read shared by Variant, Dynamic, and JSON dynamic
/// paths.
pub fn read_variant(
    variant_types: &[Arc<ChType>],
    element_prefixes: &[Prefix],
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
) -> Result<Vec<Value>> {
    let member_count = variant_types.len();
    let discriminators = src.read_u8s(num_rows)?;
    let mut member_rows = vec![0usize; member_count];
    for disc in &discriminators {
        if *disc == NULL_DISCRIMINATOR {
            continue;
        }
        let ix = *disc as usize;
        if ix >= member_count {
            return Err(Error::Data(format!(
                "variant discriminator {ix} outside {member_count} members in column '{}'",
                ctx.column_name
            )));
        }
        member_rows[ix] += 1;
    }
    let mut sub_columns: Vec<std::vec::IntoIter<Value>> = Vec::with_capacity(member_count);
    for (ix, member) in variant_types.iter().enumerate() {
        let column = if member_rows[ix] > 0 {
            read_data(
                member,
                src,
                member_rows[ix],
                ctx,
                element_prefixes.get(ix).unwrap_or(&Prefix::None),
            )?
        } else {
            Vec::new()
        };
        sub_columns.push(column.into_iter());
    }
    let mut out = Vec::with_capacity(num_rows);
    for disc in discriminators {
        if disc == NULL_DISCRIMINATOR {
            out.push(Value::Null);
        } else {
            out.push(sub_columns[disc as usize].next().ok_or_else(|| {
                Error::Data(format!(
                    "variant sub-column exhausted in column '{}'",
                    ctx.column_name
                ))
            })?);
        }
    }
    Ok(out)
}

/// Insert dispatch table: the `Value` variant each member decodes into,
/// with ambiguous members removed so they require explicit tagging.
fn dispatch_map(variant_types: &[Arc<ChType>]) -> HashMap<Discriminant<Value>, usize> {
    let mut seen: HashMap<Discriminant<Value>, usize> = HashMap::new();
    let mut collisions = Vec::new();
    for (ix, member) in variant_types.iter().enumerate() {
        let sample = member.zero_value();
        if sample.is_null() {
            continue;
        }
        let disc = std::mem::discriminant(&sample);
        if seen.contains_key(&disc) {
            collisions.push(disc);
        } else {
            seen.insert(disc, ix);
        }
    }
    for disc in collisions {
        seen.remove(&disc);
    }
    seen
}

fn resolve_member(
    variant_types: &[Arc<ChType>],
    dispatch: &HashMap<Discriminant<Value>, usize>,
    v: &Value,
    ctx: &WriteContext,
) -> Result<(usize, Value)> {
    if let Value::TypedVariant { type_name, value } = v {
        if value.is_null() {
            return Err(Error::Data(
                "use a plain null instead of a tagged null for Variant values".to_owned(),
            ));
        }
        let canonical = get_type(type_name)
            .map_err(|_| Error::Data(format!("unknown type '{type_name}' in variant tag")))?;
        let ix = variant_types
            .iter()
            .position(|m| m.name == canonical.name)
            .ok_or_else(|| {
                Error::Data(format!(
                    "type '{}' is not a member of the variant column '{}'",
                    canonical.name, ctx.column_name
                ))
            })?;
        return Ok((ix, (**value).clone()));
    }
    let disc = std::mem::discriminant(v);
    if let Some(ix) = dispatch.get(&disc) {
        return Ok((*ix, v.clone()));
    }
    Err(Error::Data(format!(
        "cannot map {v:?} to a member of the variant column '{}'; tag it with typed_variant",
        ctx.column_name
    )))
}

pub fn write_variant(
    variant_types: &[Arc<ChType>],
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    let dispatch = dispatch_map(variant_types);
    let mut discriminators = Vec::with_capacity(column.len());
    let mut sub_columns: Vec<Vec<Value>> = vec![Vec::new(); variant_types.len()];
    for v in column {
        if v.is_null() {
            discriminators.push(NULL_DISCRIMINATOR);
            continue;
        }
        let (ix, value) = resolve_member(variant_types, &dispatch, v, ctx)?;
        discriminators.push(ix as u8);
        sub_columns[ix].push(value);
    }
    sink.write_slice(&discriminators);
    for (member, sub_column) in variant_types.iter().zip(&sub_columns) {
        if !sub_column.is_empty() {
            write_data(member, sub_column, sink, ctx)?;
        }
    }
    Ok(())
}

/// Dynamic inserts serialize as a plain String column of canonical text,
/// with the `NULL` literal for nulls.
pub fn write_dynamic(column: &[Value], sink: &mut ByteSink, _ctx: &WriteContext) -> Result<()> {
    for v in column {
        let text = v.to_string();
        sink.write_leb128_bytes(text.as_bytes());
    }
    Ok(())
}

/// JSON inserts serialize each row as a JSON text payload through the
/// String encoder. The version tag, when configured, was written by the
/// column prefix.
pub fn write_json(column: &[Value], sink: &mut ByteSink, _ctx: &WriteContext) -> Result<()> {
    for v in column {
        let text = match v {
            Value::Null => "null".to_owned(),
            Value::String(s) => s.clone(),
            other => other.to_json().to_string(),
        };
        sink.write_leb128_bytes(text.as_bytes());
    }
    Ok(())
}

pub fn read_json_prefix(
    decl: &JsonDecl,
    src: &mut ByteSource,
    ctx: &ReadContext,
) -> Result<JsonPrefix> {
    let serialize_version = src.read_u64()?;
    match serialize_version {
        0 => {
            src.read_leb128()?; // Legacy max-types hint, unused.
        }
        2 => {}
        other => {
            return Err(Error::Data(format!(
                "unrecognized JSON structure version {other} in column '{}'",
                ctx.column_name
            )));
        }
    }
    let dynamic_path_count = src.read_leb128()? as usize;
    let mut dynamic_paths = Vec::with_capacity(dynamic_path_count);
    for _ in 0..dynamic_path_count {
        dynamic_paths.push(src.read_leb128_str()?);
    }
    let typed = decl
        .typed_paths
        .iter()
        .map(|(_, t)| read_prefix(t, src, ctx))
        .collect::<Result<Vec<_>>>()?;
    let dynamic = (0..dynamic_path_count)
        .map(|_| read_dynamic_prefix(src, ctx))
        .collect::<Result<Vec<_>>>()?;
    Ok(JsonPrefix {
        serialize_version,
        dynamic_paths,
        typed,
        dynamic,
    })
}

pub fn read_json(
    decl: &JsonDecl,
    state: &JsonPrefix,
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
) -> Result<Vec<Value>> {
    let mut typed_columns = Vec::with_capacity(decl.typed_paths.len());
    for ((_, t), prefix) in decl.typed_paths.iter().zip(&state.typed) {
        typed_columns.push(read_data(t, src, num_rows, ctx, prefix)?);
    }
    let mut dynamic_columns = Vec::with_capacity(state.dynamic.len());
    for dynamic_state in &state.dynamic {
        dynamic_columns.push(read_variant(
            &dynamic_state.variant_types,
            &dynamic_state.elements,
            src,
            num_rows,
            ctx,
        )?);
    }
    // The shared-data catch-all trails the column; its contents are not
    // merged into the result.
    read_data(&shared_data_type(), src, num_rows, ctx, &Prefix::None)?;

    let as_string = ctx.read_format("JSON") == ReadFormat::String;
    let mut out = Vec::with_capacity(num_rows);
    for row in 0..num_rows {
        let mut top = serde_json::Map::new();
        for ((path, _), column) in decl.typed_paths.iter().zip(&typed_columns) {
            insert_path(&mut top, path, column[row].to_json(), ctx.json_escape_dots);
        }
        for (path, column) in state.dynamic_paths.iter().zip(&dynamic_columns) {
            if column[row].is_null() {
                continue;
            }
            insert_path(&mut top, path, column[row].to_json(), ctx.json_escape_dots);
        }
        let object = serde_json::Value::Object(top);
        if as_string {
            out.push(Value::String(object.to_string()));
        } else {
            out.push(Value::Json(object));
        }
    }
    Ok(out)
}

/// Splits a dot-separated path and inserts the leaf into a nested object.
/// Percent-escapes in any segment decode first; with `escape_dots` the
/// whole path is one literal key.
fn insert_path(
    map: &mut serde_json::Map<String, serde_json::Value>,
    path: &str,
    value: serde_json::Value,
    escape_dots: bool,
) {
    let segments: Vec<String> = if escape_dots {
        vec![decode_segment(path)]
    } else {
        path.split('.').map(decode_segment).collect()
    };
    let mut current = map;
    for segment in &segments[..segments.len() - 1] {
        let slot = current
            .entry(segment.clone())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if !slot.is_object() {
            // A scalar already landed here; the deeper path wins.
            *slot = serde_json::Value::Object(serde_json::Map::new());
        }
        current = slot.as_object_mut().expect("just ensured an object");
    }
    current.insert(segments[segments.len() - 1].clone(), value);
}

fn decode_segment(segment: &str) -> String {
    if segment.contains('%') {
        percent_decode_str(segment)
            .decode_utf8()
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| segment.to_owned())
    } else {
        segment.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_column, write_column};
    use crate::value::typed_variant;

    fn variant_round_trip(type_name: &str, column: Vec<Value>, expected: Vec<Value>) {
        let t = get_type(type_name).unwrap();
        let mut sink = ByteSink::new();
        write_column(&t, &column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        let decoded = read_column(&t, &mut src, column.len(), &ReadContext::default()).unwrap();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn variant_scalar_dispatch() {
        variant_round_trip(
            "Variant(Int64, String)",
            vec![
                Value::Int64(5),
                Value::String("x".to_owned()),
                Value::Null,
                Value::Int64(-1),
            ],
            vec![
                Value::Int64(5),
                Value::String("x".to_owned()),
                Value::Null,
                Value::Int64(-1),
            ],
        );
    }

    #[test]
    fn variant_bool_and_int_dispatch_separately() {
        variant_round_trip(
            "Variant(Bool, Int64)",
            vec![Value::Bool(true), Value::Int64(0)],
            vec![Value::Bool(true), Value::Int64(0)],
        );
    }

    #[test]
    fn ambiguous_variant_requires_tag() {
        let t = get_type("Variant(Array(UInt32), Array(String))").unwrap();
        let mut sink = ByteSink::new();
        let untagged = write_column(
            &t,
            &[Value::Array(vec![Value::UInt32(1)])],
            &mut sink,
            &WriteContext::new(),
        );
        assert!(matches!(untagged, Err(Error::Data(_))));

        let column = vec![
            typed_variant(
                Value::Array(vec![Value::UInt32(1), Value::UInt32(2), Value::UInt32(3)]),
                "Array(UInt32)",
            ),
            typed_variant(
                Value::Array(vec![
                    Value::String("x".to_owned()),
                    Value::String("y".to_owned()),
                ]),
                "Array(String)",
            ),
        ];
        let mut sink = ByteSink::new();
        write_column(&t, &column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        let decoded = read_column(&t, &mut src, 2, &ReadContext::default()).unwrap();
        assert_eq!(
            decoded,
            vec![
                Value::Array(vec![Value::UInt32(1), Value::UInt32(2), Value::UInt32(3)]),
                Value::Array(vec![
                    Value::String("x".to_owned()),
                    Value::String("y".to_owned())
                ]),
            ]
        );
    }

    #[test]
    fn tagged_null_is_rejected() {
        let t = get_type("Variant(Int64, String)").unwrap();
        let mut sink = ByteSink::new();
        let err = write_column(
            &t,
            &[typed_variant(Value::Null, "Int64")],
            &mut sink,
            &WriteContext::new(),
        );
        assert!(matches!(err, Err(Error::Data(_))));
    }

    #[test]
    fn variant_wire_shape() {
        let t = get_type("Variant(Int64, String)").unwrap();
        let column = vec![Value::String("hi".to_owned()), Value::Null, Value::Int64(7)];
        let mut sink = ByteSink::new();
        write_column(&t, &column, &mut sink, &WriteContext::new()).unwrap();
        let encoded = sink.take();
        // u64 discriminator mode, then one discriminator byte per row.
        assert_eq!(&encoded[..8], &[0u8; 8]);
        assert_eq!(&encoded[8..11], &[1, NULL_DISCRIMINATOR, 0]);
    }

    #[test]
    fn dynamic_read_from_prefix() {
        // Build a Dynamic column body by hand: version 2, two inlined
        // variants, then variant-packed rows.
        let mut sink = ByteSink::new();
        sink.write_u64(2);
        sink.write_leb128(2);
        sink.write_leb128_str("Int64");
        sink.write_leb128_str("UUID");
        sink.write_u64(0); // discriminator mode
        // Rows: Int64(3), null, String fallback "txt".
        sink.write_slice(&[0, NULL_DISCRIMINATOR, 2]);
        sink.write_i64(3);
        sink.write_leb128_bytes(b"txt");

        let t = get_type("Dynamic").unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        let decoded = read_column(&t, &mut src, 3, &ReadContext::default()).unwrap();
        assert_eq!(
            decoded,
            vec![
                Value::Int64(3),
                Value::Null,
                Value::String("txt".to_owned())
            ]
        );
    }

    #[test]
    fn dynamic_writes_canonical_strings() {
        let t = get_type("Dynamic").unwrap();
        let column = vec![
            Value::Int64(42),
            Value::Null,
            Value::String("plain".to_owned()),
        ];
        let mut sink = ByteSink::new();
        write_column(&t, &column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        assert_eq!(src.read_leb128_str().unwrap(), "42");
        assert_eq!(src.read_leb128_str().unwrap(), "NULL");
        assert_eq!(src.read_leb128_str().unwrap(), "plain");
    }

    #[test]
    fn json_prefix_and_body_round_trip() {
        // Serialize a JSON column body the way the server does: version 2,
        // one dynamic path, a typed path column, a dynamic column, and the
        // shared-data tail.
        let decl_type = get_type("JSON(`a.b` Int64)").unwrap();
        let mut sink = ByteSink::new();
        sink.write_u64(2);
        sink.write_leb128(1);
        sink.write_leb128_str("c");
        // Dynamic prefix for path "c": version 2, zero inlined variants.
        sink.write_u64(2);
        sink.write_leb128(0);
        sink.write_u64(0);
        // Typed path column `a.b` over two rows.
        sink.write_i64(1);
        sink.write_i64(2);
        // Dynamic path "c": String fallback rows.
        sink.write_slice(&[0, NULL_DISCRIMINATOR]);
        sink.write_leb128_bytes(b"v");
        // Shared data: empty arrays for both rows.
        sink.write_u64(0);
        sink.write_u64(0);

        let mut src = ByteSource::from_bytes(sink.take());
        let decoded = read_column(&decl_type, &mut src, 2, &ReadContext::default()).unwrap();
        let first = match &decoded[0] {
            Value::Json(v) => v.clone(),
            other => panic!("expected json, got {other:?}"),
        };
        assert_eq!(first["a"]["b"], serde_json::json!(1));
        assert_eq!(first["c"], serde_json::json!("v"));
        let second = match &decoded[1] {
            Value::Json(v) => v.clone(),
            other => panic!("expected json, got {other:?}"),
        };
        assert_eq!(second["a"]["b"], serde_json::json!(2));
        assert!(second.get("c").is_none());
    }

    #[test]
    fn json_write_is_string_payload() {
        let t = get_type("JSON").unwrap();
        let column = vec![
            Value::Json(serde_json::json!({"k": 1})),
            Value::Null,
        ];
        let mut sink = ByteSink::new();
        write_column(&t, &column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        // Version tag, then LEB128-framed JSON texts.
        assert_eq!(src.read_u64().unwrap(), 1);
        assert_eq!(src.read_leb128_str().unwrap(), r#"{"k":1}"#);
        assert_eq!(src.read_leb128_str().unwrap(), "null");
    }
}
