//! String and FixedString encodings.

use crate::binary::{ByteSink, ByteSource};
use crate::context::{ReadContext, WriteContext};
use crate::error::{Error, Result};
use crate::formats::ReadFormat;
use crate::value::Value;

pub fn read_string(src: &mut ByteSource, num_rows: usize, ctx: &ReadContext) -> Result<Vec<Value>> {
    if ctx.read_format("String") == ReadFormat::Bytes {
        let mut out = Vec::with_capacity(num_rows);
        for _ in 0..num_rows {
            let len = src.read_leb128()? as usize;
            out.push(Value::Bytes(src.read_bytes(len)?.to_vec()));
        }
        return Ok(out);
    }
    Ok(src
        .read_str_col(num_rows)?
        .into_iter()
        .map(Value::String)
        .collect())
}

pub fn write_string(column: &[Value], sink: &mut ByteSink, ctx: &WriteContext) -> Result<()> {
    for v in column {
        match v {
            Value::Null => sink.write_leb128(0),
            Value::String(s) | Value::Enum(s) => sink.write_leb128_bytes(s.as_bytes()),
            Value::Bytes(b) => sink.write_leb128_bytes(b),
            other => {
                return Err(Error::Data(format!(
                    "expected a string for column '{}', got {other:?}",
                    ctx.column_name
                )));
            }
        }
    }
    Ok(())
}

pub fn read_fixed_string(
    size: usize,
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
) -> Result<Vec<Value>> {
    let as_string = ctx.read_format("FixedString") == ReadFormat::String;
    let mut out = Vec::with_capacity(num_rows);
    for _ in 0..num_rows {
        let raw = src.read_bytes(size)?;
        if as_string {
            // Trailing padding NULs strip; invalid UTF-8 falls back to hex.
            match std::str::from_utf8(&raw) {
                Ok(s) => out.push(Value::String(s.trim_end_matches('\0').to_owned())),
                Err(_) => out.push(Value::String(
                    raw.iter().map(|b| format!("{b:02x}")).collect(),
                )),
            }
        } else {
            out.push(Value::Bytes(raw.to_vec()));
        }
    }
    Ok(out)
}

pub fn write_fixed_string(
    size: usize,
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    for v in column {
        let raw = match v {
            Value::Null => {
                sink.write_slice(&vec![0u8; size]);
                continue;
            }
            Value::String(s) => s.as_bytes(),
            Value::Bytes(b) => b.as_slice(),
            other => {
                return Err(Error::Data(format!(
                    "expected a string or bytes for column '{}', got {other:?}",
                    ctx.column_name
                )));
            }
        };
        if raw.len() > size {
            return Err(Error::Data(format!(
                "value of {} bytes exceeds FixedString({size}) for column '{}'",
                raw.len(),
                ctx.column_name
            )));
        }
        sink.write_slice(raw);
        if raw.len() < size {
            sink.write_slice(&vec![0u8; size - raw.len()]);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        let column = vec![
            Value::String(String::new()),
            Value::String("a".to_owned()),
            Value::String("ω — ツ".to_owned()),
        ];
        let mut sink = ByteSink::new();
        write_string(&column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        assert_eq!(read_string(&mut src, 3, &ReadContext::default()).unwrap(), column);
    }

    #[test]
    fn fixed_string_zero_pads_and_strips() {
        let mut sink = ByteSink::new();
        write_fixed_string(
            4,
            &[Value::String("ab".to_owned()), Value::Bytes(vec![1, 2, 3, 4])],
            &mut sink,
            &WriteContext::new(),
        )
        .unwrap();
        let encoded = sink.take();
        assert_eq!(encoded.as_ref(), &[b'a', b'b', 0, 0, 1, 2, 3, 4]);

        let mut ctx = ReadContext::default();
        ctx.formats.set_class("FixedString", ReadFormat::String);
        let mut src = ByteSource::from_bytes(encoded.clone());
        let decoded = read_fixed_string(4, &mut src, 2, &ctx).unwrap();
        assert_eq!(decoded[0], Value::String("ab".to_owned()));
        // Bytes 1-2-3-4 are not valid text, so the hex fallback applies.
        assert_eq!(decoded[1], Value::String("01020304".to_owned()));
    }

    #[test]
    fn fixed_string_embedded_nul_survives_bytes_format() {
        let mut sink = ByteSink::new();
        write_fixed_string(
            3,
            &[Value::Bytes(vec![0, b'x', 0])],
            &mut sink,
            &WriteContext::new(),
        )
        .unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        let decoded = read_fixed_string(3, &mut src, 1, &ReadContext::default()).unwrap();
        assert_eq!(decoded, vec![Value::Bytes(vec![0, b'x', 0])]);
    }

    #[test]
    fn overlong_fixed_string_fails() {
        let mut sink = ByteSink::new();
        let err = write_fixed_string(
            2,
            &[Value::String("abc".to_owned())],
            &mut sink,
            &WriteContext::new(),
        );
        assert!(matches!(err, Err(Error::Data(_))));
    }
}
