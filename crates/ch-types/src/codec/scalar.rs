//! Fixed-width numeric encodings: integers, floats (including the 16-bit
//! formats), booleans, big integers, and decimals.

use num_bigint::{BigInt, Sign};

use crate::binary::{ByteSink, ByteSource};
use crate::context::{ReadContext, WriteContext};
use crate::error::{Error, Result};
use crate::formats::ReadFormat;
use crate::types::TypeKind;
use crate::value::Value;

pub fn read_int(
    kind: &TypeKind,
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
) -> Result<Vec<Value>> {
    let fmt = ctx.read_format(class_of(kind));
    let column: Vec<Value> = match kind {
        TypeKind::Int8 => src.read_i8s(num_rows)?.into_iter().map(Value::Int8).collect(),
        TypeKind::Int16 => src.read_i16s(num_rows)?.into_iter().map(Value::Int16).collect(),
        TypeKind::Int32 => src.read_i32s(num_rows)?.into_iter().map(Value::Int32).collect(),
        TypeKind::Int64 => src.read_i64s(num_rows)?.into_iter().map(Value::Int64).collect(),
        TypeKind::UInt8 => src.read_u8s(num_rows)?.into_iter().map(Value::UInt8).collect(),
        TypeKind::UInt16 => src.read_u16s(num_rows)?.into_iter().map(Value::UInt16).collect(),
        TypeKind::UInt32 => src.read_u32s(num_rows)?.into_iter().map(Value::UInt32).collect(),
        TypeKind::UInt64 => {
            let raw = src.read_u64s(num_rows)?;
            if fmt == ReadFormat::Signed {
                return Ok(raw.into_iter().map(|v| Value::Int64(v as i64)).collect());
            }
            raw.into_iter().map(Value::UInt64).collect()
        }
        other => return Err(Error::Internal(format!("read_int on {other:?}"))),
    };
    if fmt == ReadFormat::String {
        return Ok(column
            .into_iter()
            .map(|v| Value::String(v.to_string()))
            .collect());
    }
    Ok(column)
}

pub fn write_int(
    kind: &TypeKind,
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    for v in column {
        let raw = int_value(v, ctx)?;
        match kind {
            TypeKind::Int8 => sink.write_i8(checked(raw, i128::from(i8::MIN), i128::from(i8::MAX), ctx)? as i8),
            TypeKind::Int16 => sink.write_i16(checked(raw, i128::from(i16::MIN), i128::from(i16::MAX), ctx)? as i16),
            TypeKind::Int32 => sink.write_i32(checked(raw, i128::from(i32::MIN), i128::from(i32::MAX), ctx)? as i32),
            TypeKind::Int64 => sink.write_i64(checked(raw, i128::from(i64::MIN), i128::from(i64::MAX), ctx)? as i64),
            TypeKind::UInt8 => sink.write_u8(checked(raw, 0, i128::from(u8::MAX), ctx)? as u8),
            TypeKind::UInt16 => sink.write_u16(checked(raw, 0, i128::from(u16::MAX), ctx)? as u16),
            TypeKind::UInt32 => sink.write_u32(checked(raw, 0, i128::from(u32::MAX), ctx)? as u32),
            TypeKind::UInt64 => {
                // Accept the signed view of large unsigned values.
                if let Value::UInt64(u) = v {
                    sink.write_u64(*u);
                } else {
                    sink.write_u64(checked(raw, i128::from(i64::MIN), i128::from(u64::MAX), ctx)? as u64);
                }
            }
            other => return Err(Error::Internal(format!("write_int on {other:?}"))),
        }
    }
    Ok(())
}

fn int_value(v: &Value, ctx: &WriteContext) -> Result<i128> {
    if v.is_null() {
        return Ok(0);
    }
    v.to_i128().ok_or_else(|| {
        Error::Data(format!(
            "expected an integer for column '{}', got {v:?}",
            ctx.column_name
        ))
    })
}

fn checked(raw: i128, min: i128, max: i128, ctx: &WriteContext) -> Result<i128> {
    if raw < min || raw > max {
        return Err(Error::Data(format!(
            "value {raw} out of range for column '{}'",
            ctx.column_name
        )));
    }
    Ok(raw)
}

pub fn read_big_int(
    kind: &TypeKind,
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
) -> Result<Vec<Value>> {
    let fmt = ctx.read_format(class_of(kind));
    let as_string = fmt == ReadFormat::String;
    let mut out = Vec::with_capacity(num_rows);
    for _ in 0..num_rows {
        let value = match kind {
            TypeKind::Int128 => {
                let v = src.read_i128s(1)?[0];
                if as_string {
                    Value::String(v.to_string())
                } else {
                    Value::Int128(v)
                }
            }
            TypeKind::UInt128 => {
                let v = src.read_u128s(1)?[0];
                if as_string {
                    Value::String(v.to_string())
                } else {
                    Value::UInt128(v)
                }
            }
            TypeKind::Int256 => {
                let raw = src.read_bytes(32)?;
                let v = BigInt::from_signed_bytes_le(&raw);
                if as_string {
                    Value::String(v.to_string())
                } else {
                    Value::BigInt(v)
                }
            }
            TypeKind::UInt256 => {
                let raw = src.read_bytes(32)?;
                let v = BigInt::from_bytes_le(Sign::Plus, &raw);
                if as_string {
                    Value::String(v.to_string())
                } else {
                    Value::BigInt(v)
                }
            }
            other => return Err(Error::Internal(format!("read_big_int on {other:?}"))),
        };
        out.push(value);
    }
    Ok(out)
}

pub fn write_big_int(
    kind: &TypeKind,
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    for v in column {
        let big = big_int_value(v, ctx)?;
        match kind {
            TypeKind::Int128 | TypeKind::UInt128 => write_big_bytes(&big, 16, sink, ctx)?,
            TypeKind::Int256 | TypeKind::UInt256 => write_big_bytes(&big, 32, sink, ctx)?,
            other => return Err(Error::Internal(format!("write_big_int on {other:?}"))),
        }
    }
    Ok(())
}

fn big_int_value(v: &Value, ctx: &WriteContext) -> Result<BigInt> {
    match v {
        Value::Null => Ok(BigInt::from(0)),
        Value::BigInt(b) => Ok(b.clone()),
        Value::String(s) => s.parse::<BigInt>().map_err(|_| {
            Error::Data(format!(
                "cannot parse '{s}' as an integer for column '{}'",
                ctx.column_name
            ))
        }),
        Value::UInt128(u) => Ok(BigInt::from(*u)),
        other => other.to_i128().map(BigInt::from).ok_or_else(|| {
            Error::Data(format!(
                "expected an integer for column '{}', got {other:?}",
                ctx.column_name
            ))
        }),
    }
}

/// Little-endian two's-complement write, sign-extended to `width` bytes.
fn write_big_bytes(v: &BigInt, width: usize, sink: &mut ByteSink, ctx: &WriteContext) -> Result<()> {
    let mut raw = v.to_signed_bytes_le();
    if raw.len() > width {
        return Err(Error::Data(format!(
            "value {v} does not fit in {} bytes for column '{}'",
            width, ctx.column_name
        )));
    }
    let fill = if v.sign() == Sign::Minus { 0xff } else { 0x00 };
    raw.resize(width, fill);
    sink.write_slice(&raw);
    Ok(())
}

pub fn read_float(kind: &TypeKind, src: &mut ByteSource, num_rows: usize) -> Result<Vec<Value>> {
    match kind {
        TypeKind::Float32 => Ok(src.read_f32s(num_rows)?.into_iter().map(Value::Float32).collect()),
        TypeKind::Float64 => Ok(src.read_f64s(num_rows)?.into_iter().map(Value::Float64).collect()),
        TypeKind::Float16 => Ok(src
            .read_u16s(num_rows)?
            .into_iter()
            .map(|bits| Value::Float32(f16_to_f32(bits)))
            .collect()),
        TypeKind::BFloat16 => Ok(src
            .read_u16s(num_rows)?
            .into_iter()
            .map(|bits| Value::Float32(bf16_to_f32(bits)))
            .collect()),
        other => Err(Error::Internal(format!("read_float on {other:?}"))),
    }
}

pub fn write_float(
    kind: &TypeKind,
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    for v in column {
        let raw = float_value(v, ctx)?;
        match kind {
            TypeKind::Float32 => sink.write_f32(raw as f32),
            TypeKind::Float64 => sink.write_f64(raw),
            TypeKind::Float16 => sink.write_u16(f32_to_f16(raw as f32)),
            TypeKind::BFloat16 => sink.write_u16(f32_to_bf16(raw as f32)),
            other => return Err(Error::Internal(format!("write_float on {other:?}"))),
        }
    }
    Ok(())
}

fn float_value(v: &Value, ctx: &WriteContext) -> Result<f64> {
    if v.is_null() {
        return Ok(0.0);
    }
    v.as_f64().ok_or_else(|| {
        Error::Data(format!(
            "expected a float for column '{}', got {v:?}",
            ctx.column_name
        ))
    })
}

pub fn read_bool(src: &mut ByteSource, num_rows: usize) -> Result<Vec<Value>> {
    Ok(src
        .read_u8s(num_rows)?
        .into_iter()
        .map(|b| Value::Bool(b > 0))
        .collect())
}

pub fn write_bool(column: &[Value], sink: &mut ByteSink) -> Result<()> {
    for v in column {
        let flag = match v {
            Value::Null => false,
            Value::Bool(b) => *b,
            other => other.to_i128().is_some_and(|i| i != 0),
        };
        sink.write_u8(u8::from(flag));
    }
    Ok(())
}

pub fn read_decimal(
    precision: u32,
    scale: u32,
    bits: u32,
    src: &mut ByteSource,
    num_rows: usize,
    ctx: &ReadContext,
) -> Result<Vec<Value>> {
    let _ = precision;
    let as_string = ctx.read_format("Decimal") == ReadFormat::String;
    let mut out = Vec::with_capacity(num_rows);
    for _ in 0..num_rows {
        let value = match bits {
            32 => Value::Decimal {
                raw: i128::from(src.read_i32s(1)?[0]),
                scale,
            },
            64 => Value::Decimal {
                raw: i128::from(src.read_i64s(1)?[0]),
                scale,
            },
            128 => Value::Decimal {
                raw: src.read_i128s(1)?[0],
                scale,
            },
            _ => {
                let raw = src.read_bytes(32)?;
                Value::Decimal256 {
                    raw: BigInt::from_signed_bytes_le(&raw),
                    scale,
                }
            }
        };
        if as_string {
            out.push(Value::String(value.to_string()));
        } else {
            out.push(value);
        }
    }
    Ok(out)
}

pub fn write_decimal(
    scale: u32,
    bits: u32,
    column: &[Value],
    sink: &mut ByteSink,
    ctx: &WriteContext,
) -> Result<()> {
    for v in column {
        let raw = scaled_value(v, scale, ctx)?;
        match bits {
            32 => sink.write_i32(narrow_decimal(&raw, i128::from(i32::MIN), i128::from(i32::MAX), ctx)? as i32),
            64 => sink.write_i64(narrow_decimal(&raw, i128::from(i64::MIN), i128::from(i64::MAX), ctx)? as i64),
            128 => sink.write_i128(narrow_decimal(&raw, i128::MIN, i128::MAX, ctx)?),
            _ => write_big_bytes(&raw, 32, sink, ctx)?,
        }
    }
    Ok(())
}

fn narrow_decimal(raw: &BigInt, min: i128, max: i128, ctx: &WriteContext) -> Result<i128> {
    i128::try_from(raw.clone())
        .ok()
        .filter(|v| *v >= min && *v <= max)
        .ok_or_else(|| {
            Error::Data(format!(
                "decimal value out of range for column '{}'",
                ctx.column_name
            ))
        })
}

/// Converts any accepted decimal input into the raw scaled integer.
fn scaled_value(v: &Value, scale: u32, ctx: &WriteContext) -> Result<BigInt> {
    let rescale = |raw: BigInt, from: u32| -> Result<BigInt> {
        if from == scale {
            Ok(raw)
        } else if from < scale {
            Ok(raw * BigInt::from(10u64).pow(scale - from))
        } else {
            Err(Error::Data(format!(
                "decimal scale {from} exceeds column scale {scale} for '{}'",
                ctx.column_name
            )))
        }
    };
    match v {
        Value::Null => Ok(BigInt::from(0)),
        Value::Decimal { raw, scale: s } => rescale(BigInt::from(*raw), *s),
        Value::Decimal256 { raw, scale: s } => rescale(raw.clone(), *s),
        Value::String(s) => parse_decimal(s, scale).ok_or_else(|| {
            Error::Data(format!(
                "cannot parse '{s}' as a decimal for column '{}'",
                ctx.column_name
            ))
        }),
        Value::Float32(_) | Value::Float64(_) => {
            let scaled = v.as_f64().expect("float") * 10f64.powi(scale as i32);
            Ok(BigInt::from(scaled.round() as i128))
        }
        other => other
            .to_i128()
            .map(|i| BigInt::from(i) * BigInt::from(10u64).pow(scale))
            .ok_or_else(|| {
                Error::Data(format!(
                    "expected a decimal for column '{}', got {other:?}",
                    ctx.column_name
                ))
            }),
    }
}

/// Parses `[-]digits[.digits]` into a scaled integer. More fractional
/// digits than the column scale is a parse failure, not a silent round.
fn parse_decimal(text: &str, scale: u32) -> Option<BigInt> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, f),
        None => (digits, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    if frac_part.len() > scale as usize {
        return None;
    }
    let mut combined = String::with_capacity(int_part.len() + scale as usize);
    combined.push_str(int_part);
    combined.push_str(frac_part);
    for _ in frac_part.len()..scale as usize {
        combined.push('0');
    }
    let mut value: BigInt = combined.parse().ok()?;
    if negative {
        value = -value;
    }
    Some(value)
}

fn class_of(kind: &TypeKind) -> &'static str {
    match kind {
        TypeKind::Int8 => "Int8",
        TypeKind::Int16 => "Int16",
        TypeKind::Int32 => "Int32",
        TypeKind::Int64 => "Int64",
        TypeKind::Int128 => "Int128",
        TypeKind::Int256 => "Int256",
        TypeKind::UInt8 => "UInt8",
        TypeKind::UInt16 => "UInt16",
        TypeKind::UInt32 => "UInt32",
        TypeKind::UInt64 => "UInt64",
        TypeKind::UInt128 => "UInt128",
        TypeKind::UInt256 => "UInt256",
        _ => "Number",
    }
}

// 16-bit float conversions. BFloat16 is the high half of an IEEE single;
// Float16 is IEEE binary16.

pub fn bf16_to_f32(bits: u16) -> f32 {
    f32::from_bits(u32::from(bits) << 16)
}

pub fn f32_to_bf16(value: f32) -> u16 {
    if value.is_nan() {
        return 0x7fc0;
    }
    let bits = value.to_bits();
    // Round to nearest even on the truncated half.
    let rounded = bits.wrapping_add(0x7fff + ((bits >> 16) & 1));
    (rounded >> 16) as u16
}

pub fn f16_to_f32(bits: u16) -> f32 {
    let sign = u32::from(bits >> 15) << 31;
    let exp = u32::from((bits >> 10) & 0x1f);
    let frac = u32::from(bits & 0x3ff);
    let out = if exp == 0 {
        if frac == 0 {
            sign
        } else {
            // Subnormal: renormalize.
            let mut exp = 127 - 15 + 1;
            let mut frac = frac;
            while frac & 0x400 == 0 {
                frac <<= 1;
                exp -= 1;
            }
            sign | ((exp as u32) << 23) | ((frac & 0x3ff) << 13)
        }
    } else if exp == 0x1f {
        sign | 0x7f80_0000 | (frac << 13)
    } else {
        sign | ((exp + 127 - 15) << 23) | (frac << 13)
    };
    f32::from_bits(out)
}

pub fn f32_to_f16(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 31) as u16) << 15;
    let exp = ((bits >> 23) & 0xff) as i32;
    let frac = bits & 0x7f_ffff;
    if exp == 0xff {
        // Inf / NaN.
        return sign | 0x7c00 | u16::from(frac != 0) << 9;
    }
    let unbiased = exp - 127;
    if unbiased > 15 {
        return sign | 0x7c00; // Overflow to infinity.
    }
    if unbiased >= -14 {
        let half_frac = (frac >> 13) as u16;
        let rounded = ((frac >> 12) & 1) as u16;
        return (sign | (((unbiased + 15) as u16) << 10) | half_frac).wrapping_add(rounded);
    }
    if unbiased >= -24 {
        // Subnormal half.
        let full = frac | 0x80_0000;
        let shift = (-1 - unbiased + 13) as u32;
        let half_frac = (full >> shift) as u16;
        let rounded = ((full >> (shift - 1)) & 1) as u16;
        return (sign | half_frac).wrapping_add(rounded);
    }
    sign // Underflow to zero.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_round_trip() {
        let ctx = WriteContext::new();
        let mut sink = ByteSink::new();
        let column = vec![Value::Int32(-5), Value::Int32(0), Value::Int32(i32::MAX)];
        write_int(&TypeKind::Int32, &column, &mut sink, &ctx).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        let back = read_int(&TypeKind::Int32, &mut src, 3, &ReadContext::default()).unwrap();
        assert_eq!(back, column);
    }

    #[test]
    fn int_range_check() {
        let ctx = WriteContext::new();
        let mut sink = ByteSink::new();
        let err = write_int(&TypeKind::UInt8, &[Value::Int32(300)], &mut sink, &ctx);
        assert!(matches!(err, Err(Error::Data(_))));
    }

    #[test]
    fn uint64_signed_format() {
        let mut sink = ByteSink::new();
        write_int(
            &TypeKind::UInt64,
            &[Value::UInt64(u64::MAX)],
            &mut sink,
            &WriteContext::new(),
        )
        .unwrap();
        let mut ctx = ReadContext::default();
        ctx.formats.set_class("UInt64", ReadFormat::Signed);
        let mut src = ByteSource::from_bytes(sink.take());
        let back = read_int(&TypeKind::UInt64, &mut src, 1, &ctx).unwrap();
        assert_eq!(back, vec![Value::Int64(-1)]);
    }

    #[test]
    fn int256_round_trip() {
        let huge: BigInt = BigInt::from(-7) * BigInt::from(10u64).pow(40);
        let column = vec![Value::BigInt(huge.clone()), Value::BigInt(BigInt::from(0))];
        let mut sink = ByteSink::new();
        write_big_int(&TypeKind::Int256, &column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        let back = read_big_int(&TypeKind::Int256, &mut src, 2, &ReadContext::default()).unwrap();
        assert_eq!(back, column);
    }

    #[test]
    fn decimal_round_trip_max_precision() {
        // Decimal(76, 38): the widest supported decimal.
        let raw: BigInt = "12345678901234567890123456789012345678".parse().unwrap();
        let column = vec![
            Value::Decimal256 {
                raw: raw.clone(),
                scale: 38,
            },
            Value::Decimal256 {
                raw: -raw,
                scale: 38,
            },
        ];
        let mut sink = ByteSink::new();
        write_decimal(38, 256, &column, &mut sink, &WriteContext::new()).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        let back = read_decimal(76, 38, 256, &mut src, 2, &ReadContext::default()).unwrap();
        assert_eq!(back, column);
    }

    #[test]
    fn decimal_from_string() {
        let mut sink = ByteSink::new();
        write_decimal(
            2,
            32,
            &[Value::String("12.34".to_owned())],
            &mut sink,
            &WriteContext::new(),
        )
        .unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        let back = read_decimal(9, 2, 32, &mut src, 1, &ReadContext::default()).unwrap();
        assert_eq!(back, vec![Value::Decimal { raw: 1234, scale: 2 }]);
    }

    #[test]
    fn bf16_preserves_seven_bits() {
        for v in [0.0f32, 1.0, -2.5, 3.1415927, 1.0e20, -1.0e-20] {
            let bits = f32_to_bf16(v);
            let back = bf16_to_f32(bits);
            if v == 0.0 {
                assert_eq!(back, 0.0);
            } else {
                assert!((back - v).abs() / v.abs() < 0.01, "{v} -> {back}");
            }
        }
    }

    #[test]
    fn f16_round_trip_simple_values() {
        for v in [0.0f32, 1.0, -1.5, 0.25, 65504.0] {
            let bits = f32_to_f16(v);
            assert_eq!(f16_to_f32(bits), v, "{v}");
        }
        assert!(f16_to_f32(f32_to_f16(f32::NAN)).is_nan());
        assert_eq!(f16_to_f32(f32_to_f16(1.0e10)), f32::INFINITY);
    }

    #[test]
    fn bool_round_trip() {
        let mut sink = ByteSink::new();
        write_bool(&[Value::Bool(true), Value::Bool(false), Value::Null], &mut sink).unwrap();
        let mut src = ByteSource::from_bytes(sink.take());
        let back = read_bool(&mut src, 3).unwrap();
        assert_eq!(
            back,
            vec![Value::Bool(true), Value::Bool(false), Value::Bool(false)]
        );
    }
}
