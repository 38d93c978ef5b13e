//! Canonical in-memory representation of column values.
//!
//! Every readable ClickHouse type decodes into exactly one [`Value`]
//! variant, and every codec declares which variants it accepts on insert.
//! Read-format overrides (e.g. `UUID` as string) change the variant a
//! column decodes into, never the wire format.

use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use num_bigint::BigInt;
use uuid::Uuid;

/// One cell of a decoded or to-be-encoded column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Int128(i128),
    UInt128(u128),
    /// Int256 and UInt256 both carry a `BigInt`; the codec enforces the
    /// wire width and sign on encode.
    BigInt(BigInt),
    Float32(f32),
    Float64(f64),
    /// Decimal32/64/128: the raw scaled integer plus the declared scale.
    Decimal { raw: i128, scale: u32 },
    /// Decimal256 values exceeding 128 bits.
    Decimal256 { raw: BigInt, scale: u32 },
    String(String),
    /// Raw byte strings: the default FixedString representation, and the
    /// accepted insert form for opaque payloads.
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Date(NaiveDate),
    /// Naive datetime: read when no zone applies, accepted on insert.
    DateTime(NaiveDateTime),
    /// Zone-aware datetime produced by the timezone read policy.
    DateTimeTz(DateTime<chrono_tz::Tz>),
    /// Time / Time64 durations as signed ticks of `10^-scale` seconds,
    /// bounded at ±999:59:59[.frac].
    Time { ticks: i64, scale: u32 },
    /// A decoded enum key.
    Enum(String),
    Array(Vec<Value>),
    Tuple(Vec<Value>),
    Map(Vec<(Value, Value)>),
    /// A decoded JSON object column row.
    Json(serde_json::Value),
    /// Insert-side tag naming the Variant member a value belongs to.
    /// Required when several members map to the same `Value` variant.
    TypedVariant {
        type_name: String,
        value: Box<Value>,
    },
}

/// Tags a value with an explicit ClickHouse type for insertion into a
/// Variant column whose members are ambiguous at the `Value` level.
pub fn typed_variant(value: Value, type_name: impl Into<String>) -> Value {
    Value::TypedVariant {
        type_name: type_name.into(),
        value: Box::new(value),
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Widens any signed or unsigned integer variant. `Bool` is
    /// deliberately excluded so that boolean and integer columns dispatch
    /// separately.
    pub fn to_i128(&self) -> Option<i128> {
        match self {
            Value::Int8(v) => Some(i128::from(*v)),
            Value::Int16(v) => Some(i128::from(*v)),
            Value::Int32(v) => Some(i128::from(*v)),
            Value::Int64(v) => Some(i128::from(*v)),
            Value::UInt8(v) => Some(i128::from(*v)),
            Value::UInt16(v) => Some(i128::from(*v)),
            Value::UInt32(v) => Some(i128::from(*v)),
            Value::UInt64(v) => Some(i128::from(*v)),
            Value::Int128(v) => Some(*v),
            Value::UInt128(v) => i128::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn to_u128(&self) -> Option<u128> {
        match self {
            Value::UInt128(v) => Some(*v),
            _ => self.to_i128().and_then(|v| u128::try_from(v).ok()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(v) => Some(f64::from(*v)),
            Value::Float64(v) => Some(*v),
            _ => self.to_i128().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(s) => Some(s.as_bytes()),
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// JSON projection used by the JSON object codec and the named-tuple
    /// `json` read format. Values without a natural JSON form render
    /// through their canonical text.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int8(v) => Json::from(*v),
            Value::Int16(v) => Json::from(*v),
            Value::Int32(v) => Json::from(*v),
            Value::Int64(v) => Json::from(*v),
            Value::UInt8(v) => Json::from(*v),
            Value::UInt16(v) => Json::from(*v),
            Value::UInt32(v) => Json::from(*v),
            Value::UInt64(v) => Json::from(*v),
            Value::Float32(v) => serde_json::Number::from_f64(f64::from(*v))
                .map_or(Json::Null, Json::Number),
            Value::Float64(v) => serde_json::Number::from_f64(*v).map_or(Json::Null, Json::Number),
            Value::Json(v) => v.clone(),
            Value::Array(items) | Value::Tuple(items) => {
                Json::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => {
                let map: serde_json::Map<String, Json> = entries
                    .iter()
                    .map(|(k, v)| {
                        let key = match k {
                            Value::String(s) | Value::Enum(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (key, v.to_json())
                    })
                    .collect();
                Json::Object(map)
            }
            Value::TypedVariant { value, .. } => value.to_json(),
            other => Json::String(other.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

macro_rules! value_from_int {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

value_from_int!(
    i8 => Int8, i16 => Int16, i32 => Int32, i64 => Int64,
    u8 => UInt8, u16 => UInt16, u32 => UInt32, u64 => UInt64,
    i128 => Int128, u128 => UInt128, f32 => Float32, f64 => Float64,
);

impl From<Option<Value>> for Value {
    fn from(v: Option<Value>) -> Self {
        v.unwrap_or(Value::Null)
    }
}

/// Canonical text form. Matches the literal rendering the server accepts:
/// strings and temporals inside containers are single-quoted, top-level
/// nulls render as `NULL`. The Dynamic write path serializes through this.
impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => f.write_str(if *b { "true" } else { "false" }),
            Value::Int8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt8(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Int128(v) => write!(f, "{v}"),
            Value::UInt128(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Decimal { raw, scale } => f.write_str(&format_decimal(*raw, *scale)),
            Value::Decimal256 { raw, scale } => f.write_str(&format_big_decimal(raw, *scale)),
            Value::String(s) | Value::Enum(s) => f.write_str(s),
            Value::Bytes(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Ipv4(ip) => write!(f, "{ip}"),
            Value::Ipv6(ip) => write!(f, "{ip}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::DateTimeTz(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::Time { ticks, scale } => f.write_str(&format_time_ticks(*ticks, *scale)),
            Value::Array(items) => {
                f.write_str("[")?;
                fmt_items(f, items)?;
                f.write_str("]")
            }
            Value::Tuple(items) => {
                f.write_str("(")?;
                fmt_items(f, items)?;
                f.write_str(")")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (ix, (k, v)) in entries.iter().enumerate() {
                    if ix > 0 {
                        f.write_str(", ")?;
                    }
                    fmt_nested(f, k)?;
                    f.write_str(": ")?;
                    fmt_nested(f, v)?;
                }
                f.write_str("}")
            }
            Value::Json(v) => write!(f, "{v}"),
            Value::TypedVariant { value, .. } => write!(f, "{value}"),
        }
    }
}

fn fmt_items(f: &mut std::fmt::Formatter<'_>, items: &[Value]) -> std::fmt::Result {
    for (ix, item) in items.iter().enumerate() {
        if ix > 0 {
            f.write_str(", ")?;
        }
        fmt_nested(f, item)?;
    }
    Ok(())
}

/// Inside containers, text-like values are single-quoted so the rendered
/// form stays a parseable literal.
fn fmt_nested(f: &mut std::fmt::Formatter<'_>, value: &Value) -> std::fmt::Result {
    match value {
        Value::String(_)
        | Value::Enum(_)
        | Value::Uuid(_)
        | Value::Ipv4(_)
        | Value::Ipv6(_)
        | Value::Date(_)
        | Value::DateTime(_)
        | Value::DateTimeTz(_)
        | Value::Time { .. } => write!(f, "'{value}'"),
        other => write!(f, "{other}"),
    }
}

/// Renders a scaled integer as a fixed-point decimal string.
pub fn format_decimal(raw: i128, scale: u32) -> String {
    if scale == 0 {
        return raw.to_string();
    }
    let negative = raw < 0;
    let digits = raw.unsigned_abs().to_string();
    let scale = scale as usize;
    let padded = if digits.len() <= scale {
        format!("{digits:0>width$}", width = scale + 1)
    } else {
        digits
    };
    let split = padded.len() - scale;
    let sign = if negative { "-" } else { "" };
    format!("{sign}{}.{}", &padded[..split], &padded[split..])
}

/// `format_decimal` for values wider than 128 bits.
pub fn format_big_decimal(raw: &BigInt, scale: u32) -> String {
    if scale == 0 {
        return raw.to_string();
    }
    let negative = raw.sign() == num_bigint::Sign::Minus;
    let digits = raw.magnitude().to_string();
    let scale = scale as usize;
    let padded = if digits.len() <= scale {
        format!("{digits:0>width$}", width = scale + 1)
    } else {
        digits
    };
    let split = padded.len() - scale;
    let sign = if negative { "-" } else { "" };
    format!("{sign}{}.{}", &padded[..split], &padded[split..])
}

/// Renders time ticks as `[-]HHH:MM:SS[.frac]`.
pub fn format_time_ticks(ticks: i64, scale: u32) -> String {
    let sign = if ticks < 0 { "-" } else { "" };
    let ticks = ticks.unsigned_abs();
    let precision = 10u64.pow(scale);
    let (secs, frac) = (ticks / precision, ticks % precision);
    let (h, rem) = (secs / 3600, secs % 3600);
    let (m, s) = (rem / 60, rem % 60);
    if scale == 0 {
        format!("{sign}{h:03}:{m:02}:{s:02}")
    } else {
        format!("{sign}{h:03}:{m:02}:{s:02}.{frac:0width$}", width = scale as usize)
    }
}
