//! Type descriptors: the parsed, cached form of a ClickHouse type name.
//!
//! A [`ChType`] pairs a base [`TypeKind`] with the `Nullable` /
//! `LowCardinality` wrapper flags. Container kinds hold shared references
//! to their element descriptors; the registry owns every descriptor and
//! hands them out as `Arc<ChType>`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::tz::Tz;
use crate::value::Value;

/// Enum key/value tables with lookups in both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumTable {
    pub names: Vec<String>,
    pub values: Vec<i32>,
    by_value: HashMap<i32, usize>,
    by_name: HashMap<String, i32>,
}

impl EnumTable {
    pub fn new(names: Vec<String>, values: Vec<i32>) -> Self {
        let by_value = values
            .iter()
            .enumerate()
            .map(|(ix, v)| (*v, ix))
            .collect();
        let by_name = names
            .iter()
            .cloned()
            .zip(values.iter().copied())
            .collect();
        Self {
            names,
            values,
            by_value,
            by_name,
        }
    }

    pub fn name_of(&self, value: i32) -> Option<&str> {
        self.by_value.get(&value).map(|ix| self.names[*ix].as_str())
    }

    pub fn value_of(&self, name: &str) -> Option<i32> {
        self.by_name.get(name).copied()
    }
}

/// Typed-path and skip declarations of a JSON column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonDecl {
    pub max_dynamic_paths: Option<u32>,
    pub max_dynamic_types: Option<u32>,
    pub typed_paths: Vec<(String, Arc<ChType>)>,
    pub skips: Vec<String>,
    pub skip_regexps: Vec<String>,
}

/// The closed set of base kinds the codec understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Int8,
    Int16,
    Int32,
    Int64,
    Int128,
    Int256,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    UInt128,
    UInt256,
    Float32,
    Float64,
    Float16,
    BFloat16,
    Bool,
    String,
    FixedString(usize),
    Date,
    Date32,
    DateTime {
        tz: Option<Tz>,
    },
    DateTime64 {
        scale: u32,
        tz: Option<Tz>,
    },
    Time,
    Time64 {
        scale: u32,
    },
    /// `bits` is the backing width chosen from the precision: 32, 64,
    /// 128, or 256.
    Decimal {
        precision: u32,
        scale: u32,
        bits: u32,
    },
    Uuid,
    Ipv4,
    Ipv6,
    /// `width` is 8 or 16.
    Enum {
        width: u32,
        table: EnumTable,
    },
    Array(Arc<ChType>),
    /// `names` is empty for unnamed tuples.
    Tuple {
        names: Vec<String>,
        element_types: Vec<Arc<ChType>>,
    },
    Map {
        key: Arc<ChType>,
        value: Arc<ChType>,
    },
    /// Encoded as `Array(Tuple(..))` with named fields.
    Nested {
        names: Vec<String>,
        element_types: Vec<Arc<ChType>>,
    },
    Variant {
        element_types: Vec<Arc<ChType>>,
    },
    Dynamic {
        max_types: Option<u32>,
    },
    Json(Box<JsonDecl>),
    /// Fixed-length quantized vector of `dimension` elements.
    QBit {
        element: Arc<ChType>,
        dimension: usize,
    },
    /// Stand-in for literal NULL columns.
    Nothing,
    /// Decodes exactly as its value type.
    SimpleAggregateFunction {
        value: Arc<ChType>,
    },
    /// Parseable for DDL reflection, rejected by the codec.
    Unsupported,
    /// Legacy `Object('json')`: string-encoded writes behind a one-byte
    /// prefix, reads rejected.
    ObjectJson,
}

/// A fully resolved column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChType {
    /// Canonical server-compatible name, wrappers included.
    pub name: String,
    /// Base name with arguments but without wrapper keywords.
    pub base_name: String,
    pub kind: TypeKind,
    pub nullable: bool,
    pub low_card: bool,
}

impl ChType {
    pub fn new(base_name: impl Into<String>, kind: TypeKind, nullable: bool, low_card: bool) -> Self {
        let base_name = base_name.into();
        let name = render_name(&base_name, nullable, low_card);
        Self {
            name,
            base_name,
            kind,
            nullable,
            low_card,
        }
    }

    /// Descriptor with the `Nullable` wrapper stripped. LowCardinality
    /// dictionary keys are serialized as this type.
    pub fn without_nullable(&self) -> ChType {
        if !self.nullable {
            return self.clone();
        }
        ChType::new(self.base_name.clone(), self.kind.clone(), false, self.low_card)
    }

    /// Estimated encoded bytes per row, used to size insert blocks.
    /// String-like estimates assume short payloads; containers assume a
    /// handful of elements.
    pub fn size_per_row(&self) -> usize {
        let base = match &self.kind {
            TypeKind::Int8 | TypeKind::UInt8 | TypeKind::Bool | TypeKind::Nothing => 1,
            TypeKind::Int16
            | TypeKind::UInt16
            | TypeKind::Float16
            | TypeKind::BFloat16
            | TypeKind::Date => 2,
            TypeKind::Int32
            | TypeKind::UInt32
            | TypeKind::Float32
            | TypeKind::Date32
            | TypeKind::DateTime { .. }
            | TypeKind::Time
            | TypeKind::Ipv4 => 4,
            TypeKind::Int64
            | TypeKind::UInt64
            | TypeKind::Float64
            | TypeKind::DateTime64 { .. }
            | TypeKind::Time64 { .. } => 8,
            TypeKind::Int128 | TypeKind::UInt128 | TypeKind::Uuid | TypeKind::Ipv6 => 16,
            TypeKind::Int256 | TypeKind::UInt256 => 32,
            TypeKind::Decimal { bits, .. } => (*bits / 8) as usize,
            TypeKind::Enum { width, .. } => (*width / 8) as usize,
            TypeKind::String | TypeKind::Json(_) | TypeKind::Dynamic { .. } => 60,
            TypeKind::FixedString(n) => *n,
            TypeKind::Array(inner) => 8 + 4 * inner.size_per_row(),
            TypeKind::Tuple { element_types, .. } | TypeKind::Nested { element_types, .. } => {
                element_types.iter().map(|t| t.size_per_row()).sum::<usize>() + 8
            }
            TypeKind::Map { key, value } => 8 + 4 * (key.size_per_row() + value.size_per_row()),
            TypeKind::Variant { element_types } => {
                1 + element_types
                    .iter()
                    .map(|t| t.size_per_row())
                    .max()
                    .unwrap_or(0)
            }
            TypeKind::QBit { element, dimension } => element.size_per_row() * dimension,
            TypeKind::SimpleAggregateFunction { value } => value.size_per_row(),
            TypeKind::Unsupported | TypeKind::ObjectJson => 60,
        };
        base + usize::from(self.nullable)
    }

    /// The zero-equivalent value substituted for nulls when the caller
    /// disables the absent-value sentinel.
    pub fn zero_value(&self) -> Value {
        match &self.kind {
            TypeKind::Int8 => Value::Int8(0),
            TypeKind::Int16 => Value::Int16(0),
            TypeKind::Int32 => Value::Int32(0),
            TypeKind::Int64 => Value::Int64(0),
            TypeKind::Int128 => Value::Int128(0),
            TypeKind::UInt8 => Value::UInt8(0),
            TypeKind::UInt16 => Value::UInt16(0),
            TypeKind::UInt32 => Value::UInt32(0),
            TypeKind::UInt64 => Value::UInt64(0),
            TypeKind::UInt128 => Value::UInt128(0),
            TypeKind::Int256 | TypeKind::UInt256 => Value::BigInt(num_bigint::BigInt::from(0)),
            TypeKind::Float32 | TypeKind::Float16 | TypeKind::BFloat16 => Value::Float32(0.0),
            TypeKind::Float64 => Value::Float64(0.0),
            TypeKind::Bool => Value::Bool(false),
            TypeKind::String | TypeKind::Enum { .. } => Value::String(String::new()),
            TypeKind::FixedString(n) => Value::Bytes(vec![0; *n]),
            TypeKind::Date | TypeKind::Date32 => {
                Value::Date(chrono::NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch"))
            }
            TypeKind::DateTime { .. } | TypeKind::DateTime64 { .. } => {
                Value::DateTime(chrono::DateTime::UNIX_EPOCH.naive_utc())
            }
            TypeKind::Time => Value::Time { ticks: 0, scale: 0 },
            TypeKind::Time64 { scale } => Value::Time {
                ticks: 0,
                scale: *scale,
            },
            TypeKind::Decimal { scale, bits, .. } if *bits <= 128 => Value::Decimal {
                raw: 0,
                scale: *scale,
            },
            TypeKind::Decimal { scale, .. } => Value::Decimal256 {
                raw: num_bigint::BigInt::from(0),
                scale: *scale,
            },
            TypeKind::Uuid => Value::Uuid(uuid::Uuid::nil()),
            TypeKind::Ipv4 => Value::Ipv4(std::net::Ipv4Addr::UNSPECIFIED),
            TypeKind::Ipv6 => Value::Ipv6(std::net::Ipv6Addr::UNSPECIFIED),
            TypeKind::Array(_) | TypeKind::Nested { .. } | TypeKind::QBit { .. } => {
                Value::Array(Vec::new())
            }
            TypeKind::Tuple { element_types, .. } => {
                Value::Tuple(element_types.iter().map(|t| t.zero_value()).collect())
            }
            TypeKind::Map { .. } => Value::Map(Vec::new()),
            TypeKind::Json(_) | TypeKind::ObjectJson => {
                Value::Json(serde_json::Value::Object(serde_json::Map::new()))
            }
            TypeKind::SimpleAggregateFunction { value } => value.zero_value(),
            TypeKind::Variant { .. }
            | TypeKind::Dynamic { .. }
            | TypeKind::Nothing
            | TypeKind::Unsupported => Value::Null,
        }
    }

    /// Short class name used by glob-style read-format overrides
    /// (`IP*`, `*Int64`). This is the base name without arguments or
    /// wrappers.
    pub fn class_name(&self) -> &'static str {
        match &self.kind {
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
            TypeKind::Float32 => "Float32",
            TypeKind::Float64 => "Float64",
            TypeKind::Float16 => "Float16",
            TypeKind::BFloat16 => "BFloat16",
            TypeKind::Bool => "Bool",
            TypeKind::String => "String",
            TypeKind::FixedString(_) => "FixedString",
            TypeKind::Date => "Date",
            TypeKind::Date32 => "Date32",
            TypeKind::DateTime { .. } => "DateTime",
            TypeKind::DateTime64 { .. } => "DateTime64",
            TypeKind::Time => "Time",
            TypeKind::Time64 { .. } => "Time64",
            TypeKind::Decimal { .. } => "Decimal",
            TypeKind::Uuid => "UUID",
            TypeKind::Ipv4 => "IPv4",
            TypeKind::Ipv6 => "IPv6",
            TypeKind::Enum { width: 8, .. } => "Enum8",
            TypeKind::Enum { .. } => "Enum16",
            TypeKind::Array(_) => "Array",
            TypeKind::Tuple { .. } => "Tuple",
            TypeKind::Map { .. } => "Map",
            TypeKind::Nested { .. } => "Nested",
            TypeKind::Variant { .. } => "Variant",
            TypeKind::Dynamic { .. } => "Dynamic",
            TypeKind::Json(_) => "JSON",
            TypeKind::QBit { .. } => "QBit",
            TypeKind::Nothing => "Nothing",
            TypeKind::SimpleAggregateFunction { .. } => "SimpleAggregateFunction",
            TypeKind::Unsupported => "AggregateFunction",
            TypeKind::ObjectJson => "Object",
        }
    }
}

/// Applies wrapper keywords to a base name: `Nullable` innermost, then
/// `LowCardinality`.
pub fn render_name(base_name: &str, nullable: bool, low_card: bool) -> String {
    let mut name = base_name.to_owned();
    if nullable {
        name = format!("Nullable({name})");
    }
    if low_card {
        name = format!("LowCardinality({name})");
    }
    name
}
