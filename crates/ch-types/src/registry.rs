//! The process-wide type registry.
//!
//! Parses type names into [`TypeDef`]s, builds [`ChType`] descriptors, and
//! memoizes both directions. Descriptors are shared read-only; container
//! descriptors hold `Arc` references to their cached element descriptors.

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::types::{ChType, EnumTable, JsonDecl, TypeKind};
use crate::typedef::{TypeDef, parse_type_name, unquote};
use crate::tz::Tz;

static REGISTRY: LazyLock<TypeRegistry> = LazyLock::new(TypeRegistry::new);

/// Resolves a type name through the shared registry.
pub fn get_type(name: &str) -> Result<Arc<ChType>> {
    REGISTRY.get(name)
}

/// Name→def and def→descriptor memoization caches.
pub struct TypeRegistry {
    by_name: DashMap<String, Arc<ChType>>,
    by_def: DashMap<TypeDef, Arc<ChType>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            by_def: DashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<ChType>> {
        if let Some(hit) = self.by_name.get(name) {
            return Ok(Arc::clone(hit.value()));
        }
        let def = parse_type_name(name)?;
        let built = self.get_from_def(&def)?;
        self.by_name.insert(name.to_owned(), Arc::clone(&built));
        Ok(built)
    }

    pub fn get_from_def(&self, def: &TypeDef) -> Result<Arc<ChType>> {
        if let Some(hit) = self.by_def.get(def) {
            return Ok(Arc::clone(hit.value()));
        }
        let built = Arc::new(self.build(def)?);
        self.by_def.insert(def.clone(), Arc::clone(&built));
        // The canonical rendering resolves to the same descriptor.
        self.by_name
            .entry(built.name.clone())
            .or_insert_with(|| Arc::clone(&built));
        Ok(built)
    }

    fn build(&self, def: &TypeDef) -> Result<ChType> {
        let (base_name, kind) = self.build_kind(def)?;
        Ok(ChType::new(base_name, kind, def.nullable(), def.low_card()))
    }

    fn build_kind(&self, def: &TypeDef) -> Result<(String, TypeKind)> {
        let base = def.base.as_str();
        let simple = |kind: TypeKind| Ok((base.to_owned(), kind));
        match base {
            "Int8" => simple(TypeKind::Int8),
            "Int16" => simple(TypeKind::Int16),
            "Int32" => simple(TypeKind::Int32),
            "Int64" => simple(TypeKind::Int64),
            "Int128" => simple(TypeKind::Int128),
            "Int256" => simple(TypeKind::Int256),
            "UInt8" => simple(TypeKind::UInt8),
            "UInt16" => simple(TypeKind::UInt16),
            "UInt32" => simple(TypeKind::UInt32),
            "UInt64" => simple(TypeKind::UInt64),
            "UInt128" => simple(TypeKind::UInt128),
            "UInt256" => simple(TypeKind::UInt256),
            "Float32" => simple(TypeKind::Float32),
            "Float64" => simple(TypeKind::Float64),
            "Float16" => simple(TypeKind::Float16),
            "BFloat16" => simple(TypeKind::BFloat16),
            "Bool" | "Boolean" => Ok(("Bool".to_owned(), TypeKind::Bool)),
            "String" => simple(TypeKind::String),
            "FixedString" => {
                let n = int_arg(def, 0, "FixedString length")?;
                Ok((format!("FixedString({n})"), TypeKind::FixedString(n as usize)))
            }
            "Date" => simple(TypeKind::Date),
            "Date32" => simple(TypeKind::Date32),
            "DateTime" => {
                let tz = zone_arg(def, 0)?;
                let name = match def.values.first() {
                    Some(raw) => format!("DateTime({raw})"),
                    None => "DateTime".to_owned(),
                };
                Ok((name, TypeKind::DateTime { tz }))
            }
            "DateTime64" => {
                let scale = int_arg(def, 0, "DateTime64 precision")?;
                if scale > 9 {
                    return Err(Error::Parse(format!(
                        "DateTime64 precision {scale} out of range"
                    )));
                }
                let tz = zone_arg(def, 1)?;
                let name = match def.values.get(1) {
                    Some(raw) => format!("DateTime64({scale}, {raw})"),
                    None => format!("DateTime64({scale})"),
                };
                Ok((name, TypeKind::DateTime64 { scale: scale as u32, tz }))
            }
            "Time" => simple(TypeKind::Time),
            "Time64" => {
                let scale = int_arg(def, 0, "Time64 precision")?;
                if scale > 9 {
                    return Err(Error::Parse(format!("Time64 precision {scale} out of range")));
                }
                Ok((format!("Time64({scale})"), TypeKind::Time64 { scale: scale as u32 }))
            }
            "Decimal" => {
                let precision = int_arg(def, 0, "Decimal precision")? as u32;
                let scale = int_arg(def, 1, "Decimal scale")? as u32;
                decimal_kind(precision, scale)
            }
            "Decimal32" => decimal_kind(9, int_arg(def, 0, "Decimal32 scale")? as u32),
            "Decimal64" => decimal_kind(18, int_arg(def, 0, "Decimal64 scale")? as u32),
            "Decimal128" => decimal_kind(38, int_arg(def, 0, "Decimal128 scale")? as u32),
            "Decimal256" => decimal_kind(76, int_arg(def, 0, "Decimal256 scale")? as u32),
            "UUID" => simple(TypeKind::Uuid),
            "IPv4" => simple(TypeKind::Ipv4),
            "IPv6" => simple(TypeKind::Ipv6),
            "Enum8" | "Enum16" => {
                let width = if base == "Enum8" { 8 } else { 16 };
                let values = def
                    .values
                    .iter()
                    .map(|v| {
                        v.parse::<i32>()
                            .map_err(|_| Error::Parse(format!("enum value '{v}'")))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let table = EnumTable::new(def.keys.clone(), values);
                let rendered = def
                    .keys
                    .iter()
                    .zip(&table.values)
                    .map(|(k, v)| format!("'{}' = {v}", escape_enum_key(k)))
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok((format!("{base}({rendered})"), TypeKind::Enum { width, table }))
            }
            "Array" => {
                let element = self.element(def, 0)?;
                Ok((format!("Array({})", element.name), TypeKind::Array(element)))
            }
            "Tuple" => {
                let element_types = self.elements(def)?;
                let name = render_elements("Tuple", &def.keys, &element_types);
                Ok((
                    name,
                    TypeKind::Tuple {
                        names: def.keys.clone(),
                        element_types,
                    },
                ))
            }
            "Map" => {
                let key = self.element(def, 0)?;
                let value = self.element(def, 1)?;
                Ok((
                    format!("Map({}, {})", key.name, value.name),
                    TypeKind::Map { key, value },
                ))
            }
            "Nested" => {
                if def.keys.len() != def.values.len() {
                    return Err(Error::Parse("Nested fields must all be named".to_owned()));
                }
                let element_types = self.elements(def)?;
                let name = render_elements("Nested", &def.keys, &element_types);
                Ok((
                    name,
                    TypeKind::Nested {
                        names: def.keys.clone(),
                        element_types,
                    },
                ))
            }
            "Variant" => {
                let element_types = self.elements(def)?;
                let rendered = element_types
                    .iter()
                    .map(|t| t.name.clone())
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok((format!("Variant({rendered})"), TypeKind::Variant { element_types }))
            }
            "Dynamic" => {
                let max_types = named_int(def, "max_types");
                let name = match max_types {
                    Some(n) => format!("Dynamic(max_types={n})"),
                    None => "Dynamic".to_owned(),
                };
                Ok((name, TypeKind::Dynamic { max_types }))
            }
            "JSON" => self.build_json(def),
            "Object" => {
                let arg = def.values.first().map(String::as_str).unwrap_or_default();
                let inner = unquote(arg).unwrap_or_default().to_lowercase();
                if inner != "json" {
                    return Err(Error::NotSupported(format!("Object({arg})")));
                }
                Ok(("Object('json')".to_owned(), TypeKind::ObjectJson))
            }
            "QBit" => {
                let element = self.element(def, 0)?;
                match element.kind {
                    TypeKind::Float16 | TypeKind::BFloat16 | TypeKind::Float32 | TypeKind::Float64 => {}
                    _ => {
                        return Err(Error::Parse(format!(
                            "QBit element type {} must be a float",
                            element.name
                        )));
                    }
                }
                let dimension = int_arg(def, 1, "QBit dimension")? as usize;
                Ok((
                    format!("QBit({}, {dimension})", element.name),
                    TypeKind::QBit { element, dimension },
                ))
            }
            "Nothing" => simple(TypeKind::Nothing),
            "SimpleAggregateFunction" => {
                let function = def
                    .values
                    .first()
                    .cloned()
                    .ok_or_else(|| Error::Parse("SimpleAggregateFunction needs a function".to_owned()))?;
                let value = self.element(def, 1)?;
                Ok((
                    format!("SimpleAggregateFunction({function}, {})", value.name),
                    TypeKind::SimpleAggregateFunction { value },
                ))
            }
            "AggregateFunction" => {
                let rendered = def.values.join(", ");
                Ok((format!("AggregateFunction({rendered})"), TypeKind::Unsupported))
            }
            "Point" => self.alias(def, "Point", "Tuple(Float64, Float64)"),
            "Ring" => self.alias(def, "Ring", "Array(Point)"),
            "LineString" => self.alias(def, "LineString", "Array(Point)"),
            "Polygon" => self.alias(def, "Polygon", "Array(Ring)"),
            "MultiLineString" => self.alias(def, "MultiLineString", "Array(LineString)"),
            "MultiPolygon" => self.alias(def, "MultiPolygon", "Array(Polygon)"),
            _ => Err(Error::UnknownType(def.base.clone())),
        }
    }

    /// Geometric types are pure aliases over container compositions; the
    /// alias keeps its own canonical name.
    fn alias(&self, def: &TypeDef, name: &str, target: &str) -> Result<(String, TypeKind)> {
        if !def.values.is_empty() {
            return Err(Error::Parse(format!("{name} takes no arguments")));
        }
        let resolved = self.get(target)?;
        Ok((name.to_owned(), resolved.kind.clone()))
    }

    fn build_json(&self, def: &TypeDef) -> Result<(String, TypeKind)> {
        let mut decl = JsonDecl::default();
        let mut parts = Vec::new();
        for (key, value) in def.keys.iter().zip(&def.values) {
            match key.as_str() {
                "max_dynamic_paths" => {
                    decl.max_dynamic_paths = Some(
                        value
                            .parse()
                            .map_err(|_| Error::Parse(format!("max_dynamic_paths '{value}'")))?,
                    );
                    parts.push(format!("max_dynamic_paths = {value}"));
                }
                "max_dynamic_types" => {
                    decl.max_dynamic_types = Some(
                        value
                            .parse()
                            .map_err(|_| Error::Parse(format!("max_dynamic_types '{value}'")))?,
                    );
                    parts.push(format!("max_dynamic_types = {value}"));
                }
                "SKIP" => {
                    if let Some(pattern) = value.strip_prefix("REGEXP ") {
                        decl.skip_regexps.push(pattern.to_owned());
                        parts.push(format!("SKIP REGEXP {pattern}"));
                    } else {
                        decl.skips.push(value.clone());
                        parts.push(format!("SKIP `{value}`"));
                    }
                }
                path => {
                    let ch_type = self.get(value)?;
                    parts.push(format!("`{path}` {}", ch_type.name));
                    decl.typed_paths.push((path.to_owned(), ch_type));
                }
            }
        }
        let name = if parts.is_empty() {
            "JSON".to_owned()
        } else {
            format!("JSON({})", parts.join(", "))
        };
        Ok((name, TypeKind::Json(Box::new(decl))))
    }

    fn element(&self, def: &TypeDef, ix: usize) -> Result<Arc<ChType>> {
        let raw = def.values.get(ix).ok_or_else(|| {
            Error::Parse(format!("{} needs an argument at position {ix}", def.base))
        })?;
        self.get(raw)
    }

    fn elements(&self, def: &TypeDef) -> Result<Vec<Arc<ChType>>> {
        def.values.iter().map(|v| self.get(v)).collect()
    }
}

fn decimal_kind(precision: u32, scale: u32) -> Result<(String, TypeKind)> {
    let bits = match precision {
        1..=9 => 32,
        10..=18 => 64,
        19..=38 => 128,
        39..=76 => 256,
        _ => {
            return Err(Error::Parse(format!(
                "Decimal precision {precision} out of range"
            )));
        }
    };
    if scale > precision {
        return Err(Error::Parse(format!(
            "Decimal scale {scale} exceeds precision {precision}"
        )));
    }
    Ok((
        format!("Decimal({precision}, {scale})"),
        TypeKind::Decimal {
            precision,
            scale,
            bits,
        },
    ))
}

fn int_arg(def: &TypeDef, ix: usize, what: &str) -> Result<i64> {
    def.values
        .get(ix)
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| Error::Parse(format!("{what} missing or not an integer")))
}

fn named_int(def: &TypeDef, key: &str) -> Option<u32> {
    def.keys
        .iter()
        .position(|k| k == key)
        .and_then(|ix| def.values.get(ix))
        .and_then(|v| v.parse().ok())
}

/// Time zone arguments arrive as quoted literals, e.g. `'UTC'`.
fn zone_arg(def: &TypeDef, ix: usize) -> Result<Option<Tz>> {
    match def.values.get(ix) {
        None => Ok(None),
        Some(raw) => {
            let name = unquote(raw)
                .ok_or_else(|| Error::Parse(format!("time zone literal {raw} is not quoted")))?;
            Tz::named(&name).map(Some)
        }
    }
}

fn escape_enum_key(key: &str) -> String {
    key.replace('\\', r"\\").replace('\'', r"\'")
}

fn render_elements(base: &str, names: &[String], types: &[Arc<ChType>]) -> String {
    let rendered = if names.len() == types.len() && !names.is_empty() {
        names
            .iter()
            .zip(types)
            .map(|(n, t)| format!("{n} {}", t.name))
            .collect::<Vec<_>>()
            .join(", ")
    } else {
        types
            .iter()
            .map(|t| t.name.clone())
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("{base}({rendered})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_and_caches() {
        let a = get_type("Array(LowCardinality(Nullable(String)))").unwrap();
        let b = get_type("Array(LowCardinality(Nullable(String)))").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name, "Array(LowCardinality(Nullable(String)))");
        match &a.kind {
            TypeKind::Array(inner) => {
                assert!(inner.nullable);
                assert!(inner.low_card);
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn decimal_width_selection() {
        for (name, bits) in [
            ("Decimal(9, 2)", 32),
            ("Decimal(18, 4)", 64),
            ("Decimal(38, 10)", 128),
            ("Decimal(76, 38)", 256),
        ] {
            match get_type(name).unwrap().kind {
                TypeKind::Decimal { bits: b, .. } => assert_eq!(b, bits, "{name}"),
                ref other => panic!("expected decimal, got {other:?}"),
            }
        }
        assert!(get_type("Decimal(77, 0)").is_err());
    }

    #[test]
    fn decimal_aliases() {
        match get_type("Decimal64(6)").unwrap().kind {
            TypeKind::Decimal {
                precision, scale, bits,
            } => {
                assert_eq!((precision, scale, bits), (18, 6, 64));
            }
            ref other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_base_errors() {
        assert!(matches!(
            get_type("Widget(12)"),
            Err(Error::UnknownType(name)) if name == "Widget"
        ));
    }

    #[test]
    fn geometric_aliases_resolve_to_containers() {
        let point = get_type("Point").unwrap();
        assert_eq!(point.name, "Point");
        assert!(matches!(point.kind, TypeKind::Tuple { .. }));
        let polygon = get_type("MultiPolygon").unwrap();
        assert!(matches!(polygon.kind, TypeKind::Array(_)));
    }

    #[test]
    fn enum_canonical_name_escapes_keys() {
        let t = get_type(r"Enum8('it\'s' = 1)").unwrap();
        assert_eq!(t.name, r"Enum8('it\'s' = 1)");
    }

    #[test]
    fn json_typed_paths() {
        let t = get_type("JSON(max_dynamic_paths = 8, `a.b` DateTime64(3), SKIP secret)").unwrap();
        match &t.kind {
            TypeKind::Json(decl) => {
                assert_eq!(decl.max_dynamic_paths, Some(8));
                assert_eq!(decl.typed_paths.len(), 1);
                assert_eq!(decl.typed_paths[0].0, "a.b");
                assert_eq!(decl.skips, vec!["secret"]);
            }
            other => panic!("expected JSON, got {other:?}"),
        }
    }

    #[test]
    fn simple_aggregate_function_decodes_as_value_type() {
        let t = get_type("SimpleAggregateFunction(sum, UInt64)").unwrap();
        match &t.kind {
            TypeKind::SimpleAggregateFunction { value } => {
                assert_eq!(value.name, "UInt64");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn boolean_alias() {
        assert_eq!(get_type("Boolean").unwrap().name, "Bool");
    }
}
