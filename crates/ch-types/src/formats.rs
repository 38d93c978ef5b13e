//! Read-format overrides.
//!
//! Overrides never change the wire format; they select the [`Value`]
//! variant a column decodes into (UUIDs as strings, UInt64 as signed,
//! FixedString as text, raw ticks for temporals). Resolution order:
//! per-column exact match, then per-query type-class glob, then the
//! process-wide defaults, then `Native`.
//!
//! [`Value`]: crate::value::Value

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result};

/// Alternative client-side representations for a column read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadFormat {
    #[default]
    Native,
    /// Text form: UUID/IP/BigInt/Decimal/FixedString/JSON/Time as strings.
    String,
    /// Raw bytes where the native form would decode text.
    Bytes,
    /// Raw wire integers for temporal types.
    Int,
    /// UInt64 as a signed 64-bit value.
    Signed,
    /// UInt64 kept unsigned (the native default).
    Unsigned,
    /// Named tuples as positional tuples instead of maps.
    Tuple,
    /// Named tuples / JSON columns as JSON strings.
    Json,
}

impl ReadFormat {
    pub fn parse(fmt: &str) -> Result<ReadFormat> {
        match fmt.to_ascii_lowercase().as_str() {
            "native" | "ip" | "uuid" => Ok(ReadFormat::Native),
            "string" | "str" => Ok(ReadFormat::String),
            "bytes" => Ok(ReadFormat::Bytes),
            "int" => Ok(ReadFormat::Int),
            "signed" => Ok(ReadFormat::Signed),
            "unsigned" => Ok(ReadFormat::Unsigned),
            "tuple" => Ok(ReadFormat::Tuple),
            "json" => Ok(ReadFormat::Json),
            other => Err(Error::Programming(format!(
                "unrecognized read format '{other}'"
            ))),
        }
    }
}

/// Glob match with `*` wildcards, case-insensitive, anchored at both ends.
pub fn class_glob_match(pattern: &str, class_name: &str) -> bool {
    fn match_parts(parts: &[&str], mut text: &str, anchored: bool) -> bool {
        match parts.split_first() {
            None => text.is_empty(),
            Some((first, rest)) => {
                if anchored {
                    match text.strip_prefix(first) {
                        Some(remaining) => match_parts(rest, remaining, false),
                        None => false,
                    }
                } else if first.is_empty() {
                    // Trailing `*` swallows the rest.
                    rest.is_empty() || match_parts(rest, text, false)
                } else {
                    while let Some(found) = text.find(first) {
                        if match_parts(rest, &text[found + first.len()..], false) {
                            return true;
                        }
                        text = &text[found + 1..];
                    }
                    false
                }
            }
        }
    }
    let pattern = pattern.to_ascii_lowercase();
    let class_name = class_name.to_ascii_lowercase();
    if !pattern.contains('*') {
        return pattern == class_name;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    if let Some(last) = parts.last() {
        if !last.is_empty() && !class_name.ends_with(last) {
            return false;
        }
    }
    match_parts(&parts, &class_name, !pattern.starts_with('*'))
}

/// Per-query and per-column overrides carried on a read context.
#[derive(Debug, Clone, Default)]
pub struct FormatOverrides {
    /// Exact column-name overrides.
    pub columns: HashMap<String, ReadFormat>,
    /// Type-class glob overrides for the whole query.
    pub classes: Vec<(String, ReadFormat)>,
}

impl FormatOverrides {
    pub fn set_column(&mut self, column: impl Into<String>, fmt: ReadFormat) {
        self.columns.insert(column.into(), fmt);
    }

    pub fn set_class(&mut self, pattern: impl Into<String>, fmt: ReadFormat) {
        self.classes.push((pattern.into(), fmt));
    }

    /// Resolves the active format for one column of one type class.
    pub fn resolve(&self, column_name: &str, class_name: &str) -> ReadFormat {
        if let Some(fmt) = self.columns.get(column_name) {
            return *fmt;
        }
        for (pattern, fmt) in &self.classes {
            if class_glob_match(pattern, class_name) {
                return *fmt;
            }
        }
        default_format(class_name)
    }
}

static DEFAULT_FORMATS: RwLock<Vec<(String, ReadFormat)>> = RwLock::new(Vec::new());

/// Installs a process-wide default read format for every type class the
/// glob pattern matches. Shared state: intended for startup configuration,
/// not for concurrent mutation during reads.
pub fn set_default_format(pattern: impl Into<String>, fmt: ReadFormat) {
    DEFAULT_FORMATS
        .write()
        .expect("format defaults poisoned")
        .push((pattern.into(), fmt));
}

/// Clears all process-wide default read formats.
pub fn clear_default_formats() {
    DEFAULT_FORMATS
        .write()
        .expect("format defaults poisoned")
        .clear();
}

fn default_format(class_name: &str) -> ReadFormat {
    let defaults = DEFAULT_FORMATS.read().expect("format defaults poisoned");
    for (pattern, fmt) in defaults.iter().rev() {
        if class_glob_match(pattern, class_name) {
            return *fmt;
        }
    }
    ReadFormat::Native
}
