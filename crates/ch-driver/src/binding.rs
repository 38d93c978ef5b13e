//! SQL finalization: parameter substitution, literal formatting, and the
//! LIMIT/FORMAT decorations.
//!
//! Two binding styles: client-side `%(name)s` / `%s` placeholders replaced
//! with exact SQL literals, and server-side `{name:Type}` expressions left
//! in place with values shipped as `param_<name>` form fields.

use std::collections::HashMap;

use ch_types::{Error, Result, Tz, Value};

/// Named or positional query parameters.
#[derive(Debug, Clone, Default)]
pub enum Parameters {
    #[default]
    None,
    Named(HashMap<String, Value>),
    Positional(Vec<Value>),
}

impl Parameters {
    pub fn is_empty(&self) -> bool {
        match self {
            Parameters::None => true,
            Parameters::Named(map) => map.is_empty(),
            Parameters::Positional(list) => list.is_empty(),
        }
    }
}

/// Formats one value as a SQL literal for client-side substitution.
pub fn format_query_value(value: &Value, server_tz: Option<Tz>) -> String {
    match value {
        Value::Null => "NULL".to_owned(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_owned(),
        Value::String(s) => quote_string(s),
        Value::Enum(s) => quote_string(s),
        Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        Value::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.f")),
        Value::DateTimeTz(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.f%z")),
        Value::Uuid(u) => format!("'{u}'"),
        Value::Ipv4(ip) => format!("'{ip}'"),
        Value::Ipv6(ip) => format!("'{ip}'"),
        Value::Time { .. } => format!("'{value}'"),
        Value::Array(items) => format!(
            "[{}]",
            items
                .iter()
                .map(|v| format_query_value(v, server_tz))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Value::Tuple(items) => format!(
            "({})",
            items
                .iter()
                .map(|v| format_query_value(v, server_tz))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Value::Map(entries) => format!(
            "{{{}}}",
            entries
                .iter()
                .map(|(k, v)| format!(
                    "{}: {}",
                    format_query_value(k, server_tz),
                    format_query_value(v, server_tz)
                ))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Value::Json(v) => quote_string(&v.to_string()),
        Value::TypedVariant { value, .. } => format_query_value(value, server_tz),
        other => other.to_string(),
    }
}

/// Formats a value for server-side binding: like the literal form but with
/// strings unquoted (the server quotes according to the declared type).
pub fn format_bind_value(value: &Value, server_tz: Option<Tz>) -> String {
    match value {
        Value::Null => "NULL".to_owned(),
        Value::String(s) | Value::Enum(s) => escape_bind_string(s),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        Value::DateTimeTz(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        Value::Uuid(u) => u.to_string(),
        Value::Ipv4(ip) => ip.to_string(),
        Value::Ipv6(ip) => ip.to_string(),
        Value::Array(items) => format!(
            "[{}]",
            items
                .iter()
                .map(|v| format_query_value(v, server_tz))
                .collect::<Vec<_>>()
                .join(",")
        ),
        Value::Tuple(items) => format!(
            "({})",
            items
                .iter()
                .map(|v| format_query_value(v, server_tz))
                .collect::<Vec<_>>()
                .join(",")
        ),
        other => format_query_value(other, server_tz),
    }
}

fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\\' || c == '\'' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

fn escape_bind_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str(r"\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Whether the query uses server-side `{name:Type}` binding expressions.
pub fn uses_server_binding(query: &str) -> bool {
    let bytes = query.as_bytes();
    let mut ix = 0;
    while let Some(open) = query[ix..].find('{') {
        let start = ix + open + 1;
        if let Some(colon) = query[start..].find(':') {
            let name = &query[start..start + colon];
            if !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                && query[start + colon..].contains('}')
            {
                return true;
            }
        }
        ix = start;
        if ix >= bytes.len() {
            break;
        }
    }
    false
}

/// Bind parameters as `param_<name>` form fields for server-side binding.
pub fn bind_params(
    params: &HashMap<String, Value>,
    server_tz: Option<Tz>,
) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = params
        .iter()
        .map(|(name, value)| (format!("param_{name}"), format_bind_value(value, server_tz)))
        .collect();
    out.sort();
    out
}

/// Substitutes `%(name)s` and `%s` placeholders with formatted literals.
pub fn finalize_query(
    query: &str,
    parameters: &Parameters,
    server_tz: Option<Tz>,
) -> Result<String> {
    match parameters {
        Parameters::None => Ok(query.to_owned()),
        Parameters::Named(map) => {
            let mut out = String::with_capacity(query.len());
            let mut rest = query;
            while let Some(start) = rest.find("%(") {
                out.push_str(&rest[..start]);
                let after = &rest[start + 2..];
                let close = after.find(")s").ok_or_else(|| {
                    Error::Programming(format!("unterminated placeholder in query: {query}"))
                })?;
                let name = &after[..close];
                let value = map.get(name).ok_or_else(|| {
                    Error::Programming(format!("no parameter value for '{name}'"))
                })?;
                out.push_str(&format_query_value(value, server_tz));
                rest = &after[close + 2..];
            }
            out.push_str(rest);
            Ok(out)
        }
        Parameters::Positional(values) => {
            let mut out = String::with_capacity(query.len());
            let mut rest = query;
            let mut values = values.iter();
            while let Some(start) = rest.find("%s") {
                out.push_str(&rest[..start]);
                let value = values.next().ok_or_else(|| {
                    Error::Programming("not enough positional parameters for query".to_owned())
                })?;
                out.push_str(&format_query_value(value, server_tz));
                rest = &rest[start + 2..];
            }
            out.push_str(rest);
            Ok(out)
        }
    }
}

/// Strips `--` line comments and `/* */` block comments for structural
/// query inspection. Quoted strings are preserved intact.
pub fn uncomment(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let bytes = query.as_bytes();
    let mut ix = 0;
    let mut in_quote = false;
    while ix < bytes.len() {
        let c = bytes[ix] as char;
        if in_quote {
            out.push(c);
            if c == '\\' && ix + 1 < bytes.len() {
                out.push(bytes[ix + 1] as char);
                ix += 2;
                continue;
            }
            if c == '\'' {
                in_quote = false;
            }
            ix += 1;
        } else if c == '\'' {
            in_quote = true;
            out.push(c);
            ix += 1;
        } else if c == '-' && bytes.get(ix + 1) == Some(&b'-') {
            while ix < bytes.len() && bytes[ix] != b'\n' {
                ix += 1;
            }
        } else if c == '/' && bytes.get(ix + 1) == Some(&b'*') {
            ix += 2;
            while ix + 1 < bytes.len() && !(bytes[ix] == b'*' && bytes[ix + 1] == b'/') {
                ix += 1;
            }
            ix = (ix + 2).min(bytes.len());
        } else {
            out.push(c);
            ix += 1;
        }
    }
    out
}

/// True for SELECT-shaped queries, the only ones eligible for the
/// automatic LIMIT.
pub fn is_select(query: &str) -> bool {
    let trimmed = uncomment(query);
    let trimmed = trimmed.trim_start();
    ["SELECT", "WITH"].iter().any(|kw| {
        trimmed.len() >= kw.len() && trimmed[..kw.len()].eq_ignore_ascii_case(kw)
    })
}

fn has_limit(query: &str) -> bool {
    let upper = uncomment(query).to_uppercase();
    upper.split_whitespace().any(|word| word == "LIMIT")
}

/// True for `... LIMIT 0` column-probe queries.
pub fn is_columns_only(query: &str) -> bool {
    let upper = uncomment(query);
    let mut words = upper.split_whitespace().rev();
    matches!(
        (words.next(), words.next()),
        (Some("0"), Some(limit)) if limit.eq_ignore_ascii_case("LIMIT")
    )
}

/// Appends `LIMIT n` to SELECT-like queries without one.
pub fn apply_query_limit(query: &str, limit: u64) -> String {
    if limit == 0 || !is_select(query) || has_limit(query) {
        return query.to_owned();
    }
    format!("{query}\n LIMIT {limit}")
}

/// Backtick-quotes an identifier for DDL/insert statements.
pub fn quote_identifier(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}
