//! Parsing of ClickHouse type names into [`TypeDef`]s.
//!
//! The grammar is closed: a leading identifier, an optional parenthesized
//! argument list whose elements are nested type expressions, quoted string
//! literals (with backslash escapes), or integer literals, plus the two
//! wrapper keywords `Nullable(..)` and `LowCardinality(..)` stripped
//! outer-to-inner. `Enum8`/`Enum16` and `JSON` carry their own
//! sub-grammars.

use crate::error::{Error, Result};

/// Wrapper keywords applied outside-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wrapper {
    Nullable,
    LowCardinality,
}

/// Immutable parse result that fully determines a type descriptor.
///
/// `values` carries positional parameters (element type names for
/// containers, precision/scale digits, quoted time zones); `keys` carries
/// named parameters (enum labels, named-tuple field names, JSON typed-path
/// keys and options).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TypeDef {
    pub base: String,
    pub wrappers: Vec<Wrapper>,
    pub keys: Vec<String>,
    pub values: Vec<String>,
}

impl TypeDef {
    pub fn nullable(&self) -> bool {
        self.wrappers.contains(&Wrapper::Nullable)
    }

    pub fn low_card(&self) -> bool {
        self.wrappers.contains(&Wrapper::LowCardinality)
    }
}

/// Parses a full type name, stripping wrapper keywords.
pub fn parse_type_name(name: &str) -> Result<TypeDef> {
    let mut working = name.trim();
    let mut wrappers = Vec::new();
    loop {
        if let Some(inner) = strip_wrapper(working, "Nullable(") {
            wrappers.push(Wrapper::Nullable);
            working = inner;
        } else if let Some(inner) = strip_wrapper(working, "LowCardinality(") {
            wrappers.push(Wrapper::LowCardinality);
            working = inner;
        } else {
            break;
        }
    }
    let (base, args) = split_base(working)?;
    let mut def = TypeDef {
        base: base.to_owned(),
        wrappers,
        ..TypeDef::default()
    };
    let Some(args) = args else {
        return Ok(def);
    };
    match base {
        "Enum8" | "Enum16" => parse_enum_args(args, &mut def)?,
        "JSON" => parse_json_args(args, &mut def)?,
        "Tuple" | "Nested" => parse_element_args(args, &mut def)?,
        _ => {
            for arg in split_args(args)? {
                push_eq_arg(&arg, &mut def);
            }
        }
    }
    Ok(def)
}

/// Strips one wrapper keyword when its opening paren is balanced by the
/// final character.
fn strip_wrapper<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = name.strip_prefix(prefix)?;
    let inner = rest.strip_suffix(')')?;
    // The stripped paren must match the wrapper's, not one inside the
    // argument (e.g. `Nullable(X)` vs a hypothetical `NullableFoo`).
    let mut depth = 1i32;
    for c in prefix_paren_scan(inner) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 1).then_some(inner)
}

/// Characters of `s` with quoted runs blanked out, for paren balancing.
fn prefix_paren_scan(s: &str) -> impl Iterator<Item = char> + '_ {
    let mut in_quote = false;
    let mut escaped = false;
    s.chars().map(move |c| {
        if escaped {
            escaped = false;
            return ' ';
        }
        match c {
            '\\' if in_quote => {
                escaped = true;
                ' '
            }
            '\'' => {
                in_quote = !in_quote;
                ' '
            }
            _ if in_quote => ' ',
            _ => c,
        }
    })
}

/// Splits `Base(args)` into the identifier and the raw argument text.
fn split_base(name: &str) -> Result<(&str, Option<&str>)> {
    match name.find('(') {
        None => {
            if name.is_empty() {
                return Err(Error::Parse("empty type name".to_owned()));
            }
            Ok((name, None))
        }
        Some(open) => {
            let base = &name[..open];
            let rest = &name[open + 1..];
            let inner = rest
                .strip_suffix(')')
                .ok_or_else(|| Error::Parse(format!("unbalanced parentheses in '{name}'")))?;
            Ok((base, Some(inner)))
        }
    }
}

/// Splits an argument list on top-level commas, respecting nested parens
/// and quoted strings with backslash escapes.
pub fn split_args(args: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut in_quote = false;
    let mut escaped = false;
    let mut current = String::new();
    for c in args.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quote => {
                current.push(c);
                escaped = true;
            }
            '\'' => {
                current.push(c);
                in_quote = !in_quote;
            }
            '(' if !in_quote => {
                current.push(c);
                depth += 1;
            }
            ')' if !in_quote => {
                current.push(c);
                depth -= 1;
                if depth < 0 {
                    return Err(Error::Parse(format!("unbalanced parentheses in '{args}'")));
                }
            }
            ',' if !in_quote && depth == 0 => {
                out.push(current.trim().to_owned());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if in_quote || depth != 0 {
        return Err(Error::Parse(format!("unterminated argument list '{args}'")));
    }
    let last = current.trim();
    if !last.is_empty() {
        out.push(last.to_owned());
    }
    Ok(out)
}

/// `name = value` arguments (Dynamic `max_types`, JSON limits) land in
/// keys/values; everything else is positional.
fn push_eq_arg(arg: &str, def: &mut TypeDef) {
    if let Some(eq) = top_level_eq(arg) {
        let key = arg[..eq].trim();
        if key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !key.is_empty()
        {
            def.keys.push(key.to_owned());
            def.values.push(arg[eq + 1..].trim().to_owned());
            return;
        }
    }
    def.values.push(arg.to_owned());
}

fn top_level_eq(arg: &str) -> Option<usize> {
    let mut in_quote = false;
    let mut escaped = false;
    let mut depth = 0i32;
    for (ix, c) in arg.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quote => escaped = true,
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth -= 1,
            '=' if !in_quote && depth == 0 => return Some(ix),
            _ => {}
        }
    }
    None
}

/// `'key' = value, ...` with backslash-escaped quotes inside keys.
fn parse_enum_args(args: &str, def: &mut TypeDef) -> Result<()> {
    for arg in split_args(args)? {
        let eq = top_level_eq(&arg)
            .ok_or_else(|| Error::Parse(format!("enum entry '{arg}' is missing '='")))?;
        let key = unquote(arg[..eq].trim())
            .ok_or_else(|| Error::Parse(format!("enum key in '{arg}' is not quoted")))?;
        let value = arg[eq + 1..].trim();
        value
            .parse::<i32>()
            .map_err(|_| Error::Parse(format!("enum value '{value}' is not an integer")))?;
        def.keys.push(key);
        def.values.push(value.to_owned());
    }
    Ok(())
}

/// Named or unnamed Tuple/Nested elements: `field Type` puts the field
/// name in keys; a bare type expression is positional.
fn parse_element_args(args: &str, def: &mut TypeDef) -> Result<()> {
    for arg in split_args(args)? {
        match split_leading_identifier(&arg) {
            Some((field, type_expr)) if !type_expr.is_empty() => {
                def.keys.push(field);
                def.values.push(type_expr.to_owned());
            }
            _ => def.values.push(arg),
        }
    }
    Ok(())
}

/// JSON argument grammar: `max_dynamic_paths = N`, `max_dynamic_types = N`,
/// `SKIP <path>`, `SKIP REGEXP '...'`, and typed paths `<path> <type>`.
fn parse_json_args(args: &str, def: &mut TypeDef) -> Result<()> {
    for arg in split_args(args)? {
        if let Some(eq) = top_level_eq(&arg) {
            let key = arg[..eq].trim();
            if key == "max_dynamic_paths" || key == "max_dynamic_types" {
                def.keys.push(key.to_owned());
                def.values.push(arg[eq + 1..].trim().to_owned());
                continue;
            }
        }
        if let Some(rest) = arg.strip_prefix("SKIP ") {
            let rest = rest.trim();
            def.keys.push("SKIP".to_owned());
            if let Some(pattern) = rest.strip_prefix("REGEXP") {
                def.values.push(format!("REGEXP {}", pattern.trim()));
            } else {
                def.values
                    .push(unquote_backtick(rest).unwrap_or_else(|| rest.to_owned()));
            }
            continue;
        }
        match split_leading_identifier(&arg) {
            Some((path, type_expr)) if !type_expr.is_empty() => {
                def.keys.push(path);
                def.values.push(type_expr.to_owned());
            }
            _ => {
                return Err(Error::Parse(format!(
                    "unrecognized JSON type argument '{arg}'"
                )));
            }
        }
    }
    Ok(())
}

/// Splits a leading identifier (plain, backquoted, or single-quoted with
/// escapes) from the remainder. Returns the unescaped identifier and the
/// trimmed rest.
fn split_leading_identifier(arg: &str) -> Option<(String, &str)> {
    let arg = arg.trim();
    if let Some(rest) = arg.strip_prefix('`') {
        let end = rest.find('`')?;
        return Some((rest[..end].to_owned(), rest[end + 1..].trim_start()));
    }
    if arg.starts_with('\'') {
        let (ident, consumed) = take_quoted(arg)?;
        return Some((ident, arg[consumed..].trim_start()));
    }
    let end = arg
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
        .unwrap_or(arg.len());
    if end == 0 {
        return None;
    }
    // A bare identifier must be followed by whitespace to name an element;
    // otherwise the whole argument is a type expression.
    let rest = &arg[end..];
    if rest.starts_with(char::is_whitespace) {
        Some((arg[..end].to_owned(), rest.trim_start()))
    } else {
        None
    }
}

/// Unescapes a single-quoted literal, returning its content and the byte
/// length consumed.
fn take_quoted(s: &str) -> Option<(String, usize)> {
    let mut chars = s.char_indices();
    let (_, first) = chars.next()?;
    if first != '\'' {
        return None;
    }
    let mut out = String::new();
    let mut escaped = false;
    for (ix, c) in chars {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '\'' {
            return Some((out, ix + 1));
        } else {
            out.push(c);
        }
    }
    None
}

/// Unescapes a complete single-quoted literal.
pub fn unquote(s: &str) -> Option<String> {
    let (out, consumed) = take_quoted(s)?;
    (consumed == s.len()).then_some(out)
}

fn unquote_backtick(s: &str) -> Option<String> {
    s.strip_prefix('`')
        .and_then(|r| r.strip_suffix('`'))
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_types() {
        let def = parse_type_name("UInt64").unwrap();
        assert_eq!(def.base, "UInt64");
        assert!(def.wrappers.is_empty());
        assert!(def.values.is_empty());
    }

    #[test]
    fn wrappers_strip_outer_to_inner() {
        let def = parse_type_name("LowCardinality(Nullable(String))").unwrap();
        assert_eq!(def.base, "String");
        assert_eq!(def.wrappers, vec![Wrapper::LowCardinality, Wrapper::Nullable]);
        assert!(def.nullable());
        assert!(def.low_card());
    }

    #[test]
    fn nested_container_args_stay_whole() {
        let def = parse_type_name("Map(String, Tuple(UInt32, Nullable(DateTime64(6, 'UTC'))))")
            .unwrap();
        assert_eq!(def.base, "Map");
        assert_eq!(
            def.values,
            vec!["String", "Tuple(UInt32, Nullable(DateTime64(6, 'UTC')))"]
        );
    }

    #[test]
    fn array_of_wrapped_string() {
        let def = parse_type_name("Array(LowCardinality(Nullable(String)))").unwrap();
        assert_eq!(def.base, "Array");
        assert_eq!(def.values, vec!["LowCardinality(Nullable(String))"]);
        assert!(def.wrappers.is_empty());
    }

    #[test]
    fn enum_sub_grammar() {
        let def = parse_type_name("Enum8('a' = 1, 'b' = -2)").unwrap();
        assert_eq!(def.keys, vec!["a", "b"]);
        assert_eq!(def.values, vec!["1", "-2"]);
    }

    #[test]
    fn enum_keys_unescape() {
        let def = parse_type_name(r"Enum8('it\'s' = 1, 'a\\b' = 2)").unwrap();
        assert_eq!(def.keys, vec!["it's", r"a\b"]);
    }

    #[test]
    fn named_tuple_elements() {
        let def = parse_type_name("Tuple(id UInt32, name String)").unwrap();
        assert_eq!(def.keys, vec!["id", "name"]);
        assert_eq!(def.values, vec!["UInt32", "String"]);
    }

    #[test]
    fn unnamed_tuple_elements() {
        let def = parse_type_name("Tuple(UInt32, String)").unwrap();
        assert!(def.keys.is_empty());
        assert_eq!(def.values, vec!["UInt32", "String"]);
    }

    #[test]
    fn json_sub_grammar() {
        let def = parse_type_name(
            "JSON(max_dynamic_paths = 100, 'a.b' DateTime64(3), SKIP secret, SKIP REGEXP 'tmp.*')",
        )
        .unwrap();
        assert_eq!(
            def.keys,
            vec!["max_dynamic_paths", "a.b", "SKIP", "SKIP"]
        );
        assert_eq!(
            def.values,
            vec!["100", "DateTime64(3)", "secret", "REGEXP 'tmp.*'"]
        );
    }

    #[test]
    fn datetime_zone_keeps_quotes() {
        let def = parse_type_name("DateTime64(6, 'Europe/Moscow')").unwrap();
        assert_eq!(def.values, vec!["6", "'Europe/Moscow'"]);
    }

    #[test]
    fn dynamic_max_types() {
        let def = parse_type_name("Dynamic(max_types=32)").unwrap();
        assert_eq!(def.keys, vec!["max_types"]);
        assert_eq!(def.values, vec!["32"]);
    }

    #[test]
    fn unbalanced_parens_fail() {
        assert!(parse_type_name("Array(String").is_err());
        assert!(parse_type_name("Tuple(UInt32))").is_err());
    }
}
