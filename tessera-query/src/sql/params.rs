//! Named parameter binding.
//!
//! User fragments reference parameters by name (`:id`) or as a spread list
//! (`:...ids`). Rendering keeps the names; this final pass walks the
//! statement once and turns each reference into a positional placeholder in
//! text order, skipping string literals, quoted identifiers and `::` casts.

use indexmap::IndexMap;

use crate::dialect::Dialect;
use crate::error::{QueryError, QueryResult};
use crate::value::Value;

/// A span of statement text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    /// Plain SQL.
    Code(&'a str),
    /// A string literal or quoted identifier, quotes included.
    Quoted(&'a str),
}

/// Split statement text into code and quoted spans.
pub(crate) fn segments<'a>(text: &'a str, dialect: &Dialect) -> Vec<Segment<'a>> {
    let (open, close) = dialect.quote;
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let terminator = if c == '\'' {
            '\''
        } else if c == open || c == '"' {
            if c == open { close } else { '"' }
        } else {
            continue;
        };
        if start < i {
            out.push(Segment::Code(&text[start..i]));
        }
        let mut end = text.len();
        while let Some((j, d)) = chars.next() {
            if d == terminator {
                // doubled terminator is an escape
                if let Some(&(_, next)) = chars.peek() {
                    if next == terminator {
                        chars.next();
                        continue;
                    }
                }
                end = j + d.len_utf8();
                break;
            }
        }
        out.push(Segment::Quoted(&text[i..end]));
        start = end;
    }
    if start < text.len() {
        out.push(Segment::Code(&text[start..]));
    }
    out
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace named parameters with positional placeholders.
///
/// Returns the statement and the values in placeholder order. Spread
/// parameters expand to one placeholder per list element, or `NULL` for an
/// empty list.
pub fn bind_named(
    sql: &str,
    parameters: &IndexMap<String, Value>,
    dialect: &Dialect,
) -> QueryResult<(String, Vec<Value>)> {
    let mut out = String::with_capacity(sql.len());
    let mut values: Vec<Value> = Vec::new();

    for segment in segments(sql, dialect) {
        let code = match segment {
            Segment::Quoted(text) => {
                out.push_str(text);
                continue;
            }
            Segment::Code(code) => code,
        };
        let chars: Vec<char> = code.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c != ':' {
                out.push(c);
                i += 1;
                continue;
            }
            // `::type` casts
            if chars.get(i + 1) == Some(&':') {
                out.push_str("::");
                i += 2;
                continue;
            }
            // a parameter must not continue an identifier (`a:b` is left alone)
            if i > 0 && is_ident_char(chars[i - 1]) {
                out.push(c);
                i += 1;
                continue;
            }
            let spread = chars[i + 1..].starts_with(&['.', '.', '.']);
            let name_start = if spread { i + 4 } else { i + 1 };
            if !chars.get(name_start).copied().is_some_and(is_ident_start) {
                out.push(c);
                i += 1;
                continue;
            }
            let mut name_end = name_start;
            while name_end < chars.len() && is_ident_char(chars[name_end]) {
                name_end += 1;
            }
            let name: String = chars[name_start..name_end].iter().collect();
            let value = parameters
                .get(&name)
                .ok_or_else(|| QueryError::missing_parameter(&name))?;

            match (spread, value) {
                (true, Value::List(items)) if items.is_empty() => out.push_str("NULL"),
                (true, Value::List(items)) => {
                    for (n, item) in items.iter().enumerate() {
                        if n > 0 {
                            out.push_str(", ");
                        }
                        values.push(item.clone());
                        out.push_str(&dialect.placeholder(values.len()));
                    }
                }
                _ => {
                    values.push(value.clone());
                    out.push_str(&dialect.placeholder(values.len()));
                }
            }
            i = name_end;
        }
    }

    Ok((out, values))
}
