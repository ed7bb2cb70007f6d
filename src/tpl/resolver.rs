use crate::Result;
use crate::error::TemplateError;
use crate::tpl::context::Context;
use crate::tpl::lexer::is_ident_char;
use crate::value::{Lookup, Value};
use rust_decimal::prelude::ToPrimitive;

/// An argument or variable expression: a literal or a dotted path.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(String),
}

/// Parse a single expression. Anything that is not a literal is a path.
pub fn parse_expr(input: &str) -> Expr {
    let s = input.trim();
    if let Some(text) = unquote(s) {
        return Expr::Literal(Value::Str(text));
    }
    match s {
        "null" | "none" => return Expr::Literal(Value::Null),
        "true" => return Expr::Literal(Value::Bool(true)),
        "false" => return Expr::Literal(Value::Bool(false)),
        _ => {}
    }
    if looks_numeric(s) {
        if let Ok(n) = s.parse::<i64>() {
            return Expr::Literal(Value::I64(n));
        }
        if let Ok(n) = s.parse::<u64>() {
            return Expr::Literal(Value::U64(n));
        }
        if let Ok(n) = s.parse::<f64>() {
            return Expr::Literal(Value::F64(n));
        }
    }
    Expr::Path(s.to_string())
}

// Keeps names like `inf` or `nan` out of float parsing.
fn looks_numeric(s: &str) -> bool {
    let digits = s.strip_prefix(['-', '+']).unwrap_or(s);
    digits.starts_with(|c: char| c.is_ascii_digit() || c == '.')
}

/// Strip matching quotes and process `\` escapes. `None` unless `s` is exactly
/// one quoted string.
pub fn unquote(s: &str) -> Option<String> {
    let quote = s.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let mut out = String::with_capacity(s.len());
    let mut chars = s[1..].char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, other)) => out.push(other),
                None => return None,
            },
            c if c == quote => {
                // The closing quote has to be the last char.
                return (i + 2 == s.len()).then_some(out);
            }
            c => out.push(c),
        }
    }
    None
}

/// `a`, `a.b`, `items.0`: non-empty segments of identifier chars.
pub fn is_path(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with(|c: char| c.is_ascii_digit())
        && s
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(is_ident_char))
}

pub fn is_literal_or_path(s: &str) -> bool {
    matches!(parse_expr(s), Expr::Literal(_)) || is_path(s)
}

/// Resolve an expression against a context. Never fails: a path that cannot
/// be followed resolves to `Value::Undefined`.
pub fn resolve(expr: &Expr, ctx: &Context) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Path(path) => resolve_path(path, ctx),
    }
}

fn resolve_path(path: &str, ctx: &Context) -> Value {
    // 1) Exact match, covers names that contain dots.
    if let Some(v) = ctx.get(path) {
        return v;
    }

    // 2) Dotted path: head from the context, then walk the rest.
    let Some((head, rest)) = path.split_once('.') else {
        return Value::Undefined;
    };
    let Some(mut current) = ctx.get(head) else {
        return Value::Undefined;
    };
    for segment in rest.split('.') {
        match lookup_segment(&current, segment) {
            Some(next) => current = next,
            None => return Value::Undefined,
        }
    }
    current
}

/// Key lookup, else attribute lookup, else index lookup.
pub fn lookup_segment(value: &Value, segment: &str) -> Option<Value> {
    value
        .get_key(segment)
        .or_else(|| value.get_attr(segment))
        .or_else(|| {
            segment
                .parse::<usize>()
                .ok()
                .and_then(|i| value.get_index(i))
        })
}

/// Coerce a resolved directive argument into an integer.
pub fn to_int(value: &Value, directive: &str) -> Result<i64> {
    let out_of_range = || {
        TemplateError::argument_type(directive, format!("{} is out of integer range", value))
    };
    match value {
        Value::I64(n) => Ok(*n),
        Value::U64(n) => i64::try_from(*n).map_err(|_| out_of_range()),
        Value::F64(n) if n.is_finite() && n.fract() == 0.0 => {
            if *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                Ok(*n as i64)
            } else {
                Err(out_of_range())
            }
        }
        Value::Decimal(d) if d.fract().is_zero() => d.to_i64().ok_or_else(out_of_range),
        Value::Str(s) => s.trim().parse::<i64>().map_err(|_| {
            TemplateError::argument_type(directive, format!("'{}' is not an integer", s))
        }),
        other => Err(TemplateError::argument_type(
            directive,
            format!("expected an integer, got {}", other.kind()),
        )),
    }
}
