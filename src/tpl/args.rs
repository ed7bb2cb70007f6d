//! Directive call grammar and argument binding.
//!
//! A directive tag holds either a call, `name(arg, key=arg)`, or a bare
//! whitespace form, `name arg key=arg`. A variable tag holds an expression
//! followed by `|filter` segments.

use crate::Result;
use crate::error::TemplateError;
use crate::tpl::context::Context;
use crate::tpl::lexer::{Span, VAR_OPEN, is_ident_char};
use crate::tpl::resolver::{Expr, is_literal_or_path, parse_expr, resolve};
use crate::value::{FromValue, Value};
use std::collections::HashMap;

/// A parsed directive invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectiveCall {
    pub name: String,
    pub args: Vec<Expr>,
    pub kwargs: Vec<(String, Expr)>,
    pub span: Span,
}

impl DirectiveCall {
    pub fn parse(content: &str, span: Span) -> Result<Self> {
        let content = content.trim();
        let name_end = content
            .find(|c: char| !is_ident_char(c))
            .unwrap_or(content.len());
        let name = &content[..name_end];
        if name.is_empty() {
            return Err(TemplateError::syntax(content, "missing directive name", span));
        }

        let rest = content[name_end..].trim();
        let items = if rest.is_empty() {
            Vec::new()
        } else if let Some(inner) = rest.strip_prefix('(') {
            let inner = inner
                .strip_suffix(')')
                .ok_or_else(|| TemplateError::syntax(name, "missing ')'", span))?;
            if inner.trim().is_empty() {
                Vec::new()
            } else {
                let mut items = split_top_level(inner, |c| c == ',');
                // Allow a single trailing comma.
                if items.len() > 1 && items.last().is_some_and(|s| s.trim().is_empty()) {
                    items.pop();
                }
                items
            }
        } else {
            split_top_level(rest, char::is_whitespace)
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect()
        };

        let mut call = DirectiveCall {
            name: name.to_string(),
            args: Vec::new(),
            kwargs: Vec::new(),
            span,
        };
        for item in items {
            let item = item.trim();
            if item.is_empty() {
                return Err(TemplateError::syntax(name, "empty argument", span));
            }
            if let Some((key, value)) = split_kwarg(item) {
                if call.kwargs.iter().any(|(k, _)| k == key) {
                    return Err(TemplateError::syntax(
                        name,
                        format!("duplicate named argument '{}'", key),
                        span,
                    ));
                }
                call.kwargs.push((key.to_string(), parse_arg(name, value, span)?));
            } else {
                if !call.kwargs.is_empty() {
                    return Err(TemplateError::syntax(
                        name,
                        "positional argument after named argument",
                        span,
                    ));
                }
                call.args.push(parse_arg(name, item, span)?);
            }
        }
        Ok(call)
    }

    /// Enforce an exact positional count and no named arguments.
    pub fn expect_exactly(&self, count: usize) -> Result<()> {
        if self.args.len() != count || !self.kwargs.is_empty() {
            return Err(TemplateError::syntax(
                &self.name,
                format!(
                    "wrong argument count: expected {}, got {}",
                    count,
                    self.args.len() + self.kwargs.len()
                ),
                self.span,
            ));
        }
        Ok(())
    }
}

/// Parse the content of a `{{ ... }}` tag into an expression and filter names.
pub fn parse_variable(content: &str, span: Span) -> Result<(Expr, Vec<String>)> {
    let mut parts = split_top_level(content, |c| c == '|').into_iter();
    let head = parts.next().unwrap_or_default();
    let expr = parse_arg(VAR_OPEN, head.trim(), span)?;

    let mut filters = Vec::new();
    for part in parts {
        let name = part.trim();
        if name.is_empty() || !name.chars().all(is_ident_char) {
            return Err(TemplateError::syntax(
                VAR_OPEN,
                format!("invalid filter name '{}'", name),
                span,
            ));
        }
        filters.push(name.to_string());
    }
    Ok((expr, filters))
}

fn parse_arg(directive: &str, item: &str, span: Span) -> Result<Expr> {
    if !is_literal_or_path(item) {
        return Err(TemplateError::syntax(
            directive,
            format!("invalid argument '{}'", item),
            span,
        ));
    }
    Ok(parse_expr(item))
}

/// `key=value` with `key` an identifier; `None` for anything else.
fn split_kwarg(item: &str) -> Option<(&str, &str)> {
    let (key, value) = item.split_once('=')?;
    let key = key.trim();
    if key.is_empty()
        || !key.chars().all(is_ident_char)
        || key.starts_with(|c: char| c.is_ascii_digit())
        || value.starts_with('=')
    {
        return None;
    }
    Some((key, value.trim()))
}

/// Split on `is_sep`, ignoring separators inside quoted strings.
fn split_top_level<F>(s: &str, is_sep: F) -> Vec<&str>
where
    F: Fn(char) -> bool,
{
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None if c == '"' || c == '\'' => quote = Some(c),
            None if is_sep(c) => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            None => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Positional arity of a directive signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

/// Declared parameters of a simple or inclusion directive.
#[derive(Debug, Clone)]
pub struct Signature {
    positional: Arity,
    named: Vec<(String, Value)>,
}

impl Default for Signature {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Signature {
    /// Exactly `count` positional arguments.
    pub fn new(count: usize) -> Self {
        Self {
            positional: Arity::Exact(count),
            named: Vec::new(),
        }
    }

    /// At least `min` positional arguments.
    pub fn variadic(min: usize) -> Self {
        Self {
            positional: Arity::AtLeast(min),
            named: Vec::new(),
        }
    }

    /// Declare a named argument and the default used when the caller omits it.
    pub fn named(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        let name = name.into();
        let default = default.into();
        match self.named.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = default,
            None => self.named.push((name, default)),
        }
        self
    }

    pub fn arity(&self) -> Arity {
        self.positional
    }

    /// Parse-time shape check of a call against this signature.
    pub fn check(&self, call: &DirectiveCall) -> Result<()> {
        let got = call.args.len();
        let ok = match self.positional {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(n) => got >= n,
        };
        if !ok {
            let expected = match self.positional {
                Arity::Exact(n) => n.to_string(),
                Arity::AtLeast(n) => format!("at least {}", n),
            };
            return Err(TemplateError::syntax(
                &call.name,
                format!("wrong argument count: expected {}, got {}", expected, got),
                call.span,
            ));
        }
        for (key, _) in &call.kwargs {
            if !self.named.iter().any(|(n, _)| n == key) {
                return Err(TemplateError::syntax(
                    &call.name,
                    format!("unexpected named argument '{}'", key),
                    call.span,
                ));
            }
        }
        Ok(())
    }

    /// Resolve a call's arguments, filling omitted named arguments with defaults.
    pub fn bind(&self, call: &DirectiveCall, ctx: &Context) -> Args {
        let positional = call.args.iter().map(|e| resolve(e, ctx)).collect();
        let mut named = HashMap::with_capacity(self.named.len());
        for (name, default) in &self.named {
            let value = call
                .kwargs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, e)| resolve(e, ctx))
                .unwrap_or_else(|| default.clone());
            named.insert(name.clone(), value);
        }
        Args {
            directive: call.name.clone(),
            positional,
            named,
        }
    }
}

/// Resolved arguments handed to a directive handler.
#[derive(Debug, Clone)]
pub struct Args {
    directive: String,
    positional: Vec<Value>,
    named: HashMap<String, Value>,
}

impl Args {
    pub fn new(
        directive: impl Into<String>,
        positional: Vec<Value>,
        named: HashMap<String, Value>,
    ) -> Self {
        Self {
            directive: directive.into(),
            positional,
            named,
        }
    }

    pub fn directive(&self) -> &str {
        &self.directive
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn named(&self) -> &HashMap<String, Value> {
        &self.named
    }

    /// Positional argument `index`, `Undefined` when absent.
    pub fn arg(&self, index: usize) -> &Value {
        self.positional.get(index).unwrap_or(&Value::Undefined)
    }

    /// Named argument, `Undefined` when undeclared.
    pub fn kwarg(&self, name: &str) -> &Value {
        self.named.get(name).unwrap_or(&Value::Undefined)
    }

    /// Positional argument converted to `T`; conversion failures are argument type errors.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
        T::from_value(self.arg(index).clone()).map_err(|e| self.type_error(e))
    }

    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        T::from_value(self.kwarg(name).clone()).map_err(|e| self.type_error(e))
    }

    fn type_error(&self, e: TemplateError) -> TemplateError {
        match e {
            TemplateError::TypeMismatch(msg) => TemplateError::argument_type(&self.directive, msg),
            other => other,
        }
    }
}
