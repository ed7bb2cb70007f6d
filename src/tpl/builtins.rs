//! Directives every engine starts with: the `repeat` block, the
//! `capitalize_words` simple directive and a set of string filters.

use crate::Result;
use crate::error::TemplateError;
use crate::tpl::args::{Args, DirectiveCall, Signature};
use crate::tpl::ast::Node;
use crate::tpl::context::Context;
use crate::tpl::registry::{BlockDirective, DirectiveRegistry};
use crate::tpl::render::Renderer;
use crate::tpl::resolver::{Expr, resolve, to_int};
use crate::value::Value;
use std::sync::Arc;

pub const REPEAT: &str = "repeat";
pub const END_REPEAT: &str = "endrepeat";

/// `{% repeat(n) %}body{% endrepeat %}`: renders `body` `n` times against the
/// same context. No loop variable is bound.
///
/// Fails with [`TemplateError::OutputLimit`] once the result would exceed
/// [`EngineConfig::max_output`](crate::config::EngineConfig::max_output).
#[derive(Debug)]
pub struct RepeatDirective {
    count: Expr,
}

impl RepeatDirective {
    pub fn parse(call: &DirectiveCall) -> Result<Arc<dyn BlockDirective>> {
        call.expect_exactly(1)?;
        Ok(Arc::new(RepeatDirective {
            count: call.args[0].clone(),
        }))
    }
}

impl BlockDirective for RepeatDirective {
    fn render(
        &self,
        body: &[Node],
        ctx: &mut Context<'_>,
        renderer: &Renderer<'_>,
    ) -> Result<String> {
        let count = to_int(&resolve(&self.count, ctx), REPEAT)?;
        if count <= 0 {
            return Ok(String::new());
        }
        let limit = renderer.engine().config().max_output;
        let over_limit = || TemplateError::OutputLimit {
            directive: REPEAT.to_string(),
            limit,
        };

        // Rendering is side-effect free, so an empty pass stays empty.
        let once = renderer.render(body, ctx)?;
        if once.is_empty() {
            return Ok(once);
        }
        let expected = usize::try_from(count)
            .unwrap_or(usize::MAX)
            .saturating_mul(once.len());
        if expected > limit {
            return Err(over_limit());
        }

        let mut out = String::with_capacity(expected);
        out.push_str(&once);
        for _ in 1..count {
            renderer.render_into(body, ctx, &mut out)?;
            if out.len() > limit {
                return Err(over_limit());
            }
        }
        Ok(out)
    }
}

pub fn register_repeat(registry: &mut DirectiveRegistry) -> Result<()> {
    registry.register_block(REPEAT, END_REPEAT, RepeatDirective::parse)
}

fn capitalize_words(args: &Args) -> Result<String> {
    Ok(title_case(&args.arg(0).to_string()))
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphanumeric() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn map_text(value: &Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::Str(s) => Value::Str(f(s)),
        other => Value::Str(f(&other.to_string())),
    }
}

fn length(value: &Value) -> Value {
    let len = match value {
        Value::Undefined | Value::Null => 0,
        Value::Str(s) => s.chars().count(),
        Value::List(l) => l.len(),
        Value::Map(m) => m.len(),
        other => other.to_string().chars().count(),
    };
    Value::U64(len as u64)
}

fn reverse(value: &Value) -> Value {
    match value {
        Value::List(l) => Value::List(l.iter().rev().cloned().collect()),
        other => map_text(other, |s| s.chars().rev().collect()),
    }
}

pub fn register_filters(registry: &mut DirectiveRegistry) -> Result<()> {
    registry.register_filter("upper", |v: &Value| Ok(map_text(v, str::to_uppercase)))?;
    registry.register_filter("lower", |v: &Value| Ok(map_text(v, str::to_lowercase)))?;
    registry.register_filter("trim", |v: &Value| Ok(map_text(v, |s| s.trim().to_string())))?;
    registry.register_filter("title", |v: &Value| Ok(map_text(v, title_case)))?;
    registry.register_filter("capitalize", |v: &Value| Ok(map_text(v, capitalize)))?;
    registry.register_filter("length", |v: &Value| Ok(length(v)))?;
    registry.register_filter("reverse", |v: &Value| Ok(reverse(v)))?;
    Ok(())
}

/// Registers every built-in directive.
pub fn register_all(registry: &mut DirectiveRegistry) -> Result<()> {
    register_repeat(registry)?;
    registry.register_simple("capitalize_words", Signature::new(1), capitalize_words)?;
    register_filters(registry)
}
