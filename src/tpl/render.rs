use crate::Result;
use crate::error::TemplateError;
use crate::tpl::args::DirectiveCall;
use crate::tpl::ast::Node;
use crate::tpl::context::Context;
use crate::tpl::engine::Engine;
use crate::tpl::registry::{DirectiveKind, DirectiveSpec};
use crate::tpl::resolver::resolve;
use crate::value::Value;
use std::fmt::Write;

/// Walks a node tree against a context and produces text.
///
/// Holds the engine so directive handlers, filters and sub-templates are
/// looked up from the same registry the tree was parsed with.
#[derive(Clone, Copy)]
pub struct Renderer<'e> {
    engine: &'e Engine,
}

impl<'e> Renderer<'e> {
    pub fn new(engine: &'e Engine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &'e Engine {
        self.engine
    }

    pub fn render(&self, nodes: &[Node], ctx: &mut Context<'_>) -> Result<String> {
        let mut out = String::new();
        self.render_into(nodes, ctx, &mut out)?;
        Ok(out)
    }

    pub fn render_into(&self, nodes: &[Node], ctx: &mut Context<'_>, out: &mut String) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Variable { .. } | Node::Filter { .. } => {
                    let value = self.eval(node, ctx)?;
                    // Writing into a String cannot fail.
                    let _ = write!(out, "{}", value);
                }
                Node::Simple { call } => {
                    let DirectiveKind::Simple { signature, handler } = &self.spec(call)?.kind else {
                        return Err(self.kind_changed(call));
                    };
                    let args = signature.bind(call, ctx);
                    out.push_str(&handler(&args)?);
                }
                Node::Inclusion { call, template } => {
                    let DirectiveKind::Inclusion {
                        signature, handler, ..
                    } = &self.spec(call)?.kind
                    else {
                        return Err(self.kind_changed(call));
                    };
                    let args = signature.bind(call, ctx);
                    let vars = handler(&args)?;
                    let nodes = self.engine.template(template)?;

                    ctx.descend(self.engine.config().max_depth)?;
                    ctx.push_scope(vars);
                    let result = self.render_into(&nodes, ctx, out);
                    ctx.pop_scope();
                    ctx.ascend();
                    result?;
                }
                Node::Block {
                    body, directive, ..
                } => {
                    ctx.descend(self.engine.config().max_depth)?;
                    let result = directive.render(body, ctx, self);
                    ctx.ascend();
                    out.push_str(&result?);
                }
            }
        }
        Ok(())
    }

    /// Evaluate an expression node to a value.
    pub fn eval(&self, node: &Node, ctx: &Context<'_>) -> Result<Value> {
        match node {
            Node::Variable { expr, .. } => Ok(resolve(expr, ctx)),
            Node::Filter {
                expr,
                filters,
                span,
            } => {
                let mut value = resolve(expr, ctx);
                for filter in filters {
                    value = match self.engine.registry().lookup(filter).map(|s| &s.kind) {
                        Some(DirectiveKind::Filter { handler }) => handler(&value)?,
                        _ => {
                            return Err(TemplateError::UnknownDirective {
                                name: filter.clone(),
                                span: *span,
                            });
                        }
                    };
                }
                Ok(value)
            }
            other => Err(TemplateError::directive(
                other.directive_name().unwrap_or_default(),
                "not an expression",
            )),
        }
    }

    fn spec(&self, call: &DirectiveCall) -> Result<&'e DirectiveSpec> {
        self.engine
            .registry()
            .lookup(&call.name)
            .ok_or_else(|| TemplateError::UnknownDirective {
                name: call.name.clone(),
                span: call.span,
            })
    }

    fn kind_changed(&self, call: &DirectiveCall) -> TemplateError {
        TemplateError::directive(&call.name, "directive was re-registered with a different kind")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpl::args::{Args, Signature};
    use crate::value::ToValue;
    use std::collections::HashMap;

    fn engine() -> Engine {
        let mut engine = Engine::new();
        engine
            .register_simple("greet", Signature::new(1).named("greeting", "Hello"), |a: &Args| {
                Ok(format!("{}, {}!", a.kwarg("greeting"), a.arg(0)))
            })
            .unwrap();
        engine
    }

    fn render(engine: &Engine, source: &str, vars: &HashMap<&str, Value>) -> Result<String> {
        let value = vars.to_value();
        let mut ctx = Context::new(&value);
        let template = engine.parse(source)?;
        Renderer::new(engine).render(template.nodes(), &mut ctx)
    }

    #[test]
    fn test_variables_and_filters() {
        let engine = engine();
        let mut vars = HashMap::new();
        vars.insert("name", Value::from("ada lovelace"));

        assert_eq!(
            render(&engine, "Hi {{ name|title }}{{ missing }}!", &vars).unwrap(),
            "Hi Ada Lovelace!"
        );
        assert_eq!(
            render(&engine, "{{ name|upper|lower|length }}", &vars).unwrap(),
            "12"
        );
    }

    #[test]
    fn test_long_filter_chain() {
        let engine = engine();
        let source = format!("{{{{ 'x'{} }}}}", "|upper".repeat(10_000));
        assert_eq!(render(&engine, &source, &HashMap::new()).unwrap(), "X");
    }

    #[test]
    fn test_simple_with_path_argument() {
        let engine = engine();
        let mut vars = HashMap::new();
        vars.insert("who", Value::from("Bob"));

        assert_eq!(
            render(&engine, r#"{% greet(who, greeting="Hey") %}"#, &vars).unwrap(),
            "Hey, Bob!"
        );
    }

    #[test]
    fn test_filter_removed_after_parse() {
        let mut engine = engine();
        let template = engine.parse("{{ 'x'|upper }}").unwrap();
        engine.registry_mut().remove("upper");

        let root = Value::Null;
        let mut ctx = Context::new(&root);
        let err = Renderer::new(&engine)
            .render(template.nodes(), &mut ctx)
            .unwrap_err();
        assert!(matches!(err, TemplateError::UnknownDirective { ref name, .. } if name == "upper"));
    }

    #[test]
    fn test_handler_error_propagates() {
        let mut engine = engine();
        engine
            .register_simple("fail", Signature::new(0), |a: &Args| {
                Err(TemplateError::directive(a.directive(), "boom"))
            })
            .unwrap();
        let err = render(&engine, "a{% fail %}b", &HashMap::new()).unwrap_err();
        assert!(matches!(err, TemplateError::Directive { ref message, .. } if message == "boom"));
    }
}
