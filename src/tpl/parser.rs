use crate::Result;
use crate::config::EngineConfig;
use crate::error::TemplateError;
use crate::tpl::args::{DirectiveCall, parse_variable};
use crate::tpl::ast::Node;
use crate::tpl::lexer::{Span, Token, TokenKind, TokenStream};
use crate::tpl::registry::{DirectiveKind, DirectiveRegistry, DirectiveSpec};

/// The block currently being captured.
struct OpenBlock<'s> {
    directive: &'s str,
    end_marker: &'s str,
    span: Span,
}

/// Turns a token stream into a node tree, consulting the directive registry.
///
/// Block directives recurse: a nested block of any kind is parsed by its own
/// call and consumes its own end marker, so only an end marker at the current
/// nesting depth closes the block being captured.
pub struct Parser<'r> {
    registry: &'r DirectiveRegistry,
    max_depth: usize,
    trim_blocks: bool,
}

impl<'r> Parser<'r> {
    pub fn new(registry: &'r DirectiveRegistry, config: &EngineConfig) -> Self {
        Self {
            registry,
            max_depth: config.max_depth,
            trim_blocks: config.trim_blocks,
        }
    }

    /// Parse the whole stream. Fails on the first error; there is no partial result.
    pub fn parse(&self, stream: &mut TokenStream) -> Result<Vec<Node>> {
        self.parse_nodes(stream, None, 0)
    }

    fn parse_nodes(
        &self,
        stream: &mut TokenStream,
        open: Option<&OpenBlock<'_>>,
        depth: usize,
    ) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();

        while let Some(token) = stream.next() {
            let span = token.span;
            match &token.kind {
                TokenKind::Text(text) => append_text(&mut nodes, text),
                TokenKind::Variable(content) => {
                    nodes.push(self.parse_variable(content, span)?);
                }
                TokenKind::Directive(content) => {
                    let name = token.directive_name().unwrap_or_default();

                    if let Some(block) = open
                        && name == block.end_marker
                    {
                        if content.trim() != block.end_marker {
                            return Err(TemplateError::syntax(
                                block.end_marker,
                                "end marker takes no arguments",
                                span,
                            ));
                        }
                        return Ok(nodes);
                    }

                    nodes.push(self.parse_directive(&token, content, stream, depth)?);
                }
            }
        }

        match open {
            Some(block) => Err(TemplateError::UnterminatedBlock {
                directive: block.directive.to_string(),
                end_marker: block.end_marker.to_string(),
                span: block.span,
            }),
            None => Ok(nodes),
        }
    }

    fn parse_variable(&self, content: &str, span: Span) -> Result<Node> {
        let (expr, filters) = parse_variable(content, span)?;
        if filters.is_empty() {
            return Ok(Node::Variable { expr, span });
        }
        for filter in &filters {
            match self.registry.lookup(filter).map(|s| &s.kind) {
                Some(DirectiveKind::Filter { .. }) => {}
                Some(other) => {
                    return Err(TemplateError::syntax(
                        filter,
                        format!("{} directive used as a filter", other.label()),
                        span,
                    ));
                }
                None => {
                    return Err(TemplateError::UnknownDirective {
                        name: filter.clone(),
                        span,
                    });
                }
            }
        }
        Ok(Node::Filter {
            expr,
            filters,
            span,
        })
    }

    fn parse_directive(
        &self,
        token: &Token,
        content: &str,
        stream: &mut TokenStream,
        depth: usize,
    ) -> Result<Node> {
        let span = token.span;
        let call = DirectiveCall::parse(content, span)?;

        let Some(spec) = self.registry.lookup(&call.name) else {
            if self.registry.is_end_marker(&call.name) {
                return Err(TemplateError::syntax(&call.name, "unexpected end marker", span));
            }
            return Err(TemplateError::UnknownDirective {
                name: call.name,
                span,
            });
        };

        match &spec.kind {
            DirectiveKind::Simple { signature, .. } => {
                signature.check(&call)?;
                Ok(Node::Simple { call })
            }
            DirectiveKind::Inclusion {
                template,
                signature,
                ..
            } => {
                signature.check(&call)?;
                Ok(Node::Inclusion {
                    call,
                    template: template.clone(),
                })
            }
            DirectiveKind::Filter { .. } => Err(TemplateError::syntax(
                &call.name,
                "filter used as a directive; apply it with '|' inside {{ }}",
                span,
            )),
            DirectiveKind::Block { .. } => self.parse_block(spec, call, stream, depth),
        }
    }

    fn parse_block(
        &self,
        spec: &DirectiveSpec,
        call: DirectiveCall,
        stream: &mut TokenStream,
        depth: usize,
    ) -> Result<Node> {
        let DirectiveKind::Block { end_marker, parse } = &spec.kind else {
            return Err(TemplateError::syntax(&spec.name, "not a block directive", call.span));
        };
        if depth >= self.max_depth {
            return Err(TemplateError::RecursionLimit {
                limit: self.max_depth,
            });
        }

        // The directive validates its own argument grammar first.
        let directive = parse(&call)?;

        let open = OpenBlock {
            directive: &spec.name,
            end_marker,
            span: call.span,
        };
        let mut body = self.parse_nodes(stream, Some(&open), depth + 1)?;
        if self.trim_blocks {
            trim_text_nodes(&mut body);
        }

        Ok(Node::Block {
            call,
            body,
            directive,
        })
    }
}

/// Append text, merging with the previous text node when possible.
fn append_text(nodes: &mut Vec<Node>, text: &str) {
    if let Some(Node::Text(last_text)) = nodes.last_mut() {
        last_text.push_str(text);
    } else {
        nodes.push(Node::Text(text.to_string()));
    }
}

/// Drop the newline-bearing whitespace a block body starts or ends with.
fn trim_text_nodes(nodes: &mut Vec<Node>) {
    if let Some(Node::Text(text)) = nodes.first_mut() {
        let trimmed = text.trim_start();
        let whitespace = &text[..text.len() - trimmed.len()];

        // Only trim if the whitespace contains a newline (block formatting).
        // If it's just spaces (inline formatting), preserve it.
        if whitespace.contains('\n') {
            if trimmed.is_empty() {
                nodes.remove(0);
            } else {
                *text = trimmed.to_string();
            }
        }
    }

    // After potential removal, check last (which might be the same node if len=1)
    if let Some(Node::Text(text)) = nodes.last_mut() {
        let trimmed = text.trim_end();
        let whitespace = &text[trimmed.len()..];

        if whitespace.contains('\n') {
            if trimmed.is_empty() {
                nodes.pop();
            } else {
                *text = trimmed.to_string();
            }
        }
    }
}

/// Main entry point: parse template source into a node list.
pub fn parse_template(
    source: &str,
    registry: &DirectiveRegistry,
    config: &EngineConfig,
) -> Result<Vec<Node>> {
    let mut stream = TokenStream::from_source(source)?;
    Parser::new(registry, config).parse(&mut stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpl::args::{Args, Signature};
    use crate::tpl::builtins;
    use crate::tpl::resolver::Expr;
    use crate::value::Value;

    fn registry() -> DirectiveRegistry {
        let mut registry = DirectiveRegistry::new();
        builtins::register_all(&mut registry).unwrap();
        registry
            .register_simple("greet", Signature::new(1).named("greeting", "Hello"), |a: &Args| {
                Ok(format!("{}, {}!", a.kwarg("greeting"), a.arg(0)))
            })
            .unwrap();
        registry
    }

    fn parse(source: &str) -> Result<Vec<Node>> {
        parse_template(source, &registry(), &EngineConfig::default())
    }

    /// Depth of the leftmost chain of nested blocks.
    fn block_depth(nodes: &[Node]) -> usize {
        nodes
            .iter()
            .find(|n| matches!(n, Node::Block { .. }))
            .map(|n| 1 + block_depth(n.children()))
            .unwrap_or(0)
    }

    #[test]
    fn test_parse_simple_text() {
        let nodes = parse("hello world").unwrap();
        assert_eq!(nodes.len(), 1);
        match &nodes[0] {
            Node::Text(t) => assert_eq!(t, "hello world"),
            _ => panic!("Expected Text"),
        }
    }

    #[test]
    fn test_parse_filter_chain_is_left_to_right() {
        let nodes = parse("{{ name|lower|upper }}").unwrap();
        match &nodes[0] {
            Node::Filter { expr, filters, .. } => {
                assert!(matches!(expr, Expr::Path(p) if p == "name"));
                assert_eq!(filters, &["lower", "upper"]);
            }
            other => panic!("Expected Filter, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_block_consumes_end_marker() {
        let nodes = parse("a{% repeat(2) %}<p>X</p>{% endrepeat %}b").unwrap();
        assert_eq!(nodes.len(), 3);
        match &nodes[1] {
            Node::Block { call, body, .. } => {
                assert_eq!(call.name, "repeat");
                assert_eq!(call.args, vec![Expr::Literal(Value::I64(2))]);
                assert_eq!(body.len(), 1);
                assert!(matches!(&body[0], Node::Text(t) if t == "<p>X</p>"));
            }
            other => panic!("Expected Block, got {:?}", other),
        }
        assert!(matches!(&nodes[2], Node::Text(t) if t == "b"));
    }

    #[test]
    fn test_nested_same_name_blocks() {
        let src = "{% repeat(1) %}a{% repeat(1) %}b{% repeat(1) %}c{% endrepeat %}d{% endrepeat %}e{% endrepeat %}f";
        let nodes = parse(src).unwrap();
        assert_eq!(block_depth(&nodes), 3);
        assert_eq!(nodes.len(), 2);
        assert!(matches!(&nodes[1], Node::Text(t) if t == "f"));

        let outer = nodes[0].children();
        assert_eq!(outer.len(), 3);
        assert!(matches!(&outer[2], Node::Text(t) if t == "e"));
    }

    #[test]
    fn test_unterminated_block() {
        let err = parse("x\n{% repeat(3) %}{% repeat(2) %}{% endrepeat %}").unwrap_err();
        match err {
            TemplateError::UnterminatedBlock {
                directive,
                end_marker,
                span,
            } => {
                assert_eq!(directive, "repeat");
                assert_eq!(end_marker, "endrepeat");
                assert_eq!(span.line, 2);
            }
            other => panic!("Expected UnterminatedBlock, got {:?}", other),
        }
    }

    #[test]
    fn test_stray_end_marker() {
        let err = parse("{% endrepeat %}").unwrap_err();
        assert!(matches!(err, TemplateError::DirectiveSyntax { ref directive, .. } if directive == "endrepeat"));
    }

    #[test]
    fn test_unknown_directive() {
        let err = parse("ok {% frobnicate(1) %}").unwrap_err();
        assert!(matches!(err, TemplateError::UnknownDirective { ref name, .. } if name == "frobnicate"));

        let err = parse("{{ x|nope }}").unwrap_err();
        assert!(matches!(err, TemplateError::UnknownDirective { ref name, .. } if name == "nope"));
    }

    #[test]
    fn test_repeat_argument_count() {
        for src in [
            "{% repeat %}x{% endrepeat %}",
            "{% repeat(1, 2) %}x{% endrepeat %}",
        ] {
            let err = parse(src).unwrap_err();
            assert!(err.to_string().contains("wrong argument count"), "{}", err);
        }
    }

    #[test]
    fn test_simple_signature_checked_at_parse_time() {
        assert!(parse(r#"{% greet("A", greeting="Hi") %}"#).is_ok());
        assert!(matches!(
            parse(r#"{% greet("A", tone="Hi") %}"#),
            Err(TemplateError::DirectiveSyntax { .. })
        ));
    }

    #[test]
    fn test_kind_misuse() {
        assert!(matches!(
            parse("{% upper %}"),
            Err(TemplateError::DirectiveSyntax { .. })
        ));
        assert!(matches!(
            parse("{{ x|greet }}"),
            Err(TemplateError::DirectiveSyntax { .. })
        ));
    }

    #[test]
    fn test_block_depth_limit() {
        let config = EngineConfig::default().max_depth(2);
        let src = "{% repeat(1) %}{% repeat(1) %}{% repeat(1) %}{% endrepeat %}{% endrepeat %}{% endrepeat %}";
        let err = parse_template(src, &registry(), &config).unwrap_err();
        assert!(matches!(err, TemplateError::RecursionLimit { limit: 2 }));
    }

    #[test]
    fn test_trim_blocks() {
        let config = EngineConfig::default().trim_blocks(true);
        let src = "{% repeat(1) %}\n  <li>x</li>\n{% endrepeat %}";
        let nodes = parse_template(src, &registry(), &config).unwrap();
        assert!(matches!(&nodes[0].children()[0], Node::Text(t) if t == "<li>x</li>"));

        let nodes = parse(src).unwrap();
        assert!(matches!(&nodes[0].children()[0], Node::Text(t) if t == "\n  <li>x</li>\n"));
    }
}
