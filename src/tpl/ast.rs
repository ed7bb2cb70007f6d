use crate::tpl::args::DirectiveCall;
use crate::tpl::lexer::Span;
use crate::tpl::registry::BlockDirective;
use crate::tpl::resolver::Expr;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum Node {
    Text(String),
    Variable {
        expr: Expr,
        span: Span,
    },
    /// `expr|f|g`; filters apply left to right.
    Filter {
        expr: Expr,
        filters: Vec<String>,
        span: Span,
    },
    Simple {
        call: DirectiveCall,
    },
    Inclusion {
        call: DirectiveCall,
        template: String,
    },
    Block {
        call: DirectiveCall,
        body: Vec<Node>,
        directive: Arc<dyn BlockDirective>,
    },
}

impl Node {
    /// Directive name for directive nodes.
    pub fn directive_name(&self) -> Option<&str> {
        match self {
            Node::Simple { call } | Node::Inclusion { call, .. } | Node::Block { call, .. } => {
                Some(&call.name)
            }
            Node::Filter { filters, .. } => filters.last().map(String::as_str),
            Node::Text(_) | Node::Variable { .. } => None,
        }
    }

    /// Owned children of a block node.
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Block { body, .. } => body,
            _ => &[],
        }
    }
}
