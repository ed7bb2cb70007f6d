use crate::Result;
use crate::error::TemplateError;
use crate::tpl::args::{Args, DirectiveCall, Signature};
use crate::tpl::ast::Node;
use crate::tpl::context::Context;
use crate::tpl::render::Renderer;
use crate::value::Value;
use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type SimpleFn = Arc<dyn Fn(&Args) -> Result<String> + Send + Sync>;
pub type FilterFn = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;
pub type InclusionFn = Arc<dyn Fn(&Args) -> Result<HashMap<String, Value>> + Send + Sync>;
pub type BlockParseFn = Arc<dyn Fn(&DirectiveCall) -> Result<Arc<dyn BlockDirective>> + Send + Sync>;

/// Render logic of a parsed block directive.
///
/// Produced by the directive's parse function from the call arguments; owned
/// by the block node and shared by every render of it.
pub trait BlockDirective: fmt::Debug + Send + Sync {
    /// Render the block. `body` is the captured node list; call
    /// `renderer.render(body, ctx)` to render it (any number of times).
    fn render(&self, body: &[Node], ctx: &mut Context<'_>, renderer: &Renderer<'_>)
    -> Result<String>;
}

#[derive(Clone)]
pub enum DirectiveKind {
    Simple {
        signature: Signature,
        handler: SimpleFn,
    },
    Filter {
        handler: FilterFn,
    },
    Inclusion {
        template: String,
        signature: Signature,
        handler: InclusionFn,
    },
    Block {
        end_marker: String,
        parse: BlockParseFn,
    },
}

impl DirectiveKind {
    pub fn label(&self) -> &'static str {
        match self {
            DirectiveKind::Simple { .. } => "simple",
            DirectiveKind::Filter { .. } => "filter",
            DirectiveKind::Inclusion { .. } => "inclusion",
            DirectiveKind::Block { .. } => "block",
        }
    }
}

#[derive(Clone)]
pub struct DirectiveSpec {
    pub name: String,
    pub kind: DirectiveKind,
}

impl fmt::Debug for DirectiveSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("DirectiveSpec");
        s.field("name", &self.name).field("kind", &self.kind.label());
        match &self.kind {
            DirectiveKind::Inclusion { template, .. } => s.field("template", template),
            DirectiveKind::Block { end_marker, .. } => s.field("end_marker", end_marker),
            _ => &mut s,
        };
        s.finish()
    }
}

/// Name → directive table owned by an engine.
#[derive(Clone, Default)]
pub struct DirectiveRegistry {
    directives: HashMap<String, DirectiveSpec>,
    /// Reject redefinitions instead of overwriting.
    strict: bool,
}

impl DirectiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strict() -> Self {
        Self {
            directives: HashMap::new(),
            strict: true,
        }
    }

    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Registers a directive.
    ///
    /// # Errors
    /// `DuplicateDirective` if the name is taken and the registry is strict.
    pub fn register(&mut self, spec: DirectiveSpec) -> Result<()> {
        if self.directives.contains_key(&spec.name) {
            if self.strict {
                return Err(TemplateError::DuplicateDirective(spec.name));
            }
            debug!("Directive '{}' redefined as {}", spec.name, spec.kind.label());
        }
        self.directives.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn register_simple<F>(
        &mut self,
        name: impl Into<String>,
        signature: Signature,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(&Args) -> Result<String> + Send + Sync + 'static,
    {
        self.register(DirectiveSpec {
            name: name.into(),
            kind: DirectiveKind::Simple {
                signature,
                handler: Arc::new(handler),
            },
        })
    }

    pub fn register_filter<F>(&mut self, name: impl Into<String>, handler: F) -> Result<()>
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(DirectiveSpec {
            name: name.into(),
            kind: DirectiveKind::Filter {
                handler: Arc::new(handler),
            },
        })
    }

    /// Registers an inclusion directive rendering `template` with the map its
    /// handler returns as sub-context.
    pub fn register_inclusion<F>(
        &mut self,
        name: impl Into<String>,
        template: impl Into<String>,
        signature: Signature,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(&Args) -> Result<HashMap<String, Value>> + Send + Sync + 'static,
    {
        self.register(DirectiveSpec {
            name: name.into(),
            kind: DirectiveKind::Inclusion {
                template: template.into(),
                signature,
                handler: Arc::new(handler),
            },
        })
    }

    /// Registers a block directive closed by `{% end_marker %}`.
    pub fn register_block<F>(
        &mut self,
        name: impl Into<String>,
        end_marker: impl Into<String>,
        parse: F,
    ) -> Result<()>
    where
        F: Fn(&DirectiveCall) -> Result<Arc<dyn BlockDirective>> + Send + Sync + 'static,
    {
        self.register(DirectiveSpec {
            name: name.into(),
            kind: DirectiveKind::Block {
                end_marker: end_marker.into(),
                parse: Arc::new(parse),
            },
        })
    }

    pub fn lookup(&self, name: &str) -> Option<&DirectiveSpec> {
        self.directives.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.directives.contains_key(name)
    }

    /// Whether some registered block closes with `name`.
    pub fn is_end_marker(&self, name: &str) -> bool {
        self.directives.values().any(|spec| {
            matches!(&spec.kind, DirectiveKind::Block { end_marker, .. } if end_marker == name)
        })
    }

    pub fn remove(&mut self, name: &str) -> Option<DirectiveSpec> {
        self.directives.remove(name)
    }

    pub fn clear(&mut self) {
        self.directives.clear();
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.directives.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.directives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }
}

impl fmt::Debug for DirectiveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectiveRegistry")
            .field("directives", &self.names())
            .field("strict", &self.strict)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shout(args: &Args) -> Result<String> {
        Ok(args.arg(0).to_string().to_uppercase())
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = DirectiveRegistry::new();
        registry
            .register_simple("shout", Signature::new(1), shout)
            .unwrap();
        registry
            .register_filter("same", |v: &Value| Ok(v.clone()))
            .unwrap();

        let spec = registry.lookup("shout").unwrap();
        assert_eq!(spec.kind.label(), "simple");
        assert_eq!(registry.lookup("same").unwrap().kind.label(), "filter");
        assert!(registry.lookup("whisper").is_none());
        assert_eq!(registry.names(), vec!["same", "shout"]);
    }

    #[test]
    fn test_redefinition_overwrites_by_default() {
        let mut registry = DirectiveRegistry::new();
        registry
            .register_simple("x", Signature::new(0), |_: &Args| Ok("a".to_string()))
            .unwrap();
        registry
            .register_filter("x", |v: &Value| Ok(v.clone()))
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("x").unwrap().kind.label(), "filter");
    }

    #[test]
    fn test_strict_mode_rejects_duplicates() {
        let mut registry = DirectiveRegistry::strict();
        registry
            .register_filter("x", |v: &Value| Ok(v.clone()))
            .unwrap();
        let err = registry
            .register_filter("x", |v: &Value| Ok(v.clone()))
            .unwrap_err();
        assert!(matches!(err, TemplateError::DuplicateDirective(name) if name == "x"));
    }

    #[test]
    fn test_end_markers() {
        let mut registry = DirectiveRegistry::new();
        crate::tpl::builtins::register_repeat(&mut registry).unwrap();
        assert!(registry.is_end_marker("endrepeat"));
        assert!(!registry.is_end_marker("repeat"));
        assert!(registry.remove("repeat").is_some());
        assert!(!registry.is_end_marker("endrepeat"));
    }
}
