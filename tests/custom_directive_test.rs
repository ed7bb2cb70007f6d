use std::collections::HashMap;
use std::sync::Arc;
use utag::tpl::resolver::{Expr, resolve};
use utag::{
    BlockDirective, Context, DirectiveCall, Engine, EngineConfig, Lookup, Node, Object, Renderer,
    Result, TemplateError, ToValue, Value,
};

/// `{% wrap tag="em" %}...{% endwrap %}`: surrounds its body with an element.
#[derive(Debug)]
struct WrapDirective {
    tag: Expr,
}

impl WrapDirective {
    fn parse(call: &DirectiveCall) -> Result<Arc<dyn BlockDirective>> {
        if !call.args.is_empty() {
            return Err(TemplateError::directive(&call.name, "only takes tag="));
        }
        let tag = call
            .kwargs
            .iter()
            .find(|(k, _)| k == "tag")
            .map(|(_, e)| e.clone())
            .unwrap_or_else(|| Expr::Literal(Value::from("span")));
        Ok(Arc::new(WrapDirective { tag }))
    }
}

impl BlockDirective for WrapDirective {
    fn render(
        &self,
        body: &[Node],
        ctx: &mut Context<'_>,
        renderer: &Renderer<'_>,
    ) -> Result<String> {
        let tag = resolve(&self.tag, ctx);
        let inner = renderer.render(body, ctx)?;
        Ok(format!("<{tag}>{inner}</{tag}>"))
    }
}

#[derive(Debug)]
struct Account {
    owner: String,
    tags: Vec<String>,
}

impl Lookup for Account {
    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "owner" => Some(self.owner.to_value()),
            "tags" => Some(self.tags.to_value()),
            _ => None,
        }
    }
}

impl Object for Account {}

fn engine() -> Engine {
    let mut engine = Engine::new();
    engine
        .register_block("wrap", "endwrap", WrapDirective::parse)
        .unwrap();
    engine
}

#[test]
fn test_custom_block_with_named_argument() {
    let out = engine()
        .render_str(r#"{% wrap tag="em" %}hi{% endwrap %}"#, &())
        .unwrap();
    assert_eq!(out, "<em>hi</em>");
}

#[test]
fn test_mixed_nesting() {
    let src = "{% wrap %}{% repeat(2) %}{% wrap(tag='b') %}{% repeat(2) %}x{% endrepeat %}{% endwrap %}{% endrepeat %}{% endwrap %}";
    let out = engine().render_str(src, &()).unwrap();
    assert_eq!(out, "<span><b>xx</b><b>xx</b></span>");
}

#[test]
fn test_end_marker_of_other_block_is_rejected() {
    let err = engine()
        .render_str("{% wrap %}x{% endrepeat %}{% endwrap %}", &())
        .unwrap_err();
    assert!(matches!(err, TemplateError::DirectiveSyntax { ref directive, .. } if directive == "endrepeat"));
}

#[test]
fn test_directive_parse_errors_surface() {
    let err = engine()
        .render_str("{% wrap(1) %}x{% endwrap %}", &())
        .unwrap_err();
    assert!(matches!(err, TemplateError::Directive { .. }));
}

#[test]
fn test_object_attribute_and_index_lookup() {
    let account = Account {
        owner: "grace".to_string(),
        tags: vec!["admin".to_string(), "ops".to_string()],
    };
    let vars = HashMap::from([("account", Value::object(account))]);

    let out = engine()
        .render_str(
            "{{ account.owner|capitalize }}: {{ account.tags.1 }} ({{ account.tags|length }})",
            &vars,
        )
        .unwrap();
    assert_eq!(out, "Grace: ops (2)");
}

#[test]
fn test_block_nesting_limit() {
    let engine = Engine::with_config(EngineConfig::default().max_depth(3));
    let ok = "{% repeat(1) %}{% repeat(1) %}{% repeat(1) %}.{% endrepeat %}{% endrepeat %}{% endrepeat %}";
    assert_eq!(engine.render_str(ok, &()).unwrap(), ".");

    let deep = format!("{{% repeat(1) %}}{}{{% endrepeat %}}", ok);
    assert!(matches!(
        engine.render_str(&deep, &()),
        Err(TemplateError::RecursionLimit { limit: 3 })
    ));
}

#[test]
fn test_trim_blocks() {
    let engine = Engine::with_config(EngineConfig::default().trim_blocks(true));
    let src = "<ul>\n{% repeat(2) %}\n  <li>x</li>\n{% endrepeat %}\n</ul>";
    assert_eq!(
        engine.render_str(src, &()).unwrap(),
        "<ul>\n<li>x</li><li>x</li>\n</ul>"
    );
}
