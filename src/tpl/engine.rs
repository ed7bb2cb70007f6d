use crate::Result;
use crate::config::EngineConfig;
use crate::error::TemplateError;
use crate::template_loader::{MemorySource, TemplateSource};
use crate::tpl::args::{Args, DirectiveCall, Signature};
use crate::tpl::ast::Node;
use crate::tpl::builtins;
use crate::tpl::context::Context;
use crate::tpl::parser::parse_template;
use crate::tpl::registry::{BlockDirective, DirectiveRegistry};
use crate::tpl::render::Renderer;
use crate::value::{ToValue, Value};
use dashmap::DashMap;
use log::{debug, trace};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
struct CachedTemplate {
    nodes: Arc<Vec<Node>>,
    content_hash: u64,
}

/// A template engine instance: directive registry, template store and parse cache.
///
/// Registration needs `&mut Engine`; once shared, an engine is read-only and
/// renders may run concurrently.
pub struct Engine {
    registry: DirectiveRegistry,
    templates: MemorySource,
    source: Option<Arc<dyn TemplateSource>>,
    cache: DashMap<String, CachedTemplate>,
    config: EngineConfig,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine with the built-in directives and default config.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let mut registry = DirectiveRegistry::new();
        // Registration into a non-strict registry always succeeds.
        let _ = builtins::register_all(&mut registry);
        registry.set_strict(config.strict);
        Self::with_registry(registry, config)
    }

    /// An engine with no directives registered.
    pub fn bare(config: EngineConfig) -> Self {
        let mut registry = DirectiveRegistry::new();
        registry.set_strict(config.strict);
        Self::with_registry(registry, config)
    }

    fn with_registry(registry: DirectiveRegistry, config: EngineConfig) -> Self {
        Self {
            registry,
            templates: MemorySource::new(),
            source: None,
            cache: DashMap::new(),
            config,
        }
    }

    /// Fallback provider for templates not added directly to the engine.
    pub fn with_source<S: TemplateSource + 'static>(mut self, source: Arc<S>) -> Self {
        self.source = Some(source);
        self.cache.clear();
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &DirectiveRegistry {
        &self.registry
    }

    /// Mutable registry access. Cached parses are dropped, since they were
    /// built against the old directive set.
    pub fn registry_mut(&mut self) -> &mut DirectiveRegistry {
        self.cache.clear();
        &mut self.registry
    }

    pub fn register_simple<F>(&mut self, name: &str, signature: Signature, handler: F) -> Result<()>
    where
        F: Fn(&Args) -> Result<String> + Send + Sync + 'static,
    {
        self.registry_mut().register_simple(name, signature, handler)
    }

    pub fn register_filter<F>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.registry_mut().register_filter(name, handler)
    }

    pub fn register_inclusion<F>(
        &mut self,
        name: &str,
        template: &str,
        signature: Signature,
        handler: F,
    ) -> Result<()>
    where
        F: Fn(&Args) -> Result<HashMap<String, Value>> + Send + Sync + 'static,
    {
        self.registry_mut()
            .register_inclusion(name, template, signature, handler)
    }

    pub fn register_block<F>(&mut self, name: &str, end_marker: &str, parse: F) -> Result<()>
    where
        F: Fn(&DirectiveCall) -> Result<Arc<dyn BlockDirective>> + Send + Sync + 'static,
    {
        self.registry_mut().register_block(name, end_marker, parse)
    }

    /// Store a named template on the engine itself.
    pub fn add_template(&self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.add(name, source);
    }

    /// Load XML template libraries matching `pattern` into the engine's store.
    pub fn load_templates(&self, pattern: &str) -> Result<()> {
        self.templates.load(pattern)
    }

    pub fn load_template_assets(&self, assets: Vec<(&str, &str)>) -> Result<()> {
        self.templates.load_assets(assets)
    }

    pub fn remove_template(&self, name: &str) {
        self.templates.remove(name);
        self.cache.remove(name);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Parse template source. The result is not cached.
    pub fn parse(&self, source: &str) -> Result<Template> {
        let nodes = parse_template(source, &self.registry, &self.config)?;
        Ok(Template {
            nodes: Arc::new(nodes),
        })
    }

    /// Parsed node list of a named template, from cache when the source is unchanged.
    pub fn template(&self, name: &str) -> Result<Arc<Vec<Node>>> {
        let content = self
            .load_source(name)?
            .ok_or_else(|| TemplateError::TemplateNotFound(name.to_string()))?;
        let content_hash = hash_content(&content);

        if let Some(cached) = self.cache.get(name)
            && cached.content_hash == content_hash
        {
            trace!("Template cache hit: {}", name);
            return Ok(cached.nodes.clone());
        }

        let start = Instant::now();
        let nodes = Arc::new(parse_template(&content, &self.registry, &self.config)?);
        debug!(
            "Parsed template '{}' ({} nodes) in {:?}",
            name,
            nodes.len(),
            start.elapsed()
        );
        self.cache.insert(
            name.to_string(),
            CachedTemplate {
                nodes: nodes.clone(),
                content_hash,
            },
        );
        Ok(nodes)
    }

    fn load_source(&self, name: &str) -> Result<Option<String>> {
        if let Some(content) = self.templates.load_source(name)? {
            return Ok(Some(content));
        }
        match &self.source {
            Some(source) => source.load_source(name),
            None => Ok(None),
        }
    }

    /// Render a named template.
    pub fn render<T: ToValue + ?Sized>(&self, name: &str, vars: &T) -> Result<String> {
        let nodes = self.template(name)?;
        self.render_nodes(name, &nodes, vars)
    }

    /// Parse and render source text in one go.
    pub fn render_str<T: ToValue + ?Sized>(&self, source: &str, vars: &T) -> Result<String> {
        let template = self.parse(source)?;
        self.render_nodes("<string>", template.nodes(), vars)
    }

    fn render_nodes<T: ToValue + ?Sized>(&self, label: &str, nodes: &[Node], vars: &T) -> Result<String> {
        let start = Instant::now();
        let value = vars.to_value();
        let mut ctx = Context::new(&value);
        let out = Renderer::new(self).render(nodes, &mut ctx)?;
        debug!(
            "Rendered '{}' ({} bytes) in {:?}",
            label,
            out.len(),
            start.elapsed()
        );
        Ok(out)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("templates", &self.templates.len())
            .field("cached", &self.cache.len())
            .field("config", &self.config)
            .finish()
    }
}

fn hash_content(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

/// A parsed template, renderable any number of times.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Arc<Vec<Node>>,
}

impl Template {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn render<T: ToValue + ?Sized>(&self, engine: &Engine, vars: &T) -> Result<String> {
        let value = vars.to_value();
        let mut ctx = Context::new(&value);
        self.render_context(engine, &mut ctx)
    }

    /// Render against a caller-built context.
    pub fn render_context(&self, engine: &Engine, ctx: &mut Context<'_>) -> Result<String> {
        Renderer::new(engine).render(&self.nodes, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn init_logger() {
        INIT.call_once(|| {
            let _ = env_logger::builder().is_test(true).try_init();
        });
    }

    fn card_engine() -> Engine {
        let mut engine = Engine::new();
        engine
            .register_inclusion("card", "cards.user", Signature::new(1), |a: &Args| {
                let mut vars = HashMap::new();
                vars.insert("name".to_string(), a.arg(0).clone());
                Ok(vars)
            })
            .unwrap();
        engine.add_template("cards.user", "[{{ name }}]");
        engine
    }

    #[test]
    fn test_named_template_is_cached_until_changed() {
        init_logger();
        let engine = Engine::new();
        engine.add_template("page", "v1 {{ x }}");

        let first = engine.template("page").unwrap();
        let second = engine.template("page").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        engine.add_template("page", "v2 {{ x }}");
        let third = engine.template("page").unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(engine.render("page", &()).unwrap(), "v2 ");
    }

    #[test]
    fn test_template_not_found() {
        let engine = Engine::new();
        assert!(matches!(
            engine.render("nope", &()),
            Err(TemplateError::TemplateNotFound(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_inclusion_overlay_does_not_leak() {
        init_logger();
        let engine = card_engine();
        let mut vars = HashMap::new();
        vars.insert("name", Value::from("outer"));

        let out = engine
            .render_str(r#"{{ name }} {% card("inner") %} {{ name }}"#, &vars)
            .unwrap();
        assert_eq!(out, "outer [inner] outer");
    }

    #[test]
    fn test_inclusion_with_external_source() {
        let source = Arc::new(MemorySource::new());
        source.add("cards.user", "<{{ name }}>");
        let mut engine = Engine::new().with_source(source.clone());
        engine
            .register_inclusion("card", "cards.user", Signature::new(1), |a: &Args| {
                Ok(HashMap::from([("name".to_string(), a.arg(0).clone())]))
            })
            .unwrap();

        assert_eq!(engine.render_str(r#"{% card("x") %}"#, &()).unwrap(), "<x>");
        source.remove("cards.user");
        assert!(matches!(
            engine.render_str(r#"{% card("x") %}"#, &()),
            Err(TemplateError::TemplateNotFound(_))
        ));
    }

    #[test]
    fn test_self_inclusion_hits_recursion_limit() {
        let mut engine = Engine::with_config(EngineConfig::default().max_depth(5));
        engine
            .register_inclusion("again", "loop", Signature::new(0), |_: &Args| Ok(HashMap::new()))
            .unwrap();
        engine.add_template("loop", "x{% again %}");

        assert!(matches!(
            engine.render("loop", &()),
            Err(TemplateError::RecursionLimit { limit: 5 })
        ));
    }

    #[test]
    fn test_registry_change_invalidates_cache() {
        let mut engine = Engine::new();
        engine.add_template("t", "{{ 'a'|shout }}");
        assert!(engine.render("t", &()).is_err());

        engine
            .register_filter("shout", |v: &Value| Ok(Value::Str(format!("{}!", v))))
            .unwrap();
        assert_eq!(engine.render("t", &()).unwrap(), "a!");
    }

    #[test]
    fn test_strict_engine_rejects_builtin_override() {
        let mut engine = Engine::with_config(EngineConfig::default().strict(true));
        let err = engine
            .register_filter("upper", |v: &Value| Ok(v.clone()))
            .unwrap_err();
        assert!(matches!(err, TemplateError::DuplicateDirective(_)));

        let mut bare = Engine::bare(EngineConfig::default().strict(true));
        assert!(bare.registry().is_empty());
        bare.register_filter("upper", |v: &Value| Ok(v.clone())).unwrap();
    }

    #[test]
    fn test_template_renders_many_times() {
        let engine = Engine::new();
        let template = engine.parse("{% repeat(n) %}*{% endrepeat %}").unwrap();
        for n in 0..4i64 {
            let vars = HashMap::from([("n", Value::I64(n))]);
            assert_eq!(template.render(&engine, &vars).unwrap(), "*".repeat(n as usize));
        }
    }

    #[test]
    fn test_render_context_with_inserts() {
        let engine = Engine::new();
        let template = engine.parse("{{ who|upper }}").unwrap();
        let root = Value::Null;
        let mut ctx = Context::new(&root);
        ctx.insert("who", Value::from("me"));
        assert_eq!(template.render_context(&engine, &mut ctx).unwrap(), "ME");
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
        assert_send_sync::<Template>();
    }
}
