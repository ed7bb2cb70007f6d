use crate::Result;
use crate::error::TemplateError;
use crate::value::{Lookup, Value};

/// Render-call-local variable scope.
///
/// Reads check overlay scopes from innermost to outermost, then the root
/// value. Writes always land in the innermost scope, so an overlay pushed for
/// an inclusion never leaks into the caller once it is popped.
pub struct Context<'a> {
    root: &'a Value,
    scopes: Vec<Vec<(String, Value)>>,
    depth: usize,
}

impl<'a> Context<'a> {
    pub fn new(root: &'a Value) -> Self {
        Self {
            root,
            scopes: vec![Vec::new()],
            depth: 0,
        }
    }

    /// Bind `key` in the innermost scope, replacing an existing binding there.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let Some(scope) = self.scopes.last_mut() else {
            self.scopes.push(vec![(key, value)]);
            return;
        };
        match scope.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => scope.push((key, value)),
        }
    }

    /// Exact, case-sensitive lookup of a single name.
    pub fn get(&self, key: &str) -> Option<Value> {
        // 1. Overlays, innermost first (supports shadowing)
        for scope in self.scopes.iter().rev() {
            if let Some((_, v)) = scope.iter().rev().find(|(k, _)| k == key) {
                return Some(v.clone());
            }
        }

        // 2. Root object
        self.root
            .get_key(key)
            .or_else(|| self.root.get_attr(key))
    }

    pub fn push_scope<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.scopes.push(vars.into_iter().collect());
    }

    pub fn pop_scope(&mut self) {
        // The base scope is never removed.
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Names bound in overlay scopes, in binding order, outermost first.
    pub fn scope_names(&self) -> Vec<&str> {
        self.scopes
            .iter()
            .flat_map(|s| s.iter().map(|(k, _)| k.as_str()))
            .collect()
    }

    pub(crate) fn descend(&mut self, limit: usize) -> Result<()> {
        if self.depth >= limit {
            return Err(TemplateError::RecursionLimit { limit });
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_lookup_simple() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), Value::I64(1));
        let root = Value::Map(map);
        let ctx = Context::new(&root);

        assert_eq!(ctx.get("a"), Some(Value::I64(1)));
        assert_eq!(ctx.get("b"), None);
        assert_eq!(ctx.get("A"), None);
    }

    #[test]
    fn test_lookup_scope_shadowing() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), Value::I64(1));
        let root = Value::Map(map);
        let mut ctx = Context::new(&root);

        ctx.push_scope(vec![("a".to_string(), Value::I64(2))]);
        assert_eq!(ctx.get("a"), Some(Value::I64(2)));

        ctx.pop_scope();
        assert_eq!(ctx.get("a"), Some(Value::I64(1)));
    }

    #[test]
    fn test_overlay_writes_do_not_leak() {
        let root = Value::Null;
        let mut ctx = Context::new(&root);
        ctx.insert("title", Value::from("outer"));

        ctx.push_scope(Vec::new());
        ctx.insert("title", Value::from("inner"));
        assert_eq!(ctx.get("title"), Some(Value::from("inner")));
        ctx.pop_scope();

        assert_eq!(ctx.get("title"), Some(Value::from("outer")));
        assert_eq!(ctx.scope_names(), vec!["title"]);
    }

    #[test]
    fn test_base_scope_survives_extra_pop() {
        let root = Value::Null;
        let mut ctx = Context::new(&root);
        ctx.insert("x", Value::I64(1));
        ctx.pop_scope();
        assert_eq!(ctx.get("x"), Some(Value::I64(1)));
    }

    #[test]
    fn test_depth_limit() {
        let root = Value::Null;
        let mut ctx = Context::new(&root);
        ctx.descend(2).unwrap();
        ctx.descend(2).unwrap();
        assert!(matches!(
            ctx.descend(2),
            Err(TemplateError::RecursionLimit { limit: 2 })
        ));
        ctx.ascend();
        assert_eq!(ctx.depth(), 1);
    }
}
