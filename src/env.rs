// ABOUTME: Environment module for managing variable bindings and lexical scopes

use crate::error::EvalError;
use crate::value::{Symbol, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A persistent, linked-frame lexical environment. Frames are acyclic;
/// bindings are `RwLock`-guarded so a shared environment can be read from
/// multiple `pmap`/`pcalls` worker threads at once (each branch still gets
/// its own child frame for writes — see [`Environment::with_parent`]).
#[derive(Debug)]
pub struct Environment {
    bindings: RwLock<HashMap<String, Value>>,
    parent: Option<Arc<Environment>>,
}

impl Environment {
    /// Creates a new root environment with no parent.
    pub fn new() -> Arc<Self> {
        Arc::new(Environment {
            bindings: RwLock::new(HashMap::new()),
            parent: None,
        })
    }

    /// Creates a new child environment with a parent, per closure capture.
    pub fn with_parent(parent: Arc<Environment>) -> Arc<Self> {
        Arc::new(Environment {
            bindings: RwLock::new(HashMap::new()),
            parent: Some(parent),
        })
    }

    /// Defines a binding in THIS scope (doesn't walk the parent chain).
    /// Namespaced symbols (`ctx/foo`) are stored under their qualified key
    /// so `ctx/`, `tool/`, `memory/`, and `data/` stay separate from the
    /// default user namespace.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.bindings.write().unwrap().insert(name.into(), value);
    }

    pub fn define_symbol(&self, sym: &Symbol, value: Value) {
        self.define(sym.to_string(), value);
    }

    /// Looks up a symbol in this scope, then recursively in parent scopes.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.bindings.read().unwrap().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    pub fn get_symbol(&self, sym: &Symbol) -> Option<Value> {
        self.get(&sym.to_string())
    }

    pub fn lookup(&self, sym: &Symbol) -> Result<Value, EvalError> {
        self.get_symbol(sym)
            .ok_or_else(|| EvalError::UndefinedSymbol(sym.to_string()))
    }

    /// Updates an existing binding, walking the parent chain to find it.
    pub fn set(&self, name: &str, value: Value) -> Result<(), EvalError> {
        if self.bindings.read().unwrap().contains_key(name) {
            self.bindings.write().unwrap().insert(name.to_string(), value);
            return Ok(());
        }
        match &self.parent {
            Some(parent) => parent.set(name, value),
            None => Err(EvalError::UndefinedSymbol(name.to_string())),
        }
    }

    /// All bindings defined directly in this frame (not parents), used by
    /// the memory subsystem to snapshot a turn's accumulated `def`s.
    pub fn local_bindings(&self) -> Vec<(String, Value)> {
        self.bindings
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_and_get_roundtrip() {
        let env = Environment::new();
        env.define("x", Value::Int(42));
        assert_eq!(env.get("x"), Some(Value::Int(42)));
    }

    #[test]
    fn undefined_symbol_is_none() {
        let env = Environment::new();
        assert!(env.get("undefined").is_none());
    }

    #[test]
    fn child_shadows_parent() {
        let parent = Environment::new();
        parent.define("x", Value::Int(1));
        let child = Environment::with_parent(parent);
        child.define("x", Value::Int(2));
        assert_eq!(child.get("x"), Some(Value::Int(2)));
    }

    #[test]
    fn child_sees_parent_bindings() {
        let parent = Environment::new();
        parent.define("x", Value::Int(1));
        let child = Environment::with_parent(parent);
        assert_eq!(child.get("x"), Some(Value::Int(1)));
    }

    #[test]
    fn namespaced_symbols_resolve_by_qualified_key() {
        let env = Environment::new();
        env.define_symbol(&Symbol::namespaced("ctx", "turn"), Value::Int(3));
        assert_eq!(
            env.get_symbol(&Symbol::namespaced("ctx", "turn")),
            Some(Value::Int(3))
        );
        assert_eq!(env.get("turn"), None);
    }

    #[test]
    fn set_updates_in_defining_frame() {
        let parent = Environment::new();
        parent.define("x", Value::Int(1));
        let child = Environment::with_parent(parent.clone());
        child.set("x", Value::Int(9)).unwrap();
        assert_eq!(parent.get("x"), Some(Value::Int(9)));
    }
}
