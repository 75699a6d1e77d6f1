// ABOUTME: Tool registry — host-registered functions PTC-Lisp programs invoke via `tool/name`

use crate::signature::Signature;
use crate::value::{OrderedMap, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
#[error("{reason}: {message}")]
pub struct ToolError {
    pub reason: String,
    pub message: String,
    pub details: Option<Value>,
}

impl ToolError {
    pub fn new(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self { reason: reason.into(), message: message.into(), details: None }
    }
}

/// How a tool is dispatched: a plain host function, an LLM-backed
/// synthesis step, or a nested sub-agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Native,
    Llm,
    SubAgent,
}

pub type ToolHandler = fn(&OrderedMap) -> Result<Value, ToolError>;

/// A host function a tool call dispatches to. Most tools are `Native` —
/// a bare `fn` pointer, cheap to register and to clone. `Dynamic` exists for
/// handlers that must close over runtime state they can't get from `args`
/// alone (a sub-agent tool closing over its child spec and the run's `llm`
/// callback, for instance) — the same `Arc<dyn Fn>` shape `Value::Native`
/// uses for composable predicates.
#[derive(Clone)]
pub enum Handler {
    Native(ToolHandler),
    Dynamic(Arc<dyn Fn(&OrderedMap) -> Result<Value, ToolError> + Send + Sync>),
}

impl Handler {
    fn call(&self, args: &OrderedMap) -> Result<Value, ToolError> {
        match self {
            Handler::Native(f) => f(args),
            Handler::Dynamic(f) => f(args),
        }
    }
}

/// `{name, fn, signature?, description?, type, cache}`, per §3. Arguments
/// always arrive as a single record map (§4.4) — PTC-Lisp has no
/// positional tool calls.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub handler: Handler,
    pub signature: Option<Signature>,
    pub description: Option<String>,
    pub kind: ToolKind,
    /// Tools marked "for planning only" are listed in the prompt but never
    /// dispatched (§4.6).
    pub planning_only: bool,
    pub cache: bool,
}

impl Tool {
    pub fn new(name: impl Into<String>, handler: ToolHandler) -> Self {
        Self {
            name: name.into(),
            handler: Handler::Native(handler),
            signature: None,
            description: None,
            kind: ToolKind::Native,
            planning_only: false,
            cache: false,
        }
    }

    /// A tool backed by a closure rather than a bare `fn` pointer, for
    /// handlers that close over runtime state — sub-agent dispatch being
    /// the motivating case (§4.5.4). `cache` defaults to off: recursive
    /// calls normally have side effects (child turns, nested tool calls)
    /// that caching would silently skip.
    pub fn dynamic(
        name: impl Into<String>,
        kind: ToolKind,
        handler: impl Fn(&OrderedMap) -> Result<Value, ToolError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            handler: Handler::Dynamic(Arc::new(handler)),
            signature: None,
            description: None,
            kind,
            planning_only: false,
            cache: false,
        }
    }

    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn cached(mut self) -> Self {
        self.cache = true;
        self
    }
}

fn cache_key(name: &str, args: &OrderedMap) -> String {
    let mut rendered = String::from(name);
    for (k, v) in args.iter() {
        rendered.push('|');
        rendered.push_str(&k.to_string());
        rendered.push('=');
        rendered.push_str(&v.to_string());
    }
    rendered
}

/// Read-only during a run (§5): built once, dispatched many times, with a
/// per-run cache for `cache: true` tools. Parallel cache misses both
/// execute and the last writer wins, per Design Notes Open Question 3 —
/// never consulted for the currently-in-flight call of the same key.
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
    cache: Mutex<HashMap<String, Value>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new(), cache: Mutex::new(HashMap::new()) }
    }

    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.values()
    }

    /// Dispatches `name` with `args`, consulting the per-run cache first
    /// when the tool declares `cache: true`. Errors are never cached.
    pub fn call(&self, name: &str, args: &OrderedMap) -> Result<Value, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| {
            ToolError::new("unknown_tool", format!("no tool registered under {name:?}"))
        })?;

        if tool.cache {
            let key = cache_key(name, args);
            if let Some(cached) = self.cache.lock().unwrap().get(&key).cloned() {
                return Ok(cached);
            }
            let result = tool.handler.call(args)?;
            self.cache.lock().unwrap().insert(key, result.clone());
            return Ok(result);
        }

        tool.handler.call(args)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_id(args: &OrderedMap) -> Result<Value, ToolError> {
        Ok(args.get(&Value::keyword("k")).cloned().unwrap_or(Value::Nil))
    }

    #[test]
    fn unknown_tool_is_reported_by_name() {
        let registry = ToolRegistry::new();
        let err = registry.call("missing", &OrderedMap::new()).unwrap_err();
        assert_eq!(err.reason, "unknown_tool");
    }

    #[test]
    fn cached_tool_is_invoked_once_per_distinct_args() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        fn counting(args: &OrderedMap) -> Result<Value, ToolError> {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Ok(args.get(&Value::keyword("k")).cloned().unwrap_or(Value::Nil))
        }

        let mut registry = ToolRegistry::new();
        registry.register(Tool::new("id", counting).cached());

        let mut a1 = OrderedMap::new();
        a1.insert(Value::keyword("k"), Value::Int(1));
        let mut a2 = OrderedMap::new();
        a2.insert(Value::keyword("k"), Value::Int(2));

        registry.call("id", &a1).unwrap();
        registry.call("id", &a1).unwrap();
        registry.call("id", &a2).unwrap();

        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn uncached_tool_bypasses_the_cache_entirely() {
        let mut registry = ToolRegistry::new();
        registry.register(Tool::new("id", echo_id));
        let mut args = OrderedMap::new();
        args.insert(Value::keyword("k"), Value::Int(7));
        assert_eq!(registry.call("id", &args).unwrap(), Value::Int(7));
    }
}
