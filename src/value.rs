// ABOUTME: Value types representing PTC-Lisp data and runtime objects

use crate::ast::Ast;
use crate::env::Environment;
use crate::error::EvalError;
use std::fmt;
use std::sync::Arc;

/// An insertion-ordered map. `Value` has no total `Hash` impl (floats
/// aren't hashable), and the sandbox's collections are small by
/// construction, so a linear-scan `Vec` of pairs is the simplest
/// representation that still gives key-wise, order-independent equality.
#[derive(Debug, Clone, Default)]
pub struct OrderedMap {
    entries: Vec<(Value, Value)>,
}

impl OrderedMap {
    pub fn new() -> Self {
        OrderedMap {
            entries: Vec::new(),
        }
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn from_pairs(pairs: Vec<(Value, Value)>) -> Self {
        let mut map = OrderedMap::new();
        for (k, v) in pairs {
            map.insert(k, v);
        }
        map
    }
}

impl PartialEq for OrderedMap {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|ov| ov == v))
    }
}

/// An insertion-ordered set, for the same reason as [`OrderedMap`].
#[derive(Debug, Clone, Default)]
pub struct OrderedSet {
    items: Vec<Value>,
}

impl OrderedSet {
    pub fn new() -> Self {
        OrderedSet { items: Vec::new() }
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.items.contains(value)
    }

    pub fn insert(&mut self, value: Value) {
        if !self.contains(&value) {
            self.items.push(value);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.iter()
    }

    pub fn from_items(items: Vec<Value>) -> Self {
        let mut set = OrderedSet::new();
        for item in items {
            set.insert(item);
        }
        set
    }
}

impl PartialEq for OrderedSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.items.iter().all(|v| other.contains(v))
    }
}

/// A namespace-qualified symbol: `ns/name`, or a bare `name` when `ns` is
/// `None`. Namespaces partition lookup across `data`, `ctx`, `tool`,
/// `memory`, and the default user namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    pub ns: Option<Arc<str>>,
    pub name: Arc<str>,
}

impl Symbol {
    pub fn plain(name: impl Into<Arc<str>>) -> Self {
        Symbol {
            ns: None,
            name: name.into(),
        }
    }

    pub fn namespaced(ns: impl Into<Arc<str>>, name: impl Into<Arc<str>>) -> Self {
        Symbol {
            ns: Some(ns.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A closure over a lexical environment, created by `fn`/`defn`.
#[derive(Debug, Clone)]
pub struct Closure {
    pub name: Option<Arc<str>>,
    pub params: Arc<Ast>,
    pub body: Arc<[Ast]>,
    pub env: Arc<Environment>,
}

/// A built-in function backed by a Rust function pointer, registered by a
/// `builtins::*::register` module.
pub type BuiltinFn = fn(&[Value]) -> Result<Value, EvalError>;

/// A predicate or selector built at runtime from captured arguments (e.g.
/// `(where :category = "travel")`), as opposed to a [`BuiltinFn`] which is
/// a bare function pointer with no closed-over state. Ctx-free like
/// `BuiltinFn`: these compose other native/builtin values, not closures
/// that need the evaluator's environment.
#[derive(Clone)]
pub struct NativeFn(pub Arc<dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync>);

impl std::fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<native>")
    }
}

/// A host-registered tool handle bound into the `tool/` namespace. Calling
/// it dispatches to the sandbox's tool registry, not to Rust code directly
/// — the handle just carries the name for lookup and display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolHandle {
    pub name: Arc<str>,
}

/// A runtime value. Distinguishes `Int`/`Float` (spec: integer arithmetic
/// is exact, mixed int/float promotes to float) unlike a single `f64`
/// number type.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
    Keyword(Symbol),
    Symbol(Symbol),
    Vector(Arc<[Value]>),
    Map(Arc<OrderedMap>),
    Set(Arc<OrderedSet>),
    Closure(Arc<Closure>),
    BuiltIn(BuiltinFn),
    Native(NativeFn),
    Tool(ToolHandle),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::Symbol(_) => "symbol",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Closure(_) => "function",
            Value::BuiltIn(_) => "function",
            Value::Native(_) => "function",
            Value::Tool(_) => "tool",
        }
    }

    /// Truthiness per the spec: only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Value::String(s.into())
    }

    pub fn keyword(name: impl Into<Arc<str>>) -> Self {
        Value::Keyword(Symbol::plain(name))
    }

    pub fn vector(items: Vec<Value>) -> Self {
        Value::Vector(items.into())
    }

    pub fn map(m: OrderedMap) -> Self {
        Value::Map(Arc::new(m))
    }

    pub fn set(s: OrderedSet) -> Self {
        Value::Set(Arc::new(s))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a.len() == b.len() && a.iter().eq(b.iter()),
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Tool(a), Value::Tool(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Keyword(sym) => write!(f, ":{}", sym),
            Value::Symbol(sym) => write!(f, "{}", sym),
            Value::Vector(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Set(set) => {
                write!(f, "#{{")?;
                for (i, item) in set.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
            Value::Closure(c) => match &c.name {
                Some(name) => write!(f, "#<function {}>", name),
                None => write!(f, "#<function>"),
            },
            Value::BuiltIn(_) => write!(f, "#<builtin>"),
            Value::Native(_) => write!(f, "#<native>"),
            Value::Tool(t) => write!(f, "#<tool {}>", t.name),
        }
    }
}

/// Best-effort heap accounting: a running tally of node/string-length
/// "cost" consulted at allocation points in the evaluator. Not an OS
/// memory limit — see DESIGN.md's Open Question resolution.
#[derive(Debug)]
pub struct Accountant {
    used: std::sync::atomic::AtomicUsize,
    limit: usize,
}

impl Accountant {
    pub fn new(limit: usize) -> Self {
        Accountant {
            used: std::sync::atomic::AtomicUsize::new(0),
            limit,
        }
    }

    /// Charges `amount` units, atomically, so concurrent `pmap` branches
    /// sharing one accountant still see a consistent running total.
    pub fn charge(&self, amount: usize) -> Result<(), EvalError> {
        use std::sync::atomic::Ordering;
        let used = self.used.fetch_add(amount, Ordering::SeqCst) + amount;
        if used > self.limit {
            return Err(EvalError::ResourceExceeded(format!(
                "heap limit of {} units exceeded",
                self.limit
            )));
        }
        Ok(())
    }

    pub fn used(&self) -> usize {
        self.used.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// The accounting cost of a value: 1 per scalar, plus the length of
    /// any string/collection contents.
    pub fn cost_of(value: &Value) -> usize {
        match value {
            Value::Nil | Value::Bool(_) | Value::Int(_) | Value::Float(_) => 1,
            Value::String(s) => 1 + s.len(),
            Value::Keyword(_) | Value::Symbol(_) | Value::Tool(_) => 1,
            Value::Vector(items) => 1 + items.iter().map(Accountant::cost_of).sum::<usize>(),
            Value::Map(map) => {
                1 + map
                    .iter()
                    .map(|(k, v)| Accountant::cost_of(k) + Accountant::cost_of(v))
                    .sum::<usize>()
            }
            Value::Set(set) => 1 + set.iter().map(Accountant::cost_of).sum::<usize>(),
            Value::Closure(_) | Value::BuiltIn(_) | Value::Native(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_display_has_no_decimal() {
        assert_eq!(format!("{}", Value::Int(42)), "42");
    }

    #[test]
    fn float_display_keeps_one_decimal_for_whole_numbers() {
        assert_eq!(format!("{}", Value::Float(42.0)), "42.0");
        assert_eq!(format!("{}", Value::Float(2.5)), "2.5");
    }

    #[test]
    fn nil_and_false_are_falsy_everything_else_truthy() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::string("").is_truthy());
    }

    #[test]
    fn mixed_int_float_equality_promotes() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
    }

    #[test]
    fn map_equality_is_order_independent() {
        let mut a = OrderedMap::new();
        a.insert(Value::keyword("x"), Value::Int(1));
        a.insert(Value::keyword("y"), Value::Int(2));
        let mut b = OrderedMap::new();
        b.insert(Value::keyword("y"), Value::Int(2));
        b.insert(Value::keyword("x"), Value::Int(1));
        assert_eq!(a, b);
    }

    #[test]
    fn accountant_rejects_over_budget_charge() {
        let acc = Accountant::new(4);
        acc.charge(3).unwrap();
        assert!(acc.charge(2).is_err());
    }
}
