// ABOUTME: Spanned AST produced by the parser and consumed by the analyzer/evaluator

use crate::value::{OrderedMap, OrderedSet, Symbol};
use std::sync::Arc;

/// Source position of an AST node, used by the analyzer and by evaluation
/// errors so a caller can point at the offending form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: u32,
    pub col: u32,
}

/// A parsed, not-yet-evaluated program form. Kept distinct from [`Value`]
/// so positions can be attached without growing every runtime value by a
/// `Span` it will never use.
#[derive(Debug, Clone)]
pub enum Ast {
    Nil(Span),
    Bool(bool, Span),
    Int(i64, Span),
    Float(f64, Span),
    String(Arc<str>, Span),
    Keyword(Symbol, Span),
    Symbol(Symbol, Span),
    Vector(Vec<Ast>, Span),
    Map(Vec<(Ast, Ast)>, Span),
    Set(Vec<Ast>, Span),
    List(Vec<Ast>, Span),
}

impl Ast {
    pub fn span(&self) -> Span {
        match self {
            Ast::Nil(s)
            | Ast::Bool(_, s)
            | Ast::Int(_, s)
            | Ast::Float(_, s)
            | Ast::String(_, s)
            | Ast::Keyword(_, s)
            | Ast::Symbol(_, s)
            | Ast::Vector(_, s)
            | Ast::Map(_, s)
            | Ast::Set(_, s)
            | Ast::List(_, s) => *s,
        }
    }

    /// The leading symbol of a list form, e.g. `if` in `(if a b c)`.
    pub fn head_symbol(&self) -> Option<&Symbol> {
        match self {
            Ast::List(items, _) => items.first().and_then(|first| match first {
                Ast::Symbol(sym, _) => Some(sym),
                _ => None,
            }),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Ast]> {
        match self {
            Ast::List(items, _) => Some(items),
            _ => None,
        }
    }
}

/// Convert a literal AST subtree (no symbols referring to runtime bindings
/// beyond what `quote` captures) into a `Value`, used by `quote` and by
/// literal map/set/vector construction during evaluation.
pub fn ast_to_literal_value(ast: &Ast) -> crate::value::Value {
    use crate::value::Value;
    match ast {
        Ast::Nil(_) => Value::Nil,
        Ast::Bool(b, _) => Value::Bool(*b),
        Ast::Int(n, _) => Value::Int(*n),
        Ast::Float(n, _) => Value::Float(*n),
        Ast::String(s, _) => Value::String(s.clone()),
        Ast::Keyword(sym, _) => Value::Keyword(sym.clone()),
        Ast::Symbol(sym, _) => Value::Symbol(sym.clone()),
        Ast::Vector(items, _) => {
            Value::vector(items.iter().map(ast_to_literal_value).collect())
        }
        Ast::Map(pairs, _) => {
            let mut map = OrderedMap::new();
            for (k, v) in pairs {
                map.insert(ast_to_literal_value(k), ast_to_literal_value(v));
            }
            Value::map(map)
        }
        Ast::Set(items, _) => {
            Value::set(OrderedSet::from_items(
                items.iter().map(ast_to_literal_value).collect(),
            ))
        }
        Ast::List(items, _) => {
            Value::vector(items.iter().map(ast_to_literal_value).collect())
        }
    }
}
