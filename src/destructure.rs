// ABOUTME: Binding-pattern destructuring shared by let, fn params, and for

use crate::ast::Ast;
use crate::env::Environment;
use crate::error::EvalError;
use crate::value::{Symbol, Value};
use std::sync::Arc;

/// Bind `value` against the pattern described by `pattern_ast` into `env`.
/// Supports plain symbols, `[a b & rest]` vector patterns (positional,
/// with an optional rest-capture after `&`), and `{:keys [a b]}`/
/// `{:strs [a b]}` map patterns.
pub fn bind_pattern(env: &Arc<Environment>, pattern_ast: &Ast, value: &Value) -> Result<(), EvalError> {
    match pattern_ast {
        Ast::Symbol(sym, _) => {
            env.define_symbol(sym, value.clone());
            Ok(())
        }
        Ast::Vector(patterns, _) => bind_vector_pattern(env, patterns, value),
        Ast::Map(pairs, _) => bind_map_pattern(env, pairs, value),
        other => Err(EvalError::runtime_error(
            "destructure",
            format!("unsupported binding pattern: {:?}", other),
        )),
    }
}

fn bind_vector_pattern(
    env: &Arc<Environment>,
    patterns: &[Ast],
    value: &Value,
) -> Result<(), EvalError> {
    let items: Vec<Value> = match value {
        Value::Vector(items) => items.to_vec(),
        Value::Nil => Vec::new(),
        other => {
            return Err(EvalError::type_error("destructure", "vector", other, 0));
        }
    };

    let mut idx = 0;
    let mut i = 0;
    while i < patterns.len() {
        if let Ast::Symbol(sym, _) = &patterns[i] {
            if &*sym.name == "&" {
                let rest: Vec<Value> = items.get(idx..).map(|s| s.to_vec()).unwrap_or_default();
                if let Some(rest_pattern) = patterns.get(i + 1) {
                    bind_pattern(env, rest_pattern, &Value::vector(rest))?;
                }
                return Ok(());
            }
        }
        let item = items.get(idx).cloned().ok_or_else(|| {
            EvalError::destructure_error(format!(
                "vector pattern expects at least {} elements, got {}",
                idx + 1,
                items.len()
            ))
        })?;
        bind_pattern(env, &patterns[i], &item)?;
        idx += 1;
        i += 1;
    }
    Ok(())
}

/// `{:keys [a b]}` binds `a`/`b` against the map's `:a`/`:b` entries;
/// `{:strs [a b]}` binds them against the map's `"a"`/`"b"` string keys.
fn bind_map_pattern(
    env: &Arc<Environment>,
    pairs: &[(Ast, Ast)],
    value: &Value,
) -> Result<(), EvalError> {
    let map = match value {
        Value::Map(m) => m.clone(),
        other => return Err(EvalError::type_error("destructure", "map", other, 0)),
    };

    for (directive_ast, names_ast) in pairs {
        let directive = match directive_ast {
            Ast::Keyword(sym, _) => sym.name.clone(),
            other => {
                return Err(EvalError::destructure_error(format!(
                    "map pattern expects a :keys/:strs directive, got {:?}",
                    other
                )))
            }
        };
        let names = match names_ast {
            Ast::Vector(items, _) => items,
            other => {
                return Err(EvalError::destructure_error(format!(
                    ":{directive} expects a vector of names, got {:?}",
                    other
                )))
            }
        };
        for name_ast in names {
            let name_sym = match name_ast {
                Ast::Symbol(sym, _) => sym.clone(),
                other => {
                    return Err(EvalError::destructure_error(format!(
                        ":{directive} names must be symbols, got {:?}",
                        other
                    )))
                }
            };
            let lookup_key = match directive.as_ref() {
                "keys" => Value::Keyword(name_sym.clone()),
                "strs" => Value::string(name_sym.name.clone()),
                other => {
                    return Err(EvalError::destructure_error(format!(
                        "unknown map pattern directive :{other}"
                    )))
                }
            };
            let bound = map.get(&lookup_key).cloned().unwrap_or(Value::Nil);
            env.define_symbol(&name_sym, bound);
        }
    }
    Ok(())
}

/// Collect the plain symbol names a pattern binds, used when checking a
/// closure's declared parameter count against call-site arguments for
/// fixed-arity (no `&`) parameter lists.
pub fn pattern_is_variadic(params: &[Ast]) -> bool {
    params
        .iter()
        .any(|p| matches!(p, Ast::Symbol(sym, _) if &*sym.name == "&"))
}

pub fn fixed_arity(params: &[Ast]) -> usize {
    params
        .iter()
        .take_while(|p| !matches!(p, Ast::Symbol(sym, _) if &*sym.name == "&"))
        .count()
}

#[allow(dead_code)]
pub fn symbol_names(params: &[Ast]) -> Vec<Symbol> {
    params
        .iter()
        .filter_map(|p| match p {
            Ast::Symbol(sym, _) if &*sym.name != "&" => Some(sym.clone()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_one;

    #[test]
    fn binds_plain_symbol() {
        let env = Environment::new();
        let pattern = parse_one("x").unwrap();
        bind_pattern(&env, &pattern, &Value::Int(5)).unwrap();
        assert_eq!(env.get("x"), Some(Value::Int(5)));
    }

    #[test]
    fn binds_vector_pattern_with_rest() {
        let env = Environment::new();
        let pattern = parse_one("[a b & rest]").unwrap();
        let value = Value::vector(vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]);
        bind_pattern(&env, &pattern, &value).unwrap();
        assert_eq!(env.get("a"), Some(Value::Int(1)));
        assert_eq!(env.get("b"), Some(Value::Int(2)));
        assert_eq!(
            env.get("rest"),
            Some(Value::vector(vec![Value::Int(3), Value::Int(4)]))
        );
    }

    #[test]
    fn binds_map_pattern_by_keys() {
        use crate::value::OrderedMap;
        let env = Environment::new();
        let pattern = parse_one("{:keys [name]}").unwrap();
        let mut m = OrderedMap::new();
        m.insert(Value::keyword("name"), Value::string("ok"));
        bind_pattern(&env, &pattern, &Value::map(m)).unwrap();
        assert_eq!(env.get("name"), Some(Value::string("ok")));
    }

    #[test]
    fn binds_map_pattern_by_strs() {
        use crate::value::OrderedMap;
        let env = Environment::new();
        let pattern = parse_one("{:strs [name]}").unwrap();
        let mut m = OrderedMap::new();
        m.insert(Value::string("name"), Value::string("ok"));
        bind_pattern(&env, &pattern, &Value::map(m)).unwrap();
        assert_eq!(env.get("name"), Some(Value::string("ok")));
    }

    #[test]
    fn vector_pattern_errors_on_missing_trailing_element() {
        let env = Environment::new();
        let pattern = parse_one("[a b]").unwrap();
        let value = Value::vector(vec![Value::Int(1)]);
        assert!(bind_pattern(&env, &pattern, &value).is_err());
    }
}
