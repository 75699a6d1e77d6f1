// ABOUTME: Type predicates: int?, float?, number?, string?, etc.

use crate::env::Environment;
use crate::error::EvalError;
use crate::value::{NativeFn, Value};
use std::sync::Arc;

/// Calls a predicate `Value` without an evaluation context. Composable
/// predicates (`where`/`all-of`/`any-of`/`complement`) are always
/// builtin/native values — never closures — so this never needs `ctx`.
fn call_predicate(op: &str, f: &Value, args: &[Value]) -> Result<Value, EvalError> {
    match f {
        Value::BuiltIn(func) => func(args),
        Value::Native(func) => (*func.0)(args),
        other => Err(EvalError::type_error(op, "builtin or native predicate", other, 0)),
    }
}

pub fn builtin_all_of(args: &[Value]) -> Result<Value, EvalError> {
    if args.is_empty() {
        return Err(EvalError::arity_error("all-of", "at least 1", 0));
    }
    let preds = args.to_vec();
    Ok(Value::Native(NativeFn(Arc::new(move |call_args: &[Value]| {
        for p in &preds {
            if !call_predicate("all-of", p, call_args)?.is_truthy() {
                return Ok(Value::Bool(false));
            }
        }
        Ok(Value::Bool(true))
    }))))
}

pub fn builtin_any_of(args: &[Value]) -> Result<Value, EvalError> {
    if args.is_empty() {
        return Err(EvalError::arity_error("any-of", "at least 1", 0));
    }
    let preds = args.to_vec();
    Ok(Value::Native(NativeFn(Arc::new(move |call_args: &[Value]| {
        for p in &preds {
            if call_predicate("any-of", p, call_args)?.is_truthy() {
                return Ok(Value::Bool(true));
            }
        }
        Ok(Value::Bool(false))
    }))))
}

pub fn builtin_complement(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::arity_error("complement", "1", args.len()));
    }
    let p = args[0].clone();
    Ok(Value::Native(NativeFn(Arc::new(move |call_args: &[Value]| {
        Ok(Value::Bool(!call_predicate("complement", &p, call_args)?.is_truthy()))
    }))))
}

macro_rules! type_predicate {
    ($fn_name:ident, $pat:pat) => {
        pub fn $fn_name(args: &[Value]) -> Result<Value, EvalError> {
            if args.len() != 1 {
                return Err(EvalError::arity_error(stringify!($fn_name), "1", args.len()));
            }
            Ok(Value::Bool(matches!(args[0], $pat)))
        }
    };
}

type_predicate!(builtin_int_p, Value::Int(_));
type_predicate!(builtin_float_p, Value::Float(_));
type_predicate!(builtin_string_p, Value::String(_));
type_predicate!(builtin_keyword_p, Value::Keyword(_));
type_predicate!(builtin_symbol_p, Value::Symbol(_));
type_predicate!(builtin_bool_p, Value::Bool(_));
type_predicate!(builtin_nil_p, Value::Nil);
type_predicate!(builtin_vector_p, Value::Vector(_));
type_predicate!(builtin_map_p, Value::Map(_));
type_predicate!(builtin_set_p, Value::Set(_));
type_predicate!(builtin_fn_p, Value::Closure(_) | Value::BuiltIn(_) | Value::Native(_));

pub fn builtin_number_p(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::arity_error("number?", "1", args.len()));
    }
    Ok(Value::Bool(matches!(args[0], Value::Int(_) | Value::Float(_))))
}

pub fn register(env: &Arc<Environment>) {
    env.define("int?", Value::BuiltIn(builtin_int_p));
    env.define("float?", Value::BuiltIn(builtin_float_p));
    env.define("number?", Value::BuiltIn(builtin_number_p));
    env.define("string?", Value::BuiltIn(builtin_string_p));
    env.define("keyword?", Value::BuiltIn(builtin_keyword_p));
    env.define("symbol?", Value::BuiltIn(builtin_symbol_p));
    env.define("bool?", Value::BuiltIn(builtin_bool_p));
    env.define("nil?", Value::BuiltIn(builtin_nil_p));
    env.define("vector?", Value::BuiltIn(builtin_vector_p));
    env.define("map?", Value::BuiltIn(builtin_map_p));
    env.define("set?", Value::BuiltIn(builtin_set_p));
    env.define("fn?", Value::BuiltIn(builtin_fn_p));
    env.define("all-of", Value::BuiltIn(builtin_all_of));
    env.define("any-of", Value::BuiltIn(builtin_any_of));
    env.define("complement", Value::BuiltIn(builtin_complement));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_p_accepts_both_int_and_float() {
        assert_eq!(builtin_number_p(&[Value::Int(1)]).unwrap(), Value::Bool(true));
        assert_eq!(builtin_number_p(&[Value::Float(1.5)]).unwrap(), Value::Bool(true));
        assert_eq!(builtin_number_p(&[Value::string("x")]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn nil_p_only_matches_nil() {
        assert_eq!(builtin_nil_p(&[Value::Nil]).unwrap(), Value::Bool(true));
        assert_eq!(builtin_nil_p(&[Value::Bool(false)]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn all_of_short_circuits_on_the_first_false() {
        let is_int = Value::BuiltIn(builtin_int_p);
        let combined = builtin_all_of(&[is_int]).unwrap();
        assert_eq!(call_predicate("test", &combined, &[Value::Int(1)]).unwrap(), Value::Bool(true));
        assert_eq!(call_predicate("test", &combined, &[Value::string("x")]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn complement_negates_the_wrapped_predicate() {
        let is_nil = Value::BuiltIn(builtin_nil_p);
        let not_nil = builtin_complement(&[is_nil]).unwrap();
        assert_eq!(call_predicate("test", &not_nil, &[Value::Int(1)]).unwrap(), Value::Bool(true));
        assert_eq!(call_predicate("test", &not_nil, &[Value::Nil]).unwrap(), Value::Bool(false));
    }
}
