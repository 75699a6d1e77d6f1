// ABOUTME: Comparison builtins: =, <, >, <=, >=

use crate::env::Environment;
use crate::error::EvalError;
use crate::value::Value;
use std::cmp::Ordering;
use std::sync::Arc;

pub fn builtin_eq(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(EvalError::arity_error("=", "2", args.len()));
    }
    Ok(Value::Bool(args[0] == args[1]))
}

fn numeric_order(op: &str, a: &Value, b: &Value) -> Result<Ordering, EvalError> {
    let a = a.as_f64().ok_or_else(|| EvalError::type_error(op, "number", a, 0))?;
    let b = b.as_f64().ok_or_else(|| EvalError::type_error(op, "number", b, 1))?;
    a.partial_cmp(&b)
        .ok_or_else(|| EvalError::runtime_error(op, "cannot compare NaN"))
}

/// PTC-Lisp's comparisons reject Clojure's range-compare chain: exactly 2
/// arguments, never more.
fn pair(op: &str, args: &[Value], ok: fn(Ordering) -> bool) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(EvalError::arity_error(op, "2", args.len()));
    }
    Ok(Value::Bool(ok(numeric_order(op, &args[0], &args[1])?)))
}

pub fn builtin_lt(args: &[Value]) -> Result<Value, EvalError> {
    pair("<", args, |o| o == Ordering::Less)
}

pub fn builtin_gt(args: &[Value]) -> Result<Value, EvalError> {
    pair(">", args, |o| o == Ordering::Greater)
}

pub fn builtin_le(args: &[Value]) -> Result<Value, EvalError> {
    pair("<=", args, |o| o != Ordering::Greater)
}

pub fn builtin_ge(args: &[Value]) -> Result<Value, EvalError> {
    pair(">=", args, |o| o != Ordering::Less)
}

pub fn register(env: &Arc<Environment>) {
    env.define("=", Value::BuiltIn(builtin_eq));
    env.define("<", Value::BuiltIn(builtin_lt));
    env.define(">", Value::BuiltIn(builtin_gt));
    env.define("<=", Value::BuiltIn(builtin_le));
    env.define(">=", Value::BuiltIn(builtin_ge));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_compares_structurally() {
        assert_eq!(builtin_eq(&[Value::Int(1), Value::Float(1.0)]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn lt_accepts_exactly_two_args() {
        assert_eq!(builtin_lt(&[Value::Int(1), Value::Int(2)]).unwrap(), Value::Bool(true));
        assert_eq!(builtin_lt(&[Value::Int(2), Value::Int(1)]).unwrap(), Value::Bool(false));
    }

    #[test]
    fn lt_rejects_more_than_two_args() {
        assert!(builtin_lt(&[Value::Int(1), Value::Int(2), Value::Int(3)]).is_err());
    }

    #[test]
    fn eq_rejects_more_than_two_args() {
        assert!(builtin_eq(&[Value::Int(1), Value::Int(1), Value::Int(1)]).is_err());
    }
}
