// ABOUTME: Arithmetic builtins: +, -, *, /, %, and numeric helpers

use crate::env::Environment;
use crate::error::EvalError;
use crate::value::Value;
use std::sync::Arc;

enum Num {
    Int(i64),
    Float(f64),
}

fn as_num(op: &str, v: &Value, position: usize) -> Result<Num, EvalError> {
    match v {
        Value::Int(n) => Ok(Num::Int(*n)),
        Value::Float(n) => Ok(Num::Float(*n)),
        other => Err(EvalError::type_error(op, "number", other, position)),
    }
}

/// Folds a list of numbers, keeping the result `Int` as long as every
/// operand is `Int`; any `Float` operand promotes the whole fold.
fn fold(op: &str, args: &[Value], identity: i64, f_i: fn(i64, i64) -> i64, f_f: fn(f64, f64) -> f64) -> Result<Value, EvalError> {
    let mut acc_i = identity;
    let mut acc_f = identity as f64;
    let mut is_float = false;
    for (i, arg) in args.iter().enumerate() {
        match as_num(op, arg, i)? {
            Num::Int(n) => {
                acc_i = f_i(acc_i, n);
                acc_f = f_f(acc_f, n as f64);
            }
            Num::Float(n) => {
                is_float = true;
                acc_f = f_f(acc_f, n);
            }
        }
    }
    Ok(if is_float { Value::Float(acc_f) } else { Value::Int(acc_i) })
}

pub fn builtin_add(args: &[Value]) -> Result<Value, EvalError> {
    fold("+", args, 0, |a, b| a + b, |a, b| a + b)
}

pub fn builtin_mul(args: &[Value]) -> Result<Value, EvalError> {
    fold("*", args, 1, |a, b| a * b, |a, b| a * b)
}

pub fn builtin_sub(args: &[Value]) -> Result<Value, EvalError> {
    if args.is_empty() {
        return Err(EvalError::arity_error("-", "at least 1", 0));
    }
    if args.len() == 1 {
        return match as_num("-", &args[0], 0)? {
            Num::Int(n) => Ok(Value::Int(-n)),
            Num::Float(n) => Ok(Value::Float(-n)),
        };
    }
    let mut is_float = false;
    let mut acc_i = match as_num("-", &args[0], 0)? {
        Num::Int(n) => n,
        Num::Float(_) => {
            is_float = true;
            0
        }
    };
    let mut acc_f = args[0].as_f64().unwrap();
    for (i, arg) in args[1..].iter().enumerate() {
        match as_num("-", arg, i + 1)? {
            Num::Int(n) => {
                acc_i -= n;
                acc_f -= n as f64;
            }
            Num::Float(n) => {
                is_float = true;
                acc_f -= n;
            }
        }
    }
    Ok(if is_float { Value::Float(acc_f) } else { Value::Int(acc_i) })
}

pub fn builtin_div(args: &[Value]) -> Result<Value, EvalError> {
    if args.is_empty() {
        return Err(EvalError::arity_error("/", "at least 1", 0));
    }
    let mut acc = match args.len() {
        1 => 1.0,
        _ => args[0].as_f64().ok_or_else(|| {
            EvalError::type_error("/", "number", &args[0], 0)
        })?,
    };
    let rest = if args.len() == 1 { &args[..] } else { &args[1..] };
    for (i, arg) in rest.iter().enumerate() {
        let n = arg
            .as_f64()
            .ok_or_else(|| EvalError::type_error("/", "number", arg, i))?;
        if n == 0.0 {
            return Err(EvalError::runtime_error("/", "division by zero"));
        }
        acc /= n;
    }
    if acc.fract() == 0.0 && args.iter().all(|a| matches!(a, Value::Int(_))) {
        Ok(Value::Int(acc as i64))
    } else {
        Ok(Value::Float(acc))
    }
}

pub fn builtin_mod(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(EvalError::arity_error("%", "2", args.len()));
    }
    match (&args[0], &args[1]) {
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Err(EvalError::runtime_error("%", "division by zero"));
            }
            Ok(Value::Int(a % b))
        }
        _ => {
            let a = args[0]
                .as_f64()
                .ok_or_else(|| EvalError::type_error("%", "number", &args[0], 0))?;
            let b = args[1]
                .as_f64()
                .ok_or_else(|| EvalError::type_error("%", "number", &args[1], 1))?;
            if b == 0.0 {
                return Err(EvalError::runtime_error("%", "division by zero"));
            }
            Ok(Value::Float(a % b))
        }
    }
}

fn int_arg(op: &str, v: &Value, position: usize) -> Result<i64, EvalError> {
    match v {
        Value::Int(n) => Ok(*n),
        other => Err(EvalError::type_error(op, "int", other, position)),
    }
}

/// Integer division truncated toward zero, rejecting float operands —
/// unlike `%`, which promotes to float.
pub fn builtin_quot(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(EvalError::arity_error("quot", "2", args.len()));
    }
    let a = int_arg("quot", &args[0], 0)?;
    let b = int_arg("quot", &args[1], 1)?;
    if b == 0 {
        return Err(EvalError::runtime_error("quot", "division by zero"));
    }
    Ok(Value::Int(a / b))
}

/// Integer remainder, sign-of-dividend, rejecting float operands.
pub fn builtin_rem(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(EvalError::arity_error("rem", "2", args.len()));
    }
    let a = int_arg("rem", &args[0], 0)?;
    let b = int_arg("rem", &args[1], 1)?;
    if b == 0 {
        return Err(EvalError::runtime_error("rem", "division by zero"));
    }
    Ok(Value::Int(a % b))
}

pub fn register(env: &Arc<Environment>) {
    env.define("+", Value::BuiltIn(builtin_add));
    env.define("-", Value::BuiltIn(builtin_sub));
    env.define("*", Value::BuiltIn(builtin_mul));
    env.define("/", Value::BuiltIn(builtin_div));
    env.define("%", Value::BuiltIn(builtin_mod));
    env.define("quot", Value::BuiltIn(builtin_quot));
    env.define("rem", Value::BuiltIn(builtin_rem));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_stays_int_when_all_operands_are_int() {
        assert_eq!(builtin_add(&[Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(3));
    }

    #[test]
    fn add_promotes_to_float_on_any_float_operand() {
        assert_eq!(builtin_add(&[Value::Int(1), Value::Float(2.5)]).unwrap(), Value::Float(3.5));
    }

    #[test]
    fn sub_single_arg_negates() {
        assert_eq!(builtin_sub(&[Value::Int(5)]).unwrap(), Value::Int(-5));
    }

    #[test]
    fn div_by_zero_is_an_error() {
        assert!(builtin_div(&[Value::Int(1), Value::Int(0)]).is_err());
    }

    #[test]
    fn mod_on_ints_stays_int() {
        assert_eq!(builtin_mod(&[Value::Int(17), Value::Int(5)]).unwrap(), Value::Int(2));
    }

    #[test]
    fn quot_truncates_toward_zero() {
        assert_eq!(builtin_quot(&[Value::Int(-7), Value::Int(2)]).unwrap(), Value::Int(-3));
    }

    #[test]
    fn rem_rejects_float_operands() {
        assert!(builtin_rem(&[Value::Float(7.0), Value::Int(2)]).is_err());
    }
}
