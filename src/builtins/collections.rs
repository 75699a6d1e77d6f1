// ABOUTME: Collection builtins over vectors, maps, and sets

use crate::env::Environment;
use crate::error::EvalError;
use crate::value::{OrderedMap, OrderedSet, Value};
use std::sync::Arc;

fn as_vector<'a>(op: &str, v: &'a Value, position: usize) -> Result<&'a [Value], EvalError> {
    match v {
        Value::Vector(items) => Ok(items),
        other => Err(EvalError::type_error(op, "vector", other, position)),
    }
}

fn as_map<'a>(op: &str, v: &'a Value, position: usize) -> Result<&'a OrderedMap, EvalError> {
    match v {
        Value::Map(m) => Ok(m),
        other => Err(EvalError::type_error(op, "map", other, position)),
    }
}

pub fn builtin_first(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::arity_error("first", "1", args.len()));
    }
    Ok(as_vector("first", &args[0], 0)?.first().cloned().unwrap_or(Value::Nil))
}

pub fn builtin_rest(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::arity_error("rest", "1", args.len()));
    }
    let items = as_vector("rest", &args[0], 0)?;
    Ok(Value::vector(items.get(1..).map(|s| s.to_vec()).unwrap_or_default()))
}

pub fn builtin_nth(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(EvalError::arity_error("nth", "2", args.len()));
    }
    let items = as_vector("nth", &args[0], 0)?;
    let idx = args[1]
        .as_int()
        .ok_or_else(|| EvalError::type_error("nth", "int", &args[1], 1))?;
    if idx < 0 {
        return Ok(Value::Nil);
    }
    Ok(items.get(idx as usize).cloned().unwrap_or(Value::Nil))
}

pub fn builtin_conj(args: &[Value]) -> Result<Value, EvalError> {
    if args.is_empty() {
        return Err(EvalError::arity_error("conj", "at least 1", 0));
    }
    match &args[0] {
        Value::Vector(items) => {
            let mut out = items.to_vec();
            out.extend(args[1..].iter().cloned());
            Ok(Value::vector(out))
        }
        Value::Set(set) => {
            let mut out = (**set).clone();
            for item in &args[1..] {
                out.insert(item.clone());
            }
            Ok(Value::set(out))
        }
        other => Err(EvalError::type_error("conj", "vector or set", other, 0)),
    }
}

pub fn builtin_count(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::arity_error("count", "1", args.len()));
    }
    let n = match &args[0] {
        Value::Vector(items) => items.len(),
        Value::Set(set) => set.len(),
        Value::Map(map) => map.len(),
        Value::String(s) => s.chars().count(),
        Value::Nil => 0,
        other => return Err(EvalError::type_error("count", "collection", other, 0)),
    };
    Ok(Value::Int(n as i64))
}

pub fn builtin_empty_p(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::arity_error("empty?", "1", args.len()));
    }
    let empty = match &args[0] {
        Value::Vector(items) => items.is_empty(),
        Value::Set(set) => set.is_empty(),
        Value::Map(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Nil => true,
        other => return Err(EvalError::type_error("empty?", "collection", other, 0)),
    };
    Ok(Value::Bool(empty))
}

pub fn builtin_reverse(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::arity_error("reverse", "1", args.len()));
    }
    let mut items = as_vector("reverse", &args[0], 0)?.to_vec();
    items.reverse();
    Ok(Value::vector(items))
}

pub fn builtin_concat(args: &[Value]) -> Result<Value, EvalError> {
    let mut out = Vec::new();
    for (i, arg) in args.iter().enumerate() {
        out.extend(as_vector("concat", arg, i)?.iter().cloned());
    }
    Ok(Value::vector(out))
}

pub fn builtin_sort(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::arity_error("sort", "1", args.len()));
    }
    let mut items = as_vector("sort", &args[0], 0)?.to_vec();
    items.sort_by(|a, b| match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => match (a, b) {
            (Value::String(x), Value::String(y)) => x.cmp(y),
            _ => std::cmp::Ordering::Equal,
        },
    });
    Ok(Value::vector(items))
}

pub fn builtin_get(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() < 2 || args.len() > 3 {
        return Err(EvalError::arity_error("get", "2-3", args.len()));
    }
    let default = args.get(2).cloned().unwrap_or(Value::Nil);
    match &args[0] {
        Value::Map(map) => Ok(map.get(&args[1]).cloned().unwrap_or(default)),
        Value::Vector(items) => match args[1].as_int() {
            Some(idx) if idx >= 0 => Ok(items.get(idx as usize).cloned().unwrap_or(default)),
            _ => Ok(default),
        },
        Value::Nil => Ok(default),
        other => Err(EvalError::type_error("get", "map or vector", other, 0)),
    }
}

pub fn builtin_assoc(args: &[Value]) -> Result<Value, EvalError> {
    if args.is_empty() || (args.len() - 1) % 2 != 0 {
        return Err(EvalError::runtime_error("assoc", "expects a map/vector and key-value pairs"));
    }
    match &args[0] {
        Value::Map(map) => {
            let mut out = (**map).clone();
            let mut i = 1;
            while i + 1 < args.len() {
                out.insert(args[i].clone(), args[i + 1].clone());
                i += 2;
            }
            Ok(Value::map(out))
        }
        Value::Vector(items) => {
            let mut out = items.to_vec();
            let mut i = 1;
            while i + 1 < args.len() {
                let idx = args[i]
                    .as_int()
                    .ok_or_else(|| EvalError::type_error("assoc", "int", &args[i], i))?;
                if idx < 0 || idx as usize > out.len() {
                    return Err(EvalError::runtime_error("assoc", "index out of bounds"));
                }
                if idx as usize == out.len() {
                    out.push(args[i + 1].clone());
                } else {
                    out[idx as usize] = args[i + 1].clone();
                }
                i += 2;
            }
            Ok(Value::vector(out))
        }
        other => Err(EvalError::type_error("assoc", "map or vector", other, 0)),
    }
}

pub fn builtin_dissoc(args: &[Value]) -> Result<Value, EvalError> {
    if args.is_empty() {
        return Err(EvalError::arity_error("dissoc", "at least 1", 0));
    }
    let mut map = as_map("dissoc", &args[0], 0)?.clone();
    for key in &args[1..] {
        map.remove(key);
    }
    Ok(Value::map(map))
}

pub fn builtin_keys(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::arity_error("keys", "1", args.len()));
    }
    let map = as_map("keys", &args[0], 0)?;
    Ok(Value::vector(map.keys().cloned().collect()))
}

pub fn builtin_vals(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::arity_error("vals", "1", args.len()));
    }
    let map = as_map("vals", &args[0], 0)?;
    Ok(Value::vector(map.values().cloned().collect()))
}

pub fn builtin_contains_p(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(EvalError::arity_error("contains?", "2", args.len()));
    }
    let found = match &args[0] {
        Value::Map(map) => map.get(&args[1]).is_some(),
        Value::Set(set) => set.contains(&args[1]),
        Value::Vector(items) => match args[1].as_int() {
            Some(idx) => idx >= 0 && (idx as usize) < items.len(),
            None => false,
        },
        other => return Err(EvalError::type_error("contains?", "collection", other, 0)),
    };
    Ok(Value::Bool(found))
}

pub fn builtin_merge(args: &[Value]) -> Result<Value, EvalError> {
    let mut out = OrderedMap::new();
    for (i, arg) in args.iter().enumerate() {
        let map = as_map("merge", arg, i)?;
        for (k, v) in map.iter() {
            out.insert(k.clone(), v.clone());
        }
    }
    Ok(Value::map(out))
}

pub fn builtin_set_new(args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::set(OrderedSet::from_items(args.to_vec())))
}

pub fn builtin_distinct(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 1 {
        return Err(EvalError::arity_error("distinct", "1", args.len()));
    }
    let items = as_vector("distinct", &args[0], 0)?;
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    Ok(Value::vector(out))
}

pub fn builtin_take(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(EvalError::arity_error("take", "2", args.len()));
    }
    let n = args[0]
        .as_int()
        .ok_or_else(|| EvalError::type_error("take", "int", &args[0], 0))?
        .max(0) as usize;
    let items = as_vector("take", &args[1], 1)?;
    Ok(Value::vector(items.iter().take(n).cloned().collect()))
}

pub fn builtin_drop(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(EvalError::arity_error("drop", "2", args.len()));
    }
    let n = args[0]
        .as_int()
        .ok_or_else(|| EvalError::type_error("drop", "int", &args[0], 0))?
        .max(0) as usize;
    let items = as_vector("drop", &args[1], 1)?;
    Ok(Value::vector(items.iter().skip(n).cloned().collect()))
}

pub fn builtin_partition(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(EvalError::arity_error("partition", "2", args.len()));
    }
    let n = args[0]
        .as_int()
        .ok_or_else(|| EvalError::type_error("partition", "int", &args[0], 0))?;
    if n <= 0 {
        return Err(EvalError::runtime_error("partition", "chunk size must be positive"));
    }
    let n = n as usize;
    let items = as_vector("partition", &args[1], 1)?;
    let chunks = items.chunks_exact(n).map(|c| Value::vector(c.to_vec())).collect();
    Ok(Value::vector(chunks))
}

pub fn builtin_zipmap(args: &[Value]) -> Result<Value, EvalError> {
    if args.len() != 2 {
        return Err(EvalError::arity_error("zipmap", "2", args.len()));
    }
    let keys = as_vector("zipmap", &args[0], 0)?;
    let vals = as_vector("zipmap", &args[1], 1)?;
    let mut map = OrderedMap::new();
    for (k, v) in keys.iter().zip(vals.iter()) {
        map.insert(k.clone(), v.clone());
    }
    Ok(Value::map(map))
}

pub fn register(env: &Arc<Environment>) {
    env.define("first", Value::BuiltIn(builtin_first));
    env.define("rest", Value::BuiltIn(builtin_rest));
    env.define("nth", Value::BuiltIn(builtin_nth));
    env.define("conj", Value::BuiltIn(builtin_conj));
    env.define("count", Value::BuiltIn(builtin_count));
    env.define("empty?", Value::BuiltIn(builtin_empty_p));
    env.define("reverse", Value::BuiltIn(builtin_reverse));
    env.define("concat", Value::BuiltIn(builtin_concat));
    env.define("sort", Value::BuiltIn(builtin_sort));
    env.define("get", Value::BuiltIn(builtin_get));
    env.define("assoc", Value::BuiltIn(builtin_assoc));
    env.define("dissoc", Value::BuiltIn(builtin_dissoc));
    env.define("keys", Value::BuiltIn(builtin_keys));
    env.define("vals", Value::BuiltIn(builtin_vals));
    env.define("contains?", Value::BuiltIn(builtin_contains_p));
    env.define("merge", Value::BuiltIn(builtin_merge));
    env.define("set", Value::BuiltIn(builtin_set_new));
    env.define("distinct", Value::BuiltIn(builtin_distinct));
    env.define("take", Value::BuiltIn(builtin_take));
    env.define("drop", Value::BuiltIn(builtin_drop));
    env.define("partition", Value::BuiltIn(builtin_partition));
    env.define("zipmap", Value::BuiltIn(builtin_zipmap));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_and_rest_split_a_vector() {
        let v = Value::vector(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(builtin_first(&[v.clone()]).unwrap(), Value::Int(1));
        assert_eq!(
            builtin_rest(&[v]).unwrap(),
            Value::vector(vec![Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn get_returns_default_for_missing_key() {
        let map = Value::map(OrderedMap::new());
        assert_eq!(
            builtin_get(&[map, Value::keyword("missing"), Value::Int(0)]).unwrap(),
            Value::Int(0)
        );
    }

    #[test]
    fn assoc_is_immutable_extension() {
        let mut m = OrderedMap::new();
        m.insert(Value::keyword("a"), Value::Int(1));
        let result = builtin_assoc(&[Value::map(m), Value::keyword("b"), Value::Int(2)]).unwrap();
        match result {
            Value::Map(m) => {
                assert_eq!(m.get(&Value::keyword("a")), Some(&Value::Int(1)));
                assert_eq!(m.get(&Value::keyword("b")), Some(&Value::Int(2)));
            }
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn count_handles_nil_as_empty() {
        assert_eq!(builtin_count(&[Value::Nil]).unwrap(), Value::Int(0));
    }

    #[test]
    fn distinct_keeps_first_occurrence_order() {
        let v = Value::vector(vec![Value::Int(1), Value::Int(2), Value::Int(1), Value::Int(3)]);
        assert_eq!(
            builtin_distinct(&[v]).unwrap(),
            Value::vector(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn partition_drops_a_trailing_incomplete_chunk() {
        let v = Value::vector((1..=5).map(Value::Int).collect());
        let result = builtin_partition(&[Value::Int(2), v]).unwrap();
        assert_eq!(
            result,
            Value::vector(vec![
                Value::vector(vec![Value::Int(1), Value::Int(2)]),
                Value::vector(vec![Value::Int(3), Value::Int(4)]),
            ])
        );
    }

    #[test]
    fn zipmap_pairs_keys_with_values_positionally() {
        let keys = Value::vector(vec![Value::keyword("a"), Value::keyword("b")]);
        let vals = Value::vector(vec![Value::Int(1), Value::Int(2)]);
        let result = builtin_zipmap(&[keys, vals]).unwrap();
        match result {
            Value::Map(m) => assert_eq!(m.get(&Value::keyword("b")), Some(&Value::Int(2))),
            other => panic!("expected map, got {:?}", other),
        }
    }
}
