// ABOUTME: Tree-walking evaluator for PTC-Lisp: special forms, application, and HOFs

use crate::ast::{ast_to_literal_value, Ast};
use crate::destructure::{bind_pattern, fixed_arity, pattern_is_variadic};
use crate::env::Environment;
use crate::error::EvalError;
use crate::value::{Accountant, Closure, NativeFn, OrderedMap, OrderedSet, Symbol, Value};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Anything the evaluator needs to dispatch a `tool/name` call. Implemented
/// by [`crate::sandbox::Sandbox`]; kept as a trait so the evaluator itself
/// has no dependency on the sandbox's caching/telemetry machinery.
pub trait ToolDispatcher: Send + Sync {
    fn call(&self, name: &str, args: Value) -> Result<Value, EvalError>;
}

/// A dispatcher that rejects every tool call, for evaluating plain
/// PTC-Lisp with no host tools registered.
pub struct NoTools;
impl ToolDispatcher for NoTools {
    fn call(&self, name: &str, _args: Value) -> Result<Value, EvalError> {
        Err(EvalError::UnknownTool(name.to_string()))
    }
}

/// Resources threaded through every recursive evaluation call: the heap
/// accountant, a wall-clock deadline, and the tool dispatcher.
pub struct EvalContext<'a> {
    pub accountant: &'a Accountant,
    pub deadline: Option<Instant>,
    pub tools: &'a dyn ToolDispatcher,
    /// Deadline budget handed to each `pmap`/`pcalls` fan-out, separate from
    /// `deadline` — a branch gets `min(deadline, now + pmap_timeout)`.
    pub pmap_timeout: Duration,
}

impl EvalContext<'_> {
    fn check_deadline(&self) -> Result<(), EvalError> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(EvalError::Timeout);
            }
        }
        Ok(())
    }

    fn charge(&self, value: &Value) -> Result<(), EvalError> {
        self.accountant.charge(Accountant::cost_of(value))
    }
}

/// Evaluate a single top-level form in `env`, looping to support tail
/// calls in `if`/`do`/`let`/application without growing the Rust stack.
pub fn eval(ast: &Ast, env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let mut ast = ast.clone();
    let mut env = env.clone();

    loop {
        ctx.check_deadline()?;

        match &ast {
            Ast::Nil(_) => return Ok(Value::Nil),
            Ast::Bool(b, _) => return Ok(Value::Bool(*b)),
            Ast::Int(n, _) => return Ok(Value::Int(*n)),
            Ast::Float(n, _) => return Ok(Value::Float(*n)),
            Ast::String(s, _) => return Ok(Value::String(s.clone())),
            Ast::Keyword(sym, _) => return Ok(Value::Keyword(sym.clone())),
            Ast::Symbol(sym, _) => return env.lookup(sym),
            Ast::Vector(items, _) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(eval(item, &env, ctx)?);
                }
                let value = Value::vector(out);
                ctx.charge(&value)?;
                return Ok(value);
            }
            Ast::Set(items, _) => {
                let mut set = OrderedSet::new();
                for item in items {
                    set.insert(eval(item, &env, ctx)?);
                }
                let value = Value::set(set);
                ctx.charge(&value)?;
                return Ok(value);
            }
            Ast::Map(pairs, _) => {
                let mut map = OrderedMap::new();
                for (k, v) in pairs {
                    map.insert(eval(k, &env, ctx)?, eval(v, &env, ctx)?);
                }
                let value = Value::map(map);
                ctx.charge(&value)?;
                return Ok(value);
            }
            Ast::List(items, span) => {
                if items.is_empty() {
                    return Ok(Value::vector(Vec::new()));
                }
                let head = items[0].head_symbol().cloned();

                if let Some(sym) = &head {
                    if sym.ns.is_none() {
                        match sym.name.as_ref() {
                            "quote" => {
                                return Ok(ast_to_literal_value(&items[1]));
                            }
                            "if" => {
                                let cond = eval(&items[1], &env, ctx)?;
                                ast = if cond.is_truthy() { items[2].clone() } else { items[3].clone() };
                                continue;
                            }
                            "do" => {
                                if items.len() == 1 {
                                    return Ok(Value::Nil);
                                }
                                for item in &items[1..items.len() - 1] {
                                    eval(item, &env, ctx)?;
                                }
                                ast = items[items.len() - 1].clone();
                                continue;
                            }
                            "def" => {
                                let name = match &items[1] {
                                    Ast::Symbol(sym, _) => sym.clone(),
                                    other => {
                                        return Err(EvalError::runtime_error(
                                            "def",
                                            format!("expected a symbol, got {:?}", other),
                                        ))
                                    }
                                };
                                let value = eval(&items[2], &env, ctx)?;
                                env.define_symbol(&name, value.clone());
                                return Ok(value);
                            }
                            "fn" => {
                                return make_closure(None, items, &env);
                            }
                            "defn" => {
                                let name = match &items[1] {
                                    Ast::Symbol(sym, _) => sym.clone(),
                                    other => {
                                        return Err(EvalError::runtime_error(
                                            "defn",
                                            format!("expected a symbol, got {:?}", other),
                                        ))
                                    }
                                };
                                let rest = &items[1..];
                                let closure = make_closure(Some(name.clone()), rest, &env)?;
                                env.define_symbol(&name, closure.clone());
                                return Ok(closure);
                            }
                            "let" | "let*" => {
                                let bindings = items[1].as_list_or_vector().ok_or_else(|| {
                                    EvalError::runtime_error("let", "bindings must be a vector")
                                })?;
                                let scope = Environment::with_parent(env.clone());
                                let mut i = 0;
                                while i < bindings.len() {
                                    let pattern = &bindings[i];
                                    let value = eval(&bindings[i + 1], &scope, ctx)?;
                                    bind_pattern(&scope, pattern, &value)?;
                                    i += 2;
                                }
                                if items.len() == 2 {
                                    return Ok(Value::Nil);
                                }
                                for item in &items[2..items.len() - 1] {
                                    eval(item, &scope, ctx)?;
                                }
                                ast = items[items.len() - 1].clone();
                                env = scope;
                                continue;
                            }
                            "cond" => {
                                let clauses = &items[1..];
                                let mut i = 0;
                                while i + 1 < clauses.len() {
                                    let test = eval(&clauses[i], &env, ctx)?;
                                    if test.is_truthy() {
                                        ast = clauses[i + 1].clone();
                                        break;
                                    }
                                    i += 2;
                                }
                                if i + 1 >= clauses.len() {
                                    return Ok(Value::Nil);
                                }
                                continue;
                            }
                            "when" => {
                                let cond = eval(&items[1], &env, ctx)?;
                                if !cond.is_truthy() {
                                    return Ok(Value::Nil);
                                }
                                if items.len() == 2 {
                                    return Ok(Value::Nil);
                                }
                                for item in &items[2..items.len() - 1] {
                                    eval(item, &env, ctx)?;
                                }
                                ast = items[items.len() - 1].clone();
                                continue;
                            }
                            "when-not" => {
                                let cond = eval(&items[1], &env, ctx)?;
                                if cond.is_truthy() {
                                    return Ok(Value::Nil);
                                }
                                if items.len() == 2 {
                                    return Ok(Value::Nil);
                                }
                                for item in &items[2..items.len() - 1] {
                                    eval(item, &env, ctx)?;
                                }
                                ast = items[items.len() - 1].clone();
                                continue;
                            }
                            "and" => {
                                let mut result = Value::Bool(true);
                                for item in &items[1..] {
                                    result = eval(item, &env, ctx)?;
                                    if !result.is_truthy() {
                                        return Ok(result);
                                    }
                                }
                                return Ok(result);
                            }
                            "or" => {
                                for item in &items[1..] {
                                    let result = eval(item, &env, ctx)?;
                                    if result.is_truthy() {
                                        return Ok(result);
                                    }
                                }
                                return Ok(Value::Bool(false));
                            }
                            "return" => {
                                let value = match items.get(1) {
                                    Some(expr) => eval(expr, &env, ctx)?,
                                    None => Value::Nil,
                                };
                                return Err(EvalError::Return(Box::new(value)));
                            }
                            "fail" => {
                                let value = match items.get(1) {
                                    Some(expr) => eval(expr, &env, ctx)?,
                                    None => Value::Nil,
                                };
                                return Err(EvalError::Fail(Box::new(value)));
                            }
                            "->>" => {
                                let mut expanded = items[1].clone();
                                for step in &items[2..] {
                                    expanded = thread_last(expanded, step);
                                }
                                ast = expanded;
                                continue;
                            }
                            "->" => {
                                let mut expanded = items[1].clone();
                                for step in &items[2..] {
                                    expanded = thread_first(expanded, step);
                                }
                                ast = expanded;
                                continue;
                            }
                            "for" => return eval_for(items, &env, ctx),
                            "doseq" => return eval_doseq(items, &env, ctx),
                            "try" => return eval_try(items, &env, ctx),
                            "map" => return eval_map(items, &env, ctx),
                            "filter" => return eval_filter(items, &env, ctx),
                            "reduce" => return eval_reduce(items, &env, ctx),
                            "some" => return eval_some(items, &env, ctx),
                            "every?" => return eval_every(items, &env, ctx),
                            "apply" => return eval_apply(items, &env, ctx),
                            "pmap" => return eval_pmap(items, &env, ctx),
                            "pcalls" => return eval_pcalls(items, &env, ctx),
                            "where" => return eval_where(items, &env, ctx),
                            "sort-by" => return eval_sort_by(items, &env, ctx),
                            "group-by" => return eval_group_by(items, &env, ctx),
                            "take-while" => return eval_take_while(items, &env, ctx),
                            "drop-while" => return eval_drop_while(items, &env, ctx),
                            "pluck" => return eval_pluck(items, &env, ctx),
                            "sum-by" => return eval_aggregate_by(items, &env, ctx, Aggregate::Sum),
                            "avg-by" => return eval_aggregate_by(items, &env, ctx, Aggregate::Avg),
                            "min-by" => return eval_aggregate_by(items, &env, ctx, Aggregate::Min),
                            "max-by" => return eval_aggregate_by(items, &env, ctx, Aggregate::Max),
                            _ => {}
                        }
                    }

                    if sym.ns.as_deref() == Some("tool") {
                        let arg = match items.get(1) {
                            Some(a) => eval(a, &env, ctx)?,
                            None => Value::map(OrderedMap::new()),
                        };
                        let result = ctx.tools.call(&sym.name, arg)?;
                        ctx.charge(&result)?;
                        return Ok(result);
                    }
                }

                // Ordinary function application: evaluate head then args.
                let callee = eval(&items[0], &env, ctx)?;
                let mut args = Vec::with_capacity(items.len() - 1);
                for item in &items[1..] {
                    args.push(eval(item, &env, ctx)?);
                }

                match callee {
                    Value::BuiltIn(f) => return f(&args),
                    Value::Native(f) => return (*f.0)(&args),
                    Value::Closure(closure) => {
                        let scope = bind_call(&closure, &args)?;
                        if closure.body.is_empty() {
                            return Ok(Value::Nil);
                        }
                        for item in &closure.body[..closure.body.len() - 1] {
                            eval(item, &scope, ctx)?;
                        }
                        ast = closure.body[closure.body.len() - 1].clone();
                        env = scope;
                        continue;
                    }
                    other => return Err(EvalError::NotCallable(format!("{} at {:?}", other, span))),
                }
            }
        }
    }
}

/// `(->> acc (f a))` becomes `(f a acc)`; a bare non-list step `f` becomes
/// `(f acc)`. Used to desugar the `->>` (thread-last) macro one step at a
/// time before evaluating the rebuilt form.
fn thread_last(acc: Ast, step: &Ast) -> Ast {
    let span = step.span();
    match step {
        Ast::List(call, _) => {
            let mut rebuilt = call.clone();
            rebuilt.push(acc);
            Ast::List(rebuilt, span)
        }
        other => Ast::List(vec![other.clone(), acc], span),
    }
}

/// `(-> acc (f a))` becomes `(f acc a)`; a bare non-list step `f` becomes
/// `(f acc)`. Thread-first counterpart of [`thread_last`].
fn thread_first(acc: Ast, step: &Ast) -> Ast {
    let span = step.span();
    match step {
        Ast::List(call, _) => {
            let mut rebuilt = Vec::with_capacity(call.len() + 1);
            rebuilt.push(call[0].clone());
            rebuilt.push(acc);
            rebuilt.extend_from_slice(&call[1..]);
            Ast::List(rebuilt, span)
        }
        other => Ast::List(vec![other.clone(), acc], span),
    }
}

fn make_closure(
    name: Option<Symbol>,
    items: &[Ast],
    env: &Arc<Environment>,
) -> Result<Value, EvalError> {
    let params = items
        .get(1)
        .cloned()
        .ok_or_else(|| EvalError::runtime_error("fn", "missing parameter vector"))?;
    let body: Vec<Ast> = items[2..].to_vec();
    Ok(Value::Closure(Arc::new(Closure {
        name: name.map(|s| s.to_string().into()),
        params: Arc::new(params),
        body: body.into(),
        env: env.clone(),
    })))
}

fn bind_call(closure: &Closure, args: &[Value]) -> Result<Arc<Environment>, EvalError> {
    let scope = Environment::with_parent(closure.env.clone());
    let params = match closure.params.as_ref() {
        Ast::Vector(params, _) => params.clone(),
        other => {
            return Err(EvalError::runtime_error(
                "apply",
                format!("malformed parameter list: {:?}", other),
            ))
        }
    };

    let min_arity = fixed_arity(&params);
    let variadic = pattern_is_variadic(&params);
    let fn_name = closure.name.as_deref().unwrap_or("fn");
    if variadic {
        if args.len() < min_arity {
            return Err(EvalError::arity_error(
                fn_name,
                format!("at least {}", min_arity),
                args.len(),
            ));
        }
    } else if args.len() != min_arity {
        return Err(EvalError::arity_error(
            fn_name,
            min_arity.to_string(),
            args.len(),
        ));
    }

    let mut idx = 0;
    let mut i = 0;
    while i < params.len() {
        if let Ast::Symbol(sym, _) = &params[i] {
            if &*sym.name == "&" {
                let rest = args.get(idx..).map(|s| s.to_vec()).unwrap_or_default();
                if let Some(rest_pattern) = params.get(i + 1) {
                    bind_pattern(&scope, rest_pattern, &Value::vector(rest))?;
                }
                break;
            }
        }
        let value = args.get(idx).cloned().unwrap_or(Value::Nil);
        bind_pattern(&scope, &params[i], &value)?;
        idx += 1;
        i += 1;
    }
    Ok(scope)
}

/// Apply any callable `Value` (closure, builtin, or `tool/name` handle) to
/// already-evaluated arguments. Used by higher-order forms (`map`,
/// `filter`, `reduce`, `pmap`, ...) that receive a function value at
/// runtime rather than syntax.
pub fn apply(callee: &Value, args: &[Value], ctx: &EvalContext) -> Result<Value, EvalError> {
    match callee {
        Value::BuiltIn(f) => f(args),
        Value::Native(f) => (*f.0)(args),
        Value::Closure(closure) => {
            let scope = bind_call(closure, args)?;
            let mut result = Value::Nil;
            for item in closure.body.iter() {
                result = eval(item, &scope, ctx)?;
            }
            Ok(result)
        }
        Value::Tool(handle) => {
            let arg = args
                .first()
                .cloned()
                .unwrap_or(Value::map(OrderedMap::new()));
            ctx.tools.call(&handle.name, arg)
        }
        other => Err(EvalError::NotCallable(other.to_string())),
    }
}

fn eval_for(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let clauses = items[1]
        .as_list_or_vector()
        .ok_or_else(|| EvalError::runtime_error("for", "binding form must be a vector"))?;
    let body = &items[2..];
    let mut out = Vec::new();
    for_step(clauses, env, ctx, body, &mut out)?;
    let value = Value::vector(out);
    ctx.charge(&value)?;
    Ok(value)
}

/// `for`'s side-effecting counterpart: same binding/modifier walk, but the
/// body's results are discarded rather than collected, and the form always
/// evaluates to `nil`.
fn eval_doseq(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let clauses = items[1]
        .as_list_or_vector()
        .ok_or_else(|| EvalError::runtime_error("doseq", "binding form must be a vector"))?;
    let body = &items[2..];
    let mut out = Vec::new();
    for_step(clauses, env, ctx, body, &mut out)?;
    Ok(Value::Nil)
}

/// Walks a `for` binding vector left to right, expanding `pattern seq`
/// pairs into nested cartesian iteration and applying `:let`/`:when`/
/// `:while` modifiers in the order they appear. Returns `false` once a
/// `:while` guard fails, signalling the nearest enclosing loop to stop
/// iterating (the spec's "modifiers applied left-to-right").
fn for_step(
    clauses: &[Ast],
    env: &Arc<Environment>,
    ctx: &EvalContext,
    body: &[Ast],
    out: &mut Vec<Value>,
) -> Result<bool, EvalError> {
    if clauses.is_empty() {
        let mut result = Value::Nil;
        for form in body {
            result = eval(form, env, ctx)?;
        }
        out.push(result);
        return Ok(true);
    }

    if let Ast::Keyword(sym, _) = &clauses[0] {
        let rest = &clauses[2..];
        match sym.name.as_ref() {
            "let" => {
                let let_bindings = clauses[1]
                    .as_list_or_vector()
                    .ok_or_else(|| EvalError::runtime_error("for", ":let expects a binding vector"))?;
                let scope = Environment::with_parent(env.clone());
                let mut i = 0;
                while i < let_bindings.len() {
                    let value = eval(&let_bindings[i + 1], &scope, ctx)?;
                    bind_pattern(&scope, &let_bindings[i], &value)?;
                    i += 2;
                }
                return for_step(rest, &scope, ctx, body, out);
            }
            "when" => {
                let test = eval(&clauses[1], env, ctx)?;
                return if test.is_truthy() { for_step(rest, env, ctx, body, out) } else { Ok(true) };
            }
            "while" => {
                let test = eval(&clauses[1], env, ctx)?;
                if !test.is_truthy() {
                    return Ok(false);
                }
                return for_step(rest, env, ctx, body, out);
            }
            other => {
                return Err(EvalError::runtime_error("for", format!("unknown `for` modifier :{other}")));
            }
        }
    }

    let pattern = &clauses[0];
    let seq_value = eval(&clauses[1], env, ctx)?;
    let rest = &clauses[2..];
    for item in as_iterable(&seq_value, "for")? {
        let scope = Environment::with_parent(env.clone());
        bind_pattern(&scope, pattern, &item)?;
        if !for_step(rest, &scope, ctx, body, out)? {
            break;
        }
    }
    Ok(true)
}

fn eval_try(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    match eval(&items[1], env, ctx) {
        Ok(value) => Ok(value),
        Err(e @ EvalError::Timeout) => Err(e),
        Err(e) => {
            let taxon = e.to_taxon();
            let mut map = OrderedMap::new();
            map.insert(
                Value::keyword("reason"),
                Value::string(format!("{:?}", taxon.reason)),
            );
            map.insert(Value::keyword("message"), Value::string(taxon.message));
            Ok(Value::map(map))
        }
    }
}

fn as_iterable(value: &Value, op: &str) -> Result<Vec<Value>, EvalError> {
    match value {
        Value::Vector(items) => Ok(items.to_vec()),
        Value::Set(set) => Ok(set.iter().cloned().collect()),
        Value::Map(map) => Ok(map
            .iter()
            .map(|(k, v)| Value::vector(vec![k.clone(), v.clone()]))
            .collect()),
        Value::Nil => Ok(Vec::new()),
        other => Err(EvalError::type_error(op, "sequence", other, 0)),
    }
}

fn eval_map(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let f = eval(&items[1], env, ctx)?;
    let seq = eval(&items[2], env, ctx)?;
    let mut out = Vec::new();
    for item in as_iterable(&seq, "map")? {
        out.push(apply(&f, &[item], ctx)?);
    }
    let value = Value::vector(out);
    ctx.charge(&value)?;
    Ok(value)
}

fn eval_filter(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let f = eval(&items[1], env, ctx)?;
    let seq = eval(&items[2], env, ctx)?;
    let mut out = Vec::new();
    for item in as_iterable(&seq, "filter")? {
        if apply(&f, &[item.clone()], ctx)?.is_truthy() {
            out.push(item);
        }
    }
    let value = Value::vector(out);
    ctx.charge(&value)?;
    Ok(value)
}

fn eval_reduce(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let f = eval(&items[1], env, ctx)?;
    if items.len() == 4 {
        let mut acc = eval(&items[2], env, ctx)?;
        let seq = eval(&items[3], env, ctx)?;
        for item in as_iterable(&seq, "reduce")? {
            acc = apply(&f, &[acc, item], ctx)?;
        }
        Ok(acc)
    } else {
        let seq = eval(&items[2], env, ctx)?;
        let mut iter = as_iterable(&seq, "reduce")?.into_iter();
        let mut acc = iter.next().unwrap_or(Value::Nil);
        for item in iter {
            acc = apply(&f, &[acc, item], ctx)?;
        }
        Ok(acc)
    }
}

fn eval_some(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let f = eval(&items[1], env, ctx)?;
    let seq = eval(&items[2], env, ctx)?;
    for item in as_iterable(&seq, "some")? {
        let result = apply(&f, &[item], ctx)?;
        if result.is_truthy() {
            return Ok(result);
        }
    }
    Ok(Value::Nil)
}

fn eval_every(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let f = eval(&items[1], env, ctx)?;
    let seq = eval(&items[2], env, ctx)?;
    for item in as_iterable(&seq, "every?")? {
        if !apply(&f, &[item], ctx)?.is_truthy() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

/// Looks up `field` on a record, per the `(where :field ...)`/`sort-by`/
/// `group-by`/`pluck`/`*-by` family's "selector" convention: a bare keyword
/// is a field accessor, anything else is applied as a function.
fn field_of(op: &str, item: &Value, field: &Symbol) -> Result<Value, EvalError> {
    match item {
        Value::Map(m) => Ok(m.get(&Value::Keyword(field.clone())).cloned().unwrap_or(Value::Nil)),
        other => Err(EvalError::type_error(op, "map", other, 0)),
    }
}

fn select(op: &str, selector: &Value, item: &Value, ctx: &EvalContext) -> Result<Value, EvalError> {
    match selector {
        Value::Keyword(k) => field_of(op, item, k),
        other => apply(other, &[item.clone()], ctx),
    }
}

fn where_compare(op: &str, value: &Value, target: &Value) -> Result<Value, EvalError> {
    let result = match op {
        "=" => *value == *target,
        "!=" => *value != *target,
        "<" | "<=" | ">" | ">=" => {
            let a = value.as_f64().ok_or_else(|| EvalError::type_error("where", "number", value, 0))?;
            let b = target.as_f64().ok_or_else(|| EvalError::type_error("where", "number", target, 1))?;
            match op {
                "<" => a < b,
                "<=" => a <= b,
                ">" => a > b,
                ">=" => a >= b,
                _ => unreachable!(),
            }
        }
        "contains" => match (value, target) {
            (Value::String(s), Value::String(needle)) => s.contains(needle.as_ref()),
            (Value::Vector(items), needle) => items.iter().any(|v| v == needle),
            (Value::Set(set), needle) => set.contains(needle),
            _ => false,
        },
        "starts-with" => match (value, target) {
            (Value::String(s), Value::String(prefix)) => s.starts_with(prefix.as_ref()),
            _ => false,
        },
        "ends-with" => match (value, target) {
            (Value::String(s), Value::String(suffix)) => s.ends_with(suffix.as_ref()),
            _ => false,
        },
        "in" => match target {
            Value::Vector(items) => items.iter().any(|v| v == value),
            Value::Set(set) => set.contains(value),
            other => return Err(EvalError::type_error("where", "vector or set", other, 1)),
        },
        other => return Err(EvalError::runtime_error("where", format!("unknown where operator {other}"))),
    };
    Ok(Value::Bool(result))
}

/// `(where :field)` / `(where :field op value)` — builds a standalone
/// predicate value, usually handed straight to `filter`. `op` is read as a
/// bare symbol rather than evaluated, so operators like `contains` that
/// aren't bound functions still work.
fn eval_where(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let field = match eval(&items[1], env, ctx)? {
        Value::Keyword(k) => k,
        other => return Err(EvalError::type_error("where", "keyword", &other, 0)),
    };

    if items.len() == 2 {
        return Ok(Value::Native(NativeFn(Arc::new(move |args: &[Value]| {
            let item = args.first().cloned().unwrap_or(Value::Nil);
            let value = field_of("where", &item, &field)?;
            Ok(Value::Bool(value.is_truthy()))
        }))));
    }

    if items.len() != 4 {
        return Err(EvalError::runtime_error(
            "where",
            "expected (where :field) or (where :field op value)",
        ));
    }

    let op = match &items[2] {
        Ast::Symbol(sym, _) => sym.name.to_string(),
        _ => {
            return Err(EvalError::runtime_error(
                "where",
                "expected a bare comparison operator as the second argument",
            ))
        }
    };
    let target = eval(&items[3], env, ctx)?;

    Ok(Value::Native(NativeFn(Arc::new(move |args: &[Value]| {
        let item = args.first().cloned().unwrap_or(Value::Nil);
        let value = field_of("where", &item, &field)?;
        where_compare(&op, &value, &target)
    }))))
}

fn eval_sort_by(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let selector = eval(&items[1], env, ctx)?;
    let seq = eval(&items[2], env, ctx)?;
    let mut keyed = Vec::new();
    for item in as_iterable(&seq, "sort-by")? {
        let key = select("sort-by", &selector, &item, ctx)?;
        keyed.push((key, item));
    }
    keyed.sort_by(|a, b| match (a.0.as_f64(), b.0.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => match (&a.0, &b.0) {
            (Value::String(x), Value::String(y)) => x.cmp(y),
            _ => std::cmp::Ordering::Equal,
        },
    });
    let value = Value::vector(keyed.into_iter().map(|(_, v)| v).collect());
    ctx.charge(&value)?;
    Ok(value)
}

fn eval_group_by(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let selector = eval(&items[1], env, ctx)?;
    let seq = eval(&items[2], env, ctx)?;
    let mut map = OrderedMap::new();
    for item in as_iterable(&seq, "group-by")? {
        let key = select("group-by", &selector, &item, ctx)?;
        let bucket = match map.get(&key) {
            Some(Value::Vector(existing)) => {
                let mut updated = existing.to_vec();
                updated.push(item);
                updated
            }
            _ => vec![item],
        };
        map.insert(key, Value::vector(bucket));
    }
    let value = Value::map(map);
    ctx.charge(&value)?;
    Ok(value)
}

fn eval_take_while(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let f = eval(&items[1], env, ctx)?;
    let seq = eval(&items[2], env, ctx)?;
    let mut out = Vec::new();
    for item in as_iterable(&seq, "take-while")? {
        if !apply(&f, &[item.clone()], ctx)?.is_truthy() {
            break;
        }
        out.push(item);
    }
    let value = Value::vector(out);
    ctx.charge(&value)?;
    Ok(value)
}

fn eval_drop_while(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let f = eval(&items[1], env, ctx)?;
    let seq = eval(&items[2], env, ctx)?;
    let all = as_iterable(&seq, "drop-while")?;
    let mut i = 0;
    while i < all.len() && apply(&f, &[all[i].clone()], ctx)?.is_truthy() {
        i += 1;
    }
    let value = Value::vector(all[i..].to_vec());
    ctx.charge(&value)?;
    Ok(value)
}

fn eval_pluck(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let selector = eval(&items[1], env, ctx)?;
    let seq = eval(&items[2], env, ctx)?;
    let mut out = Vec::new();
    for item in as_iterable(&seq, "pluck")? {
        out.push(select("pluck", &selector, &item, ctx)?);
    }
    let value = Value::vector(out);
    ctx.charge(&value)?;
    Ok(value)
}

enum Aggregate {
    Sum,
    Avg,
    Min,
    Max,
}

fn eval_aggregate_by(
    items: &[Ast],
    env: &Arc<Environment>,
    ctx: &EvalContext,
    kind: Aggregate,
) -> Result<Value, EvalError> {
    let op = match kind {
        Aggregate::Sum => "sum-by",
        Aggregate::Avg => "avg-by",
        Aggregate::Min => "min-by",
        Aggregate::Max => "max-by",
    };
    let selector = eval(&items[1], env, ctx)?;
    let seq = eval(&items[2], env, ctx)?;
    let values: Vec<f64> = as_iterable(&seq, op)?
        .iter()
        .map(|item| {
            let selected = select(op, &selector, item, ctx)?;
            selected
                .as_f64()
                .ok_or_else(|| EvalError::type_error(op, "number", &selected, 0))
        })
        .collect::<Result<_, _>>()?;

    if values.is_empty() && !matches!(kind, Aggregate::Sum) {
        return Ok(Value::Nil);
    }

    let result = match kind {
        Aggregate::Sum => values.iter().sum::<f64>(),
        Aggregate::Avg => values.iter().sum::<f64>() / values.len() as f64,
        Aggregate::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
        Aggregate::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
    };

    let value = if matches!(kind, Aggregate::Sum | Aggregate::Min | Aggregate::Max) && result.fract() == 0.0 {
        Value::Int(result as i64)
    } else {
        Value::Float(result)
    };
    ctx.charge(&value)?;
    Ok(value)
}

fn eval_apply(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let f = eval(&items[1], env, ctx)?;
    let mut args = Vec::new();
    for item in &items[2..items.len() - 1] {
        args.push(eval(item, env, ctx)?);
    }
    let last = eval(&items[items.len() - 1], env, ctx)?;
    args.extend(as_iterable(&last, "apply")?);
    apply(&f, &args, ctx)
}

/// A context for one `pmap`/`pcalls` branch: same accountant/tools, but a
/// deadline tightened to `now + pmap_timeout` when that's sooner than the
/// run's own deadline — so a slow fan-out times out at `pmap_timeout`
/// rather than riding the full per-turn `timeout` (§8 Scenario F).
fn pmap_branch_ctx<'a>(ctx: &EvalContext<'a>) -> EvalContext<'a> {
    let pmap_deadline = Instant::now() + ctx.pmap_timeout;
    let deadline = match ctx.deadline {
        Some(d) => Some(d.min(pmap_deadline)),
        None => Some(pmap_deadline),
    };
    EvalContext { accountant: ctx.accountant, deadline, tools: ctx.tools, pmap_timeout: ctx.pmap_timeout }
}

/// Bounded parallel map: evaluates `f` over each element of `seq`
/// concurrently via rayon, preserving input-positional order in the
/// result. Each branch shares the same accountant/tool dispatcher but a
/// deadline capped by `pmap_timeout` — no shared mutable state beyond that.
fn eval_pmap(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let f = eval(&items[1], env, ctx)?;
    let seq = eval(&items[2], env, ctx)?;
    let elements = as_iterable(&seq, "pmap")?;
    let branch_ctx = pmap_branch_ctx(ctx);
    let results: Vec<Result<Value, EvalError>> = elements
        .par_iter()
        .map(|item| apply(&f, std::slice::from_ref(item), &branch_ctx))
        .collect();
    let mut out = Vec::with_capacity(results.len());
    for r in results {
        out.push(r?);
    }
    let value = Value::vector(out);
    ctx.charge(&value)?;
    Ok(value)
}

/// Bounded parallel invocation of a fixed set of zero-arg thunks.
fn eval_pcalls(items: &[Ast], env: &Arc<Environment>, ctx: &EvalContext) -> Result<Value, EvalError> {
    let mut thunks = Vec::new();
    for item in &items[1..] {
        thunks.push(eval(item, env, ctx)?);
    }
    let branch_ctx = pmap_branch_ctx(ctx);
    let results: Vec<Result<Value, EvalError>> = thunks
        .par_iter()
        .map(|thunk| apply(thunk, &[], &branch_ctx))
        .collect();
    let mut out = Vec::with_capacity(results.len());
    for r in results {
        out.push(r?);
    }
    let value = Value::vector(out);
    ctx.charge(&value)?;
    Ok(value)
}

impl Ast {
    fn as_list_or_vector(&self) -> Option<&[Ast]> {
        match self {
            Ast::Vector(items, _) => Some(items),
            Ast::List(items, _) => Some(items),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_one;

    fn run(src: &str) -> Result<Value, EvalError> {
        let ast = parse_one(src).unwrap();
        let env = Environment::new();
        crate::builtins::register_all(&env);
        let accountant = Accountant::new(1_000_000);
        let ctx = EvalContext {
            accountant: &accountant,
            deadline: None,
            tools: &NoTools,
            pmap_timeout: Duration::from_secs(1),
        };
        eval(&ast, &env, &ctx)
    }

    #[test]
    fn evaluates_arithmetic() {
        assert_eq!(run("(+ 1 2 3)").unwrap(), Value::Int(6));
    }

    #[test]
    fn if_picks_branch_by_truthiness() {
        assert_eq!(run("(if true 1 2)").unwrap(), Value::Int(1));
        assert_eq!(run("(if false 1 2)").unwrap(), Value::Int(2));
        assert_eq!(run("(if nil 1 2)").unwrap(), Value::Int(2));
    }

    #[test]
    fn let_binds_locals_and_shadows() {
        assert_eq!(run("(let [x 1 y (+ x 1)] (+ x y))").unwrap(), Value::Int(3));
    }

    #[test]
    fn fn_and_defn_close_over_environment() {
        assert_eq!(
            run("(do (defn add [a b] (+ a b)) (add 2 3))").unwrap(),
            Value::Int(5)
        );
    }

    #[test]
    fn recursive_defn_does_not_overflow_small_inputs() {
        let src = "(do (defn fact [n] (if (<= n 1) 1 (* n (fact (- n 1))))) (fact 10))";
        assert_eq!(run(src).unwrap(), Value::Int(3628800));
    }

    #[test]
    fn for_destructures_and_collects_results() {
        assert_eq!(
            run("(for [[a b] [[1 2] [3 4]]] (+ a b))").unwrap(),
            Value::vector(vec![Value::Int(3), Value::Int(7)])
        );
    }

    #[test]
    fn map_filter_reduce_compose() {
        assert_eq!(
            run("(reduce + 0 (filter (fn [x] (> x 1)) (map (fn [x] (* x 2)) [0 1 2])))").unwrap(),
            Value::Int(6)
        );
    }

    #[test]
    fn try_converts_unknown_tool_into_error_map() {
        match run("(try (tool/missing {}))").unwrap() {
            Value::Map(m) => assert!(m.get(&Value::keyword("reason")).is_some()),
            other => panic!("expected error map, got {:?}", other),
        }
    }

    #[test]
    fn unknown_symbol_is_an_error() {
        assert!(run("nope").is_err());
    }

    #[test]
    fn pmap_preserves_input_order() {
        assert_eq!(
            run("(pmap (fn [x] (* x x)) [1 2 3 4 5])").unwrap(),
            Value::vector(vec![Value::Int(1), Value::Int(4), Value::Int(9), Value::Int(16), Value::Int(25)])
        );
    }

    #[test]
    fn a_slow_pmap_branch_times_out_against_pmap_timeout_not_the_overall_deadline() {
        let program = crate::parser::parse_program(
            "(defn spin [n] (if (<= n 0) n (spin (- n 1)))) (pmap spin [100000000])",
        )
        .unwrap();
        let env = Environment::new();
        crate::builtins::register_all(&env);
        let accountant = Accountant::new(10 * 1024 * 1024);
        let ctx = EvalContext {
            accountant: &accountant,
            deadline: Some(Instant::now() + Duration::from_secs(5)),
            tools: &NoTools,
            pmap_timeout: Duration::from_millis(5),
        };
        let mut last = Ok(Value::Nil);
        for form in &program {
            last = eval(form, &env, &ctx);
            if last.is_err() {
                break;
            }
        }
        assert!(matches!(last, Err(EvalError::Timeout)));
    }
}
