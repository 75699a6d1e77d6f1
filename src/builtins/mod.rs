//! # Built-in Functions Module
//!
//! Core built-in functions for the PTC-Lisp interpreter.
//!
//! ## Categories
//!
//! - **[arithmetic]** (5): +, -, *, /, % - Numeric operations
//! - **[comparison]** (5): =, <, >, <=, >= - Value comparisons
//! - **[logic]** (1): not - Boolean operations (`and`/`or` are short-circuiting special forms, see `eval.rs`)
//! - **[predicates]** (15): int?, float?, number?, string?, all-of, any-of, complement, ... - Type predicates and predicate combinators
//! - **[collections]** (22): first, rest, nth, conj, get, assoc, merge, distinct, take, partition, zipmap, ... - Vector/map/set operations
//! - **[strings]** (12): str, split, join, upper, lower, trim, ... - String operations
//!
//! `where`, `sort-by`, `group-by`, `pluck`, `sum-by`/`avg-by`/`min-by`/`max-by`,
//! `take-while`, `drop-while` are dispatched as special forms in `eval.rs`
//! instead of living here — they need the evaluator's `EvalContext` to call
//! a selector that might itself be a closure.
//!
//! Each category is a sub-module with its own `register` function.

pub mod arithmetic;
pub mod collections;
pub mod comparison;
pub mod logic;
pub mod predicates;
pub mod strings;

use crate::env::Environment;
use std::sync::Arc;

/// Populates `env` with every builtin function PTC-Lisp programs can call.
/// Special forms (`if`, `let`, `for`, `pmap`, ...) are dispatched directly
/// in `eval::eval` and never go through this registry.
pub fn register_all(env: &Arc<Environment>) {
    arithmetic::register(env);
    comparison::register(env);
    logic::register(env);
    predicates::register(env);
    collections::register(env);
    strings::register(env);
}
