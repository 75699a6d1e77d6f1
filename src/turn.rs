// ABOUTME: SubAgent turn loop — LLM/sandbox round trips, memory threading, retries, nested agents

use crate::compression::{render_user_message, CompressionStrategy, FailedAttempt, ToolCallRecord};
use crate::config::Limits;
use crate::error::{Reason, Taxon};
use crate::llm::{LlmCallback, LlmRequest, Message, Role};
use crate::memory::{Memory, MemoryStrategy};
use crate::prompt::{build_system_prompt, OutputMode};
use crate::sandbox::{run_lisp, SandboxRequest, SandboxResult};
use crate::signature::{Signature, ValidationIssue};
use crate::tools::{Tool, ToolError, ToolKind, ToolRegistry};
use crate::trace::{NullSink, TraceEvent, TraceKind, TraceSink};
use crate::value::{OrderedMap, Value};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// Fixed configuration for a SubAgent: its mission, I/O contract, callable
/// surface, and resource budgets (§4.5). Shared across every run of the
/// same agent; `RunOpts` carries what varies per invocation.
pub struct AgentSpec {
    pub name: Option<String>,
    pub prompt: String,
    pub signature: Option<Signature>,
    pub tools: Vec<Tool>,
    /// Named nested agents, dispatched via `(tool/name args)` as
    /// `ToolKind::SubAgent`. The recursive sentinel is named `"self"`.
    pub subagents: Vec<(String, Arc<AgentSpec>)>,
    pub limits: Limits,
    pub memory_strategy: MemoryStrategy,
    pub output: OutputMode,
    pub compression: CompressionStrategy,
    pub system_prefix: Option<String>,
    pub system_suffix: Option<String>,
}

impl AgentSpec {
    pub fn new(prompt: impl Into<String>) -> Self {
        AgentSpec {
            name: None,
            prompt: prompt.into(),
            signature: None,
            tools: Vec::new(),
            subagents: Vec::new(),
            limits: Limits::default(),
            memory_strategy: MemoryStrategy::default(),
            output: OutputMode::PtcLisp,
            compression: CompressionStrategy::default(),
            system_prefix: None,
            system_suffix: None,
        }
    }
}

/// Whether exhausting `token_limit`/`turn_budget` surfaces a partial return
/// value or fails the run outright (§4.5, §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnBudgetExceeded {
    Fail,
    ReturnPartial,
}

/// What varies call to call: the LLM transport, input data, inherited
/// memory, and this run's place in a nested-subagent tree. `llm`/`trace_sink`
/// are `Arc`-owned (not borrowed) so a subagent-dispatching tool closure can
/// hold its own handle across the call into a child `run`.
pub struct RunOpts {
    pub llm: Arc<LlmCallback>,
    pub context: OrderedMap,
    pub memory: Memory,
    pub parent_trace_id: Option<Uuid>,
    pub depth: usize,
    pub on_budget_exceeded: OnBudgetExceeded,
    pub trace_sink: Arc<dyn TraceSink>,
    /// Names of agents already active on this call stack, used to reject a
    /// named-subagent cycle (distinct from the `:self` sentinel, which is
    /// intentional recursion bounded by `max_depth`).
    pub ancestors: Vec<String>,
}

impl RunOpts {
    pub fn new(llm: Arc<LlmCallback>) -> Self {
        RunOpts {
            llm,
            context: OrderedMap::new(),
            memory: Memory::new(),
            parent_trace_id: None,
            depth: 0,
            on_budget_exceeded: OnBudgetExceeded::Fail,
            trace_sink: Arc::new(NullSink),
            ancestors: Vec::new(),
        }
    }
}

/// How one turn's sandbox evaluation resolved (§4.5.e).
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Return(Value),
    Fail(Value),
    SignatureMismatch(Vec<ValidationIssue>),
    Continuation(Value),
    Error(Taxon),
}

/// One LLM <-> sandbox round trip.
#[derive(Debug, Clone)]
pub struct Turn {
    pub number: usize,
    pub raw_response: String,
    pub program: Option<String>,
    pub outcome: TurnOutcome,
    pub prints: Vec<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub memory_after: Memory,
    pub success: bool,
}

/// Resource consumption across a run, populated even when the run fails.
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub turns: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub duration_ms: u64,
}

/// The outcome of one `SubAgent.run` (§6.1). Exactly one of
/// `return_value`/`fail` is set; `trace_id` and `usage` are always
/// populated, even on failure.
#[derive(Debug, Clone)]
pub struct Step {
    pub trace_id: Uuid,
    pub parent_trace_id: Option<Uuid>,
    pub name: Option<String>,
    pub return_value: Option<Value>,
    pub fail: Option<Taxon>,
    pub usage: Usage,
    pub turns: Vec<Turn>,
    pub memory: Memory,
    pub prints: Vec<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub child_steps: Vec<Step>,
}

const FENCE_LANGS: [&str; 3] = ["clojure", "lisp", "ptclisp"];

/// What a turn's raw LLM response resolved to, per §4.5.c.
enum Extracted {
    Program(String),
    DirectAnswer(Value),
}

fn extract_fenced_block(content: &str) -> Option<String> {
    for lang in FENCE_LANGS {
        let opener = format!("```{lang}");
        if let Some(start) = content.find(&opener) {
            let after = &content[start + opener.len()..];
            if let Some(end) = after.find("```") {
                return Some(after[..end].trim().to_string());
            }
        }
    }
    None
}

/// Locates a program in `content`: a fenced code block first, then the whole
/// content if it starts with `(`. If neither applies and `output == Text` on
/// the final allowed turn, the raw content becomes the direct answer.
fn extract_program(content: &str, output: OutputMode, is_final_turn: bool) -> Option<Extracted> {
    if let Some(block) = extract_fenced_block(content) {
        return Some(Extracted::Program(block));
    }
    let trimmed = content.trim();
    if trimmed.starts_with('(') {
        return Some(Extracted::Program(trimmed.to_string()));
    }
    if output == OutputMode::Text && is_final_turn {
        return Some(Extracted::DirectAnswer(Value::string(trimmed)));
    }
    None
}

/// `Turn.prints` is derived, not a separate evaluator I/O channel: any
/// recorded call to a tool named `println`/`print` renders its argument map.
fn println_text(tool_calls: &[ToolCallRecord]) -> Vec<String> {
    tool_calls
        .iter()
        .filter(|c| c.name == "println" || c.name == "print")
        .map(|c| c.args.to_string())
        .collect()
}

/// Renders the `tool/`/`data/`/`user/` namespace contents for the
/// compression strategy's user message (§4.5).
fn namespace_summary(tools: &ToolRegistry, context: &OrderedMap, memory: &Memory) -> String {
    let mut out = String::new();
    if !context.is_empty() {
        out.push_str("data/ (read-only mission inputs):\n");
        for (k, v) in context.iter() {
            out.push_str(&format!("- {k} = {v}\n"));
        }
    }

    let mut memory_entries: Vec<(&String, &Value)> = memory.iter().collect();
    memory_entries.sort_by(|a, b| a.0.cmp(b.0));
    if !memory_entries.is_empty() {
        out.push_str("\nuser/ (defined in earlier turns):\n");
        for (k, v) in memory_entries {
            out.push_str(&format!("- {k} = {v}\n"));
        }
    }

    let mut tool_names: Vec<&str> = tools.iter().filter(|t| !t.planning_only).map(|t| t.name.as_str()).collect();
    tool_names.sort_unstable();
    if !tool_names.is_empty() {
        out.push_str("\ntool/ (callable this turn):\n");
        for name in tool_names {
            out.push_str(&format!("- tool/{name}\n"));
        }
    }

    out
}

fn taxon_from_fail_value(value: &Value) -> Taxon {
    if let Value::Map(map) = value {
        let message = map
            .get(&Value::keyword("message"))
            .map(|v| v.to_string())
            .unwrap_or_else(|| value.to_string());
        return Taxon::new(Reason::Raised, message).with_details(value.clone());
    }
    Taxon::new(Reason::Raised, value.to_string()).with_details(value.clone())
}

fn is_fatal(reason: Reason) -> bool {
    matches!(
        reason,
        Reason::Timeout
            | Reason::HeapLimit
            | Reason::BudgetExceeded
            | Reason::DepthExceeded
            | Reason::MaxTurns
            | Reason::CycleDetected
            | Reason::Cancelled
    )
}

fn emit(sink: &dyn TraceSink, trace_id: Uuid, parent: Option<Uuid>, kind: TraceKind) {
    sink.emit(&TraceEvent { trace_id, parent_span_id: parent, timestamp_ms: 0, kind });
}

/// Builds the `ToolRegistry` this run dispatches against: the agent's
/// native/dynamic tools plus one `ToolKind::SubAgent` tool per entry in
/// `spec.subagents`, each closing over everything a nested `run` needs. A
/// subagent tool's argument map becomes the child's `context`; its `Step`
/// collapses to the child's return value (or an error if it failed) and is
/// appended to `child_steps`.
fn build_registry(
    spec: &AgentSpec,
    opts_llm: Arc<LlmCallback>,
    opts_trace_sink: Arc<dyn TraceSink>,
    trace_id: Uuid,
    depth: usize,
    ancestors: Vec<String>,
    child_steps: Arc<Mutex<Vec<Step>>>,
) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in &spec.tools {
        registry.register(tool.clone());
    }
    for (name, child_spec) in &spec.subagents {
        let name = name.clone();
        let child_spec = Arc::clone(child_spec);
        let llm = Arc::clone(&opts_llm);
        let trace_sink = Arc::clone(&opts_trace_sink);
        let ancestors = ancestors.clone();
        let child_steps = Arc::clone(&child_steps);
        let is_self = name == "self";
        registry.register(Tool::dynamic(name.clone(), ToolKind::SubAgent, move |args: &OrderedMap| {
            if !is_self && ancestors.iter().any(|a| a == &name) {
                return Err(ToolError::new(
                    "cycle_detected",
                    format!("agent {name:?} is already active on this call stack"),
                ));
            }
            let mut child_ancestors = ancestors.clone();
            child_ancestors.push(name.clone());
            let child_opts = RunOpts {
                llm: Arc::clone(&llm),
                context: args.clone(),
                memory: Memory::new(),
                parent_trace_id: Some(trace_id),
                depth: depth + 1,
                on_budget_exceeded: OnBudgetExceeded::Fail,
                trace_sink: Arc::clone(&trace_sink),
                ancestors: child_ancestors,
            };
            let step = run(&child_spec, child_opts);
            let result = match (&step.return_value, &step.fail) {
                (Some(value), _) => Ok(value.clone()),
                (None, Some(taxon)) => Err(ToolError::new(
                    format!("{:?}", taxon.reason).to_lowercase(),
                    taxon.message.clone(),
                )),
                (None, None) => Ok(Value::Nil),
            };
            child_steps.lock().unwrap().push(step);
            result
        }));
    }
    Arc::new(registry)
}

/// Runs `spec` to completion, per §4.5. Never panics on caller-controlled
/// input: every failure mode surfaces as `Step.fail`.
pub fn run(spec: &AgentSpec, opts: RunOpts) -> Step {
    let trace_id = Uuid::new_v4();
    let start = Instant::now();
    let sink = opts.trace_sink.as_ref();
    emit(sink, trace_id, opts.parent_trace_id, TraceKind::TraceStart);
    emit(sink, trace_id, opts.parent_trace_id, TraceKind::RunStart { agent_name: spec.name.clone() });

    let mut usage = Usage::default();

    if opts.depth > spec.limits.max_depth {
        let taxon = Taxon::new(Reason::DepthExceeded, format!("max sub-agent depth {} exceeded", spec.limits.max_depth));
        return finish(spec, opts.trace_id_parts(trace_id), None, Some(taxon), usage, Vec::new(), Memory::new(), Vec::new(), Vec::new(), Vec::new(), start, sink);
    }

    let child_steps = Arc::new(Mutex::new(Vec::new()));
    let registry = build_registry(
        spec,
        Arc::clone(&opts.llm),
        Arc::clone(&opts.trace_sink),
        trace_id,
        opts.depth,
        opts.ancestors.clone(),
        Arc::clone(&child_steps),
    );

    let multi_turn = spec.limits.max_turns > 1;
    let system = build_system_prompt(
        multi_turn,
        registry.as_ref(),
        spec.signature.as_ref(),
        spec.output,
        spec.system_prefix.as_deref(),
        spec.system_suffix.as_deref(),
    );

    let mut memory = opts.memory.clone();
    let mut turns: Vec<Turn> = Vec::new();
    let mut total_tool_calls: Vec<ToolCallRecord> = Vec::new();
    let mut all_prints: Vec<String> = Vec::new();
    let mut previous_failure: Option<FailedAttempt> = None;
    let mut last_continuation: Option<Value> = None;
    let mut regular_turns_used = 0usize;
    let mut retry_turns_used = 0usize;
    let mission_deadline = start + spec.limits.mission_timeout;

    let outcome_taxon: Option<Taxon>;
    let outcome_value: Option<Value>;

    loop {
        if Instant::now() >= mission_deadline {
            outcome_taxon = Some(Taxon::new(Reason::Timeout, "mission_timeout exceeded"));
            outcome_value = None;
            break;
        }

        if let Some(limit) = spec.limits.token_limit {
            if usage.input_tokens + usage.output_tokens > limit {
                let (v, t) = budget_exhausted(opts.on_budget_exceeded, &last_continuation, "token_limit exceeded");
                outcome_value = v;
                outcome_taxon = t;
                break;
            }
        }
        if let Some(limit) = spec.limits.turn_budget {
            if regular_turns_used >= limit {
                let (v, t) = budget_exhausted(opts.on_budget_exceeded, &last_continuation, "turn_budget exceeded");
                outcome_value = v;
                outcome_taxon = t;
                break;
            }
        }

        if regular_turns_used >= spec.limits.max_turns {
            outcome_taxon = Some(Taxon::new(Reason::MaxTurns, "max_turns exhausted without a return"));
            outcome_value = None;
            break;
        }

        let turn_number = turns.len() + 1;
        let turns_remaining = spec.limits.max_turns - regular_turns_used - 1;
        let is_final_turn = turns_remaining == 0;

        emit(sink, trace_id, opts.parent_trace_id, TraceKind::TurnStart { turn: turn_number });

        let namespaces = namespace_summary(registry.as_ref(), &opts.context, &memory);
        let user_message = render_user_message(
            &spec.prompt,
            &namespaces,
            &total_tool_calls,
            &all_prints,
            previous_failure.as_ref(),
            turns_remaining,
            &spec.limits,
        );

        emit(sink, trace_id, opts.parent_trace_id, TraceKind::LlmStart);
        let request = LlmRequest { system: system.clone(), messages: vec![Message { role: Role::User, content: user_message }], on_chunk: None };
        let response = match (*opts.llm)(request) {
            Ok(response) => response,
            Err(err) => {
                outcome_taxon = Some(Taxon::new(Reason::LlmError, err.to_string()));
                outcome_value = None;
                break;
            }
        };
        usage.input_tokens += response.tokens.input;
        usage.output_tokens += response.tokens.output;
        emit(
            sink,
            trace_id,
            opts.parent_trace_id,
            TraceKind::LlmStop { input_tokens: response.tokens.input, output_tokens: response.tokens.output },
        );

        let extracted = extract_program(&response.content, spec.output, is_final_turn);
        let (program, direct_answer) = match extracted {
            Some(Extracted::Program(p)) => (Some(p), None),
            Some(Extracted::DirectAnswer(v)) => (None, Some(v)),
            None => (None, None),
        };

        if let Some(value) = direct_answer {
            let issues = spec.signature.as_ref().map(|s| s.validate(&value)).unwrap_or_default();
            if issues.is_empty() {
                turns.push(Turn {
                    number: turn_number,
                    raw_response: response.content,
                    program: None,
                    outcome: TurnOutcome::Return(value.clone()),
                    prints: Vec::new(),
                    tool_calls: Vec::new(),
                    memory_after: memory.clone(),
                    success: true,
                });
                outcome_value = Some(value);
                outcome_taxon = None;
                break;
            }
            retry_turns_used += 1;
            turns.push(Turn {
                number: turn_number,
                raw_response: response.content,
                program: None,
                outcome: TurnOutcome::SignatureMismatch(issues.clone()),
                prints: Vec::new(),
                tool_calls: Vec::new(),
                memory_after: memory.clone(),
                success: false,
            });
            if retry_turns_used > spec.limits.retry_turns {
                outcome_taxon = Some(Taxon::new(Reason::SignatureMismatch, "retry_turns exhausted without a valid return"));
                outcome_value = None;
                break;
            }
            previous_failure = Some(FailedAttempt { program: String::new(), error_message: render_issues(&issues) });
            continue;
        }

        let Some(program) = program else {
            // No program found, and not the final-turn direct-answer case: treat as a
            // recoverable parse miss and feed back the raw response as the offending
            // "program" so the next turn can see what it sent.
            regular_turns_used += 1;
            let taxon = Taxon::new(Reason::ParseError, "no PTC-Lisp program or direct answer found in the response");
            turns.push(Turn {
                number: turn_number,
                raw_response: response.content.clone(),
                program: None,
                outcome: TurnOutcome::Error(taxon.clone()),
                prints: Vec::new(),
                tool_calls: Vec::new(),
                memory_after: memory.clone(),
                success: false,
            });
            emit(sink, trace_id, opts.parent_trace_id, TraceKind::TurnStop { turn: turn_number, success: false });
            previous_failure = Some(FailedAttempt { program: response.content, error_message: taxon.message });
            continue;
        };

        let request = SandboxRequest {
            source: &program,
            context: opts.context.clone(),
            memory: &memory,
            tools: Arc::clone(&registry),
            limits: &spec.limits,
        };
        let result = run_lisp(request);

        match result {
            SandboxResult::Completed(sandbox_outcome) => {
                regular_turns_used += 1;
                let prints = println_text(&sandbox_outcome.tool_calls);
                total_tool_calls.extend(sandbox_outcome.tool_calls.iter().cloned());
                all_prints.extend(prints.iter().cloned());
                let before = memory.clone();
                memory = sandbox_outcome.memory.merge(&before, true, spec.memory_strategy);
                last_continuation = Some(sandbox_outcome.value.clone());
                previous_failure = None;
                turns.push(Turn {
                    number: turn_number,
                    raw_response: response.content,
                    program: Some(program),
                    outcome: TurnOutcome::Continuation(sandbox_outcome.value),
                    prints,
                    tool_calls: sandbox_outcome.tool_calls,
                    memory_after: memory.clone(),
                    success: true,
                });
                emit(sink, trace_id, opts.parent_trace_id, TraceKind::TurnStop { turn: turn_number, success: true });
            }
            SandboxResult::Returned { value, tool_calls, memory: run_memory } => {
                let issues = spec.signature.as_ref().map(|s| s.validate(&value)).unwrap_or_default();
                let prints = println_text(&tool_calls);
                total_tool_calls.extend(tool_calls.iter().cloned());
                all_prints.extend(prints.iter().cloned());
                let before = memory.clone();
                memory = run_memory.merge(&before, issues.is_empty(), spec.memory_strategy);

                if issues.is_empty() {
                    turns.push(Turn {
                        number: turn_number,
                        raw_response: response.content,
                        program: Some(program),
                        outcome: TurnOutcome::Return(value.clone()),
                        prints,
                        tool_calls,
                        memory_after: memory.clone(),
                        success: true,
                    });
                    emit(sink, trace_id, opts.parent_trace_id, TraceKind::TurnStop { turn: turn_number, success: true });
                    outcome_value = Some(value);
                    outcome_taxon = None;
                    break;
                }

                retry_turns_used += 1;
                turns.push(Turn {
                    number: turn_number,
                    raw_response: response.content,
                    program: Some(program.clone()),
                    outcome: TurnOutcome::SignatureMismatch(issues.clone()),
                    prints,
                    tool_calls,
                    memory_after: memory.clone(),
                    success: false,
                });
                emit(sink, trace_id, opts.parent_trace_id, TraceKind::TurnStop { turn: turn_number, success: false });
                if retry_turns_used > spec.limits.retry_turns {
                    outcome_taxon = Some(Taxon::new(Reason::SignatureMismatch, "retry_turns exhausted without a valid return"));
                    outcome_value = None;
                    break;
                }
                previous_failure = Some(FailedAttempt { program, error_message: render_issues(&issues) });
            }
            SandboxResult::Failed { value, tool_calls, memory: run_memory } => {
                let prints = println_text(&tool_calls);
                total_tool_calls.extend(tool_calls.iter().cloned());
                all_prints.extend(prints.iter().cloned());
                let before = memory.clone();
                memory = run_memory.merge(&before, false, spec.memory_strategy);
                let taxon = taxon_from_fail_value(&value);
                turns.push(Turn {
                    number: turn_number,
                    raw_response: response.content,
                    program: Some(program),
                    outcome: TurnOutcome::Fail(value),
                    prints,
                    tool_calls,
                    memory_after: memory.clone(),
                    success: false,
                });
                emit(sink, trace_id, opts.parent_trace_id, TraceKind::TurnStop { turn: turn_number, success: false });
                outcome_value = None;
                outcome_taxon = Some(taxon);
                break;
            }
            SandboxResult::Error(taxon) => {
                turns.push(Turn {
                    number: turn_number,
                    raw_response: response.content,
                    program: Some(program.clone()),
                    outcome: TurnOutcome::Error(taxon.clone()),
                    prints: Vec::new(),
                    tool_calls: Vec::new(),
                    memory_after: memory.clone(),
                    success: false,
                });
                emit(sink, trace_id, opts.parent_trace_id, TraceKind::TurnStop { turn: turn_number, success: false });
                if is_fatal(taxon.reason) {
                    outcome_value = None;
                    outcome_taxon = Some(taxon);
                    break;
                }
                regular_turns_used += 1;
                previous_failure = Some(FailedAttempt { program, error_message: taxon.message });
            }
        }
    }

    usage.turns = turns.len();

    // The registry's subagent tool closures each hold their own clone of
    // `child_steps`, so `Arc::try_unwrap` here would spuriously fail while
    // `registry` is still alive — drain the Mutex instead of consuming the Arc.
    let child_steps_final = std::mem::take(&mut *child_steps.lock().unwrap());

    finish(
        spec,
        opts.trace_id_parts(trace_id),
        outcome_value,
        outcome_taxon,
        usage,
        turns,
        memory,
        all_prints,
        total_tool_calls,
        child_steps_final,
        start,
        sink,
    )
}

fn budget_exhausted(policy: OnBudgetExceeded, last: &Option<Value>, message: &str) -> (Option<Value>, Option<Taxon>) {
    match policy {
        OnBudgetExceeded::ReturnPartial => (Some(last.clone().unwrap_or(Value::Nil)), None),
        OnBudgetExceeded::Fail => (None, Some(Taxon::new(Reason::BudgetExceeded, message))),
    }
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues.iter().map(|i| format!("{}: {}", i.path, i.message)).collect::<Vec<_>>().join("; ")
}

#[allow(clippy::too_many_arguments)]
fn finish(
    spec: &AgentSpec,
    ids: (Uuid, Option<Uuid>),
    return_value: Option<Value>,
    fail: Option<Taxon>,
    mut usage: Usage,
    turns: Vec<Turn>,
    memory: Memory,
    prints: Vec<String>,
    tool_calls: Vec<ToolCallRecord>,
    child_steps: Vec<Step>,
    start: Instant,
    sink: &dyn TraceSink,
) -> Step {
    usage.duration_ms = start.elapsed().as_millis() as u64;
    let (trace_id, parent_trace_id) = ids;
    emit(sink, trace_id, parent_trace_id, TraceKind::RunStop { success: fail.is_none() });
    emit(sink, trace_id, parent_trace_id, TraceKind::TraceStop);
    Step {
        trace_id,
        parent_trace_id,
        name: spec.name.clone(),
        return_value,
        fail,
        usage,
        turns,
        memory,
        prints,
        tool_calls,
        child_steps,
    }
}

impl RunOpts {
    fn trace_id_parts(&self, trace_id: Uuid) -> (Uuid, Option<Uuid>) {
        (trace_id, self.parent_trace_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, LlmResponse, TokenUsage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scripted(responses: Vec<&'static str>) -> Arc<LlmCallback> {
        let calls = AtomicUsize::new(0);
        let responses: Vec<String> = responses.into_iter().map(String::from).collect();
        Arc::new(move |_req: LlmRequest| {
            let i = calls.fetch_add(1, Ordering::SeqCst);
            let content = responses.get(i).cloned().unwrap_or_default();
            Ok(LlmResponse { content, tokens: TokenUsage { input: 10, output: 10 } })
        })
    }

    #[test]
    fn a_single_turn_return_finalizes_the_step() {
        let spec = AgentSpec::new("add two numbers");
        let llm = scripted(vec!["```ptclisp\n(return (+ 1 2))\n```"]);
        let step = run(&spec, RunOpts::new(llm));
        assert_eq!(step.return_value, Some(Value::Int(3)));
        assert!(step.fail.is_none());
        assert_eq!(step.usage.turns, 1);
    }

    #[test]
    fn a_fail_form_sets_step_fail_and_stops_the_loop() {
        let spec = AgentSpec::new("try something doomed");
        let llm = scripted(vec!["```ptclisp\n(fail {:reason :k :message \"nope\"})\n```"]);
        let step = run(&spec, RunOpts::new(llm));
        assert!(step.return_value.is_none());
        assert!(step.fail.is_some());
    }

    #[test]
    fn a_signature_mismatch_retries_without_consuming_max_turns() {
        let mut spec = AgentSpec::new("return a float total");
        spec.signature = Some(Signature::parse("() -> {total :float}").unwrap());
        spec.limits.max_turns = 1;
        spec.limits.retry_turns = 2;
        let llm = scripted(vec![
            "```ptclisp\n(return {:total \"nope\"})\n```",
            "```ptclisp\n(return {:total 3.5})\n```",
        ]);
        let step = run(&spec, RunOpts::new(llm));
        let mut map = OrderedMap::new();
        map.insert(Value::keyword("total"), Value::Float(3.5));
        assert_eq!(step.return_value, Some(Value::map(map)));
        assert_eq!(step.usage.turns, 2);
    }

    #[test]
    fn exhausting_max_turns_without_a_return_fails_with_max_turns() {
        let mut spec = AgentSpec::new("never finishes");
        spec.limits.max_turns = 2;
        let llm = scripted(vec!["```ptclisp\n(+ 1 1)\n```", "```ptclisp\n(+ 1 1)\n```"]);
        let step = run(&spec, RunOpts::new(llm));
        assert!(step.return_value.is_none());
        assert_eq!(step.fail.unwrap().reason, Reason::MaxTurns);
    }

    #[test]
    fn memory_forwards_a_def_from_turn_one_into_turn_two() {
        let mut spec = AgentSpec::new("count then double");
        spec.limits.max_turns = 3;
        spec.memory_strategy = MemoryStrategy::Forward;
        let llm = scripted(vec![
            "```ptclisp\n(def n (count ctx/items))\n```",
            "```ptclisp\n(return {:n n :doubled (* n 2)})\n```",
        ]);
        let mut opts = RunOpts::new(llm);
        opts.context.insert(Value::keyword("items"), Value::vector(vec![Value::Int(10), Value::Int(20), Value::Int(30)]));
        let step = run(&spec, opts);
        let mut expected = OrderedMap::new();
        expected.insert(Value::keyword("n"), Value::Int(3));
        expected.insert(Value::keyword("doubled"), Value::Int(6));
        assert_eq!(step.return_value, Some(Value::map(expected)));
        assert_eq!(step.usage.turns, 2);
    }

    #[test]
    fn llm_callback_failure_surfaces_as_an_llm_error() {
        let spec = AgentSpec::new("anything");
        let llm: Arc<LlmCallback> = Arc::new(|_req: LlmRequest| Err(LlmError::CallbackFailed("boom".to_string())));
        let step = run(&spec, RunOpts::new(llm));
        assert_eq!(step.fail.unwrap().reason, Reason::LlmError);
    }

    #[test]
    fn exceeding_max_depth_fails_immediately_without_calling_the_llm() {
        let mut spec = AgentSpec::new("nested");
        spec.limits.max_depth = 0;
        let llm = scripted(vec!["```ptclisp\n(return 1)\n```"]);
        let mut opts = RunOpts::new(llm);
        opts.depth = 1;
        let step = run(&spec, opts);
        assert_eq!(step.fail.unwrap().reason, Reason::DepthExceeded);
        assert_eq!(step.usage.turns, 0);
    }
}
