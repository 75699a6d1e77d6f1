// ABOUTME: End-to-end scenarios exercising the sandbox and SubAgent loop together

use ptc_runner::config::Limits;
use ptc_runner::error::Reason;
use ptc_runner::llm::{LlmCallback, LlmRequest, LlmResponse, TokenUsage};
use ptc_runner::memory::{Memory, MemoryStrategy};
use ptc_runner::sandbox::{run_lisp, SandboxRequest, SandboxResult};
use ptc_runner::signature::Signature;
use ptc_runner::tools::{Tool, ToolError, ToolRegistry};
use ptc_runner::turn::{run, AgentSpec, RunOpts};
use ptc_runner::value::{OrderedMap, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn bare_registry() -> Arc<ToolRegistry> {
    Arc::new(ToolRegistry::new())
}

#[test]
fn scenario_a_pure_aggregation_sums_travel_expenses() {
    let mut travel1 = OrderedMap::new();
    travel1.insert(Value::keyword("category"), Value::string("travel"));
    travel1.insert(Value::keyword("amount"), Value::Int(100));

    let mut food = OrderedMap::new();
    food.insert(Value::keyword("category"), Value::string("food"));
    food.insert(Value::keyword("amount"), Value::Int(40));

    let mut travel2 = OrderedMap::new();
    travel2.insert(Value::keyword("category"), Value::string("travel"));
    travel2.insert(Value::keyword("amount"), Value::Int(60));

    let mut context = OrderedMap::new();
    context.insert(
        Value::keyword("expenses"),
        Value::vector(vec![Value::map(travel1), Value::map(food), Value::map(travel2)]),
    );

    let limits = Limits::default();
    let memory = Memory::new();
    let result = run_lisp(SandboxRequest {
        source: r#"(->> ctx/expenses (filter (where :category = "travel")) (sum-by :amount))"#,
        context,
        memory: &memory,
        tools: bare_registry(),
        limits: &limits,
    });

    match result {
        SandboxResult::Completed(outcome) => assert_eq!(outcome.value, Value::Int(160)),
        _ => panic!("expected a completed evaluation"),
    }
}

#[test]
fn scenario_b_destructuring_in_for_keeps_only_odd_sums() {
    let limits = Limits::default();
    let memory = Memory::new();
    let result = run_lisp(SandboxRequest {
        source: "(for [[a b] [[1 2] [3 4]] :let [s (+ a b)] :when (= 1 (% s 2))] s)",
        context: OrderedMap::new(),
        memory: &memory,
        tools: bare_registry(),
        limits: &limits,
    });

    match result {
        SandboxResult::Completed(outcome) => {
            assert_eq!(outcome.value, Value::vector(vec![Value::Int(3), Value::Int(7)]));
        }
        _ => panic!("expected a completed evaluation"),
    }
}

#[test]
fn scenario_c_a_cached_tool_is_dispatched_once_per_distinct_args() {
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    fn counting(args: &OrderedMap) -> Result<Value, ToolError> {
        CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(args.get(&Value::keyword("k")).cloned().unwrap_or(Value::Nil))
    }

    let mut registry = ToolRegistry::new();
    registry.register(Tool::new("id", counting).cached());

    let limits = Limits::default();
    let memory = Memory::new();
    let result = run_lisp(SandboxRequest {
        source: "[(tool/id {:k 1}) (tool/id {:k 1}) (tool/id {:k 2})]",
        context: OrderedMap::new(),
        memory: &memory,
        tools: Arc::new(registry),
        limits: &limits,
    });

    match result {
        SandboxResult::Completed(outcome) => {
            assert_eq!(outcome.value, Value::vector(vec![Value::Int(1), Value::Int(1), Value::Int(2)]));
            assert_eq!(CALLS.load(Ordering::SeqCst), 2);
        }
        _ => panic!("expected a completed evaluation"),
    }
}

fn scripted(responses: Vec<&'static str>) -> Arc<LlmCallback> {
    let calls = AtomicUsize::new(0);
    let responses: Vec<String> = responses.into_iter().map(String::from).collect();
    Arc::new(move |_req: LlmRequest| {
        let i = calls.fetch_add(1, Ordering::SeqCst);
        let content = responses.get(i).cloned().unwrap_or_default();
        Ok(LlmResponse { content, tokens: TokenUsage { input: 1, output: 1 } })
    })
}

#[test]
fn scenario_d_multi_turn_run_forwards_memory_and_returns_on_turn_two() {
    let mut spec = AgentSpec::new("count the items then double the count");
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
    assert!(step.fail.is_none());
}

#[test]
fn scenario_e_signature_mismatch_retries_then_succeeds() {
    let mut spec = AgentSpec::new("return a float total");
    spec.signature = Some(Signature::parse("() -> {total :float}").unwrap());
    spec.limits.retry_turns = 2;
    let llm = scripted(vec![
        "```ptclisp\n(return {:total \"nope\"})\n```",
        "```ptclisp\n(return {:total 3.5})\n```",
    ]);

    let step = run(&spec, RunOpts::new(llm));

    let mut expected = OrderedMap::new();
    expected.insert(Value::keyword("total"), Value::Float(3.5));
    assert_eq!(step.return_value, Some(Value::map(expected)));
    assert!(step.fail.is_none());

    let first = &step.turns[0];
    match &first.outcome {
        ptc_runner::turn::TurnOutcome::SignatureMismatch(issues) => {
            assert_eq!(issues.len(), 1);
            assert!(issues[0].message.contains("float"));
        }
        other => panic!("expected a signature mismatch on turn 1, got {:?}", other),
    }
}

#[test]
fn scenario_f_a_slow_pmap_fan_out_fails_with_timeout_within_a_bounded_overshoot() {
    let mut limits = Limits::default();
    limits.pmap_timeout = Duration::from_millis(50);
    limits.timeout = Duration::from_secs(5);

    let memory = Memory::new();
    let start = std::time::Instant::now();
    let result = run_lisp(SandboxRequest {
        source: "(defn spin [n] (if (<= n 0) n (spin (- n 1)))) (pmap spin [1000000000 1000000000])",
        context: OrderedMap::new(),
        memory: &memory,
        tools: bare_registry(),
        limits: &limits,
    });
    let elapsed = start.elapsed();

    match result {
        SandboxResult::Error(taxon) => assert_eq!(taxon.reason, Reason::Timeout),
        _ => panic!("expected a timeout error"),
    }
    assert!(elapsed < Duration::from_secs(2), "pmap_timeout should bound the fan-out well under the overall timeout");
}
