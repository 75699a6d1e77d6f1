// ABOUTME: Deterministic system-prompt assembly from language reference, tools, and signature

use crate::signature::{render_example, render_type, Signature};
use crate::tools::{Tool, ToolRegistry};

/// Output mode for the turn loop, controlling which output-format block the
/// prompt builder appends (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
    PtcLisp,
}

const LANGUAGE_REFERENCE_MULTI_TURN: &str = "\
You write small PTC-Lisp programs — a Clojure-subset language — to manipulate \
data and call tools. Namespaces: `ctx/*`/`data/*` are read-only run inputs, \
`tool/*` resolves host tools, `memory/*`/`user/*` is what you `def`ined in \
earlier turns. Use `(return value)` to finish the mission, `(fail {:reason :k \
:message \"...\"})` to abort it. Only `nil` and `false` are falsy.";

const LANGUAGE_REFERENCE_SINGLE_SHOT: &str = "\
You write one PTC-Lisp program — a Clojure-subset language — to manipulate \
data and call tools, then finish with `(return value)`. Namespaces: \
`ctx/*`/`data/*` are read-only inputs, `tool/*` resolves host tools. Only \
`nil` and `false` are falsy.";

/// Renders the tool catalog entry for one tool: `(ctx/name (arg :type ...)) -> returnType`
/// plus its description. Tools marked `planning_only` are listed but annotated as non-callable.
fn render_tool_entry(tool: &Tool) -> String {
    let mut line = String::new();
    if let Some(sig) = &tool.signature {
        let params: Vec<String> = sig.params.iter().map(|p| format!("{} {}", p.name, render_type(&p.ty))).collect();
        line.push_str(&format!("(ctx/{} ({})) -> {}", tool.name, params.join(" "), render_type(&sig.ret)));
    } else {
        line.push_str(&format!("(ctx/{} args)", tool.name));
    }
    if let Some(description) = &tool.description {
        line.push_str(&format!(" — {description}"));
    }
    if tool.planning_only {
        line.push_str(" [for planning only, not callable]");
    }
    line
}

fn render_tool_catalog(tools: &ToolRegistry) -> String {
    let mut entries: Vec<&Tool> = tools.iter().collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    if entries.is_empty() {
        return "No tools are registered for this mission.".to_string();
    }
    let mut out = String::from("Available tools:\n");
    for tool in entries {
        out.push_str("- ");
        out.push_str(&render_tool_entry(tool));
        out.push('\n');
    }
    out
}

fn render_expected_output(signature: Option<&Signature>, output: OutputMode) -> String {
    let Some(sig) = signature else {
        return "No return signature is declared; return whatever value answers the mission."
            .to_string();
    };
    let example = render_example(&sig.ret);
    let shape = render_type(&sig.ret);
    match output {
        OutputMode::Text => format!("Expected output shape: {shape}\nNo program block is required; respond with the answer directly."),
        OutputMode::Json => format!(
            "Expected output shape: {shape}\nRespond with JSON matching this shape, e.g. {example}"
        ),
        OutputMode::PtcLisp => format!(
            "Expected output shape: {shape}\nExample: (return {example})"
        ),
    }
}

/// Assembles the deterministic SYSTEM message for one turn loop run (§4.6).
pub fn build_system_prompt(
    multi_turn: bool,
    tools: &ToolRegistry,
    signature: Option<&Signature>,
    output: OutputMode,
    prefix: Option<&str>,
    suffix: Option<&str>,
) -> String {
    let mut sections = Vec::new();
    if let Some(p) = prefix {
        sections.push(p.to_string());
    }
    sections.push(
        (if multi_turn { LANGUAGE_REFERENCE_MULTI_TURN } else { LANGUAGE_REFERENCE_SINGLE_SHOT }).to_string(),
    );
    sections.push(render_tool_catalog(tools));
    sections.push(render_expected_output(signature, output));
    if let Some(s) = suffix {
        sections.push(s.to_string());
    }
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolError;
    use crate::value::{OrderedMap, Value};

    fn noop(_: &OrderedMap) -> Result<Value, ToolError> {
        Ok(Value::Nil)
    }

    #[test]
    fn empty_registry_says_no_tools_are_registered() {
        let tools = ToolRegistry::new();
        let prompt = build_system_prompt(true, &tools, None, OutputMode::PtcLisp, None, None);
        assert!(prompt.contains("No tools are registered"));
    }

    #[test]
    fn tool_catalog_lists_every_registered_tool_by_name() {
        let mut tools = ToolRegistry::new();
        tools.register(Tool::new("lookup", noop).with_description("looks things up"));
        let prompt = build_system_prompt(true, &tools, None, OutputMode::PtcLisp, None, None);
        assert!(prompt.contains("ctx/lookup"));
        assert!(prompt.contains("looks things up"));
    }

    #[test]
    fn expected_output_includes_a_return_example_for_ptc_lisp_mode() {
        let sig = Signature::parse("() -> {total :float}").unwrap();
        let prompt = build_system_prompt(true, &ToolRegistry::new(), Some(&sig), OutputMode::PtcLisp, None, None);
        assert!(prompt.contains("(return"));
    }

    #[test]
    fn prefix_and_suffix_are_included_verbatim() {
        let prompt = build_system_prompt(false, &ToolRegistry::new(), None, OutputMode::Text, Some("PREFIX"), Some("SUFFIX"));
        assert!(prompt.starts_with("PREFIX"));
        assert!(prompt.ends_with("SUFFIX"));
    }
}
