// ABOUTME: Feedback truncation and user-message assembly strategies for the turn loop

use crate::config::Limits;
use crate::value::Value;

/// Controls what's sent to the LLM each turn (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionStrategy {
    /// One SYSTEM + one USER message per call; the default.
    SingleUserCoalesced,
    /// Retains the true assistant/user message sequence.
    FullHistory,
    /// Old turns replaced by structured summaries; current turn verbatim.
    SummaryCompressed,
}

impl Default for CompressionStrategy {
    fn default() -> Self {
        CompressionStrategy::SingleUserCoalesced
    }
}

/// One recorded host-function call, rendered into the execution-history
/// section of the user message.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub name: String,
    pub args: Value,
    pub result: Value,
}

/// A turn that failed to parse/analyze/evaluate, fed back as "your previous
/// attempt" until recovered.
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    pub program: String,
    pub error_message: String,
}

/// Truncates a printable value to `limits.feedback_char_limit` characters,
/// appending a `(N items, showing first K)` marker for collections per
/// §4.5's feedback-truncation rule.
pub fn truncate_sample(rendered: &str, item_count: Option<usize>, shown: usize, limits: &Limits) -> String {
    let limit = limits.feedback_char_limit;
    let mut out: String = rendered.chars().take(limit).collect();
    let truncated = rendered.chars().count() > limit;
    if truncated {
        out.push('…');
    }
    if let Some(total) = item_count {
        if total > shown {
            out.push_str(&format!(" ({total} items, showing first {shown})"));
        }
    }
    out
}

/// Caps a list of printable samples to `limits.feedback_sample_limit`
/// entries, each individually truncated.
pub fn truncate_samples(samples: &[String], limits: &Limits) -> Vec<String> {
    let shown = limits.feedback_sample_limit.min(samples.len());
    samples[..shown]
        .iter()
        .map(|s| truncate_sample(s, Some(samples.len()), shown, limits))
        .collect()
}

/// Assembles the `single-user-coalesced` USER message: mission, namespace
/// contents, execution history (FIFO-capped), accumulated prints, and —
/// only when the previous turn failed — a single "your previous attempt"
/// block. Ends with a turns-remaining or final-turn notice.
pub fn render_user_message(
    mission: &str,
    namespace_summary: &str,
    tool_calls: &[ToolCallRecord],
    prints: &[String],
    previous_failure: Option<&FailedAttempt>,
    turns_remaining: usize,
    limits: &Limits,
) -> String {
    let mut out = String::new();
    out.push_str(mission);
    out.push_str("\n\n");
    out.push_str(namespace_summary);

    if !tool_calls.is_empty() {
        out.push_str("\n\nExecution history:\n");
        let visible = if tool_calls.len() > limits.tool_call_limit {
            &tool_calls[tool_calls.len() - limits.tool_call_limit..]
        } else {
            tool_calls
        };
        for call in visible {
            out.push_str(&format!("- ({} {}) => {}\n", call.name, call.args, call.result));
        }
    }

    if !prints.is_empty() {
        out.push_str("\n\nOutput so far:\n");
        for line in truncate_samples(prints, limits) {
            out.push_str(&line);
            out.push('\n');
        }
    }

    if let Some(failure) = previous_failure {
        out.push_str("\n\nYour previous attempt:\n```ptclisp\n");
        out.push_str(&failure.program);
        out.push_str("\n```\nError: ");
        out.push_str(&failure.error_message);
        out.push('\n');
    }

    out.push_str("\n\n");
    if turns_remaining == 0 {
        out.push_str("FINAL TURN — you must call (return …) or (fail …) now.");
    } else {
        out.push_str(&format!("Turns left: {turns_remaining}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_sample_marks_elided_items() {
        let limits = Limits::default();
        let out = truncate_sample("a", Some(10), 3, &limits);
        assert!(out.ends_with("(10 items, showing first 3)"));
    }

    #[test]
    fn truncate_sample_elides_long_text() {
        let mut limits = Limits::default();
        limits.feedback_char_limit = 5;
        let out = truncate_sample("abcdefghij", None, 1, &limits);
        assert!(out.starts_with("abcde"));
        assert!(out.contains('…'));
    }

    #[test]
    fn final_turn_message_demands_return_or_fail() {
        let limits = Limits::default();
        let msg = render_user_message("do the thing", "", &[], &[], None, 0, &limits);
        assert!(msg.contains("FINAL TURN"));
    }

    #[test]
    fn previous_failure_is_rendered_once() {
        let limits = Limits::default();
        let failure = FailedAttempt { program: "(+ 1 :x)".to_string(), error_message: "type_error".to_string() };
        let msg = render_user_message("m", "", &[], &[], Some(&failure), 2, &limits);
        assert!(msg.contains("Your previous attempt"));
        assert!(msg.contains("type_error"));
    }
}
