// ABOUTME: Centralized numeric defaults for sandbox, turn loop, and feedback truncation

use std::time::Duration;

/// Every resource/budget knob the spec scatters across `AgentSpec`/`RunOpts`/
/// `Sandbox`, collected in one `Default`-implementing struct so callers
/// override only the fields they care about rather than re-declaring bare
/// numeric parameters everywhere.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Best-effort heap ceiling for a single program evaluation, in bytes.
    pub max_heap: usize,
    /// Wall-clock deadline for a single program evaluation.
    pub timeout: Duration,
    /// Deadline for a single `pmap`/`pcalls` fan-out.
    pub pmap_timeout: Duration,
    /// Upper bound on `pmap`/`pcalls` fan-out width.
    pub max_parallelism: usize,
    /// Cumulative LLM token budget for one `run`.
    pub token_limit: Option<usize>,
    /// Cumulative turn-count budget for one `run`.
    pub turn_budget: Option<usize>,
    /// Max nested sub-agent depth.
    pub max_depth: usize,
    /// Max turns before a run fails with `:max_turns`.
    pub max_turns: usize,
    /// Extra turns permitted for signature-mismatch retries, on top of `max_turns`.
    pub retry_turns: usize,
    /// FIFO cap on the tool-call history rendered into the user message.
    pub tool_call_limit: usize,
    /// Overall deadline across every turn of a `run`.
    pub mission_timeout: Duration,
    /// Max number of printable samples shown per feedback truncation.
    pub feedback_sample_limit: usize,
    /// Max characters shown per printable sample.
    pub feedback_char_limit: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_heap: 10 * 1024 * 1024,
            timeout: Duration::from_secs(1),
            pmap_timeout: Duration::from_secs(1),
            max_parallelism: 8,
            token_limit: None,
            turn_budget: None,
            max_depth: 5,
            max_turns: 10,
            retry_turns: 3,
            tool_call_limit: 20,
            mission_timeout: Duration::from_secs(60),
            feedback_sample_limit: 3,
            feedback_char_limit: 512,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_spec_named_values() {
        let limits = Limits::default();
        assert_eq!(limits.max_heap, 10 * 1024 * 1024);
        assert_eq!(limits.timeout, Duration::from_secs(1));
        assert_eq!(limits.feedback_sample_limit, 3);
    }
}
