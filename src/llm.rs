// ABOUTME: LLM callback contract — no transport, the caller supplies the implementation

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// One SYSTEM/USER round-trip request. `on_chunk`, when present, is invoked
/// with each streaming delta; a panic inside it is caught at the call site
/// and degrades to non-streaming rather than crashing the turn loop.
pub struct LlmRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub on_chunk: Option<Box<dyn FnMut(&str) + Send>>,
}

impl fmt::Debug for LlmRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmRequest")
            .field("system", &self.system)
            .field("messages", &self.messages)
            .field("on_chunk", &self.on_chunk.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: usize,
    pub output: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmResponse {
    pub content: String,
    pub tokens: TokenUsage,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("llm callback failed: {0}")]
    CallbackFailed(String),
}

/// `dyn Fn(LlmRequest) -> Result<LlmResponse, LlmError> + Send + Sync`, per
/// §6.2 — the loop never constructs a transport itself.
pub type LlmCallback = dyn Fn(LlmRequest) -> Result<LlmResponse, LlmError> + Send + Sync;

/// Invokes `request.on_chunk` with `delta`, catching any panic raised inside
/// the caller-supplied closure so a buggy streaming observer can never
/// crash the turn loop (§4.5/§9).
pub fn emit_chunk(request: &mut LlmRequest, delta: &str) {
    if let Some(on_chunk) = request.on_chunk.as_mut() {
        let result = catch_unwind(AssertUnwindSafe(|| on_chunk(delta)));
        if result.is_err() {
            request.on_chunk = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_chunk_disables_a_panicking_observer_without_propagating() {
        let mut request = LlmRequest {
            system: String::new(),
            messages: vec![],
            on_chunk: Some(Box::new(|_delta: &str| panic!("boom"))),
        };
        emit_chunk(&mut request, "hello");
        assert!(request.on_chunk.is_none());
    }

    #[test]
    fn emit_chunk_forwards_deltas_to_a_well_behaved_observer() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(String::new()));
        let seen_clone = seen.clone();
        let mut request = LlmRequest {
            system: String::new(),
            messages: vec![],
            on_chunk: Some(Box::new(move |delta: &str| {
                seen_clone.lock().unwrap().push_str(delta);
            })),
        };
        emit_chunk(&mut request, "hi");
        assert_eq!(*seen.lock().unwrap(), "hi");
    }
}
