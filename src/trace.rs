// ABOUTME: Structured trace event stream for external telemetry sinks

use serde::Serialize;
use uuid::Uuid;

/// One record in the newline-delimited trace stream (§6.4). Every event
/// carries identity (`trace_id`, optional parent) and a timestamp; payload
/// fields vary by `kind`.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub trace_id: Uuid,
    pub parent_span_id: Option<Uuid>,
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub kind: TraceKind,
}

/// The sanitized metadata map every event carries: large strings, functions,
/// and refs are flattened to placeholder strings before reaching a sink, so
/// sinks never see interpreter internals.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceKind {
    TraceStart,
    RunStart { agent_name: Option<String> },
    TurnStart { turn: usize },
    LlmStart,
    LlmStop { input_tokens: usize, output_tokens: usize },
    ToolStart { name: String },
    ToolStop { name: String, duration_ms: u64, child_trace_id: Option<Uuid> },
    PmapStart { child_trace_ids: Vec<Uuid> },
    PmapStop { child_trace_ids: Vec<Uuid> },
    TurnStop { turn: usize, success: bool },
    RunStop { success: bool },
    TraceStop,
}

/// Caps a string going into event metadata; anything over the limit is
/// replaced with a `<N chars elided>` placeholder, matching the "large
/// strings become placeholders" rule in §6.4.
pub fn sanitize_string(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(limit).collect();
        format!("{truncated}<{} more chars elided>", s.chars().count() - limit)
    }
}

/// An append-only, thread-safe observer of the trace stream. Implementors
/// may buffer, write to a file, or forward over the network — this crate
/// ships only [`NullSink`], the default; any real transport is the
/// caller's concern.
pub trait TraceSink: Send + Sync {
    fn emit(&self, event: &TraceEvent);
}

/// Discards every event. The default sink when a caller doesn't supply one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn emit(&self, _event: &TraceEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_string_passes_short_strings_through() {
        assert_eq!(sanitize_string("hi", 10), "hi");
    }

    #[test]
    fn sanitize_string_elides_long_strings() {
        let long = "x".repeat(100);
        let out = sanitize_string(&long, 10);
        assert!(out.starts_with(&"x".repeat(10)));
        assert!(out.contains("elided"));
    }

    #[test]
    fn null_sink_accepts_any_event_without_panicking() {
        let sink = NullSink;
        sink.emit(&TraceEvent {
            trace_id: Uuid::nil(),
            parent_span_id: None,
            timestamp_ms: 0,
            kind: TraceKind::TraceStart,
        });
    }
}
