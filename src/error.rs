// ABOUTME: Error types for evaluation failures and the external error taxonomy

use crate::value::Value;
use serde::Serialize;
use thiserror::Error;

// ===== Arity constant strings (eliminates allocations in error paths) =====
pub const ARITY_ONE: &str = "1";
pub const ARITY_TWO: &str = "2";
pub const ARITY_AT_LEAST_ONE: &str = "at least 1";
pub const ARITY_ONE_OR_TWO: &str = "1-2";
pub const ARITY_TWO_OR_THREE: &str = "2-3";

/// Internal evaluation error, rich with the context needed to build a
/// [`Taxon`] for callers. Never crosses the host API boundary directly.
#[derive(Error, Debug, Clone)]
pub enum EvalError {
    #[error("{function}: expected {expected}, got {actual} at argument {position}")]
    TypeMismatch {
        function: String,
        expected: String,
        actual: String,
        position: usize,
    },

    #[error("{function}: expected {expected} argument{}, got {actual}", if *.expected == "1" { "" } else { "s" })]
    ArityError {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("{function}: {message}")]
    RuntimeError { function: String, message: String },

    #[error("Undefined symbol: {0}")]
    UndefinedSymbol(String),

    #[error("Value is not callable: {0}")]
    NotCallable(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool '{tool}' failed: {message}")]
    ToolError { tool: String, reason: String, message: String },

    #[error("Program raised: {0}")]
    Raised(String),

    #[error("Resource limit exceeded: {0}")]
    ResourceExceeded(String),

    #[error("Evaluation timed out")]
    Timeout,

    #[error("Maximum sub-agent nesting depth exceeded: {0}")]
    DepthExceeded(usize),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Analysis error: {0}")]
    AnalysisError(String),

    #[error("Destructure error: {0}")]
    DestructureError(String),

    /// `(return v)` — unwinds to the turn boundary carrying the return
    /// value. Not a "real" error; propagated via `?` purely so evaluation
    /// of the rest of the program stops immediately (§4.3's "further
    /// expressions in the same program are not evaluated").
    #[error("turn returned")]
    Return(Box<Value>),

    /// `(fail e)` — unwinds to the turn boundary carrying the fail value.
    #[error("turn failed")]
    Fail(Box<Value>),
}

impl EvalError {
    pub fn type_error(function: &str, expected: &str, actual: &Value, position: usize) -> Self {
        EvalError::TypeMismatch {
            function: function.to_string(),
            expected: expected.to_string(),
            actual: actual.type_name().to_string(),
            position,
        }
    }

    pub fn arity_error(function: &str, expected: impl Into<String>, actual: usize) -> Self {
        EvalError::ArityError {
            function: function.to_string(),
            expected: expected.into(),
            actual,
        }
    }

    pub fn runtime_error(function: &str, message: impl Into<String>) -> Self {
        EvalError::RuntimeError {
            function: function.to_string(),
            message: message.into(),
        }
    }

    pub fn destructure_error(message: impl Into<String>) -> Self {
        EvalError::DestructureError(message.into())
    }

    /// The `:reason` keyword this error surfaces as, per the fixed taxonomy.
    pub fn reason(&self) -> Reason {
        match self {
            EvalError::TypeMismatch { .. } => Reason::TypeError,
            EvalError::ArityError { .. } => Reason::ArityError,
            EvalError::RuntimeError { .. } => Reason::RuntimeError,
            EvalError::UndefinedSymbol(_) => Reason::UndefinedSymbol,
            EvalError::NotCallable(_) => Reason::NotCallable,
            EvalError::UnknownTool(_) => Reason::UnknownTool,
            EvalError::ToolError { reason, .. } => {
                if reason == "cycle_detected" {
                    Reason::CycleDetected
                } else {
                    Reason::ToolError
                }
            }
            EvalError::Raised(_) => Reason::Raised,
            EvalError::ResourceExceeded(_) => Reason::HeapLimit,
            EvalError::Timeout => Reason::Timeout,
            EvalError::DepthExceeded(_) => Reason::DepthExceeded,
            EvalError::ParseError(_) => Reason::ParseError,
            EvalError::AnalysisError(_) => Reason::AnalysisError,
            EvalError::DestructureError(_) => Reason::DestructureError,
            EvalError::Return(_) => Reason::Raised,
            EvalError::Fail(_) => Reason::Raised,
        }
    }

    /// Convert to the wire-shaped error value every API boundary returns.
    pub fn to_taxon(&self) -> Taxon {
        let (op, details) = match self {
            EvalError::TypeMismatch { function, .. } => (Some(function.clone()), None),
            EvalError::ArityError { function, .. } => (Some(function.clone()), None),
            EvalError::RuntimeError { function, .. } => (Some(function.clone()), None),
            EvalError::ToolError { tool, .. } => (Some(tool.clone()), None),
            _ => (None, None),
        };
        Taxon {
            reason: self.reason(),
            message: self.to_string(),
            op,
            details,
        }
    }
}

/// The fixed set of error reasons a caller may observe, per the error
/// taxonomy. Non-exhaustive so adding a reason is not a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    ParseError,
    AnalysisError,
    TypeError,
    ArityError,
    RuntimeError,
    UndefinedSymbol,
    NotCallable,
    UnknownTool,
    ToolError,
    Raised,
    HeapLimit,
    Timeout,
    DepthExceeded,
    BudgetExceeded,
    MaxTurns,
    SignatureMismatch,
    LlmError,
    Cancelled,
    CycleDetected,
    DestructureError,
}

/// The wire shape of an error every external-facing API returns:
/// `{reason, message, op?, details?}`.
#[derive(Debug, Clone, Serialize)]
pub struct Taxon {
    pub reason: Reason,
    pub message: String,
    pub op: Option<String>,
    pub details: Option<Value>,
}

impl Taxon {
    pub fn new(reason: Reason, message: impl Into<String>) -> Self {
        Taxon {
            reason,
            message: message.into(),
            op: None,
            details: None,
        }
    }

    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}
