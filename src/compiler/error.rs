use thiserror::Error;

/// Compile-time failures. Any of these aborts compilation of the current
/// template; no partial output is valid.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Can't assign to special loop variable in for-loop target (line {lineno})")]
    ReservedBinding { lineno: usize },
    #[error("{reason} (line {lineno})")]
    UnsupportedCallForm { reason: String, lineno: usize },
    /// Internal invariant violation: the grammar extension never produces a
    /// Compare node mixing operand categories.
    #[error("Compare node mixes membership and relational operators (line {lineno})")]
    GrammarViolation { lineno: usize },
    #[error("Failed to write generated template: {0}")]
    Io(#[from] std::io::Error),
}

pub type CompileResult<T> = Result<T, CompileError>;
