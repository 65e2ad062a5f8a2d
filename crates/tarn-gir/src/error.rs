//! Core error types for the GraphIR.
//!
//! Uses `thiserror` for structured, matchable error variants. Errors are
//! tagged values, never ambient exceptions; `InternalInvariantViolation` is
//! reserved for conditions the pipeline treats as fatal.

use thiserror::Error;

use crate::id::ValueId;

/// A single verification finding, tied to the continuation it was found in.
#[derive(Debug, Clone, Error)]
#[error("in @{continuation}: {reason}")]
pub struct VerificationFailure {
    /// Name of the continuation the failure was found in.
    pub continuation: String,
    /// Human-readable description of the violated contract.
    pub reason: String,
}

/// Errors produced by the GraphIR core.
#[derive(Debug, Error)]
pub enum GirError {
    /// An IR builder precondition was violated (arity mismatch, wrong
    /// category, unknown callee or constructor).
    #[error("ill-typed construction: {reason}")]
    IllTypedConstruction { reason: String },

    /// Module verification found contract violations.
    #[error("verification failed with {} failure(s)", .0.len())]
    VerificationFailed(Vec<VerificationFailure>),

    /// The textual GIR reader rejected its input.
    #[error("line {line}: {message}")]
    IllFormedInput { line: u32, message: String },

    /// A second definition for a named value while a forward reference to
    /// it was outstanding.
    #[error("redefinition of '{name}'")]
    RedefinitionError { name: String },

    /// A value ID did not resolve to a live value.
    #[error("value not found: ValueId({id})", id = id.0)]
    ValueNotFound { id: ValueId },

    /// A pass requested by name does not exist.
    #[error("unknown pass: '{name}'")]
    UnknownPass { name: String },

    /// A condition implementations treat as fatal (reentrant pipeline
    /// execution, reserved schedule tags, negative layout depth).
    #[error("internal invariant violation: {reason}")]
    InternalInvariantViolation { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_continuation_name() {
        let failure = VerificationFailure {
            continuation: "main".into(),
            reason: "continuation has no terminal".into(),
        };
        assert_eq!(failure.to_string(), "in @main: continuation has no terminal");
    }

    #[test]
    fn verification_failed_counts() {
        let err = GirError::VerificationFailed(vec![
            VerificationFailure { continuation: "a".into(), reason: "x".into() },
            VerificationFailure { continuation: "b".into(), reason: "y".into() },
        ]);
        assert_eq!(err.to_string(), "verification failed with 2 failure(s)");
    }
}
