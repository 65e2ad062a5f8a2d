//! Error types for the surface token pipeline.

use thiserror::Error;

use crate::token::Span;

/// Errors from the lexer and the layout inserter.
#[derive(Debug, Clone, Error)]
pub enum SyntaxError {
    /// The input is not lexable or the brace structure is impossible.
    #[error("{message} at byte {start}", start = span.start)]
    IllFormedInput { span: Span, message: String },

    /// Conditions the pipeline treats as fatal, like popping past the
    /// outermost layout block.
    #[error("internal invariant violation: {reason}")]
    InternalInvariantViolation { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_position() {
        let err = SyntaxError::IllFormedInput {
            span: Span { start: 12, end: 13 },
            message: "unexpected '~'".into(),
        };
        assert_eq!(err.to_string(), "unexpected '~' at byte 12");
    }
}
