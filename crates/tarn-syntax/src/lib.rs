//! Surface token pipeline for the tarn compiler: lexing and
//! whitespace-sensitive layout insertion.
//!
//! The [`lexer`] produces trivia-preserving tokens; the [`layout`]
//! inserter turns the offside rule into explicit (but synthetic-tagged)
//! `{`, `;`, `}` markers the parser consumes.

pub mod error;
pub mod layout;
pub mod lexer;
pub mod token;

// Re-export commonly used types
pub use error::SyntaxError;
pub use layout::insert_layout;
pub use lexer::lex;
pub use token::{IndentRun, Keyword, Presence, Span, Token, TokenKind, Trivia};

/// Lexes and layout-processes a source buffer in one step.
pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    insert_layout(lex(source)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_runs_both_stages() {
        let tokens = tokenize("module M where\n  f = g\n").unwrap();
        assert!(tokens.iter().any(|t| t.presence == Presence::Synthetic));
    }
}
