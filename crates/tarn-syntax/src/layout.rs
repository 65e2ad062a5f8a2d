//! The layout inserter: whitespace-sensitive block structure to braces.
//!
//! Maintains a stack of layout blocks, each explicit (user-written `{`) or
//! implicit (opened by a layout keyword with no brace following). The
//! inserter threads through the token stream and emits synthetic `{`, `;`,
//! and `}` markers, tagged [`Presence::Synthetic`] so the parser can
//! diagnose them as scope events rather than literal punctuation:
//!
//! - a layout keyword (`where`, `field`) followed by `{` pushes an
//!   explicit block; otherwise an implicit block is pushed, a synthetic
//!   `{` is emitted, and the following token becomes the line leader;
//! - a token starting a new line with indentation whitespace-equivalent to
//!   the leader's gets a synthetic `;` in front; a dedent below the leader
//!   closes implicit blocks with synthetic `}`s;
//! - a user `}` closes implicit blocks (synthetic `}` and `;` each) until
//!   it pops its explicit block; popping past the outermost block is
//!   fatal;
//! - EOF closes all remaining implicit blocks.
//!
//! Whitespace equivalence compares space and tab runs in order from the
//! nearest preceding newline, ignoring comment trivia; two spaces are
//! never equivalent to one tab.

use tracing::trace;

use crate::error::SyntaxError;
use crate::token::{is_indent_prefix, IndentRun, Presence, Token, TokenKind};

struct LayoutBlock {
    explicit: bool,
    /// Line indentation of the block's leader token. `None` when the
    /// leader sat mid-line; such blocks close only at `}` or EOF.
    leader: Option<Vec<IndentRun>>,
}

/// Runs layout insertion over a lexed token stream.
pub fn insert_layout(tokens: Vec<Token>) -> Result<Vec<Token>, SyntaxError> {
    let mut out: Vec<Token> = Vec::new();
    let mut stack: Vec<LayoutBlock> = Vec::new();
    // The token right after a layout keyword is its block's leader, not a
    // new item; skip the separator check for it once.
    let mut fresh_block = false;

    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        let at = token.span.start;

        // Line-structure handling before the token itself.
        if token.starts_line() && !fresh_block {
            if let Some(indent) = token.line_indentation() {
                // Close implicit blocks the line has dedented out of.
                while matches!(stack.last(), Some(b) if !b.explicit)
                    && stack
                        .last()
                        .and_then(|b| b.leader.as_ref())
                        .map(|leader| {
                            indent != *leader && is_indent_prefix(&indent, leader)
                        })
                        .unwrap_or(false)
                {
                    stack.pop();
                    out.push(Token::synthetic(TokenKind::RBrace, "}", at));
                }
                // A new item at the leader's indentation.
                if matches!(stack.last(), Some(b) if !b.explicit)
                    && stack.last().unwrap().leader.as_deref() == Some(indent.as_slice())
                {
                    out.push(Token::synthetic(TokenKind::Semi, ";", at));
                }
            }
        }
        fresh_block = false;

        match token.kind {
            TokenKind::RBrace if token.presence == Presence::User => {
                // Close implicit blocks until this brace's explicit block
                // pops.
                loop {
                    match stack.pop() {
                        Some(block) if block.explicit => break,
                        Some(_) => {
                            out.push(Token::synthetic(TokenKind::RBrace, "}", at));
                            out.push(Token::synthetic(TokenKind::Semi, ";", at));
                        }
                        None => {
                            return Err(SyntaxError::InternalInvariantViolation {
                                reason: "layout depth dropped below zero".into(),
                            })
                        }
                    }
                }
                out.push(token);
            }
            TokenKind::Keyword(kw) if kw.opens_layout() => {
                out.push(token);
                match iter.peek() {
                    Some(next) if next.kind == TokenKind::LBrace => {
                        stack.push(LayoutBlock { explicit: true, leader: None });
                        // The brace itself is emitted on its own turn.
                    }
                    Some(next) => {
                        let leader = next.line_indentation();
                        trace!(?leader, "opening implicit block");
                        stack.push(LayoutBlock { explicit: false, leader });
                        out.push(Token::synthetic(TokenKind::LBrace, "{", next.span.start));
                        fresh_block = true;
                    }
                    None => {
                        // Layout keyword at EOF opens and closes an empty
                        // block.
                        out.push(Token::synthetic(TokenKind::LBrace, "{", at));
                        out.push(Token::synthetic(TokenKind::RBrace, "}", at));
                    }
                }
            }
            _ => out.push(token),
        }
    }

    // EOF closes what is left; explicit blocks must have been closed by
    // their own braces.
    let end = out.last().map(|t| t.span.end).unwrap_or(0);
    while let Some(block) = stack.pop() {
        if block.explicit {
            return Err(SyntaxError::IllFormedInput {
                span: crate::token::Span { start: end, end },
                message: "unclosed '{' at end of input".into(),
            });
        }
        out.push(Token::synthetic(TokenKind::RBrace, "}", end));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn render(tokens: &[Token]) -> String {
        tokens
            .iter()
            .map(|t| match t.presence {
                Presence::Synthetic => format!("<{}>", t.text),
                Presence::User => t.text.clone(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn module_body_gets_braces_and_separator() {
        let tokens = lex("module M where\n  f : A\n  f = g\n").unwrap();
        let out = insert_layout(tokens).unwrap();
        assert_eq!(render(&out), "module M where <{> f : A <;> f = g <}>");

        // All three markers carry the synthetic tag.
        let synthetic: Vec<&str> = out
            .iter()
            .filter(|t| t.presence == Presence::Synthetic)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(synthetic, vec!["{", ";", "}"]);
    }

    #[test]
    fn explicit_braces_are_untouched() {
        let tokens = lex("module M where { f = g; h = i }").unwrap();
        let out = insert_layout(tokens).unwrap();
        assert!(out.iter().all(|t| t.presence == Presence::User));
    }

    #[test]
    fn nested_field_block_closes_on_dedent() {
        let source = "module M where\n  record R where\n    field\n      x\n  f = g\n";
        let out = insert_layout(lex(source).unwrap()).unwrap();
        assert_eq!(
            render(&out),
            "module M where <{> record R where <{> field <{> x <}> <}> <;> f = g <}>"
        );
    }

    #[test]
    fn user_brace_closes_implicit_blocks() {
        // The explicit outer block is closed while an implicit inner block
        // is still open; the inner one closes synthetically first.
        let source = "module M where { f = g where\n  h }";
        let out = insert_layout(lex(source).unwrap()).unwrap();
        assert_eq!(render(&out), "module M where { f = g where <{> h <}> <;> }");
    }

    #[test]
    fn stray_closing_brace_is_fatal() {
        let err = insert_layout(lex("module M where\n  f }").unwrap()).unwrap_err();
        assert!(matches!(err, SyntaxError::InternalInvariantViolation { .. }));
    }

    #[test]
    fn unclosed_explicit_brace_is_reported() {
        let err = insert_layout(lex("module M where { f = g").unwrap()).unwrap_err();
        assert!(matches!(err, SyntaxError::IllFormedInput { .. }));
    }

    #[test]
    fn tabs_do_not_match_spaces() {
        // The second line is indented with a tab, the leader with two
        // spaces: not whitespace-equivalent, so no separator is inserted.
        let source = "module M where\n  f = g\n\th = i\n";
        let out = insert_layout(lex(source).unwrap()).unwrap();
        let semis = out
            .iter()
            .filter(|t| t.kind == TokenKind::Semi && t.presence == Presence::Synthetic)
            .count();
        assert_eq!(semis, 0);
    }

    #[test]
    fn blank_and_comment_lines_do_not_separate() {
        let source = "module M where\n  f : A\n\n  -- about f\n  f = g\n";
        let out = insert_layout(lex(source).unwrap()).unwrap();
        assert_eq!(render(&out), "module M where <{> f : A <;> f = g <}>");
    }
}
