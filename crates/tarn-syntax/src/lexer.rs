//! The surface lexer.
//!
//! Produces trivia-preserving [`Token`]s: every token carries the
//! whitespace runs, newlines, and `--` comments that precede it, which is
//! exactly what the layout inserter needs to reconstruct line structure.

use crate::error::SyntaxError;
use crate::token::{Keyword, Presence, Span, Token, TokenKind, Trivia};

/// Lexes a whole source buffer.
pub fn lex(source: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    let bytes = source.as_bytes();
    let mut pos = 0usize;
    let mut leading: Vec<Trivia> = Vec::new();

    while pos < bytes.len() {
        let rest = &source[pos..];
        let c = rest.chars().next().unwrap();

        // Trivia.
        match c {
            '\n' => {
                leading.push(Trivia::Newline);
                pos += 1;
                continue;
            }
            '\r' => {
                pos += 1;
                continue;
            }
            ' ' => {
                let n = rest.chars().take_while(|&c| c == ' ').count();
                leading.push(Trivia::Spaces(n as u32));
                pos += n;
                continue;
            }
            '\t' => {
                let n = rest.chars().take_while(|&c| c == '\t').count();
                leading.push(Trivia::Tabs(n as u32));
                pos += n;
                continue;
            }
            '-' if rest.starts_with("--") => {
                let len = rest.find('\n').unwrap_or(rest.len());
                leading.push(Trivia::Comment(rest[..len].to_string()));
                pos += len;
                continue;
            }
            _ => {}
        }

        let start = pos as u32;
        let (kind, len) = match c {
            '{' => (TokenKind::LBrace, 1),
            '}' => (TokenKind::RBrace, 1),
            '(' => (TokenKind::LParen, 1),
            ')' => (TokenKind::RParen, 1),
            ':' => (TokenKind::Colon, 1),
            ';' => (TokenKind::Semi, 1),
            '.' => (TokenKind::Dot, 1),
            '=' => (TokenKind::Eq, 1),
            '|' => (TokenKind::Pipe, 1),
            '\\' => (TokenKind::Backslash, 1),
            '→' => (TokenKind::Arrow, '→'.len_utf8()),
            '-' if rest.starts_with("->") => (TokenKind::Arrow, 2),
            '_' if rest[1..].chars().next().map(|c| !is_ident_continue(c)).unwrap_or(true) => {
                (TokenKind::Underscore, 1)
            }
            c if is_ident_start(c) => {
                let len = rest.chars().take_while(|&c| is_ident_continue(c)).map(char::len_utf8).sum();
                let word = &rest[..len];
                let kind = match Keyword::from_str(word) {
                    Some(kw) => TokenKind::Keyword(kw),
                    None => TokenKind::Ident,
                };
                (kind, len)
            }
            other => {
                return Err(SyntaxError::IllFormedInput {
                    span: Span { start, end: start + other.len_utf8() as u32 },
                    message: format!("unexpected character '{}'", other),
                })
            }
        };

        tokens.push(Token {
            kind,
            text: rest[..len].to_string(),
            span: Span { start, end: start + len as u32 },
            presence: Presence::User,
            leading: std::mem::take(&mut leading),
        });
        pos += len;
    }

    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '\''
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::IndentRun;

    #[test]
    fn keywords_and_identifiers() {
        let tokens = lex("module M where").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Module));
        assert_eq!(tokens[1].kind, TokenKind::Ident);
        assert_eq!(tokens[1].text, "M");
        assert_eq!(tokens[2].kind, TokenKind::Keyword(Keyword::Where));
    }

    #[test]
    fn both_arrow_spellings() {
        let tokens = lex("A -> B → C").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Arrow);
        assert_eq!(tokens[3].kind, TokenKind::Arrow);
    }

    #[test]
    fn trivia_is_preserved_in_order() {
        let tokens = lex("a\n  \tb").unwrap();
        assert_eq!(
            tokens[1].leading,
            vec![Trivia::Newline, Trivia::Spaces(2), Trivia::Tabs(1)]
        );
        assert_eq!(
            tokens[1].line_indentation(),
            Some(vec![IndentRun::Spaces(2), IndentRun::Tabs(1)])
        );
    }

    #[test]
    fn comments_are_trivia_not_tokens() {
        let tokens = lex("a -- trailing\nb").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(
            tokens[1].leading,
            vec![
                Trivia::Spaces(1),
                Trivia::Comment("-- trailing".into()),
                Trivia::Newline,
            ]
        );
        assert!(tokens[1].starts_line());
    }

    #[test]
    fn underscore_alone_versus_in_identifier() {
        let tokens = lex("_ _x x_").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Underscore);
        assert_eq!(tokens[1].kind, TokenKind::Ident);
        assert_eq!(tokens[1].text, "_x");
        assert_eq!(tokens[2].kind, TokenKind::Ident);
    }

    #[test]
    fn punctuation_inventory() {
        let tokens = lex("{ } ( ) : ; . = | \\").unwrap();
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Colon,
                TokenKind::Semi,
                TokenKind::Dot,
                TokenKind::Eq,
                TokenKind::Pipe,
                TokenKind::Backslash,
            ]
        );
    }

    #[test]
    fn rejects_unknown_characters() {
        let err = lex("a ~ b").unwrap_err();
        assert!(matches!(err, SyntaxError::IllFormedInput { .. }));
    }

    proptest::proptest! {
        #[test]
        fn word_streams_lex_one_token_per_word(words in proptest::collection::vec("[a-z][a-z0-9_]{0,7}", 1..8)) {
            let source = words.join(" ");
            let tokens = lex(&source).unwrap();
            proptest::prop_assert_eq!(tokens.len(), words.len());
            for (token, word) in tokens.iter().zip(words.iter()) {
                proptest::prop_assert_eq!(&token.text, word);
            }
        }

        #[test]
        fn spans_cover_their_text(source in "[a-z():=\\n ]{0,40}") {
            if let Ok(tokens) = lex(&source) {
                for token in tokens {
                    let slice = &source[token.span.start as usize..token.span.end as usize];
                    proptest::prop_assert_eq!(slice, token.text);
                }
            }
        }
    }
}
