//! Surface tokens with preserved trivia.
//!
//! Tokens keep their leading trivia (whitespace runs, newlines, comments)
//! so the layout inserter can reason about line structure, and carry a
//! [`Presence`] tag distinguishing user-written braces and semicolons from
//! the synthetic ones layout insertion adds. Diagnostics key off that tag
//! ("unexpected end of scope" versus a literal `}`).

use serde::{Deserialize, Serialize};

/// Byte range of a token in its source buffer. Synthetic tokens carry the
/// zero-width span of their insertion point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

/// Reserved words of the surface language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Keyword {
    Module,
    Where,
    Record,
    Data,
    Field,
    Constructor,
    Let,
    In,
    Open,
    Import,
    Infix,
    Infixl,
    Infixr,
    Forall,
    Type,
}

impl Keyword {
    /// The keywords that open a layout block.
    pub fn opens_layout(self) -> bool {
        matches!(self, Keyword::Where | Keyword::Field)
    }

    pub fn from_str(word: &str) -> Option<Keyword> {
        Some(match word {
            "module" => Keyword::Module,
            "where" => Keyword::Where,
            "record" => Keyword::Record,
            "data" => Keyword::Data,
            "field" => Keyword::Field,
            "constructor" => Keyword::Constructor,
            "let" => Keyword::Let,
            "in" => Keyword::In,
            "open" => Keyword::Open,
            "import" => Keyword::Import,
            "infix" => Keyword::Infix,
            "infixl" => Keyword::Infixl,
            "infixr" => Keyword::Infixr,
            "forall" => Keyword::Forall,
            "Type" => Keyword::Type,
            _ => return None,
        })
    }
}

/// What a token is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Ident,
    Keyword(Keyword),
    LBrace,
    RBrace,
    LParen,
    RParen,
    Colon,
    Semi,
    Dot,
    Underscore,
    Eq,
    Pipe,
    Backslash,
    Arrow,
}

/// Whether the user wrote the token or layout insertion produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Presence {
    User,
    Synthetic,
}

/// One piece of leading trivia.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trivia {
    Spaces(u32),
    Tabs(u32),
    Newline,
    Comment(String),
}

/// One run of indentation whitespace. Whitespace equivalence compares
/// these in order, so two spaces never equal one tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndentRun {
    Spaces(u32),
    Tabs(u32),
}

/// A surface token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
    pub presence: Presence,
    pub leading: Vec<Trivia>,
}

impl Token {
    /// A synthetic layout marker at `at`.
    pub fn synthetic(kind: TokenKind, text: &str, at: u32) -> Token {
        Token {
            kind,
            text: text.to_string(),
            span: Span { start: at, end: at },
            presence: Presence::Synthetic,
            leading: Vec::new(),
        }
    }

    /// `true` when this token is the first on its line.
    pub fn starts_line(&self) -> bool {
        self.leading.iter().any(|t| matches!(t, Trivia::Newline))
    }

    /// How a diagnostic should name this token. Synthetic layout markers
    /// read as scope events, not as literal punctuation the user typed.
    pub fn diagnostic_name(&self) -> String {
        if self.presence == Presence::Synthetic {
            return match self.kind {
                TokenKind::LBrace => "opening scope".to_string(),
                TokenKind::RBrace => "end of scope".to_string(),
                TokenKind::Semi => "end of line".to_string(),
                _ => format!("'{}'", self.text),
            };
        }
        format!("'{}'", self.text)
    }

    /// The indentation of this token's line: the space/tab runs between
    /// the nearest preceding newline and the token, in order, ignoring
    /// comment trivia. `None` when the token is not the first on its line.
    pub fn line_indentation(&self) -> Option<Vec<IndentRun>> {
        let last_newline = self
            .leading
            .iter()
            .rposition(|t| matches!(t, Trivia::Newline))?;
        let runs = self.leading[last_newline + 1..]
            .iter()
            .filter_map(|t| match t {
                Trivia::Spaces(n) => Some(IndentRun::Spaces(*n)),
                Trivia::Tabs(n) => Some(IndentRun::Tabs(*n)),
                Trivia::Newline => None,
                Trivia::Comment(_) => None,
            })
            .collect();
        Some(runs)
    }
}

/// `true` when `inner` is strictly deeper-or-unrelated and `outer` is a
/// proper prefix of `inner` -- the dedent test for closing layout blocks.
pub fn is_indent_prefix(outer: &[IndentRun], inner: &[IndentRun]) -> bool {
    if outer.len() > inner.len() {
        return false;
    }
    if outer.is_empty() {
        return true;
    }
    let (last, head) = outer.split_last().unwrap();
    if head != &inner[..head.len()] {
        return false;
    }
    match (last, &inner[head.len()]) {
        (IndentRun::Spaces(a), IndentRun::Spaces(b)) => a <= b,
        (IndentRun::Tabs(a), IndentRun::Tabs(b)) => a <= b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_keywords() {
        assert!(Keyword::Where.opens_layout());
        assert!(Keyword::Field.opens_layout());
        assert!(!Keyword::Data.opens_layout());
        assert!(!Keyword::Let.opens_layout());
    }

    #[test]
    fn line_indentation_ignores_comments() {
        let token = Token {
            kind: TokenKind::Ident,
            text: "f".into(),
            span: Span { start: 20, end: 21 },
            presence: Presence::User,
            leading: vec![
                Trivia::Newline,
                Trivia::Spaces(2),
                Trivia::Comment("-- note".into()),
                Trivia::Tabs(1),
            ],
        };
        assert_eq!(
            token.line_indentation(),
            Some(vec![IndentRun::Spaces(2), IndentRun::Tabs(1)])
        );
    }

    #[test]
    fn mid_line_tokens_have_no_indentation() {
        let token = Token {
            kind: TokenKind::Colon,
            text: ":".into(),
            span: Span { start: 3, end: 4 },
            presence: Presence::User,
            leading: vec![Trivia::Spaces(1)],
        };
        assert!(!token.starts_line());
        assert_eq!(token.line_indentation(), None);
    }

    #[test]
    fn spaces_and_tabs_are_not_interchangeable() {
        let two_spaces = vec![IndentRun::Spaces(2)];
        let one_tab = vec![IndentRun::Tabs(1)];
        assert_ne!(two_spaces, one_tab);
        assert!(!is_indent_prefix(&two_spaces, &one_tab));
        assert!(is_indent_prefix(&two_spaces, &[IndentRun::Spaces(4)]));
        assert!(is_indent_prefix(&[], &one_tab));
        assert!(!is_indent_prefix(
            &[IndentRun::Spaces(2), IndentRun::Tabs(1)],
            &[IndentRun::Spaces(2)]
        ));
    }

    #[test]
    fn serde_roundtrip_token() {
        let token = Token::synthetic(TokenKind::Semi, ";", 9);
        let json = serde_json::to_string(&token).unwrap();
        let back: Token = serde_json::from_str(&json).unwrap();
        assert_eq!(token, back);
    }

    #[test]
    fn synthetic_markers_diagnose_as_scope_events() {
        assert_eq!(
            Token::synthetic(TokenKind::LBrace, "{", 0).diagnostic_name(),
            "opening scope"
        );
        assert_eq!(
            Token::synthetic(TokenKind::RBrace, "}", 0).diagnostic_name(),
            "end of scope"
        );
        assert_eq!(
            Token::synthetic(TokenKind::Semi, ";", 0).diagnostic_name(),
            "end of line"
        );
        let user = Token {
            kind: TokenKind::RBrace,
            text: "}".into(),
            span: Span { start: 0, end: 1 },
            presence: Presence::User,
            leading: vec![],
        };
        assert_eq!(user.diagnostic_name(), "'}'");
    }
}
