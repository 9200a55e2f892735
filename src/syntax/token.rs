//! Token kinds for the host language.
//!
//! Whitespace is skipped by `logos`; comments come out as `Comment` tokens and
//! are dropped by the wrapper unless asked for. Template literals are not
//! produced by `logos` directly; the wrapper in `lexer.rs` scans template text by
//! hand and emits the `Template*` kinds.

use logos::{Lexer, Logos};
use serde::Serialize;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[logos(skip r"[ \t\r\n\f\u{FEFF}\u{00A0}]+")]
pub enum TokenKind {
    #[regex(r"[\p{XID_Start}_$][\p{XID_Continue}$\u{200C}\u{200D}]*")]
    Ident,

    #[regex(r"#[\p{XID_Start}_$][\p{XID_Continue}$\u{200C}\u{200D}]*")]
    PrivateName,

    #[regex(r"//[^\n]*")]
    #[token("/*", block_comment)]
    Comment,

    #[regex(r"[0-9][0-9_]*(\.[0-9_]*)?([eE][+-]?[0-9]+)?n?")]
    #[regex(r"\.[0-9][0-9_]*([eE][+-]?[0-9]+)?")]
    #[regex(r"0[xX][0-9a-fA-F_]+n?")]
    #[regex(r"0[bB][01_]+n?")]
    #[regex(r"0[oO][0-7_]+n?")]
    Number,

    #[regex(r#""([^"\\\n]|\\(.|\n))*""#)]
    #[regex(r"'([^'\\\n]|\\(.|\n))*'")]
    String,

    /// Opening backtick; replaced by a template token in the wrapper.
    #[token("`")]
    Backtick,

    #[token("{")]
    #[token("}")]
    #[token("(")]
    #[token(")")]
    #[token("[")]
    #[token("]")]
    #[token(";")]
    #[token(",")]
    #[token("<")]
    #[token(">")]
    #[token("<=")]
    #[token("<<")]
    #[token("<<=")]
    #[token("=")]
    #[token("==")]
    #[token("===")]
    #[token("!=")]
    #[token("!==")]
    #[token("=>")]
    #[token("+")]
    #[token("-")]
    #[token("*")]
    #[token("/")]
    #[token("%")]
    #[token("**")]
    #[token("++")]
    #[token("--")]
    #[token("+=")]
    #[token("-=")]
    #[token("*=")]
    #[token("/=")]
    #[token("%=")]
    #[token("**=")]
    #[token("&")]
    #[token("|")]
    #[token("^")]
    #[token("&=")]
    #[token("|=")]
    #[token("^=")]
    #[token("&&")]
    #[token("||")]
    #[token("&&=")]
    #[token("||=")]
    #[token("??")]
    #[token("??=")]
    #[token("!")]
    #[token("~")]
    #[token("?")]
    #[token("?.")]
    #[token(":")]
    #[token(".")]
    #[token("...")]
    #[token("@")]
    #[token("#")]
    Punct,

    /// `` `text` `` with no substitutions.
    NoSubstitutionTemplate,
    /// `` `text${ ``
    TemplateHead,
    /// `}text${`
    TemplateMiddle,
    /// `` }text` ``
    TemplateTail,

    /// Any character the lexer does not recognise.
    Unknown,
}

/// Consumes a block comment body up to and including `*/`. An unterminated
/// comment runs to the end of input.
fn block_comment(lex: &mut Lexer<TokenKind>) -> bool {
    let rest = lex.remainder();
    let len = rest.find("*/").map_or(rest.len(), |i| i + 2);
    lex.bump(len);
    true
}

impl TokenKind {
    pub fn is_template(&self) -> bool {
        matches!(
            self,
            TokenKind::NoSubstitutionTemplate
                | TokenKind::TemplateHead
                | TokenKind::TemplateMiddle
                | TokenKind::TemplateTail
        )
    }
}

/// A token with its byte range in the scanned text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// Set when the scanner merged this token from adjacent punctuation.
    pub is_custom_operator: bool,
}

impl Token {
    pub fn new(kind: TokenKind, text: &str, start: usize, end: usize) -> Self {
        Self {
            kind,
            text: text.to_string(),
            start,
            end,
            is_custom_operator: false,
        }
    }

    pub fn is_punct(&self, text: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == text
    }

    pub fn is_ident(&self, text: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == text
    }

    pub fn span(&self) -> crate::Span {
        crate::Span::new(self.start, self.end)
    }
}
