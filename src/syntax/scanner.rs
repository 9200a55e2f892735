//! Scanner and token merger for custom operators.
//!
//! The host lexer knows nothing about custom infix operators, so `a |> b`
//! arrives as `a`, `|`, `>`, `b`. The merge pass joins runs of adjacent
//! single-character punctuation tokens whose concatenation is a registered
//! operator symbol, preferring the longest symbol.

use serde::{Deserialize, Serialize};

use super::lexer::lex;
use super::token::{Token, TokenKind};

/// Associativity of a custom operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Assoc {
    #[default]
    Left,
    Right,
}

/// A custom infix operator definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorDef {
    pub symbol: String,
    /// Higher binds tighter.
    pub precedence: u8,
    #[serde(default)]
    pub assoc: Assoc,
    /// Function the `__binop__` lowering calls for this operator. Built-in
    /// operators lower structurally and leave this empty.
    #[serde(default)]
    pub function: Option<String>,
}

impl OperatorDef {
    pub fn new(symbol: &str, precedence: u8, assoc: Assoc) -> Self {
        Self {
            symbol: symbol.to_string(),
            precedence,
            assoc,
            function: None,
        }
    }
}

/// The operators available when none are configured: pipeline forward,
/// pipeline backward and cons.
pub fn default_operators() -> Vec<OperatorDef> {
    vec![
        OperatorDef::new("|>", 1, Assoc::Left),
        OperatorDef::new("<|", 1, Assoc::Right),
        OperatorDef::new("::", 5, Assoc::Right),
    ]
}

/// Options for `tokenize`.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Operator definitions; empty means the default set.
    pub custom_operators: Vec<OperatorDef>,
    /// Used to detect the markup variant (`.tsx`, `.jsx`).
    pub file_name: String,
}

/// Returns true when the file name selects the markup language variant.
pub fn is_markup_variant(file_name: &str) -> bool {
    file_name.ends_with(".tsx") || file_name.ends_with(".jsx")
}

/// Tokenizes `source` and merges custom operator symbols.
pub fn tokenize(source: &str, options: &ScanOptions) -> Vec<Token> {
    let defaults;
    let operators = if options.custom_operators.is_empty() {
        defaults = default_operators();
        &defaults
    } else {
        &options.custom_operators
    };
    let markup = is_markup_variant(&options.file_name);
    let mut symbols: Vec<&str> = operators
        .iter()
        .map(|o| o.symbol.as_str())
        .filter(|s| s.chars().count() > 1)
        .filter(|s| !(markup && s.starts_with('<')))
        .collect();
    // Longest symbols first so `|>>` wins over `|>`.
    symbols.sort_by(|a, b| b.len().cmp(&a.len()));
    merge_operators(lex(source), &symbols)
}

fn is_single_char_punct(token: &Token) -> bool {
    token.kind == TokenKind::Punct && token.text.chars().count() == 1
}

fn merge_operators(tokens: Vec<Token>, symbols: &[&str]) -> Vec<Token> {
    if symbols.is_empty() {
        return tokens;
    }
    let mut out = Vec::with_capacity(tokens.len());
    let mut template_depth = 0usize;
    // Set when the next pair sits in template text rather than code.
    let mut suppress_next = false;
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];
        match token.kind {
            TokenKind::TemplateHead => template_depth += 1,
            TokenKind::TemplateTail => template_depth = template_depth.saturating_sub(1),
            _ => {}
        }
        if let Some(prev) = out.last() {
            let prev: &Token = prev;
            if template_depth > 0
                && matches!(prev.kind, TokenKind::TemplateHead | TokenKind::TemplateMiddle)
                && token.is_punct("}")
            {
                suppress_next = true;
            }
        }
        if suppress_next {
            suppress_next = false;
            out.push(token.clone());
            i += 1;
            continue;
        }
        if let Some((merged, consumed)) = try_merge(&tokens[i..], symbols) {
            out.push(merged);
            i += consumed;
            continue;
        }
        out.push(token.clone());
        i += 1;
    }
    out
}

/// Attempts to merge a run of adjacent punctuation starting at `tokens[0]`.
fn try_merge(tokens: &[Token], symbols: &[&str]) -> Option<(Token, usize)> {
    if !is_single_char_punct(&tokens[0]) {
        return None;
    }
    for symbol in symbols {
        let mut text = String::new();
        let mut n = 0;
        while n < tokens.len() && text.len() < symbol.len() {
            let t = &tokens[n];
            if !is_single_char_punct(t) {
                break;
            }
            if n > 0 && tokens[n - 1].end != t.start {
                break;
            }
            text.push_str(&t.text);
            n += 1;
        }
        if text == *symbol {
            let first = &tokens[0];
            let last = &tokens[n - 1];
            let mut merged = Token::new(TokenKind::Punct, &text, first.start, last.end);
            merged.is_custom_operator = true;
            return Some((merged, n));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn test_merges_adjacent_default_operators() {
        let toks = tokenize("a |> f :: xs", &ScanOptions::default());
        assert_eq!(texts(&toks), vec!["a", "|>", "f", "::", "xs"]);
        assert!(toks[1].is_custom_operator);
        assert!(toks[3].is_custom_operator);
    }

    #[test]
    fn test_gap_prevents_merge() {
        let toks = tokenize("a | > b", &ScanOptions::default());
        assert_eq!(texts(&toks), vec!["a", "|", ">", "b"]);
    }

    #[test]
    fn test_no_merge_inside_template_text() {
        let toks = tokenize("`a |> b ${x |> f} :: c`", &ScanOptions::default());
        let ops: Vec<&Token> = toks.iter().filter(|t| t.is_custom_operator).collect();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].text, "|>");
        assert!(toks[0].text.contains("a |> b"));
    }

    #[test]
    fn test_markup_variant_skips_angle_operators() {
        let options = ScanOptions {
            file_name: "view.tsx".into(),
            ..ScanOptions::default()
        };
        let toks = tokenize("f <| x", &options);
        assert!(toks.iter().all(|t| !t.is_custom_operator));
    }

    #[test]
    fn test_longest_symbol_wins() {
        let options = ScanOptions {
            custom_operators: vec![
                OperatorDef::new("<*", 3, Assoc::Left),
                OperatorDef::new("<*>", 3, Assoc::Left),
            ],
            file_name: String::new(),
        };
        let toks = tokenize("f <*> x", &options);
        assert_eq!(texts(&toks), vec!["f", "<*>", "x"]);
    }
}
