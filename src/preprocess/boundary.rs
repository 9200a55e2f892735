//! Token classification shared by the preprocessor extensions.

use crate::syntax::{Token, TokenKind};

/// Keywords that begin a statement or clause and therefore end any
/// expression chain before them.
pub const STATEMENT_KEYWORDS: &[&str] = &[
    "return", "const", "let", "var", "if", "else", "while", "for", "do", "throw", "case",
    "default", "yield", "export", "import", "function", "class", "switch", "try", "catch",
    "finally", "break", "continue", "interface", "enum", "declare",
];

const ASSIGNMENT_OPERATORS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "**=", "<<=", "&=", "|=", "^=", "&&=", "||=", "??=",
];

/// Returns true when `token` delimits an operator chain at its bracket depth.
pub fn is_boundary_token(token: &Token) -> bool {
    match token.kind {
        TokenKind::Punct => {
            if token.is_custom_operator {
                return false;
            }
            matches!(
                token.text.as_str(),
                ";" | "," | "=>" | "(" | ")" | "[" | "]" | "{" | "}" | ":" | "?" | "&&" | "||"
                    | "??" | "..."
            ) || ASSIGNMENT_OPERATORS.contains(&token.text.as_str())
        }
        TokenKind::Ident => STATEMENT_KEYWORDS.contains(&token.text.as_str()),
        TokenKind::TemplateHead | TokenKind::TemplateMiddle | TokenKind::TemplateTail => true,
        _ => false,
    }
}

/// `+1` for an opening bracket, `-1` for a closing one, `0` otherwise.
/// Template heads and tails count as brackets around their substitutions.
pub fn bracket_delta(token: &Token) -> i32 {
    match token.kind {
        TokenKind::Punct => match token.text.as_str() {
            "(" | "[" | "{" => 1,
            ")" | "]" | "}" => -1,
            _ => 0,
        },
        TokenKind::TemplateHead => 1,
        TokenKind::TemplateTail => -1,
        _ => 0,
    }
}

/// Index of the token that closes the bracket opened at `open`.
pub fn matching_close(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (i, t) in tokens.iter().enumerate().skip(open) {
        depth += bracket_delta(t);
        if depth == 0 {
            return Some(i);
        }
    }
    None
}

/// True when there is a line break between two byte offsets of `source`.
pub fn newline_between(source: &str, from: usize, to: usize) -> bool {
    source.get(from..to).is_some_and(|gap| gap.contains('\n'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::lexer::lex;

    #[test]
    fn test_classifies_boundaries() {
        let toks = lex("return a + b, c = d");
        let flags: Vec<bool> = toks.iter().map(is_boundary_token).collect();
        assert_eq!(flags, vec![true, false, false, false, true, false, true, false]);
    }

    #[test]
    fn test_matching_close_skips_nested_groups() {
        let toks = lex("f(a, [b], { c: (d) })");
        assert_eq!(matching_close(&toks, 1), Some(toks.len() - 1));
    }
}
