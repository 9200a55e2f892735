//! Lexer wrapper around the `logos` token kinds.
//!
//! `logos` cannot lex template literals on its own because a `}` closes either
//! a block or a template substitution depending on context. The wrapper keeps a
//! stack of open-brace counts, one per active substitution, scans template text
//! by hand and restarts the inner lexer at the offset after each template part.

use logos::Logos;

use super::token::{Token, TokenKind};

/// Tokenizes `source` into host-language tokens, skipping trivia.
pub fn lex(source: &str) -> Vec<Token> {
    lex_tokens(source, false)
}

/// Comments in `source`, in order, with their byte ranges.
pub fn comments(source: &str) -> Vec<Token> {
    lex_tokens(source, true)
        .into_iter()
        .filter(|t| t.kind == TokenKind::Comment)
        .collect()
}

fn lex_tokens(source: &str, keep_comments: bool) -> Vec<Token> {
    let mut tokens = Vec::new();
    // Open-brace count inside each active template substitution.
    let mut substitutions: Vec<usize> = Vec::new();
    let mut offset = 0;

    'restart: while offset < source.len() {
        let mut inner = TokenKind::lexer(&source[offset..]);
        while let Some(result) = inner.next() {
            let range = inner.span();
            let (start, end) = (offset + range.start, offset + range.end);
            let kind = result.unwrap_or(TokenKind::Unknown);
            let text = inner.slice();

            match kind {
                TokenKind::Backtick => {
                    let (token, next) = scan_template(source, start, true);
                    if token.kind == TokenKind::TemplateHead {
                        substitutions.push(0);
                    }
                    tokens.push(token);
                    offset = next;
                    continue 'restart;
                }
                TokenKind::Punct if text == "{" => {
                    if let Some(depth) = substitutions.last_mut() {
                        *depth += 1;
                    }
                }
                TokenKind::Punct if text == "}" => {
                    if let Some(depth) = substitutions.last_mut() {
                        if *depth == 0 {
                            substitutions.pop();
                            let (token, next) = scan_template(source, start, false);
                            if token.kind == TokenKind::TemplateMiddle {
                                substitutions.push(0);
                            }
                            tokens.push(token);
                            offset = next;
                            continue 'restart;
                        }
                        *depth -= 1;
                    }
                }
                TokenKind::Comment if !keep_comments => continue,
                _ => {}
            }
            tokens.push(Token::new(kind, text, start, end));
        }
        break;
    }
    tokens
}

/// Scans template text starting at the backtick or closing brace at `start`.
/// Returns the template token and the offset just past it. An unterminated
/// template runs to the end of input.
fn scan_template(source: &str, start: usize, opening: bool) -> (Token, usize) {
    let bytes = source.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => {
                let kind = if opening {
                    TokenKind::NoSubstitutionTemplate
                } else {
                    TokenKind::TemplateTail
                };
                return (Token::new(kind, &source[start..i + 1], start, i + 1), i + 1);
            }
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                let kind = if opening {
                    TokenKind::TemplateHead
                } else {
                    TokenKind::TemplateMiddle
                };
                return (Token::new(kind, &source[start..i + 2], start, i + 2), i + 2);
            }
            _ => i += 1,
        }
    }
    let end = source.len();
    let kind = if opening {
        TokenKind::NoSubstitutionTemplate
    } else {
        TokenKind::TemplateTail
    };
    (Token::new(kind, &source[start..end], start, end), end)
}

/// Raw text of a template part without its delimiters.
pub fn template_part_text(token: &Token) -> &str {
    let text = token.text.as_str();
    let open = 1;
    let close = match token.kind {
        TokenKind::TemplateHead | TokenKind::TemplateMiddle => 2,
        _ if text.len() > 1 && text.ends_with('`') => 1,
        _ => 0,
    };
    text.get(open..text.len().saturating_sub(close)).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<(TokenKind, String)> {
        lex(src).into_iter().map(|t| (t.kind, t.text)).collect()
    }

    #[test]
    fn test_skips_whitespace_and_comments() {
        let toks = kinds("a /* c */ + // line\n b");
        assert_eq!(toks.len(), 3);
        assert_eq!(toks[1], (TokenKind::Punct, "+".to_string()));
    }

    #[test]
    fn test_block_comments_span_lines() {
        let toks = kinds("/**\n * Docs.\n */\nconst x = 1; /* tail */");
        assert_eq!(toks.first(), Some(&(TokenKind::Ident, "const".to_string())));
        assert_eq!(toks.last(), Some(&(TokenKind::Punct, ";".to_string())));
        assert_eq!(toks.len(), 5);
    }

    #[test]
    fn test_comments_are_reported_with_ranges() {
        let src = "// head\na /* mid */ b";
        let found = comments(src);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].text, "// head");
        assert_eq!(&src[found[1].start..found[1].end], "/* mid */");
    }

    #[test]
    fn test_unterminated_block_comment_runs_to_end() {
        assert!(lex("a /* never closed").len() == 1);
    }

    #[test]
    fn test_unicode_identifiers() {
        let toks = kinds("const é = ñame_1;");
        assert_eq!(toks[1], (TokenKind::Ident, "é".to_string()));
        assert_eq!(toks[3], (TokenKind::Ident, "ñame_1".to_string()));
    }

    #[test]
    fn test_template_with_substitutions() {
        let toks = kinds("`a${x}b${ {y: 1}.y }c`");
        let ks: Vec<TokenKind> = toks.iter().map(|t| t.0).collect();
        assert_eq!(
            ks,
            vec![
                TokenKind::TemplateHead,
                TokenKind::Ident,
                TokenKind::TemplateMiddle,
                TokenKind::Punct,
                TokenKind::Ident,
                TokenKind::Punct,
                TokenKind::Number,
                TokenKind::Punct,
                TokenKind::Punct,
                TokenKind::Ident,
                TokenKind::TemplateTail,
            ]
        );
        assert_eq!(toks[10].1, "}c`");
    }

    #[test]
    fn test_nested_template() {
        let toks = kinds("`x${`y${z}`}w`");
        assert_eq!(toks.first().map(|t| t.0), Some(TokenKind::TemplateHead));
        assert_eq!(toks.last().map(|t| t.1.as_str()), Some("}w`"));
    }

    #[test]
    fn test_unterminated_template_runs_to_end() {
        let toks = lex("`abc");
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].end, 4);
        assert_eq!(template_part_text(&toks[0]), "abc");
    }

    #[test]
    fn test_greater_than_is_never_merged() {
        let toks = kinds("a >> b");
        assert_eq!(toks[1].1, ">");
        assert_eq!(toks[2].1, ">");
    }
}
