//! Decorator-call sugar for declarations the host grammar cannot decorate.
//!
//! ```text
//! @memo @trace("fib") const fib = (n) => n;
//! ```
//! becomes `const fib = memo(trace("fib")((n) => n));` and
//! `@memo function f() {}` becomes `const f = memo(function f() {});`.
//! Decorators on classes and class members are left for the parser.

use super::boundary::{bracket_delta, matching_close, newline_between};
use super::Replacement;
use crate::syntax::{Token, TokenKind};

/// One rewritten declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoratorRewrite {
    pub replacements: Vec<Replacement>,
    /// Source range of the decorator run that was removed. The decorator
    /// text is re-emitted elsewhere, so other extensions must not touch it.
    pub removed: (usize, usize),
}

/// Index of the last token of the `@name.path(args)` decorator at `at`.
fn parse_decorator(tokens: &[Token], at: usize) -> Option<usize> {
    if !tokens.get(at)?.is_punct("@") || tokens.get(at + 1)?.kind != TokenKind::Ident {
        return None;
    }
    let mut end = at + 1;
    while tokens.get(end + 1).is_some_and(|t| t.is_punct("."))
        && tokens.get(end + 2).is_some_and(|t| t.kind == TokenKind::Ident)
    {
        end += 2;
    }
    if tokens.get(end + 1).is_some_and(|t| t.is_punct("(")) {
        end = matching_close(tokens, end + 1)?;
    }
    Some(end)
}

/// True when `next` continues the expression that `prev` ends, so a line
/// break between them does not terminate the statement.
fn continues_expression(prev: &Token, next: &Token) -> bool {
    if prev.kind == TokenKind::Punct && !matches!(prev.text.as_str(), ")" | "]" | "}") {
        return true;
    }
    next.kind == TokenKind::Punct
        && !matches!(
            next.text.as_str(),
            "(" | "[" | "{" | "@" | "!" | "~" | "++" | "--" | "-" | "+"
        )
}

/// Index one past the last token of the initializer starting at `from`.
fn initializer_end(source: &str, tokens: &[Token], from: usize) -> usize {
    let mut depth = 0i32;
    for j in from..tokens.len() {
        let t = &tokens[j];
        if depth == 0 && j > from {
            if t.is_punct(";") || t.is_punct(",") {
                return j;
            }
            let prev = &tokens[j - 1];
            if newline_between(source, prev.end, t.start) && !continues_expression(prev, t) {
                return j;
            }
        }
        depth += bracket_delta(t);
        if depth < 0 {
            return j;
        }
    }
    tokens.len()
}

/// Collects the rewrites for every decorated variable or function
/// declaration.
pub fn collect(source: &str, tokens: &[Token], lower: &dyn Fn(&str) -> String) -> Vec<DecoratorRewrite> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let Some(first_end) = parse_decorator(tokens, i) else {
            i += 1;
            continue;
        };
        let mut decorators = vec![(i, first_end)];
        let mut next = first_end + 1;
        while let Some(end) = parse_decorator(tokens, next) {
            decorators.push((next, end));
            next = end + 1;
        }
        if let Some(rewrite) = rewrite(source, tokens, &decorators, next, lower) {
            out.push(rewrite);
        }
        i = next;
    }
    out
}

fn rewrite(
    source: &str,
    tokens: &[Token],
    decorators: &[(usize, usize)],
    decl: usize,
    lower: &dyn Fn(&str) -> String,
) -> Option<DecoratorRewrite> {
    let mut k = decl;
    if tokens.get(k)?.is_ident("export") {
        k += 1;
    }
    let removed = (tokens[decorators[0].0].start, tokens[decl].start);
    let callees: Vec<String> = decorators
        .iter()
        .map(|(s, e)| lower(&source[tokens[*s + 1].start..tokens[*e].end]))
        .collect();
    let prefix: String = callees.iter().map(|c| format!("{}(", c)).collect();
    let suffix = ")".repeat(callees.len());
    let mut replacements = vec![Replacement::new(removed.0, removed.1, "")];

    let head = tokens.get(k)?;
    match head.text.as_str() {
        "const" | "let" | "var" if head.kind == TokenKind::Ident => {
            if tokens.get(k + 1)?.kind != TokenKind::Ident {
                return None;
            }
            // Skip the annotation to the initializer.
            let mut depth = 0i32;
            let mut eq = None;
            for (j, t) in tokens.iter().enumerate().skip(k + 2) {
                if depth == 0 && t.is_punct("=") {
                    eq = Some(j);
                    break;
                }
                if depth == 0 && (t.is_punct(";") || t.is_punct(",")) {
                    break;
                }
                depth += bracket_delta(t);
                if depth < 0 {
                    break;
                }
            }
            let init = eq? + 1;
            let end = initializer_end(source, tokens, init);
            if end <= init {
                return None;
            }
            replacements.push(Replacement::insert(tokens[init].start, prefix));
            replacements.push(Replacement::insert(tokens[end - 1].end, suffix));
        }
        "function" | "async" if head.kind == TokenKind::Ident => {
            let function_kw = if head.is_ident("async") { k + 1 } else { k };
            if !tokens.get(function_kw)?.is_ident("function") {
                return None;
            }
            let mut name_idx = function_kw + 1;
            if tokens.get(name_idx)?.is_punct("*") {
                name_idx += 1;
            }
            let name = tokens.get(name_idx).filter(|t| t.kind == TokenKind::Ident)?;
            let params_open = (name_idx + 1..tokens.len()).find(|&j| tokens[j].is_punct("("))?;
            let params_close = matching_close(tokens, params_open)?;
            let body_open = (params_close + 1..tokens.len()).find(|&j| tokens[j].is_punct("{"))?;
            let body_close = matching_close(tokens, body_open)?;
            replacements.push(Replacement::insert(
                tokens[k].start,
                format!("const {} = {}", name.text, prefix),
            ));
            replacements.push(Replacement::insert(tokens[body_close].end, format!("{};", suffix)));
        }
        _ => return None,
    }
    Some(DecoratorRewrite {
        replacements,
        removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::apply_replacements;
    use crate::syntax::lexer::lex;

    fn lower(src: &str) -> String {
        let tokens = lex(src);
        let mut reps: Vec<Replacement> = collect(src, &tokens, &|s| s.to_string())
            .into_iter()
            .flat_map(|r| r.replacements)
            .collect();
        apply_replacements(src, &mut reps).unwrap()
    }

    #[test]
    fn test_stacked_decorators_apply_innermost_first() {
        assert_eq!(
            lower("@a @b(x) const v = init;"),
            "const v = a(b(x)(init));"
        );
    }

    #[test]
    fn test_export_and_annotation_are_kept() {
        assert_eq!(
            lower("@memo\nexport const f: Fn = (n) => n * 2\nconst g = 1;"),
            "export const f: Fn = memo((n) => n * 2)\nconst g = 1;"
        );
    }

    #[test]
    fn test_function_declaration_becomes_const() {
        assert_eq!(
            lower("@trace function fib(n: number): number { return n; }"),
            "const fib = trace(function fib(n: number): number { return n; });"
        );
    }

    #[test]
    fn test_class_decorators_left_alone() {
        let src = "@derive(Eq) class Point { @field x = 1; }";
        assert_eq!(lower(src), src);
    }
}
