//! Higher-kinded type parameter sugar.
//!
//! `interface Functor<F<_>> { map<A, B>(fa: F<A>, f: (a: A) => B): F<B> }`
//! becomes `interface Functor<F> { map<A, B>(fa: Kind<F, A>, f: (a: A) => B): Kind<F, B> }`.

use std::collections::HashSet;

use super::boundary::bracket_delta;
use super::Replacement;
use crate::syntax::{Token, TokenKind};

/// Name of the type the sugar expands applications into.
pub const KIND_TYPE: &str = "Kind";

/// A `F<_>` parameter found in a type parameter list.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HktParam {
    name: String,
    /// Index of the name token.
    index: usize,
}

fn find_params(tokens: &[Token]) -> Vec<HktParam> {
    let mut out = Vec::new();
    for i in 1..tokens.len().saturating_sub(3) {
        let in_param_list = tokens[i - 1].is_punct("<") || tokens[i - 1].is_punct(",");
        if in_param_list
            && tokens[i].kind == TokenKind::Ident
            && tokens[i + 1].is_punct("<")
            && tokens[i + 2].is_ident("_")
            && tokens[i + 3].is_punct(">")
        {
            out.push(HktParam {
                name: tokens[i].text.clone(),
                index: i,
            });
        }
    }
    out
}

/// Index one past the last token of the declaration that owns the parameter
/// at `from`: a `;` at the starting depth, a `}` that returns to it, or a
/// bracket closing past it.
fn scope_end(tokens: &[Token], from: usize) -> usize {
    let mut depth = 0i32;
    for (j, t) in tokens.iter().enumerate().skip(from) {
        let delta = bracket_delta(t);
        depth += delta;
        if depth < 0 {
            return j;
        }
        if depth == 0 && (t.is_punct(";") || (delta < 0 && t.is_punct("}"))) {
            return j + 1;
        }
    }
    tokens.len()
}

/// Collects the replacements for every higher-kinded parameter.
pub fn collect(tokens: &[Token]) -> Vec<Replacement> {
    let mut out = Vec::new();
    let mut rewritten: HashSet<usize> = HashSet::new();
    for param in find_params(tokens) {
        let i = param.index;
        out.push(Replacement::new(tokens[i].end, tokens[i + 3].end, ""));
        // The parameter list bracket is still open here.
        let end = scope_end(tokens, i + 4);
        for j in i + 4..end.min(tokens.len().saturating_sub(1)) {
            let applies = tokens[j].is_ident(&param.name)
                && tokens[j + 1].is_punct("<")
                && !tokens[j + 2..].first().is_some_and(|t| t.is_ident("_"))
                && !(j > 0 && (tokens[j - 1].is_punct(".") || tokens[j - 1].is_punct("?.")));
            if applies && rewritten.insert(j) {
                out.push(Replacement::new(
                    tokens[j].start,
                    tokens[j + 1].end,
                    format!("{}<{}, ", KIND_TYPE, param.name),
                ));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::apply_replacements;
    use crate::syntax::lexer::lex;

    fn lower(src: &str) -> String {
        let tokens = lex(src);
        let mut reps = collect(&tokens);
        apply_replacements(src, &mut reps).unwrap()
    }

    #[test]
    fn test_interface_applications_become_kind() {
        assert_eq!(
            lower("interface Functor<F<_>> { map<A, B>(fa: F<A>, f: (a: A) => B): F<B>; }"),
            "interface Functor<F> { map<A, B>(fa: Kind<F, A>, f: (a: A) => B): Kind<F, B>; }"
        );
    }

    #[test]
    fn test_scope_ends_with_declaration() {
        let out = lower("type Lift<F<_>, A> = F<A>;\ntype Other = F<number>;");
        assert_eq!(out, "type Lift<F, A> = Kind<F, A>;\ntype Other = F<number>;");
    }

    #[test]
    fn test_function_scope_and_multiple_params() {
        let out = lower("function zip<F<_>, G<_>>(a: F<string>, b: G<number>): void {}");
        assert_eq!(
            out,
            "function zip<F, G>(a: Kind<F, string>, b: Kind<G, number>): void {}"
        );
    }

    #[test]
    fn test_plain_generics_untouched() {
        let src = "const xs: Array<number> = [];";
        assert_eq!(lower(src), src);
    }
}
