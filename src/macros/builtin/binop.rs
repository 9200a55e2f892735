//! `__binop__(left, "name", right)`: the call form the preprocessor rewrites
//! custom infix operators into. `name` is the spelled-out operator
//! (`bar_gt` for `|>`); a literal symbol is accepted too.

use std::sync::Arc;

use crate::ast::{Expr, ExprNode};
use crate::macros::definition::{define_expression_macro, CallInput, Expansion, MacroDefinition, MacroInfo};
use crate::macros::MacroContext;
use crate::preprocess::{decode_operator, BINOP_CALLEE};
use crate::{err_ctx, WeaveError};

pub fn definition() -> Arc<MacroDefinition> {
    define_expression_macro(
        MacroInfo::new(BINOP_CALLEE)
            .description("Lowers preprocessed infix operators")
            .cacheable(),
        expand,
    )
}

fn expand(ctx: &mut MacroContext, input: &CallInput<'_>) -> Result<Expansion, WeaveError> {
    let [left, op, right] = input.args else {
        return Err(err_ctx!(
            Expansion,
            format!("{} expects 3 arguments, got {}", BINOP_CALLEE, input.args.len()),
            input.span
        ));
    };
    let Expr::Str(name) = &op.value else {
        return Err(err_ctx!(
            Expansion,
            "the operator argument must be a string literal",
            op.span
        ));
    };
    let symbol = decode_operator(name).unwrap_or_else(|| name.clone());
    let f = ctx.factory();
    let (left, right) = (left.clone(), right.clone());
    let out = match symbol.as_str() {
        "|>" => f.call(callee(right), vec![left]),
        "<|" => f.call(callee(left), vec![right]),
        "::" => f.array(vec![left, f.spread(right)]),
        other => match ctx.operator(other).and_then(|def| def.function.clone()) {
            Some(function) => f.call(f.path(&function), vec![left, right]),
            None => {
                return Err(err_ctx!(
                    Expansion,
                    format!("no lowering is configured for operator '{}'", other),
                    input.span,
                    format!("add `function = \"...\"` to the [[operators]] entry for '{}'", other)
                ))
            }
        },
    };
    Ok(Expansion::Expr(out))
}

/// Wraps callees that would otherwise bind differently when called.
fn callee(expr: ExprNode) -> ExprNode {
    match &expr.value {
        Expr::Ident(_)
        | Expr::Member { .. }
        | Expr::Index { .. }
        | Expr::Call { .. }
        | Expr::Paren(_) => expr,
        _ => {
            let span = expr.span;
            ExprNode::new(Expr::Paren(Box::new(expr)), span)
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::transform::transform_code;
    use crate::transform::TransformOptions;

    fn expand(src: &str) -> String {
        transform_code(src, &TransformOptions::for_file("ops.ts")).unwrap().code
    }

    #[test]
    fn test_pipeline_and_cons() {
        assert_eq!(expand("const r = x |> f |> g;"), "const r = g(f(x));\n");
        assert_eq!(expand("const xs = 1 :: 2 :: rest;"), "const xs = [1, ...[2, ...rest]];\n");
    }

    #[test]
    fn test_pipeline_into_arrow_is_parenthesised() {
        assert_eq!(expand("const y = x |> (v => v + 1);"), "const y = (v => v + 1)(x);\n");
    }

    #[test]
    fn test_spelled_and_literal_operator_names_agree() {
        assert_eq!(expand("const r = __binop__(x, \"bar_gt\", f);"), "const r = f(x);\n");
        assert_eq!(expand("const r = __binop__(x, \"|>\", f);"), "const r = f(x);\n");
    }

    #[test]
    fn test_unconfigured_custom_operator_reports() {
        let out = crate::transform::transform_code(
            "const v = __binop__(a, \"<>\", b);",
            &TransformOptions::for_file("ops.ts"),
        )
        .unwrap();
        assert!(out.diagnostics.iter().any(|d| d.message.contains("'<>'")));
        assert!(out.code.contains("__binop__"));
    }
}
