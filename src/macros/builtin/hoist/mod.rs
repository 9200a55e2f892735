//! `hoist(fn)`: moves a nested function to module scope.
//!
//! ```text
//! function render(items, prefix) {
//!   return items.map(hoist((item) => prefix + item));
//! }
//! ```
//! becomes
//! ```text
//! const __hoisted_fn = ({ prefix }, item) => prefix + item;
//! function render(items, prefix) {
//!   return items.map((...args) => __hoisted_fn({ prefix }, ...args));
//! }
//! ```

mod capture;

use std::sync::Arc;

pub use capture::{analyze_captures, Capture, CaptureAnalysis};

use crate::ast::{Expr, ObjectPatternProp, Param, Pattern, PropKey};
use crate::macros::definition::{define_expression_macro, CallInput, Expansion, MacroDefinition, MacroInfo};
use crate::macros::MacroContext;
use crate::{err_ctx, WeaveError};

pub fn definition() -> Arc<MacroDefinition> {
    define_expression_macro(
        MacroInfo::new("hoist").description("Lifts a nested function to module scope"),
        expand,
    )
}

fn expand(ctx: &mut MacroContext, input: &CallInput<'_>) -> Result<Expansion, WeaveError> {
    let [function] = input.args else {
        return Err(err_ctx!(
            Expansion,
            format!("hoist expects 1 argument, got {}", input.args.len()),
            input.span
        ));
    };
    let bindings = ctx.enclosing_bindings();
    let analysis = analyze_captures(function, &bindings.stateful, &bindings.plain);
    if !analysis.can_hoist {
        let reason = analysis.hoist_blocker.unwrap_or_default();
        ctx.report_warning(format!("function left in place: {}", reason), input.span);
        return Ok(Expansion::Expr(function.clone()));
    }

    let props: Vec<String> = analysis.prop_names().map(str::to_string).collect();
    let props_param = (!props.is_empty()).then(|| Param {
        pattern: props_pattern(&props),
        ..Param::named("_")
    });
    // Function expressions stay functions so a name they call themselves by
    // remains bound.
    let (base, hoisted) = match &function.value {
        Expr::Arrow(arrow) => {
            let mut arrow = (**arrow).clone();
            if let Some(param) = props_param {
                arrow.params.insert(0, param);
            }
            ("fn".to_string(), Expr::Arrow(Box::new(arrow)))
        }
        Expr::Function(func) => {
            let mut func = (**func).clone();
            if let Some(param) = props_param {
                func.params.insert(0, param);
            }
            let base = func.name.clone().unwrap_or_else(|| "fn".to_string());
            (base, Expr::Function(Box::new(func)))
        }
        _ => return Ok(Expansion::Expr(function.clone())),
    };
    let hoisted_name = ctx.fresh_name(&format!("__hoisted_{}", base));
    let f = ctx.factory();
    ctx.hoist(f.const_decl(&hoisted_name, f.expr(hoisted)));

    if props.is_empty() {
        return Ok(Expansion::Expr(f.ident(hoisted_name)));
    }
    let args = ctx.fresh_name("args");
    let captured = f.object(props.iter().map(|p| (p.clone(), f.ident(p.clone()))).collect());
    let call = f.call(f.ident(hoisted_name), vec![captured, f.spread(f.ident(args.clone()))]);
    let rest = Param {
        rest: true,
        ..Param::named(args)
    };
    Ok(Expansion::Expr(f.arrow(vec![rest], call)))
}

fn props_pattern(names: &[String]) -> Pattern {
    Pattern::Object {
        props: names
            .iter()
            .map(|n| ObjectPatternProp {
                key: PropKey::Ident(n.clone()),
                value: Pattern::Ident(n.clone()),
                default: None,
                shorthand: true,
            })
            .collect(),
        rest: None,
    }
}

#[cfg(test)]
mod tests {
    use crate::transform::{transform_code, TransformOptions};

    fn expand(src: &str) -> crate::transform::TransformOutput {
        transform_code(src, &TransformOptions::for_file("h.ts")).unwrap()
    }

    #[test]
    fn test_captures_become_props() {
        let out = expand(
            "import { x } from \"y\";\nfunction render(items, prefix) {\n  return items.map(hoist((item) => prefix + item));\n}",
        );
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        assert_eq!(
            out.code,
            "import { x } from \"y\";\nconst __hoisted_fn = ({ prefix }, item) => prefix + item;\nfunction render(items, prefix) {\n  return items.map((...args) => __hoisted_fn({ prefix }, ...args));\n}\n"
        );
    }

    #[test]
    fn test_no_captures_is_a_plain_reference() {
        let out = expand("function f() {\n  return hoist(function double(n) { return n * 2; });\n}");
        assert!(out.code.starts_with("const __hoisted_double = function double(n) {"), "{}", out.code);
        assert!(out.code.contains("return __hoisted_double;"));
    }

    #[test]
    fn test_self_calling_function_keeps_its_name() {
        let out = expand(
            "function outer() {\n  return hoist(function fact(n) { return n <= 1 ? 1 : n * fact(n - 1); });\n}",
        );
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        assert_eq!(
            out.code,
            "const __hoisted_fact = function fact(n) {\n  return n <= 1 ? 1 : n * fact(n - 1);\n};\nfunction outer() {\n  return __hoisted_fact;\n}\n"
        );
    }

    #[test]
    fn test_self_calling_function_with_captures_stays() {
        let out = expand(
            "function outer(step) {\n  return hoist(function walk(n) { return n > 0 ? walk(n - step) : 0; });\n}",
        );
        assert_eq!(out.diagnostics.len(), 1);
        assert!(out.diagnostics[0].message.contains("'walk' calls itself"), "{}", out.diagnostics[0].message);
        assert!(out.code.contains("return function walk(n) {"), "{}", out.code);
        assert!(!out.code.contains("__hoisted"));
    }

    #[test]
    fn test_reassigned_capture_warns_and_unwraps() {
        let out = expand("function f() {\n  let n = 0;\n  n += 1;\n  return hoist(() => n);\n}");
        assert_eq!(out.diagnostics.len(), 1);
        assert!(!out.diagnostics[0].is_error());
        assert!(out.diagnostics[0].message.contains("'n'"));
        assert!(out.code.contains("return () => n;"));
        assert!(!out.code.contains("hoist("));
    }
}
