//! The lexical preprocessor on its own.

use macroweave::preprocess::{preprocess, restore_operators, Extension, PreprocessOptions};
use macroweave::syntax::{Assoc, OperatorDef};

fn run(src: &str) -> String {
    preprocess(src, &PreprocessOptions::for_file("p.ts")).unwrap().code
}

#[test]
fn test_plain_typescript_is_untouched() {
    let src = "export function add(a: number, b: number): number {\n  return a + b;\n}\n";
    let out = preprocess(src, &PreprocessOptions::for_file("p.ts")).unwrap();
    assert!(!out.changed);
    assert_eq!(out.code, src);
    assert!(out.source_map.is_none());
}

#[test]
fn test_operators_round_trip() {
    let src = "const r = x |> f |> g;";
    let lowered = run(src);
    assert!(lowered.contains("__binop__"), "{}", lowered);
    assert!(!lowered.contains("|>"), "{}", lowered);
    assert_eq!(restore_operators(&lowered), src);
}

#[test]
fn test_operators_in_strings_and_templates_are_left_alone() {
    let src = "const s = \"a |> b\";\nconst t = `x ${\"y\"} |> z`;\n// c |> d\n";
    assert_eq!(run(src), src);
}

#[test]
fn test_operator_inside_template_substitution_is_rewritten() {
    let out = run("const t = `v: ${a |> f}`;");
    assert_eq!(out, "const t = `v: ${__binop__(a, \"bar_gt\", f)}`;");
}

#[test]
fn test_custom_operator_from_options() {
    let mut operators = macroweave::syntax::default_operators();
    operators.push(OperatorDef {
        symbol: "<>".to_string(),
        precedence: 3,
        assoc: Assoc::Left,
        function: Some("concat".to_string()),
    });
    let options = PreprocessOptions {
        operators,
        ..PreprocessOptions::for_file("p.ts")
    };
    let out = preprocess("const s = a <> b;", &options).unwrap();
    assert_eq!(out.code, "const s = __binop__(a, \"lt_gt\", b);");
}

#[test]
fn test_hkt_parameters_are_rewritten() {
    let out = run("interface Functor<F<_>> {\n  map<A, B>(fa: F<A>, f: (a: A) => B): F<B>;\n}");
    assert!(out.starts_with("interface Functor<F> {"), "{}", out);
    assert!(out.contains("Kind<F, A>"), "{}", out);
    assert!(out.contains("Kind<F, B>"), "{}", out);
}

#[test]
fn test_only_enabled_extensions_run() {
    let options = PreprocessOptions {
        extensions: vec![Extension::Operators],
        ..PreprocessOptions::for_file("p.ts")
    };
    let out = preprocess("type T<F<_>> = F<number>;\nconst r = a |> f;", &options).unwrap();
    assert!(out.code.starts_with("type T<F<_>> = F<number>;"), "{}", out.code);
    assert!(out.code.contains("__binop__(a, \"bar_gt\", f)"), "{}", out.code);
}
