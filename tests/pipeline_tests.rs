//! Whole-file transforms through the public pipeline.

use std::fs;
use std::sync::Arc;

use macroweave::config::WeaveConfig;
use macroweave::macros::MacroRegistry;
use macroweave::transform::{transform_code, TransformOptions, TransformOutput, Transformer};

fn expand(src: &str) -> TransformOutput {
    transform_code(src, &TransformOptions::for_file("main.ts")).unwrap()
}

fn expand_clean(src: &str) -> String {
    let out = expand(src);
    assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
    out.code
}

// ----------------------------------------------------------------------------
// Generator-to-combinator compilation
// ----------------------------------------------------------------------------

#[test]
fn test_do_chain_uses_flat_map_then_one_map() {
    let code = expand_clean(
        "\
const r = Do(function* () {
  const a = yield* f();
  const b = yield* g(a);
  const c = yield* h(b);
  return a + c;
});",
    );
    assert_eq!(
        code,
        "const r = flatMap(f(), a => flatMap(g(a), b => map(h(b), c => a + c)));\n"
    );
    assert_eq!(code.matches("flatMap(").count(), 2);
    assert_eq!(code.matches(" map(").count(), 1);
}

#[test]
fn test_par_rejects_dependent_bindings() {
    let src = "\
par: {
  a << f1();
  b << g(a);
}
yield: {
  a + b
}";
    let out = expand(src);
    assert_eq!(out.diagnostics.len(), 1, "{:?}", out.diagnostics);
    let diag = &out.diagnostics[0];
    assert!(diag.is_error());
    assert!(diag.message.contains("'b' depends on 'a'"), "{}", diag.message);
    assert!(out.code.starts_with("par:"), "{}", out.code);
}

#[test]
fn test_let_block_chains_methods() {
    let code = expand_clean(
        "\
let: {
  user << fetchUser(id);
  posts << fetchPosts(user.id);
}
yield: {
  posts.length
}",
    );
    assert!(
        code == "fetchUser(id).flatMap(user => fetchPosts(user.id).map(posts => posts.length));\n",
        "{}",
        code
    );
}

// ----------------------------------------------------------------------------
// Layer wiring
// ----------------------------------------------------------------------------

#[test]
fn test_layer_cycle_reports_the_ordered_cycle() {
    let src = "\
@layer(\"A\", [\"B\"])
class ALive {}
@layer(\"B\", [\"C\"])
class BLive {}
@layer(\"C\", [\"A\"])
class CLive {}
const app = wire(\"A\");";
    let out = expand(src);
    let cycle: Vec<_> = out
        .diagnostics
        .iter()
        .filter(|d| d.message.contains("circular"))
        .collect();
    assert_eq!(cycle.len(), 1, "{:?}", out.diagnostics);
    assert!(cycle[0].message.contains("A -> B -> C -> A"), "{}", cycle[0].message);
    // The failed call points at the `wire` invocation in the input.
    let at = src.find("wire(").unwrap();
    assert_eq!(cycle[0].start, at);
}

#[test]
fn test_wire_composes_dependencies_first() {
    let code = expand_clean(
        "\
@layer(\"Config\")
class ConfigLive {}
@layer(\"Db\", [\"Config\"])
class DbLive {}
@layer(\"Api\", [\"Db\", \"Config\"])
class ApiLive {}
export const app = wire(\"Api\");",
    );
    let last = code.lines().last().unwrap();
    assert!(last.starts_with("export const app = ApiLive.pipe("), "{}", last);
    assert!(last.contains("Layer.provide(DbLive)"), "{}", last);
    assert!(last.contains("Layer.provide(ConfigLive)"), "{}", last);
}

// ----------------------------------------------------------------------------
// Import trimming
// ----------------------------------------------------------------------------

#[test]
fn test_import_trimming() {
    let code = expand_clean(
        "\
import \"reflect-metadata\";
import { Do, pipe } from \"@weave/effect\";
import { hoist } from \"@weave/hoist\";
const r = Do(function* () {
  const a = yield* load();
  return a;
});
export const f = () => hoist((x: number) => x * 2);
pipe(r);",
    );
    assert!(code.contains("import \"reflect-metadata\";"), "{}", code);
    assert!(code.contains("import { pipe } from \"@weave/effect\";"), "{}", code);
    assert!(!code.contains("@weave/hoist"), "{}", code);
    assert!(!code.contains("Do("), "{}", code);
}

#[test]
fn test_import_kept_when_name_is_still_used() {
    let code = expand_clean(
        "\
import { dedent } from \"@weave/text\";
const s = dedent`
  a
`;
console.log(dedent);",
    );
    assert!(code.contains("import { dedent } from \"@weave/text\";"), "{}", code);
    assert!(code.contains("const s = `a`;"), "{}", code);
}

// ----------------------------------------------------------------------------
// Operators, compile-time evaluation, hoisting
// ----------------------------------------------------------------------------

#[test]
fn test_pipeline_operator_lowers_to_calls() {
    assert_eq!(
        expand_clean("const n = xs |> sum |> Math.sqrt;"),
        "const n = Math.sqrt(sum(xs));\n"
    );
}

#[test]
fn test_comptime_folds_constants() {
    assert_eq!(
        expand_clean("export const table = comptime(() => [1, 2, 3].map(n => n * n));"),
        "export const table = [1, 4, 9];\n"
    );
}

#[test]
fn test_doc_comments_survive_expansion() {
    let code = expand_clean("/**\n * Sum of the first two.\n */\nconst r = comptime(() => 1 + 2);\n");
    assert_eq!(code, "/**\n * Sum of the first two.\n */\nconst r = 3;\n");
}

#[test]
fn test_comments_kept_around_lowered_operators() {
    let code = expand_clean("// totals\nconst n = xs |> sum; // all of them\n");
    assert_eq!(code, "// totals\nconst n = sum(xs); // all of them\n");
}

#[test]
fn test_comptime_without_grant_cannot_read_env() {
    let out = expand("const home = comptime(() => process.env.HOME);");
    assert_eq!(out.diagnostics.len(), 1);
    assert!(out.diagnostics[0].is_error());
    assert!(out.code.contains("comptime("));
}

#[test]
fn test_project_grant_allows_file_reads() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("VERSION"), "2.0.1\n").unwrap();
    let mut config = WeaveConfig::default();
    config.sandbox.fs = true;
    let mut transformer = Transformer::new(Arc::new(MacroRegistry::with_builtins()), config);
    let file = dir.path().join("main.ts");
    let out = transformer
        .transform(
            "const v = comptime(() => fs.readFileSync(\"VERSION\", \"utf8\").trim());",
            &TransformOptions::for_file(file.to_string_lossy()),
        )
        .unwrap();
    assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
    assert_eq!(out.code, "const v = \"2.0.1\";\n");
}

#[test]
fn test_one_failure_does_not_stop_the_file() {
    let out = expand("const a = wire();\nconst b = x |> f;");
    assert_eq!(out.diagnostics.len(), 1);
    assert!(out.code.contains("const a = wire();"));
    assert!(out.code.contains("const b = f(x);"));
}
