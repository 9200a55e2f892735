//! End-to-end runs of the `macroweave` binary.

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn macroweave(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("macroweave").unwrap();
    cmd.current_dir(dir);
    cmd
}

#[test]
fn test_expand_prints_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("main.ts"), "const n = xs |> sum;\n").unwrap();
    macroweave(dir.path())
        .args(["expand", "--no-cache", "main.ts"])
        .assert()
        .success()
        .stdout("const n = sum(xs);\n");
}

#[test]
fn test_verbose_flag_logs_pipeline_events() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("main.ts"), "const n = xs |> sum;\n").unwrap();
    macroweave(dir.path())
        .env_remove("MACROWEAVE_LOG")
        .args(["-v", "expand", "--no-cache", "main.ts"])
        .assert()
        .success()
        .stdout("const n = sum(xs);\n")
        .stderr(predicate::str::contains("preprocessed"))
        .stderr(predicate::str::contains("transformed"));

    macroweave(dir.path())
        .env_remove("MACROWEAVE_LOG")
        .args(["expand", "--no-cache", "main.ts"])
        .assert()
        .success()
        .stderr("");
}

#[test]
fn test_log_filter_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("main.ts"), "const n = xs |> sum;\n").unwrap();
    macroweave(dir.path())
        .env("MACROWEAVE_LOG", "macroweave::transform=debug")
        .args(["expand", "--no-cache", "main.ts"])
        .assert()
        .success()
        .stderr(predicate::str::contains("transformed"))
        .stderr(predicate::str::contains("preprocessed").not());
}

#[test]
fn test_expand_writes_outputs_and_source_maps() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("src/lib")).unwrap();
    fs::write(dir.path().join("src/lib/a.ts"), "const n = xs |> sum;\n").unwrap();
    fs::write(dir.path().join("src/b.ts"), "export const b = 1;\n").unwrap();
    macroweave(dir.path())
        .args(["expand", "--no-cache", "--source-map", "--out-dir", "dist", "src"])
        .assert()
        .success();

    let a = fs::read_to_string(dir.path().join("dist/lib/a.ts")).unwrap();
    assert!(a.starts_with("const n = sum(xs);\n"), "{}", a);
    assert!(a.ends_with("//# sourceMappingURL=a.ts.map\n"), "{}", a);
    let map = fs::read_to_string(dir.path().join("dist/lib/a.ts.map")).unwrap();
    assert!(map.contains("\"version\":3"), "{}", map);
    // Untouched files are copied verbatim.
    let b = fs::read_to_string(dir.path().join("dist/b.ts")).unwrap();
    assert_eq!(b, "export const b = 1;\n");
}

#[test]
fn test_check_fails_on_errors() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("ok.ts"), "const a = 1;\n").unwrap();
    fs::write(dir.path().join("bad.ts"), "const x = wire();\n").unwrap();
    macroweave(dir.path())
        .args(["check", "."])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("wire needs at least one service name"))
        .stderr(predicate::str::contains("2 files checked: 1 error, 0 warnings"));
}

#[test]
fn test_check_passes_clean_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("ok.ts"), "const s = dedent`\n  a\n`;\nconst n = xs |> sum;\n").unwrap();
    macroweave(dir.path())
        .args(["check", "ok.ts"])
        .assert()
        .success()
        .stderr(predicate::str::contains("1 file checked: 0 errors, 0 warnings"));
    // The pipeline call is cacheable, so the cache file is written under the
    // project root.
    assert!(dir.path().join(".macroweave").is_dir());
}

#[test]
fn test_preprocess_only_lowers_syntax() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("p.ts"), "const r = a |> f;\n").unwrap();
    macroweave(dir.path())
        .args(["preprocess", "p.ts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("__binop__(a, \"bar_gt\", f)"));
}

#[test]
fn test_list_macros_names_the_builtins() {
    let dir = tempfile::tempdir().unwrap();
    macroweave(dir.path())
        .arg("list-macros")
        .assert()
        .success()
        .stdout(predicate::str::contains("comptime"))
        .stdout(predicate::str::contains("wire"))
        .stdout(predicate::str::contains("tagged-template"));
}

#[test]
fn test_trace_shows_each_step() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("t.ts"), "const r = a |> f;\n").unwrap();
    macroweave(dir.path())
        .args(["trace", "t.ts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--- Step 0: __binop__"));
}

#[test]
fn test_cache_stats_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    macroweave(dir.path())
        .args(["cache", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("entries: 0"));
    macroweave(dir.path())
        .args(["cache", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 0 entries"));
}

#[test]
fn test_config_can_disable_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("macroweave.toml"), "[cache]\nenabled = false\n").unwrap();
    macroweave(dir.path())
        .args(["cache", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("expansion cache is disabled"));
}

#[test]
fn test_invalid_config_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("macroweave.toml"), "[expansion]\nmax_depth = 0\n").unwrap();
    macroweave(dir.path())
        .arg("list-macros")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_missing_input_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    macroweave(dir.path())
        .args(["expand", "nope.ts"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no such file"));
}
