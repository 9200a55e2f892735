//! `comptime(expr)` and `comptime({ fs: 'read' }, () => { ... })`.
//!
//! Evaluates its argument in the sandbox and splices the result in as a
//! literal. Grants given at the call site are added to the project grants.

use std::sync::Arc;

use tracing::debug;

use crate::macros::definition::{define_expression_macro, CallInput, Expansion, MacroDefinition, MacroInfo};
use crate::macros::MacroContext;
use crate::sandbox::{Capabilities, Sandbox};
use crate::{err_ctx, WeaveError};

pub fn definition() -> Arc<MacroDefinition> {
    define_expression_macro(
        MacroInfo::new("comptime").description("Evaluates an expression at compile time"),
        expand,
    )
}

fn expand(ctx: &mut MacroContext, input: &CallInput<'_>) -> Result<Expansion, WeaveError> {
    let (grant, body) = match input.args {
        [body] => (Capabilities::default(), body),
        [grant, body] => (Capabilities::from_grant(grant)?, body),
        _ => {
            return Err(err_ctx!(
                Expansion,
                format!("comptime expects 1 or 2 arguments, got {}", input.args.len()),
                input.span,
                "use comptime(expr) or comptime({ fs: 'read' }, () => ...)"
            ))
        }
    };
    let capabilities = ctx.capabilities().union(grant);
    debug!(file = ctx.file_name(), ?capabilities, "evaluating comptime block");
    let mut sandbox = Sandbox::new(capabilities, ctx.file_dir());
    let value = sandbox.run(body).map_err(|e| e.or_span(body.span))?;
    Ok(Expansion::Expr(value.to_expr(&ctx.factory())?))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::transform::{transform_code, TransformOptions};

    #[test]
    fn test_splices_computed_literal() {
        let out = transform_code(
            "const n = comptime(() => [1, 2, 3].reduce((a, b) => a + b, 0));",
            &TransformOptions::for_file("n.ts"),
        )
        .unwrap();
        assert_eq!(out.code, "const n = 6;\n");
    }

    #[test]
    fn test_denied_read_fails_only_that_call() {
        let out = transform_code(
            "const a = comptime(() => fs.readFileSync('x'));\nconst b = comptime(1 + 1);",
            &TransformOptions::for_file("n.ts"),
        )
        .unwrap();
        assert_eq!(out.diagnostics.len(), 1);
        assert!(out.diagnostics[0].message.contains("filesystem"));
        assert!(out.code.contains("const a = comptime("));
        assert!(out.code.contains("const b = 2;"));
    }

    #[test]
    fn test_granted_read_resolves_against_the_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("version.txt"), "1.2.3\n").unwrap();
        let file = dir.path().join("app.ts");
        let out = transform_code(
            "const v = comptime({ fs: 'read' }, () => fs.readFileSync('version.txt', 'utf8').trim());",
            &TransformOptions::for_file(file.to_string_lossy()),
        )
        .unwrap();
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        assert_eq!(out.code, "const v = \"1.2.3\";\n");
    }
}
