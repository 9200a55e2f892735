//! `@layer("Service", ["Dep", ...])` and `wire("Service", ...)`.
//!
//! `@layer` records the decorated class as the provider of a service and
//! leaves the class otherwise untouched. `wire` resolves everything the
//! requested services need and composes the layers:
//!
//! ```text
//! wire("App")  =>  AppLive.pipe(Layer.provide(DbLive), Layer.provide(LogLive))
//! ```

mod graph;

use std::sync::Arc;

use tracing::debug;

pub use graph::{resolve_layers, LayerPlan, LayerProvider};

use crate::ast::{DeclKind, Expr, ExprNode, Stmt};
use crate::macros::definition::{
    define_attribute_macro, define_expression_macro, AttributeInput, AttributeTarget, CallInput, Expansion,
    MacroDefinition, MacroInfo,
};
use crate::macros::MacroContext;
use crate::{err_ctx, WeaveError};

pub fn definitions() -> Vec<Arc<MacroDefinition>> {
    vec![
        define_attribute_macro(
            MacroInfo::new("layer").description("Declares the class as the layer providing a service"),
            &[DeclKind::Class],
            expand_layer,
        ),
        define_expression_macro(
            MacroInfo::new("wire").description("Composes the layers a set of services needs"),
            expand_wire,
        ),
    ]
}

fn string_arg<'a>(expr: &'a ExprNode, what: &str) -> Result<&'a str, WeaveError> {
    match &expr.value {
        Expr::Str(s) => Ok(s),
        _ => Err(err_ctx!(Expansion, format!("{} must be a string literal", what), expr.span)),
    }
}

fn expand_layer(ctx: &mut MacroContext, input: &AttributeInput<'_>) -> Result<Expansion, WeaveError> {
    let AttributeTarget::Class(class) = input.target else {
        return Err(err_ctx!(Expansion, "@layer only applies to classes", input.span));
    };
    let Some(name) = class.name.clone() else {
        return Err(err_ctx!(Expansion, "@layer needs a named class", input.span));
    };
    let args = input.decorator.args();
    let service = match args.first() {
        Some(arg) => string_arg(arg, "the service name")?.to_string(),
        None => {
            return Err(err_ctx!(
                Expansion,
                "@layer needs the name of the service it provides",
                input.span,
                "write @layer(\"Service\", [\"Dependency\"])"
            ))
        }
    };
    let requires = match args.get(1).map(|a| &a.value) {
        None => Vec::new(),
        Some(Expr::Array(items)) => items
            .iter()
            .map(|i| string_arg(i, "each dependency").map(str::to_string))
            .collect::<Result<_, _>>()?,
        Some(_) => {
            return Err(err_ctx!(
                Expansion,
                "@layer dependencies must be an array of service names",
                args[1].span
            ))
        }
    };
    debug!(service = %service, layer = %name, ?requires, "layer provider recorded");
    let origin = ctx.file_name().to_string();
    ctx.add_layer_provider(LayerProvider::new(service, name, requires).with_origin(origin));
    Ok(Expansion::Stmts(vec![ctx.factory().stmt(Stmt::Class(class.clone()))]))
}

fn expand_wire(ctx: &mut MacroContext, input: &CallInput<'_>) -> Result<Expansion, WeaveError> {
    if input.args.is_empty() {
        return Err(err_ctx!(Expansion, "wire needs at least one service name", input.span));
    }
    let required = input
        .args
        .iter()
        .map(|a| string_arg(a, "each service").map(str::to_string))
        .collect::<Result<Vec<_>, _>>()?;
    let providers = ctx.layer_providers();
    let origin = ctx.file_name().to_string();
    let plan = resolve_layers(
        &required,
        |service| providers.iter().filter(|p| p.service == service).collect(),
        Some(origin.as_str()),
    )
    .map_err(|e| e.or_span(input.span))?;
    let missing = plan.missing.clone();
    for service in &missing {
        ctx.report_warning(format!("no layer provides service '{}'", service), input.span);
    }

    let f = ctx.factory();
    let mut layers = plan.expressions().into_iter().map(|l| f.path(&l));
    let Some(root) = layers.next() else {
        return Err(err_ctx!(Expansion, "wire resolved no layers", input.span));
    };
    let provided: Vec<ExprNode> = layers
        .map(|l| f.call(f.path("Layer.provide"), vec![l]))
        .collect();
    if provided.is_empty() {
        return Ok(Expansion::Expr(root));
    }
    Ok(Expansion::Expr(f.method_call(root, "pipe", provided)))
}

#[cfg(test)]
mod tests {
    use crate::transform::{transform_code, TransformOptions};

    #[test]
    fn test_wire_composes_recorded_layers() {
        let src = "\
@layer(\"Log\")
class LogLive {}
@layer(\"Db\", [\"Log\"])
class DbLive {}
const app = wire(\"Db\");";
        let out = transform_code(src, &TransformOptions::for_file("app.ts")).unwrap();
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        assert!(out.code.contains("class LogLive {}"));
        assert!(!out.code.contains("@layer"));
        assert!(out.code.ends_with("const app = DbLive.pipe(Layer.provide(LogLive));\n"), "{}", out.code);
    }

    #[test]
    fn test_cycle_is_a_diagnostic() {
        let src = "\
@layer(\"A\", [\"B\"])
class ALive {}
@layer(\"B\", [\"A\"])
class BLive {}
const x = wire(\"A\");";
        let out = transform_code(src, &TransformOptions::for_file("app.ts")).unwrap();
        assert_eq!(out.diagnostics.len(), 1);
        assert!(out.diagnostics[0].message.contains("A -> B -> A"));
        assert!(out.code.contains("wire(\"A\")"));
    }

    #[test]
    fn test_missing_service_warns() {
        let out = transform_code("const x = wire(\"Db\");", &TransformOptions::for_file("app.ts")).unwrap();
        assert_eq!(out.code, "const x = Db;\n");
        assert!(!out.diagnostics[0].is_error());
    }
}
