//! `@derive(Eq, Show, Builder)`.
//!
//! Each derive reads the class's instance fields (declared properties and
//! constructor parameter properties) and emits free-standing declarations
//! after the class:
//!
//! ```text
//! function pointEquals(a: Point, b: Point): boolean
//! function pointToString(value: Point): string
//! class PointBuilder { x(value: number): this; ...; build(): Point }
//! ```

use std::sync::Arc;

use crate::ast::factory::is_identifier;
use crate::ast::{ClassDecl, Function, MemberKind, Param, PropKey, Stmt, StmtNode};
use crate::macros::definition::{define_derive_macro, DeriveInput, MacroDefinition, MacroInfo};
use crate::macros::MacroContext;
use crate::syntax::parse_statements_at;
use crate::{err_ctx, WeaveError};

pub fn definitions() -> Vec<Arc<MacroDefinition>> {
    vec![
        define_derive_macro(
            MacroInfo::new("Eq").description("Structural equality function"),
            derive_eq,
        ),
        define_derive_macro(
            MacroInfo::new("Show").description("String rendering function"),
            derive_show,
        ),
        define_derive_macro(
            MacroInfo::new("Builder").description("Fluent builder class"),
            derive_builder,
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    name: String,
    ty: Option<String>,
    optional: bool,
}

fn fields(class: &ClassDecl) -> Vec<Field> {
    let mut out = Vec::new();
    for member in &class.members {
        let m = &member.value;
        match &m.kind {
            MemberKind::Property { key, optional, ty, .. } if !m.is_static() => {
                if let Some(name) = key.name().filter(|n| is_identifier(n) && !matches!(key, PropKey::Private(_))) {
                    out.push(Field {
                        name: name.to_string(),
                        ty: ty.clone(),
                        optional: *optional,
                    });
                }
            }
            MemberKind::Constructor(ctor) => {
                for p in ctor.params.iter().filter(|p| !p.modifiers.is_empty()) {
                    if let Some(name) = p.pattern.as_ident() {
                        out.push(Field {
                            name: name.to_string(),
                            ty: p.ty.clone(),
                            optional: p.optional,
                        });
                    }
                }
            }
            _ => {}
        }
    }
    out
}

/// `Point` and `Box<T>` for `class Box<T extends object>`.
fn self_type(class: &ClassDecl, name: &str) -> String {
    let Some(params) = &class.type_params else {
        return name.to_string();
    };
    let inner = params.trim().trim_start_matches('<').trim_end_matches('>');
    let mut depth = 0i32;
    let mut names = Vec::new();
    let mut current = String::new();
    for c in inner.chars() {
        match c {
            '<' | '(' | '[' | '{' => depth += 1,
            '>' | ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                names.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    names.push(current);
    let args: Vec<&str> = names
        .iter()
        .filter_map(|p| p.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$')).find(|w| !w.is_empty()))
        .collect();
    format!("{}<{}>", name, args.join(", "))
}

fn class_name<'a>(input: &'a DeriveInput<'_>) -> Result<&'a str, WeaveError> {
    input
        .class
        .name
        .as_deref()
        .ok_or_else(|| err_ctx!(Expansion, "derive needs a named class", input.span))
}

fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn function_decl(ctx: &MacroContext, name: String, class: &ClassDecl, params: Vec<Param>, ret: &str, body: Vec<StmtNode>) -> StmtNode {
    ctx.factory().stmt(Stmt::Function(Function {
        name: Some(name),
        is_async: false,
        is_generator: false,
        type_params: class.type_params.clone(),
        params,
        return_type: Some(ret.to_string()),
        body: Some(body),
    }))
}

fn derive_eq(ctx: &mut MacroContext, input: &DeriveInput<'_>) -> Result<Vec<StmtNode>, WeaveError> {
    let name = class_name(input)?;
    let ty = self_type(input.class, name);
    let f = ctx.factory();
    let result = fields(input.class)
        .iter()
        .map(|field| {
            f.binary(
                "===",
                f.member(f.ident("a"), &field.name),
                f.member(f.ident("b"), &field.name),
            )
        })
        .reduce(|acc, cmp| f.binary("&&", acc, cmp))
        .unwrap_or_else(|| f.bool(true));
    let params = vec![Param::named("a").with_type(ty.clone()), Param::named("b").with_type(ty)];
    let body = vec![f.return_stmt(Some(result))];
    Ok(vec![function_decl(ctx, format!("{}Equals", lower_first(name)), input.class, params, "boolean", body)])
}

fn escape_template(text: &str) -> String {
    text.replace('\\', "\\\\").replace('`', "\\`").replace("${", "\\${")
}

fn derive_show(ctx: &mut MacroContext, input: &DeriveInput<'_>) -> Result<Vec<StmtNode>, WeaveError> {
    let name = class_name(input)?;
    let ty = self_type(input.class, name);
    let f = ctx.factory();
    let fields = fields(input.class);
    let template = if fields.is_empty() {
        f.template(vec![format!("{} {{}}", escape_template(name))], vec![])
    } else {
        let mut quasis = Vec::with_capacity(fields.len() + 1);
        let mut exprs = Vec::with_capacity(fields.len());
        let mut text = format!("{} {{ ", escape_template(name));
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                text.push_str(", ");
            }
            text.push_str(&escape_template(&field.name));
            text.push_str(": ");
            quasis.push(std::mem::take(&mut text));
            exprs.push(f.member(f.ident("value"), &field.name));
        }
        quasis.push(" }".to_string());
        f.template(quasis, exprs)
    };
    let params = vec![Param::named("value").with_type(ty)];
    let body = vec![f.return_stmt(Some(template))];
    Ok(vec![function_decl(ctx, format!("{}ToString", lower_first(name)), input.class, params, "string", body)])
}

fn derive_builder(ctx: &mut MacroContext, input: &DeriveInput<'_>) -> Result<Vec<StmtNode>, WeaveError> {
    let name = class_name(input)?;
    let ty = self_type(input.class, name);
    let type_params = input.class.type_params.as_deref().unwrap_or("");
    let store = ctx.fresh_name("fields");
    let mut src = format!("class {}Builder{} {{\n", name, type_params);
    src.push_str(&format!("  private {}: Partial<{}> = {{}};\n", store, ty));
    for field in fields(input.class) {
        let field_ty = match (&field.ty, field.optional) {
            (Some(t), true) => format!("{} | undefined", t),
            (Some(t), false) => t.clone(),
            (None, _) => "unknown".to_string(),
        };
        src.push_str(&format!(
            "  {name}(value: {ty}): this {{\n    this.{store}.{name} = value;\n    return this;\n  }}\n",
            name = field.name,
            ty = field_ty,
            store = store
        ));
    }
    src.push_str(&format!(
        "  build(): {ty} {{\n    return Object.assign(Object.create({name}.prototype), this.{store});\n  }}\n}}",
        ty = ty,
        name = name,
        store = store
    ));
    parse_statements_at(&src, ctx.span())
}

#[cfg(test)]
mod tests {
    use crate::transform::{transform_code, TransformOptions};

    fn expand(src: &str) -> String {
        let out = transform_code(src, &TransformOptions::for_file("d.ts")).unwrap();
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        out.code
    }

    #[test]
    fn test_eq_and_show_cover_properties_and_parameter_properties() {
        let out = expand(
            "@derive(Eq, Show)\nclass Point {\n  z?: number;\n  constructor(public x: number, readonly y: number) {}\n}",
        );
        assert!(out.contains(
            "function pointEquals(a: Point, b: Point): boolean {\n  return a.z === b.z && a.x === b.x && a.y === b.y;\n}"
        ), "{}", out);
        assert!(out.contains("return `Point { z: ${value.z}, x: ${value.x}, y: ${value.y} }`;"), "{}", out);
        assert!(!out.contains("@derive"));
    }

    #[test]
    fn test_generic_class_keeps_type_parameters() {
        let out = expand("@derive(Eq)\nclass Box<T extends object> {\n  value: T;\n}");
        assert!(out.contains("function boxEquals<T extends object>(a: Box<T>, b: Box<T>): boolean"), "{}", out);
    }

    #[test]
    fn test_builder_has_a_setter_per_field() {
        let out = expand("@derive(Builder)\nclass User {\n  name: string;\n  age?: number;\n}");
        assert!(out.contains("class UserBuilder {"), "{}", out);
        assert!(out.contains("name(value: string): this {"), "{}", out);
        assert!(out.contains("age(value: number | undefined): this {"), "{}", out);
        assert!(out.contains("return Object.assign(Object.create(User.prototype), this.fields);"), "{}", out);
    }

    #[test]
    fn test_unknown_derive_is_reported() {
        let out = transform_code("@derive(Hash)\nclass A {}", &TransformOptions::for_file("d.ts")).unwrap();
        assert!(out.diagnostics[0].message.contains("unknown derive macro 'Hash'"));
    }
}
