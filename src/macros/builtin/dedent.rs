//! dedent`...`: strips the indentation common to every line of a template.
//!
//! A leading newline right after the opening backtick and trailing
//! whitespace before the closing one are dropped, so blocks can be written
//! indented with the surrounding code. Substitutions are left in place and
//! count as text when measuring indentation.

use std::sync::Arc;

use crate::ast::Template;
use crate::macros::definition::{define_tagged_template_macro, MacroDefinition, MacroInfo, TemplateInput};
use crate::WeaveError;

pub fn definition() -> Arc<MacroDefinition> {
    define_tagged_template_macro(
        MacroInfo::new("dedent").description("Removes common leading indentation from a template"),
        |ctx, input: &TemplateInput<'_>| {
            let template = dedent(input.template)?;
            let f = ctx.factory();
            Ok(f.template(template.quasis, template.exprs))
        },
    )
}

const HOLE: char = '\u{0}';

/// Dedents the raw text of `template`.
pub fn dedent(template: &Template) -> Result<Template, WeaveError> {
    // Join the quasis with a placeholder so lines spanning substitutions
    // are measured as a whole.
    let joined = template.quasis.join(&HOLE.to_string());
    let mut text = joined.as_str();
    if let Some(rest) = text.strip_prefix('\n').or_else(|| text.strip_prefix("\r\n")) {
        text = rest;
    }
    let text = text.trim_end_matches([' ', '\t']);
    let text = text.strip_suffix('\n').unwrap_or(text);

    let indent = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start_matches([' ', '\t']).len())
        .min()
        .unwrap_or(0);

    let out: Vec<&str> = text
        .split('\n')
        .map(|l| if l.len() >= indent { &l[indent..] } else { l.trim_start_matches([' ', '\t']) })
        .collect();
    let out = out.join("\n");

    let quasis: Vec<String> = out.split(HOLE).map(str::to_string).collect();
    Ok(Template {
        quasis,
        exprs: template.exprs.clone(),
    })
}

#[cfg(test)]
mod tests {
    use crate::transform::{transform_code, TransformOptions};

    #[test]
    fn test_common_indent_is_removed() {
        let src = "const s = dedent`\n    select *\n      from t\n    where id = ${id}\n  `;";
        let out = transform_code(src, &TransformOptions::for_file("q.ts")).unwrap();
        assert_eq!(out.code, "const s = `select *\n  from t\nwhere id = ${id}`;\n");
    }

    #[test]
    fn test_blank_lines_do_not_count() {
        let src = "const s = dedent`\n  a\n\n    b`;";
        let out = transform_code(src, &TransformOptions::for_file("q.ts")).unwrap();
        assert_eq!(out.code, "const s = `a\n\n  b`;\n");
    }
}
