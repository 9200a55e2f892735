//! Post-expansion import trimming.
//!
//! Imports of macro names are meaningless once the macro calls are gone.
//! A specifier is dropped when its local name named an expanded macro and no
//! longer appears anywhere else in the file, type positions included. An
//! import left with no bindings is dropped; `import "x"` is always kept.

use std::collections::HashSet;

use crate::ast::visit::referenced_identifiers;
use crate::ast::{Module, Stmt};

pub fn trim_unused_imports(module: &mut Module, consumed: &HashSet<String>) {
    if consumed.is_empty() {
        return;
    }
    let rest: Vec<_> = module
        .body
        .iter()
        .filter(|s| !matches!(s.value, Stmt::Import(_)))
        .cloned()
        .collect();
    let referenced = referenced_identifiers(&rest);
    let removable = |name: &str| consumed.contains(name) && !referenced.contains(name);

    module.body.retain_mut(|stmt| {
        let Stmt::Import(import) = &mut stmt.value else {
            return true;
        };
        if import.is_side_effect_only() {
            return true;
        }
        let before = import.local_names().len();
        if import.default.as_deref().is_some_and(removable) {
            import.default = None;
        }
        if import.namespace.as_deref().is_some_and(removable) {
            import.namespace = None;
        }
        import.named.retain(|s| !removable(&s.local));
        // Only imports this pass emptied are removed; `import {} from "x"`
        // written by hand stays.
        before == 0 || !import.is_empty()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse_module, print_module};

    fn trim(src: &str, consumed: &[&str]) -> String {
        let mut module = parse_module(src).unwrap();
        let consumed = consumed.iter().map(|s| s.to_string()).collect();
        trim_unused_imports(&mut module, &consumed);
        print_module(&module)
    }

    #[test]
    fn test_partial_import_keeps_other_specifiers() {
        let out = trim("import { Do, pipe } from \"fx\";\npipe(x);", &["Do"]);
        assert_eq!(out, "import { pipe } from \"fx\";\npipe(x);\n");
    }

    #[test]
    fn test_fully_consumed_import_is_removed() {
        let out = trim("import Do, { par } from \"fx\";\nconst a = 1;", &["Do", "par"]);
        assert_eq!(out, "const a = 1;\n");
    }

    #[test]
    fn test_still_referenced_and_side_effect_imports_stay() {
        let out = trim(
            "import \"polyfill\";\nimport { Do } from \"fx\";\nconst t: Do = x;",
            &["Do", "polyfill"],
        );
        assert!(out.contains("import \"polyfill\";"), "{}", out);
        assert!(out.contains("import { Do } from \"fx\";"), "{}", out);
    }
}
