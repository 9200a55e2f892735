//! Read-only declaration index standing in for type information.
//!
//! Built once per file from its top-level declarations. It answers the few
//! questions macros ask: where an identifier was imported from, what a
//! binding was declared as, and whether an expression evaluates to a promise.

use std::collections::HashMap;

use crate::ast::{ArrowBody, Expr, ExprNode, Module, Stmt, StmtNode, VarKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    pub source: String,
    /// Name exported by the source module; `default` and `*` for default
    /// and namespace imports.
    pub imported: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionSig {
    pub is_async: bool,
    pub return_type: Option<String>,
}

impl FunctionSig {
    fn is_promise_like(&self) -> bool {
        self.is_async
            || self
                .return_type
                .as_deref()
                .is_some_and(|t| t.trim_start().starts_with("Promise<"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct TypeOracle {
    imports: HashMap<String, ImportBinding>,
    functions: HashMap<String, FunctionSig>,
    annotations: HashMap<String, String>,
    mutable: HashMap<String, VarKind>,
}

impl TypeOracle {
    pub fn from_module(module: &Module) -> Self {
        let mut oracle = Self::default();
        for stmt in &module.body {
            oracle.index(stmt);
        }
        oracle
    }

    fn index(&mut self, stmt: &StmtNode) {
        match &stmt.value {
            Stmt::Export(inner) => self.index(inner),
            Stmt::Import(import) => {
                if let Some(d) = &import.default {
                    self.add_import(d, &import.source, "default");
                }
                if let Some(n) = &import.namespace {
                    self.add_import(n, &import.source, "*");
                }
                for spec in &import.named {
                    self.add_import(&spec.local, &import.source, &spec.imported);
                }
            }
            Stmt::Function(f) => {
                if let Some(name) = &f.name {
                    self.functions.insert(
                        name.clone(),
                        FunctionSig {
                            is_async: f.is_async,
                            return_type: f.return_type.clone(),
                        },
                    );
                }
            }
            Stmt::Var(decl) => {
                for d in &decl.decls {
                    let Some(name) = d.pattern.as_ident() else {
                        continue;
                    };
                    if decl.kind != VarKind::Const {
                        self.mutable.insert(name.to_string(), decl.kind);
                    }
                    if let Some(ty) = &d.ty {
                        self.annotations.insert(name.to_string(), ty.clone());
                    }
                    if let Some(sig) = d.init.as_ref().and_then(function_sig) {
                        self.functions.insert(name.to_string(), sig);
                    }
                }
            }
            _ => {}
        }
    }

    fn add_import(&mut self, local: &str, source: &str, imported: &str) {
        self.imports.insert(
            local.to_string(),
            ImportBinding {
                source: source.to_string(),
                imported: imported.to_string(),
            },
        );
    }

    /// The import that brought `local` into scope, if any.
    pub fn import_of(&self, local: &str) -> Option<&ImportBinding> {
        self.imports.get(local)
    }

    /// Module `local` was imported from.
    pub fn import_source(&self, local: &str) -> Option<&str> {
        self.imports.get(local).map(|b| b.source.as_str())
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSig> {
        self.functions.get(name)
    }

    /// Declared type annotation of a top-level binding.
    pub fn annotation(&self, name: &str) -> Option<&str> {
        self.annotations.get(name).map(String::as_str)
    }

    /// True when the top-level binding was declared with `let` or `var`.
    pub fn is_mutable(&self, name: &str) -> bool {
        self.mutable.contains_key(name)
    }

    /// Whether `expr` evaluates to a promise: calls of `async` functions or
    /// of functions declared to return `Promise<...>`, `Promise.*(...)`,
    /// `new Promise(...)`, `fetch(...)` and async function expressions called
    /// in place.
    pub fn is_promise_like(&self, expr: &ExprNode) -> bool {
        match &expr.value {
            Expr::Paren(inner) => self.is_promise_like(inner),
            Expr::New { callee, .. } => matches!(&callee.value, Expr::Ident(n) if n == "Promise"),
            Expr::Call { callee, .. } => match &callee.value {
                Expr::Ident(n) if n == "fetch" => true,
                Expr::Ident(n) => {
                    self.functions.get(n).is_some_and(FunctionSig::is_promise_like)
                        || self
                            .annotations
                            .get(n)
                            .is_some_and(|t| t.contains("=> Promise<"))
                }
                Expr::Member { object, property, .. } => {
                    matches!(&object.value, Expr::Ident(o) if o == "Promise")
                        || (property == "then" || property == "catch" || property == "finally")
                            && self.is_promise_like(object)
                }
                Expr::Paren(inner) => function_sig(inner).is_some_and(|s| s.is_promise_like()),
                _ => false,
            },
            Expr::Ident(n) => self
                .annotations
                .get(n)
                .is_some_and(|t| t.trim_start().starts_with("Promise<")),
            _ => false,
        }
    }
}

fn function_sig(expr: &ExprNode) -> Option<FunctionSig> {
    match &expr.value {
        Expr::Paren(inner) => function_sig(inner),
        Expr::Function(f) => Some(FunctionSig {
            is_async: f.is_async,
            return_type: f.return_type.clone(),
        }),
        Expr::Arrow(a) => Some(FunctionSig {
            is_async: a.is_async,
            return_type: a.return_type.clone().or_else(|| match &a.body {
                ArrowBody::Expr(body) if matches!(&body.value, Expr::New { callee, .. } if matches!(&callee.value, Expr::Ident(n) if n == "Promise")) => {
                    Some("Promise<unknown>".to_string())
                }
                _ => None,
            }),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse_expression, parse_module};

    fn oracle(src: &str) -> TypeOracle {
        TypeOracle::from_module(&parse_module(src).unwrap())
    }

    #[test]
    fn test_imports_are_indexed() {
        let o = oracle("import { wire as w } from \"layers\";\nimport D from \"d\";");
        assert_eq!(o.import_source("w"), Some("layers"));
        assert_eq!(o.import_of("w").unwrap().imported, "wire");
        assert_eq!(o.import_of("D").unwrap().imported, "default");
        assert!(o.import_source("x").is_none());
    }

    #[test]
    fn test_promise_like_expressions() {
        let o = oracle(
            "async function load() {}\nfunction get(): Promise<number> { return p; }\nconst sync = () => 1;\nconst later = async () => 2;",
        );
        for src in ["load()", "get()", "later()", "fetch(url)", "Promise.resolve(1)", "new Promise(r)"] {
            assert!(o.is_promise_like(&parse_expression(src).unwrap()), "{}", src);
        }
        for src in ["sync()", "other()", "1"] {
            assert!(!o.is_promise_like(&parse_expression(src).unwrap()), "{}", src);
        }
    }
}
