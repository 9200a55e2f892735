//! Read-only AST traversal.
//!
//! `Visitor` has one hook per node family with default implementations that
//! recurse through `walk_*`. Analyses override only the hooks they care about.

use std::collections::HashSet;

use super::{
    Arrow, ArrowBody, ClassDecl, Expr, ExprNode, ForHead, ForInit, Function, MemberKind, Pattern,
    Prop, PropKey, Stmt, StmtNode,
};

pub trait Visitor {
    fn visit_stmts(&mut self, stmts: &[StmtNode]) {
        walk_stmts(self, stmts)
    }
    fn visit_stmt(&mut self, stmt: &StmtNode) {
        walk_stmt(self, stmt)
    }
    fn visit_expr(&mut self, expr: &ExprNode) {
        walk_expr(self, expr)
    }
    fn visit_pattern(&mut self, pattern: &Pattern) {
        walk_pattern(self, pattern)
    }
    fn visit_function(&mut self, func: &Function) {
        walk_function(self, func)
    }
    fn visit_arrow(&mut self, arrow: &Arrow) {
        walk_arrow(self, arrow)
    }
    fn visit_class(&mut self, class: &ClassDecl) {
        walk_class(self, class)
    }
    /// An identifier in reference position (including object shorthand).
    fn visit_ident_ref(&mut self, _name: &str) {}
    /// A type annotation or other text kept verbatim.
    fn visit_type(&mut self, _text: &str) {}
}

pub fn walk_stmts<V: Visitor + ?Sized>(v: &mut V, stmts: &[StmtNode]) {
    for s in stmts {
        v.visit_stmt(s);
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(v: &mut V, stmt: &StmtNode) {
    match &stmt.value {
        Stmt::Expr(e) | Stmt::Throw(e) | Stmt::ExportDefault(e) => v.visit_expr(e),
        Stmt::Var(decl) => {
            for d in &decl.decls {
                v.visit_pattern(&d.pattern);
                if let Some(ty) = &d.ty {
                    v.visit_type(ty);
                }
                if let Some(init) = &d.init {
                    v.visit_expr(init);
                }
            }
        }
        Stmt::Function(f) => v.visit_function(f),
        Stmt::Class(c) => v.visit_class(c),
        Stmt::TypeAlias(alias) => v.visit_type(&alias.ty),
        Stmt::Import(_) | Stmt::ExportAll { .. } | Stmt::Empty => {}
        Stmt::Export(inner) => v.visit_stmt(inner),
        Stmt::ExportNamed {
            specifiers, source, ..
        } => {
            if source.is_none() {
                for s in specifiers {
                    v.visit_ident_ref(&s.local);
                }
            }
        }
        Stmt::Return(e) => {
            if let Some(e) = e {
                v.visit_expr(e);
            }
        }
        Stmt::If { test, cons, alt } => {
            v.visit_expr(test);
            v.visit_stmt(cons);
            if let Some(alt) = alt {
                v.visit_stmt(alt);
            }
        }
        Stmt::Block(stmts) => v.visit_stmts(stmts),
        Stmt::For {
            init,
            test,
            update,
            body,
        } => {
            match init {
                Some(ForInit::Var(decl)) => {
                    for d in &decl.decls {
                        v.visit_pattern(&d.pattern);
                        if let Some(init) = &d.init {
                            v.visit_expr(init);
                        }
                    }
                }
                Some(ForInit::Expr(e)) => v.visit_expr(e),
                None => {}
            }
            if let Some(t) = test {
                v.visit_expr(t);
            }
            if let Some(u) = update {
                v.visit_expr(u);
            }
            v.visit_stmt(body);
        }
        Stmt::ForIn {
            head, right, body, ..
        } => {
            match head {
                ForHead::Var(_, p) | ForHead::Pattern(p) => v.visit_pattern(p),
            }
            v.visit_expr(right);
            v.visit_stmt(body);
        }
        Stmt::While { test, body } | Stmt::DoWhile { body, test } => {
            v.visit_expr(test);
            v.visit_stmt(body);
        }
        Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        } => {
            v.visit_stmts(block);
            if let Some(p) = param {
                v.visit_pattern(p);
            }
            if let Some(h) = handler {
                v.visit_stmts(h);
            }
            if let Some(f) = finalizer {
                v.visit_stmts(f);
            }
        }
        Stmt::Break(_) | Stmt::Continue(_) => {}
        Stmt::Switch { disc, cases } => {
            v.visit_expr(disc);
            for c in cases {
                if let Some(t) = &c.test {
                    v.visit_expr(t);
                }
                v.visit_stmts(&c.body);
            }
        }
        Stmt::Labeled { body, .. } => v.visit_stmt(body),
        Stmt::Verbatim(text) => v.visit_type(text),
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, expr: &ExprNode) {
    match &expr.value {
        Expr::Ident(name) => v.visit_ident_ref(name),
        Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Null | Expr::This | Expr::Super => {}
        Expr::Template(t) => {
            for e in &t.exprs {
                v.visit_expr(e);
            }
        }
        Expr::TaggedTemplate { tag, template, .. } => {
            v.visit_expr(tag);
            for e in &template.exprs {
                v.visit_expr(e);
            }
        }
        Expr::Array(items) | Expr::Sequence(items) => {
            for i in items {
                v.visit_expr(i);
            }
        }
        Expr::Object(props) => {
            for p in props {
                match p {
                    Prop::KeyValue { key, value } => {
                        walk_prop_key(v, key);
                        v.visit_expr(value);
                    }
                    Prop::Shorthand(name) => v.visit_ident_ref(name),
                    Prop::Spread(e) => v.visit_expr(e),
                    Prop::Method { key, func, .. } => {
                        walk_prop_key(v, key);
                        v.visit_function(func);
                    }
                }
            }
        }
        Expr::Function(f) => v.visit_function(f),
        Expr::Arrow(a) => v.visit_arrow(a),
        Expr::Class(c) => v.visit_class(c),
        Expr::Unary { arg, .. }
        | Expr::Update { arg, .. }
        | Expr::Spread(arg)
        | Expr::Await(arg)
        | Expr::NonNull(arg)
        | Expr::Paren(arg) => v.visit_expr(arg),
        Expr::Binary { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        Expr::Assign { target, value, .. } => {
            v.visit_expr(target);
            v.visit_expr(value);
        }
        Expr::Conditional { test, cons, alt } => {
            v.visit_expr(test);
            v.visit_expr(cons);
            v.visit_expr(alt);
        }
        Expr::Call {
            callee,
            args,
            type_args,
            ..
        } => {
            v.visit_expr(callee);
            if let Some(t) = type_args {
                v.visit_type(t);
            }
            for a in args {
                v.visit_expr(a);
            }
        }
        Expr::New {
            callee,
            args,
            type_args,
        } => {
            v.visit_expr(callee);
            if let Some(t) = type_args {
                v.visit_type(t);
            }
            for a in args.iter().flatten() {
                v.visit_expr(a);
            }
        }
        Expr::Member { object, .. } => v.visit_expr(object),
        Expr::Index { object, index, .. } => {
            v.visit_expr(object);
            v.visit_expr(index);
        }
        Expr::Yield { arg, .. } => {
            if let Some(a) = arg {
                v.visit_expr(a);
            }
        }
        Expr::TypeAssertion { expr, ty, .. } => {
            v.visit_expr(expr);
            v.visit_type(ty);
        }
    }
}

fn walk_prop_key<V: Visitor + ?Sized>(v: &mut V, key: &PropKey) {
    if let PropKey::Computed(e) = key {
        v.visit_expr(e);
    }
}

pub fn walk_pattern<V: Visitor + ?Sized>(v: &mut V, pattern: &Pattern) {
    match pattern {
        Pattern::Ident(_) => {}
        Pattern::Object { props, rest } => {
            for p in props {
                walk_prop_key(v, &p.key);
                v.visit_pattern(&p.value);
                if let Some(d) = &p.default {
                    v.visit_expr(d);
                }
            }
            if let Some(r) = rest {
                v.visit_pattern(r);
            }
        }
        Pattern::Array { elems, rest } => {
            for e in elems.iter().flatten() {
                v.visit_pattern(&e.pattern);
                if let Some(d) = &e.default {
                    v.visit_expr(d);
                }
            }
            if let Some(r) = rest {
                v.visit_pattern(r);
            }
        }
        Pattern::Expr(e) => v.visit_expr(e),
    }
}

pub fn walk_function<V: Visitor + ?Sized>(v: &mut V, func: &Function) {
    for p in &func.params {
        v.visit_pattern(&p.pattern);
        if let Some(ty) = &p.ty {
            v.visit_type(ty);
        }
        if let Some(d) = &p.default {
            v.visit_expr(d);
        }
    }
    if let Some(rt) = &func.return_type {
        v.visit_type(rt);
    }
    if let Some(body) = &func.body {
        v.visit_stmts(body);
    }
}

pub fn walk_arrow<V: Visitor + ?Sized>(v: &mut V, arrow: &Arrow) {
    for p in &arrow.params {
        v.visit_pattern(&p.pattern);
        if let Some(ty) = &p.ty {
            v.visit_type(ty);
        }
        if let Some(d) = &p.default {
            v.visit_expr(d);
        }
    }
    if let Some(rt) = &arrow.return_type {
        v.visit_type(rt);
    }
    match &arrow.body {
        ArrowBody::Expr(e) => v.visit_expr(e),
        ArrowBody::Block(stmts) => v.visit_stmts(stmts),
    }
}

pub fn walk_class<V: Visitor + ?Sized>(v: &mut V, class: &ClassDecl) {
    for d in &class.decorators {
        v.visit_expr(&d.expr);
    }
    if let Some(ext) = &class.extends {
        v.visit_expr(ext);
    }
    if let Some(imp) = &class.implements {
        v.visit_type(imp);
    }
    for m in &class.members {
        for d in &m.value.decorators {
            v.visit_expr(&d.expr);
        }
        match &m.value.kind {
            MemberKind::Constructor(f) => v.visit_function(f),
            MemberKind::Method { key, func, .. } => {
                walk_prop_key(v, key);
                v.visit_function(func);
            }
            MemberKind::Property { key, ty, value, .. } => {
                walk_prop_key(v, key);
                if let Some(ty) = ty {
                    v.visit_type(ty);
                }
                if let Some(val) = value {
                    v.visit_expr(val);
                }
            }
            MemberKind::Verbatim(text) => v.visit_type(text),
            MemberKind::StaticBlock(stmts) => v.visit_stmts(stmts),
        }
    }
}

// ============================================================================
// FREE IDENTIFIERS
// ============================================================================

/// Identifiers referenced but not bound inside a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeVars {
    /// Free names in first-reference order.
    pub names: Vec<String>,
    /// `this` used outside any nested non-arrow function.
    pub uses_this: bool,
    /// `arguments` used outside any nested non-arrow function.
    pub uses_arguments: bool,
}

impl FreeVars {
    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

#[derive(Default)]
struct FreeVarWalker {
    scopes: Vec<HashSet<String>>,
    function_depth: usize,
    seen: HashSet<String>,
    out: FreeVars,
}

impl FreeVarWalker {
    fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains(name))
    }

    fn with_scope(&mut self, names: Vec<String>, f: impl FnOnce(&mut Self)) {
        self.scopes.push(names.into_iter().collect());
        f(self);
        self.scopes.pop();
    }
}

fn param_names(params: &[super::Param]) -> Vec<String> {
    params.iter().flat_map(|p| p.pattern.bound_names()).collect()
}

impl Visitor for FreeVarWalker {
    fn visit_stmts(&mut self, stmts: &[StmtNode]) {
        let declared = stmts.iter().flat_map(|s| s.value.declared_names()).collect();
        self.with_scope(declared, |w| walk_stmts(w, stmts));
    }

    fn visit_stmt(&mut self, stmt: &StmtNode) {
        match &stmt.value {
            Stmt::For {
                init: Some(ForInit::Var(decl)),
                ..
            } => {
                let names = decl.decls.iter().flat_map(|d| d.pattern.bound_names()).collect();
                self.with_scope(names, |w| walk_stmt(w, stmt));
            }
            Stmt::ForIn {
                head: ForHead::Var(_, p),
                ..
            } => {
                let names = p.bound_names();
                self.with_scope(names, |w| walk_stmt(w, stmt));
            }
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                self.visit_stmts(block);
                if let Some(h) = handler {
                    let names = param.as_ref().map(|p| p.bound_names()).unwrap_or_default();
                    self.with_scope(names, |w| {
                        if let Some(p) = param {
                            w.visit_pattern(p);
                        }
                        w.visit_stmts(h);
                    });
                }
                if let Some(f) = finalizer {
                    self.visit_stmts(f);
                }
            }
            _ => walk_stmt(self, stmt),
        }
    }

    fn visit_expr(&mut self, expr: &ExprNode) {
        match &expr.value {
            Expr::This if self.function_depth == 0 => self.out.uses_this = true,
            _ => walk_expr(self, expr),
        }
    }

    fn visit_function(&mut self, func: &Function) {
        let mut names = param_names(&func.params);
        names.extend(func.name.iter().cloned());
        names.push("arguments".to_string());
        self.function_depth += 1;
        self.with_scope(names, |w| walk_function(w, func));
        self.function_depth -= 1;
    }

    fn visit_arrow(&mut self, arrow: &Arrow) {
        let names = param_names(&arrow.params);
        self.with_scope(names, |w| walk_arrow(w, arrow));
    }

    fn visit_class(&mut self, class: &ClassDecl) {
        let names = class.name.iter().cloned().collect();
        self.function_depth += 1;
        self.with_scope(names, |w| walk_class(w, class));
        self.function_depth -= 1;
    }

    fn visit_ident_ref(&mut self, name: &str) {
        if self.is_bound(name) {
            return;
        }
        if name == "arguments" {
            self.out.uses_arguments = true;
            return;
        }
        if self.seen.insert(name.to_string()) {
            self.out.names.push(name.to_string());
        }
    }
}

/// Free identifiers of an expression.
pub fn free_identifiers(expr: &ExprNode) -> FreeVars {
    let mut w = FreeVarWalker::default();
    w.visit_expr(expr);
    w.out
}

/// Free identifiers of a statement list, treated as one block.
pub fn free_identifiers_in_stmts(stmts: &[StmtNode]) -> FreeVars {
    let mut w = FreeVarWalker::default();
    w.visit_stmts(stmts);
    w.out
}

// ============================================================================
// ASSIGNED NAMES AND REFERENCES
// ============================================================================

#[derive(Default)]
struct AssignedNames {
    names: HashSet<String>,
}

impl AssignedNames {
    fn collect_target(&mut self, target: &ExprNode) {
        match &target.value {
            Expr::Ident(n) => {
                self.names.insert(n.clone());
            }
            Expr::Paren(inner) | Expr::NonNull(inner) | Expr::Spread(inner) => {
                self.collect_target(inner)
            }
            Expr::Array(items) => {
                for i in items {
                    self.collect_target(i);
                }
            }
            Expr::Object(props) => {
                for p in props {
                    match p {
                        Prop::Shorthand(n) => {
                            self.names.insert(n.clone());
                        }
                        Prop::KeyValue { value, .. } => self.collect_target(value),
                        Prop::Spread(e) => self.collect_target(e),
                        Prop::Method { .. } => {}
                    }
                }
            }
            Expr::Assign { target, .. } => self.collect_target(target),
            _ => {}
        }
    }
}

impl Visitor for AssignedNames {
    fn visit_stmt(&mut self, stmt: &StmtNode) {
        if let Stmt::ForIn {
            head: ForHead::Pattern(p),
            ..
        } = &stmt.value
        {
            self.names.extend(p.bound_names());
        }
        walk_stmt(self, stmt)
    }

    fn visit_expr(&mut self, expr: &ExprNode) {
        match &expr.value {
            Expr::Assign { target, .. } => self.collect_target(target),
            Expr::Update { arg, .. } => self.collect_target(arg),
            _ => {}
        }
        walk_expr(self, expr)
    }
}

/// Names that are reassigned (`=`, compound assignment, `++`/`--`) anywhere in
/// the statements, including inside nested functions.
pub fn assigned_names(stmts: &[StmtNode]) -> HashSet<String> {
    let mut v = AssignedNames::default();
    v.visit_stmts(stmts);
    v.names
}

#[derive(Default)]
struct References {
    names: HashSet<String>,
}

impl Visitor for References {
    fn visit_ident_ref(&mut self, name: &str) {
        self.names.insert(name.to_string());
    }

    fn visit_type(&mut self, text: &str) {
        self.names.extend(identifier_words(text).map(str::to_string));
    }

    fn visit_class(&mut self, class: &ClassDecl) {
        if let Some(t) = &class.super_type_args {
            self.visit_type(t);
        }
        walk_class(self, class)
    }
}

/// Every identifier referenced in the statements, including names mentioned
/// in type annotations and verbatim declarations.
pub fn referenced_identifiers(stmts: &[StmtNode]) -> HashSet<String> {
    let mut v = References::default();
    v.visit_stmts(stmts);
    v.names
}

/// Identifier-shaped words in a piece of type text.
pub fn identifier_words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .filter(|w| {
            w.chars()
                .next()
                .map(|c| c.is_alphabetic() || c == '_' || c == '$')
                .unwrap_or(false)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parser::{parse_expression, parse_statements};

    #[test]
    fn test_free_identifiers_skip_locals_and_params() {
        let e = parse_expression("(x) => { const y = x + z; return y + w(x); }").unwrap();
        let free = free_identifiers(&e);
        assert_eq!(free.names, vec!["z".to_string(), "w".to_string()]);
        assert!(!free.uses_this);
    }

    #[test]
    fn test_this_inside_arrow_is_reported_but_not_inside_function() {
        let arrow = parse_expression("() => this.count").unwrap();
        assert!(free_identifiers(&arrow).uses_this);
        let func = parse_expression("function () { return this.count; }").unwrap();
        assert!(!free_identifiers(&func).uses_this);
    }

    #[test]
    fn test_object_shorthand_is_a_reference() {
        let e = parse_expression("({ a, b: 1 })").unwrap();
        assert_eq!(free_identifiers(&e).names, vec!["a".to_string()]);
    }

    #[test]
    fn test_assigned_names_include_updates_and_closures() {
        let stmts = parse_statements("let a = 0; let b = 1; a += 1; const f = () => { b++; };").unwrap();
        let assigned = assigned_names(&stmts);
        assert!(assigned.contains("a"));
        assert!(assigned.contains("b"));
        assert!(!assigned.contains("f"));
    }

    #[test]
    fn test_references_include_type_text() {
        let stmts = parse_statements("const x: Foo<Bar> = make();").unwrap();
        let refs = referenced_identifiers(&stmts);
        assert!(refs.contains("Foo"));
        assert!(refs.contains("Bar"));
        assert!(refs.contains("make"));
    }
}
