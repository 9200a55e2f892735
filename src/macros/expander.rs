//! The AST expansion driver.
//!
//! Walks a module outermost-first. Whenever a node has one of the macro
//! shapes it is handed to the macro, and the output is expanded again so
//! macros may produce macro calls; nesting is bounded by the configured
//! depth. A failing macro leaves its node untouched and turns the error into
//! a diagnostic, so one bad invocation never stops the rest of the file.
//!
//! Recognised shapes:
//!
//! | Shape                                  | Macro kind          |
//! |----------------------------------------|---------------------|
//! | `name(args)`                           | expression          |
//! | `@name(args)` on a class or member     | attribute           |
//! | `@derive(A, B)` on a class             | derive              |
//! | ``name`text` ``                        | tagged template     |
//! | `type T = Name<args>`                  | type                |
//! | `label: { ... }` (+ `next: { ... }`)   | labeled block       |

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::context::{scope_frame, MacroContext};
use super::definition::{
    AttributeInput, AttributeTarget, CallInput, DeriveInput, Expansion, LabeledInput, MacroBody,
    MacroDefinition, MacroKind, TemplateInput, TypeInput,
};
use super::imports::trim_unused_imports;
use super::registry::MacroRegistry;
use super::{MacroExpansionStep, MAX_MACRO_RECURSION_DEPTH};
use crate::ast::factory::is_identifier;
use crate::ast::{
    Arrow, ArrowBody, ClassDecl, ClassMember, DeclKind, Decorator, Expr, ExprNode, ForInit,
    Function, MemberKind, MemberNode, Module, Prop, PropKey, Stmt, StmtNode, TypeAlias, VarDecl,
    WithSpan,
};
use crate::cache::{compute_key, compute_structural_key, ExpansionCache};
use crate::syntax::{parse_expression_at, parse_statements_at, print_expr, print_stmts};
use crate::{Diagnostic, Span, WeaveError};

/// Decorator name that introduces derive macros.
pub const DERIVE_DECORATOR: &str = "derive";

pub struct Expander<'a> {
    registry: &'a MacroRegistry,
    cache: Option<&'a mut ExpansionCache>,
    max_depth: usize,
    depth: usize,
}

impl<'a> Expander<'a> {
    pub fn new(registry: &'a MacroRegistry) -> Self {
        Self {
            registry,
            cache: None,
            max_depth: MAX_MACRO_RECURSION_DEPTH,
            depth: 0,
        }
    }

    pub fn with_cache(mut self, cache: &'a mut ExpansionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Expands every macro in `module`, then inserts hoisted declarations
    /// after the last import and drops imports only macros used.
    pub fn expand_module(&mut self, ctx: &mut MacroContext, module: &mut Module) {
        let body = std::mem::take(&mut module.body);
        module.body = self.expand_stmts(ctx, body);

        // Hoisted bodies were taken from arguments before those were
        // expanded, and may hoist again.
        let mut hoisted = Vec::new();
        loop {
            let batch = std::mem::take(&mut ctx.state.hoisted);
            if batch.is_empty() {
                break;
            }
            hoisted.extend(self.expand_stmts(ctx, batch));
        }
        if !hoisted.is_empty() {
            let at = module
                .body
                .iter()
                .rposition(|s| matches!(s.value, Stmt::Import(_)))
                .map_or(0, |i| i + 1);
            // Positioned at the hoist site, not where they are printed.
            for stmt in &mut hoisted {
                stmt.span = Span::DUMMY;
            }
            module.body.splice(at..at, hoisted);
        }
        trim_unused_imports(module, &ctx.state.consumed);
    }

    // ========================================================================
    // INVOCATION
    // ========================================================================

    fn lookup(&self, ctx: &MacroContext, kind: MacroKind, local: &str) -> Option<Arc<MacroDefinition>> {
        match ctx.oracle().import_of(local) {
            Some(b) if b.imported != "default" && b.imported != "*" => {
                self.registry.resolve(kind, &b.imported, Some(&b.source))
            }
            Some(b) => self.registry.resolve(kind, local, Some(&b.source)),
            None => self.registry.resolve(kind, local, None),
        }
    }

    /// Calls a macro with the context pointed at `span`, recording the step
    /// on success and a diagnostic on failure.
    fn run<T: Printed>(
        &mut self,
        ctx: &mut MacroContext,
        def: &MacroDefinition,
        local: &str,
        span: Span,
        before: String,
        call: impl FnOnce(&mut MacroContext) -> Result<T, WeaveError>,
    ) -> Option<T> {
        let prev = ctx.enter_invocation(&def.name, span);
        let result = call(ctx);
        ctx.exit_invocation(prev);
        match result {
            Ok(out) => {
                self.finish(ctx, def, local, span, before, out.printed());
                Some(out)
            }
            Err(err) => {
                fail(ctx, &def.name, &err, span);
                None
            }
        }
    }

    fn finish(
        &mut self,
        ctx: &mut MacroContext,
        def: &MacroDefinition,
        local: &str,
        span: Span,
        before: String,
        after: String,
    ) {
        debug!(macro_name = %def.name, kind = %def.kind(), depth = self.depth, "expanded");
        ctx.mark_consumed(local);
        ctx.record_step(MacroExpansionStep {
            macro_name: def.name.clone(),
            kind: def.kind(),
            before,
            after,
            span,
        });
    }

    /// Counts one level of re-expansion; false once the cap is reached.
    fn enter(&mut self, ctx: &mut MacroContext, span: Span) -> bool {
        if self.depth >= self.max_depth {
            ctx.push_diagnostic(
                Diagnostic::error(
                    format!("macro expansion exceeded the maximum depth of {}", self.max_depth),
                    span,
                )
                .with_help("a macro is probably expanding to a call of itself"),
            );
            return false;
        }
        self.depth += 1;
        true
    }

    fn reexpand_expr(&mut self, ctx: &mut MacroContext, expr: &mut ExprNode) {
        if self.enter(ctx, expr.span) {
            self.expand_expr(ctx, expr);
            self.depth -= 1;
        }
    }

    fn reexpand_stmts(&mut self, ctx: &mut MacroContext, stmts: Vec<StmtNode>, span: Span) -> Vec<StmtNode> {
        if !self.enter(ctx, span) {
            return stmts;
        }
        let out = self.expand_stmts(ctx, stmts);
        self.depth -= 1;
        out
    }

    // ========================================================================
    // EXPRESSION MACROS AND TAGGED TEMPLATES
    // ========================================================================

    fn expand_call(&mut self, ctx: &mut MacroContext, expr: &ExprNode, in_statement: bool) -> Option<Expansion> {
        let Expr::Call { callee, type_args, args, .. } = &expr.value else {
            return None;
        };
        let Expr::Ident(local) = &callee.value else {
            return None;
        };
        let def = self.lookup(ctx, MacroKind::Expression, local)?;
        let MacroBody::Expression { expand, .. } = &def.body else {
            return None;
        };
        let input = CallInput {
            name: &def.name,
            args,
            type_args: type_args.as_deref(),
            span: expr.span,
            in_statement,
        };

        let key = self.call_key(ctx, &def, &input);
        if let Some(hit) = key.as_deref().and_then(|k| self.cached_expr(k, expr.span)) {
            self.finish(ctx, &def, local, expr.span, print_expr(expr), print_expr(&hit));
            return Some(Expansion::Expr(hit));
        }

        let out = self.run(ctx, &def, local, expr.span, print_expr(expr), |ctx| expand(ctx, &input))?;
        if let (Some(key), Expansion::Expr(e), Some(cache)) = (&key, &out, self.cache.as_deref_mut()) {
            cache.set(key, print_expr(e));
        }
        Some(out)
    }

    fn call_key(&self, ctx: &MacroContext, def: &MacroDefinition, input: &CallInput<'_>) -> Option<String> {
        if !def.is_cacheable() || self.cache.is_none() {
            return None;
        }
        let text = ctx.text(input.span);
        if text.is_empty() {
            return None;
        }
        let args: Vec<&str> = input.args.iter().map(|a| ctx.text(a.span)).collect();
        Some(compute_key(&def.name, text, &args))
    }

    fn cached_expr(&mut self, key: &str, span: Span) -> Option<ExprNode> {
        let text = self.cache.as_deref_mut()?.get(key)?;
        parse_expression_at(&text, span).ok()
    }

    fn expand_tagged_template(&mut self, ctx: &mut MacroContext, expr: &ExprNode) -> Option<ExprNode> {
        let Expr::TaggedTemplate { tag, template, .. } = &expr.value else {
            return None;
        };
        let Expr::Ident(local) = &tag.value else {
            return None;
        };
        let def = self.lookup(ctx, MacroKind::TaggedTemplate, local)?;
        let MacroBody::TaggedTemplate { expand } = &def.body else {
            return None;
        };
        let input = TemplateInput {
            tag: &def.name,
            template,
            span: expr.span,
        };
        self.run(ctx, &def, local, expr.span, print_expr(expr), |ctx| expand(ctx, &input))
    }

    fn expand_expr(&mut self, ctx: &mut MacroContext, expr: &mut ExprNode) {
        match self.expand_call(ctx, expr, false) {
            Some(Expansion::Expr(mut out)) => {
                self.reexpand_expr(ctx, &mut out);
                *expr = out;
                return;
            }
            Some(_) => {
                let name = callee_name(expr).unwrap_or_default();
                ctx.push_diagnostic(
                    Diagnostic::error(
                        format!("macro '{}' expanded to statements where an expression is required", name),
                        expr.span,
                    )
                    .with_macro(name),
                );
            }
            None => {}
        }
        if let Some(mut out) = self.expand_tagged_template(ctx, expr) {
            self.reexpand_expr(ctx, &mut out);
            *expr = out;
            return;
        }
        self.walk_expr(ctx, expr);
    }

    fn walk_expr(&mut self, ctx: &mut MacroContext, expr: &mut ExprNode) {
        match &mut expr.value {
            Expr::Ident(_)
            | Expr::Number(_)
            | Expr::Str(_)
            | Expr::Bool(_)
            | Expr::Null
            | Expr::This
            | Expr::Super => {}
            Expr::Template(t) => self.expand_exprs(ctx, &mut t.exprs),
            Expr::TaggedTemplate { tag, template, .. } => {
                self.expand_expr(ctx, tag);
                self.expand_exprs(ctx, &mut template.exprs);
            }
            Expr::Array(items) | Expr::Sequence(items) => self.expand_exprs(ctx, items),
            Expr::Object(props) => {
                for prop in props {
                    match prop {
                        Prop::KeyValue { key, value } => {
                            self.expand_key(ctx, key);
                            self.expand_expr(ctx, value);
                        }
                        Prop::Shorthand(_) => {}
                        Prop::Spread(e) => self.expand_expr(ctx, e),
                        Prop::Method { key, func, .. } => {
                            self.expand_key(ctx, key);
                            self.walk_function(ctx, func);
                        }
                    }
                }
            }
            Expr::Function(f) => self.walk_function(ctx, f),
            Expr::Arrow(a) => self.walk_arrow(ctx, a),
            Expr::Class(c) => self.walk_class(ctx, c),
            Expr::Unary { arg, .. }
            | Expr::Update { arg, .. }
            | Expr::Spread(arg)
            | Expr::Await(arg)
            | Expr::NonNull(arg)
            | Expr::Paren(arg)
            | Expr::TypeAssertion { expr: arg, .. } => self.expand_expr(ctx, arg),
            Expr::Binary { left, right, .. } => {
                self.expand_expr(ctx, left);
                self.expand_expr(ctx, right);
            }
            Expr::Assign { target, value, .. } => {
                self.expand_expr(ctx, target);
                self.expand_expr(ctx, value);
            }
            Expr::Conditional { test, cons, alt } => {
                self.expand_expr(ctx, test);
                self.expand_expr(ctx, cons);
                self.expand_expr(ctx, alt);
            }
            Expr::Call { callee, args, .. } => {
                self.expand_expr(ctx, callee);
                self.expand_exprs(ctx, args);
            }
            Expr::New { callee, args, .. } => {
                self.expand_expr(ctx, callee);
                if let Some(args) = args {
                    self.expand_exprs(ctx, args);
                }
            }
            Expr::Member { object, .. } => self.expand_expr(ctx, object),
            Expr::Index { object, index, .. } => {
                self.expand_expr(ctx, object);
                self.expand_expr(ctx, index);
            }
            Expr::Yield { arg, .. } => {
                if let Some(arg) = arg {
                    self.expand_expr(ctx, arg);
                }
            }
        }
    }

    fn expand_exprs(&mut self, ctx: &mut MacroContext, exprs: &mut [ExprNode]) {
        for e in exprs {
            self.expand_expr(ctx, e);
        }
    }

    fn expand_key(&mut self, ctx: &mut MacroContext, key: &mut PropKey) {
        if let PropKey::Computed(e) = key {
            self.expand_expr(ctx, e);
        }
    }

    fn walk_function(&mut self, ctx: &mut MacroContext, func: &mut Function) {
        for p in &mut func.params {
            if let Some(d) = &mut p.default {
                self.expand_expr(ctx, d);
            }
        }
        let Some(body) = func.body.take() else {
            return;
        };
        ctx.push_scope(scope_frame(&func.params, &body));
        func.body = Some(self.expand_stmts(ctx, body));
        ctx.pop_scope();
    }

    fn walk_arrow(&mut self, ctx: &mut MacroContext, arrow: &mut Arrow) {
        for p in &mut arrow.params {
            if let Some(d) = &mut p.default {
                self.expand_expr(ctx, d);
            }
        }
        match &mut arrow.body {
            ArrowBody::Expr(e) => {
                ctx.push_scope(scope_frame(&arrow.params, &[]));
                self.expand_expr(ctx, e);
                ctx.pop_scope();
            }
            ArrowBody::Block(stmts) => {
                let body = std::mem::take(stmts);
                ctx.push_scope(scope_frame(&arrow.params, &body));
                *stmts = self.expand_stmts(ctx, body);
                ctx.pop_scope();
            }
        }
    }

    // ========================================================================
    // STATEMENTS
    // ========================================================================

    fn expand_stmts(&mut self, ctx: &mut MacroContext, stmts: Vec<StmtNode>) -> Vec<StmtNode> {
        let mut out = Vec::with_capacity(stmts.len());
        let mut iter = stmts.into_iter().peekable();
        while let Some(stmt) = iter.next() {
            if let Some(def) = self.labeled_macro(&stmt) {
                let continues = iter.peek().is_some_and(|next| is_continuation(&def, next));
                let continuation = if continues { iter.next() } else { None };
                if let Some(expanded) = self.expand_labeled(ctx, &def, &stmt, continuation.as_ref()) {
                    let span = continuation.as_ref().map_or(stmt.span, |c| stmt.span.to(c.span));
                    out.extend(self.reexpand_stmts(ctx, expanded, span));
                    continue;
                }
                out.extend(self.expand_stmt(ctx, stmt));
                if let Some(c) = continuation {
                    out.extend(self.expand_stmt(ctx, c));
                }
                continue;
            }
            out.extend(self.expand_stmt(ctx, stmt));
        }
        out
    }

    fn expand_stmt(&mut self, ctx: &mut MacroContext, stmt: StmtNode) -> Vec<StmtNode> {
        let span = stmt.span;
        match stmt.value {
            Stmt::Expr(mut expr) => {
                match self.expand_call(ctx, &expr, true) {
                    Some(Expansion::Expr(mut out)) => {
                        self.reexpand_expr(ctx, &mut out);
                        return vec![WithSpan::new(Stmt::Expr(out), span)];
                    }
                    Some(Expansion::Stmts(stmts)) => return self.reexpand_stmts(ctx, stmts, span),
                    Some(Expansion::Members(_)) => {
                        let name = callee_name(&expr).unwrap_or_default();
                        ctx.push_diagnostic(
                            Diagnostic::error(
                                format!("macro '{}' expanded to class members outside a class body", name),
                                span,
                            )
                            .with_macro(name),
                        );
                    }
                    None => {}
                }
                if let Some(mut out) = self.expand_tagged_template(ctx, &expr) {
                    self.reexpand_expr(ctx, &mut out);
                    return vec![WithSpan::new(Stmt::Expr(out), span)];
                }
                self.walk_expr(ctx, &mut expr);
                vec![WithSpan::new(Stmt::Expr(expr), span)]
            }
            Stmt::Class(class) => self.expand_class_decl(ctx, class, span),
            Stmt::TypeAlias(alias) => self.expand_type_alias(ctx, alias, span),
            Stmt::Export(inner) => self
                .expand_stmt(ctx, *inner)
                .into_iter()
                .map(|s| {
                    if is_declaration(&s.value) {
                        let span = s.span;
                        WithSpan::new(Stmt::Export(Box::new(s)), span)
                    } else {
                        s
                    }
                })
                .collect(),
            value => {
                let mut node = WithSpan::new(value, span);
                self.walk_stmt(ctx, &mut node);
                vec![node]
            }
        }
    }

    fn walk_stmt(&mut self, ctx: &mut MacroContext, stmt: &mut StmtNode) {
        match &mut stmt.value {
            Stmt::Expr(e) | Stmt::Throw(e) | Stmt::ExportDefault(e) => self.expand_expr(ctx, e),
            Stmt::Return(e) => {
                if let Some(e) = e {
                    self.expand_expr(ctx, e);
                }
            }
            Stmt::Var(decl) => self.walk_var(ctx, decl),
            Stmt::Function(f) => self.walk_function(ctx, f),
            Stmt::Class(c) => self.walk_class(ctx, c),
            Stmt::Export(inner) => self.walk_stmt(ctx, inner),
            Stmt::If { test, cons, alt } => {
                self.expand_expr(ctx, test);
                self.expand_body(ctx, cons);
                if let Some(alt) = alt {
                    self.expand_body(ctx, alt);
                }
            }
            Stmt::Block(stmts) => self.expand_block(ctx, stmts),
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                match init {
                    Some(ForInit::Var(decl)) => self.walk_var(ctx, decl),
                    Some(ForInit::Expr(e)) => self.expand_expr(ctx, e),
                    None => {}
                }
                if let Some(t) = test {
                    self.expand_expr(ctx, t);
                }
                if let Some(u) = update {
                    self.expand_expr(ctx, u);
                }
                self.expand_body(ctx, body);
            }
            Stmt::ForIn { right, body, .. } => {
                self.expand_expr(ctx, right);
                self.expand_body(ctx, body);
            }
            Stmt::While { test, body } | Stmt::DoWhile { body, test } => {
                self.expand_expr(ctx, test);
                self.expand_body(ctx, body);
            }
            Stmt::Try {
                block,
                handler,
                finalizer,
                ..
            } => {
                self.expand_block(ctx, block);
                if let Some(h) = handler {
                    self.expand_block(ctx, h);
                }
                if let Some(f) = finalizer {
                    self.expand_block(ctx, f);
                }
            }
            Stmt::Switch { disc, cases } => {
                self.expand_expr(ctx, disc);
                for case in cases {
                    if let Some(t) = &mut case.test {
                        self.expand_expr(ctx, t);
                    }
                    let body = std::mem::take(&mut case.body);
                    case.body = self.expand_stmts(ctx, body);
                }
            }
            Stmt::Labeled { body, .. } => self.expand_body(ctx, body),
            Stmt::TypeAlias(_)
            | Stmt::Import(_)
            | Stmt::ExportNamed { .. }
            | Stmt::ExportAll { .. }
            | Stmt::Break(_)
            | Stmt::Continue(_)
            | Stmt::Verbatim(_)
            | Stmt::Empty => {}
        }
    }

    fn walk_var(&mut self, ctx: &mut MacroContext, decl: &mut VarDecl) {
        for d in &mut decl.decls {
            if let Some(init) = &mut d.init {
                self.expand_expr(ctx, init);
            }
        }
    }

    fn expand_block(&mut self, ctx: &mut MacroContext, stmts: &mut Vec<StmtNode>) {
        let body = std::mem::take(stmts);
        ctx.push_scope(scope_frame(&[], &body));
        *stmts = self.expand_stmts(ctx, body);
        ctx.pop_scope();
    }

    /// Expands the single statement of an `if`/loop body, wrapping a
    /// multi-statement result in a block.
    fn expand_body(&mut self, ctx: &mut MacroContext, body: &mut StmtNode) {
        let span = body.span;
        let node = std::mem::replace(body, WithSpan::new(Stmt::Empty, span));
        let mut out = self.expand_stmt(ctx, node);
        *body = if out.len() == 1 {
            out.remove(0)
        } else {
            WithSpan::new(Stmt::Block(out), span)
        };
    }

    // ========================================================================
    // LABELED BLOCKS AND TYPE MACROS
    // ========================================================================

    fn labeled_macro(&self, stmt: &StmtNode) -> Option<Arc<MacroDefinition>> {
        let (label, _) = block_label(stmt)?;
        self.registry.labeled_block(label)
    }

    fn expand_labeled(
        &mut self,
        ctx: &mut MacroContext,
        def: &MacroDefinition,
        stmt: &StmtNode,
        continuation: Option<&StmtNode>,
    ) -> Option<Vec<StmtNode>> {
        let MacroBody::LabeledBlock { expand, .. } = &def.body else {
            return None;
        };
        let (label, body) = block_label(stmt)?;
        let span = continuation.map_or(stmt.span, |c| stmt.span.to(c.span));
        let input = LabeledInput {
            label,
            body,
            continuation: continuation.and_then(block_label),
            span,
        };
        let mut shown = vec![stmt.clone()];
        shown.extend(continuation.cloned());
        self.run(ctx, def, label, span, print_stmts(&shown), |ctx| expand(ctx, &input))
    }

    fn expand_type_alias(&mut self, ctx: &mut MacroContext, alias: TypeAlias, span: Span) -> Vec<StmtNode> {
        let original = WithSpan::new(Stmt::TypeAlias(alias), span);
        let Stmt::TypeAlias(alias) = &original.value else {
            return vec![original];
        };
        let Some((local, args)) = split_type_application(&alias.ty) else {
            return vec![original];
        };
        let Some(def) = self.lookup(ctx, MacroKind::Type, &local) else {
            return vec![original];
        };
        let MacroBody::Type { expand } = &def.body else {
            return vec![original];
        };
        let input = TypeInput { alias, args, span };
        let before = print_stmts(std::slice::from_ref(&original));
        match self.run(ctx, &def, &local, span, before, |ctx| expand(ctx, &input)) {
            Some(stmts) => self.reexpand_stmts(ctx, stmts, span),
            None => vec![original],
        }
    }

    // ========================================================================
    // CLASSES: ATTRIBUTES AND DERIVES
    // ========================================================================

    fn walk_class(&mut self, ctx: &mut MacroContext, class: &mut ClassDecl) {
        if let Some(e) = &mut class.extends {
            self.expand_expr(ctx, e);
        }
        let members = std::mem::take(&mut class.members);
        class.members = members
            .into_iter()
            .flat_map(|m| self.expand_member(ctx, m))
            .collect();
    }

    fn expand_class_decl(&mut self, ctx: &mut MacroContext, mut class: ClassDecl, span: Span) -> Vec<StmtNode> {
        self.walk_class(ctx, &mut class);

        let mut derived = Vec::new();
        let mut i = 0;
        while i < class.decorators.len() {
            let decorator = class.decorators[i].clone();
            let Some(local) = decorator.callee_name() else {
                i += 1;
                continue;
            };
            if local == DERIVE_DECORATOR {
                if let Some(stmts) = self.expand_derives(ctx, &class, &decorator) {
                    ctx.mark_consumed(local);
                    class.decorators.remove(i);
                    derived.extend(stmts);
                    continue;
                }
                i += 1;
                continue;
            }
            let Some(def) = self.lookup(ctx, MacroKind::Attribute, local) else {
                i += 1;
                continue;
            };
            let MacroBody::Attribute { expand, .. } = &def.body else {
                i += 1;
                continue;
            };
            if !def.accepts(DeclKind::Class) {
                ctx.push_diagnostic(
                    Diagnostic::error(format!("macro '{}' cannot be applied to a class", def.name), decorator.span)
                        .with_macro(def.name.clone()),
                );
                i += 1;
                continue;
            }
            let mut target = class.clone();
            target.decorators.remove(i);
            let input = AttributeInput {
                decorator: &decorator,
                target: AttributeTarget::Class(&target),
                span: decorator.span,
            };
            let before = print_stmts(&[WithSpan::new(Stmt::Class(class.clone()), span)]);
            match self.run(ctx, &def, local, decorator.span, before, |ctx| expand(ctx, &input)) {
                Some(Expansion::Stmts(stmts)) => {
                    let mut out = self.reexpand_stmts(ctx, stmts, span);
                    out.extend(derived);
                    return out;
                }
                Some(Expansion::Expr(mut e)) => {
                    self.reexpand_expr(ctx, &mut e);
                    let mut out = vec![WithSpan::new(Stmt::Expr(e), span)];
                    out.extend(derived);
                    return out;
                }
                Some(Expansion::Members(_)) => {
                    ctx.push_diagnostic(
                        Diagnostic::error(
                            format!("macro '{}' produced class members for a class declaration", def.name),
                            decorator.span,
                        )
                        .with_macro(def.name.clone()),
                    );
                    i += 1;
                }
                None => i += 1,
            }
        }

        let mut out = vec![WithSpan::new(Stmt::Class(class), span)];
        out.extend(derived);
        out
    }

    /// Runs every derive named by `@derive(...)`. `None` when none of the
    /// names is a registered derive macro, leaving the decorator alone; that
    /// is only silent when `derive` itself was imported from somewhere.
    fn expand_derives(
        &mut self,
        ctx: &mut MacroContext,
        class: &ClassDecl,
        decorator: &Decorator,
    ) -> Option<Vec<StmtNode>> {
        let names: Vec<&str> = decorator
            .args()
            .iter()
            .filter_map(|a| match &a.value {
                Expr::Ident(n) | Expr::Str(n) => Some(n.as_str()),
                _ => None,
            })
            .collect();
        let defs: Vec<(&str, Option<Arc<MacroDefinition>>)> = names
            .iter()
            .map(|n| (*n, self.lookup(ctx, MacroKind::Derive, n)))
            .collect();
        let span = decorator.span;
        if defs.iter().all(|(_, d)| d.is_none()) {
            if ctx.oracle().import_of(DERIVE_DECORATOR).is_none() {
                for (local, _) in &defs {
                    ctx.push_diagnostic(Diagnostic::error(format!("unknown derive macro '{}'", local), span));
                }
            }
            return None;
        }

        let shape = ClassShape::of(class);
        let mut out = Vec::new();
        for (local, def) in defs {
            let Some(def) = def else {
                ctx.push_diagnostic(Diagnostic::error(format!("unknown derive macro '{}'", local), span));
                continue;
            };
            let MacroBody::Derive { expand } = &def.body else {
                continue;
            };
            let before = format!("@derive({})", local);
            let key = self
                .cache
                .as_ref()
                .map(|_| compute_structural_key(&def.name, &shape));
            if let Some(hit) = key.as_deref().and_then(|k| self.cached_stmts(k, span)) {
                self.finish(ctx, &def, local, span, before, print_stmts(&hit));
                out.extend(hit);
                continue;
            }
            let input = DeriveInput { class, span };
            if let Some(stmts) = self.run(ctx, &def, local, span, before, |ctx| expand(ctx, &input)) {
                if let (Some(key), Some(cache)) = (&key, self.cache.as_deref_mut()) {
                    let texts = stmts.iter().map(|s| print_stmts(std::slice::from_ref(s))).collect();
                    cache.set_many(key, texts);
                }
                out.extend(self.reexpand_stmts(ctx, stmts, span));
            }
        }
        Some(out)
    }

    fn cached_stmts(&mut self, key: &str, span: Span) -> Option<Vec<StmtNode>> {
        let texts = self.cache.as_deref_mut()?.get_many(key)?;
        let mut out = Vec::new();
        for text in texts {
            out.extend(parse_statements_at(&text, span).ok()?);
        }
        Some(out)
    }

    fn expand_member(&mut self, ctx: &mut MacroContext, mut member: MemberNode) -> Vec<MemberNode> {
        let mut i = 0;
        while i < member.value.decorators.len() {
            let decorator = member.value.decorators[i].clone();
            let Some(local) = decorator.callee_name() else {
                i += 1;
                continue;
            };
            let Some(def) = self.lookup(ctx, MacroKind::Attribute, local) else {
                i += 1;
                continue;
            };
            let MacroBody::Attribute { expand, .. } = &def.body else {
                i += 1;
                continue;
            };
            let Some(kind) = member.value.kind.decl_kind() else {
                i += 1;
                continue;
            };
            if !def.accepts(kind) {
                ctx.push_diagnostic(
                    Diagnostic::error(
                        format!("macro '{}' cannot be applied to a {}", def.name, decl_kind_name(kind)),
                        decorator.span,
                    )
                    .with_macro(def.name.clone()),
                );
                i += 1;
                continue;
            }
            let mut target: ClassMember = member.value.clone();
            target.decorators.remove(i);
            let input = AttributeInput {
                decorator: &decorator,
                target: AttributeTarget::Member(&target),
                span: decorator.span,
            };
            let before = Expansion::Members(vec![member.clone()]).printed();
            match self.run(ctx, &def, local, decorator.span, before, |ctx| expand(ctx, &input)) {
                Some(Expansion::Members(members)) => {
                    let mut out = Vec::new();
                    for m in members {
                        if self.enter(ctx, m.span) {
                            out.extend(self.expand_member(ctx, m));
                            self.depth -= 1;
                        } else {
                            out.push(m);
                        }
                    }
                    return out;
                }
                Some(_) => {
                    ctx.push_diagnostic(
                        Diagnostic::error(
                            format!("macro '{}' must expand to class members here", def.name),
                            decorator.span,
                        )
                        .with_macro(def.name.clone()),
                    );
                    i += 1;
                }
                None => i += 1,
            }
        }
        self.walk_member(ctx, &mut member.value);
        vec![member]
    }

    fn walk_member(&mut self, ctx: &mut MacroContext, member: &mut ClassMember) {
        match &mut member.kind {
            MemberKind::Constructor(f) => self.walk_function(ctx, f),
            MemberKind::Method { key, func, .. } => {
                self.expand_key(ctx, key);
                self.walk_function(ctx, func);
            }
            MemberKind::Property { key, value, .. } => {
                self.expand_key(ctx, key);
                if let Some(v) = value {
                    self.expand_expr(ctx, v);
                }
            }
            MemberKind::StaticBlock(stmts) => self.expand_block(ctx, stmts),
            MemberKind::Verbatim(_) => {}
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn fail(ctx: &mut MacroContext, name: &str, err: &WeaveError, span: Span) {
    let mut diag = Diagnostic::from_error(err, span).with_macro(name);
    if diag.span().is_dummy() {
        diag.start = span.start;
        diag.length = span.len();
    }
    debug!(macro_name = name, error = %err, "expansion failed");
    ctx.push_diagnostic(diag);
}

fn callee_name(expr: &ExprNode) -> Option<String> {
    match &expr.value {
        Expr::Call { callee, .. } => match &callee.value {
            Expr::Ident(n) => Some(n.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn block_label(stmt: &StmtNode) -> Option<(&str, &[StmtNode])> {
    match &stmt.value {
        Stmt::Labeled { label, body } => match &body.value {
            Stmt::Block(stmts) => Some((label.as_str(), stmts.as_slice())),
            _ => None,
        },
        _ => None,
    }
}

fn is_continuation(def: &MacroDefinition, next: &StmtNode) -> bool {
    block_label(next).is_some_and(|(label, _)| def.continuation_labels().iter().any(|c| c == label))
}

fn is_declaration(stmt: &Stmt) -> bool {
    matches!(
        stmt,
        Stmt::Var(_) | Stmt::Function(_) | Stmt::Class(_) | Stmt::TypeAlias(_) | Stmt::Verbatim(_)
    )
}

fn decl_kind_name(kind: DeclKind) -> &'static str {
    match kind {
        DeclKind::Class => "class",
        DeclKind::Method => "method",
        DeclKind::Property => "property",
        DeclKind::Accessor => "accessor",
    }
}

/// Splits `Name<A, B<C>>` into `Name` and its top-level arguments.
fn split_type_application(ty: &str) -> Option<(String, Vec<String>)> {
    let ty = ty.trim();
    let open = ty.find('<')?;
    let name = ty[..open].trim();
    if !is_identifier(name) || !ty.ends_with('>') {
        return None;
    }
    let inner = &ty[open + 1..ty.len() - 1];
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '<' | '(' | '[' | '{' => depth += 1,
            '>' if i > 0 && inner[..i].ends_with('=') => {}
            '>' | ')' | ']' | '}' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            ',' if depth == 0 => {
                args.push(inner[start..i].trim().to_string());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    let last = inner[start..].trim();
    if !last.is_empty() {
        args.push(last.to_string());
    }
    Some((name.to_string(), args))
}

/// Position-free description of a class, used as the derive cache key.
#[derive(Serialize)]
struct ClassShape<'a> {
    name: Option<&'a str>,
    type_params: Option<&'a str>,
    members: Vec<MemberShape<'a>>,
}

#[derive(Serialize)]
struct MemberShape<'a> {
    name: Option<&'a str>,
    kind: &'static str,
    ty: Option<&'a str>,
    optional: bool,
    modifiers: &'a [String],
}

impl<'a> ClassShape<'a> {
    fn of(class: &'a ClassDecl) -> Self {
        let mut members = Vec::new();
        for m in &class.members {
            match &m.value.kind {
                MemberKind::Property { key, optional, ty, .. } => members.push(MemberShape {
                    name: key.name(),
                    kind: "property",
                    ty: ty.as_deref(),
                    optional: *optional,
                    modifiers: &m.value.modifiers,
                }),
                MemberKind::Method { key, .. } => members.push(MemberShape {
                    name: key.name(),
                    kind: "method",
                    ty: None,
                    optional: false,
                    modifiers: &m.value.modifiers,
                }),
                MemberKind::Constructor(f) => {
                    for p in f.params.iter().filter(|p| !p.modifiers.is_empty()) {
                        members.push(MemberShape {
                            name: p.pattern.as_ident(),
                            kind: "parameter-property",
                            ty: p.ty.as_deref(),
                            optional: p.optional,
                            modifiers: &p.modifiers,
                        });
                    }
                }
                MemberKind::Verbatim(_) | MemberKind::StaticBlock(_) => {}
            }
        }
        Self {
            name: class.name.as_deref(),
            type_params: class.type_params.as_deref(),
            members,
        }
    }
}

/// Printed form of a macro result for the expansion trace.
trait Printed {
    fn printed(&self) -> String;
}

impl Printed for ExprNode {
    fn printed(&self) -> String {
        print_expr(self)
    }
}

impl Printed for Vec<StmtNode> {
    fn printed(&self) -> String {
        print_stmts(self)
    }
}

impl Printed for Expansion {
    fn printed(&self) -> String {
        match self {
            Expansion::Expr(e) => print_expr(e),
            Expansion::Stmts(s) => print_stmts(s),
            Expansion::Members(members) => {
                let holder = ClassDecl {
                    name: None,
                    decorators: Vec::new(),
                    modifiers: Vec::new(),
                    type_params: None,
                    extends: None,
                    super_type_args: None,
                    implements: None,
                    members: members.clone(),
                };
                print_stmts(&[WithSpan::new(Stmt::Class(holder), Span::DUMMY)])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SourceFile;
    use crate::macros::definition::{
        define_attribute_macro, define_derive_macro, define_expression_macro, MacroInfo,
    };
    use crate::syntax::{parse_module, print_module};

    fn expand_with(registry: &MacroRegistry, src: &str) -> (String, Vec<Diagnostic>, MacroContext) {
        let mut module = parse_module(src).unwrap();
        let mut ctx = MacroContext::new(SourceFile::new("test.ts", src), &module);
        Expander::new(registry).expand_module(&mut ctx, &mut module);
        let diags = ctx.diagnostics().to_vec();
        (print_module(&module), diags, ctx)
    }

    fn double_registry() -> MacroRegistry {
        let mut reg = MacroRegistry::new();
        reg.register(define_expression_macro(MacroInfo::new("double").module("m"), |ctx, call| {
            let f = ctx.factory();
            let arg = call.args.first().cloned().unwrap_or_else(|| f.number(0.0));
            Ok(Expansion::Expr(f.binary("*", arg, f.number(2.0))))
        }))
        .unwrap();
        reg.register(define_expression_macro("boom", |_, call| {
            Err(crate::err_ctx!(Expansion, "boom is not allowed", call.span))
        }))
        .unwrap();
        reg
    }

    #[test]
    fn test_expression_macro_and_import_trim() {
        let src = "import { double, other } from \"m\";\nconst x = double(21);\nother();";
        let (out, diags, ctx) = expand_with(&double_registry(), src);
        assert!(diags.is_empty(), "{:?}", diags);
        assert!(out.contains("const x = 21 * 2;"), "{}", out);
        assert!(out.contains("import { other } from \"m\";"), "{}", out);
        assert_eq!(ctx.state.trace.len(), 1);
        assert_eq!(ctx.state.trace[0].macro_name, "double");
    }

    #[test]
    fn test_nested_calls_expand_outer_first() {
        let (out, _, ctx) = expand_with(&double_registry(), "const y = double(double(1));");
        assert!(out.contains("1 * 2 * 2"), "{}", out);
        assert_eq!(ctx.state.trace.len(), 2);
        assert!(ctx.state.trace[0].before.contains("double(double(1))"));
    }

    #[test]
    fn test_failing_macro_keeps_node_and_reports() {
        let (out, diags, _) = expand_with(&double_registry(), "const z = boom(1);\nconst w = double(2);");
        assert!(out.contains("boom(1)"), "{}", out);
        assert!(out.contains("2 * 2"), "{}", out);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].macro_name.as_deref(), Some("boom"));
        assert_eq!(diags[0].start, 10);
    }

    #[test]
    fn test_depth_cap_stops_self_expansion() {
        let mut reg = MacroRegistry::new();
        reg.register(define_expression_macro("again", |ctx, call| {
            let f = ctx.factory();
            Ok(Expansion::Expr(f.call(f.ident("again"), call.args.to_vec())))
        }))
        .unwrap();
        let mut module = parse_module("again(1);").unwrap();
        let mut ctx = MacroContext::new(SourceFile::new("t.ts", "again(1);"), &module);
        Expander::new(&reg).with_max_depth(4).expand_module(&mut ctx, &mut module);
        assert!(ctx.diagnostics().iter().any(|d| d.message.contains("maximum depth of 4")));
    }

    #[test]
    fn test_attribute_target_checked() {
        let mut reg = MacroRegistry::new();
        reg.register(define_attribute_macro("onlyMethods", &[DeclKind::Method], |ctx, input| {
            match input.target {
                AttributeTarget::Member(m) => Ok(Expansion::Members(vec![WithSpan::new(m.clone(), ctx.span())])),
                AttributeTarget::Class(_) => unreachable!(),
            }
        }))
        .unwrap();
        let src = "@onlyMethods\nclass A {\n  @onlyMethods\n  run() {}\n}";
        let (out, diags, _) = expand_with(&reg, src);
        assert_eq!(diags.len(), 1, "{:?}", diags);
        assert!(diags[0].message.contains("cannot be applied to a class"));
        assert!(out.starts_with("@onlyMethods\nclass A"), "{}", out);
        assert_eq!(out.matches("@onlyMethods").count(), 1, "{}", out);
    }

    #[test]
    fn test_derive_output_follows_class_and_export() {
        let mut reg = MacroRegistry::new();
        reg.register(define_derive_macro("Named", |ctx, input| {
            let f = ctx.factory();
            let name = input.class.name.clone().unwrap_or_default();
            Ok(vec![f.const_decl(&format!("{}Name", name), f.string(name))])
        }))
        .unwrap();
        let (out, diags, _) = expand_with(&reg, "@derive(Named, Missing)\nexport class P {}");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("Missing"));
        assert!(out.contains("export class P {}\nexport const PName = \"P\";"), "{}", out);
    }

    #[test]
    fn test_derive_cached_by_shape() {
        let mut reg = MacroRegistry::new();
        reg.register(define_derive_macro("Named", |ctx, _| {
            let f = ctx.factory();
            Ok(vec![f.const_decl("generated", f.number(1.0))])
        }))
        .unwrap();
        let mut cache = ExpansionCache::in_memory();
        for src in ["@derive(Named)\nclass P { x: number; }", "\n\n@derive(Named)\nclass P { x: number; }"] {
            let mut module = parse_module(src).unwrap();
            let mut ctx = MacroContext::new(SourceFile::new("t.ts", src), &module);
            Expander::new(&reg).with_cache(&mut cache).expand_module(&mut ctx, &mut module);
            assert!(print_module(&module).contains("const generated = 1;"));
        }
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_hoisted_declarations_follow_imports() {
        let mut reg = MacroRegistry::new();
        reg.register(define_expression_macro("lift", |ctx, _| {
            let f = ctx.factory();
            let name = ctx.fresh_name("lifted");
            ctx.hoist(f.const_decl(&name, f.number(1.0)));
            Ok(Expansion::Expr(f.ident(name)))
        }))
        .unwrap();
        let (out, _, _) = expand_with(&reg, "import \"side\";\nfunction f() { return lift(); }");
        assert!(out.starts_with("import \"side\";\nconst lifted = 1;\nfunction f()"), "{}", out);
    }

    #[test]
    fn test_type_application_split() {
        assert_eq!(
            split_type_application("Pick<A, B<C, D>>"),
            Some(("Pick".to_string(), vec!["A".to_string(), "B<C, D>".to_string()]))
        );
        assert_eq!(
            split_type_application("Fn<(x: A) => B, C>").map(|(_, a)| a.len()),
            Some(2)
        );
        assert!(split_type_application("A | B<C>").is_none());
    }
}
