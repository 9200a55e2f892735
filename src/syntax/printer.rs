//! Printer for the host AST.
//!
//! Emits two-space indented code with explicit semicolons and inserts
//! parentheses from a precedence table, so trees built by macros print
//! correctly without carrying `Paren` nodes. Every node with a real span
//! records a mapping from its generated position back to the parsed text.
//! Given the parsed text, comments before a statement and on the line it ends
//! are printed with it; comments inside expressions are dropped.

use crate::ast::{
    Arrow, ArrowBody, ClassDecl, Expr, ExprNode, ForHead, ForInit, Function, ImportDecl,
    MemberKind, MethodKind, Module, Param, Pattern, Prop, PropKey, Stmt, StmtNode, Template,
    VarDecl,
};
use crate::Span;

use super::lexer::comments;
use super::token::Token;

/// A generated position and the byte offset it was printed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub generated_line: u32,
    pub generated_column: u32,
    pub source_offset: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PrintOutput {
    pub code: String,
    pub mappings: Vec<Mapping>,
}

pub fn print_module(module: &Module) -> String {
    print_module_with_mappings(module).code
}

pub fn print_module_with_mappings(module: &Module) -> PrintOutput {
    print_module_with_comments(module, "")
}

/// Prints `module`, carrying over the comments of `source`, the text it was
/// parsed from.
pub fn print_module_with_comments(module: &Module, source: &str) -> PrintOutput {
    let mut p = Printer {
        source,
        comments: comments(source),
        ..Printer::default()
    };
    p.stmt_list(&module.body);
    p.remaining_comments();
    if !p.out.is_empty() {
        p.write("\n");
    }
    PrintOutput {
        code: p.out,
        mappings: p.mappings,
    }
}

pub fn print_stmts(stmts: &[StmtNode]) -> String {
    let mut p = Printer::default();
    p.stmt_list(stmts);
    p.out
}

pub fn print_expr(expr: &ExprNode) -> String {
    let mut p = Printer::default();
    p.expr(expr, 0);
    p.out
}

// ============================================================================
// PRECEDENCE
// ============================================================================

const PREC_SEQUENCE: u8 = 1;
const PREC_ASSIGN: u8 = 2;
const PREC_CONDITIONAL: u8 = 3;
const PREC_RELATIONAL: u8 = 10;
const PREC_UNARY: u8 = 15;
const PREC_UPDATE: u8 = 16;
const PREC_CALL: u8 = 18;
const PREC_PRIMARY: u8 = 20;

fn binary_prec(op: &str) -> u8 {
    match op {
        "??" | "||" => 4,
        "&&" => 5,
        "|" => 6,
        "^" => 7,
        "&" => 8,
        "==" | "!=" | "===" | "!==" => 9,
        "<" | ">" | "<=" | ">=" | "instanceof" | "in" => PREC_RELATIONAL,
        "<<" | ">>" | ">>>" => 11,
        "+" | "-" => 12,
        "*" | "/" | "%" => 13,
        "**" => 14,
        _ => PREC_RELATIONAL,
    }
}

fn expr_prec(expr: &Expr) -> u8 {
    match expr {
        Expr::Sequence(_) => PREC_SEQUENCE,
        Expr::Assign { .. } | Expr::Arrow(_) | Expr::Yield { .. } | Expr::Spread(_) => PREC_ASSIGN,
        Expr::Conditional { .. } => PREC_CONDITIONAL,
        Expr::Binary { op, .. } => binary_prec(op),
        Expr::TypeAssertion { .. } => PREC_RELATIONAL,
        Expr::Unary { .. } | Expr::Await(_) => PREC_UNARY,
        Expr::Update { prefix: true, .. } => PREC_UNARY,
        Expr::Update { .. } => PREC_UPDATE,
        Expr::Call { .. }
        | Expr::New { .. }
        | Expr::Member { .. }
        | Expr::Index { .. }
        | Expr::TaggedTemplate { .. }
        | Expr::NonNull(_) => PREC_CALL,
        _ => PREC_PRIMARY,
    }
}

/// `??` cannot be mixed with `||`/`&&` without parentheses.
fn mixes_nullish(parent: &str, child: &Expr) -> bool {
    match child {
        Expr::Binary { op, .. } => {
            (parent == "??" && (op == "||" || op == "&&"))
                || ((parent == "||" || parent == "&&") && op == "??")
        }
        _ => false,
    }
}

/// True when printing `expr` first in a statement would start with `{`,
/// `function` or `class`.
fn starts_ambiguously(expr: &Expr) -> bool {
    match expr {
        Expr::Object(_) | Expr::Function(_) | Expr::Class(_) => true,
        Expr::Binary { left, .. } => starts_ambiguously(&left.value),
        Expr::Assign { target, .. } => starts_ambiguously(&target.value),
        Expr::Conditional { test, .. } => starts_ambiguously(&test.value),
        Expr::Call { callee, .. } => starts_ambiguously(&callee.value),
        Expr::TaggedTemplate { tag, .. } => starts_ambiguously(&tag.value),
        Expr::Member { object, .. } | Expr::Index { object, .. } => {
            starts_ambiguously(&object.value)
        }
        Expr::NonNull(e) | Expr::TypeAssertion { expr: e, .. } => starts_ambiguously(&e.value),
        Expr::Update {
            prefix: false, arg, ..
        } => starts_ambiguously(&arg.value),
        Expr::Sequence(items) => items.first().is_some_and(|e| starts_ambiguously(&e.value)),
        _ => false,
    }
}

fn has_call(expr: &Expr) -> bool {
    match expr {
        Expr::Call { .. } => true,
        Expr::Member { object, .. } | Expr::Index { object, .. } => has_call(&object.value),
        _ => false,
    }
}

/// Quotes a string with double quotes, escaping as needed.
pub fn quote_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// ============================================================================
// PRINTER
// ============================================================================

#[derive(Default)]
struct Printer<'a> {
    source: &'a str,
    comments: Vec<Token>,
    next_comment: usize,
    out: String,
    indent: usize,
    line: u32,
    column: u32,
    mappings: Vec<Mapping>,
}

impl Printer<'_> {
    fn write(&mut self, text: &str) {
        for (i, piece) in text.split('\n').enumerate() {
            if i > 0 {
                self.line += 1;
                self.column = 0;
            }
            self.column += piece.len() as u32;
        }
        self.out.push_str(text);
    }

    fn newline(&mut self) {
        self.out.push('\n');
        self.line += 1;
        let pad = "  ".repeat(self.indent);
        self.column = pad.len() as u32;
        self.out.push_str(&pad);
    }

    fn mark(&mut self, span: Span) {
        if span.is_dummy() {
            return;
        }
        let mapping = Mapping {
            generated_line: self.line,
            generated_column: self.column,
            source_offset: span.start,
        };
        if self.mappings.last() != Some(&mapping) {
            self.mappings.push(mapping);
        }
    }

    fn comma_list<T>(&mut self, items: &[T], mut each: impl FnMut(&mut Self, &T)) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            each(self, item);
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn stmt_list(&mut self, stmts: &[StmtNode]) {
        for (i, s) in stmts.iter().enumerate() {
            if i > 0 {
                self.newline();
            }
            self.list_item(s);
        }
    }

    fn list_item(&mut self, node: &StmtNode) {
        self.leading_comments(node.span);
        self.stmt(node);
        self.trailing_comment(node.span);
    }

    /// Comments that end before `span`, each on its own line.
    fn leading_comments(&mut self, span: Span) {
        if span.is_dummy() {
            return;
        }
        while let Some(c) = self.comments.get(self.next_comment) {
            if c.end > span.start {
                break;
            }
            let text = c.text.clone();
            self.next_comment += 1;
            self.write(&text);
            self.newline();
        }
    }

    /// Skips comments inside `span`, then prints one that follows it on the
    /// same source line.
    fn trailing_comment(&mut self, span: Span) {
        if span.is_dummy() {
            return;
        }
        while self.comments.get(self.next_comment).is_some_and(|c| c.start < span.end) {
            self.next_comment += 1;
        }
        let Some(c) = self.comments.get(self.next_comment) else {
            return;
        };
        let same_line = self
            .source
            .get(span.end..c.start)
            .is_some_and(|gap| gap.trim().is_empty() && !gap.contains('\n'));
        if same_line {
            let text = format!(" {}", c.text);
            self.next_comment += 1;
            self.write(&text);
        }
    }

    /// Comments after the last statement.
    fn remaining_comments(&mut self) {
        while let Some(c) = self.comments.get(self.next_comment) {
            let text = c.text.clone();
            self.next_comment += 1;
            if !self.out.is_empty() {
                self.newline();
            }
            self.write(&text);
        }
    }

    fn block(&mut self, stmts: &[StmtNode]) {
        if stmts.is_empty() {
            self.write("{}");
            return;
        }
        self.write("{");
        self.indent += 1;
        for s in stmts {
            self.newline();
            self.list_item(s);
        }
        self.indent -= 1;
        self.newline();
        self.write("}");
    }

    /// Body of `if`/loops: blocks inline, other statements after a space.
    fn body(&mut self, stmt: &StmtNode) {
        self.write(" ");
        self.stmt(stmt);
    }

    fn stmt(&mut self, node: &StmtNode) {
        self.mark(node.span);
        match &node.value {
            Stmt::Expr(e) => {
                if starts_ambiguously(&e.value) {
                    self.write("(");
                    self.expr(e, 0);
                    self.write(")");
                } else {
                    self.expr(e, 0);
                }
                self.write(";");
            }
            Stmt::Var(decl) => {
                self.var_decl(decl);
                self.write(";");
            }
            Stmt::Function(f) => self.function(f),
            Stmt::Class(c) => self.class(c),
            Stmt::TypeAlias(t) => {
                if t.declare {
                    self.write("declare ");
                }
                self.write("type ");
                self.write(&t.name);
                if let Some(tp) = &t.type_params {
                    self.write(tp);
                }
                self.write(" = ");
                self.write(&t.ty);
                self.write(";");
            }
            Stmt::Import(i) => self.import(i),
            Stmt::Export(inner) => {
                self.write("export ");
                self.stmt(inner);
            }
            Stmt::ExportDefault(e) => {
                self.write("export default ");
                match &e.value {
                    Expr::Function(f) => {
                        self.mark(e.span);
                        self.function(f);
                    }
                    Expr::Class(c) => {
                        self.mark(e.span);
                        self.class(c);
                    }
                    _ => {
                        self.expr(e, PREC_ASSIGN);
                        self.write(";");
                    }
                }
            }
            Stmt::ExportNamed {
                specifiers,
                source,
                type_only,
            } => {
                self.write(if *type_only { "export type " } else { "export " });
                if specifiers.is_empty() {
                    self.write("{}");
                } else {
                    self.write("{ ");
                    self.comma_list(specifiers, |p, s| {
                        p.write(&s.local);
                        if s.exported != s.local {
                            p.write(" as ");
                            p.write(&s.exported);
                        }
                    });
                    self.write(" }");
                }
                if let Some(src) = source {
                    self.write(" from ");
                    self.write(&quote_string(src));
                }
                self.write(";");
            }
            Stmt::ExportAll { alias, source } => {
                self.write("export *");
                if let Some(a) = alias {
                    self.write(" as ");
                    self.write(a);
                }
                self.write(" from ");
                self.write(&quote_string(source));
                self.write(";");
            }
            Stmt::Return(value) => {
                self.write("return");
                if let Some(v) = value {
                    self.write(" ");
                    self.expr(v, 0);
                }
                self.write(";");
            }
            Stmt::If { test, cons, alt } => {
                self.write("if (");
                self.expr(test, 0);
                self.write(")");
                self.body(cons);
                if let Some(alt) = alt {
                    self.write(" else");
                    self.body(alt);
                }
            }
            Stmt::Block(stmts) => self.block(stmts),
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                self.write("for (");
                match init {
                    Some(ForInit::Var(d)) => self.var_decl(d),
                    Some(ForInit::Expr(e)) => self.expr(e, 0),
                    None => {}
                }
                self.write(";");
                if let Some(t) = test {
                    self.write(" ");
                    self.expr(t, 0);
                }
                self.write(";");
                if let Some(u) = update {
                    self.write(" ");
                    self.expr(u, 0);
                }
                self.write(")");
                self.body(body);
            }
            Stmt::ForIn {
                head,
                right,
                body,
                of,
                is_await,
            } => {
                self.write(if *is_await { "for await (" } else { "for (" });
                match head {
                    ForHead::Var(kind, pat) => {
                        self.write(kind.as_str());
                        self.write(" ");
                        self.pattern(pat);
                    }
                    ForHead::Pattern(pat) => self.pattern(pat),
                }
                self.write(if *of { " of " } else { " in " });
                self.expr(right, PREC_ASSIGN);
                self.write(")");
                self.body(body);
            }
            Stmt::While { test, body } => {
                self.write("while (");
                self.expr(test, 0);
                self.write(")");
                self.body(body);
            }
            Stmt::DoWhile { body, test } => {
                self.write("do");
                self.body(body);
                self.write(" while (");
                self.expr(test, 0);
                self.write(");");
            }
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                self.write("try ");
                self.block(block);
                if let Some(h) = handler {
                    self.write(" catch ");
                    if let Some(p) = param {
                        self.write("(");
                        self.pattern(p);
                        self.write(") ");
                    }
                    self.block(h);
                }
                if let Some(f) = finalizer {
                    self.write(" finally ");
                    self.block(f);
                }
            }
            Stmt::Throw(e) => {
                self.write("throw ");
                self.expr(e, 0);
                self.write(";");
            }
            Stmt::Break(label) | Stmt::Continue(label) => {
                self.write(if matches!(node.value, Stmt::Break(_)) {
                    "break"
                } else {
                    "continue"
                });
                if let Some(l) = label {
                    self.write(" ");
                    self.write(l);
                }
                self.write(";");
            }
            Stmt::Switch { disc, cases } => {
                self.write("switch (");
                self.expr(disc, 0);
                self.write(") {");
                self.indent += 1;
                for case in cases {
                    self.newline();
                    match &case.test {
                        Some(t) => {
                            self.write("case ");
                            self.expr(t, 0);
                            self.write(":");
                        }
                        None => self.write("default:"),
                    }
                    self.indent += 1;
                    for s in &case.body {
                        self.newline();
                        self.stmt(s);
                    }
                    self.indent -= 1;
                }
                self.indent -= 1;
                self.newline();
                self.write("}");
            }
            Stmt::Labeled { label, body } => {
                self.write(label);
                self.write(":");
                self.body(body);
            }
            Stmt::Verbatim(text) => self.write(text),
            Stmt::Empty => self.write(";"),
        }
    }

    fn var_decl(&mut self, decl: &VarDecl) {
        if decl.declare {
            self.write("declare ");
        }
        self.write(decl.kind.as_str());
        self.write(" ");
        self.comma_list(&decl.decls, |p, d| {
            p.pattern(&d.pattern);
            if d.definite {
                p.write("!");
            }
            if let Some(ty) = &d.ty {
                p.write(": ");
                p.write(ty);
            }
            if let Some(init) = &d.init {
                p.write(" = ");
                p.expr(init, PREC_ASSIGN);
            }
        });
    }

    fn import(&mut self, import: &ImportDecl) {
        self.write("import ");
        if import.is_side_effect_only() {
            self.write(&quote_string(&import.source));
            self.write(";");
            return;
        }
        if import.type_only {
            self.write("type ");
        }
        let mut wrote = false;
        if let Some(d) = &import.default {
            self.write(d);
            wrote = true;
        }
        if let Some(ns) = &import.namespace {
            if wrote {
                self.write(", ");
            }
            self.write("* as ");
            self.write(ns);
            wrote = true;
        }
        if !import.named.is_empty() || !wrote {
            if wrote {
                self.write(", ");
            }
            if import.named.is_empty() {
                self.write("{}");
            } else {
                self.write("{ ");
                self.comma_list(&import.named, |p, s| {
                    if s.type_only {
                        p.write("type ");
                    }
                    p.write(&s.imported);
                    if s.local != s.imported {
                        p.write(" as ");
                        p.write(&s.local);
                    }
                });
                self.write(" }");
            }
        }
        self.write(" from ");
        self.write(&quote_string(&import.source));
        self.write(";");
    }

    // ------------------------------------------------------------------
    // Functions and classes
    // ------------------------------------------------------------------

    fn function(&mut self, f: &Function) {
        if f.is_async {
            self.write("async ");
        }
        self.write("function");
        if f.is_generator {
            self.write("*");
        }
        self.write(" ");
        if let Some(name) = &f.name {
            self.write(name);
        }
        self.function_tail(f);
    }

    /// Type parameters, parameters, return type and body.
    fn function_tail(&mut self, f: &Function) {
        if let Some(tp) = &f.type_params {
            self.write(tp);
        }
        self.params(&f.params);
        if let Some(rt) = &f.return_type {
            self.write(": ");
            self.write(rt);
        }
        match &f.body {
            Some(body) => {
                self.write(" ");
                self.block(body);
            }
            None => self.write(";"),
        }
    }

    fn params(&mut self, params: &[Param]) {
        self.write("(");
        self.comma_list(params, |p, param| p.param(param));
        self.write(")");
    }

    fn param(&mut self, param: &Param) {
        for d in &param.decorators {
            self.write("@");
            self.expr(&d.expr, PREC_CALL);
            self.write(" ");
        }
        for m in &param.modifiers {
            self.write(m);
            self.write(" ");
        }
        if param.rest {
            self.write("...");
        }
        self.pattern(&param.pattern);
        if param.optional {
            self.write("?");
        }
        if let Some(ty) = &param.ty {
            self.write(": ");
            self.write(ty);
        }
        if let Some(d) = &param.default {
            self.write(" = ");
            self.expr(d, PREC_ASSIGN);
        }
    }

    fn pattern(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::Ident(n) => self.write(n),
            Pattern::Object { props, rest } => {
                if props.is_empty() && rest.is_none() {
                    self.write("{}");
                    return;
                }
                self.write("{ ");
                self.comma_list(props, |p, prop| {
                    let simple_shorthand = prop.shorthand
                        && matches!((&prop.key, &prop.value), (PropKey::Ident(k), Pattern::Ident(v)) if k == v);
                    if simple_shorthand {
                        p.pattern(&prop.value);
                    } else {
                        p.prop_key(&prop.key);
                        p.write(": ");
                        p.pattern(&prop.value);
                    }
                    if let Some(d) = &prop.default {
                        p.write(" = ");
                        p.expr(d, PREC_ASSIGN);
                    }
                });
                if let Some(r) = rest {
                    if !props.is_empty() {
                        self.write(", ");
                    }
                    self.write("...");
                    self.pattern(r);
                }
                self.write(" }");
            }
            Pattern::Array { elems, rest } => {
                self.write("[");
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    if let Some(e) = e {
                        self.pattern(&e.pattern);
                        if let Some(d) = &e.default {
                            self.write(" = ");
                            self.expr(d, PREC_ASSIGN);
                        }
                    } else if i + 1 == elems.len() && rest.is_none() {
                        self.write(",");
                    }
                }
                if let Some(r) = rest {
                    if !elems.is_empty() {
                        self.write(", ");
                    }
                    self.write("...");
                    self.pattern(r);
                }
                self.write("]");
            }
            Pattern::Expr(e) => self.expr(e, PREC_CALL),
        }
    }

    fn prop_key(&mut self, key: &PropKey) {
        match key {
            PropKey::Ident(n) | PropKey::Number(n) => self.write(n),
            PropKey::Str(s) => self.write(&quote_string(s)),
            PropKey::Private(n) => {
                self.write("#");
                self.write(n);
            }
            PropKey::Computed(e) => {
                self.write("[");
                self.expr(e, PREC_ASSIGN);
                self.write("]");
            }
        }
    }

    fn method_head(&mut self, kind: MethodKind, f: &Function) {
        match kind {
            MethodKind::Get => self.write("get "),
            MethodKind::Set => self.write("set "),
            MethodKind::Method => {}
        }
        if f.is_async {
            self.write("async ");
        }
        if f.is_generator {
            self.write("*");
        }
    }

    fn class(&mut self, c: &ClassDecl) {
        for d in &c.decorators {
            self.write("@");
            self.expr(&d.expr, PREC_CALL);
            self.newline();
        }
        for m in &c.modifiers {
            self.write(m);
            self.write(" ");
        }
        self.write("class");
        if let Some(name) = &c.name {
            self.write(" ");
            self.write(name);
        }
        if let Some(tp) = &c.type_params {
            self.write(tp);
        }
        if let Some(ext) = &c.extends {
            self.write(" extends ");
            self.expr(ext, PREC_CALL);
            if let Some(args) = &c.super_type_args {
                self.write(args);
            }
        }
        if let Some(imp) = &c.implements {
            self.write(" implements ");
            self.write(imp);
        }
        if c.members.is_empty() {
            self.write(" {}");
            return;
        }
        self.write(" {");
        self.indent += 1;
        for member in &c.members {
            self.newline();
            self.mark(member.span);
            let m = &member.value;
            for d in &m.decorators {
                self.write("@");
                self.expr(&d.expr, PREC_CALL);
                self.write(" ");
            }
            for modifier in &m.modifiers {
                self.write(modifier);
                self.write(" ");
            }
            match &m.kind {
                MemberKind::Constructor(f) => {
                    self.write("constructor");
                    self.function_tail(f);
                }
                MemberKind::Method {
                    key,
                    kind,
                    optional,
                    func,
                } => {
                    self.method_head(*kind, func);
                    self.prop_key(key);
                    if *optional {
                        self.write("?");
                    }
                    self.function_tail(func);
                }
                MemberKind::Property {
                    key,
                    optional,
                    definite,
                    ty,
                    value,
                } => {
                    self.prop_key(key);
                    if *optional {
                        self.write("?");
                    }
                    if *definite {
                        self.write("!");
                    }
                    if let Some(ty) = ty {
                        self.write(": ");
                        self.write(ty);
                    }
                    if let Some(v) = value {
                        self.write(" = ");
                        self.expr(v, PREC_ASSIGN);
                    }
                    self.write(";");
                }
                MemberKind::Verbatim(text) => {
                    self.write(text);
                    if !text.trim_end().ends_with(';') {
                        self.write(";");
                    }
                }
                MemberKind::StaticBlock(body) => {
                    self.write("static ");
                    self.block(body);
                }
            }
        }
        self.indent -= 1;
        self.newline();
        self.write("}");
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expr(&mut self, node: &ExprNode, min_prec: u8) {
        let needs_parens = expr_prec(&node.value) < min_prec;
        if needs_parens {
            self.write("(");
        }
        self.mark(node.span);
        self.expr_inner(node);
        if needs_parens {
            self.write(")");
        }
    }

    fn expr_inner(&mut self, node: &ExprNode) {
        match &node.value {
            Expr::Ident(n) => self.write(n),
            Expr::Number(n) => self.write(n),
            Expr::Str(s) => self.write(&quote_string(s)),
            Expr::Bool(b) => self.write(if *b { "true" } else { "false" }),
            Expr::Null => self.write("null"),
            Expr::This => self.write("this"),
            Expr::Super => self.write("super"),
            Expr::Template(t) => self.template(t),
            Expr::TaggedTemplate {
                tag,
                type_args,
                template,
            } => {
                self.expr(tag, PREC_CALL);
                if let Some(ta) = type_args {
                    self.write(ta);
                }
                self.template(template);
            }
            Expr::Array(items) => {
                self.write("[");
                self.comma_list(items, |p, e| p.expr(e, PREC_ASSIGN));
                self.write("]");
            }
            Expr::Object(props) => self.object(props),
            Expr::Function(f) => self.function(f),
            Expr::Arrow(a) => self.arrow(a),
            Expr::Class(c) => self.class(c),
            Expr::Unary { op, arg } => {
                self.write(op);
                let word = op.chars().all(|c| c.is_ascii_alphabetic());
                let clash = match &arg.value {
                    Expr::Unary { op: inner, .. } | Expr::Update { op: inner, prefix: true, .. } => {
                        inner.starts_with(op.as_str())
                    }
                    _ => false,
                };
                if word || clash {
                    self.write(" ");
                }
                self.expr(arg, PREC_UNARY);
            }
            Expr::Update { op, prefix, arg } => {
                if *prefix {
                    self.write(op);
                    self.expr(arg, PREC_UNARY);
                } else {
                    self.expr(arg, PREC_CALL);
                    self.write(op);
                }
            }
            Expr::Binary { op, left, right } => {
                let prec = binary_prec(op);
                let (lp, rp) = if op == "**" {
                    (prec + 1, prec)
                } else {
                    (prec, prec + 1)
                };
                if mixes_nullish(op, &left.value) {
                    self.write("(");
                    self.expr(left, 0);
                    self.write(")");
                } else {
                    self.expr(left, lp);
                }
                self.write(" ");
                self.write(op);
                self.write(" ");
                if mixes_nullish(op, &right.value) {
                    self.write("(");
                    self.expr(right, 0);
                    self.write(")");
                } else {
                    self.expr(right, rp);
                }
            }
            Expr::Assign { op, target, value } => {
                if matches!(target.value, Expr::Object(_)) {
                    self.write("(");
                }
                self.expr(target, PREC_CONDITIONAL + 1);
                self.write(" ");
                self.write(op);
                self.write(" ");
                self.expr(value, PREC_ASSIGN);
                if matches!(target.value, Expr::Object(_)) {
                    self.write(")");
                }
            }
            Expr::Conditional { test, cons, alt } => {
                self.expr(test, PREC_CONDITIONAL + 1);
                self.write(" ? ");
                self.expr(cons, PREC_ASSIGN);
                self.write(" : ");
                self.expr(alt, PREC_ASSIGN);
            }
            Expr::Call {
                callee,
                type_args,
                args,
                optional,
            } => {
                if matches!(callee.value, Expr::Function(_) | Expr::Class(_)) {
                    self.write("(");
                    self.expr(callee, 0);
                    self.write(")");
                } else {
                    self.expr(callee, PREC_CALL);
                }
                if *optional {
                    self.write("?.");
                }
                if let Some(ta) = type_args {
                    self.write(ta);
                }
                self.args(args);
            }
            Expr::New {
                callee,
                type_args,
                args,
            } => {
                self.write("new ");
                if has_call(&callee.value) {
                    self.write("(");
                    self.expr(callee, 0);
                    self.write(")");
                } else {
                    self.expr(callee, PREC_CALL);
                }
                if let Some(ta) = type_args {
                    self.write(ta);
                }
                match args {
                    Some(args) => self.args(args),
                    None => self.write("()"),
                }
            }
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let bare_integer = matches!(&object.value, Expr::Number(n)
                    if n.chars().all(|c| c.is_ascii_digit()));
                if bare_integer {
                    self.write("(");
                    self.expr(object, 0);
                    self.write(")");
                } else {
                    self.expr(object, PREC_CALL);
                }
                self.write(if *optional { "?." } else { "." });
                self.write(property);
            }
            Expr::Index {
                object,
                index,
                optional,
            } => {
                self.expr(object, PREC_CALL);
                self.write(if *optional { "?.[" } else { "[" });
                self.expr(index, 0);
                self.write("]");
            }
            Expr::Spread(e) => {
                self.write("...");
                self.expr(e, PREC_ASSIGN);
            }
            Expr::Await(e) => {
                self.write("await ");
                self.expr(e, PREC_UNARY);
            }
            Expr::Yield { arg, delegate } => {
                self.write("yield");
                if *delegate {
                    self.write("*");
                }
                if let Some(a) = arg {
                    self.write(" ");
                    self.expr(a, PREC_ASSIGN);
                }
            }
            Expr::TypeAssertion { expr, keyword, ty } => {
                self.expr(expr, PREC_RELATIONAL);
                self.write(" ");
                self.write(keyword);
                self.write(" ");
                self.write(ty);
            }
            Expr::NonNull(e) => {
                self.expr(e, PREC_CALL);
                self.write("!");
            }
            Expr::Sequence(items) => {
                self.comma_list(items, |p, e| p.expr(e, PREC_ASSIGN));
            }
            Expr::Paren(inner) => {
                self.write("(");
                self.expr(inner, 0);
                self.write(")");
            }
        }
    }

    fn args(&mut self, args: &[ExprNode]) {
        self.write("(");
        self.comma_list(args, |p, e| p.expr(e, PREC_ASSIGN));
        self.write(")");
    }

    fn template(&mut self, t: &Template) {
        self.write("`");
        for (i, quasi) in t.quasis.iter().enumerate() {
            self.write(quasi);
            if let Some(e) = t.exprs.get(i) {
                self.write("${");
                self.expr(e, 0);
                self.write("}");
            }
        }
        self.write("`");
    }

    fn object(&mut self, props: &[Prop]) {
        if props.is_empty() {
            self.write("{}");
            return;
        }
        self.write("{ ");
        self.comma_list(props, |p, prop| match prop {
            Prop::KeyValue { key, value } => {
                p.prop_key(key);
                p.write(": ");
                p.expr(value, PREC_ASSIGN);
            }
            Prop::Shorthand(name) => p.write(name),
            Prop::Spread(e) => {
                p.write("...");
                p.expr(e, PREC_ASSIGN);
            }
            Prop::Method { key, kind, func } => {
                p.method_head(*kind, func);
                p.prop_key(key);
                p.function_tail(func);
            }
        });
        self.write(" }");
    }

    fn arrow(&mut self, a: &Arrow) {
        if a.is_async {
            self.write("async ");
        }
        let bare = a.type_params.is_none()
            && a.return_type.is_none()
            && a.params.len() == 1
            && matches!(a.params[0].pattern, Pattern::Ident(_))
            && a.params[0].ty.is_none()
            && a.params[0].default.is_none()
            && !a.params[0].rest
            && !a.params[0].optional
            && a.params[0].modifiers.is_empty();
        if let Some(tp) = &a.type_params {
            self.write(tp);
        }
        if bare {
            self.pattern(&a.params[0].pattern);
        } else {
            self.params(&a.params);
        }
        if let Some(rt) = &a.return_type {
            self.write(": ");
            self.write(rt);
        }
        self.write(" => ");
        match &a.body {
            ArrowBody::Block(stmts) => self.block(stmts),
            ArrowBody::Expr(e) => {
                if starts_with_object(&e.value) {
                    self.write("(");
                    self.expr(e, 0);
                    self.write(")");
                } else {
                    self.expr(e, PREC_ASSIGN);
                }
            }
        }
    }
}

fn starts_with_object(expr: &Expr) -> bool {
    match expr {
        Expr::Object(_) => true,
        Expr::Member { object, .. } | Expr::Index { object, .. } => {
            starts_with_object(&object.value)
        }
        Expr::Call { callee, .. } => starts_with_object(&callee.value),
        Expr::Binary { left, .. } => starts_with_object(&left.value),
        Expr::Conditional { test, .. } => starts_with_object(&test.value),
        Expr::TypeAssertion { expr, .. } => starts_with_object(&expr.value),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstFactory;
    use crate::syntax::parser::{parse_expression, parse_module};

    fn roundtrip(src: &str) -> String {
        print_module(&parse_module(src).unwrap())
    }

    fn with_comments(src: &str) -> String {
        print_module_with_comments(&parse_module(src).unwrap(), src).code
    }

    #[test]
    fn test_keeps_leading_and_trailing_comments() {
        let src = "/**\n * Header.\n */\n// keep me\nconst a = 1; // one\nconst b = 2;\n";
        assert_eq!(
            with_comments(src),
            "/**\n * Header.\n */\n// keep me\nconst a = 1; // one\nconst b = 2;\n"
        );
    }

    #[test]
    fn test_comments_in_blocks_keep_indentation() {
        let src = "function f() {\n  // step\n  return 1;\n}\n// end\n";
        assert_eq!(with_comments(src), "function f() {\n  // step\n  return 1;\n}\n// end\n");
    }

    #[test]
    fn test_comments_inside_expressions_are_dropped() {
        let src = "const a = f(/* x */ 1);\nconst b = 2;";
        assert_eq!(with_comments(src), "const a = f(1);\nconst b = 2;\n");
    }

    #[test]
    fn test_inserts_parentheses_from_precedence() {
        let f = AstFactory::synthetic();
        let sum = f.binary("+", f.ident("a"), f.ident("b"));
        let product = f.binary("*", sum, f.ident("c"));
        assert_eq!(print_expr(&product), "(a + b) * c");
    }

    #[test]
    fn test_arrow_returning_object_is_wrapped() {
        let f = AstFactory::synthetic();
        let obj = f.object(vec![("x".into(), f.ident("x"))]);
        let arrow = f.lambda("x", obj);
        assert_eq!(print_expr(&arrow), "x => ({ x })");
    }

    #[test]
    fn test_statement_starting_with_function_is_wrapped() {
        let out = roundtrip("(function () { return 1; })();");
        assert!(out.starts_with("(function () {"), "{}", out);
    }

    #[test]
    fn test_roundtrip_is_stable() {
        let src = "import { a, b as c } from \"m\";\nexport const f = async (x: number): Promise<number> => {\n  const y = await g(x);\n  return y ?? 0;\n};\nclass P {\n  readonly x: number = 1;\n  get len() {\n    return this.x;\n  }\n}\n";
        let once = roundtrip(src);
        assert_eq!(roundtrip(&once), once);
        assert!(once.contains("import { a, b as c } from \"m\";"));
    }

    #[test]
    fn test_mixed_nullish_keeps_parentheses() {
        let e = parse_expression("(a || b) ?? c").unwrap();
        let f = AstFactory::synthetic();
        let stripped = match e.value {
            Expr::Binary { left, right, op } => {
                let inner = match left.value {
                    Expr::Paren(inner) => inner,
                    other => Box::new(f.expr(other)),
                };
                f.expr(Expr::Binary { op, left: inner, right })
            }
            other => f.expr(other),
        };
        assert_eq!(print_expr(&stripped), "(a || b) ?? c");
    }

    #[test]
    fn test_records_mappings_for_parsed_nodes() {
        let module = parse_module("const a = 1;\nfoo(a);").unwrap();
        let out = print_module_with_mappings(&module);
        assert!(out
            .mappings
            .iter()
            .any(|m| m.generated_line == 1 && m.generated_column == 0 && m.source_offset == 13));
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(quote_string("a\"b\n"), "\"a\\\"b\\n\"");
    }
}
