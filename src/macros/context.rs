//! The context handed to every `expand` call.
//!
//! A context is created per file. It owns the file text, the declaration
//! index, hygiene state, the diagnostics sink and the per-file side tables
//! (hoisted declarations, layer providers, expansion trace). The driver sets
//! the current invocation before each call so factory nodes and diagnostics
//! land on the call site.

use std::collections::HashSet;
use std::path::PathBuf;

use super::builtin::layers::LayerProvider;
use super::hygiene::Hygiene;
use super::oracle::TypeOracle;
use super::MacroExpansionStep;
use crate::ast::visit::assigned_names;
use crate::ast::{AstFactory, Module, Param, SourceFile, Span, Stmt, StmtNode, VarKind};
use crate::sandbox::Capabilities;
use crate::syntax::OperatorDef;
use crate::Diagnostic;

/// State that outlives a single expansion pass over a file.
#[derive(Debug, Clone, Default)]
pub struct FileState {
    /// Declarations to insert after the file's last import.
    pub hoisted: Vec<StmtNode>,
    pub providers: Vec<LayerProvider>,
    pub trace: Vec<MacroExpansionStep>,
    /// Local identifiers that named an expanded macro.
    pub consumed: HashSet<String>,
}

/// A name bound in an enclosing scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    /// `let`/`var` binding reassigned somewhere in its scope.
    pub stateful: bool,
}

/// Bindings visible from the current invocation, module scope excluded.
#[derive(Debug, Clone, Default)]
pub struct EnclosingBindings {
    pub stateful: HashSet<String>,
    pub plain: HashSet<String>,
}

pub struct MacroContext {
    file: SourceFile,
    oracle: TypeOracle,
    hygiene: Hygiene,
    capabilities: Capabilities,
    operators: Vec<OperatorDef>,
    span: Span,
    current_macro: Option<String>,
    diagnostics: Vec<Diagnostic>,
    scopes: Vec<Vec<Binding>>,
    pub(crate) state: FileState,
}

impl MacroContext {
    pub fn new(file: SourceFile, module: &Module) -> Self {
        let hygiene = Hygiene::from_source(&file.text);
        let module_frame = scope_frame(&[], &module.body);
        Self {
            oracle: TypeOracle::from_module(module),
            hygiene,
            file,
            capabilities: Capabilities::default(),
            operators: Vec::new(),
            span: Span::DUMMY,
            current_macro: None,
            diagnostics: Vec::new(),
            scopes: vec![module_frame],
            state: FileState::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Operator table the file was preprocessed with.
    pub fn with_operators(mut self, operators: Vec<OperatorDef>) -> Self {
        self.operators = operators;
        self
    }

    pub fn with_state(mut self, state: FileState) -> Self {
        self.state = state;
        self
    }

    pub fn into_parts(self) -> (FileState, Vec<Diagnostic>) {
        (self.state, self.diagnostics)
    }

    pub fn file(&self) -> &SourceFile {
        &self.file
    }

    pub fn file_name(&self) -> &str {
        &self.file.name
    }

    /// Directory that relative paths in compile-time code resolve against.
    pub fn file_dir(&self) -> PathBuf {
        self.file.dir()
    }

    /// Source text under `span`; empty for generated nodes.
    pub fn text(&self, span: Span) -> &str {
        self.file.slice(span)
    }

    pub fn oracle(&self) -> &TypeOracle {
        &self.oracle
    }

    /// Project-wide grants; per-call grants are added on top by `comptime`.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn operator(&self, symbol: &str) -> Option<&OperatorDef> {
        self.operators.iter().find(|op| op.symbol == symbol)
    }

    /// Span of the invocation being expanded.
    pub fn span(&self) -> Span {
        self.span
    }

    /// Factory whose nodes carry the invocation span.
    pub fn factory(&self) -> AstFactory {
        AstFactory::new(self.span)
    }

    pub fn current_macro(&self) -> Option<&str> {
        self.current_macro.as_deref()
    }

    pub(crate) fn enter_invocation(&mut self, name: &str, span: Span) -> (Option<String>, Span) {
        let prev = (self.current_macro.replace(name.to_string()), self.span);
        self.span = span;
        prev
    }

    pub(crate) fn exit_invocation(&mut self, prev: (Option<String>, Span)) {
        self.current_macro = prev.0;
        self.span = prev.1;
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn report_error(&mut self, message: impl Into<String>, span: Span) {
        let diag = self.tag(Diagnostic::error(message, span));
        self.diagnostics.push(diag);
    }

    pub fn report_warning(&mut self, message: impl Into<String>, span: Span) {
        let diag = self.tag(Diagnostic::warning(message, span));
        self.diagnostics.push(diag);
    }

    pub(crate) fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    fn tag(&self, diag: Diagnostic) -> Diagnostic {
        match &self.current_macro {
            Some(name) => diag.with_macro(name.clone()),
            None => diag,
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    // ------------------------------------------------------------------
    // Names and scopes
    // ------------------------------------------------------------------

    pub fn fresh_name(&mut self, base: &str) -> String {
        self.hygiene.fresh_name(base)
    }

    pub(crate) fn push_scope(&mut self, frame: Vec<Binding>) {
        self.scopes.push(frame);
    }

    pub(crate) fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Function-scope bindings around the invocation, innermost winning.
    pub fn enclosing_bindings(&self) -> EnclosingBindings {
        let mut out = EnclosingBindings::default();
        for frame in self.scopes.iter().skip(1) {
            for b in frame {
                if b.stateful {
                    out.plain.remove(&b.name);
                    out.stateful.insert(b.name.clone());
                } else {
                    out.stateful.remove(&b.name);
                    out.plain.insert(b.name.clone());
                }
            }
        }
        out
    }

    // ------------------------------------------------------------------
    // Per-file side tables
    // ------------------------------------------------------------------

    /// Queues a declaration for the top of the module.
    pub fn hoist(&mut self, stmt: StmtNode) {
        self.state.hoisted.push(stmt);
    }

    pub fn add_layer_provider(&mut self, provider: LayerProvider) {
        self.state.providers.push(provider);
    }

    pub fn layer_providers(&self) -> &[LayerProvider] {
        &self.state.providers
    }

    pub(crate) fn record_step(&mut self, step: MacroExpansionStep) {
        self.state.trace.push(step);
    }

    pub(crate) fn mark_consumed(&mut self, local: &str) {
        self.state.consumed.insert(local.to_string());
    }
}

/// Bindings introduced by a function's parameters and its body's
/// declarations.
pub fn scope_frame(params: &[Param], body: &[StmtNode]) -> Vec<Binding> {
    let assigned = assigned_names(body);
    let mut frame: Vec<Binding> = params
        .iter()
        .flat_map(|p| p.pattern.bound_names())
        .map(|name| Binding {
            stateful: assigned.contains(&name),
            name,
        })
        .collect();
    for stmt in body {
        let inner = match &stmt.value {
            Stmt::Export(inner) => &inner.value,
            other => other,
        };
        let mutable = matches!(inner, Stmt::Var(v) if v.kind != VarKind::Const);
        for name in inner.declared_names() {
            frame.push(Binding {
                stateful: mutable && assigned.contains(&name),
                name,
            });
        }
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_module;

    #[test]
    fn test_enclosing_bindings_skip_module_scope() {
        let module = parse_module("let top = 1; top = 2;").unwrap();
        let mut ctx = MacroContext::new(SourceFile::new("a.ts", "let top = 1; top = 2;"), &module);
        assert!(ctx.enclosing_bindings().stateful.is_empty());

        let body = crate::syntax::parse_statements("let n = 0; n++; const k = 1;").unwrap();
        ctx.push_scope(scope_frame(&[Param::named("p")], &body));
        let b = ctx.enclosing_bindings();
        assert!(b.stateful.contains("n"));
        assert!(b.plain.contains("k") && b.plain.contains("p"));
        assert!(!b.plain.contains("top"));
    }

    #[test]
    fn test_diagnostics_carry_macro_name() {
        let module = parse_module("x;").unwrap();
        let mut ctx = MacroContext::new(SourceFile::new("a.ts", "x;"), &module);
        let prev = ctx.enter_invocation("sample", Span::new(0, 1));
        ctx.report_warning("careful", Span::new(0, 1));
        ctx.exit_invocation(prev);
        assert_eq!(ctx.diagnostics()[0].macro_name.as_deref(), Some("sample"));
        assert!(ctx.current_macro().is_none());
    }
}
