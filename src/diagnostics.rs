//!
//! ****************************************************************************************
//! ** ERROR CONSTRUCTION RULES FOR macroweave (`err_msg!`, `err_ctx!`)                   **
//! ****************************************************************************************
//!
//! # Overview
//!
//! This module defines the unified, `miette`-based error and diagnostic system for the
//! macroweave engine. Fatal failures (registration conflicts, I/O, configuration) are
//! `WeaveError` values. Non-fatal problems found while expanding a file are collected as
//! [`Diagnostic`] records and reported together at the end of a pass.
//!
//! # Error Construction Macros
//!
//! - **Use `err_msg!` for simple, message-only errors.**
//!   - `err_msg!(Parse, "Unexpected token")`
//!   - `err_msg!(Expansion, "macro '{}' failed", name)`
//!
//! - **Use `err_ctx!` for errors with a span (and optionally help text).**
//!   - `err_ctx!(Structural, "unsupported statement", span)`
//!   - `err_ctx!(Structural, "unsupported statement", span, "move it out of the block")`
//!
//! # Rules
//!
//! - **Never pass a `usize` as a span.** Build a `Span { start, end }`.
//! - **Do not construct `ErrorContext` manually unless attaching related labels.**
//! - **Expansion-time failures are diagnostics, not panics.** The driver converts every
//!   `WeaveError` returned by a macro into a [`Diagnostic`] at the invocation site.
//!
//! ****************************************************************************************

use std::fmt;
use std::sync::Arc;

use miette::{LabeledSpan, NamedSource, SourceCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Span;

// Type aliases for clarity and brevity
pub type SourceArc = Arc<NamedSource<String>>;

// ============================================================================
// ERROR CONTEXT
// ============================================================================

/// A single additional label for multi-span diagnostics.
#[derive(Debug, Clone)]
pub struct RelatedLabel {
    pub span: Span,
    pub label: String,
}

/// Minimal, composable error context for diagnostics.
#[derive(Debug, Default)]
pub struct ErrorContext {
    /// The primary source for this error (if any).
    pub source: Option<SourceArc>,
    /// The primary span for this error (if any).
    pub span: Option<Span>,
    /// An optional help message.
    pub help: Option<String>,
    /// Additional labeled spans in the same source.
    pub related: Vec<RelatedLabel>,
}

impl ErrorContext {
    /// Returns an empty error context (no source, span, or help).
    pub fn none() -> Self {
        Self::default()
    }

    /// Creates a context with only a span.
    pub fn with_span(span: Span) -> Self {
        Self {
            span: Some(span),
            ..Self::default()
        }
    }

    /// Creates a context with a span and a help message.
    pub fn with_span_and_help(span: Span, help: impl Into<String>) -> Self {
        Self {
            span: Some(span),
            help: Some(help.into()),
            ..Self::default()
        }
    }
}

// ============================================================================
// WEAVE ERROR
// ============================================================================

/// Unified error type for all macroweave failure modes.
#[derive(Debug, Error)]
pub enum WeaveError {
    #[error("Parse error: {message}")]
    Parse {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
    #[error("Registry error: {message}")]
    Registry {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
    #[error("Duplicate {kind} macro '{name}': already registered from {existing}, refusing registration from {incoming}")]
    DuplicateMacro {
        name: String,
        kind: String,
        existing: String,
        incoming: String,
        ctx: ErrorContext,
    },
    #[error("Expansion error: {message}")]
    Expansion {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
    #[error("Capability denied: {message}")]
    Capability {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
    #[error("Evaluation error: {message}")]
    Eval {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
    #[error("{message}")]
    Structural {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
    #[error("I/O error: {message}")]
    Io {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },
}

impl WeaveError {
    fn ctx(&self) -> &ErrorContext {
        match self {
            WeaveError::Parse { ctx, .. }
            | WeaveError::Registry { ctx, .. }
            | WeaveError::DuplicateMacro { ctx, .. }
            | WeaveError::Expansion { ctx, .. }
            | WeaveError::Capability { ctx, .. }
            | WeaveError::Eval { ctx, .. }
            | WeaveError::Structural { ctx, .. }
            | WeaveError::Config { ctx, .. }
            | WeaveError::Io { ctx, .. }
            | WeaveError::Internal { ctx, .. } => ctx,
        }
    }

    fn ctx_mut(&mut self) -> &mut ErrorContext {
        match self {
            WeaveError::Parse { ctx, .. }
            | WeaveError::Registry { ctx, .. }
            | WeaveError::DuplicateMacro { ctx, .. }
            | WeaveError::Expansion { ctx, .. }
            | WeaveError::Capability { ctx, .. }
            | WeaveError::Eval { ctx, .. }
            | WeaveError::Structural { ctx, .. }
            | WeaveError::Config { ctx, .. }
            | WeaveError::Io { ctx, .. }
            | WeaveError::Internal { ctx, .. } => ctx,
        }
    }

    /// The primary span, if the error was raised with one.
    pub fn span(&self) -> Option<Span> {
        self.ctx().span
    }

    /// The help text, if any.
    pub fn help_text(&self) -> Option<&str> {
        self.ctx().help.as_deref()
    }

    /// The bare message without the category prefix used by `Display`.
    pub fn message(&self) -> String {
        match self {
            WeaveError::Parse { message, .. }
            | WeaveError::Registry { message, .. }
            | WeaveError::Expansion { message, .. }
            | WeaveError::Capability { message, .. }
            | WeaveError::Eval { message, .. }
            | WeaveError::Structural { message, .. }
            | WeaveError::Config { message, .. }
            | WeaveError::Io { message, .. }
            | WeaveError::Internal { message, .. } => message.clone(),
            WeaveError::DuplicateMacro { .. } => self.to_string(),
        }
    }

    /// Attaches a span if the error does not carry one yet.
    pub fn or_span(mut self, span: Span) -> Self {
        let ctx = self.ctx_mut();
        if ctx.span.is_none() {
            ctx.span = Some(span);
        }
        self
    }

    /// Attaches a source for rendering.
    pub fn with_source_code(mut self, source: &SourceArc) -> Self {
        self.ctx_mut().source = Some(Arc::clone(source));
        self
    }

    /// Attaches help text, replacing any existing help.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.ctx_mut().help = Some(help.into());
        self
    }

    /// Returns true for sandbox capability violations.
    pub fn is_capability_violation(&self) -> bool {
        matches!(self, WeaveError::Capability { .. })
    }

    fn code_suffix(&self) -> &'static str {
        match self {
            WeaveError::Parse { .. } => "parse",
            WeaveError::Registry { .. } => "registry",
            WeaveError::DuplicateMacro { .. } => "duplicate_macro",
            WeaveError::Expansion { .. } => "expansion",
            WeaveError::Capability { .. } => "capability",
            WeaveError::Eval { .. } => "eval",
            WeaveError::Structural { .. } => "structural",
            WeaveError::Config { .. } => "config",
            WeaveError::Io { .. } => "io",
            WeaveError::Internal { .. } => "internal",
        }
    }
}

impl miette::Diagnostic for WeaveError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(format!("macroweave::{}", self.code_suffix())))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.ctx()
            .help
            .as_ref()
            .map(|h| Box::new(h) as Box<dyn fmt::Display + 'a>)
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        self.ctx()
            .source
            .as_ref()
            .map(|s| s.as_ref() as &dyn SourceCode)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let ctx = self.ctx();
        ctx.source.as_ref()?;
        let mut labels = Vec::new();
        if let Some(span) = ctx.span {
            labels.push(LabeledSpan::new(
                Some(self.message()),
                span.start,
                span.len().max(1),
            ));
        }
        for rel in &ctx.related {
            labels.push(LabeledSpan::new(
                Some(rel.label.clone()),
                rel.span.start,
                rel.span.len().max(1),
            ));
        }
        if labels.is_empty() {
            None
        } else {
            Some(Box::new(labels.into_iter()))
        }
    }
}

impl From<std::io::Error> for WeaveError {
    fn from(e: std::io::Error) -> Self {
        WeaveError::Io {
            message: e.to_string(),
            ctx: ErrorContext::none(),
            source: Some(Box::new(e)),
        }
    }
}

/// Converts a source string into an `Arc<NamedSource<String>>` for use in error contexts.
pub fn to_error_source(name: &str, source: &str) -> SourceArc {
    Arc::new(NamedSource::new(name, source.to_string()))
}

/// Describes a macro origin module for conflict messages.
pub fn describe_module(module: Option<&str>) -> String {
    match module {
        Some(m) => format!("module '{}'", m),
        None => "the global scope".to_string(),
    }
}

// ============================================================================
// EXPANSION DIAGNOSTICS
// ============================================================================

/// Severity of an expansion diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A non-fatal problem found during preprocessing or expansion.
///
/// Positions are byte offsets. Inside the driver they refer to the text the parser saw;
/// the transform pipeline relocates them to the user's original source before returning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub start: usize,
    pub length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macro_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Error, message, span)
    }

    pub fn warning(message: impl Into<String>, span: Span) -> Self {
        Self::new(Severity::Warning, message, span)
    }

    fn new(severity: Severity, message: impl Into<String>, span: Span) -> Self {
        Self {
            severity,
            message: message.into(),
            start: span.start,
            length: span.len(),
            macro_name: None,
            help: None,
        }
    }

    /// Builds an error diagnostic from a `WeaveError`, using `fallback` when the error
    /// carries no span of its own.
    pub fn from_error(error: &WeaveError, fallback: Span) -> Self {
        let span = error.span().unwrap_or(fallback);
        let mut diag = Self::error(error.to_string(), span);
        diag.help = error.help_text().map(str::to_string);
        diag
    }

    pub fn with_macro(mut self, name: impl Into<String>) -> Self {
        self.macro_name = Some(name.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.start + self.length)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Pairs the diagnostic with its source text so it can be rendered by `miette`.
    pub fn render_with(&self, source: &SourceArc) -> RenderedDiagnostic {
        RenderedDiagnostic {
            diagnostic: self.clone(),
            source: Arc::clone(source),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.macro_name {
            Some(name) => write!(f, "{} [{}]: {}", self.severity, name, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// A diagnostic bound to its source, renderable through `miette::Report`.
#[derive(Debug)]
pub struct RenderedDiagnostic {
    diagnostic: Diagnostic,
    source: SourceArc,
}

impl fmt::Display for RenderedDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.diagnostic.message)
    }
}

impl std::error::Error for RenderedDiagnostic {}

impl miette::Diagnostic for RenderedDiagnostic {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.diagnostic
            .macro_name
            .as_ref()
            .map(|n| Box::new(format!("macro::{}", n)) as Box<dyn fmt::Display + 'a>)
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(match self.diagnostic.severity {
            Severity::Error => miette::Severity::Error,
            Severity::Warning => miette::Severity::Warning,
        })
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.diagnostic
            .help
            .as_ref()
            .map(|h| Box::new(h) as Box<dyn fmt::Display + 'a>)
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        Some(self.source.as_ref() as &dyn SourceCode)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let label = LabeledSpan::new(
            Some(self.diagnostic.severity.to_string()),
            self.diagnostic.start,
            self.diagnostic.length.max(1),
        );
        Some(Box::new(std::iter::once(label)))
    }
}

// ============================================================================
// CONSTRUCTION MACROS
// ============================================================================

/// Constructs a `WeaveError` variant with a formatted message and no context.
#[macro_export]
macro_rules! err_msg {
    ($variant:ident, $msg:literal $(,)?) => {
        $crate::WeaveError::$variant {
            message: format!($msg),
            ctx: $crate::ErrorContext::none(),
            source: None,
        }
    };
    ($variant:ident, $msg:literal, $($arg:expr),+ $(,)?) => {
        $crate::WeaveError::$variant {
            message: format!($msg, $($arg),+),
            ctx: $crate::ErrorContext::none(),
            source: None,
        }
    };
    ($variant:ident, $msg:expr $(,)?) => {
        $crate::WeaveError::$variant {
            message: ($msg).to_string(),
            ctx: $crate::ErrorContext::none(),
            source: None,
        }
    };
}

/// Constructs a `WeaveError` variant with a message, a span and optional help.
///
/// The message may be any `Display` value; format it before passing if needed.
#[macro_export]
macro_rules! err_ctx {
    // Message, span, help
    ($variant:ident, $msg:expr, $span:expr, $help:expr) => {
        $crate::WeaveError::$variant {
            message: ($msg).to_string(),
            ctx: $crate::ErrorContext::with_span_and_help($span, format!("{}", $help)),
            source: None,
        }
    };
    // Message, span
    ($variant:ident, $msg:expr, $span:expr) => {
        $crate::WeaveError::$variant {
            message: ($msg).to_string(),
            ctx: $crate::ErrorContext::with_span($span),
            source: None,
        }
    };
}

#[cfg(test)]
mod diagnostics_tests {
    use miette::Report;

    use super::*;

    #[test]
    fn test_labels_and_help_render() {
        let src = to_error_source("file.ts", "const x = boom();");
        let err = err_ctx!(Expansion, "macro 'boom' failed", Span::new(10, 16), "check the arguments")
            .with_source_code(&src);
        let output = format!("{:?}", Report::new(err));
        assert!(output.contains("macro 'boom' failed"));
        assert!(output.contains("check the arguments"));
    }

    #[test]
    fn test_err_msg_formats_arguments() {
        let err = err_msg!(Registry, "registry '{}' has {} entries", "ops", 3);
        assert_eq!(err.message(), "registry 'ops' has 3 entries");
        assert!(err.span().is_none());
    }

    #[test]
    fn test_or_span_keeps_existing_span() {
        let err = err_ctx!(Structural, "bad", Span::new(1, 2)).or_span(Span::new(5, 9));
        assert_eq!(err.span(), Some(Span::new(1, 2)));
        let err = err_msg!(Structural, "bad").or_span(Span::new(5, 9));
        assert_eq!(err.span(), Some(Span::new(5, 9)));
    }

    #[test]
    fn test_io_error_keeps_its_cause() {
        use std::error::Error as _;
        let err: WeaveError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.source().is_some());
        assert_eq!(err.source().map(|s| s.to_string()), Some("gone".to_string()));
        assert!(err_msg!(Eval, "plain").source().is_none());
    }

    #[test]
    fn test_duplicate_macro_names_both_modules() {
        let err = WeaveError::DuplicateMacro {
            name: "sql".into(),
            kind: "expression".into(),
            existing: describe_module(Some("lib-a")),
            incoming: describe_module(Some("lib-b")),
            ctx: ErrorContext::none(),
        };
        let text = err.to_string();
        assert!(text.contains("lib-a"));
        assert!(text.contains("lib-b"));
    }

    #[test]
    fn test_rendered_warning_has_severity() {
        let src = to_error_source("a.ts", "hoist(() => x)");
        let diag = Diagnostic::warning("cannot hoist", Span::new(0, 5)).with_macro("hoist");
        let output = format!("{:?}", Report::new(diag.render_with(&src)));
        assert!(output.contains("cannot hoist"));
    }
}
