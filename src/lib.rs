//! # macroweave
//!
//! Compile-time macro expansion for a TypeScript subset.
//!
//! A file goes through two rewrites. The [`preprocess`] pass works on text
//! and turns syntax the parser cannot read (custom operators, higher-kinded
//! type application, decorators in awkward places) into plain calls. The
//! [`macros`] pass parses the result and expands every registered macro
//! invocation in the tree. [`transform`] strings the two together, prints the
//! result and maps diagnostics back to the input through [`sourcemap`].

pub use crate::ast::Span;
pub use crate::diagnostics::{Diagnostic, ErrorContext, Severity, WeaveError};

pub mod ast;
pub mod cache;
pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod macros;
pub mod preprocess;
pub mod registry;
pub mod sandbox;
pub mod sourcemap;
pub mod syntax;
pub mod transform;
