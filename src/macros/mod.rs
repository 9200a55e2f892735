//! # Macro system
//!
//! Compile-time rewriting of host-language syntax trees. A macro is a named
//! Rust function registered in a [`MacroRegistry`]; the [`Expander`] finds
//! invocations in a parsed module, calls the matching macro with a
//! [`MacroContext`] and splices the result back in.
//!
//! ## Core principles
//!
//! - **Syntactic only**: macros see nodes and the declaration index, never a
//!   running program. `comptime` is the one exception and runs sandboxed.
//! - **Fail-open**: a failing macro leaves its invocation in place and adds a
//!   diagnostic; the rest of the file still expands.
//! - **Inspectable**: every expansion is recorded as a [`MacroExpansionStep`]
//!   so the `trace` command can show before and after.
//! - **Bounded**: output is re-expanded at most [`MAX_MACRO_RECURSION_DEPTH`]
//!   levels deep unless configured otherwise.

use serde::{Deserialize, Serialize};

use crate::Span;

pub mod builtin;
pub mod context;
pub mod definition;
pub mod expander;
pub mod hygiene;
pub mod imports;
pub mod oracle;
pub mod registry;

pub use context::{Binding, EnclosingBindings, FileState, MacroContext};
pub use definition::{
    define_attribute_macro, define_derive_macro, define_expression_macro,
    define_labeled_block_macro, define_tagged_template_macro, define_type_macro, AttributeInput,
    AttributeTarget, CallInput, DeriveInput, Expansion, LabeledInput, MacroBody, MacroDefinition,
    MacroInfo, MacroKind, TemplateInput, TypeInput,
};
pub use expander::Expander;
pub use oracle::TypeOracle;
pub use registry::MacroRegistry;

/// Default limit on nested re-expansion.
pub const MAX_MACRO_RECURSION_DEPTH: usize = 128;

/// One expansion, as shown by `macroweave trace`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroExpansionStep {
    /// The macro invoked.
    pub macro_name: String,
    pub kind: MacroKind,
    /// The invocation, printed.
    pub before: String,
    /// What it expanded to, printed.
    pub after: String,
    pub span: Span,
}
