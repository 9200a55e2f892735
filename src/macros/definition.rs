//! Macro definitions and the registration helpers sugar packages use.
//!
//! A definition is a name, an optional origin module, a description and a
//! kind-specific body holding the `expand` function. Definitions are shared as
//! `Arc<MacroDefinition>`; two registrations are "the same macro" exactly when
//! the `Arc`s point at the same allocation.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::context::MacroContext;
use crate::ast::{
    ClassDecl, ClassMember, DeclKind, Decorator, ExprNode, MemberNode, StmtNode, Template,
    TypeAlias,
};
use crate::{Span, WeaveError};

// ============================================================================
// KINDS AND RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MacroKind {
    Expression,
    Attribute,
    Derive,
    TaggedTemplate,
    Type,
    LabeledBlock,
}

impl MacroKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MacroKind::Expression => "expression",
            MacroKind::Attribute => "attribute",
            MacroKind::Derive => "derive",
            MacroKind::TaggedTemplate => "tagged-template",
            MacroKind::Type => "type",
            MacroKind::LabeledBlock => "labeled-block",
        }
    }
}

impl fmt::Display for MacroKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a macro produced. Which variants are accepted depends on where the
/// invocation sits; the driver reports a mismatch as a diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub enum Expansion {
    Expr(ExprNode),
    /// Zero, one or many statements replacing the invocation's statement.
    Stmts(Vec<StmtNode>),
    /// Class members replacing a decorated member.
    Members(Vec<MemberNode>),
}

// ============================================================================
// INVOCATION INPUTS
// ============================================================================

/// `name(args)` with `name` bound to an expression macro.
#[derive(Debug, Clone, Copy)]
pub struct CallInput<'a> {
    pub name: &'a str,
    pub args: &'a [ExprNode],
    pub type_args: Option<&'a str>,
    pub span: Span,
    /// The call is the whole expression of an expression statement, so a
    /// statement list is an acceptable result.
    pub in_statement: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum AttributeTarget<'a> {
    Class(&'a ClassDecl),
    Member(&'a ClassMember),
}

impl AttributeTarget<'_> {
    pub fn decl_kind(&self) -> Option<DeclKind> {
        match self {
            AttributeTarget::Class(_) => Some(DeclKind::Class),
            AttributeTarget::Member(m) => m.kind.decl_kind(),
        }
    }
}

/// `@name(args)` on a class or class member. The target no longer carries
/// the decorator being expanded.
#[derive(Debug, Clone, Copy)]
pub struct AttributeInput<'a> {
    pub decorator: &'a Decorator,
    pub target: AttributeTarget<'a>,
    pub span: Span,
}

/// `@derive(Name)` on a class. The result is appended after the class.
#[derive(Debug, Clone, Copy)]
pub struct DeriveInput<'a> {
    pub class: &'a ClassDecl,
    pub span: Span,
}

#[derive(Debug, Clone, Copy)]
pub struct TemplateInput<'a> {
    pub tag: &'a str,
    pub template: &'a Template,
    pub span: Span,
}

/// `type Alias = Name<args>` with `Name` bound to a type macro.
#[derive(Debug, Clone)]
pub struct TypeInput<'a> {
    pub alias: &'a TypeAlias,
    pub args: Vec<String>,
    pub span: Span,
}

/// `label: { body }`, optionally followed by `continuation: { ... }`.
#[derive(Debug, Clone, Copy)]
pub struct LabeledInput<'a> {
    pub label: &'a str,
    pub body: &'a [StmtNode],
    pub continuation: Option<(&'a str, &'a [StmtNode])>,
    pub span: Span,
}

pub type ExpressionExpander =
    Arc<dyn Fn(&mut MacroContext, &CallInput<'_>) -> Result<Expansion, WeaveError> + Send + Sync>;
pub type AttributeExpander =
    Arc<dyn Fn(&mut MacroContext, &AttributeInput<'_>) -> Result<Expansion, WeaveError> + Send + Sync>;
pub type DeriveExpander =
    Arc<dyn Fn(&mut MacroContext, &DeriveInput<'_>) -> Result<Vec<StmtNode>, WeaveError> + Send + Sync>;
pub type TemplateExpander =
    Arc<dyn Fn(&mut MacroContext, &TemplateInput<'_>) -> Result<ExprNode, WeaveError> + Send + Sync>;
pub type TypeExpander =
    Arc<dyn Fn(&mut MacroContext, &TypeInput<'_>) -> Result<Vec<StmtNode>, WeaveError> + Send + Sync>;
pub type LabeledExpander =
    Arc<dyn Fn(&mut MacroContext, &LabeledInput<'_>) -> Result<Vec<StmtNode>, WeaveError> + Send + Sync>;

/// Kind-specific part of a definition.
#[derive(Clone)]
pub enum MacroBody {
    Expression {
        expand: ExpressionExpander,
        /// Results may be cached by call-site text.
        cacheable: bool,
    },
    Attribute {
        valid_targets: Vec<DeclKind>,
        expand: AttributeExpander,
    },
    Derive {
        expand: DeriveExpander,
    },
    TaggedTemplate {
        expand: TemplateExpander,
    },
    Type {
        expand: TypeExpander,
    },
    LabeledBlock {
        label: String,
        continuation_labels: Vec<String>,
        expand: LabeledExpander,
    },
}

impl MacroBody {
    pub fn kind(&self) -> MacroKind {
        match self {
            MacroBody::Expression { .. } => MacroKind::Expression,
            MacroBody::Attribute { .. } => MacroKind::Attribute,
            MacroBody::Derive { .. } => MacroKind::Derive,
            MacroBody::TaggedTemplate { .. } => MacroKind::TaggedTemplate,
            MacroBody::Type { .. } => MacroKind::Type,
            MacroBody::LabeledBlock { .. } => MacroKind::LabeledBlock,
        }
    }
}

#[derive(Clone)]
pub struct MacroDefinition {
    pub name: String,
    /// Originating module; `None` means global, name-only resolution.
    pub module: Option<String>,
    pub description: String,
    pub body: MacroBody,
}

impl MacroDefinition {
    pub fn kind(&self) -> MacroKind {
        self.body.kind()
    }

    /// True for attribute macros that accept `target`; other kinds accept
    /// every target.
    pub fn accepts(&self, target: DeclKind) -> bool {
        match &self.body {
            MacroBody::Attribute { valid_targets, .. } => valid_targets.contains(&target),
            _ => true,
        }
    }

    pub fn continuation_labels(&self) -> &[String] {
        match &self.body {
            MacroBody::LabeledBlock {
                continuation_labels,
                ..
            } => continuation_labels,
            _ => &[],
        }
    }

    pub fn is_cacheable(&self) -> bool {
        matches!(self.body, MacroBody::Expression { cacheable: true, .. })
    }
}

impl fmt::Debug for MacroDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("module", &self.module)
            .finish()
    }
}

// ============================================================================
// REGISTRATION HELPERS
// ============================================================================

/// Common metadata for the `define_*` helpers.
#[derive(Debug, Clone, Default)]
pub struct MacroInfo {
    pub name: String,
    pub module: Option<String>,
    pub description: String,
    pub cacheable: bool,
}

impl MacroInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    fn build(self, body: MacroBody) -> Arc<MacroDefinition> {
        Arc::new(MacroDefinition {
            name: self.name,
            module: self.module,
            description: self.description,
            body,
        })
    }
}

impl From<&str> for MacroInfo {
    fn from(name: &str) -> Self {
        MacroInfo::new(name)
    }
}

pub fn define_expression_macro<F>(info: impl Into<MacroInfo>, expand: F) -> Arc<MacroDefinition>
where
    F: Fn(&mut MacroContext, &CallInput<'_>) -> Result<Expansion, WeaveError> + Send + Sync + 'static,
{
    let info = info.into();
    let cacheable = info.cacheable;
    info.build(MacroBody::Expression {
        expand: Arc::new(expand),
        cacheable,
    })
}

pub fn define_attribute_macro<F>(
    info: impl Into<MacroInfo>,
    valid_targets: &[DeclKind],
    expand: F,
) -> Arc<MacroDefinition>
where
    F: Fn(&mut MacroContext, &AttributeInput<'_>) -> Result<Expansion, WeaveError> + Send + Sync + 'static,
{
    info.into().build(MacroBody::Attribute {
        valid_targets: valid_targets.to_vec(),
        expand: Arc::new(expand),
    })
}

pub fn define_derive_macro<F>(info: impl Into<MacroInfo>, expand: F) -> Arc<MacroDefinition>
where
    F: Fn(&mut MacroContext, &DeriveInput<'_>) -> Result<Vec<StmtNode>, WeaveError> + Send + Sync + 'static,
{
    info.into().build(MacroBody::Derive {
        expand: Arc::new(expand),
    })
}

pub fn define_tagged_template_macro<F>(info: impl Into<MacroInfo>, expand: F) -> Arc<MacroDefinition>
where
    F: Fn(&mut MacroContext, &TemplateInput<'_>) -> Result<ExprNode, WeaveError> + Send + Sync + 'static,
{
    info.into().build(MacroBody::TaggedTemplate {
        expand: Arc::new(expand),
    })
}

pub fn define_type_macro<F>(info: impl Into<MacroInfo>, expand: F) -> Arc<MacroDefinition>
where
    F: Fn(&mut MacroContext, &TypeInput<'_>) -> Result<Vec<StmtNode>, WeaveError> + Send + Sync + 'static,
{
    info.into().build(MacroBody::Type {
        expand: Arc::new(expand),
    })
}

/// The label a block macro answers to is its name.
pub fn define_labeled_block_macro<F>(
    info: impl Into<MacroInfo>,
    continuation_labels: &[&str],
    expand: F,
) -> Arc<MacroDefinition>
where
    F: Fn(&mut MacroContext, &LabeledInput<'_>) -> Result<Vec<StmtNode>, WeaveError> + Send + Sync + 'static,
{
    let info = info.into();
    let label = info.name.clone();
    info.build(MacroBody::LabeledBlock {
        label,
        continuation_labels: continuation_labels.iter().map(|s| s.to_string()).collect(),
        expand: Arc::new(expand),
    })
}
