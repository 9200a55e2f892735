//! AST module for the macroweave host language
//!
//! A closed, tagged-variant model of the TypeScript subset the engine rewrites.
//! Statements and expressions carry spans into the text they were parsed from;
//! nodes built by macros carry the span of the invocation that produced them.
//! Type annotations are kept as source text and are never interpreted.

// ============================================================================
// IMPORTS
// ============================================================================

use serde::{Deserialize, Serialize};

pub mod factory;
pub mod visit;

pub use factory::AstFactory;

// ============================================================================
// CORE DATA STRUCTURES
// ============================================================================

/// Represents a byte range in the source code.
///
/// # Examples
///
/// ```rust
/// use macroweave::ast::Span;
/// let span = Span::new(0, 5);
/// assert_eq!(span.len(), 5);
/// assert!(!span.is_dummy());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// Span used for nodes with no position in any source text.
    pub const DUMMY: Span = Span {
        start: usize::MAX,
        end: usize::MAX,
    };

    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dummy(&self) -> bool {
        self.start == usize::MAX
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(&self, other: Span) -> Span {
        if self.is_dummy() {
            return other;
        }
        if other.is_dummy() {
            return *self;
        }
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end
    }
}

/// Wrapper for carrying source span information with any value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithSpan<T> {
    pub value: T,
    pub span: Span,
}

impl<T> WithSpan<T> {
    pub fn new(value: T, span: Span) -> Self {
        Self { value, span }
    }
}

pub type ExprNode = WithSpan<Expr>;
pub type StmtNode = WithSpan<Stmt>;
pub type MemberNode = WithSpan<ClassMember>;

/// A parsed source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Module {
    pub body: Vec<StmtNode>,
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Ident(String),
    /// Numeric literal, kept as written.
    Number(String),
    /// String literal, cooked value.
    Str(String),
    Bool(bool),
    Null,
    This,
    Super,
    Template(Template),
    TaggedTemplate {
        tag: Box<ExprNode>,
        type_args: Option<String>,
        template: Template,
    },
    Array(Vec<ExprNode>),
    Object(Vec<Prop>),
    Function(Box<Function>),
    Arrow(Box<Arrow>),
    Class(Box<ClassDecl>),
    Unary {
        op: String,
        arg: Box<ExprNode>,
    },
    Update {
        op: String,
        prefix: bool,
        arg: Box<ExprNode>,
    },
    Binary {
        op: String,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Assign {
        op: String,
        target: Box<ExprNode>,
        value: Box<ExprNode>,
    },
    Conditional {
        test: Box<ExprNode>,
        cons: Box<ExprNode>,
        alt: Box<ExprNode>,
    },
    Call {
        callee: Box<ExprNode>,
        type_args: Option<String>,
        args: Vec<ExprNode>,
        optional: bool,
    },
    New {
        callee: Box<ExprNode>,
        type_args: Option<String>,
        args: Option<Vec<ExprNode>>,
    },
    Member {
        object: Box<ExprNode>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<ExprNode>,
        index: Box<ExprNode>,
        optional: bool,
    },
    Spread(Box<ExprNode>),
    Await(Box<ExprNode>),
    Yield {
        arg: Option<Box<ExprNode>>,
        delegate: bool,
    },
    /// `expr as T` / `expr satisfies T`
    TypeAssertion {
        expr: Box<ExprNode>,
        keyword: String,
        ty: String,
    },
    NonNull(Box<ExprNode>),
    Sequence(Vec<ExprNode>),
    /// Parenthesised expression; kept so printing round-trips user grouping.
    Paren(Box<ExprNode>),
}

/// Template literal. `quasis` hold the raw text between substitutions and always
/// have one more element than `exprs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub quasis: Vec<String>,
    pub exprs: Vec<ExprNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropKey {
    Ident(String),
    Str(String),
    Number(String),
    Computed(Box<ExprNode>),
    Private(String),
}

impl PropKey {
    /// The static name of the key, if it has one.
    pub fn name(&self) -> Option<&str> {
        match self {
            PropKey::Ident(n) | PropKey::Str(n) | PropKey::Number(n) | PropKey::Private(n) => {
                Some(n)
            }
            PropKey::Computed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodKind {
    Method,
    Get,
    Set,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Prop {
    KeyValue { key: PropKey, value: ExprNode },
    Shorthand(String),
    Spread(ExprNode),
    Method {
        key: PropKey,
        kind: MethodKind,
        func: Function,
    },
}

// ============================================================================
// FUNCTIONS AND PATTERNS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: Option<String>,
    pub is_async: bool,
    pub is_generator: bool,
    pub type_params: Option<String>,
    pub params: Vec<Param>,
    pub return_type: Option<String>,
    /// `None` for overload signatures and abstract methods.
    pub body: Option<Vec<StmtNode>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arrow {
    pub is_async: bool,
    pub type_params: Option<String>,
    pub params: Vec<Param>,
    pub return_type: Option<String>,
    pub body: ArrowBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrowBody {
    Expr(Box<ExprNode>),
    Block(Vec<StmtNode>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub pattern: Pattern,
    pub ty: Option<String>,
    pub default: Option<ExprNode>,
    pub rest: bool,
    pub optional: bool,
    /// Accessibility and `readonly` modifiers of constructor parameter properties.
    pub modifiers: Vec<String>,
    pub decorators: Vec<Decorator>,
}

impl Param {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            pattern: Pattern::Ident(name.into()),
            ty: None,
            default: None,
            rest: false,
            optional: false,
            modifiers: Vec::new(),
            decorators: Vec::new(),
        }
    }

    pub fn with_type(mut self, ty: impl Into<String>) -> Self {
        self.ty = Some(ty.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pattern {
    Ident(String),
    Object {
        props: Vec<ObjectPatternProp>,
        rest: Option<Box<Pattern>>,
    },
    Array {
        elems: Vec<Option<ArrayPatternElem>>,
        rest: Option<Box<Pattern>>,
    },
    /// Member or index targets, only valid as assignment/for-of heads.
    Expr(Box<ExprNode>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPatternProp {
    pub key: PropKey,
    pub value: Pattern,
    pub default: Option<ExprNode>,
    pub shorthand: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayPatternElem {
    pub pattern: Pattern,
    pub default: Option<ExprNode>,
}

impl Pattern {
    /// All names bound by this pattern, in source order.
    pub fn bound_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names(&self, out: &mut Vec<String>) {
        match self {
            Pattern::Ident(n) => out.push(n.clone()),
            Pattern::Object { props, rest } => {
                for p in props {
                    p.value.collect_names(out);
                }
                if let Some(r) = rest {
                    r.collect_names(out);
                }
            }
            Pattern::Array { elems, rest } => {
                for e in elems.iter().flatten() {
                    e.pattern.collect_names(out);
                }
                if let Some(r) = rest {
                    r.collect_names(out);
                }
            }
            Pattern::Expr(_) => {}
        }
    }

    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Pattern::Ident(n) => Some(n),
            _ => None,
        }
    }
}

// ============================================================================
// CLASSES AND DECORATORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decorator {
    pub expr: ExprNode,
    pub span: Span,
}

impl Decorator {
    /// The identifier the decorator calls or names: `@a`, `@a(...)`.
    pub fn callee_name(&self) -> Option<&str> {
        match &self.expr.value {
            Expr::Ident(n) => Some(n),
            Expr::Call { callee, .. } => match &callee.value {
                Expr::Ident(n) => Some(n),
                _ => None,
            },
            _ => None,
        }
    }

    /// Call arguments, empty for a bare `@a`.
    pub fn args(&self) -> &[ExprNode] {
        match &self.expr.value {
            Expr::Call { args, .. } => args,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: Option<String>,
    pub decorators: Vec<Decorator>,
    pub modifiers: Vec<String>,
    pub type_params: Option<String>,
    pub extends: Option<ExprNode>,
    pub super_type_args: Option<String>,
    pub implements: Option<String>,
    pub members: Vec<MemberNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMember {
    pub decorators: Vec<Decorator>,
    pub modifiers: Vec<String>,
    pub kind: MemberKind,
}

impl ClassMember {
    pub fn is_static(&self) -> bool {
        self.modifiers.iter().any(|m| m == "static")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MemberKind {
    Constructor(Function),
    Method {
        key: PropKey,
        kind: MethodKind,
        optional: bool,
        func: Function,
    },
    Property {
        key: PropKey,
        optional: bool,
        definite: bool,
        ty: Option<String>,
        value: Option<ExprNode>,
    },
    /// Index signatures and other members kept as written.
    Verbatim(String),
    StaticBlock(Vec<StmtNode>),
}

/// Declaration kinds a decorator may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclKind {
    Class,
    Method,
    Property,
    Accessor,
}

impl MemberKind {
    pub fn decl_kind(&self) -> Option<DeclKind> {
        match self {
            MemberKind::Method {
                kind: MethodKind::Method,
                ..
            } => Some(DeclKind::Method),
            MemberKind::Method { .. } => Some(DeclKind::Accessor),
            MemberKind::Property { .. } => Some(DeclKind::Property),
            _ => None,
        }
    }
}

// ============================================================================
// STATEMENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarKind {
    Const,
    Let,
    Var,
}

impl VarKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarKind::Const => "const",
            VarKind::Let => "let",
            VarKind::Var => "var",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub kind: VarKind,
    pub declare: bool,
    pub decls: Vec<VarDeclarator>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDeclarator {
    pub pattern: Pattern,
    pub ty: Option<String>,
    pub definite: bool,
    pub init: Option<ExprNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportDecl {
    pub default: Option<String>,
    pub namespace: Option<String>,
    pub named: Vec<ImportSpecifier>,
    pub source: String,
    pub type_only: bool,
    /// False for `import "x"`, which has no binding clause at all.
    pub has_clause: bool,
}

impl ImportDecl {
    pub fn is_side_effect_only(&self) -> bool {
        !self.has_clause
    }

    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.namespace.is_none() && self.named.is_empty()
    }

    /// Local names introduced by this import.
    pub fn local_names(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        if let Some(d) = &self.default {
            out.push(d);
        }
        if let Some(n) = &self.namespace {
            out.push(n);
        }
        out.extend(self.named.iter().map(|s| s.local.as_str()));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSpecifier {
    pub imported: String,
    pub local: String,
    pub type_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSpecifier {
    pub local: String,
    pub exported: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    pub test: Option<ExprNode>,
    pub body: Vec<StmtNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeAlias {
    pub name: String,
    pub type_params: Option<String>,
    pub ty: String,
    pub declare: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForInit {
    Var(VarDecl),
    Expr(ExprNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ForHead {
    Var(VarKind, Pattern),
    Pattern(Pattern),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Expr(ExprNode),
    Var(VarDecl),
    Function(Function),
    Class(ClassDecl),
    TypeAlias(TypeAlias),
    Import(ImportDecl),
    /// `export <declaration>`
    Export(Box<StmtNode>),
    ExportDefault(ExprNode),
    ExportNamed {
        specifiers: Vec<ExportSpecifier>,
        source: Option<String>,
        type_only: bool,
    },
    ExportAll {
        alias: Option<String>,
        source: String,
    },
    Return(Option<ExprNode>),
    If {
        test: ExprNode,
        cons: Box<StmtNode>,
        alt: Option<Box<StmtNode>>,
    },
    Block(Vec<StmtNode>),
    For {
        init: Option<ForInit>,
        test: Option<ExprNode>,
        update: Option<ExprNode>,
        body: Box<StmtNode>,
    },
    ForIn {
        head: ForHead,
        right: ExprNode,
        body: Box<StmtNode>,
        of: bool,
        is_await: bool,
    },
    While {
        test: ExprNode,
        body: Box<StmtNode>,
    },
    DoWhile {
        body: Box<StmtNode>,
        test: ExprNode,
    },
    Try {
        block: Vec<StmtNode>,
        param: Option<Pattern>,
        handler: Option<Vec<StmtNode>>,
        finalizer: Option<Vec<StmtNode>>,
    },
    Throw(ExprNode),
    Break(Option<String>),
    Continue(Option<String>),
    Switch {
        disc: ExprNode,
        cases: Vec<SwitchCase>,
    },
    Labeled {
        label: String,
        body: Box<StmtNode>,
    },
    /// Interfaces, enums, `declare` and namespace blocks, kept as written.
    Verbatim(String),
    Empty,
}

impl Stmt {
    /// Names this statement declares in its enclosing scope.
    pub fn declared_names(&self) -> Vec<String> {
        match self {
            Stmt::Var(v) => v.decls.iter().flat_map(|d| d.pattern.bound_names()).collect(),
            Stmt::Function(f) => f.name.iter().cloned().collect(),
            Stmt::Class(c) => c.name.iter().cloned().collect(),
            Stmt::Import(i) => i.local_names().into_iter().map(str::to_string).collect(),
            Stmt::Export(inner) => inner.value.declared_names(),
            _ => Vec::new(),
        }
    }
}

/// A source file handed to the expansion driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Directory containing the file, used to resolve relative paths.
    pub fn dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.name)
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default()
    }

    /// Text covered by `span`, empty for synthetic spans.
    pub fn slice(&self, span: Span) -> &str {
        if span.is_dummy() {
            return "";
        }
        self.text.get(span.start..span.end).unwrap_or("")
    }
}
