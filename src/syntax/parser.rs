//! Recursive-descent parser for the host language subset.
//!
//! Produces the closed AST in `crate::ast`. Type annotations are captured as
//! source text by a bracket-balancing scanner and never interpreted. Arrow
//! functions and explicit call type arguments are recognised by speculative
//! parsing with backtracking.
//!
//! All errors are `WeaveError::Parse` values carrying the offending span.

use crate::ast::{
    ArrayPatternElem, Arrow, ArrowBody, ClassDecl, ClassMember, Decorator, ExportSpecifier, Expr,
    ExprNode, ForHead, ForInit, Function, ImportDecl, ImportSpecifier, MemberKind, MemberNode,
    MethodKind, Module, ObjectPatternProp, Param, Pattern, Prop, PropKey, Stmt, StmtNode,
    SwitchCase, Template, TypeAlias, VarDecl, VarDeclarator, VarKind, WithSpan,
};
use crate::syntax::lexer::{lex, template_part_text};
use crate::syntax::token::{Token, TokenKind};
use crate::{err_ctx, Span, WeaveError};

type PResult<T> = Result<T, WeaveError>;

/// Keywords that, after a line break, always begin a new statement.
const STATEMENT_KEYWORDS: &[&str] = &[
    "const", "let", "var", "function", "class", "export", "import", "return", "if", "for",
    "while", "do", "try", "throw", "switch", "type", "interface", "enum", "declare", "abstract",
    "break", "continue", "namespace",
];

const CLASS_MODIFIERS: &[&str] = &[
    "public", "private", "protected", "static", "readonly", "abstract", "override", "declare",
    "accessor",
];

const PARAM_MODIFIERS: &[&str] = &["public", "private", "protected", "readonly", "override"];

const ASSIGN_OPS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "**=", "<<=", "&=", "|=", "^=", "&&=", "||=", "??=",
];

/// Parses a whole module.
pub fn parse_module(source: &str) -> PResult<Module> {
    let mut parser = Parser::new(source);
    let body = parser.parse_statement_list(false)?;
    Ok(Module { body })
}

/// Parses a statement list, as produced by macros or read back from the cache.
pub fn parse_statements(source: &str) -> PResult<Vec<StmtNode>> {
    Ok(parse_module(source)?.body)
}

/// Parses a single expression; the whole input must be consumed.
pub fn parse_expression(source: &str) -> PResult<ExprNode> {
    let mut parser = Parser::new(source);
    let expr = parser.parse_expression()?;
    if !parser.at_end() {
        return Err(parser.unexpected("end of expression"));
    }
    Ok(expr)
}

/// Parses generated text whose nodes should all carry `span`, the position of
/// the invocation the text was produced for.
pub fn parse_expression_at(source: &str, span: Span) -> PResult<ExprNode> {
    let mut parser = Parser::new(source).with_node_span(span);
    let expr = parser.parse_expression()?;
    if !parser.at_end() {
        return Err(parser.unexpected("end of expression"));
    }
    Ok(expr)
}

/// Statement-list counterpart of [`parse_expression_at`].
pub fn parse_statements_at(source: &str, span: Span) -> PResult<Vec<StmtNode>> {
    let mut parser = Parser::new(source).with_node_span(span);
    parser.parse_statement_list(false)
}

#[derive(Clone, Copy, Default)]
struct TypeStop {
    /// Stop at `=>` (arrow return types).
    arrow: bool,
    /// Stop at `?` and `:` (`as` assertions inside conditionals).
    colon: bool,
}

pub struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    no_in: bool,
    node_span: Option<Span>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            tokens: lex(source),
            pos: 0,
            no_in: false,
            node_span: None,
        }
    }

    /// Every node produced gets `span` instead of its position in `source`.
    pub fn with_node_span(mut self, span: Span) -> Self {
        self.node_span = Some(span);
        self
    }

    // ========================================================================
    // TOKEN HELPERS
    // ========================================================================

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn is_punct(&self, p: &str) -> bool {
        self.peek().is_some_and(|t| t.is_punct(p))
    }

    fn is_punct_at(&self, n: usize, p: &str) -> bool {
        self.peek_at(n).is_some_and(|t| t.is_punct(p))
    }

    fn is_ident(&self, kw: &str) -> bool {
        self.peek().is_some_and(|t| t.is_ident(kw))
    }

    fn is_ident_at(&self, n: usize, kw: &str) -> bool {
        self.peek_at(n).is_some_and(|t| t.is_ident(kw))
    }

    fn is_kind(&self, kind: TokenKind) -> bool {
        self.peek().is_some_and(|t| t.kind == kind)
    }

    fn is_kind_at(&self, n: usize, kind: TokenKind) -> bool {
        self.peek_at(n).is_some_and(|t| t.kind == kind)
    }

    fn bump(&mut self) -> PResult<Token> {
        match self.tokens.get(self.pos) {
            Some(t) => {
                self.pos += 1;
                Ok(t.clone())
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_ident(&mut self, kw: &str) -> bool {
        if self.is_ident(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> PResult<Token> {
        if self.is_punct(p) {
            self.bump()
        } else {
            Err(self.unexpected(&format!("'{}'", p)))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> PResult<Token> {
        if self.is_ident(kw) {
            self.bump()
        } else {
            Err(self.unexpected(&format!("'{}'", kw)))
        }
    }

    fn expect_name(&mut self) -> PResult<String> {
        if self.is_kind(TokenKind::Ident) {
            Ok(self.bump()?.text)
        } else {
            Err(self.unexpected("an identifier"))
        }
    }

    fn current_span(&self) -> Span {
        match self.peek() {
            Some(t) => t.span(),
            None => Span::new(self.source.len(), self.source.len()),
        }
    }

    fn start_pos(&self) -> usize {
        self.peek().map(|t| t.start).unwrap_or(self.source.len())
    }

    fn last_end(&self) -> usize {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].end
        }
    }

    fn span_from(&self, start: usize) -> Span {
        if let Some(span) = self.node_span {
            return span;
        }
        Span::new(start, self.last_end().max(start))
    }

    fn newline_before_at(&self, idx: usize) -> bool {
        if idx == 0 || idx >= self.tokens.len() {
            return false;
        }
        let gap = &self.source[self.tokens[idx - 1].end..self.tokens[idx].start];
        gap.contains('\n')
    }

    fn newline_before(&self) -> bool {
        self.newline_before_at(self.pos)
    }

    fn adjacent(&self, a: usize, b: usize) -> bool {
        match (self.tokens.get(a), self.tokens.get(b)) {
            (Some(x), Some(y)) => x.end == y.start,
            _ => false,
        }
    }

    fn error(&self, msg: impl Into<String>) -> WeaveError {
        err_ctx!(Parse, msg.into(), self.current_span())
    }

    fn unexpected(&self, expected: &str) -> WeaveError {
        let found = self
            .peek()
            .map(|t| format!("'{}'", t.text))
            .unwrap_or_else(|| "end of input".to_string());
        self.error(format!("expected {} but found {}", expected, found))
    }

    fn consume_semicolon(&mut self) -> PResult<()> {
        if self.eat_punct(";") || self.at_end() || self.is_punct("}") || self.newline_before() {
            return Ok(());
        }
        Err(self.unexpected("';'"))
    }

    /// Index of the token closing the bracket opened at `open`.
    fn matching_close(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        for (i, t) in self.tokens.iter().enumerate().skip(open) {
            if t.kind != TokenKind::Punct {
                continue;
            }
            match t.text.as_str() {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn text_between(&self, first: usize, last_exclusive: usize) -> String {
        if first >= last_exclusive {
            return String::new();
        }
        let start = self.tokens[first].start;
        let end = self.tokens[last_exclusive - 1].end;
        self.source[start..end].to_string()
    }

    // ========================================================================
    // TYPE TEXT
    // ========================================================================

    fn scan_type(&mut self, stop: TypeStop) -> PResult<String> {
        let first = self.pos;
        let mut depth = 0usize;
        let mut expect_operand = true;
        while let Some(t) = self.peek() {
            if depth == 0 {
                if t.kind == TokenKind::Punct {
                    let stop_here = match t.text.as_str() {
                        "," | ")" | "]" | "}" | ";" | "=" | ">" => true,
                        "=>" => stop.arrow,
                        "{" => !expect_operand,
                        ":" | "?" => stop.colon,
                        _ => false,
                    };
                    if stop_here {
                        break;
                    }
                }
                if self.pos > first && self.newline_before() && !expect_operand {
                    break;
                }
            }
            if t.kind == TokenKind::Punct {
                match t.text.as_str() {
                    "(" | "[" | "{" | "<" => depth += 1,
                    ")" | "]" | "}" | ">" => depth = depth.saturating_sub(1),
                    _ => {}
                }
            }
            expect_operand = match t.kind {
                TokenKind::Punct => matches!(
                    t.text.as_str(),
                    "|" | "&" | "=>" | ":" | "?" | "," | "<" | "(" | "[" | "{" | "..." | "."
                ),
                TokenKind::Ident => matches!(
                    t.text.as_str(),
                    "keyof" | "typeof" | "extends" | "infer" | "readonly" | "new" | "is"
                        | "asserts" | "unique" | "in" | "as"
                ),
                _ => false,
            };
            self.pos += 1;
        }
        if self.pos == first {
            return Err(self.unexpected("a type"));
        }
        Ok(self.text_between(first, self.pos))
    }

    /// Scans a balanced `<...>` group and returns its text, brackets included.
    fn scan_angle_group(&mut self, strict: bool) -> PResult<String> {
        let first = self.pos;
        self.expect_punct("<")?;
        let mut depth = 1usize;
        while depth > 0 {
            let t = self.bump()?;
            if t.kind != TokenKind::Punct {
                continue;
            }
            match t.text.as_str() {
                "<" | "(" | "[" | "{" => depth += 1,
                ">" | ")" | "]" | "}" => depth -= 1,
                "&&" | "||" | "==" | "===" | "!=" | "!==" | "+" | "-" | "*" | "/" | "%" | "!"
                | "=" | "<=" | "<<" | "++" | "--"
                    if strict =>
                {
                    return Err(self.error("not a type argument list"));
                }
                ";" if strict && depth == 1 => {
                    return Err(self.error("not a type argument list"));
                }
                _ => {}
            }
        }
        Ok(self.text_between(first, self.pos))
    }

    /// Speculatively parses call type arguments `<...>` followed by `(` or a template.
    fn try_call_type_args(&mut self) -> Option<String> {
        let save = self.pos;
        match self.scan_angle_group(true) {
            Ok(text)
                if self.is_punct("(")
                    || self.is_kind(TokenKind::NoSubstitutionTemplate)
                    || self.is_kind(TokenKind::TemplateHead) =>
            {
                Some(text)
            }
            _ => {
                self.pos = save;
                None
            }
        }
    }

    // ========================================================================
    // STATEMENTS
    // ========================================================================

    fn parse_statement_list(&mut self, in_block: bool) -> PResult<Vec<StmtNode>> {
        let mut out = Vec::new();
        loop {
            if self.at_end() {
                if in_block {
                    return Err(self.unexpected("'}'"));
                }
                break;
            }
            if in_block && self.is_punct("}") {
                break;
            }
            out.push(self.parse_statement()?);
        }
        Ok(out)
    }

    fn parse_block_body(&mut self) -> PResult<Vec<StmtNode>> {
        self.expect_punct("{")?;
        let body = self.parse_statement_list(true)?;
        self.expect_punct("}")?;
        Ok(body)
    }

    pub fn parse_statement(&mut self) -> PResult<StmtNode> {
        let start = self.start_pos();
        let stmt = self.parse_statement_kind(start)?;
        Ok(WithSpan::new(stmt, self.span_from(start)))
    }

    fn parse_statement_kind(&mut self, start: usize) -> PResult<Stmt> {
        let Some(tok) = self.peek().cloned() else {
            return Err(self.unexpected("a statement"));
        };

        if tok.kind == TokenKind::Punct {
            match tok.text.as_str() {
                ";" => {
                    self.pos += 1;
                    return Ok(Stmt::Empty);
                }
                "{" => return Ok(Stmt::Block(self.parse_block_body()?)),
                "@" => {
                    let decorators = self.parse_decorators()?;
                    return self.parse_decorated(decorators, start);
                }
                _ => {}
            }
        }

        if tok.kind != TokenKind::Ident {
            return self.parse_expression_statement();
        }

        if self.is_punct_at(1, ":") {
            let label = self.bump()?.text;
            self.bump()?;
            let body = self.parse_statement()?;
            return Ok(Stmt::Labeled {
                label,
                body: Box::new(body),
            });
        }

        let word = tok.text;
        match word.as_str() {
            "import" if !self.is_punct_at(1, "(") && !self.is_punct_at(1, ".") => {
                self.parse_import(start)
            }
            "export" => self.parse_export(Vec::new(), start),
            "const" if self.is_ident_at(1, "enum") => self.parse_verbatim(start),
            "const" | "var" => Ok(Stmt::Var(self.parse_var_decl(true)?)),
            "let" if self.starts_binding_at(1) => Ok(Stmt::Var(self.parse_var_decl(true)?)),
            "function" => Ok(Stmt::Function(self.parse_function(false, true)?)),
            "async" if self.is_ident_at(1, "function") && !self.newline_before_at(self.pos + 1) => {
                self.pos += 1;
                Ok(Stmt::Function(self.parse_function(true, true)?))
            }
            "class" => Ok(Stmt::Class(self.parse_class(Vec::new(), Vec::new(), true)?)),
            "abstract" if self.is_ident_at(1, "class") => {
                self.pos += 1;
                Ok(Stmt::Class(
                    self.parse_class(Vec::new(), vec!["abstract".into()], true)?,
                ))
            }
            "type" if self.is_kind_at(1, TokenKind::Ident) && !self.newline_before_at(self.pos + 1) => {
                self.parse_type_alias(false)
            }
            "interface" | "enum" if self.is_kind_at(1, TokenKind::Ident) => self.parse_verbatim(start),
            "declare" | "namespace" | "module" | "global"
                if self.is_kind_at(1, TokenKind::Ident) || self.is_kind_at(1, TokenKind::String) =>
            {
                if word == "declare" && self.is_ident_at(1, "type") {
                    self.pos += 1;
                    return self.parse_type_alias(true);
                }
                self.parse_verbatim(start)
            }
            "return" => {
                self.pos += 1;
                let value = if self.at_end()
                    || self.is_punct(";")
                    || self.is_punct("}")
                    || self.newline_before()
                {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(value))
            }
            "if" => {
                self.pos += 1;
                self.expect_punct("(")?;
                let test = self.parse_expression()?;
                self.expect_punct(")")?;
                let cons = Box::new(self.parse_statement()?);
                let alt = if self.eat_ident("else") {
                    Some(Box::new(self.parse_statement()?))
                } else {
                    None
                };
                Ok(Stmt::If { test, cons, alt })
            }
            "for" => self.parse_for(),
            "while" => {
                self.pos += 1;
                self.expect_punct("(")?;
                let test = self.parse_expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.parse_statement()?);
                Ok(Stmt::While { test, body })
            }
            "do" => {
                self.pos += 1;
                let body = Box::new(self.parse_statement()?);
                self.expect_keyword("while")?;
                self.expect_punct("(")?;
                let test = self.parse_expression()?;
                self.expect_punct(")")?;
                self.eat_punct(";");
                Ok(Stmt::DoWhile { body, test })
            }
            "try" => self.parse_try(),
            "throw" => {
                self.pos += 1;
                let value = self.parse_expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(value))
            }
            "break" | "continue" => {
                self.pos += 1;
                let label = if self.is_kind(TokenKind::Ident) && !self.newline_before() {
                    Some(self.bump()?.text)
                } else {
                    None
                };
                self.consume_semicolon()?;
                Ok(if word == "break" {
                    Stmt::Break(label)
                } else {
                    Stmt::Continue(label)
                })
            }
            "switch" => self.parse_switch(),
            _ => self.parse_expression_statement(),
        }
    }

    fn starts_binding_at(&self, n: usize) -> bool {
        self.is_kind_at(n, TokenKind::Ident) || self.is_punct_at(n, "{") || self.is_punct_at(n, "[")
    }

    fn parse_expression_statement(&mut self) -> PResult<Stmt> {
        let expr = self.parse_expression()?;
        self.consume_semicolon()?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_decorated(&mut self, decorators: Vec<Decorator>, start: usize) -> PResult<Stmt> {
        if self.is_ident("export") {
            return self.parse_export(decorators, start);
        }
        let mut modifiers = Vec::new();
        if self.eat_ident("abstract") {
            modifiers.push("abstract".to_string());
        }
        if self.is_ident("class") {
            return Ok(Stmt::Class(self.parse_class(decorators, modifiers, true)?));
        }
        Err(self.unexpected("a class declaration after decorators"))
    }

    fn parse_verbatim(&mut self, start: usize) -> PResult<Stmt> {
        let first = self.pos;
        let mut depth = 0usize;
        while let Some(t) = self.peek() {
            if depth == 0 && self.pos > first {
                if t.is_punct(";") {
                    self.pos += 1;
                    break;
                }
                if t.is_punct("}") {
                    break;
                }
                if self.newline_before()
                    && t.kind == TokenKind::Ident
                    && STATEMENT_KEYWORDS.contains(&t.text.as_str())
                {
                    break;
                }
            }
            let mut closed_body = false;
            if t.kind == TokenKind::Punct {
                match t.text.as_str() {
                    "{" | "(" | "[" | "<" => depth += 1,
                    "}" | ")" | "]" | ">" => {
                        depth = depth.saturating_sub(1);
                        closed_body = depth == 0 && t.text == "}";
                    }
                    _ => {}
                }
            }
            self.pos += 1;
            if closed_body {
                self.eat_punct(";");
                break;
            }
        }
        let end = self.last_end();
        Ok(Stmt::Verbatim(self.source[start..end].to_string()))
    }

    fn parse_type_alias(&mut self, declare: bool) -> PResult<Stmt> {
        self.expect_keyword("type")?;
        let name = self.expect_name()?;
        let type_params = if self.is_punct("<") {
            Some(self.scan_angle_group(false)?)
        } else {
            None
        };
        self.expect_punct("=")?;
        let ty = self.scan_type(TypeStop::default())?;
        self.consume_semicolon()?;
        Ok(Stmt::TypeAlias(TypeAlias {
            name,
            type_params,
            ty,
            declare,
        }))
    }

    fn parse_var_decl(&mut self, with_semicolon: bool) -> PResult<VarDecl> {
        let kind = match self.bump()?.text.as_str() {
            "const" => VarKind::Const,
            "let" => VarKind::Let,
            _ => VarKind::Var,
        };
        let mut decls = Vec::new();
        loop {
            let pattern = self.parse_binding_pattern()?;
            let definite = self.eat_punct("!");
            let ty = if self.eat_punct(":") {
                Some(self.scan_type(TypeStop::default())?)
            } else {
                None
            };
            let init = if self.eat_punct("=") {
                Some(self.parse_assign()?)
            } else {
                None
            };
            decls.push(VarDeclarator {
                pattern,
                ty,
                definite,
                init,
            });
            if !self.eat_punct(",") {
                break;
            }
        }
        if with_semicolon {
            self.consume_semicolon()?;
        }
        Ok(VarDecl {
            kind,
            declare: false,
            decls,
        })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        self.expect_keyword("for")?;
        let is_await = self.eat_ident("await");
        self.expect_punct("(")?;

        let mut init = None;
        if !self.is_punct(";") {
            let is_decl = self.is_ident("const")
                || self.is_ident("var")
                || (self.is_ident("let") && self.starts_binding_at(1));
            self.no_in = true;
            let parsed = if is_decl {
                self.parse_var_decl(false).map(ForInit::Var)
            } else {
                self.parse_expression().map(ForInit::Expr)
            };
            self.no_in = false;
            let parsed = parsed?;

            if self.is_ident("of") || self.is_ident("in") {
                let of = self.bump()?.text == "of";
                let head = match parsed {
                    ForInit::Var(mut decl) if decl.decls.len() == 1 => {
                        let d = decl.decls.remove(0);
                        ForHead::Var(decl.kind, d.pattern)
                    }
                    ForInit::Var(_) => {
                        return Err(self.error("for-in/of declares exactly one binding"));
                    }
                    ForInit::Expr(e) => ForHead::Pattern(expr_to_pattern(e)),
                };
                let right = if of { self.parse_assign()? } else { self.parse_expression()? };
                self.expect_punct(")")?;
                let body = Box::new(self.parse_statement()?);
                return Ok(Stmt::ForIn {
                    head,
                    right,
                    body,
                    of,
                    is_await,
                });
            }
            init = Some(parsed);
        }
        self.expect_punct(";")?;
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.parse_statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn parse_try(&mut self) -> PResult<Stmt> {
        self.expect_keyword("try")?;
        let block = self.parse_block_body()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_ident("catch") {
            if self.eat_punct("(") {
                param = Some(self.parse_binding_pattern()?);
                if self.eat_punct(":") {
                    self.scan_type(TypeStop::default())?;
                }
                self.expect_punct(")")?;
            }
            handler = Some(self.parse_block_body()?);
        }
        let finalizer = if self.eat_ident("finally") {
            Some(self.parse_block_body()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.unexpected("'catch' or 'finally'"));
        }
        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    fn parse_switch(&mut self) -> PResult<Stmt> {
        self.expect_keyword("switch")?;
        self.expect_punct("(")?;
        let disc = self.parse_expression()?;
        self.expect_punct(")")?;
        self.expect_punct("{")?;
        let mut cases = Vec::new();
        while !self.eat_punct("}") {
            let test = if self.eat_ident("case") {
                Some(self.parse_expression()?)
            } else {
                self.expect_keyword("default")?;
                None
            };
            self.expect_punct(":")?;
            let mut body = Vec::new();
            while !(self.is_ident("case") || self.is_ident("default") || self.is_punct("}")) {
                if self.at_end() {
                    return Err(self.unexpected("'}'"));
                }
                body.push(self.parse_statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
        Ok(Stmt::Switch { disc, cases })
    }

    // ------------------------------------------------------------------
    // Modules
    // ------------------------------------------------------------------

    fn parse_string_literal(&mut self) -> PResult<String> {
        if self.is_kind(TokenKind::String) {
            Ok(cook_string(&self.bump()?.text))
        } else {
            Err(self.unexpected("a string literal"))
        }
    }

    fn parse_import(&mut self, start: usize) -> PResult<Stmt> {
        self.expect_keyword("import")?;
        if self.is_kind(TokenKind::String) {
            let source = self.parse_string_literal()?;
            self.skip_import_attributes()?;
            self.consume_semicolon()?;
            return Ok(Stmt::Import(ImportDecl {
                default: None,
                namespace: None,
                named: Vec::new(),
                source,
                type_only: false,
                has_clause: false,
            }));
        }
        // `import x = require("y")`
        if self.is_kind(TokenKind::Ident) && self.is_punct_at(1, "=") {
            return self.parse_verbatim(start);
        }

        let type_only = self.is_ident("type")
            && (self.is_punct_at(1, "{")
                || self.is_punct_at(1, "*")
                || (self.is_kind_at(1, TokenKind::Ident) && !self.is_ident_at(1, "from")));
        if type_only {
            self.pos += 1;
        }

        let mut default = None;
        let mut namespace = None;
        let mut named = Vec::new();

        if self.is_kind(TokenKind::Ident) {
            default = Some(self.bump()?.text);
            self.eat_punct(",");
        }
        if self.eat_punct("*") {
            self.expect_keyword("as")?;
            namespace = Some(self.expect_name()?);
        } else if self.eat_punct("{") {
            while !self.eat_punct("}") {
                let spec_type = self.is_ident("type")
                    && self.is_kind_at(1, TokenKind::Ident)
                    && !self.is_punct_at(1, ",");
                if spec_type {
                    self.pos += 1;
                }
                let imported = if self.is_kind(TokenKind::String) {
                    self.parse_string_literal()?
                } else {
                    self.expect_name()?
                };
                let local = if self.eat_ident("as") {
                    self.expect_name()?
                } else {
                    imported.clone()
                };
                named.push(ImportSpecifier {
                    imported,
                    local,
                    type_only: spec_type,
                });
                if !self.eat_punct(",") {
                    self.expect_punct("}")?;
                    break;
                }
            }
        }
        self.expect_keyword("from")?;
        let source = self.parse_string_literal()?;
        self.skip_import_attributes()?;
        self.consume_semicolon()?;
        Ok(Stmt::Import(ImportDecl {
            default,
            namespace,
            named,
            source,
            type_only,
            has_clause: true,
        }))
    }

    fn skip_import_attributes(&mut self) -> PResult<()> {
        if (self.is_ident("with") || self.is_ident("assert")) && self.is_punct_at(1, "{") {
            self.pos += 1;
            if let Some(close) = self.matching_close(self.pos) {
                self.pos = close + 1;
            }
        }
        Ok(())
    }

    fn parse_export(&mut self, decorators: Vec<Decorator>, start: usize) -> PResult<Stmt> {
        self.expect_keyword("export")?;

        if self.eat_ident("default") {
            let decl_start = self.start_pos();
            if self.is_ident("interface") {
                return self.parse_verbatim(start);
            }
            let mut decorators = decorators;
            if self.is_punct("@") {
                decorators.extend(self.parse_decorators()?);
            }
            let expr = if self.is_ident("class") || self.is_ident("abstract") {
                let mut modifiers = Vec::new();
                if self.eat_ident("abstract") {
                    modifiers.push("abstract".to_string());
                }
                let class = self.parse_class(decorators, modifiers, false)?;
                WithSpan::new(Expr::Class(Box::new(class)), self.span_from(decl_start))
            } else if self.is_ident("function")
                || (self.is_ident("async") && self.is_ident_at(1, "function"))
            {
                let is_async = self.eat_ident("async");
                let func = self.parse_function(is_async, false)?;
                WithSpan::new(Expr::Function(Box::new(func)), self.span_from(decl_start))
            } else {
                let e = self.parse_assign()?;
                self.consume_semicolon()?;
                e
            };
            return Ok(Stmt::ExportDefault(expr));
        }

        if self.is_punct("*") {
            self.pos += 1;
            let alias = if self.eat_ident("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            self.expect_keyword("from")?;
            let source = self.parse_string_literal()?;
            self.consume_semicolon()?;
            return Ok(Stmt::ExportAll { alias, source });
        }

        let type_only = self.is_ident("type") && self.is_punct_at(1, "{");
        if type_only {
            self.pos += 1;
        }
        if self.eat_punct("{") {
            let mut specifiers = Vec::new();
            while !self.eat_punct("}") {
                if self.is_ident("type") && self.is_kind_at(1, TokenKind::Ident) {
                    self.pos += 1;
                }
                let local = self.expect_name()?;
                let exported = if self.eat_ident("as") {
                    self.expect_name()?
                } else {
                    local.clone()
                };
                specifiers.push(ExportSpecifier { local, exported });
                if !self.eat_punct(",") {
                    self.expect_punct("}")?;
                    break;
                }
            }
            let source = if self.eat_ident("from") {
                Some(self.parse_string_literal()?)
            } else {
                None
            };
            self.consume_semicolon()?;
            return Ok(Stmt::ExportNamed {
                specifiers,
                source,
                type_only,
            });
        }

        if self.is_punct("=") {
            return self.parse_verbatim(start);
        }

        let decl_start = self.start_pos();
        let mut decorators = decorators;
        if self.is_punct("@") {
            decorators.extend(self.parse_decorators()?);
        }
        let inner = if !decorators.is_empty() {
            let mut modifiers = Vec::new();
            if self.eat_ident("abstract") {
                modifiers.push("abstract".to_string());
            }
            Stmt::Class(self.parse_class(decorators, modifiers, true)?)
        } else {
            self.parse_statement_kind(decl_start)?
        };
        match &inner {
            Stmt::Var(_)
            | Stmt::Function(_)
            | Stmt::Class(_)
            | Stmt::TypeAlias(_)
            | Stmt::Verbatim(_) => {}
            _ => return Err(err_ctx!(Parse, "expected a declaration after 'export'", self.span_from(decl_start))),
        }
        Ok(Stmt::Export(Box::new(WithSpan::new(
            inner,
            self.span_from(decl_start),
        ))))
    }

    // ------------------------------------------------------------------
    // Functions and classes
    // ------------------------------------------------------------------

    fn parse_function(&mut self, is_async: bool, require_name: bool) -> PResult<Function> {
        self.expect_keyword("function")?;
        let is_generator = self.eat_punct("*");
        let name = if self.is_kind(TokenKind::Ident) && !self.is_punct("(") {
            Some(self.bump()?.text)
        } else if require_name {
            return Err(self.unexpected("a function name"));
        } else {
            None
        };
        self.parse_function_rest(name, is_async, is_generator, true)
    }

    fn parse_function_rest(
        &mut self,
        name: Option<String>,
        is_async: bool,
        is_generator: bool,
        allow_signature: bool,
    ) -> PResult<Function> {
        let type_params = if self.is_punct("<") {
            Some(self.scan_angle_group(false)?)
        } else {
            None
        };
        let params = self.parse_params()?;
        let return_type = if self.eat_punct(":") {
            Some(self.scan_type(TypeStop::default())?)
        } else {
            None
        };
        let body = if self.is_punct("{") {
            Some(self.parse_block_body()?)
        } else if allow_signature {
            self.consume_semicolon()?;
            None
        } else {
            return Err(self.unexpected("'{'"));
        };
        Ok(Function {
            name,
            is_async,
            is_generator,
            type_params,
            params,
            return_type,
            body,
        })
    }

    fn parse_params(&mut self) -> PResult<Vec<Param>> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.is_punct(")") {
            let decorators = if self.is_punct("@") {
                self.parse_decorators()?
            } else {
                Vec::new()
            };
            let mut modifiers = Vec::new();
            while self.peek().is_some_and(|t| {
                t.kind == TokenKind::Ident && PARAM_MODIFIERS.contains(&t.text.as_str())
            }) && (self.is_kind_at(1, TokenKind::Ident)
                || self.is_punct_at(1, "{")
                || self.is_punct_at(1, "["))
            {
                modifiers.push(self.bump()?.text);
            }
            let rest = self.eat_punct("...");
            let pattern = self.parse_binding_pattern()?;
            let optional = self.eat_punct("?");
            let ty = if self.eat_punct(":") {
                Some(self.scan_type(TypeStop::default())?)
            } else {
                None
            };
            let default = if self.eat_punct("=") {
                Some(self.parse_assign()?)
            } else {
                None
            };
            params.push(Param {
                pattern,
                ty,
                default,
                rest,
                optional,
                modifiers,
                decorators,
            });
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    fn parse_binding_pattern(&mut self) -> PResult<Pattern> {
        if self.eat_punct("{") {
            let mut props = Vec::new();
            let mut rest = None;
            while !self.eat_punct("}") {
                if self.eat_punct("...") {
                    rest = Some(Box::new(self.parse_binding_pattern()?));
                } else {
                    let key = self.parse_prop_key()?;
                    let (value, shorthand) = if self.eat_punct(":") {
                        (self.parse_binding_pattern()?, false)
                    } else {
                        match &key {
                            PropKey::Ident(n) => (Pattern::Ident(n.clone()), true),
                            _ => return Err(self.unexpected("':'")),
                        }
                    };
                    let default = if self.eat_punct("=") {
                        Some(self.parse_assign()?)
                    } else {
                        None
                    };
                    props.push(ObjectPatternProp {
                        key,
                        value,
                        default,
                        shorthand,
                    });
                }
                if !self.eat_punct(",") {
                    self.expect_punct("}")?;
                    break;
                }
            }
            return Ok(Pattern::Object { props, rest });
        }
        if self.eat_punct("[") {
            let mut elems = Vec::new();
            let mut rest = None;
            while !self.eat_punct("]") {
                if self.eat_punct(",") {
                    elems.push(None);
                    continue;
                }
                if self.eat_punct("...") {
                    rest = Some(Box::new(self.parse_binding_pattern()?));
                } else {
                    let pattern = self.parse_binding_pattern()?;
                    let default = if self.eat_punct("=") {
                        Some(self.parse_assign()?)
                    } else {
                        None
                    };
                    elems.push(Some(ArrayPatternElem { pattern, default }));
                }
                if !self.eat_punct(",") {
                    self.expect_punct("]")?;
                    break;
                }
            }
            return Ok(Pattern::Array { elems, rest });
        }
        Ok(Pattern::Ident(self.expect_name()?))
    }

    fn parse_decorators(&mut self) -> PResult<Vec<Decorator>> {
        let mut out = Vec::new();
        while self.is_punct("@") {
            let start = self.start_pos();
            self.pos += 1;
            let expr_start = self.start_pos();
            let name = self.expect_name()?;
            let mut expr = WithSpan::new(Expr::Ident(name), self.span_from(expr_start));
            while self.is_punct(".") {
                self.pos += 1;
                let property = self.expect_name()?;
                expr = WithSpan::new(
                    Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: false,
                    },
                    self.span_from(expr_start),
                );
            }
            if self.is_punct("(") {
                let args = self.parse_arguments()?;
                expr = WithSpan::new(
                    Expr::Call {
                        callee: Box::new(expr),
                        type_args: None,
                        args,
                        optional: false,
                    },
                    self.span_from(expr_start),
                );
            }
            out.push(Decorator {
                expr,
                span: self.span_from(start),
            });
        }
        Ok(out)
    }

    fn parse_class(
        &mut self,
        decorators: Vec<Decorator>,
        modifiers: Vec<String>,
        require_name: bool,
    ) -> PResult<ClassDecl> {
        self.expect_keyword("class")?;
        let name = if self.is_kind(TokenKind::Ident)
            && !self.is_ident("extends")
            && !self.is_ident("implements")
        {
            Some(self.bump()?.text)
        } else if require_name {
            return Err(self.unexpected("a class name"));
        } else {
            None
        };
        let type_params = if self.is_punct("<") {
            Some(self.scan_angle_group(false)?)
        } else {
            None
        };
        let mut extends = None;
        let mut super_type_args = None;
        if self.eat_ident("extends") {
            extends = Some(self.parse_lhs(false)?);
            if self.is_punct("<") {
                super_type_args = Some(self.scan_angle_group(false)?);
            }
        }
        let mut implements = None;
        if self.eat_ident("implements") {
            let first = self.pos;
            let mut depth = 0usize;
            while let Some(t) = self.peek() {
                if depth == 0 && t.is_punct("{") {
                    break;
                }
                if t.kind == TokenKind::Punct {
                    match t.text.as_str() {
                        "<" | "(" | "[" | "{" => depth += 1,
                        ">" | ")" | "]" | "}" => depth = depth.saturating_sub(1),
                        _ => {}
                    }
                }
                self.pos += 1;
            }
            implements = Some(self.text_between(first, self.pos));
        }
        self.expect_punct("{")?;
        let mut members = Vec::new();
        while !self.eat_punct("}") {
            if self.at_end() {
                return Err(self.unexpected("'}'"));
            }
            if self.eat_punct(";") {
                continue;
            }
            members.push(self.parse_class_member()?);
        }
        Ok(ClassDecl {
            name,
            decorators,
            modifiers,
            type_params,
            extends,
            super_type_args,
            implements,
            members,
        })
    }

    fn parse_class_member(&mut self) -> PResult<MemberNode> {
        let start = self.start_pos();
        let decorators = if self.is_punct("@") {
            self.parse_decorators()?
        } else {
            Vec::new()
        };
        let mut modifiers = Vec::new();
        loop {
            let Some(t) = self.peek() else { break };
            if t.kind != TokenKind::Ident || !CLASS_MODIFIERS.contains(&t.text.as_str()) {
                break;
            }
            if t.text == "static" && self.is_punct_at(1, "{") {
                self.pos += 1;
                let body = self.parse_block_body()?;
                return Ok(WithSpan::new(
                    ClassMember {
                        decorators,
                        modifiers,
                        kind: MemberKind::StaticBlock(body),
                    },
                    self.span_from(start),
                ));
            }
            let next_is_name = self.peek_at(1).is_some_and(|n| {
                matches!(
                    n.kind,
                    TokenKind::Ident | TokenKind::String | TokenKind::Number | TokenKind::PrivateName
                ) || n.is_punct("[")
                    || n.is_punct("*")
            });
            if !next_is_name {
                break;
            }
            modifiers.push(self.bump()?.text);
        }

        // Index signature: `[key: string]: T;`
        if self.is_punct("[") && self.is_kind_at(1, TokenKind::Ident) && self.is_punct_at(2, ":") {
            let first = self.pos;
            if let Some(close) = self.matching_close(self.pos) {
                self.pos = close + 1;
            }
            if self.eat_punct(":") {
                self.scan_type(TypeStop::default())?;
            }
            let text = self.text_between(first, self.pos);
            self.consume_semicolon()?;
            return Ok(WithSpan::new(
                ClassMember {
                    decorators,
                    modifiers,
                    kind: MemberKind::Verbatim(text),
                },
                self.span_from(start),
            ));
        }

        if self.is_ident("constructor") && self.is_punct_at(1, "(") {
            self.pos += 1;
            let func = self.parse_function_rest(None, false, false, true)?;
            return Ok(WithSpan::new(
                ClassMember {
                    decorators,
                    modifiers,
                    kind: MemberKind::Constructor(func),
                },
                self.span_from(start),
            ));
        }

        let (method_kind, is_async, is_generator) = self.parse_method_prefix()?;
        let key = self.parse_prop_key()?;
        let optional = self.eat_punct("?");
        let definite = self.eat_punct("!");

        let kind = if self.is_punct("(") || self.is_punct("<") || method_kind.is_some() || is_async || is_generator {
            let func = self.parse_function_rest(None, is_async, is_generator, true)?;
            MemberKind::Method {
                key,
                kind: method_kind.unwrap_or(MethodKind::Method),
                optional,
                func,
            }
        } else {
            let ty = if self.eat_punct(":") {
                Some(self.scan_type(TypeStop::default())?)
            } else {
                None
            };
            let value = if self.eat_punct("=") {
                Some(self.parse_assign()?)
            } else {
                None
            };
            self.consume_semicolon()?;
            MemberKind::Property {
                key,
                optional,
                definite,
                ty,
                value,
            }
        };
        Ok(WithSpan::new(
            ClassMember {
                decorators,
                modifiers,
                kind,
            },
            self.span_from(start),
        ))
    }

    /// Parses `get`/`set`/`async`/`*` before a method key.
    fn parse_method_prefix(&mut self) -> PResult<(Option<MethodKind>, bool, bool)> {
        let key_follows = |p: &Self, n: usize| {
            p.peek_at(n).is_some_and(|t| {
                matches!(
                    t.kind,
                    TokenKind::Ident | TokenKind::String | TokenKind::Number | TokenKind::PrivateName
                ) || t.is_punct("[")
                    || t.is_punct("*")
            })
        };
        if (self.is_ident("get") || self.is_ident("set")) && key_follows(self, 1) {
            let kind = if self.bump()?.text == "get" {
                MethodKind::Get
            } else {
                MethodKind::Set
            };
            return Ok((Some(kind), false, false));
        }
        let mut is_async = false;
        if self.is_ident("async") && key_follows(self, 1) && !self.newline_before_at(self.pos + 1) {
            self.pos += 1;
            is_async = true;
        }
        let is_generator = self.eat_punct("*");
        Ok((None, is_async, is_generator))
    }

    fn parse_prop_key(&mut self) -> PResult<PropKey> {
        let t = self.bump()?;
        match t.kind {
            TokenKind::Ident => Ok(PropKey::Ident(t.text)),
            TokenKind::String => Ok(PropKey::Str(cook_string(&t.text))),
            TokenKind::Number => Ok(PropKey::Number(t.text)),
            TokenKind::PrivateName => Ok(PropKey::Private(t.text[1..].to_string())),
            TokenKind::Punct if t.text == "[" => {
                let e = self.parse_assign()?;
                self.expect_punct("]")?;
                Ok(PropKey::Computed(Box::new(e)))
            }
            _ => {
                self.pos -= 1;
                Err(self.unexpected("a property name"))
            }
        }
    }

    // ========================================================================
    // EXPRESSIONS
    // ========================================================================

    pub fn parse_expression(&mut self) -> PResult<ExprNode> {
        let start = self.start_pos();
        let first = self.parse_assign()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            items.push(self.parse_assign()?);
        }
        Ok(WithSpan::new(Expr::Sequence(items), self.span_from(start)))
    }

    fn parse_assign(&mut self) -> PResult<ExprNode> {
        let start = self.start_pos();

        if self.looks_like_arrow() {
            if let Some(arrow) = self.try_arrow()? {
                return Ok(arrow);
            }
        }

        if self.is_ident("yield")
            && !self.is_punct_at(1, "=")
            && !self.is_punct_at(1, "=>")
            && !self.is_punct_at(1, ".")
        {
            self.pos += 1;
            let delegate = self.eat_punct("*");
            let has_arg = !(self.at_end()
                || self.newline_before()
                || [")", "]", "}", ",", ";", ":"].iter().any(|p| self.is_punct(p)));
            let arg = if has_arg {
                Some(Box::new(self.parse_assign()?))
            } else {
                None
            };
            return Ok(WithSpan::new(
                Expr::Yield { arg, delegate },
                self.span_from(start),
            ));
        }

        let target = self.parse_conditional()?;
        if let Some((op, n)) = self.peek_assign_op() {
            self.pos += n;
            let value = self.parse_assign()?;
            return Ok(WithSpan::new(
                Expr::Assign {
                    op,
                    target: Box::new(target),
                    value: Box::new(value),
                },
                self.span_from(start),
            ));
        }
        Ok(target)
    }

    fn peek_assign_op(&self) -> Option<(String, usize)> {
        let t = self.peek()?;
        if t.kind != TokenKind::Punct {
            return None;
        }
        if ASSIGN_OPS.contains(&t.text.as_str()) {
            return Some((t.text.clone(), 1));
        }
        if t.text == ">" {
            let (op, n) = self.combined_greater();
            if op.ends_with('=') && op.len() > 2 {
                return Some((op, n));
            }
        }
        None
    }

    /// Combines adjacent `>` tokens with a following `=` into one operator.
    fn combined_greater(&self) -> (String, usize) {
        let mut op = String::from(">");
        let mut n = 1;
        while n < 3
            && self.is_punct_at(n, ">")
            && self.adjacent(self.pos + n - 1, self.pos + n)
        {
            op.push('>');
            n += 1;
        }
        if self.is_punct_at(n, "=") && self.adjacent(self.pos + n - 1, self.pos + n) {
            op.push('=');
            n += 1;
        }
        (op, n)
    }

    fn looks_like_arrow(&self) -> bool {
        let Some(t) = self.peek() else { return false };
        match t.kind {
            TokenKind::Ident => {
                if self.is_punct_at(1, "=>") {
                    return true;
                }
                t.text == "async"
                    && !self.newline_before_at(self.pos + 1)
                    && ((self.is_kind_at(1, TokenKind::Ident) && self.is_punct_at(2, "=>"))
                        || self.is_punct_at(1, "(")
                        || self.is_punct_at(1, "<"))
            }
            TokenKind::Punct if t.text == "(" => match self.matching_close(self.pos) {
                Some(close) => self
                    .tokens
                    .get(close + 1)
                    .is_some_and(|n| n.is_punct("=>") || n.is_punct(":")),
                None => false,
            },
            TokenKind::Punct if t.text == "<" => true,
            _ => false,
        }
    }

    fn try_arrow(&mut self) -> PResult<Option<ExprNode>> {
        let save = self.pos;
        match self.parse_arrow() {
            Ok(e) => Ok(Some(e)),
            Err(_) => {
                self.pos = save;
                Ok(None)
            }
        }
    }

    fn parse_arrow(&mut self) -> PResult<ExprNode> {
        let start = self.start_pos();
        let is_async = if self.is_ident("async") && !self.is_punct_at(1, "=>") {
            self.pos += 1;
            true
        } else {
            false
        };
        let type_params = if self.is_punct("<") {
            Some(self.scan_angle_group(false)?)
        } else {
            None
        };
        let params = if self.is_kind(TokenKind::Ident) {
            vec![Param::named(self.bump()?.text)]
        } else {
            self.parse_params()?
        };
        let return_type = if self.eat_punct(":") {
            Some(self.scan_type(TypeStop {
                arrow: true,
                colon: false,
            })?)
        } else {
            None
        };
        if self.newline_before() {
            return Err(self.unexpected("'=>'"));
        }
        self.expect_punct("=>")?;
        let body = if self.is_punct("{") {
            ArrowBody::Block(self.parse_block_body()?)
        } else {
            let saved = self.no_in;
            let e = self.parse_assign();
            self.no_in = saved;
            ArrowBody::Expr(Box::new(e?))
        };
        Ok(WithSpan::new(
            Expr::Arrow(Box::new(Arrow {
                is_async,
                type_params,
                params,
                return_type,
                body,
            })),
            self.span_from(start),
        ))
    }

    fn parse_conditional(&mut self) -> PResult<ExprNode> {
        let start = self.start_pos();
        let test = self.parse_binary(0)?;
        if !self.is_punct("?") {
            return Ok(test);
        }
        self.pos += 1;
        let saved = self.no_in;
        self.no_in = false;
        let cons = self.parse_assign();
        self.no_in = saved;
        let cons = cons?;
        self.expect_punct(":")?;
        let alt = self.parse_assign()?;
        Ok(WithSpan::new(
            Expr::Conditional {
                test: Box::new(test),
                cons: Box::new(cons),
                alt: Box::new(alt),
            },
            self.span_from(start),
        ))
    }

    fn peek_binary_op(&self) -> Option<(String, u8, usize)> {
        let t = self.peek()?;
        let (op, n) = match t.kind {
            TokenKind::Punct if t.text == ">" => {
                let (op, n) = self.combined_greater();
                if op.ends_with('=') && op.len() > 2 {
                    return None;
                }
                (op, n)
            }
            TokenKind::Punct => (t.text.clone(), 1),
            TokenKind::Ident => match t.text.as_str() {
                "instanceof" => (t.text.clone(), 1),
                "in" if !self.no_in => (t.text.clone(), 1),
                "as" | "satisfies" if !self.newline_before() => (t.text.clone(), 1),
                _ => return None,
            },
            _ => return None,
        };
        binary_precedence(&op).map(|p| (op, p, n))
    }

    fn parse_binary(&mut self, min_prec: u8) -> PResult<ExprNode> {
        let start = self.start_pos();
        let mut left = self.parse_unary()?;
        while let Some((op, prec, n)) = self.peek_binary_op() {
            if prec < min_prec {
                break;
            }
            self.pos += n;
            if op == "as" || op == "satisfies" {
                let ty = self.scan_type(TypeStop {
                    arrow: false,
                    colon: true,
                })?;
                left = WithSpan::new(
                    Expr::TypeAssertion {
                        expr: Box::new(left),
                        keyword: op,
                        ty,
                    },
                    self.span_from(start),
                );
                continue;
            }
            let next_min = if op == "**" { prec } else { prec + 1 };
            let right = self.parse_binary(next_min)?;
            left = WithSpan::new(
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                self.span_from(start),
            );
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> PResult<ExprNode> {
        let start = self.start_pos();
        let Some(t) = self.peek().cloned() else {
            return Err(self.unexpected("an expression"));
        };
        let keyword_operand = |p: &Self| {
            p.peek_at(1).is_some_and(|n| {
                !(n.kind == TokenKind::Punct
                    && matches!(
                        n.text.as_str(),
                        ")" | ";" | "," | "=" | ":" | "]" | "}" | "=>" | "." | "?."
                    ))
            })
        };
        match (t.kind, t.text.as_str()) {
            (TokenKind::Punct, "!" | "-" | "+" | "~") => {
                let op = self.bump()?.text;
                let arg = self.parse_unary()?;
                Ok(WithSpan::new(
                    Expr::Unary {
                        op,
                        arg: Box::new(arg),
                    },
                    self.span_from(start),
                ))
            }
            (TokenKind::Punct, "++" | "--") => {
                let op = self.bump()?.text;
                let arg = self.parse_unary()?;
                Ok(WithSpan::new(
                    Expr::Update {
                        op,
                        prefix: true,
                        arg: Box::new(arg),
                    },
                    self.span_from(start),
                ))
            }
            (TokenKind::Ident, "typeof" | "void" | "delete") if keyword_operand(self) => {
                let op = self.bump()?.text;
                let arg = self.parse_unary()?;
                Ok(WithSpan::new(
                    Expr::Unary {
                        op,
                        arg: Box::new(arg),
                    },
                    self.span_from(start),
                ))
            }
            (TokenKind::Ident, "await") if keyword_operand(self) => {
                self.pos += 1;
                let arg = self.parse_unary()?;
                Ok(WithSpan::new(Expr::Await(Box::new(arg)), self.span_from(start)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> PResult<ExprNode> {
        let start = self.start_pos();
        let expr = self.parse_lhs(true)?;
        if (self.is_punct("++") || self.is_punct("--")) && !self.newline_before() {
            let op = self.bump()?.text;
            return Ok(WithSpan::new(
                Expr::Update {
                    op,
                    prefix: false,
                    arg: Box::new(expr),
                },
                self.span_from(start),
            ));
        }
        Ok(expr)
    }

    /// Member, call and tagged-template chains. With `allow_calls == false`
    /// only member accesses are consumed (class heritage clauses).
    fn parse_lhs(&mut self, allow_calls: bool) -> PResult<ExprNode> {
        let start = self.start_pos();
        let mut expr = if self.is_ident("new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        loop {
            if self.is_punct(".") {
                self.pos += 1;
                let t = self.bump()?;
                let property = match t.kind {
                    TokenKind::Ident => t.text,
                    TokenKind::PrivateName => t.text,
                    _ => {
                        self.pos -= 1;
                        return Err(self.unexpected("a property name"));
                    }
                };
                expr = WithSpan::new(
                    Expr::Member {
                        object: Box::new(expr),
                        property,
                        optional: false,
                    },
                    self.span_from(start),
                );
            } else if self.is_punct("?.") {
                self.pos += 1;
                if self.is_punct("(") {
                    let args = self.parse_arguments()?;
                    expr = WithSpan::new(
                        Expr::Call {
                            callee: Box::new(expr),
                            type_args: None,
                            args,
                            optional: true,
                        },
                        self.span_from(start),
                    );
                } else if self.eat_punct("[") {
                    let index = self.parse_expression()?;
                    self.expect_punct("]")?;
                    expr = WithSpan::new(
                        Expr::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                            optional: true,
                        },
                        self.span_from(start),
                    );
                } else {
                    let property = self.expect_name()?;
                    expr = WithSpan::new(
                        Expr::Member {
                            object: Box::new(expr),
                            property,
                            optional: true,
                        },
                        self.span_from(start),
                    );
                }
            } else if self.is_punct("[") {
                self.pos += 1;
                let saved = self.no_in;
                self.no_in = false;
                let index = self.parse_expression();
                self.no_in = saved;
                let index = index?;
                self.expect_punct("]")?;
                expr = WithSpan::new(
                    Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        optional: false,
                    },
                    self.span_from(start),
                );
            } else if allow_calls && self.is_punct("(") {
                let args = self.parse_arguments()?;
                expr = WithSpan::new(
                    Expr::Call {
                        callee: Box::new(expr),
                        type_args: None,
                        args,
                        optional: false,
                    },
                    self.span_from(start),
                );
            } else if allow_calls
                && (self.is_kind(TokenKind::NoSubstitutionTemplate)
                    || self.is_kind(TokenKind::TemplateHead))
            {
                let template = self.parse_template()?;
                expr = WithSpan::new(
                    Expr::TaggedTemplate {
                        tag: Box::new(expr),
                        type_args: None,
                        template,
                    },
                    self.span_from(start),
                );
            } else if self.is_punct("!") && !self.newline_before() {
                self.pos += 1;
                expr = WithSpan::new(Expr::NonNull(Box::new(expr)), self.span_from(start));
            } else if allow_calls && self.is_punct("<") {
                let Some(type_args) = self.try_call_type_args() else {
                    break;
                };
                if self.is_punct("(") {
                    let args = self.parse_arguments()?;
                    expr = WithSpan::new(
                        Expr::Call {
                            callee: Box::new(expr),
                            type_args: Some(type_args),
                            args,
                            optional: false,
                        },
                        self.span_from(start),
                    );
                } else {
                    let template = self.parse_template()?;
                    expr = WithSpan::new(
                        Expr::TaggedTemplate {
                            tag: Box::new(expr),
                            type_args: Some(type_args),
                            template,
                        },
                        self.span_from(start),
                    );
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_new(&mut self) -> PResult<ExprNode> {
        let start = self.start_pos();
        self.expect_keyword("new")?;
        if self.eat_punct(".") {
            let property = self.expect_name()?;
            return Ok(WithSpan::new(
                Expr::Member {
                    object: Box::new(WithSpan::new(Expr::Ident("new".into()), self.span_from(start))),
                    property,
                    optional: false,
                },
                self.span_from(start),
            ));
        }
        let mut callee = if self.is_ident("new") {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        loop {
            if self.eat_punct(".") {
                let property = self.expect_name()?;
                callee = WithSpan::new(
                    Expr::Member {
                        object: Box::new(callee),
                        property,
                        optional: false,
                    },
                    self.span_from(start),
                );
            } else if self.eat_punct("[") {
                let index = self.parse_expression()?;
                self.expect_punct("]")?;
                callee = WithSpan::new(
                    Expr::Index {
                        object: Box::new(callee),
                        index: Box::new(index),
                        optional: false,
                    },
                    self.span_from(start),
                );
            } else {
                break;
            }
        }
        let type_args = if self.is_punct("<") {
            self.try_call_type_args()
        } else {
            None
        };
        let args = if self.is_punct("(") {
            Some(self.parse_arguments()?)
        } else {
            None
        };
        Ok(WithSpan::new(
            Expr::New {
                callee: Box::new(callee),
                type_args,
                args,
            },
            self.span_from(start),
        ))
    }

    fn parse_arguments(&mut self) -> PResult<Vec<ExprNode>> {
        self.expect_punct("(")?;
        let saved = self.no_in;
        self.no_in = false;
        let result = self.parse_argument_list();
        self.no_in = saved;
        result
    }

    fn parse_argument_list(&mut self) -> PResult<Vec<ExprNode>> {
        let mut args = Vec::new();
        while !self.is_punct(")") {
            args.push(self.parse_spread_or_assign()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn parse_spread_or_assign(&mut self) -> PResult<ExprNode> {
        let start = self.start_pos();
        if self.eat_punct("...") {
            let arg = self.parse_assign()?;
            return Ok(WithSpan::new(Expr::Spread(Box::new(arg)), self.span_from(start)));
        }
        self.parse_assign()
    }

    fn parse_template(&mut self) -> PResult<Template> {
        let first = self.bump()?;
        match first.kind {
            TokenKind::NoSubstitutionTemplate => Ok(Template {
                quasis: vec![template_part_text(&first).to_string()],
                exprs: Vec::new(),
            }),
            TokenKind::TemplateHead => {
                let mut quasis = vec![template_part_text(&first).to_string()];
                let mut exprs = Vec::new();
                loop {
                    exprs.push(self.parse_expression()?);
                    let part = self.bump()?;
                    match part.kind {
                        TokenKind::TemplateMiddle => {
                            quasis.push(template_part_text(&part).to_string())
                        }
                        TokenKind::TemplateTail => {
                            quasis.push(template_part_text(&part).to_string());
                            break;
                        }
                        _ => {
                            self.pos -= 1;
                            return Err(self.unexpected("the rest of the template literal"));
                        }
                    }
                }
                Ok(Template { quasis, exprs })
            }
            _ => {
                self.pos -= 1;
                Err(self.unexpected("a template literal"))
            }
        }
    }

    fn parse_primary(&mut self) -> PResult<ExprNode> {
        let start = self.start_pos();
        let Some(t) = self.peek().cloned() else {
            return Err(self.unexpected("an expression"));
        };
        let value = match t.kind {
            TokenKind::Ident => match t.text.as_str() {
                "function" => Expr::Function(Box::new(self.parse_function(false, false)?)),
                "async" if self.is_ident_at(1, "function") => {
                    self.pos += 1;
                    Expr::Function(Box::new(self.parse_function(true, false)?))
                }
                "class" => Expr::Class(Box::new(self.parse_class(Vec::new(), Vec::new(), false)?)),
                _ => {
                    self.pos += 1;
                    match t.text.as_str() {
                        "this" => Expr::This,
                        "super" => Expr::Super,
                        "null" => Expr::Null,
                        "true" => Expr::Bool(true),
                        "false" => Expr::Bool(false),
                        _ => Expr::Ident(t.text),
                    }
                }
            },
            TokenKind::PrivateName => {
                self.pos += 1;
                Expr::Ident(t.text)
            }
            TokenKind::Number => {
                self.pos += 1;
                Expr::Number(t.text)
            }
            TokenKind::String => {
                self.pos += 1;
                Expr::Str(cook_string(&t.text))
            }
            TokenKind::NoSubstitutionTemplate | TokenKind::TemplateHead => {
                Expr::Template(self.parse_template()?)
            }
            TokenKind::Punct => match t.text.as_str() {
                "(" => {
                    self.pos += 1;
                    let saved = self.no_in;
                    self.no_in = false;
                    let inner = self.parse_expression();
                    self.no_in = saved;
                    let inner = inner?;
                    self.expect_punct(")")?;
                    Expr::Paren(Box::new(inner))
                }
                "[" => {
                    self.pos += 1;
                    let mut items = Vec::new();
                    while !self.eat_punct("]") {
                        if self.is_punct(",") {
                            return Err(self.error("array holes are not supported"));
                        }
                        items.push(self.parse_spread_or_assign()?);
                        if !self.eat_punct(",") {
                            self.expect_punct("]")?;
                            break;
                        }
                    }
                    Expr::Array(items)
                }
                "{" => Expr::Object(self.parse_object_literal()?),
                _ => return Err(self.unexpected("an expression")),
            },
            _ => return Err(self.unexpected("an expression")),
        };
        Ok(WithSpan::new(value, self.span_from(start)))
    }

    fn parse_object_literal(&mut self) -> PResult<Vec<Prop>> {
        self.expect_punct("{")?;
        let mut props = Vec::new();
        while !self.eat_punct("}") {
            if self.eat_punct("...") {
                props.push(Prop::Spread(self.parse_assign()?));
            } else {
                let (method_kind, is_async, is_generator) = self.parse_method_prefix()?;
                let key = self.parse_prop_key()?;
                if self.is_punct("(") || self.is_punct("<") || method_kind.is_some() || is_async || is_generator {
                    let func = self.parse_function_rest(None, is_async, is_generator, false)?;
                    props.push(Prop::Method {
                        key,
                        kind: method_kind.unwrap_or(MethodKind::Method),
                        func,
                    });
                } else if self.eat_punct(":") {
                    let value = self.parse_assign()?;
                    props.push(Prop::KeyValue { key, value });
                } else {
                    match key {
                        PropKey::Ident(name) => props.push(Prop::Shorthand(name)),
                        _ => return Err(self.unexpected("':'")),
                    }
                }
            }
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(props)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn binary_precedence(op: &str) -> Option<u8> {
    Some(match op {
        "??" => 1,
        "||" => 2,
        "&&" => 3,
        "|" => 4,
        "^" => 5,
        "&" => 6,
        "==" | "!=" | "===" | "!==" => 7,
        "<" | ">" | "<=" | ">=" | "instanceof" | "in" | "as" | "satisfies" => 8,
        "<<" | ">>" | ">>>" => 9,
        "+" | "-" => 10,
        "*" | "/" | "%" => 11,
        "**" => 12,
        _ => return None,
    })
}

/// Converts an expression used as an assignment head into a pattern.
fn expr_to_pattern(expr: ExprNode) -> Pattern {
    match expr.value {
        Expr::Ident(name) => Pattern::Ident(name),
        _ => Pattern::Expr(Box::new(expr)),
    }
}

/// Decodes a quoted string literal.
pub fn cook_string(raw: &str) -> String {
    let inner = if raw.len() >= 2 { &raw[1..raw.len() - 1] } else { "" };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('v') => out.push('\u{b}'),
            Some('0') => out.push('\0'),
            Some('\n') => {}
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                if let Some(ch) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    out.push(ch);
                }
            }
            Some('u') => {
                let hex: String = if chars.peek() == Some(&'{') {
                    chars.next();
                    chars.by_ref().take_while(|c| *c != '}').collect()
                } else {
                    chars.by_ref().take(4).collect()
                };
                if let Some(ch) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    out.push(ch);
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_imports() {
        let m = parse_module("import def, { a, b as c, type T } from \"mod\";\nimport \"side\";").unwrap();
        match &m.body[0].value {
            Stmt::Import(i) => {
                assert_eq!(i.default.as_deref(), Some("def"));
                assert_eq!(i.named.len(), 3);
                assert_eq!(i.named[1].local, "c");
                assert!(i.named[2].type_only);
            }
            other => panic!("expected import, got {:?}", other),
        }
        assert!(matches!(&m.body[1].value, Stmt::Import(i) if i.is_side_effect_only()));
    }

    #[test]
    fn test_arrow_with_types_and_generics() {
        let e = parse_expression("async <T>(x: T, y?: number): Promise<T> => x").unwrap();
        match e.value {
            Expr::Arrow(a) => {
                assert!(a.is_async);
                assert_eq!(a.params.len(), 2);
                assert_eq!(a.return_type.as_deref(), Some("Promise<T>"));
            }
            other => panic!("expected arrow, got {:?}", other),
        }
    }

    #[test]
    fn test_parenthesised_expression_is_not_an_arrow() {
        let e = parse_expression("(a) ? b : c").unwrap();
        assert!(matches!(e.value, Expr::Conditional { .. }));
    }

    #[test]
    fn test_comparison_is_not_type_arguments() {
        let e = parse_expression("a < b && c > (d)").unwrap();
        assert!(matches!(e.value, Expr::Binary { ref op, .. } if op == "&&"));
        let call = parse_expression("f<string>(x)").unwrap();
        assert!(matches!(call.value, Expr::Call { type_args: Some(_), .. }));
    }

    #[test]
    fn test_shift_operators_from_single_angles() {
        let e = parse_expression("a >> 2 >>> 1").unwrap();
        match e.value {
            Expr::Binary { op, left, .. } => {
                assert_eq!(op, ">>>");
                assert!(matches!(left.value, Expr::Binary { ref op, .. } if op == ">>"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_labeled_blocks() {
        let stmts = parse_statements("let: { a << f(); b = a + 1; }\nyield: { a + b }").unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[0].value, Stmt::Labeled { label, .. } if label == "let"));
        assert!(matches!(&stmts[1].value, Stmt::Labeled { label, .. } if label == "yield"));
    }

    #[test]
    fn test_class_with_decorators_and_members() {
        let src = "@derive(Eq, Show)\nexport class Point<T> extends Base implements Shape {\n  readonly x: number = 0;\n  private y?: T;\n  static count = 0;\n  constructor(public z: number) { super(); }\n  get len(): number { return 1; }\n  async *items() {}\n  [key: string]: unknown;\n}";
        let m = parse_module(src).unwrap();
        let Stmt::Export(inner) = &m.body[0].value else {
            panic!("expected export");
        };
        let Stmt::Class(class) = &inner.value else {
            panic!("expected class");
        };
        assert_eq!(class.decorators.len(), 1);
        assert_eq!(class.decorators[0].callee_name(), Some("derive"));
        assert_eq!(class.members.len(), 7);
        assert!(matches!(class.members[4].value.kind, MemberKind::Method { kind: MethodKind::Get, .. }));
    }

    #[test]
    fn test_type_alias_and_verbatim() {
        let m = parse_module("type F<T> = (x: T) => string\ninterface I { a: number }\nconst x = 1;").unwrap();
        assert!(matches!(&m.body[0].value, Stmt::TypeAlias(t) if t.ty == "(x: T) => string"));
        assert!(matches!(&m.body[1].value, Stmt::Verbatim(v) if v.starts_with("interface")));
        assert!(matches!(&m.body[2].value, Stmt::Var(_)));
    }

    #[test]
    fn test_generator_function_body() {
        let e = parse_expression("function* () { const a = yield* f(); yield* g(a); return a; }").unwrap();
        let Expr::Function(f) = e.value else { panic!("expected function") };
        assert!(f.is_generator);
        assert_eq!(f.body.map(|b| b.len()), Some(3));
    }

    #[test]
    fn test_cook_string_escapes() {
        assert_eq!(cook_string(r#""a\nb\u{41}\x42""#), "a\nbAB");
        assert_eq!(cook_string("'it\\'s'"), "it's");
    }

    #[test]
    fn test_error_carries_span() {
        let err = parse_module("const = 5;").unwrap_err();
        assert_eq!(err.span(), Some(Span::new(6, 7)));
    }

    #[test]
    fn test_for_of_and_asi() {
        let m = parse_module("for (const x of xs) total += x\nlet y = 2").unwrap();
        assert_eq!(m.body.len(), 2);
        assert!(matches!(&m.body[0].value, Stmt::ForIn { of: true, .. }));
    }
}
