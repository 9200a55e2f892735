//! Deterministic AST construction helpers for macro authors.
//!
//! Every node built through a factory carries the factory's span, which the
//! expansion driver sets to the invocation being expanded. Printed output of
//! generated code therefore maps back to the macro call site.

use super::{
    Arrow, ArrowBody, Expr, ExprNode, Function, Param, Pattern, Prop, PropKey, Span, Stmt,
    StmtNode, Template, VarDecl, VarDeclarator, VarKind, WithSpan,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct AstFactory {
    span: Span,
}

impl AstFactory {
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    /// A factory for nodes with no source position.
    pub fn synthetic() -> Self {
        Self { span: Span::DUMMY }
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn at(&self, span: Span) -> Self {
        Self { span }
    }

    pub fn expr(&self, value: Expr) -> ExprNode {
        WithSpan::new(value, self.span)
    }

    pub fn stmt(&self, value: Stmt) -> StmtNode {
        WithSpan::new(value, self.span)
    }

    // ------------------------------------------------------------------
    // Literals and names
    // ------------------------------------------------------------------

    pub fn ident(&self, name: impl Into<String>) -> ExprNode {
        self.expr(Expr::Ident(name.into()))
    }

    pub fn string(&self, value: impl Into<String>) -> ExprNode {
        self.expr(Expr::Str(value.into()))
    }

    pub fn number(&self, value: f64) -> ExprNode {
        if value.is_sign_negative() && value != 0.0 {
            return self.unary("-", self.number(-value));
        }
        self.expr(Expr::Number(format_number(value)))
    }

    pub fn bool(&self, value: bool) -> ExprNode {
        self.expr(Expr::Bool(value))
    }

    pub fn null(&self) -> ExprNode {
        self.expr(Expr::Null)
    }

    pub fn undefined(&self) -> ExprNode {
        self.ident("undefined")
    }

    pub fn template(&self, quasis: Vec<String>, exprs: Vec<ExprNode>) -> ExprNode {
        self.expr(Expr::Template(Template { quasis, exprs }))
    }

    pub fn array(&self, items: Vec<ExprNode>) -> ExprNode {
        self.expr(Expr::Array(items))
    }

    /// Object literal from `(key, value)` pairs. Keys that are plain identifiers
    /// equal to the value's identifier are emitted as shorthand.
    pub fn object(&self, entries: Vec<(String, ExprNode)>) -> ExprNode {
        let props = entries
            .into_iter()
            .map(|(key, value)| match &value.value {
                Expr::Ident(n) if *n == key => Prop::Shorthand(key),
                _ => Prop::KeyValue {
                    key: prop_key(&key),
                    value,
                },
            })
            .collect();
        self.expr(Expr::Object(props))
    }

    // ------------------------------------------------------------------
    // Operators and calls
    // ------------------------------------------------------------------

    pub fn unary(&self, op: &str, arg: ExprNode) -> ExprNode {
        self.expr(Expr::Unary {
            op: op.to_string(),
            arg: Box::new(arg),
        })
    }

    pub fn binary(&self, op: &str, left: ExprNode, right: ExprNode) -> ExprNode {
        self.expr(Expr::Binary {
            op: op.to_string(),
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn assign(&self, target: ExprNode, value: ExprNode) -> ExprNode {
        self.expr(Expr::Assign {
            op: "=".to_string(),
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    pub fn call(&self, callee: ExprNode, args: Vec<ExprNode>) -> ExprNode {
        self.expr(Expr::Call {
            callee: Box::new(callee),
            type_args: None,
            args,
            optional: false,
        })
    }

    /// `object.method(args)`
    pub fn method_call(&self, object: ExprNode, method: &str, args: Vec<ExprNode>) -> ExprNode {
        let callee = self.member(object, method);
        self.call(callee, args)
    }

    pub fn member(&self, object: ExprNode, property: &str) -> ExprNode {
        self.expr(Expr::Member {
            object: Box::new(object),
            property: property.to_string(),
            optional: false,
        })
    }

    /// Member chain from a dotted path: `a.b.c`.
    pub fn path(&self, dotted: &str) -> ExprNode {
        let mut parts = dotted.split('.');
        let first = parts.next().unwrap_or_default();
        parts.fold(self.ident(first), |acc, p| self.member(acc, p))
    }

    pub fn spread(&self, arg: ExprNode) -> ExprNode {
        self.expr(Expr::Spread(Box::new(arg)))
    }

    pub fn paren(&self, inner: ExprNode) -> ExprNode {
        self.expr(Expr::Paren(Box::new(inner)))
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    /// `(a, b) => body`
    pub fn arrow(&self, params: Vec<Param>, body: ExprNode) -> ExprNode {
        self.expr(Expr::Arrow(Box::new(Arrow {
            is_async: false,
            type_params: None,
            params,
            return_type: None,
            body: ArrowBody::Expr(Box::new(body)),
        })))
    }

    pub fn arrow_block(&self, params: Vec<Param>, body: Vec<StmtNode>) -> ExprNode {
        self.expr(Expr::Arrow(Box::new(Arrow {
            is_async: false,
            type_params: None,
            params,
            return_type: None,
            body: ArrowBody::Block(body),
        })))
    }

    /// Single-parameter arrow: `name => body`
    pub fn lambda(&self, name: &str, body: ExprNode) -> ExprNode {
        self.arrow(vec![Param::named(name)], body)
    }

    /// Immediately applied arrow: `(name => body)(value)`
    pub fn let_in(&self, name: &str, value: ExprNode, body: ExprNode) -> ExprNode {
        let func = self.paren(self.lambda(name, body));
        self.call(func, vec![value])
    }

    pub fn function(&self, func: Function) -> ExprNode {
        self.expr(Expr::Function(Box::new(func)))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    pub fn expr_stmt(&self, expr: ExprNode) -> StmtNode {
        self.stmt(Stmt::Expr(expr))
    }

    pub fn return_stmt(&self, expr: Option<ExprNode>) -> StmtNode {
        self.stmt(Stmt::Return(expr))
    }

    pub fn var_decl(&self, kind: VarKind, name: &str, ty: Option<String>, init: ExprNode) -> StmtNode {
        self.stmt(Stmt::Var(VarDecl {
            kind,
            declare: false,
            decls: vec![VarDeclarator {
                pattern: Pattern::Ident(name.to_string()),
                ty,
                definite: false,
                init: Some(init),
            }],
        }))
    }

    pub fn const_decl(&self, name: &str, init: ExprNode) -> StmtNode {
        self.var_decl(VarKind::Const, name, None, init)
    }

    pub fn export(&self, decl: StmtNode) -> StmtNode {
        self.stmt(Stmt::Export(Box::new(decl)))
    }
}

/// Property key for a name, quoting it when it is not a valid identifier.
pub fn prop_key(name: &str) -> PropKey {
    if is_identifier(name) {
        PropKey::Ident(name.to_string())
    } else {
        PropKey::Str(name.to_string())
    }
}

pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

/// Formats a number the way the host language prints it.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e21 {
        return format!("{}", value as i64);
    }
    format!("{}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_uses_shorthand_for_matching_names() {
        let f = AstFactory::synthetic();
        let obj = f.object(vec![("a".into(), f.ident("a")), ("b".into(), f.number(1.0))]);
        match obj.value {
            Expr::Object(props) => {
                assert!(matches!(&props[0], Prop::Shorthand(n) if n == "a"));
                assert!(matches!(&props[1], Prop::KeyValue { .. }));
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn test_path_builds_member_chain() {
        let f = AstFactory::synthetic();
        let e = f.path("Layer.provide");
        assert!(matches!(e.value, Expr::Member { ref property, .. } if property == "provide"));
    }
}
