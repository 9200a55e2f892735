//! Sandboxed compile-time evaluation.
//!
//! A small interpreter over the pure subset of the host language: literals,
//! operators, templates, arrays and objects, arrow and function expressions,
//! blocks with declarations, `if` and `return`, and a fixed set of library
//! calls. Filesystem and environment access are denied unless granted; `path`
//! helpers are always available. There are no loops and no assignment, and
//! calls nest at most [`MAX_CALL_DEPTH`] deep, so every evaluation terminates.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ast::factory::format_number;
use crate::ast::{
    ArrowBody, AstFactory, Expr, ExprNode, Function, Param, Pattern, Prop, PropKey, Stmt, StmtNode,
    Template,
};
use crate::syntax::parser::cook_string;
use crate::{err_ctx, Span, WeaveError};

/// Deepest nesting of compile-time function calls.
pub const MAX_CALL_DEPTH: usize = 64;

// ============================================================================
// CAPABILITIES
// ============================================================================

/// What compile-time code may touch beyond pure computation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// `fs.readFileSync`, `fs.readdirSync`, `fs.existsSync`, `require('fs')`.
    pub fs: bool,
    /// `process.env`.
    pub env: bool,
}

impl Capabilities {
    pub fn union(self, other: Capabilities) -> Capabilities {
        Capabilities {
            fs: self.fs || other.fs,
            env: self.env || other.env,
        }
    }

    /// Reads a grant object such as `{ fs: 'read', env: true }`.
    pub fn from_grant(expr: &ExprNode) -> Result<Capabilities, WeaveError> {
        let Expr::Object(props) = &expr.value else {
            return Err(err_ctx!(Eval, "capability grant must be an object literal", expr.span));
        };
        let mut caps = Capabilities::default();
        for prop in props {
            let Prop::KeyValue { key, value } = prop else {
                return Err(err_ctx!(Eval, "capability grant entries must be `key: value`", expr.span));
            };
            let granted = match &value.value {
                Expr::Str(s) if s == "read" => true,
                Expr::Bool(b) => *b,
                _ => {
                    return Err(err_ctx!(
                        Eval,
                        "capability values must be 'read', true or false",
                        value.span
                    ))
                }
            };
            match key.name() {
                Some("fs") => caps.fs = granted,
                Some("env") => caps.env = granted,
                other => {
                    return Err(err_ctx!(
                        Eval,
                        format!("unknown capability '{}'", other.unwrap_or("<computed>")),
                        value.span,
                        "known capabilities are `fs` and `env`"
                    ))
                }
            }
        }
        Ok(caps)
    }
}

// ============================================================================
// VALUES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Fs,
    Path,
    Process,
    Json,
    Math,
    Object,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(Vec<Value>),
    /// Properties in insertion order.
    Object(Vec<(String, Value)>),
    Namespace(Namespace),
    /// A library function: namespace and member name.
    Builtin(Namespace, String),
    /// `require` itself.
    Require,
    Closure(Closure),
}

/// One scope of bindings. A closure holds the frame it was created in, so a
/// binding declared after the closure (its own name included) is visible to
/// it.
#[derive(Default)]
struct Frame {
    vars: HashMap<String, Value>,
    parent: Option<Env>,
}

type Env = Rc<RefCell<Frame>>;

#[derive(Clone)]
pub struct Closure {
    params: Vec<Param>,
    body: ArrowBody,
    env: Env,
}

impl PartialEq for Closure {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.env, &other.env) && self.params == other.params && self.body == other.body
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("params", &self.params.len())
            .finish_non_exhaustive()
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) | Value::Namespace(_) => "object",
            Value::Builtin(..) | Value::Require | Value::Closure(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Null => 0.0,
            Value::Str(s) if s.trim().is_empty() => 0.0,
            Value::Str(s) => s.trim().parse().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(props) => props
                .iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Undefined),
            Value::Array(items) if key == "length" => Value::Number(items.len() as f64),
            Value::Array(items) => key
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Undefined),
            Value::Str(s) if key == "length" => Value::Number(s.encode_utf16().count() as f64),
            _ => Value::Undefined,
        }
    }

    /// Converts the value back into a literal expression.
    pub fn to_expr(&self, f: &AstFactory) -> Result<ExprNode, WeaveError> {
        Ok(match self {
            Value::Undefined => f.undefined(),
            Value::Null => f.null(),
            Value::Bool(b) => f.bool(*b),
            Value::Number(n) if n.is_nan() => f.ident("NaN"),
            Value::Number(n) if n.is_infinite() && *n > 0.0 => f.ident("Infinity"),
            Value::Number(n) if n.is_infinite() => f.unary("-", f.ident("Infinity")),
            Value::Number(n) => f.number(*n),
            Value::Str(s) => f.string(s.clone()),
            Value::Array(items) => f.array(items.iter().map(|v| v.to_expr(f)).collect::<Result<_, _>>()?),
            Value::Object(props) => {
                let mut entries: Vec<(String, ExprNode)> = Vec::new();
                for (k, v) in props {
                    let v = v.to_expr(f)?;
                    match entries.iter_mut().find(|(existing, _)| existing == k) {
                        Some(slot) => slot.1 = v,
                        None => entries.push((k.clone(), v)),
                    }
                }
                f.object(entries)
            }
            other => {
                return Err(err_ctx!(
                    Eval,
                    format!("a {} cannot be emitted as compile-time output", other.type_name()),
                    f.span()
                ))
            }
        })
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => serde_json::Value::from(*n as i64),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(props) => {
                let mut map = serde_json::Map::new();
                for (k, v) in props {
                    if !matches!(v, Value::Undefined) {
                        map.insert(k.clone(), v.to_json());
                    }
                }
                serde_json::Value::Object(map)
            }
            _ => serde_json::Value::Null,
        }
    }

    fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Value::from_json).collect()),
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            }
        }
    }
}

/// String conversion as the host language performs it.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(items) => {
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    if !matches!(v, Value::Undefined | Value::Null) {
                        write!(f, "{}", v)?;
                    }
                }
                Ok(())
            }
            Value::Object(_) | Value::Namespace(_) => write!(f, "[object Object]"),
            Value::Builtin(..) | Value::Require | Value::Closure(_) => write!(f, "function"),
        }
    }
}

// ============================================================================
// INTERPRETER
// ============================================================================

/// Result of running a statement.
enum Flow {
    Normal,
    Return(Value),
}

pub struct Sandbox {
    capabilities: Capabilities,
    base_dir: PathBuf,
    env: Env,
    /// Every frame created. Recursive closures form reference cycles with
    /// their frames; clearing these on drop frees them.
    frames: Vec<Env>,
    depth: usize,
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        for frame in &self.frames {
            frame.borrow_mut().vars.clear();
        }
    }
}

impl Sandbox {
    pub fn new(capabilities: Capabilities, base_dir: impl Into<PathBuf>) -> Self {
        let mut globals = HashMap::new();
        globals.insert("undefined".to_string(), Value::Undefined);
        globals.insert("NaN".to_string(), Value::Number(f64::NAN));
        globals.insert("Infinity".to_string(), Value::Number(f64::INFINITY));
        globals.insert("fs".to_string(), Value::Namespace(Namespace::Fs));
        globals.insert("path".to_string(), Value::Namespace(Namespace::Path));
        globals.insert("process".to_string(), Value::Namespace(Namespace::Process));
        globals.insert("JSON".to_string(), Value::Namespace(Namespace::Json));
        globals.insert("Math".to_string(), Value::Namespace(Namespace::Math));
        globals.insert("Object".to_string(), Value::Namespace(Namespace::Object));
        globals.insert("require".to_string(), Value::Require);
        let env = Rc::new(RefCell::new(Frame {
            vars: globals,
            parent: None,
        }));
        Self {
            capabilities,
            base_dir: base_dir.into(),
            frames: vec![Rc::clone(&env)],
            env,
            depth: 0,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Evaluates `expr`. A zero-parameter arrow is called and its result
    /// returned, so `comptime(() => { ... })` works like `comptime(expr)`.
    pub fn run(&mut self, expr: &ExprNode) -> Result<Value, WeaveError> {
        let mut expr = expr;
        while let Expr::Paren(inner) = &expr.value {
            expr = &**inner;
        }
        if let Expr::Arrow(arrow) = &expr.value {
            if arrow.params.is_empty() {
                return match &arrow.body {
                    ArrowBody::Expr(body) => self.eval(body),
                    ArrowBody::Block(stmts) => self.eval_block(stmts, expr.span),
                };
            }
        }
        self.eval(expr)
    }

    fn lookup(&self, name: &str, span: Span) -> Result<Value, WeaveError> {
        let mut current = Some(Rc::clone(&self.env));
        while let Some(env) = current {
            let frame = env.borrow();
            if let Some(value) = frame.vars.get(name) {
                return Ok(value.clone());
            }
            current = frame.parent.clone();
        }
        Err(err_ctx!(
            Eval,
            format!("'{}' is not defined in compile-time code", name),
            span,
            "compile-time code can only see its own bindings and the sandbox library"
        ))
    }

    fn declare(&mut self, name: &str, value: Value) {
        self.env.borrow_mut().vars.insert(name.to_string(), value);
    }

    fn new_frame(&mut self, parent: &Env) -> Env {
        let frame = Rc::new(RefCell::new(Frame {
            vars: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }));
        self.frames.push(Rc::clone(&frame));
        frame
    }

    /// Makes a child of the current frame current and returns the old one.
    fn enter_scope(&mut self) -> Env {
        let parent = Rc::clone(&self.env);
        let frame = self.new_frame(&parent);
        std::mem::replace(&mut self.env, frame)
    }

    fn eval_block(&mut self, stmts: &[StmtNode], span: Span) -> Result<Value, WeaveError> {
        let prev = self.enter_scope();
        let result = self.exec_stmts(stmts);
        self.env = prev;
        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => {
                debug!(?span, "compile-time block ended without return");
                Ok(Value::Undefined)
            }
        }
    }

    /// Runs `stmts` in the current frame. Function declarations are bound
    /// before anything runs.
    fn exec_stmts(&mut self, stmts: &[StmtNode]) -> Result<Flow, WeaveError> {
        for stmt in stmts {
            if let Stmt::Function(func) = &stmt.value {
                if let Some(name) = &func.name {
                    let value = self.function_value(func, stmt.span)?;
                    self.declare(name, value);
                }
            }
        }
        for stmt in stmts {
            if let Flow::Return(value) = self.exec_stmt(stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &StmtNode) -> Result<Flow, WeaveError> {
        match &stmt.value {
            Stmt::Var(decl) => {
                for d in &decl.decls {
                    let value = match &d.init {
                        Some(init) => self.eval(init)?,
                        None => Value::Undefined,
                    };
                    self.bind(&d.pattern, value, stmt.span)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Function(_) | Stmt::Empty => Ok(Flow::Normal),
            Stmt::Expr(e) => {
                self.eval(e)?;
                Ok(Flow::Normal)
            }
            Stmt::Return(Some(e)) => Ok(Flow::Return(self.eval(e)?)),
            Stmt::Return(None) => Ok(Flow::Return(Value::Undefined)),
            Stmt::If { test, cons, alt } => {
                if self.eval(test)?.truthy() {
                    self.exec_stmt(cons)
                } else if let Some(alt) = alt {
                    self.exec_stmt(alt)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::Block(stmts) => {
                let prev = self.enter_scope();
                let result = self.exec_stmts(stmts);
                self.env = prev;
                result
            }
            Stmt::Throw(e) => {
                let value = self.eval(e)?;
                Err(err_ctx!(Eval, format!("compile-time code threw: {}", value), stmt.span))
            }
            _ => Err(err_ctx!(
                Eval,
                "only declarations, `if`, blocks and `return` are allowed in compile-time code",
                stmt.span
            )),
        }
    }

    fn function_value(&mut self, func: &Function, span: Span) -> Result<Value, WeaveError> {
        if func.is_async || func.is_generator {
            return Err(unsupported("async and generator functions", span));
        }
        let Some(body) = &func.body else {
            return Err(unsupported("function signatures", span));
        };
        Ok(Value::Closure(Closure {
            params: func.params.clone(),
            body: ArrowBody::Block(body.clone()),
            env: Rc::clone(&self.env),
        }))
    }

    fn bind(&mut self, pattern: &Pattern, value: Value, span: Span) -> Result<(), WeaveError> {
        match pattern {
            Pattern::Ident(name) => {
                self.declare(name, value);
                Ok(())
            }
            Pattern::Object { props, rest: None } => {
                for p in props {
                    let key = p.key.name().unwrap_or_default();
                    let mut v = value.get(key);
                    if matches!(v, Value::Undefined) {
                        if let Some(d) = &p.default {
                            v = self.eval(d)?;
                        }
                    }
                    self.bind(&p.value, v, span)?;
                }
                Ok(())
            }
            Pattern::Array { elems, rest: None } => {
                for (i, elem) in elems.iter().enumerate() {
                    if let Some(elem) = elem {
                        let mut v = value.get(&i.to_string());
                        if matches!(v, Value::Undefined) {
                            if let Some(d) = &elem.default {
                                v = self.eval(d)?;
                            }
                        }
                        self.bind(&elem.pattern, v, span)?;
                    }
                }
                Ok(())
            }
            _ => Err(err_ctx!(Eval, "unsupported binding pattern in compile-time code", span)),
        }
    }

    pub fn eval(&mut self, expr: &ExprNode) -> Result<Value, WeaveError> {
        let span = expr.span;
        match &expr.value {
            Expr::Ident(name) => self.lookup(name, span),
            Expr::Number(raw) => Ok(Value::Number(parse_number(raw))),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Template(t) => self.eval_template(t).map(Value::Str),
            Expr::Array(items) => {
                let mut out = Vec::new();
                for item in items {
                    match &item.value {
                        Expr::Spread(inner) => match self.eval(inner)? {
                            Value::Array(vs) => out.extend(vs),
                            Value::Str(s) => out.extend(s.chars().map(|c| Value::Str(c.to_string()))),
                            other => return Err(type_error("spread", "an array", &other, item.span)),
                        },
                        _ => out.push(self.eval(item)?),
                    }
                }
                Ok(Value::Array(out))
            }
            Expr::Object(props) => {
                let mut out: Vec<(String, Value)> = Vec::new();
                for prop in props {
                    match prop {
                        Prop::KeyValue { key, value } => {
                            let k = self.eval_key(key, span)?;
                            let v = self.eval(value)?;
                            out.push((k, v));
                        }
                        Prop::Shorthand(name) => out.push((name.clone(), self.lookup(name, span)?)),
                        Prop::Spread(e) => match self.eval(e)? {
                            Value::Object(ps) => out.extend(ps),
                            Value::Undefined | Value::Null => {}
                            other => return Err(type_error("spread", "an object", &other, e.span)),
                        },
                        Prop::Method { .. } => {
                            return Err(err_ctx!(Eval, "object methods are not supported in compile-time code", span))
                        }
                    }
                }
                Ok(Value::Object(out))
            }
            Expr::Arrow(arrow) => Ok(Value::Closure(Closure {
                params: arrow.params.clone(),
                body: arrow.body.clone(),
                env: Rc::clone(&self.env),
            })),
            Expr::Function(func) => match &func.name {
                None => self.function_value(func, span),
                // A named function expression sees its own name.
                Some(name) => {
                    let prev = self.enter_scope();
                    let value = self.function_value(func, span);
                    if let Ok(v) = &value {
                        self.declare(name, v.clone());
                    }
                    self.env = prev;
                    value
                }
            },
            Expr::Unary { op, arg } => {
                let v = self.eval(arg)?;
                Ok(match op.as_str() {
                    "!" => Value::Bool(!v.truthy()),
                    "-" => Value::Number(-v.to_number()),
                    "+" => Value::Number(v.to_number()),
                    "typeof" => Value::Str(
                        match v.type_name() {
                            "array" | "null" => "object",
                            t => t,
                        }
                        .to_string(),
                    ),
                    "void" => Value::Undefined,
                    other => return Err(unsupported(&format!("the '{}' operator", other), span)),
                })
            }
            Expr::Binary { op, left, right } => self.eval_binary(op, left, right, span),
            Expr::Conditional { test, cons, alt } => {
                if self.eval(test)?.truthy() {
                    self.eval(cons)
                } else {
                    self.eval(alt)
                }
            }
            Expr::Member { object, property, optional } => {
                let obj = self.eval(object)?;
                if *optional && matches!(obj, Value::Undefined | Value::Null) {
                    return Ok(Value::Undefined);
                }
                self.member(obj, property, span)
            }
            Expr::Index { object, index, optional } => {
                let obj = self.eval(object)?;
                if *optional && matches!(obj, Value::Undefined | Value::Null) {
                    return Ok(Value::Undefined);
                }
                let key = self.eval(index)?.to_string();
                self.member(obj, &key, span)
            }
            Expr::Call { callee, args, optional, .. } => {
                let args = self.eval_args(args)?;
                if let Expr::Member { object, property, .. } = &callee.value {
                    let receiver = self.eval(object)?;
                    return self.call_method(receiver, property, args, span);
                }
                let f = self.eval(callee)?;
                if *optional && matches!(f, Value::Undefined | Value::Null) {
                    return Ok(Value::Undefined);
                }
                self.call(f, args, span)
            }
            Expr::Paren(inner) | Expr::NonNull(inner) | Expr::TypeAssertion { expr: inner, .. } => self.eval(inner),
            Expr::Sequence(items) => {
                let mut last = Value::Undefined;
                for item in items {
                    last = self.eval(item)?;
                }
                Ok(last)
            }
            Expr::Assign { .. } | Expr::Update { .. } => Err(unsupported("assignment", span)),
            Expr::Await(_) => Err(unsupported("await", span)),
            Expr::New { .. } => Err(unsupported("`new`", span)),
            _ => Err(unsupported("this expression", span)),
        }
    }

    fn eval_args(&mut self, args: &[ExprNode]) -> Result<Vec<Value>, WeaveError> {
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            match &a.value {
                Expr::Spread(inner) => match self.eval(inner)? {
                    Value::Array(vs) => out.extend(vs),
                    other => return Err(type_error("spread", "an array", &other, a.span)),
                },
                _ => out.push(self.eval(a)?),
            }
        }
        Ok(out)
    }

    fn eval_key(&mut self, key: &PropKey, span: Span) -> Result<String, WeaveError> {
        match key {
            PropKey::Computed(e) => Ok(self.eval(e)?.to_string()),
            PropKey::Number(n) => Ok(format_number(parse_number(n))),
            other => other
                .name()
                .map(str::to_string)
                .ok_or_else(|| unsupported("this property key", span)),
        }
    }

    fn eval_template(&mut self, t: &Template) -> Result<String, WeaveError> {
        let mut out = cook_string(&format!("`{}`", t.quasis.first().map(String::as_str).unwrap_or("")));
        for (i, e) in t.exprs.iter().enumerate() {
            out.push_str(&self.eval(e)?.to_string());
            if let Some(q) = t.quasis.get(i + 1) {
                out.push_str(&cook_string(&format!("`{}`", q)));
            }
        }
        Ok(out)
    }

    fn eval_binary(&mut self, op: &str, left: &ExprNode, right: &ExprNode, span: Span) -> Result<Value, WeaveError> {
        match op {
            "&&" => {
                let l = self.eval(left)?;
                return if l.truthy() { self.eval(right) } else { Ok(l) };
            }
            "||" => {
                let l = self.eval(left)?;
                return if l.truthy() { Ok(l) } else { self.eval(right) };
            }
            "??" => {
                let l = self.eval(left)?;
                return if matches!(l, Value::Undefined | Value::Null) {
                    self.eval(right)
                } else {
                    Ok(l)
                };
            }
            _ => {}
        }
        let l = self.eval(left)?;
        let r = self.eval(right)?;
        Ok(match op {
            "+" => match (&l, &r) {
                (Value::Str(_), _) | (_, Value::Str(_)) | (Value::Array(_), _) | (_, Value::Array(_)) => {
                    Value::Str(format!("{}{}", l, r))
                }
                _ => Value::Number(l.to_number() + r.to_number()),
            },
            "-" => Value::Number(l.to_number() - r.to_number()),
            "*" => Value::Number(l.to_number() * r.to_number()),
            "/" => Value::Number(l.to_number() / r.to_number()),
            "%" => Value::Number(l.to_number() % r.to_number()),
            "**" => Value::Number(l.to_number().powf(r.to_number())),
            "===" => Value::Bool(strict_equals(&l, &r)),
            "!==" => Value::Bool(!strict_equals(&l, &r)),
            "==" => Value::Bool(loose_equals(&l, &r)),
            "!=" => Value::Bool(!loose_equals(&l, &r)),
            "<" | ">" | "<=" | ">=" => Value::Bool(compare(op, &l, &r)),
            "in" => match &r {
                Value::Object(props) => {
                    let k = l.to_string();
                    Value::Bool(props.iter().any(|(p, _)| *p == k))
                }
                other => return Err(type_error("'in'", "an object", other, span)),
            },
            other => return Err(unsupported(&format!("the '{}' operator", other), span)),
        })
    }

    fn member(&mut self, obj: Value, property: &str, span: Span) -> Result<Value, WeaveError> {
        match obj {
            Value::Namespace(Namespace::Process) => {
                if property != "env" {
                    return Ok(Value::Undefined);
                }
                self.require_env(span)?;
                let mut vars: Vec<(String, Value)> = std::env::vars().map(|(k, v)| (k, Value::Str(v))).collect();
                vars.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(Value::Object(vars))
            }
            Value::Namespace(Namespace::Math) => Ok(match property {
                "PI" => Value::Number(std::f64::consts::PI),
                "E" => Value::Number(std::f64::consts::E),
                _ => Value::Builtin(Namespace::Math, property.to_string()),
            }),
            Value::Namespace(Namespace::Path) if property == "sep" => Ok(Value::Str("/".to_string())),
            Value::Namespace(ns) => Ok(Value::Builtin(ns, property.to_string())),
            Value::Undefined | Value::Null => Err(err_ctx!(
                Eval,
                format!("cannot read property '{}' of {}", property, obj.type_name()),
                span
            )),
            other => Ok(other.get(property)),
        }
    }

    fn require_fs(&self, what: &str, span: Span) -> Result<(), WeaveError> {
        if self.capabilities.fs {
            return Ok(());
        }
        Err(err_ctx!(
            Capability,
            format!("{} needs filesystem access", what),
            span,
            "grant it with comptime({ fs: 'read' }, ...)"
        ))
    }

    fn require_env(&self, span: Span) -> Result<(), WeaveError> {
        if self.capabilities.env {
            return Ok(());
        }
        Err(err_ctx!(
            Capability,
            "process.env needs environment access",
            span,
            "grant it with comptime({ env: 'read' }, ...)"
        ))
    }

    fn resolve_path(&self, p: &str) -> PathBuf {
        let path = Path::new(p);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn call(&mut self, f: Value, args: Vec<Value>, span: Span) -> Result<Value, WeaveError> {
        match f {
            Value::Closure(c) => self.call_closure(&c, args, span),
            Value::Require => {
                let name = args.first().map(Value::to_string).unwrap_or_default();
                match name.as_str() {
                    "path" | "node:path" => Ok(Value::Namespace(Namespace::Path)),
                    "fs" | "node:fs" => {
                        self.require_fs("require('fs')", span)?;
                        Ok(Value::Namespace(Namespace::Fs))
                    }
                    other => Err(err_ctx!(
                        Capability,
                        format!("module '{}' is not available at compile time", other),
                        span,
                        "only 'path' and 'fs' can be required"
                    )),
                }
            }
            Value::Builtin(ns, name) => self.call_builtin(ns, &name, args, span),
            other => Err(err_ctx!(Eval, format!("a {} is not callable", other.type_name()), span)),
        }
    }

    fn call_closure(&mut self, c: &Closure, args: Vec<Value>, span: Span) -> Result<Value, WeaveError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(err_ctx!(
                Eval,
                format!("compile-time calls nested more than {} deep", MAX_CALL_DEPTH),
                span,
                "check for recursion without a base case"
            ));
        }
        let frame = self.new_frame(&c.env);
        let prev = std::mem::replace(&mut self.env, frame);
        self.depth += 1;
        let result = self.call_in_frame(c, args, span);
        self.depth -= 1;
        self.env = prev;
        result
    }

    fn call_in_frame(&mut self, c: &Closure, args: Vec<Value>, span: Span) -> Result<Value, WeaveError> {
        for (i, p) in c.params.iter().enumerate() {
            let mut value = if p.rest {
                Value::Array(args.iter().skip(i).cloned().collect())
            } else {
                args.get(i).cloned().unwrap_or(Value::Undefined)
            };
            if matches!(value, Value::Undefined) {
                if let Some(default) = &p.default {
                    value = self.eval(default)?;
                }
            }
            self.bind(&p.pattern, value, span)?;
        }
        match &c.body {
            ArrowBody::Expr(e) => self.eval(e),
            ArrowBody::Block(stmts) => match self.exec_stmts(stmts)? {
                Flow::Return(value) => Ok(value),
                Flow::Normal => Ok(Value::Undefined),
            },
        }
    }

    fn call_builtin(&mut self, ns: Namespace, name: &str, args: Vec<Value>, span: Span) -> Result<Value, WeaveError> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
        let str_arg = |i: usize| arg(i).to_string();
        match (ns, name) {
            (Namespace::Path, "join") => {
                let joined = args.iter().fold(PathBuf::new(), |acc, a| acc.join(a.to_string()));
                Ok(Value::Str(normalize(&joined)))
            }
            (Namespace::Path, "resolve") => {
                let joined = args
                    .iter()
                    .fold(self.base_dir.clone(), |acc, a| acc.join(a.to_string()));
                Ok(Value::Str(normalize(&joined)))
            }
            (Namespace::Path, "dirname") => Ok(Value::Str(
                Path::new(&str_arg(0))
                    .parent()
                    .map(|p| p.to_string_lossy().into_owned())
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| ".".to_string()),
            )),
            (Namespace::Path, "basename") => {
                let base = Path::new(&str_arg(0))
                    .file_name()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let ext = args.get(1).map(Value::to_string).unwrap_or_default();
                Ok(Value::Str(match base.strip_suffix(ext.as_str()) {
                    Some(stem) if !ext.is_empty() => stem.to_string(),
                    _ => base,
                }))
            }
            (Namespace::Path, "extname") => Ok(Value::Str(
                Path::new(&str_arg(0))
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy()))
                    .unwrap_or_default(),
            )),
            (Namespace::Fs, "readFileSync") => {
                self.require_fs("fs.readFileSync", span)?;
                let path = self.resolve_path(&str_arg(0));
                fs::read_to_string(&path).map(Value::Str).map_err(|e| {
                    err_ctx!(Eval, format!("cannot read '{}': {}", path.display(), e), span)
                })
            }
            (Namespace::Fs, "readdirSync") => {
                self.require_fs("fs.readdirSync", span)?;
                let path = self.resolve_path(&str_arg(0));
                let entries = fs::read_dir(&path).map_err(|e| {
                    err_ctx!(Eval, format!("cannot list '{}': {}", path.display(), e), span)
                })?;
                let mut names: Vec<String> = entries
                    .filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect();
                names.sort();
                Ok(Value::Array(names.into_iter().map(Value::Str).collect()))
            }
            (Namespace::Fs, "existsSync") => {
                self.require_fs("fs.existsSync", span)?;
                Ok(Value::Bool(self.resolve_path(&str_arg(0)).exists()))
            }
            (Namespace::Json, "stringify") => {
                let json = arg(0).to_json();
                let indent = arg(2);
                let text = match indent {
                    Value::Number(n) if n > 0.0 => serde_json::to_string_pretty(&json),
                    _ => serde_json::to_string(&json),
                };
                text.map(Value::Str)
                    .map_err(|e| err_ctx!(Eval, format!("JSON.stringify failed: {}", e), span))
            }
            (Namespace::Json, "parse") => serde_json::from_str(&str_arg(0))
                .map(Value::from_json)
                .map_err(|e| err_ctx!(Eval, format!("JSON.parse failed: {}", e), span)),
            (Namespace::Math, _) => math(name, &args, span),
            (Namespace::Object, "keys") => Ok(Value::Array(
                object_entries(&arg(0)).into_iter().map(|(k, _)| Value::Str(k)).collect(),
            )),
            (Namespace::Object, "values") => Ok(Value::Array(
                object_entries(&arg(0)).into_iter().map(|(_, v)| v).collect(),
            )),
            (Namespace::Object, "entries") => Ok(Value::Array(
                object_entries(&arg(0))
                    .into_iter()
                    .map(|(k, v)| Value::Array(vec![Value::Str(k), v]))
                    .collect(),
            )),
            (Namespace::Fs, _) => {
                self.require_fs(&format!("fs.{}", name), span)?;
                Err(unsupported(&format!("fs.{}", name), span))
            }
            (Namespace::Process, _) => Err(err_ctx!(
                Capability,
                format!("process.{} is not available at compile time", name),
                span
            )),
            _ => Err(unsupported(&format!("'{}'", name), span)),
        }
    }

    fn call_method(&mut self, receiver: Value, name: &str, args: Vec<Value>, span: Span) -> Result<Value, WeaveError> {
        match &receiver {
            Value::Namespace(_) | Value::Undefined | Value::Null => {
                let f = self.member(receiver, name, span)?;
                self.call(f, args, span)
            }
            Value::Str(s) => string_method(s, name, &args, span),
            Value::Array(items) => self.array_method(items, name, args, span),
            Value::Object(_) => {
                let f = receiver.get(name);
                self.call(f, args, span)
            }
            other => Err(err_ctx!(
                Eval,
                format!("'{}' is not a method of a {}", name, other.type_name()),
                span
            )),
        }
    }

    fn array_method(&mut self, items: &[Value], name: &str, args: Vec<Value>, span: Span) -> Result<Value, WeaveError> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Undefined);
        match name {
            "join" => {
                let sep = match arg(0) {
                    Value::Undefined => ",".to_string(),
                    v => v.to_string(),
                };
                Ok(Value::Str(items.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(&sep)))
            }
            "includes" => Ok(Value::Bool(items.iter().any(|v| strict_equals(v, &arg(0))))),
            "indexOf" => Ok(Value::Number(
                items
                    .iter()
                    .position(|v| strict_equals(v, &arg(0)))
                    .map_or(-1.0, |i| i as f64),
            )),
            "slice" => {
                let (a, b) = slice_bounds(items.len(), &arg(0), &arg(1));
                Ok(Value::Array(items[a..b].to_vec()))
            }
            "concat" => {
                let mut out = items.to_vec();
                for a in args {
                    match a {
                        Value::Array(vs) => out.extend(vs),
                        v => out.push(v),
                    }
                }
                Ok(Value::Array(out))
            }
            "reverse" => Ok(Value::Array(items.iter().rev().cloned().collect())),
            "map" | "filter" | "some" | "every" | "find" => {
                let f = arg(0);
                let mut out = Vec::new();
                for (i, v) in items.iter().enumerate() {
                    let r = self.call(f.clone(), vec![v.clone(), Value::Number(i as f64)], span)?;
                    match name {
                        "map" => out.push(r),
                        "filter" if r.truthy() => out.push(v.clone()),
                        "some" if r.truthy() => return Ok(Value::Bool(true)),
                        "every" if !r.truthy() => return Ok(Value::Bool(false)),
                        "find" if r.truthy() => return Ok(v.clone()),
                        _ => {}
                    }
                }
                Ok(match name {
                    "some" => Value::Bool(false),
                    "every" => Value::Bool(true),
                    "find" => Value::Undefined,
                    _ => Value::Array(out),
                })
            }
            "reduce" => {
                let f = arg(0);
                let mut iter = items.iter().cloned();
                let mut acc = match args.get(1) {
                    Some(init) => init.clone(),
                    None => iter
                        .next()
                        .ok_or_else(|| err_ctx!(Eval, "reduce of empty array with no initial value", span))?,
                };
                for v in iter {
                    acc = self.call(f.clone(), vec![acc, v], span)?;
                }
                Ok(acc)
            }
            _ => Err(unsupported(&format!("array method '{}'", name), span)),
        }
    }
}

// ============================================================================
// LIBRARY HELPERS
// ============================================================================

fn unsupported(what: &str, span: Span) -> WeaveError {
    err_ctx!(Eval, format!("{} is not supported in compile-time code", what), span)
}

fn type_error(op: &str, expected: &str, got: &Value, span: Span) -> WeaveError {
    err_ctx!(Eval, format!("{} expects {}, got a {}", op, expected, got.type_name()), span)
}

fn parse_number(raw: &str) -> f64 {
    let clean: String = raw.chars().filter(|c| *c != '_').collect();
    let lower = clean.to_ascii_lowercase();
    let radix = |digits: &str, radix: u32| i64::from_str_radix(digits, radix).map_or(f64::NAN, |v| v as f64);
    if let Some(d) = lower.strip_prefix("0x") {
        radix(d, 16)
    } else if let Some(d) = lower.strip_prefix("0o") {
        radix(d, 8)
    } else if let Some(d) = lower.strip_prefix("0b") {
        radix(d, 2)
    } else {
        lower.trim_end_matches('n').parse().unwrap_or(f64::NAN)
    }
}

fn normalize(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    let absolute = path.is_absolute();
    for c in path.components() {
        match c {
            std::path::Component::ParentDir => {
                if parts.last().is_some_and(|p| p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..".to_string());
                }
            }
            std::path::Component::Normal(p) => parts.push(p.to_string_lossy().into_owned()),
            _ => {}
        }
    }
    let joined = parts.join("/");
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Array(_), _) | (Value::Object(_), _) | (Value::Closure(_), _) => false,
        _ => a == b,
    }
}

fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
        (Value::Str(_), Value::Str(_)) => a == b,
        (Value::Number(_) | Value::Str(_) | Value::Bool(_), Value::Number(_) | Value::Str(_) | Value::Bool(_)) => {
            a.to_number() == b.to_number()
        }
        _ => strict_equals(a, b),
    }
}

fn compare(op: &str, a: &Value, b: &Value) -> bool {
    let ord = match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => a.to_number().partial_cmp(&b.to_number()),
    };
    let Some(ord) = ord else {
        return false;
    };
    match op {
        "<" => ord.is_lt(),
        ">" => ord.is_gt(),
        "<=" => ord.is_le(),
        _ => ord.is_ge(),
    }
}

fn object_entries(v: &Value) -> Vec<(String, Value)> {
    match v {
        Value::Object(props) => {
            let mut out: Vec<(String, Value)> = Vec::new();
            for (k, v) in props {
                match out.iter_mut().find(|(e, _)| e == k) {
                    Some(slot) => slot.1 = v.clone(),
                    None => out.push((k.clone(), v.clone())),
                }
            }
            out
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

fn slice_bounds(len: usize, start: &Value, end: &Value) -> (usize, usize) {
    let clamp = |v: &Value, default: usize| -> usize {
        match v {
            Value::Undefined => default,
            v => {
                let n = v.to_number();
                if n.is_nan() {
                    0
                } else if n < 0.0 {
                    len.saturating_sub((-n) as usize)
                } else {
                    (n as usize).min(len)
                }
            }
        }
    };
    let a = clamp(start, 0);
    let b = clamp(end, len);
    (a, b.max(a))
}

fn math(name: &str, args: &[Value], span: Span) -> Result<Value, WeaveError> {
    let n = |i: usize| args.get(i).map_or(f64::NAN, Value::to_number);
    Ok(Value::Number(match name {
        "floor" => n(0).floor(),
        "ceil" => n(0).ceil(),
        "round" => (n(0) + 0.5).floor(),
        "trunc" => n(0).trunc(),
        "abs" => n(0).abs(),
        "sqrt" => n(0).sqrt(),
        "pow" => n(0).powf(n(1)),
        "sign" => {
            let v = n(0);
            if v == 0.0 || v.is_nan() {
                v
            } else {
                v.signum()
            }
        }
        "max" => args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, f64::max),
        "min" => args.iter().map(Value::to_number).fold(f64::INFINITY, f64::min),
        other => return Err(unsupported(&format!("Math.{}", other), span)),
    }))
}

fn string_method(s: &str, name: &str, args: &[Value], span: Span) -> Result<Value, WeaveError> {
    let str_arg = |i: usize| args.get(i).map(Value::to_string).unwrap_or_default();
    Ok(match name {
        "toUpperCase" => Value::Str(s.to_uppercase()),
        "toLowerCase" => Value::Str(s.to_lowercase()),
        "trim" => Value::Str(s.trim().to_string()),
        "trimStart" => Value::Str(s.trim_start().to_string()),
        "trimEnd" => Value::Str(s.trim_end().to_string()),
        "includes" => Value::Bool(s.contains(&str_arg(0))),
        "startsWith" => Value::Bool(s.starts_with(&str_arg(0))),
        "endsWith" => Value::Bool(s.ends_with(&str_arg(0))),
        "indexOf" => Value::Number(s.find(&str_arg(0)).map_or(-1.0, |i| s[..i].chars().count() as f64)),
        "replace" => Value::Str(s.replacen(&str_arg(0), &str_arg(1), 1)),
        "replaceAll" => Value::Str(s.replace(&str_arg(0), &str_arg(1))),
        "repeat" => Value::Str(s.repeat(args.first().map_or(0.0, Value::to_number).max(0.0) as usize)),
        "split" => match args.first() {
            None | Some(Value::Undefined) => Value::Array(vec![Value::Str(s.to_string())]),
            Some(sep) => {
                let sep = sep.to_string();
                if sep.is_empty() {
                    Value::Array(s.chars().map(|c| Value::Str(c.to_string())).collect())
                } else {
                    Value::Array(s.split(sep.as_str()).map(|p| Value::Str(p.to_string())).collect())
                }
            }
        },
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let (a, b) = slice_bounds(
                chars.len(),
                args.first().unwrap_or(&Value::Undefined),
                args.get(1).unwrap_or(&Value::Undefined),
            );
            Value::Str(chars[a..b].iter().collect())
        }
        "padStart" | "padEnd" => {
            let width = args.first().map_or(0.0, Value::to_number).max(0.0) as usize;
            let fill = match args.get(1) {
                Some(v) => v.to_string(),
                None => " ".to_string(),
            };
            let len = s.chars().count();
            if len >= width || fill.is_empty() {
                Value::Str(s.to_string())
            } else {
                let pad: String = fill.chars().cycle().take(width - len).collect();
                Value::Str(if name == "padStart" {
                    format!("{}{}", pad, s)
                } else {
                    format!("{}{}", s, pad)
                })
            }
        }
        "toString" => Value::Str(s.to_string()),
        other => return Err(unsupported(&format!("string method '{}'", other), span)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_expression;

    fn eval(src: &str, caps: Capabilities) -> Result<Value, WeaveError> {
        Sandbox::new(caps, ".").run(&parse_expression(src).unwrap())
    }

    #[test]
    fn test_pure_arithmetic_and_strings() {
        let none = Capabilities::default();
        assert_eq!(eval("1 + 2 * 3", none).unwrap(), Value::Number(7.0));
        assert_eq!(eval("`v${1 + 1}`.toUpperCase()", none).unwrap(), Value::Str("V2".into()));
        assert_eq!(
            eval("[1, 2, 3].map(x => x * x).join('-')", none).unwrap(),
            Value::Str("1-4-9".into())
        );
        assert_eq!(
            eval("(() => { const a = 2; const { b } = { b: 3 }; return a ** b; })", none).unwrap(),
            Value::Number(8.0)
        );
    }

    #[test]
    fn test_closures_see_their_own_binding() {
        let none = Capabilities::default();
        assert_eq!(
            eval("(() => { const f = (n) => n <= 0 ? 0 : 1 + f(n - 1); return f(10); })", none).unwrap(),
            Value::Number(10.0)
        );
        assert_eq!(
            eval("(function fact(n) { return n <= 1 ? 1 : n * fact(n - 1); })(5)", none).unwrap(),
            Value::Number(120.0)
        );
    }

    #[test]
    fn test_if_and_function_declarations() {
        let src = "() => {
            const n = 7;
            if (n % 2 === 0) {
                return 'even';
            } else if (isSmall(n)) {
                return label('small odd');
            }
            function isSmall(x) { return x < 10; }
            function label(s, suffix = '!') { return s + suffix; }
            return 'odd';
        }";
        assert_eq!(eval(src, Capabilities::default()).unwrap(), Value::Str("small odd!".into()));
    }

    #[test]
    fn test_runaway_recursion_is_an_error() {
        let err = eval("(() => { const f = (n) => f(n + 1); return f(0); })", Capabilities::default()).unwrap_err();
        assert!(matches!(err, WeaveError::Eval { .. }));
        assert!(err.to_string().contains("nested more than 64 deep"), "{}", err);
    }

    #[test]
    fn test_loops_are_rejected() {
        let err = eval("() => { while (true) {} }", Capabilities::default()).unwrap_err();
        assert!(err.to_string().contains("only declarations"), "{}", err);
    }

    #[test]
    fn test_filesystem_denied_without_grant() {
        let err = eval("fs.readFileSync('x.txt', 'utf8')", Capabilities::default()).unwrap_err();
        assert!(err.is_capability_violation());
        let err = eval("require('fs')", Capabilities::default()).unwrap_err();
        assert!(err.is_capability_violation());
        let err = eval("process.env.HOME", Capabilities::default()).unwrap_err();
        assert!(err.is_capability_violation());
    }

    #[test]
    fn test_unknown_modules_rejected_even_with_grants() {
        let all = Capabilities { fs: true, env: true };
        let err = eval("require('child_process')", all).unwrap_err();
        assert!(err.is_capability_violation());
        assert!(err.to_string().contains("child_process"));
    }

    #[test]
    fn test_path_always_allowed() {
        let none = Capabilities::default();
        assert_eq!(eval("path.join('a', 'b', '../c.ts')", none).unwrap(), Value::Str("a/c.ts".into()));
        assert_eq!(eval("require('path').extname('x.json')", none).unwrap(), Value::Str(".json".into()));
        assert_eq!(eval("path.basename('/a/b.ts', '.ts')", none).unwrap(), Value::Str("b".into()));
    }

    #[test]
    fn test_grant_parsing() {
        let caps = Capabilities::from_grant(&parse_expression("{ fs: 'read', env: false }").unwrap()).unwrap();
        assert_eq!(caps, Capabilities { fs: true, env: false });
        assert!(Capabilities::from_grant(&parse_expression("{ net: true }").unwrap()).is_err());
    }

    #[test]
    fn test_values_convert_to_literals() {
        let f = AstFactory::synthetic();
        let v = eval("({ a: [1, 'x'], b: null })", Capabilities::default()).unwrap();
        let e = v.to_expr(&f).unwrap();
        assert_eq!(crate::syntax::print_expr(&e), "{ a: [1, \"x\"], b: null }");
        assert!(eval("x => x", Capabilities::default()).unwrap().to_expr(&f).is_err());
    }
}
