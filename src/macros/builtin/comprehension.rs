//! Monadic comprehensions.
//!
//! Three surface forms compile to the same step list:
//!
//! ```text
//! Do(function* () { const a = yield* f(); const b = a + 1; return g(a, b); })
//! let: { a << f(); b = a + 1; } yield: { g(a, b) }
//! par: { a << f(); b << g(); } yield: { a + b }
//! ```
//!
//! Parsing produces a [`Comprehension`]; building it into combinator calls is
//! a separate, pure step.

use std::collections::HashSet;
use std::sync::Arc;

use crate::ast::visit::free_identifiers;
use crate::ast::{
    ArrayPatternElem, AstFactory, Expr, ExprNode, Param, Pattern, Stmt, StmtNode, VarKind,
};
use crate::macros::definition::{
    define_expression_macro, define_labeled_block_macro, CallInput, Expansion, LabeledInput,
    MacroDefinition, MacroInfo,
};
use crate::macros::MacroContext;
use crate::sourcemap::LineIndex;
use crate::{err_ctx, WeaveError};

// ============================================================================
// STEPS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Run `effect` and bind its result to `name`.
    Bind { name: String, effect: ExprNode },
    /// Bind the pure value `expr` to `name`.
    Map { name: String, expr: ExprNode },
}

impl Step {
    pub fn name(&self) -> &str {
        match self {
            Step::Bind { name, .. } | Step::Map { name, .. } => name,
        }
    }

    fn expr(&self) -> &ExprNode {
        match self {
            Step::Bind { effect, .. } => effect,
            Step::Map { expr, .. } => expr,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub steps: Vec<Step>,
    pub ret: ExprNode,
}

impl Comprehension {
    pub fn bind_count(&self) -> usize {
        self.steps.iter().filter(|s| matches!(s, Step::Bind { .. })).count()
    }
}

/// How combinators are spelled in the output.
#[derive(Debug, Clone, PartialEq)]
pub enum Combinators {
    /// `flatMap(effect, f)`, optionally qualified as `NS.flatMap(effect, f)`.
    Functions { namespace: Option<ExprNode> },
    /// `effect.flatMap(f)`.
    Methods,
}

// ============================================================================
// BUILDING
// ============================================================================

/// Builds nested `flatMap`/`map` calls: every bind but the last becomes a
/// `flatMap`, the last a `map`, and a comprehension without binds becomes
/// `succeed(ret)`. Map steps become immediately applied arrows.
pub fn build_sequential(f: &AstFactory, comp: &Comprehension, style: &Combinators) -> ExprNode {
    let mut body = comp.ret.clone();
    let mut seen_bind = false;
    for step in comp.steps.iter().rev() {
        body = match step {
            Step::Map { name, expr } => f.let_in(name, expr.clone(), body),
            Step::Bind { name, effect } => {
                let combinator = if seen_bind { "flatMap" } else { "map" };
                seen_bind = true;
                combine(f, style, combinator, effect.clone(), f.lambda(name, body))
            }
        };
    }
    if seen_bind {
        return body;
    }
    let succeed = match style {
        Combinators::Functions { namespace: Some(ns) } => f.member(ns.clone(), "succeed"),
        _ => f.ident("succeed"),
    };
    f.call(succeed, vec![body])
}

fn combine(f: &AstFactory, style: &Combinators, name: &str, effect: ExprNode, func: ExprNode) -> ExprNode {
    match style {
        Combinators::Functions { namespace: None } => f.call(f.ident(name), vec![effect, func]),
        Combinators::Functions { namespace: Some(ns) } => f.call(f.member(ns.clone(), name), vec![effect, func]),
        Combinators::Methods => f.method_call(effect, name, vec![func]),
    }
}

/// Builds an applicative composition of independent binds. Map steps wrap
/// the whole result, since nothing in the block may depend on them.
pub fn build_parallel(f: &AstFactory, comp: &Comprehension, promises: bool) -> ExprNode {
    let binds: Vec<(&str, &ExprNode)> = comp
        .steps
        .iter()
        .filter_map(|s| match s {
            Step::Bind { name, effect } => Some((name.as_str(), effect)),
            Step::Map { .. } => None,
        })
        .collect();

    let mut out = if promises {
        let pattern = Pattern::Array {
            elems: binds
                .iter()
                .map(|(name, _)| {
                    Some(ArrayPatternElem {
                        pattern: Pattern::Ident(name.to_string()),
                        default: None,
                    })
                })
                .collect(),
            rest: None,
        };
        let param = Param {
            pattern,
            ..Param::named("_")
        };
        let all = f.call(
            f.path("Promise.all"),
            vec![f.array(binds.iter().map(|(_, e)| (*e).clone()).collect())],
        );
        f.method_call(all, "then", vec![f.arrow(vec![param], comp.ret.clone())])
    } else {
        let curried = binds
            .iter()
            .rev()
            .fold(comp.ret.clone(), |body, (name, _)| f.lambda(name, body));
        let mut iter = binds.iter();
        match iter.next() {
            Some((_, first)) => {
                let mut chain = f.method_call((*first).clone(), "map", vec![curried]);
                for (_, effect) in iter {
                    chain = f.method_call(chain, "ap", vec![(*effect).clone()]);
                }
                chain
            }
            None => curried,
        }
    };
    for step in comp.steps.iter().rev() {
        if let Step::Map { name, expr } = step {
            out = f.let_in(name, expr.clone(), out);
        }
    }
    out
}

/// Names bound by earlier steps that a later step refers to, as
/// `(binding, referenced name)` of the first violation.
pub fn check_independence(steps: &[Step]) -> Option<(String, String)> {
    let mut bound: HashSet<&str> = HashSet::new();
    for step in steps {
        let free = free_identifiers(step.expr());
        if let Some(dep) = free.names.iter().find(|n| bound.contains(n.as_str())) {
            return Some((step.name().to_string(), dep.clone()));
        }
        bound.insert(step.name());
    }
    None
}

// ============================================================================
// PARSING
// ============================================================================

fn stmt_kind(stmt: &Stmt) -> &'static str {
    match stmt {
        Stmt::Expr(_) => "expression statement",
        Stmt::Var(d) => match d.kind {
            VarKind::Const => "`const` declaration",
            VarKind::Let => "`let` declaration",
            VarKind::Var => "`var` declaration",
        },
        Stmt::Function(_) => "function declaration",
        Stmt::Class(_) => "class declaration",
        Stmt::TypeAlias(_) => "type alias",
        Stmt::Import(_) => "import",
        Stmt::Export(_) | Stmt::ExportDefault(_) | Stmt::ExportNamed { .. } | Stmt::ExportAll { .. } => "export",
        Stmt::Return(_) => "`return` statement",
        Stmt::If { .. } => "`if` statement",
        Stmt::Block(_) => "block",
        Stmt::For { .. } | Stmt::ForIn { .. } => "`for` loop",
        Stmt::While { .. } | Stmt::DoWhile { .. } => "`while` loop",
        Stmt::Try { .. } => "`try` statement",
        Stmt::Throw(_) => "`throw` statement",
        Stmt::Break(_) => "`break` statement",
        Stmt::Continue(_) => "`continue` statement",
        Stmt::Switch { .. } => "`switch` statement",
        Stmt::Labeled { .. } => "labeled statement",
        Stmt::Verbatim(_) => "declaration",
        Stmt::Empty => "empty statement",
    }
}

fn unsupported(ctx: &MacroContext, what: &str, stmt: &StmtNode) -> WeaveError {
    let location = if stmt.span.is_dummy() {
        String::new()
    } else {
        let (line, col) = LineIndex::new(&ctx.file().text).line_col(stmt.span.start);
        format!(" at {}:{}:{}", ctx.file_name(), line + 1, col + 1)
    };
    err_ctx!(
        Structural,
        format!("unsupported {} in {}{}", stmt_kind(&stmt.value), what, location),
        stmt.span
    )
}

fn delegated_yield(expr: &ExprNode) -> Option<&ExprNode> {
    match &expr.value {
        Expr::Yield { arg: Some(arg), delegate: true } => Some(arg),
        _ => None,
    }
}

/// Parses a generator body.
pub fn parse_generator(ctx: &mut MacroContext, body: &[StmtNode]) -> Result<Comprehension, WeaveError> {
    let mut steps = Vec::new();
    let mut ret = None;
    for (i, stmt) in body.iter().enumerate() {
        match &stmt.value {
            Stmt::Var(decl) if decl.kind == VarKind::Const && decl.decls.len() == 1 => {
                let d = &decl.decls[0];
                let (Some(name), Some(init)) = (d.pattern.as_ident(), &d.init) else {
                    return Err(err_ctx!(
                        Structural,
                        "Do blocks only bind plain identifiers",
                        stmt.span,
                        "destructure inside the returned expression instead"
                    ));
                };
                steps.push(match delegated_yield(init) {
                    Some(effect) => Step::Bind {
                        name: name.to_string(),
                        effect: effect.clone(),
                    },
                    None => Step::Map {
                        name: name.to_string(),
                        expr: init.clone(),
                    },
                });
            }
            Stmt::Expr(e) if delegated_yield(e).is_some() => {
                if let Some(effect) = delegated_yield(e) {
                    steps.push(Step::Bind {
                        name: ctx.fresh_name("__ignored"),
                        effect: effect.clone(),
                    });
                }
            }
            Stmt::Return(value) if i + 1 == body.len() => {
                ret = Some(value.clone().unwrap_or_else(|| ctx.factory().undefined()));
            }
            Stmt::Empty => {}
            _ => return Err(unsupported(ctx, "a Do block", stmt)),
        }
    }
    Ok(Comprehension {
        steps,
        ret: ret.unwrap_or_else(|| ctx.factory().undefined()),
    })
}

/// Parses `a << effect;` and `b = expr;` statements of a labeled block.
pub fn parse_block(ctx: &mut MacroContext, label: &str, body: &[StmtNode]) -> Result<Vec<Step>, WeaveError> {
    let what = format!("a `{}` block", label);
    let mut steps = Vec::new();
    for stmt in body {
        let Stmt::Expr(expr) = &stmt.value else {
            if matches!(stmt.value, Stmt::Empty) {
                continue;
            }
            return Err(unsupported(ctx, &what, stmt));
        };
        match &expr.value {
            Expr::Binary { op, left, right } if op == "<<" => {
                let Expr::Ident(name) = &left.value else {
                    return Err(err_ctx!(
                        Structural,
                        "the left side of `<<` must be an identifier",
                        left.span
                    ));
                };
                steps.push(Step::Bind {
                    name: name.clone(),
                    effect: (**right).clone(),
                });
            }
            Expr::Assign { op, target, value } if op == "=" => {
                let Expr::Ident(name) = &target.value else {
                    return Err(err_ctx!(
                        Structural,
                        "only plain identifiers can be assigned in a comprehension",
                        target.span
                    ));
                };
                steps.push(Step::Map {
                    name: name.clone(),
                    expr: (**value).clone(),
                });
            }
            _ => steps.push(Step::Bind {
                name: ctx.fresh_name("__ignored"),
                effect: expr.clone(),
            }),
        }
    }
    Ok(steps)
}

fn parse_yield(ctx: &MacroContext, input: &LabeledInput<'_>) -> Result<ExprNode, WeaveError> {
    let Some((_, body)) = input.continuation else {
        return Err(err_ctx!(
            Structural,
            format!("`{}` block is missing its `yield: {{ ... }}` continuation", input.label),
            input.span
        ));
    };
    match body {
        [] => Ok(ctx.factory().undefined()),
        [single] => match &single.value {
            Stmt::Expr(e) => Ok(e.clone()),
            Stmt::Return(Some(e)) => Ok(e.clone()),
            _ => Err(unsupported(ctx, "a `yield` block", single)),
        },
        [_, extra, ..] => Err(err_ctx!(
            Structural,
            "a `yield` block holds exactly one expression",
            extra.span
        )),
    }
}

// ============================================================================
// MACROS
// ============================================================================

pub fn definitions() -> Vec<Arc<MacroDefinition>> {
    vec![
        define_expression_macro(
            MacroInfo::new("Do")
                .description("Compiles a generator into flatMap/map calls")
                .cacheable(),
            expand_do,
        ),
        define_labeled_block_macro(
            MacroInfo::new("let").description("Sequential comprehension"),
            &["yield"],
            expand_let,
        ),
        define_labeled_block_macro(
            MacroInfo::new("par").description("Parallel comprehension over independent effects"),
            &["yield"],
            expand_par,
        ),
    ]
}

fn expand_do(ctx: &mut MacroContext, input: &CallInput<'_>) -> Result<Expansion, WeaveError> {
    let (namespace, generator) = match input.args {
        [g] => (None, g),
        [ns, g] => (Some(ns.clone()), g),
        _ => {
            return Err(err_ctx!(
                Expansion,
                format!("Do expects 1 or 2 arguments, got {}", input.args.len()),
                input.span
            ))
        }
    };
    let body = match &generator.value {
        Expr::Function(func) if func.is_generator => func.body.as_deref().unwrap_or_default(),
        _ => {
            return Err(err_ctx!(
                Expansion,
                "Do expects a generator function",
                generator.span,
                "write Do(function* () { ... })"
            ))
        }
    };
    let comp = parse_generator(ctx, body)?;
    let out = build_sequential(&ctx.factory(), &comp, &Combinators::Functions { namespace });
    Ok(Expansion::Expr(out))
}

fn expand_let(ctx: &mut MacroContext, input: &LabeledInput<'_>) -> Result<Vec<StmtNode>, WeaveError> {
    let steps = parse_block(ctx, input.label, input.body)?;
    let ret = parse_yield(ctx, input)?;
    let comp = Comprehension { steps, ret };
    if comp.bind_count() == 0 {
        return Err(err_ctx!(
            Structural,
            "a `let` block needs at least one `name << effect` binding",
            input.span
        ));
    }
    let f = ctx.factory();
    Ok(vec![f.expr_stmt(build_sequential(&f, &comp, &Combinators::Methods))])
}

fn expand_par(ctx: &mut MacroContext, input: &LabeledInput<'_>) -> Result<Vec<StmtNode>, WeaveError> {
    let steps = parse_block(ctx, input.label, input.body)?;
    if let Some((binding, dep)) = check_independence(&steps) {
        let span = steps
            .iter()
            .find(|s| s.name() == binding)
            .map_or(input.span, |s| s.expr().span);
        return Err(err_ctx!(
            Structural,
            format!(
                "'{}' depends on '{}', which is bound earlier in the same `par` block",
                binding, dep
            ),
            span,
            "use a `let` block when one effect needs another's result"
        ));
    }
    let ret = parse_yield(ctx, input)?;
    let comp = Comprehension { steps, ret };
    if comp.bind_count() == 0 {
        return Err(err_ctx!(
            Structural,
            "a `par` block needs at least one `name << effect` binding",
            input.span
        ));
    }
    let promises = comp.steps.iter().all(|s| match s {
        Step::Bind { effect, .. } => ctx.oracle().is_promise_like(effect),
        Step::Map { .. } => true,
    });
    let f = ctx.factory();
    Ok(vec![f.expr_stmt(build_parallel(&f, &comp, promises))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::{parse_expression, print_expr};
    use crate::transform::{transform_code, TransformOptions};

    fn expand(src: &str) -> crate::transform::TransformOutput {
        transform_code(src, &TransformOptions::for_file("c.ts")).unwrap()
    }

    fn bind(name: &str, src: &str) -> Step {
        Step::Bind {
            name: name.into(),
            effect: parse_expression(src).unwrap(),
        }
    }

    #[test]
    fn test_n_minus_one_flat_maps_and_one_map() {
        let comp = Comprehension {
            steps: vec![bind("a", "f()"), bind("b", "g(a)"), bind("c", "h(b)")],
            ret: parse_expression("a + c").unwrap(),
        };
        let out = print_expr(&build_sequential(
            &AstFactory::synthetic(),
            &comp,
            &Combinators::Functions { namespace: None },
        ));
        assert_eq!(out.matches("flatMap(").count(), 2);
        assert_eq!(out.matches(" map(").count(), 1);
        assert_eq!(out, "flatMap(f(), a => flatMap(g(a), b => map(h(b), c => a + c)))");
    }

    #[test]
    fn test_no_binds_is_succeed() {
        let comp = Comprehension {
            steps: vec![],
            ret: parse_expression("1").unwrap(),
        };
        let ns = Some(parse_expression("Effect").unwrap());
        let out = build_sequential(&AstFactory::synthetic(), &comp, &Combinators::Functions { namespace: ns });
        assert_eq!(print_expr(&out), "Effect.succeed(1)");
    }

    #[test]
    fn test_do_with_namespace_and_map_step() {
        let out = expand(
            "const r = Do(Effect, function* () {\n  const a = yield* load();\n  const b = a + 1;\n  yield* log(b);\n  return b;\n});",
        );
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        assert_eq!(
            out.code,
            "const r = Effect.flatMap(load(), a => (b => Effect.map(log(b), __ignored => b))(a + 1));\n"
        );
    }

    #[test]
    fn test_unsupported_statement_names_kind_and_location() {
        let out = expand("const r = Do(function* () {\n  if (x) { }\n  return 1;\n});");
        assert_eq!(out.diagnostics.len(), 1);
        let msg = &out.diagnostics[0].message;
        assert!(msg.contains("`if` statement"), "{}", msg);
        assert!(msg.contains("c.ts:2:3"), "{}", msg);
    }

    #[test]
    fn test_let_block_compiles_to_method_chain() {
        let out = expand("let: { a << fetchUser(); b = a.id; c << fetchPosts(b); } yield: { c }");
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        assert_eq!(out.code, "fetchUser().flatMap(a => (b => fetchPosts(b).map(c => c))(a.id));\n");
    }

    #[test]
    fn test_par_rejects_dependent_bindings() {
        let out = expand("par: { a << f1(); b << g(a); } yield: { a + b }");
        assert_eq!(out.diagnostics.len(), 1);
        let msg = &out.diagnostics[0].message;
        assert!(msg.contains("'b'") && msg.contains("'a'"), "{}", msg);
    }

    #[test]
    fn test_par_applicative_and_promise_forms() {
        let out = expand("par: { a << left(); b << right(); } yield: { a + b }");
        assert_eq!(out.code, "left().map(a => b => a + b).ap(right());\n");

        let out = expand(
            "async function one(): Promise<number> { return 1; }\npar: { a << one(); b << fetch(u); } yield: { a + b }",
        );
        assert!(
            out.code.ends_with("Promise.all([one(), fetch(u)]).then(([a, b]) => a + b);\n"),
            "{}",
            out.code
        );
    }

    #[test]
    fn test_missing_yield_is_reported() {
        let out = expand("let: { a << f(); }");
        assert!(out.diagnostics[0].message.contains("yield"));
    }
}
