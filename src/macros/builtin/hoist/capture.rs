//! Closure capture analysis.

use std::collections::HashSet;

use crate::ast::visit::{free_identifiers, free_identifiers_in_stmts};
use crate::ast::{Expr, ExprNode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub name: String,
    /// Passed to the hoisted function as a property of its first argument.
    pub needs_prop: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureAnalysis {
    pub can_hoist: bool,
    /// Why hoisting is impossible, when it is.
    pub hoist_blocker: Option<String>,
    pub captures: Vec<Capture>,
}

impl CaptureAnalysis {
    fn blocked(reason: String) -> Self {
        Self {
            can_hoist: false,
            hoist_blocker: Some(reason),
            captures: Vec::new(),
        }
    }

    pub fn prop_names(&self) -> impl Iterator<Item = &str> {
        self.captures.iter().filter(|c| c.needs_prop).map(|c| c.name.as_str())
    }
}

/// Decides whether `function` (a function or arrow expression) can move to
/// module scope.
///
/// Names the function binds itself are not captures. Free names bound in
/// `plain` enclosing scopes become props; free names in `stateful` ones
/// (reassigned mutable bindings) block hoisting, as does an arrow's use of
/// the enclosing `this` or `arguments`. A named function expression that
/// calls itself cannot also take props, since its own calls would not pass
/// them. Anything else is module-level or global and needs nothing.
pub fn analyze_captures(function: &ExprNode, stateful: &HashSet<String>, plain: &HashSet<String>) -> CaptureAnalysis {
    let free = free_identifiers(function);
    let mut self_name = None;
    match &function.value {
        Expr::Arrow(_) => {
            if free.uses_this {
                return CaptureAnalysis::blocked("it uses `this` from the enclosing function".to_string());
            }
            if free.uses_arguments {
                return CaptureAnalysis::blocked("it uses `arguments` from the enclosing function".to_string());
            }
        }
        Expr::Function(func) => {
            let own = free_identifiers_in_stmts(func.body.as_deref().unwrap_or_default());
            if own.uses_this {
                return CaptureAnalysis::blocked("it uses its own `this`".to_string());
            }
            if own.uses_arguments {
                return CaptureAnalysis::blocked("it uses its own `arguments`".to_string());
            }
            self_name = func.name.as_deref().filter(|name| {
                own.contains(name) && !func.params.iter().any(|p| p.pattern.bound_names().iter().any(|b| b == name))
            });
        }
        _ => return CaptureAnalysis::blocked("only function and arrow expressions can be hoisted".to_string()),
    }

    let mut captures = Vec::new();
    for name in free.names {
        if stateful.contains(&name) {
            return CaptureAnalysis::blocked(format!(
                "it captures '{}', which is reassigned in an enclosing scope",
                name
            ));
        }
        if plain.contains(&name) {
            captures.push(Capture { name, needs_prop: true });
        }
    }
    if let (Some(name), Some(first)) = (self_name, captures.first()) {
        return CaptureAnalysis::blocked(format!(
            "'{}' calls itself and captures '{}'; its own calls would not pass the captured values",
            name, first.name
        ));
    }
    CaptureAnalysis {
        can_hoist: true,
        hoist_blocker: None,
        captures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_expression;

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_locals_are_not_captures() {
        let f = parse_expression("(x) => { const y = x * k; return y + z; }").unwrap();
        let a = analyze_captures(&f, &set(&[]), &set(&["k", "x", "y"]));
        assert!(a.can_hoist);
        assert_eq!(a.prop_names().collect::<Vec<_>>(), vec!["k"]);
    }

    #[test]
    fn test_stateful_binding_blocks() {
        let f = parse_expression("() => count + 1").unwrap();
        let a = analyze_captures(&f, &set(&["count"]), &set(&[]));
        assert!(!a.can_hoist);
        assert!(a.hoist_blocker.unwrap().contains("'count'"));
    }

    #[test]
    fn test_self_calling_function() {
        let f = parse_expression("function fact(n) { return n <= 1 ? 1 : n * fact(n - 1); }").unwrap();
        let a = analyze_captures(&f, &set(&[]), &set(&["fact"]));
        assert!(a.can_hoist);
        assert!(a.captures.is_empty());

        let f = parse_expression("function walk(n) { return n ? walk(n - step) : 0; }").unwrap();
        let a = analyze_captures(&f, &set(&[]), &set(&["step"]));
        assert!(!a.can_hoist);
        assert!(a.hoist_blocker.unwrap().contains("'walk' calls itself and captures 'step'"));
    }

    #[test]
    fn test_this_in_arrow_blocks_but_not_in_nested_function() {
        let f = parse_expression("() => this.x").unwrap();
        assert!(!analyze_captures(&f, &set(&[]), &set(&[])).can_hoist);
        let f = parse_expression("() => function () { return this.x; }").unwrap();
        assert!(analyze_captures(&f, &set(&[]), &set(&[])).can_hoist);
    }
}
