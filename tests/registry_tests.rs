//! Registration and resolution rules of the macro registry.

use macroweave::macros::{define_expression_macro, Expansion, MacroInfo, MacroKind, MacroRegistry};
use macroweave::WeaveError;

fn constant(name: &str, module: Option<&str>, value: f64) -> std::sync::Arc<macroweave::macros::MacroDefinition> {
    let mut info = MacroInfo::new(name);
    if let Some(m) = module {
        info = info.module(m);
    }
    define_expression_macro(info, move |ctx, _| Ok(Expansion::Expr(ctx.factory().number(value))))
}

#[test]
fn test_same_definition_twice_is_a_no_op() {
    let mut registry = MacroRegistry::new();
    let def = constant("one", Some("lib-a"), 1.0);
    registry.register(def.clone()).unwrap();
    registry.register(def).unwrap();
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_conflict_names_both_modules() {
    let mut registry = MacroRegistry::new();
    registry.register(constant("one", Some("lib-a"), 1.0)).unwrap();
    let err = registry.register(constant("one", Some("lib-b"), 1.0)).unwrap_err();
    assert!(matches!(err, WeaveError::DuplicateMacro { .. }));
    let message = err.to_string();
    assert!(message.contains("lib-a"), "{}", message);
    assert!(message.contains("lib-b"), "{}", message);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_same_module_replaces() {
    let mut registry = MacroRegistry::new();
    registry.register(constant("one", Some("lib-a"), 1.0)).unwrap();
    let replacement = constant("one", Some("lib-a"), 2.0);
    registry.register(replacement.clone()).unwrap();
    assert_eq!(registry.len(), 1);
    let found = registry.resolve(MacroKind::Expression, "one", Some("lib-a")).unwrap();
    assert!(std::sync::Arc::ptr_eq(&found, &replacement));
}

#[test]
fn test_resolution_prefers_exact_module_then_global() {
    let mut registry = MacroRegistry::new();
    let global = constant("pick", None, 0.0);
    let scoped = constant("pick", Some("lib-a"), 1.0);
    registry.register(global.clone()).unwrap();
    registry.register(scoped.clone()).unwrap();

    let exact = registry.resolve(MacroKind::Expression, "pick", Some("lib-a")).unwrap();
    assert!(std::sync::Arc::ptr_eq(&exact, &scoped));
    let other = registry.resolve(MacroKind::Expression, "pick", Some("lib-z")).unwrap();
    assert!(std::sync::Arc::ptr_eq(&other, &global));
    let bare = registry.resolve(MacroKind::Expression, "pick", None).unwrap();
    assert!(std::sync::Arc::ptr_eq(&bare, &global));
}

#[test]
fn test_kinds_do_not_collide() {
    let registry = MacroRegistry::with_builtins();
    assert!(registry.contains(MacroKind::Expression, "wire"));
    assert!(!registry.contains(MacroKind::Derive, "wire"));
    assert!(registry.get(MacroKind::Attribute, "nothing").is_none());
}
