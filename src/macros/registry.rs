//! Macro registry: storage and resolution of macro definitions.
//!
//! Definitions are keyed by kind, name and origin module. The rules:
//!
//! | Incoming vs. existing (same kind and name)      | Result                      |
//! |-------------------------------------------------|-----------------------------|
//! | same `Arc`                                      | no-op                       |
//! | both carry a module, and the modules differ     | `DuplicateMacro` error      |
//! | same module (or both global)                    | incoming replaces existing  |
//! | one of them is global                           | both kept; global is fallback |
//!
//! Resolution prefers an exact module match, then the global definition, then
//! the first definition registered under the name.
//!
//! The registry is filled before compilation and only read afterwards; the
//! transformer holds it as `Arc<MacroRegistry>`.

use std::sync::Arc;

use super::definition::{MacroDefinition, MacroKind};
use crate::diagnostics::describe_module;
use crate::registry::Registry;
use crate::{ErrorContext, WeaveError};

type MacroKey = (MacroKind, String, Option<String>);

#[derive(Debug, Clone)]
pub struct MacroRegistry {
    entries: Registry<MacroKey, Arc<MacroDefinition>>,
}

impl Default for MacroRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MacroRegistry {
    pub fn new() -> Self {
        // Conflicts are decided in `register`; same-key writes replace.
        Self {
            entries: Registry::replacing("macros"),
        }
    }

    /// A registry holding every built-in macro.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtin::register_builtins(&mut registry);
        registry
    }

    /// Registers a definition.
    ///
    /// # Errors
    /// `DuplicateMacro` when a different definition of the same kind and name
    /// is registered from a different module. The error names both modules.
    pub fn register(&mut self, def: Arc<MacroDefinition>) -> Result<(), WeaveError> {
        let kind = def.kind();
        for ((k, name, module), existing) in self.entries.iter() {
            if *k != kind || *name != def.name {
                continue;
            }
            if Arc::ptr_eq(existing, &def) {
                return Ok(());
            }
            if let (Some(a), Some(b)) = (module, &def.module) {
                if a != b {
                    return Err(WeaveError::DuplicateMacro {
                        name: def.name.clone(),
                        kind: kind.to_string(),
                        existing: describe_module(Some(a)),
                        incoming: describe_module(Some(b)),
                        ctx: ErrorContext::none(),
                    });
                }
            }
        }
        let key = (kind, def.name.clone(), def.module.clone());
        self.entries.register(key, def)?;
        Ok(())
    }

    /// The first definition of `kind` registered under `name`, global ones
    /// first.
    pub fn get(&self, kind: MacroKind, name: &str) -> Option<Arc<MacroDefinition>> {
        self.resolve(kind, name, None)
    }

    /// Resolves `name` for an invocation whose identifier came from `module`.
    pub fn resolve(&self, kind: MacroKind, name: &str, module: Option<&str>) -> Option<Arc<MacroDefinition>> {
        if let Some(m) = module {
            let exact = (kind, name.to_string(), Some(m.to_string()));
            if let Some(def) = self.entries.get(&exact) {
                return Some(Arc::clone(def));
            }
        }
        let global = (kind, name.to_string(), None);
        if let Some(def) = self.entries.get(&global) {
            return Some(Arc::clone(def));
        }
        self.entries
            .iter()
            .find(|((k, n, _), _)| *k == kind && n == name)
            .map(|(_, def)| Arc::clone(def))
    }

    /// True when any macro of `kind` is registered under `name`.
    pub fn contains(&self, kind: MacroKind, name: &str) -> bool {
        self.entries.keys().any(|(k, n, _)| *k == kind && n == name)
    }

    /// Labeled-block macro whose label is `label`.
    pub fn labeled_block(&self, label: &str) -> Option<Arc<MacroDefinition>> {
        self.get(MacroKind::LabeledBlock, label)
    }

    /// Every definition, in registration order.
    pub fn get_all(&self) -> Vec<Arc<MacroDefinition>> {
        self.entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::definition::{define_expression_macro, Expansion, MacroInfo};

    fn noop(info: MacroInfo) -> Arc<MacroDefinition> {
        define_expression_macro(info, |_, call| {
            Ok(Expansion::Expr(crate::ast::AstFactory::new(call.span).null()))
        })
    }

    #[test]
    fn test_same_definition_twice_is_noop() {
        let mut reg = MacroRegistry::new();
        let def = noop(MacroInfo::new("sql").module("db"));
        reg.register(Arc::clone(&def)).unwrap();
        reg.register(Arc::clone(&def)).unwrap();
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_conflict_names_both_modules() {
        let mut reg = MacroRegistry::new();
        reg.register(noop(MacroInfo::new("sql").module("lib-a"))).unwrap();
        let err = reg
            .register(noop(MacroInfo::new("sql").module("lib-b")))
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("lib-a") && text.contains("lib-b"), "{}", text);
    }

    #[test]
    fn test_resolve_prefers_exact_module_then_global() {
        let mut reg = MacroRegistry::new();
        let global = noop(MacroInfo::new("q"));
        let scoped = noop(MacroInfo::new("q").module("m"));
        reg.register(Arc::clone(&global)).unwrap();
        reg.register(Arc::clone(&scoped)).unwrap();
        let exact = reg.resolve(MacroKind::Expression, "q", Some("m")).unwrap();
        assert!(Arc::ptr_eq(&exact, &scoped));
        let fallback = reg.resolve(MacroKind::Expression, "q", Some("other")).unwrap();
        assert!(Arc::ptr_eq(&fallback, &global));
        assert!(reg.resolve(MacroKind::Derive, "q", None).is_none());
    }

    #[test]
    fn test_same_module_reregistration_replaces() {
        let mut reg = MacroRegistry::new();
        reg.register(noop(MacroInfo::new("x").module("m"))).unwrap();
        let second = noop(MacroInfo::new("x").module("m").description("v2"));
        reg.register(Arc::clone(&second)).unwrap();
        assert_eq!(reg.len(), 1);
        let got = reg.get(MacroKind::Expression, "x").unwrap();
        assert!(Arc::ptr_eq(&got, &second));
    }
}
