//! Built-in macros.
//!
//! Every built-in is registered globally, so it resolves by name whatever
//! module the call site imported it from.

pub mod binop;
pub mod comprehension;
pub mod comptime;
pub mod dedent;
pub mod derive;
pub mod hoist;
pub mod layers;

use std::sync::Arc;

use super::definition::MacroDefinition;
use super::registry::MacroRegistry;

/// Every built-in definition, in registration order.
pub fn builtin_macros() -> Vec<Arc<MacroDefinition>> {
    let mut defs = vec![binop::definition(), comptime::definition()];
    defs.extend(comprehension::definitions());
    defs.extend(layers::definitions());
    defs.push(hoist::definition());
    defs.extend(derive::definitions());
    defs.push(dedent::definition());
    defs
}

pub fn register_builtins(registry: &mut MacroRegistry) {
    for def in builtin_macros() {
        // Built-ins are global and registered into a fresh registry, so the
        // conflict rules never apply.
        if let Err(e) = registry.register(def) {
            tracing::warn!(error = %e, "failed to register built-in macro");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::MacroKind;

    #[test]
    fn test_builtins_cover_every_kind_they_promise() {
        let registry = MacroRegistry::with_builtins();
        for name in ["__binop__", "comptime", "Do", "wire", "hoist"] {
            assert!(registry.contains(MacroKind::Expression, name), "{}", name);
        }
        assert!(registry.contains(MacroKind::Attribute, "layer"));
        for name in ["Eq", "Show", "Builder"] {
            assert!(registry.contains(MacroKind::Derive, name), "{}", name);
        }
        assert!(registry.contains(MacroKind::TaggedTemplate, "dedent"));
        assert!(registry.labeled_block("let").is_some());
        assert!(registry.labeled_block("par").is_some());
    }

    #[test]
    fn test_registering_builtins_twice_is_idempotent() {
        let mut registry = MacroRegistry::with_builtins();
        let before = registry.len();
        register_builtins(&mut registry);
        assert_eq!(registry.len(), before);
    }
}
