//! Service dependency resolution for `wire`.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::{err_msg, WeaveError};

/// A layer that provides `service` and needs `requires` to be built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerProvider {
    pub service: String,
    /// Expression naming the layer value, e.g. `DatabaseLive`.
    pub layer: String,
    #[serde(default)]
    pub requires: Vec<String>,
    /// File or module the provider was declared in.
    #[serde(default)]
    pub origin: Option<String>,
}

impl LayerProvider {
    pub fn new(service: impl Into<String>, layer: impl Into<String>, requires: Vec<String>) -> Self {
        Self {
            service: service.into(),
            layer: layer.into(),
            requires,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// Layers in the order they are composed, root first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerPlan {
    pub layers: Vec<LayerProvider>,
    /// Services nothing provides, in discovery order.
    pub missing: Vec<String>,
}

impl LayerPlan {
    /// Layer expressions for code generation, with each missing service's
    /// own name appended at the end.
    pub fn expressions(&self) -> Vec<String> {
        self.layers
            .iter()
            .map(|p| p.layer.clone())
            .chain(self.missing.iter().cloned())
            .collect()
    }
}

fn select<'a>(candidates: Vec<&'a LayerProvider>, preferred_origin: Option<&str>) -> Option<&'a LayerProvider> {
    preferred_origin
        .and_then(|origin| {
            candidates
                .iter()
                .find(|p| p.origin.as_deref() == Some(origin))
                .copied()
        })
        .or_else(|| candidates.first().copied())
}

/// Resolves the layers needed to build every service in `required`.
///
/// `lookup` returns every provider registered for a service in registration
/// order. A provider declared in `preferred_origin` wins; otherwise the first
/// one does.
///
/// # Errors
/// A `Structural` error spelling out the cycle, e.g.
/// `circular layer dependency: A -> B -> C -> A`.
pub fn resolve_layers<'a, F>(required: &[String], lookup: F, preferred_origin: Option<&str>) -> Result<LayerPlan, WeaveError>
where
    F: Fn(&str) -> Vec<&'a LayerProvider>,
{
    // Discovery.
    let mut chosen: HashMap<String, &'a LayerProvider> = HashMap::new();
    let mut discovered: Vec<String> = Vec::new();
    let mut missing: Vec<String> = Vec::new();
    let mut queued: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    for service in required {
        if queued.insert(service.clone()) {
            queue.push_back(service.clone());
        }
    }
    while let Some(service) = queue.pop_front() {
        match select(lookup(&service), preferred_origin) {
            Some(provider) => {
                for dep in &provider.requires {
                    if queued.insert(dep.clone()) {
                        queue.push_back(dep.clone());
                    }
                }
                chosen.insert(service.clone(), provider);
                discovered.push(service);
            }
            None => missing.push(service),
        }
    }

    // Depth-first topological sort; dependencies come out first.
    let mut order: Vec<String> = Vec::new();
    let mut done: HashSet<String> = HashSet::new();
    let mut path: Vec<String> = Vec::new();
    for service in &discovered {
        visit(service, &chosen, &mut done, &mut path, &mut order)?;
    }
    order.reverse();

    Ok(LayerPlan {
        layers: order
            .iter()
            .filter_map(|s| chosen.get(s).map(|p| (*p).clone()))
            .collect(),
        missing,
    })
}

fn visit(
    service: &str,
    chosen: &HashMap<String, &LayerProvider>,
    done: &mut HashSet<String>,
    path: &mut Vec<String>,
    order: &mut Vec<String>,
) -> Result<(), WeaveError> {
    if done.contains(service) {
        return Ok(());
    }
    if let Some(start) = path.iter().position(|s| s == service) {
        let mut cycle: Vec<&str> = path[start..].iter().map(String::as_str).collect();
        cycle.push(service);
        return Err(err_msg!(Structural, "circular layer dependency: {}", cycle.join(" -> ")));
    }
    let Some(provider) = chosen.get(service) else {
        return Ok(());
    };
    path.push(service.to_string());
    for dep in &provider.requires {
        visit(dep, chosen, done, path, order)?;
    }
    path.pop();
    done.insert(service.to_string());
    order.push(service.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(service: &str, requires: &[&str]) -> LayerProvider {
        LayerProvider::new(service, format!("{}Live", service), requires.iter().map(|s| s.to_string()).collect())
    }

    fn resolve(providers: &[LayerProvider], required: &[&str]) -> Result<LayerPlan, WeaveError> {
        let required: Vec<String> = required.iter().map(|s| s.to_string()).collect();
        resolve_layers(
            &required,
            |s| providers.iter().filter(|p| p.service == s).collect(),
            None,
        )
    }

    #[test]
    fn test_root_first_then_dependencies() {
        let providers = vec![p("App", &["Db", "Log"]), p("Db", &["Log"]), p("Log", &[])];
        let plan = resolve(&providers, &["App"]).unwrap();
        assert_eq!(plan.expressions(), vec!["AppLive", "DbLive", "LogLive"]);
        assert!(plan.missing.is_empty());
    }

    #[test]
    fn test_exact_cycle_is_reported() {
        let providers = vec![p("A", &["B"]), p("B", &["C"]), p("C", &["A"])];
        let err = resolve(&providers, &["A"]).unwrap_err();
        assert_eq!(err.to_string(), "circular layer dependency: A -> B -> C -> A");
    }

    #[test]
    fn test_missing_services_are_appended() {
        let providers = vec![p("App", &["Config"])];
        let plan = resolve(&providers, &["App"]).unwrap();
        assert_eq!(plan.missing, vec!["Config"]);
        assert_eq!(plan.expressions(), vec!["AppLive", "Config"]);
    }

    #[test]
    fn test_preferred_origin_wins_over_registration_order() {
        let providers = vec![
            p("Db", &[]).with_origin("shared.ts"),
            LayerProvider::new("Db", "DbTest", vec![]).with_origin("app.ts"),
        ];
        let required = vec!["Db".to_string()];
        let lookup = |s: &str| -> Vec<&LayerProvider> { providers.iter().filter(|p| p.service == s).collect() };
        let plan = resolve_layers(&required, lookup, Some("app.ts")).unwrap();
        assert_eq!(plan.expressions(), vec!["DbTest"]);
        let plan = resolve_layers(&required, lookup, None).unwrap();
        assert_eq!(plan.expressions(), vec!["DbLive"]);
    }
}
