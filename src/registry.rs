//! # Generic keyed registry
//!
//! A small insertion-ordered map with a configurable policy for duplicate
//! keys. The macro registry is built on it.
//!
//! | Strategy  | On duplicate key                                  |
//! |-----------|---------------------------------------------------|
//! | `Error`   | registration fails, existing value kept (default) |
//! | `Skip`    | incoming value dropped                            |
//! | `Replace` | incoming value replaces the existing one          |
//! | `Merge`   | `combiner(existing, incoming)` is stored          |
//!
//! A `Merge` registry must be given a combiner when it is built; asking for
//! one without a combiner fails immediately rather than on first conflict.
//!
//! ```rust
//! use macroweave::registry::{DuplicateStrategy, Registry};
//! let mut reg: Registry<String, u32> = Registry::new("ports");
//! reg.register("http".to_string(), 80).unwrap();
//! assert!(reg.register("http".to_string(), 8080).is_err());
//! assert!(Registry::<String, u32>::with_strategy("x", DuplicateStrategy::Merge).is_err());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{err_msg, WeaveError};

/// Policy applied when a key is registered twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateStrategy {
    #[default]
    Error,
    Skip,
    Replace,
    Merge,
}

/// Combines an existing value with an incoming one for `Merge` registries.
pub type Combiner<V> = Arc<dyn Fn(&V, V) -> V + Send + Sync>;

/// What `register` did with the incoming value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Inserted,
    Skipped,
    Replaced,
    Merged,
}

pub struct Registry<K, V> {
    name: String,
    strategy: DuplicateStrategy,
    combiner: Option<Combiner<V>>,
    entries: HashMap<K, V>,
    order: Vec<K>,
}

impl<K, V> fmt::Debug for Registry<K, V>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("keys", &self.order)
            .finish()
    }
}

impl<K, V> Clone for Registry<K, V>
where
    K: Clone,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            strategy: self.strategy,
            combiner: self.combiner.clone(),
            entries: self.entries.clone(),
            order: self.order.clone(),
        }
    }
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// An empty registry that rejects duplicate keys.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy: DuplicateStrategy::Error,
            combiner: None,
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// An empty registry with the given strategy. `Merge` needs a combiner and
    /// must be built with [`Registry::with_merge`].
    pub fn with_strategy(name: impl Into<String>, strategy: DuplicateStrategy) -> Result<Self, WeaveError> {
        let name = name.into();
        if strategy == DuplicateStrategy::Merge {
            return Err(err_msg!(
                Registry,
                "registry '{}' uses the merge strategy but has no combiner",
                name
            ));
        }
        let mut reg = Self::new(name);
        reg.strategy = strategy;
        Ok(reg)
    }

    /// A registry where later registrations win.
    pub fn replacing(name: impl Into<String>) -> Self {
        let mut reg = Self::new(name);
        reg.strategy = DuplicateStrategy::Replace;
        reg
    }

    pub fn with_merge(name: impl Into<String>, combiner: Combiner<V>) -> Self {
        let mut reg = Self::new(name);
        reg.strategy = DuplicateStrategy::Merge;
        reg.combiner = Some(combiner);
        reg
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> DuplicateStrategy {
        self.strategy
    }

    /// Registers `value` under `key`, applying the duplicate strategy.
    pub fn register(&mut self, key: K, value: V) -> Result<RegisterOutcome, WeaveError> {
        let Some(existing) = self.entries.get_mut(&key) else {
            self.order.push(key.clone());
            self.entries.insert(key, value);
            return Ok(RegisterOutcome::Inserted);
        };
        match self.strategy {
            DuplicateStrategy::Error => Err(err_msg!(
                Registry,
                "'{:?}' is already registered in registry '{}'",
                key,
                self.name
            )),
            DuplicateStrategy::Skip => Ok(RegisterOutcome::Skipped),
            DuplicateStrategy::Replace => {
                *existing = value;
                Ok(RegisterOutcome::Replaced)
            }
            DuplicateStrategy::Merge => {
                let combiner = self.combiner.as_ref().ok_or_else(|| {
                    err_msg!(Registry, "registry '{}' has no merge combiner", self.name)
                })?;
                let merged = combiner(existing, value);
                *existing = merged;
                Ok(RegisterOutcome::Merged)
            }
        }
    }

    /// Registers or replaces regardless of the strategy.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.insert(key, value)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let removed = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order
            .iter()
            .filter_map(move |k| self.entries.get(k).map(|v| (k, v)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_strategy_keeps_first() {
        let mut reg: Registry<&str, i32> = Registry::new("t");
        assert_eq!(reg.register("a", 1).unwrap(), RegisterOutcome::Inserted);
        let err = reg.register("a", 2).unwrap_err();
        assert!(err.to_string().contains("registry 't'"));
        assert_eq!(reg.get(&"a"), Some(&1));
    }

    #[test]
    fn test_skip_and_replace() {
        let mut skip: Registry<&str, i32> = Registry::with_strategy("s", DuplicateStrategy::Skip).unwrap();
        skip.register("a", 1).unwrap();
        assert_eq!(skip.register("a", 2).unwrap(), RegisterOutcome::Skipped);
        assert_eq!(skip.get(&"a"), Some(&1));

        let mut replace: Registry<&str, i32> =
            Registry::with_strategy("r", DuplicateStrategy::Replace).unwrap();
        replace.register("a", 1).unwrap();
        assert_eq!(replace.register("a", 2).unwrap(), RegisterOutcome::Replaced);
        assert_eq!(replace.get(&"a"), Some(&2));
    }

    #[test]
    fn test_merge_requires_combiner() {
        assert!(Registry::<&str, Vec<i32>>::with_strategy("m", DuplicateStrategy::Merge).is_err());
        let mut reg: Registry<&str, Vec<i32>> = Registry::with_merge(
            "m",
            Arc::new(|a: &Vec<i32>, b: Vec<i32>| a.iter().copied().chain(b).collect()),
        );
        reg.register("k", vec![1]).unwrap();
        assert_eq!(reg.register("k", vec![2, 3]).unwrap(), RegisterOutcome::Merged);
        assert_eq!(reg.get(&"k"), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn test_iteration_follows_registration_order() {
        let mut reg: Registry<String, u8> = Registry::new("o");
        for (i, k) in ["z", "a", "m"].iter().enumerate() {
            reg.register(k.to_string(), i as u8).unwrap();
        }
        reg.remove(&"a".to_string());
        let keys: Vec<&String> = reg.keys().collect();
        assert_eq!(keys, vec!["z", "m"]);
        assert_eq!(reg.len(), 2);
    }
}
