//! Hygienic name generation.
//!
//! Every identifier-shaped word of the file is reserved up front, so a
//! generated name can never capture or shadow a user binding, and every
//! generated name is reserved as it is handed out.

use std::collections::{HashMap, HashSet};

use crate::ast::factory::is_identifier;
use crate::ast::visit::identifier_words;

#[derive(Debug, Clone, Default)]
pub struct Hygiene {
    taken: HashSet<String>,
    counters: HashMap<String, usize>,
}

impl Hygiene {
    /// Reserves every identifier appearing in `text`, including names inside
    /// strings and comments.
    pub fn from_source(text: &str) -> Self {
        Self {
            taken: identifier_words(text).map(str::to_string).collect(),
            counters: HashMap::new(),
        }
    }

    pub fn reserve(&mut self, name: &str) {
        self.taken.insert(name.to_string());
    }

    pub fn is_taken(&self, name: &str) -> bool {
        self.taken.contains(name)
    }

    /// A name derived from `base` that is unused in the file and has not been
    /// generated before: `base`, then `base_1`, `base_2`, ...
    pub fn fresh_name(&mut self, base: &str) -> String {
        let base = sanitize(base);
        if !self.taken.contains(&base) {
            self.taken.insert(base.clone());
            return base;
        }
        let counter = self.counters.entry(base.clone()).or_insert(0);
        loop {
            *counter += 1;
            let candidate = format!("{}_{}", base, counter);
            if !self.taken.contains(&candidate) {
                self.taken.insert(candidate.clone());
                return candidate;
            }
        }
    }
}

fn sanitize(base: &str) -> String {
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
        .collect();
    if is_identifier(&cleaned) {
        cleaned
    } else {
        format!("_{}", cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_names_avoid_file_identifiers() {
        let mut h = Hygiene::from_source("const tmp = 1; const tmp_1 = 2;");
        assert_eq!(h.fresh_name("tmp"), "tmp_2");
        assert_eq!(h.fresh_name("tmp"), "tmp_3");
        assert_eq!(h.fresh_name("other"), "other");
        assert_eq!(h.fresh_name("other"), "other_1");
    }

    #[test]
    fn test_base_is_made_an_identifier() {
        let mut h = Hygiene::default();
        assert_eq!(h.fresh_name("1st-value"), "_1st_value");
    }
}
