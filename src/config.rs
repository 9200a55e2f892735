//! Project configuration, read from `macroweave.toml`.
//!
//! The file is looked up from the working directory upwards; the first one
//! found wins and its directory becomes the project root. Every section is
//! optional:
//!
//! ```toml
//! [preprocess]
//! extensions = ["operators", "hkt", "decorators"]
//!
//! [[operators]]
//! symbol = "<>"
//! precedence = 3
//! function = "concat"
//!
//! [cache]
//! enabled = true
//! dir = ".macroweave"
//!
//! [expansion]
//! max_depth = 128
//!
//! [sandbox]
//! fs = false
//! env = false
//!
//! [[layers]]
//! service = "Clock"
//! layer = "ClockLive"
//! requires = []
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::cache_dir_for;
use crate::macros::builtin::layers::LayerProvider;
use crate::macros::MAX_MACRO_RECURSION_DEPTH;
use crate::preprocess::Extension;
use crate::sandbox::Capabilities;
use crate::syntax::{default_operators, OperatorDef};
use crate::{err_msg, WeaveError};

pub const CONFIG_FILE_NAME: &str = "macroweave.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeaveConfig {
    pub preprocess: PreprocessSection,
    /// Operators added to the built-in `|>`, `<|` and `::`.
    pub operators: Vec<OperatorDef>,
    pub cache: CacheSection,
    pub expansion: ExpansionSection,
    pub sandbox: Capabilities,
    /// Providers visible to `wire` in every file.
    pub layers: Vec<LayerProvider>,
    /// Directory the file was loaded from; not part of the file itself.
    #[serde(skip)]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreprocessSection {
    pub extensions: Vec<Extension>,
}

impl Default for PreprocessSection {
    fn default() -> Self {
        Self {
            extensions: Extension::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSection {
    pub enabled: bool,
    /// Relative paths resolve against the project root.
    pub dir: Option<PathBuf>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExpansionSection {
    pub max_depth: usize,
}

impl Default for ExpansionSection {
    fn default() -> Self {
        Self {
            max_depth: MAX_MACRO_RECURSION_DEPTH,
        }
    }
}

impl WeaveConfig {
    pub fn from_toml(text: &str) -> Result<Self, WeaveError> {
        let config: WeaveConfig = toml::from_str(text).map_err(|e| {
            err_msg!(Config, "invalid {}: {}", CONFIG_FILE_NAME, e.message())
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, WeaveError> {
        let text = fs::read_to_string(path)
            .map_err(|e| err_msg!(Config, "cannot read {}: {}", path.display(), e))?;
        let mut config = Self::from_toml(&text)?;
        config.root = path.parent().map(Path::to_path_buf);
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Loads the nearest `macroweave.toml` at or above `start`, or the
    /// defaults when there is none.
    pub fn discover(start: &Path) -> Result<Self, WeaveError> {
        match find_config(start) {
            Some(path) => Self::load(&path),
            None => Ok(Self {
                root: Some(start.to_path_buf()),
                ..Self::default()
            }),
        }
    }

    fn validate(&self) -> Result<(), WeaveError> {
        if self.expansion.max_depth == 0 {
            return Err(err_msg!(Config, "expansion.max_depth must be at least 1"));
        }
        for op in &self.operators {
            if op.symbol.is_empty() || op.symbol.chars().any(|c| c.is_alphanumeric() || c.is_whitespace()) {
                return Err(err_msg!(
                    Config,
                    "operator '{}' must be made of punctuation only",
                    op.symbol
                ));
            }
        }
        Ok(())
    }

    /// The built-in operators followed by the configured ones. A configured
    /// operator with a built-in symbol replaces it.
    pub fn operator_table(&self) -> Vec<OperatorDef> {
        let mut table: Vec<OperatorDef> = default_operators()
            .into_iter()
            .filter(|d| !self.operators.iter().any(|o| o.symbol == d.symbol))
            .collect();
        table.extend(self.operators.iter().cloned());
        table
    }

    pub fn project_root(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Where the expansion cache lives, or `None` when caching is off.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.cache
            .enabled
            .then(|| cache_dir_for(&self.project_root(), self.cache.dir.as_deref()))
    }
}

/// Nearest `macroweave.toml` at or above `start`.
pub fn find_config(start: &Path) -> Option<PathBuf> {
    let mut current = fs::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());
    loop {
        let candidate = current.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = WeaveConfig::from_toml("").unwrap();
        assert_eq!(config.preprocess.extensions, Extension::ALL.to_vec());
        assert_eq!(config.expansion.max_depth, MAX_MACRO_RECURSION_DEPTH);
        assert!(config.cache.enabled);
        assert!(!config.sandbox.fs && !config.sandbox.env);
        assert_eq!(config.operator_table().len(), 3);
    }

    #[test]
    fn test_full_file() {
        let config = WeaveConfig::from_toml(
            r#"
[preprocess]
extensions = ["operators"]

[[operators]]
symbol = "<>"
precedence = 3
function = "concat"

[cache]
enabled = false

[expansion]
max_depth = 8

[sandbox]
fs = true

[[layers]]
service = "Clock"
layer = "ClockLive"
"#,
        )
        .unwrap();
        assert_eq!(config.preprocess.extensions, vec![Extension::Operators]);
        assert_eq!(config.operator_table().last().unwrap().function.as_deref(), Some("concat"));
        assert_eq!(config.cache_dir(), None);
        assert_eq!(config.expansion.max_depth, 8);
        assert!(config.sandbox.fs);
        assert_eq!(config.layers[0].layer, "ClockLive");
        assert!(config.layers[0].requires.is_empty());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(WeaveConfig::from_toml("[expansion]\nmax_depth = 0").is_err());
        assert!(WeaveConfig::from_toml("[[operators]]\nsymbol = \"and\"\nprecedence = 1").is_err());
        assert!(WeaveConfig::from_toml("[preprocess]\nextensions = [\"jsx\"]").is_err());
        assert!(WeaveConfig::from_toml("[unknown]").is_err());
    }

    #[test]
    fn test_discover_walks_upwards() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "[cache]\ndir = \"out/cache\"\n").unwrap();
        let nested = dir.path().join("src/deep");
        fs::create_dir_all(&nested).unwrap();
        let config = WeaveConfig::discover(&nested).unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        assert_eq!(config.cache_dir(), Some(root.join("out/cache")));
    }
}
