//! The end-to-end pipeline: preprocess, parse, expand, print.
//!
//! A [`Transformer`] is built once per compilation from a populated registry
//! and the project configuration. It owns the expansion cache and the
//! per-file side tables, and is fed files one at a time. Diagnostics come
//! back in the coordinates of the text the caller passed in.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, debug_span};

use crate::ast::{Module, SourceFile};
use crate::cache::ExpansionCache;
use crate::config::WeaveConfig;
use crate::macros::builtin::layers::LayerProvider;
use crate::macros::{Expander, FileState, MacroContext, MacroExpansionStep, MacroRegistry};
use crate::preprocess::{preprocess, PreprocessOptions, PreprocessResult};
use crate::sourcemap::{compose, LineIndex, PositionMapper, RawSourceMap, SourceMapBuilder};
use crate::syntax::{parse_module, print_module_with_comments, Mapping};
use crate::{Diagnostic, Span, WeaveError};

#[derive(Debug, Clone)]
pub struct TransformOptions {
    pub file_name: String,
    /// Consult and fill the expansion cache.
    pub use_cache: bool,
    /// Produce a source map from the output back to the input.
    pub source_map: bool,
}

impl TransformOptions {
    pub fn for_file(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            use_cache: true,
            source_map: false,
        }
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn with_source_map(mut self) -> Self {
        self.source_map = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub code: String,
    /// In input coordinates.
    pub diagnostics: Vec<Diagnostic>,
    pub source_map: Option<RawSourceMap>,
    /// False when the input came back verbatim.
    pub changed: bool,
}

impl TransformOutput {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// Result of expanding an already parsed module.
#[derive(Debug, Clone)]
pub struct ExpansionOutcome {
    pub module: Module,
    /// In the coordinates of the module's source text.
    pub diagnostics: Vec<Diagnostic>,
    pub trace: Vec<MacroExpansionStep>,
}

pub struct Transformer {
    registry: Arc<MacroRegistry>,
    config: WeaveConfig,
    cache: ExpansionCache,
    files: BTreeMap<String, FileState>,
}

impl Transformer {
    /// A transformer with an in-memory cache.
    pub fn new(registry: Arc<MacroRegistry>, config: WeaveConfig) -> Self {
        Self {
            registry,
            config,
            cache: ExpansionCache::in_memory(),
            files: BTreeMap::new(),
        }
    }

    /// Switches to the on-disk cache the configuration names, if enabled.
    pub fn with_persistent_cache(mut self) -> Self {
        if let Some(dir) = self.config.cache_dir() {
            self.cache = ExpansionCache::load(&dir);
        }
        self
    }

    pub fn registry(&self) -> &MacroRegistry {
        &self.registry
    }

    pub fn config(&self) -> &WeaveConfig {
        &self.config
    }

    pub fn cache(&self) -> &ExpansionCache {
        &self.cache
    }

    fn preprocess_options(&self, file_name: &str) -> PreprocessOptions {
        PreprocessOptions {
            file_name: file_name.to_string(),
            extensions: self.config.preprocess.extensions.clone(),
            operators: self.config.operator_table(),
        }
    }

    /// Runs the preprocessor only.
    pub fn preprocess(&self, source: &str, file_name: &str) -> Result<PreprocessResult, WeaveError> {
        preprocess(source, &self.preprocess_options(file_name))
    }

    pub fn transform(&mut self, source: &str, options: &TransformOptions) -> Result<TransformOutput, WeaveError> {
        let span = debug_span!("transform", file = %options.file_name);
        let _enter = span.enter();

        let pre = self.preprocess(source, &options.file_name)?;
        let mapper = match &pre.source_map {
            Some(map) => PositionMapper::new(source, &pre.code, map)?,
            None => PositionMapper::identity(),
        };

        let module = match parse_module(&pre.code) {
            Ok(module) => module,
            Err(e) => {
                let diag = Diagnostic::from_error(&e, Span::new(0, 0));
                return Ok(TransformOutput {
                    code: source.to_string(),
                    diagnostics: vec![mapper.map_diagnostic(&diag)],
                    source_map: None,
                    changed: false,
                });
            }
        };

        let file = SourceFile::new(options.file_name.clone(), pre.code.clone());
        let outcome = self.expand(module, file, options.use_cache);
        let diagnostics: Vec<Diagnostic> = outcome
            .diagnostics
            .iter()
            .map(|d| mapper.map_diagnostic(d))
            .collect();

        if !pre.changed && outcome.trace.is_empty() {
            return Ok(TransformOutput {
                code: source.to_string(),
                diagnostics,
                source_map: None,
                changed: false,
            });
        }

        let printed = print_module_with_comments(&outcome.module, &pre.code);
        let source_map = if options.source_map {
            let printer_map = printer_source_map(&pre.code, &printed.mappings, &options.file_name, source);
            Some(match &pre.source_map {
                Some(pre_map) => compose(pre_map, &printer_map)?,
                None => printer_map,
            })
        } else {
            None
        };
        debug!(
            expansions = outcome.trace.len(),
            diagnostics = diagnostics.len(),
            "transformed"
        );
        Ok(TransformOutput {
            code: printed.code,
            diagnostics,
            source_map,
            changed: true,
        })
    }

    /// Expands a module the caller parsed itself. `file.text` must be the
    /// text the module was parsed from.
    pub fn transform_module(&mut self, module: Module, file: SourceFile) -> ExpansionOutcome {
        self.expand(module, file, true)
    }

    fn expand(&mut self, mut module: Module, file: SourceFile, use_cache: bool) -> ExpansionOutcome {
        let name = file.name.clone();
        let state = FileState {
            providers: self.visible_providers(&name),
            ..FileState::default()
        };
        let mut ctx = MacroContext::new(file, &module)
            .with_capabilities(self.config.sandbox)
            .with_operators(self.config.operator_table())
            .with_state(state);

        let expander = Expander::new(&self.registry).with_max_depth(self.config.expansion.max_depth);
        let mut expander = if use_cache {
            expander.with_cache(&mut self.cache)
        } else {
            expander
        };
        expander.expand_module(&mut ctx, &mut module);

        let (state, diagnostics) = ctx.into_parts();
        let trace = state.trace.clone();
        self.files.insert(name, state);
        ExpansionOutcome {
            module,
            diagnostics,
            trace,
        }
    }

    /// Configured layers plus those other files recorded with `@layer`.
    fn visible_providers(&self, file_name: &str) -> Vec<LayerProvider> {
        let mut providers = self.config.layers.clone();
        for (other, state) in &self.files {
            if other == file_name {
                continue;
            }
            providers.extend(
                state
                    .providers
                    .iter()
                    .filter(|p| p.origin.as_deref() == Some(other.as_str()))
                    .cloned(),
            );
        }
        providers
    }

    /// Expansion steps recorded for `file_name` by its last transform.
    pub fn trace(&self, file_name: &str) -> Option<&[MacroExpansionStep]> {
        self.files.get(file_name).map(|s| s.trace.as_slice())
    }

    /// Writes the cache back to disk. Returns whether anything was written.
    pub fn finish(&mut self) -> bool {
        self.cache.flush()
    }
}

/// Map from printed output back to the parsed text, with `original` as the
/// embedded source content.
fn printer_source_map(
    parsed: &str,
    mappings: &[Mapping],
    file_name: &str,
    original: &str,
) -> RawSourceMap {
    let index = LineIndex::new(parsed);
    let mut builder = SourceMapBuilder::new();
    for m in mappings {
        let (line, col) = index.line_col(m.source_offset);
        builder.add(m.generated_line, m.generated_column, line, col);
    }
    builder.build(Some(file_name), file_name, Some(original))
}

/// One-shot transform with the built-in macros and default configuration.
pub fn transform_code(source: &str, options: &TransformOptions) -> Result<TransformOutput, WeaveError> {
    let mut transformer = Transformer::new(Arc::new(MacroRegistry::with_builtins()), WeaveConfig::default());
    transformer.transform(source, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::DecodedMap;

    #[test]
    fn test_untouched_file_comes_back_verbatim() {
        let src = "const a   =  1;  // spacing kept\n";
        let out = transform_code(src, &TransformOptions::for_file("a.ts")).unwrap();
        assert!(!out.changed);
        assert_eq!(out.code, src);
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn test_parse_error_is_a_diagnostic() {
        let out = transform_code("const = ;", &TransformOptions::for_file("a.ts")).unwrap();
        assert!(!out.changed);
        assert_eq!(out.diagnostics.len(), 1);
        assert!(out.diagnostics[0].is_error());
    }

    #[test]
    fn test_diagnostics_point_into_the_original_text() {
        // The operator rewrite shifts everything after `|>`.
        let src = "const a = x |> f;\nconst b = wire(1);";
        let out = transform_code(src, &TransformOptions::for_file("a.ts")).unwrap();
        assert_eq!(out.diagnostics.len(), 1);
        let d = &out.diagnostics[0];
        let line_start = src.find("const b").unwrap();
        assert!(d.start >= line_start && d.start < src.len(), "{:?}", d);
        assert!(out.code.contains("const a = f(x);"));
    }

    #[test]
    fn test_source_map_points_back_to_input() {
        let src = "const a = 1;\nconst b = x |> f;\n";
        let out = transform_code(src, &TransformOptions::for_file("a.ts").with_source_map()).unwrap();
        let map = out.source_map.unwrap();
        assert_eq!(map.sources, vec!["a.ts".to_string()]);
        let decoded = DecodedMap::decode(&map).unwrap();
        assert_eq!(decoded.lookup(1, 0), Some((1, 0)));
    }

    #[test]
    fn test_configured_layers_are_visible_to_wire() {
        let mut config = WeaveConfig::default();
        config.layers.push(LayerProvider::new("Clock", "ClockLive", Vec::new()));
        let mut t = Transformer::new(Arc::new(MacroRegistry::with_builtins()), config);
        let out = t
            .transform("const c = wire(\"Clock\");", &TransformOptions::for_file("a.ts"))
            .unwrap();
        assert_eq!(out.code, "const c = ClockLive;\n");
        assert_eq!(t.trace("a.ts").unwrap().len(), 1);
    }

    #[test]
    fn test_providers_carry_across_files() {
        let mut t = Transformer::new(Arc::new(MacroRegistry::with_builtins()), WeaveConfig::default());
        t.transform("@layer(\"Db\")\nclass DbLive {}", &TransformOptions::for_file("db.ts"))
            .unwrap();
        let out = t
            .transform("const app = wire(\"Db\");", &TransformOptions::for_file("app.ts"))
            .unwrap();
        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        assert_eq!(out.code, "const app = DbLive;\n");
    }

    #[test]
    fn test_cache_is_filled_by_cacheable_macros() {
        let mut t = Transformer::new(Arc::new(MacroRegistry::with_builtins()), WeaveConfig::default());
        let opts = TransformOptions::for_file("a.ts");
        let first = t.transform("const r = x |> f;", &opts).unwrap();
        assert!(!t.cache().is_empty());
        let second = t.transform("const r = x |> f;", &opts).unwrap();
        assert_eq!(first.code, second.code);
    }
}
