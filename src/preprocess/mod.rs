//! Lexical preprocessor.
//!
//! Runs before parsing and rewrites syntax the host grammar cannot parse.
//! Every extension reports [`Replacement`]s against the original text; they
//! are merged, sorted and applied in one left-to-right pass, producing the new
//! text and a source map back to the original.

pub mod boundary;
pub mod decorators;
pub mod hkt;
pub mod operators;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sourcemap::{LineIndex, RawSourceMap, SourceMapBuilder};
use crate::syntax::scanner::{default_operators, OperatorDef, ScanOptions};
use crate::syntax::tokenize;
use crate::{err_msg, WeaveError};

pub use hkt::KIND_TYPE;
pub use operators::{decode_operator, encode_operator, restore_operators, BINOP_CALLEE};

// ============================================================================
// OPTIONS AND RESULTS
// ============================================================================

/// A syntax extension handled by the preprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Extension {
    Operators,
    Hkt,
    Decorators,
}

impl Extension {
    pub const ALL: [Extension; 3] = [Extension::Operators, Extension::Hkt, Extension::Decorators];

    pub fn name(&self) -> &'static str {
        match self {
            Extension::Operators => "operators",
            Extension::Hkt => "hkt",
            Extension::Decorators => "decorators",
        }
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Extension {
    type Err = WeaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Extension::ALL
            .into_iter()
            .find(|e| e.name() == s)
            .ok_or_else(|| err_msg!(Config, "unknown preprocessor extension '{}'", s))
    }
}

#[derive(Debug, Clone)]
pub struct PreprocessOptions {
    pub file_name: String,
    pub extensions: Vec<Extension>,
    /// Custom operator table; empty means the default operators.
    pub operators: Vec<OperatorDef>,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            file_name: "input.ts".to_string(),
            extensions: Extension::ALL.to_vec(),
            operators: default_operators(),
        }
    }
}

impl PreprocessOptions {
    pub fn for_file(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..Self::default()
        }
    }

    fn enabled(&self, ext: Extension) -> bool {
        self.extensions.contains(&ext)
    }

    fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            custom_operators: self.operators.clone(),
            file_name: self.file_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessResult {
    pub code: String,
    pub changed: bool,
    /// Maps `code` back to the input; `None` when nothing changed.
    pub source_map: Option<RawSourceMap>,
}

/// Replace `source[start..end]` with `text`. Offsets refer to the original
/// text; `start == end` is an insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl Replacement {
    pub fn new(start: usize, end: usize, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Self::new(at, at, text)
    }
}

// ============================================================================
// PREPROCESS
// ============================================================================

/// Runs every enabled extension over `source`.
pub fn preprocess(source: &str, options: &PreprocessOptions) -> Result<PreprocessResult, WeaveError> {
    let tokens = tokenize(source, &options.scan_options());
    let mut replacements = Vec::new();
    let mut protected: Vec<(usize, usize)> = Vec::new();

    if options.enabled(Extension::Decorators) {
        let lower_operators = options.enabled(Extension::Operators);
        let lower = |text: &str| -> String {
            if !lower_operators {
                return text.to_string();
            }
            let toks = tokenize(text, &options.scan_options());
            let mut reps = operators::collect(text, &toks, &options.operators);
            apply_replacements(text, &mut reps).unwrap_or_else(|_| text.to_string())
        };
        for rewrite in decorators::collect(source, &tokens, &lower) {
            protected.push(rewrite.removed);
            replacements.extend(rewrite.replacements);
        }
    }

    let outside_protected = |r: &Replacement| {
        !protected
            .iter()
            .any(|(a, b)| r.start >= *a && r.end <= *b && r.start < *b)
    };
    if options.enabled(Extension::Hkt) {
        replacements.extend(hkt::collect(&tokens).into_iter().filter(outside_protected));
    }
    if options.enabled(Extension::Operators) {
        replacements.extend(
            operators::collect(source, &tokens, &options.operators)
                .into_iter()
                .filter(outside_protected),
        );
    }

    if replacements.is_empty() {
        return Ok(PreprocessResult {
            code: source.to_string(),
            changed: false,
            source_map: None,
        });
    }

    debug!(
        file = %options.file_name,
        replacements = replacements.len(),
        "preprocessed"
    );
    let mut builder = SourceMapBuilder::new();
    let code = apply(source, &mut replacements, Some(&mut builder))?;
    let map = builder.build(Some(&options.file_name), &options.file_name, Some(source));
    Ok(PreprocessResult {
        code,
        changed: true,
        source_map: Some(map),
    })
}

/// Applies `replacements` to `source` in one pass. The list is sorted by
/// position (stable, so insertions at one offset keep their order);
/// overlapping replacements are an error.
pub fn apply_replacements(source: &str, replacements: &mut [Replacement]) -> Result<String, WeaveError> {
    apply(source, replacements, None)
}

/// Tracks the generated line/column while output is appended.
struct Emitter<'a> {
    out: String,
    line: u32,
    col: u32,
    original: LineIndex,
    map: Option<&'a mut SourceMapBuilder>,
}

impl Emitter<'_> {
    fn advance(&mut self, text: &str) {
        for ch in text.chars() {
            if ch == '\n' {
                self.line += 1;
                self.col = 0;
            } else {
                self.col += ch.len_utf8() as u32;
            }
        }
        self.out.push_str(text);
    }

    /// Unchanged text maps 1:1; a segment at the start and at each line start.
    fn copy(&mut self, source: &str, start: usize, end: usize) {
        if start >= end {
            return;
        }
        if let Some(map) = self.map.as_deref_mut() {
            let (src_line, src_col) = self.original.line_col(start);
            map.add(self.line, self.col, src_line, src_col);
            for (i, _) in source[start..end].match_indices('\n') {
                let next = start + i + 1;
                if next < end {
                    let (l, c) = self.original.line_col(next);
                    map.add(self.line + (l - src_line), 0, l, c);
                }
            }
        }
        self.advance(&source[start..end]);
    }

    /// Replacement text maps every character to the replaced start.
    fn replace(&mut self, text: &str, origin: usize) {
        if let Some(map) = self.map.as_deref_mut() {
            let (src_line, src_col) = self.original.line_col(origin);
            let (mut line, mut col) = (self.line, self.col);
            for ch in text.chars() {
                if ch == '\n' {
                    line += 1;
                    col = 0;
                    continue;
                }
                map.add(line, col, src_line, src_col);
                col += ch.len_utf8() as u32;
            }
        }
        self.advance(text);
    }
}

fn apply(
    source: &str,
    replacements: &mut [Replacement],
    map: Option<&mut SourceMapBuilder>,
) -> Result<String, WeaveError> {
    replacements.sort_by_key(|r| (r.start, r.end));
    for pair in replacements.windows(2) {
        if pair[0].end > pair[1].start {
            return Err(err_msg!(
                Internal,
                "overlapping preprocessor replacements at {}..{} and {}..{}",
                pair[0].start,
                pair[0].end,
                pair[1].start,
                pair[1].end
            ));
        }
    }
    if let Some(r) = replacements.iter().find(|r| r.end > source.len() || r.start > r.end) {
        return Err(err_msg!(
            Internal,
            "replacement {}..{} is outside the source",
            r.start,
            r.end
        ));
    }

    let mut emitter = Emitter {
        out: String::with_capacity(source.len() + replacements.len() * 8),
        line: 0,
        col: 0,
        original: LineIndex::new(source),
        map,
    };
    let mut cursor = 0;
    for r in replacements.iter() {
        emitter.copy(source, cursor, r.start);
        emitter.replace(&r.text, r.start);
        cursor = r.end;
    }
    emitter.copy(source, cursor, source.len());
    Ok(emitter.out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::PositionMapper;

    #[test]
    fn test_no_extensions_apply_is_identity() {
        let src = "const x = 1;\n// |> in a comment\nlet s = \"a |> b\";\n";
        let out = preprocess(src, &PreprocessOptions::default()).unwrap();
        assert!(!out.changed);
        assert_eq!(out.code, src);
        assert!(out.source_map.is_none());
    }

    #[test]
    fn test_all_extensions_together() {
        let src = "@memo const f = x |> g;\ntype T<F<_>> = F<number>;";
        let out = preprocess(src, &PreprocessOptions::default()).unwrap();
        assert!(out.changed);
        assert_eq!(
            out.code,
            "const f = memo(__binop__(x, \"bar_gt\", g));\ntype T<F> = Kind<F, number>;"
        );
    }

    #[test]
    fn test_disabled_extension_is_skipped() {
        let options = PreprocessOptions {
            extensions: vec![Extension::Hkt],
            ..PreprocessOptions::default()
        };
        let src = "a |> f";
        assert!(!preprocess(src, &options).unwrap().changed);
    }

    #[test]
    fn test_operators_inside_decorator_arguments() {
        let src = "@cache(k |> key) const v = 1;";
        let out = preprocess(src, &PreprocessOptions::default()).unwrap();
        assert_eq!(out.code, "const v = cache(__binop__(k, \"bar_gt\", key))(1);");
    }

    #[test]
    fn test_overlap_is_rejected() {
        let mut reps = vec![Replacement::new(0, 4, "x"), Replacement::new(2, 6, "y")];
        assert!(apply_replacements("abcdefgh", &mut reps).is_err());
    }

    #[test]
    fn test_source_map_points_back_to_original() {
        let src = "let a = 1;\nconst r = a |> f;\nlet z = r;";
        let out = preprocess(src, &PreprocessOptions::default()).unwrap();
        let map = out.source_map.clone().unwrap();
        let mapper = PositionMapper::new(src, &out.code, &map).unwrap();
        let z_out = out.code.find("z =").unwrap();
        let z_in = src.find("z =").unwrap();
        assert_eq!(mapper.to_original(z_out), Some(z_in));
        // Inserted call text maps to the start of the chain.
        let call = out.code.find("__binop__").unwrap();
        assert_eq!(mapper.to_original(call + 3), src.find("a |>"));
    }

    #[test]
    fn test_extension_names_parse() {
        assert_eq!("hkt".parse::<Extension>().unwrap(), Extension::Hkt);
        assert!("macros".parse::<Extension>().is_err());
    }
}
