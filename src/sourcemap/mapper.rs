//! Relocates offsets and diagnostics between preprocessed and original text.

use super::{DecodedMap, LineIndex, RawSourceMap};
use crate::{Diagnostic, WeaveError};

/// Maps byte offsets between the original text and a transformed version of
/// it through a source map decoded once at construction.
#[derive(Debug, Clone)]
pub struct PositionMapper {
    original: LineIndex,
    transformed: LineIndex,
    original_len: usize,
    /// `None` for the identity mapper.
    map: Option<DecodedMap>,
}

impl PositionMapper {
    pub fn new(original: &str, transformed: &str, map: &RawSourceMap) -> Result<Self, WeaveError> {
        Ok(Self {
            original: LineIndex::new(original),
            transformed: LineIndex::new(transformed),
            original_len: original.len(),
            map: Some(DecodedMap::decode(map)?),
        })
    }

    /// Mapper for a file the preprocessor left untouched.
    pub fn identity() -> Self {
        Self {
            original: LineIndex::new(""),
            transformed: LineIndex::new(""),
            original_len: usize::MAX,
            map: None,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.map.is_none()
    }

    pub fn to_original(&self, offset: usize) -> Option<usize> {
        let Some(map) = &self.map else {
            return Some(offset);
        };
        let (line, col) = self.transformed.line_col(offset);
        let (src_line, src_col) = map.lookup(line, col)?;
        self.original.offset(src_line, src_col)
    }

    pub fn to_transformed(&self, offset: usize) -> Option<usize> {
        let Some(map) = &self.map else {
            return Some(offset);
        };
        let (line, col) = self.original.line_col(offset);
        let (gen_line, gen_col) = map.reverse_lookup(line, col)?;
        self.transformed.offset(gen_line, gen_col)
    }

    /// Relocates a diagnostic into original coordinates. When the end of the
    /// range has no mapping the original length is kept.
    pub fn map_diagnostic(&self, diagnostic: &Diagnostic) -> Diagnostic {
        if self.is_identity() {
            return diagnostic.clone();
        }
        let mut mapped = diagnostic.clone();
        let start = self
            .to_original(diagnostic.start)
            .unwrap_or_else(|| diagnostic.start.min(self.original_len));
        let length = match self.to_original(diagnostic.start + diagnostic.length) {
            Some(end) if end >= start && diagnostic.length > 0 => end - start,
            _ => diagnostic.length,
        };
        mapped.start = start;
        mapped.length = length.min(self.original_len.saturating_sub(start));
        mapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::SourceMapBuilder;
    use crate::Span;

    fn shifted_mapper() -> PositionMapper {
        // "let x = PREFIX(a);" was produced from "let x = a;"
        let original = "let x = a;";
        let transformed = "let x = PREFIX(a);";
        let mut b = SourceMapBuilder::new();
        b.add(0, 0, 0, 0);
        for col in 8..15 {
            b.add(0, col, 0, 8);
        }
        b.add(0, 15, 0, 8);
        b.add(0, 16, 0, 9);
        b.add(0, 17, 0, 9);
        let map = b.build(None, "in.ts", None);
        PositionMapper::new(original, transformed, &map).unwrap()
    }

    #[test]
    fn test_identity_passthrough() {
        let m = PositionMapper::identity();
        assert_eq!(m.to_original(42), Some(42));
        let d = Diagnostic::error("x", Span::new(3, 5));
        assert_eq!(m.map_diagnostic(&d), d);
    }

    #[test]
    fn test_offsets_map_back_to_replaced_start() {
        let m = shifted_mapper();
        assert_eq!(m.to_original(2), Some(2));
        assert_eq!(m.to_original(10), Some(8));
        assert_eq!(m.to_original(15), Some(8));
        assert_eq!(m.to_transformed(9), Some(16));
    }

    #[test]
    fn test_map_diagnostic_relocates_range() {
        let m = shifted_mapper();
        let d = Diagnostic::error("bad", Span::new(15, 16));
        let mapped = m.map_diagnostic(&d);
        assert_eq!(mapped.start, 8);
        assert_eq!(mapped.length, 1);
    }
}
