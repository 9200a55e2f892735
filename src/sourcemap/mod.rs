//! Version-3 source maps: building, decoding, lookup and composition.
//!
//! Lines and columns are zero-based; columns count bytes. Every map produced by
//! the crate refers to a single source.

pub mod mapper;
pub mod vlq;

use line_index::{LineCol, TextSize};
use serde::{Deserialize, Serialize};

use crate::WeaveError;

pub use mapper::PositionMapper;

/// A source map as serialised to JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSourceMap {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub names: Vec<String>,
    pub mappings: String,
}

impl RawSourceMap {
    pub fn to_json(&self) -> Result<String, WeaveError> {
        serde_json::to_string(self).map_err(|e| {
            crate::err_msg!(Internal, "failed to serialise source map: {}", e)
        })
    }
}

/// One decoded mapping: a generated position and its source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Segment {
    pub gen_line: u32,
    pub gen_col: u32,
    pub src_line: u32,
    pub src_col: u32,
}

// ============================================================================
// LINE INDEX
// ============================================================================

/// Offset <-> line/column conversion over one text, with byte columns.
#[derive(Debug, Clone)]
pub struct LineIndex {
    inner: line_index::LineIndex,
    len: usize,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        Self {
            inner: line_index::LineIndex::new(text),
            len: text.len(),
        }
    }

    /// Zero-based line and byte column of `offset`, clamped to the text.
    /// An offset inside a multi-byte character resolves to its first byte.
    pub fn line_col(&self, offset: usize) -> (u32, u32) {
        let mut offset = offset.min(self.len);
        loop {
            if let Some(lc) = self.inner.try_line_col(TextSize::from(offset as u32)) {
                return (lc.line, lc.col);
            }
            if offset == 0 {
                return (0, 0);
            }
            offset -= 1;
        }
    }

    /// Byte offset of a line/column, or `None` when the line does not exist.
    /// Columns past the end of the line are clamped to it.
    pub fn offset(&self, line: u32, col: u32) -> Option<usize> {
        let start = usize::from(self.inner.offset(LineCol { line, col: 0 })?);
        let end = self
            .inner
            .offset(LineCol { line: line + 1, col: 0 })
            .map(|next| usize::from(next) - 1)
            .unwrap_or(self.len);
        Some((start + col as usize).min(end))
    }
}

// ============================================================================
// BUILDING
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct SourceMapBuilder {
    segments: Vec<Segment>,
}

impl SourceMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, gen_line: u32, gen_col: u32, src_line: u32, src_col: u32) {
        self.segments.push(Segment {
            gen_line,
            gen_col,
            src_line,
            src_col,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn build(mut self, file: Option<&str>, source_name: &str, content: Option<&str>) -> RawSourceMap {
        self.segments.sort();
        self.segments
            .dedup_by(|a, b| a.gen_line == b.gen_line && a.gen_col == b.gen_col);
        RawSourceMap {
            version: 3,
            file: file.map(str::to_string),
            sources: vec![source_name.to_string()],
            sources_content: content.map(|c| vec![Some(c.to_string())]),
            names: Vec::new(),
            mappings: encode_mappings(&self.segments),
        }
    }
}

fn encode_mappings(segments: &[Segment]) -> String {
    let mut out = String::new();
    let mut line = 0u32;
    let mut prev_gen_col = 0i64;
    let mut prev_src_line = 0i64;
    let mut prev_src_col = 0i64;
    let mut first_on_line = true;
    for seg in segments {
        while line < seg.gen_line {
            out.push(';');
            line += 1;
            prev_gen_col = 0;
            first_on_line = true;
        }
        if !first_on_line {
            out.push(',');
        }
        first_on_line = false;
        vlq::encode(seg.gen_col as i64 - prev_gen_col, &mut out);
        vlq::encode(0, &mut out);
        vlq::encode(seg.src_line as i64 - prev_src_line, &mut out);
        vlq::encode(seg.src_col as i64 - prev_src_col, &mut out);
        prev_gen_col = seg.gen_col as i64;
        prev_src_line = seg.src_line as i64;
        prev_src_col = seg.src_col as i64;
    }
    out
}

// ============================================================================
// DECODING AND LOOKUP
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct DecodedMap {
    /// Segments grouped by generated line, sorted by column.
    lines: Vec<Vec<Segment>>,
    /// All segments sorted by source position, for reverse lookups.
    by_source: Vec<Segment>,
}

impl DecodedMap {
    pub fn decode(map: &RawSourceMap) -> Result<Self, WeaveError> {
        let mut lines = Vec::new();
        let mut src_line = 0i64;
        let mut src_col = 0i64;
        for (gen_line, line_text) in map.mappings.split(';').enumerate() {
            let mut segments = Vec::new();
            let mut gen_col = 0i64;
            for raw in line_text.split(',').filter(|s| !s.is_empty()) {
                let values = vlq::decode_segment(raw)?;
                gen_col += values[0];
                if values.len() < 4 {
                    continue;
                }
                src_line += values[2];
                src_col += values[3];
                segments.push(Segment {
                    gen_line: gen_line as u32,
                    gen_col: gen_col.max(0) as u32,
                    src_line: src_line.max(0) as u32,
                    src_col: src_col.max(0) as u32,
                });
            }
            segments.sort();
            lines.push(segments);
        }
        let mut by_source: Vec<Segment> = lines.iter().flatten().copied().collect();
        by_source.sort_by_key(|s| (s.src_line, s.src_col, s.gen_line, s.gen_col));
        Ok(Self { lines, by_source })
    }

    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.lines.iter().flatten()
    }

    /// Source position of a generated position: the closest segment at or
    /// before the column on the same line, plus the remaining column delta.
    pub fn lookup(&self, line: u32, col: u32) -> Option<(u32, u32)> {
        let segs = self.lines.get(line as usize)?;
        let idx = segs.partition_point(|s| s.gen_col <= col);
        let seg = segs.get(idx.checked_sub(1)?)?;
        Some((seg.src_line, seg.src_col + (col - seg.gen_col)))
    }

    /// Generated position of a source position, same rule in reverse.
    pub fn reverse_lookup(&self, line: u32, col: u32) -> Option<(u32, u32)> {
        let idx = self
            .by_source
            .partition_point(|s| (s.src_line, s.src_col) <= (line, col));
        let last = self.by_source.get(idx.checked_sub(1)?)?;
        // Several generated positions may share a source position; take the earliest.
        let key = (last.src_line, last.src_col);
        let first = self
            .by_source
            .partition_point(|s| (s.src_line, s.src_col) < key);
        let seg = &self.by_source[first];
        if seg.src_line != line {
            return None;
        }
        Some((seg.gen_line, seg.gen_col + (col - seg.src_col)))
    }
}

/// Composes `first` (B -> A) with `second` (C -> B) into a map C -> A.
pub fn compose(first: &RawSourceMap, second: &RawSourceMap) -> Result<RawSourceMap, WeaveError> {
    let inner = DecodedMap::decode(first)?;
    let outer = DecodedMap::decode(second)?;
    let mut builder = SourceMapBuilder::new();
    for seg in outer.segments() {
        if let Some((line, col)) = inner.lookup(seg.src_line, seg.src_col) {
            builder.add(seg.gen_line, seg.gen_col, line, col);
        }
    }
    let mut map = builder.build(
        second.file.as_deref(),
        first.sources.first().map(String::as_str).unwrap_or(""),
        None,
    );
    map.sources_content = first.sources_content.clone();
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_index_roundtrip() {
        let idx = LineIndex::new("ab\ncde\n\nf");
        assert_eq!(idx.line_col(0), (0, 0));
        assert_eq!(idx.line_col(4), (1, 1));
        assert_eq!(idx.line_col(8), (3, 0));
        assert_eq!(idx.offset(1, 1), Some(4));
        assert_eq!(idx.offset(1, 99), Some(6));
        assert_eq!(idx.offset(9, 0), None);
    }

    #[test]
    fn test_line_index_multibyte_columns() {
        // `é` is two bytes; columns count bytes.
        let idx = LineIndex::new("const é = 1;\nx");
        assert_eq!(idx.line_col(9), (0, 9));
        assert_eq!(idx.line_col(7), (0, 6));
        assert_eq!(idx.line_col(14), (1, 0));
        assert_eq!(idx.line_col(999), (1, 1));
        assert_eq!(idx.offset(0, 8), Some(8));
        assert_eq!(idx.offset(1, 0), Some(14));
    }

    #[test]
    fn test_build_then_lookup_with_delta() {
        let mut b = SourceMapBuilder::new();
        b.add(0, 0, 0, 0);
        b.add(0, 10, 0, 4);
        b.add(2, 2, 1, 0);
        let map = b.build(Some("out.ts"), "in.ts", None);
        assert_eq!(map.mappings, "AAAA,UAAI;;EACJ");
        let decoded = DecodedMap::decode(&map).unwrap();
        assert_eq!(decoded.lookup(0, 12), Some((0, 6)));
        assert_eq!(decoded.lookup(1, 0), None);
        assert_eq!(decoded.reverse_lookup(0, 5), Some((0, 11)));
    }

    #[test]
    fn test_compose_chains_two_maps() {
        // B -> A shifts everything right by 3 columns on line 0.
        let mut ba = SourceMapBuilder::new();
        ba.add(0, 0, 0, 3);
        let ba = ba.build(None, "a.ts", Some("orig"));
        // C -> B moves line 1 of C to line 0 of B.
        let mut cb = SourceMapBuilder::new();
        cb.add(1, 2, 0, 1);
        let cb = cb.build(Some("c.ts"), "b.ts", None);

        let ca = DecodedMap::decode(&compose(&ba, &cb).unwrap()).unwrap();
        assert_eq!(ca.lookup(1, 2), Some((0, 4)));
    }

    #[test]
    fn test_json_shape() {
        let map = SourceMapBuilder::new().build(Some("x.js"), "x.ts", None);
        let json = map.to_json().unwrap();
        assert!(json.contains("\"version\":3"));
        assert!(json.contains("\"sources\":[\"x.ts\"]"));
        assert!(!json.contains("sourcesContent"));
    }
}
