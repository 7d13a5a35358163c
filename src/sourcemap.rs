//! Source-location tracking
//!
//! Every generator and cache node decoded from a spec document carries a
//! [`SourceMap`]: the document it came from plus the line/column range the
//! node occupies. Build steps composed from that node get the range attached
//! to their constraints so that a failure reported by the build engine can be
//! pointed back at the spec.

use crate::error::{StratumError, StratumResult};
use crate::graph::{Constraints, ConstraintsOpt, State};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range as ByteRange;
use std::sync::Arc;
use toml_edit::{ImDocument, Item, TableLike, Value};

/// A 1-based line/column position in a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// An inclusive start, exclusive end range in a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.start.line, self.start.character, self.end.line, self.end.character
        )
    }
}

/// The document a range refers to
#[derive(Debug, PartialEq, Eq)]
pub struct SourceInfo {
    pub filename: String,
    pub language: String,
    pub data: Vec<u8>,
}

/// Source ranges attached to a single build step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub info: Arc<SourceInfo>,
    /// Digest of the state the location was recorded against, if any
    pub definition: Option<String>,
    pub ranges: Vec<Range>,
}

/// Position of one decoded spec node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMap {
    info: Arc<SourceInfo>,
    range: Range,
}

impl SourceMap {
    pub fn new(info: Arc<SourceInfo>, range: Range) -> Self {
        Self { info, range }
    }

    pub fn range(&self) -> Range {
        self.range
    }

    pub fn filename(&self) -> &str {
        &self.info.filename
    }

    /// Constraint that records this node's range against `state`.
    pub fn location_for(&self, state: &State) -> ConstraintsOpt {
        self.location(Some(state.digest().to_string()))
    }

    /// Constraint that records this node's range without a concrete state
    pub fn root_location(&self) -> ConstraintsOpt {
        self.location(None)
    }

    fn location(&self, definition: Option<String>) -> ConstraintsOpt {
        let loc = SourceLocation {
            info: Arc::clone(&self.info),
            definition,
            ranges: vec![self.range],
        };
        ConstraintsOpt::new(move |c| c.source_locations.push(loc.clone()))
    }
}

/// Like [`SourceMap::location_for`] but a no-op when the node has no map.
pub fn location_for(sm: Option<&SourceMap>, state: &State) -> ConstraintsOpt {
    match sm {
        Some(sm) => sm.location_for(state),
        None => ConstraintsOpt::noop(),
    }
}

/// Like [`SourceMap::root_location`] but a no-op when the node has no map.
pub fn root_location(sm: Option<&SourceMap>) -> ConstraintsOpt {
    match sm {
        Some(sm) => sm.root_location(),
        None => ConstraintsOpt::noop(),
    }
}

/// Combine the locations produced by `opts` into one location per file.
///
/// Only the locations produced by `opts` are merged; locations already on
/// the target constraints are left as they are. Ranges are deduplicated
/// within each file and kept in first-seen order.
pub fn merge_locations(opts: &[ConstraintsOpt]) -> ConstraintsOpt {
    let opts = opts.to_vec();
    ConstraintsOpt::new(move |c| {
        if opts.is_empty() {
            return;
        }

        let mut collected = Constraints::default();
        for opt in &opts {
            opt.apply(&mut collected);
        }

        let mut by_file: BTreeMap<String, SourceLocation> = BTreeMap::new();
        for loc in collected.source_locations {
            let entry = by_file
                .entry(loc.info.filename.clone())
                .or_insert_with(|| SourceLocation {
                    info: Arc::clone(&loc.info),
                    definition: loc.definition.clone(),
                    ranges: Vec::new(),
                });
            for range in loc.ranges {
                if !entry.ranges.contains(&range) {
                    entry.ranges.push(range);
                }
            }
        }

        c.source_locations.extend(by_file.into_values());
    })
}

/// One step along a path into a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// A parsed spec document that can resolve node paths to ranges
pub struct SourceDocument {
    info: Arc<SourceInfo>,
    doc: ImDocument<String>,
    line_starts: Vec<usize>,
}

impl fmt::Debug for SourceDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceDocument")
            .field("filename", &self.info.filename)
            .finish_non_exhaustive()
    }
}

impl SourceDocument {
    pub const LANGUAGE: &'static str = "toml";

    pub fn parse(filename: impl Into<String>, contents: impl Into<String>) -> StratumResult<Self> {
        let filename = filename.into();
        let contents = contents.into();

        let doc = ImDocument::parse(contents.clone()).map_err(|e| StratumError::SpecParse {
            path: filename.clone(),
            reason: e.to_string(),
        })?;

        let line_starts = std::iter::once(0)
            .chain(contents.match_indices('\n').map(|(i, _)| i + 1))
            .collect();

        Ok(Self {
            info: Arc::new(SourceInfo {
                filename,
                language: Self::LANGUAGE.to_string(),
                data: contents.into_bytes(),
            }),
            doc,
            line_starts,
        })
    }

    pub fn info(&self) -> &Arc<SourceInfo> {
        &self.info
    }

    /// Resolve `path` to the range covered by that node and everything below it.
    pub fn locate(&self, path: &[PathSegment]) -> Option<SourceMap> {
        let mut cursor = Cursor::Item(self.doc.as_item());
        let mut key_span = None;

        for seg in path {
            let (next, span) = cursor.step(seg)?;
            cursor = next;
            key_span = span;
        }

        let mut acc = SpanAcc::default();
        acc.add(key_span);
        cursor.visit(&mut acc);
        let bytes = acc.finish()?;

        Some(SourceMap::new(Arc::clone(&self.info), self.range_of(bytes)))
    }

    /// Position of the byte at `offset`
    pub fn position_at(&self, offset: usize) -> Position {
        let line_idx = self.line_starts.partition_point(|&start| start <= offset);
        let line_start = self.line_starts[line_idx.saturating_sub(1)];
        Position {
            line: line_idx as u32,
            character: (offset - line_start + 1) as u32,
        }
    }

    fn range_of(&self, bytes: ByteRange<usize>) -> Range {
        let start = self.position_at(bytes.start);
        // The end is one past the last byte; multi-line strings land on
        // their closing line because the offset is resolved through the
        // raw document.
        let mut end = self.position_at(bytes.end.saturating_sub(1).max(bytes.start));
        end.character += 1;
        Range { start, end }
    }
}

enum Cursor<'a> {
    Item(&'a Item),
    Value(&'a Value),
    Table(&'a toml_edit::Table),
}

impl<'a> Cursor<'a> {
    fn table_like(&self) -> Option<&'a dyn TableLike> {
        match *self {
            Cursor::Item(item) => item.as_table_like(),
            Cursor::Value(Value::InlineTable(t)) => Some(t),
            Cursor::Value(_) => None,
            Cursor::Table(t) => Some(t),
        }
    }

    fn step(&self, seg: &PathSegment) -> Option<(Cursor<'a>, Option<ByteRange<usize>>)> {
        match seg {
            PathSegment::Key(name) => {
                let table = self.table_like()?;
                let (key, item) = TableLike::get_key_value(table, name)?;
                Some((Cursor::Item(item), key.span()))
            }
            PathSegment::Index(idx) => match *self {
                Cursor::Item(Item::ArrayOfTables(aot)) => Some((Cursor::Table(aot.get(*idx)?), None)),
                Cursor::Item(Item::Value(Value::Array(arr))) | Cursor::Value(Value::Array(arr)) => {
                    Some((Cursor::Value(arr.get(*idx)?), None))
                }
                _ => None,
            },
        }
    }

    fn visit(&self, acc: &mut SpanAcc) {
        match *self {
            Cursor::Item(item) => visit_item(item, acc),
            Cursor::Value(value) => visit_value(value, acc),
            Cursor::Table(table) => {
                acc.add(table.span());
                visit_table_like(table, acc);
            }
        }
    }
}

fn visit_item(item: &Item, acc: &mut SpanAcc) {
    match item {
        Item::None => {}
        Item::Value(value) => visit_value(value, acc),
        Item::Table(table) => {
            acc.add(table.span());
            visit_table_like(table, acc);
        }
        Item::ArrayOfTables(aot) => {
            for table in aot.iter() {
                acc.add(table.span());
                visit_table_like(table, acc);
            }
        }
    }
}

fn visit_value(value: &Value, acc: &mut SpanAcc) {
    acc.add(value.span());
    match value {
        Value::Array(arr) => {
            for v in arr.iter() {
                visit_value(v, acc);
            }
        }
        Value::InlineTable(table) => visit_table_like(table, acc),
        _ => {}
    }
}

fn visit_table_like(table: &dyn TableLike, acc: &mut SpanAcc) {
    for (name, child) in TableLike::iter(table) {
        if let Some((key, _)) = TableLike::get_key_value(table, name) {
            acc.add(key.span());
        }
        visit_item(child, acc);
    }
}

/// Smallest start and largest end over every span seen in a sub-tree
#[derive(Default)]
struct SpanAcc {
    start: Option<usize>,
    end: Option<usize>,
}

impl SpanAcc {
    fn add(&mut self, span: Option<ByteRange<usize>>) {
        let Some(span) = span else { return };
        self.start = Some(self.start.map_or(span.start, |s| s.min(span.start)));
        self.end = Some(self.end.map_or(span.end, |e| e.max(span.end)));
    }

    fn finish(self) -> Option<ByteRange<usize>> {
        Some(self.start?..self.end?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"name = "demo"

[sources.app]
context = { name = "app" }
generate = [
  { pip = { paths = ["."] } },
]

[sources.lib]
git = { url = "https://example.com/lib.git", commit = "abc" }
script = """
line one
line two
"""
"#;

    fn doc() -> SourceDocument {
        SourceDocument::parse("spec.toml", DOC).unwrap()
    }

    fn path(segs: &[PathSegment]) -> Vec<PathSegment> {
        segs.to_vec()
    }

    #[test]
    fn locates_inline_generator() {
        let d = doc();
        let sm = d
            .locate(&path(&["sources".into(), "app".into(), "generate".into(), 0.into(), "pip".into()]))
            .unwrap();
        let r = sm.range();
        assert_eq!(r.start.line, 6);
        assert_eq!(r.end.line, 6);
        assert!(r.end.character > r.start.character);
        assert_eq!(sm.filename(), "spec.toml");
    }

    #[test]
    fn table_range_covers_subtree() {
        let d = doc();
        let sm = d.locate(&path(&["sources".into(), "app".into()])).unwrap();
        let r = sm.range();
        assert_eq!(r.start.line, 3);
        assert_eq!(r.end.line, 7);
    }

    #[test]
    fn multiline_string_extends_end_line() {
        let d = doc();
        let sm = d.locate(&path(&["sources".into(), "lib".into(), "script".into()])).unwrap();
        let r = sm.range();
        assert_eq!(r.start.line, 11);
        assert_eq!(r.end.line, 14);
        assert_eq!(r.end.character, 4);
    }

    #[test]
    fn missing_path_is_none() {
        let d = doc();
        assert!(d.locate(&path(&["sources".into(), "nope".into()])).is_none());
        assert!(d
            .locate(&path(&["sources".into(), "app".into(), "generate".into(), 5.into()]))
            .is_none());
    }

    #[test]
    fn position_at_counts_lines() {
        let d = doc();
        assert_eq!(d.position_at(0), Position { line: 1, character: 1 });
        let offset = DOC.find("[sources.app]").unwrap();
        assert_eq!(d.position_at(offset), Position { line: 3, character: 1 });
    }

    #[test]
    fn root_location_has_no_definition() {
        let d = doc();
        let sm = d.locate(&path(&["name".into()])).unwrap();
        let mut c = Constraints::default();
        sm.root_location().apply(&mut c);
        assert_eq!(c.source_locations.len(), 1);
        assert!(c.source_locations[0].definition.is_none());
    }

    #[test]
    fn location_for_records_state_digest() {
        let d = doc();
        let sm = d.locate(&path(&["name".into()])).unwrap();
        let st = State::scratch();
        let mut c = Constraints::default();
        sm.location_for(&st).apply(&mut c);
        assert_eq!(c.source_locations[0].definition.as_deref(), Some(st.digest()));
    }

    #[test]
    fn missing_map_is_noop() {
        let mut c = Constraints::default();
        location_for(None, &State::scratch()).apply(&mut c);
        root_location(None).apply(&mut c);
        assert!(c.source_locations.is_empty());
    }

    #[test]
    fn merge_groups_by_file_and_dedupes() {
        let d = doc();
        let other = SourceDocument::parse("other.toml", "a = 1\nb = 2\n").unwrap();
        let a = d.locate(&path(&["name".into()])).unwrap();
        let b = d.locate(&path(&["sources".into(), "lib".into()])).unwrap();
        let c_other = other.locate(&path(&["b".into()])).unwrap();

        let merged = merge_locations(&[
            a.root_location(),
            c_other.root_location(),
            b.root_location(),
            a.root_location(),
        ]);

        let mut c = Constraints::default();
        let existing = a.root_location();
        existing.apply(&mut c);
        merged.apply(&mut c);

        // The pre-existing location is kept untouched.
        assert_eq!(c.source_locations.len(), 3);
        assert_eq!(c.source_locations[0].ranges, vec![a.range()]);

        let other_loc = &c.source_locations[1];
        assert_eq!(other_loc.info.filename, "other.toml");
        let spec_loc = &c.source_locations[2];
        assert_eq!(spec_loc.info.filename, "spec.toml");
        assert_eq!(spec_loc.ranges, vec![a.range(), b.range()]);
    }

    #[test]
    fn merge_of_nothing_is_noop() {
        let mut c = Constraints::default();
        merge_locations(&[]).apply(&mut c);
        assert!(c.source_locations.is_empty());
    }
}
