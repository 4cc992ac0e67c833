//! Source units and positions.
//!
//! Every AST node, issue, and comment carries a [`Position`] pointing back
//! into the source unit it was parsed from. Positions use 1-based lines and
//! 0-based columns, and sub-parsed fragments are translated into the outer
//! document's coordinates at construction time, so downstream tooling never
//! sees a synthetic-buffer location.

use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;

use miette::NamedSource;
use serde::{Deserialize, Serialize};

/// Where a source unit came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// A named file on disk.
    File(PathBuf),
    /// An anonymous in-memory buffer.
    Buffer,
}

/// An immutable source unit: the origin plus the full text being parsed.
#[derive(Debug, Serialize, Deserialize)]
pub struct SourceUnit {
    pub origin: Origin,
    pub code: String,
}

/// Shared handle to a source unit. Two refs are equal only when they point
/// at the same unit, never by comparing contents.
pub type SourceRef = Arc<SourceUnit>;

impl SourceUnit {
    pub fn file(path: impl Into<PathBuf>, code: impl Into<String>) -> SourceRef {
        Arc::new(SourceUnit {
            origin: Origin::File(path.into()),
            code: code.into(),
        })
    }

    pub fn buffer(code: impl Into<String>) -> SourceRef {
        Arc::new(SourceUnit {
            origin: Origin::Buffer,
            code: code.into(),
        })
    }

    /// Display name used in diagnostics.
    pub fn name(&self) -> String {
        match &self.origin {
            Origin::File(path) => path.display().to_string(),
            Origin::Buffer => "inline template".to_string(),
        }
    }

    /// Convert to a miette `NamedSource` for rich error reporting.
    pub fn to_named_source(&self) -> NamedSource<String> {
        NamedSource::new(self.name(), self.code.clone())
    }
}

impl Default for SourceUnit {
    fn default() -> Self {
        SourceUnit {
            origin: Origin::Buffer,
            code: String::new(),
        }
    }
}

/// A point in a source unit. Lines are 1-based, columns are 0-based and
/// counted in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Point {
    pub line: usize,
    pub column: usize,
}

impl Point {
    pub fn new(line: usize, column: usize) -> Point {
        Point { line, column }
    }

    /// The origin of a top-level parse.
    pub fn start() -> Point {
        Point { line: 1, column: 0 }
    }

    /// Translate a point that is relative to an embedded fragment into the
    /// outer document's coordinates. `bias` is the fragment's start point:
    /// columns shift only on the fragment's first line, lines shift by the
    /// lines preceding the fragment.
    pub fn offset_from(self, bias: Point) -> Point {
        if self.line == 1 {
            Point {
                line: bias.line,
                column: bias.column + self.column,
            }
        } else {
            Point {
                line: bias.line + self.line - 1,
                column: self.column,
            }
        }
    }
}

/// A half-open span in a source unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub start: Point,
    pub end: Point,
    #[serde(skip)]
    pub source: SourceRef,
}

impl Position {
    pub fn new(start: Point, end: Point, source: SourceRef) -> Position {
        Position { start, end, source }
    }

    /// A zero-width position, used for synthesized nodes.
    pub fn synthetic(at: Point, source: SourceRef) -> Position {
        Position {
            start: at,
            end: at,
            source,
        }
    }

    /// Byte range of this span within its source, for span-based tooling.
    pub fn byte_range(&self) -> Range<usize> {
        let start = byte_of(&self.source.code, self.start);
        let end = byte_of(&self.source.code, self.end);
        start..end.max(start)
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start
            && self.end == other.end
            && Arc::ptr_eq(&self.source, &other.source)
    }
}

fn byte_of(code: &str, point: Point) -> usize {
    let mut line = 1usize;
    let mut column = 0usize;
    for (offset, ch) in code.char_indices() {
        if line == point.line && column == point.column {
            return offset;
        }
        if ch == '\n' {
            line += 1;
            column = 0;
        } else {
            column += 1;
        }
    }
    code.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_keeps_columns_only_on_first_line() {
        let bias = Point::new(4, 10);
        assert_eq!(Point::new(1, 3).offset_from(bias), Point::new(4, 13));
        assert_eq!(Point::new(2, 3).offset_from(bias), Point::new(5, 3));
    }

    #[test]
    fn top_level_bias_is_identity() {
        let bias = Point::start();
        assert_eq!(Point::new(7, 2).offset_from(bias), Point::new(7, 2));
    }

    #[test]
    fn source_equality_is_identity() {
        let a = SourceUnit::buffer("same text");
        let b = SourceUnit::buffer("same text");
        let p1 = Position::synthetic(Point::start(), a.clone());
        let p2 = Position::synthetic(Point::start(), a);
        let p3 = Position::synthetic(Point::start(), b);
        assert_eq!(p1, p2);
        assert_ne!(p1, p3);
    }

    #[test]
    fn byte_range_tracks_lines() {
        let src = SourceUnit::buffer("ab\ncd");
        let pos = Position::new(Point::new(2, 0), Point::new(2, 2), src);
        assert_eq!(pos.byte_range(), 3..5);
    }
}
