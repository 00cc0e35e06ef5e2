//! Span geometry: text cursors, ranges, and located matches.
//!
//! Rows and columns are 1-indexed. Ranges are half-open in column terms:
//! `end` points one past the last matched byte. Columns count bytes, which
//! is what both engines emit for ASCII-dominated source.
//!
//! The text encoding of a [`Match`] is `path:sr:sc-er:ec`, the line format
//! printed by stsearch and the durable form used in reports.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ParseMatchError, SpanError};

/// A text cursor. Ordering is lexicographic on `(row, column)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Point {
    pub row: u32,
    pub column: u32,
}

impl Point {
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }

    /// Re-express this point relative to `origin`, 1-indexed.
    ///
    /// The column is relative only when both points share a row; on later
    /// rows the column is already measured from a line start.
    pub fn diff(&self, origin: Point) -> Result<Point, SpanError> {
        if origin > *self {
            return Err(SpanError::PrecedesOrigin {
                row: self.row,
                column: self.column,
                origin_row: origin.row,
                origin_column: origin.column,
            });
        }

        let row = self.row - origin.row + 1;
        let column = if self.row == origin.row {
            self.column - origin.column + 1
        } else {
            self.column
        };
        Ok(Point { row, column })
    }
}

/// A span between two points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Range {
    pub start: Point,
    pub end: Point,
}

impl Range {
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    /// Non-strict nesting: equal ranges contain each other.
    pub fn contains(&self, other: &Range) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// This range expressed in coordinates relative to `origin`.
    pub fn adjusted(&self, origin: Point) -> Result<Range, SpanError> {
        Ok(Range {
            start: self.start.diff(origin)?,
            end: self.end.diff(origin)?,
        })
    }

    /// Byte interval of this range within `contents`.
    pub fn span(&self, contents: impl AsRef<[u8]>) -> Result<std::ops::Range<usize>, SpanError> {
        let contents = contents.as_ref();
        let lines = line_starts(contents);

        let line = |row: u32| -> Result<usize, SpanError> {
            (row as usize)
                .checked_sub(1)
                .and_then(|i| lines.get(i).copied())
                .ok_or(SpanError::RowOutOfBounds {
                    row,
                    lines: lines.len(),
                })
        };

        let first = line(self.start.row)?;
        let last = line(self.end.row)?;

        let offset = |base: usize, column: u32| (base + column as usize).checked_sub(1);
        let out_of_bounds = || SpanError::OffsetOutOfBounds {
            start: first + self.start.column as usize,
            end: last + self.end.column as usize,
            len: contents.len(),
        };

        let start = offset(first, self.start.column).ok_or_else(out_of_bounds)?;
        let end = offset(last, self.end.column).ok_or_else(out_of_bounds)?;
        if start > end || end > contents.len() {
            return Err(out_of_bounds());
        }
        Ok(start..end)
    }
}

/// Offsets at which each line of `contents` begins.
///
/// A trailing newline opens one final empty line.
fn line_starts(contents: &[u8]) -> Vec<usize> {
    std::iter::once(0)
        .chain(
            contents
                .iter()
                .enumerate()
                .filter(|(_, b)| **b == b'\n')
                .map(|(i, _)| i + 1),
        )
        .collect()
}

static EXTRACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*):(\d+):(\d+)-(\d+):(\d+)$").expect("match line regex is valid")
});

/// A located occurrence reported by an engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Match {
    pub path: PathBuf,
    pub range: Range,
}

impl Match {
    pub fn new(path: impl Into<PathBuf>, range: Range) -> Self {
        Self {
            path: path.into(),
            range,
        }
    }

    /// Decode a `path:sr:sc-er:ec` line.
    pub fn parse(line: &str) -> Result<Self, ParseMatchError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let caps = EXTRACT
            .captures(line)
            .ok_or_else(|| ParseMatchError::Format(line.to_string()))?;

        let coordinate = |i: usize| -> Result<u32, ParseMatchError> {
            caps[i].parse().map_err(|_| ParseMatchError::Coordinate {
                line: line.to_string(),
            })
        };

        Ok(Match {
            path: PathBuf::from(&caps[1]),
            range: Range::new(
                Point::new(coordinate(2)?, coordinate(3)?),
                Point::new(coordinate(4)?, coordinate(5)?),
            ),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, other: &Match) -> bool {
        self.path == other.path && self.range.contains(&other.range)
    }

    /// The matched text, cut out of `contents`.
    pub fn text_in(&self, contents: &[u8]) -> Result<String, SpanError> {
        let span = self.range.span(contents)?;
        Ok(String::from_utf8_lossy(&contents[span]).into_owned())
    }

    /// The matched text, read from the file on disk.
    pub fn text(&self) -> std::io::Result<String> {
        let contents = std::fs::read(&self.path)?;
        self.text_in(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Range { start, end } = self.range;
        write!(
            f,
            "{}:{}:{}-{}:{}",
            self.path.display(),
            start.row,
            start.column,
            end.row,
            end.column
        )
    }
}

impl FromStr for Match {
    type Err = ParseMatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(sr: u32, sc: u32, er: u32, ec: u32) -> Range {
        Range::new(Point::new(sr, sc), Point::new(er, ec))
    }

    #[test]
    fn test_point_ordering_is_lexicographic() {
        assert!(Point::new(1, 9) < Point::new(2, 1));
        assert!(Point::new(2, 1) < Point::new(2, 2));
        assert_eq!(Point::new(3, 3), Point::new(3, 3));
    }

    #[test]
    fn test_contains_reflexive_and_transitive() {
        let outer = range(1, 1, 5, 10);
        let middle = range(2, 1, 4, 3);
        let inner = range(3, 2, 3, 8);

        assert!(outer.contains(&outer));
        assert!(outer.contains(&middle));
        assert!(middle.contains(&inner));
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
    }

    #[test]
    fn test_adjusted_same_row_is_relative() {
        let r = range(3, 5, 3, 9).adjusted(Point::new(3, 2)).unwrap();
        assert_eq!(r, range(1, 4, 1, 8));
    }

    #[test]
    fn test_adjusted_later_row_keeps_column() {
        let r = range(3, 5, 4, 2).adjusted(Point::new(3, 2)).unwrap();
        assert_eq!(r, range(1, 4, 2, 2));
    }

    #[test]
    fn test_adjusted_before_origin_fails() {
        let err = range(1, 1, 1, 4).adjusted(Point::new(2, 1)).unwrap_err();
        assert!(matches!(err, SpanError::PrecedesOrigin { row: 1, .. }));
    }

    #[test]
    fn test_span_single_and_multi_line() {
        let text = "let a = 1;\nfoo(bar);\nbaz();\n";
        let span = range(2, 1, 2, 9).span(text).unwrap();
        assert_eq!(&text[span], "foo(bar)");

        let span = range(1, 5, 3, 4).span(text).unwrap();
        assert_eq!(&text[span], "a = 1;\nfoo(bar);\nbaz");
    }

    #[test]
    fn test_span_out_of_bounds() {
        let text = "abc";
        assert!(matches!(
            range(2, 1, 2, 2).span(text),
            Err(SpanError::RowOutOfBounds { row: 2, lines: 1 })
        ));
        assert!(matches!(
            range(1, 1, 1, 9).span(text),
            Err(SpanError::OffsetOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_adjusted_span_round_trip() {
        let text = "const x = f(\n  a,\n  g(b)\n);\n";
        let outer = range(1, 11, 4, 2);
        let inner = range(3, 3, 3, 7);

        let window = &text[outer.span(text).unwrap()];
        let relative = inner.adjusted(outer.start).unwrap();

        assert_eq!(
            &window[relative.span(window).unwrap()],
            &text[inner.span(text).unwrap()]
        );
        assert_eq!(&text[inner.span(text).unwrap()], "g(b)");
    }

    #[test]
    fn test_match_parse_display_round_trip() {
        let m = Match::new("src/app.js", range(12, 4, 13, 1));
        assert_eq!(m.to_string(), "src/app.js:12:4-13:1");
        assert_eq!(Match::parse(&m.to_string()).unwrap(), m);
    }

    #[test]
    fn test_match_parse_path_with_colons() {
        let m = Match::parse("C:/work/a:b.js:1:2-3:4\n").unwrap();
        assert_eq!(m.path, PathBuf::from("C:/work/a:b.js"));
        assert_eq!(m.range, range(1, 2, 3, 4));
    }

    #[test]
    fn test_match_parse_rejects_garbage() {
        assert!(matches!(
            Match::parse("error: bad pattern"),
            Err(ParseMatchError::Format(_))
        ));
        assert!(matches!(
            Match::parse("a.js:99999999999:1-1:1"),
            Err(ParseMatchError::Coordinate { .. })
        ));
    }

    #[test]
    fn test_match_contains_requires_same_path() {
        let a = Match::new("a.js", range(1, 1, 1, 10));
        let b = Match::new("b.js", range(1, 2, 1, 9));
        let c = Match::new("a.js", range(1, 2, 1, 9));
        assert!(!a.contains(&b));
        assert!(a.contains(&c));
    }

    #[test]
    fn test_match_text_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.js");
        std::fs::write(&path, "a;\n(foo(bar));\n").unwrap();

        let m = Match::new(&path, range(2, 2, 2, 10));
        assert_eq!(m.text().unwrap(), "foo(bar)");
    }
}
