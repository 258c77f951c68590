//! Bundle line → source file line mapping.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Lines `start_line..=end_line` of the bundle (1-based) came from `file_name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    pub start_line: usize,
    pub end_line: usize,
    pub file_name: String,
}

impl Range {
    pub fn contains(&self, line: usize) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }
}

/// Sorted, non-overlapping ranges covering every bundle line contributed by
/// a source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceMapIndex {
    ranges: Vec<Range>,
}

impl SourceMapIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from ranges that must already be sorted and disjoint.
    pub fn from_ranges(ranges: Vec<Range>) -> Result<Self> {
        let mut index = Self::new();
        for range in ranges {
            index.try_push(range)?;
        }
        Ok(index)
    }

    /// Wrap ranges produced in ascending line order by the bundler.
    pub(crate) fn from_sorted(ranges: Vec<Range>) -> Self {
        debug_assert!(ranges.windows(2).all(|w| w[0].end_line < w[1].start_line));
        Self { ranges }
    }

    /// Decode and validate an index written by [`SourceMapIndex::to_json`].
    pub fn from_json(json: &str) -> Result<Self> {
        let ranges: Vec<Range> = serde_json::from_str(json)?;
        Self::from_ranges(ranges)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.ranges)?)
    }

    /// Append a range after every range already in the index.
    pub fn try_push(&mut self, range: Range) -> Result<()> {
        if range.start_line == 0 || range.end_line < range.start_line {
            return Err(Error::Protocol(format!(
                "invalid source map range {}..{} for {}",
                range.start_line, range.end_line, range.file_name
            )));
        }
        if let Some(last) = self.ranges.last() {
            if range.start_line <= last.end_line {
                return Err(Error::Protocol(format!(
                    "source map range for {} starts at line {} inside {} (ends {})",
                    range.file_name, range.start_line, last.file_name, last.end_line
                )));
            }
        }
        self.ranges.push(range);
        Ok(())
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The range contributed by `file_name`, if it made it into the bundle.
    pub fn range_for(&self, file_name: &str) -> Option<&Range> {
        self.ranges.iter().find(|r| r.file_name == file_name)
    }
}

/// A position in an original source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    /// 1-based line within `file`
    pub line: usize,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Resolves bundle lines reported by the sandbox to source positions.
#[derive(Debug, Clone, Default)]
pub struct ErrorLocator {
    index: SourceMapIndex,
}

impl ErrorLocator {
    pub fn new(index: SourceMapIndex) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &SourceMapIndex {
        &self.index
    }

    /// Map a 1-based bundle line to its source file and line.
    ///
    /// Lines in the injected preamble, dependency tags or between sections
    /// belong to no range and resolve to `None`.
    pub fn locate(&self, bundled_line: usize) -> Option<SourceLocation> {
        let ranges = self.index.ranges();
        let i = ranges.partition_point(|r| r.end_line < bundled_line);
        let range = ranges.get(i).filter(|r| r.contains(bundled_line))?;
        Some(SourceLocation {
            file: range.file_name.clone(),
            line: bundled_line - range.start_line + 1,
        })
    }
}

impl From<SourceMapIndex> for ErrorLocator {
    fn from(index: SourceMapIndex) -> Self {
        Self::new(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: usize, end: usize, file: &str) -> Range {
        Range {
            start_line: start,
            end_line: end,
            file_name: file.to_string(),
        }
    }

    fn locator() -> ErrorLocator {
        SourceMapIndex::from_ranges(vec![
            range(20, 21, "a.css"),
            range(22, 24, "b.js"),
            range(30, 30, "c.json"),
        ])
        .unwrap()
        .into()
    }

    #[test]
    fn test_locate_inside_ranges() {
        let locator = locator();
        assert_eq!(
            locator.locate(20),
            Some(SourceLocation { file: "a.css".into(), line: 1 })
        );
        assert_eq!(
            locator.locate(24),
            Some(SourceLocation { file: "b.js".into(), line: 3 })
        );
        assert_eq!(locator.locate(30).unwrap().file, "c.json");
    }

    #[test]
    fn test_locate_outside_ranges_is_none() {
        let locator = locator();
        assert_eq!(locator.locate(0), None);
        assert_eq!(locator.locate(5), None);
        assert_eq!(locator.locate(27), None);
        assert_eq!(locator.locate(31), None);
        assert_eq!(ErrorLocator::default().locate(1), None);
    }

    #[test]
    fn test_overlap_rejected() {
        let err = SourceMapIndex::from_ranges(vec![range(1, 5, "a"), range(5, 6, "b")]);
        assert!(err.is_err());
        assert!(SourceMapIndex::from_ranges(vec![range(3, 2, "a")]).is_err());
    }

    #[test]
    fn test_json_uses_camel_case() {
        let index = SourceMapIndex::from_ranges(vec![range(3, 4, "a.css")]).unwrap();
        let json = index.to_json().unwrap();
        assert!(json.contains("\"startLine\": 3"));
        assert!(json.contains("\"fileName\": \"a.css\""));
        assert_eq!(SourceMapIndex::from_json(&json).unwrap(), index);
    }
}
