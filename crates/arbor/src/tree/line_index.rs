use std::fmt;

/// A 0-based row and UTF-8 byte column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Point {
    /// Line number.
    pub row: usize,
    /// Byte offset within the line.
    pub column: usize,
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.column)
    }
}

/// Byte offsets of line starts, for offset to [`Point`] conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { starts }
    }

    pub fn point(&self, offset: usize) -> Point {
        let row = self.starts.partition_point(|&start| start <= offset) - 1;
        Point {
            row,
            column: offset - self.starts[row],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points() {
        let index = LineIndex::new("ab\ncd\n\né");
        assert_eq!(index.point(0), Point { row: 0, column: 0 });
        assert_eq!(index.point(2), Point { row: 0, column: 2 });
        assert_eq!(index.point(3), Point { row: 1, column: 0 });
        assert_eq!(index.point(7), Point { row: 3, column: 0 });
        assert_eq!(index.point(9), Point { row: 3, column: 2 });
    }
}
