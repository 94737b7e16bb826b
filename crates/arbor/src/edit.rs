//! Text edits and the old-to-new position map used by incremental parsing.

use ropey::Rope;
use text_size::{TextRange, TextSize};
use thiserror::Error;

/// One byte-range replacement: `start..old_end` of the old text became
/// `start..new_end` of the new text.
///
/// A list of edits is applied in order; each edit is expressed in the
/// coordinates of the text produced by the edits before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edit {
    /// First changed byte.
    pub start: TextSize,
    /// End of the replaced range, in the text before this edit.
    pub old_end: TextSize,
    /// End of the replacement, in the text after this edit.
    pub new_end: TextSize,
}

impl Edit {
    /// Replaces `range` with `new_len` bytes.
    #[must_use]
    pub fn replace(range: TextRange, new_len: TextSize) -> Self {
        Self {
            start: range.start(),
            old_end: range.end(),
            new_end: range.start() + new_len,
        }
    }

    /// Inserts `len` bytes at `offset`.
    #[must_use]
    pub fn insert(offset: TextSize, len: TextSize) -> Self {
        Self::replace(TextRange::empty(offset), len)
    }

    /// Deletes `range`.
    #[must_use]
    pub fn delete(range: TextRange) -> Self {
        Self::replace(range, TextSize::from(0))
    }
}

/// A stretch of text untouched by every edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Preserved {
    pub old_start: usize,
    pub old_end: usize,
    pub new_start: usize,
}

impl Preserved {
    fn new_end(&self) -> usize {
        self.new_start + (self.old_end - self.old_start)
    }
}

/// Maps positions of the new text back to the old text.
///
/// Ranges cover one byte past the end of the text so that end-of-input is
/// preserved only when no edit touches the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EditMap {
    segments: Vec<Preserved>,
}

impl EditMap {
    /// Applies `edits` to a text of `old_len` bytes. Returns `None` if an edit
    /// is out of range or the result is not `new_len` bytes long.
    pub fn new(old_len: usize, new_len: usize, edits: &[Edit]) -> Option<Self> {
        let mut segments = vec![Preserved {
            old_start: 0,
            old_end: old_len + 1,
            new_start: 0,
        }];
        let mut len = old_len;

        for edit in edits {
            let start = usize::from(edit.start);
            let old_end = usize::from(edit.old_end);
            let new_end = usize::from(edit.new_end);
            if start > old_end || old_end > len || new_end < start {
                return None;
            }

            let mut next = Vec::with_capacity(segments.len() + 1);
            for segment in &segments {
                let (from, to) = (segment.new_start, segment.new_end());
                if from < start.min(to) {
                    next.push(Preserved {
                        old_start: segment.old_start,
                        old_end: segment.old_start + (start.min(to) - from),
                        new_start: from,
                    });
                }
                let kept = from.max(old_end);
                if kept < to {
                    next.push(Preserved {
                        old_start: segment.old_start + (kept - from),
                        old_end: segment.old_end,
                        new_start: kept - old_end + new_end,
                    });
                }
            }
            segments = next;
            len = len - (old_end - start) + (new_end - start);
        }

        (len == new_len).then_some(Self { segments })
    }

    /// The preserved segment containing new position `offset`.
    pub fn segment_at(&self, offset: usize) -> Option<&Preserved> {
        let index = self
            .segments
            .partition_point(|segment| segment.new_end() <= offset);
        self.segments
            .get(index)
            .filter(|segment| segment.new_start <= offset)
    }

    /// The old position of new position `offset`, if it was untouched.
    pub fn to_old(&self, offset: usize) -> Option<usize> {
        self.segment_at(offset)
            .map(|segment| segment.old_start + (offset - segment.new_start))
    }
}

/// Errors raised by [`Document::replace`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    /// The range reaches past the end of the document.
    #[error("range {range:?} is out of bounds for a document of {len:?} bytes")]
    OutOfBounds {
        /// The requested range.
        range: TextRange,
        /// The document length.
        len: TextSize,
    },

    /// A range boundary falls inside a UTF-8 character.
    #[error("offset {0:?} is not on a character boundary")]
    NotCharBoundary(TextSize),
}

/// An editable text buffer that reports each change as an [`Edit`].
#[derive(Debug, Clone, Default)]
pub struct Document {
    rope: Rope,
}

impl Document {
    /// A document holding `text`.
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self {
            rope: Rope::from_str(text),
        }
    }

    /// Replaces `range` with `text` and describes the change.
    ///
    /// # Errors
    ///
    /// Returns [`EditError`] if `range` is out of bounds or splits a character;
    /// the document is unchanged then.
    pub fn replace(&mut self, range: TextRange, text: &str) -> Result<Edit, EditError> {
        let len = self.len();
        if range.end() > len {
            return Err(EditError::OutOfBounds { range, len });
        }
        let start = self.char_index(range.start())?;
        let end = self.char_index(range.end())?;

        self.rope.remove(start..end);
        self.rope.insert(start, text);
        let inserted = TextSize::try_from(text.len()).unwrap_or(TextSize::from(u32::MAX));
        Ok(Edit::replace(range, inserted))
    }

    fn char_index(&self, offset: TextSize) -> Result<usize, EditError> {
        let byte = usize::from(offset);
        let char_index = self.rope.byte_to_char(byte);
        if self.rope.char_to_byte(char_index) == byte {
            Ok(char_index)
        } else {
            Err(EditError::NotCharBoundary(offset))
        }
    }

    /// The current text.
    #[must_use]
    pub fn text(&self) -> String {
        self.rope.to_string()
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> TextSize {
        TextSize::try_from(self.rope.len_bytes()).unwrap_or(TextSize::from(u32::MAX))
    }

    /// Returns `true` for an empty document.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rope.len_bytes() == 0
    }

    /// Number of lines; a trailing newline starts an empty last line.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.rope.len_lines()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(n: u32) -> TextSize {
        TextSize::from(n)
    }

    fn range(start: u32, end: u32) -> TextRange {
        TextRange::new(size(start), size(end))
    }

    #[test]
    fn test_replacement_splits_the_map() {
        // "1+2+3" -> "1+22+3"
        let map = EditMap::new(5, 6, &[Edit::replace(range(2, 3), size(2))]).unwrap();
        assert_eq!(map.to_old(0), Some(0));
        assert_eq!(map.to_old(1), Some(1));
        assert_eq!(map.to_old(2), None);
        assert_eq!(map.to_old(3), None);
        assert_eq!(map.to_old(4), Some(3));
        assert_eq!(map.to_old(6), Some(5));
        let tail = map.segment_at(4).unwrap();
        assert_eq!((tail.old_start, tail.old_end), (3, 6));
    }

    #[test]
    fn test_insertion_splits_a_segment() {
        let map = EditMap::new(4, 6, &[Edit::insert(size(2), size(2))]).unwrap();
        assert_eq!(map.to_old(1), Some(1));
        assert_eq!(map.to_old(2), None);
        assert_eq!(map.to_old(4), Some(2));
        assert_eq!(map.segment_at(1).unwrap().old_end, 2);
    }

    #[test]
    fn test_edits_apply_in_sequence() {
        // "abcdef": delete "b" -> "acdef", then insert "XY" at 3 -> "acdXYef"
        let edits = [Edit::delete(range(1, 2)), Edit::insert(size(3), size(2))];
        let map = EditMap::new(6, 7, &edits).unwrap();
        assert_eq!(map.to_old(0), Some(0));
        assert_eq!(map.to_old(1), Some(2));
        assert_eq!(map.to_old(2), Some(3));
        assert_eq!(map.to_old(5), Some(4));
        assert_eq!(map.to_old(7), Some(6));
    }

    #[test]
    fn test_invalid_edits_are_rejected() {
        assert!(EditMap::new(3, 3, &[Edit::replace(range(2, 5), size(1))]).is_none());
        assert!(EditMap::new(3, 9, &[Edit::insert(size(1), size(1))]).is_none());
    }

    #[test]
    fn test_document_replace() {
        let mut document = Document::new("let x = 1;");
        let edit = document.replace(range(8, 9), "42").unwrap();
        assert_eq!(document.text(), "let x = 42;");
        assert_eq!(edit, Edit::replace(range(8, 9), size(2)));
        assert_eq!(document.len(), size(11));
    }

    #[test]
    fn test_document_rejects_bad_ranges() {
        let mut document = Document::new("é");
        assert_eq!(
            document.replace(range(1, 2), "e"),
            Err(EditError::NotCharBoundary(size(1)))
        );
        assert!(matches!(
            document.replace(range(0, 5), ""),
            Err(EditError::OutOfBounds { .. })
        ));
        assert_eq!(document.text(), "é");
    }
}
