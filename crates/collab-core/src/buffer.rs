//! TextBuffer: rope-backed document text addressed by UTF-16 offsets.
//!
//! The wire protocol speaks flat offsets in UTF-16 code units, while editors
//! think in line/character positions. This buffer converts between the two.

use ropey::Rope;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("Range {start}..{end} out of bounds for length {len}")]
    OutOfRange { start: usize, end: usize, len: usize },

    #[error("Offset {0} splits a surrogate pair")]
    NotCharBoundary(usize),
}

pub type Result<T> = std::result::Result<T, BufferError>;

/// Zero-based line and UTF-16 character column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

impl Position {
    pub fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }
}

/// Document text.
#[derive(Debug, Clone, Default)]
pub struct TextBuffer {
    rope: Rope,
}

impl TextBuffer {
    pub fn new(text: &str) -> Self {
        Self {
            rope: Rope::from_str(text),
        }
    }

    /// Length in UTF-16 code units.
    pub fn len_utf16(&self) -> usize {
        self.rope.len_utf16_cu()
    }

    pub fn is_empty(&self) -> bool {
        self.rope.len_chars() == 0
    }

    pub fn len_lines(&self) -> usize {
        self.rope.len_lines()
    }

    /// Offset of a position. Out-of-range lines and columns are clamped.
    pub fn offset_at(&self, position: Position) -> usize {
        if position.line >= self.rope.len_lines() {
            return self.len_utf16();
        }
        let line_start = self.rope.char_to_utf16_cu(self.rope.line_to_char(position.line));
        line_start + position.character.min(self.line_content_len(position.line))
    }

    /// Position of an offset. Offsets past the end are clamped.
    pub fn position_at(&self, offset: usize) -> Position {
        let offset = offset.min(self.len_utf16());
        let char_idx = self.rope.utf16_cu_to_char(offset);
        let line = self.rope.char_to_line(char_idx);
        let line_start = self.rope.char_to_utf16_cu(self.rope.line_to_char(line));
        Position {
            line,
            character: self.rope.char_to_utf16_cu(char_idx) - line_start,
        }
    }

    /// Length of a line in UTF-16 code units, excluding its line break.
    pub fn line_content_len(&self, line: usize) -> usize {
        if line >= self.rope.len_lines() {
            return 0;
        }
        let slice = self.rope.line(line);
        let breaks = slice
            .chars_at(slice.len_chars())
            .reversed()
            .take_while(|c| is_line_break(*c))
            .count();
        // Every line-break character is a single UTF-16 code unit
        slice.len_utf16_cu() - breaks.min(2)
    }

    pub fn insert(&mut self, offset: usize, text: &str) -> Result<()> {
        let len = self.len_utf16();
        if offset > len {
            return Err(BufferError::OutOfRange {
                start: offset,
                end: offset,
                len,
            });
        }
        let char_idx = self.char_at(offset)?;
        self.rope.insert(char_idx, text);
        Ok(())
    }

    pub fn delete(&mut self, offset: usize, count: usize) -> Result<()> {
        let len = self.len_utf16();
        let end = offset.saturating_add(count);
        if end > len {
            return Err(BufferError::OutOfRange {
                start: offset,
                end,
                len,
            });
        }
        let start_char = self.char_at(offset)?;
        let end_char = self.char_at(end)?;
        self.rope.remove(start_char..end_char);
        Ok(())
    }

    /// Char index of an in-bounds offset that lies on a code point boundary.
    fn char_at(&self, offset: usize) -> Result<usize> {
        let char_idx = self.rope.utf16_cu_to_char(offset);
        if self.rope.char_to_utf16_cu(char_idx) != offset {
            return Err(BufferError::NotCharBoundary(offset));
        }
        Ok(char_idx)
    }

    pub fn text(&self) -> String {
        self.rope.to_string()
    }
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\u{000B}' | '\u{000C}' | '\u{0085}' | '\u{2028}' | '\u{2029}'
    )
}
