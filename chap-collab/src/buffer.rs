//! Boundary with the editing surface.
//!
//! The live buffer belongs to the surface. The sync core only calls
//! [`EditorSurface`] operations, each of which is atomic and reports exactly
//! one [`BufferChange`] notification.
//!
//! [`TextBuffer`] is a rope-backed surface used by headless hosts and tests.

use ropey::{Rope, RopeSlice};

use crate::patch::{Origin, Position};

/// Change notification emitted by the surface for every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferChange {
    pub origin: Origin,
    /// Text that occupied `[from, to)` before the edit.
    pub removed: String,
    pub inserted: String,
    pub from: Position,
    pub to: Position,
}

/// Operations the sync core needs from an editing surface.
///
/// Implementations must accept positions past the end of the content and
/// clamp them rather than panic.
pub trait EditorSurface {
    /// Full buffer contents.
    fn value(&self) -> String;

    /// Replace the whole buffer. Reported with [`Origin::SetValue`].
    fn set_value(&mut self, text: &str) -> BufferChange;

    /// Replace `[from, to)` with `text` as one operation.
    fn replace_range(
        &mut self,
        text: &str,
        from: Position,
        to: Position,
        origin: Origin,
    ) -> BufferChange;

    /// Current local cursor.
    fn cursor(&self) -> Position;

    /// Move the local cursor, returning the clamped position.
    fn set_cursor(&mut self, position: Position) -> Position;
}

/// Rope-backed [`EditorSurface`] with UTF-16 positions.
#[derive(Debug, Clone)]
pub struct TextBuffer {
    rope: Rope,
    cursor: Position,
}

impl TextBuffer {
    pub fn new() -> Self {
        Self::from_text("")
    }

    pub fn from_text(text: &str) -> Self {
        Self {
            rope: Rope::from_str(text),
            cursor: Position::ZERO,
        }
    }

    pub fn line_count(&self) -> usize {
        self.rope.len_lines()
    }

    /// Clamp `position` onto the buffer.
    ///
    /// Lines past the end map to the end of the last line; characters past
    /// the end of a line map to its end; a character offset that lands
    /// inside a surrogate pair rounds down to the pair's start.
    pub fn clamp(&self, position: Position) -> Position {
        let last_line = self.rope.len_lines().saturating_sub(1);
        let line = position.line as usize;
        if line > last_line {
            let content = line_content(self.rope.line(last_line));
            return Position::new(last_line as u32, content.len_utf16_cu() as u32);
        }

        let content = line_content(self.rope.line(line));
        let code_units = (position.character as usize).min(content.len_utf16_cu());
        let char_idx = content.utf16_cu_to_char(code_units);
        Position::new(line as u32, content.char_to_utf16_cu(char_idx) as u32)
    }

    /// Position just past the last character.
    pub fn end(&self) -> Position {
        self.clamp(Position::new(u32::MAX, u32::MAX))
    }

    fn char_index(&self, position: Position) -> usize {
        let clamped = self.clamp(position);
        let line = clamped.line as usize;
        let line_start = self.rope.line_to_char(line);
        line_start + self.rope.line(line).utf16_cu_to_char(clamped.character as usize)
    }

    fn position_of(&self, char_idx: usize) -> Position {
        let char_idx = char_idx.min(self.rope.len_chars());
        let line = self.rope.char_to_line(char_idx);
        let column = char_idx - self.rope.line_to_char(line);
        let code_units = self.rope.line(line).char_to_utf16_cu(column);
        Position::new(line as u32, code_units as u32)
    }
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorSurface for TextBuffer {
    fn value(&self) -> String {
        self.rope.to_string()
    }

    fn set_value(&mut self, text: &str) -> BufferChange {
        let removed = self.rope.to_string();
        let to = self.end();
        self.rope = Rope::from_str(text);
        self.cursor = Position::ZERO;
        BufferChange {
            origin: Origin::SetValue,
            removed,
            inserted: text.to_string(),
            from: Position::ZERO,
            to,
        }
    }

    fn replace_range(
        &mut self,
        text: &str,
        from: Position,
        to: Position,
        origin: Origin,
    ) -> BufferChange {
        let (from, to) = {
            let (a, b) = (self.clamp(from), self.clamp(to));
            if b < a { (b, a) } else { (a, b) }
        };
        let start = self.char_index(from);
        let end = self.char_index(to);
        let cursor_idx = self.char_index(self.cursor);

        let removed = self.rope.slice(start..end).to_string();
        self.rope.remove(start..end);
        self.rope.insert(start, text);

        // Keep the local cursor anchored to the text around it.
        let inserted_chars = text.chars().count();
        let mapped = if cursor_idx >= end {
            cursor_idx - (end - start) + inserted_chars
        } else if cursor_idx > start {
            start + inserted_chars
        } else {
            cursor_idx
        };
        self.cursor = self.position_of(mapped);

        BufferChange {
            origin,
            removed,
            inserted: text.to_string(),
            from,
            to,
        }
    }

    fn cursor(&self) -> Position {
        self.cursor
    }

    fn set_cursor(&mut self, position: Position) -> Position {
        self.cursor = self.clamp(position);
        self.cursor
    }
}

/// Slice of a line without its trailing line break.
fn line_content(line: RopeSlice<'_>) -> RopeSlice<'_> {
    let mut len = line.len_chars();
    while len > 0 && is_line_break(line.char(len - 1)) {
        len -= 1;
    }
    line.slice(..len)
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\u{000B}' | '\u{000C}' | '\u{0085}' | '\u{2028}' | '\u{2029}'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_into_empty_buffer() {
        let mut buffer = TextBuffer::new();
        let change = buffer.replace_range("hi", Position::ZERO, Position::ZERO, Origin::Input);

        assert_eq!(buffer.value(), "hi");
        assert_eq!(change.removed, "");
        assert_eq!(change.inserted, "hi");
        assert_eq!(change.from, Position::ZERO);
        assert_eq!(change.to, Position::ZERO);
    }

    #[test]
    fn test_replace_across_lines_reports_removed_text() {
        let mut buffer = TextBuffer::from_text("one\ntwo\nthree");
        let change = buffer.replace_range(
            "X",
            Position::new(0, 1),
            Position::new(2, 2),
            Origin::Paste,
        );

        assert_eq!(change.removed, "ne\ntwo\nth");
        assert_eq!(buffer.value(), "oXree");
    }

    #[test]
    fn test_positions_past_end_are_clamped() {
        let mut buffer = TextBuffer::from_text("ab\ncd");
        assert_eq!(buffer.clamp(Position::new(0, 99)), Position::new(0, 2));
        assert_eq!(buffer.clamp(Position::new(7, 0)), Position::new(1, 2));

        let change = buffer.replace_range(
            "!",
            Position::new(40, 40),
            Position::new(50, 0),
            Origin::Input,
        );
        assert_eq!(change.from, Position::new(1, 2));
        assert_eq!(buffer.value(), "ab\ncd!");
    }

    #[test]
    fn test_utf16_columns() {
        // "😀" is two UTF-16 code units.
        let mut buffer = TextBuffer::from_text("a😀b");
        assert_eq!(buffer.end(), Position::new(0, 4));

        // Offset 2 falls inside the surrogate pair and rounds down.
        assert_eq!(buffer.clamp(Position::new(0, 2)), Position::new(0, 1));

        let change = buffer.replace_range("", Position::new(0, 1), Position::new(0, 3), Origin::Delete);
        assert_eq!(change.removed, "😀");
        assert_eq!(buffer.value(), "ab");
    }

    #[test]
    fn test_reversed_range_is_normalised() {
        let mut buffer = TextBuffer::from_text("hello");
        let change = buffer.replace_range("", Position::new(0, 4), Position::new(0, 1), Origin::Delete);
        assert_eq!(change.from, Position::new(0, 1));
        assert_eq!(change.removed, "ell");
        assert_eq!(buffer.value(), "ho");
    }

    #[test]
    fn test_set_value_reports_bulk_load() {
        let mut buffer = TextBuffer::from_text("old\ntext");
        let change = buffer.set_value("new");

        assert_eq!(change.origin, Origin::SetValue);
        assert_eq!(change.removed, "old\ntext");
        assert_eq!(change.to, Position::new(1, 4));
        assert_eq!(buffer.value(), "new");
        assert_eq!(buffer.cursor(), Position::ZERO);
    }

    #[test]
    fn test_cursor_shifts_with_edits_before_it() {
        let mut buffer = TextBuffer::from_text("abc");
        buffer.set_cursor(Position::new(0, 3));

        buffer.replace_range("xy", Position::ZERO, Position::ZERO, Origin::Input);
        assert_eq!(buffer.cursor(), Position::new(0, 5));

        buffer.replace_range("", Position::new(0, 4), Position::new(0, 5), Origin::Delete);
        assert_eq!(buffer.cursor(), Position::new(0, 4));
    }

    #[test]
    fn test_cursor_clamped_on_set() {
        let mut buffer = TextBuffer::from_text("ab\n");
        assert_eq!(buffer.set_cursor(Position::new(0, 10)), Position::new(0, 2));
        assert_eq!(buffer.set_cursor(Position::new(5, 5)), Position::new(1, 0));
    }

    #[test]
    fn test_crlf_line_content() {
        let buffer = TextBuffer::from_text("ab\r\ncd");
        assert_eq!(buffer.line_count(), 2);
        assert_eq!(buffer.clamp(Position::new(0, 9)), Position::new(0, 2));
    }
}
