//! Source positions and spans.
//!
//! Every token and AST node records where it came from so that
//! diagnostics can point at the offending range. Positions are
//! captured by value; advancing the lexer never mutates a position
//! that has already been handed out.

/// A single point in the source text.
///
/// `line` and `column` are 0-based internally; diagnostics render
/// them 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// Character index into the source.
    pub index: u32,
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(index: u32, line: u32, column: u32) -> Position {
        Position {
            index,
            line,
            column,
        }
    }

    /// Advance past `ch`, tracking line breaks.
    pub fn advance(&mut self, ch: char) {
        self.index += 1;
        self.column += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 0;
        }
    }
}

/// A half-open source range from `start` to `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    pub fn new(start: Position, end: Position) -> Span {
        Span { start, end }
    }

    /// Span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start,
            end: other.end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_tracks_lines_and_columns() {
        let mut pos = Position::default();
        for ch in "ab\nc".chars() {
            pos.advance(ch);
        }
        assert_eq!(pos.index, 4);
        assert_eq!(pos.line, 1);
        assert_eq!(pos.column, 1);
    }

    #[test]
    fn captured_positions_are_unaffected_by_later_advances() {
        let mut pos = Position::default();
        pos.advance('x');
        let captured = pos;
        pos.advance('\n');
        pos.advance('y');
        assert_eq!(captured.index, 1);
        assert_eq!(captured.line, 0);
    }
}
