//! Source location tracking

use std::fmt;

/// A span in source text (byte offsets plus line/column for diagnostics)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub col: u32,
}

impl Span {
    pub fn new(start: usize, end: usize, line: u32, col: u32) -> Self {
        Span {
            start,
            end,
            line,
            col,
        }
    }

    /// Create a synthetic span (for generated nodes)
    pub fn synthetic() -> Self {
        Span::default()
    }

    /// Merge two spans into one covering both
    pub fn merge(&self, other: &Span) -> Span {
        let first = if (self.line, self.col) <= (other.line, other.col) {
            self
        } else {
            other
        };
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: first.line,
            col: first.col,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}
