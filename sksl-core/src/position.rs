use serde::{Deserialize, Serialize};
use std::fmt;

/// A byte-offset range into the source text. Line numbers are recovered on
/// demand by counting newlines; columns are not tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub start: u32,
    pub end: u32,
}

impl Position {
    pub fn range(start: usize, end: usize) -> Self {
        Position {
            start: start as u32,
            end: end.max(start) as u32,
        }
    }

    pub fn at(offset: usize) -> Self {
        Position::range(offset, offset)
    }

    pub fn valid(&self) -> bool {
        self.end >= self.start
    }

    /// The smallest range covering both positions.
    pub fn join(self, other: Position) -> Position {
        Position {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// 1-based line number of the start offset within `source`.
    pub fn line(&self, source: &str) -> usize {
        line_number(source, self.start as usize)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

pub fn line_number(source: &str, offset: usize) -> usize {
    let offset = offset.min(source.len());
    source.as_bytes()[..offset].iter().filter(|&&b| b == b'\n').count() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_numbers() {
        let src = "a\nbc\n\nd";
        assert_eq!(line_number(src, 0), 1);
        assert_eq!(line_number(src, 2), 2);
        assert_eq!(line_number(src, 5), 3);
        assert_eq!(line_number(src, 6), 4);
        assert_eq!(line_number(src, 100), 4);
    }

    #[test]
    fn test_join() {
        let p = Position::range(4, 6).join(Position::range(1, 3));
        assert_eq!(p, Position::range(1, 6));
    }
}
