//! Source positions shared by tokens, declarations and diagnostics.

use std::fmt;

/// A 1-based line/column position inside a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub const START: Location = Location { line: 1, column: 1 };

    pub const fn new(line: u32, column: u32) -> Self {
        Location { line, column }
    }
}

impl Default for Location {
    fn default() -> Self {
        Location::START
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Byte range of a token together with the location of its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
    pub location: Location,
}

impl Span {
    pub const fn new(start: u32, end: u32, location: Location) -> Self {
        Span {
            start,
            end,
            location,
        }
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}
