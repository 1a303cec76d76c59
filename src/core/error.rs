use thiserror::Error;

/// What went wrong while reading CodexLang source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    UnexpectedCharacter,
    UnterminatedString,
    UnbalancedParen,
    UnexpectedToken,
    UnexpectedEnd,
    MalformedTemplate,
    NestingTooDeep,
}

impl std::fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParseErrorKind::UnexpectedCharacter => "unexpected character",
            ParseErrorKind::UnterminatedString => "unterminated string",
            ParseErrorKind::UnbalancedParen => "unbalanced parenthesis",
            ParseErrorKind::UnexpectedToken => "unexpected token",
            ParseErrorKind::UnexpectedEnd => "unexpected end of input",
            ParseErrorKind::MalformedTemplate => "malformed template",
            ParseErrorKind::NestingTooDeep => "nesting too deep",
        };
        f.write_str(s)
    }
}

/// Parse failure carrying the offending fragment and its byte offset in the
/// NFC-normalized source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse_error: {kind}: '{fragment}' at offset {offset}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub fragment: String,
    pub offset: usize,
}

impl ParseError {
    const MAX_FRAGMENT: usize = 32;

    pub fn new(kind: ParseErrorKind, fragment: impl Into<String>, offset: usize) -> Self {
        let fragment: String = fragment.into();
        let fragment = if fragment.chars().count() > Self::MAX_FRAGMENT {
            fragment.chars().take(Self::MAX_FRAGMENT).collect()
        } else {
            fragment
        };
        Self { kind, fragment, offset }
    }
}

/// An instruction tree handed to the executor (or read from JSON) that does
/// not have a usable shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid instruction_tree: {path}: {reason}")]
pub struct TreeError {
    pub path: String,
    pub reason: String,
}

impl TreeError {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { path: path.into(), reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_display() {
        let err = ParseError::new(ParseErrorKind::UnbalancedParen, "(A", 4);
        assert_eq!(err.to_string(), "parse_error: unbalanced parenthesis: '(A' at offset 4");
    }

    #[test]
    fn long_fragments_are_truncated() {
        let err = ParseError::new(ParseErrorKind::UnterminatedString, "x".repeat(100), 0);
        assert_eq!(err.fragment.len(), 32);
    }

    #[test]
    fn tree_error_display() {
        let err = TreeError::new("root", "missing 'op'");
        assert_eq!(err.to_string(), "invalid instruction_tree: root: missing 'op'");
    }
}
