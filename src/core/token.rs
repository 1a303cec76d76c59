// src/core/token.rs
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Leaves
    Identifier(String),
    Number(String),
    StringLiteral(String),

    // Operator glyph, possibly suffixed (`⊕_q`) or ASCII (`->`, `!`)
    Glyph(String),
    // Fully qualified canonical key (`logic:⊕`)
    CanonicalKey(String),

    // Delimiters
    OpenParen,  // (
    CloseParen, // )
    Comma,      // ,
    Sequence,   // =>

    // Special
    EOF,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character in the (normalized) source.
    pub offset: usize,
    /// Source text covered by the token.
    pub lexeme: String,
}

impl Token {
    pub fn new(kind: TokenKind, offset: usize, lexeme: String) -> Self {
        Self { kind, offset, lexeme }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TokenKind::Identifier(_) => "identifier",
            TokenKind::Number(_) => "number",
            TokenKind::StringLiteral(_) => "string",
            TokenKind::Glyph(_) => "operator glyph",
            TokenKind::CanonicalKey(_) => "canonical operator key",
            TokenKind::OpenParen => "(",
            TokenKind::CloseParen => ")",
            TokenKind::Comma => ",",
            TokenKind::Sequence => "=>",
            TokenKind::EOF => "end of input",
        };
        write!(f, "{}", name)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            TokenKind::Identifier(name) => write!(f, "Identifier('{}') @{}", name, self.offset),
            TokenKind::Number(n) => write!(f, "Number({}) @{}", n, self.offset),
            TokenKind::StringLiteral(s) => write!(f, "String(\"{}\") @{}", s, self.offset),
            TokenKind::Glyph(g) => write!(f, "Glyph('{}') @{}", g, self.offset),
            TokenKind::CanonicalKey(k) => write!(f, "Key('{}') @{}", k, self.offset),
            other => write!(f, "{} @{}", other, self.offset),
        }
    }
}
