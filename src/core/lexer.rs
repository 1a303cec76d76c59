// lexer.rs

use unicode_ident::{is_xid_continue, is_xid_start};
use unicode_normalization::UnicodeNormalization;

use crate::core::error::{ParseError, ParseErrorKind};
use crate::core::token::{Token, TokenKind};

/// Glyphs that may appear between two operands. Suffixed forms (`⊕_q`) are
/// infix too.
pub const INFIX_GLYPHS: &[&str] = &["→", "⊕", "⊗", "↔", "⊖", "∧", "∨", "->"];

/// Prefix negation glyphs.
pub const NEGATION_GLYPHS: &[&str] = &["¬", "!"];

/// Characters only meaningful inside a `⟦ … ⟧` template.
const TEMPLATE_ONLY: &[char] = &['⟦', '⟧', '|', ':'];

/// Base symbol of a glyph without its `_suffix`.
pub fn glyph_base(glyph: &str) -> &str {
    match glyph.find('_') {
        Some(i) if i > 0 => &glyph[..i],
        _ => glyph,
    }
}

pub fn is_infix_glyph(glyph: &str) -> bool {
    INFIX_GLYPHS.contains(&glyph_base(glyph))
}

pub fn is_negation_glyph(glyph: &str) -> bool {
    NEGATION_GLYPHS.contains(&glyph)
}

/// True when `value` reads back as a single literal token with no quoting.
pub fn is_bare_literal(value: &str) -> bool {
    let Ok(tokens) = tokenize(value) else { return false };
    match tokens.as_slice() {
        [tok, eof] if eof.kind == TokenKind::EOF && tok.lexeme == value => match &tok.kind {
            TokenKind::Identifier(_) | TokenKind::Number(_) | TokenKind::CanonicalKey(_) => true,
            TokenKind::Glyph(g) => !is_infix_glyph(g) && !is_negation_glyph(g),
            _ => false,
        },
        _ => false,
    }
}

/// Tokenize a whole source string.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(input).tokenize()
}

/// CodexLang lexer. Works on the NFC-normalized form of its input; every
/// offset it reports is a byte offset into [`Lexer::source`].
pub struct Lexer {
    normalized: String,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let normalized: String = input.nfc().collect();
        let chars = normalized.char_indices().collect();
        Self { normalized, chars, pos: 0 }
    }

    pub fn source(&self) -> &str {
        &self.normalized
    }

    #[inline]
    fn current(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    #[inline]
    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).map(|&(_, c)| c)
    }

    #[inline]
    fn offset(&self) -> usize {
        self.chars.get(self.pos).map(|&(o, _)| o).unwrap_or(self.normalized.len())
    }

    fn slice_from(&self, start: usize) -> String {
        self.normalized[start..self.offset()].to_string()
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, ParseError> {
        let mut out = Vec::new();
        loop {
            let tok = self.next_token()?;
            let done = tok.kind == TokenKind::EOF;
            out.push(tok);
            if done {
                return Ok(out);
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, ParseError> {
        while matches!(self.current(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
        let start = self.offset();
        let Some(ch) = self.current() else {
            return Ok(Token::new(TokenKind::EOF, start, String::new()));
        };

        let kind = match ch {
            '(' => {
                self.pos += 1;
                TokenKind::OpenParen
            }
            ')' => {
                self.pos += 1;
                TokenKind::CloseParen
            }
            ',' => {
                self.pos += 1;
                TokenKind::Comma
            }
            '=' if self.peek(1) == Some('>') => {
                self.pos += 2;
                TokenKind::Sequence
            }
            '-' if self.peek(1) == Some('>') => {
                self.pos += 2;
                TokenKind::Glyph("->".to_string())
            }
            '-' if self.peek(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.pos += 1;
                self.lex_number(start)
            }
            '"' => self.lex_string(start)?,
            c if c.is_ascii_digit() => self.lex_number(start),
            c if is_xid_start(c) || c == '_' => self.lex_identifier(start)?,
            c if TEMPLATE_ONLY.contains(&c) => {
                return Err(ParseError::new(ParseErrorKind::UnexpectedCharacter, c.to_string(), start));
            }
            _ => self.lex_glyph(),
        };
        Ok(Token::new(kind, start, self.slice_from(start)))
    }

    fn lex_number(&mut self, start: usize) -> TokenKind {
        while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.current() == Some('.') && self.peek(1).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
            while matches!(self.current(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        TokenKind::Number(self.slice_from(start))
    }

    fn lex_string(&mut self, start: usize) -> Result<TokenKind, ParseError> {
        self.pos += 1; // opening quote
        let mut value = String::new();
        loop {
            match self.current() {
                None => {
                    return Err(ParseError::new(
                        ParseErrorKind::UnterminatedString,
                        self.slice_from(start),
                        start,
                    ))
                }
                Some('"') => {
                    self.pos += 1;
                    return Ok(TokenKind::StringLiteral(value));
                }
                Some('\\') => {
                    let escaped = match self.peek(1) {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some(other) => other,
                        None => {
                            return Err(ParseError::new(
                                ParseErrorKind::UnterminatedString,
                                self.slice_from(start),
                                start,
                            ))
                        }
                    };
                    value.push(escaped);
                    self.pos += 2;
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn lex_identifier(&mut self, start: usize) -> Result<TokenKind, ParseError> {
        while matches!(self.current(), Some(c) if is_xid_continue(c)) {
            self.pos += 1;
        }
        let ident = self.slice_from(start);
        if self.current() != Some(':') {
            return Ok(TokenKind::Identifier(ident));
        }

        // `domain:symbol`
        let is_domain = ident.chars().all(|c| c.is_ascii_lowercase() || c == '_');
        let symbol_follows = self.peek(1).is_some_and(is_key_symbol_char);
        if !is_domain || !symbol_follows {
            return Err(ParseError::new(
                ParseErrorKind::UnexpectedCharacter,
                format!("{}:", ident),
                self.offset(),
            ));
        }
        self.pos += 1;
        while matches!(self.current(), Some(c) if is_key_symbol_char(c)) {
            self.pos += 1;
        }
        Ok(TokenKind::CanonicalKey(self.slice_from(start)))
    }

    fn lex_glyph(&mut self) -> TokenKind {
        let start = self.offset();
        self.pos += 1;
        if self.current() == Some('_') && self.peek(1).is_some_and(|c| c.is_ascii_alphanumeric()) {
            self.pos += 1;
            while matches!(self.current(), Some(c) if c.is_ascii_alphanumeric()) {
                self.pos += 1;
            }
        }
        TokenKind::Glyph(self.slice_from(start))
    }
}

fn is_key_symbol_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '(' | ')' | ',' | '"' | ':')
}
