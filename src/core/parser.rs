//! Recursive-descent parser for CodexLang expressions and `⟦ … ⟧` templates.
//!
//! Grammar:
//!
//! ```text
//! program := ε | expr ( "=>" expr )*
//! expr    := unary ( INFIX unary )*          left-assoc, one precedence level
//! unary   := ("¬" | "!") unary | term
//! term    := OPNAME "(" [ expr ("," expr)* ] ")"
//!          | "(" expr ")"
//!          | IDENT | NUMBER | STRING | GLYPH | KEY
//! ```

use serde::Serialize;
use unicode_normalization::UnicodeNormalization;

use crate::core::ast::{Node, MAX_DEPTH};
use crate::core::error::{ParseError, ParseErrorKind};
use crate::core::lexer::{is_infix_glyph, is_negation_glyph, Lexer};
use crate::core::token::{Token, TokenKind};

/// A parsed node and its height (a literal has height 1).
type Parsed = (Node, usize);

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    source: &'a str,
    depth: usize,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    /// `source` must be the normalized text the tokens were produced from.
    pub fn new(mut tokens: Vec<Token>, source: &'a str) -> Self {
        let needs_eof = match tokens.last() {
            Some(t) => t.kind != TokenKind::EOF,
            None => true,
        };
        if needs_eof {
            tokens.push(Token::new(TokenKind::EOF, source.len(), String::new()));
        }
        Parser { tokens, pos: 0, source, depth: 0, max_depth: MAX_DEPTH }
    }

    /// Bound both the tree height and the parser's own nesting (prefix
    /// operators and parentheses). Exceeding it is a `NestingTooDeep` error.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    /// Parse a whole program. A single expression comes back bare; two or
    /// more `=>`-separated expressions come back as a [`Node::Program`]; empty
    /// input is an empty program.
    pub fn parse(&mut self) -> Result<Node, ParseError> {
        if self.is_at_end() {
            return Ok(Node::program(Vec::new()));
        }
        let (first, mut height) = self.parse_expression()?;
        let mut items = vec![first];
        while self.match_token(&TokenKind::Sequence) {
            if self.is_at_end() {
                let prev = self.previous();
                return Err(ParseError::new(ParseErrorKind::UnexpectedEnd, "=>", prev.offset));
            }
            let (item, h) = self.parse_expression()?;
            height = height.max(h);
            items.push(item);
        }
        if !self.is_at_end() {
            return Err(self.unexpected(self.peek()));
        }
        if items.len() == 1 {
            Ok(items.remove(0))
        } else {
            self.grow(height, self.peek())?;
            Ok(Node::program(items))
        }
    }

    fn parse_expression(&mut self) -> Result<Parsed, ParseError> {
        let (mut left, mut height) = self.parse_unary()?;
        while let Some(op) = self.infix_operator() {
            let tok = self.advance();
            let (right, rh) = self.parse_unary()?;
            height = self.grow(height.max(rh), &tok)?;
            left = Node::binary(op, left, right);
        }
        Ok((left, height))
    }

    fn infix_operator(&self) -> Option<String> {
        match &self.peek().kind {
            TokenKind::Glyph(g) if is_infix_glyph(g) => Some(g.clone()),
            _ => None,
        }
    }

    fn parse_unary(&mut self) -> Result<Parsed, ParseError> {
        if self.depth >= self.max_depth {
            return Err(self.too_deep(self.peek()));
        }
        self.depth += 1;
        let out = self.parse_prefix();
        self.depth -= 1;
        out
    }

    fn parse_prefix(&mut self) -> Result<Parsed, ParseError> {
        if let TokenKind::Glyph(g) = &self.peek().kind {
            // `¬(a, b)` is an application, `¬(a)` reads the same either way
            if is_negation_glyph(g) && !self.next_is(&TokenKind::OpenParen) {
                let op = g.clone();
                let tok = self.advance();
                let (operand, h) = self.parse_unary()?;
                let height = self.grow(h, &tok)?;
                return Ok((Node::unary(op, operand), height));
            }
        }
        self.parse_term()
    }

    fn parse_term(&mut self) -> Result<Parsed, ParseError> {
        let tok = self.advance();
        match tok.kind {
            TokenKind::Identifier(name) | TokenKind::CanonicalKey(name) | TokenKind::Glyph(name)
                if self.check(&TokenKind::OpenParen) =>
            {
                self.parse_application(name)
            }
            TokenKind::Identifier(v)
            | TokenKind::Number(v)
            | TokenKind::StringLiteral(v)
            | TokenKind::CanonicalKey(v) => Ok((Node::lit(v), 1)),
            TokenKind::Glyph(g) if is_infix_glyph(&g) || is_negation_glyph(&g) => Err(
                ParseError::new(ParseErrorKind::UnexpectedToken, g, tok.offset),
            ),
            TokenKind::Glyph(g) => Ok((Node::lit(g), 1)),
            TokenKind::OpenParen => {
                let inner = self.parse_expression()?;
                if self.match_token(&TokenKind::CloseParen) {
                    Ok(inner)
                } else if self.is_at_end() {
                    Err(self.unbalanced_from(tok.offset))
                } else {
                    Err(self.unexpected(self.peek()))
                }
            }
            TokenKind::CloseParen => Err(ParseError::new(ParseErrorKind::UnbalancedParen, ")", tok.offset)),
            TokenKind::EOF => Err(ParseError::new(
                ParseErrorKind::UnexpectedEnd,
                self.previous().lexeme.clone(),
                tok.offset,
            )),
            TokenKind::Comma | TokenKind::Sequence => Err(ParseError::new(
                ParseErrorKind::UnexpectedToken,
                tok.lexeme.clone(),
                tok.offset,
            )),
        }
    }

    fn parse_application(&mut self, op: String) -> Result<Parsed, ParseError> {
        let open = self.advance(); // '('
        let mut args = Vec::new();
        let mut height = 0;
        if !self.check(&TokenKind::CloseParen) {
            loop {
                if self.is_at_end() {
                    return Err(self.unbalanced_from(open.offset));
                }
                let (arg, h) = self.parse_expression()?;
                height = height.max(h);
                args.push(arg);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        if self.match_token(&TokenKind::CloseParen) {
            let height = self.grow(height, &open)?;
            Ok((Node::op(op, args), height))
        } else if self.is_at_end() {
            Err(self.unbalanced_from(open.offset))
        } else {
            Err(self.unexpected(self.peek()))
        }
    }

    // ---- helpers ----

    /// Height of a node whose tallest child is `child_height`.
    fn grow(&self, child_height: usize, at: &Token) -> Result<usize, ParseError> {
        let height = child_height + 1;
        if height > self.max_depth {
            Err(self.too_deep(at))
        } else {
            Ok(height)
        }
    }

    fn too_deep(&self, at: &Token) -> ParseError {
        ParseError::new(ParseErrorKind::NestingTooDeep, at.lexeme.clone(), at.offset)
    }

    fn unexpected(&self, tok: &Token) -> ParseError {
        let kind = match tok.kind {
            TokenKind::CloseParen => ParseErrorKind::UnbalancedParen,
            TokenKind::EOF => ParseErrorKind::UnexpectedEnd,
            _ => ParseErrorKind::UnexpectedToken,
        };
        ParseError::new(kind, tok.lexeme.clone(), tok.offset)
    }

    fn unbalanced_from(&self, offset: usize) -> ParseError {
        ParseError::new(ParseErrorKind::UnbalancedParen, self.tail_from(offset), offset)
    }

    fn tail_from(&self, offset: usize) -> String {
        self.source.get(offset..).unwrap_or_default().trim_end().to_string()
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn next_is(&self, kind: &TokenKind) -> bool {
        self.tokens
            .get(self.pos + 1)
            .is_some_and(|t| std::mem::discriminant(&t.kind) == std::mem::discriminant(kind))
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if !self.is_at_end() {
            self.pos += 1;
        }
        tok
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::EOF
    }

    fn peek(&self) -> &Token {
        // Parser::new guarantees a trailing EOF
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.pos.saturating_sub(1)]
    }
}

/// Lex and parse a CodexLang expression or program.
pub fn parse_source(input: &str) -> Result<Node, ParseError> {
    parse_source_with_depth(input, MAX_DEPTH)
}

pub fn parse_source_with_depth(input: &str, max_depth: usize) -> Result<Node, ParseError> {
    let mut lexer = Lexer::new(input);
    let tokens = lexer.tokenize()?;
    Parser::new(tokens, lexer.source()).with_max_depth(max_depth).parse()
}

/// A decoded `⟦ Type | Tag : Value -> Action ⟧` template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlyphTemplate {
    pub glyph_type: String,
    pub tag: String,
    pub value: String,
    pub action: Node,
}

impl GlyphTemplate {
    /// Resolver context derived from the template's type.
    pub fn context(&self) -> String {
        self.glyph_type.to_lowercase()
    }
}

/// Parse a glyph template. The first top-level `->` or `→` after the tag
/// separates the value from the action; without one, the whole tail is the
/// action and the value is empty.
pub fn parse_template(input: &str) -> Result<GlyphTemplate, ParseError> {
    parse_template_with_depth(input, MAX_DEPTH)
}

fn parse_template_with_depth(input: &str, max_depth: usize) -> Result<GlyphTemplate, ParseError> {
    let src: String = input.nfc().collect();
    let lead = src.len() - src.trim_start().len();
    let trimmed = src.trim();
    let malformed = |fragment: &str, offset: usize| {
        ParseError::new(ParseErrorKind::MalformedTemplate, fragment, offset)
    };

    let body = trimmed
        .strip_prefix('⟦')
        .ok_or_else(|| malformed(trimmed, lead))?;
    let body = body.strip_suffix('⟧').ok_or_else(|| malformed(trimmed, lead))?;
    let body_start = lead + '⟦'.len_utf8();
    if let Some(i) = body.find(['⟦', '⟧']) {
        return Err(malformed(&body[i..], body_start + i));
    }

    let bar = body.find('|').ok_or_else(|| malformed(body, body_start))?;
    let glyph_type = body[..bar].trim();
    if glyph_type.is_empty() {
        return Err(malformed(body, body_start));
    }
    let rest_start = bar + 1;
    let colon = body[rest_start..]
        .find(':')
        .ok_or_else(|| malformed(&body[rest_start..], body_start + rest_start))?;
    let tag = body[rest_start..rest_start + colon].trim();
    if tag.is_empty() {
        return Err(malformed(&body[rest_start..], body_start + rest_start));
    }

    let tail_start = rest_start + colon + 1;
    let tail = &body[tail_start..];
    let (value, action_start) = match find_top_level_arrow(tail) {
        Some((i, len)) => (tail[..i].trim(), tail_start + i + len),
        None => ("", tail_start),
    };
    let action_src = &body[action_start..];
    if action_src.trim().is_empty() {
        return Err(malformed(tail, body_start + tail_start));
    }
    let action = parse_source_with_depth(action_src, max_depth).map_err(|mut e| {
        e.offset += body_start + action_start;
        e
    })?;

    Ok(GlyphTemplate {
        glyph_type: glyph_type.to_string(),
        tag: tag.to_string(),
        value: value.to_string(),
        action,
    })
}

fn find_top_level_arrow(s: &str) -> Option<(usize, usize)> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut iter = s.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        match c {
            '"' => in_string = !in_string,
            _ if in_string => {}
            '(' => depth += 1,
            ')' => depth -= 1,
            '→' if depth == 0 => return Some((i, c.len_utf8())),
            '-' if depth == 0 && iter.peek().map(|&(_, n)| n) == Some('>') => return Some((i, 2)),
            _ => {}
        }
    }
    None
}

/// Result of [`parse_document`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub tree: Node,
    /// Resolver context hint: an explicit mode wins over a template's type.
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<GlyphTemplate>,
}

/// Parse either a template or a plain expression/program.
pub fn parse_document(input: &str, mode: Option<&str>) -> Result<Document, ParseError> {
    parse_document_with_depth(input, mode, MAX_DEPTH)
}

pub fn parse_document_with_depth(input: &str, mode: Option<&str>, max_depth: usize) -> Result<Document, ParseError> {
    let explicit = mode.map(str::trim).filter(|m| !m.is_empty()).map(str::to_lowercase);
    let looks_like_template = input.trim_start().starts_with('⟦') || input.trim_end().ends_with('⟧');
    if looks_like_template {
        let template = parse_template_with_depth(input, max_depth)?;
        Ok(Document {
            tree: template.action.clone(),
            mode: explicit.or_else(|| Some(template.context())),
            template: Some(template),
        })
    } else {
        Ok(Document { tree: parse_source_with_depth(input, max_depth)?, mode: explicit, template: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(s: &str) -> Node {
        Node::lit(s)
    }

    #[test]
    fn infix_is_left_associative() {
        let n = parse_source("A ⊕ B → C").unwrap();
        assert_eq!(
            n,
            Node::binary("→", Node::binary("⊕", lit("A"), lit("B")), lit("C"))
        );
    }

    #[test]
    fn application_and_grouping() {
        let n = parse_source("⊗(A, (B ∨ C))").unwrap();
        assert_eq!(
            n,
            Node::op("⊗", vec![lit("A"), Node::binary("∨", lit("B"), lit("C"))])
        );
    }

    #[test]
    fn prefix_negation_nests() {
        let n = parse_source("¬¬A").unwrap();
        assert_eq!(n, Node::unary("¬", Node::unary("¬", lit("A"))));
        let n = parse_source("!A").unwrap();
        assert_eq!(n, Node::unary("!", lit("A")));
    }

    #[test]
    fn sequence_builds_program() {
        let n = parse_source("A => B ⊕ C").unwrap();
        assert_eq!(
            n,
            Node::program(vec![lit("A"), Node::binary("⊕", lit("B"), lit("C"))])
        );
    }

    #[test]
    fn empty_input_is_empty_program() {
        assert!(parse_source("   ").unwrap().is_empty_program());
    }

    #[test]
    fn unbalanced_paren_has_fragment_and_offset() {
        let err = parse_source("A ⊕ (B ∧ C").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnbalancedParen);
        assert_eq!(err.offset, "A ⊕ ".len());
        assert_eq!(err.fragment, "(B ∧ C");

        let err = parse_source("A)").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnbalancedParen);
        assert_eq!(err.offset, 1);
    }

    #[test]
    fn dangling_operator_is_rejected() {
        let err = parse_source("A ⊕").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedEnd);
        let err = parse_source("⊕ ⊕ A").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedToken);
        let err = parse_source("A =>").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedEnd);
    }

    #[test]
    fn juxtaposed_terms_are_rejected() {
        let err = parse_source("A B").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedToken);
        assert_eq!(err.fragment, "B");
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash() {
        let err = parse_source(&format!("{}A", "¬".repeat(100_000))).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::NestingTooDeep);
        assert_eq!(err.fragment, "¬");

        let src = format!("{}A{}", "(".repeat(100_000), ")".repeat(100_000));
        assert_eq!(parse_source(&src).unwrap_err().kind, ParseErrorKind::NestingTooDeep);

        let src = format!("{}A{}", "f(".repeat(100_000), ")".repeat(100_000));
        assert_eq!(parse_source(&src).unwrap_err().kind, ParseErrorKind::NestingTooDeep);

        // a flat infix chain still builds a left-deep tree
        let src = vec!["A"; 100_000].join(" ⊕ ");
        assert_eq!(parse_source(&src).unwrap_err().kind, ParseErrorKind::NestingTooDeep);
    }

    #[test]
    fn depth_limit_is_exact() {
        let src = format!("{}A", "¬".repeat(3));
        let tokens = |s: &str| Lexer::new(s).tokenize().unwrap();
        assert!(Parser::new(tokens(&src), &src).with_max_depth(4).parse().is_ok());
        let err = Parser::new(tokens(&src), &src).with_max_depth(3).parse().unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::NestingTooDeep);

        // parentheses alone add no height but still count as nesting
        let src = "((A))";
        assert!(Parser::new(tokens(src), src).with_max_depth(3).parse().is_ok());
        assert!(Parser::new(tokens(src), src).with_max_depth(2).parse().is_err());

        let src = "A ⊕ B ⊕ C";
        assert!(Parser::new(tokens(src), src).with_max_depth(3).parse().is_ok());
        assert!(Parser::new(tokens(src), src).with_max_depth(2).parse().is_err());

        assert!(parse_source_with_depth("x => y", 1).is_err());
        assert!(parse_source_with_depth("x => y", 2).is_ok());
    }

    #[test]
    fn template_with_arrow() {
        let t = parse_template("⟦ Logic | Gate : A -> ⊕(A, B) ⟧").unwrap();
        assert_eq!(t.glyph_type, "Logic");
        assert_eq!(t.tag, "Gate");
        assert_eq!(t.value, "A");
        assert_eq!(t.action, Node::op("⊕", vec![lit("A"), lit("B")]));
        assert_eq!(t.context(), "logic");
    }

    #[test]
    fn template_shorthand() {
        let t = parse_template("⟦Photon|Beam: ⊕(A, B)⟧").unwrap();
        assert_eq!(t.value, "");
        assert_eq!(t.action, Node::op("⊕", vec![lit("A"), lit("B")]));
    }

    #[test]
    fn malformed_templates() {
        assert_eq!(
            parse_template("⟦ Logic Gate : A ⟧").unwrap_err().kind,
            ParseErrorKind::MalformedTemplate
        );
        assert_eq!(
            parse_template("⟦ Logic | Gate : A").unwrap_err().kind,
            ParseErrorKind::MalformedTemplate
        );
        assert_eq!(
            parse_template("⟦ Logic | Gate : A -> ⟧").unwrap_err().kind,
            ParseErrorKind::MalformedTemplate
        );
    }

    #[test]
    fn document_mode_precedence() {
        let d = parse_document("⟦ Quantum | Q : ⊕(A, B) ⟧", None).unwrap();
        assert_eq!(d.mode.as_deref(), Some("quantum"));
        let d = parse_document("⟦ Quantum | Q : ⊕(A, B) ⟧", Some("Photon")).unwrap();
        assert_eq!(d.mode.as_deref(), Some("photon"));
        let d = parse_document("A ⊕ B", None).unwrap();
        assert_eq!(d.mode, None);
    }

    #[test]
    fn emitted_source_reparses_to_same_tree() {
        for src in [
            "A ⊕ B → C",
            "¬¬A => ⊗_p(x, \"two words\", 3.5)",
            "logic:⊕(A, quantum:↔(B, C)) => ⊥",
            "!(A ∧ ⊥)",
            "f()",
        ] {
            let tree = parse_source(src).unwrap();
            let again = parse_source(&tree.to_codexlang()).unwrap();
            assert_eq!(tree, again, "round trip of {src}");
        }
    }
}
