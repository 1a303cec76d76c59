// src/core/diagnostics.rs
//! Colored caret diagnostics for parse errors.

use colored::Colorize;

use crate::core::error::ParseError;

pub struct Span {
    pub line: usize,
    pub col: usize,
    pub len: usize, // underline length (use 1 if unknown)
}

impl Span {
    /// Span of `err` within `source` (the NFC-normalized text the offset
    /// refers to). Columns count characters, not bytes.
    pub fn of_parse_error(source: &str, err: &ParseError) -> Self {
        let offset = floor_char_boundary(source, err.offset.min(source.len()));
        let before = &source[..offset];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let col = source[line_start..offset].chars().count() + 1;
        Self { line, col, len: err.fragment.chars().count().max(1) }
    }
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Render the diagnostic as plain lines (no trailing newline).
pub fn render(filename: &str, source: &str, title: &str, span: &Span) -> String {
    let ln_str = format!("{:>4}", span.line);
    let line_text = nth_line(source, span.line).unwrap_or_default();
    let underline = " ".repeat(span.col.saturating_sub(1)) + &"^".repeat(span.len.max(1));
    [
        format!("{} {}", "error:".bright_red().bold(), title.bright_white()),
        format!(
            "{} {}",
            "-->".bright_blue(),
            format!("{}:{}:{}", filename, span.line, span.col).bright_white()
        ),
        format!(" {} {}", " ".repeat(ln_str.len()).dimmed(), "|".dimmed()),
        format!("{} {} {}", ln_str.dimmed(), "|".dimmed(), line_text),
        format!(" {} {} {}", " ".repeat(ln_str.len()).dimmed(), "|".dimmed(), underline.bright_red()),
    ]
    .join("\n")
}

pub fn print_error(filename: &str, source: &str, title: &str, span: Span) {
    eprintln!("{}", render(filename, source, title, &span));
    eprintln!();
}

fn nth_line(src: &str, n: usize) -> Option<String> {
    src.lines().nth(n.saturating_sub(1)).map(|s| s.to_string())
}
