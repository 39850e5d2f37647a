//! Syntax errors.

use crate::span::{offset_to_line_col, Span};
use thiserror::Error;

/// Error during lexing/parsing.
///
/// The position is carried as a byte span; [`ParseError::format_with_source`]
/// renders it as `line:col` with a caret under the offending text.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("syntax error at byte {}: {message}", span.start)]
pub struct ParseError {
    /// The error message.
    pub message: String,
    /// Source span where the error occurred.
    pub span: Span,
    /// Optional hint for fixing the error.
    pub hint: Option<String>,
}

impl ParseError {
    /// Create a new parse error.
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            hint: None,
        }
    }

    /// Add a hint to the error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Format the error with source context.
    pub fn format_with_source(&self, source: &str) -> String {
        let (line, col) = offset_to_line_col(source, self.span.start);
        let mut result = format!("error: {}\n", self.message);
        result.push_str(&format!("  --> line {}:{}\n", line, col));

        if let Some(source_line) = source.lines().nth(line - 1) {
            result.push_str(&format!("   |\n{:3}| {}\n   |", line, source_line));

            for _ in 0..col {
                result.push(' ');
            }
            result.push('^');

            let span_len = self.span.end.saturating_sub(self.span.start);
            let room = source_line.len().saturating_sub(col) + 1;
            for _ in 1..span_len.min(room) {
                result.push('~');
            }
            result.push('\n');
        }

        if let Some(hint) = &self.hint {
            result.push_str(&format!("   = hint: {}\n", hint));
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_formatting() {
        let source = "Blog(1) Blog.entry_set(headline=)";
        let err = ParseError::new("expected a value, found ')'", Span::new(32, 33))
            .with_hint("quote string values, e.g. headline='x'");

        let formatted = err.format_with_source(source);
        assert!(formatted.contains("line 1:33"));
        assert!(formatted.contains("expected a value"));
        assert!(formatted.contains("hint: quote string values"));
    }

    #[test]
    fn test_display_names_position() {
        let err = ParseError::new("unexpected end of input", Span::new(7, 7));
        assert_eq!(err.to_string(), "syntax error at byte 7: unexpected end of input");
    }
}
