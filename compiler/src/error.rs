//! Located compile-time diagnostics shared by the parser and the type checker.

use std::fmt::{self, Write};

use thiserror::Error;

use crate::lexer::Span;


#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct Diagnostic {
    pub message: String,
    pub span: Option<Span>,
    pub file_name: Option<String>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Diagnostic {
        Diagnostic { message: message.into(), span: None, file_name: None }
    }

    pub fn at(span: Span, message: impl Into<String>) -> Diagnostic {
        Diagnostic { message: message.into(), span: Some(span), file_name: None }
    }

    pub fn in_file(mut self, file_name: Option<&str>) -> Diagnostic {
        self.file_name = file_name.map(str::to_string);
        self
    }

    /// Renders the message together with the offending line of `source` and a
    /// caret underline of the span.
    pub fn render(&self, source: &str) -> String {
        let mut out = self.to_string();
        let span = match self.span {
            Some(span) => span,
            None => return out,
        };
        let line_no = span.start.line();
        let line = match source.lines().nth(line_no.saturating_sub(1) as usize) {
            Some(line) => line,
            None => return out,
        };
        let col = span.start.column().max(1);
        let width = if span.end.line() == line_no && span.end.column() > col {
            span.end.column() - col
        } else {
            1
        };
        let gutter = line_no.to_string();
        let _ = write!(out, "\n{} | {}", gutter, line);
        let _ = write!(
            out,
            "\n{} | {}{}",
            " ".repeat(gutter.len()),
            " ".repeat(col as usize - 1),
            "^".repeat(width as usize));
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[error] {}", self.message)?;
        match (&self.file_name, &self.span) {
            (Some(file), Some(span)) => write!(f, "\n  --> {}:{}", file, span),
            (Some(file), None) => write!(f, "\n  --> {}", file),
            _ => Ok(()),
        }
    }
}
