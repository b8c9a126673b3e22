//! Diagnostics reporting.
//!
//! User-facing errors flow through an [`ErrorReporter`] instead of `Result`,
//! so that one pass over a source file can surface many independent errors.
//! [`ErrorSink`] layers checkpoint buffering on top of a reporter: errors
//! raised while a checkpoint is open are held back until the checkpoint is
//! accepted, and dropped silently if it is rewound.

use crate::position::{line_number, Position};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub position: Position,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub trait ErrorReporter {
    fn report(&mut self, message: &str, position: Position);

    fn error_count(&self) -> usize;
}

/// Collects every reported error in order.
#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

impl ErrorReporter for DiagnosticCollector {
    fn report(&mut self, message: &str, position: Position) {
        self.diagnostics.push(Diagnostic {
            message: message.to_string(),
            position,
        });
    }

    fn error_count(&self) -> usize {
        self.diagnostics.len()
    }
}

/// Front end for an [`ErrorReporter`] with nested checkpoint buffers.
pub struct ErrorSink<'a> {
    reporter: &'a mut dyn ErrorReporter,
    buffers: Vec<Vec<Diagnostic>>,
}

impl<'a> ErrorSink<'a> {
    pub fn new(reporter: &'a mut dyn ErrorReporter) -> Self {
        ErrorSink {
            reporter,
            buffers: Vec::new(),
        }
    }

    pub fn error(&mut self, position: Position, message: impl Into<String>) {
        let message = message.into();
        match self.buffers.last_mut() {
            Some(buffer) => buffer.push(Diagnostic { message, position }),
            None => self.reporter.report(&message, position),
        }
    }

    /// Errors that have reached the underlying reporter. Buffered errors are
    /// not counted until their checkpoint is accepted.
    pub fn error_count(&self) -> usize {
        self.reporter.error_count()
    }

    /// Errors visible from the innermost open buffer, including those still held back.
    pub fn pending_count(&self) -> usize {
        self.buffers.last().map_or(0, Vec::len)
    }

    pub fn begin_buffer(&mut self) {
        self.buffers.push(Vec::new());
    }

    /// Forwards the innermost buffer's errors to the enclosing buffer or reporter.
    pub fn commit_buffer(&mut self) {
        if let Some(buffer) = self.buffers.pop() {
            for diag in buffer {
                self.error(diag.position, diag.message);
            }
        }
    }

    pub fn discard_buffer(&mut self) {
        self.buffers.pop();
    }
}

/// Renders diagnostics as `error: LINE: message` lines.
pub fn format_diagnostics(source: &str, diagnostics: &[Diagnostic]) -> String {
    let mut out = String::new();
    for diag in diagnostics {
        let line = line_number(source, diag.position.start as usize);
        let _ = writeln!(out, "error: {}: {}", line, diag.message);
    }
    let _ = writeln!(
        out,
        "{} error{}",
        diagnostics.len(),
        if diagnostics.len() == 1 { "" } else { "s" }
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_errors_are_held_until_commit() {
        let mut collector = DiagnosticCollector::new();
        {
            let mut sink = ErrorSink::new(&mut collector);
            sink.begin_buffer();
            sink.error(Position::at(3), "first");
            assert_eq!(sink.error_count(), 0);
            assert_eq!(sink.pending_count(), 1);
            sink.commit_buffer();
            assert_eq!(sink.error_count(), 1);
        }
        assert_eq!(collector.diagnostics()[0].message, "first");
    }

    #[test]
    fn test_discarded_errors_never_reach_reporter() {
        let mut collector = DiagnosticCollector::new();
        {
            let mut sink = ErrorSink::new(&mut collector);
            sink.begin_buffer();
            sink.begin_buffer();
            sink.error(Position::at(0), "inner");
            sink.commit_buffer();
            sink.discard_buffer();
            sink.error(Position::at(1), "outer");
        }
        let messages: Vec<_> = collector.diagnostics().iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["outer"]);
    }

    #[test]
    fn test_format_diagnostics() {
        let src = "int x;\nfloat y = true;";
        let diags = vec![Diagnostic {
            message: "expected 'float', but found 'bool'".to_string(),
            position: Position::range(17, 21),
        }];
        assert_eq!(
            format_diagnostics(src, &diags),
            "error: 2: expected 'float', but found 'bool'\n1 error\n"
        );
    }
}
