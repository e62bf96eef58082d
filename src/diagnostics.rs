//! Diagnostic reporting shared by every pass (lexer, parser, checker).
//!
//! There is no `log`/`tracing` dependency here — diagnostics are data, not
//! side-effecting log lines, collected into a sink and rendered once the
//! pass that produced them is done (spec §7.2). Runtime errors are handled
//! separately, by `vm::RuntimeError` (spec §7.4), since they terminate
//! execution rather than accumulate.

use std::fmt;

use crate::token::FileId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// One reported problem: a message anchored at a source position, plus the
/// source line it occurred on so it can be rendered with a caret.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub file: FileId,
    pub line: u32,
    pub column: u32,
    pub source_line: String,
}

impl Diagnostic {
    pub fn error(file: FileId, line: u32, column: u32, source_line: impl Into<String>, message: impl Into<String>) -> Self {
        Self { severity: Severity::Error, message: message.into(), file, line, column, source_line: source_line.into() }
    }

    pub fn warning(file: FileId, line: u32, column: u32, source_line: impl Into<String>, message: impl Into<String>) -> Self {
        Self { severity: Severity::Warning, message: message.into(), file, line, column, source_line: source_line.into() }
    }
}

impl fmt::Display for Diagnostic {
    /// Renders as:
    /// ```text
    /// error: message (file.qz:3:5)
    ///   var x = 1 +;
    ///       ^
    /// ```
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {} ({}:{}:{})", self.severity, self.message, self.file, self.line, self.column)?;
        writeln!(f, "  {}", self.source_line)?;
        let caret_pos = self.column.saturating_sub(1) as usize;
        write!(f, "  {}^", " ".repeat(caret_pos))
    }
}

/// Accumulates diagnostics across a whole pass. Lexical/syntactic/semantic
/// errors all pile up here rather than aborting at the first one (spec
/// §7.1–§7.3); the driver decides whether any `Severity::Error` entry should
/// stop the pipeline before the next pass runs.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_tracks_whether_any_entry_is_an_error() {
        let mut sink = DiagnosticSink::new();
        assert!(!sink.has_errors());
        sink.push(Diagnostic::warning(FileId::new("a.qz"), 1, 1, "x", "unused variable"));
        assert!(!sink.has_errors());
        sink.push(Diagnostic::error(FileId::new("a.qz"), 2, 1, "y", "type mismatch"));
        assert!(sink.has_errors());
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn display_places_caret_under_the_reported_column() {
        let diag = Diagnostic::error(FileId::new("a.qz"), 3, 5, "var x = 1 +;", "expected expression");
        let rendered = diag.to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[1], "  var x = 1 +;");
        assert_eq!(lines[2], "      ^");
    }
}
