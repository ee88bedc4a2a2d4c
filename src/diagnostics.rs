//! Diagnostics and the compiler's error taxonomy.
//!
//! Errors are represented as small hand-rolled enums with manual
//! `Display`/`Error`/`From` impls, matching the teacher's `CodeGenError`
//! shape rather than reaching for `thiserror`/`anyhow` (absent from this
//! crate's dependency table).

use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// The atomic diagnostic unit threaded through every compiler stage
/// (spec §7: "every diagnostic carries `{filename, line, column, message}`").
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub filename: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn error(filename: impl Into<String>, line: usize, column: usize, message: impl Into<String>) -> Self {
        Diagnostic {
            filename: filename.into(),
            line,
            column,
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(filename: impl Into<String>, line: usize, column: usize, message: impl Into<String>) -> Self {
        Diagnostic {
            filename: filename.into(),
            line,
            column,
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.filename,
            self.line + 1,
            self.column + 1,
            self.severity,
            self.message
        )
    }
}

/// Accumulates diagnostics across a stage and renders them in source
/// order with a trailing count summary (spec §7 propagation policy).
#[derive(Debug, Clone, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        DiagnosticSink::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    /// Diagnostics sorted in source order (by line, then column), the
    /// order in which the pipeline is required to report them.
    pub fn sorted(&self) -> Vec<&Diagnostic> {
        let mut out: Vec<&Diagnostic> = self.diagnostics.iter().collect();
        out.sort_by_key(|d| (d.line, d.column));
        out
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

impl fmt::Display for DiagnosticSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in self.sorted() {
            writeln!(f, "{}", d)?;
        }
        write!(
            f,
            "{} error{}",
            self.error_count(),
            if self.error_count() == 1 { "" } else { "s" }
        )
    }
}

/// Source read / output write failure (driver boundary, spec §7).
#[derive(Debug)]
pub enum IoError {
    Read { path: PathBuf, source: std::io::Error },
    Write { path: PathBuf, source: std::io::Error },
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Read { path, source } => write!(f, "failed to read {}: {}", path.display(), source),
            IoError::Write { path, source } => write!(f, "failed to write {}: {}", path.display(), source),
        }
    }
}

impl std::error::Error for IoError {}

/// Unterminated string, invalid numeric literal, unknown character
/// (spec §7). Wraps the accumulated diagnostics for the lex stage.
#[derive(Debug, Clone)]
pub struct LexError(pub Vec<Diagnostic>);

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.0 {
            writeln!(f, "{}", d)?;
        }
        Ok(())
    }
}

impl std::error::Error for LexError {}

impl From<crate::lexer::LexError> for LexError {
    fn from(e: crate::lexer::LexError) -> Self {
        LexError(vec![Diagnostic::error(e.filename.clone(), e.line, e.column, e.message.clone())])
    }
}

/// Unexpected token, missing expected token (spec §7).
#[derive(Debug, Clone)]
pub struct ParseError(pub Vec<Diagnostic>);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.0 {
            writeln!(f, "{}", d)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Undefined identifier, type mismatch, wrong operand kind, `await`
/// outside async, incomplete trait impl, missing `main` (spec §7).
#[derive(Debug, Clone)]
pub struct TypeError(pub Vec<Diagnostic>);

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.0 {
            writeln!(f, "{}", d)?;
        }
        Ok(())
    }
}

impl std::error::Error for TypeError {}

/// Codegen failure: unresolved enum constructor, undefined function at
/// lowering time, unsupported iteration source (spec §7). Keeps the
/// teacher's two-variant shape (`Logic`/`Format`) and adds `Unresolved`
/// for the "warn and lower to a default value" path.
#[derive(Debug)]
pub enum CodeGenError {
    Logic(String),
    Format(std::fmt::Error),
    Unresolved(String),
}

impl fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodeGenError::Logic(msg) => write!(f, "codegen error: {}", msg),
            CodeGenError::Format(e) => write!(f, "codegen format error: {}", e),
            CodeGenError::Unresolved(msg) => write!(f, "unresolved symbol: {}", msg),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<std::fmt::Error> for CodeGenError {
    fn from(e: std::fmt::Error) -> Self {
        CodeGenError::Format(e)
    }
}

/// External toolchain invocation returned non-zero (driver boundary,
/// spec §7).
#[derive(Debug)]
pub struct LinkError {
    pub command: String,
    pub status: Option<i32>,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "linker command `{}` exited with status {}", self.command, code),
            None => write!(f, "linker command `{}` terminated by signal", self.command),
        }
    }
}

impl std::error::Error for LinkError {}

/// Top-level error aggregating every stage, so `?` composes across the
/// whole pipeline the way the teacher's `lib.rs` composes `Result`s.
#[derive(Debug)]
pub enum CompileError {
    Io(IoError),
    Lex(LexError),
    Parse(ParseError),
    Type(TypeError),
    CodeGen(CodeGenError),
    Link(LinkError),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Io(e) => write!(f, "{}", e),
            CompileError::Lex(e) => write!(f, "{}", e),
            CompileError::Parse(e) => write!(f, "{}", e),
            CompileError::Type(e) => write!(f, "{}", e),
            CompileError::CodeGen(e) => write!(f, "{}", e),
            CompileError::Link(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<IoError> for CompileError {
    fn from(e: IoError) -> Self {
        CompileError::Io(e)
    }
}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError::Lex(e)
    }
}

impl From<crate::lexer::LexError> for CompileError {
    fn from(e: crate::lexer::LexError) -> Self {
        CompileError::Lex(LexError::from(e))
    }
}

impl From<ParseError> for CompileError {
    fn from(e: ParseError) -> Self {
        CompileError::Parse(e)
    }
}

impl From<TypeError> for CompileError {
    fn from(e: TypeError) -> Self {
        CompileError::Type(e)
    }
}

impl From<CodeGenError> for CompileError {
    fn from(e: CodeGenError) -> Self {
        CompileError::CodeGen(e)
    }
}

impl From<LinkError> for CompileError {
    fn from(e: LinkError) -> Self {
        CompileError::Link(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_sorts_diagnostics_in_source_order() {
        let mut sink = DiagnosticSink::new();
        sink.push(Diagnostic::error("a.paw", 5, 0, "late"));
        sink.push(Diagnostic::error("a.paw", 1, 0, "early"));
        let sorted = sink.sorted();
        assert_eq!(sorted[0].message, "early");
        assert_eq!(sorted[1].message, "late");
    }

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut sink = DiagnosticSink::new();
        sink.push(Diagnostic::warning("a.paw", 0, 0, "non-exhaustive is"));
        assert!(!sink.has_errors());
        assert_eq!(sink.error_count(), 0);
    }

    #[test]
    fn display_includes_filename_line_column_and_message() {
        let d = Diagnostic::error("a.paw", 2, 4, "undefined identifier 'x'");
        assert_eq!(d.to_string(), "a.paw:3:5: error: undefined identifier 'x'");
    }

    #[test]
    fn sink_display_appends_error_count_summary() {
        let mut sink = DiagnosticSink::new();
        sink.push(Diagnostic::error("a.paw", 0, 0, "oops"));
        sink.push(Diagnostic::error("a.paw", 1, 0, "oops2"));
        assert!(sink.to_string().ends_with("2 errors"));
    }
}
