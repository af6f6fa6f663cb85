use ariadne::{Color, Fmt, Label, Report, ReportKind, Source};
use std::fmt;
use thiserror::Error;

use crate::value::Object;

/// Byte range inside a single script line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn single(pos: usize) -> Self {
        Self {
            start: pos,
            end: pos + 1,
        }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Normal => write!(f, "normal"),
            Severity::Warning => write!(f, "warning"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

/// Outcome codes carried by every [`Diagnostic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Success,
    /// Completed without producing anything worth reporting.
    Nothing,
    /// Parameter count mismatch.
    IllegalArgs,
    BrokenEntry,
    IllegalCall,
    /// Illegal symbol, unbalanced bracket or unbalanced block.
    IllegalSymbol,
    /// Illegal index, size or operand.
    IllegalParam,
    BadStream,
    Overflow,
    NotFound,
    Redeclared,
    TypeMismatch,
    DeadReference,
    ReadOnly,
    RegistryBusy,
}

impl Code {
    pub fn is_success(self) -> bool {
        matches!(self, Code::Success | Code::Nothing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Code::Success => "success",
            Code::Nothing => "nothing",
            Code::IllegalArgs => "parameter count mismatch",
            Code::BrokenEntry => "broken entry",
            Code::IllegalCall => "entry not found",
            Code::IllegalSymbol => "illegal symbol",
            Code::IllegalParam => "illegal index or size",
            Code::BadStream => "unreadable input stream",
            Code::Overflow => "counter overflow",
            Code::NotFound => "name not found",
            Code::Redeclared => "redeclaration",
            Code::TypeMismatch => "type mismatch",
            Code::DeadReference => "dead reference",
            Code::ReadOnly => "read-only object",
            Code::RegistryBusy => "registry busy",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform result of every builtin, evaluator stage and script run.
///
/// A diagnostic is built once and then refined through the `with_*`
/// setters, each of which consumes and returns the diagnostic so calls chain.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: Code,
    /// Primary value. `None` means the outcome is only a success/failure
    /// marker, which the evaluator coerces to a boolean.
    pub value: Option<Object>,
    pub detail: Option<String>,
    pub span: Option<Span>,
}

impl Default for Diagnostic {
    fn default() -> Self {
        Self::success()
    }
}

impl Diagnostic {
    pub fn new(severity: Severity, code: Code) -> Self {
        Self {
            severity,
            code,
            value: None,
            detail: None,
            span: None,
        }
    }

    pub fn success() -> Self {
        Self::new(Severity::Normal, Code::Success)
    }

    pub fn nothing() -> Self {
        Self::new(Severity::Normal, Code::Nothing)
    }

    pub fn with_object(value: Object) -> Self {
        Self::success().with_value(value)
    }

    pub fn fatal(code: Code, detail: impl Into<String>) -> Self {
        Self::new(Severity::Fatal, code).with_detail(detail)
    }

    pub fn warning(code: Code, detail: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code).with_detail(detail)
    }

    pub fn with_value(mut self, value: Object) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_code(mut self, code: Code) -> Self {
        self.code = code;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attaches `span` unless a more precise one is already present.
    pub fn or_span(mut self, span: Span) -> Self {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }

    pub fn is_success(&self) -> bool {
        self.severity != Severity::Fatal && self.code.is_success()
    }

    /// Rendered primary value, or an empty string when there is none.
    pub fn value_string(&self) -> String {
        self.value
            .as_ref()
            .map(|value| value.to_string())
            .unwrap_or_default()
    }

    pub fn report(&self, source: &str, filename: Option<&str>) {
        let filename = filename.unwrap_or("<repl>");

        let (kind, color) = match self.severity {
            Severity::Fatal => (ReportKind::Error, Color::Red),
            Severity::Warning => (ReportKind::Warning, Color::Yellow),
            Severity::Normal => (ReportKind::Advice, Color::Cyan),
        };

        let message = self.detail.clone().unwrap_or_else(|| self.code.to_string());
        let span = self
            .span
            .map(|span| span.start.min(source.len())..span.end.min(source.len()))
            .unwrap_or(0..source.len());

        let report = Report::build(kind, filename, span.start)
            .with_message(format!("{}: {}", self.code.fg(color), message))
            .with_label(
                Label::new((filename, span))
                    .with_message(&message)
                    .with_color(color),
            )
            .finish();

        if let Err(error) = report.print((filename, Source::from(source))) {
            eprintln!("{}: {} ({})", self.code, message, error);
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.code)?;
        if let Some(ref detail) = self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

/// Failures of the object model's checked operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    #[error("expected a value of type {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("reference target is no longer alive")]
    Dead,
    #[error("object is read-only")]
    ReadOnly,
}

impl From<ObjectError> for Diagnostic {
    fn from(error: ObjectError) -> Self {
        let code = match error {
            ObjectError::TypeMismatch { .. } => Code::TypeMismatch,
            ObjectError::Dead => Code::DeadReference,
            ObjectError::ReadOnly => Code::ReadOnly,
        };
        Diagnostic::fatal(code, error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("delegating this container would form a cycle")]
    DelegationCycle,
}

impl From<ScopeError> for Diagnostic {
    fn from(error: ScopeError) -> Self {
        Diagnostic::fatal(Code::IllegalParam, error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("cannot change entry `{name}` while an evaluation is in flight")]
    Busy { name: String },
}

impl From<RegistryError> for Diagnostic {
    fn from(error: RegistryError) -> Self {
        Diagnostic::fatal(Code::RegistryBusy, error.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("cannot open script file `{path}`: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("script counter overflow")]
    Overflow,
}

impl From<ScriptError> for Diagnostic {
    fn from(error: ScriptError) -> Self {
        let code = match error {
            ScriptError::Open { .. } => Code::BadStream,
            ScriptError::Overflow => Code::Overflow,
        };
        Diagnostic::fatal(code, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setters_chain_and_keep_severity() {
        let diag = Diagnostic::warning(Code::IllegalParam, "first")
            .with_detail("second")
            .with_span(Span::new(2, 4));

        assert!(diag.is_warning());
        assert_eq!(diag.detail.as_deref(), Some("second"));
        assert_eq!(diag.span, Some(Span::new(2, 4)));
    }

    #[test]
    fn or_span_keeps_the_inner_span() {
        let diag = Diagnostic::fatal(Code::NotFound, "x")
            .with_span(Span::new(1, 2))
            .or_span(Span::new(0, 10));
        assert_eq!(diag.span, Some(Span::new(1, 2)));
    }

    #[test]
    fn warnings_with_success_codes_still_count_as_success() {
        assert!(Diagnostic::nothing().is_success());
        assert!(!Diagnostic::fatal(Code::Success, "halt").is_success());
    }

    #[test]
    fn with_code_keeps_detail() {
        let diag = Diagnostic::fatal(Code::NotFound, "lookup").with_code(Code::IllegalCall);
        assert_eq!(diag.code, Code::IllegalCall);
        assert_eq!(diag.to_string(), "fatal: entry not found: lookup");
    }

    #[test]
    fn object_errors_map_to_codes() {
        let diag: Diagnostic = ObjectError::Dead.into();
        assert_eq!(diag.code, Code::DeadReference);
        assert!(diag.is_fatal());
    }
}
