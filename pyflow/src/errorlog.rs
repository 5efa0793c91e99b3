//! Recoverable analysis errors and the reporter that collects them.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::typegraph::VariableId;

/// Kinds of user-facing findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NameError,
    AttributeError,
    NoneAttr,
    WrongArgCount,
    WrongArgTypes,
    WrongKeywordArgs,
    DuplicateKeywordArgument,
    MissingParameter,
    NotCallable,
    UnsupportedOperands,
    BaseClassError,
    MroError,
    ImportError,
    InvalidAnnotation,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::NameError => "name-error",
            ErrorKind::AttributeError => "attribute-error",
            ErrorKind::NoneAttr => "none-attr",
            ErrorKind::WrongArgCount => "wrong-arg-count",
            ErrorKind::WrongArgTypes => "wrong-arg-types",
            ErrorKind::WrongKeywordArgs => "wrong-keyword-args",
            ErrorKind::DuplicateKeywordArgument => "duplicate-keyword-argument",
            ErrorKind::MissingParameter => "missing-parameter",
            ErrorKind::NotCallable => "not-callable",
            ErrorKind::UnsupportedOperands => "unsupported-operands",
            ErrorKind::BaseClassError => "base-class-error",
            ErrorKind::MroError => "mro-error",
            ErrorKind::ImportError => "import-error",
            ErrorKind::InvalidAnnotation => "invalid-annotation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One finding, with enough context to format it outside the interpreter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub filename: String,
    pub function: String,
    pub line: u32,
    /// Display form of the opcode being executed.
    pub opcode: String,
    /// The offending variables.
    pub variables: Vec<VariableId>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            filename: String::new(),
            function: String::new(),
            line: 0,
            opcode: String::new(),
            variables: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_variables(mut self, variables: Vec<VariableId>) -> Self {
        self.variables = variables;
        self
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "File \"{}\", line {}, in {}: {} [{}]",
            self.filename, self.line, self.function, self.message, self.kind
        )?;
        if let Some(details) = &self.details {
            for line in details.lines() {
                write!(f, "\n  {}", line)?;
            }
        }
        Ok(())
    }
}

/// Receives findings as the interpreter detects them.
///
/// `checkpoint` and `revert_to` let the interpreter discard findings from a
/// speculative operation whose result it ends up not using.
pub trait ErrorReporter {
    fn report(&mut self, record: ErrorRecord);

    /// Opaque position in the report stream.
    fn checkpoint(&self) -> usize;

    /// Forget everything reported since `checkpoint`.
    fn revert_to(&mut self, checkpoint: usize);
}

/// Default reporter. Keeps findings in order and drops duplicates.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    errors: Vec<ErrorRecord>,
    seen: HashSet<(String, u32, String)>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_error(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }

    pub fn count(&self, kind: ErrorKind) -> usize {
        self.errors.iter().filter(|e| e.kind == kind).count()
    }

    fn key(record: &ErrorRecord) -> (String, u32, String) {
        (record.filename.clone(), record.line, record.message.clone())
    }
}

impl ErrorReporter for ErrorLog {
    fn report(&mut self, record: ErrorRecord) {
        if self.seen.insert(Self::key(&record)) {
            self.errors.push(record);
        }
    }

    fn checkpoint(&self) -> usize {
        self.errors.len()
    }

    fn revert_to(&mut self, checkpoint: usize) {
        if checkpoint >= self.errors.len() {
            return;
        }
        for record in self.errors.drain(checkpoint..) {
            self.seen.remove(&(record.filename, record.line, record.message));
        }
    }
}

impl fmt::Display for ErrorLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.errors {
            writeln!(f, "{}", record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: ErrorKind, line: u32, message: &str) -> ErrorRecord {
        let mut r = ErrorRecord::new(kind, message);
        r.filename = "t.py".to_string();
        r.function = "<module>".to_string();
        r.line = line;
        r
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let mut log = ErrorLog::new();
        log.report(record(ErrorKind::NameError, 3, "Name 'x' is not defined"));
        log.report(record(ErrorKind::NameError, 3, "Name 'x' is not defined"));
        log.report(record(ErrorKind::NameError, 4, "Name 'x' is not defined"));
        assert_eq!(log.len(), 2);
        assert!(log.has_error(ErrorKind::NameError));
        assert!(!log.has_error(ErrorKind::MroError));
    }

    #[test]
    fn test_revert_forgets_keys() {
        let mut log = ErrorLog::new();
        log.report(record(ErrorKind::AttributeError, 1, "a"));
        let cp = log.checkpoint();
        log.report(record(ErrorKind::AttributeError, 2, "b"));
        log.revert_to(cp);
        assert_eq!(log.len(), 1);
        log.report(record(ErrorKind::AttributeError, 2, "b"));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_display_format() {
        let r = record(ErrorKind::WrongArgTypes, 7, "Invalid argument types")
            .with_details("Expected: (x: int)\nActually passed: (x: str)");
        assert_eq!(
            r.to_string(),
            "File \"t.py\", line 7, in <module>: Invalid argument types [wrong-arg-types]\n  Expected: (x: int)\n  Actually passed: (x: str)"
        );
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&ErrorKind::DuplicateKeywordArgument).unwrap();
        assert_eq!(json, "\"duplicate-keyword-argument\"");
    }
}
