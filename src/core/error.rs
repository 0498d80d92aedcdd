//! Purpose: Define the single structured error type shared by the core, the evaluator and the CLI.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Builder-style error with stable kinds; callers attach module/line context as it bubbles up.
//! Invariants: `ErrorKind` variants and their exit codes are stable.
//! Invariants: `message()` is the user-facing description carried in error responses.
use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    /// A module could not be created or imported.
    Resolution,
    /// Executed code failed (syntax or runtime).
    Execution,
    /// The request itself is not understood.
    Protocol,
    Io,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    module: Option<String>,
    line: Option<usize>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            module: None,
            line: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn line(&self) -> Option<usize> {
        self.line
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Records the module where the error surfaced; the innermost module wins.
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        if self.module.is_none() {
            self.module = Some(module.into());
        }
        self
    }

    /// Records the source line; the innermost line wins.
    pub fn with_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Text used in protocol responses: the message, or a kind-derived fallback.
    pub fn description(&self) -> String {
        match &self.message {
            Some(message) => message.clone(),
            None => match self.kind {
                ErrorKind::Internal => "internal error".to_string(),
                ErrorKind::Usage => "usage error".to_string(),
                ErrorKind::Resolution => "module resolution failed".to_string(),
                ErrorKind::Execution => "execution failed".to_string(),
                ErrorKind::Protocol => "protocol error".to_string(),
                ErrorKind::Io => "i/o error".to_string(),
            },
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(module) = &self.module {
            write!(f, " (module: {module})")?;
        }
        if let Some(line) = self.line {
            write!(f, " (line: {line})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Resolution => 3,
        ErrorKind::Execution => 4,
        ErrorKind::Protocol => 5,
        ErrorKind::Io => 8,
    }
}
