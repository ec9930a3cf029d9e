//! Harness errors

use std::fmt;

/// The kind of harness error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid script syntax or malformed block
    Compile,
    /// A server line did not match its expected pattern
    Match,
    /// A continuation was missing or arrived unexpectedly
    Continuation,
    /// `SESSION:` named an alias with no declared session
    SessionAlias,
    /// Socket open/read/write failure
    Transport,
}

/// A harness error with script/line context.
///
/// All failure kinds surface through this one type; the orchestrator
/// guarantees session cleanup runs no matter which kind triggered it.
#[derive(Debug)]
pub struct HarnessError {
    pub kind: ErrorKind,
    pub message: String,
    pub script: Option<String>,
    pub line: Option<usize>,
}

impl HarnessError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            script: None,
            line: None,
        }
    }

    pub fn with_location(mut self, script: impl Into<String>, line: usize) -> Self {
        self.script = Some(script.into());
        self.line = Some(line);
        self
    }

    pub fn compile(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Compile, msg)
    }

    pub fn mismatch(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Match, msg)
    }

    pub fn continuation(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Continuation, msg)
    }

    pub fn session_alias(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::SessionAlias, msg)
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, msg)
    }

    /// Whether the failure policy may downgrade this error to a logged
    /// diagnostic. Alias and transport errors are always fatal.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind, ErrorKind::Match | ErrorKind::Continuation)
    }
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref script) = self.script {
            write!(f, "{}:", script)?;
        }
        if let Some(line) = self.line {
            write!(f, "{}:", line)?;
        }
        if self.script.is_some() || self.line.is_some() {
            write!(f, " ")?;
        }
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HarnessError {}

impl From<std::io::Error> for HarnessError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Transport, e.to_string())
    }
}
