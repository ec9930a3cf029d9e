//! Protocol elements
//!
//! The compiled form of a script: a closed tagged union, one variant per
//! directive. Server-sourced variants share their diagnostic fields through
//! [`Diagnostic`]; the unordered block supplies its own matching algorithm
//! in the engine rather than inheriting the ordered one.

use std::time::Duration;

/// Context carried by server-sourced elements for error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// `script:line` of the directive
    pub location: String,
    /// The most recent client message before this element
    pub last_client: String,
}

/// A raw byte payload read from a `FILE=` reference.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub data: Vec<u8>,
    pub filename: String,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Payloads can be large and binary; show the size, not the bytes.
        f.debug_struct("Attachment")
            .field("filename", &self.filename)
            .field("len", &self.data.len())
            .finish()
    }
}

/// One compiled protocol element, in script textual order.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// A message template to send; may contain `${name}` tokens.
    ClientRequest { message: String },
    /// An expected line, matched as a full-string regex.
    ServerResponse {
        pattern: String,
        /// Capture-variable names, in `<name>` left-to-right order
        captures: Vec<String>,
        diag: Diagnostic,
    },
    /// Expected lines that may arrive in any order, one line per pattern.
    ServerUnorderedBlock {
        patterns: Vec<String>,
        diag: Diagnostic,
    },
    /// Expects the literal `+` line and pauses for external resumption.
    Continuation,
    /// Pauses execution.
    Sleep { duration: Duration },
    /// Switches the current session to a declared alias.
    SetSession { alias: String },
    /// Raw bytes sent as a binary write instead of a text line.
    BinaryAttachment { attachment: Attachment },
    /// Consumes and discards one server line without matching it.
    BinaryResponse { diag: Diagnostic },
}

impl Element {
    /// Client-sourced elements write to the server; everything else waits
    /// on it. The continuation resume loop steps over client-sourced
    /// elements and stops at the first server-sourced one.
    pub fn is_client(&self) -> bool {
        matches!(
            self,
            Element::ClientRequest { .. } | Element::BinaryAttachment { .. }
        )
    }
}
