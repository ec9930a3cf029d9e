//! protoscript: a scripted test harness for line-based network protocols
//!
//! # Overview
//!
//! This crate runs protocol conversation scripts against live TCP servers.
//! A script is a plain text file of tagged lines: client lines are sent
//! verbatim (after variable substitution), server lines are regex patterns
//! the next received line must fully match. Scripts drive IMAP, POP3, SMTP
//! or any other CRLF line protocol.
//!
//! # Script Syntax
//!
//! ```text
//! # comment
//! C: a001 LOGIN ${user} ${password}
//! S<id>: a001 OK \[ID ([0-9]+)\] LOGIN completed
//! C: a002 LIST "" *
//! SUB {
//! S: \* LIST \(\) "/" INBOX
//! S: \* LIST \(\) "/" Sent
//! }
//! S: a002 OK LIST completed
//! ```
//!
//! # Directives
//!
//! | Directive | Description |
//! |-----------|-------------|
//! | `C: msg` | Send a line (with `${name}` substitution) |
//! | `S: regex` | Expect a line fully matching the pattern |
//! | `S<name>: regex` | Expect a line, assigning capture groups to variables |
//! | `S: +` | Expect a continuation `+` and pause for resumption |
//! | `SUB { ... }` | Expect the enclosed `S:` lines in any order |
//! | `ATTACHMENT { ... }` | Literal-framed upload with computed size marker |
//! | `SESSION: alias` | Switch traffic to another connection |
//! | `SLEEP: seconds` | Pause execution |
//! | `<BINARY_RESPONSE>` | Consume and discard one server line |
//! | `#`, blank | Ignored |

mod compiler;
mod element;
mod engine;
mod error;
mod matcher;
mod runner;
mod session;
mod vars;

pub use compiler::{compile, compile_str, Script};
pub use element::{Attachment, Diagnostic, Element};
pub use engine::{Executor, RunStatus};
pub use error::{ErrorKind, HarnessError};
pub use matcher::{full_match, match_line};
pub use runner::{RunConfig, ScriptRunner, TestCaseResult, TestResult};
pub use session::{RemoteHost, Session, TcpSession};
pub use vars::VarStore;

// Convenience function for cargo test integration
pub use runner::run_and_assert;
