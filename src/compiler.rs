//! Script compiler
//!
//! Turns the textual DSL into an ordered [`Script`] of typed protocol
//! elements. Parsing is line-oriented; `SUB {` and `ATTACHMENT {` open
//! multi-line blocks that each compile to a fixed element shape.
//!
//! Grammar, by line prefix (checked in this order):
//!
//! | Prefix | Meaning |
//! |---|---|
//! | `S: +` (whole line) | continuation |
//! | `C: msg` | client request |
//! | `S: regex` | expected server line |
//! | `S<name>...: regex` | expected server line with captures |
//! | `SUB {` ... `}` | unordered block of `S:` lines |
//! | `ATTACHMENT {` ... `}` | literal-framed upload block |
//! | `#`, blank | ignored |
//! | `SESSION: alias` | switch current session |
//! | `SLEEP: seconds` | pause |
//! | `<BINARY_RESPONSE>` | discard one server line |

use std::io::Read;

use regex::Regex;

use crate::element::{Attachment, Diagnostic, Element};
use crate::error::HarnessError;

pub const CONTINUATION_LINE: &str = "S: +";
pub const CLIENT_TAG: &str = "C:";
pub const SERVER_TAG: &str = "S:";
pub const SERVER_CAPTURE_TAG: &str = "S<";
pub const OPEN_UNORDERED_BLOCK_TAG: &str = "SUB {";
pub const OPEN_ATTACHMENT_BLOCK_TAG: &str = "ATTACHMENT {";
pub const CLOSE_BLOCK_TAG: &str = "}";
pub const COMMENT_TAG: &str = "#";
pub const SESSION_TAG: &str = "SESSION:";
pub const SLEEP_TAG: &str = "SLEEP:";
pub const FILE_TAG: &str = "FILE=";
pub const BINARY_RESPONSE_TAG: &str = "<BINARY_RESPONSE>";

/// A compiled script: the ordered element sequence plus its display name.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub name: String,
    pub elements: Vec<Element>,
}

/// Compile a script from a byte stream (ASCII text).
pub fn compile<R: Read>(name: &str, mut reader: R) -> Result<Script, HarnessError> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|e| HarnessError::compile(format!("cannot read script: {}", e)))?;
    compile_str(name, &text)
}

/// Compile a script from in-memory text.
pub fn compile_str(name: &str, text: &str) -> Result<Script, HarnessError> {
    let mut elements = Vec::new();
    let mut lines = text.lines().enumerate();
    let mut last_client = String::new();

    while let Some((idx, line)) = lines.next() {
        let line_number = idx + 1;
        let location = format!("{}:{}", name, line_number);
        let fail = |msg: String| HarnessError::compile(msg).with_location(name, line_number);

        if line == CONTINUATION_LINE {
            elements.push(Element::Continuation);
        } else if line.starts_with(CLIENT_TAG) {
            let message = message_after_tag(line).to_string();
            last_client = message.clone();
            elements.push(Element::ClientRequest { message });
        } else if line.starts_with(SERVER_TAG) {
            elements.push(Element::ServerResponse {
                pattern: message_after_tag(line).to_string(),
                captures: Vec::new(),
                diag: Diagnostic {
                    location,
                    last_client: last_client.clone(),
                },
            });
        } else if line.starts_with(SERVER_CAPTURE_TAG) {
            elements.push(Element::ServerResponse {
                pattern: capture_message(line),
                captures: capture_names(line),
                diag: Diagnostic {
                    location,
                    last_client: last_client.clone(),
                },
            });
        } else if line.starts_with(OPEN_UNORDERED_BLOCK_TAG) {
            let mut patterns = Vec::new();
            loop {
                let Some((_, block_line)) = lines.next() else {
                    return Err(fail("unterminated 'SUB {' block".into()));
                };
                if block_line.starts_with(CLOSE_BLOCK_TAG) {
                    break;
                }
                if !block_line.starts_with(SERVER_TAG) {
                    return Err(fail(
                        "only 'S: ' lines are permitted inside a 'SUB {' block".into(),
                    ));
                }
                patterns.push(message_after_tag(block_line).to_string());
            }
            elements.push(Element::ServerUnorderedBlock {
                patterns,
                diag: Diagnostic {
                    location,
                    last_client: last_client.clone(),
                },
            });
        } else if line.starts_with(OPEN_ATTACHMENT_BLOCK_TAG) {
            compile_attachment_block(&mut lines, &mut elements, &location, name, line_number)?;
        } else if line.starts_with(COMMENT_TAG) || line.trim().is_empty() {
            // ignored
        } else if line.starts_with(SESSION_TAG) {
            let alias = after_colon(line).trim();
            if alias.is_empty() {
                return Err(fail("no session alias specified".into()));
            }
            elements.push(Element::SetSession {
                alias: alias.to_string(),
            });
        } else if line.starts_with(SLEEP_TAG) {
            // A non-numeric value yields zero delay, never a failure.
            let seconds: u64 = after_colon(line).trim().parse().unwrap_or(0);
            elements.push(Element::Sleep {
                duration: std::time::Duration::from_millis(seconds * 1000),
            });
        } else if line.starts_with(BINARY_RESPONSE_TAG) {
            let Some(_) = lines.next() else {
                return Err(fail("expected a line after <BINARY_RESPONSE>".into()));
            };
            elements.push(Element::BinaryResponse {
                diag: Diagnostic {
                    location,
                    last_client: last_client.clone(),
                },
            });
        } else {
            let prefix: String = line.chars().take(3).collect();
            return Err(fail(format!("invalid line prefix: {}", prefix)));
        }
    }

    Ok(Script {
        name: name.to_string(),
        elements,
    })
}

/// One collected line of an `ATTACHMENT {` block before element emission.
enum BlockEntry {
    Text(String),
    File(Attachment),
}

/// Compile an `ATTACHMENT {` block.
///
/// The first line of the block is the upload command, the second the
/// expected continuation prompt; neither contributes text bytes to the
/// running total. `FILE=` lines are replaced by the file's raw bytes and
/// always count payload + 2 (CRLF); every other line past the first two
/// counts length + 2. The literal size marker appended to the command is
/// the total minus 2.
fn compile_attachment_block(
    lines: &mut std::iter::Enumerate<std::str::Lines<'_>>,
    elements: &mut Vec<Element>,
    location: &str,
    name: &str,
    open_line: usize,
) -> Result<(), HarnessError> {
    let mut entries: Vec<BlockEntry> = Vec::new();
    let mut bytes: i64 = 0;
    let mut block_line_count = 0;

    loop {
        let Some((_, line)) = lines.next() else {
            return Err(HarnessError::compile("unterminated 'ATTACHMENT {' block")
                .with_location(name, open_line));
        };
        if line.starts_with(CLOSE_BLOCK_TAG) {
            break;
        }
        if let Some(filename) = line.strip_prefix(FILE_TAG) {
            let data = std::fs::read(filename).map_err(|e| {
                HarnessError::compile(format!("cannot read attachment file '{}': {}", filename, e))
                    .with_location(name, open_line)
            })?;
            bytes += data.len() as i64 + 2;
            entries.push(BlockEntry::File(Attachment {
                data,
                filename: filename.to_string(),
            }));
        } else {
            if block_line_count > 1 {
                bytes += line.len() as i64 + 2;
            }
            entries.push(BlockEntry::Text(line.to_string()));
        }
        block_line_count += 1;
    }

    let mut iter = entries.into_iter();
    let (Some(BlockEntry::Text(command)), Some(BlockEntry::Text(prompt))) =
        (iter.next(), iter.next())
    else {
        return Err(HarnessError::compile(
            "an 'ATTACHMENT {' block must open with a command line and a continuation prompt",
        )
        .with_location(name, open_line));
    };

    let command = format!("{} {{{}}}", command, bytes - 2);
    elements.push(Element::ClientRequest {
        message: command.clone(),
    });
    elements.push(Element::ServerResponse {
        pattern: prompt,
        captures: Vec::new(),
        diag: Diagnostic {
            location: location.to_string(),
            last_client: command,
        },
    });
    for entry in iter {
        elements.push(match entry {
            BlockEntry::Text(message) => Element::ClientRequest { message },
            BlockEntry::File(attachment) => Element::BinaryAttachment { attachment },
        });
    }
    Ok(())
}

/// The remainder of a tagged line, after the 2-character tag and the
/// following space. Bare tags yield the empty string.
fn message_after_tag(line: &str) -> &str {
    if line.len() > 3 {
        &line[3..]
    } else {
        ""
    }
}

fn after_colon(line: &str) -> &str {
    match line.find(':') {
        Some(pos) => &line[pos + 1..],
        None => line,
    }
}

/// Extract `<name>` capture tokens in left-to-right order.
fn capture_names(line: &str) -> Vec<String> {
    // The token scan can't fail: the pattern is a constant.
    let re = Regex::new(r"<(\w+?)>").expect("capture token pattern");
    re.captures_iter(line)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// The server message of a capture line: everything after the first `:`.
fn capture_message(line: &str) -> String {
    after_colon(line).trim().to_string()
}
