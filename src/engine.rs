//! Execution engine
//!
//! Runs a compiled [`Script`] against a named set of live sessions. The
//! engine owns an explicit cursor over the element sequence so that a run
//! can pause at a continuation and be resumed by an external caller — the
//! continuation trampoline of line protocols where a lone `+` gates the
//! next client write.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::compiler::Script;
use crate::element::Element;
use crate::error::HarnessError;
use crate::matcher;
use crate::session::Session;
use crate::vars::VarStore;

/// What a call to [`Executor::run`] ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every element has executed.
    Done,
    /// A continuation element read its `+`; the run resumes once
    /// [`Executor::continuation_received`] is called.
    PausedForContinuation,
}

/// Mutable per-run state, shared by every element's behavior.
struct RunState {
    vars: VarStore,
    sessions: HashMap<String, Box<dyn Session>>,
    current: Option<String>,
    continuation_expected: bool,
    continued: bool,
    continue_after_failure: bool,
    log: String,
}

impl RunState {
    fn logf(&mut self, msg: &str) {
        self.log.push_str(msg);
        if !msg.ends_with('\n') {
            self.log.push('\n');
        }
    }
}

/// Executes a compiled script element by element.
pub struct Executor {
    script: Script,
    state: RunState,
    cursor: usize,
}

impl Executor {
    /// Build an executor over a script and its declared sessions.
    ///
    /// When exactly one session is declared it becomes current
    /// implicitly; otherwise the script must open with `SESSION:`.
    pub fn new(
        script: Script,
        sessions: HashMap<String, Box<dyn Session>>,
        vars: VarStore,
        continue_after_failure: bool,
    ) -> Self {
        let current = if sessions.len() == 1 {
            sessions.keys().next().cloned()
        } else {
            None
        };
        Self {
            script,
            state: RunState {
                vars,
                sessions,
                current,
                continuation_expected: false,
                continued: false,
                continue_after_failure,
                log: String::new(),
            },
            cursor: 0,
        }
    }

    /// Open every declared session.
    pub fn start_sessions(&mut self) -> Result<(), HarnessError> {
        for session in self.state.sessions.values_mut() {
            session.start()?;
        }
        Ok(())
    }

    /// Close every declared session. Close failures are logged, never
    /// propagated.
    pub fn stop_sessions(&mut self) {
        for session in self.state.sessions.values_mut() {
            if let Err(e) = session.stop() {
                warn!("error closing session: {}", e);
            }
        }
    }

    /// Step elements in script order from the cursor.
    ///
    /// Returns [`RunStatus::PausedForContinuation`] right after a
    /// continuation element has consumed its `+` line; stepping resumes
    /// through [`Self::continuation_received`] followed by another
    /// `run` call. Returns [`RunStatus::Done`] once the cursor is
    /// exhausted.
    pub fn run(&mut self) -> Result<RunStatus, HarnessError> {
        while self.cursor < self.script.elements.len() {
            let element = &self.script.elements[self.cursor];
            if matches!(element, Element::Continuation) {
                self.cursor += 1;
                self.state.continuation_expected = true;
                debug!(chained = self.state.continued, "pausing for continuation");
                self.state.continued = false;
                let line = current_session(&mut self.state)?.read_line()?;
                if line != "+" {
                    fail_or_log(
                        &mut self.state,
                        HarnessError::continuation(format!(
                            "expected continuation '+', got '{}'",
                            line
                        )),
                    )?;
                }
                return Ok(RunStatus::PausedForContinuation);
            }
            exec_element(element, &mut self.state)?;
            self.cursor += 1;
        }
        Ok(RunStatus::Done)
    }

    /// External notification that the expected continuation arrived.
    ///
    /// Errors unless a continuation is pending. Executes client-sourced
    /// elements after the pause point and stops at the first
    /// server-sourced one, handing control back exactly when the next
    /// server-bound wait is reached.
    pub fn continuation_received(&mut self) -> Result<(), HarnessError> {
        if !self.state.continuation_expected {
            return Err(HarnessError::continuation("unexpected continuation"));
        }
        self.state.continued = true;
        self.state.continuation_expected = false;
        while self.cursor < self.script.elements.len() {
            let element = &self.script.elements[self.cursor];
            if !element.is_client() {
                break;
            }
            exec_element(element, &mut self.state)?;
            self.cursor += 1;
        }
        self.state.continued = false;
        Ok(())
    }

    /// Drive the run to completion, resuming across continuations.
    pub fn run_to_completion(&mut self) -> Result<(), HarnessError> {
        loop {
            match self.run()? {
                RunStatus::Done => return Ok(()),
                RunStatus::PausedForContinuation => self.continuation_received()?,
            }
        }
    }

    pub fn is_done(&self) -> bool {
        self.cursor >= self.script.elements.len()
    }

    /// Diagnostics collected under continue-after-failure mode.
    pub fn log(&self) -> &str {
        &self.state.log
    }

    pub fn vars(&self) -> &VarStore {
        &self.state.vars
    }
}

fn current_session<'a>(
    state: &'a mut RunState,
) -> Result<&'a mut Box<dyn Session>, HarnessError> {
    let RunState {
        current, sessions, ..
    } = state;
    let alias = current.as_ref().ok_or_else(|| {
        HarnessError::session_alias("no current session; declare one with 'SESSION:'")
    })?;
    sessions.get_mut(alias.as_str()).ok_or_else(|| {
        HarnessError::session_alias(format!("no session found for alias '{}'", alias))
    })
}

/// Read one line for a server-sourced element, folding transport failures
/// into a located diagnostic.
fn read_server_line(
    state: &mut RunState,
    location: &str,
    expected: &str,
) -> Result<String, HarnessError> {
    current_session(state)?.read_line().map_err(|e| {
        HarnessError::transport(format!(
            "\nLocation: {}\nExpected: {}\nReason: {}",
            location, expected, e.message
        ))
    })
}

/// Apply the run-wide failure policy: recoverable errors are logged and
/// swallowed when continue-after-failure is set, everything else aborts.
fn fail_or_log(state: &mut RunState, err: HarnessError) -> Result<(), HarnessError> {
    if state.continue_after_failure && err.is_recoverable() {
        warn!("{}", err.message);
        state.logf(&err.message);
        Ok(())
    } else {
        Err(err)
    }
}

fn exec_element(element: &Element, state: &mut RunState) -> Result<(), HarnessError> {
    match element {
        Element::ClientRequest { message } => {
            let message = state.vars.substitute(message);
            current_session(state)?.write_line(&message)
        }
        Element::ServerResponse {
            pattern,
            captures,
            diag,
        } => {
            let actual = read_server_line(state, &diag.location, pattern)?;
            let matched = matcher::match_line(pattern, &actual, captures, &mut state.vars)?;
            if !matched {
                let msg = format!(
                    "\nLocation: {}\nLastClientMsg: {}\nExpected: '{}'\nActual   : '{}'",
                    diag.location, diag.last_client, pattern, actual
                );
                fail_or_log(state, HarnessError::mismatch(msg))?;
            }
            Ok(())
        }
        Element::ServerUnorderedBlock { patterns, diag } => {
            let mut remaining = patterns.clone();
            // Exactly one incoming line per pattern, each pattern
            // consumed by exactly one line.
            for _ in 0..patterns.len() {
                let actual = read_server_line(state, &diag.location, "<unordered block>")?;
                let mut consumed = None;
                for (i, pattern) in remaining.iter().enumerate() {
                    if matcher::full_match(pattern, &actual)? {
                        consumed = Some(i);
                        break;
                    }
                }
                match consumed {
                    Some(i) => {
                        remaining.remove(i);
                    }
                    None => {
                        let mut msg =
                            format!("\nLocation: {}\nExpected one of: ", diag.location);
                        for pattern in patterns {
                            msg.push_str("\n    ");
                            msg.push_str(pattern);
                        }
                        msg.push_str("\nActual: ");
                        msg.push_str(&actual);
                        fail_or_log(state, HarnessError::mismatch(msg))?;
                    }
                }
            }
            Ok(())
        }
        Element::Sleep { duration } => {
            std::thread::sleep(*duration);
            Ok(())
        }
        Element::SetSession { alias } => {
            if !state.sessions.contains_key(alias) {
                return Err(HarnessError::session_alias(format!(
                    "no session found for alias '{}'",
                    alias
                )));
            }
            state.current = Some(alias.clone());
            Ok(())
        }
        Element::BinaryAttachment { attachment } => {
            current_session(state)?.write_binary(attachment)
        }
        Element::BinaryResponse { diag } => {
            let line = read_server_line(state, &diag.location, "<binary response>")?;
            debug!("discarded binary response line ({} bytes)", line.len());
            Ok(())
        }
        // Continuations pause the run loop; they never reach here.
        Element::Continuation => Ok(()),
    }
}
