//! Script runner
//!
//! Orchestrates running protocol scripts — discovers script files in a
//! directory, opens one TCP session per declared host, executes each script
//! to completion, and reports results. Sessions are always closed, pass or
//! fail.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::info;

use crate::compiler;
use crate::engine::Executor;
use crate::session::{RemoteHost, Session, TcpSession};
use crate::vars::VarStore;

/// Configuration for the script runner
pub struct RunConfig {
    /// A script file, or a directory to scan for scripts
    pub path: PathBuf,
    /// Remote endpoints, one session per entry
    pub hosts: Vec<RemoteHost>,
    /// Synthetic first server line, replacing the real greeting
    pub shebang: Option<String>,
    /// Variables pre-seeded before each run
    pub vars: Vec<(String, String)>,
    /// Log match failures and keep going instead of aborting
    pub continue_after_failure: bool,
    /// Optional filter — only run scripts matching this pattern
    pub filter: Option<String>,
    /// File extensions to scan (default: [".mpt"])
    pub extensions: Vec<String>,
    /// Abort a read that waits longer than this (default: wait forever)
    pub read_timeout: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("scripts"),
            hosts: Vec::new(),
            shebang: None,
            vars: Vec::new(),
            continue_after_failure: false,
            filter: None,
            extensions: vec![".mpt".into()],
            read_timeout: None,
        }
    }
}

/// Result of running all scripts
#[derive(Debug)]
pub struct TestResult {
    /// Individual script results
    pub cases: Vec<TestCaseResult>,
    /// Total duration
    pub duration: Duration,
}

impl TestResult {
    /// Check if all scripts passed
    pub fn all_passed(&self) -> bool {
        self.cases.iter().all(|c| c.passed)
    }

    /// Count passed scripts
    pub fn passed_count(&self) -> usize {
        self.cases.iter().filter(|c| c.passed).count()
    }

    /// Count failed scripts
    pub fn failed_count(&self) -> usize {
        self.cases.iter().filter(|c| !c.passed).count()
    }

    /// Format a summary line
    pub fn summary(&self) -> String {
        format!(
            "{} passed, {} failed ({}ms)",
            self.passed_count(),
            self.failed_count(),
            self.duration.as_millis(),
        )
    }
}

/// Result of a single script
#[derive(Debug)]
pub struct TestCaseResult {
    /// Script name (filename without extension)
    pub name: String,
    /// Source file path
    pub file: PathBuf,
    /// Whether the script passed
    pub passed: bool,
    /// Error message if failed
    pub error: Option<String>,
    /// Diagnostics logged under continue-after-failure
    pub log: String,
    /// Duration
    pub duration: Duration,
}

/// The script runner
pub struct ScriptRunner {
    config: RunConfig,
}

impl ScriptRunner {
    /// Create a new runner with the given config
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    /// Discover script files under the configured path
    pub fn discover(&self) -> Result<Vec<PathBuf>, std::io::Error> {
        let mut files = Vec::new();
        let path = &self.config.path;

        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("script path not found: {}", path.display()),
            ));
        }

        if path.is_file() {
            // Single file mode
            files.push(path.clone());
            return Ok(files);
        }

        self.scan_dir(path, &mut files)?;

        files.sort();
        Ok(files)
    }

    fn scan_dir(&self, dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), std::io::Error> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_dir() {
                self.scan_dir(&path, files)?;
            } else if self.is_script_file(&path) {
                if let Some(ref filter) = self.config.filter {
                    let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
                    if !name.contains(filter.as_str()) {
                        continue;
                    }
                }
                files.push(path);
            }
        }
        Ok(())
    }

    fn is_script_file(&self, path: &Path) -> bool {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            self.config
                .extensions
                .iter()
                .any(|ext| name.ends_with(ext.as_str()))
        } else {
            false
        }
    }

    /// Run all discovered scripts
    pub fn run_all(&self) -> Result<TestResult, std::io::Error> {
        let start = Instant::now();
        let files = self.discover()?;

        let mut cases = Vec::new();
        for file in &files {
            cases.push(self.run_one(file));
        }

        Ok(TestResult {
            cases,
            duration: start.elapsed(),
        })
    }

    /// Count the number of scripts that would be run
    pub fn count_scripts(&self) -> Result<usize, std::io::Error> {
        Ok(self.discover()?.len())
    }

    /// Run a single script file
    pub fn run_one(&self, file: &Path) -> TestCaseResult {
        let start = Instant::now();
        let name = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        info!(script = %name, "running");

        let (passed, error, log) = self.execute_script(file, &name);

        TestCaseResult {
            name,
            file: file.to_path_buf(),
            passed,
            error,
            log,
            duration: start.elapsed(),
        }
    }

    /// Compile and execute one script. Returns (passed, error, log).
    fn execute_script(&self, file: &Path, name: &str) -> (bool, Option<String>, String) {
        let reader = match File::open(file) {
            Ok(reader) => reader,
            Err(e) => return (false, Some(format!("cannot open script: {}", e)), String::new()),
        };
        let script = match compiler::compile(name, reader) {
            Ok(script) => script,
            Err(e) => return (false, Some(e.to_string()), String::new()),
        };

        let mut sessions: HashMap<String, Box<dyn Session>> = HashMap::new();
        for host in &self.config.hosts {
            sessions.insert(
                host.alias.clone(),
                Box::new(TcpSession::new(
                    host,
                    self.config.shebang.clone(),
                    self.config.read_timeout,
                )),
            );
        }

        let mut vars = VarStore::new();
        for (name, value) in &self.config.vars {
            vars.set(name.clone(), value.clone());
        }

        let mut exec = Executor::new(script, sessions, vars, self.config.continue_after_failure);
        let outcome = exec
            .start_sessions()
            .and_then(|_| exec.run_to_completion());
        // Sessions come down whatever the outcome.
        exec.stop_sessions();

        let log = exec.log().to_string();
        match outcome {
            Ok(()) if log.is_empty() => (true, None, log),
            Ok(()) => (false, Some("match failures logged".to_string()), log),
            Err(e) => (false, Some(e.to_string()), log),
        }
    }
}

/// Run every script under `path` and integrate with `#[test]` by panicking
/// on failure.
///
/// Usage in cargo tests:
/// ```rust,ignore
/// #[test]
/// fn imap_scripts() {
///     protoscript::run_and_assert("tests/scripts", vec![
///         "server=127.0.0.1:1143".parse().unwrap(),
///     ]);
/// }
/// ```
pub fn run_and_assert(path: impl Into<PathBuf>, hosts: Vec<RemoteHost>) {
    let config = RunConfig {
        path: path.into(),
        hosts,
        ..Default::default()
    };
    let result = ScriptRunner::new(config)
        .run_all()
        .expect("failed to run scripts");

    for case in &result.cases {
        if case.passed {
            eprintln!("PASS  {} ({}ms)", case.name, case.duration.as_millis());
        } else {
            eprintln!("FAIL  {}", case.name);
            if let Some(ref err) = case.error {
                eprintln!("  {}", err);
            }
            for line in case.log.lines() {
                eprintln!("  {}", line);
            }
        }
    }

    eprintln!("\n{}", result.summary());

    if !result.all_passed() {
        panic!("{} script(s) failed", result.failed_count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    fn write_script(dir: &Path, name: &str, text: &str) {
        std::fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn test_discover_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "b_login.mpt", "");
        write_script(dir.path(), "a_select.mpt", "");
        write_script(dir.path(), "notes.txt", "");
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        write_script(&dir.path().join("nested"), "c_fetch.mpt", "");

        let runner = ScriptRunner::new(RunConfig {
            path: dir.path().to_path_buf(),
            ..Default::default()
        });
        let names: Vec<String> = runner
            .discover()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a_select.mpt", "b_login.mpt", "c_fetch.mpt"]);

        let runner = ScriptRunner::new(RunConfig {
            path: dir.path().to_path_buf(),
            filter: Some("login".into()),
            ..Default::default()
        });
        assert_eq!(runner.count_scripts().unwrap(), 1);
    }

    #[test]
    fn test_discover_single_file_ignores_extension() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "odd.script", "");
        let runner = ScriptRunner::new(RunConfig {
            path: dir.path().join("odd.script"),
            ..Default::default()
        });
        assert_eq!(runner.count_scripts().unwrap(), 1);
    }

    #[test]
    fn test_missing_path_is_io_error() {
        let runner = ScriptRunner::new(RunConfig {
            path: PathBuf::from("/no/such/dir"),
            ..Default::default()
        });
        assert!(runner.discover().is_err());
    }

    /// A canned server: sends the greeting, then for each (expected,
    /// reply) pair reads one line and answers.
    fn spawn_dialog_server(
        greeting: &'static str,
        dialog: &'static [(&'static str, &'static str)],
    ) -> RemoteHost {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket
                .write_all(format!("{}\r\n", greeting).as_bytes())
                .unwrap();
            let mut reader = BufReader::new(socket.try_clone().unwrap());
            for (expected, reply) in dialog {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                assert_eq!(line.trim_end(), *expected);
                socket
                    .write_all(format!("{}\r\n", reply).as_bytes())
                    .unwrap();
            }
        });
        RemoteHost {
            alias: "server".to_string(),
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    #[test]
    fn test_run_one_pass_and_fail() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "login.mpt",
            "S: \\* OK ready\nC: a001 LOGIN ${user} secret\nS: a001 OK logged in\n",
        );

        let host = spawn_dialog_server(
            "* OK ready",
            &[("a001 LOGIN fred secret", "a001 OK logged in")],
        );
        let runner = ScriptRunner::new(RunConfig {
            path: dir.path().join("login.mpt"),
            hosts: vec![host],
            vars: vec![("user".into(), "fred".into())],
            read_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let result = runner.run_all().unwrap();
        assert!(result.all_passed(), "{:?}", result.cases);
        assert_eq!(result.summary().split(' ').next(), Some("1"));

        // Same script against a server that answers NO.
        let host = spawn_dialog_server(
            "* OK ready",
            &[("a001 LOGIN fred secret", "a001 NO denied")],
        );
        let runner = ScriptRunner::new(RunConfig {
            path: dir.path().join("login.mpt"),
            hosts: vec![host],
            vars: vec![("user".into(), "fred".into())],
            read_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let result = runner.run_all().unwrap();
        assert_eq!(result.failed_count(), 1);
        let case = &result.cases[0];
        assert!(case.error.as_deref().unwrap_or("").contains("a001 NO denied"));
    }

    #[test]
    fn test_compile_failure_is_reported_not_panicked() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "bad.mpt", "X: what\n");
        let runner = ScriptRunner::new(RunConfig {
            path: dir.path().to_path_buf(),
            ..Default::default()
        });
        let result = runner.run_all().unwrap();
        assert_eq!(result.failed_count(), 1);
        assert!(result.cases[0]
            .error
            .as_deref()
            .unwrap_or("")
            .contains("invalid line prefix"));
    }

    #[test]
    fn test_continue_after_failure_marks_case_failed() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "lenient.mpt", "S: \\* OK ready\nS: never matches\n");

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(b"* OK ready\r\nsomething else\r\n").unwrap();
            // Hold the socket open until the harness is done with it.
            let mut reader = BufReader::new(socket);
            let mut line = String::new();
            let _ = reader.read_line(&mut line);
        });

        let runner = ScriptRunner::new(RunConfig {
            path: dir.path().join("lenient.mpt"),
            hosts: vec![RemoteHost {
                alias: "server".to_string(),
                host: "127.0.0.1".to_string(),
                port,
            }],
            continue_after_failure: true,
            read_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        });
        let result = runner.run_all().unwrap();
        let case = &result.cases[0];
        assert!(!case.passed);
        assert!(case.log.contains("never matches"));
    }
}
