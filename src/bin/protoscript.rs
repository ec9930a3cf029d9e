//! protoscript CLI
//!
//! Run protocol scripts against live servers.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use protoscript::{RemoteHost, RunConfig, ScriptRunner};

#[derive(Parser, Debug)]
#[command(name = "protoscript")]
#[command(version)]
#[command(about = "Run scripted protocol conversations against live servers")]
struct Cli {
    /// Script file or directory to scan
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Remote endpoint as alias=host:port (repeatable; one session each)
    #[arg(short = 'H', long = "host", value_name = "ALIAS=HOST:PORT")]
    hosts: Vec<RemoteHost>,

    /// Replace the first server line with this synthetic greeting
    #[arg(long)]
    shebang: Option<String>,

    /// Pre-seed a substitution variable (NAME=VALUE, repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    vars: Vec<String>,

    /// Only run scripts whose name contains this string
    #[arg(short = 'f', long)]
    filter: Option<String>,

    /// File extensions to match [default: .mpt]
    #[arg(long = "ext", default_value = ".mpt")]
    extensions: Vec<String>,

    /// Log match failures and keep going instead of aborting the script
    #[arg(long = "continue-on-failure")]
    continue_on_failure: bool,

    /// Give up on a read after this many seconds (default: wait forever)
    #[arg(long = "read-timeout", value_name = "SECONDS")]
    read_timeout: Option<u64>,

    /// Show number of scripts without running
    #[arg(long = "count")]
    count: bool,

    /// Verbose output: show the diagnostics log for passing scripts too
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                if cli.verbose {
                    "protoscript=debug".into()
                } else {
                    "protoscript=warn".into()
                }
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut vars = Vec::new();
    for pair in &cli.vars {
        match pair.split_once('=') {
            Some((name, value)) => vars.push((name.to_string(), value.to_string())),
            None => {
                eprintln!("error: expected NAME=VALUE, got '{}'", pair);
                return ExitCode::FAILURE;
            }
        }
    }

    let config = RunConfig {
        path: cli.path,
        hosts: cli.hosts,
        shebang: cli.shebang,
        vars,
        continue_after_failure: cli.continue_on_failure,
        filter: cli.filter,
        extensions: cli.extensions,
        read_timeout: cli.read_timeout.map(Duration::from_secs),
    };

    let runner = ScriptRunner::new(config);

    if cli.count {
        match runner.count_scripts() {
            Ok(count) => {
                println!("Found {} script(s)", count);
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let result = match runner.run_all() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    for case in &result.cases {
        if case.passed {
            println!("PASS  {} ({}ms)", case.name, case.duration.as_millis());
            if cli.verbose && !case.log.is_empty() {
                for line in case.log.lines() {
                    println!("      {}", line);
                }
            }
        } else {
            println!("FAIL  {}", case.name);
            if let Some(ref err) = case.error {
                for line in err.lines() {
                    println!("      {}", line);
                }
            }
            if !case.log.is_empty() {
                println!("      --- log ---");
                for line in case.log.lines() {
                    println!("      {}", line);
                }
            }
        }
    }

    println!();
    println!("{}", result.summary());

    if result.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
