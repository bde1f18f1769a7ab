//! Supervised child process execution and the shell script executor
//!
//! Every process the migrator starts (interpreters running scripts, git)
//! goes through `run_supervised`, which guarantees:
//!
//! - Process group isolation and registration with `ChildRegistry`
//! - Line-by-line logging of stdout (info) and stderr (warn)
//! - Prompt termination of the process group when the run is cancelled
//!
//! # Architecture Rule
//!
//! Do not call `Command::output()` or `Command::spawn()` directly for
//! migration work; a child started outside `run_supervised` survives
//! cancellation.

use crate::cancellation::Cancellation;
use crate::error::Cancelled;
use crate::process_guard::{
    CANCEL_GRACE_PERIOD, ChildRegistry, CommandProcessGroup, terminate_group, terminate_stragglers,
};
use crate::script::Script;
use crate::script_traits::ScriptExecutor;
use anyhow::{Context, Result};
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default interpreter for migration scripts
pub const DEFAULT_INTERPRETER: &str = "bash";

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long background processes left by a finished child may keep its
/// output pipes open
const STRAGGLER_DRAIN: Duration = Duration::from_secs(1);

/// Output from a supervised child process.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    /// Standard output from the process.
    pub stdout: String,
    /// Standard error from the process.
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the process exited successfully (exit code 0).
    pub success: bool,
}

impl ScriptOutput {
    /// Return an error describing the failure if the process did not succeed.
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            return Ok(());
        }
        let stderr = self.stderr.trim();
        match self.exit_code {
            Some(code) if stderr.is_empty() => anyhow::bail!("{} failed (exit code {})", context, code),
            Some(code) => anyhow::bail!("{} failed (exit code {}): {}", context, code, stderr),
            None => anyhow::bail!("{} was terminated by a signal", context),
        }
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Log each line of `pipe` under `label` and collect it.
fn spawn_log_reader<R: Read + Send + 'static>(
    pipe: R,
    label: String,
    stream: Stream,
) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut collected = String::new();
        for line in BufReader::new(pipe).lines() {
            let Ok(line) = line else { break };
            match stream {
                Stream::Stdout => info!("{label} | {line}"),
                Stream::Stderr => warn!("{label} | {line}"),
            }
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    })
}

/// Spawn `cmd` in its own process group and wait for it.
///
/// `label` tags log lines. Returns `Err(Cancelled)` (with context) if
/// `cancellation` fires before the child and its output are finished; the
/// child's process group is terminated first. A non-zero exit is NOT an
/// error here, check `ScriptOutput::success`.
pub fn run_supervised(
    cmd: &mut Command,
    label: &str,
    cancellation: &Cancellation,
) -> Result<ScriptOutput> {
    cancellation.check()?;

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group();

    debug!(command = ?cmd, "Spawning child process");
    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {:?} for {}", cmd.get_program(), label))?;
    let pid = child.id();
    ChildRegistry::lock_global().register(pid);

    let stdout = child
        .stdout
        .take()
        .map(|pipe| spawn_log_reader(pipe, label.to_string(), Stream::Stdout));
    let stderr = child
        .stderr
        .take()
        .map(|pipe| spawn_log_reader(pipe, label.to_string(), Stream::Stderr));

    let waited = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Ok(status),
            Ok(None) if cancellation.is_cancelled() => {
                warn!(pid, "Cancellation requested, terminating {label}");
                terminate_group(pid, CANCEL_GRACE_PERIOD);
                let _ = child.wait();
                break Err(anyhow::Error::new(Cancelled));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                break Err(anyhow::Error::new(e));
            }
        }
    };

    let cancelled_while_draining = await_readers(pid, label, [&stdout, &stderr], cancellation);
    ChildRegistry::lock_global().unregister(pid);

    let stdout = collect_output(stdout);
    let stderr = collect_output(stderr);

    let status = waited.with_context(|| format!("Failed waiting for {}", label))?;
    if cancelled_while_draining {
        return Err(anyhow::Error::new(Cancelled))
            .with_context(|| format!("Failed waiting for {}", label));
    }
    let exit_code = status.code();
    debug!(pid, ?exit_code, "Child process exited");

    Ok(ScriptOutput {
        stdout,
        stderr,
        exit_code,
        success: status.success(),
    })
}

/// Wait for the output readers of the group led by `pid` to reach end of file.
///
/// Background processes left behind by the leader keep its pipes open. They
/// get `STRAGGLER_DRAIN` to finish before the rest of the group is
/// terminated; cancellation terminates them at once. Returns true if
/// cancellation was requested while the readers were still open.
fn await_readers(
    pid: u32,
    label: &str,
    readers: [&Option<JoinHandle<String>>; 2],
    cancellation: &Cancellation,
) -> bool {
    let finished = || readers.iter().all(|r| r.as_ref().is_none_or(JoinHandle::is_finished));
    let deadline = Instant::now() + STRAGGLER_DRAIN;
    let mut cancelled = false;

    while !finished() {
        if cancellation.is_cancelled() {
            warn!(pid, "Cancellation requested, terminating processes left by {label}");
            terminate_stragglers(pid, CANCEL_GRACE_PERIOD);
            cancelled = true;
            break;
        }
        if Instant::now() >= deadline {
            warn!(pid, "{label} left background processes running, terminating them");
            terminate_stragglers(pid, CANCEL_GRACE_PERIOD);
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    // Anything that escaped the process group still holds the pipes
    let deadline = Instant::now() + STRAGGLER_DRAIN;
    while !finished() && Instant::now() < deadline {
        thread::sleep(POLL_INTERVAL);
    }
    cancelled
}

/// Output gathered by a reader, or nothing if it never reached end of file
fn collect_output(reader: Option<JoinHandle<String>>) -> String {
    match reader {
        Some(handle) if handle.is_finished() => handle.join().unwrap_or_default(),
        Some(_) => {
            warn!("Output pipe still open after the process group was terminated, output dropped");
            String::new()
        }
        None => String::new(),
    }
}

/// Runs scripts by writing them to a temporary working directory and
/// invoking an interpreter on the file.
///
/// The temporary directory is the process's working directory and is
/// removed afterwards, whatever the outcome.
#[derive(Debug, Clone)]
pub struct ShellScriptExecutor {
    interpreter: String,
    interpreter_args: Vec<String>,
}

impl Default for ShellScriptExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_INTERPRETER)
    }
}

impl ShellScriptExecutor {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            interpreter_args: Vec::new(),
        }
    }

    /// Arguments passed to the interpreter before the script path
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interpreter_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }
}

impl ScriptExecutor for ShellScriptExecutor {
    fn execute(&self, script: &Script, cancellation: &Cancellation) -> Result<()> {
        let workdir = tempfile::Builder::new()
            .prefix("repomigrate-")
            .tempdir()
            .context("Failed to create script working directory")?;
        debug!(path = ?workdir.path(), "Created script working directory");

        let file_name = Path::new(script.name())
            .file_name()
            .with_context(|| format!("Script name has no file name component: {}", script.name()))?;
        let script_path = workdir.path().join(file_name);
        fs::write(&script_path, script.content())
            .with_context(|| format!("Failed to write script file {:?}", script_path))?;

        let mut cmd = Command::new(self.interpreter());
        cmd.args(&self.interpreter_args)
            .arg(&script_path)
            .current_dir(workdir.path());

        let output = run_supervised(&mut cmd, script.name(), cancellation)?;
        output.ensure_success(&format!("{} {}", self.interpreter(), script.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bash() -> ShellScriptExecutor {
        ShellScriptExecutor::default()
    }

    #[test]
    fn test_script_output_ensure_success() {
        let ok = ScriptOutput {
            stdout: "OK".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
        };
        assert!(ok.ensure_success("noop").is_ok());

        let failed = ScriptOutput {
            stdout: String::new(),
            stderr: "path not found\n".to_string(),
            exit_code: Some(2),
            success: false,
        };
        let msg = failed.ensure_success("bash 001.sh").unwrap_err().to_string();
        assert_eq!(msg, "bash 001.sh failed (exit code 2): path not found");

        let signalled = ScriptOutput {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            success: false,
        };
        assert!(signalled
            .ensure_success("bash 002.sh")
            .unwrap_err()
            .to_string()
            .contains("terminated by a signal"));
    }

    #[test]
    fn test_run_supervised_captures_output() {
        let mut cmd = Command::new("bash");
        cmd.args(["-c", "echo out; echo err >&2"]);
        let output = run_supervised(&mut cmd, "capture", &Cancellation::new()).expect("run");

        assert!(output.success);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.exit_code, Some(0));
    }

    #[test]
    fn test_run_supervised_reports_exit_code() {
        let mut cmd = Command::new("bash");
        cmd.args(["-c", "exit 7"]);
        let output = run_supervised(&mut cmd, "exit", &Cancellation::new()).expect("run");

        assert!(!output.success);
        assert_eq!(output.exit_code, Some(7));
    }

    #[test]
    fn test_run_supervised_unknown_program() {
        let mut cmd = Command::new("definitely-not-an-interpreter-xyz");
        let err = run_supervised(&mut cmd, "missing", &Cancellation::new()).unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }

    #[test]
    fn test_run_supervised_stops_on_cancellation() {
        let token = Cancellation::new();
        let canceller = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            canceller.cancel();
        });

        let start = std::time::Instant::now();
        let mut cmd = Command::new("bash");
        cmd.args(["-c", "sleep 30"]);
        let err = run_supervised(&mut cmd, "sleeper", &token).unwrap_err();

        assert!(crate::error::is_cancellation(&err));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_run_supervised_terminates_leftover_background_process() {
        let start = std::time::Instant::now();
        let mut cmd = Command::new("bash");
        cmd.args(["-c", "sleep 30 &\necho started"]);
        let output = run_supervised(&mut cmd, "daemon", &Cancellation::new()).expect("run");

        assert!(output.success);
        assert_eq!(output.stdout, "started\n");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_executor_cancelled_while_background_process_holds_output() {
        let token = Cancellation::new();
        let canceller = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            canceller.cancel();
        });

        let executor = ShellScriptExecutor::default();
        let script = Script::new("001-daemon.sh", "sleep 30 &\nsleep 0.1\necho started\n");
        let start = std::time::Instant::now();
        let err = executor.execute(&script, &token).unwrap_err();

        assert!(crate::error::is_cancellation(&err), "{err:#}");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_default_interpreter_is_bash() {
        assert_eq!(ShellScriptExecutor::default().interpreter(), DEFAULT_INTERPRETER);
        assert_eq!(ShellScriptExecutor::new("sh").interpreter(), "sh");
    }

    #[test]
    fn test_executor_runs_script_content() {
        let target = tempfile::TempDir::new().expect("tempdir");
        let marker = target.path().join("marker.txt");
        let script = Script::new(
            "001-touch.sh",
            format!("set -e\necho migrated > '{}'\n", marker.display()),
        );

        bash().execute(&script, &Cancellation::new()).expect("script should run");
        assert_eq!(fs::read_to_string(&marker).expect("marker"), "migrated\n");
    }

    #[test]
    fn test_executor_runs_in_temporary_directory() {
        let target = tempfile::TempDir::new().expect("tempdir");
        let out = target.path().join("pwd.txt");
        let script = Script::new("001-pwd.sh", format!("ls > '{}'\n", out.display()));

        bash().execute(&script, &Cancellation::new()).expect("script should run");
        // Working directory holds only the script file itself
        assert_eq!(fs::read_to_string(&out).expect("listing"), "001-pwd.sh\n");
    }

    #[test]
    fn test_executor_failure_is_error() {
        let script = Script::new("002-fail.sh", "echo boom >&2\nexit 3\n");
        let err = bash().execute(&script, &Cancellation::new()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("002-fail.sh"));
        assert!(msg.contains("exit code 3"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_executor_passes_interpreter_args() {
        let script = Script::new("003-unset.sh", "echo \"$UNDEFINED_VARIABLE_XYZ\"\n");
        let strict = ShellScriptExecutor::new("bash").with_args(["-u"]);
        assert!(strict.execute(&script, &Cancellation::new()).is_err());
        assert!(bash().execute(&script, &Cancellation::new()).is_ok());
    }

    #[test]
    fn test_executor_skips_when_already_cancelled() {
        let token = Cancellation::new();
        token.cancel();
        let err = bash()
            .execute(&Script::new("001.sh", "true"), &token)
            .unwrap_err();
        assert!(crate::error::is_cancellation(&err));
    }
}
