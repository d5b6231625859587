//! Host-side process utilities.
//!
//! Locating the merge utility on the build machine and running external
//! processes with fully captured output.

use crate::config::{MergeTool, ESPTOOL_MODULE};
use log::debug;
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often a bounded process is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long pipe readers get to reach end of file after a kill.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// RAII guard to ensure child process is always cleaned up.
pub struct ProcessGuard(pub Child);

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

/// Exit status and output of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapturedOutput {
    /// Exit code, `None` if the process was terminated by a signal.
    pub code: Option<i32>,
    /// Whether the process exited with code zero.
    pub success: bool,
    /// Everything written to stdout.
    pub stdout: String,
    /// Everything written to stderr.
    pub stderr: String,
}

impl CapturedOutput {
    /// Best diagnostic text: stderr, or stdout if stderr is empty.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

impl From<Output> for CapturedOutput {
    fn from(output: Output) -> Self {
        Self {
            code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Run a command to completion and capture stdout and stderr in full.
///
/// Without a timeout this blocks until the process exits. With one, the
/// process is polled and killed once the timeout elapses, and its output
/// readers are joined before returning.
pub fn run_captured(
    mut command: Command,
    timeout: Option<Duration>,
) -> Result<CapturedOutput, ProcessError> {
    command.stdin(Stdio::null());

    let Some(timeout) = timeout else {
        let output = command
            .output()
            .map_err(|e| ProcessError::Spawn(e.to_string()))?;
        return Ok(output.into());
    };

    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = command
        .spawn()
        .map_err(|e| ProcessError::Spawn(e.to_string()))?;

    // Drain both pipes concurrently so a chatty child cannot block on a full pipe
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = thread::spawn(move || read_pipe(stdout));
    let stderr_reader = thread::spawn(move || read_pipe(stderr));

    let mut guard = ProcessGuard(child);
    let start = Instant::now();
    let status = loop {
        match guard.0.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => return Err(ProcessError::Wait(e.to_string())),
        }
        if start.elapsed() >= timeout {
            debug!("Killing process after {:?}", timeout);
            drop(guard);
            join_readers([stdout_reader, stderr_reader]);
            return Err(ProcessError::Timeout(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    Ok(CapturedOutput {
        code: status.code(),
        success: status.success(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// Join the pipe readers of a killed process.
///
/// A reader still blocked after [`DRAIN_GRACE`] means a descendant of the
/// killed process holds the pipe open. That reader is left detached and
/// ends when the descendant closes its copy of the pipe.
fn join_readers(readers: [JoinHandle<Vec<u8>>; 2]) {
    let deadline = Instant::now() + DRAIN_GRACE;
    for reader in readers {
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if reader.is_finished() {
            let _ = reader.join();
        } else {
            debug!("Output pipe still held open after kill, reader left detached");
        }
    }
}

fn read_pipe<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf) {
            debug!("I/O error reading process output: {}", e);
        }
    }
    buf
}

/// Where merge tool discovery looks: an executable search path and the
/// home directory holding PlatformIO and Espressif tool installs.
#[derive(Debug, Clone, Default)]
pub struct ToolSearch {
    path: Option<OsString>,
    home: Option<PathBuf>,
}

impl ToolSearch {
    /// Search the given `PATH` value and home directory.
    pub fn new(path: Option<OsString>, home: Option<PathBuf>) -> Self {
        Self { path, home }
    }

    /// Search this process's `PATH` and `HOME`.
    pub fn from_env() -> Self {
        Self::new(env::var_os("PATH"), env::var_os("HOME").map(PathBuf::from))
    }

    /// Look up an executable on the search path.
    pub fn which(&self, name: &str) -> Option<PathBuf> {
        let path = self.path.as_ref()?;
        env::split_paths(path)
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }

    /// Find a Python interpreter that can run esptool as a module.
    ///
    /// Prefers the PlatformIO virtualenv, then `python3` / `python` on the
    /// search path. Interpreters without esptool are passed over.
    pub fn find_python(&self) -> Option<PathBuf> {
        let penv = self.home.as_ref().and_then(|home| {
            first_match(&format!("{}/.platformio/penv/bin/python*", home.display()))
        });

        penv.into_iter()
            .chain(["python3", "python"].into_iter().filter_map(|n| self.which(n)))
            .find(|python| {
                let usable = python_has_esptool(python);
                if !usable {
                    debug!("{} cannot import esptool", python.display());
                }
                usable
            })
    }

    /// Find a standalone esptool executable.
    ///
    /// Searches the search path, then the Espressif tools Python environments.
    pub fn find_esptool(&self) -> Option<PathBuf> {
        if let Some(path) = ["esptool.py", "esptool"]
            .into_iter()
            .find_map(|n| self.which(n))
        {
            return Some(path);
        }

        let home = self.home.as_ref()?;
        first_match(&format!(
            "{}/.espressif/python_env/*/bin/esptool.py",
            home.display()
        ))
    }

    /// Decide how to invoke the merge utility.
    ///
    /// An explicitly supplied interpreter always wins and is not checked.
    /// Otherwise a discovered interpreter with esptool is used with
    /// `-m esptool`, then a standalone esptool.
    pub fn resolve_merge_tool(&self, python: Option<&Path>) -> Option<MergeTool> {
        if let Some(python) = python {
            return Some(MergeTool::python_module(python));
        }
        if let Some(python) = self.find_python() {
            debug!("Using discovered interpreter {}", python.display());
            return Some(MergeTool::python_module(python));
        }
        self.find_esptool().map(|path| {
            debug!("Using standalone esptool {}", path.display());
            MergeTool::executable(path)
        })
    }
}

/// [`ToolSearch::find_python`] over this process's environment.
pub fn find_python() -> Option<PathBuf> {
    ToolSearch::from_env().find_python()
}

/// [`ToolSearch::find_esptool`] over this process's environment.
pub fn find_esptool() -> Option<PathBuf> {
    ToolSearch::from_env().find_esptool()
}

/// [`ToolSearch::resolve_merge_tool`] over this process's environment.
pub fn resolve_merge_tool(python: Option<&Path>) -> Option<MergeTool> {
    ToolSearch::from_env().resolve_merge_tool(python)
}

/// Whether `<python> -m esptool version` runs successfully.
pub fn python_has_esptool(python: &Path) -> bool {
    Command::new(python)
        .args(["-m", ESPTOOL_MODULE, "version"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// First existing file matching a glob pattern, in sorted order.
fn first_match(pattern: &str) -> Option<PathBuf> {
    let paths = glob::glob(pattern).ok()?;
    let mut candidates: Vec<_> = paths.flatten().filter(|p| p.is_file()).collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Errors from running an external process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// The process could not be started.
    Spawn(String),
    /// Waiting on the process failed.
    Wait(String),
    /// The process ran longer than allowed and was killed.
    Timeout(Duration),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(e) => write!(f, "failed to start process: {}", e),
            Self::Wait(e) => write!(f, "failed to wait for process: {}", e),
            Self::Timeout(t) => write!(f, "process killed after {:.1}s timeout", t.as_secs_f64()),
        }
    }
}

impl std::error::Error for ProcessError {}
