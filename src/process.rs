//! External processes and output polling.
//!
//! The engine tools report success before their output is always visible on
//! disk, so every invocation is followed by a bounded existence poll.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One external tool run.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Value following `flag` in the argument list.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Program file name without directories, e.g. `g-stl`.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: &str) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.code == Some(0)
    }

    /// Stderr, falling back to stdout when the tool reports errors there.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.code {
            Some(code) => format!("exited with status {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs external tools. Replaced in tests by a runner that fakes their output.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> std::io::Result<ProcessOutput>;
}

/// Runs tools with `std::process::Command`, blocking until they exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> std::io::Result<ProcessOutput> {
        debug!(command = %invocation, "Spawning process");
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }
        let output = command.output()?;
        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Bounds of an existence poll: `attempts` checks, `delay_ms` apart.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PollConfig {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl PollConfig {
    pub const fn new(attempts: u32, delay_ms: u64) -> Self {
        Self { attempts, delay_ms }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Worst-case time spent waiting.
    pub fn max_wait(&self) -> Duration {
        self.delay() * self.attempts
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(30, 150)
    }
}

/// Wait for `path` to exist. Returns how long it took, or `None` once every
/// attempt is spent.
pub fn wait_for_file(path: &Path, poll: PollConfig) -> Option<Duration> {
    let start = Instant::now();
    for attempt in 0..poll.attempts.max(1) {
        if path.exists() {
            if attempt > 0 {
                debug!(path = %path.display(), attempt, "Output appeared");
            }
            return Some(start.elapsed());
        }
        if attempt + 1 < poll.attempts {
            thread::sleep(poll.delay());
        }
    }
    warn!(
        path = %path.display(),
        attempts = poll.attempts,
        waited_ms = start.elapsed().as_millis() as u64,
        "Output never appeared"
    );
    None
}
