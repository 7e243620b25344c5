//! Running external tools.
//!
//! Everything the pipeline shells out to (pip, auditwheel, git, the package's own
//! metadata query) goes through the [`ProcessRunner`] trait, so the orchestration
//! can be exercised against a scripted runner in tests. [`SystemRunner`] is the
//! real implementation: it echoes the (redacted) command line, enforces the
//! wall-clock timeout and kills the child when it expires.

use std::ffi::OsStr;
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Placeholder printed instead of a secret
pub const REDACTED: &str = "<GITHUB_TOKEN>";

/// A single external command the pipeline wants to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Wall-clock budget; `None` waits forever
    pub timeout: Option<Duration>,
    /// Capture stdout/stderr instead of inheriting the parent's streams
    pub capture: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
            capture: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn capture_output(mut self) -> Self {
        self.capture = true;
        self
    }

    /// The command line as a single string with every secret replaced by [`REDACTED`]
    pub fn display_redacted<S: AsRef<str>>(&self, secrets: &[S]) -> String {
        let line = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        redact(&line, secrets)
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_redacted::<&str>(&[]))
    }
}

/// Replace every occurrence of any (non-empty) secret in `text`
pub fn redact<S: AsRef<str>>(text: &str, secrets: &[S]) -> String {
    let mut redacted = text.to_string();
    for secret in secrets {
        let secret = secret.as_ref();
        if !secret.is_empty() {
            redacted = redacted.replace(secret, REDACTED);
        }
    }
    redacted
}

/// What a finished process left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Result of an invocation that could be started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed(ProcessOutput),
    /// The timeout expired, the process was killed
    TimedOut,
}

/// The process could not be run at all
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to start `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to wait for `{program}`")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to read the output of `{program}`")]
    Capture {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Capability to run external commands
pub trait ProcessRunner {
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutcome, RunError>;
}

/// Runs commands on the host
#[derive(Debug, Default, Clone)]
pub struct SystemRunner {
    secrets: Vec<String>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mask `secret` whenever a command line is echoed
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }
}

type Reader = JoinHandle<io::Result<String>>;

fn spawn_reader(mut pipe: impl Read + Send + 'static) -> Reader {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

fn join_reader(reader: Option<Reader>, program: &str) -> Result<String, RunError> {
    match reader {
        None => Ok(String::new()),
        Some(handle) => handle
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("reader thread panicked")))
            .map_err(|source| RunError::Capture {
                program: program.to_string(),
                source,
            }),
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ProcessOutcome, RunError> {
        eprintln!("$ {}", invocation.display_redacted(&self.secrets));

        let program = invocation.program.as_str();
        let mut command = Command::new(program);
        command.args(&invocation.args).stdin(Stdio::null());
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }
        for (key, value) in &invocation.env {
            command.env(key, value);
        }
        if invocation.capture {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = command.spawn().map_err(|source| RunError::Spawn {
            program: program.to_string(),
            source,
        })?;
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let wait_error = |source| RunError::Wait {
            program: program.to_string(),
            source,
        };
        let status = match invocation.timeout {
            None => child.wait().map_err(wait_error)?,
            Some(timeout) => match child.wait_timeout(timeout).map_err(wait_error)? {
                Some(status) => status,
                None => {
                    warn!(
                        "`{}` exceeded its timeout of {}s, killing it",
                        program,
                        timeout.as_secs()
                    );
                    // The child may have exited between the timeout and the kill
                    if let Err(err) = child.kill() {
                        debug!("Failed to kill `{}`: {}", program, err);
                    }
                    child.wait().map_err(wait_error)?;
                    // Grandchildren can keep the pipes open, so the readers are detached
                    // instead of joined
                    return Ok(ProcessOutcome::TimedOut);
                }
            },
        };

        let stdout = join_reader(stdout, program)?;
        let stderr = join_reader(stderr, program)?;
        debug!(program, code = ?status.code(), "process finished");
        Ok(ProcessOutcome::Completed(ProcessOutput {
            code: status.code(),
            stdout,
            stderr,
        }))
    }
}
