//! Centralized command execution.
//!
//! Every external process goes through [`Cmd`]. Short probes (`pkg-config`,
//! `protoc --version`) use [`Cmd::run`], which captures output and fails on a
//! non-zero exit unless told otherwise. Build steps use [`Cmd::supervise`],
//! which blocks until the child exits, optionally echoes its output live, and
//! forwards an operator interrupt to the child.

use anyhow::{bail, Context, Result};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::cancel::CancelToken;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// How a supervised process ended.
#[derive(Debug)]
pub enum Supervised {
    /// Ran to completion (any exit status).
    Exited(CommandOutput),
    /// Interrupted by the operator; the signal was forwarded to the child.
    Interrupted { signal: i32, output: CommandOutput },
}

/// Builder for configuring command execution.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Echo child output to our stdout/stderr while capturing it.
    stream: bool,
    cancel: Option<CancelToken>,
}

impl Cmd {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            allow_fail: false,
            stream: false,
            cancel: None,
        }
    }

    /// Build from a full argv. Returns `None` for an empty slice.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program).args(args))
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn cancel_on(mut self, token: &CancelToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Run the command to completion and capture output.
    pub fn run(self) -> Result<CommandOutput> {
        let output = self
            .command()
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        let result = CommandOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.allow_fail && !result.success() {
            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("'{}' failed (exit code {})", self.program, result.code());
            } else {
                bail!("'{}' failed (exit code {}):\n{}", self.program, result.code(), stderr);
            }
        }

        Ok(result)
    }

    /// Spawn the command and block until it exits or the run is cancelled.
    ///
    /// Only a spawn failure is an `Err`; any exit status is reported back as
    /// [`Supervised::Exited`] for the caller to interpret.
    pub fn supervise(self) -> io::Result<Supervised> {
        let mut child = self
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().map(|r| drain(r, self.stream.then_some(Echo::Stdout)));
        let stderr = child.stderr.take().map(|r| drain(r, self.stream.then_some(Echo::Stderr)));

        let mut interrupted = None;
        let mut killed = false;
        let status = match &self.cancel {
            None => child.wait()?,
            Some(token) => loop {
                if let Some(status) = child.try_wait()? {
                    break status;
                }
                if let Some(signal) = token.signal() {
                    if interrupted.is_none() {
                        forward_signal(child.id(), signal);
                        interrupted = Some(signal);
                    }
                    if token.is_forced() && !killed {
                        forward_signal(child.id(), nix::sys::signal::Signal::SIGKILL as i32);
                        killed = true;
                    }
                }
                thread::sleep(POLL_INTERVAL);
            },
        };

        let output = CommandOutput {
            status,
            stdout: collect(stdout),
            stderr: collect(stderr),
        };

        Ok(match interrupted {
            Some(signal) => Supervised::Interrupted { signal, output },
            None => Supervised::Exited(output),
        })
    }
}

#[derive(Clone, Copy)]
enum Echo {
    Stdout,
    Stderr,
}

/// Read a child pipe to the end on its own thread.
fn drain<R: Read + Send + 'static>(pipe: R, echo: Option<Echo>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut captured = Vec::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    match echo {
                        Some(Echo::Stdout) => {
                            let _ = io::stdout().lock().write_all(&line);
                        }
                        Some(Echo::Stderr) => {
                            let _ = io::stderr().lock().write_all(&line);
                        }
                        None => {}
                    }
                    captured.extend_from_slice(&line);
                }
            }
        }
        String::from_utf8_lossy(&captured).into_owned()
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .map(|h| h.join().unwrap_or_default())
        .unwrap_or_default()
}

fn forward_signal(pid: u32, signal: i32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(signal) = Signal::try_from(signal) else {
        return;
    };
    // ESRCH just means the child already exited.
    if let Err(e) = kill(Pid::from_raw(pid as i32), signal) {
        tracing::debug!("forwarding {signal} to pid {pid}: {e}");
    }
}

// =============================================================================
// Convenience functions
// =============================================================================

/// Full path of a program on PATH, if present.
pub fn which(program: &str) -> Option<String> {
    which::which(program)
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}

// =============================================================================
// Tests
// =============================================================================
