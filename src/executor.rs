//! Step executor - runs one [`Step`] and reports how it went.
//!
//! Execution is synchronous: the caller is blocked until the child exits, so a
//! failure is always observed before anything that depends on it is launched.

use std::fs;
use std::io;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::StepError;
use crate::privilege::Elevation;
use crate::process::{Cmd, Supervised};
use crate::step::Step;

/// Outcome of a successful step. Failures are a [`StepError`].
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub step_name: String,
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Anything that can run a step. The engine only talks to this trait, so tests
/// substitute a recording executor and never touch the host.
pub trait StepExecutor: Send + Sync {
    fn execute(&self, step: &Step) -> Result<ExecutionResult, StepError>;
}

/// Runs steps as real child processes on this machine.
pub struct SystemExecutor {
    elevation: Elevation,
    cancel: CancelToken,
    stream: bool,
}

impl SystemExecutor {
    pub fn new(elevation: Elevation, cancel: CancelToken) -> Self {
        Self {
            elevation,
            cancel,
            stream: false,
        }
    }

    /// Echo child output live in addition to capturing it.
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    fn ensure_working_directory(&self, step: &Step) -> Result<(), StepError> {
        let dir = &step.working_directory;
        if dir.is_dir() {
            return Ok(());
        }
        let environment_error = || StepError::Environment {
            step: step.name.clone(),
            dir: dir.clone(),
        };
        if !step.create_working_directory || dir.exists() {
            return Err(environment_error());
        }
        fs::create_dir_all(dir).map_err(|e| {
            tracing::warn!("creating {}: {e}", dir.display());
            environment_error()
        })
    }
}

impl StepExecutor for SystemExecutor {
    fn execute(&self, step: &Step) -> Result<ExecutionResult, StepError> {
        self.ensure_working_directory(step)?;

        let argv = self.elevation.wrap(&step.command, step.requires_privilege);
        let program = argv.first().cloned().unwrap_or_default();
        let cmd = Cmd::from_argv(&argv).ok_or_else(|| StepError::Execution {
            step: step.name.clone(),
            program: program.clone(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
        })?;

        tracing::info!(
            step = %step.name,
            cwd = %step.working_directory.display(),
            "running: {}",
            argv.join(" ")
        );

        let start = Instant::now();
        let outcome = cmd
            .dir(&step.working_directory)
            .stream(self.stream)
            .cancel_on(&self.cancel)
            .supervise()
            .map_err(|source| StepError::Execution {
                step: step.name.clone(),
                program,
                source,
            })?;
        let duration = start.elapsed();

        let output = match outcome {
            Supervised::Exited(output) => output,
            Supervised::Interrupted { signal, .. } => {
                return Err(StepError::Cancelled {
                    step: step.name.clone(),
                    signal,
                });
            }
        };

        tracing::debug!(step = %step.name, code = output.code(), ?duration, "exited");

        if !output.success() {
            return Err(StepError::StepFailed {
                step: step.name.clone(),
                code: output.code(),
                stderr: output.stderr,
            });
        }

        Ok(ExecutionResult {
            step_name: step.name.clone(),
            exit_status: output.code(),
            stdout: output.stdout,
            stderr: output.stderr,
            duration,
        })
    }
}
