//! Error taxonomy for plan construction and step execution.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why a single step did not complete.
#[derive(Error, Debug)]
pub enum StepError {
    /// Working directory missing (and not creatable) before spawning.
    #[error("step '{step}': working directory {} does not exist", dir.display())]
    Environment { step: String, dir: PathBuf },

    /// The process could not be launched at all.
    #[error("step '{step}': failed to execute '{program}': {source}")]
    Execution {
        step: String,
        program: String,
        #[source]
        source: io::Error,
    },

    /// The process ran and exited non-zero.
    #[error("step '{step}' exited with code {code}")]
    StepFailed {
        step: String,
        code: i32,
        stderr: String,
    },

    /// The operator interrupted the run while this step was executing.
    #[error("step '{step}' interrupted by signal {signal}")]
    Cancelled { step: String, signal: i32 },
}

impl StepError {
    /// Name of the step this error belongs to.
    pub fn step(&self) -> &str {
        match self {
            StepError::Environment { step, .. }
            | StepError::Execution { step, .. }
            | StepError::StepFailed { step, .. }
            | StepError::Cancelled { step, .. } => step,
        }
    }

    /// Exit code for `StepFailed`, `None` otherwise.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            StepError::StepFailed { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Captured error output, if the process got far enough to produce any.
    pub fn captured_stderr(&self) -> Option<&str> {
        match self {
            StepError::StepFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Raised when a prerequisite unit fails and the plan halts before the target.
#[derive(Error, Debug)]
#[error("plan aborted: unit '{unit}' failed at step {step_index} ('{step}')")]
pub struct PlanAborted {
    pub unit: String,
    pub step: String,
    /// 1-based position of the failing step within its unit.
    pub step_index: usize,
}

/// Invalid static configuration, detected when the plan is built.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlanError {
    #[error("step '{0}' has an empty command")]
    EmptyCommand(String),

    #[error("unit '{0}' has no steps")]
    EmptyUnit(String),

    #[error("target '{0}' has no build areas")]
    EmptyTarget(String),

    #[error("duplicate unit name '{0}'")]
    DuplicateUnit(String),

    #[error("unknown unit '{name}' (available: {available})")]
    UnknownUnit { name: String, available: String },
}
