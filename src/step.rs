//! A single external-process invocation.
//!
//! The working directory is an explicit, immutable part of each step. Nothing
//! in the engine relies on the process-wide current directory.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::PlanError;

/// One command with its working directory and privilege requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub name: String,
    /// Program followed by its arguments. Never empty.
    pub command: Vec<String>,
    pub working_directory: PathBuf,
    /// Run through the configured elevation mechanism.
    pub requires_privilege: bool,
    /// Create `working_directory` (and parents) if it is missing.
    pub create_working_directory: bool,
}

impl Step {
    /// Create an unprivileged step running `command` in `dir`.
    pub fn new<I, S>(name: impl Into<String>, dir: impl AsRef<Path>, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            command: command.into_iter().map(Into::into).collect(),
            working_directory: dir.as_ref().to_path_buf(),
            requires_privilege: false,
            create_working_directory: false,
        }
    }

    /// Run a shell snippet via `sh -c`. Only for commands that need shell
    /// substitution.
    pub fn shell(name: impl Into<String>, dir: impl AsRef<Path>, script: &str) -> Self {
        Self::new(name, dir, ["sh", "-c", script])
    }

    pub fn privileged(mut self) -> Self {
        self.requires_privilege = true;
        self
    }

    pub fn create_dir(mut self) -> Self {
        self.create_working_directory = true;
        self
    }

    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        match self.command.first() {
            Some(program) if !program.is_empty() => Ok(()),
            _ => Err(PlanError::EmptyCommand(self.name.clone())),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command.join(" "))?;
        if self.requires_privilege {
            write!(f, "  [privileged]")?;
        }
        write!(f, "  (in {})", self.working_directory.display())
    }
}
