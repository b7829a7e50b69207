//! Privilege elevation for steps flagged `requires_privilege`.
//!
//! Steps never carry a hard-coded `sudo` prefix. The executor asks the
//! configured [`Elevation`] to wrap the command instead, so a host without
//! sudo (or one already running as root) can substitute its own mechanism.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;

/// How privileged steps are elevated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Elevation {
    /// Run as-is (already root, or a container without an elevation tool).
    None,
    Sudo,
    Doas,
    /// Arbitrary prefix, e.g. `["pkexec"]`.
    Prefix(Vec<String>),
}

impl Elevation {
    /// Pick `None` for root and `Sudo` otherwise.
    pub fn detect() -> Self {
        if nix::unistd::geteuid().is_root() {
            Elevation::None
        } else {
            Elevation::Sudo
        }
    }

    /// Prefix tokens inserted before a privileged command.
    pub fn prefix(&self) -> Vec<String> {
        match self {
            Elevation::None => Vec::new(),
            Elevation::Sudo => vec!["sudo".to_string()],
            Elevation::Doas => vec!["doas".to_string()],
            Elevation::Prefix(tokens) => tokens.clone(),
        }
    }

    /// Return the argv to actually spawn for `command`.
    pub fn wrap(&self, command: &[String], privileged: bool) -> Vec<String> {
        if !privileged {
            return command.to_vec();
        }
        let mut argv = self.prefix();
        argv.extend(command.iter().cloned());
        argv
    }

    /// Program that must be on PATH for elevation to work.
    pub fn tool(&self) -> Option<&str> {
        match self {
            Elevation::None => None,
            Elevation::Sudo => Some("sudo"),
            Elevation::Doas => Some("doas"),
            Elevation::Prefix(tokens) => tokens.first().map(String::as_str),
        }
    }
}

impl fmt::Display for Elevation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Elevation::None => write!(f, "none"),
            Elevation::Sudo => write!(f, "sudo"),
            Elevation::Doas => write!(f, "doas"),
            Elevation::Prefix(tokens) => write!(f, "{}", tokens.join(" ")),
        }
    }
}

impl FromStr for Elevation {
    type Err = anyhow::Error;

    /// Parses `auto`, `none`, `sudo`, `doas`, or a custom prefix command.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "auto" => Ok(Elevation::detect()),
            "none" => Ok(Elevation::None),
            "sudo" => Ok(Elevation::Sudo),
            "doas" => Ok(Elevation::Doas),
            other => {
                let tokens: Vec<String> = other.split_whitespace().map(String::from).collect();
                if tokens.is_empty() {
                    bail!("Invalid elevation '{}'", s);
                }
                Ok(Elevation::Prefix(tokens))
            }
        }
    }
}
