//! Configuration management.
//!
//! Reads configuration from the environment. `main` loads `.env` first via
//! dotenvy, so process environment variables take precedence over `.env`.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::privilege::Elevation;
use crate::target::Service;

pub const DEFAULT_PROTOBUF_VERSION: &str = "3.2.0";

pub const DEFAULT_MKL_URL: &str =
    "http://registrationcenter-download.intel.com/akdlm/irc_nas/tec/11306/l_mkl_2017.2.174.tgz";

/// Setup configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where sources are fetched and built (SETUP_WORK_DIR).
    pub work_dir: PathBuf,
    /// Downstream service to build (SETUP_SERVICE).
    pub service: Service,
    /// Directory containing the service tree (SETUP_SERVICE_ROOT).
    pub service_root: PathBuf,
    /// Elevation for privileged steps (SETUP_ELEVATE).
    pub elevation: Elevation,
    pub protobuf_version: String,
    /// Explicit gRPC tag; resolved from grpc.io at fetch time when unset.
    pub grpc_tag: Option<String>,
    pub mkl_url: String,
    /// Re-run OpenSSL and MKL after the target (SETUP_REPEAT_AFTER_TARGET).
    pub repeat_after_target: bool,
    /// Build target areas on parallel workers (SETUP_PARALLEL_AREAS).
    pub parallel_areas: bool,
}

impl Config {
    /// Load from the process environment, relative to the current directory.
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir().context("Cannot determine current directory")?;
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars, &cwd)
    }

    /// Build config from a variable map. Relative paths resolve against `base_dir`.
    pub fn from_vars(vars: &HashMap<String, String>, base_dir: &Path) -> Result<Self> {
        let get = |key: &str| lookup(vars, key);
        let resolve = |value: &str| {
            let path = PathBuf::from(value);
            if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            }
        };

        let work_dir = get("SETUP_WORK_DIR")
            .map(resolve)
            .unwrap_or_else(|| base_dir.to_path_buf());

        let service_root = get("SETUP_SERVICE_ROOT")
            .map(resolve)
            .unwrap_or_else(|| work_dir.clone());

        let service = match get("SETUP_SERVICE") {
            Some(s) => s.parse().context("SETUP_SERVICE")?,
            None => Service::HdSearch,
        };

        let elevation = match get("SETUP_ELEVATE") {
            Some(s) => s.parse().context("SETUP_ELEVATE")?,
            None => Elevation::detect(),
        };

        let protobuf_version = get("SETUP_PROTOBUF_VERSION")
            .unwrap_or(DEFAULT_PROTOBUF_VERSION)
            .to_string();
        if protobuf_version.contains('/') || protobuf_version.contains(char::is_whitespace) {
            bail!("SETUP_PROTOBUF_VERSION is not a version: '{}'", protobuf_version);
        }

        let mkl_url = get("SETUP_MKL_URL").unwrap_or(DEFAULT_MKL_URL).to_string();
        if archive_name(&mkl_url).is_none() {
            bail!("SETUP_MKL_URL does not name an archive: '{}'", mkl_url);
        }

        Ok(Self {
            work_dir,
            service,
            service_root,
            elevation,
            protobuf_version,
            grpc_tag: get("SETUP_GRPC_TAG").map(str::to_string),
            mkl_url,
            repeat_after_target: parse_bool(get("SETUP_REPEAT_AFTER_TARGET"), true)
                .context("SETUP_REPEAT_AFTER_TARGET")?,
            parallel_areas: parse_bool(get("SETUP_PARALLEL_AREAS"), false)
                .context("SETUP_PARALLEL_AREAS")?,
        })
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  SETUP_WORK_DIR: {}", self.work_dir.display());
        println!("  SETUP_SERVICE: {}", self.service);
        println!("  SETUP_SERVICE_ROOT: {}", self.service_root.display());
        println!("  SETUP_ELEVATE: {}", self.elevation);
        println!("  SETUP_PROTOBUF_VERSION: {}", self.protobuf_version);
        println!(
            "  SETUP_GRPC_TAG: {}",
            self.grpc_tag.as_deref().unwrap_or("(latest release)")
        );
        println!("  SETUP_MKL_URL: {}", self.mkl_url);
        println!("  SETUP_REPEAT_AFTER_TARGET: {}", self.repeat_after_target);
        println!("  SETUP_PARALLEL_AREAS: {}", self.parallel_areas);

        let tree = self.service_root.join(self.service.dir_name());
        if tree.is_dir() {
            println!("  Service tree: FOUND ({})", tree.display());
        } else {
            println!("  Service tree: NOT FOUND ({})", tree.display());
        }
    }
}

/// Last path segment of a download URL, e.g. `l_mkl_2017.2.174.tgz`.
pub fn archive_name(url: &str) -> Option<&str> {
    let name = url.rsplit('/').next()?;
    let known = [".tgz", ".tar.gz", ".tar.xz", ".tar.bz2"];
    known.iter().any(|ext| name.ends_with(ext)).then_some(name)
}

/// Directory an archive extracts to (archive name without extension).
pub fn archive_stem(archive: &str) -> &str {
    [".tar.gz", ".tar.xz", ".tar.bz2", ".tgz"]
        .iter()
        .find_map(|ext| archive.strip_suffix(ext))
        .unwrap_or(archive)
}

/// Non-empty, trimmed value of `key`.
fn lookup<'a>(vars: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn parse_bool(value: Option<&str>, default: bool) -> Result<bool> {
    match value.map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => bail!("expected a boolean, got '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config =
            Config::from_vars(&vars(&[("SETUP_ELEVATE", "sudo")]), Path::new("/work")).unwrap();
        assert_eq!(config.work_dir, PathBuf::from("/work"));
        assert_eq!(config.service_root, PathBuf::from("/work"));
        assert_eq!(config.service, Service::HdSearch);
        assert_eq!(config.elevation, Elevation::Sudo);
        assert_eq!(config.protobuf_version, "3.2.0");
        assert!(config.grpc_tag.is_none());
        assert!(config.repeat_after_target);
        assert!(!config.parallel_areas);
    }

    #[test]
    fn test_relative_paths_resolve_against_base() {
        let config = Config::from_vars(
            &vars(&[
                ("SETUP_WORK_DIR", "deps"),
                ("SETUP_SERVICE_ROOT", "/opt/microsuite"),
                ("SETUP_ELEVATE", "none"),
            ]),
            Path::new("/home/op"),
        )
        .unwrap();
        assert_eq!(config.work_dir, PathBuf::from("/home/op/deps"));
        assert_eq!(config.service_root, PathBuf::from("/opt/microsuite"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_vars(
            &vars(&[
                ("SETUP_SERVICE", "router"),
                ("SETUP_ELEVATE", "doas"),
                ("SETUP_GRPC_TAG", "v1.3.2"),
                ("SETUP_REPEAT_AFTER_TARGET", "no"),
                ("SETUP_PARALLEL_AREAS", "1"),
            ]),
            Path::new("/w"),
        )
        .unwrap();
        assert_eq!(config.service, Service::Router);
        assert_eq!(config.elevation, Elevation::Doas);
        assert_eq!(config.grpc_tag.as_deref(), Some("v1.3.2"));
        assert!(!config.repeat_after_target);
        assert!(config.parallel_areas);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let base = Path::new("/w");
        assert!(Config::from_vars(&vars(&[("SETUP_SERVICE", "nginx")]), base).is_err());
        assert!(Config::from_vars(&vars(&[("SETUP_PARALLEL_AREAS", "maybe")]), base).is_err());
        assert!(Config::from_vars(&vars(&[("SETUP_MKL_URL", "http://x/readme")]), base).is_err());
    }

    #[test]
    fn test_archive_helpers() {
        assert_eq!(archive_name(DEFAULT_MKL_URL), Some("l_mkl_2017.2.174.tgz"));
        assert_eq!(archive_stem("l_mkl_2017.2.174.tgz"), "l_mkl_2017.2.174");
        assert_eq!(archive_stem("protobuf-cpp-3.2.0.tar.gz"), "protobuf-cpp-3.2.0");
    }
}
