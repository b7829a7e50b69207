//! Host tool availability checks.

use crate::privilege::Elevation;
use crate::process;

use super::types::CheckResult;

/// Tools every plan invokes, with the package that provides them.
const REQUIRED_TOOLS: &[(&str, &str, &str)] = &[
    ("apt-get", "apt", "Installs the build toolchain and OpenSSL"),
    ("sh", "dash", "Runs the gRPC release lookup"),
    ("wget", "wget", "Downloads the Protobuf and MKL archives"),
    ("tar", "tar", "Extracts downloaded archives"),
    ("sed", "sed", "Fills in the MKL installer answer file"),
];

/// Tools the gRPC unit installs itself if missing.
const BOOTSTRAPPED_TOOLS: &[(&str, &str, &str)] = &[
    ("git", "git", "Clones gRPC"),
    ("curl", "curl", "Resolves the latest gRPC release"),
    ("make", "build-essential", "Builds every library and the service"),
    ("cmake", "cmake", "Generates the service mid-tier build"),
    ("pkg-config", "pkg-config", "Detects an existing gRPC install"),
];

/// Check host tools are installed.
pub fn check_host_tools(elevation: &Elevation) -> Vec<CheckResult> {
    let mut results = Vec::new();

    for (tool, package, purpose) in REQUIRED_TOOLS {
        results.push(check_tool_exists(tool, package, purpose, true));
    }

    for (tool, package, purpose) in BOOTSTRAPPED_TOOLS {
        results.push(check_tool_exists(
            tool,
            package,
            &format!("{} (installed by the gRPC unit)", purpose),
            false,
        ));
    }

    match elevation.tool() {
        None => results.push(CheckResult::pass_with("elevation", "none (running as root)")),
        Some(tool) => results.push(check_tool_exists(
            tool,
            tool,
            "Required for privileged install steps",
            true,
        )),
    }

    results
}

/// Check if a tool exists in PATH.
fn check_tool_exists(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path),
        None => {
            let msg = format!("Not found. Install '{}' package. {}", package, purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}
