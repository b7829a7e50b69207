//! Environment checks (work directory, service tree).

use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::target::TargetBuilder;

use super::types::CheckResult;

/// Check the directories the plan works in.
pub fn check_environment(config: &Config) -> Vec<CheckResult> {
    let mut results = vec![check_writable("work directory", &config.work_dir)];

    let tree = config.service_root.join(config.service.dir_name());
    if !tree.is_dir() {
        results.push(CheckResult::fail(
            "service tree",
            &format!("{} not found. Set SETUP_SERVICE_ROOT.", tree.display()),
        ));
        return results;
    }
    results.push(CheckResult::pass_with("service tree", &tree.display().to_string()));

    // Build directories inside an area are created on demand; the area
    // itself must ship with the service tree.
    let target = TargetBuilder::for_service(config.service, &config.service_root);
    for area in &target.areas {
        let name = format!("{} area", area.name);
        let dir = tree.join(&area.name);
        if dir.is_dir() {
            results.push(CheckResult::pass(&name));
        } else {
            results.push(CheckResult::fail(&name, &format!("{} missing", dir.display())));
        }
    }

    results
}

/// Pass if `dir` exists (or can be created) and accepts writes.
fn check_writable(name: &str, dir: &Path) -> CheckResult {
    if let Err(e) = fs::create_dir_all(dir) {
        return CheckResult::fail(name, &format!("Cannot create {}: {}", dir.display(), e));
    }
    let probe = dir.join(".preflight-test");
    match fs::write(&probe, "test") {
        Ok(_) => {
            let _ = fs::remove_file(&probe);
            CheckResult::pass_with(name, &dir.display().to_string())
        }
        Err(e) => CheckResult::fail(name, &format!("Cannot write to {}: {}", dir.display(), e)),
    }
}
