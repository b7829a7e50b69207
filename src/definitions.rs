//! Dependency unit definitions.
//!
//! Static configuration data: what each library needs, in pipeline order.
//! The unit runner interprets these. Nothing here runs anything.

use std::path::Path;

use crate::config::{archive_name, archive_stem, Config};
use crate::error::PlanError;
use crate::orchestrator::InstallPlan;
use crate::step::Step;
use crate::target::TargetBuilder;
use crate::unit::{DependencyUnit, Satisfied};

const GRPC_REPO: &str = "https://github.com/grpc/grpc";
const GRPC_RELEASE_URL: &str = "https://grpc.io/release";

const BUILD_TOOLCHAIN: &[&str] = &[
    "build-essential",
    "autoconf",
    "libtool",
    "curl",
    "cmake",
    "git",
    "pkg-config",
];

/// `apt-get install -y <packages>`, privileged.
fn apt_install(name: &str, dir: &Path, packages: &[&str]) -> Step {
    let mut argv = vec!["apt-get", "install", "-y"];
    argv.extend_from_slice(packages);
    Step::new(name, dir, argv).privileged()
}

/// gRPC from git: toolchain, clone, submodules, make, install.
pub fn grpc(config: &Config) -> DependencyUnit {
    let work = &config.work_dir;
    let src = work.join("grpc");

    let branch = match &config.grpc_tag {
        Some(tag) => tag.clone(),
        None => format!("$(curl -fsSL {GRPC_RELEASE_URL})"),
    };
    // A checkout left by an earlier, failed run is reused.
    let clone = Step::shell(
        "clone grpc",
        work,
        &format!("test -d grpc/.git || git clone -b {branch} {GRPC_REPO}"),
    );

    DependencyUnit::new(
        "gRPC",
        vec![
            apt_install("install build toolchain", work, BUILD_TOOLCHAIN),
            clone,
            Step::new("update submodules", &src, ["git", "submodule", "update", "--init"]),
            Step::new("make", &src, ["make"]),
            Step::new("make install", &src, ["make", "install"]).privileged(),
        ],
        Satisfied::Any(vec![
            Satisfied::command(["pkg-config", "--exists", "grpc++"]),
            Satisfied::PathExists("/usr/local/lib/libgrpc++.so".into()),
        ]),
    )
}

/// Protobuf from the release tarball, with the test suite run before install.
pub fn protobuf(config: &Config) -> DependencyUnit {
    let work = &config.work_dir;
    let version = &config.protobuf_version;
    let archive = format!("protobuf-cpp-{version}.tar.gz");
    let url = format!("https://github.com/google/protobuf/releases/download/v{version}/{archive}");
    let src = work.join(format!("protobuf-{version}"));

    DependencyUnit::new(
        "Protobuf",
        vec![
            Step::new("download archive", work, ["wget", "-nc", url.as_str()]),
            Step::new("extract archive", work, ["tar", "-xzvf", archive.as_str()]),
            Step::new("configure", &src, ["./configure"]),
            Step::new("make", &src, ["make"]),
            Step::new("make check", &src, ["make", "check"]),
            Step::new("make install", &src, ["make", "install"]).privileged(),
            Step::new("ldconfig", &src, ["ldconfig"]).privileged(),
        ],
        Satisfied::OutputContains {
            command: vec!["protoc".into(), "--version".into()],
            needle: format!("libprotoc {version}"),
        },
    )
}

/// OpenSSL runtime and headers from the system package manager.
pub fn openssl(config: &Config) -> DependencyUnit {
    let work = &config.work_dir;
    DependencyUnit::new(
        "OpenSSL",
        vec![
            apt_install("install openssl", work, &["openssl"]),
            apt_install("install libssl-dev", work, &["libssl-dev"]),
        ],
        Satisfied::All(vec![
            Satisfied::command(["openssl", "version"]),
            Satisfied::PathExists("/usr/include/openssl/ssl.h".into()),
        ]),
    )
}

/// Where the MKL installer is told to install; the predicate checks the same tree.
const MKL_INSTALL_DIR: &str = "/opt/intel";
/// Answer file shipped inside the MKL archive.
const MKL_SILENT_CFG: &str = "silent.cfg";

/// Intel MKL via its bundled installer, run unattended.
pub fn mkl(config: &Config) -> DependencyUnit {
    let work = &config.work_dir;
    // Validated by Config::from_vars.
    let archive = archive_name(&config.mkl_url).unwrap_or("mkl.tgz");
    let src = work.join(archive_stem(archive));
    let install_dir = format!("s|^PSET_INSTALL_DIR=.*|PSET_INSTALL_DIR={MKL_INSTALL_DIR}|");

    DependencyUnit::new(
        "MKL",
        vec![
            Step::new("download archive", work, ["wget", "-nc", config.mkl_url.as_str()]),
            Step::new("extract archive", work, ["tar", "-xzvf", archive]),
            Step::new(
                "accept eula",
                &src,
                [
                    "sed",
                    "-i",
                    "-e",
                    "s|^ACCEPT_EULA=.*|ACCEPT_EULA=accept|",
                    "-e",
                    install_dir.as_str(),
                    MKL_SILENT_CFG,
                ],
            ),
            Step::new("run installer", &src, ["./install.sh", "--silent", MKL_SILENT_CFG])
                .privileged(),
        ],
        Satisfied::PathExists(Path::new(MKL_INSTALL_DIR).join("mkl")),
    )
}

/// The configured downstream service.
pub fn target(config: &Config) -> TargetBuilder {
    TargetBuilder::for_service(config.service, &config.service_root).parallel(config.parallel_areas)
}

/// The full plan: gRPC, Protobuf, OpenSSL, MKL, then the service, then
/// (optionally) OpenSSL and MKL once more.
pub fn install_plan(config: &Config) -> Result<InstallPlan, PlanError> {
    let units = vec![grpc(config), protobuf(config), openssl(config), mkl(config)];

    let post_target = if config.repeat_after_target {
        [openssl(config), mkl(config)]
            .into_iter()
            .map(|mut unit| {
                unit.name = format!("{} (post-target)", unit.name);
                unit
            })
            .collect()
    } else {
        Vec::new()
    };

    InstallPlan::new(units, Some(target(config)), post_target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privilege::Elevation;
    use std::collections::HashMap;

    fn config(extra: &[(&str, &str)]) -> Config {
        let mut vars: HashMap<String, String> = extra
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        vars.insert("SETUP_ELEVATE".into(), "sudo".into());
        Config::from_vars(&vars, Path::new("/w")).unwrap()
    }

    fn step_names(unit: &DependencyUnit) -> Vec<&str> {
        unit.steps.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_protobuf_pipeline_order() {
        let unit = protobuf(&config(&[]));
        assert_eq!(
            step_names(&unit),
            vec![
                "download archive",
                "extract archive",
                "configure",
                "make",
                "make check",
                "make install",
                "ldconfig"
            ]
        );
        assert_eq!(unit.steps[2].working_directory, Path::new("/w/protobuf-3.2.0"));
        assert!(unit.steps[5].requires_privilege);
        assert!(unit.steps[6].requires_privilege);
        assert!(!unit.steps[4].requires_privilege);
    }

    #[test]
    fn test_privilege_is_a_flag_not_a_prefix() {
        let plan = install_plan(&config(&[])).unwrap();
        for (_, step) in plan.all_steps() {
            assert_ne!(step.program(), Some("sudo"), "{}", step.name);
        }
        // The configured elevation is only applied by the executor.
        assert_eq!(config(&[]).elevation, Elevation::Sudo);
    }

    #[test]
    fn test_grpc_clone_uses_tag_when_configured() {
        let unit = grpc(&config(&[("SETUP_GRPC_TAG", "v1.3.2")]));
        assert_eq!(
            unit.steps[1].command[2],
            format!("test -d grpc/.git || git clone -b v1.3.2 {GRPC_REPO}")
        );

        let latest = grpc(&config(&[]));
        assert_eq!(latest.steps[1].program(), Some("sh"));
        assert!(latest.steps[1].command[2].contains(GRPC_RELEASE_URL));
        assert!(latest.steps[1].command[2].starts_with("test -d grpc/.git ||"));
    }

    #[test]
    fn test_plan_order_with_repeat() {
        let plan = install_plan(&config(&[])).unwrap();
        let names: Vec<_> = plan.units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["gRPC", "Protobuf", "OpenSSL", "MKL"]);
        assert_eq!(plan.target.as_ref().map(|t| t.name.as_str()), Some("HDSearch"));
        let post: Vec<_> = plan.post_target.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(post, vec!["OpenSSL (post-target)", "MKL (post-target)"]);
    }

    #[test]
    fn test_plan_without_repeat() {
        let plan = install_plan(&config(&[("SETUP_REPEAT_AFTER_TARGET", "false")])).unwrap();
        assert!(plan.post_target.is_empty());
    }

    #[test]
    fn test_mkl_extract_directory() {
        let unit = mkl(&config(&[]));
        assert_eq!(unit.steps[2].working_directory, Path::new("/w/l_mkl_2017.2.174"));
        assert_eq!(unit.steps[3].working_directory, Path::new("/w/l_mkl_2017.2.174"));
    }

    #[test]
    fn test_mkl_installer_is_unattended_and_privileged() {
        let unit = mkl(&config(&[]));
        assert_eq!(
            step_names(&unit),
            vec!["download archive", "extract archive", "accept eula", "run installer"]
        );

        let eula = &unit.steps[2].command;
        assert!(eula.contains(&"s|^ACCEPT_EULA=.*|ACCEPT_EULA=accept|".to_string()));
        assert!(eula.contains(&"s|^PSET_INSTALL_DIR=.*|PSET_INSTALL_DIR=/opt/intel|".to_string()));
        assert!(!unit.steps[2].requires_privilege);

        let installer = &unit.steps[3];
        assert_eq!(installer.command, vec!["./install.sh", "--silent", "silent.cfg"]);
        assert!(installer.requires_privilege);
        assert!(format!("{:?}", unit.already_satisfied).contains("/opt/intel/mkl"));
    }
}
